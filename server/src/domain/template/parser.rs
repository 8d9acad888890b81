//! Recursive descent parser turning action tokens into typed expressions.
//!
//! Pipelines are desugared at parse time: `a | f x` becomes `f(x, a)`.
//! Every expression has a static type (string or label map), so type
//! errors surface at compile time and rendering can only fail on data.

use super::error::TemplateError;
use super::lexer::{Spanned, Token};

pub(super) const FIELD_METRIC_NAME: &str = "SignalFxMetricName";
pub(super) const FIELD_LABELS: &str = "SignalFxLabels";

/// Deepest allowed nesting of calls and parenthesized pipelines
pub(super) const MAX_DEPTH: usize = 32;

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "end", "range", "with", "define", "template", "block", "break", "continue",
];

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    MetricName,
    Labels,
    Label(String),
    Literal(String),
    Call { func: Func, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Func {
    Index,
    Print,
    Lower,
    Upper,
    Replace,
    TrimPrefix,
    TrimSuffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Str,
    Map,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "index" => Some(Self::Index),
            "print" => Some(Self::Print),
            "lower" => Some(Self::Lower),
            "upper" => Some(Self::Upper),
            "replace" => Some(Self::Replace),
            "trimPrefix" => Some(Self::TrimPrefix),
            "trimSuffix" => Some(Self::TrimSuffix),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Print => "print",
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Replace => "replace",
            Self::TrimPrefix => "trimPrefix",
            Self::TrimSuffix => "trimSuffix",
        }
    }

    /// Fixed arity, `None` for variadic functions
    fn arity(self) -> Option<usize> {
        match self {
            Self::Print => None,
            Self::Lower | Self::Upper => Some(1),
            Self::Index | Self::TrimPrefix | Self::TrimSuffix => Some(2),
            Self::Replace => Some(3),
        }
    }
}

impl Expr {
    fn kind(&self) -> Kind {
        match self {
            Expr::Labels => Kind::Map,
            _ => Kind::Str,
        }
    }

    /// Nested call depth. Arguments are already bounded by [`MAX_DEPTH`]
    /// when a call is built, so this never recurses further than that.
    fn depth(&self) -> usize {
        match self {
            Expr::Call { args, .. } => 1 + args.iter().map(Expr::depth).max().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Parse the tokens of a single action into one string-valued expression.
pub(super) fn parse_action(tokens: &[Spanned]) -> Result<Expr, TemplateError> {
    if let Some(Spanned {
        token: Token::Ident(name),
        ..
    }) = tokens.first()
        && CONTROL_KEYWORDS.contains(&name.as_str())
    {
        return Err(TemplateError::UnsupportedAction(name.clone()));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.pipeline()?;
    if let Some(extra) = parser.peek() {
        return Err(TemplateError::UnexpectedToken {
            found: extra.token.describe(),
            pos: extra.pos,
        });
    }
    if expr.kind() != Kind::Str {
        return Err(TemplateError::TypeMismatch(
            "an action must produce a string, not the label map; use .SignalFxLabels.<key> or index"
                .to_string(),
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    /// Open parentheses around the current position
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Spanned> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn last_pos(&self) -> usize {
        self.tokens.last().map(|t| t.pos).unwrap_or(0)
    }

    /// pipeline := command ( '|' command )*
    fn pipeline(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.command(None)?;
        while matches!(self.peek().map(|t| &t.token), Some(Token::Pipe)) {
            self.next();
            expr = self.command(Some(expr))?;
        }
        Ok(expr)
    }

    /// command := IDENT operand* | operand
    ///
    /// `piped` is the value flowing in from the left of a `|`; it becomes
    /// the final argument of the function call.
    fn command(&mut self, piped: Option<Expr>) -> Result<Expr, TemplateError> {
        let Some(first) = self.peek() else {
            return Err(TemplateError::EmptyAction(self.last_pos()));
        };

        if let Token::Ident(name) = &first.token {
            self.next();
            if CONTROL_KEYWORDS.contains(&name.as_str()) {
                return Err(TemplateError::UnsupportedAction(name.clone()));
            }
            let func =
                Func::lookup(name).ok_or_else(|| TemplateError::UnknownFunction(name.clone()))?;

            let mut args = Vec::new();
            while let Some(next) = self.peek() {
                match next.token {
                    Token::Pipe | Token::RParen => break,
                    _ => args.push(self.operand()?),
                }
            }
            if let Some(piped) = piped {
                args.push(piped);
            }
            let expr = call(func, args)?;
            if expr.depth() > MAX_DEPTH {
                return Err(TemplateError::TooDeep(first.pos));
            }
            return Ok(expr);
        }

        if piped.is_some() {
            return Err(TemplateError::UnexpectedToken {
                found: first.token.describe(),
                pos: first.pos,
            });
        }
        let operand = self.operand()?;
        if let Some(next) = self.peek()
            && !matches!(next.token, Token::Pipe | Token::RParen)
        {
            return Err(TemplateError::UnexpectedToken {
                found: next.token.describe(),
                pos: next.pos,
            });
        }
        Ok(operand)
    }

    /// operand := FIELD | STRING | '(' pipeline ')'
    fn operand(&mut self) -> Result<Expr, TemplateError> {
        let Some(spanned) = self.next() else {
            return Err(TemplateError::EmptyAction(self.last_pos()));
        };
        match &spanned.token {
            Token::Field(path) => field(path),
            Token::Str(value) => Ok(Expr::Literal(value.clone())),
            Token::LParen => {
                self.depth += 1;
                if self.depth > MAX_DEPTH {
                    return Err(TemplateError::TooDeep(spanned.pos));
                }
                let inner = self.pipeline()?;
                self.depth -= 1;
                match self.next() {
                    Some(Spanned {
                        token: Token::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(TemplateError::UnexpectedToken {
                        found: other.token.describe(),
                        pos: other.pos,
                    }),
                    None => Err(TemplateError::UnexpectedToken {
                        found: "end of action (missing ')')".to_string(),
                        pos: self.last_pos(),
                    }),
                }
            }
            Token::Ident(name) => {
                // Functions are only callable in command position or in parentheses
                Err(TemplateError::UnexpectedToken {
                    found: format!("function '{}' as an argument (wrap it in parentheses)", name),
                    pos: spanned.pos,
                })
            }
            other => Err(TemplateError::UnexpectedToken {
                found: other.describe(),
                pos: spanned.pos,
            }),
        }
    }
}

fn field(path: &[String]) -> Result<Expr, TemplateError> {
    match path {
        [name] if name == FIELD_METRIC_NAME => Ok(Expr::MetricName),
        [name] if name == FIELD_LABELS => Ok(Expr::Labels),
        [name, key] if name == FIELD_LABELS => Ok(Expr::Label(key.clone())),
        _ => Err(TemplateError::UnknownField(path.join("."))),
    }
}

fn call(func: Func, args: Vec<Expr>) -> Result<Expr, TemplateError> {
    if let Some(expected) = func.arity()
        && args.len() != expected
    {
        return Err(TemplateError::Arity {
            name: func.name(),
            expected,
            got: args.len(),
        });
    }

    for (i, arg) in args.iter().enumerate() {
        let wanted = if func == Func::Index && i == 0 {
            Kind::Map
        } else {
            Kind::Str
        };
        if arg.kind() != wanted {
            let message = match wanted {
                Kind::Map => "index expects .SignalFxLabels as its first argument".to_string(),
                Kind::Str => format!(
                    "argument {} of '{}' must be a string, not the label map",
                    i + 1,
                    func.name()
                ),
            };
            return Err(TemplateError::TypeMismatch(message));
        }
    }

    Ok(Expr::Call { func, args })
}
