//! Single-pass lexer splitting a template into text and action tokens.
//!
//! Text outside `{{ }}` is kept verbatim. Inside an action the lexer
//! produces a flat token list; `{{-` / `-}}` trim markers strip the
//! whitespace of the neighbouring text and `{{/* */}}` comments vanish.

use super::error::TemplateError;

/// A token inside an action.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    /// `.A.b` as a path of identifiers. A bare `.` is an empty path.
    Field(Vec<String>),
    Ident(String),
    Str(String),
    Pipe,
    LParen,
    RParen,
}

impl Token {
    pub(super) fn describe(&self) -> String {
        match self {
            Token::Field(path) => format!("field '.{}'", path.join(".")),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Str(_) => "string literal".to_string(),
            Token::Pipe => "'|'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

/// A token with its byte offset in the template source.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Segment {
    Text(String),
    Action(Vec<Spanned>),
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

pub(super) fn lex(src: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut pos = 0usize;
    let mut trim_next_text = false;

    while pos < src.len() {
        let Some(rel) = src[pos..].find(OPEN) else {
            push_text(&mut segments, &src[pos..], trim_next_text, false);
            break;
        };

        let open = pos + rel;
        let bytes = src.as_bytes();
        let mut cursor = open + OPEN.len();

        // "{{- " trims the text before the action
        let trim_left = bytes.get(cursor) == Some(&b'-')
            && bytes.get(cursor + 1).is_some_and(|b| b.is_ascii_whitespace());
        if trim_left {
            cursor += 2;
        }

        push_text(&mut segments, &src[pos..open], trim_next_text, trim_left);

        let (end, trim_right) = if src[cursor..].trim_start().starts_with("/*") {
            let start = cursor + (src[cursor..].len() - src[cursor..].trim_start().len());
            lex_comment(src, start, open)?
        } else {
            let (tokens, end, trim_right) = lex_action(src, cursor, open)?;
            if tokens.is_empty() {
                return Err(TemplateError::EmptyAction(open));
            }
            segments.push(Segment::Action(tokens));
            (end, trim_right)
        };

        trim_next_text = trim_right;
        pos = end;
    }

    Ok(segments)
}

fn push_text(segments: &mut Vec<Segment>, text: &str, trim_start: bool, trim_end: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    let text = if trim_end { text.trim_end() } else { text };
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
}

/// Skip a `/* ... */` comment; returns the offset after the closing braces.
fn lex_comment(src: &str, start: usize, open: usize) -> Result<(usize, bool), TemplateError> {
    let body = &src[start + 2..];
    let Some(rel) = body.find("*/") else {
        return Err(TemplateError::UnterminatedComment(open));
    };
    let after = start + 2 + rel + 2;
    let rest = &src[after..];
    if rest.starts_with(CLOSE) {
        return Ok((after + CLOSE.len(), false));
    }
    if rest.starts_with(" -}}") {
        return Ok((after + 4, true));
    }
    Err(TemplateError::UnterminatedComment(open))
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Tokenize one action body starting after `{{`.
///
/// Returns the tokens, the offset just past `}}`, and whether the action
/// ended with a `-}}` trim marker.
fn lex_action(
    src: &str,
    mut pos: usize,
    open: usize,
) -> Result<(Vec<Spanned>, usize, bool), TemplateError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();

    while pos < bytes.len() {
        let b = bytes[pos];

        if b.is_ascii_whitespace() {
            // " -}}" closes the action and trims the following text
            if src[pos + 1..].starts_with("-}}") {
                return Ok((tokens, pos + 4, true));
            }
            pos += 1;
            continue;
        }

        if src[pos..].starts_with(CLOSE) {
            return Ok((tokens, pos + CLOSE.len(), false));
        }

        let start = pos;
        let token = match b {
            b'|' => {
                pos += 1;
                Token::Pipe
            }
            b'(' => {
                pos += 1;
                Token::LParen
            }
            b')' => {
                pos += 1;
                Token::RParen
            }
            b'.' => {
                let mut path = Vec::new();
                while bytes.get(pos) == Some(&b'.') {
                    let ident_start = pos + 1;
                    let mut end = ident_start;
                    while end < bytes.len() && is_ident_byte(bytes[end]) {
                        end += 1;
                    }
                    if end == ident_start {
                        // A bare "." only makes sense as the whole path
                        if path.is_empty() {
                            pos = end;
                            break;
                        }
                        return Err(TemplateError::UnexpectedChar { ch: '.', pos });
                    }
                    path.push(src[ident_start..end].to_string());
                    pos = end;
                }
                Token::Field(path)
            }
            b'"' => {
                let (value, end) = lex_quoted(src, pos)?;
                pos = end;
                Token::Str(value)
            }
            b'`' => {
                let Some(rel) = src[pos + 1..].find('`') else {
                    return Err(TemplateError::UnterminatedString(pos));
                };
                let value = src[pos + 1..pos + 1 + rel].to_string();
                pos += rel + 2;
                Token::Str(value)
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                while pos < bytes.len() && is_ident_byte(bytes[pos]) {
                    pos += 1;
                }
                Token::Ident(src[start..pos].to_string())
            }
            _ => {
                let ch = src[pos..].chars().next().unwrap_or('\u{fffd}');
                return Err(TemplateError::UnexpectedChar { ch, pos });
            }
        };
        tokens.push(Spanned { token, pos: start });
    }

    Err(TemplateError::UnterminatedAction(open))
}

/// Lex a double-quoted string starting at `start` (the opening quote).
fn lex_quoted(src: &str, start: usize) -> Result<(String, usize), TemplateError> {
    let mut value = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            '"' => return Ok((value, start + 1 + offset + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, '"')) => value.push('"'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, other)) => return Err(TemplateError::InvalidEscape(other)),
                None => break,
            },
            '\n' => break,
            _ => value.push(ch),
        }
    }

    Err(TemplateError::UnterminatedString(start))
}
