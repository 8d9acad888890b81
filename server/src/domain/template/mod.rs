//! Metric name and label templates
//!
//! Templates are compiled once when configuration is loaded and rendered per
//! incoming data point. The language is a small, loop-free subset of Go's
//! `text/template`: literal text, `{{ pipeline }}` actions, trim markers,
//! comments and a fixed set of string functions. See `parser.rs` for the
//! grammar.
//!
//! ```text
//! {{ .SignalFxMetricName }}
//! {{ .SignalFxLabels.host | upper }}
//! {{ index .SignalFxLabels "cp_testname" | replace " " "_" }}
//! ```

mod error;
mod lexer;
mod parser;

pub use error::{RenderError, TemplateError};

use std::collections::BTreeMap;
use std::fmt;

use lexer::Segment;
use parser::{Expr, Func};

/// Template used for a metric name when none is configured
pub const DEFAULT_NAME_TEMPLATE: &str = "{{ .SignalFxMetricName }}";

/// Per data point rendering input.
///
/// Field names visible to templates are `.SignalFxMetricName` and
/// `.SignalFxLabels`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    pub metric_name: String,
    pub labels: BTreeMap<String, String>,
}

impl RenderContext {
    /// Build a context from an upstream metric name and its dimensions.
    ///
    /// The metric name is sanitized: `.` and `:` become `_`.
    pub fn new(metric_name: &str, labels: BTreeMap<String, String>) -> Self {
        Self {
            metric_name: sanitize_metric_name(metric_name),
            labels,
        }
    }
}

pub fn sanitize_metric_name(name: &str) -> String {
    name.replace(['.', ':'], "_")
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action(Expr),
}

/// A compiled template. Cheap to clone and safe to share across tasks.
#[derive(Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Template").field(&self.source).finish()
    }
}

impl Template {
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let nodes = lexer::lex(source)?
            .into_iter()
            .map(|segment| match segment {
                Segment::Text(text) => Ok(Node::Text(text)),
                Segment::Action(tokens) => parser::parse_action(&tokens).map(Node::Action),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The fixed output of a template with no actions
    pub fn literal(&self) -> Option<String> {
        self.nodes
            .iter()
            .map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Action(_) => None,
            })
            .collect()
    }

    /// Render against one context. Pure: no I/O, no shared state.
    pub fn render(&self, ctx: &RenderContext) -> Result<String, RenderError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(expr) => out.push_str(&eval(expr, ctx)?),
            }
        }
        Ok(out)
    }
}

/// Evaluate a string-typed expression. The parser guarantees the label map
/// only appears as the first argument of `index`.
fn eval(expr: &Expr, ctx: &RenderContext) -> Result<String, RenderError> {
    match expr {
        Expr::MetricName => Ok(ctx.metric_name.clone()),
        Expr::Label(key) => ctx
            .labels
            .get(key)
            .cloned()
            .ok_or_else(|| RenderError::MissingLabel(key.clone())),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Labels => Ok(String::new()),
        Expr::Call { func, args } => call(*func, args, ctx),
    }
}

fn call(func: Func, args: &[Expr], ctx: &RenderContext) -> Result<String, RenderError> {
    if func == Func::Index {
        let key = match args.get(1) {
            Some(expr) => eval(expr, ctx)?,
            None => return Ok(String::new()),
        };
        return Ok(ctx.labels.get(&key).cloned().unwrap_or_default());
    }

    let values = args
        .iter()
        .map(|arg| eval(arg, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    let out = match (func, values.as_slice()) {
        (Func::Print, parts) => parts.concat(),
        (Func::Lower, [s]) => s.to_lowercase(),
        (Func::Upper, [s]) => s.to_uppercase(),
        (Func::Replace, [old, new, s]) => s.replace(old.as_str(), new),
        (Func::TrimPrefix, [prefix, s]) => s.strip_prefix(prefix.as_str()).unwrap_or(s).to_string(),
        (Func::TrimSuffix, [suffix, s]) => s.strip_suffix(suffix.as_str()).unwrap_or(s).to_string(),
        // Arity is checked at compile time
        _ => String::new(),
    };
    Ok(out)
}
