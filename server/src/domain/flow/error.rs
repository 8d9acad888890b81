use thiserror::Error;

use crate::domain::template::TemplateError;

/// Invalid flow or metric template definition. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("template '{field}' does not compile: {source}")]
    Template {
        field: String,
        #[source]
        source: TemplateError,
    },

    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    #[error("flow name must not be empty")]
    EmptyFlowName,

    #[error("flow '{0}' has an empty query")]
    EmptyQuery(String),

    #[error("flow '{0}' declares no metric templates")]
    NoTemplates(String),

    #[error("flow '{flow}' declares more than one template for the default stream")]
    DuplicateDefaultStream { flow: String },

    #[error("flow '{flow}' declares more than one template for stream '{stream}'")]
    DuplicateStream { flow: String, stream: String },
}

/// No metric template is declared for a data point's stream tag
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no metric template for stream '{0}'")]
    NotFound(String),
}
