use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

/// An injected child named a slot the receiving component does not expose.
pub const W_SLOT_MISSING: &str = "W-SLOT-MISSING";
/// A component function returned nothing at all.
pub const W_COMPONENT_EMPTY: &str = "W-COMPONENT-EMPTY";

pub type RenderResult<T> = Result<T, RenderError>;

/// Fatal errors. Any of these aborts the page: no HTML is produced for it.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Invalid slot name '{name}': slot names must match [a-zA-Z0-9_-]+ and must not start with a digit")]
    InvalidSlotName { name: String },

    #[error("Void element <{tag}> cannot have children")]
    VoidChildren { tag: String },

    #[error("Node is already attached to a parent and cannot be attached again")]
    AlreadyAttached,

    #[error("Component '{name}' could not be resolved")]
    UnknownComponent { name: String },

    #[error("Component invocation depth exceeded at {path}")]
    RecursionLimit { path: String },

    #[error("Component '{component}' failed: {message}")]
    Component { component: String, message: String },

    #[error("Tree has no root node")]
    MissingRoot,

    #[error(transparent)]
    Style(#[from] StyleError),

    #[error("Invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        RenderError::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures of the style resolution phase.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StyleError {
    #[error("Malformed CSS in style unit '{unit}' at offset {}: {}", .error.offset, .error.message)]
    Malformed { unit: String, error: CssError },

    #[error("Style unit '{unit}' references embedded block '{block}' which has no computed value")]
    MissingDynamicValue { unit: String, block: String },

    #[error("Unknown style uuid '{0}'")]
    UnknownUuid(String),
}

/// Low-level CSS scanning failure with the byte offset where it was detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (offset {offset})")]
pub struct CssError {
    pub message: String,
    pub offset: usize,
}

impl CssError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        CssError {
            message: message.into(),
            offset,
        }
    }
}

/// A recovered, non-fatal problem recorded while rendering a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
