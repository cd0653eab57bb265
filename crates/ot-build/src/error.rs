//! Errors of the build-graph primitive
//!
//! All variants are `Clone`: deferred failures are stored inside build nodes
//! and surfaced again every time the containing rule is evaluated, so the
//! error values must be freely copyable and carry no live resources.

use ot_path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// A value flowing through the graph did not have the type the next
    /// node expected. Always a programming error in rule construction.
    #[error("type mismatch in build graph: expected a value of type {expected}")]
    TypeMismatch { expected: &'static str },

    /// A `Dyn` argument fragment expanded to something that declares
    /// targets or further dynamic fragments.
    #[error("dynamic argument fragment expanded to a non-static arg tree")]
    DynNotStatic,

    #[error("failed to decode {schema} value from {path}: {reason}")]
    Decode {
        schema: &'static str,
        path: Path,
        reason: String,
    },

    #[error("failed to access {path}: {reason}")]
    Io { path: Path, reason: String },

    #[error("invalid glob {glob:?}: {reason}")]
    InvalidGlob { glob: String, reason: String },

    /// A failure recorded during rule generation that only fires if the
    /// rule is actually evaluated. Optional stanzas rely on this to stay
    /// quiet until someone asks for their artifacts.
    #[error("{message}")]
    Deferred { message: String },
}

impl BuildError {
    pub fn deferred(message: impl Into<String>) -> BuildError {
        BuildError::Deferred {
            message: message.into(),
        }
    }
}
