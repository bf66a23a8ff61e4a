use crate::types::SourceLocation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Cache read failed: {0}")]
    CacheRead(String),

    #[error("Cache write failed: {0}")]
    CacheWrite(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Duplicate dependency key `{key}` in {origin}")]
    DuplicateDependencyKey { origin: String, key: String },

    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A failure observed through an in-flight computation shared by several
    /// waiters.
    #[error(transparent)]
    Shared(Arc<ModGraphError>),
}

impl ModGraphError {
    /// The underlying error, looking through any number of `Shared` wrappers.
    pub fn root(&self) -> &ModGraphError {
        match self {
            ModGraphError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self.root() {
            ModGraphError::Resolution(err) => err.is_not_found(),
            ModGraphError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn as_transform_error(&self) -> Option<&TransformError> {
        match self.root() {
            ModGraphError::Transform(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModGraphError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    NotFound,
    Other(String),
}

/// A module reference that could not be mapped to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    pub origin: Option<String>,
    pub reference: String,
    pub location: Option<SourceLocation>,
    pub kind: ResolutionErrorKind,
}

impl ResolutionError {
    pub fn not_found(origin: Option<&str>, reference: impl Into<String>) -> Self {
        Self {
            origin: origin.map(str::to_string),
            reference: reference.into(),
            location: None,
            kind: ResolutionErrorKind::NotFound,
        }
    }

    pub fn other(origin: Option<&str>, reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            origin: origin.map(str::to_string),
            reference: reference.into(),
            location: None,
            kind: ResolutionErrorKind::Other(reason.into()),
        }
    }

    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        if self.location.is_none() {
            self.location = location;
        }
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ResolutionErrorKind::NotFound
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unable to resolve module `{}` from {}",
            self.reference,
            self.origin.as_deref().unwrap_or("<entry>")
        )?;
        if let Some(loc) = &self.location {
            write!(f, ":{}:{}", loc.line, loc.column)?;
        }
        if let ResolutionErrorKind::Other(reason) = &self.kind {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolutionError {}

/// Stable type tag carried by every normalized syntax error.
pub const TRANSFORM_ERROR_TYPE: &str = "TransformError";

/// Normalized transform failure as surfaced by the worker farm.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformError {
    #[error("{message}")]
    Syntax {
        file_path: String,
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        code_frame: Option<String>,
        type_tag: String,
    },

    #[error("{message}")]
    Generic {
        file_path: String,
        message: String,
        stack: Option<String>,
    },
}

impl TransformError {
    pub fn file_path(&self) -> &str {
        match self {
            TransformError::Syntax { file_path, .. } | TransformError::Generic { file_path, .. } => {
                file_path
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TransformError::Syntax { message, .. } | TransformError::Generic { message, .. } => {
                message
            }
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, TransformError::Syntax { .. })
    }
}
