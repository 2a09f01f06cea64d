use crate::ast::Position;
use thiserror::Error;

/// Engine-wide error type. The five surfaced failure categories are
/// Syntax, Semantic, Execution, Timeout and MemoryLimit; the remaining
/// variants are internal or registry-level kinds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("syntax error at {position}: {message}")]
    Syntax { message: String, position: Position },

    #[error("semantic error at {position}: {message}")]
    Semantic { message: String, position: Position },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("memory limit exceeded: {0}")]
    MemoryLimit(String),

    #[error("buffered row limit exceeded: {0}")]
    RowLimit(String),

    #[error("lookup table not found: {0}")]
    TableNotFound(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("data source error: {0}")]
    DataSource(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn semantic(message: impl Into<String>, position: Position) -> Self {
        QueryError::Semantic {
            message: message.into(),
            position,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        QueryError::Execution(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        QueryError::Internal(message.into())
    }

    /// Position the error originated from, where one was recorded.
    pub fn position(&self) -> Option<Position> {
        match self {
            QueryError::Syntax { position, .. } | QueryError::Semantic { position, .. } => {
                Some(*position)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
