// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database corruption: {0}")]
    Corruption(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("index '{0}' already exists")]
    IndexExists(String),

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("function '{0}' not found")]
    FunctionNotFound(String),

    #[error("duplicate key for index '{0}'")]
    DuplicateKey(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("not in a transaction")]
    NotInTransaction,

    #[error("already in a transaction")]
    AlreadyInTransaction,

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
