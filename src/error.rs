use thiserror::Error;
use std::io;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),
    #[error("table '{0}' does not exist")]
    TableNotExist(String),
    #[error("index '{0}' already exists")]
    IndexAlreadyExists(String),
    #[error("index '{0}' not found")]
    IndexNotFound(String),
    #[error("column '{0}' does not exist")]
    ColumnNameNotExist(String),
    #[error("corrupted page: {0}")]
    Corrupted(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
