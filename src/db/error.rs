use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;
