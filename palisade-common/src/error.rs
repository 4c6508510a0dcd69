use std::error::Error;

#[derive(thiserror::Error, Debug)]
pub enum PalisadeError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid network address: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl PalisadeError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}
