use actix_web::{http::StatusCode, ResponseError};

pub type Result<T> = actix_web::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Service Unavailable: {0}")]
    Unavailable(String),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
