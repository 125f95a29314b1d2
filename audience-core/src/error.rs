use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudienceError {
    /// Bytes that no supported decoder accepts, or an image with no pixels.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Observation store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<sqlx::Error> for AudienceError {
    fn from(e: sqlx::Error) -> Self {
        AudienceError::StoreUnavailable(e.to_string())
    }
}
