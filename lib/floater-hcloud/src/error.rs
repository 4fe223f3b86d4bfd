use floater_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HcloudError>;

#[derive(Error, Debug)]
pub enum HcloudError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("floating IP {id} has invalid {family} address '{ip}'")]
    InvalidAddress {
        id: u64,
        family: &'static str,
        ip: String,
    },
}

impl From<HcloudError> for CoreError {
    fn from(err: HcloudError) -> Self {
        CoreError::cloud(err)
    }
}
