use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeferdError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeferdError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            DeferdError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DeferdError>;
