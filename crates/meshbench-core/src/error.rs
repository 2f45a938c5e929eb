use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Deploy failed for variant '{variant}': {message}")]
    Deploy { variant: String, message: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Serialize for BenchError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
