use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to encode message: {0}")]
    Encode(String),
    #[error("Failed to read '{path}': {reason}")]
    Read { path: String, reason: String },
}
