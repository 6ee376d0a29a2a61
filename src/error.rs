use thiserror::Error;

#[derive(Debug, Error)]
pub enum BnmpError {
    #[error("Session cookie is invalid or expired. Refresh the header bundle and retry the run.")]
    InvalidCookie,

    #[error("Probe depth {depth} for {descriptor} exceeds the dual-order cap and no finer subdivision exists")]
    MapOverflow { descriptor: String, depth: u64 },

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BnmpError {
    /// Whether the error invalidates the whole run rather than a single
    /// work item. Fatal errors must stop the coordinator from launching
    /// new work; everything else is isolated to the descriptor or warrant
    /// that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidCookie | Self::MapOverflow { .. })
    }
}

pub type Result<T> = std::result::Result<T, BnmpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(BnmpError::InvalidCookie.is_fatal());
        assert!(BnmpError::MapOverflow {
            descriptor: "state=5".to_string(),
            depth: 25_000,
        }
        .is_fatal());
        assert!(!BnmpError::Parse("bad row".to_string()).is_fatal());
        assert!(!BnmpError::Api {
            status: 500,
            body: "oops".to_string(),
        }
        .is_fatal());
    }
}
