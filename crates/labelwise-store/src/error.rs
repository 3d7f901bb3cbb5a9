use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[cfg(feature = "duckdb")]
    #[error("embedding column is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Write-write conflicts between concurrent transactions; retrying in a
    /// fresh unit of work may succeed.
    pub fn is_conflict(&self) -> bool {
        match self {
            #[cfg(feature = "duckdb")]
            Self::DuckDb(e) => e.to_string().to_ascii_lowercase().contains("conflict"),
            _ => false,
        }
    }
}

impl From<StoreError> for labelwise_core::Error {
    fn from(err: StoreError) -> Self {
        if err.is_conflict() {
            labelwise_core::Error::TransientStore(err.to_string())
        } else {
            labelwise_core::Error::Store(Box::new(err))
        }
    }
}
