use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the annotation core.
///
/// `NotFound` and `Validation` are caller mistakes and never retried.
/// `TransientStore` means the unit of work should be discarded and the whole
/// operation retried. `EmbeddingProvider` propagates out of the pipeline
/// stages to the scheduler.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying the same operation in a fresh unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity() {
        let err = Error::not_found("sample", "abc");
        assert_eq!(err.to_string(), "sample not found: abc");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn store_error_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let err = Error::Store(Box::new(io));
        assert!(std::error::Error::source(&err).is_some());
    }
}
