use thiserror::Error;

/// A tag string or segment that cannot form a valid [`crate::tag::Tag`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag must contain at least one segment")]
    Empty,

    #[error("invalid tag segment '{0}'")]
    InvalidSegment(String),

    #[error("segment index {index} out of range for tag of length {len}")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern must contain at least one token")]
    Empty,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not valid MessagePack: {0}")]
    MessagePack(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("failed to decompress {encoding} payload: {source}")]
    Io {
        encoding: String,
        #[source]
        source: std::io::Error,
    },
}

/// Every way a single ingested record can fail before it reaches the
/// scheduler. Each variant maps to one distinct request outcome.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid tag: {0}")]
    InvalidTag(#[from] TagError),

    #[error("request body is empty")]
    EmptyBody,

    #[error("unsupported media type '{0}'")]
    UnsupportedMediaType(String),

    #[error(transparent)]
    Decompress(#[from] DecompressError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("no pipeline matches tag '{0}'")]
    NoMatchingPipeline(String),

    #[error("record with tag '{0}' rejected by filter")]
    FilterRejected(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: PatternError,
    },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to build sink: {0}")]
    Sink(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::Invalid("worker_count must be greater than zero".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: worker_count must be greater than zero"
        );

        let error = IngestError::NoMatchingPipeline("a.b".to_string());
        assert_eq!(error.to_string(), "no pipeline matches tag 'a.b'");
    }

    #[test]
    fn test_tag_error_converts_into_ingest_error() {
        let error: IngestError = TagError::Empty.into();
        assert!(matches!(error, IngestError::InvalidTag(TagError::Empty)));
    }
}
