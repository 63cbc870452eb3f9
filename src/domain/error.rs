use thiserror::Error;

/// Reasons a render request is refused before the layout engine is involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("graph source is empty")]
    EmptySource,
    #[error("graph source contains a NUL byte")]
    NulByte,
    #[error("graph source is {actual} bytes; the limit is {limit}")]
    SourceTooLarge { actual: usize, limit: usize },
    #[error("graph declares about {actual} nodes; the limit is {limit}")]
    TooManyNodes { actual: usize, limit: usize },
    #[error("graph declares about {actual} edges; the limit is {limit}")]
    TooManyEdges { actual: usize, limit: usize },
    #[error("unsupported output format `{0}`")]
    UnsupportedFormat(String),
    #[error("unsupported layout `{0}`")]
    UnsupportedLayout(String),
    #[error("invalid diagram: {0}")]
    Diagram(String),
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl ValidationError {
    pub fn diagram(message: impl Into<String>) -> Self {
        Self::Diagram(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Whether the refusal is about the size of the payload rather than its shape.
    pub fn is_oversized(&self) -> bool {
        matches!(self, Self::SourceTooLarge { .. })
    }
}
