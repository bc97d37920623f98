use thiserror::Error;

/// Main error type for Schema Genesis
#[derive(Error, Debug)]
pub enum GenesisError {
    /// SQLite errors (relational source or graph store)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema extraction errors
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Graph store errors (missing node, missing index, ...)
    #[error("Graph error: {0}")]
    Graph(String),

    /// Node not found in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Text generation provider errors
    #[error("Text generation error: {0}")]
    Generation(String),

    /// Embedding provider errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Parse / validation errors on model output
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A blocking worker task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

/// Convenient Result type using GenesisError
pub type Result<T> = std::result::Result<T, GenesisError>;
