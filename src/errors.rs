use std::fmt;

/// Pipeline error types.
#[derive(Debug)]
pub enum EtlError {
    /// A required column is absent, or a relation does not fit its destination.
    Schema(String),
    /// A date (or other typed) value failed to parse.
    Format(String),
    /// The database driver reported an error while loading.
    Sink(sqlx::Error),
    /// The sink refused the load without a driver error.
    SinkRejected(String),
    /// Filesystem errors (staging directory, extracts, mailbox).
    Io(std::io::Error),
    /// Malformed delimited extract.
    Csv(csv::Error),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<EtlError>,
        /// Additional context message.
        context: String,
    },
}

impl EtlError {
    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &EtlError {
        match self {
            EtlError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self.root(), EtlError::Schema(_))
    }

    pub fn is_format(&self) -> bool {
        matches!(self.root(), EtlError::Format(_))
    }

    pub fn is_sink(&self) -> bool {
        matches!(self.root(), EtlError::Sink(_) | EtlError::SinkRejected(_))
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtlError::Schema(msg) => write!(f, "Schema error: {}", msg),
            EtlError::Format(msg) => write!(f, "Format error: {}", msg),
            EtlError::Sink(e) => write!(f, "Sink error: {}", e),
            EtlError::SinkRejected(msg) => write!(f, "Sink error: {}", msg),
            EtlError::Io(e) => write!(f, "I/O error: {}", e),
            EtlError::Csv(e) => write!(f, "CSV error: {}", e),
            EtlError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for EtlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EtlError::Sink(e) => Some(e),
            EtlError::Io(e) => Some(e),
            EtlError::Csv(e) => Some(e),
            EtlError::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        EtlError::Sink(err)
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Io(err)
    }
}

impl From<csv::Error> for EtlError {
    fn from(err: csv::Error) -> Self {
        EtlError::Csv(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `EtlError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, EtlError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, EtlError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<EtlError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, EtlError> {
        self.map_err(|e| EtlError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, EtlError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EtlError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}
