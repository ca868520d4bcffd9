use thiserror::Error;

/// Input rejected before any state was touched
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("Invalid cadence expression '{expression}': {reason}")]
    InvalidCadence { expression: String, reason: String },

    #[error("URL is already scheduled for automatic archiving: {url}")]
    DuplicateSchedule { url: String },

    #[error("Invalid archive path: {path}")]
    InvalidPath { path: String },
}

/// A requested entity does not exist
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("Archive not found: {archive_id}")]
    Archive { archive_id: String },

    #[error("Scheduled archive not found: {schedule_id}")]
    Schedule { schedule_id: String },

    #[error("Stored file not found: {path}")]
    StoredFile { path: String },
}

/// Network or browser failure while retrieving one page or asset
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out after {timeout_ms}ms: {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request failed for {url}: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Browser not reachable at {endpoint}")]
    BrowserUnavailable { endpoint: String },

    #[error("Markup could not be processed: {reason}")]
    MalformedMarkup { reason: String },
}

/// Durable storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Compression failed for {path}: {reason}")]
    Compression { path: String, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// General system errors
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Configuration error: {details}")]
    Configuration { details: String },

    #[error("IO error: {source}")]
    IO {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Database error: {details}")]
    Database { details: String },

    #[error("Unknown error: {details}")]
    Unknown { details: String },
}

/// Main error type for the archiver
#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("Validation error: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },

    #[error("Not found: {source}")]
    NotFound {
        #[from]
        source: NotFoundError,
    },

    #[error("Fetch error: {source}")]
    Fetch {
        #[from]
        source: FetchError,
    },

    #[error("Storage error: {source}")]
    Storage {
        #[from]
        source: StorageError,
    },

    #[error("System error: {source}")]
    System {
        #[from]
        source: SystemError,
    },
}

impl ArchiverError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ArchiverError::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiverError::NotFound { .. })
    }

    /// HTTP status an outer request layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ArchiverError::Validation { .. } => 400,
            ArchiverError::NotFound { .. } => 404,
            _ => 500,
        }
    }

    pub fn database(details: impl Into<String>) -> Self {
        ArchiverError::System {
            source: SystemError::Database { details: details.into() },
        }
    }

    pub fn configuration(details: impl Into<String>) -> Self {
        ArchiverError::System {
            source: SystemError::Configuration { details: details.into() },
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ArchiverError>;
