//! Error types for Tether operations.

use std::fmt;

/// The primary error type for all Tether operations.
///
/// Cancellation is not an error; it travels as `Outcome::Cancelled`.
#[derive(Debug)]
pub enum Error {
    /// Bad relationship or schema declaration (fails before any query)
    Config(ConfigError),
    /// Query execution errors reported by the execution collaborator
    Query(QueryError),
    /// Connection-related errors reported by the execution collaborator
    Connection(ConnectionError),
    /// Operation timed out in the execution collaborator
    Timeout,
    /// Strict-mode access to a relationship that was never loaded
    LazyAccess(LazyAccessViolation),
    /// Row-to-entity conversion failed
    Mapping(MappingError),
    /// Strict access to an attribute the entity does not carry
    MissingAttribute(MissingAttributeError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub entity: Option<String>,
    pub relationship: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub entity: Option<String>,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Malformed statement
    Syntax,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
    /// Connection pool exhausted
    PoolExhausted,
}

#[derive(Debug, Clone)]
pub struct LazyAccessViolation {
    pub entity: String,
    pub relationship: String,
}

#[derive(Debug, Clone)]
pub struct MappingError {
    pub entity: String,
    pub column: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MissingAttributeError {
    pub entity: String,
    pub attribute: String,
}

impl Error {
    /// Build a configuration error for a relationship declaration.
    pub fn config(
        entity: impl Into<String>,
        relationship: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Config(ConfigError {
            entity: Some(entity.into()),
            relationship: relationship.map(str::to_string),
            message: message.into(),
        })
    }

    /// Build a mapping error for an entity type.
    pub fn mapping(
        entity: impl Into<String>,
        column: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Mapping(MappingError {
            entity: entity.into(),
            column: column.map(str::to_string),
            message: message.into(),
        })
    }

    /// Build a query error with a message only.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            entity: None,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a retryable error (deadlock, pool exhausted, timeouts)?
    ///
    /// Tether never retries on its own; this is for callers deciding
    /// whether to re-issue a whole load.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Deadlock | QueryErrorKind::Timeout),
            Error::Connection(c) => matches!(c.kind, ConnectionErrorKind::PoolExhausted),
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect
                    | ConnectionErrorKind::Disconnected
                    | ConnectionErrorKind::Refused
            ),
            _ => false,
        }
    }

    /// Is this a strict-mode lazy access violation?
    pub fn is_lazy_access_violation(&self) -> bool {
        matches!(self, Error::LazyAccess(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::LazyAccess(e) => write!(f, "Lazy access violation: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::MissingAttribute(e) => write!(f, "Missing attribute: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.entity, &self.relationship) {
            (Some(entity), Some(rel)) => write!(f, "{}.{}: {}", entity, rel, self.message),
            (Some(entity), None) => write!(f, "{}: {}", entity, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity) = &self.entity {
            write!(f, "{} (loading {})", self.message, entity)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for LazyAccessViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted to lazy load [{}] on [{}] but lazy loading is disabled",
            self.relationship, self.entity
        )
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(f, "{} column '{}': {}", self.entity, col, self.message)
        } else {
            write!(f, "{}: {}", self.entity, self.message)
        }
    }
}

impl fmt::Display for MissingAttributeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attribute [{}] does not exist or was not retrieved for [{}]",
            self.attribute, self.entity
        )
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<LazyAccessViolation> for Error {
    fn from(err: LazyAccessViolation) -> Self {
        Error::LazyAccess(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<MissingAttributeError> for Error {
    fn from(err: MissingAttributeError) -> Self {
        Error::MissingAttribute(err)
    }
}

/// Result type alias for Tether operations.
pub type Result<T> = std::result::Result<T, Error>;
