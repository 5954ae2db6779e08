use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StandinError {
    #[error("{0}")]
    Attribute(String),
    #[error("{0}")]
    Signature(String),
    #[error("{0}")]
    Assertion(String),
    #[error("{0}")]
    MissingTarget(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Key(String),
    #[error("{0}")]
    Index(String),
    #[error("{0}")]
    Import(String),
    #[error("{0}")]
    Raised(Exception),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(String),
}

impl StandinError {
    /// Conventional exception kind name for this error.
    pub fn kind(&self) -> &str {
        match self {
            StandinError::Attribute(_) | StandinError::MissingTarget(_) => "AttributeError",
            StandinError::Signature(_) | StandinError::Type(_) => "TypeError",
            StandinError::Assertion(_) => "AssertionError",
            StandinError::Key(_) => "KeyError",
            StandinError::Index(_) => "IndexError",
            StandinError::Import(_) => "ImportError",
            StandinError::Raised(exception) => exception.kind().name(),
            StandinError::Config(_) => "ConfigError",
            StandinError::Io(_) => "IOError",
        }
    }

    /// True for raised exceptions that ordinary handlers must not catch.
    pub fn is_termination(&self) -> bool {
        matches!(self, StandinError::Raised(exception) if exception.kind().is_termination())
    }

    pub fn to_exception(&self) -> Exception {
        match self {
            StandinError::Raised(exception) => exception.clone(),
            other => ExceptionType::ordinary(other.kind()).instance(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Ordinary,
    /// Simulates interpreter-exit style failures (keyboard interrupt, exit requests).
    Termination,
}

/// An exception class: a name plus its severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionType {
    name: Rc<str>,
    severity: Severity,
}

impl ExceptionType {
    pub fn ordinary(name: impl AsRef<str>) -> Self {
        Self {
            name: Rc::from(name.as_ref()),
            severity: Severity::Ordinary,
        }
    }

    pub fn termination(name: impl AsRef<str>) -> Self {
        Self {
            name: Rc::from(name.as_ref()),
            severity: Severity::Termination,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_termination(&self) -> bool {
        self.severity == Severity::Termination
    }

    pub fn instance(&self, message: impl Into<String>) -> Exception {
        Exception {
            kind: self.clone(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    kind: ExceptionType,
    message: String,
}

impl Exception {
    pub fn new(kind: ExceptionType, message: impl Into<String>) -> Self {
        kind.instance(message)
    }

    pub fn kind(&self) -> &ExceptionType {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn repr(&self) -> String {
        if self.message.is_empty() {
            format!("{}()", self.kind.name())
        } else {
            format!("{}({:?})", self.kind.name(), self.message)
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)
        }
    }
}

impl From<Exception> for StandinError {
    fn from(value: Exception) -> Self {
        StandinError::Raised(value)
    }
}
