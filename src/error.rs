use std::{error::Error, fmt};

/// What went wrong, at the granularity the engine cares about.
///
/// Invariant violations and missing items are fatal and never retried;
/// resource exhaustion is raised before any page image is modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A structural invariant of a tree or page does not hold.
    Invariant,
    /// An item the contract requires to be present was not found.
    NotFound,
    /// A buffer or page could not be allocated.
    Resource,
    /// Underlying file io failed.
    Io,
    /// A caller-supplied value is outside its valid domain.
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::Invariant => "invariant violation",
            ErrorKind::NotFound => "not found",
            ErrorKind::Resource => "resource exhausted",
            ErrorKind::Io => "io error",
            ErrorKind::InvalidInput => "invalid input",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct EngineError {
    kind: ErrorKind,
    details: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, msg: &str) -> EngineError {
        EngineError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn invariant(msg: &str) -> EngineError {
        Self::new(ErrorKind::Invariant, msg)
    }

    pub fn not_found(msg: &str) -> EngineError {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn resource(msg: &str) -> EngineError {
        Self::new(ErrorKind::Resource, msg)
    }

    pub fn io(msg: &str) -> EngineError {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn input(msg: &str) -> EngineError {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    /// Invariant violation with enough context to identify the page.
    pub fn corrupt(attno: u32, tid: u64, block: u32, msg: &str) -> EngineError {
        Self::new(
            ErrorKind::Invariant,
            &format!("attno {}, tid {}, block {}: {}", attno, tid, block, msg),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.details)
    }
}

impl Error for EngineError {}
