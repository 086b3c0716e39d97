use std::fmt;

/// Errors surfaced by forest operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcfError {
    /// A caller-supplied argument or configuration value is unusable.
    InvalidArgument { msg: &'static str },
    /// Internal bookkeeping no longer holds; the structure is corrupt and
    /// should not be used further.
    InvariantViolation { msg: &'static str },
}

impl fmt::Display for RcfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RcfError::InvalidArgument { msg } => write!(f, "invalid argument: {}", msg),
            RcfError::InvariantViolation { msg } => write!(f, "invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for RcfError {}

pub type Result<T> = std::result::Result<T, RcfError>;
