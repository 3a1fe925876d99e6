//! Session identifier type.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ShellJailError;

/// Counter for generated identifiers.
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Caller-chosen identifier of a shell session.
///
/// The value is opaque; the only requirement is that it is not blank.
/// Callers without a naming scheme can use [`SessionId::generate`], which
/// yields `sess-XXXXXXXX` identifiers unique within this process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a caller-chosen identifier.
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ShellJailError::InvalidSessionId(value));
        }
        Ok(Self(value))
    }

    /// Generate a fresh process-unique identifier.
    pub fn generate() -> Self {
        Self(format!("sess-{:08x}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = ShellJailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = ShellJailError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ShellJailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
