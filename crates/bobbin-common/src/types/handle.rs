use crate::types::IdentifierError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::sync::LazyLock;
use std::{ops::Deref, str::FromStr};

/// Regex for handle validation.
///
/// Dot-separated labels of 1 to 63 characters, alphanumeric or hyphen, never
/// starting or ending with a hyphen. At least two labels, and the final label
/// must begin with a letter.
pub static HANDLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap()
});

/// Maximum handle length.
pub const MAX_HANDLE_LEN: usize = 253;

/// True if `s` is a syntactically valid handle.
pub fn is_valid_handle(s: &str) -> bool {
    s.len() <= MAX_HANDLE_LEN && HANDLE_REGEX.is_match(s)
}

/// Canonical form of a handle string: surrounding whitespace trimmed, ASCII
/// lowercased.
///
/// Idempotent, and never turns a valid handle into an invalid one.
pub fn normalize_handle(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Normalize and validate in one step.
pub fn as_normalized_handle(s: &str) -> Option<Handle> {
    let normalized = normalize_handle(s);
    is_valid_handle(&normalized).then(|| Handle(SmolStr::new(normalized)))
}

/// A validated, normalized (lowercase) handle such as `alice.example.com`.
#[derive(Clone, PartialEq, Eq, Serialize, Hash, PartialOrd, Ord)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Handle(SmolStr);

impl Handle {
    /// Fallible constructor. Strips a leading `@` or `at://`, normalizes, then
    /// validates.
    pub fn new(handle: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let raw = handle.as_ref();
        let stripped = raw.trim();
        let stripped = stripped
            .strip_prefix("at://")
            .or_else(|| stripped.strip_prefix('@'))
            .unwrap_or(stripped);
        if stripped.len() > MAX_HANDLE_LEN {
            return Err(IdentifierError::invalid_handle(raw, "too long"));
        }
        as_normalized_handle(stripped)
            .ok_or_else(|| IdentifierError::invalid_handle(raw, "not a valid domain name"))
    }

    /// Get the handle as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = SmolStr::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl From<Handle> for String {
    fn from(value: Handle) -> Self {
        value.0.to_string()
    }
}

impl From<Handle> for SmolStr {
    fn from(value: Handle) -> Self {
        value.0
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Handle {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}
