use crate::types::{Did, Handle, IdentifierError};
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use std::fmt;
use std::str::FromStr;

/// Whatever the user typed to sign in: a DID or a handle.
///
/// Parsing rejects DIDs with methods other than `plc` and `web`, so anything
/// that parses can be resolved.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Debug)]
#[serde(untagged)]
pub enum AtIdentifier {
    /// DID variant
    Did(Did),
    /// Handle variant
    Handle(Handle),
}

impl AtIdentifier {
    /// Parse an identifier. Input starting with `did:` must be a resolvable
    /// DID; everything else is treated as a handle.
    pub fn new(input: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let input = input.as_ref().trim();
        let input = input.strip_prefix("at://").unwrap_or(input);
        if input.starts_with("did:") {
            let did = Did::new(input)?;
            did.method()?;
            Ok(Self::Did(did))
        } else {
            Handle::new(input).map(Self::Handle)
        }
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        match self {
            Self::Did(did) => did.as_str(),
            Self::Handle(handle) => handle.as_str(),
        }
    }
}

impl From<Did> for AtIdentifier {
    fn from(did: Did) -> Self {
        Self::Did(did)
    }
}

impl From<Handle> for AtIdentifier {
    fn from(handle: Handle) -> Self {
        Self::Handle(handle)
    }
}

impl FromStr for AtIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for AtIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for AtIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_kinds() {
        assert!(matches!(
            AtIdentifier::new("did:plc:z72i7hdynmk6r22z27h6abc2").unwrap(),
            AtIdentifier::Did(_)
        ));
        let ident = AtIdentifier::new("@Alice.Example.com").unwrap();
        assert_eq!(ident, AtIdentifier::Handle(Handle::new("alice.example.com").unwrap()));
    }

    #[test]
    fn rejects_unsupported_methods_before_resolution() {
        assert!(matches!(
            AtIdentifier::new("did:key:zabc"),
            Err(IdentifierError::InvalidDid { .. })
        ));
        assert!(matches!(
            AtIdentifier::new("did:plc:tooshort"),
            Err(IdentifierError::InvalidDid { .. })
        ));
        assert!(matches!(
            AtIdentifier::new("nohandle"),
            Err(IdentifierError::InvalidHandle { .. })
        ));
    }
}
