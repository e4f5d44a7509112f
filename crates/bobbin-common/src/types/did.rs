use crate::types::IdentifierError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::sync::LazyLock;
use std::{ops::Deref, str::FromStr};
use url::Url;

/// Regex for generic DID syntax: `did:<method>:<identifier>`.
///
/// Allows `%` inside the identifier but not as the final character.
pub static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

/// Upper bound on DID length.
pub const MAX_DID_LEN: usize = 2048;

/// Prefix of every `did:plc` identifier.
pub const DID_PLC_PREFIX: &str = "did:plc:";
/// Prefix of every `did:web` identifier.
pub const DID_WEB_PREFIX: &str = "did:web:";

const PLC_ID_LEN: usize = 24;

/// True if `s` is a well-formed `did:plc`: the prefix followed by exactly 24
/// characters of lowercase base32 (`a-z`, `2-7`).
pub fn is_did_plc(s: &str) -> bool {
    s.strip_prefix(DID_PLC_PREFIX).is_some_and(|id| {
        id.len() == PLC_ID_LEN
            && id
                .bytes()
                .all(|b| matches!(b, b'a'..=b'z' | b'2'..=b'7'))
    })
}

/// True if `s` is `did:web:` followed by a non-empty remainder that does not
/// start with `:`.
///
/// This is the syntactic shape only. [`DidMethod::of`] and [`Did::new`] also
/// require the remainder to form a usable host and path.
pub fn is_did_web(s: &str) -> bool {
    s.strip_prefix(DID_WEB_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && !rest.starts_with(':'))
}

/// A `did:web` whose segments map onto a host and path.
fn is_resolvable_did_web(s: &str) -> bool {
    is_did_web(s) && !s.ends_with(':') && !s.contains("::") && DID_REGEX.is_match(s)
}

/// True if `s` is `did:<method>:<id>` with an ASCII-letter method and a
/// non-empty id.
///
/// Identifiers of any length and character set pass; [`Did::new`] applies the
/// stricter atproto rules.
pub fn is_did(s: &str) -> bool {
    let Some((method, id)) = s.strip_prefix("did:").and_then(|rest| rest.split_once(':')) else {
        return false;
    };
    !method.is_empty() && method.bytes().all(|b| b.is_ascii_alphabetic()) && !id.is_empty()
}

/// The method segment of a DID, if the input has a non-empty method and id.
///
/// ```
/// use bobbin_common::types::did::extract_did_method;
/// assert_eq!(extract_did_method("did:plc:abc"), Some("plc"));
/// assert_eq!(extract_did_method("did::abc"), None);
/// ```
pub fn extract_did_method(s: &str) -> Option<&str> {
    let rest = s.strip_prefix("did:")?;
    let (method, id) = rest.split_once(':')?;
    if method.is_empty() || id.is_empty() {
        None
    } else {
        Some(method)
    }
}

/// Map a `did:web` to the origin (plus optional path) it names.
///
/// A host containing an encoded port (`%3A`) maps to `http`, everything else
/// maps to `https`. Further `:`-separated segments become path segments.
pub fn did_web_to_url(did: &str) -> Result<Url, IdentifierError> {
    if !is_resolvable_did_web(did) {
        return Err(IdentifierError::invalid_did(did, "not a did:web"));
    }
    let rest = &did[DID_WEB_PREFIX.len()..];
    let mut parts = rest.split(':');
    let host = parts
        .next()
        .unwrap_or_default()
        .replace("%3A", ":")
        .replace("%3a", ":");
    let scheme = if host.contains(':') { "http" } else { "https" };
    let path = parts.collect::<Vec<_>>().join("/");

    Url::parse(&format!("{scheme}://{host}/{path}"))
        .map_err(|e| IdentifierError::invalid_did(did, format!("bad did:web host: {e}")))
}

/// Inverse of [`did_web_to_url`]: build the `did:web` naming a URL.
pub fn url_to_did_web(url: &Url) -> Result<Did, IdentifierError> {
    let host = url
        .host_str()
        .ok_or_else(|| IdentifierError::invalid_did(url.as_str(), "URL has no host"))?;
    let mut id = match url.port() {
        Some(port) => format!("{host}%3A{port}"),
        None => host.to_string(),
    };
    if let Some(segments) = url.path_segments() {
        for seg in segments.filter(|s| !s.is_empty()) {
            id.push(':');
            id.push_str(seg);
        }
    }
    Did::new(format!("{DID_WEB_PREFIX}{id}"))
}

/// DID methods we know how to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DidMethod {
    /// `did:plc`, resolved through a PLC directory
    Plc,
    /// `did:web`, resolved from `/.well-known/did.json` on the named host
    Web,
}

impl DidMethod {
    /// Classify a DID, rejecting malformed ones and unsupported methods.
    pub fn of(did: &str) -> Result<Self, IdentifierError> {
        if is_did_plc(did) {
            return Ok(Self::Plc);
        }
        if is_resolvable_did_web(did) {
            return Ok(Self::Web);
        }
        let reason = match extract_did_method(did) {
            Some("plc") => "did:plc identifiers are 24 base32 characters",
            Some("web") => "did:web must name a host",
            Some(_) => "unsupported DID method",
            None => "malformed DID",
        };
        Err(IdentifierError::invalid_did(did, reason))
    }

    /// Method name as it appears in the DID
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plc => "plc",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for DidMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decentralized identifier, validated against generic DID syntax.
#[derive(Clone, PartialEq, Eq, Serialize, Hash, PartialOrd, Ord)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Did(SmolStr);

impl Did {
    /// Fallible constructor, validates. A leading `at://` is stripped.
    pub fn new(did: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let did = did.as_ref();
        let did = did.strip_prefix("at://").unwrap_or(did);
        if did.len() > MAX_DID_LEN {
            Err(IdentifierError::invalid_did(did, "too long"))
        } else if !DID_REGEX.is_match(did) {
            Err(IdentifierError::invalid_did(did, "malformed DID"))
        } else {
            Ok(Self(SmolStr::new(did)))
        }
    }

    /// Fallible constructor, validates, doesn't allocate
    pub fn new_static(did: &'static str) -> Result<Self, IdentifierError> {
        if did.len() > MAX_DID_LEN || !DID_REGEX.is_match(did) {
            Err(IdentifierError::invalid_did(did, "malformed DID"))
        } else {
            Ok(Self(SmolStr::new_static(did)))
        }
    }

    /// Which resolvable method this DID uses.
    pub fn method(&self) -> Result<DidMethod, IdentifierError> {
        DidMethod::of(&self.0)
    }

    /// Get the DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Did {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = SmolStr::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}", self.0)
    }
}

impl From<Did> for String {
    fn from(value: Did) -> Self {
        value.0.to_string()
    }
}

impl From<Did> for SmolStr {
    fn from(value: Did) -> Self {
        value.0
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Did {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}
