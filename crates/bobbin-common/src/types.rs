use smol_str::SmolStr;

/// DIDs, supported DID methods, and the did:web URL mapping
pub mod did;
/// DID documents
pub mod did_doc;
/// Handles and handle normalization
pub mod handle;
/// Sign-in identifiers (DID or handle)
pub mod ident;

pub use did::{Did, DidMethod};
pub use did_doc::{DidDocument, Service, VerificationMethod};
pub use handle::Handle;
pub use ident::AtIdentifier;

/// Errors raised while validating identifiers.
///
/// These are always raised before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum IdentifierError {
    /// Not a syntactically valid handle
    #[error("invalid handle {handle:?}: {reason}")]
    #[diagnostic(
        code(bobbin_common::invalid_handle),
        help("handles are domain names such as `alice.example.com`")
    )]
    InvalidHandle {
        /// Offending input
        handle: SmolStr,
        /// What was wrong with it
        reason: SmolStr,
    },

    /// Not a DID, or a DID using a method we cannot resolve
    #[error("invalid DID {did:?}: {reason}")]
    #[diagnostic(
        code(bobbin_common::invalid_did),
        help("supported DID methods are did:plc and did:web")
    )]
    InvalidDid {
        /// Offending input
        did: SmolStr,
        /// What was wrong with it
        reason: SmolStr,
    },
}

impl IdentifierError {
    /// Build an [`IdentifierError::InvalidHandle`]
    pub fn invalid_handle(handle: impl AsRef<str>, reason: impl Into<SmolStr>) -> Self {
        Self::InvalidHandle {
            handle: SmolStr::new(handle.as_ref()),
            reason: reason.into(),
        }
    }

    /// Build an [`IdentifierError::InvalidDid`]
    pub fn invalid_did(did: impl AsRef<str>, reason: impl Into<SmolStr>) -> Self {
        Self::InvalidDid {
            did: SmolStr::new(did.as_ref()),
            reason: reason.into(),
        }
    }
}
