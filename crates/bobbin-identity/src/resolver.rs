//! Identity resolution: handle → DID and DID → document.
//!
//! Handle → DID tries each configured [`HandleStep`] in order:
//! DNS TXT (if `dns` feature) → HTTPS well-known → handle resolution service.
//!
//! DID → document dispatches on [`DidMethod`](bobbin_common::types::DidMethod): `did:plc` documents come from
//! the PLC directory, `did:web` documents from the host's `did.json`.

use std::time::Duration;

use bobbin_common::types::{AtIdentifier, Did, DidDocument, Handle, IdentifierError};
use bon::Builder;
use bytes::Bytes;
use http::StatusCode;
use miette::Diagnostic;
use thiserror::Error;
use url::Url;

/// Result alias for resolver operations
pub type Result<T> = core::result::Result<T, IdentityError>;

/// Errors that can occur during identity resolution.
///
/// Validation failures are wrapped in [`IdentityError::Identifier`]; everything
/// else is a network or parse failure.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum IdentityError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identifier(#[from] IdentifierError),
    #[error("could not resolve handle {0}")]
    #[diagnostic(
        code(bobbin_identity::handle_not_found),
        help("check that the handle's DNS TXT record or /.well-known/atproto-did is published")
    )]
    HandleNotFound(Handle),
    #[error("invalid well-known atproto-did content")]
    #[diagnostic(
        code(bobbin_identity::invalid_well_known),
        help("expected first non-empty line to be a DID")
    )]
    InvalidWellKnown,
    #[error("HTTP error: {0}")]
    #[diagnostic(
        code(bobbin_identity::http),
        help("check network connectivity and TLS configuration")
    )]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("HTTP status {0}")]
    #[diagnostic(code(bobbin_identity::http_status))]
    HttpStatus(StatusCode),
    #[error("failed to build request: {0}")]
    #[diagnostic(code(bobbin_identity::http_build))]
    HttpBuild(#[from] http::Error),
    #[error("URL parse error: {0}")]
    #[diagnostic(code(bobbin_identity::url))]
    Url(#[from] url::ParseError),
    #[error("DNS error: {0}")]
    #[cfg(feature = "dns")]
    #[diagnostic(code(bobbin_identity::dns))]
    Dns(#[from] hickory_resolver::error::ResolveError),
    #[error("serialize/deserialize error: {0}")]
    #[diagnostic(code(bobbin_identity::serde))]
    Serde(#[from] serde_json::Error),
    /// DID document id did not match requested DID; includes the fetched document
    #[error("DID doc id mismatch: expected {expected}, got {}", .doc.id)]
    #[diagnostic(
        code(bobbin_identity::doc_id_mismatch),
        help("document id differs from requested DID; do not trust this document")
    )]
    DocIdMismatch {
        expected: Did,
        doc: Box<DidDocument>,
    },
}

impl IdentityError {
    /// Wrap an HTTP client error
    pub fn transport(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Http(Box::new(e))
    }

    /// The DID document names no PDS.
    pub fn missing_pds(did: &Did) -> Self {
        Self::Identifier(IdentifierError::invalid_did(
            did,
            "DID document has no AtprotoPersonalDataServer service",
        ))
    }

    /// True for failures caused by the network rather than by the data.
    ///
    /// Resolution never retries on its own; callers use this to decide.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::HttpStatus(s) => s.is_server_error() || *s == StatusCode::TOO_MANY_REQUESTS,
            #[cfg(feature = "dns")]
            Self::Dns(_) => true,
            _ => false,
        }
    }
}

/// Handle → DID resolution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStep {
    /// DNS TXT _atproto.\<handle\>
    DnsTxt,
    /// HTTPS GET https://\<handle\>/.well-known/atproto-did
    HttpsWellKnown,
    /// XRPC com.atproto.identity.resolveHandle against the configured service
    ResolutionService,
}

fn default_plc_directory() -> Url {
    Url::parse("https://plc.directory/").expect("valid url")
}

fn default_handle_resolver() -> Url {
    Url::parse("https://public.api.bsky.app/").expect("valid url")
}

fn default_handle_order() -> Vec<HandleStep> {
    vec![
        HandleStep::DnsTxt,
        HandleStep::HttpsWellKnown,
        HandleStep::ResolutionService,
    ]
}

/// Default lifetime of cached DID documents and handle lookups.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Configurable resolver options.
///
/// ```
/// use std::time::Duration;
/// use bobbin_identity::resolver::{HandleStep, ResolverOptions};
///
/// let opts = ResolverOptions::new()
///     .handle_order(vec![HandleStep::HttpsWellKnown])
///     .did_cache_ttl(Duration::from_secs(30))
///     .build();
/// assert!(opts.validate_doc_id);
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct ResolverOptions {
    /// PLC directory base URL
    #[builder(default = default_plc_directory())]
    pub plc_directory: Url,
    /// Service answering `com.atproto.identity.resolveHandle`, consulted by
    /// [`HandleStep::ResolutionService`]
    #[builder(default = default_handle_resolver())]
    pub handle_resolver: Url,
    /// Order of attempts for handle → DID resolution
    #[builder(default = default_handle_order())]
    pub handle_order: Vec<HandleStep>,
    /// Reject documents whose `id` differs from the requested DID
    #[builder(default = true)]
    pub validate_doc_id: bool,
    /// How long fetched DID documents are served from cache
    #[builder(default = DEFAULT_CACHE_TTL)]
    pub did_cache_ttl: Duration,
    /// How long handle → DID results are served from cache
    #[builder(default = DEFAULT_CACHE_TTL)]
    pub handle_cache_ttl: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::new().build()
    }
}

/// DID Document fetch response.
///
/// Carries the raw response bytes and HTTP status, plus the requested DID so
/// the document `id` can be checked with [`parse_validated`](Self::parse_validated).
#[derive(Clone)]
pub struct DidDocResponse {
    #[allow(missing_docs)]
    pub buffer: Bytes,
    #[allow(missing_docs)]
    pub status: StatusCode,
    /// DID we intended to resolve
    pub requested: Option<Did>,
}

impl DidDocResponse {
    /// Parse the body, failing on a non-success status
    pub fn parse(&self) -> Result<DidDocument> {
        if self.status.is_success() {
            Ok(serde_json::from_slice::<DidDocument>(&self.buffer)?)
        } else {
            Err(IdentityError::HttpStatus(self.status))
        }
    }

    /// Parse and require the document `id` to equal the requested DID.
    ///
    /// On mismatch, returns an error that contains the document for inspection.
    pub fn parse_validated(&self) -> Result<DidDocument> {
        let doc = self.parse()?;
        if let Some(expected) = &self.requested {
            if doc.id != *expected {
                return Err(IdentityError::DocIdMismatch {
                    expected: expected.clone(),
                    doc: Box::new(doc),
                });
            }
        }
        Ok(doc)
    }
}

/// Warnings produced during identity checks that are not fatal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityWarning {
    /// The DID doc did not list the handle we started from under alsoKnownAs
    HandleAliasMismatch {
        #[allow(missing_docs)]
        expected: Handle,
    },
}

/// Everything learned about an account from its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// Account DID
    pub did: Did,
    /// Its DID document
    pub did_document: DidDocument,
    /// Personal Data Server hosting the account
    pub pds_url: Url,
    /// Verified handle, if the document and the input agree on one
    pub handle: Option<Handle>,
    /// Non-fatal problems found along the way
    pub warnings: Vec<IdentityWarning>,
}

/// Trait for identity resolution, for pluggable implementations.
///
/// [`BobbinResolver`](crate::BobbinResolver) is the provided implementation.
pub trait IdentityResolver {
    /// Access options for validation decisions in default methods
    fn options(&self) -> &ResolverOptions;

    /// Resolve handle
    fn resolve_handle(&self, handle: &Handle) -> impl Future<Output = Result<Did>> + Send
    where
        Self: Sync;

    /// Resolve DID document
    fn resolve_did_doc(&self, did: &Did) -> impl Future<Output = Result<DidDocument>> + Send
    where
        Self: Sync;

    /// Resolve DID doc from an identifier
    fn resolve_ident(
        &self,
        actor: &AtIdentifier,
    ) -> impl Future<Output = Result<DidDocument>> + Send
    where
        Self: Sync,
    {
        async move {
            match actor {
                AtIdentifier::Did(did) => self.resolve_did_doc(did).await,
                AtIdentifier::Handle(handle) => {
                    let did = self.resolve_handle(handle).await?;
                    self.resolve_did_doc(&did).await
                }
            }
        }
    }

    /// Return the PDS url for a DID
    fn pds_for_did(&self, did: &Did) -> impl Future<Output = Result<Url>> + Send
    where
        Self: Sync,
    {
        async {
            let doc = self.resolve_did_doc(did).await?;
            doc.pds_endpoint().ok_or_else(|| IdentityError::missing_pds(did))
        }
    }

    /// Resolve an identifier all the way to its PDS.
    ///
    /// For handle input, the handle is only reported back if the DID document
    /// lists it; otherwise a [`IdentityWarning::HandleAliasMismatch`] is
    /// recorded and `handle` is `None`. For DID input, the document's own
    /// handle is used.
    fn resolve(
        &self,
        identifier: &AtIdentifier,
    ) -> impl Future<Output = Result<ResolvedIdentity>> + Send
    where
        Self: Sync,
    {
        async move {
            let mut warnings = Vec::new();
            let (did, did_document, handle) = match identifier {
                AtIdentifier::Did(did) => {
                    did.method()?;
                    let doc = self.resolve_did_doc(did).await?;
                    let handle = doc.handle();
                    (did.clone(), doc, handle)
                }
                AtIdentifier::Handle(handle) => {
                    let did = self.resolve_handle(handle).await?;
                    let doc = self.resolve_did_doc(&did).await?;
                    let handle = if doc.handles().contains(handle) {
                        Some(handle.clone())
                    } else {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%handle, %did, "DID document does not list handle");
                        warnings.push(IdentityWarning::HandleAliasMismatch {
                            expected: handle.clone(),
                        });
                        None
                    };
                    (did, doc, handle)
                }
            };
            let pds_url = did_document
                .pds_endpoint()
                .ok_or_else(|| IdentityError::missing_pds(&did))?;
            Ok(ResolvedIdentity {
                did,
                did_document,
                pds_url,
                handle,
                warnings,
            })
        }
    }
}

impl<T: IdentityResolver + Sync + Send> IdentityResolver for std::sync::Arc<T> {
    fn options(&self) -> &ResolverOptions {
        self.as_ref().options()
    }

    async fn resolve_handle(&self, handle: &Handle) -> Result<Did> {
        self.as_ref().resolve_handle(handle).await
    }

    async fn resolve_did_doc(&self, did: &Did) -> Result<DidDocument> {
        self.as_ref().resolve_did_doc(did).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did(s: &str) -> Did {
        Did::new(s).unwrap()
    }

    #[test]
    fn parse_validated_ok() {
        let resp = DidDocResponse {
            buffer: Bytes::from_static(br#"{"id":"did:plc:z72i7hdynmk6r22z27h6abc2"}"#),
            status: StatusCode::OK,
            requested: Some(did("did:plc:z72i7hdynmk6r22z27h6abc2")),
        };
        resp.parse_validated().expect("valid");
    }

    #[test]
    fn parse_validated_mismatch() {
        let resp = DidDocResponse {
            buffer: Bytes::from_static(br#"{"id":"did:plc:bbbbbbbbbbbbbbbbbbbbbbbb"}"#),
            status: StatusCode::OK,
            requested: Some(did("did:plc:aaaaaaaaaaaaaaaaaaaaaaaa")),
        };
        match resp.parse_validated() {
            Err(IdentityError::DocIdMismatch { expected, doc }) => {
                assert_eq!(expected.as_str(), "did:plc:aaaaaaaaaaaaaaaaaaaaaaaa");
                assert_eq!(doc.id.as_str(), "did:plc:bbbbbbbbbbbbbbbbbbbbbbbb");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn non_success_status_is_an_error() {
        let resp = DidDocResponse {
            buffer: Bytes::from_static(b"not found"),
            status: StatusCode::NOT_FOUND,
            requested: None,
        };
        assert!(matches!(
            resp.parse(),
            Err(IdentityError::HttpStatus(StatusCode::NOT_FOUND))
        ));
    }

    #[test]
    fn default_options() {
        let opts = ResolverOptions::default();
        assert_eq!(opts.plc_directory.as_str(), "https://plc.directory/");
        assert_eq!(opts.handle_order.len(), 3);
        assert_eq!(opts.did_cache_ttl, DEFAULT_CACHE_TTL);
        assert!(opts.validate_doc_id);
    }

    #[test]
    fn transient_classification() {
        assert!(IdentityError::HttpStatus(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!IdentityError::HttpStatus(StatusCode::NOT_FOUND).is_transient());
        assert!(!IdentityError::InvalidWellKnown.is_transient());
    }
}
