//! Identity resolution for the AT Protocol
//!
//! Handle-to-DID and DID-to-document resolution with configurable fallback
//! order and time-bounded caching.
//!
//! ## Quick start
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use bobbin_identity::{BobbinResolver, resolver::IdentityResolver};
//! use bobbin_common::types::AtIdentifier;
//!
//! let resolver = BobbinResolver::default();
//! let ident = resolver.resolve(&AtIdentifier::new("alice.bsky.social")?).await?;
//! println!("{} is hosted at {}", ident.did, ident.pds_url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Resolution order
//!
//! **Handle → DID** (configurable via [`resolver::HandleStep`]):
//! 1. DNS TXT record at `_atproto.{handle}` (if `dns` feature enabled)
//! 2. HTTPS well-known at `https://{handle}/.well-known/atproto-did`
//! 3. `com.atproto.identity.resolveHandle` on the configured resolution service
//!
//! **DID → Document**:
//! - `did:plc` from the PLC directory
//! - `did:web` from `https://{host}/.well-known/did.json` (or `{path}/did.json`)
//!
//! Both lookups are cached; see [`resolver::ResolverOptions`] for the TTLs.

#![cfg_attr(target_arch = "wasm32", allow(unused))]
pub mod cache;
pub mod resolver;

use crate::cache::TtlCache;
use crate::resolver::{
    DidDocResponse, HandleStep, IdentityError, IdentityResolver, ResolverOptions,
};
use bobbin_common::http_client::HttpClient;
use bobbin_common::types::did::did_web_to_url;
use bobbin_common::types::{Did, DidDocument, DidMethod, Handle};
use bytes::Bytes;
use http::{Method, StatusCode, header};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use url::Url;

#[cfg(all(feature = "dns", not(target_family = "wasm")))]
use hickory_resolver::{TokioAsyncResolver, config::ResolverConfig};

/// Default resolver implementation.
///
/// Cloning is cheap and clones share the caches.
#[derive(Clone)]
pub struct BobbinResolver<C = reqwest::Client> {
    http: C,
    opts: ResolverOptions,
    did_cache: Arc<TtlCache<Did, DidDocument>>,
    handle_cache: Arc<TtlCache<Handle, Did>>,
    #[cfg(feature = "dns")]
    dns: Option<Arc<TokioAsyncResolver>>,
}

#[derive(Serialize)]
struct ResolveHandleParams<'a> {
    handle: &'a str,
}

#[derive(Deserialize)]
struct ResolveHandleOutput {
    did: SmolStr,
}

impl<C> BobbinResolver<C> {
    /// Create a resolver with all options (except DNS) up front
    pub fn new(http: C, opts: ResolverOptions) -> Self {
        #[cfg(feature = "tracing")]
        tracing::info!(
            plc_directory = %opts.plc_directory,
            handle_resolver = %opts.handle_resolver,
            validate_doc_id = opts.validate_doc_id,
            did_cache_ttl = ?opts.did_cache_ttl,
            handle_cache_ttl = ?opts.handle_cache_ttl,
            "bobbin resolver created"
        );

        Self {
            did_cache: Arc::new(TtlCache::new(opts.did_cache_ttl)),
            handle_cache: Arc::new(TtlCache::new(opts.handle_cache_ttl)),
            http,
            opts,
            #[cfg(feature = "dns")]
            dns: None,
        }
    }

    #[cfg(feature = "dns")]
    /// Add system DNS resolution for `_atproto` TXT records
    pub fn with_system_dns(mut self) -> Self {
        self.dns = Some(Arc::new(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            Default::default(),
        )));
        self
    }

    /// Enable/disable doc id validation
    pub fn with_validate_doc_id(mut self, enable: bool) -> Self {
        self.opts.validate_doc_id = enable;
        self
    }

    /// The underlying HTTP client
    pub fn http(&self) -> &C {
        &self.http
    }

    /// Drop every cached handle and DID document.
    pub fn clear_caches(&self) {
        self.did_cache.clear();
        self.handle_cache.clear();
    }

    /// Construct the HTTPS URL of a `did:web` document.
    ///
    /// - `did:web:example.com` → `https://example.com/.well-known/did.json`
    /// - `did:web:example.com:user:alice` → `https://example.com/user/alice/did.json`
    pub fn did_web_url(did: &Did) -> resolver::Result<Url> {
        let mut url = did_web_to_url(did)?;
        if url.path() == "/" {
            url.set_path("/.well-known/did.json");
        } else {
            let path = format!("{}/did.json", url.path().trim_end_matches('/'));
            url.set_path(&path);
        }
        Ok(url)
    }

    fn plc_url(&self, did: &Did) -> resolver::Result<Url> {
        // Url::join would read the `did:` prefix as a scheme.
        let base = self.opts.plc_directory.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{did}"))?)
    }

    fn accept_did(raw: &str) -> resolver::Result<Did> {
        let did = Did::new(raw.trim())?;
        did.method()?;
        Ok(did)
    }

    fn parse_atproto_did_body(body: &str) -> resolver::Result<Did> {
        let line = body
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or(IdentityError::InvalidWellKnown)?;
        Self::accept_did(line).map_err(|_| IdentityError::InvalidWellKnown)
    }
}

impl<C: HttpClient + Sync> BobbinResolver<C> {
    async fn get_bytes(&self, url: &Url) -> resolver::Result<(Bytes, StatusCode)> {
        let request = http::Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header(header::ACCEPT, "application/json")
            .body(Vec::new())?;
        let response = self
            .http
            .send_http(request)
            .await
            .map_err(IdentityError::transport)?;
        let status = response.status();
        Ok((Bytes::from(response.into_body()), status))
    }

    async fn get_text(&self, url: &Url) -> resolver::Result<String> {
        let (buf, status) = self.get_bytes(url).await?;
        if status == StatusCode::OK {
            Ok(String::from_utf8_lossy(&buf).into_owned())
        } else {
            Err(IdentityError::HttpStatus(status))
        }
    }

    #[cfg(feature = "dns")]
    async fn resolve_handle_via_dns(&self, handle: &Handle) -> resolver::Result<Did> {
        let Some(dns) = &self.dns else {
            return Err(IdentityError::HandleNotFound(handle.clone()));
        };
        let response = dns.txt_lookup(format!("_atproto.{handle}.")).await?;
        for txt in response.iter() {
            for data in txt.txt_data().iter() {
                let record = String::from_utf8_lossy(data);
                if let Some(did) = record.strip_prefix("did=") {
                    if let Ok(did) = Self::accept_did(did) {
                        return Ok(did);
                    }
                }
            }
        }
        Err(IdentityError::HandleNotFound(handle.clone()))
    }

    #[cfg(not(feature = "dns"))]
    async fn resolve_handle_via_dns(&self, handle: &Handle) -> resolver::Result<Did> {
        Err(IdentityError::HandleNotFound(handle.clone()))
    }

    async fn resolve_handle_via_well_known(&self, handle: &Handle) -> resolver::Result<Did> {
        let url = Url::parse(&format!("https://{handle}/.well-known/atproto-did"))?;
        let text = self.get_text(&url).await?;
        Self::parse_atproto_did_body(&text)
    }

    /// Resolve a handle with `com.atproto.identity.resolveHandle` on the
    /// configured resolution service.
    pub async fn resolve_handle_via_service(&self, handle: &Handle) -> resolver::Result<Did> {
        let mut url = self.opts.handle_resolver.clone();
        url.set_path("/xrpc/com.atproto.identity.resolveHandle");
        if let Ok(qs) = serde_html_form::to_string(ResolveHandleParams {
            handle: handle.as_str(),
        }) {
            url.set_query(Some(&qs));
        }
        let (buf, status) = self.get_bytes(&url).await?;
        if !status.is_success() {
            return Err(IdentityError::HttpStatus(status));
        }
        let out: ResolveHandleOutput = serde_json::from_slice(&buf)?;
        Ok(Self::accept_did(&out.did)?)
    }
}

impl<C: HttpClient + Send + Sync> IdentityResolver for BobbinResolver<C> {
    fn options(&self) -> &ResolverOptions {
        &self.opts
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(handle = %handle)))]
    async fn resolve_handle(&self, handle: &Handle) -> resolver::Result<Did> {
        if let Some(did) = self.handle_cache.get(handle) {
            #[cfg(feature = "tracing")]
            tracing::trace!(%did, "handle cache hit");
            return Ok(did);
        }

        let mut last_err = None;
        for step in &self.opts.handle_order {
            let attempt = match step {
                HandleStep::DnsTxt => self.resolve_handle_via_dns(handle).await,
                HandleStep::HttpsWellKnown => self.resolve_handle_via_well_known(handle).await,
                HandleStep::ResolutionService => self.resolve_handle_via_service(handle).await,
            };
            match attempt {
                Ok(did) => {
                    self.handle_cache.set(handle.clone(), did.clone());
                    return Ok(did);
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(?step, error = %e, "handle resolution step failed");
                    last_err = Some(e);
                }
            }
        }

        // A network failure is surfaced as-is so the caller can retry.
        match last_err {
            Some(e) if e.is_transient() => Err(e),
            _ => Err(IdentityError::HandleNotFound(handle.clone())),
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(did = %did)))]
    async fn resolve_did_doc(&self, did: &Did) -> resolver::Result<DidDocument> {
        if let Some(doc) = self.did_cache.get(did) {
            #[cfg(feature = "tracing")]
            tracing::trace!("DID document cache hit");
            return Ok(doc);
        }

        let url = match did.method()? {
            DidMethod::Plc => self.plc_url(did)?,
            DidMethod::Web => Self::did_web_url(did)?,
        };
        let (buffer, status) = self.get_bytes(&url).await?;
        let response = DidDocResponse {
            buffer,
            status,
            requested: Some(did.clone()),
        };
        let doc = if self.opts.validate_doc_id {
            response.parse_validated()?
        } else {
            response.parse()?
        };
        self.did_cache.set(did.clone(), doc.clone());
        Ok(doc)
    }
}

impl<C: HttpClient + Sync> HttpClient for BobbinResolver<C> {
    type Error = C::Error;

    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> core::result::Result<http::Response<Vec<u8>>, Self::Error> {
        self.http.send_http(request).await
    }
}

impl Default for BobbinResolver {
    /// Build a resolver with a reqwest client, default options, and system
    /// DNS if compiled with the `dns` feature.
    fn default() -> Self {
        let resolver = BobbinResolver::new(reqwest::Client::new(), ResolverOptions::default());
        #[cfg(feature = "dns")]
        let resolver = resolver.with_system_dns();
        resolver
    }
}
