//! Authorization server discovery.
//!
//! An account's PDS names its authorization server in
//! `/.well-known/oauth-protected-resource`; the server's own metadata lives at
//! `/.well-known/oauth-authorization-server`. Redirects always go to the
//! server found this way, never to whatever resolved the handle.

use std::future::Future;

use bobbin_common::http_client::HttpClient;
use bobbin_common::types::{AtIdentifier, Did};
use bobbin_identity::BobbinResolver;
use bobbin_identity::resolver::{IdentityError, IdentityResolver, ResolvedIdentity};
use http::{Request, StatusCode};
use serde::de::DeserializeOwned;
use smol_str::{SmolStr, format_smolstr};
use url::Url;

use crate::types::{OAuthAuthorizationServerMetadata, OAuthProtectedResourceMetadata};

/// Compare two issuer strings strictly but without spuriously failing on trivial differences.
///
/// Rules:
/// - Schemes must match exactly.
/// - Hostnames and effective ports must match (treat missing port the same as default port).
/// - Path must match, except that an empty path and `/` are equivalent.
/// - Query/fragment are not considered; if present on either side, the comparison fails.
pub fn issuer_equivalent(a: &str, b: &str) -> bool {
    fn normalize(url: &Url) -> Option<(&str, &str, u16, &str)> {
        if url.query().is_some() || url.fragment().is_some() {
            return None;
        }
        let path = match url.path() {
            "" => "/",
            other => other,
        };
        Some((
            url.scheme(),
            url.host_str()?,
            url.port_or_known_default()?,
            path,
        ))
    }

    match (Url::parse(a), Url::parse(b)) {
        (Ok(ua), Ok(ub)) => match (normalize(&ua), normalize(&ub)) {
            (Some(na), Some(nb)) => na == nb,
            _ => false,
        },
        _ => a == b,
    }
}

#[derive(thiserror::Error, Debug, miette::Diagnostic)]
pub enum ResolverError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] IdentityError),
    #[error("protected resource metadata is invalid: {0}")]
    #[diagnostic(
        code(bobbin_oauth::resolver::protected_resource_metadata),
        help("the PDS must name exactly one authorization server")
    )]
    ProtectedResourceMetadata(SmolStr),
    #[error("authorization server metadata is invalid: {0}")]
    #[diagnostic(code(bobbin_oauth::resolver::authorization_server_metadata))]
    AuthorizationServerMetadata(SmolStr),
    #[error("issuer mismatch: expected {expected}, account is served by {found}")]
    #[diagnostic(
        code(bobbin_oauth::resolver::issuer_mismatch),
        help("the account's PDS no longer delegates to this authorization server")
    )]
    IssuerMismatch { expected: SmolStr, found: SmolStr },
    #[error("not a service URL: {0}")]
    #[diagnostic(code(bobbin_oauth::resolver::invalid_service))]
    InvalidService(SmolStr),
    #[error("transport error: {0}")]
    #[diagnostic(code(bobbin_oauth::resolver::transport))]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("http status: {0}")]
    #[diagnostic(code(bobbin_oauth::resolver::http_status))]
    HttpStatus(StatusCode),
    #[error(transparent)]
    #[diagnostic(code(bobbin_oauth::resolver::http_build))]
    HttpBuild(#[from] http::Error),
    #[error(transparent)]
    #[diagnostic(code(bobbin_oauth::resolver::serde_json))]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    #[diagnostic(code(bobbin_oauth::resolver::url))]
    Uri(#[from] url::ParseError),
}

impl ResolverError {
    /// True when the failure came from the network and may go away on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Identity(e) => e.is_transient(),
            Self::Transport(_) => true,
            Self::HttpStatus(s) => s.is_server_error() || *s == StatusCode::TOO_MANY_REQUESTS,
            _ => false,
        }
    }
}

async fn get_json<T, O>(client: &T, url: &Url) -> Result<O, ResolverError>
where
    T: HttpClient + ?Sized,
    O: DeserializeOwned,
{
    let req = Request::builder()
        .uri(url.as_str())
        .header(http::header::ACCEPT, "application/json")
        .body(Vec::new())?;
    let res = client
        .send_http(req)
        .await
        .map_err(|e| ResolverError::Transport(Box::new(e)))?;
    if res.status() != StatusCode::OK {
        return Err(ResolverError::HttpStatus(res.status()));
    }
    Ok(serde_json::from_slice(res.body())?)
}

/// Fetch `/.well-known/oauth-authorization-server` for `server`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(server = %server)))]
pub async fn resolve_authorization_server<T: HttpClient + ?Sized>(
    client: &T,
    server: &Url,
) -> Result<OAuthAuthorizationServerMetadata, ResolverError> {
    let url = server.join("/.well-known/oauth-authorization-server")?;
    let metadata: OAuthAuthorizationServerMetadata = get_json(client, &url).await?;
    // https://datatracker.ietf.org/doc/html/rfc8414#section-3.3
    if !issuer_equivalent(&metadata.issuer, server.as_str()) {
        return Err(ResolverError::AuthorizationServerMetadata(format_smolstr!(
            "invalid issuer: {}",
            metadata.issuer
        )));
    }
    Ok(metadata)
}

/// Fetch `/.well-known/oauth-protected-resource` for `server`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(server = %server)))]
pub async fn resolve_protected_resource_info<T: HttpClient + ?Sized>(
    client: &T,
    server: &Url,
) -> Result<OAuthProtectedResourceMetadata, ResolverError> {
    let url = server.join("/.well-known/oauth-protected-resource")?;
    let mut metadata: OAuthProtectedResourceMetadata = get_json(client, &url).await?;
    if !issuer_equivalent(&metadata.resource, server.as_str()) {
        return Err(ResolverError::ProtectedResourceMetadata(format_smolstr!(
            "invalid resource: {}",
            metadata.resource
        )));
    }
    metadata.resource = server.as_str().into();
    Ok(metadata)
}

async fn get_authorization_server_metadata_impl<T: HttpClient + Sync + ?Sized>(
    client: &T,
    issuer: &Url,
) -> Result<OAuthAuthorizationServerMetadata, ResolverError> {
    let mut md = resolve_authorization_server(client, issuer).await?;
    // Normalize issuer string to the input URL representation to avoid slash quirks
    md.issuer = issuer.as_str().into();
    Ok(md)
}

async fn get_resource_server_metadata_impl<T: OAuthResolver + Sync + ?Sized>(
    resolver: &T,
    pds: &Url,
) -> Result<OAuthAuthorizationServerMetadata, ResolverError> {
    let rs_metadata = resolve_protected_resource_info(resolver, pds).await?;
    // ATPROTO requires one, and only one, authorization server entry
    let issuer = match rs_metadata.authorization_servers.as_deref() {
        Some([issuer]) => Url::parse(issuer)?,
        Some([_, _, ..]) => {
            return Err(ResolverError::ProtectedResourceMetadata(format_smolstr!(
                "unable to determine authorization server for PDS: {pds}"
            )));
        }
        _ => {
            return Err(ResolverError::ProtectedResourceMetadata(format_smolstr!(
                "no authorization server found for PDS: {pds}"
            )));
        }
    };
    let as_metadata = resolver.get_authorization_server_metadata(&issuer).await?;
    // https://datatracker.ietf.org/doc/html/draft-ietf-oauth-resource-metadata-08#name-authorization-server-metada
    if let Some(protected_resources) = &as_metadata.protected_resources {
        if !protected_resources
            .iter()
            .any(|r| issuer_equivalent(r, &rs_metadata.resource))
        {
            return Err(ResolverError::AuthorizationServerMetadata(format_smolstr!(
                "pds {pds} is not protected by issuer {issuer}"
            )));
        }
    }
    Ok(as_metadata)
}

async fn resolve_from_service_impl<T: OAuthResolver + Sync + ?Sized>(
    resolver: &T,
    input: &Url,
) -> Result<OAuthAuthorizationServerMetadata, ResolverError> {
    // Assume first that input is a PDS URL (as required by ATPROTO)
    match resolver.get_resource_server_metadata(input).await {
        Ok(metadata) => Ok(metadata),
        Err(e) if e.is_transient() => Err(e),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(service = %input, error = %_e, "no usable protected resource metadata, trying service as issuer");
            // PDS that is its own authorization server, or an entryway
            resolver.get_authorization_server_metadata(input).await
        }
    }
}

async fn resolve_from_identity_impl<T: OAuthResolver + Sync + ?Sized>(
    resolver: &T,
    ident: &AtIdentifier,
) -> Result<(OAuthAuthorizationServerMetadata, ResolvedIdentity), ResolverError> {
    let identity = resolver.resolve(ident).await?;
    let metadata = resolver.resolve_from_service(&identity.pds_url).await?;
    Ok((metadata, identity))
}

async fn verify_issuer_impl<T: OAuthResolver + Sync + ?Sized>(
    resolver: &T,
    issuer: &str,
    sub: &Did,
) -> Result<ResolvedIdentity, ResolverError> {
    let (metadata, identity) = resolver
        .resolve_from_identity(&AtIdentifier::Did(sub.clone()))
        .await?;
    if !issuer_equivalent(&metadata.issuer, issuer) {
        return Err(ResolverError::IssuerMismatch {
            expected: issuer.into(),
            found: metadata.issuer,
        });
    }
    Ok(identity)
}

/// Identity resolution plus OAuth discovery over the same HTTP client.
pub trait OAuthResolver: IdentityResolver + HttpClient {
    /// Check that `sub` really is served by `issuer`.
    ///
    /// Token responses are only trusted once this passes; it runs after every
    /// code exchange and before every refresh.
    fn verify_issuer(
        &self,
        issuer: &str,
        sub: &Did,
    ) -> impl Future<Output = Result<ResolvedIdentity, ResolverError>> + Send
    where
        Self: Sync,
    {
        verify_issuer_impl(self, issuer, sub)
    }

    fn resolve_from_service(
        &self,
        input: &Url,
    ) -> impl Future<Output = Result<OAuthAuthorizationServerMetadata, ResolverError>> + Send
    where
        Self: Sync,
    {
        resolve_from_service_impl(self, input)
    }

    fn resolve_from_identity(
        &self,
        ident: &AtIdentifier,
    ) -> impl Future<
        Output = Result<(OAuthAuthorizationServerMetadata, ResolvedIdentity), ResolverError>,
    > + Send
    where
        Self: Sync,
    {
        resolve_from_identity_impl(self, ident)
    }

    fn get_authorization_server_metadata(
        &self,
        issuer: &Url,
    ) -> impl Future<Output = Result<OAuthAuthorizationServerMetadata, ResolverError>> + Send
    where
        Self: Sync,
    {
        get_authorization_server_metadata_impl(self, issuer)
    }

    fn get_resource_server_metadata(
        &self,
        pds: &Url,
    ) -> impl Future<Output = Result<OAuthAuthorizationServerMetadata, ResolverError>> + Send
    where
        Self: Sync,
    {
        get_resource_server_metadata_impl(self, pds)
    }
}

impl<C: HttpClient + Send + Sync> OAuthResolver for BobbinResolver<C> {}
