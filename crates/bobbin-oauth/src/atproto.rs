//! Native-app client metadata, as the atproto OAuth profile requires it.

use bon::Builder;
use smol_str::SmolStr;
use thiserror::Error;
use url::Url;

use crate::types::OAuthClientMetadata;

#[derive(Error, Debug, miette::Diagnostic, PartialEq, Eq)]
pub enum Error {
    #[error("`client_id` must be an https URL without a fragment")]
    #[diagnostic(
        code(bobbin_oauth::client_metadata::client_id),
        help("the client id is the URL the metadata document is published at")
    )]
    InvalidClientId,
    #[error("`scope` must include `atproto`")]
    #[diagnostic(code(bobbin_oauth::client_metadata::scope))]
    InvalidScope,
    #[error("`redirect_uris` must not be empty")]
    #[diagnostic(code(bobbin_oauth::client_metadata::empty_redirect_uris))]
    EmptyRedirectUris,
    #[error("invalid redirect_uri {uri}: {reason}")]
    #[diagnostic(
        code(bobbin_oauth::client_metadata::redirect_uri),
        help("native apps use `reverse.domain:/path` or an https URL, matched exactly")
    )]
    InvalidRedirectUri { uri: SmolStr, reason: &'static str },
}

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

fn default_scope() -> SmolStr {
    SmolStr::new_static("atproto transition:generic")
}

/// Client configuration.
///
/// Turned into the published document by
/// [`client_metadata`](AtprotoClientMetadata::client_metadata), which is also
/// where it gets validated.
#[derive(Clone, Debug, PartialEq, Eq, Builder)]
#[builder(start_fn = new)]
pub struct AtprotoClientMetadata {
    pub client_id: Url,
    pub redirect_uris: Vec<Url>,
    #[builder(default = default_scope(), into)]
    pub scope: SmolStr,
    #[builder(into)]
    pub client_name: Option<SmolStr>,
    pub client_uri: Option<Url>,
}

impl AtprotoClientMetadata {
    /// Validate and render the metadata document.
    pub fn client_metadata(&self) -> Result<OAuthClientMetadata> {
        if self.client_id.scheme() != "https" || self.client_id.fragment().is_some() {
            return Err(Error::InvalidClientId);
        }
        if !self.scope.split(' ').any(|s| s == "atproto") {
            return Err(Error::InvalidScope);
        }
        if self.redirect_uris.is_empty() {
            return Err(Error::EmptyRedirectUris);
        }
        for uri in &self.redirect_uris {
            validate_redirect_uri(uri)?;
        }
        Ok(OAuthClientMetadata {
            client_id: self.client_id.clone(),
            client_name: self.client_name.clone(),
            client_uri: self.client_uri.clone(),
            redirect_uris: self.redirect_uris.clone(),
            scope: self.scope.clone(),
            grant_types: [GrantType::AuthorizationCode, GrantType::RefreshToken]
                .iter()
                .map(|g| SmolStr::new_static(g.as_str()))
                .collect(),
            response_types: vec![SmolStr::new_static("code")],
            application_type: SmolStr::new_static("native"),
            token_endpoint_auth_method: SmolStr::new_static("none"),
            dpop_bound_access_tokens: true,
        })
    }

    /// Redirect URI sent with authorization requests.
    pub fn default_redirect_uri(&self) -> Option<&Url> {
        self.redirect_uris.first()
    }
}

// https://datatracker.ietf.org/doc/html/rfc8252#section-7.1
fn validate_redirect_uri(uri: &Url) -> Result<()> {
    let invalid = |reason| Error::InvalidRedirectUri {
        uri: uri.as_str().into(),
        reason,
    };
    if uri.as_str().contains('*') {
        return Err(invalid("wildcards are not allowed"));
    }
    if uri.fragment().is_some() {
        return Err(invalid("fragments are not allowed"));
    }
    match uri.scheme() {
        "https" => Ok(()),
        "http" => match uri.host_str() {
            Some("127.0.0.1") | Some("[::1]") => Ok(()),
            _ => Err(invalid("plain http is only allowed for loopback addresses")),
        },
        scheme => {
            if !scheme.contains('.') {
                return Err(invalid("private-use schemes must be a reverse domain name"));
            }
            let rest = &uri.as_str()[scheme.len() + 1..];
            if rest.starts_with("//") || !rest.starts_with('/') {
                return Err(invalid("private-use schemes take a single slash: `scheme:/path`"));
            }
            Ok(())
        }
    }
}
