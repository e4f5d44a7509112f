//! Requests to the authorization server: PAR, code exchange, refresh, revocation.

use bobbin_common::http_client::HttpClient;
use bobbin_common::session::SessionStoreError;
use http::{Method, Request, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smol_str::SmolStr;
use url::Url;

use crate::{
    dpop::{DpopError, DpopExt},
    error::BoxError,
    resolver::ResolverError,
    session::{DpopDataSource, DpopState},
    types::{
        AuthorizationCodeChallengeMethod, AuthorizationResponseType, OAuthAuthorizationServerMetadata,
        OAuthClientMetadata, OAuthParResponse, OAuthTokenResponse, ParParameters,
        RefreshRequestParameters, RevocationRequestParameters, TokenGrantType,
        TokenRequestParameters,
    },
    utils::{generate_dpop_key, generate_nonce, generate_pkce},
};

/// OAuth request error for token operations and auth flows
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("{kind}")]
pub struct RequestError {
    #[diagnostic_source]
    kind: RequestErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<SmolStr>,
    context: Option<SmolStr>,
    url: Option<SmolStr>,
}

/// Error categories for OAuth request operations
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RequestErrorKind {
    /// No endpoint available
    #[error("no {0} endpoint available")]
    #[diagnostic(
        code(bobbin_oauth::request::no_endpoint),
        help("server does not advertise this endpoint")
    )]
    NoEndpoint(SmolStr),

    /// The server cannot do something this client requires
    #[error("authorization server does not support {0}")]
    #[diagnostic(code(bobbin_oauth::request::unsupported))]
    Unsupported(SmolStr),

    /// Token response verification failed
    #[error("token response verification failed")]
    #[diagnostic(code(bobbin_oauth::request::token_verification))]
    TokenVerification,

    /// No refresh token available
    #[error("no refresh token available")]
    #[diagnostic(code(bobbin_oauth::request::no_refresh_token))]
    NoRefreshToken,

    /// DPoP proof could not be built
    #[error("dpop error")]
    #[diagnostic(code(bobbin_oauth::request::dpop))]
    Dpop,

    /// Request never got a response
    #[error("transport error")]
    #[diagnostic(code(bobbin_oauth::request::transport))]
    Transport,

    /// Session storage error
    #[error("storage error")]
    #[diagnostic(code(bobbin_oauth::request::storage))]
    Storage,

    /// Resolver error
    #[error("resolver error")]
    #[diagnostic(code(bobbin_oauth::request::resolver))]
    Resolver,

    /// HTTP build error
    #[error("http build error")]
    #[diagnostic(code(bobbin_oauth::request::http_build))]
    HttpBuild,

    /// HTTP status error
    #[error("http status: {0}")]
    #[diagnostic(
        code(bobbin_oauth::request::http_status),
        help("see server response for details")
    )]
    HttpStatus(StatusCode),

    /// HTTP status with error body
    #[error("http status: {status}, body: {body}")]
    #[diagnostic(
        code(bobbin_oauth::request::http_status_body),
        help("server returned error JSON; inspect fields like `error`, `error_description`")
    )]
    HttpStatusWithBody { status: StatusCode, body: Value },

    /// Form serialization error
    #[error("form serialization error")]
    #[diagnostic(code(bobbin_oauth::request::serde_form))]
    SerdeHtmlForm,

    /// JSON error
    #[error("json error")]
    #[diagnostic(code(bobbin_oauth::request::serde_json))]
    SerdeJson,
}

impl RequestError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: RequestErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
            url: None,
        }
    }

    /// Get the error kind
    pub fn kind(&self) -> &RequestErrorKind {
        &self.kind
    }

    /// Get the context string if present
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Get the URL if present
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Add help text to this error
    pub fn with_help(mut self, help: impl Into<SmolStr>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context to this error
    pub fn with_context(mut self, context: impl Into<SmolStr>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add URL to this error
    pub fn with_url(mut self, url: impl Into<SmolStr>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Create a no endpoint error
    pub fn no_endpoint(endpoint: impl Into<SmolStr>) -> Self {
        Self::new(RequestErrorKind::NoEndpoint(endpoint.into()), None)
    }

    /// Create an unsupported-feature error
    pub fn unsupported(feature: impl Into<SmolStr>) -> Self {
        Self::new(RequestErrorKind::Unsupported(feature.into()), None)
    }

    /// Create a token verification error
    pub fn token_verification() -> Self {
        Self::new(RequestErrorKind::TokenVerification, None)
    }

    /// Create a no refresh token error
    pub fn no_refresh_token() -> Self {
        Self::new(RequestErrorKind::NoRefreshToken, None)
    }

    /// Create an HTTP status error
    pub fn http_status(status: StatusCode) -> Self {
        Self::new(RequestErrorKind::HttpStatus(status), None)
    }

    /// Create an HTTP status with body error
    pub fn http_status_with_body(status: StatusCode, body: Value) -> Self {
        Self::new(RequestErrorKind::HttpStatusWithBody { status, body }, None)
    }

    /// OAuth `error` code from the server's error body, if any.
    pub fn oauth_error(&self) -> Option<&str> {
        match &self.kind {
            RequestErrorKind::HttpStatusWithBody { body, .. } => body.get("error")?.as_str(),
            _ => None,
        }
    }

    /// True if the grant is gone for good and retrying with it is pointless.
    ///
    /// Covers `invalid_grant` from the token endpoint and a session that never
    /// had a refresh token.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self.kind, RequestErrorKind::NoRefreshToken)
            || self.oauth_error() == Some("invalid_grant")
    }

    /// True if the request never reached the server or got no answer.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, RequestErrorKind::Transport)
    }
}

impl From<DpopError> for RequestError {
    fn from(e: DpopError) -> Self {
        let msg = smol_str::format_smolstr!("{:?}", e);
        let kind = match e {
            DpopError::Transport(_) => RequestErrorKind::Transport,
            _ => RequestErrorKind::Dpop,
        };
        Self::new(kind, Some(Box::new(e)))
            .with_context(msg)
            .with_help("check DPoP key configuration and nonce handling")
    }
}

impl From<SessionStoreError> for RequestError {
    fn from(e: SessionStoreError) -> Self {
        let msg = smol_str::format_smolstr!("{:?}", e);
        Self::new(RequestErrorKind::Storage, Some(Box::new(e)))
            .with_context(msg)
            .with_help("verify session store is accessible and writable")
    }
}

impl From<ResolverError> for RequestError {
    fn from(e: ResolverError) -> Self {
        let msg = smol_str::format_smolstr!("{:?}", e);
        Self::new(RequestErrorKind::Resolver, Some(Box::new(e)))
            .with_context(msg)
            .with_help("check identity resolution and OAuth metadata endpoints")
    }
}

impl From<http::Error> for RequestError {
    fn from(e: http::Error) -> Self {
        let msg = smol_str::format_smolstr!("{:?}", e);
        Self::new(RequestErrorKind::HttpBuild, Some(Box::new(e)))
            .with_context(msg)
            .with_help("verify request URIs and headers are valid")
    }
}

impl From<serde_html_form::ser::Error> for RequestError {
    fn from(e: serde_html_form::ser::Error) -> Self {
        let msg = smol_str::format_smolstr!("{:?}", e);
        Self::new(RequestErrorKind::SerdeHtmlForm, Some(Box::new(e)))
            .with_context(msg)
            .with_help("check OAuth request parameters are serializable")
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        let msg = smol_str::format_smolstr!("{:?}", e);
        Self::new(RequestErrorKind::SerdeJson, Some(Box::new(e)))
            .with_context(msg)
            .with_help("verify OAuth response body is valid JSON")
    }
}

pub type Result<T> = core::result::Result<T, RequestError>;

pub enum OAuthRequest {
    Token(TokenRequestParameters),
    Refresh(RefreshRequestParameters),
    Revocation(RevocationRequestParameters),
    PushedAuthorizationRequest(ParParameters),
}

impl OAuthRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Refresh(_) => "refresh",
            Self::Revocation(_) => "revocation",
            Self::PushedAuthorizationRequest(_) => "pushed_authorization_request",
        }
    }

    /// Whether `status` counts as success for this request.
    pub fn is_success(&self, status: StatusCode) -> bool {
        match self {
            Self::Token(_) | Self::Refresh(_) => status == StatusCode::OK,
            // RFC 9126 says 201; some deployments answer 200.
            Self::PushedAuthorizationRequest(_) => {
                status == StatusCode::CREATED || status == StatusCode::OK
            }
            // RFC 7009 says 200, oauth-provider returns 204.
            Self::Revocation(_) => status.is_success(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestPayload<'a, T>
where
    T: Serialize,
{
    client_id: &'a str,
    #[serde(flatten)]
    parameters: T,
}

/// Everything a request to the authorization server needs to know about both ends.
#[derive(Debug, Clone)]
pub struct OAuthMetadata {
    pub server_metadata: OAuthAuthorizationServerMetadata,
    pub client_metadata: OAuthClientMetadata,
}

impl OAuthMetadata {
    fn redirect_uri(&self) -> Result<&Url> {
        self.client_metadata
            .redirect_uris
            .first()
            .ok_or_else(|| RequestError::no_endpoint("redirect_uri"))
    }
}

/// Outcome of a pushed authorization request.
#[derive(Debug, Clone)]
pub struct ParResult {
    pub state: SmolStr,
    pub pkce_verifier: SmolStr,
    pub code_challenge: SmolStr,
    pub dpop: DpopState,
    pub request_uri: SmolStr,
    pub redirect_uri: Url,
}

/// Push the authorization parameters (RFC 9126) and get a `request_uri` back.
///
/// Generates the `state`, the PKCE pair, and the session's DPoP key; all three
/// are returned so the callback can be matched and completed.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(issuer = %metadata.server_metadata.issuer)))]
pub async fn par<T>(
    client: &T,
    login_hint: Option<SmolStr>,
    metadata: &OAuthMetadata,
) -> Result<ParResult>
where
    T: HttpClient,
{
    let server = &metadata.server_metadata;
    if server.pushed_authorization_request_endpoint.is_none() {
        return Err(RequestError::no_endpoint("pushed_authorization_request"));
    }
    let s256 = AuthorizationCodeChallengeMethod::S256.as_str();
    if !server.code_challenge_methods_supported.is_empty()
        && !server
            .code_challenge_methods_supported
            .iter()
            .any(|m| m == s256)
    {
        return Err(RequestError::unsupported("S256 code challenges"));
    }
    let Some(dpop_key) = generate_dpop_key(server) else {
        return Err(RequestError::unsupported("ES256 DPoP proofs"));
    };

    let state = generate_nonce();
    let (code_challenge, pkce_verifier) = generate_pkce();
    let redirect_uri = metadata.redirect_uri()?.clone();
    let mut dpop = DpopState::new(dpop_key);
    let parameters = ParParameters {
        response_type: AuthorizationResponseType::Code,
        redirect_uri: redirect_uri.as_str().into(),
        state: state.clone(),
        scope: metadata.client_metadata.scope.clone(),
        code_challenge: code_challenge.clone(),
        code_challenge_method: AuthorizationCodeChallengeMethod::S256,
        login_hint,
    };
    let response: OAuthParResponse = oauth_request(
        client,
        &mut dpop,
        OAuthRequest::PushedAuthorizationRequest(parameters),
        metadata,
    )
    .await?;

    Ok(ParResult {
        state,
        pkce_verifier,
        code_challenge,
        dpop,
        request_uri: response.request_uri,
        redirect_uri,
    })
}

/// `authorization_endpoint?client_id=...&request_uri=...`
pub fn authorization_url(metadata: &OAuthMetadata, request_uri: &str) -> Result<Url> {
    #[derive(Serialize)]
    struct Parameters<'s> {
        client_id: &'s str,
        request_uri: &'s str,
    }
    let mut url = Url::parse(&metadata.server_metadata.authorization_endpoint).map_err(|e| {
        RequestError::new(RequestErrorKind::HttpBuild, Some(Box::new(e)))
            .with_url(metadata.server_metadata.authorization_endpoint.clone())
    })?;
    url.set_query(Some(&serde_html_form::to_string(Parameters {
        client_id: metadata.client_metadata.client_id.as_str(),
        request_uri,
    })?));
    Ok(url)
}

/// Trade an authorization code for tokens.
///
/// The response's `sub` is NOT trusted yet; the caller must verify the issuer.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
pub async fn exchange_code<T, D>(
    client: &T,
    data_source: &mut D,
    code: &str,
    verifier: &str,
    metadata: &OAuthMetadata,
) -> Result<OAuthTokenResponse>
where
    T: HttpClient,
    D: DpopDataSource,
{
    let response: OAuthTokenResponse = oauth_request(
        client,
        data_source,
        OAuthRequest::Token(TokenRequestParameters {
            grant_type: TokenGrantType::AuthorizationCode,
            code: code.into(),
            redirect_uri: metadata.redirect_uri()?.as_str().into(),
            code_verifier: verifier.into(),
        }),
        metadata,
    )
    .await?;
    if response.sub.is_none() {
        return Err(RequestError::token_verification().with_context("token response has no `sub`"));
    }
    Ok(response)
}

/// `grant_type=refresh_token` against `token_endpoint`, signed with the session's key.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(token_endpoint = %token_endpoint)))]
pub async fn refresh<T, D>(
    client: &T,
    data_source: &mut D,
    token_endpoint: &str,
    refresh_token: Option<&str>,
    client_id: &Url,
) -> Result<OAuthTokenResponse>
where
    T: HttpClient,
    D: DpopDataSource,
{
    let Some(refresh_token) = refresh_token else {
        return Err(RequestError::no_refresh_token());
    };
    send_form(
        client,
        data_source,
        token_endpoint,
        client_id.as_str(),
        OAuthRequest::Refresh(RefreshRequestParameters {
            grant_type: TokenGrantType::RefreshToken,
            refresh_token: refresh_token.into(),
        }),
    )
    .await
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(revocation_endpoint = %revocation_endpoint)))]
pub async fn revoke<T, D>(
    client: &T,
    data_source: &mut D,
    revocation_endpoint: &str,
    token: &str,
    client_id: &Url,
) -> Result<()>
where
    T: HttpClient,
    D: DpopDataSource,
{
    send_form(
        client,
        data_source,
        revocation_endpoint,
        client_id.as_str(),
        OAuthRequest::Revocation(RevocationRequestParameters {
            token: token.into(),
        }),
    )
    .await
}

pub async fn oauth_request<O, T, D>(
    client: &T,
    data_source: &mut D,
    request: OAuthRequest,
    metadata: &OAuthMetadata,
) -> Result<O>
where
    T: HttpClient,
    O: DeserializeOwned,
    D: DpopDataSource,
{
    let Some(url) = endpoint_for_req(&metadata.server_metadata, &request) else {
        return Err(RequestError::no_endpoint(request.name()));
    };
    send_form(
        client,
        data_source,
        url,
        metadata.client_metadata.client_id.as_str(),
        request,
    )
    .await
}

async fn send_form<O, T, D>(
    client: &T,
    data_source: &mut D,
    url: &str,
    client_id: &str,
    request: OAuthRequest,
) -> Result<O>
where
    T: HttpClient,
    O: DeserializeOwned,
    D: DpopDataSource,
{
    let body = match &request {
        OAuthRequest::Token(params) => build_oauth_req_body(client_id, params)?,
        OAuthRequest::Refresh(params) => build_oauth_req_body(client_id, params)?,
        OAuthRequest::Revocation(params) => build_oauth_req_body(client_id, params)?,
        OAuthRequest::PushedAuthorizationRequest(params) => {
            build_oauth_req_body(client_id, params)?
        }
    };
    let req = Request::builder()
        .uri(url)
        .method(Method::POST)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json")
        .body(body.into_bytes())?;
    let res = client
        .dpop_server_call(data_source)
        .send(req)
        .await
        .map_err(|e| RequestError::from(e).with_url(url))?;
    let status = res.status();
    if request.is_success(status) {
        let body = res.body();
        if body.is_empty() {
            // since an empty body cannot be deserialized, use “null” temporarily to allow deserialization to `()`.
            Ok(serde_json::from_slice(b"null")?)
        } else {
            Ok(serde_json::from_slice(body)?)
        }
    } else if status.is_client_error() {
        let body = serde_json::from_slice(res.body())
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(res.body()).into_owned()));
        Err(RequestError::http_status_with_body(status, body).with_url(url))
    } else {
        Err(RequestError::http_status(status).with_url(url))
    }
}

#[inline]
fn endpoint_for_req<'r>(
    server_metadata: &'r OAuthAuthorizationServerMetadata,
    request: &OAuthRequest,
) -> Option<&'r str> {
    match request {
        OAuthRequest::Token(_) | OAuthRequest::Refresh(_) => Some(&server_metadata.token_endpoint),
        OAuthRequest::Revocation(_) => server_metadata.revocation_endpoint.as_deref(),
        OAuthRequest::PushedAuthorizationRequest(_) => server_metadata
            .pushed_authorization_request_endpoint
            .as_deref(),
    }
}

#[inline]
fn build_oauth_req_body<S>(client_id: &str, parameters: S) -> Result<String>
where
    S: Serialize,
{
    Ok(serde_html_form::to_string(RequestPayload {
        client_id,
        parameters,
    })?)
}
