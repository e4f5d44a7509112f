use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bobbin_common::session::SecureStore;
use bobbin_common::types::{AtIdentifier, Did};
use bobbin_identity::resolver::{IdentityError, IdentityResolver};
use bon::Builder;
use chrono::{TimeDelta, Utc};
use http::{HeaderValue, Request, Response, header::AUTHORIZATION};
use smol_str::{SmolStr, format_smolstr};
use url::Url;

use crate::{
    atproto::AtprotoClientMetadata,
    authstore::{DeleteCause, PendingRequests, SessionEvents, SessionStore},
    browser::{BrowserLauncher, BrowserOutcome},
    dpop::{DpopError, DpopExt},
    error::{CallbackError, OAuthError, Operation, Result},
    flow::{AuthFlow, FlowState},
    lock::LockTable,
    request::{self, OAuthMetadata, RequestError},
    resolver::{OAuthResolver, ResolverError, issuer_equivalent},
    session::{AuthRequestContext, OAuthSession, expires_at},
    types::{CallbackParams, OAuthAuthorizationServerMetadata, OAuthClientMetadata, OAuthTokenType},
};

/// Timeouts and expiry windows for a [`SessionManager`].
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct ClientConfig {
    /// Limit for each network step (resolution, discovery, PAR, token calls)
    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,
    /// How long the user gets to finish in the browser
    #[builder(default = Duration::from_secs(10 * 60))]
    pub authorization_timeout: Duration,
    /// How long a [`SessionManager::start_auth`] context waits for its callback
    #[builder(default = Duration::from_secs(10 * 60))]
    pub pending_ttl: Duration,
    /// Access tokens expiring within this window are refreshed ahead of time
    #[builder(default = Duration::from_secs(10))]
    pub refresh_leeway: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new().build()
    }
}

/// When [`SessionManager::restore`] refreshes tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Only if the access token has expired
    #[default]
    Auto,
    Always,
    Never,
}

/// Result of an interactive sign-in.
///
/// Closing the browser is not an error; it shows up as `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(OAuthSession),
    Cancelled,
}

async fn with_timeout<F, T, E>(limit: Duration, operation: Operation, fut: F) -> Result<T>
where
    F: Future<Output = core::result::Result<T, E>>,
    OAuthError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(OAuthError::Timeout(operation)),
    }
}

/// Signs accounts in and keeps their sessions fresh.
///
/// Each manager owns its lock table, pending requests, and session store, so
/// several can live side by side in one process. Refresh, revoke, and
/// automatic refresh on restore are serialized per account.
pub struct SessionManager<T, S> {
    resolver: Arc<T>,
    store: SessionStore<S>,
    locks: LockTable,
    pending: PendingRequests,
    client_metadata: OAuthClientMetadata,
    config: ClientConfig,
}

impl<T, S> SessionManager<T, S>
where
    T: OAuthResolver + Send + Sync,
    S: SecureStore,
{
    pub fn new(
        resolver: T,
        store: S,
        client: AtprotoClientMetadata,
        config: ClientConfig,
    ) -> Result<Self> {
        let client_metadata = client.client_metadata()?;
        Ok(Self {
            resolver: Arc::new(resolver),
            store: SessionStore::new(store),
            locks: LockTable::new(),
            pending: PendingRequests::new(config.pending_ttl),
            client_metadata,
            config,
        })
    }

    pub fn resolver(&self) -> &T {
        &self.resolver
    }

    pub fn store(&self) -> &SessionStore<S> {
        &self.store
    }

    pub fn client_metadata(&self) -> &OAuthClientMetadata {
        &self.client_metadata
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session updates and deletions, in the order they happen.
    pub fn subscribe(&self) -> SessionEvents {
        self.store.subscribe()
    }

    fn metadata(&self, server_metadata: OAuthAuthorizationServerMetadata) -> OAuthMetadata {
        OAuthMetadata {
            server_metadata,
            client_metadata: self.client_metadata.clone(),
        }
    }

    fn leeway(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.refresh_leeway).unwrap_or(TimeDelta::zero())
    }

    /// Sign in interactively. `input` is a handle, a DID, or an `https://`
    /// service URL (PDS or entryway).
    pub async fn sign_in<B>(&self, input: &str, browser: &B) -> Result<AuthOutcome>
    where
        B: BrowserLauncher + ?Sized,
    {
        self.sign_in_with(input, browser, &AuthFlow::new()).await
    }

    /// [`sign_in`](Self::sign_in), reporting progress through `flow`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(input = %input)))]
    pub async fn sign_in_with<B>(
        &self,
        input: &str,
        browser: &B,
        flow: &AuthFlow,
    ) -> Result<AuthOutcome>
    where
        B: BrowserLauncher + ?Sized,
    {
        let result = self.run_sign_in(input, browser, flow).await;
        if result.is_err() {
            flow.fail();
        }
        result
    }

    async fn run_sign_in<B>(&self, input: &str, browser: &B, flow: &AuthFlow) -> Result<AuthOutcome>
    where
        B: BrowserLauncher + ?Sized,
    {
        let context = self.authorize(input, flow).await?;

        flow.advance(FlowState::AwaitingUserAuthorization)?;
        let opened = with_timeout(
            self.config.authorization_timeout,
            Operation::AwaitAuthorization,
            async {
                browser
                    .open(&context.authorization_url, context.redirect_uri.scheme())
                    .await
                    .map_err(OAuthError::Browser)
            },
        )
        .await?;
        let redirect = match opened {
            BrowserOutcome::Redirect(url) => url,
            BrowserOutcome::Cancelled => {
                flow.advance(FlowState::Cancelled)?;
                #[cfg(feature = "tracing")]
                tracing::info!("sign-in cancelled by user");
                return Ok(AuthOutcome::Cancelled);
            }
        };
        if redirect.scheme() != context.redirect_uri.scheme()
            || redirect.path() != context.redirect_uri.path()
        {
            return Err(CallbackError::RedirectMismatch {
                expected: context.redirect_uri.as_str().into(),
                found: format_smolstr!("{}:{}", redirect.scheme(), redirect.path()),
            }
            .into());
        }
        let params = CallbackParams::from_redirect(&redirect).map_err(CallbackError::from)?;

        flow.advance(FlowState::ExchangingCode)?;
        let session = self.complete(context, params).await?;
        flow.advance(FlowState::Authenticated)?;
        Ok(AuthOutcome::Authenticated(session))
    }

    /// Start a sign-in whose redirect arrives out of band.
    ///
    /// Returns the URL to open. The redirect's query goes to
    /// [`callback`](Self::callback) within [`ClientConfig::pending_ttl`].
    pub async fn start_auth(&self, input: &str) -> Result<Url> {
        let context = self.authorize(input, &AuthFlow::new()).await?;
        let url = context.authorization_url.clone();
        self.pending.insert(context);
        Ok(url)
    }

    /// Finish a sign-in begun with [`start_auth`](Self::start_auth).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn callback(&self, params: CallbackParams) -> Result<OAuthSession> {
        let Some(state) = params.state.as_deref() else {
            return Err(CallbackError::MissingState.into());
        };
        let Some(context) = self.pending.take(state) else {
            return Err(CallbackError::UnknownState(state.into()).into());
        };
        self.complete(context, params).await
    }

    async fn authorize(&self, input: &str, flow: &AuthFlow) -> Result<AuthRequestContext> {
        let timeout = self.config.request_timeout;

        flow.advance(FlowState::ResolvingIdentity)?;
        let (service, identity, login_hint) = if input.starts_with("https://") {
            let url = Url::parse(input).map_err(|_| ResolverError::InvalidService(input.into()))?;
            (url, None, None)
        } else {
            let ident = AtIdentifier::new(input).map_err(IdentityError::from)?;
            let identity = with_timeout(
                timeout,
                Operation::ResolveIdentity,
                self.resolver.resolve(&ident),
            )
            .await?;
            (
                identity.pds_url.clone(),
                Some(identity),
                Some(SmolStr::new(ident.as_str())),
            )
        };

        flow.advance(FlowState::DiscoveringAuthServer)?;
        let server_metadata = with_timeout(
            timeout,
            Operation::DiscoverAuthServer,
            self.resolver.resolve_from_service(&service),
        )
        .await?;

        flow.advance(FlowState::BuildingRequest)?;
        let metadata = self.metadata(server_metadata);
        let par = with_timeout(
            timeout,
            Operation::PushAuthorizationRequest,
            request::par(self.resolver.as_ref(), login_hint, &metadata),
        )
        .await?;
        let authorization_url = request::authorization_url(&metadata, &par.request_uri)?;

        Ok(AuthRequestContext {
            state: par.state,
            pkce_verifier: par.pkce_verifier,
            code_challenge: par.code_challenge,
            dpop: par.dpop,
            server_metadata: metadata.server_metadata,
            redirect_uri: par.redirect_uri,
            expected_sub: identity.as_ref().map(|i| i.did.clone()),
            handle: identity.as_ref().and_then(|i| i.handle.clone()),
            pds_url: identity.map(|i| i.pds_url),
            request_uri: par.request_uri,
            authorization_url,
        })
    }

    async fn complete(
        &self,
        context: AuthRequestContext,
        params: CallbackParams,
    ) -> Result<OAuthSession> {
        match params.state.as_deref() {
            None => return Err(CallbackError::MissingState.into()),
            Some(state) if state != context.state => {
                return Err(CallbackError::StateMismatch.into());
            }
            Some(_) => {}
        }
        if let Some(error) = params.error {
            return Err(CallbackError::Server {
                error,
                description: params.error_description,
            }
            .into());
        }
        let issuer = &context.server_metadata.issuer;
        match &params.iss {
            Some(iss) if !issuer_equivalent(iss, issuer) => {
                return Err(CallbackError::IssuerMismatch {
                    expected: issuer.clone(),
                    found: iss.clone(),
                }
                .into());
            }
            None if context
                .server_metadata
                .authorization_response_iss_parameter_supported
                == Some(true) =>
            {
                return Err(CallbackError::MissingIssuer.into());
            }
            _ => {}
        }
        let Some(code) = params.code else {
            return Err(CallbackError::MissingCode.into());
        };

        let AuthRequestContext {
            server_metadata,
            mut dpop,
            pkce_verifier,
            expected_sub,
            handle,
            ..
        } = context;
        let metadata = self.metadata(server_metadata);
        let timeout = self.config.request_timeout;
        let tokens = with_timeout(
            timeout,
            Operation::ExchangeCode,
            request::exchange_code(
                self.resolver.as_ref(),
                &mut dpop,
                &code,
                &pkce_verifier,
                &metadata,
            ),
        )
        .await?;
        if tokens.token_type != OAuthTokenType::DPoP {
            return Err(RequestError::token_verification()
                .with_context("access token is not DPoP-bound")
                .into());
        }
        let sub = tokens
            .sub
            .as_deref()
            .and_then(|sub| Did::new(sub).ok())
            .ok_or_else(|| {
                RequestError::token_verification().with_context("token `sub` is not a DID")
            })?;
        if let Some(expected) = expected_sub {
            if expected != sub {
                return Err(OAuthError::SubjectMismatch {
                    expected,
                    found: sub,
                });
            }
        }
        let identity = with_timeout(
            timeout,
            Operation::ExchangeCode,
            self.resolver
                .verify_issuer(&metadata.server_metadata.issuer, &sub),
        )
        .await?;

        let server = metadata.server_metadata;
        let session = OAuthSession {
            sub,
            handle: handle.or(identity.handle),
            issuer: server.issuer,
            pds_url: identity.pds_url,
            token_endpoint: server.token_endpoint,
            revocation_endpoint: server.revocation_endpoint,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            scope: tokens.scope,
            expires_at: expires_at(Utc::now(), tokens.expires_in),
            dpop,
        };
        self.locks
            .with_lock(session.sub.as_str(), self.store.save(&session))
            .await?;
        #[cfg(feature = "tracing")]
        tracing::info!(sub = %session.sub, issuer = %session.issuer, "signed in");
        Ok(session)
    }

    /// Load the stored session for `sub`, refreshing it according to `policy`.
    ///
    /// Returns `None` if there is no session, or if the refresh failed in a way
    /// that ended the session (it has been deleted in that case). Concurrent
    /// calls for the same account share a single refresh.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(sub = %sub)))]
    pub async fn restore(&self, sub: &Did, policy: RefreshPolicy) -> Result<Option<OAuthSession>> {
        let Some(session) = self.store.get(sub).await? else {
            return Ok(None);
        };
        let needs_refresh = |s: &OAuthSession| match policy {
            RefreshPolicy::Never => false,
            RefreshPolicy::Always => true,
            RefreshPolicy::Auto => s.is_expired(Utc::now(), self.leeway()),
        };
        if !needs_refresh(&session) {
            return Ok(Some(session));
        }

        self.locks
            .with_lock(sub.as_str(), async {
                let Some(current) = self.store.get(sub).await? else {
                    return Ok(None);
                };
                // Someone else refreshed while we waited for the lock.
                if current.access_token != session.access_token || !needs_refresh(&current) {
                    return Ok(Some(current));
                }
                match self.refresh_locked(current).await {
                    Ok(refreshed) => Ok(Some(refreshed)),
                    Err(e) if e.is_fatal_refresh() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Restore whichever account was saved most recently.
    pub async fn last_session(&self, policy: RefreshPolicy) -> Result<Option<OAuthSession>> {
        let Some(sub) = self.store.last_did().await? else {
            return Ok(None);
        };
        self.restore(&sub, policy).await
    }

    /// Refresh the tokens for `sub` now.
    ///
    /// The DPoP key is kept. If the server rejects the grant the session is
    /// deleted before the error is returned.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(sub = %sub)))]
    pub async fn refresh(&self, sub: &Did) -> Result<OAuthSession> {
        self.locks
            .with_lock(sub.as_str(), async {
                let Some(session) = self.store.get(sub).await? else {
                    return Err(OAuthError::NoSession(sub.clone()));
                };
                self.refresh_locked(session).await
            })
            .await
    }

    async fn refresh_locked(&self, session: OAuthSession) -> Result<OAuthSession> {
        let sub = session.sub.clone();
        match self.refresh_tokens(session).await {
            Err(e) if e.is_fatal_refresh() => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%sub, error = %e, "refresh rejected, deleting session");
                self.store.delete(&sub, DeleteCause::RefreshFailed).await?;
                Err(e)
            }
            other => other,
        }
    }

    async fn refresh_tokens(&self, mut session: OAuthSession) -> Result<OAuthSession> {
        let timeout = self.config.request_timeout;
        let identity = with_timeout(
            timeout,
            Operation::Refresh,
            self.resolver.verify_issuer(&session.issuer, &session.sub),
        )
        .await?;
        let response = with_timeout(
            timeout,
            Operation::Refresh,
            request::refresh(
                self.resolver.as_ref(),
                &mut session.dpop,
                &session.token_endpoint,
                session.refresh_token.as_deref(),
                &self.client_metadata.client_id,
            ),
        )
        .await?;
        if response
            .sub
            .as_deref()
            .is_some_and(|sub| sub != session.sub.as_str())
        {
            return Err(RequestError::token_verification()
                .with_context("refreshed token is for another account")
                .into());
        }
        session.update_with_tokens(response, Utc::now());
        session.pds_url = identity.pds_url;
        if identity.handle.is_some() {
            session.handle = identity.handle;
        }
        self.store.save(&session).await?;
        #[cfg(feature = "tracing")]
        tracing::debug!(sub = %session.sub, expires_at = ?session.expires_at, "session refreshed");
        Ok(session)
    }

    /// Sign `sub` out.
    ///
    /// Revocation at the server is best effort. The local session is deleted
    /// whatever happens on the network.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(sub = %sub)))]
    pub async fn revoke(&self, sub: &Did) -> Result<()> {
        self.locks
            .with_lock(sub.as_str(), async {
                let session = match self.store.get(sub).await {
                    Ok(session) => session,
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %_e, "unreadable session record, deleting it");
                        None
                    }
                };
                if let Some(mut session) = session {
                    self.revoke_remote(&mut session).await;
                }
                self.store.delete(sub, DeleteCause::Revoked).await?;
                Ok(())
            })
            .await
    }

    async fn revoke_remote(&self, session: &mut OAuthSession) {
        let Some(endpoint) = session.revocation_endpoint.clone() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("no revocation endpoint, skipping");
            return;
        };
        let token = session
            .refresh_token
            .clone()
            .unwrap_or_else(|| session.access_token.clone());
        let result = with_timeout(
            self.config.request_timeout,
            Operation::Revoke,
            request::revoke(
                self.resolver.as_ref(),
                &mut session.dpop,
                &endpoint,
                &token,
                &self.client_metadata.client_id,
            ),
        )
        .await;
        if let Err(_e) = result {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "token revocation failed, deleting local session anyway");
        }
    }

    /// Send a request to the account's PDS with its DPoP-bound access token.
    ///
    /// Refreshes first if needed. A new resource-server nonce is saved with
    /// the session.
    pub async fn send_authorized(
        &self,
        sub: &Did,
        mut request: Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>> {
        let Some(mut session) = self.restore(sub, RefreshPolicy::Auto).await? else {
            return Err(OAuthError::NoSession(sub.clone()));
        };
        let authorization = HeaderValue::from_str(&session.authorization_header())
            .map_err(|e| RequestError::from(DpopError::from(e)))?;
        request.headers_mut().insert(AUTHORIZATION, authorization);
        let known_nonce = session.dpop.host_nonce.clone();
        let response = self
            .resolver
            .as_ref()
            .dpop_call(&mut session.dpop)
            .send(request)
            .await
            .map_err(RequestError::from)?;

        if session.dpop.host_nonce != known_nonce {
            self.locks
                .with_lock(sub.as_str(), async {
                    if let Some(mut current) = self.store.get(sub).await? {
                        if current.dpop.dpop_key == session.dpop.dpop_key {
                            current.dpop.host_nonce = session.dpop.host_nonce.clone();
                            self.store.save(&current).await?;
                        }
                    }
                    Ok::<_, OAuthError>(())
                })
                .await?;
        }
        Ok(response)
    }
}
