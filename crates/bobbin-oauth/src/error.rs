use bobbin_common::session::SessionStoreError;
use bobbin_common::types::Did;
use bobbin_identity::resolver::IdentityError;
use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::{atproto, flow::FlowState, request::RequestError, resolver::ResolverError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Problems with the redirect that should complete an authorization.
#[derive(Debug, Error, Diagnostic)]
pub enum CallbackError {
    #[error("missing `state` parameter")]
    #[diagnostic(code(bobbin_oauth::callback::missing_state))]
    MissingState,
    #[error("unknown or expired authorization state: {0}")]
    #[diagnostic(
        code(bobbin_oauth::callback::unknown_state),
        help("the authorization took too long or was already completed; start a new sign-in")
    )]
    UnknownState(SmolStr),
    #[error("`state` does not match the pending authorization")]
    #[diagnostic(
        code(bobbin_oauth::callback::state_mismatch),
        help("possible cross-site request forgery; the redirect was discarded")
    )]
    StateMismatch,
    #[error("missing `code` parameter")]
    #[diagnostic(code(bobbin_oauth::callback::missing_code))]
    MissingCode,
    #[error("missing `iss` parameter")]
    #[diagnostic(code(bobbin_oauth::callback::missing_issuer))]
    MissingIssuer,
    #[error("issuer mismatch: expected {expected}, got {found}")]
    #[diagnostic(code(bobbin_oauth::callback::issuer_mismatch))]
    IssuerMismatch { expected: SmolStr, found: SmolStr },
    #[error("authorization server returned {error}{}", .description.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    #[diagnostic(code(bobbin_oauth::callback::server))]
    Server {
        error: SmolStr,
        description: Option<SmolStr>,
    },
    #[error("redirected to {found}, expected {expected}")]
    #[diagnostic(
        code(bobbin_oauth::callback::redirect_mismatch),
        help("the browser must hand back the registered redirect URI")
    )]
    RedirectMismatch { expected: SmolStr, found: SmolStr },
    #[error("malformed redirect: {0}")]
    #[diagnostic(code(bobbin_oauth::callback::malformed))]
    Malformed(#[from] serde_html_form::de::Error),
}

/// Network step that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ResolveIdentity,
    DiscoverAuthServer,
    PushAuthorizationRequest,
    AwaitAuthorization,
    ExchangeCode,
    Refresh,
    Revoke,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveIdentity => "identity resolution",
            Self::DiscoverAuthServer => "authorization server discovery",
            Self::PushAuthorizationRequest => "pushed authorization request",
            Self::AwaitAuthorization => "user authorization",
            Self::ExchangeCode => "code exchange",
            Self::Refresh => "token refresh",
            Self::Revoke => "token revocation",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the session manager can fail with.
#[derive(Debug, Error, Diagnostic)]
pub enum OAuthError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    ClientMetadata(#[from] atproto::Error),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] SessionStoreError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Callback(#[from] CallbackError),
    #[error("{0} timed out")]
    #[diagnostic(code(bobbin_oauth::timeout))]
    Timeout(Operation),
    #[error("token subject {found} is not the requested account {expected}")]
    #[diagnostic(code(bobbin_oauth::subject_mismatch))]
    SubjectMismatch { expected: Did, found: Did },
    #[error("no stored session for {0}")]
    #[diagnostic(code(bobbin_oauth::no_session))]
    NoSession(Did),
    #[error("invalid flow transition from {from} to {to}")]
    #[diagnostic(code(bobbin_oauth::invalid_transition))]
    InvalidTransition { from: FlowState, to: FlowState },
    #[error("browser error: {0}")]
    #[diagnostic(code(bobbin_oauth::browser))]
    Browser(#[source] BoxError),
}

impl From<IdentityError> for OAuthError {
    fn from(e: IdentityError) -> Self {
        Self::Resolver(e.into())
    }
}

impl OAuthError {
    /// True if repeating the same call later may succeed.
    ///
    /// Only identity resolution and discovery qualify. Anything after the
    /// authorization code has been handed out is not retried, since a used
    /// code cannot be exchanged twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(op) => matches!(
                op,
                Operation::ResolveIdentity | Operation::DiscoverAuthServer
            ),
            Self::Resolver(e) => e.is_transient(),
            _ => false,
        }
    }

    /// True if a refresh failure means the session can never be refreshed again.
    pub fn is_fatal_refresh(&self) -> bool {
        match self {
            Self::Request(e) => e.is_invalid_grant(),
            Self::Resolver(ResolverError::IssuerMismatch { .. }) => true,
            _ => false,
        }
    }
}

pub type Result<T> = core::result::Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn retryable_only_before_code_exchange() {
        assert!(OAuthError::Timeout(Operation::ResolveIdentity).is_retryable());
        assert!(OAuthError::Timeout(Operation::DiscoverAuthServer).is_retryable());
        assert!(!OAuthError::Timeout(Operation::ExchangeCode).is_retryable());
        assert!(!OAuthError::Callback(CallbackError::StateMismatch).is_retryable());
        assert!(
            OAuthError::Resolver(ResolverError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
                .is_retryable()
        );
        assert!(
            !OAuthError::Resolver(ResolverError::HttpStatus(StatusCode::NOT_FOUND)).is_retryable()
        );
    }

    #[test]
    fn invalid_grant_is_fatal() {
        let body = serde_json::json!({ "error": "invalid_grant" });
        let err = OAuthError::from(RequestError::http_status_with_body(
            StatusCode::BAD_REQUEST,
            body,
        ));
        assert!(err.is_fatal_refresh());
        let other = OAuthError::from(RequestError::http_status(StatusCode::BAD_GATEWAY));
        assert!(!other.is_fatal_refresh());
        assert!(OAuthError::from(RequestError::no_refresh_token()).is_fatal_refresh());
    }

    #[test]
    fn server_error_message() {
        let err = CallbackError::Server {
            error: "access_denied".into(),
            description: Some("User denied".into()),
        };
        assert_eq!(
            err.to_string(),
            "authorization server returned access_denied: User denied"
        );
    }
}
