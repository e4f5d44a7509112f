//! Authorization flow state machine.
//!
//! ```text
//! Idle -> ResolvingIdentity -> DiscoveringAuthServer -> BuildingRequest
//!      -> AwaitingUserAuthorization -> ExchangingCode -> Authenticated
//! ```
//!
//! Any non-terminal state may move to `Failed`. `Cancelled` is only reachable
//! while waiting on the user, since that is the only step the user can abandon.

use std::fmt;

use tokio::sync::watch;

use crate::error::OAuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
    Idle,
    ResolvingIdentity,
    DiscoveringAuthServer,
    BuildingRequest,
    AwaitingUserAuthorization,
    ExchangingCode,
    Authenticated,
    Failed,
    Cancelled,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingIdentity => "resolving_identity",
            Self::DiscoveringAuthServer => "discovering_auth_server",
            Self::BuildingRequest => "building_request",
            Self::AwaitingUserAuthorization => "awaiting_user_authorization",
            Self::ExchangingCode => "exchanging_code",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: FlowState) -> bool {
        use FlowState::*;
        match (*self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, ResolvingIdentity)
            | (ResolvingIdentity, DiscoveringAuthServer)
            | (DiscoveringAuthServer, BuildingRequest)
            | (BuildingRequest, AwaitingUserAuthorization)
            | (AwaitingUserAuthorization, ExchangingCode)
            | (AwaitingUserAuthorization, Cancelled)
            | (ExchangingCode, Authenticated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable progress of one sign-in.
///
/// UIs can [`subscribe`](AuthFlow::subscribe) to render progress; the session
/// manager drives the transitions.
#[derive(Debug)]
pub struct AuthFlow {
    state: watch::Sender<FlowState>,
}

impl Default for AuthFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthFlow {
    pub fn new() -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self { state }
    }

    pub fn state(&self) -> FlowState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&self, next: FlowState) -> Result<(), OAuthError> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(OAuthError::InvalidTransition { from, to: next });
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(%from, to = %next, "auth flow transition");
        self.state.send_replace(next);
        Ok(())
    }

    /// Mark the flow failed unless it already finished.
    pub(crate) fn fail(&self) {
        if !self.state().is_terminal() {
            #[cfg(feature = "tracing")]
            tracing::debug!(from = %self.state(), "auth flow failed");
            self.state.send_replace(FlowState::Failed);
        }
    }
}
