use async_trait::async_trait;
use url::Url;

use crate::error::BoxError;

/// How the user left the authorization page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserOutcome {
    /// The authorization server redirected to the callback URL
    Redirect(Url),
    /// The user closed the browser
    Cancelled,
}

/// Opens the authorization URL and waits for the redirect back to the app.
///
/// Platform integrations (system browser, in-app auth session, a loopback
/// listener) implement this; the session manager only needs the outcome.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self, url: &Url, callback_scheme: &str) -> Result<BrowserOutcome, BoxError>;
}
