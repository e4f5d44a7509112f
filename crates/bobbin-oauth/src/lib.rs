//! AT Protocol OAuth client core for bobbin.
//!
//! Discovery of an account's authorization server, PAR + PKCE + DPoP
//! authorization, and DPoP-bound sessions that refresh themselves. The
//! [`SessionManager`](client::SessionManager) ties it together; the other
//! modules are usable on their own.

pub mod atproto;
pub mod authstore;
pub mod browser;
pub mod client;
pub mod dpop;
pub mod error;
pub mod flow;
pub mod jose;
pub mod lock;
pub mod request;
pub mod resolver;
pub mod session;
pub mod types;
pub mod utils;

pub const FALLBACK_ALG: &str = "ES256";

pub use atproto::AtprotoClientMetadata;
pub use authstore::{DeleteCause, SessionEvent, SessionEvents};
pub use browser::{BrowserLauncher, BrowserOutcome};
pub use client::{AuthOutcome, ClientConfig, RefreshPolicy, SessionManager};
pub use error::{CallbackError, OAuthError, Operation};
pub use flow::{AuthFlow, FlowState};
pub use session::OAuthSession;
pub use types::CallbackParams;
