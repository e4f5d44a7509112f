//! # bobbin
//!
//! A decentralized OAuth client for the AT Protocol.
//!
//! Sign-in starts from a handle, a DID, or a PDS URL. bobbin finds the
//! account's authorization server, runs a pushed authorization request with
//! PKCE and DPoP, and keeps the resulting DPoP-bound session fresh.
//!
//! The pieces live in their own crates and are re-exported here:
//!
//! - [`common`]: validated identifiers, the HTTP client and secure store traits
//! - [`identity`]: handle and DID resolution with caching
//! - [`oauth`]: discovery, the authorization flow, and the session manager
//!
//! ## Example
//!
//! ```no_run
//! use bobbin::identity::BobbinResolver;
//! use bobbin::oauth::{AtprotoClientMetadata, AuthOutcome, ClientConfig, SessionManager};
//! use bobbin::common::MemoryStore;
//! use bobbin::cli::PromptBrowser;
//! # use miette::IntoDiagnostic;
//!
//! # async fn example() -> miette::Result<()> {
//! let client = AtprotoClientMetadata::new()
//!     .client_id(url::Url::parse("https://app.example.com/client-metadata.json").into_diagnostic()?)
//!     .redirect_uris(vec![url::Url::parse("com.example.app:/callback").into_diagnostic()?])
//!     .build();
//! let manager = SessionManager::new(
//!     BobbinResolver::default(),
//!     MemoryStore::new(),
//!     client,
//!     ClientConfig::default(),
//! )?;
//!
//! match manager.sign_in("alice.bsky.social", &PromptBrowser::stdio()).await? {
//!     AuthOutcome::Authenticated(session) => println!("signed in as {}", session.sub),
//!     AuthOutcome::Cancelled => println!("cancelled"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;

pub use bobbin_common as common;
pub use bobbin_identity as identity;
pub use bobbin_oauth as oauth;

pub use bobbin_common::types::{AtIdentifier, Did, Handle};
pub use bobbin_oauth::{AuthOutcome, OAuthError, OAuthSession, SessionManager};
