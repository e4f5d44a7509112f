//! # Common types for the bobbin AT Protocol OAuth client
//!
//! This crate holds the pieces every other bobbin crate leans on:
//!
//! - [`types`]: validated DIDs, handles, and DID documents
//! - [`http_client`]: the [`HttpClient`] trait used for every network call
//! - [`session`]: the [`SecureStore`] trait for persisting secrets, with an
//!   in-memory and a file-backed implementation
//! - [`error`]: transport-level errors
//!
//! Validation is pure and synchronous. Nothing in here touches the network on
//! its own; higher layers plug an [`HttpClient`] in.

#![warn(missing_docs)]

pub use smol_str;
pub use url;

/// Transport errors.
pub mod error;
/// Minimal HTTP client abstraction.
pub mod http_client;
/// Secure key-value persistence for sessions.
pub mod session;
/// DID, handle, and DID document types.
pub mod types;

pub use error::TransportError;
pub use http_client::HttpClient;
pub use session::{FileStore, MemoryStore, SecureStore, SessionStoreError};
pub use types::{AtIdentifier, Did, DidDocument, DidMethod, Handle, IdentifierError};
