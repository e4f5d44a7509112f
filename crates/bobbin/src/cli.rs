use std::io::{BufRead, BufReader, Stderr, Stdin, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bobbin_common::types::Did;
use bobbin_identity::resolver::{IdentityWarning, ResolvedIdentity};
use bobbin_oauth::{
    AtprotoClientMetadata, BrowserLauncher, BrowserOutcome, OAuthSession, RefreshPolicy,
    error::BoxError,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "bobbin - AT Protocol OAuth client")]
pub struct Args {
    /// Path to the session store file (will be created if missing)
    #[arg(long, default_value = "/tmp/bobbin-sessions.json")]
    pub store: PathBuf,

    /// URL the client metadata document is published at
    #[arg(long, default_value = "https://bobbin.example.com/client-metadata.json")]
    pub client_id: Url,

    /// Redirect URI, as listed in the client metadata
    #[arg(long, default_value = "com.example.bobbin:/callback")]
    pub redirect_uri: Url,

    /// Requested scope
    #[arg(long, default_value = "atproto transition:generic")]
    pub scope: String,

    /// Human-readable client name
    #[arg(long)]
    pub client_name: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Sign in with a handle, DID, or PDS URL
    Login { identifier: String },
    /// Load a stored session, refreshing it if needed
    Restore {
        /// Account to restore; defaults to the last one signed in
        did: Option<Did>,
        #[arg(long, value_enum, default_value_t = RefreshArg::Auto)]
        refresh: RefreshArg,
    },
    /// Refresh the tokens of a stored session
    Refresh { did: Did },
    /// Revoke and forget a stored session
    Logout { did: Did },
    /// Resolve a handle or DID without signing in
    Resolve { identifier: String },
    /// Print the client metadata document to publish at the client id
    ClientMetadata,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshArg {
    Auto,
    Always,
    Never,
}

impl From<RefreshArg> for RefreshPolicy {
    fn from(arg: RefreshArg) -> Self {
        match arg {
            RefreshArg::Auto => RefreshPolicy::Auto,
            RefreshArg::Always => RefreshPolicy::Always,
            RefreshArg::Never => RefreshPolicy::Never,
        }
    }
}

impl Args {
    pub fn client_metadata(&self) -> AtprotoClientMetadata {
        AtprotoClientMetadata::new()
            .client_id(self.client_id.clone())
            .redirect_uris(vec![self.redirect_uri.clone()])
            .scope(self.scope.as_str())
            .maybe_client_name(self.client_name.as_deref())
            .build()
    }
}

/// "Browser" for terminals: prints the authorization URL and reads the
/// redirect URL back from the user.
///
/// An empty line counts as closing the browser.
pub struct PromptBrowser<R, W> {
    io: Mutex<(R, W)>,
}

impl PromptBrowser<BufReader<Stdin>, Stderr> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<R, W> PromptBrowser<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        match self.io.into_inner() {
            Ok(io) => io,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl<R, W> BrowserLauncher for PromptBrowser<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    async fn open(&self, url: &Url, callback_scheme: &str) -> Result<BrowserOutcome, BoxError> {
        let mut io = self.io.lock().map_err(|_| "prompt poisoned")?;
        let (input, output) = &mut *io;
        writeln!(output, "To authenticate with your PDS, visit:\n{url}\n")?;
        write!(
            output,
            "Paste the {callback_scheme} redirect URL here (empty to cancel): "
        )?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        let line = line.trim();
        if line.is_empty() {
            return Ok(BrowserOutcome::Cancelled);
        }
        Ok(BrowserOutcome::Redirect(Url::parse(line)?))
    }
}

pub fn describe_session(session: &OAuthSession, now: DateTime<Utc>) -> String {
    let who = match &session.handle {
        Some(handle) => format!("{handle} ({})", session.sub),
        None => session.sub.to_string(),
    };
    let expiry = match session.expires_at {
        Some(at) if at <= now => "expired".to_string(),
        Some(at) => format!("expires in {}s", (at - now).num_seconds()),
        None => "no expiry".to_string(),
    };
    format!(
        "{who}\n  pds: {}\n  issuer: {}\n  token: {expiry}",
        session.pds_url, session.issuer
    )
}

pub fn describe_identity(identity: &ResolvedIdentity) -> String {
    let mut out = format!(
        "{}\n  handle: {}\n  pds: {}",
        identity.did,
        identity
            .handle
            .as_ref()
            .map(|h| h.as_str())
            .unwrap_or("handle.invalid"),
        identity.pds_url
    );
    for warning in &identity.warnings {
        match warning {
            IdentityWarning::HandleAliasMismatch { expected } => {
                out.push_str(&format!(
                    "\n  warning: document does not claim handle {expected}"
                ));
            }
        }
    }
    out
}
