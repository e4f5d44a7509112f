use bobbin::cli::{Args, Command, PromptBrowser, describe_identity, describe_session};
use bobbin::common::{AtIdentifier, FileStore};
use bobbin::identity::BobbinResolver;
use bobbin::identity::resolver::IdentityResolver;
use bobbin::oauth::resolver::OAuthResolver;
use bobbin::oauth::{AuthOutcome, ClientConfig, RefreshPolicy, SessionManager};
use chrono::Utc;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    let client = args.client_metadata();

    // Commands that never touch the session store
    match &args.command {
        Command::ClientMetadata => {
            let metadata = client.client_metadata()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&metadata).into_diagnostic()?
            );
            return Ok(());
        }
        Command::Resolve { identifier } => {
            let resolver = BobbinResolver::default();
            let ident = AtIdentifier::new(identifier)?;
            let identity = resolver.resolve(&ident).await?;
            println!("{}", describe_identity(&identity));
            let metadata = resolver.resolve_from_service(&identity.pds_url).await?;
            println!("  issuer: {}", metadata.issuer);
            return Ok(());
        }
        _ => {}
    }

    let store = FileStore::new(&args.store)?;
    tracing::debug!(path = %args.store.display(), "opened session store");
    let manager = SessionManager::new(
        BobbinResolver::default(),
        store,
        client,
        ClientConfig::default(),
    )?;

    match args.command {
        Command::Login { identifier } => {
            match manager.sign_in(&identifier, &PromptBrowser::stdio()).await? {
                AuthOutcome::Authenticated(session) => {
                    println!("signed in as {}", describe_session(&session, Utc::now()));
                }
                AuthOutcome::Cancelled => println!("sign-in cancelled"),
            }
        }
        Command::Restore { did, refresh } => {
            let policy = RefreshPolicy::from(refresh);
            let session = match did {
                Some(did) => manager.restore(&did, policy).await?,
                None => manager.last_session(policy).await?,
            };
            match session {
                Some(session) => println!("{}", describe_session(&session, Utc::now())),
                None => println!("no stored session"),
            }
        }
        Command::Refresh { did } => {
            let session = manager.refresh(&did).await?;
            println!("refreshed {}", describe_session(&session, Utc::now()));
        }
        Command::Logout { did } => {
            manager.revoke(&did).await?;
            println!("signed out {did}");
        }
        Command::ClientMetadata | Command::Resolve { .. } => {}
    }
    Ok(())
}
