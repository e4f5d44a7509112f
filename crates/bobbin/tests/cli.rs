use std::io::Cursor;

use bobbin::cli::{Args, Command, PromptBrowser, RefreshArg, describe_identity};
use bobbin::common::{Did, DidDocument, Handle};
use bobbin::identity::resolver::{IdentityWarning, ResolvedIdentity};
use bobbin::oauth::{BrowserLauncher, BrowserOutcome, RefreshPolicy};
use clap::Parser;
use serde_json::json;
use url::Url;

const ALICE_DID: &str = "did:plc:z72i7hdynmk6r22z27h6abc2";

#[test]
fn defaults_produce_valid_client_metadata() {
    let args = Args::try_parse_from(["bobbin", "client-metadata"]).unwrap();
    assert_eq!(args.command, Command::ClientMetadata);

    let metadata = args.client_metadata().client_metadata().unwrap();
    assert_eq!(metadata.application_type, "native");
    assert_eq!(metadata.token_endpoint_auth_method, "none");
    assert!(metadata.dpop_bound_access_tokens);
    assert_eq!(
        metadata.redirect_uris[0].as_str(),
        "com.example.bobbin:/callback"
    );
}

#[test]
fn custom_client_options() {
    let args = Args::try_parse_from([
        "bobbin",
        "--client-id",
        "https://app.example.org/oauth/client.json",
        "--redirect-uri",
        "org.example.app:/oauth",
        "--client-name",
        "Example",
        "--store",
        "/tmp/elsewhere.json",
        "login",
        "alice.example.com",
    ])
    .unwrap();
    assert_eq!(
        args.command,
        Command::Login {
            identifier: "alice.example.com".into()
        }
    );
    let client = args.client_metadata();
    assert_eq!(client.client_name.as_deref(), Some("Example"));
    assert_eq!(
        client.client_id.as_str(),
        "https://app.example.org/oauth/client.json"
    );
    assert_eq!(args.store.to_str(), Some("/tmp/elsewhere.json"));
}

#[test]
fn restore_takes_optional_did_and_policy() {
    let args = Args::try_parse_from(["bobbin", "restore"]).unwrap();
    assert_eq!(
        args.command,
        Command::Restore {
            did: None,
            refresh: RefreshArg::Auto
        }
    );

    let args =
        Args::try_parse_from(["bobbin", "restore", ALICE_DID, "--refresh", "never"]).unwrap();
    let Command::Restore { did, refresh } = args.command else {
        panic!("expected restore");
    };
    assert_eq!(did.unwrap().as_str(), ALICE_DID);
    assert_eq!(RefreshPolicy::from(refresh), RefreshPolicy::Never);
}

#[test]
fn account_commands_reject_invalid_dids() {
    assert!(Args::try_parse_from(["bobbin", "logout", "alice.example.com"]).is_err());
    assert!(Args::try_parse_from(["bobbin", "refresh", "did:plc:"]).is_err());
    assert!(Args::try_parse_from(["bobbin", "refresh", ALICE_DID]).is_ok());
}

#[tokio::test]
async fn prompt_browser_reads_redirect() {
    let browser = PromptBrowser::new(
        Cursor::new(b"com.example.bobbin:/callback?code=abc&state=xyz\n".to_vec()),
        Vec::new(),
    );
    let url = Url::parse("https://auth.example.com/oauth/authorize?request_uri=urn:x").unwrap();
    let outcome = browser.open(&url, "com.example.bobbin").await.unwrap();
    let BrowserOutcome::Redirect(redirect) = outcome else {
        panic!("expected a redirect");
    };
    assert_eq!(redirect.query(), Some("code=abc&state=xyz"));

    let (_, output) = browser.into_inner();
    let printed = String::from_utf8(output).unwrap();
    assert!(printed.contains(url.as_str()));
}

#[tokio::test]
async fn empty_line_cancels() {
    let browser = PromptBrowser::new(Cursor::new(b"\n".to_vec()), Vec::new());
    let url = Url::parse("https://auth.example.com/oauth/authorize").unwrap();
    assert_eq!(
        browser.open(&url, "com.example.bobbin").await.unwrap(),
        BrowserOutcome::Cancelled
    );

    let closed = PromptBrowser::new(Cursor::new(Vec::new()), Vec::new());
    assert_eq!(
        closed.open(&url, "com.example.bobbin").await.unwrap(),
        BrowserOutcome::Cancelled
    );
}

#[tokio::test]
async fn garbage_input_is_an_error() {
    let browser = PromptBrowser::new(Cursor::new(b"not a url\n".to_vec()), Vec::new());
    let url = Url::parse("https://auth.example.com/oauth/authorize").unwrap();
    assert!(browser.open(&url, "com.example.bobbin").await.is_err());
}

#[test]
fn identity_summary_marks_unverified_handle() {
    let did_document: DidDocument = serde_json::from_value(json!({
        "id": ALICE_DID,
        "service": [{
            "id": "#atproto_pds",
            "type": "AtprotoPersonalDataServer",
            "serviceEndpoint": "https://pds.example.com"
        }]
    }))
    .unwrap();
    let identity = ResolvedIdentity {
        did: Did::new(ALICE_DID).unwrap(),
        did_document,
        pds_url: Url::parse("https://pds.example.com").unwrap(),
        handle: None,
        warnings: vec![IdentityWarning::HandleAliasMismatch {
            expected: Handle::new("mallory.example.com").unwrap(),
        }],
    };
    let summary = describe_identity(&identity);
    assert!(summary.starts_with(ALICE_DID));
    assert!(summary.contains("handle: handle.invalid"));
    assert!(summary.contains("mallory.example.com"));
}
