mod support;

use std::time::Duration;

use bobbin_oauth::resolver::issuer_equivalent;
use bobbin_oauth::types::CallbackParams;
use bobbin_oauth::utils::pkce_challenge;
use bobbin_oauth::{
    AuthFlow, AuthOutcome, CallbackError, ClientConfig, FlowState, OAuthError, Operation,
    SessionEvent,
};
use serde_json::json;
use support::*;

#[tokio::test]
async fn signs_in_through_the_pds_authorization_server() {
    let net = alice_network();
    let manager = manager(&net);
    let mut events = manager.subscribe();
    let browser = ScriptedBrowser::new(&net, Script::Approve);
    let flow = AuthFlow::new();

    let outcome = manager
        .sign_in_with("alice.example.com", &browser, &flow)
        .await
        .unwrap();
    let AuthOutcome::Authenticated(session) = outcome else {
        panic!("expected a session, got {outcome:?}");
    };
    assert_eq!(flow.state(), FlowState::Authenticated);
    assert_eq!(session.sub.as_str(), ALICE_DID);
    assert_eq!(
        session.handle.as_ref().map(|h| h.as_str()),
        Some("alice.example.com")
    );
    assert_eq!(session.pds_url.as_str(), "https://pds.example.com/");
    assert!(issuer_equivalent(&session.issuer, "https://auth.example.com"));
    assert_eq!(session.access_token, "at-1");
    assert_eq!(session.refresh_token.as_deref(), Some("rt-1"));
    assert!(session.expires_at.is_some());

    // The user is sent to the PDS's authorization server, not the handle resolver.
    let opened = browser.opened();
    assert_eq!(opened.len(), 1);
    let (url, scheme) = &opened[0];
    assert_eq!(url.host_str(), Some("auth.example.com"));
    assert_eq!(url.path(), "/oauth/authorize");
    let query: Vec<(String, String)> = serde_html_form::from_str(url.query().unwrap()).unwrap();
    assert!(query.contains(&("request_uri".into(), REQUEST_URI.into())));
    assert!(query.contains(&(
        "client_id".into(),
        "https://app.example.com/oauth/client-metadata.json".into()
    )));
    assert_eq!(scheme, "com.example.app");
    assert!(
        net.log()
            .iter()
            .all(|r| !r.url.contains("resolver.example.net"))
    );

    let par = net.requests_to(PAR_URL);
    assert_eq!(par.len(), 1);
    let par_form = par[0].form();
    assert_eq!(par_form["login_hint"], "alice.example.com");
    assert_eq!(par_form["code_challenge_method"], "S256");
    assert_eq!(par[0].proof_claims()["htm"], "POST");
    assert_eq!(par[0].proof_claims()["htu"], PAR_URL);

    let token = net.requests_to(TOKEN_URL);
    assert_eq!(token.len(), 1);
    let token_form = token[0].form();
    assert_eq!(token_form["grant_type"], "authorization_code");
    assert_eq!(token_form["code"], "auth-code");
    assert_eq!(token_form["redirect_uri"], "com.example.app:/callback");
    assert_eq!(
        pkce_challenge(&token_form["code_verifier"]),
        par_form["code_challenge"]
    );
    // Same DPoP key from PAR onwards.
    assert_eq!(
        par[0].proof_header()["jwk"],
        token[0].proof_header()["jwk"]
    );
    assert_eq!(token[0].proof_header()["typ"], "dpop+jwt");

    assert_eq!(
        manager.store().get(&session.sub).await.unwrap(),
        Some(session.clone())
    );
    assert_eq!(
        manager.store().last_did().await.unwrap(),
        Some(session.sub.clone())
    );
    assert_eq!(events.try_recv(), Some(SessionEvent::Updated(session)));
}

#[tokio::test]
async fn nonce_challenge_on_token_exchange_is_retried_once() {
    let net = alice_network();
    net.script(
        TOKEN_URL,
        vec![
            Reply::json(
                400,
                json!({ "error": "use_dpop_nonce", "error_description": "Authorization server requires nonce in DPoP proof" }),
            )
            .with_header("DPoP-Nonce", "n1"),
            Reply::json(200, token_response("at-1", "rt-1")),
        ],
    );
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Approve);

    let outcome = manager.sign_in("alice.example.com", &browser).await.unwrap();
    let AuthOutcome::Authenticated(session) = outcome else {
        panic!("expected a session");
    };

    let token = net.requests_to(TOKEN_URL);
    assert_eq!(token.len(), 2);
    assert!(token[0].proof_claims().get("nonce").is_none());
    assert_eq!(token[1].proof_claims()["nonce"], "n1");
    assert_ne!(token[0].proof_claims()["jti"], token[1].proof_claims()["jti"]);
    assert_eq!(session.dpop.authserver_nonce.as_deref(), Some("n1"));
}

#[tokio::test]
async fn repeated_nonce_challenge_is_surfaced() {
    let net = alice_network();
    net.script(
        TOKEN_URL,
        vec![
            Reply::json(400, json!({ "error": "use_dpop_nonce" })).with_header("DPoP-Nonce", "n1"),
            Reply::json(400, json!({ "error": "use_dpop_nonce" })).with_header("DPoP-Nonce", "n2"),
        ],
    );
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Approve);

    let err = manager
        .sign_in("alice.example.com", &browser)
        .await
        .unwrap_err();
    let OAuthError::Request(request) = &err else {
        panic!("expected a request error, got {err:?}");
    };
    assert_eq!(request.oauth_error(), Some("use_dpop_nonce"));
    assert!(!err.is_retryable());
    assert_eq!(net.requests_to(TOKEN_URL).len(), 2);
}

#[tokio::test]
async fn closing_the_browser_is_a_cancellation() {
    let net = alice_network();
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Cancel);
    let flow = AuthFlow::new();

    let outcome = manager
        .sign_in_with("alice.example.com", &browser, &flow)
        .await
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Cancelled);
    assert_eq!(flow.state(), FlowState::Cancelled);
    assert!(net.requests_to(TOKEN_URL).is_empty());
    assert_eq!(manager.store().last_did().await.unwrap(), None);
}

#[tokio::test]
async fn state_mismatch_is_rejected_without_exchange() {
    let net = alice_network();
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::ForgeState);
    let flow = AuthFlow::new();

    let err = manager
        .sign_in_with("alice.example.com", &browser, &flow)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OAuthError::Callback(CallbackError::StateMismatch)
    ));
    assert!(!err.is_retryable());
    assert_eq!(flow.state(), FlowState::Failed);
    assert!(net.requests_to(TOKEN_URL).is_empty());
}

#[tokio::test]
async fn redirect_to_another_uri_is_rejected_without_exchange() {
    let net = alice_network();
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::ForeignRedirect);
    let flow = AuthFlow::new();

    let err = manager
        .sign_in_with("alice.example.com", &browser, &flow)
        .await
        .unwrap_err();
    let OAuthError::Callback(CallbackError::RedirectMismatch { expected, found }) = err else {
        panic!("expected a redirect mismatch, got {err:?}");
    };
    assert_eq!(expected, "com.example.app:/callback");
    assert_eq!(found, "com.example.other:/callback");
    assert_eq!(flow.state(), FlowState::Failed);
    assert!(net.requests_to(TOKEN_URL).is_empty());
}

#[tokio::test]
async fn denied_authorization_reports_server_error() {
    let net = alice_network();
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Deny);

    let err = manager
        .sign_in("alice.example.com", &browser)
        .await
        .unwrap_err();
    let OAuthError::Callback(CallbackError::Server { error, description }) = err else {
        panic!("expected a server error");
    };
    assert_eq!(error, "access_denied");
    assert_eq!(description.as_deref(), Some("User denied the request"));
}

#[tokio::test]
async fn missing_issuer_is_rejected_when_advertised() {
    let net = alice_network();
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::ApproveWithoutIssuer);

    let err = manager
        .sign_in("alice.example.com", &browser)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OAuthError::Callback(CallbackError::MissingIssuer)
    ));
}

#[tokio::test]
async fn token_for_another_account_is_rejected() {
    let net = alice_network();
    let mut tokens = token_response("at-1", "rt-1");
    tokens["sub"] = json!("did:plc:bbbbbbbbbbbbbbbbbbbbbbbb");
    net.json(TOKEN_URL, tokens);
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Approve);

    let err = manager
        .sign_in("alice.example.com", &browser)
        .await
        .unwrap_err();
    assert!(matches!(err, OAuthError::SubjectMismatch { .. }));
    assert_eq!(manager.store().last_did().await.unwrap(), None);
}

#[tokio::test]
async fn unreachable_pds_is_a_retryable_discovery_failure() {
    let net = alice_network();
    net.go_offline(PROTECTED_RESOURCE_URL);
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Approve);
    let flow = AuthFlow::new();

    let err = manager
        .sign_in_with("alice.example.com", &browser, &flow)
        .await
        .unwrap_err();
    assert!(matches!(err, OAuthError::Resolver(_)));
    assert!(err.is_retryable());
    assert_eq!(flow.state(), FlowState::Failed);
    assert!(browser.opened().is_empty());
    assert!(net.requests_to(PAR_URL).is_empty());
}

#[tokio::test]
async fn invalid_identifier_fails_before_any_request() {
    let net = alice_network();
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Approve);

    let err = manager
        .sign_in("not a handle", &browser)
        .await
        .unwrap_err();
    assert!(matches!(err, OAuthError::Resolver(_)));
    assert!(!err.is_retryable());
    assert!(net.log().is_empty());
}

#[tokio::test]
async fn service_url_sign_in_learns_account_from_token() {
    let net = alice_network();
    let manager = manager(&net);
    let browser = ScriptedBrowser::new(&net, Script::Approve);

    let outcome = manager
        .sign_in("https://auth.example.com", &browser)
        .await
        .unwrap();
    let AuthOutcome::Authenticated(session) = outcome else {
        panic!("expected a session");
    };
    assert_eq!(session.sub.as_str(), ALICE_DID);
    assert_eq!(
        session.handle.as_ref().map(|h| h.as_str()),
        Some("alice.example.com")
    );
    assert!(!net.requests_to(PAR_URL)[0].form().contains_key("login_hint"));
}

#[tokio::test]
async fn split_flow_completes_through_callback() {
    let net = alice_network();
    let manager = manager(&net);

    let url = manager.start_auth("alice.example.com").await.unwrap();
    assert_eq!(url.host_str(), Some("auth.example.com"));
    let state = net.last_form_value(PAR_URL, "state").unwrap();

    let params = CallbackParams {
        code: Some("auth-code".into()),
        state: Some(state.as_str().into()),
        iss: Some("https://auth.example.com".into()),
        ..Default::default()
    };
    let session = manager.callback(params.clone()).await.unwrap();
    assert_eq!(session.sub.as_str(), ALICE_DID);

    // A context is consumed by its callback.
    let err = manager.callback(params).await.unwrap_err();
    assert!(matches!(
        err,
        OAuthError::Callback(CallbackError::UnknownState(_))
    ));

    let err = manager
        .callback(CallbackParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OAuthError::Callback(CallbackError::MissingState)
    ));
}

#[tokio::test(start_paused = true)]
async fn pending_authorization_expires() {
    let net = alice_network();
    let manager = manager_with(
        &net,
        ClientConfig::new().pending_ttl(Duration::from_secs(60)).build(),
    );

    manager.start_auth("alice.example.com").await.unwrap();
    let state = net.last_form_value(PAR_URL, "state").unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;

    let err = manager
        .callback(CallbackParams {
            code: Some("auth-code".into()),
            state: Some(state.as_str().into()),
            iss: Some("https://auth.example.com".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OAuthError::Callback(CallbackError::UnknownState(_))
    ));
    assert!(net.requests_to(TOKEN_URL).is_empty());
}

#[tokio::test(start_paused = true)]
async fn abandoned_browser_times_out() {
    let net = alice_network();
    let manager = manager_with(
        &net,
        ClientConfig::new()
            .authorization_timeout(Duration::from_secs(300))
            .build(),
    );
    let browser = ScriptedBrowser::new(&net, Script::Hang);
    let flow = AuthFlow::new();

    let err = manager
        .sign_in_with("alice.example.com", &browser, &flow)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OAuthError::Timeout(Operation::AwaitAuthorization)
    ));
    assert!(!err.is_retryable());
    assert_eq!(flow.state(), FlowState::Failed);
}
