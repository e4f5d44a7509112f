#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bobbin_common::http_client::HttpClient;
use bobbin_common::session::MemoryStore;
use bobbin_common::types::Did;
use bobbin_identity::BobbinResolver;
use bobbin_identity::resolver::{HandleStep, ResolverOptions};
use bobbin_oauth::browser::{BrowserLauncher, BrowserOutcome};
use bobbin_oauth::error::BoxError;
use bobbin_oauth::session::{DpopState, OAuthSession};
use bobbin_oauth::types::OAuthTokenType;
use bobbin_oauth::utils::generate_key;
use bobbin_oauth::{AtprotoClientMetadata, ClientConfig, SessionManager};
use chrono::{TimeDelta, Utc};
use http::StatusCode;
use serde_json::{Value, json};
use url::Url;

pub const ALICE_DID: &str = "did:plc:z72i7hdynmk6r22z27h6abc2";
pub const PAR_URL: &str = "https://auth.example.com/oauth/par";
pub const TOKEN_URL: &str = "https://auth.example.com/oauth/token";
pub const REVOKE_URL: &str = "https://auth.example.com/oauth/revoke";
pub const PROTECTED_RESOURCE_URL: &str =
    "https://pds.example.com/.well-known/oauth-protected-resource";
pub const REQUEST_URI: &str = "urn:ietf:params:oauth:request_uri:req-1";

#[derive(Debug, thiserror::Error)]
#[error("connection refused")]
pub struct Refused;

#[derive(Clone, Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            headers: vec![("content-type", "application/json".into())],
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

#[derive(Clone, Debug)]
pub struct Logged {
    pub method: String,
    pub url: String,
    pub body: String,
    pub dpop: Option<String>,
    pub authorization: Option<String>,
}

impl Logged {
    pub fn form(&self) -> HashMap<String, String> {
        serde_html_form::from_str(&self.body).unwrap()
    }

    pub fn proof_claims(&self) -> Value {
        jwt_part(self.dpop.as_deref().expect("DPoP header"), 1)
    }

    pub fn proof_header(&self) -> Value {
        jwt_part(self.dpop.as_deref().expect("DPoP header"), 0)
    }
}

fn jwt_part(jwt: &str, index: usize) -> Value {
    let part = jwt.split('.').nth(index).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
}

/// Routes by full URL. A route holding several replies hands them out in
/// order and then keeps repeating the last one.
#[derive(Clone, Default)]
pub struct MockNet {
    routes: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    offline: Arc<Mutex<Vec<String>>>,
    log: Arc<Mutex<Vec<Logged>>>,
}

impl MockNet {
    pub fn route(&self, url: &str, reply: Reply) {
        self.script(url, vec![reply]);
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    pub fn json(&self, url: &str, body: Value) {
        self.route(url, Reply::json(200, body));
    }

    pub fn go_offline(&self, url: &str) {
        self.offline.lock().unwrap().push(url.to_string());
    }

    pub fn log(&self) -> Vec<Logged> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<Logged> {
        self.log().into_iter().filter(|r| r.url == url).collect()
    }

    /// Form parameter from the most recent request to `url`.
    pub fn last_form_value(&self, url: &str, name: &str) -> Option<String> {
        self.requests_to(url).last()?.form().get(name).cloned()
    }
}

impl HttpClient for MockNet {
    type Error = Refused;

    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, Self::Error> {
        tokio::task::yield_now().await;
        let url = request.uri().to_string();
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        self.log.lock().unwrap().push(Logged {
            method: request.method().to_string(),
            url: url.clone(),
            body: String::from_utf8_lossy(request.body()).into_owned(),
            dpop: header("dpop"),
            authorization: header("authorization"),
        });
        if self.offline.lock().unwrap().contains(&url) {
            return Err(Refused);
        }
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        }
        .unwrap_or_else(|| Reply::json(404, json!({ "error": "not_found" })));
        let mut builder = http::Response::builder().status(reply.status);
        for (name, value) in &reply.headers {
            builder = builder.header(*name, value.as_str());
        }
        Ok(builder.body(reply.body).unwrap())
    }
}

pub fn auth_server_metadata(issuer: &str) -> Value {
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/oauth/authorize"),
        "token_endpoint": format!("{issuer}/oauth/token"),
        "pushed_authorization_request_endpoint": format!("{issuer}/oauth/par"),
        "require_pushed_authorization_requests": true,
        "revocation_endpoint": format!("{issuer}/oauth/revoke"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none", "private_key_jwt"],
        "dpop_signing_alg_values_supported": ["RS256", "ES256"],
        "scopes_supported": ["atproto", "transition:generic"],
        "authorization_response_iss_parameter_supported": true,
        "client_id_metadata_document_supported": true
    })
}

pub fn token_response(access_token: &str, refresh_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "DPoP",
        "expires_in": 3600,
        "refresh_token": refresh_token,
        "scope": "atproto transition:generic",
        "sub": ALICE_DID
    })
}

/// `alice.example.com` -> `ALICE_DID` -> `https://pds.example.com`, whose
/// authorization server is `https://auth.example.com`.
pub fn alice_network() -> MockNet {
    let net = MockNet::default();
    net.route(
        "https://alice.example.com/.well-known/atproto-did",
        Reply::text(200, ALICE_DID),
    );
    net.json(
        &format!("https://plc.directory/{ALICE_DID}"),
        json!({
            "id": ALICE_DID,
            "alsoKnownAs": ["at://alice.example.com"],
            "service": [{
                "id": "#atproto_pds",
                "type": "AtprotoPersonalDataServer",
                "serviceEndpoint": "https://pds.example.com"
            }]
        }),
    );
    net.json(
        PROTECTED_RESOURCE_URL,
        json!({
            "resource": "https://pds.example.com",
            "authorization_servers": ["https://auth.example.com"]
        }),
    );
    net.json(
        "https://auth.example.com/.well-known/oauth-authorization-server",
        auth_server_metadata("https://auth.example.com"),
    );
    net.route(
        PAR_URL,
        Reply::json(201, json!({ "request_uri": REQUEST_URI, "expires_in": 60 })),
    );
    net.json(TOKEN_URL, token_response("at-1", "rt-1"));
    net.route(REVOKE_URL, Reply::text(200, ""));
    net
}

pub type Manager = SessionManager<BobbinResolver<MockNet>, MemoryStore>;

pub fn client_metadata() -> AtprotoClientMetadata {
    AtprotoClientMetadata::new()
        .client_id(Url::parse("https://app.example.com/oauth/client-metadata.json").unwrap())
        .redirect_uris(vec![Url::parse("com.example.app:/callback").unwrap()])
        .client_name("Example")
        .build()
}

pub fn manager_with(net: &MockNet, config: ClientConfig) -> Manager {
    let options = ResolverOptions::new()
        .handle_order(vec![HandleStep::HttpsWellKnown])
        .handle_resolver(Url::parse("https://resolver.example.net").unwrap())
        .build();
    let resolver = BobbinResolver::new(net.clone(), options);
    SessionManager::new(resolver, MemoryStore::new(), client_metadata(), config).unwrap()
}

pub fn manager(net: &MockNet) -> Manager {
    manager_with(net, ClientConfig::default())
}

/// A session as it would have been saved by an earlier sign-in.
pub fn stored_session(access_token: &str, expires_in_secs: i64) -> OAuthSession {
    OAuthSession {
        sub: Did::new(ALICE_DID).unwrap(),
        handle: None,
        issuer: "https://auth.example.com/".into(),
        pds_url: Url::parse("https://pds.example.com").unwrap(),
        token_endpoint: TOKEN_URL.into(),
        revocation_endpoint: Some(REVOKE_URL.into()),
        access_token: access_token.into(),
        refresh_token: Some("rt-0".into()),
        token_type: OAuthTokenType::DPoP,
        scope: Some("atproto transition:generic".into()),
        expires_at: Some(Utc::now() + TimeDelta::seconds(expires_in_secs)),
        dpop: DpopState::new(generate_key(&["ES256".into()]).unwrap()),
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Script {
    Approve,
    ApproveWithoutIssuer,
    Deny,
    ForgeState,
    ForeignRedirect,
    Cancel,
    Hang,
}

/// Plays the user: reads the `state` the client pushed and answers with a redirect.
pub struct ScriptedBrowser {
    net: MockNet,
    script: Script,
    opened: Mutex<Vec<(Url, String)>>,
}

impl ScriptedBrowser {
    pub fn new(net: &MockNet, script: Script) -> Self {
        Self {
            net: net.clone(),
            script,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<(Url, String)> {
        self.opened.lock().unwrap().clone()
    }
}

fn redirect(params: &[(&str, &str)]) -> BrowserOutcome {
    redirect_to("com.example.app:/callback", params)
}

fn redirect_to(base: &str, params: &[(&str, &str)]) -> BrowserOutcome {
    let query = serde_html_form::to_string(params).unwrap();
    BrowserOutcome::Redirect(Url::parse(&format!("{base}?{query}")).unwrap())
}

#[async_trait]
impl BrowserLauncher for ScriptedBrowser {
    async fn open(&self, url: &Url, callback_scheme: &str) -> Result<BrowserOutcome, BoxError> {
        self.opened
            .lock()
            .unwrap()
            .push((url.clone(), callback_scheme.to_string()));
        let state = self
            .net
            .last_form_value(PAR_URL, "state")
            .ok_or("authorization page opened before PAR")?;
        let iss = "https://auth.example.com";
        Ok(match self.script {
            Script::Approve => redirect(&[("code", "auth-code"), ("state", &state), ("iss", iss)]),
            Script::ApproveWithoutIssuer => redirect(&[("code", "auth-code"), ("state", &state)]),
            Script::Deny => redirect(&[
                ("error", "access_denied"),
                ("error_description", "User denied the request"),
                ("state", &state),
                ("iss", iss),
            ]),
            Script::ForgeState => {
                redirect(&[("code", "auth-code"), ("state", "forged"), ("iss", iss)])
            }
            Script::ForeignRedirect => redirect_to(
                "com.example.other:/callback",
                &[("code", "auth-code"), ("state", &state), ("iss", iss)],
            ),
            Script::Cancel => BrowserOutcome::Cancelled,
            Script::Hang => {
                std::future::pending::<()>().await;
                BrowserOutcome::Cancelled
            }
        })
    }
}
