use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bobbin_common::http_client::HttpClient;
use chrono::Utc;
use http::{Request, Response, StatusCode, Uri, header::InvalidHeaderValue};
use jose_jwa::{Algorithm, Signing};
use jose_jwk::{Jwk, Key, crypto};
use p256::ecdsa::SigningKey;
use rand::{RngCore, SeedableRng};
use sha2::Digest;
use smol_str::SmolStr;

use crate::{
    jose::{Claims, PublicClaims, RegisteredClaims, RegisteredHeader, create_signed_jwt},
    session::DpopDataSource,
};

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";

/// How many times a request is re-sent after a `use_dpop_nonce` challenge.
pub const MAX_NONCE_RETRIES: usize = 1;

#[derive(serde::Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(thiserror::Error, Debug, miette::Diagnostic)]
pub enum DpopError {
    #[error(transparent)]
    #[diagnostic(code(bobbin_oauth::dpop::header))]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("crypto error: {0}")]
    #[diagnostic(code(bobbin_oauth::dpop::crypto))]
    JwkCrypto(SmolStr),
    #[error("key does not match any alg supported by the server")]
    #[diagnostic(
        code(bobbin_oauth::dpop::unsupported_key),
        help("DPoP keys must be P-256 private keys")
    )]
    UnsupportedKey,
    #[error(transparent)]
    #[diagnostic(code(bobbin_oauth::dpop::serde))]
    SerdeJson(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    #[diagnostic(code(bobbin_oauth::dpop::transport))]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = core::result::Result<T, DpopError>;

/// DPoP-signed requests for any [`HttpClient`].
pub trait DpopExt: HttpClient {
    /// Request to an authorization server (PAR, token, revocation).
    fn dpop_server_call<'r, D>(&'r self, data_source: &'r mut D) -> DpopCall<'r, Self, D>
    where
        Self: Sized,
        D: DpopDataSource,
    {
        DpopCall::server(self, data_source)
    }

    /// Request to a resource server, authorized with a DPoP-bound token.
    fn dpop_call<'r, D>(&'r self, data_source: &'r mut D) -> DpopCall<'r, Self, D>
    where
        Self: Sized,
        D: DpopDataSource,
    {
        DpopCall::client(self, data_source)
    }
}

impl<T: HttpClient> DpopExt for T {}

pub struct DpopCall<'r, C: HttpClient, D: DpopDataSource> {
    pub client: &'r C,
    pub is_to_auth_server: bool,
    pub data_source: &'r mut D,
}

impl<'r, C: HttpClient, D: DpopDataSource> DpopCall<'r, C, D> {
    pub fn server(client: &'r C, data_source: &'r mut D) -> Self {
        Self {
            client,
            is_to_auth_server: true,
            data_source,
        }
    }

    pub fn client(client: &'r C, data_source: &'r mut D) -> Self {
        Self {
            client,
            is_to_auth_server: false,
            data_source,
        }
    }

    pub async fn send(self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        wrap_request_with_dpop(
            self.client,
            self.data_source,
            self.is_to_auth_server,
            request,
        )
        .await
    }
}

/// Attach a DPoP proof to `request` and send it.
///
/// If the server answers with a fresh `DPoP-Nonce` and a `use_dpop_nonce`
/// error, the proof is rebuilt with that nonce and the request is sent again,
/// at most [`MAX_NONCE_RETRIES`] times. Any new nonce is remembered in
/// `data_source` whether or not a retry happens.
pub async fn wrap_request_with_dpop<T, D>(
    client: &T,
    data_source: &mut D,
    is_to_auth_server: bool,
    mut request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>>
where
    T: HttpClient,
    D: DpopDataSource,
{
    let method = request.method().as_str().to_owned();
    let htu = htu(request.uri());
    // https://datatracker.ietf.org/doc/html/rfc9449#section-4.2
    let ath: Option<SmolStr> = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .filter(|v| v.to_str().is_ok_and(|s| s.starts_with("DPoP ")))
        .map(|auth| {
            URL_SAFE_NO_PAD
                .encode(sha2::Sha256::digest(&auth.as_bytes()[5..]))
                .into()
        });

    let mut nonce = if is_to_auth_server {
        data_source.authserver_nonce()
    } else {
        data_source.host_nonce()
    };
    let mut retries = 0;
    loop {
        let proof = build_dpop_proof(
            data_source.key(),
            &method,
            &htu,
            nonce.as_deref(),
            ath.as_deref(),
        )?;
        request.headers_mut().insert("DPoP", proof.parse()?);
        let response = client
            .send_http(request.clone())
            .await
            .map_err(|e| DpopError::Transport(Box::new(e)))?;

        let next_nonce = response
            .headers()
            .get("DPoP-Nonce")
            .and_then(|v| v.to_str().ok())
            .map(SmolStr::new)
            .filter(|n| nonce.as_ref() != Some(n));
        let Some(next_nonce) = next_nonce else {
            // Same nonce as we sent, or none at all: nothing to learn, nothing to retry.
            return Ok(response);
        };
        if is_to_auth_server {
            data_source.set_authserver_nonce(next_nonce.clone());
        } else {
            data_source.set_host_nonce(next_nonce.clone());
        }

        if retries >= MAX_NONCE_RETRIES || !is_use_dpop_nonce_error(&response) {
            return Ok(response);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(url = %htu, "retrying with server-provided DPoP nonce");
        nonce = Some(next_nonce);
        retries += 1;
    }
}

#[inline]
fn is_use_dpop_nonce_error(response: &Response<Vec<u8>>) -> bool {
    match response.status() {
        // https://datatracker.ietf.org/doc/html/rfc9449#name-authorization-server-provid
        StatusCode::BAD_REQUEST => serde_json::from_slice::<ErrorResponse>(response.body())
            .is_ok_and(|res| res.error == "use_dpop_nonce"),
        // https://datatracker.ietf.org/doc/html/rfc9449#name-resource-server-provided-no
        StatusCode::UNAUTHORIZED => response
            .headers()
            .get(http::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|www_auth| {
                www_auth.starts_with("DPoP") && www_auth.contains(r#"error="use_dpop_nonce""#)
            }),
        _ => false,
    }
}

/// `htu` claim: the request URI without query or fragment.
fn htu(uri: &Uri) -> String {
    let mut htu = String::new();
    if let Some(scheme) = uri.scheme_str() {
        htu.push_str(scheme);
        htu.push_str("://");
    }
    if let Some(authority) = uri.authority() {
        htu.push_str(authority.as_str());
    }
    htu.push_str(uri.path());
    htu
}

#[inline]
pub(crate) fn generate_jti() -> SmolStr {
    let mut rng = rand::rngs::SmallRng::from_entropy();
    let mut bytes = [0u8; 12];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes).into()
}

/// Build a compact JWS (ES256) for DPoP with embedded public JWK.
pub fn build_dpop_proof(
    key: &Key,
    method: &str,
    url: &str,
    nonce: Option<&str>,
    ath: Option<&str>,
) -> Result<String> {
    let secret = match crypto::Key::try_from(key)
        .map_err(|e| DpopError::JwkCrypto(smol_str::format_smolstr!("{e:?}")))?
    {
        crypto::Key::P256(crypto::Kind::Secret(sk)) => sk,
        _ => return Err(DpopError::UnsupportedKey),
    };
    let mut header = RegisteredHeader::from(Algorithm::Signing(Signing::Es256));
    header.typ = Some(JWT_HEADER_TYP_DPOP.into());
    header.jwk = Some(Jwk {
        key: Key::from(&crypto::Key::from(secret.public_key())),
        prm: Default::default(),
    });

    let claims = Claims {
        registered: RegisteredClaims {
            jti: Some(generate_jti()),
            iat: Some(Utc::now().timestamp()),
            ..Default::default()
        },
        public: PublicClaims {
            htm: Some(method.into()),
            htu: Some(url.into()),
            ath: ath.map(SmolStr::new),
            nonce: nonce.map(SmolStr::new),
        },
    };
    Ok(create_signed_jwt(
        SigningKey::from(secret.clone()),
        &header,
        &claims,
    )?)
}
