//! Session records and the DPoP state they carry.

use bobbin_common::types::{Did, Handle};
use chrono::{DateTime, TimeDelta, Utc};
use jose_jwk::Key;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

use crate::types::{OAuthAuthorizationServerMetadata, OAuthTokenResponse, OAuthTokenType};

/// Where a DPoP proof gets its key and nonces from.
///
/// Authorization servers and resource servers hand out independent nonces, so
/// they are tracked separately.
pub trait DpopDataSource {
    fn key(&self) -> &Key;
    fn authserver_nonce(&self) -> Option<SmolStr>;
    fn set_authserver_nonce(&mut self, nonce: SmolStr);
    fn host_nonce(&self) -> Option<SmolStr>;
    fn set_host_nonce(&mut self, nonce: SmolStr);
}

/// A DPoP key plus the latest nonce seen from each server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpopState {
    pub dpop_key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authserver_nonce: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_nonce: Option<SmolStr>,
}

impl DpopState {
    pub fn new(dpop_key: Key) -> Self {
        Self {
            dpop_key,
            authserver_nonce: None,
            host_nonce: None,
        }
    }
}

impl DpopDataSource for DpopState {
    fn key(&self) -> &Key {
        &self.dpop_key
    }
    fn authserver_nonce(&self) -> Option<SmolStr> {
        self.authserver_nonce.clone()
    }
    fn set_authserver_nonce(&mut self, nonce: SmolStr) {
        self.authserver_nonce = Some(nonce);
    }
    fn host_nonce(&self) -> Option<SmolStr> {
        self.host_nonce.clone()
    }
    fn set_host_nonce(&mut self, nonce: SmolStr) {
        self.host_nonce = Some(nonce);
    }
}

/// An established, persisted session.
///
/// There is at most one per `sub`. The DPoP key is created with the session
/// and never rotated; refreshes only replace the tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthSession {
    pub sub: Did,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,
    /// Authorization server that issued the tokens
    pub issuer: SmolStr,
    pub pds_url: Url,
    pub token_endpoint: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<SmolStr>,
    pub access_token: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SmolStr>,
    pub token_type: OAuthTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub dpop: DpopState,
}

impl OAuthSession {
    /// True if the access token expires within `leeway` of `now`.
    ///
    /// A session without a known expiry never counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: TimeDelta) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now + leeway)
    }

    /// Value for the `Authorization` header of a resource request.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type.as_str(), self.access_token)
    }

    /// Apply a token endpoint response.
    ///
    /// Servers that do not rotate refresh tokens omit `refresh_token`; the
    /// previous one stays valid in that case.
    pub fn update_with_tokens(&mut self, response: OAuthTokenResponse, now: DateTime<Utc>) {
        self.expires_at = expires_at(now, response.expires_in);
        self.access_token = response.access_token;
        self.token_type = response.token_type;
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if response.scope.is_some() {
            self.scope = response.scope;
        }
    }
}

pub(crate) fn expires_at(now: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.and_then(|secs| now.checked_add_signed(TimeDelta::seconds(secs)))
}

/// Everything needed to finish one in-flight authorization.
///
/// Lives in memory only, from the pushed authorization request until the
/// matching callback (or until it expires).
#[derive(Clone, Debug)]
pub struct AuthRequestContext {
    pub state: SmolStr,
    pub pkce_verifier: SmolStr,
    pub code_challenge: SmolStr,
    pub dpop: DpopState,
    pub server_metadata: OAuthAuthorizationServerMetadata,
    pub redirect_uri: Url,
    /// Account the user asked to sign in as, when known up front
    pub expected_sub: Option<Did>,
    pub handle: Option<Handle>,
    pub pds_url: Option<Url>,
    pub request_uri: SmolStr,
    pub authorization_url: Url,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_key;

    fn session(expires_at: Option<DateTime<Utc>>) -> OAuthSession {
        OAuthSession {
            sub: Did::new_static("did:plc:z72i7hdynmk6r22z27h6abc2").unwrap(),
            handle: None,
            issuer: "https://auth.example.com".into(),
            pds_url: Url::parse("https://pds.example.com").unwrap(),
            token_endpoint: "https://auth.example.com/oauth/token".into(),
            revocation_endpoint: None,
            access_token: "at1".into(),
            refresh_token: Some("rt1".into()),
            token_type: OAuthTokenType::DPoP,
            scope: Some("atproto".into()),
            expires_at,
            dpop: DpopState::new(generate_key(&["ES256".into()]).unwrap()),
        }
    }

    #[test]
    fn expiry_with_leeway() {
        let now = Utc::now();
        let leeway = TimeDelta::seconds(10);
        assert!(!session(None).is_expired(now, leeway));
        assert!(session(Some(now - TimeDelta::seconds(1))).is_expired(now, leeway));
        assert!(session(Some(now + TimeDelta::seconds(5))).is_expired(now, leeway));
        assert!(!session(Some(now + TimeDelta::seconds(60))).is_expired(now, leeway));
    }

    #[test]
    fn token_update_keeps_key_and_old_refresh_token() {
        let now = Utc::now();
        let mut s = session(None);
        let key = s.dpop.dpop_key.clone();
        s.update_with_tokens(
            OAuthTokenResponse {
                access_token: "at2".into(),
                token_type: OAuthTokenType::DPoP,
                expires_in: Some(3600),
                refresh_token: None,
                scope: None,
                sub: None,
            },
            now,
        );
        assert_eq!(s.access_token, "at2");
        assert_eq!(s.refresh_token.as_deref(), Some("rt1"));
        assert_eq!(s.scope.as_deref(), Some("atproto"));
        assert_eq!(s.expires_at, Some(now + TimeDelta::seconds(3600)));
        assert_eq!(s.dpop.dpop_key, key);
        assert_eq!(s.authorization_header(), "DPoP at2");
    }

    #[test]
    fn session_record_survives_serialization() {
        let s = session(Some(Utc::now()));
        let bytes = serde_json::to_vec(&s).unwrap();
        let back: OAuthSession = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, s);
    }
}
