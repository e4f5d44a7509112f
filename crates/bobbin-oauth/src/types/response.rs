use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthParResponse {
    pub request_uri: SmolStr,
    pub expires_in: Option<u32>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthTokenType {
    DPoP,
    Bearer,
}

impl OAuthTokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DPoP => "DPoP",
            Self::Bearer => "Bearer",
        }
    }
}

// Token types are case-insensitive (RFC 6749 section 5.1).
impl<'de> Deserialize<'de> for OAuthTokenType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = SmolStr::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case("dpop") {
            Ok(Self::DPoP)
        } else if raw.eq_ignore_ascii_case("bearer") {
            Ok(Self::Bearer)
        } else {
            Err(serde::de::Error::unknown_variant(&raw, &["DPoP", "Bearer"]))
        }
    }
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.1
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: SmolStr,
    pub token_type: OAuthTokenType,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<SmolStr>,
    pub scope: Option<SmolStr>,
    // ATPROTO extension: the account DID the tokens are for
    pub sub: Option<SmolStr>,
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.2
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthErrorResponse {
    pub error: SmolStr,
    #[serde(default)]
    pub error_description: Option<SmolStr>,
}
