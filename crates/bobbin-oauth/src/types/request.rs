use serde::Serialize;
use smol_str::SmolStr;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationResponseType {
    Code,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationCodeChallengeMethod {
    S256,
}

impl AuthorizationCodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenGrantType {
    AuthorizationCode,
    RefreshToken,
}

/// Body of a pushed authorization request, RFC 9126.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ParParameters {
    pub response_type: AuthorizationResponseType,
    pub redirect_uri: SmolStr,
    pub state: SmolStr,
    pub scope: SmolStr,
    pub code_challenge: SmolStr,
    pub code_challenge_method: AuthorizationCodeChallengeMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<SmolStr>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenRequestParameters {
    pub grant_type: TokenGrantType,
    pub code: SmolStr,
    pub redirect_uri: SmolStr,
    pub code_verifier: SmolStr,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequestParameters {
    pub grant_type: TokenGrantType,
    pub refresh_token: SmolStr,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RevocationRequestParameters {
    pub token: SmolStr,
}
