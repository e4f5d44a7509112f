use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

/// Client metadata document as published at the `client_id` URL.
///
/// Field order matches the serialized document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientMetadata {
    pub client_id: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<Url>,
    pub redirect_uris: Vec<Url>,
    pub scope: SmolStr,
    pub grant_types: Vec<SmolStr>,
    pub response_types: Vec<SmolStr>,
    pub application_type: SmolStr,
    pub token_endpoint_auth_method: SmolStr,
    pub dpop_bound_access_tokens: bool,
}
