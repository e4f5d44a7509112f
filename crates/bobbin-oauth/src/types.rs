mod client_metadata;
mod metadata;
mod request;
mod response;

pub use self::client_metadata::*;
pub use self::metadata::*;
pub use self::request::*;
pub use self::response::*;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<SmolStr>,
}

impl CallbackParams {
    /// Read the parameters from a redirect URL's query string.
    pub fn from_redirect(url: &Url) -> Result<Self, serde_html_form::de::Error> {
        serde_html_form::from_str(url.query().unwrap_or_default())
    }
}
