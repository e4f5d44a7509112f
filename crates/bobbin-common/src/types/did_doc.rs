use crate::types::{Did, Handle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use url::Url;

/// Service type naming a user's Personal Data Server.
pub const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

/// DID Document.
///
/// Only the fields bobbin needs are modeled explicitly; anything else lands
/// in `extra_data`.
///
/// ```
/// use bobbin_common::types::DidDocument;
/// use serde_json::json;
/// let doc: DidDocument = serde_json::from_value(json!({
///   "id": "did:plc:z72i7hdynmk6r22z27h6abc2",
///   "alsoKnownAs": ["at://alice.example.com"],
///   "service": [{"id":"#atproto_pds","type":"AtprotoPersonalDataServer","serviceEndpoint":"https://pds.example.com"}]
/// })).unwrap();
/// assert_eq!(doc.pds_endpoint().unwrap().as_str(), "https://pds.example.com/");
/// assert_eq!(doc.handle().unwrap().as_str(), "alice.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    /// Document identifier (`did:plc:...` or `did:web:...`)
    pub id: Did,

    /// Alternate identifiers for the subject, such as `at://<handle>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_known_as: Vec<SmolStr>,

    /// Verification methods (keys) for this DID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_method: Vec<VerificationMethod>,

    /// Services associated with this DID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,

    /// Unmodeled fields
    #[serde(flatten)]
    pub extra_data: BTreeMap<SmolStr, Value>,
}

impl DidDocument {
    /// All valid handles from `at://` entries in `alsoKnownAs`, in document order.
    pub fn handles(&self) -> Vec<Handle> {
        self.also_known_as
            .iter()
            .filter_map(|s| s.strip_prefix("at://"))
            .filter_map(|h| Handle::new(h).ok())
            .collect()
    }

    /// The first `at://` entry of `alsoKnownAs`, normalized.
    ///
    /// `None` if there is no such entry or it is not a valid handle.
    pub fn handle(&self) -> Option<Handle> {
        self.also_known_as
            .iter()
            .find_map(|s| s.strip_prefix("at://"))
            .and_then(|h| Handle::new(h).ok())
    }

    /// Endpoint of the first `AtprotoPersonalDataServer` service.
    /// Accepts the endpoint as a string or as an object with a `url` field.
    pub fn pds_endpoint(&self) -> Option<Url> {
        let service = self.service.iter().find(|s| s.r#type == PDS_SERVICE_TYPE)?;
        match service.service_endpoint.as_ref()? {
            Value::String(s) => Url::parse(s).ok(),
            Value::Object(obj) => obj
                .get("url")
                .and_then(Value::as_str)
                .and_then(|s| Url::parse(s).ok()),
            _ => None,
        }
    }
}

/// Verification method (key) entry in a DID Document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// Identifier for this key material within the document
    pub id: SmolStr,
    /// Key type (e.g., `Multikey`)
    #[serde(rename = "type")]
    pub r#type: SmolStr,
    /// Controller DID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<SmolStr>,
    /// Multikey `publicKeyMultibase`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_multibase: Option<SmolStr>,
}

/// Service entry in a DID Document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service identifier
    pub id: SmolStr,
    /// Service type (e.g., `AtprotoPersonalDataServer`)
    #[serde(rename = "type")]
    pub r#type: SmolStr,
    /// String or object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<Value>,
}
