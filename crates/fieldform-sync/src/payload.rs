use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use fieldform_spec::ValueMap;

/// Property key carrying the idempotency key inside the response itself,
/// for end-to-end traceability alongside the store's own `client_id`
/// column. The two are always equal.
pub const CLIENT_ID_PROPERTY: &str = "_client_id";

/// Single device position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapturedPosition {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl CapturedPosition {
    pub fn coordinates(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

/// Geometry attached to a submitted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    Line { coordinates: Vec<[f64; 2]> },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

/// Geographic feature written to the backing store: captured geometry plus
/// the full value map as properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    pub properties: BTreeMap<String, Value>,
}

/// Assembles the final payload from a finished draft: all values, the
/// attachment storage handles, and the `_client_id` property.
pub fn build_payload(
    values: &ValueMap,
    attachments: &BTreeMap<String, String>,
    geometry: Option<Geometry>,
    client_id: &str,
) -> ResponsePayload {
    let mut properties: BTreeMap<String, Value> = values.clone();
    for (field, handle) in attachments {
        properties.insert(field.clone(), Value::String(handle.clone()));
    }
    properties.insert(
        CLIENT_ID_PROPERTY.to_string(),
        Value::String(client_id.to_string()),
    );
    ResponsePayload {
        geometry,
        properties,
    }
}
