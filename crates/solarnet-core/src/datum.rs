//! Control datum samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::ControlValue;

/// A datum sample reported by a node control.
///
/// Besides the common datum identity, a control datum carries `val`, the
/// control's last reported value. Any other sample properties are kept in
/// `properties`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDatum {
    /// When the sample was captured.
    #[serde(default, with = "crate::timestamp::option")]
    pub created: Option<DateTime<Utc>>,
    /// The node that reported the sample.
    #[serde(default)]
    pub node_id: u64,
    /// The source ID, which for a control is the control ID.
    #[serde(default)]
    pub source_id: String,
    /// The control value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<ControlValue>,
    /// Remaining sample properties.
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// The result list of a datum query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatumResults<T> {
    /// The matching results.
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    /// Total number of results available, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_results: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_deserialize_most_recent_results() {
        let json = r#"{
            "totalResults": 1,
            "results": [{
                "created": "2024-01-10 15:30:00.000Z",
                "nodeId": 1,
                "sourceId": "/power/switch/1",
                "localDate": "2024-01-11",
                "val": 1
            }]
        }"#;
        let results: DatumResults<ControlDatum> = serde_json::from_str(json).unwrap();
        assert_eq!(results.results.len(), 1);
        let datum = &results.results[0];
        assert_eq!(datum.source_id, "/power/switch/1");
        assert_eq!(datum.val, Some(ControlValue::Number(1.0)));
        assert_eq!(
            datum.properties.get("localDate"),
            Some(&serde_json::json!("2024-01-11"))
        );
    }
}
