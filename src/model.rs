use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A pond document as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pond {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub collaborators: Vec<String>,
    pub activated: bool,
    pub created: DateTime<Utc>,
}

/// A node (this client) bound to a pond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(rename = "_id")]
    pub id: String,
    pub pond_id: String,
    pub name: String,
    pub signature: String,
    pub activated: bool,
    pub created: DateTime<Utc>,
}

/// A sensor attached to a node. `fields` maps field keys to an active flag
/// and must keep its declared order: readings arrive positionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    #[serde(rename = "_id")]
    pub id: String,
    pub node_id: String,
    pub name: String,
    pub port: String,
    #[serde(rename = "type")]
    pub model: String,
    #[serde(default)]
    pub fields: IndexMap<String, bool>,
    pub activated: bool,
    pub modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

/// One declared field of a sensor structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorField {
    pub key: String,
    pub name: String,
    pub unit: String,
}

/// The field layout a sensor model exposes, in register order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStructure {
    #[serde(rename = "type")]
    pub model: String,
    pub fields: IndexMap<String, SensorField>,
}

/// One matched reading sweep for a sensor, ready to go upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReport {
    pub node_id: String,
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub model: String,
    pub fields: IndexMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_report_keeps_field_order() {
        let mut fields = IndexMap::new();
        fields.insert("DO".to_string(), 6.2);
        fields.insert("PH".to_string(), 7.1);
        fields.insert("TEMP".to_string(), 24.5);
        let report = SensorReport {
            node_id: "n1".into(),
            sensor_id: "s1".into(),
            model: "TNET_100".into(),
            fields,
            timestamp: Utc::now(),
        };

        let text = serde_json::to_string(&report).unwrap();
        let back: SensorReport = serde_json::from_str(&text).unwrap();
        let keys: Vec<_> = back.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["DO", "PH", "TEMP"]);
        assert_eq!(back, report);
    }

    #[test]
    fn sensor_id_round_trips_under_wire_name() {
        let sensor = Sensor {
            id: "abc123".into(),
            node_id: "n1".into(),
            name: "west intake".into(),
            port: "/dev/ttyUSB0".into(),
            model: "TNET_100".into(),
            fields: IndexMap::new(),
            activated: true,
            modified: Utc::now(),
            created: Utc::now(),
        };

        let value = serde_json::to_value(&sensor).unwrap();
        assert_eq!(value["_id"], "abc123");
        assert_eq!(value["type"], "TNET_100");
        assert_eq!(value["nodeId"], "n1");
    }
}
