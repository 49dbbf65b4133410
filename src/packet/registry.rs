use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::packet::{Direction, InboundPacket, OutboundPacket, PACKET_NAMESPACE, TYPE_TAG};

type InboundDecodeFn = fn(Value) -> Result<InboundPacket, serde_json::Error>;
type OutboundDecodeFn = fn(Value) -> Result<OutboundPacket, serde_json::Error>;

/// Declares one wire type for registration.
pub struct PacketDef {
    type_name: &'static str,
    direction: Option<Direction>,
    name_override: Option<&'static str>,
    decode_in: Option<InboundDecodeFn>,
    decode_out: Option<OutboundDecodeFn>,
}

impl PacketDef {
    /// A type with no direction yet; useless until a direction or an
    /// explicit name override is added.
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            direction: None,
            name_override: None,
            decode_in: None,
            decode_out: None,
        }
    }

    pub fn inbound<T>(type_name: &'static str) -> Self
    where
        T: DeserializeOwned + Into<InboundPacket>,
    {
        Self {
            type_name,
            direction: Some(Direction::Inbound),
            name_override: None,
            decode_in: Some(decode_inbound_into::<T>),
            decode_out: None,
        }
    }

    pub fn outbound<T>(type_name: &'static str) -> Self
    where
        T: DeserializeOwned + Into<OutboundPacket>,
    {
        Self {
            type_name,
            direction: Some(Direction::Outbound),
            name_override: None,
            decode_in: None,
            decode_out: Some(decode_outbound_into::<T>),
        }
    }

    /// Full canonical name override; wins over the derived marker form.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name_override = Some(name);
        self
    }

    fn canonical_name(&self) -> Result<String, RegistryError> {
        if let Some(name) = self.name_override {
            return Ok(name.to_string());
        }
        match self.direction {
            Some(direction) => Ok(format!(
                "{PACKET_NAMESPACE}.Packet{}{}",
                direction.marker(),
                self.type_name
            )),
            None => Err(RegistryError::DirectionAmbiguous {
                type_name: self.type_name,
            }),
        }
    }
}

fn decode_inbound_into<T>(value: Value) -> Result<InboundPacket, serde_json::Error>
where
    T: DeserializeOwned + Into<InboundPacket>,
{
    serde_json::from_value::<T>(value).map(Into::into)
}

fn decode_outbound_into<T>(value: Value) -> Result<OutboundPacket, serde_json::Error>
where
    T: DeserializeOwned + Into<OutboundPacket>,
{
    serde_json::from_value::<T>(value).map(Into::into)
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("canonical name {name} already registered by {existing}, rejecting {duplicate}")]
    NameConflict {
        name: String,
        existing: &'static str,
        duplicate: &'static str,
    },
    #[error("{type_name} declares neither a direction nor a name override")]
    DirectionAmbiguous { type_name: &'static str },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{type_name} is not a registered outbound packet")]
    Unregistered { type_name: &'static str },
    #[error("{type_name} did not serialize to an object")]
    NotAnObject { type_name: &'static str },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("malformed {name} payload: {source}")]
    MalformedMessage {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// What a frame hydrated to.
#[derive(Debug)]
pub enum DecodedFrame {
    /// A registered inbound packet.
    Packet(InboundPacket),
    /// A registered outbound packet; valid on the wire but never expected
    /// from the backend.
    Outbound(OutboundPacket),
    /// Untagged or unknown-tagged structural data, passed through unchanged.
    Raw(Value),
}

struct RegistryEntry {
    type_name: &'static str,
    decode_in: Option<InboundDecodeFn>,
    decode_out: Option<OutboundDecodeFn>,
}

/// Maps canonical names to wire types. Built once at startup and shared;
/// registration failures are fatal there.
pub struct PacketRegistry {
    entries: HashMap<String, RegistryEntry>,
    outbound_names: HashMap<&'static str, String>,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            outbound_names: HashMap::new(),
        }
    }

    /// Registers one type. The first registration of a canonical name wins;
    /// duplicates are rejected.
    pub fn register(&mut self, def: PacketDef) -> Result<(), RegistryError> {
        let name = def.canonical_name()?;
        if let Some(existing) = self.entries.get(&name) {
            return Err(RegistryError::NameConflict {
                name,
                existing: existing.type_name,
                duplicate: def.type_name,
            });
        }
        if def.direction == Some(Direction::Outbound) {
            self.outbound_names.insert(def.type_name, name.clone());
        }
        self.entries.insert(
            name,
            RegistryEntry {
                type_name: def.type_name,
                decode_in: def.decode_in,
                decode_out: def.decode_out,
            },
        );
        Ok(())
    }

    /// Serializes an outbound packet into its tagged envelope.
    pub fn encode(&self, packet: &OutboundPacket) -> Result<String, EncodeError> {
        let type_name = packet.type_name();
        let name = self
            .outbound_names
            .get(type_name)
            .ok_or(EncodeError::Unregistered { type_name })?;
        let body = packet.to_value()?;
        let Value::Object(mut map) = body else {
            return Err(EncodeError::NotAnObject { type_name });
        };
        map.insert(TYPE_TAG.to_string(), Value::String(name.clone()));
        Ok(serde_json::to_string(&Value::Object(map))?)
    }

    /// Parses one text frame. Syntactically broken frames and mistyped
    /// payloads of known types are errors; anything else hydrates to a
    /// packet or falls through as raw data.
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;
        self.decode_value(value)
    }

    /// Hydrates an already-parsed value; used directly by wrapper packets
    /// carrying nested messages.
    pub fn decode_value(&self, value: Value) -> Result<DecodedFrame, DecodeError> {
        let mut body = match value {
            Value::Object(body) => body,
            other => return Ok(DecodedFrame::Raw(other)),
        };
        let name = match body.get(TYPE_TAG) {
            Some(Value::String(name)) => name.clone(),
            _ => return Ok(DecodedFrame::Raw(Value::Object(body))),
        };
        let Some(entry) = self.entries.get(&name) else {
            return Ok(DecodedFrame::Raw(Value::Object(body)));
        };
        if let Some(decode) = entry.decode_in {
            body.remove(TYPE_TAG);
            let packet = decode(Value::Object(body))
                .map_err(|source| DecodeError::MalformedMessage { name, source })?;
            return Ok(DecodedFrame::Packet(packet));
        }
        if let Some(decode) = entry.decode_out {
            body.remove(TYPE_TAG);
            let packet = decode(Value::Object(body))
                .map_err(|source| DecodeError::MalformedMessage { name, source })?;
            return Ok(DecodedFrame::Outbound(packet));
        }
        Ok(DecodedFrame::Raw(Value::Object(body)))
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use indexmap::IndexMap;
    use serde_json::json;

    use crate::model::SensorReport;
    use crate::packet::{
        standard_registry, Failure, NodeCreation, NodeRegistration, Operation, PondCreation,
        RawReport, Report, RequestNodeList, RequestProfile, RequestSensorTypeList, RequestWeather,
        SensorCreation, OPERATION_NAME,
    };

    #[test]
    fn inbound_names_carry_the_backend_out_marker() {
        let registry = standard_registry().unwrap();
        let frame = json!({ "==": "net.pondlink.packet.PacketOutFailure", "code": 404 });
        match registry.decode_value(frame).unwrap() {
            DecodedFrame::Packet(InboundPacket::Failure(failure)) => assert_eq!(failure.code, 404),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn encode_tags_with_the_backend_in_marker() {
        let registry = standard_registry().unwrap();
        let frame = registry.encode(&RequestWeather {}.into()).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value[TYPE_TAG],
            "net.pondlink.packet.PacketInRequestWeather"
        );
    }

    #[test]
    fn operation_keeps_its_unmarked_name() {
        let registry = standard_registry().unwrap();
        let frame = json!({
            "==": OPERATION_NAME,
            "operationId": "op-1",
            "packet": { "==": "net.pondlink.packet.PacketOutFailure", "code": 500 },
        });
        match registry.decode_value(frame).unwrap() {
            DecodedFrame::Packet(InboundPacket::Operation(Operation {
                operation_id, ..
            })) => {
                assert_eq!(operation_id, "op-1");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn first_registration_wins() {
        let mut registry = PacketRegistry::new();
        registry
            .register(PacketDef::inbound::<Failure>("Failure"))
            .unwrap();
        let err = registry
            .register(PacketDef::inbound::<Failure>("Failure"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NameConflict { .. }));

        let frame = json!({ "==": "net.pondlink.packet.PacketOutFailure", "code": 1 });
        assert!(matches!(
            registry.decode_value(frame).unwrap(),
            DecodedFrame::Packet(InboundPacket::Failure(_))
        ));
    }

    #[test]
    fn directionless_definition_is_rejected() {
        let mut registry = PacketRegistry::new();
        let err = registry.register(PacketDef::new("Orphan")).unwrap_err();
        assert!(matches!(err, RegistryError::DirectionAmbiguous { .. }));
    }

    #[test]
    fn unknown_tag_passes_through_with_the_tag_kept() {
        let registry = standard_registry().unwrap();
        let frame = json!({ "==": "net.pondlink.packet.PacketOutFuture", "x": 1 });
        match registry.decode_value(frame).unwrap() {
            DecodedFrame::Raw(raw) => {
                assert_eq!(raw[TYPE_TAG], "net.pondlink.packet.PacketOutFuture");
                assert_eq!(raw["x"], 1);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn untagged_values_pass_through_unchanged() {
        let registry = standard_registry().unwrap();
        assert!(matches!(
            registry.decode_value(json!({ "plain": true })).unwrap(),
            DecodedFrame::Raw(_)
        ));
        assert!(matches!(
            registry.decode_value(json!([1, 2, 3])).unwrap(),
            DecodedFrame::Raw(_)
        ));
    }

    #[test]
    fn mistyped_known_payload_is_rejected() {
        let registry = standard_registry().unwrap();
        let frame = json!({ "==": "net.pondlink.packet.PacketOutFailure", "code": "nope" });
        let err = registry.decode_value(frame).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMessage { .. }));
    }

    #[test]
    fn broken_json_is_rejected() {
        let registry = standard_registry().unwrap();
        assert!(matches!(
            registry.decode("{nope").unwrap_err(),
            DecodeError::InvalidJson(_)
        ));
    }

    #[test]
    fn outbound_frames_decode_back_to_their_type() {
        let registry = standard_registry().unwrap();
        let packet: OutboundPacket = NodeRegistration {
            signature: "sig-1".to_string(),
        }
        .into();
        let frame = registry.encode(&packet).unwrap();
        match registry.decode(&frame).unwrap() {
            DecodedFrame::Outbound(decoded) => assert_eq!(decoded, packet),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn every_outbound_packet_is_encodable() {
        let registry = standard_registry().unwrap();
        let report = SensorReport {
            node_id: "n-1".to_string(),
            sensor_id: "s-1".to_string(),
            model: "TNET_100".to_string(),
            fields: IndexMap::new(),
            timestamp: Utc::now(),
        };
        let packets: Vec<OutboundPacket> = vec![
            NodeRegistration {
                signature: "sig".to_string(),
            }
            .into(),
            RequestProfile {
                node_id: "n-1".to_string(),
                signature: "sig".to_string(),
            }
            .into(),
            RequestNodeList {
                pond_id: "p-1".to_string(),
            }
            .into(),
            NodeCreation {
                pond_id: "p-1".to_string(),
                name: "node".to_string(),
                signature: "sig".to_string(),
            }
            .into(),
            PondCreation {
                name: "pond".to_string(),
            }
            .into(),
            RequestSensorTypeList {}.into(),
            SensorCreation {
                name: "probe".to_string(),
                port: "/dev/ttyUSB0".to_string(),
                model: "TNET_100".to_string(),
            }
            .into(),
            Report { index: 0, report }.into(),
            RawReport {
                index: 1,
                context: json!({ "predicted": [6.1] }),
            }
            .into(),
            RequestWeather {}.into(),
        ];
        for packet in &packets {
            registry.encode(packet).unwrap();
        }
    }
}
