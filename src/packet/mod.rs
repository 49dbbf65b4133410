use std::sync::Arc;

use crate::client::Client;
use crate::socket::conn::ConnectionHandle;
use crate::ui::UiLink;

pub mod auth;
pub mod control;
pub mod pond;
pub mod registry;
pub mod report;
pub mod sensor;

pub use auth::{Failure, NodeRegistration, Profile, RequestNodeRegistration, RequestProfile};
pub use control::Operation;
pub use pond::{
    NodeCreation, NodeList, PondCreation, PondCreationReceipt, PondList, RequestNodeList,
};
pub use registry::{DecodedFrame, PacketDef, PacketRegistry, RegistryError};
pub use report::{RawReport, Report, ReportReceipt, RequestWeather, Weather};
pub use sensor::{RequestSensorTypeList, SensorCreation, SensorCreationReceipt, SensorTypeList};

/// Namespace prefix shared by every canonical packet name.
pub const PACKET_NAMESPACE: &str = "net.pondlink.packet";

/// Reserved envelope key carrying the canonical name.
pub const TYPE_TAG: &str = "==";

/// Canonical name of the operation wrapper; it predates the marker scheme
/// and keeps its unmarked name.
pub const OPERATION_NAME: &str = "net.pondlink.packet.Operation";

/// Which way a packet travels. Markers are named from the backend's
/// perspective: packets the client receives are the backend's `Out`
/// packets, packets the client sends are its `In` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn marker(self) -> &'static str {
        match self {
            Direction::Inbound => "Out",
            Direction::Outbound => "In",
        }
    }
}

macro_rules! packet_enum {
    ($(#[$meta:meta])* $enum_name:ident { $($name:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $enum_name {
            $($name($name),)+
        }

        $(
            impl From<$name> for $enum_name {
                fn from(packet: $name) -> Self {
                    $enum_name::$name(packet)
                }
            }
        )+

        impl $enum_name {
            pub fn type_name(&self) -> &'static str {
                match self {
                    $($enum_name::$name(_) => stringify!($name),)+
                }
            }
        }
    };
}

packet_enum! {
    /// Every packet the backend can send us.
    InboundPacket {
        RequestNodeRegistration,
        Profile,
        NodeList,
        PondList,
        PondCreationReceipt,
        SensorTypeList,
        SensorCreationReceipt,
        Weather,
        ReportReceipt,
        Failure,
        Operation,
    }
}

packet_enum! {
    /// Every packet we can send the backend.
    OutboundPacket {
        NodeRegistration,
        RequestProfile,
        RequestNodeList,
        NodeCreation,
        PondCreation,
        RequestSensorTypeList,
        SensorCreation,
        Report,
        RawReport,
        RequestWeather,
    }
}

impl InboundPacket {
    /// Runs the packet's handler. Handlers receive the connection they
    /// arrived on, the client facade, and the presentation link; they run
    /// on the connection worker's own context, strictly in arrival order.
    pub async fn execute(
        self,
        conn: &ConnectionHandle,
        client: &Arc<Client>,
        ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        match self {
            InboundPacket::RequestNodeRegistration(p) => p.execute(conn, client, ui).await,
            InboundPacket::Profile(p) => p.execute(conn, client, ui).await,
            InboundPacket::NodeList(p) => p.execute(conn, client, ui).await,
            InboundPacket::PondList(p) => p.execute(conn, client, ui).await,
            InboundPacket::PondCreationReceipt(p) => p.execute(conn, client, ui).await,
            InboundPacket::SensorTypeList(p) => p.execute(conn, client, ui).await,
            InboundPacket::SensorCreationReceipt(p) => p.execute(conn, client, ui).await,
            InboundPacket::Weather(p) => p.execute(conn, client, ui).await,
            InboundPacket::ReportReceipt(p) => p.execute(conn, client, ui).await,
            InboundPacket::Failure(p) => p.execute(conn, client, ui).await,
            InboundPacket::Operation(p) => p.execute(conn, client, ui).await,
        }
    }
}

impl OutboundPacket {
    pub(crate) fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            OutboundPacket::NodeRegistration(p) => serde_json::to_value(p),
            OutboundPacket::RequestProfile(p) => serde_json::to_value(p),
            OutboundPacket::RequestNodeList(p) => serde_json::to_value(p),
            OutboundPacket::NodeCreation(p) => serde_json::to_value(p),
            OutboundPacket::PondCreation(p) => serde_json::to_value(p),
            OutboundPacket::RequestSensorTypeList(p) => serde_json::to_value(p),
            OutboundPacket::SensorCreation(p) => serde_json::to_value(p),
            OutboundPacket::Report(p) => serde_json::to_value(p),
            OutboundPacket::RawReport(p) => serde_json::to_value(p),
            OutboundPacket::RequestWeather(p) => serde_json::to_value(p),
        }
    }
}

/// Builds the registry every session uses. Name collisions here are a
/// programming error and abort startup.
pub fn standard_registry() -> Result<PacketRegistry, RegistryError> {
    let mut registry = PacketRegistry::new();

    registry.register(PacketDef::inbound::<RequestNodeRegistration>(
        "RequestNodeRegistration",
    ))?;
    registry.register(PacketDef::inbound::<Profile>("Profile"))?;
    registry.register(PacketDef::inbound::<NodeList>("NodeList"))?;
    registry.register(PacketDef::inbound::<PondList>("PondList"))?;
    registry.register(PacketDef::inbound::<PondCreationReceipt>(
        "PondCreationReceipt",
    ))?;
    registry.register(PacketDef::inbound::<SensorTypeList>("SensorTypeList"))?;
    registry.register(PacketDef::inbound::<SensorCreationReceipt>(
        "SensorCreationReceipt",
    ))?;
    registry.register(PacketDef::inbound::<Weather>("Weather"))?;
    registry.register(PacketDef::inbound::<ReportReceipt>("ReportReceipt"))?;
    registry.register(PacketDef::inbound::<Failure>("Failure"))?;
    registry.register(PacketDef::inbound::<Operation>("Operation").with_name(OPERATION_NAME))?;

    registry.register(PacketDef::outbound::<NodeRegistration>("NodeRegistration"))?;
    registry.register(PacketDef::outbound::<RequestProfile>("RequestProfile"))?;
    registry.register(PacketDef::outbound::<RequestNodeList>("RequestNodeList"))?;
    registry.register(PacketDef::outbound::<NodeCreation>("NodeCreation"))?;
    registry.register(PacketDef::outbound::<PondCreation>("PondCreation"))?;
    registry.register(PacketDef::outbound::<RequestSensorTypeList>(
        "RequestSensorTypeList",
    ))?;
    registry.register(PacketDef::outbound::<SensorCreation>("SensorCreation"))?;
    registry.register(PacketDef::outbound::<Report>("Report"))?;
    registry.register(PacketDef::outbound::<RawReport>("RawReport"))?;
    registry.register(PacketDef::outbound::<RequestWeather>("RequestWeather"))?;

    Ok(registry)
}
