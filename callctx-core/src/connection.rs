//! Connection description mapping
//!
//! Translates session-negotiated relay connections into the descriptions each
//! engine generation understands. The modern engine budgets a single byte for
//! reflector identity, so raw 64-bit reflector ids are compacted per call.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Username the modern engine expects for reflector-kind relays
pub const REFLECTOR_USERNAME: &str = "reflector";

/// Reflector relay negotiated by the session layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReflectorConnection {
    /// Raw reflector id
    pub id: i64,
    /// IPv4 address, empty when absent
    pub ip: String,
    /// IPv6 address, empty when absent
    pub ipv6: String,
    /// Port
    pub port: u16,
    /// Peer tag authenticating this call on the reflector
    pub peer_tag: Bytes,
}

/// Custom web relay (STUN/TURN server with explicit credentials)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebRtcReflectorConnection {
    /// Raw relay id
    pub id: i64,
    /// Supports STUN
    pub has_stun: bool,
    /// Supports TURN
    pub has_turn: bool,
    /// IPv4 address, empty when absent
    pub ip: String,
    /// IPv6 address, empty when absent
    pub ipv6: String,
    /// Port
    pub port: u16,
    /// TURN username
    pub username: String,
    /// TURN password
    pub password: String,
}

/// Raw connection as negotiated by the session layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallSessionConnection {
    /// Reflector relay
    Reflector(ReflectorConnection),
    /// Custom web relay
    WebRtcReflector(WebRtcReflectorConnection),
}

impl CallSessionConnection {
    /// Raw reflector id, for reflector-kind connections only
    pub fn reflector_id(&self) -> Option<i64> {
        match self {
            Self::Reflector(reflector) => Some(reflector.id),
            Self::WebRtcReflector(_) => None,
        }
    }
}

/// Primary connection plus ordered alternatives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSet {
    /// Primary connection
    pub primary: CallSessionConnection,
    /// Alternative connections
    pub alternatives: Vec<CallSessionConnection>,
}

impl ConnectionSet {
    /// Primary followed by all alternatives
    pub fn all(&self) -> Vec<CallSessionConnection> {
        std::iter::once(self.primary.clone())
            .chain(self.alternatives.iter().cloned())
            .collect()
    }
}

/// Connection description for the legacy engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LegacyConnectionDescription {
    /// Raw reflector id
    pub connection_id: i64,
    /// IPv4 address
    pub ip: String,
    /// IPv6 address
    pub ipv6: String,
    /// Port
    pub port: u16,
    /// Peer tag
    pub peer_tag: Bytes,
}

/// Connection description for the modern engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModernConnectionDescription {
    /// Compact reflector id (0 for custom relays)
    pub reflector_id: u8,
    /// Supports STUN
    pub has_stun: bool,
    /// Supports TURN
    pub has_turn: bool,
    /// Supports TCP
    pub has_tcp: bool,
    /// Address (one family per description)
    pub ip: String,
    /// Port
    pub port: u16,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

/// Engine-ready connection description
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionDescriptor {
    /// Legacy engine description
    Legacy(LegacyConnectionDescription),
    /// Modern engine description
    Modern(ModernConnectionDescription),
}

/// Raw reflector id to compact 1-byte id table, valid for one construction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectorIdMapping(BTreeMap<i64, u8>);

impl ReflectorIdMapping {
    /// Build from every reflector id present in `connections`
    ///
    /// Distinct ids are sorted ascending and numbered from 1. Only 255 compact
    /// ids exist; ids past that are left unmapped.
    pub fn build(connections: &[CallSessionConnection]) -> Self {
        let mut ids: Vec<i64> = connections
            .iter()
            .filter_map(CallSessionConnection::reflector_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let mapping = ids
            .into_iter()
            .zip(1..=u8::MAX)
            .collect::<BTreeMap<i64, u8>>();
        Self(mapping)
    }

    /// Compact id for a raw reflector id
    pub fn get(&self, raw_id: i64) -> Option<u8> {
        self.0.get(&raw_id).copied()
    }

    /// Number of mapped ids
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no ids are mapped
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mapped pairs in ascending raw id order
    pub fn iter(&self) -> impl Iterator<Item = (i64, u8)> + '_ {
        self.0.iter().map(|(raw, compact)| (*raw, *compact))
    }
}

/// Legacy description of one connection; custom relays have none
pub fn legacy_connection_description(
    connection: &CallSessionConnection,
) -> Option<LegacyConnectionDescription> {
    match connection {
        CallSessionConnection::Reflector(reflector) => Some(LegacyConnectionDescription {
            connection_id: reflector.id,
            ip: reflector.ip.clone(),
            ipv6: reflector.ipv6.clone(),
            port: reflector.port,
            peer_tag: reflector.peer_tag.clone(),
        }),
        CallSessionConnection::WebRtcReflector(_) => None,
    }
}

/// Modern descriptions of one connection, one per populated address family
pub fn modern_connection_descriptions(
    connection: &CallSessionConnection,
    id_mapping: &ReflectorIdMapping,
) -> Vec<ModernConnectionDescription> {
    match connection {
        CallSessionConnection::Reflector(reflector) => {
            let Some(reflector_id) = id_mapping.get(reflector.id) else {
                return Vec::new();
            };
            let password = hex::encode(&reflector.peer_tag);
            [&reflector.ip, &reflector.ipv6]
                .into_iter()
                .filter(|address| !address.is_empty())
                .map(|address| ModernConnectionDescription {
                    reflector_id,
                    has_stun: false,
                    has_turn: true,
                    has_tcp: false,
                    ip: address.clone(),
                    port: reflector.port,
                    username: REFLECTOR_USERNAME.to_string(),
                    password: password.clone(),
                })
                .collect()
        }
        CallSessionConnection::WebRtcReflector(relay) => [&relay.ip, &relay.ipv6]
            .into_iter()
            .filter(|address| !address.is_empty())
            .map(|address| ModernConnectionDescription {
                reflector_id: 0,
                has_stun: relay.has_stun,
                has_turn: relay.has_turn,
                has_tcp: false,
                ip: address.clone(),
                port: relay.port,
                username: relay.username.clone(),
                password: relay.password.clone(),
            })
            .collect(),
    }
}

/// Legacy primary and alternatives for a connection set
///
/// Returns `None` when the primary is not a reflector; the legacy engine
/// cannot run without one.
pub fn legacy_connections(
    connections: &ConnectionSet,
) -> Option<(LegacyConnectionDescription, Vec<LegacyConnectionDescription>)> {
    let primary = legacy_connection_description(&connections.primary)?;
    let alternatives = connections
        .alternatives
        .iter()
        .filter_map(legacy_connection_description)
        .collect();
    Some((primary, alternatives))
}

/// Modern descriptions for an ordered connection list
///
/// Equal raw connections collapse to their first occurrence before mapping.
pub fn modern_connections(connections: &[CallSessionConnection]) -> Vec<ModernConnectionDescription> {
    let id_mapping = ReflectorIdMapping::build(connections);

    let mut processed: Vec<&CallSessionConnection> = Vec::with_capacity(connections.len());
    let mut result = Vec::new();
    for connection in connections {
        if processed.contains(&connection) {
            continue;
        }
        processed.push(connection);
        result.extend(modern_connection_descriptions(connection, &id_mapping));
    }
    result
}

/// Map raw connections for the selected engine generation
pub fn map_connections(
    connections: &[CallSessionConnection],
    for_modern_engine: bool,
) -> Vec<ConnectionDescriptor> {
    if for_modern_engine {
        modern_connections(connections)
            .into_iter()
            .map(ConnectionDescriptor::Modern)
            .collect()
    } else {
        connections
            .iter()
            .filter_map(legacy_connection_description)
            .map(ConnectionDescriptor::Legacy)
            .collect()
    }
}
