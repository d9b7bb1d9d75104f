//! Call context types and data structures

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session-local identifier of a call, assigned by the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSessionInternalId(pub Uuid);

impl CallSessionInternalId {
    /// Create a new random internal id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallSessionInternalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallSessionInternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side call identifier, known once the call is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId {
    /// Call id
    pub id: i64,
    /// Access hash paired with the id
    pub access_hash: i64,
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Lifecycle position of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallLifecycle {
    /// Engine is starting up
    Initializing,
    /// Media is flowing
    Connected,
    /// Connection was lost and is being re-established
    Reconnecting,
    /// Terminal failure
    Failed,
}

/// Local video state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoState {
    /// Engine has no video support
    NotAvailable,
    /// Video supported but not sending
    Inactive,
    /// Sending video
    Active,
    /// Video paused
    Paused,
}

/// Remote peer video state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteVideoState {
    /// Remote is not sending video
    Inactive,
    /// Remote is sending video
    Active,
    /// Remote paused its video
    Paused,
}

/// Remote peer microphone state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteAudioState {
    /// Remote microphone is live
    Active,
    /// Remote muted itself
    Muted,
}

/// Remote peer battery level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteBatteryLevel {
    /// Normal battery
    Normal,
    /// Remote reported low battery
    Low,
}

/// Immutable snapshot of the call, re-emitted on every engine state callback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallContextState {
    /// Lifecycle position
    pub state: CallLifecycle,
    /// Local video state
    pub video_state: VideoState,
    /// Remote video state
    pub remote_video_state: RemoteVideoState,
    /// Remote audio state
    pub remote_audio_state: RemoteAudioState,
    /// Remote battery level
    pub remote_battery_level: RemoteBatteryLevel,
    /// Aspect ratio preferred by the remote side
    pub remote_aspect_ratio: f32,
}

impl CallContextState {
    /// Snapshot for an engine generation without video support
    pub fn audio_only(state: CallLifecycle) -> Self {
        Self {
            state,
            video_state: VideoState::NotAvailable,
            remote_video_state: RemoteVideoState::Inactive,
            remote_audio_state: RemoteAudioState::Active,
            remote_battery_level: RemoteBatteryLevel::Normal,
            remote_aspect_ratio: 0.0,
        }
    }

    /// Check whether this snapshot is terminal
    pub fn is_terminal(&self) -> bool {
        self.state == CallLifecycle::Failed
    }
}

/// Kind of cellular link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellularKind {
    /// GPRS
    Gprs,
    /// EDGE
    Edge,
    /// 3G
    ThirdG,
    /// LTE
    Lte,
    /// Unknown generation
    Unknown,
}

/// Network type reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    /// No connectivity reported
    None,
    /// Wi-Fi or wired
    Wifi,
    /// Cellular link
    Cellular(CellularKind),
}

impl Default for NetworkType {
    fn default() -> Self {
        Self::Wifi
    }
}

/// Data-saving policy selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSaving {
    /// Never reduce bitrate
    Never,
    /// Reduce bitrate on cellular
    Cellular,
    /// Always reduce bitrate
    Always,
}

impl Default for DataSaving {
    fn default() -> Self {
        Self::Never
    }
}

/// How a proxy is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyConnection {
    /// SOCKS5 proxy with optional credentials
    Socks5 {
        /// Username
        username: Option<String>,
        /// Password
        password: Option<String>,
    },
    /// MTProto proxy; not usable for calls
    Mtp {
        /// Proxy secret
        secret: Bytes,
    },
}

/// Proxy configured for the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyServerSettings {
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Connection kind
    pub connection: ProxyConnection,
}

/// Proxy in the form the engine accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoipProxyServer {
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
}

impl VoipProxyServer {
    /// Convert account proxy settings; only SOCKS5 proxies carry calls
    pub fn from_settings(settings: &ProxyServerSettings) -> Option<Self> {
        match &settings.connection {
            ProxyConnection::Socks5 { username, password } => Some(Self {
                host: settings.host.clone(),
                port: settings.port,
                username: username.clone(),
                password: password.clone(),
            }),
            ProxyConnection::Mtp { .. } => None,
        }
    }
}

/// Opaque engine state persisted between calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedState(pub Bytes);

impl DerivedState {
    /// Wrap raw bytes
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// Raw bytes
    pub fn data(&self) -> &Bytes {
        &self.0
    }
}

/// Incoming/outgoing byte pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionUsage {
    /// Bytes received
    pub incoming: i64,
    /// Bytes sent
    pub outgoing: i64,
}

/// Network usage produced by one call, split by link type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkUsageDelta {
    /// Cellular traffic
    pub cellular: DirectionUsage,
    /// Wi-Fi traffic
    pub wifi: DirectionUsage,
}

/// Call type as reported to the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallType {
    /// Voice call
    Audio,
    /// Video call
    Video,
}

/// Rotation of an incoming video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoOrientation {
    /// Upright
    Rotation0,
    /// 90 degrees
    Rotation90,
    /// 180 degrees
    Rotation180,
    /// 270 degrees
    Rotation270,
}

impl VideoOrientation {
    /// Decode the engine's raw orientation value
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => Self::Rotation90,
            2 => Self::Rotation180,
            3 => Self::Rotation270,
            _ => Self::Rotation0,
        }
    }
}

/// Version and free-form diagnostic text sampled from the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// Engine version string
    pub version: String,
    /// Engine diagnostic text
    pub info: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_id() {
        let id1 = CallSessionInternalId::new();
        let id2 = CallSessionInternalId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_audio_only_snapshot() {
        let state = CallContextState::audio_only(CallLifecycle::Connected);
        assert_eq!(state.video_state, VideoState::NotAvailable);
        assert_eq!(state.remote_video_state, RemoteVideoState::Inactive);
        assert_eq!(state.remote_audio_state, RemoteAudioState::Active);
        assert_eq!(state.remote_battery_level, RemoteBatteryLevel::Normal);
        assert_eq!(state.remote_aspect_ratio, 0.0);
        assert!(!state.is_terminal());
        assert!(CallContextState::audio_only(CallLifecycle::Failed).is_terminal());
    }

    #[test]
    fn test_proxy_only_socks5() {
        let socks = ProxyServerSettings {
            host: "proxy.local".to_string(),
            port: 1080,
            connection: ProxyConnection::Socks5 {
                username: Some("u".to_string()),
                password: None,
            },
        };
        let voip = VoipProxyServer::from_settings(&socks);
        assert_eq!(
            voip,
            Some(VoipProxyServer {
                host: "proxy.local".to_string(),
                port: 1080,
                username: Some("u".to_string()),
                password: None,
            })
        );

        let mtp = ProxyServerSettings {
            host: "proxy.local".to_string(),
            port: 443,
            connection: ProxyConnection::Mtp {
                secret: Bytes::from_static(b"secret"),
            },
        };
        assert_eq!(VoipProxyServer::from_settings(&mtp), None);
    }

    #[test]
    fn test_video_orientation_from_raw() {
        assert_eq!(VideoOrientation::from_raw(0), VideoOrientation::Rotation0);
        assert_eq!(VideoOrientation::from_raw(1), VideoOrientation::Rotation90);
        assert_eq!(VideoOrientation::from_raw(3), VideoOrientation::Rotation270);
        assert_eq!(VideoOrientation::from_raw(42), VideoOrientation::Rotation0);
    }
}
