//! Native real-time engine capability
//!
//! The media engine itself is an external library shipped in two
//! generations. This module describes what the call context needs from it:
//! a common [`CallEngine`] surface, the modern-only [`ModernEngine`]
//! extensions, and an [`EngineFactory`] that builds either one.
//!
//! Engines report back through an [`EngineEventSink`]. The sink never runs
//! context code on the engine's thread; it posts a message to the context
//! queue and returns. A failed post means the context is gone and the event
//! is dropped.

use crate::connection::{LegacyConnectionDescription, ModernConnectionDescription};
use crate::context::Message;
use crate::types::{
    CallContextState, CallLifecycle, CellularKind, DataSaving, DerivedState, DirectionUsage,
    NetworkType, NetworkUsageDelta, RemoteAudioState, RemoteBatteryLevel, RemoteVideoState,
    VideoOrientation, VideoState, VoipProxyServer,
};
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Engine lifecycle state as reported natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Starting up
    Initializing,
    /// Connected
    Connected,
    /// Failed
    Failed,
    /// Reconnecting
    Reconnecting,
}

impl EngineState {
    /// Decode a raw native value; unknown values are treated as failure
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Failed,
        }
    }
}

impl From<EngineState> for CallLifecycle {
    fn from(state: EngineState) -> Self {
        match state {
            EngineState::Initializing => Self::Initializing,
            EngineState::Connected => Self::Connected,
            EngineState::Failed => Self::Failed,
            EngineState::Reconnecting => Self::Reconnecting,
        }
    }
}

/// Native local video state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineVideoState {
    /// Not sending
    Inactive,
    /// Sending
    Active,
    /// Paused
    Paused,
}

impl EngineVideoState {
    /// Decode a raw native value
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Inactive),
            1 => Some(Self::Active),
            2 => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Native remote video state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineRemoteVideoState {
    /// Not receiving
    Inactive,
    /// Receiving
    Active,
    /// Paused
    Paused,
}

impl EngineRemoteVideoState {
    /// Decode a raw native value
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Inactive),
            1 => Some(Self::Active),
            2 => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Native remote audio state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineRemoteAudioState {
    /// Remote microphone live
    Active,
    /// Remote muted
    Muted,
}

impl EngineRemoteAudioState {
    /// Decode a raw native value
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Active),
            1 => Some(Self::Muted),
            _ => None,
        }
    }
}

/// Native remote battery level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineBatteryLevel {
    /// Normal
    Normal,
    /// Low
    Low,
}

impl EngineBatteryLevel {
    /// Decode a raw native value
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Low),
            _ => None,
        }
    }
}

/// State callback payload of the modern engine
///
/// `None` fields carry values the native side reported but this build does
/// not recognise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModernStateUpdate {
    /// Lifecycle
    pub state: EngineState,
    /// Local video
    pub video_state: Option<EngineVideoState>,
    /// Remote video
    pub remote_video_state: Option<EngineRemoteVideoState>,
    /// Remote audio
    pub remote_audio_state: Option<EngineRemoteAudioState>,
    /// Remote battery
    pub remote_battery_level: Option<EngineBatteryLevel>,
    /// Remote preferred aspect ratio
    pub remote_aspect_ratio: f32,
}

impl ModernStateUpdate {
    /// Decode raw native values
    pub fn from_raw(
        state: i32,
        video_state: i32,
        remote_video_state: i32,
        remote_audio_state: i32,
        remote_battery_level: i32,
        remote_aspect_ratio: f32,
    ) -> Self {
        Self {
            state: EngineState::from_raw(state),
            video_state: EngineVideoState::from_raw(video_state),
            remote_video_state: EngineRemoteVideoState::from_raw(remote_video_state),
            remote_audio_state: EngineRemoteAudioState::from_raw(remote_audio_state),
            remote_battery_level: EngineBatteryLevel::from_raw(remote_battery_level),
            remote_aspect_ratio,
        }
    }

    /// Snapshot exposed to observers
    pub fn to_context_state(&self) -> CallContextState {
        let video_state = match self.video_state {
            Some(EngineVideoState::Inactive) => VideoState::Inactive,
            Some(EngineVideoState::Active) => VideoState::Active,
            Some(EngineVideoState::Paused) => VideoState::Paused,
            None => VideoState::NotAvailable,
        };
        let remote_video_state = match self.remote_video_state {
            Some(EngineRemoteVideoState::Active) => RemoteVideoState::Active,
            Some(EngineRemoteVideoState::Paused) => RemoteVideoState::Paused,
            Some(EngineRemoteVideoState::Inactive) | None => RemoteVideoState::Inactive,
        };
        let remote_audio_state = match self.remote_audio_state {
            Some(EngineRemoteAudioState::Muted) => RemoteAudioState::Muted,
            Some(EngineRemoteAudioState::Active) | None => RemoteAudioState::Active,
        };
        let remote_battery_level = match self.remote_battery_level {
            Some(EngineBatteryLevel::Low) => RemoteBatteryLevel::Low,
            Some(EngineBatteryLevel::Normal) | None => RemoteBatteryLevel::Normal,
        };
        CallContextState {
            state: self.state.into(),
            video_state,
            remote_video_state,
            remote_audio_state,
            remote_battery_level,
            remote_aspect_ratio: self.remote_aspect_ratio,
        }
    }
}

/// Network type in engine terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineNetworkType {
    /// Wi-Fi
    Wifi,
    /// GPRS
    CellularGprs,
    /// EDGE
    CellularEdge,
    /// 3G
    Cellular3g,
    /// LTE
    CellularLte,
}

impl From<NetworkType> for EngineNetworkType {
    fn from(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::None | NetworkType::Wifi => Self::Wifi,
            NetworkType::Cellular(CellularKind::Gprs) => Self::CellularGprs,
            NetworkType::Cellular(CellularKind::Edge) => Self::CellularEdge,
            NetworkType::Cellular(CellularKind::ThirdG | CellularKind::Unknown) => Self::Cellular3g,
            NetworkType::Cellular(CellularKind::Lte) => Self::CellularLte,
        }
    }
}

/// Callback from the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Legacy engine lifecycle change
    LegacyStateChanged(EngineState),
    /// Modern engine state change
    StateChanged(ModernStateUpdate),
    /// Signal quality, 0..=4
    SignalBarsChanged(i32),
    /// Output audio level, 0.0..=1.0
    AudioLevelUpdated(f32),
    /// Outbound signaling payload for the remote peer
    SendSignalingData(Bytes),
}

/// Where an engine delivers its callbacks
///
/// Cheap to clone and safe to call from any thread.
#[derive(Clone)]
pub struct EngineEventSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl EngineEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Post an event; returns false when the context is gone
    pub fn post(&self, event: EngineEvent) -> bool {
        self.tx.send(Message::Engine(event)).is_ok()
    }

    /// Legacy lifecycle change
    pub fn legacy_state_changed(&self, state: EngineState) -> bool {
        self.post(EngineEvent::LegacyStateChanged(state))
    }

    /// Modern state change
    pub fn state_changed(&self, update: ModernStateUpdate) -> bool {
        self.post(EngineEvent::StateChanged(update))
    }

    /// Signal bars change
    pub fn signal_bars_changed(&self, bars: i32) -> bool {
        self.post(EngineEvent::SignalBarsChanged(bars))
    }

    /// Audio level update
    pub fn audio_level_updated(&self, level: f32) -> bool {
        self.post(EngineEvent::AudioLevelUpdated(level))
    }

    /// Outbound signaling request
    pub fn send_signaling_data(&self, data: Bytes) -> bool {
        self.post(EngineEvent::SendSignalingData(data))
    }
}

impl fmt::Debug for EngineEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Final counters reported by a native stop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeStopOutcome {
    /// Debug log text, if the engine kept one in memory
    pub debug_log: Option<String>,
    /// Bytes sent over Wi-Fi
    pub bytes_sent_wifi: i64,
    /// Bytes received over Wi-Fi
    pub bytes_received_wifi: i64,
    /// Bytes sent over cellular
    pub bytes_sent_mobile: i64,
    /// Bytes received over cellular
    pub bytes_received_mobile: i64,
}

impl NativeStopOutcome {
    /// Usage delta for network statistics
    pub fn usage_delta(&self) -> NetworkUsageDelta {
        NetworkUsageDelta {
            cellular: DirectionUsage {
                incoming: self.bytes_received_mobile,
                outgoing: self.bytes_sent_mobile,
            },
            wifi: DirectionUsage {
                incoming: self.bytes_received_wifi,
                outgoing: self.bytes_sent_wifi,
            },
        }
    }
}

/// One-shot completion handed to [`CallEngine::stop`]
///
/// May be completed from any thread. Dropping it without completing leaves
/// the stop pending.
pub struct StopCompletion {
    tx: mpsc::UnboundedSender<Message>,
}

impl StopCompletion {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Report the native stop result
    pub fn complete(self, outcome: NativeStopOutcome) {
        if self.tx.send(Message::StopCompleted(outcome)).is_err() {
            tracing::debug!("Stop completed after the call context was gone");
        }
    }
}

impl fmt::Debug for StopCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCompletion").finish_non_exhaustive()
    }
}

/// Video source handed to the modern engine
pub trait VideoSource: Send + Sync + fmt::Debug {
    /// Capture device id, if bound to one
    fn device_id(&self) -> Option<String>;
}

/// Shared video capturer
pub type VideoCapturer = Arc<dyn VideoSource>;

/// Platform surface rendering the remote video
pub trait IncomingVideoView: Send {
    /// Current frame rotation
    fn orientation(&self) -> VideoOrientation;
    /// Current frame aspect ratio
    fn aspect(&self) -> f32;
    /// Pause or resume rendering
    fn set_is_paused(&mut self, paused: bool);
}

/// Completion for incoming video view creation
pub type VideoViewCompletion = Box<dyn FnOnce(Option<Box<dyn IncomingVideoView>>) + Send>;

/// Operations both engine generations support
pub trait CallEngine: Send {
    /// Update the network type
    fn set_network_type(&mut self, network_type: EngineNetworkType);
    /// Mute or unmute the microphone
    fn set_is_muted(&mut self, muted: bool);
    /// Switch the output device
    fn switch_audio_output(&mut self, device_id: &str);
    /// Switch the input device
    fn switch_audio_input(&mut self, device_id: &str);
    /// Begin native teardown; `completion` fires once, on any thread
    fn stop(&mut self, completion: StopCompletion);
    /// Free-form diagnostics
    fn debug_info(&self) -> String;
    /// Engine version string
    fn version(&self) -> String;
    /// State to persist for the next call
    fn derived_state(&self) -> DerivedState;
}

/// Operations only the modern engine supports
pub trait ModernEngine: CallEngine {
    /// Report local battery level
    fn set_is_low_battery_level(&mut self, low: bool);
    /// Start sending video from `capturer`
    fn request_video(&mut self, capturer: VideoCapturer);
    /// Preferred aspect ratio for outgoing video
    fn set_requested_video_aspect(&mut self, aspect: f32);
    /// Stop sending video
    fn disable_video(&mut self);
    /// Notify that teardown is imminent
    fn begin_termination(&mut self);
    /// Inbound signaling payload from the remote peer
    fn add_signaling_data(&mut self, data: Bytes);
    /// Build a surface for the remote video
    fn make_incoming_video_view(&mut self, completion: VideoViewCompletion);
}

/// Arguments for building a legacy engine
#[derive(Debug, Clone)]
pub struct LegacyEngineConfig {
    /// SOCKS5 proxy
    pub proxy: Option<VoipProxyServer>,
    /// Initial network type
    pub network_type: EngineNetworkType,
    /// Data-saving policy
    pub data_saving: DataSaving,
    /// Derived state from the previous call
    pub derived_state: DerivedState,
    /// Call key material
    pub key: Bytes,
    /// Outgoing call
    pub is_outgoing: bool,
    /// Primary reflector
    pub primary_connection: LegacyConnectionDescription,
    /// Alternative reflectors
    pub alternative_connections: Vec<LegacyConnectionDescription>,
    /// Maximum protocol layer
    pub max_layer: i32,
    /// Peer-to-peer allowed
    pub allow_p2p: bool,
    /// Permanent log path; the legacy engine writes it directly
    pub log_path: Option<PathBuf>,
}

/// Arguments for building a modern engine
#[derive(Debug, Clone)]
pub struct ModernEngineConfig {
    /// Negotiated version
    pub version: String,
    /// SOCKS5 proxy
    pub proxy: Option<VoipProxyServer>,
    /// Initial network type
    pub network_type: EngineNetworkType,
    /// Data-saving policy
    pub data_saving: DataSaving,
    /// Derived state from the previous call
    pub derived_state: DerivedState,
    /// Call key material
    pub key: Bytes,
    /// Outgoing call
    pub is_outgoing: bool,
    /// Relay candidates
    pub connections: Vec<ModernConnectionDescription>,
    /// Maximum protocol layer
    pub max_layer: i32,
    /// Peer-to-peer allowed
    pub allow_p2p: bool,
    /// TCP allowed
    pub allow_tcp: bool,
    /// STUN marking enabled
    pub enable_stun_marking: bool,
    /// Temp debug log path
    pub log_path: PathBuf,
    /// Temp stats log path
    pub stats_log_path: PathBuf,
    /// Initial video source
    pub video_capturer: Option<VideoCapturer>,
    /// Preferred video codec
    pub preferred_video_codec: Option<String>,
    /// Audio input device id, empty for default
    pub input_device_id: String,
    /// Audio output device id, empty for default
    pub output_device_id: String,
}

/// Builds engines of either generation
pub trait EngineFactory: Send + Sync {
    /// Version string the legacy engine reports
    fn legacy_version(&self) -> String;
    /// Versions the modern engine can speak
    fn modern_versions(&self, include_reference: bool) -> Vec<String>;
    /// Maximum protocol layer
    fn max_layer(&self) -> i32;
    /// Apply serialized server config to the legacy engine
    fn apply_legacy_server_config(&self, serialized: Option<&str>);
    /// Apply serialized server config to the modern engine
    fn apply_modern_server_config(&self, serialized: Option<&str>);
    /// Build a legacy engine
    fn create_legacy(&self, config: LegacyEngineConfig, events: EngineEventSink) -> Box<dyn CallEngine>;
    /// Build a modern engine
    fn create_modern(&self, config: ModernEngineConfig, events: EngineEventSink)
        -> Box<dyn ModernEngine>;
}

/// Engine selected for a call; never switches variant
pub(crate) enum EngineHandle {
    Legacy(Box<dyn CallEngine>),
    Modern(Box<dyn ModernEngine>),
}

/// Call a [`CallEngine`] method on whichever variant is held
macro_rules! dispatch {
    ($handle:expr, $engine:ident => $call:expr) => {
        match $handle {
            EngineHandle::Legacy($engine) => $call,
            EngineHandle::Modern($engine) => $call,
        }
    };
}

impl EngineHandle {
    fn modern(&mut self) -> Option<&mut dyn ModernEngine> {
        match self {
            Self::Legacy(_) => None,
            Self::Modern(engine) => Some(engine.as_mut()),
        }
    }

    pub(crate) fn is_modern(&self) -> bool {
        matches!(self, Self::Modern(_))
    }

    pub(crate) fn set_network_type(&mut self, network_type: NetworkType) {
        dispatch!(self, engine => engine.set_network_type(network_type.into()))
    }

    pub(crate) fn set_is_muted(&mut self, muted: bool) {
        dispatch!(self, engine => engine.set_is_muted(muted))
    }

    pub(crate) fn switch_audio_output(&mut self, device_id: &str) {
        dispatch!(self, engine => engine.switch_audio_output(device_id))
    }

    pub(crate) fn switch_audio_input(&mut self, device_id: &str) {
        dispatch!(self, engine => engine.switch_audio_input(device_id))
    }

    pub(crate) fn stop(&mut self, completion: StopCompletion) {
        dispatch!(self, engine => engine.stop(completion))
    }

    pub(crate) fn debug_info(&self) -> String {
        dispatch!(self, engine => engine.debug_info())
    }

    pub(crate) fn version(&self) -> String {
        dispatch!(self, engine => engine.version())
    }

    pub(crate) fn derived_state(&self) -> DerivedState {
        dispatch!(self, engine => engine.derived_state())
    }

    pub(crate) fn set_is_low_battery_level(&mut self, low: bool) {
        if let Some(engine) = self.modern() {
            engine.set_is_low_battery_level(low);
        }
    }

    pub(crate) fn request_video(&mut self, capturer: VideoCapturer) {
        if let Some(engine) = self.modern() {
            engine.request_video(capturer);
        }
    }

    pub(crate) fn set_requested_video_aspect(&mut self, aspect: f32) {
        if let Some(engine) = self.modern() {
            engine.set_requested_video_aspect(aspect);
        }
    }

    pub(crate) fn disable_video(&mut self) {
        if let Some(engine) = self.modern() {
            engine.disable_video();
        }
    }

    pub(crate) fn begin_termination(&mut self) {
        if let Some(engine) = self.modern() {
            engine.begin_termination();
        }
    }

    pub(crate) fn add_signaling_data(&mut self, data: Vec<Bytes>) {
        if let Some(engine) = self.modern() {
            for payload in data {
                engine.add_signaling_data(payload);
            }
        }
    }

    pub(crate) fn make_incoming_video_view(&mut self, completion: VideoViewCompletion) {
        match self.modern() {
            Some(engine) => engine.make_incoming_video_view(completion),
            None => completion(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_from_raw() {
        assert_eq!(EngineState::from_raw(0), EngineState::Initializing);
        assert_eq!(EngineState::from_raw(1), EngineState::Connected);
        assert_eq!(EngineState::from_raw(2), EngineState::Failed);
        assert_eq!(EngineState::from_raw(3), EngineState::Reconnecting);
        assert_eq!(EngineState::from_raw(99), EngineState::Failed);
    }

    #[test]
    fn test_unknown_modern_values_fall_back() {
        let update = ModernStateUpdate::from_raw(1, 7, 7, 7, 7, 1.5);
        let state = update.to_context_state();
        assert_eq!(state.state, CallLifecycle::Connected);
        assert_eq!(state.video_state, VideoState::NotAvailable);
        assert_eq!(state.remote_video_state, RemoteVideoState::Inactive);
        assert_eq!(state.remote_audio_state, RemoteAudioState::Active);
        assert_eq!(state.remote_battery_level, RemoteBatteryLevel::Normal);
        assert_eq!(state.remote_aspect_ratio, 1.5);
    }

    #[test]
    fn test_known_modern_values_map() {
        let update = ModernStateUpdate::from_raw(3, 1, 2, 1, 1, 0.75);
        let state = update.to_context_state();
        assert_eq!(state.state, CallLifecycle::Reconnecting);
        assert_eq!(state.video_state, VideoState::Active);
        assert_eq!(state.remote_video_state, RemoteVideoState::Paused);
        assert_eq!(state.remote_audio_state, RemoteAudioState::Muted);
        assert_eq!(state.remote_battery_level, RemoteBatteryLevel::Low);
    }

    #[test]
    fn test_network_type_mapping() {
        assert_eq!(EngineNetworkType::from(NetworkType::None), EngineNetworkType::Wifi);
        assert_eq!(EngineNetworkType::from(NetworkType::Wifi), EngineNetworkType::Wifi);
        assert_eq!(
            EngineNetworkType::from(NetworkType::Cellular(CellularKind::Lte)),
            EngineNetworkType::CellularLte
        );
        assert_eq!(
            EngineNetworkType::from(NetworkType::Cellular(CellularKind::Unknown)),
            EngineNetworkType::Cellular3g
        );
    }

    #[test]
    fn test_usage_delta() {
        let outcome = NativeStopOutcome {
            debug_log: None,
            bytes_sent_wifi: 1,
            bytes_received_wifi: 2,
            bytes_sent_mobile: 3,
            bytes_received_mobile: 4,
        };
        let delta = outcome.usage_delta();
        assert_eq!(delta.wifi, DirectionUsage { incoming: 2, outgoing: 1 });
        assert_eq!(delta.cellular, DirectionUsage { incoming: 4, outgoing: 3 });
    }

    #[test]
    fn test_sink_reports_closed_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::new(tx);
        assert!(sink.signal_bars_changed(3));
        drop(rx);
        assert!(!sink.audio_level_updated(0.5));
    }
}
