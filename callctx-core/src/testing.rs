//! Scripted in-process engine
//!
//! Stands in for the native engine in tests and in the CLI simulator. Every
//! call is recorded, callbacks are driven through the captured
//! [`EngineEventSink`], and each engine counts its own release on drop.

use crate::engine::{
    CallEngine, EngineEventSink, EngineFactory, EngineNetworkType, IncomingVideoView,
    LegacyEngineConfig, ModernEngine, ModernEngineConfig, NativeStopOutcome, StopCompletion,
    VideoCapturer, VideoSource, VideoViewCompletion,
};
use crate::types::{DerivedState, VideoOrientation};
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Engine generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Legacy engine
    Legacy,
    /// Modern engine
    Modern,
}

/// Call recorded by a scripted engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// `set_network_type`
    SetNetworkType(EngineNetworkType),
    /// `set_is_muted`
    SetMuted(bool),
    /// `switch_audio_output`
    SwitchAudioOutput(String),
    /// `switch_audio_input`
    SwitchAudioInput(String),
    /// `stop`
    Stop,
    /// `set_is_low_battery_level`
    SetLowBatteryLevel(bool),
    /// `request_video`
    RequestVideo(Option<String>),
    /// `set_requested_video_aspect`
    SetRequestedVideoAspect(f32),
    /// `disable_video`
    DisableVideo,
    /// `begin_termination`
    BeginTermination,
    /// `add_signaling_data`
    AddSignalingData(Bytes),
    /// `make_incoming_video_view`
    MakeIncomingVideoView,
}

/// Behaviour of scripted engines
#[derive(Debug, Clone)]
pub struct EngineScript {
    /// Version reported by the legacy engine
    pub legacy_version: String,
    /// Versions the modern engine speaks
    pub modern_versions: Vec<String>,
    /// Reference implementation versions
    pub reference_versions: Vec<String>,
    /// Maximum protocol layer
    pub max_layer: i32,
    /// Counters reported on stop
    pub stop_outcome: NativeStopOutcome,
    /// Complete stops immediately; otherwise they wait for
    /// [`ScriptedEngineFactory::take_pending_stop`]
    pub complete_stop: bool,
    /// Derived state returned after the call
    pub derived_state: DerivedState,
    /// Written to the debug log path on stop
    pub log_contents: String,
    /// Written to the stats path on stop
    pub stats_contents: String,
    /// Returned by `debug_info`
    pub debug_info: String,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            legacy_version: "2.4.4".to_string(),
            modern_versions: vec!["2.7.7".to_string(), "5.0.0".to_string()],
            reference_versions: vec!["4.0.2".to_string()],
            max_layer: 92,
            stop_outcome: NativeStopOutcome {
                debug_log: Some("engine stopped".to_string()),
                bytes_sent_wifi: 1_000,
                bytes_received_wifi: 2_000,
                bytes_sent_mobile: 30,
                bytes_received_mobile: 40,
            },
            complete_stop: true,
            derived_state: DerivedState::new(Bytes::from_static(b"derived")),
            log_contents: "call log".to_string(),
            stats_contents: r#"{"rtt":42}"#.to_string(),
            debug_info: "jitter=3ms".to_string(),
        }
    }
}

#[derive(Default)]
struct Probe {
    legacy_configs: Vec<LegacyEngineConfig>,
    modern_configs: Vec<ModernEngineConfig>,
    server_configs: Vec<(EngineKind, Option<String>)>,
    sink: Option<EngineEventSink>,
    calls: Vec<EngineCall>,
    releases: usize,
    pending_stop: Option<StopCompletion>,
}

/// Factory producing scripted engines and recording what they saw
#[derive(Clone, Default)]
pub struct ScriptedEngineFactory {
    probe: Arc<Mutex<Probe>>,
    script: Arc<EngineScript>,
}

impl ScriptedEngineFactory {
    /// Factory with the default script
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with a custom script
    pub fn with_script(script: EngineScript) -> Self {
        Self {
            probe: Arc::default(),
            script: Arc::new(script),
        }
    }

    /// Script in use
    pub fn script(&self) -> &EngineScript {
        &self.script
    }

    /// Configs of legacy engines built so far
    pub fn legacy_configs(&self) -> Vec<LegacyEngineConfig> {
        self.probe.lock().legacy_configs.clone()
    }

    /// Configs of modern engines built so far
    pub fn modern_configs(&self) -> Vec<ModernEngineConfig> {
        self.probe.lock().modern_configs.clone()
    }

    /// Server configs applied, in order
    pub fn server_configs(&self) -> Vec<(EngineKind, Option<String>)> {
        self.probe.lock().server_configs.clone()
    }

    /// Event sink of the last engine built
    pub fn sink(&self) -> Option<EngineEventSink> {
        self.probe.lock().sink.clone()
    }

    /// Calls recorded across engines
    pub fn calls(&self) -> Vec<EngineCall> {
        self.probe.lock().calls.clone()
    }

    /// Number of engines released
    pub fn releases(&self) -> usize {
        self.probe.lock().releases
    }

    /// Stop completion held back when `complete_stop` is off
    pub fn take_pending_stop(&self) -> Option<StopCompletion> {
        self.probe.lock().pending_stop.take()
    }

    fn engine(&self, kind: EngineKind, log_path: Option<PathBuf>, stats_path: Option<PathBuf>) -> ScriptedEngine {
        ScriptedEngine {
            kind,
            probe: Arc::clone(&self.probe),
            script: Arc::clone(&self.script),
            log_path,
            stats_path,
        }
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn legacy_version(&self) -> String {
        self.script.legacy_version.clone()
    }

    fn modern_versions(&self, include_reference: bool) -> Vec<String> {
        let mut versions = self.script.modern_versions.clone();
        if include_reference {
            versions.extend(self.script.reference_versions.iter().cloned());
        }
        versions
    }

    fn max_layer(&self) -> i32 {
        self.script.max_layer
    }

    fn apply_legacy_server_config(&self, serialized: Option<&str>) {
        self.probe
            .lock()
            .server_configs
            .push((EngineKind::Legacy, serialized.map(str::to_string)));
    }

    fn apply_modern_server_config(&self, serialized: Option<&str>) {
        self.probe
            .lock()
            .server_configs
            .push((EngineKind::Modern, serialized.map(str::to_string)));
    }

    fn create_legacy(&self, config: LegacyEngineConfig, events: EngineEventSink) -> Box<dyn CallEngine> {
        let log_path = config.log_path.clone();
        {
            let mut probe = self.probe.lock();
            probe.legacy_configs.push(config);
            probe.sink = Some(events);
        }
        Box::new(self.engine(EngineKind::Legacy, log_path, None))
    }

    fn create_modern(&self, config: ModernEngineConfig, events: EngineEventSink) -> Box<dyn ModernEngine> {
        let log_path = Some(config.log_path.clone());
        let stats_path = Some(config.stats_log_path.clone());
        {
            let mut probe = self.probe.lock();
            probe.modern_configs.push(config);
            probe.sink = Some(events);
        }
        Box::new(self.engine(EngineKind::Modern, log_path, stats_path))
    }
}

/// Engine recording into its factory's probe
pub struct ScriptedEngine {
    kind: EngineKind,
    probe: Arc<Mutex<Probe>>,
    script: Arc<EngineScript>,
    log_path: Option<PathBuf>,
    stats_path: Option<PathBuf>,
}

impl ScriptedEngine {
    fn record(&self, call: EngineCall) {
        self.probe.lock().calls.push(call);
    }
}

impl CallEngine for ScriptedEngine {
    fn set_network_type(&mut self, network_type: EngineNetworkType) {
        self.record(EngineCall::SetNetworkType(network_type));
    }

    fn set_is_muted(&mut self, muted: bool) {
        self.record(EngineCall::SetMuted(muted));
    }

    fn switch_audio_output(&mut self, device_id: &str) {
        self.record(EngineCall::SwitchAudioOutput(device_id.to_string()));
    }

    fn switch_audio_input(&mut self, device_id: &str) {
        self.record(EngineCall::SwitchAudioInput(device_id.to_string()));
    }

    fn stop(&mut self, completion: StopCompletion) {
        self.record(EngineCall::Stop);
        if let Some(path) = &self.log_path {
            let _ = std::fs::write(path, &self.script.log_contents);
        }
        if let Some(path) = &self.stats_path {
            let _ = std::fs::write(path, &self.script.stats_contents);
        }
        if self.script.complete_stop {
            completion.complete(self.script.stop_outcome.clone());
        } else {
            self.probe.lock().pending_stop = Some(completion);
        }
    }

    fn debug_info(&self) -> String {
        self.script.debug_info.clone()
    }

    fn version(&self) -> String {
        match self.kind {
            EngineKind::Legacy => self.script.legacy_version.clone(),
            EngineKind::Modern => self
                .script
                .modern_versions
                .last()
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn derived_state(&self) -> DerivedState {
        self.script.derived_state.clone()
    }
}

impl ModernEngine for ScriptedEngine {
    fn set_is_low_battery_level(&mut self, low: bool) {
        self.record(EngineCall::SetLowBatteryLevel(low));
    }

    fn request_video(&mut self, capturer: VideoCapturer) {
        self.record(EngineCall::RequestVideo(capturer.device_id()));
    }

    fn set_requested_video_aspect(&mut self, aspect: f32) {
        self.record(EngineCall::SetRequestedVideoAspect(aspect));
    }

    fn disable_video(&mut self) {
        self.record(EngineCall::DisableVideo);
    }

    fn begin_termination(&mut self) {
        self.record(EngineCall::BeginTermination);
    }

    fn add_signaling_data(&mut self, data: Bytes) {
        self.record(EngineCall::AddSignalingData(data));
    }

    fn make_incoming_video_view(&mut self, completion: VideoViewCompletion) {
        self.record(EngineCall::MakeIncomingVideoView);
        completion(Some(Box::new(ScriptedVideoView::default())));
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.probe.lock().releases += 1;
    }
}

/// Remote video surface with fixed geometry
#[derive(Debug, Default)]
pub struct ScriptedVideoView {
    paused: bool,
}

impl ScriptedVideoView {
    /// Check whether rendering is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl IncomingVideoView for ScriptedVideoView {
    fn orientation(&self) -> VideoOrientation {
        VideoOrientation::Rotation0
    }

    fn aspect(&self) -> f32 {
        16.0 / 9.0
    }

    fn set_is_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

/// Camera stand-in
#[derive(Debug, Clone, Default)]
pub struct ScriptedCapturer {
    /// Device id
    pub device_id: Option<String>,
}

impl VideoSource for ScriptedCapturer {
    fn device_id(&self) -> Option<String> {
        self.device_id.clone()
    }
}
