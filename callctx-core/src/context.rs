//! Ongoing call context
//!
//! A [`CallContext`] owns one native engine for the duration of a call. All
//! engine access happens on a dedicated queue: a tokio task that drains an
//! unbounded channel of [`Message`]s. Public methods and native callbacks only
//! post to that channel, so they never block and never touch the engine
//! directly.
//!
//! The engine is released exactly once: after a stop completes, or when the
//! context is dropped without a stop.

use crate::account::CallAccount;
use crate::config::CallContextConfig;
use crate::connection::{legacy_connections, modern_connections, ConnectionSet};
use crate::engine::{
    EngineEvent, EngineEventSink, EngineFactory, EngineHandle, IncomingVideoView,
    LegacyEngineConfig, ModernEngineConfig, NativeStopOutcome, StopCompletion, VideoCapturer,
    VideoViewCompletion,
};
use crate::error::CallContextError;
use crate::logs::{CallLogs, TempLogFiles};
use crate::relay::{CallSessionRelay, Subscription};
use crate::types::{
    CallContextState, CallId, CallSessionInternalId, CallType, DataSaving, DebugInfo,
    DerivedState, NetworkType, NetworkUsageDelta, ProxyServerSettings, VideoState,
    VoipProxyServer,
};
use crate::version::{self, select_engine, SupportedVersion};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

/// Reception reported by a modern engine before its first signal update
const INITIAL_MODERN_RECEPTION: i32 = 4;

/// Work item for the context queue
pub(crate) enum Message {
    Engine(EngineEvent),
    NetworkType(NetworkType),
    Intent(Intent),
    SignalingData(Vec<Bytes>),
    DebugInfo(oneshot::Sender<Option<DebugInfo>>),
    IncomingVideoView(VideoViewCompletion),
    Stop(StopRequest),
    StopCompleted(NativeStopOutcome),
    Release,
}

#[derive(Debug)]
pub(crate) enum Intent {
    SetMuted(bool),
    SetLowBatteryLevel(bool),
    RequestVideo(VideoCapturer),
    SetRequestedVideoAspect(f32),
    DisableVideo,
    SwitchAudioOutput(String),
    SwitchAudioInput(String),
    BeginTermination,
}

pub(crate) struct StopRequest {
    call_id: Option<CallId>,
    send_debug_logs: bool,
    debug_log: oneshot::Sender<Option<String>>,
    finished: oneshot::Sender<TeardownReport>,
}

/// Services a call context is wired to
#[derive(Clone)]
pub struct CallCollaborators {
    /// Account owning the call
    pub account: Arc<dyn CallAccount>,
    /// Session-layer signaling relay
    pub relay: Arc<dyn CallSessionRelay>,
    /// Native engine factory
    pub engines: Arc<dyn EngineFactory>,
}

/// Negotiated parameters of one call
#[derive(Debug, Clone)]
pub struct CallContextParams {
    /// Session-local call id
    pub internal_id: CallSessionInternalId,
    /// Account proxy, if any
    pub proxy_server: Option<ProxyServerSettings>,
    /// Network type at call start
    pub initial_network_type: NetworkType,
    /// Serialized server config for both engines
    pub serialized_server_config: Option<String>,
    /// Data-saving policy
    pub data_saving: DataSaving,
    /// Derived state from the previous call
    pub derived_state: DerivedState,
    /// Call key material
    pub key: Bytes,
    /// Outgoing call
    pub is_outgoing: bool,
    /// Initial video source
    pub video_capturer: Option<VideoCapturer>,
    /// Negotiated relays
    pub connections: ConnectionSet,
    /// Maximum protocol layer
    pub max_layer: i32,
    /// Negotiated version
    pub version: String,
    /// Peer-to-peer allowed
    pub allow_p2p: bool,
    /// TCP allowed
    pub enable_tcp: bool,
    /// STUN marking enabled
    pub enable_stun_marking: bool,
    /// Base name of the permanent log; empty disables it
    pub log_name: String,
    /// Preferred video codec
    pub preferred_video_codec: Option<String>,
    /// Audio input device, default when `None`
    pub input_device_id: Option<String>,
    /// Audio output device, default when `None`
    pub output_device_id: Option<String>,
}

impl CallContextParams {
    /// Parameters with defaults for everything not negotiated
    pub fn new(
        internal_id: CallSessionInternalId,
        connections: ConnectionSet,
        version: impl Into<String>,
        key: Bytes,
    ) -> Self {
        Self {
            internal_id,
            proxy_server: None,
            initial_network_type: NetworkType::default(),
            serialized_server_config: None,
            data_saving: DataSaving::default(),
            derived_state: DerivedState::default(),
            key,
            is_outgoing: true,
            video_capturer: None,
            connections,
            max_layer: 92,
            version: version.into(),
            allow_p2p: true,
            enable_tcp: false,
            enable_stun_marking: false,
            log_name: String::new(),
            preferred_video_codec: None,
            input_device_id: None,
            output_device_id: None,
        }
    }
}

/// What a completed stop did
#[derive(Debug, Clone, PartialEq)]
pub struct TeardownReport {
    /// Usage recorded for the call
    pub usage: NetworkUsageDelta,
    /// Permanent debug log, if the temp log was moved there
    pub log_path: Option<PathBuf>,
    /// Permanent stats file, if the temp stats were moved there
    pub stats_path: Option<PathBuf>,
    /// Derived state handed to the account
    pub derived_state: DerivedState,
    /// In-memory debug log reported by the engine
    pub engine_debug_log: Option<String>,
}

/// Pending results of [`CallContext::stop`]
///
/// Dropping the receipt does not cancel the stop.
#[derive(Debug)]
pub struct StopReceipt {
    debug_log: Option<oneshot::Receiver<Option<String>>>,
    finished: oneshot::Receiver<TeardownReport>,
}

impl StopReceipt {
    /// Stats text published on completion
    ///
    /// `None` without a call id, when no stats were readable, or when the
    /// stop never completed. Resolves once; later calls return `None`.
    pub async fn debug_log(&mut self) -> Option<String> {
        let receiver = self.debug_log.take()?;
        receiver.await.ok().flatten()
    }

    /// Wait for teardown bookkeeping to finish
    pub async fn finished(self) -> Option<TeardownReport> {
        self.finished.await.ok()
    }
}

struct PendingStop {
    request: StopRequest,
    engine: EngineHandle,
}

/// Live call bound to one native engine
pub struct CallContext {
    internal_id: CallSessionInternalId,
    is_modern: bool,
    version: String,
    queue: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<Option<CallContextState>>,
    reception: watch::Receiver<Option<i32>>,
    audio_level: watch::Receiver<f32>,
    signaling_subscription: Subscription,
    network_type_forwarding: JoinHandle<()>,
    debug_info_poll_interval: Duration,
}

impl CallContext {
    /// Maximum protocol layer the engines support
    pub fn max_layer(engines: &dyn EngineFactory) -> i32 {
        engines.max_layer()
    }

    /// Versions to advertise during negotiation
    pub fn versions(
        engines: &dyn EngineFactory,
        include_experimental: bool,
        include_reference: bool,
        config: &CallContextConfig,
    ) -> Vec<SupportedVersion> {
        version::versions(
            engines,
            include_experimental,
            include_reference,
            config.force_legacy_version,
        )
    }

    /// Build the engine and start the call
    ///
    /// Must be called inside a tokio runtime. `updated_network_type` is
    /// forwarded to the engine until the context is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the legacy engine is selected without a reflector
    /// primary, if temp artifacts cannot be allocated, or if no runtime is
    /// available
    #[tracing::instrument(skip_all, fields(internal_id = %params.internal_id, version = %params.version))]
    pub fn new(
        collaborators: CallCollaborators,
        params: CallContextParams,
        updated_network_type: impl Stream<Item = NetworkType> + Send + 'static,
        config: CallContextConfig,
    ) -> Result<Self, CallContextError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CallContextError::NoRuntime(e.to_string()))?;
        let CallCollaborators {
            account,
            relay,
            engines,
        } = collaborators;
        let internal_id = params.internal_id;

        engines.apply_legacy_server_config(params.serialized_server_config.as_deref());
        engines.apply_modern_server_config(params.serialized_server_config.as_deref());

        let logs = CallLogs::new(account.base_path());
        logs.cleanup(config.call_logs_limit);
        let log_path = logs.permanent_log_path(&params.log_name);
        let temp_files = CallLogs::allocate_temp_files(config.temp_dir.as_deref())?;

        let selection = select_engine(
            &params.version,
            &engines.legacy_version(),
            params.allow_p2p,
            config.force_legacy_version,
        );
        let proxy = params
            .proxy_server
            .as_ref()
            .and_then(VoipProxyServer::from_settings);

        let (tx, rx) = mpsc::unbounded_channel();
        let events = EngineEventSink::new(tx.clone());

        let engine = if selection.use_modern {
            let connections = modern_connections(&params.connections.all());
            tracing::debug!(count = connections.len(), "Mapped modern connections");
            EngineHandle::Modern(engines.create_modern(
                ModernEngineConfig {
                    version: selection.version.clone(),
                    proxy,
                    network_type: params.initial_network_type.into(),
                    data_saving: params.data_saving,
                    derived_state: params.derived_state,
                    key: params.key,
                    is_outgoing: params.is_outgoing,
                    connections,
                    max_layer: params.max_layer,
                    allow_p2p: selection.allow_p2p,
                    allow_tcp: params.enable_tcp,
                    enable_stun_marking: params.enable_stun_marking,
                    log_path: temp_files.log_path().to_path_buf(),
                    stats_log_path: temp_files.stats_path().to_path_buf(),
                    video_capturer: params.video_capturer,
                    preferred_video_codec: params.preferred_video_codec,
                    input_device_id: params.input_device_id.unwrap_or_default(),
                    output_device_id: params.output_device_id.unwrap_or_default(),
                },
                events,
            ))
        } else {
            let (primary_connection, alternative_connections) =
                legacy_connections(&params.connections)
                    .ok_or(CallContextError::NoPrimaryConnection)?;
            EngineHandle::Legacy(engines.create_legacy(
                LegacyEngineConfig {
                    proxy,
                    network_type: params.initial_network_type.into(),
                    data_saving: params.data_saving,
                    derived_state: params.derived_state,
                    key: params.key,
                    is_outgoing: params.is_outgoing,
                    primary_connection,
                    alternative_connections,
                    max_layer: params.max_layer,
                    allow_p2p: selection.allow_p2p,
                    log_path: log_path.clone(),
                },
                events,
            ))
        };
        let is_modern = engine.is_modern();

        let (state_tx, state) = watch::channel(None);
        let (reception_tx, reception) =
            watch::channel(is_modern.then_some(INITIAL_MODERN_RECEPTION));
        let (audio_level_tx, audio_level) = watch::channel(0.0);

        let worker = ContextWorker {
            internal_id,
            engine: Some(engine),
            is_modern,
            pending_stop: None,
            released: false,
            account,
            relay: Arc::clone(&relay),
            logs,
            log_path,
            temp_files,
            state: state_tx,
            reception: reception_tx,
            audio_level: audio_level_tx,
            did_report_call_as_video: false,
            queue: tx.clone(),
        };
        runtime.spawn(worker.run(rx));

        let signaling_queue = tx.clone();
        let signaling_subscription = relay.begin_receiving_signaling_data(
            internal_id,
            Box::new(move |batch| {
                let _ = signaling_queue.send(Message::SignalingData(batch));
            }),
        );

        let network_queue = tx.clone();
        let mut updated_network_type = updated_network_type.boxed();
        let network_type_forwarding = runtime.spawn(async move {
            while let Some(network_type) = updated_network_type.next().await {
                if network_queue.send(Message::NetworkType(network_type)).is_err() {
                    break;
                }
            }
        });

        tracing::info!(
            modern = is_modern,
            selected_version = %selection.version,
            "Call context started"
        );

        Ok(Self {
            internal_id,
            is_modern,
            version: selection.version,
            queue: tx,
            state,
            reception,
            audio_level,
            signaling_subscription,
            network_type_forwarding,
            debug_info_poll_interval: config.debug_info_poll_interval,
        })
    }

    /// Session-local call id
    pub fn internal_id(&self) -> CallSessionInternalId {
        self.internal_id
    }

    /// Check whether the modern engine runs this call
    pub fn is_modern(&self) -> bool {
        self.is_modern
    }

    /// Version the engine was started with
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Latest state snapshot; `None` until the engine reports
    pub fn state(&self) -> watch::Receiver<Option<CallContextState>> {
        self.state.clone()
    }

    /// Signal bars, 0..=4
    pub fn reception(&self) -> watch::Receiver<Option<i32>> {
        self.reception.clone()
    }

    /// Output audio level
    pub fn audio_level(&self) -> watch::Receiver<f32> {
        self.audio_level.clone()
    }

    /// State snapshots as a stream, starting with the current one
    pub fn state_updates(&self) -> impl Stream<Item = Option<CallContextState>> + Send + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Mute or unmute the microphone
    pub fn set_is_muted(&self, muted: bool) {
        self.dispatch(Intent::SetMuted(muted));
    }

    /// Report local battery level; modern engine only
    pub fn set_is_low_battery_level(&self, low: bool) {
        self.dispatch(Intent::SetLowBatteryLevel(low));
    }

    /// Start sending video; modern engine only
    pub fn request_video(&self, capturer: VideoCapturer) {
        self.dispatch(Intent::RequestVideo(capturer));
    }

    /// Preferred aspect ratio for outgoing video; modern engine only
    pub fn set_requested_video_aspect(&self, aspect: f32) {
        self.dispatch(Intent::SetRequestedVideoAspect(aspect));
    }

    /// Stop sending video; modern engine only
    pub fn disable_video(&self) {
        self.dispatch(Intent::DisableVideo);
    }

    /// Switch the audio output device
    pub fn switch_audio_output(&self, device_id: impl Into<String>) {
        self.dispatch(Intent::SwitchAudioOutput(device_id.into()));
    }

    /// Switch the audio input device
    pub fn switch_audio_input(&self, device_id: impl Into<String>) {
        self.dispatch(Intent::SwitchAudioInput(device_id.into()));
    }

    /// Tell the engine teardown is imminent; modern engine only
    pub fn begin_termination(&self) {
        self.dispatch(Intent::BeginTermination);
    }

    /// Engine diagnostics, re-sampled every poll interval
    ///
    /// Ends once the engine has been released.
    pub fn debug_info(&self) -> BoxStream<'static, DebugInfo> {
        let queue = self.queue.clone();
        let interval = self.debug_info_poll_interval;
        futures::stream::unfold(false, move |sampled| {
            let queue = queue.clone();
            async move {
                if sampled {
                    tokio::time::sleep(interval).await;
                }
                let (reply, response) = oneshot::channel();
                queue.send(Message::DebugInfo(reply)).ok()?;
                let info = response.await.ok().flatten()?;
                Some((info, true))
            }
        })
        .boxed()
    }

    /// Build a surface for the remote video
    ///
    /// `completion` receives `None` on the legacy engine or after release.
    pub fn make_incoming_video_view(
        &self,
        completion: impl FnOnce(Option<Box<dyn IncomingVideoView>>) + Send + 'static,
    ) {
        if let Err(mpsc::error::SendError(Message::IncomingVideoView(completion))) = self
            .queue
            .send(Message::IncomingVideoView(Box::new(completion)))
        {
            completion(None);
        }
    }

    /// Stop the engine and persist call artifacts
    ///
    /// With a `call_id`, the stats text is published through the receipt and,
    /// if `send_debug_logs` is set, submitted to the account. Only the first
    /// stop has any effect.
    #[tracing::instrument(skip(self), fields(internal_id = %self.internal_id))]
    pub fn stop(&self, call_id: Option<CallId>, send_debug_logs: bool) -> StopReceipt {
        let (debug_log_tx, debug_log) = oneshot::channel();
        let (finished_tx, finished) = oneshot::channel();
        let request = StopRequest {
            call_id,
            send_debug_logs,
            debug_log: debug_log_tx,
            finished: finished_tx,
        };
        if self.queue.send(Message::Stop(request)).is_err() {
            tracing::debug!("Stop requested after the queue finished");
        }
        StopReceipt {
            debug_log: Some(debug_log),
            finished,
        }
    }

    fn dispatch(&self, intent: Intent) {
        if self.queue.send(Message::Intent(intent)).is_err() {
            tracing::trace!(internal_id = %self.internal_id, "Dropping intent, queue finished");
        }
    }
}

impl Drop for CallContext {
    fn drop(&mut self) {
        self.signaling_subscription.dispose();
        self.network_type_forwarding.abort();
        let _ = self.queue.send(Message::Release);
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("internal_id", &self.internal_id)
            .field("is_modern", &self.is_modern)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Queue-side state; the only owner of the engine
struct ContextWorker {
    internal_id: CallSessionInternalId,
    engine: Option<EngineHandle>,
    is_modern: bool,
    pending_stop: Option<PendingStop>,
    released: bool,
    account: Arc<dyn CallAccount>,
    relay: Arc<dyn CallSessionRelay>,
    logs: CallLogs,
    log_path: Option<PathBuf>,
    temp_files: TempLogFiles,
    state: watch::Sender<Option<CallContextState>>,
    reception: watch::Sender<Option<i32>>,
    audio_level: watch::Sender<f32>,
    did_report_call_as_video: bool,
    queue: mpsc::UnboundedSender<Message>,
}

impl ContextWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            self.handle(message).await;
            if self.released && self.pending_stop.is_none() {
                break;
            }
        }
        tracing::debug!(internal_id = %self.internal_id, "Call context queue finished");
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Engine(event) => self.handle_engine_event(event),
            Message::NetworkType(network_type) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_network_type(network_type);
                }
            }
            Message::Intent(intent) => self.apply_intent(intent),
            Message::SignalingData(batch) => match self.engine.as_mut() {
                Some(engine) => engine.add_signaling_data(batch),
                None => tracing::trace!(count = batch.len(), "Dropping inbound signaling"),
            },
            Message::DebugInfo(reply) => {
                let info = self.engine.as_ref().map(|engine| DebugInfo {
                    version: engine.version(),
                    info: engine.debug_info(),
                });
                let _ = reply.send(info);
            }
            Message::IncomingVideoView(completion) => match self.engine.as_mut() {
                Some(engine) => engine.make_incoming_video_view(completion),
                None => completion(None),
            },
            Message::Stop(request) => self.begin_stop(request),
            Message::StopCompleted(outcome) => self.finish_stop(outcome).await,
            Message::Release => {
                if self.engine.take().is_some() {
                    tracing::info!(internal_id = %self.internal_id, "Released engine without stop");
                }
                self.released = true;
            }
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LegacyStateChanged(state) => {
                self.apply_state(CallContextState::audio_only(state.into()));
            }
            EngineEvent::StateChanged(update) => self.apply_state(update.to_context_state()),
            EngineEvent::SignalBarsChanged(bars) => {
                self.reception.send_replace(Some(bars));
            }
            EngineEvent::AudioLevelUpdated(level) => {
                self.audio_level.send_replace(level);
            }
            EngineEvent::SendSignalingData(data) => {
                if self.is_modern {
                    self.relay.send_signaling_data(self.internal_id, data);
                } else {
                    tracing::debug!("Ignoring signaling from the legacy engine");
                }
            }
        }
    }

    fn apply_state(&mut self, state: CallContextState) {
        let current = *self.state.borrow();
        if current.is_some_and(|current| current.is_terminal()) {
            tracing::debug!(state = ?state.state, "Ignoring state after failure");
            return;
        }

        if state.video_state == VideoState::Active && !self.did_report_call_as_video {
            self.did_report_call_as_video = true;
            self.relay.update_call_type(self.internal_id, CallType::Video);
        }

        tracing::debug!(state = ?state.state, video = ?state.video_state, "Call state changed");
        self.state.send_replace(Some(state));
    }

    fn apply_intent(&mut self, intent: Intent) {
        let Some(engine) = self.engine.as_mut() else {
            tracing::trace!(?intent, "Ignoring intent, engine released");
            return;
        };
        match intent {
            Intent::SetMuted(muted) => engine.set_is_muted(muted),
            Intent::SetLowBatteryLevel(low) => engine.set_is_low_battery_level(low),
            Intent::RequestVideo(capturer) => engine.request_video(capturer),
            Intent::SetRequestedVideoAspect(aspect) => engine.set_requested_video_aspect(aspect),
            Intent::DisableVideo => engine.disable_video(),
            Intent::SwitchAudioOutput(device_id) => engine.switch_audio_output(&device_id),
            Intent::SwitchAudioInput(device_id) => engine.switch_audio_input(&device_id),
            Intent::BeginTermination => engine.begin_termination(),
        }
    }

    fn begin_stop(&mut self, request: StopRequest) {
        if self.pending_stop.is_some() {
            tracing::debug!("Stop already in progress");
            return;
        }
        let Some(mut engine) = self.engine.take() else {
            tracing::debug!("Stop requested after the engine was released");
            return;
        };
        tracing::info!(internal_id = %self.internal_id, "Stopping engine");
        engine.stop(StopCompletion::new(self.queue.clone()));
        self.pending_stop = Some(PendingStop { request, engine });
    }

    async fn finish_stop(&mut self, outcome: NativeStopOutcome) {
        let Some(PendingStop { request, engine }) = self.pending_stop.take() else {
            tracing::warn!("Stop completion without a pending stop");
            return;
        };

        let usage = outcome.usage_delta();
        if let Err(e) = self.account.record_call_network_usage(usage).await {
            tracing::warn!(error = %e, "Failed to record call network usage");
        }

        let mut persisted_log = None;
        let mut persisted_stats = None;
        let stats_path = self.log_path.as_deref().map(CallLogs::stats_path_for);
        if let (Some(log_path), Some(stats_path)) = (&self.log_path, &stats_path) {
            match self.logs.persist(self.temp_files.log_path(), log_path).await {
                Ok(()) => persisted_log = Some(log_path.clone()),
                Err(e) => tracing::debug!(error = %e, "Debug log not moved"),
            }
            match self.logs.persist(self.temp_files.stats_path(), stats_path).await {
                Ok(()) => persisted_stats = Some(stats_path.clone()),
                Err(e) => tracing::debug!(error = %e, "Stats log not moved"),
            }
        }

        let mut published = None;
        if let (Some(call_id), Some(stats_path)) = (request.call_id, &stats_path) {
            match tokio::fs::read(stats_path).await.map(String::from_utf8) {
                Ok(Ok(text)) => {
                    if request.send_debug_logs {
                        if let Err(e) = self.account.submit_call_debug_log(call_id, text.clone()).await {
                            tracing::warn!(%call_id, error = %e, "Failed to submit call debug log");
                        }
                    }
                    published = Some(text);
                }
                Ok(Err(e)) => tracing::debug!(error = %e, "Stats log is not UTF-8"),
                Err(e) => tracing::debug!(error = %e, "Stats log unreadable"),
            }
        }
        let _ = request.debug_log.send(published);

        let derived_state = engine.derived_state();
        if let Err(e) = self.account.store_derived_state(derived_state.clone()).await {
            tracing::warn!(error = %e, "Failed to store derived state");
        }
        drop(engine);

        tracing::info!(
            internal_id = %self.internal_id,
            wifi_in = usage.wifi.incoming,
            wifi_out = usage.wifi.outgoing,
            cellular_in = usage.cellular.incoming,
            cellular_out = usage.cellular.outgoing,
            "Call context stopped"
        );
        let _ = request.finished.send(TeardownReport {
            usage,
            log_path: persisted_log,
            stats_path: persisted_stats,
            derived_state,
            engine_debug_log: outcome.debug_log,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::account::MemoryAccount;
    use crate::connection::{CallSessionConnection, ReflectorConnection, WebRtcReflectorConnection};
    use crate::engine::ModernStateUpdate;
    use crate::relay::InMemoryRelay;
    use crate::testing::{EngineCall, EngineScript, ScriptedEngineFactory};
    use crate::types::CallLifecycle;
    use tempfile::TempDir;

    struct Harness {
        _base: TempDir,
        account: Arc<MemoryAccount>,
        relay: InMemoryRelay,
        engines: ScriptedEngineFactory,
        config: CallContextConfig,
    }

    impl Harness {
        fn new(script: EngineScript) -> Self {
            let base = TempDir::new().unwrap();
            let config = CallContextConfig {
                temp_dir: Some(base.path().to_path_buf()),
                debug_info_poll_interval: Duration::from_millis(10),
                ..CallContextConfig::default()
            };
            Self {
                account: Arc::new(MemoryAccount::new(base.path())),
                _base: base,
                relay: InMemoryRelay::new(),
                engines: ScriptedEngineFactory::with_script(script),
                config,
            }
        }

        fn collaborators(&self) -> CallCollaborators {
            CallCollaborators {
                account: self.account.clone(),
                relay: Arc::new(self.relay.clone()),
                engines: Arc::new(self.engines.clone()),
            }
        }

        fn start(&self, version: &str) -> CallContext {
            let params = CallContextParams::new(
                CallSessionInternalId::new(),
                connections(),
                version,
                Bytes::from_static(b"key"),
            );
            CallContext::new(
                self.collaborators(),
                params,
                futures::stream::pending::<NetworkType>(),
                self.config.clone(),
            )
            .unwrap()
        }
    }

    fn connections() -> ConnectionSet {
        ConnectionSet {
            primary: CallSessionConnection::Reflector(ReflectorConnection {
                id: 900,
                ip: "10.0.0.1".to_string(),
                ipv6: String::new(),
                port: 533,
                peer_tag: Bytes::from_static(&[0xab]),
            }),
            alternatives: vec![],
        }
    }

    async fn flush(context: &CallContext) {
        let (reply, response) = oneshot::channel();
        context.queue.send(Message::DebugInfo(reply)).unwrap();
        let _ = response.await;
    }

    #[tokio::test]
    async fn test_terminal_state_is_latched() {
        let harness = Harness::new(EngineScript::default());
        let context = harness.start("5.0.0");
        let sink = harness.engines.sink().unwrap();

        sink.state_changed(ModernStateUpdate::from_raw(2, 0, 0, 0, 0, 1.0));
        sink.state_changed(ModernStateUpdate::from_raw(1, 0, 0, 0, 0, 1.0));
        flush(&context).await;

        let state = (*context.state().borrow()).unwrap();
        assert_eq!(state.state, CallLifecycle::Failed);
    }

    #[tokio::test]
    async fn test_video_reported_once() {
        let harness = Harness::new(EngineScript::default());
        let context = harness.start("5.0.0");
        let sink = harness.engines.sink().unwrap();

        sink.state_changed(ModernStateUpdate::from_raw(1, 1, 0, 0, 0, 1.0));
        sink.state_changed(ModernStateUpdate::from_raw(1, 0, 0, 0, 0, 1.0));
        sink.state_changed(ModernStateUpdate::from_raw(1, 1, 0, 0, 0, 1.0));
        flush(&context).await;

        assert_eq!(harness.relay.call_type_updates(), 1);
        assert_eq!(
            harness.relay.call_type(context.internal_id()),
            Some(CallType::Video)
        );
    }

    #[tokio::test]
    async fn test_legacy_ignores_outbound_signaling() {
        let harness = Harness::new(EngineScript::default());
        let context = harness.start("2.4.4");
        assert!(!context.is_modern());
        assert_eq!(*context.reception().borrow(), None);

        harness
            .engines
            .sink()
            .unwrap()
            .send_signaling_data(Bytes::from_static(b"x"));
        flush(&context).await;
        assert!(harness.relay.sent().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_requires_reflector_primary() {
        let harness = Harness::new(EngineScript::default());
        let mut params = CallContextParams::new(
            CallSessionInternalId::new(),
            connections(),
            "2.4.4",
            Bytes::new(),
        );
        params.connections.primary = CallSessionConnection::WebRtcReflector(WebRtcReflectorConnection {
            id: 1,
            has_stun: true,
            has_turn: true,
            ip: "10.0.0.9".to_string(),
            ipv6: String::new(),
            port: 3478,
            username: "u".to_string(),
            password: "p".to_string(),
        });

        let result = CallContext::new(
            harness.collaborators(),
            params,
            futures::stream::pending::<NetworkType>(),
            harness.config.clone(),
        );
        assert!(matches!(result, Err(CallContextError::NoPrimaryConnection)));
        assert_eq!(harness.engines.releases(), 0);
    }

    #[tokio::test]
    async fn test_second_stop_is_ignored() {
        let harness = Harness::new(EngineScript::default());
        let context = harness.start("5.0.0");

        let first = context.stop(None, false);
        let second = context.stop(None, false);
        assert!(first.finished().await.is_some());
        assert!(second.finished().await.is_none());

        let stops = harness
            .engines
            .calls()
            .into_iter()
            .filter(|call| *call == EngineCall::Stop)
            .count();
        assert_eq!(stops, 1);
        assert_eq!(harness.engines.releases(), 1);
    }

    #[tokio::test]
    async fn test_receipt_pending_until_native_stop_completes() {
        let harness = Harness::new(EngineScript {
            complete_stop: false,
            ..EngineScript::default()
        });
        let context = harness.start("5.0.0");

        let receipt = context.stop(None, false);
        flush(&context).await;
        let mut finished = tokio_test::task::spawn(receipt.finished());
        tokio_test::assert_pending!(finished.poll());
        assert_eq!(harness.engines.releases(), 0);

        harness
            .engines
            .take_pending_stop()
            .unwrap()
            .complete(NativeStopOutcome::default());
        for _ in 0..200 {
            if finished.is_woken() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let report = tokio_test::assert_ready!(finished.poll());
        assert!(report.is_some());
        assert_eq!(harness.engines.releases(), 1);
    }

    #[test]
    fn test_construction_outside_runtime_fails() {
        let harness = Harness::new(EngineScript::default());
        let params = CallContextParams::new(
            CallSessionInternalId::new(),
            connections(),
            "5.0.0",
            Bytes::new(),
        );
        let result = CallContext::new(
            harness.collaborators(),
            params,
            futures::stream::pending::<NetworkType>(),
            harness.config.clone(),
        );
        assert!(matches!(result, Err(CallContextError::NoRuntime(_))));
    }
}
