//! Scripted call simulation
//!
//! Runs one call context through its whole lifecycle against the scripted
//! engine and an in-memory relay.

use anyhow::{Context, Result};
use bytes::Bytes;
use callctx_core::testing::ScriptedEngineFactory;
use callctx_core::{
    CallCollaborators, CallContext, CallContextConfig, CallContextParams, CallId, CallLifecycle,
    CallSessionConnection, CallSessionInternalId, CallType, ConnectionSet, DebugInfo,
    EngineEventSink, EngineState, InMemoryRelay, MemoryAccount, ModernStateUpdate, NetworkType,
    ReflectorConnection, TeardownReport, WebRtcReflectorConnection,
};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;

/// What to simulate
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Negotiated version
    pub version: String,
    /// Server call id
    pub call_id: Option<i64>,
    /// Submit stats on stop
    pub send_debug_logs: bool,
    /// Debug info samples to take
    pub debug_samples: usize,
    /// Inject an engine failure
    pub fail: bool,
}

/// What the simulated call went through
#[derive(Debug)]
pub struct SimulationSummary {
    /// Modern engine selected
    pub modern: bool,
    /// Version the engine ran
    pub version: String,
    /// Lifecycle observed after each engine callback
    pub states: Vec<CallLifecycle>,
    /// Final reception
    pub reception: Option<i32>,
    /// Debug info samples
    pub debug_info: Vec<DebugInfo>,
    /// Outbound signaling payloads relayed
    pub signaling_sent: usize,
    /// Relay saw the call reported as video
    pub reported_video: bool,
    /// Stats text published on stop
    pub published_log: Option<String>,
    /// Teardown outcome
    pub report: Option<TeardownReport>,
}

fn sample_connections() -> ConnectionSet {
    ConnectionSet {
        primary: CallSessionConnection::Reflector(ReflectorConnection {
            id: 1_000_001,
            ip: "203.0.113.1".to_string(),
            ipv6: "2001:db8::1".to_string(),
            port: 533,
            peer_tag: Bytes::from_static(&[0x0a, 0x1b, 0x2c]),
        }),
        alternatives: vec![
            CallSessionConnection::Reflector(ReflectorConnection {
                id: 17,
                ip: "203.0.113.17".to_string(),
                ipv6: String::new(),
                port: 533,
                peer_tag: Bytes::from_static(&[0x0a, 0x1b, 0x2c]),
            }),
            CallSessionConnection::WebRtcReflector(WebRtcReflectorConnection {
                id: 99,
                has_stun: true,
                has_turn: true,
                ip: "198.51.100.9".to_string(),
                ipv6: String::new(),
                port: 3478,
                username: "sim".to_string(),
                password: "sim".to_string(),
            }),
        ],
    }
}

fn report_state(sink: &EngineEventSink, modern: bool, state: i32, video_state: i32) {
    if modern {
        sink.state_changed(ModernStateUpdate::from_raw(state, video_state, 0, 0, 0, 1.0));
    } else {
        sink.legacy_state_changed(EngineState::from_raw(state));
    }
}

/// Wait until every queued message has been handled
async fn settle(context: &CallContext) {
    let _ = context.debug_info().next().await;
}

/// Run one simulated call
///
/// # Errors
///
/// Returns error if the call context cannot be constructed
#[tracing::instrument(skip(config), fields(version = %options.version))]
pub async fn run(
    base_path: &Path,
    config: CallContextConfig,
    options: SimulationOptions,
) -> Result<SimulationSummary> {
    let engines = ScriptedEngineFactory::new();
    let relay = InMemoryRelay::new();
    let account = MemoryAccount::new(base_path);

    let log_name = format!(
        "{}_{}",
        options.call_id.unwrap_or_default(),
        chrono::Utc::now().timestamp()
    );
    let mut params = CallContextParams::new(
        CallSessionInternalId::new(),
        sample_connections(),
        options.version.clone(),
        Bytes::from_static(b"simulated key material"),
    );
    params.log_name = log_name;

    let context = CallContext::new(
        CallCollaborators {
            account: Arc::new(account.clone()),
            relay: Arc::new(relay.clone()),
            engines: Arc::new(engines.clone()),
        },
        params,
        futures::stream::iter([NetworkType::Wifi]),
        config,
    )
    .context("Failed to start call context")?;
    let modern = context.is_modern();
    let sink = engines
        .sink()
        .context("Engine did not register callbacks")?;

    let mut states = Vec::new();
    let mut steps = vec![(0, 0), (1, 0)];
    if modern {
        steps.push((1, 1));
    }
    if options.fail {
        steps.push((2, 0));
        steps.push((1, 0));
    }
    for (state, video_state) in steps {
        report_state(&sink, modern, state, video_state);
        settle(&context).await;
        if let Some(snapshot) = *context.state().borrow() {
            states.push(snapshot.state);
        }
    }

    sink.signal_bars_changed(3);
    sink.audio_level_updated(0.4);
    sink.send_signaling_data(Bytes::from_static(b"simulated candidate"));
    relay.deliver(context.internal_id(), vec![Bytes::from_static(b"remote candidate")]);
    settle(&context).await;

    let debug_info = context
        .debug_info()
        .take(options.debug_samples)
        .collect::<Vec<_>>()
        .await;
    let reception = *context.reception().borrow();

    let call_id = options.call_id.map(|id| CallId { id, access_hash: 0 });
    let mut receipt = context.stop(call_id, options.send_debug_logs);
    let published_log = receipt.debug_log().await;
    let report = receipt.finished().await;

    Ok(SimulationSummary {
        modern,
        version: context.version().to_string(),
        states,
        reception,
        debug_info,
        signaling_sent: relay.sent().len(),
        reported_video: relay.call_type(context.internal_id()) == Some(CallType::Video),
        published_log,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(version: &str) -> SimulationOptions {
        SimulationOptions {
            version: version.to_string(),
            call_id: Some(5),
            send_debug_logs: false,
            debug_samples: 2,
            fail: false,
        }
    }

    fn config(temp: &TempDir) -> CallContextConfig {
        CallContextConfig {
            temp_dir: Some(temp.path().to_path_buf()),
            debug_info_poll_interval: std::time::Duration::from_millis(5),
            ..CallContextConfig::default()
        }
    }

    #[tokio::test]
    async fn test_modern_simulation() {
        let temp = TempDir::new().unwrap();
        let summary = run(temp.path(), config(&temp), options("5.0.0")).await.unwrap();

        assert!(summary.modern);
        assert_eq!(
            summary.states,
            vec![
                CallLifecycle::Initializing,
                CallLifecycle::Connected,
                CallLifecycle::Connected
            ]
        );
        assert_eq!(summary.reception, Some(3));
        assert_eq!(summary.debug_info.len(), 2);
        assert_eq!(summary.signaling_sent, 1);
        assert!(summary.reported_video);
        assert!(summary.published_log.is_some());

        let report = summary.report.unwrap();
        assert!(report.log_path.unwrap().exists());
        assert!(report.stats_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_legacy_simulation() {
        let temp = TempDir::new().unwrap();
        let summary = run(temp.path(), config(&temp), options("2.4.4")).await.unwrap();

        assert!(!summary.modern);
        assert_eq!(summary.signaling_sent, 0);
        assert!(!summary.reported_video);
        assert!(summary.report.is_some());
    }

    #[tokio::test]
    async fn test_failure_is_terminal() {
        let temp = TempDir::new().unwrap();
        let mut options = options("5.0.0");
        options.fail = true;
        let summary = run(temp.path(), config(&temp), options).await.unwrap();

        assert_eq!(summary.states.last(), Some(&CallLifecycle::Failed));
    }
}
