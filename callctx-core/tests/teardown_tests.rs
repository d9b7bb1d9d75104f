//! Stop and teardown bookkeeping tests

use bytes::Bytes;
use callctx_core::testing::{EngineCall, EngineScript, ScriptedEngineFactory};
use callctx_core::{
    CallCollaborators, CallContext, CallContextConfig, CallContextParams, CallId,
    CallSessionConnection, CallSessionInternalId, ConnectionSet, DerivedState, DirectionUsage,
    InMemoryRelay, MemoryAccount, NativeStopOutcome, NetworkType, NetworkUsageDelta,
    ReflectorConnection,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CALL_ID: CallId = CallId {
    id: 42,
    access_hash: 7,
};

struct Harness {
    base: TempDir,
    account: MemoryAccount,
    engines: ScriptedEngineFactory,
    config: CallContextConfig,
}

impl Harness {
    fn new(script: EngineScript) -> Self {
        let base = TempDir::new().unwrap();
        let config = CallContextConfig {
            temp_dir: Some(base.path().join("tmp")),
            ..CallContextConfig::default()
        };
        std::fs::create_dir_all(base.path().join("tmp")).unwrap();
        Self {
            account: MemoryAccount::new(base.path()),
            base,
            engines: ScriptedEngineFactory::with_script(script),
            config,
        }
    }

    fn start(&self, version: &str, log_name: &str) -> CallContext {
        let mut params = CallContextParams::new(
            CallSessionInternalId::new(),
            ConnectionSet {
                primary: CallSessionConnection::Reflector(ReflectorConnection {
                    id: 3,
                    ip: "10.0.0.3".to_string(),
                    ipv6: String::new(),
                    port: 533,
                    peer_tag: Bytes::from_static(&[0x01]),
                }),
                alternatives: vec![],
            },
            version,
            Bytes::from_static(b"key"),
        );
        params.log_name = log_name.to_string();
        CallContext::new(
            CallCollaborators {
                account: Arc::new(self.account.clone()),
                relay: Arc::new(InMemoryRelay::new()),
                engines: Arc::new(self.engines.clone()),
            },
            params,
            futures::stream::pending::<NetworkType>(),
            self.config.clone(),
        )
        .unwrap()
    }

    fn temp_files(&self) -> usize {
        std::fs::read_dir(self.base.path().join("tmp")).unwrap().count()
    }
}

fn expected_usage() -> NetworkUsageDelta {
    NetworkUsageDelta {
        cellular: DirectionUsage {
            incoming: 40,
            outgoing: 30,
        },
        wifi: DirectionUsage {
            incoming: 2_000,
            outgoing: 1_000,
        },
    }
}

#[tokio::test]
async fn modern_stop_persists_artifacts_and_state() {
    let harness = Harness::new(EngineScript::default());
    let context = harness.start("5.0.0", "42_1700000000");
    assert_eq!(harness.temp_files(), 2);

    let mut receipt = context.stop(Some(CALL_ID), true);
    assert_eq!(receipt.debug_log().await.as_deref(), Some(r#"{"rtt":42}"#));
    let report = receipt.finished().await.unwrap();

    let log_path = harness.base.path().join("calls/42_1700000000.log");
    let stats_path = harness.base.path().join("calls/42_1700000000.log.json");
    assert_eq!(report.log_path.as_deref(), Some(log_path.as_path()));
    assert_eq!(report.stats_path.as_deref(), Some(stats_path.as_path()));
    assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "call log");
    assert_eq!(std::fs::read_to_string(&stats_path).unwrap(), r#"{"rtt":42}"#);
    assert_eq!(harness.temp_files(), 0);

    assert_eq!(report.usage, expected_usage());
    assert_eq!(harness.account.network_usage(), expected_usage());
    assert_eq!(harness.account.usage_reports(), 1);
    assert_eq!(
        harness.account.derived_state(),
        Some(DerivedState::new(Bytes::from_static(b"derived")))
    );
    assert_eq!(
        harness.account.submitted_logs(),
        vec![(CALL_ID, r#"{"rtt":42}"#.to_string())]
    );
    assert_eq!(report.engine_debug_log.as_deref(), Some("engine stopped"));
    assert_eq!(harness.engines.releases(), 1);
}

#[tokio::test]
async fn stop_without_call_id_publishes_nothing() {
    let harness = Harness::new(EngineScript::default());
    let context = harness.start("5.0.0", "43_1700000000");

    let mut receipt = context.stop(None, true);
    assert_eq!(receipt.debug_log().await, None);
    assert!(receipt.finished().await.is_some());
    assert!(harness.account.submitted_logs().is_empty());
    assert!(harness.base.path().join("calls/43_1700000000.log.json").exists());
}

#[tokio::test]
async fn stop_without_send_flag_keeps_log_local() {
    let harness = Harness::new(EngineScript::default());
    let context = harness.start("5.0.0", "44_1700000000");

    let mut receipt = context.stop(Some(CALL_ID), false);
    assert_eq!(receipt.debug_log().await.as_deref(), Some(r#"{"rtt":42}"#));
    assert!(harness.account.submitted_logs().is_empty());
}

#[tokio::test]
async fn stop_without_log_name_skips_persistence() {
    let harness = Harness::new(EngineScript::default());
    let context = harness.start("5.0.0", "");

    let mut receipt = context.stop(Some(CALL_ID), true);
    assert_eq!(receipt.debug_log().await, None);
    let report = receipt.finished().await.unwrap();
    assert_eq!(report.log_path, None);
    assert_eq!(report.stats_path, None);
    assert!(!harness.base.path().join("calls").join(".log").exists());
    assert_eq!(harness.account.usage_reports(), 1);
    assert!(harness.account.derived_state().is_some());
}

#[tokio::test]
async fn legacy_engine_writes_permanent_log_directly() {
    let harness = Harness::new(EngineScript::default());
    let context = harness.start("2.4.4", "45_1700000000");

    let log_path = harness.base.path().join("calls/45_1700000000.log");
    assert_eq!(
        harness.engines.legacy_configs()[0].log_path.as_deref(),
        Some(log_path.as_path())
    );

    let mut receipt = context.stop(Some(CALL_ID), true);
    assert_eq!(receipt.debug_log().await, None);
    let report = receipt.finished().await.unwrap();
    assert_eq!(report.log_path, None);
    assert_eq!(report.stats_path, None);
    assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "call log");
    assert_eq!(harness.account.network_usage(), expected_usage());

    // Nothing wrote stats, so nothing is published or left in the calls dir
    assert!(harness.account.submitted_logs().is_empty());
    assert!(!harness.base.path().join("calls/45_1700000000.log.json").exists());
    let names: Vec<_> = std::fs::read_dir(harness.base.path().join("calls"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("45_1700000000.log")]);
}

#[tokio::test]
async fn intents_after_stop_are_ignored() {
    let harness = Harness::new(EngineScript::default());
    let context = harness.start("5.0.0", "");

    assert!(context.stop(None, false).finished().await.is_some());
    context.set_is_muted(true);
    context.disable_video();
    context.begin_termination();

    let (tx, rx) = tokio::sync::oneshot::channel();
    context.make_incoming_video_view(move |view| {
        let _ = tx.send(view.is_some());
    });
    assert!(!rx.await.unwrap());
    assert!(context.debug_info().next().await.is_none());

    assert_eq!(harness.engines.calls(), vec![EngineCall::Stop]);
}

#[tokio::test]
async fn drop_during_stop_waits_for_completion() {
    let harness = Harness::new(EngineScript {
        complete_stop: false,
        ..EngineScript::default()
    });
    let context = harness.start("5.0.0", "46_1700000000");

    let receipt = context.stop(Some(CALL_ID), false);
    assert!(context.debug_info().next().await.is_none());
    drop(context);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.engines.releases(), 0);

    let completion = harness.engines.take_pending_stop().unwrap();
    completion.complete(NativeStopOutcome {
        bytes_received_wifi: 9,
        ..NativeStopOutcome::default()
    });

    let report = receipt.finished().await.unwrap();
    assert_eq!(report.usage.wifi.incoming, 9);
    assert_eq!(harness.engines.releases(), 1);
    assert!(harness.base.path().join("calls/46_1700000000.log").exists());
}

#[tokio::test]
async fn dropped_receipt_does_not_cancel_stop() {
    let harness = Harness::new(EngineScript::default());
    let context = harness.start("5.0.0", "47_1700000000");

    drop(context.stop(None, false));
    assert!(context.debug_info().next().await.is_none());

    for _ in 0..200 {
        if harness.engines.releases() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(harness.engines.releases(), 1);
    assert_eq!(harness.account.usage_reports(), 1);
}
