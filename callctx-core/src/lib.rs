//! callctx - ongoing call context for a two-generation native call engine
//!
//! This library binds one live call to one native real-time engine. It
//! features:
//!
//! - **Engine Selection**: Negotiated version picks the legacy or modern engine
//! - **Connection Mapping**: Session relays become engine descriptors, with
//!   reflector ids compacted to a single byte
//! - **Serial Call Queue**: Every engine call and callback runs on one task
//! - **Observable State**: Call state, reception and audio level as signals
//! - **Teardown Bookkeeping**: Usage accounting, log retention and derived
//!   state persistence on stop
//!
//! # Examples
//!
//! ```rust,no_run
//! use callctx_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     connections: ConnectionSet,
//! #     engines: Arc<dyn EngineFactory>,
//! # ) -> anyhow::Result<()> {
//! let collaborators = CallCollaborators {
//!     account: Arc::new(MemoryAccount::new("/tmp/account")),
//!     relay: Arc::new(InMemoryRelay::new()),
//!     engines,
//! };
//! let params = CallContextParams::new(
//!     CallSessionInternalId::new(),
//!     connections,
//!     "5.0.0",
//!     bytes::Bytes::from_static(b"key"),
//! );
//!
//! let context = CallContext::new(
//!     collaborators,
//!     params,
//!     futures::stream::pending::<NetworkType>(),
//!     CallContextConfig::default(),
//! )?;
//! context.set_is_muted(true);
//!
//! let _report = context.stop(None, false).finished().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Call context types and data structures
pub mod types;

/// Construction errors
pub mod error;

/// Call context configuration
pub mod config;

/// Session connection to engine descriptor mapping
pub mod connection;

/// Engine version selection and advertisement
pub mod version;

/// Native engine capability traits
pub mod engine;

/// Signaling relay and subscriptions
pub mod relay;

/// Account collaborator
pub mod account;

/// Call log and stats files
pub mod logs;

/// Call context state machine
pub mod context;

/// Scripted engine for tests and simulation
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export main types at crate root
pub use account::{CallAccount, MemoryAccount};
pub use config::CallContextConfig;
pub use connection::{
    map_connections, CallSessionConnection, ConnectionDescriptor, ConnectionSet,
    LegacyConnectionDescription, ModernConnectionDescription, ReflectorConnection,
    ReflectorIdMapping, WebRtcReflectorConnection,
};
pub use context::{
    CallCollaborators, CallContext, CallContextParams, StopReceipt, TeardownReport,
};
pub use engine::{
    CallEngine, EngineEvent, EngineEventSink, EngineFactory, EngineNetworkType, EngineState,
    IncomingVideoView, LegacyEngineConfig, ModernEngine, ModernEngineConfig, ModernStateUpdate,
    NativeStopOutcome, StopCompletion, VideoCapturer, VideoSource, VideoViewCompletion,
};
pub use error::CallContextError;
pub use logs::{CallLogEntry, CallLogs, TempLogFiles};
pub use relay::{CallSessionRelay, InMemoryRelay, SignalingHandler, Subscription};
pub use types::*;
pub use version::{select_engine, EngineSelection, SupportedVersion};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::account::{CallAccount, MemoryAccount};
    pub use crate::config::CallContextConfig;
    pub use crate::connection::{CallSessionConnection, ConnectionSet};
    pub use crate::context::{CallCollaborators, CallContext, CallContextParams, StopReceipt};
    pub use crate::engine::{CallEngine, EngineFactory, ModernEngine};
    pub use crate::error::CallContextError;
    pub use crate::relay::{CallSessionRelay, InMemoryRelay};
    pub use crate::types::{
        CallContextState, CallId, CallLifecycle, CallSessionInternalId, NetworkType,
    };
}
