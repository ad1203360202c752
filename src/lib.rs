//! dmd-bridge - Cross-chain bridge subsystem for the DMD wallet
//!
//! Các thành phần chính:
//! - `adapters`: một `BridgeProtocolAdapter` cho mỗi giao thức bridge
//!   (layerzero, wormhole, axelar, hyperlane)
//! - `tracker`: theo dõi vòng đời giao dịch, metrics và cleanup
//! - `listener`: lắng nghe event trên các chain, xác nhận giao dịch
//! - `registry`: metadata và lựa chọn giao thức
//! - `orchestrator`: facade kết nối tất cả các thành phần
//!
//! All chain access goes through the `ChainProvider`/`TokenService` traits in
//! `providers`, so the whole crate runs against mocks in tests.

pub mod adapters;
pub mod config;
pub mod error;
pub mod listener;
pub mod orchestrator;
pub mod providers;
pub mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tracker;
pub mod types;

pub use adapters::{
    AdapterCapabilities, AdapterTxStatus, BridgeParams, BridgeProtocolAdapter, BridgeSubmission,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeErrorCode, Result};
pub use listener::{BridgeEventNotification, BridgeStatus, ListenTarget, MessageListener};
pub use orchestrator::{BridgeOrchestrator, OrchestratorEvent};
pub use registry::{ProtocolDescriptor, ProtocolRegistry, RankBy, RecommendOptions};
pub use tracker::{
    HistoryFilter, HistoryPage, Page, SortBy, StatusUpdate, TrackRequest, TrackerAlert,
    TransactionTracker,
};
pub use types::chain::Chain;
pub use types::event::{EventKind, StandardizedEvent};
pub use types::fee::{FeeConfidence, FeeEstimate};
pub use types::transaction::{BridgeTransaction, BridgeTxStatus};
