//! # Bridge Types Module
//!
//! Định nghĩa các kiểu dữ liệu dùng chung cho hệ thống bridge giữa các
//! blockchain: chain, transaction, fee và event.

pub mod chain;
pub mod event;
pub mod fee;
pub mod transaction;

pub use chain::Chain;
pub use event::{EventKind, StandardizedEvent};
pub use fee::{FeeConfidence, FeeEstimate};
pub use transaction::{BridgeTransaction, BridgeTxStatus, StatusEntry, TxErrorEntry};
