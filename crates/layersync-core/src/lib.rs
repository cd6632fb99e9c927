//! layersync-core: verified, debounced state reconciliation for renderers
//!
//! A renderer (typically a map style engine) accepts property commands but
//! applies them late, ignores some and fails on others. This crate makes a
//! group of layers converge on a desired visibility anyway, and keeps rapid
//! mode switches from piling up redundant work.
//!
//! # Architecture
//!
//! ```text
//! caller → LayerSync ─┬→ DebouncedScheduler → (fires) ┐
//!                     ├→ RetryCoordinator ←───────────┘
//!                     │        ↓
//!                     │  VisibilityVerifier → Renderer (poll)
//!                     ├→ BatchTransitionVerifier
//!                     ├→ CleanupOrchestrator
//!                     └→ ResourceProvisioner
//!          every step → PerformanceMonitor → RingBuffer
//! ```
//!
//! # Modules
//!
//! - `sync`: The `LayerSync` service owning everything below
//! - `verifier`: Poll-until-converged visibility checks
//! - `retry`: Mutate-then-verify with fixed-delay retries
//! - `batch`: Concurrent verification of the themed layer group
//! - `cleanup`: Hide-everything teardown sequence
//! - `provision`: Creation of declared layers, initially hidden
//! - `scheduler`: Debounced, coalescing, cancellable operations
//! - `timing`: Debounce, throttle and batch primitives
//! - `monitor`: Operation timing ledger and threshold warnings
//! - `ring_buffer`: Bounded FIFO behind the monitor
//! - `renderer`: The renderer capability trait and layer specs
//! - `simulated`: In-memory renderer with lag and fault injection
//! - `visibility`: Visibility states and result records
//! - `options`: Per-call options and their defaults
//! - `clock`: Injectable time source
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//! - `error`: Error types
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod batch;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod options;
pub mod provision;
pub mod renderer;
pub mod retry;
pub mod ring_buffer;
pub mod scheduler;
pub mod simulated;
pub mod sync;
pub mod timing;
pub mod verifier;
pub mod visibility;

pub use config::LayerSyncConfig;
pub use error::{Error, Result, SyncError};
pub use options::SyncOptions;
pub use renderer::{LayerSpec, Renderer};
pub use sync::LayerSync;
pub use visibility::{BatchResult, ColorScheme, VerificationResult, Visibility};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
