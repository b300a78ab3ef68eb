//! ringline-offload — asynchronous job engine for security-association
//! offload hardware.
//!
//! The engine sits between IPsec-style callers and a crypto accelerator with
//! fixed-depth command queues. It owns a bounded pool of SA contexts, admits
//! transform jobs onto the hardware (or a bounded backlog when the queues are
//! full), and maps hardware completion tags back to the caller's callback.
//!
//! # Quick Start
//!
//! ```rust
//! use ringline_offload::sim::SimDevice;
//! use ringline_offload::{DescTable, Direction, Engine, EngineConfigBuilder, JobCompletion};
//!
//! let config = EngineConfigBuilder::new().contexts(8).single_queue(16).build()?;
//! let hw = SimDevice::new(&config);
//! let ctl = hw.controller();
//! let engine = Engine::new(config, hw)?;
//!
//! let sa = engine.open(true)?;
//! let buf = DescTable { dma_addr: 0x1000, handle: 1 };
//! let submitted = engine.submit(
//!     sa,
//!     Direction::Tx,
//!     buf,
//!     buf,
//!     Some(Box::new(|c: &JobCompletion| assert!(c.is_success()))),
//!     true,
//! )?;
//! assert!(submitted.tag().is_some());
//!
//! ctl.complete_all(0);
//! assert_eq!(engine.drain(), 1);
//! engine.close(sa)?;
//! # Ok::<(), ringline_offload::Error>(())
//! ```
//!
//! # Locking
//!
//! Each [`Engine`] guards its bookkeeping with one lock. Callbacks run with
//! the lock released and may re-enter the engine. Nothing blocks or waits
//! on hardware; detecting a wedged device is the caller's job.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod backlog;
pub(crate) mod context;
pub(crate) mod engine;
pub(crate) mod registry;

// ── Public modules ──────────────────────────────────────────────────────
pub mod completion;
pub mod config;
pub mod error;
pub mod hw;
pub mod metrics;
pub mod sim;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Offload engine for one hardware instance.
pub use engine::Engine;
/// Occupancy snapshot returned by [`Engine::stats`].
pub use engine::EngineStats;
/// Opaque SA context handle.
pub use context::Handle;

pub use completion::{JobCallback, JobCompletion, RawCompletion, Submitted, Tag};
pub use config::{EngineConfig, EngineConfigBuilder, QueueLayout, QueuePolicy};
pub use error::{Desync, Error, HwFault};
pub use hw::{DescTable, Descriptor, Direction, Hardware, HwContext, QueueId, TriggerFlags};
