//! Register-level collaborator interface.
//!
//! The engine never touches registers or DMA memory directly. A [`Hardware`]
//! implementation owns the command queues, the posted-completion FIFO and
//! the pool of hardware crypto-contexts; the engine only decides *when* to
//! use them and keeps the bookkeeping that ties hardware tags back to jobs.

use crate::completion::{RawCompletion, Tag};
use crate::error::HwFault;

/// Transform direction of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Inbound traffic (decrypt / verify).
    Rx,
    /// Outbound traffic (encrypt / sign).
    Tx,
}

/// Index of a hardware command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) u8);

impl QueueId {
    /// The only queue of a single-queue engine, or queue 0 of a dual engine.
    pub const PRIMARY: QueueId = QueueId(0);
    /// Queue 1 of a dual-queue engine.
    pub const SECONDARY: QueueId = QueueId(1);

    /// Returns the queue index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub(crate) fn other(self) -> QueueId {
        QueueId(self.0 ^ 1)
    }
}

/// Reference to a scatter/gather descriptor table owned by the surrounding
/// subsystem.
///
/// The engine stores and forwards it, never dereferences it. The caller must
/// keep the table alive until the job's callback runs (or, for a backlogged
/// job, until it is issued and completes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescTable {
    /// Bus address of the physical-address list.
    pub dma_addr: u64,
    /// Owner-defined handle for the table.
    pub handle: u32,
}

/// Handle to a hardware crypto-context bound to an SA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwContext(pub u32);

/// Command queue fields for one job.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// SA context index that owns the job.
    pub context: u32,
    pub direction: Direction,
    pub hw_context: HwContext,
    pub src: DescTable,
    pub dst: DescTable,
}

/// Flags for [`Hardware::trigger`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerFlags {
    /// The hardware must (re)load the crypto-context before processing.
    /// Set only on the job that bound the context.
    pub load_context: bool,
}

/// Register primitives consumed by the engine.
///
/// All methods are called with the engine lock held and must not block.
pub trait Hardware: Send {
    /// Free command slots in `queue`.
    fn queue_free(&self, queue: QueueId) -> usize;

    /// Completions posted and not yet popped.
    fn posted(&self) -> usize;

    /// Pop the oldest posted completion, advancing hardware state.
    fn pop(&mut self) -> Option<RawCompletion>;

    /// Write a job into `queue` and return the tag the hardware assigned to it.
    ///
    /// The tag must fit the engine's registry. A descriptor whose tag does not
    /// is handed back through [`discard`](Self::discard) before any trigger.
    fn write_descriptor(&mut self, queue: QueueId, desc: &Descriptor) -> Result<Tag, HwFault>;

    /// Withdraw the untriggered descriptor just written to `queue` under
    /// `tag`, freeing its queue slot and tag.
    fn discard(&mut self, queue: QueueId, tag: Tag);

    /// Start processing of the descriptor most recently written to `queue`.
    fn trigger(&mut self, queue: QueueId, flags: TriggerFlags);

    /// Bind a hardware crypto-context for SA `context`.
    fn acquire_context(&mut self, context: u32) -> Result<HwContext, HwFault>;

    /// Return a crypto-context obtained from [`acquire_context`](Self::acquire_context).
    fn release_context(&mut self, hw: HwContext);
}
