use crate::error::Error;
use crate::hw::{Direction, QueueId};

/// Which direction gets the larger of two hardware command queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Inbound (decrypt) jobs prefer the larger queue.
    FavorRx,
    /// Outbound (encrypt) jobs prefer the larger queue.
    FavorTx,
}

/// Command queue geometry of the offload hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLayout {
    /// One command queue shared by both directions.
    Single { depth: u16 },
    /// Two independent command queues. Jobs are steered by direction
    /// according to `policy`.
    Dual { depths: [u16; 2], policy: QueuePolicy },
}

impl QueueLayout {
    /// Number of hardware command queues.
    pub fn queue_count(&self) -> usize {
        match self {
            QueueLayout::Single { .. } => 1,
            QueueLayout::Dual { .. } => 2,
        }
    }

    /// Depth of a queue. Out-of-range queues report 0.
    pub fn depth(&self, queue: QueueId) -> u16 {
        match (self, queue.index()) {
            (QueueLayout::Single { depth }, 0) => *depth,
            (QueueLayout::Dual { depths, .. }, i) if i < 2 => depths[i],
            _ => 0,
        }
    }

    /// Dual layouts with equal depths may overflow into the other queue.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, QueueLayout::Dual { depths, .. } if depths[0] == depths[1])
    }

    /// The queue a job travelling in `direction` should be written to.
    pub fn preferred(&self, direction: Direction) -> QueueId {
        match self {
            QueueLayout::Single { .. } => QueueId::PRIMARY,
            QueueLayout::Dual { depths, policy } => {
                let larger = if depths[1] > depths[0] {
                    QueueId::SECONDARY
                } else {
                    QueueId::PRIMARY
                };
                let favored = match policy {
                    QueuePolicy::FavorRx => Direction::Rx,
                    QueuePolicy::FavorTx => Direction::Tx,
                };
                if direction == favored {
                    larger
                } else {
                    larger.other()
                }
            }
        }
    }

    /// The overflow queue for `queue`, if this layout permits one.
    pub fn alternate(&self, queue: QueueId) -> Option<QueueId> {
        if self.is_symmetric() {
            Some(queue.other())
        } else {
            None
        }
    }
}

/// Sizing of the engine's bookkeeping tables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of SA contexts in the pool.
    pub max_contexts: u32,
    /// Outstanding jobs allowed per context. Bounds the tag keyspace a single
    /// context can consume.
    pub jobs_per_context: u16,
    /// Deferred submissions held while the hardware queue is full. 0 disables
    /// the backlog.
    pub backlog_capacity: u32,
    /// Width of the software-ID registry. Every tag the hardware issues must
    /// be smaller than this.
    pub registry_size: u32,
    /// Hardware command queue geometry.
    pub queues: QueueLayout,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_contexts: 64,
            jobs_per_context: 64,
            backlog_capacity: 64,
            registry_size: 256,
            queues: QueueLayout::Single { depth: 32 },
        }
    }
}

impl EngineConfig {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_contexts == 0 || self.max_contexts > u16::MAX as u32 {
            return Err(Error::Config(
                "max_contexts must be > 0 and <= 65535".into(),
            ));
        }
        if self.jobs_per_context == 0 {
            return Err(Error::Config("jobs_per_context must be > 0".into()));
        }
        if self.registry_size == 0 || self.registry_size > 1 << 16 {
            return Err(Error::Config(
                "registry_size must be > 0 and <= 65536".into(),
            ));
        }
        match self.queues {
            QueueLayout::Single { depth } if depth == 0 => {
                return Err(Error::Config("queue depth must be > 0".into()));
            }
            QueueLayout::Dual { depths, .. } if depths.contains(&0) => {
                return Err(Error::Config("queue depths must be > 0".into()));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`] with `build()` validation.
///
/// # Example
///
/// ```rust
/// use ringline_offload::{EngineConfigBuilder, QueuePolicy};
///
/// let config = EngineConfigBuilder::new()
///     .contexts(128)
///     .jobs_per_context(32)
///     .backlog(256)
///     .registry_size(512)
///     .dual_queue([64, 16], QueuePolicy::FavorRx)
///     .build()
///     .expect("invalid config");
/// assert_eq!(config.max_contexts, 128);
/// ```
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of SA contexts.
    pub fn contexts(mut self, n: u32) -> Self {
        self.config.max_contexts = n;
        self
    }

    /// Set the per-context job slot capacity.
    pub fn jobs_per_context(mut self, n: u16) -> Self {
        self.config.jobs_per_context = n;
        self
    }

    /// Set the backlog capacity. 0 disables deferral.
    pub fn backlog(mut self, n: u32) -> Self {
        self.config.backlog_capacity = n;
        self
    }

    /// Set the software-ID registry width.
    pub fn registry_size(mut self, n: u32) -> Self {
        self.config.registry_size = n;
        self
    }

    /// Use a single hardware command queue.
    pub fn single_queue(mut self, depth: u16) -> Self {
        self.config.queues = QueueLayout::Single { depth };
        self
    }

    /// Use two hardware command queues steered by `policy`.
    pub fn dual_queue(mut self, depths: [u16; 2], policy: QueuePolicy) -> Self {
        self.config.queues = QueueLayout::Dual { depths, policy };
        self
    }

    /// Get mutable access to the underlying config.
    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    /// Validate and build the final [`EngineConfig`].
    pub fn build(self) -> Result<EngineConfig, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}
