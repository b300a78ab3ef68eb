use thiserror::Error;

/// Errors returned by the offload engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Every SA context is allocated.
    #[error("no free SA context")]
    NoContext,
    /// Handle is out of range, stale, or refers to a freed context.
    #[error("invalid context handle")]
    InvalidHandle,
    /// Hardware command queue and backlog are both full.
    #[error("command queue full")]
    FifoFull,
    /// The context has no free job slot.
    #[error("context job slots exhausted")]
    JobsFull,
    /// Hardware and software bookkeeping have diverged.
    #[error("fatal: {0}")]
    Fatal(#[from] Desync),
    /// A register-level operation failed during submission.
    #[error("hardware: {0}")]
    Hardware(#[from] HwFault),
    /// Invalid engine configuration.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Capacity errors are expected under load and signal the caller to retry
    /// later. They are never logged as failures.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::NoContext | Error::FifoFull | Error::JobsFull)
    }

    /// Whether this maps to the engine's `FATAL` status.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_) | Error::Hardware(_))
    }
}

/// A completion tag could not be resolved to the job that owns it.
///
/// Any of these aborts the current drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Desync {
    /// Tag does not fit in the software-ID registry.
    #[error("tag {tag} outside registry of {size} entries")]
    TagOutOfRange { tag: u16, size: usize },
    /// No job is registered under the tag.
    #[error("tag {tag} has no registered job")]
    UnusedTag { tag: u16 },
    /// Registry entry decodes to a context index past the pool.
    #[error("tag {tag} maps to context {context}, pool has {limit}")]
    ContextOutOfRange { tag: u16, context: u32, limit: usize },
    /// Registry entry decodes to a slot index past the per-context table.
    #[error("tag {tag} maps to slot {slot}, context has {limit}")]
    SlotOutOfRange { tag: u16, slot: u16, limit: usize },
    /// The target slot holds no in-flight job.
    #[error("tag {tag} maps to idle slot {context}/{slot}")]
    SlotIdle { tag: u16, context: u32, slot: u16 },
    /// The target slot is in flight under a different tag.
    #[error("tag {tag} maps to slot {context}/{slot} owned by tag {owner}")]
    TagMismatch {
        tag: u16,
        context: u32,
        slot: u16,
        owner: u16,
    },
}

/// Register-level failure reported by a [`Hardware`](crate::hw::Hardware)
/// implementation during submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwFault {
    /// The descriptor could not be written to the command queue.
    #[error("descriptor write rejected: {0}")]
    DescriptorRejected(String),
    /// The hardware issued a tag the registry cannot hold.
    #[error("issued tag {tag} outside registry of {size} entries")]
    TagOutOfRange { tag: u16, size: usize },
    /// No hardware crypto-context could be bound to the SA.
    #[error("hardware context unavailable")]
    ContextUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_taxonomy() {
        assert!(Error::NoContext.is_capacity());
        assert!(Error::FifoFull.is_capacity());
        assert!(Error::JobsFull.is_capacity());
        assert!(!Error::InvalidHandle.is_capacity());
        assert!(!Error::InvalidHandle.is_fatal());

        let fatal: Error = Desync::UnusedTag { tag: 3 }.into();
        assert!(fatal.is_fatal());
        assert!(!fatal.is_capacity());

        let hw: Error = HwFault::ContextUnavailable.into();
        assert!(hw.is_fatal());
    }

    #[test]
    fn desync_message_names_tag() {
        let err = Desync::TagMismatch {
            tag: 7,
            context: 2,
            slot: 5,
            owner: 9,
        };
        assert_eq!(err.to_string(), "tag 7 maps to slot 2/5 owned by tag 9");
    }
}
