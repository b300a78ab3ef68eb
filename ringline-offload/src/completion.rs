use crate::context::Handle;
use crate::error::Desync;

/// Hardware-issued identifier of an in-flight job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u16);

impl Tag {
    /// Returns the tag as a registry index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Location of a job: (context index, job slot index).
///
/// Layout (32-bit registry word):
/// ```text
/// Bits 31..16: context index
/// Bits 15..0:  slot index
/// ```
/// `0xFFFF_FFFF` is the unused sentinel. Pools are capped at 65535 entries so
/// no valid pair encodes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRef {
    pub context: u32,
    pub slot: u16,
}

impl JobRef {
    pub const UNUSED: u32 = u32::MAX;
    const CONTEXT_SHIFT: u32 = 16;
    const SLOT_MASK: u32 = 0xFFFF;

    #[inline]
    pub fn encode(self) -> u32 {
        debug_assert!(self.context < (1 << 16), "context exceeds 16 bits");
        (self.context << Self::CONTEXT_SHIFT) | self.slot as u32
    }

    /// Decode a registry word, checking both indices against the table sizes.
    pub fn decode(raw: u32, tag: Tag, contexts: usize, slots: usize) -> Result<JobRef, Desync> {
        if raw == Self::UNUSED {
            return Err(Desync::UnusedTag { tag: tag.0 });
        }
        let context = raw >> Self::CONTEXT_SHIFT;
        let slot = (raw & Self::SLOT_MASK) as u16;
        if context as usize >= contexts {
            return Err(Desync::ContextOutOfRange {
                tag: tag.0,
                context,
                limit: contexts,
            });
        }
        if slot as usize >= slots {
            return Err(Desync::SlotOutOfRange {
                tag: tag.0,
                slot,
                limit: slots,
            });
        }
        Ok(JobRef { context, slot })
    }
}

/// One entry popped from the hardware's posted-completion FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCompletion {
    pub tag: Tag,
    /// Output length in bytes.
    pub len: u32,
    /// Hardware transform return code. 0 is success; anything else
    /// (sequence rollover, authentication failure, ...) is passed through.
    pub result: u32,
    /// The SA's soft lifetime threshold was crossed by this job.
    pub soft_ttl: bool,
}

/// Delivered to a job's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCompletion {
    /// Context the job was submitted on.
    pub handle: Handle,
    pub tag: Tag,
    pub len: u32,
    pub result: u32,
    pub soft_ttl: bool,
}

impl JobCompletion {
    /// Whether the hardware reported a successful transform.
    pub fn is_success(&self) -> bool {
        self.result == 0
    }
}

/// Completion callback. Runs without the engine lock held and may call back
/// into the engine.
pub type JobCallback = Box<dyn FnOnce(&JobCompletion) + Send + 'static>;

/// Outcome of a successful [`Engine::submit`](crate::Engine::submit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Written to hardware under this tag.
    Issued(Tag),
    /// Parked in the backlog; it will be issued by a later drain. The
    /// descriptor tables must stay alive until the callback runs.
    ///
    /// A parked job whose retry is rejected for any reason other than a full
    /// queue (its context was closed or freed, its slots are full, or the
    /// hardware faulted) is discarded and its callback is dropped without
    /// running. Such jobs are counted by `ringline_offload/backlog/dropped`;
    /// callers that need to reclaim the tables for them must track queued
    /// submissions themselves.
    Queued,
}

impl Submitted {
    /// Returns the tag if the job reached hardware.
    pub fn tag(self) -> Option<Tag> {
        match self {
            Submitted::Issued(tag) => Some(tag),
            Submitted::Queued => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let job = JobRef {
            context: 0x1234,
            slot: 0x0042,
        };
        let raw = job.encode();
        assert_eq!(raw, 0x1234_0042);
        assert_eq!(JobRef::decode(raw, Tag(1), 0x2000, 0x43), Ok(job));
        assert!(JobRef::decode(raw, Tag(1), 0x2000, 0x42).is_err());
    }

    #[test]
    fn max_indices_stay_clear_of_sentinel() {
        let job = JobRef {
            context: 0xFFFE,
            slot: 0xFFFE,
        };
        assert_ne!(job.encode(), JobRef::UNUSED);
        assert_eq!(JobRef::decode(job.encode(), Tag(0), 0xFFFF, 0xFFFF), Ok(job));
    }

    #[test]
    fn decode_rejects_sentinel() {
        assert_eq!(
            JobRef::decode(JobRef::UNUSED, Tag(9), 4, 4),
            Err(Desync::UnusedTag { tag: 9 })
        );
    }

    #[test]
    fn decode_checks_ranges() {
        let raw = JobRef { context: 4, slot: 0 }.encode();
        assert_eq!(
            JobRef::decode(raw, Tag(2), 4, 8),
            Err(Desync::ContextOutOfRange {
                tag: 2,
                context: 4,
                limit: 4
            })
        );
        let raw = JobRef { context: 1, slot: 8 }.encode();
        assert_eq!(
            JobRef::decode(raw, Tag(2), 4, 8),
            Err(Desync::SlotOutOfRange {
                tag: 2,
                slot: 8,
                limit: 8
            })
        );
    }

    #[test]
    fn submitted_tag() {
        assert_eq!(Submitted::Issued(Tag(5)).tag(), Some(Tag(5)));
        assert_eq!(Submitted::Queued.tag(), None);
    }
}
