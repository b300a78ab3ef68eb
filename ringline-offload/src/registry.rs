use crate::completion::{JobRef, Tag};
use crate::error::{Desync, HwFault};

/// Maps hardware tags to the job slot that owns them.
///
/// Assignment overwrites unconditionally: the hardware never reissues a tag
/// that is still in flight. Lookups validate everything, since a bad entry
/// means hardware and software state have diverged.
pub(crate) struct SwIdRegistry {
    entries: Vec<u32>,
    contexts: usize,
    slots: usize,
}

impl SwIdRegistry {
    pub fn new(size: u32, contexts: u32, slots: u16) -> Self {
        SwIdRegistry {
            entries: vec![JobRef::UNUSED; size as usize],
            contexts: contexts as usize,
            slots: slots as usize,
        }
    }

    pub fn assign(&mut self, tag: Tag, job: JobRef) -> Result<(), HwFault> {
        let size = self.entries.len();
        let entry = self
            .entries
            .get_mut(tag.index())
            .ok_or(HwFault::TagOutOfRange { tag: tag.0, size })?;
        *entry = job.encode();
        Ok(())
    }

    /// Decode the job registered under `tag`. The caller still has to confirm
    /// the slot itself is in flight under the same tag.
    pub fn lookup(&self, tag: Tag) -> Result<JobRef, Desync> {
        let raw = *self.entries.get(tag.index()).ok_or(Desync::TagOutOfRange {
            tag: tag.0,
            size: self.entries.len(),
        })?;
        JobRef::decode(raw, tag, self.contexts, self.slots)
    }

    pub fn clear(&mut self, tag: Tag) {
        if let Some(entry) = self.entries.get_mut(tag.index()) {
            *entry = JobRef::UNUSED;
        }
    }

    #[cfg(test)]
    fn in_use(&self) -> usize {
        self.entries.iter().filter(|&&e| e != JobRef::UNUSED).count()
    }
}
