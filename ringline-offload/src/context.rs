use crate::completion::{JobCallback, Tag};
use crate::error::Desync;
use crate::hw::HwContext;

/// Opaque handle to an SA context.
///
/// Carries a generation counter so a handle kept past `close()` can never
/// address a context that has since reused the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Handle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Handle { index, generation }
    }

    /// Returns the context slot index. Useful for indexing into per-SA arrays.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// One outstanding-job record.
struct JobSlot {
    /// No job in flight. A slot is in flight exactly when `done == false`.
    done: bool,
    tag: Tag,
    callback: Option<JobCallback>,
}

impl JobSlot {
    fn idle() -> Self {
        JobSlot {
            done: true,
            tag: Tag(0),
            callback: None,
        }
    }
}

/// Fixed-capacity job slot table for one context.
pub(crate) struct JobSlots {
    slots: Vec<JobSlot>,
    free_list: Vec<u16>,
}

impl JobSlots {
    pub fn new(capacity: u16) -> Self {
        let slots = (0..capacity).map(|_| JobSlot::idle()).collect();
        let free_list = (0..capacity).rev().collect();
        JobSlots { slots, free_list }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Outstanding jobs (`job_cnt`).
    pub fn in_flight(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// The slot the next [`occupy`](Self::occupy) will use.
    pub fn next_free(&self) -> Option<u16> {
        self.free_list.last().copied()
    }

    /// Mark the next free slot in flight under `tag`.
    pub fn occupy(&mut self, tag: Tag, callback: Option<JobCallback>) -> Option<u16> {
        let idx = self.free_list.pop()?;
        let slot = &mut self.slots[idx as usize];
        debug_assert!(slot.done);
        slot.done = false;
        slot.tag = tag;
        slot.callback = callback;
        Some(idx)
    }

    /// Whether `slot` is in flight under `tag`.
    pub fn is_in_flight(&self, slot: u16, tag: Tag) -> bool {
        self.slots
            .get(slot as usize)
            .is_some_and(|s| !s.done && s.tag == tag)
    }

    /// Retire the job in `slot`, returning its callback.
    ///
    /// `context` is only used to describe a mismatch.
    pub fn complete(
        &mut self,
        context: u32,
        slot: u16,
        tag: Tag,
    ) -> Result<Option<JobCallback>, Desync> {
        let limit = self.slots.len();
        let entry = self.slots.get_mut(slot as usize).ok_or(Desync::SlotOutOfRange {
            tag: tag.0,
            slot,
            limit,
        })?;
        if entry.done {
            return Err(Desync::SlotIdle {
                tag: tag.0,
                context,
                slot,
            });
        }
        if entry.tag != tag {
            return Err(Desync::TagMismatch {
                tag: tag.0,
                context,
                slot,
                owner: entry.tag.0,
            });
        }
        entry.done = true;
        let callback = entry.callback.take();
        self.free_list.push(slot);
        Ok(callback)
    }

    /// Return every slot to idle, dropping pending callbacks. Returns how
    /// many jobs were abandoned.
    pub fn reset(&mut self) -> usize {
        let abandoned = self.in_flight();
        for slot in self.slots.iter_mut() {
            *slot = JobSlot::idle();
        }
        self.free_list.clear();
        self.free_list.extend((0..self.slots.len() as u16).rev());
        abandoned
    }

    /// Tags of all in-flight jobs.
    pub fn in_flight_tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.slots.iter().filter(|s| !s.done).map(|s| s.tag)
    }
}

/// One security-association context.
pub(crate) struct SaContext {
    pub allocated: bool,
    /// Stay allocated, crypto-context bound, while idle. Otherwise freed once idle.
    pub lock_ctx: bool,
    /// Close requested. Freed once the last job completes.
    pub dismiss: bool,
    pub generation: u32,
    /// Lazily bound hardware crypto-context.
    pub hw: Option<HwContext>,
    pub jobs: JobSlots,
}

impl SaContext {
    fn new(jobs_per_context: u16) -> Self {
        SaContext {
            allocated: false,
            lock_ctx: false,
            dismiss: false,
            generation: 0,
            hw: None,
            jobs: JobSlots::new(jobs_per_context),
        }
    }

    pub fn job_cnt(&self) -> usize {
        self.jobs.in_flight()
    }
}

/// Fixed pool of SA contexts with first-fit allocation.
pub(crate) struct ContextPool {
    contexts: Vec<SaContext>,
    allocated: usize,
}

impl ContextPool {
    pub fn new(max_contexts: u32, jobs_per_context: u16) -> Self {
        let contexts = (0..max_contexts)
            .map(|_| SaContext::new(jobs_per_context))
            .collect();
        ContextPool {
            contexts,
            allocated: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Allocate the lowest-indexed free context.
    pub fn open(&mut self, lock_ctx: bool) -> Option<Handle> {
        let (index, ctx) = self
            .contexts
            .iter_mut()
            .enumerate()
            .find(|(_, c)| !c.allocated)?;
        ctx.allocated = true;
        ctx.lock_ctx = lock_ctx;
        ctx.dismiss = false;
        ctx.hw = None;
        ctx.jobs.reset();
        self.allocated += 1;
        Some(Handle::new(index as u32, ctx.generation))
    }

    /// Return a context to the pool. Hands back the bound hardware
    /// crypto-context, if any, for the caller to release.
    pub fn free(&mut self, index: u32) -> Option<HwContext> {
        let ctx = &mut self.contexts[index as usize];
        debug_assert!(ctx.allocated);
        debug_assert_eq!(ctx.job_cnt(), 0);
        ctx.allocated = false;
        ctx.dismiss = false;
        ctx.generation = ctx.generation.wrapping_add(1);
        self.allocated -= 1;
        ctx.hw.take()
    }

    pub fn get(&self, handle: Handle) -> Option<&SaContext> {
        self.contexts
            .get(handle.index as usize)
            .filter(|c| c.allocated && c.generation == handle.generation)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut SaContext> {
        self.contexts
            .get_mut(handle.index as usize)
            .filter(|c| c.allocated && c.generation == handle.generation)
    }

    /// Access by raw index, for completions resolved through the registry.
    pub fn by_index_mut(&mut self, index: u32) -> Option<&mut SaContext> {
        self.contexts.get_mut(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SaContext> {
        self.contexts.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SaContext> {
        self.contexts.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_lowest_index() {
        let mut pool = ContextPool::new(4, 2);
        let a = pool.open(false).unwrap();
        let b = pool.open(true).unwrap();
        let c = pool.open(false).unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert!(pool.get(b).unwrap().lock_ctx);

        assert_eq!(pool.free(0), None);
        let d = pool.open(false).unwrap();
        assert_eq!(d.index(), 0);
        assert_ne!(d, a);
        assert_eq!(pool.allocated(), 3);
    }

    #[test]
    fn exhaustion() {
        let mut pool = ContextPool::new(2, 1);
        assert!(pool.open(false).is_some());
        assert!(pool.open(false).is_some());
        assert!(pool.open(false).is_none());
    }

    #[test]
    fn stale_handle_rejected() {
        let mut pool = ContextPool::new(1, 1);
        let a = pool.open(false).unwrap();
        pool.free(a.index);
        assert!(pool.get(a).is_none());
        let b = pool.open(false).unwrap();
        assert!(pool.get(a).is_none());
        assert!(pool.get_mut(b).is_some());
        assert_eq!(b.index(), a.index());
        assert_ne!(a, b);
    }

    #[test]
    fn free_hands_back_hw_context() {
        let mut pool = ContextPool::new(1, 1);
        let a = pool.open(true).unwrap();
        pool.get_mut(a).unwrap().hw = Some(HwContext(9));
        assert_eq!(pool.free(a.index), Some(HwContext(9)));
        assert_eq!(pool.by_index_mut(0).unwrap().hw, None);
    }

    #[test]
    fn job_slots_occupy_complete() {
        let mut jobs = JobSlots::new(2);
        assert_eq!(jobs.next_free(), Some(0));
        let s0 = jobs.occupy(Tag(10), None).unwrap();
        let s1 = jobs.occupy(Tag(11), None).unwrap();
        assert_eq!((s0, s1), (0, 1));
        assert_eq!(jobs.in_flight(), 2);
        assert_eq!(jobs.next_free(), None);
        assert!(jobs.occupy(Tag(12), None).is_none());
        assert!(jobs.is_in_flight(s1, Tag(11)));

        assert!(jobs.complete(0, s1, Tag(11)).unwrap().is_none());
        assert_eq!(jobs.in_flight(), 1);
        assert!(!jobs.is_in_flight(s1, Tag(11)));
        assert_eq!(jobs.next_free(), Some(1));
    }

    #[test]
    fn job_slots_complete_validates() {
        let mut jobs = JobSlots::new(2);
        let s = jobs.occupy(Tag(3), None).unwrap();
        assert_eq!(
            jobs.complete(7, s, Tag(4)).err(),
            Some(Desync::TagMismatch {
                tag: 4,
                context: 7,
                slot: s,
                owner: 3
            })
        );
        assert_eq!(
            jobs.complete(7, 1, Tag(3)).err(),
            Some(Desync::SlotIdle {
                tag: 3,
                context: 7,
                slot: 1
            })
        );
        assert_eq!(jobs.in_flight(), 1);
    }

    #[test]
    fn job_slots_callback_returned_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        use crate::completion::JobCompletion;

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut jobs = JobSlots::new(1);
        let s = jobs
            .occupy(
                Tag(1),
                Some(Box::new(move |_: &JobCompletion| {
                    h.fetch_add(1, Ordering::Relaxed);
                })),
            )
            .unwrap();
        assert_eq!(jobs.in_flight_tags().collect::<Vec<_>>(), vec![Tag(1)]);
        let cb = jobs.complete(0, s, Tag(1)).unwrap();
        assert!(cb.is_some());
        assert!(jobs.complete(0, s, Tag(1)).is_err());
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn reset_abandons_jobs() {
        let mut jobs = JobSlots::new(3);
        jobs.occupy(Tag(1), None);
        jobs.occupy(Tag(2), None);
        assert_eq!(jobs.reset(), 2);
        assert_eq!(jobs.in_flight(), 0);
        assert_eq!(jobs.next_free(), Some(0));
        assert_eq!(jobs.capacity(), 3);
    }
}
