//! In-memory offload hardware model.
//!
//! [`SimDevice`] implements [`Hardware`] with per-queue command FIFOs of the
//! configured depth, a bounded tag pool and a posted-completion FIFO. The
//! "hardware side" is driven from outside the engine through a cloneable
//! [`SimController`]: it decides when queued commands complete and with what
//! result, and it records how the engine used the device.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::completion::{RawCompletion, Tag};
use crate::config::{EngineConfig, QueueLayout};
use crate::error::HwFault;
use crate::hw::{Descriptor, Hardware, HwContext, QueueId, TriggerFlags};

/// A descriptor as written by the engine.
#[derive(Debug, Clone, Copy)]
pub struct WrittenJob {
    pub queue: QueueId,
    pub tag: Tag,
    pub desc: Descriptor,
}

struct Command {
    tag: Tag,
    triggered: bool,
}

struct SimState {
    depths: Vec<usize>,
    queues: Vec<VecDeque<Command>>,
    posted: VecDeque<RawCompletion>,
    free_tags: VecDeque<u16>,
    issued: Vec<bool>,
    written: Vec<WrittenJob>,
    triggers: Vec<TriggerFlags>,
    live_contexts: HashSet<u32>,
    next_hw_context: u32,
    contexts_bound: usize,
    contexts_released: usize,
    bad_releases: usize,
    fail_next_write: bool,
    fail_next_acquire: bool,
}

impl SimState {
    /// Complete the head of `queue` if it has been triggered.
    fn complete_head(&mut self, queue: usize, result: u32, len: u32, soft_ttl: bool) -> Option<Tag> {
        if !self.queues.get(queue)?.front()?.triggered {
            return None;
        }
        let cmd = self.queues[queue].pop_front()?;
        self.posted.push_back(RawCompletion {
            tag: cmd.tag,
            len,
            result,
            soft_ttl,
        });
        Some(cmd.tag)
    }
}

/// Simulated offload device. See the [module docs](self).
pub struct SimDevice {
    shared: Arc<Mutex<SimState>>,
}

/// External control and inspection of a [`SimDevice`].
#[derive(Clone)]
pub struct SimController {
    shared: Arc<Mutex<SimState>>,
}

impl SimDevice {
    /// A device matching the engine's queue layout, issuing tags from
    /// `0..registry_size`.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_layout(config.queues, config.registry_size)
    }

    pub fn with_layout(layout: QueueLayout, tags: u32) -> Self {
        let depths: Vec<usize> = (0..layout.queue_count())
            .map(|i| layout.depth(QueueId(i as u8)) as usize)
            .collect();
        let tags = tags.min(1 << 16) as usize;
        let state = SimState {
            queues: depths.iter().map(|&d| VecDeque::with_capacity(d)).collect(),
            depths,
            posted: VecDeque::new(),
            free_tags: (0..tags).map(|t| t as u16).collect(),
            issued: vec![false; tags],
            written: Vec::new(),
            triggers: Vec::new(),
            live_contexts: HashSet::new(),
            next_hw_context: 0,
            contexts_bound: 0,
            contexts_released: 0,
            bad_releases: 0,
            fail_next_write: false,
            fail_next_acquire: false,
        };
        SimDevice {
            shared: Arc::new(Mutex::new(state)),
        }
    }

    pub fn controller(&self) -> SimController {
        SimController {
            shared: self.shared.clone(),
        }
    }
}

impl Hardware for SimDevice {
    fn queue_free(&self, queue: QueueId) -> usize {
        let state = self.shared.lock();
        match state.queues.get(queue.index()) {
            Some(q) => state.depths[queue.index()].saturating_sub(q.len()),
            None => 0,
        }
    }

    fn posted(&self) -> usize {
        self.shared.lock().posted.len()
    }

    fn pop(&mut self) -> Option<RawCompletion> {
        let mut state = self.shared.lock();
        let raw = state.posted.pop_front()?;
        let idx = raw.tag.index();
        if state.issued.get(idx).copied().unwrap_or(false) {
            state.issued[idx] = false;
            state.free_tags.push_back(raw.tag.0);
        }
        Some(raw)
    }

    fn write_descriptor(&mut self, queue: QueueId, desc: &Descriptor) -> Result<Tag, HwFault> {
        let mut state = self.shared.lock();
        if std::mem::take(&mut state.fail_next_write) {
            return Err(HwFault::DescriptorRejected("injected fault".into()));
        }
        let q = queue.index();
        if q >= state.queues.len() || state.queues[q].len() >= state.depths[q] {
            return Err(HwFault::DescriptorRejected(format!("queue {q} full")));
        }
        let tag = state
            .free_tags
            .pop_front()
            .map(Tag)
            .ok_or_else(|| HwFault::DescriptorRejected("tag pool exhausted".into()))?;
        state.issued[tag.index()] = true;
        state.queues[q].push_back(Command {
            tag,
            triggered: false,
        });
        state.written.push(WrittenJob {
            queue,
            tag,
            desc: *desc,
        });
        Ok(tag)
    }

    fn discard(&mut self, queue: QueueId, tag: Tag) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(q) = state.queues.get_mut(queue.index()) else {
            return;
        };
        if !q.back().is_some_and(|cmd| cmd.tag == tag && !cmd.triggered) {
            return;
        }
        q.pop_back();
        if state.written.last().is_some_and(|w| w.tag == tag) {
            state.written.pop();
        }
        if let Some(issued) = state.issued.get_mut(tag.index()) {
            *issued = false;
            state.free_tags.push_back(tag.0);
        }
    }

    fn trigger(&mut self, queue: QueueId, flags: TriggerFlags) {
        let mut state = self.shared.lock();
        state.triggers.push(flags);
        if let Some(cmd) = state
            .queues
            .get_mut(queue.index())
            .and_then(|q| q.back_mut())
        {
            cmd.triggered = true;
        }
    }

    fn acquire_context(&mut self, _context: u32) -> Result<HwContext, HwFault> {
        let mut state = self.shared.lock();
        if std::mem::take(&mut state.fail_next_acquire) {
            return Err(HwFault::ContextUnavailable);
        }
        let id = state.next_hw_context;
        state.next_hw_context = id.wrapping_add(1);
        state.live_contexts.insert(id);
        state.contexts_bound += 1;
        Ok(HwContext(id))
    }

    fn release_context(&mut self, hw: HwContext) {
        let mut state = self.shared.lock();
        if state.live_contexts.remove(&hw.0) {
            state.contexts_released += 1;
        } else {
            state.bad_releases += 1;
        }
    }
}

impl SimController {
    /// Complete the oldest triggered command on `queue`.
    pub fn complete_one(&self, queue: QueueId, result: u32, len: u32, soft_ttl: bool) -> Option<Tag> {
        self.shared
            .lock()
            .complete_head(queue.index(), result, len, soft_ttl)
    }

    /// Complete every triggered command, queue by queue, with `result`.
    /// Returns the number completed.
    pub fn complete_all(&self, result: u32) -> usize {
        let mut state = self.shared.lock();
        let mut n = 0;
        for q in 0..state.queues.len() {
            while state.complete_head(q, result, 0, false).is_some() {
                n += 1;
            }
        }
        n
    }

    /// Post a completion that the engine never submitted.
    pub fn inject(&self, raw: RawCompletion) {
        self.shared.lock().posted.push_back(raw);
    }

    /// Commands waiting in `queue`.
    pub fn pending(&self, queue: QueueId) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue.index())
            .map_or(0, |q| q.len())
    }

    /// Reject the next descriptor write.
    pub fn fail_next_write(&self) {
        self.shared.lock().fail_next_write = true;
    }

    /// Refuse the next crypto-context acquisition.
    pub fn fail_next_acquire(&self) {
        self.shared.lock().fail_next_acquire = true;
    }

    /// Every descriptor written so far, oldest first.
    pub fn written(&self) -> Vec<WrittenJob> {
        self.shared.lock().written.clone()
    }

    /// Flags of every trigger so far, oldest first.
    pub fn trigger_log(&self) -> Vec<TriggerFlags> {
        self.shared.lock().triggers.clone()
    }

    pub fn contexts_bound(&self) -> usize {
        self.shared.lock().contexts_bound
    }

    pub fn contexts_released(&self) -> usize {
        self.shared.lock().contexts_released
    }

    /// Crypto-contexts bound and not yet released.
    pub fn contexts_live(&self) -> usize {
        self.shared.lock().live_contexts.len()
    }

    /// Releases of a context that was not bound (double or bogus release).
    pub fn bad_releases(&self) -> usize {
        self.shared.lock().bad_releases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{DescTable, Direction};

    fn desc() -> Descriptor {
        let table = DescTable {
            dma_addr: 0,
            handle: 0,
        };
        Descriptor {
            context: 0,
            direction: Direction::Tx,
            hw_context: HwContext(0),
            src: table,
            dst: table,
        }
    }

    #[test]
    fn queue_depth_and_tags() {
        let mut dev = SimDevice::with_layout(QueueLayout::Single { depth: 2 }, 8);
        let ctl = dev.controller();
        assert_eq!(dev.queue_free(QueueId::PRIMARY), 2);
        let a = dev.write_descriptor(QueueId::PRIMARY, &desc()).unwrap();
        let b = dev.write_descriptor(QueueId::PRIMARY, &desc()).unwrap();
        assert_ne!(a, b);
        assert_eq!(dev.queue_free(QueueId::PRIMARY), 0);
        assert!(dev.write_descriptor(QueueId::PRIMARY, &desc()).is_err());
        assert_eq!(ctl.pending(QueueId::PRIMARY), 2);
        assert_eq!(dev.queue_free(QueueId::SECONDARY), 0);
    }

    #[test]
    fn only_triggered_commands_complete() {
        let mut dev = SimDevice::with_layout(QueueLayout::Single { depth: 4 }, 8);
        let ctl = dev.controller();
        let a = dev.write_descriptor(QueueId::PRIMARY, &desc()).unwrap();
        assert_eq!(ctl.complete_all(0), 0);
        dev.trigger(QueueId::PRIMARY, TriggerFlags::default());
        assert_eq!(ctl.complete_one(QueueId::PRIMARY, 5, 128, true), Some(a));
        assert_eq!(dev.posted(), 1);
        let raw = dev.pop().unwrap();
        assert_eq!((raw.tag, raw.result, raw.len, raw.soft_ttl), (a, 5, 128, true));
        assert_eq!(dev.posted(), 0);
    }

    #[test]
    fn tags_recycle_after_pop() {
        let mut dev = SimDevice::with_layout(QueueLayout::Single { depth: 4 }, 1);
        let ctl = dev.controller();
        let a = dev.write_descriptor(QueueId::PRIMARY, &desc()).unwrap();
        dev.trigger(QueueId::PRIMARY, TriggerFlags::default());
        assert!(dev.write_descriptor(QueueId::PRIMARY, &desc()).is_err());
        ctl.complete_all(0);
        dev.pop();
        assert_eq!(dev.write_descriptor(QueueId::PRIMARY, &desc()), Ok(a));
    }

    #[test]
    fn discard_withdraws_untriggered_tail() {
        let mut dev = SimDevice::with_layout(QueueLayout::Single { depth: 2 }, 2);
        let ctl = dev.controller();
        let a = dev.write_descriptor(QueueId::PRIMARY, &desc()).unwrap();
        dev.trigger(QueueId::PRIMARY, TriggerFlags::default());
        let b = dev.write_descriptor(QueueId::PRIMARY, &desc()).unwrap();

        // Triggered commands are left alone.
        dev.discard(QueueId::PRIMARY, a);
        assert_eq!(ctl.pending(QueueId::PRIMARY), 2);

        dev.discard(QueueId::PRIMARY, b);
        assert_eq!(ctl.pending(QueueId::PRIMARY), 1);
        assert_eq!(ctl.written().len(), 1);
        assert_eq!(dev.write_descriptor(QueueId::PRIMARY, &desc()), Ok(b));
    }

    #[test]
    fn context_accounting() {
        let mut dev = SimDevice::with_layout(QueueLayout::Single { depth: 1 }, 1);
        let ctl = dev.controller();
        let hw = dev.acquire_context(3).unwrap();
        assert_eq!(ctl.contexts_live(), 1);
        dev.release_context(hw);
        dev.release_context(hw);
        assert_eq!(ctl.contexts_released(), 1);
        assert_eq!(ctl.bad_releases(), 1);

        ctl.fail_next_acquire();
        assert_eq!(dev.acquire_context(3), Err(HwFault::ContextUnavailable));
        assert!(dev.acquire_context(3).is_ok());
    }
}
