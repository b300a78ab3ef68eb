use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::backlog::{Backlog, BacklogEntry};
use crate::completion::{JobCallback, JobCompletion, JobRef, Submitted, Tag};
use crate::config::{EngineConfig, QueueLayout};
use crate::context::{ContextPool, Handle};
use crate::error::{Desync, Error};
use crate::hw::{DescTable, Descriptor, Direction, Hardware, HwContext, QueueId, TriggerFlags};
use crate::metrics;
use crate::registry::SwIdRegistry;

/// Point-in-time view of engine occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Allocated SA contexts, including ones awaiting deferred free.
    pub contexts_allocated: usize,
    /// Jobs written to hardware and not yet drained.
    pub jobs_in_flight: usize,
    /// Deferred submissions waiting for queue space.
    pub backlog_len: usize,
    /// Completions posted by hardware and not yet drained.
    pub posted: usize,
    /// Free command slots per queue. Unused queues report 0.
    pub queue_free: [usize; 2],
}

/// Asynchronous offload job engine for one hardware instance.
///
/// All bookkeeping sits behind a single lock. Submission and drain hold it
/// only while touching tables and registers; callbacks run after the guard
/// is dropped, so they may call [`submit`](Self::submit) or
/// [`close`](Self::close) themselves. No operation blocks on hardware.
pub struct Engine<H: Hardware> {
    state: Mutex<EngineState<H>>,
}

struct EngineState<H> {
    hw: H,
    layout: QueueLayout,
    contexts: ContextPool,
    registry: SwIdRegistry,
    backlog: Backlog,
}

/// A job that could not be admitted, handed back with the reason.
struct Rejected {
    error: Error,
    job: BacklogEntry,
}

impl Rejected {
    fn new(error: Error, job: BacklogEntry) -> Self {
        Rejected { error, job }
    }
}

/// Result of popping one posted completion.
enum Reaped {
    Empty,
    Job {
        callback: Option<JobCallback>,
        completion: JobCompletion,
    },
}

impl<H: Hardware> Engine<H> {
    /// Create an engine over `hw`, sizing every table from `config`.
    pub fn new(config: EngineConfig, hw: H) -> Result<Self, Error> {
        config.validate()?;
        let state = EngineState {
            hw,
            layout: config.queues,
            contexts: ContextPool::new(config.max_contexts, config.jobs_per_context),
            registry: SwIdRegistry::new(
                config.registry_size,
                config.max_contexts,
                config.jobs_per_context,
            ),
            backlog: Backlog::new(config.backlog_capacity),
        };
        debug!(
            contexts = config.max_contexts,
            jobs_per_context = config.jobs_per_context,
            backlog = config.backlog_capacity,
            registry = config.registry_size,
            queues = config.queues.queue_count(),
            "offload engine created"
        );
        Ok(Engine {
            state: Mutex::new(state),
        })
    }

    /// Allocate the lowest-indexed free SA context.
    ///
    /// With `lock_ctx` the SA persists across jobs: it stays allocated, with
    /// its hardware crypto-context bound, until [`close`](Self::close).
    /// Without it the SA is single-use: the drain that retires its last job
    /// frees it and releases the crypto-context, and the handle goes stale.
    /// [`Error::NoContext`] means the pool is exhausted and is expected
    /// under load.
    pub fn open(&self, lock_ctx: bool) -> Result<Handle, Error> {
        let mut state = self.state.lock();
        match state.contexts.open(lock_ctx) {
            Some(handle) => {
                metrics::CONTEXTS_ALLOCATED.increment();
                trace!(context = handle.index, lock_ctx, "context opened");
                Ok(handle)
            }
            None => {
                metrics::NO_CONTEXT.increment();
                Err(Error::NoContext)
            }
        }
    }

    /// Close an SA context.
    ///
    /// An idle context is freed at once. A busy one is marked dismissed and
    /// freed by the drain that retires its last job; outstanding jobs are not
    /// cancelled. Closing a dismissed context again is a no-op. A handle whose
    /// context was already freed is rejected with [`Error::InvalidHandle`].
    pub fn close(&self, handle: Handle) -> Result<(), Error> {
        let mut state = self.state.lock();
        let ctx = state
            .contexts
            .get_mut(handle)
            .ok_or(Error::InvalidHandle)?;
        if ctx.dismiss {
            return Ok(());
        }
        ctx.dismiss = true;
        let job_cnt = ctx.job_cnt();
        if job_cnt == 0 {
            state.free_context(handle.index);
        } else {
            debug!(context = handle.index, job_cnt, "close deferred until jobs drain");
        }
        Ok(())
    }

    /// Submit a transform job on `handle`.
    ///
    /// Returns [`Submitted::Issued`] with the hardware tag once the job is in
    /// a command queue. When every eligible queue is full and `allow_backlog`
    /// is set, the job is parked and [`Submitted::Queued`] is returned; it
    /// will be issued by a later [`drain`](Self::drain), so `src` and `dst`
    /// must stay alive. [`Error::FifoFull`] and [`Error::JobsFull`] are
    /// capacity signals for the caller to retry later.
    pub fn submit(
        &self,
        handle: Handle,
        direction: Direction,
        src: DescTable,
        dst: DescTable,
        callback: Option<JobCallback>,
        allow_backlog: bool,
    ) -> Result<Submitted, Error> {
        let job = BacklogEntry {
            handle,
            direction,
            src,
            dst,
            callback,
        };
        let result = self.state.lock().admit(job, allow_backlog);
        match result {
            Ok(submitted) => Ok(submitted),
            Err(Rejected { error, .. }) => {
                match &error {
                    Error::FifoFull => {
                        metrics::FIFO_FULL.increment();
                    }
                    Error::JobsFull => {
                        metrics::JOBS_FULL.increment();
                    }
                    e if e.is_fatal() => {
                        error!(context = handle.index, error = %e, "submission failed");
                    }
                    _ => {}
                }
                Err(error)
            }
        }
    }

    /// Drain posted completions, dispatch their callbacks, then retry the
    /// backlog.
    ///
    /// Safe to call from any thread; concurrent calls are serialized per
    /// completion, so none is processed twice or lost. A completion whose tag
    /// cannot be resolved aborts the pass and leaves the remaining posted
    /// entries for the next call. Returns the number of completions
    /// dispatched.
    pub fn drain(&self) -> usize {
        let mut dispatched = 0;
        loop {
            let mut state = self.state.lock();
            match state.reap_one() {
                Ok(Reaped::Job {
                    callback,
                    completion,
                }) => {
                    drop(state);
                    dispatched += 1;
                    if let Some(callback) = callback {
                        callback(&completion);
                    }
                }
                Ok(Reaped::Empty) => {
                    state.retry_backlog();
                    return dispatched;
                }
                Err(desync) => {
                    metrics::DESYNC.increment();
                    error!(
                        error = %desync,
                        remaining = state.hw.posted(),
                        "unresolvable completion, aborting drain pass"
                    );
                    return dispatched;
                }
            }
        }
    }

    /// Poll-style completion check: whether the job issued as `tag` on
    /// `handle` has finished. Tags not in flight on this context, and stale
    /// handles, report `true`.
    pub fn done(&self, handle: Handle, tag: Tag) -> bool {
        let state = self.state.lock();
        let Some(ctx) = state.contexts.get(handle) else {
            return true;
        };
        match state.registry.lookup(tag) {
            Ok(job) => job.context != handle.index || !ctx.jobs.is_in_flight(job.slot, tag),
            Err(_) => true,
        }
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats {
            contexts_allocated: state.contexts.allocated(),
            jobs_in_flight: state.contexts.iter().map(|c| c.job_cnt()).sum(),
            backlog_len: state.backlog.len(),
            posted: state.hw.posted(),
            queue_free: [QueueId::PRIMARY, QueueId::SECONDARY].map(|q| {
                if q.index() < state.layout.queue_count() {
                    state.hw.queue_free(q)
                } else {
                    0
                }
            }),
        }
    }

    /// Run `f` against the hardware with the engine lock held.
    pub fn hardware<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.state.lock().hw)
    }

    /// Whether the bookkeeping lock is currently held by any thread.
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Shut the engine down and hand the hardware back.
    ///
    /// Every bound crypto-context is released once. In-flight jobs and
    /// backlog entries are abandoned: their callbacks are dropped without
    /// being invoked.
    pub fn teardown(self) -> H {
        let mut state = self.state.into_inner();
        let mut abandoned = 0;
        let mut contexts = 0;
        for ctx in state.contexts.iter_mut().filter(|c| c.allocated) {
            for tag in ctx.jobs.in_flight_tags() {
                trace!(%tag, "abandoning in-flight job");
            }
            abandoned += ctx.jobs.reset();
            if let Some(hw) = ctx.hw.take() {
                state.hw.release_context(hw);
                metrics::HW_CONTEXT_RELEASED.increment();
            }
            ctx.allocated = false;
            contexts += 1;
        }
        for _ in 0..contexts {
            metrics::CONTEXTS_ALLOCATED.decrement();
        }
        let backlogged = state.backlog.clear();
        if abandoned > 0 || backlogged > 0 {
            warn!(abandoned, backlogged, "engine torn down with outstanding jobs");
        }
        state.hw
    }
}

impl<H: Hardware> EngineState<H> {
    /// Pick a command queue with room for a job in `direction`.
    fn pick_queue(&self, direction: Direction) -> Option<QueueId> {
        let preferred = self.layout.preferred(direction);
        if self.hw.queue_free(preferred) > 0 {
            return Some(preferred);
        }
        self.layout
            .alternate(preferred)
            .filter(|&q| self.hw.queue_free(q) > 0)
    }

    /// Issue `job` to hardware, or park it in the backlog.
    fn admit(&mut self, mut job: BacklogEntry, allow_backlog: bool) -> Result<Submitted, Rejected> {
        let handle = job.handle;
        match self.contexts.get(handle) {
            Some(ctx) if !ctx.dismiss => {}
            _ => return Err(Rejected::new(Error::InvalidHandle, job)),
        }

        let Some(queue) = self.pick_queue(job.direction) else {
            if !allow_backlog {
                return Err(Rejected::new(Error::FifoFull, job));
            }
            return match self.backlog.push(job) {
                Ok(()) => {
                    metrics::JOBS_BACKLOGGED.increment();
                    trace!(context = handle.index, "job backlogged");
                    Ok(Submitted::Queued)
                }
                Err(job) => Err(Rejected::new(Error::FifoFull, job)),
            };
        };

        let Some(ctx) = self.contexts.get_mut(handle) else {
            return Err(Rejected::new(Error::InvalidHandle, job));
        };
        let Some(slot) = ctx.jobs.next_free() else {
            return Err(Rejected::new(Error::JobsFull, job));
        };

        let load_context = ctx.hw.is_none();
        let hw_context = match ctx.hw {
            Some(hw) => hw,
            None => match self.hw.acquire_context(handle.index) {
                Ok(hw) => {
                    ctx.hw = Some(hw);
                    metrics::HW_CONTEXT_BOUND.increment();
                    trace!(context = handle.index, hw = hw.0, "hardware context bound");
                    hw
                }
                Err(fault) => return Err(Rejected::new(fault.into(), job)),
            },
        };

        let desc = Descriptor {
            context: handle.index,
            direction: job.direction,
            hw_context,
            src: job.src,
            dst: job.dst,
        };
        let job_ref = JobRef {
            context: handle.index,
            slot,
        };
        let issued = match self.hw.write_descriptor(queue, &desc) {
            Ok(tag) => self.registry.assign(tag, job_ref).map(|()| tag).inspect_err(|_| {
                // Never triggered, so the hardware has not seen it yet.
                self.hw.discard(queue, tag);
            }),
            Err(fault) => Err(fault),
        };
        let tag = match issued {
            Ok(tag) => tag,
            Err(fault) => {
                if load_context {
                    if let Some(hw) = ctx.hw.take() {
                        self.hw.release_context(hw);
                        metrics::HW_CONTEXT_RELEASED.increment();
                    }
                }
                return Err(Rejected::new(fault.into(), job));
            }
        };

        let occupied = ctx.jobs.occupy(tag, job.callback.take());
        debug_assert_eq!(occupied, Some(slot));
        self.hw.trigger(queue, TriggerFlags { load_context });
        metrics::JOBS_SUBMITTED.increment();
        Ok(Submitted::Issued(tag))
    }

    /// Pop and retire one posted completion.
    fn reap_one(&mut self) -> Result<Reaped, Desync> {
        if self.hw.posted() == 0 {
            return Ok(Reaped::Empty);
        }
        let Some(raw) = self.hw.pop() else {
            return Ok(Reaped::Empty);
        };

        let job = self.registry.lookup(raw.tag)?;
        let limit = self.contexts.len();
        let ctx = self
            .contexts
            .by_index_mut(job.context)
            .ok_or(Desync::ContextOutOfRange {
                tag: raw.tag.0,
                context: job.context,
                limit,
            })?;
        let callback = ctx.jobs.complete(job.context, job.slot, raw.tag)?;
        self.registry.clear(raw.tag);
        let handle = Handle::new(job.context, ctx.generation);
        let idle = ctx.job_cnt() == 0;
        metrics::JOBS_COMPLETED.increment();

        if idle {
            self.settle_idle(job.context);
        }

        Ok(Reaped::Job {
            callback,
            completion: JobCompletion {
                handle,
                tag: raw.tag,
                len: raw.len,
                result: raw.result,
                soft_ttl: raw.soft_ttl,
            },
        })
    }

    /// A context's last job just drained. Dismissed and unlocked contexts
    /// are freed, releasing their crypto-context; a locked one stays
    /// allocated with its crypto-context bound.
    fn settle_idle(&mut self, index: u32) {
        let Some(ctx) = self.contexts.by_index_mut(index) else {
            return;
        };
        if ctx.dismiss || !ctx.lock_ctx {
            self.free_context(index);
        }
    }

    /// Return an idle context to the pool, releasing its crypto-context.
    fn free_context(&mut self, index: u32) {
        if let Some(hw) = self.contexts.free(index) {
            self.release_hw(hw);
        }
        metrics::CONTEXTS_ALLOCATED.decrement();
        trace!(context = index, "context freed");
    }

    fn release_hw(&mut self, hw: HwContext) {
        self.hw.release_context(hw);
        metrics::HW_CONTEXT_RELEASED.increment();
    }

    /// Issue backlog entries in order until the hardware is full again.
    fn retry_backlog(&mut self) {
        while let Some(job) = self.backlog.pop() {
            let context = job.handle.index;
            match self.admit(job, false) {
                Ok(submitted) => {
                    metrics::BACKLOG_ISSUED.increment();
                    trace!(context, tag = ?submitted.tag(), "backlog entry issued");
                }
                Err(Rejected {
                    error: Error::FifoFull,
                    job,
                }) => {
                    self.backlog.restore(job);
                    break;
                }
                Err(Rejected { error, .. }) => {
                    metrics::BACKLOG_DROPPED.increment();
                    warn!(context, error = %error, "backlog entry dropped");
                }
            }
        }
    }
}
