//! Offload engine metrics.
//!
//! Process-wide counters for admission, completion and context lifecycle
//! events. Exposed via Prometheus when registered with the admin server.

use metriken::{Counter, Gauge, metric};

// ── Admission ────────────────────────────────────────────────────

#[metric(
    name = "ringline_offload/jobs/submitted",
    description = "Jobs written to a hardware command queue"
)]
pub static JOBS_SUBMITTED: Counter = Counter::new();

#[metric(
    name = "ringline_offload/jobs/backlogged",
    description = "Jobs deferred to the backlog"
)]
pub static JOBS_BACKLOGGED: Counter = Counter::new();

#[metric(
    name = "ringline_offload/reject/fifo_full",
    description = "Submissions rejected with both queue and backlog full"
)]
pub static FIFO_FULL: Counter = Counter::new();

#[metric(
    name = "ringline_offload/reject/jobs_full",
    description = "Submissions rejected for lack of a job slot"
)]
pub static JOBS_FULL: Counter = Counter::new();

#[metric(
    name = "ringline_offload/reject/no_context",
    description = "Context opens rejected with the pool exhausted"
)]
pub static NO_CONTEXT: Counter = Counter::new();

// ── Completion ───────────────────────────────────────────────────

#[metric(
    name = "ringline_offload/jobs/completed",
    description = "Completions resolved and dispatched"
)]
pub static JOBS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "ringline_offload/backlog/issued",
    description = "Backlog entries issued to hardware by a drain"
)]
pub static BACKLOG_ISSUED: Counter = Counter::new();

#[metric(
    name = "ringline_offload/backlog/dropped",
    description = "Backlog entries consumed without reaching hardware"
)]
pub static BACKLOG_DROPPED: Counter = Counter::new();

#[metric(
    name = "ringline_offload/desync",
    description = "Drain passes aborted on an unresolvable completion tag"
)]
pub static DESYNC: Counter = Counter::new();

// ── Contexts ─────────────────────────────────────────────────────

#[metric(
    name = "ringline_offload/contexts/allocated",
    description = "Currently allocated SA contexts"
)]
pub static CONTEXTS_ALLOCATED: Gauge = Gauge::new();

#[metric(
    name = "ringline_offload/hw_context/bound",
    description = "Hardware crypto-contexts bound to an SA"
)]
pub static HW_CONTEXT_BOUND: Counter = Counter::new();

#[metric(
    name = "ringline_offload/hw_context/released",
    description = "Hardware crypto-contexts released"
)]
pub static HW_CONTEXT_RELEASED: Counter = Counter::new();
