/// Immutable snapshot of a limiter's counters, produced on demand by
/// `statistics()`. Callers must not cache this value — a fresh snapshot
/// reflects state only at the instant of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    /// Cumulative successful admissions.
    pub permits_acquired: u64,
    /// Cumulative rejections, whether via `try_acquire` returning false,
    /// non-blocking refusal, or deadline expiry.
    pub permits_rejected: u64,
    /// Algorithm-specific: tokens, remaining window budget, spare queue
    /// capacity, or free concurrency slots.
    pub current_permits: u64,
    /// Algorithm-defined upper bound.
    pub max_permits: u64,
    /// Callers currently suspended in the blocking path. Always 0 for
    /// non-queueing algorithms (fixed-window, sliding-window-counter,
    /// sliding-window-log poll rather than queue).
    pub queue_depth: usize,
}
