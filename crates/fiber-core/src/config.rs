//! Tunable constants for the reconciler.
//!
//! None of these values change semantics; they shape batching windows and
//! throttling. Hosts with different frame budgets may want to recalibrate them.

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Expiration horizon for user-blocking (interactive) updates.
    pub interactive_expiration_ms: u64,
    /// Bucket width used to coalesce interactive updates.
    pub interactive_bucket_ms: u64,
    /// Expiration horizon for normal-priority (async) updates.
    pub async_expiration_ms: u64,
    /// Bucket width used to coalesce async updates.
    pub async_bucket_ms: u64,
    /// Bucket width used when a Suspense timeout computes a retry time.
    pub suspense_bucket_ms: u64,
    /// Minimum time a freshly shown fallback stays up before it may be replaced.
    pub fallback_throttle_ms: u64,
    /// Synchronous re-renders of one root triggered from commit before bailing out.
    pub nested_update_limit: u32,
    /// Passive-effect flushes that schedule more passive work before a warning.
    pub nested_passive_update_limit: u32,
    /// Record render durations for `Profiler` subtrees.
    pub enable_profiler_timer: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interactive_expiration_ms: 150,
            interactive_bucket_ms: 100,
            async_expiration_ms: 5000,
            async_bucket_ms: 250,
            suspense_bucket_ms: 250,
            fallback_throttle_ms: 500,
            nested_update_limit: 50,
            nested_passive_update_limit: 50,
            enable_profiler_timer: true,
        }
    }
}

impl ReconcilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_throttle_ms(mut self, ms: u64) -> Self {
        self.fallback_throttle_ms = ms;
        self
    }

    pub fn with_nested_update_limit(mut self, limit: u32) -> Self {
        self.nested_update_limit = limit;
        self
    }

    pub fn with_async_expiration(mut self, expiration_ms: u64, bucket_ms: u64) -> Self {
        self.async_expiration_ms = expiration_ms;
        self.async_bucket_ms = bucket_ms;
        self
    }

    pub fn with_interactive_expiration(mut self, expiration_ms: u64, bucket_ms: u64) -> Self {
        self.interactive_expiration_ms = expiration_ms;
        self.interactive_bucket_ms = bucket_ms;
        self
    }

    pub fn with_profiler_timer(mut self, enabled: bool) -> Self {
        self.enable_profiler_timer = enabled;
        self
    }
}
