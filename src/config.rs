use std::time::Duration;

/// Default values for configuration.
pub mod defaults {
    use std::time::Duration;

    /// The default value for `timeout`.
    ///
    /// The engine-wide time allowed for a reply before a probe expires.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    /// The default value for `send-batch`.
    ///
    /// The maximum number of probes drained from the send queue per loop pass.
    pub const DEFAULT_SEND_BATCH: usize = 1;

    /// The default value for `poll-interval`.
    ///
    /// The upper bound on a single capture wait when no deadline is nearer.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// The default value for `send-queue-capacity`.
    pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 512;

    /// The default value for `reply-queue-capacity`.
    pub const DEFAULT_REPLY_QUEUE_CAPACITY: usize = 512;
}

/// Engine configuration.
///
/// Constructed and validated by the [`crate::Builder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// The engine-wide probe timeout.
    ///
    /// Applies to probes armed after the value is set; probes already in
    /// flight keep the deadline computed at transmit time.
    pub timeout: Duration,
    /// The maximum number of probes transmitted per loop pass.
    pub send_batch: usize,
    /// The upper bound on a single capture wait.
    pub poll_interval: Duration,
    /// The capacity of the send queue.
    pub send_queue_capacity: usize,
    /// The capacity of the receive queue.
    pub reply_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: defaults::DEFAULT_TIMEOUT,
            send_batch: defaults::DEFAULT_SEND_BATCH,
            poll_interval: defaults::DEFAULT_POLL_INTERVAL,
            send_queue_capacity: defaults::DEFAULT_SEND_QUEUE_CAPACITY,
            reply_queue_capacity: defaults::DEFAULT_REPLY_QUEUE_CAPACITY,
        }
    }
}
