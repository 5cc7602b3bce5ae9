use std::time::Duration;

/// What to do when a status envelope echoes a different tag than the one sent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TagPolicy {
    /// Log a warning and accept the status anyway.
    Lenient,
    /// Fail the exchange with `ProtocolError::TagMismatch`.
    Strict,
}

impl Default for TagPolicy {
    fn default() -> Self {
        TagPolicy::Lenient
    }
}

/// Runtime knobs of a probe handle. Nothing here is persisted.
#[derive(Clone, Debug)]
pub struct Config {
    /// Timeout of every single bulk transfer.
    pub timeout: Duration,
    /// Attempts per bulk transfer while the endpoint reports a stall.
    pub retries: usize,
    pub tag_policy: TagPolicy,
    /// Run epilogue and exit of a SWIM session even when the work in between failed.
    pub epilogue_on_failure: bool,
    /// Upper bound on busy polls; `None` polls until the device is idle.
    pub poll_limit: Option<u32>,
}

pub const TIMEOUT: Duration = Duration::from_millis(1000);
pub const RETRY_MAX: usize = 5;

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: TIMEOUT,
            retries: RETRY_MAX,
            tag_policy: TagPolicy::default(),
            epilogue_on_failure: false,
            poll_limit: None,
        }
    }
}

impl Config {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tag_policy(mut self, tag_policy: TagPolicy) -> Self {
        self.tag_policy = tag_policy;
        self
    }

    pub fn with_epilogue_on_failure(mut self, enabled: bool) -> Self {
        self.epilogue_on_failure = enabled;
        self
    }

    pub fn with_poll_limit(mut self, limit: Option<u32>) -> Self {
        self.poll_limit = limit;
        self
    }
}
