//! Server configuration.

/// Configuration for the report server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of initial requests answered with 503 while the backing
    /// database "warms up".
    pub warmup_requests: u32,
    /// Require a signed-in session for everything except public creates.
    pub require_session: bool,
    /// Maximum title length accepted on create.
    pub max_title_len: usize,
    /// Buffered messages per push subscription. A full buffer drops the
    /// message, which the subscriber sees as a sequence gap.
    pub channel_capacity: usize,
}

impl ServerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            warmup_requests: 0,
            require_session: false,
            max_title_len: 200,
            channel_capacity: 64,
        }
    }

    /// Answers the first `count` requests with 503.
    pub fn with_warmup(mut self, count: u32) -> Self {
        self.warmup_requests = count;
        self
    }

    /// Requires a session for non-public endpoints.
    pub fn with_sessions(mut self) -> Self {
        self.require_session = true;
        self
    }

    /// Sets the maximum title length.
    pub fn with_max_title_len(mut self, len: usize) -> Self {
        self.max_title_len = len;
        self
    }

    /// Sets the per-subscription buffer.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
