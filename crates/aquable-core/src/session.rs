//! Message-id session management.
//!
//! Each device handle owns one [`MessageIdSession`]. The session hands out a
//! fresh id per frame and restarts from `(0, 1)` once it is old, has issued
//! too many ids, or the id space is nearly exhausted.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use aquable_types::MessageId;

/// Default session lifetime before ids restart.
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Default number of ids a session may issue before restarting.
pub const DEFAULT_MAX_COMMANDS: u32 = 1000;

/// When a session restarts its message ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub reset_after: Duration,
    pub max_commands: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            reset_after: DEFAULT_RESET_AFTER,
            max_commands: DEFAULT_MAX_COMMANDS,
        }
    }
}

impl SessionLimits {
    #[must_use]
    pub fn reset_after(mut self, reset_after: Duration) -> Self {
        self.reset_after = reset_after;
        self
    }

    #[must_use]
    pub fn max_commands(mut self, max_commands: u32) -> Self {
        self.max_commands = max_commands;
        self
    }
}

/// Snapshot of a session for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub age: Duration,
    pub command_count: u32,
    pub current: MessageId,
    pub exhausted: bool,
}

/// Issues message ids for one device.
#[derive(Debug)]
pub struct MessageIdSession {
    current: MessageId,
    started: Instant,
    command_count: u32,
    limits: SessionLimits,
}

impl MessageIdSession {
    #[must_use]
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            current: MessageId::INITIAL,
            started: Instant::now(),
            command_count: 0,
            limits,
        }
    }

    /// Whether the next call to [`next_id`](Self::next_id) starts a new session.
    #[must_use]
    pub fn should_reset(&self) -> bool {
        self.started.elapsed() >= self.limits.reset_after
            || self.command_count >= self.limits.max_commands
            || self.current.is_exhausted()
    }

    /// Restart from `(0, 1)`.
    pub fn reset(&mut self) {
        tracing::debug!(
            command_count = self.command_count,
            last = %self.current,
            "Resetting message id session"
        );
        self.current = MessageId::INITIAL;
        self.started = Instant::now();
        self.command_count = 0;
    }

    /// The id to put in the next frame.
    pub fn next_id(&mut self) -> MessageId {
        if self.should_reset() {
            self.reset();
        }
        self.command_count += 1;
        self.current = self.current.next();
        self.current
    }

    /// Note the id a frame actually went out with.
    ///
    /// The encoder may move past the issued id to avoid a reserved checksum;
    /// the session continues from the id that was used.
    pub fn record_used(&mut self, used: MessageId) {
        if used != self.current {
            self.current = used;
        }
    }

    #[must_use]
    pub fn current(&self) -> MessageId {
        self.current
    }

    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            age: self.started.elapsed(),
            command_count: self.command_count,
            current: self.current,
            exhausted: self.current.is_exhausted(),
        }
    }
}

impl Default for MessageIdSession {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}
