use std::time::Duration;

use tokio::time::Instant;

/// Quiet interval after the last keystroke before typing is considered over.
pub const TYPING_QUIET: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_QUIET)
    }
}

impl TypingDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, deadline: None }
    }

    /// Pushes the deadline out. True when this keystroke opens a burst.
    pub fn keystroke(&mut self, now: Instant) -> bool {
        let opened = self.deadline.is_none();
        self.deadline = Some(now + self.quiet);
        opened
    }

    /// True exactly once per burst, at the first call at or past the deadline.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn reset(&mut self) {
        self.deadline = None;
    }
}
