//! Cooldown debouncer for raw change notifications.
//!
//! A single write can produce several raw events; at most one logical
//! change is accepted per cooldown window. The very first raw event after a
//! (re)start is swallowed because subscribing itself tends to produce one.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Debouncer {
    cooldown: Duration,
    ignore_initial: bool,
    last_emit: Option<Instant>,
}

impl Debouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            ignore_initial: true,
            last_emit: None,
        }
    }

    /// Accept the first raw event instead of treating it as subscription noise.
    pub fn accept_initial(mut self) -> Self {
        self.ignore_initial = false;
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Feed one raw event observed at `now`; returns whether a logical
    /// change should be processed.
    pub fn observe(&mut self, now: Instant) -> bool {
        match self.last_emit {
            None => {
                self.last_emit = Some(now);
                !self.ignore_initial
            }
            Some(last) if now.duration_since(last) > self.cooldown => {
                self.last_emit = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    /// Forget history; called whenever the watcher restarts.
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}
