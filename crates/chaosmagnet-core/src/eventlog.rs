//! Bounded in-memory event log.
//!
//! Every engine event is written twice: to the `log` facade for whatever
//! logger the host installs, and to this ring so the metrics snapshot can
//! show the most recent lines without any logger at all.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::Level;

/// Lines kept in the ring.
pub const EVENT_LOG_CAPACITY: usize = 64;

/// Cloneable handle to one engine's event ring.
#[derive(Clone, Default)]
pub struct EventLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `[HH:MM:SS] msg`, dropping the oldest line when full.
    pub fn record(&self, level: Level, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        log::log!(target: "chaosmagnet", level, "{msg}");
        let line = format!("[{}] {msg}", chrono::Local::now().format("%H:%M:%S"));
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == EVENT_LOG_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.record(Level::Info, msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.record(Level::Warn, msg);
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.record(Level::Error, msg);
    }

    /// Lines oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_timestamped() {
        let log = EventLog::new();
        log.info("hello");
        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        // "[HH:MM:SS] hello"
        assert!(lines[0].starts_with('['));
        assert_eq!(&lines[0][9..], "] hello");
    }

    #[test]
    fn test_ring_is_bounded_newest_last() {
        let log = EventLog::new();
        for i in 0..(EVENT_LOG_CAPACITY + 5) {
            log.warn(format!("event {i}"));
        }
        let lines = log.lines();
        assert_eq!(lines.len(), EVENT_LOG_CAPACITY);
        assert!(lines[0].ends_with("event 5"));
        assert!(lines.last().unwrap().ends_with(&format!("event {}", EVENT_LOG_CAPACITY + 4)));
    }

    #[test]
    fn test_clones_share_the_ring() {
        let a = EventLog::new();
        let b = a.clone();
        b.error("boom");
        assert_eq!(a.lines().len(), 1);
    }
}
