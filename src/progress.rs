// src/progress.rs

//! Progress reporting for cooking runs
//!
//! The kitchen reports one step per plan node plus free-form messages such
//! as `applying patch "0001-fix.diff"`. Failures are never routed through
//! a tracker; they surface as [`crate::Error`] values. A tracker only learns
//! that a run was abandoned.
//!
//! Implementations:
//! - `SilentProgress`: no output, counts only
//! - `LogProgress`: reports through tracing
//! - `CallbackProgress`: forwards [`ProgressEvent`]s to a closure

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Core trait for progress tracking
///
/// Trackers are shared with collaborators, so they must be `Send + Sync`.
pub trait ProgressTracker: Send + Sync {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Advance by the given number of steps
    fn increment(&self, amount: u64);

    /// Set the total number of steps
    fn set_length(&self, length: u64);

    fn position(&self) -> u64;

    fn length(&self) -> u64;

    /// The run completed
    fn finish_with_message(&self, message: &str);

    /// The run stopped before completing
    fn abandon(&self, message: &str);

    fn is_finished(&self) -> bool;
}

/// Shared counters used by every tracker
#[derive(Debug, Default)]
struct Counters {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl Counters {
    fn with_length(length: u64) -> Self {
        Self {
            length: AtomicU64::new(length),
            ..Default::default()
        }
    }

    fn advance(&self, amount: u64) -> u64 {
        self.position.fetch_add(amount, Ordering::Relaxed) + amount
    }
}

/// Progress tracker that reports nothing
#[derive(Debug, Default)]
pub struct SilentProgress {
    counters: Counters,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length(length: u64) -> Self {
        Self {
            counters: Counters::with_length(length),
        }
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.counters.advance(amount);
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.counters.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.counters.length.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, _message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
    }

    fn abandon(&self, _message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Relaxed)
    }
}

/// Progress tracker that logs at info level
///
/// Every step is logged as `name: [n/total] message`, which keeps cook
/// logs readable without a terminal.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    counters: Counters,
}

impl LogProgress {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            counters: Counters::with_length(length),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let position = self.counters.advance(amount);
        let length = self.length();
        if length > 0 {
            info!("{}: [{}/{}]", self.name, position, length);
        }
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.counters.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.counters.length.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        info!("{}: {}", self.name, message);
    }

    fn abandon(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        info!("{}: abandoned - {}", self.name, message);
    }

    fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Relaxed)
    }
}

/// Events emitted by [`CallbackProgress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Message(String),
    Position { current: u64, total: u64 },
    Finished(String),
    Abandoned(String),
}

/// Progress tracker that forwards events to a closure
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    counters: Counters,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(length: u64, callback: F) -> Self {
        Self {
            callback,
            counters: Counters::with_length(length),
        }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn set_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Message(message.to_string()));
    }

    fn increment(&self, amount: u64) {
        let current = self.counters.advance(amount);
        (self.callback)(ProgressEvent::Position {
            current,
            total: self.length(),
        });
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.counters.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.counters.length.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Finished(message.to_string()));
    }

    fn abandon(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Abandoned(message.to_string()));
    }

    fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_silent_progress() {
        let progress = SilentProgress::with_length(3);

        progress.set_message("cooking");
        progress.increment(1);
        progress.increment(1);
        assert_eq!(progress.position(), 2);
        assert_eq!(progress.length(), 3);

        assert!(!progress.is_finished());
        progress.finish_with_message("done");
        assert!(progress.is_finished());
    }

    #[test]
    fn test_log_progress() {
        let progress = LogProgress::new("cook", 2);
        progress.increment(1);
        progress.set_length(4);
        progress.increment(1);
        assert_eq!(progress.position(), 2);
        assert_eq!(progress.length(), 4);

        progress.abandon("stopped");
        assert!(progress.is_finished());
    }

    #[test]
    fn test_callback_progress() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        let progress = CallbackProgress::new(2, move |event| {
            events_clone.lock().unwrap().push(event);
        });

        progress.set_message("applying patch \"a.diff\"");
        progress.increment(1);
        progress.finish_with_message("done");

        let captured = events.lock().unwrap();
        assert_eq!(
            *captured,
            vec![
                ProgressEvent::Message("applying patch \"a.diff\"".to_string()),
                ProgressEvent::Position { current: 1, total: 2 },
                ProgressEvent::Finished("done".to_string()),
            ]
        );
    }
}
