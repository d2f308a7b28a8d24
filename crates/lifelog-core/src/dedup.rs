//! Inbound-message deduplication guard.
//!
//! Chat-channel deliveries may arrive more than once within a short window
//! (webhook retries). The guard fingerprints each message with a coarse time
//! bucket so retries of the same logical message collapse to one
//! fingerprint even when exact send timestamps differ.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Default duplicate-detection window.
pub const DEFAULT_WINDOW_SECS: u64 = 120;

/// Default buffer capacity.
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Suppresses re-processing of duplicate inbound messages.
///
/// The buffer is shared across all dispatcher workers; check-and-insert is
/// one critical section so two concurrent duplicates cannot both be
/// classified as new.
pub struct MessageDeduplicator {
    window: Duration,
    max_size: usize,
    entries: Mutex<VecDeque<(String, Instant)>>,
}

impl MessageDeduplicator {
    /// Create a deduplicator with the given window and buffer capacity.
    pub fn new(window_secs: u64, max_size: usize) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_size,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Fingerprint of (sender, text, current hour bucket).
    fn fingerprint(&self, sender_id: &str, text: &str) -> String {
        let bucket = chrono::Utc::now().format("%Y%m%d%H");
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", sender_id, text, bucket).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check whether this message was already seen inside the window,
    /// recording it if not.
    pub fn is_duplicate(&self, sender_id: &str, text: &str) -> bool {
        let hash = self.fingerprint(sender_id, text);
        let now = Instant::now();

        let mut entries = self.entries.lock();

        // Expired entries sit at the front: insertion order coincides with
        // timestamp order for this workload.
        while let Some((_, inserted)) = entries.front() {
            if now.duration_since(*inserted) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.iter().any(|(existing, _)| *existing == hash) {
            tracing::debug!(sender_id, "duplicate message suppressed");
            return true;
        }

        entries.push_back((hash, now));

        if entries.len() > self.max_size {
            entries.pop_front();
        }

        false
    }

    /// Number of fingerprints currently buffered.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MessageDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS, DEFAULT_MAX_SIZE)
    }
}
