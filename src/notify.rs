//! User-facing notifications
//!
//! Bounded queue of short-lived status messages plus the SIP status-code to
//! human-readable reason mapping. Engine and network failures are converted
//! to notifications at the component boundary; nothing is thrown into render
//! paths.

use std::collections::VecDeque;
use std::sync::Mutex;
use chrono::{DateTime, Duration, Utc};

const MAX_QUEUED: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
}

pub struct NotificationCenter {
    queue: Mutex<VecDeque<Notification>>,
    ttl: Duration,
}

impl NotificationCenter {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn push(&self, message: impl Into<String>, kind: NotificationKind) {
        let notification = Notification {
            message: message.into(),
            kind,
            created_at: Utc::now(),
        };
        let mut queue = self.queue.lock().unwrap();
        if queue.len() == MAX_QUEUED {
            queue.pop_front();
        }
        queue.push_back(notification);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(message, NotificationKind::Success);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(message, NotificationKind::Error);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(message, NotificationKind::Warning);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(message, NotificationKind::Info);
    }

    /// Notifications still inside their display window, oldest first.
    /// Expired entries are dropped on the way out.
    pub fn active(&self) -> Vec<Notification> {
        let cutoff = Utc::now() - self.ttl;
        let mut queue = self.queue.lock().unwrap();
        while queue
            .front()
            .map(|n| n.created_at < cutoff)
            .unwrap_or(false)
        {
            queue.pop_front();
        }
        queue.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }
}

/// Map a SIP-like failure status code to the message shown to the agent.
pub fn call_failure_message(status_code: Option<u16>, reason_phrase: &str) -> String {
    match status_code {
        Some(480) => "temporarily unavailable".to_string(),
        Some(486) => "busy".to_string(),
        Some(404) => "not found".to_string(),
        Some(603) => "declined".to_string(),
        Some(code) => {
            if reason_phrase.is_empty() {
                format!("call failed ({})", code)
            } else {
                reason_phrase.to_string()
            }
        }
        None => {
            if reason_phrase.is_empty() {
                "call failed".to_string()
            } else {
                reason_phrase.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(call_failure_message(Some(480), ""), "temporarily unavailable");
        assert_eq!(call_failure_message(Some(486), "Busy Here"), "busy");
        assert_eq!(call_failure_message(Some(404), "Not Found"), "not found");
        assert_eq!(call_failure_message(Some(603), "Decline"), "declined");
        assert_eq!(
            call_failure_message(Some(500), "Server Internal Error"),
            "Server Internal Error"
        );
        assert_eq!(call_failure_message(Some(500), ""), "call failed (500)");
        assert_eq!(call_failure_message(None, ""), "call failed");
    }

    #[test]
    fn test_queue_is_bounded() {
        let center = NotificationCenter::new(60);
        for i in 0..40 {
            center.info(format!("message {}", i));
        }

        let active = center.active();
        assert_eq!(active.len(), MAX_QUEUED);
        // oldest entries were evicted first
        assert_eq!(active[0].message, "message 20");
    }

    #[test]
    fn test_expired_notifications_drop_out() {
        let center = NotificationCenter::new(0);
        center.error("gone immediately");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(center.active().is_empty());
    }
}
