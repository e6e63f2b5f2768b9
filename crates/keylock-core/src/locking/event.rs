//! Lock events
//!
//! Events describing what happened to a key, published to subscribers of
//! [`KeyedLockManager::subscribe`](super::KeyedLockManager::subscribe).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventType {
    /// A task started as the holder of the key
    Acquired,
    /// A request was appended to the key's wait queue
    Queued,
    /// A request was refused because the wait queue was full
    Rejected,
    /// A queued waiter's timeout fired
    TimedOut,
    /// A timed-out waiter reached the head of the queue and was skipped
    Skipped,
    /// The last holder completed with no waiters left; the key is free
    Released,
}

impl LockEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Queued => "queued",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
            Self::Released => "released",
        }
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lock event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// The key the event concerns
    pub key: String,
    /// Type of event
    pub event_type: LockEventType,
    /// Event data
    pub data: Option<serde_json::Value>,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl LockEvent {
    /// Create a new lock event
    pub fn new(key: &str, event_type: LockEventType, data: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.to_string(),
            event_type,
            data,
            created_at: Utc::now(),
        }
    }

    /// Create an acquired event
    pub fn acquired(key: &str) -> Self {
        Self::new(key, LockEventType::Acquired, None)
    }

    /// Create a queued event carrying the queue length after insertion
    pub fn queued(key: &str, pending: usize) -> Self {
        let data = serde_json::json!({ "pending": pending });
        Self::new(key, LockEventType::Queued, Some(data))
    }

    /// Create a rejected event carrying the admission limit
    pub fn rejected(key: &str, limit: usize) -> Self {
        let data = serde_json::json!({ "limit": limit });
        Self::new(key, LockEventType::Rejected, Some(data))
    }

    /// Create a timed-out event carrying the timeout that fired
    pub fn timed_out(key: &str, timeout_ms: u64) -> Self {
        let data = serde_json::json!({ "timeout_ms": timeout_ms });
        Self::new(key, LockEventType::TimedOut, Some(data))
    }

    /// Create a skipped event for a ghost waiter
    pub fn skipped(key: &str) -> Self {
        Self::new(key, LockEventType::Skipped, None)
    }

    /// Create a released event
    pub fn released(key: &str) -> Self {
        Self::new(key, LockEventType::Released, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(LockEventType::Acquired.as_str(), "acquired");
        assert_eq!(LockEventType::TimedOut.as_str(), "timed_out");
        assert_eq!(LockEventType::Released.to_string(), "released");
    }

    #[test]
    fn test_queued_event_data() {
        let event = LockEvent::queued("users", 3);
        assert_eq!(event.key, "users");
        assert_eq!(event.event_type, LockEventType::Queued);
        assert_eq!(event.data.as_ref().and_then(|d| d["pending"].as_u64()), Some(3));
    }

    #[test]
    fn test_event_serialization() {
        let event = LockEvent::timed_out("orders", 50);
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"event_type\":\"timed_out\""));

        let back: LockEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, event.id);
        assert_eq!(back.event_type, LockEventType::TimedOut);
    }
}
