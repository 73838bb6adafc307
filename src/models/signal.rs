use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{generate_id, SignalType};

/// A normalized, de-duplicated "something changed" fact. Immutable once
/// written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DropSignal {
    pub id: String,
    pub product_id: String,
    pub backend_id: String,
    pub signal_type: SignalType,
    pub value: serde_json::Value,
    pub source: String,
    /// Certainty of the detection, 0-100.
    pub confidence: u8,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDropSignal {
    pub product_id: String,
    pub backend_id: String,
    pub signal_type: SignalType,
    pub value: serde_json::Value,
    pub source: String,
    pub confidence: u8,
}

impl NewDropSignal {
    pub fn new(
        product_id: &str,
        backend_id: &str,
        signal_type: SignalType,
        value: serde_json::Value,
        source: &str,
    ) -> Self {
        Self {
            product_id: product_id.to_string(),
            backend_id: backend_id.to_string(),
            signal_type,
            value,
            source: source.to_string(),
            confidence: signal_type.confidence(),
        }
    }

    /// Short hash of the signal value, used in dedup keys so the same
    /// (product, backend, type) with a different payload is not suppressed.
    /// Keys are persisted and compared across restarts, so the hash is a
    /// name-based UUID of the serialized value rather than anything tied to
    /// the running process or toolchain.
    pub fn value_hash(&self) -> String {
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, self.value.to_string().as_bytes());
        let mut hex = digest.simple().to_string();
        hex.truncate(16);
        hex
    }

    /// De-duplication key for the publisher's TTL window.
    pub fn dedup_key(&self) -> String {
        format!(
            "signal:{}:{}:{}:{}",
            self.product_id,
            self.backend_id,
            self.signal_type.as_str(),
            self.value_hash()
        )
    }

    pub fn into_signal(self) -> DropSignal {
        DropSignal {
            id: generate_id(),
            product_id: self.product_id,
            backend_id: self.backend_id,
            signal_type: self.signal_type,
            value: self.value,
            source: self.source,
            confidence: self.confidence,
            observed_at: Utc::now(),
        }
    }
}
