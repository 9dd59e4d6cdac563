use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named event carrying a JSON payload (spec §4.5).
///
/// The payload is `serde_json::Value` rather than a generic type parameter —
/// listeners are registered by event *name*, not by Rust type, so the bus
/// itself never needs to know the shape of any particular event's data. A
/// listener deserializes `data` into whatever struct it expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Builds an event from any `Serialize` payload.
    pub fn from_payload<T: Serialize>(
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(name, serde_json::to_value(payload)?))
    }

    pub fn deserialize_data<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}
