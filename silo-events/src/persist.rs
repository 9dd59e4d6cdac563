//! Durable storage for events that have been scheduled but not yet fired
//! (spec §4.5). Mirrors a JSON sidecar file written to
//! `scheduled_events.json`: one record per pending event, holding the
//! serialized event and its absolute fire time, so a restart does not lose
//! a delayed event that hadn't come due yet.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;

#[derive(Serialize, Deserialize)]
struct ScheduledRecord {
    event: Event,
    fire_time: DateTime<Utc>,
}

/// Loads previously-persisted scheduled events. Returns an empty vec if the
/// file does not exist yet — this is the expected state on first boot.
pub async fn load_scheduled(path: &Path) -> std::io::Result<Vec<(Event, DateTime<Utc>)>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let records: Vec<ScheduledRecord> = serde_json::from_slice(&bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(records
        .into_iter()
        .map(|r| (r.event, r.fire_time))
        .collect())
}

/// Persists the set of events still pending at shutdown. Overwrites the file
/// wholesale — there is no incremental append, matching the original
/// implementation's "serialize everything on stop" behavior.
pub async fn save_scheduled(
    path: &Path,
    pending: &[(Event, DateTime<Utc>)],
) -> std::io::Result<()> {
    let records: Vec<ScheduledRecord> = pending
        .iter()
        .map(|(event, fire_time)| ScheduledRecord {
            event: event.clone(),
            fire_time: *fire_time,
        })
        .collect();
    let bytes = serde_json::to_vec(&records)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn missing_file_yields_empty_vec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let loaded = load_scheduled(&path).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn round_trips_pending_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduled_events.json");
        let fire_time = Utc::now() + Duration::seconds(30);
        let event = Event::new("ReminderDue", serde_json::json!({ "id": 1 }));
        save_scheduled(&path, &[(event.clone(), fire_time)])
            .await
            .unwrap();

        let loaded = load_scheduled(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.name, "ReminderDue");
        assert_eq!(loaded[0].1, fire_time);
    }
}
