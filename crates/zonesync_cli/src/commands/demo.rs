//! Demo command implementation.
//!
//! Two devices share one in-memory store. The script creates notes on the
//! first device, syncs them to the second, edits and deletes there, and syncs
//! back, printing every object's phase after each step.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use zonesync_engine::{
    Coordinator, FieldValue, FileSettings, MemoryRemoteStore, MemorySettings, Record,
    SettingsStore, StoreError, SyncConfig, SyncEntity, SyncEvent,
};

/// A to-do note.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Note {
    /// Note text.
    pub title: String,
    /// Whether the note is done.
    pub done: bool,
    /// Creation time in milliseconds since the epoch.
    pub created: i64,
}

impl SyncEntity for Note {
    const ENTITY_TYPE: &'static str = "Note";

    fn serialize(&self, record: &mut Record) {
        record.set("title", self.title.as_str());
        record.set("done", self.done);
        record.set("created", FieldValue::Timestamp(self.created));
    }

    fn deserialize(&mut self, record: &Record) {
        self.title = record.get_text("title").unwrap_or_default().to_owned();
        self.done = record.get_bool("done").unwrap_or(false);
        self.created = record.get_timestamp("created").unwrap_or(0);
    }
}

type Device = Coordinator<MemoryRemoteStore>;

/// Runs the demo command.
pub async fn run(
    settings_path: Option<&Path>,
    batch_size: usize,
    flaky: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryRemoteStore::new());
    let config = SyncConfig::default().with_push_batch_size(batch_size);

    let phone_settings: Arc<dyn SettingsStore> = match settings_path {
        Some(path) => Arc::new(FileSettings::open(path)?),
        None => Arc::new(MemorySettings::new()),
    };
    let mut phone = start_device(&store, config.clone(), phone_settings).await?;
    let mut laptop = start_device(&store, config, Arc::new(MemorySettings::new())).await?;
    let phone_events = phone.subscribe();

    step("phone creates three notes");
    {
        let notes = phone.collection_mut::<Note>().ok_or("Note collection missing")?;
        for title in ["buy milk", "call the bank", "water plants"] {
            notes.create_local_with(Note {
                title: title.into(),
                done: false,
                created: now_millis(),
            });
        }
    }
    print_device("phone", &phone)?;

    step("phone syncs");
    phone.sync().await?;
    print_device("phone", &phone)?;

    step("laptop syncs");
    laptop.sync().await?;
    print_device("laptop", &laptop)?;

    step("laptop completes one note and deletes another");
    {
        let notes = laptop.collection_mut::<Note>().ok_or("Note collection missing")?;
        let keys: Vec<_> = notes.iter().map(|o| o.key()).collect();
        if let Some(&first) = keys.first() {
            notes.edit(first, |n| n.done = true)?;
        }
        if let Some(&last) = keys.last() {
            notes.delete(last)?;
        }
    }
    print_device("laptop", &laptop)?;

    if flaky {
        step("laptop pushes while the store is failing");
        store.fail_next_modify(StoreError::network_retryable("simulated outage"));
        if let Some(summary) = laptop.push().await? {
            info!(
                requeued = summary.applied.requeued,
                "push failed, objects requeued"
            );
        }
        print_device("laptop", &laptop)?;
    }

    step("laptop syncs");
    laptop.sync().await?;
    print_device("laptop", &laptop)?;

    step("phone syncs");
    phone.sync().await?;
    print_device("phone", &phone)?;

    let changes = phone_events
        .try_iter()
        .filter(|e| matches!(e, SyncEvent::ObjectChanged { .. }))
        .count();
    let stats = phone.stats();
    println!();
    println!("Phone statistics:");
    println!("  State changes observed: {changes}");
    println!("  Pushes completed:       {}", stats.pushes_completed);
    println!("  Pulls completed:        {}", stats.pulls_completed);
    println!("  Records saved:          {}", stats.records_saved);
    println!("  Records pulled:         {}", stats.records_pulled);
    println!("Store holds {} record(s)", store.record_count());

    Ok(())
}

async fn start_device(
    store: &Arc<MemoryRemoteStore>,
    config: SyncConfig,
    settings: Arc<dyn SettingsStore>,
) -> Result<Device, Box<dyn std::error::Error>> {
    let mut device = Coordinator::new(config, Arc::clone(store), settings);
    device.register::<Note>()?;
    device.start_up().await?;
    Ok(device)
}

fn step(title: &str) {
    println!();
    println!("== {title}");
}

fn print_device(name: &str, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
    let notes = device.collection::<Note>().ok_or("Note collection missing")?;
    println!("{name}: {} note(s)", notes.len());
    for object in notes.iter() {
        let note = object.entity();
        let remote = object
            .remote_id()
            .map(|id| id.name().to_owned())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<4} {:<14} [{}] {:<16} {}",
            object.key().to_string(),
            object.phase().as_str(),
            if note.done { "x" } else { " " },
            note.title,
            remote
        );
    }
    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_runs_to_completion() {
        run(None, 2, true).await.unwrap();
    }

    #[tokio::test]
    async fn demo_persists_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phone.json");
        run(Some(&path), 10, false).await.unwrap();

        let snapshot = FileSettings::load(&path).unwrap().unwrap();
        assert!(snapshot.zone_provisioned);
        assert!(snapshot.cursors.contains_key("Note"));
    }

    #[test]
    fn note_fields_round_trip_through_record() {
        let note = Note {
            title: "t".into(),
            done: true,
            created: 42,
        };
        let mut record = Record::new(
            Note::ENTITY_TYPE,
            zonesync_engine::RecordId::new(SyncConfig::default().zone_id(), "N1"),
        );
        note.serialize(&mut record);

        let mut back = Note::default();
        back.deserialize(&record);
        assert_eq!(back, note);
    }
}
