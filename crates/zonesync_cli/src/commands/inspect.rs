//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use zonesync_engine::{FileSettings, SettingsSnapshot};

/// Settings inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Settings file path.
    pub path: String,
    /// Whether the zone is known to exist.
    pub zone_provisioned: bool,
    /// Stored cursors.
    pub cursors: Vec<CursorInfo>,
}

/// One stored change-feed cursor.
#[derive(Debug, Serialize)]
pub struct CursorInfo {
    /// Entity type the cursor belongs to.
    pub entity_type: String,
    /// Cursor length in bytes.
    pub size: usize,
    /// Cursor bytes as hex.
    pub hex: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = FileSettings::load(path)?
        .ok_or_else(|| format!("No settings found at {}", path.display()))?;
    let result = summarize(path, &snapshot);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn summarize(path: &Path, snapshot: &SettingsSnapshot) -> InspectResult {
    InspectResult {
        path: path.display().to_string(),
        zone_provisioned: snapshot.zone_provisioned,
        cursors: snapshot
            .cursors
            .iter()
            .map(|(entity_type, bytes)| CursorInfo {
                entity_type: entity_type.clone(),
                size: bytes.len(),
                hex: to_hex(bytes),
            })
            .collect(),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("zonesync Settings");
    println!("=================");
    println!();
    println!("Path: {}", result.path);
    println!("Zone provisioned: {}", if result.zone_provisioned { "yes" } else { "no" });
    println!();

    if result.cursors.is_empty() {
        println!("Cursors: none (next pull is a full resync)");
        return;
    }
    println!("Cursors:");
    for cursor in &result.cursors {
        println!(
            "  {:<16} {} bytes  {}",
            cursor.entity_type, cursor.size, cursor.hex
        );
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
