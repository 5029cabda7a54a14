use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::SessionHistory;

/// Session records read from a JSONL export.
#[derive(Debug, Default)]
pub struct ParsedHistory {
    pub sessions: Vec<SessionHistory>,
    /// Lines that could not be parsed as a session record.
    pub skipped: usize,
}

/// Parse a JSONL file holding one [`SessionHistory`] per line.
///
/// Blank lines are ignored. Malformed lines are logged and counted rather
/// than failing the whole file.
pub fn parse_history_file(path: &Path) -> Result<ParsedHistory> {
    let file = File::open(path).with_context(|| format!("Failed to open history file: {:?}", path))?;
    parse_history(BufReader::new(file))
}

pub fn parse_history(reader: impl BufRead) -> Result<ParsedHistory> {
    let mut parsed = ParsedHistory::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| "Failed to read line from history file")?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<SessionHistory>(&line) {
            Ok(session) => parsed.sessions.push(session),
            Err(e) => {
                tracing::warn!(
                    "Skipping history line {}: {} ({})",
                    index + 1,
                    e,
                    line.chars().take(100).collect::<String>()
                );
                parsed.skipped += 1;
            }
        }
    }

    Ok(parsed)
}
