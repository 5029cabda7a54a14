use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;

use mystnode_sessions::{parse_history_file, Database, SessionHistory, Stats};

use crate::filters::FilterArgs;

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List recorded sessions
    List {
        #[command(flatten)]
        filters: FilterArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show aggregate statistics
    Stats {
        #[command(flatten)]
        filters: FilterArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a single session
    Show {
        /// Session ID
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Import session records from a JSONL file
    Import {
        /// File with one session record per line
        file: PathBuf,
    },
}

pub fn handle_sessions_command(db: &Database, action: SessionsAction) -> Result<()> {
    match action {
        SessionsAction::List { filters, json } => {
            let mut query = filters.to_query(Utc::now())?;
            query.collect_sessions();
            query.execute(db).context("Failed to query sessions")?;
            let sessions = query.into_results().sessions.unwrap_or_default();

            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("{}", "No sessions found.".dimmed());
            } else {
                print_sessions_table(&sessions);
            }
        }
        SessionsAction::Stats { filters, json } => {
            let mut query = filters.to_query(Utc::now())?;
            query.collect_stats();
            query.execute(db).context("Failed to compute session stats")?;
            let stats = query.into_results().stats.unwrap_or_default();

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        SessionsAction::Show { id, json } => {
            let session = db
                .sessions()
                .get(&id)?
                .with_context(|| format!("Session not found: {}", id))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                print_session_detail(&session);
            }
        }
        SessionsAction::Import { file } => {
            let parsed = parse_history_file(&file)?;
            let store = db.sessions();

            let mut imported = 0usize;
            for session in &parsed.sessions {
                if store.save(session)? {
                    imported += 1;
                }
            }
            let existing = parsed.sessions.len() - imported;

            tracing::info!(imported, existing, skipped = parsed.skipped, "Session import finished");
            println!(
                "Imported {} session(s), {} already present, {} unreadable line(s).",
                imported.to_string().bright_green(),
                existing,
                parsed.skipped
            );
        }
    }

    Ok(())
}

fn print_sessions_table(sessions: &[SessionHistory]) {
    println!(
        "{:<20} {:<8} {:<12} {:<12} {:<10} {:<8} {}",
        "STARTED".dimmed(),
        "DIR".dimmed(),
        "SENT".dimmed(),
        "RECEIVED".dimmed(),
        "DURATION".dimmed(),
        "TOKENS".dimmed(),
        "CONSUMER".dimmed(),
    );

    for s in sessions {
        let started = s.started.format("%Y-%m-%d %H:%M").to_string();
        let direction = s.direction.to_string();
        let duration = if s.is_open() {
            "active".bright_cyan().to_string()
        } else {
            format_duration(s.duration())
        };

        println!(
            "{:<20} {:<8} {:<12} {:<12} {:<10} {:<8} {}",
            started,
            direction,
            format_bytes(s.data_sent),
            format_bytes(s.data_received),
            duration,
            s.tokens,
            s.consumer_id
        );
    }
}

fn print_session_detail(session: &SessionHistory) {
    println!("{}", "=== Session Detail ===".bright_blue().bold());
    println!("{}  {}", "ID:".dimmed(), session.session_id);
    println!("{}  {}", "Direction:".dimmed(), session.direction);
    println!("{}  {}", "Consumer:".dimmed(), session.consumer_id);
    println!("{}  {}", "Provider:".dimmed(), session.provider_id);
    println!(
        "{}  {}",
        "Started:".dimmed(),
        session.started.format("%Y-%m-%d %H:%M:%S UTC")
    );
    match session.ended {
        Some(ended) => {
            println!(
                "{}  {}",
                "Ended:".dimmed(),
                ended.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!(
                "{}  {}",
                "Duration:".dimmed(),
                format_duration(session.duration())
            );
        }
        None => println!("{}  {}", "Status:".dimmed(), "ACTIVE".bright_cyan()),
    }
    println!("{}  {}", "Sent:".dimmed(), format_bytes(session.data_sent));
    println!(
        "{}  {}",
        "Received:".dimmed(),
        format_bytes(session.data_received)
    );
    println!("{}  {}", "Tokens:".dimmed(), session.tokens);
}

fn print_stats(stats: &Stats) {
    println!("{}", "=== Session Statistics ===".bright_blue().bold());
    println!("{}  {}", "Total Sessions:".dimmed(), stats.count);
    println!(
        "{}  {}",
        "Unique Consumers:".dimmed(),
        stats.consumer_counts.len()
    );
    println!(
        "{}  {}",
        "Data Sent:".dimmed(),
        format_bytes(stats.sum_data_sent)
    );
    println!(
        "{}  {}",
        "Data Received:".dimmed(),
        format_bytes(stats.sum_data_received)
    );
    println!(
        "{}  {}",
        "Total Duration:".dimmed(),
        format_duration(stats.sum_duration)
    );
    println!("{}  {}", "Tokens:".dimmed(), stats.sum_tokens);

    if !stats.consumer_counts.is_empty() {
        let mut consumers: Vec<_> = stats.consumer_counts.iter().collect();
        consumers.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        println!();
        println!("{}", "By Consumer:".dimmed());
        for (consumer, count) in consumers {
            println!("  {:<44} {} sessions", consumer.as_str(), count);
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
