//! activity_report - print the activity log from a local database

use anyhow::Result;
use clap::{Parser, Subcommand};
use chrono::Utc;

use activity_tracker::events::DEFAULT_EVENT_LIMIT;
use activity_tracker::query::{parse_date, IntervalQuery, DEFAULT_LIST_LIMIT};
use activity_tracker::{ActivityStore, EventStore, SqliteIntervalStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the activity database.
    #[arg(long, env = "ACTIVITY_DB_PATH", default_value = "activity.db")]
    db_path: String,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-activity totals for one day (UTC).
    Summary {
        /// YYYY-MM-DD; defaults to today.
        #[arg(long)]
        date: Option<String>,
    },
    /// Recorded intervals, newest first.
    List {
        /// YYYY-MM-DD; all days when omitted.
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Detection events, newest first.
    Events {
        #[arg(long, default_value_t = DEFAULT_EVENT_LIMIT)]
        limit: usize,
    },
    /// Interval and event counts for today and overall.
    Stats,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let store = SqliteIntervalStore::open(&args.db_path)?;

    match args.command {
        Command::Summary { date } => {
            let date = match date {
                Some(raw) => parse_date(&raw)?,
                None => Utc::now().date_naive(),
            };
            let summary = store.summary(date)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            println!("activity summary for {}", summary.date);
            if summary.summary.is_empty() {
                println!("  (no activity recorded)");
            }
            for (activity, totals) in &summary.summary {
                println!(
                    "  {:<20} {:>10}  ({} intervals)",
                    activity, totals.total_time, totals.count
                );
            }
        }
        Command::List { date, limit } => {
            let query = match date {
                Some(raw) => IntervalQuery::for_date(parse_date(&raw)?),
                None => IntervalQuery::default(),
            }
            .with_limit(limit);
            let records = store.list(&query)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            for record in &records {
                println!(
                    "{:>6}  {}  {:<20} {:<8} {:>6}s",
                    record.id,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.activity,
                    record.zone.as_deref().unwrap_or("-"),
                    record.duration.unwrap_or(0)
                );
            }
        }
        Command::Events { limit } => {
            let events = store.list_events(limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&events)?);
                return Ok(());
            }
            for event in &events {
                println!(
                    "{:>6}  {}  {:<24} {:>3} objects  {:.2}",
                    event.id,
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    event.object_count.unwrap_or(0),
                    event.confidence.unwrap_or(0.0)
                );
            }
        }
        Command::Stats => {
            let now = Utc::now();
            let activities = store.stats(now)?;
            let events = store.event_stats(now)?;
            if args.json {
                let stats = serde_json::json!({ "events": events, "activities": activities });
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("activities  today: {}  total: {}", activities.today, activities.total);
                println!("events      today: {}  total: {}", events.today, events.total);
            }
        }
    }
    Ok(())
}
