use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use raceday_updates::backfill::BackfillIndex;
use raceday_updates::config::UpdatesConfig;
use raceday_updates::reconcile::{Aggregator, PrimaryFeed};
use raceday_updates::timestamp::parse_meeting_date;

const USAGE: &str = "usage: raceday_updates <daily|counts> --date YYYY-MM-DD [--meeting-id N]\n       raceday_updates raw --which scratchings|conditions";

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("raceday_updates=info")),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(command) = args.first().map(String::as_str) else {
        return Err(anyhow!(USAGE));
    };

    let config = UpdatesConfig::from_env().context("loading configuration")?;
    let aggregator = Aggregator::from_config(&config, Arc::new(BackfillIndex::new()))
        .context("building aggregator")?;

    match command {
        "daily" => {
            let date = parse_date_arg(&args)?;
            let mut result = aggregator
                .aggregate(date)
                .with_context(|| format!("aggregating {date}"))?;
            if let Some(meeting_id) = parse_meeting_id_arg(&args)? {
                result = result.only_meeting(meeting_id);
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "counts" => {
            let date = parse_date_arg(&args)?;
            let result = aggregator
                .aggregate(date)
                .with_context(|| format!("aggregating {date}"))?;
            println!("{}", serde_json::to_string_pretty(&result.counts())?);
        }
        "raw" => {
            let which = arg_value(&args, "--which").ok_or_else(|| anyhow!(USAGE))?;
            let feed = PrimaryFeed::parse(&which)
                .ok_or_else(|| anyhow!("--which must be scratchings or conditions, got {which}"))?;
            let rows = aggregator
                .raw_rows(feed)
                .with_context(|| format!("fetching raw {}", feed.label()))?;
            let sample = rows.iter().take(3).collect::<Vec<_>>();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({"count": rows.len(), "sample": sample}))?
            );
        }
        other => return Err(anyhow!("unknown command {other}\n{USAGE}")),
    }
    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}

fn parse_date_arg(args: &[String]) -> Result<NaiveDate> {
    let raw = arg_value(args, "--date").ok_or_else(|| anyhow!(USAGE))?;
    parse_meeting_date(&raw).ok_or_else(|| anyhow!("--date must be YYYY-MM-DD, got {raw}"))
}

fn parse_meeting_id_arg(args: &[String]) -> Result<Option<u64>> {
    arg_value(args, "--meeting-id")
        .map(|raw| {
            raw.parse::<u64>()
                .with_context(|| format!("--meeting-id must be an integer, got {raw}"))
        })
        .transpose()
}
