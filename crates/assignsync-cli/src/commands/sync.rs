//! Sync subcommand: run passes against the configured calendar.

use assignsync_core::{CalendarSyncEngine, SyncDirection, SyncOutcome};
use chrono::Utc;
use clap::Subcommand;

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Run one sync pass
    Run {
        /// import, export or bidirectional (default: from config)
        #[arg(long, value_parser = parse_direction)]
        direction: Option<SyncDirection>,
        /// Days before today to include
        #[arg(long)]
        past_days: Option<u32>,
        /// Days after today to include
        #[arg(long)]
        future_days: Option<u32>,
    },
    /// Show last sync, pending conflicts and mapped items
    Status,
    /// Show recent sync passes
    History {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

fn parse_direction(raw: &str) -> Result<SyncDirection, String> {
    SyncDirection::parse(raw)
        .ok_or_else(|| format!("unknown direction '{raw}' (import, export, bidirectional)"))
}

pub async fn run(action: SyncAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        SyncAction::Run {
            direction,
            past_days,
            future_days,
        } => {
            let mut config = ctx.config.sync.clone();
            if let Some(d) = direction {
                config.direction = d;
            }
            if let Some(p) = past_days {
                config.window_past_days = p;
            }
            if let Some(f) = future_days {
                config.window_future_days = f;
            }
            let direction = config.direction;
            let window = config.window_at(Utc::now())?;
            let engine = CalendarSyncEngine::new(&ctx.db, ctx.provider.as_ref(), config);
            let report = engine.run(direction, window).await?;
            if report.outcome == SyncOutcome::Partial {
                eprintln!("{} item(s) failed; see the report", report.errors.len());
            }
            print_json(&report)?;
        }
        SyncAction::Status => {
            print_json(&ctx.service().status()?)?;
        }
        SyncAction::History { limit } => {
            print_json(&ctx.service().engine().history(limit)?)?;
        }
    }
    Ok(())
}
