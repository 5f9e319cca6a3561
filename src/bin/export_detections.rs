//! export_detections - export persisted detection events to a JSON document
//!
//! Reads every row of the `weapon_detections` table and writes them, oldest first, in the
//! same format the daemon's `export` command produces.

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use weapon_sentinel::export::ExportRecord;
use weapon_sentinel::{ExportService, SqliteDetectionStore};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the detection database.
    #[arg(long, env = "SENTINEL_DB_PATH", default_value = "weapon_detections.db")]
    db_path: String,
    /// Directory the export file is written to.
    #[arg(long, env = "SENTINEL_EXPORTS_DIR", default_value = "exports")]
    exports_dir: PathBuf,
    /// Only export rows at or above this alert level (safe|low|medium|high).
    #[arg(long)]
    min_level: Option<weapon_sentinel::AlertLevel>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(args.ui);

    let rows = {
        let _stage = ui.stage("Read detection database");
        let store = SqliteDetectionStore::open(&args.db_path)?;
        store.load_all()?
    };

    let records = {
        let _stage = ui.stage("Rebuild detection events");
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match ExportRecord::from_stored(row)? {
                Some(record) => {
                    if let Some(min) = args.min_level {
                        if record.summary.alert_level < min {
                            continue;
                        }
                    }
                    records.push(record);
                }
                None => log::warn!("row {} has no detections; skipped", row.id),
            }
        }
        records
    };
    if records.is_empty() {
        return Err(anyhow!("no detection events in {}", args.db_path));
    }

    let path = {
        let _stage = ui.stage("Write export");
        ExportService::new(&args.exports_dir).write_records(&records, Utc::now())?
    };
    println!("{}", path.display());
    eprintln!("exported {} of {} row(s)", records.len(), rows.len());
    Ok(())
}
