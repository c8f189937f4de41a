//! 🚀 billx-cli: the front door, the bouncer, the maitre d' of billx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, wires Ctrl-C to the cancel token, runs one
//! ingestion, and prints what happened. Like a manager, but it reads the report. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use billx::IngestOutcome;
use chrono::{DateTime, Utc};
use clap::Parser;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// 🧾 Read cloud billing exports from S3 and bulk-load the line items into Elasticsearch.
#[derive(Parser, Debug)]
#[command(name = "billx", version, about, long_about = None)]
struct Cli {
    /// TOML config file. Leave it out to configure through BILLX_* env vars only.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// 🚀 main(): the "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing, with Ctrl-C as the emergency brake
/// 5. Print the receipt, or peel the error onion
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let the_cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    if let Some(ref config_file) = the_cli.config {
        let it_exists = config_file.try_exists().with_context(|| {
            format!(
                "💀 Could not check whether the config file exists. Was checking here: '{}'",
                config_file.display()
            )
        })?;
        if !it_exists {
            anyhow::bail!(
                "💀 Configuration file not found at '{}'. Maybe it's a pwd/cwd thing with relative paths. \
                 Use an absolute path, to be absolutely certain.",
                config_file.display()
            );
        }
    }

    let app_config = billx::app_config::load_config(the_cli.config.as_deref())
        .context("💀 In billx-cli, main, we couldn't load the config. Check the file and the BILLX_* env vars.")?;

    // 🛑 Ctrl-C cancels the run. Every stage listens to the same token.
    let the_cancel = CancellationToken::new();
    let the_ctrl_c_token = the_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, cancelling the run. The bill will still be there tomorrow.");
            the_ctrl_c_token.cancel();
        }
    });

    // 🚀 SEND IT. No take-backs.
    let result = billx::run(&app_config, the_cancel).await;

    match result {
        Ok(the_outcome) => {
            let the_next = the_outcome.next_checkpoint(app_config.repository.last_imported_manifest);
            println!("{}", summary_table(&the_outcome, the_next));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                    || cause_str.contains("dispatch failure")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like S3 or Elasticsearch isn't reachable. \
                    Check the endpoint URLs, the credentials, and that Elasticsearch is actually running. \
                    If you're using Docker, `docker compose up -d` might resurrect it. ☕"
                );
            }

            // 🗑️ Exit with prejudice. Process exitus maximus.
            std::process::exit(1);
        }
    }
}

/// 🍽️ The receipt: two columns, no borders, numbers on the right.
fn summary_table(outcome: &IngestOutcome, next_checkpoint: Option<DateTime<Utc>>) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let the_rows: Vec<(&str, String)> = vec![
        ("objects scanned", outcome.objects_scanned.to_string()),
        ("manifests seen", outcome.manifests_seen.to_string()),
        ("manifests unreachable", outcome.manifests_unreachable.to_string()),
        ("manifests failed", outcome.manifests_failed.to_string()),
        ("manifests accepted", outcome.manifests_accepted.to_string()),
        ("manifests rejected", outcome.manifests_rejected.to_string()),
        ("parts read", outcome.parts_read.to_string()),
        ("parts skipped", outcome.parts_skipped.to_string()),
        ("parts incomplete", outcome.parts_incomplete.to_string()),
        ("parts malformed", outcome.parts_malformed.to_string()),
        ("parts interrupted", outcome.parts_interrupted.to_string()),
        ("line items decoded", outcome.line_items_decoded.to_string()),
        ("line items indexed", outcome.line_items_indexed.to_string()),
        ("line items already present", outcome.line_items_already_present.to_string()),
        ("line items failed", outcome.line_items_failed.to_string()),
        ("payloads failed", outcome.payloads_failed.to_string()),
        ("confirmed", outcome.is_confirmed().to_string()),
        (
            "next checkpoint",
            next_checkpoint.map_or_else(|| "none".to_string(), |t| t.to_rfc3339()),
        ),
    ];
    for (label, value) in the_rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
