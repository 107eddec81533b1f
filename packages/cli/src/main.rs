#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Interactive CLI for fetching GBIF occurrences inside polygon layers.
//!
//! The flow mirrors the operator-facing sequence: a warning prompt
//! (accept/cancel), a layer picker filtered to inputs that actually contain
//! polygon features, then one fetch and one clip pass per region with
//! progress bars. Ctrl-C asserts a cooperative cancellation token that the
//! fetch and clip loops check at their per-record checkpoints.
//!
//! Uses `indicatif-log-bridge` (via [`gbif_occ_cli_utils::init_logger`]) so
//! log lines and progress bars never fight for the terminal.

mod run;
mod session;

use std::path::PathBuf;

use clap::Parser;
use dialoguer::{Confirm, Select};

use gbif_occ_client::CancelToken;
use gbif_occ_spatial::{PolygonLayer, load_polygon_layer};

/// Fetch GBIF occurrence records for polygon regions and clip them to the
/// exact polygons.
#[derive(Debug, Parser)]
#[command(name = "gbif_occ")]
struct Args {
    /// GeoJSON layer file(s) to offer in the layer picker.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory the result group is written under.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Skip the large-query warning prompt.
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = gbif_occ_cli_utils::init_logger();
    let args = Args::parse();

    if !args.yes {
        let accepted = Confirm::new()
            .with_prompt(
                "Large queries can take several minutes; at most 100,000 records \
                 are retrieved per query region. Continue?",
            )
            .default(false)
            .interact()?;
        if !accepted {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let Some(layer) = pick_layer(&args.inputs)? else {
        println!("Cancelled.");
        return Ok(());
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Cancellation requested, stopping at the next checkpoint");
                cancel.cancel();
            }
        });
    }

    let api = gbif_occ_client::search::GbifApi::new();
    run::run_layer(&multi, &api, &layer, &args.output_dir, &cancel).await
}

/// Loads the input files and lets the user pick one polygon layer.
///
/// Inputs without any polygon feature are filtered out of the picker. An
/// empty candidate list is fatal; declining the picker returns `None`
/// (user cancellation, not an error).
fn pick_layer(inputs: &[PathBuf]) -> Result<Option<PolygonLayer>, Box<dyn std::error::Error>> {
    let mut layers = Vec::new();
    for path in inputs {
        let layer = load_polygon_layer(path)?;
        if layer.regions.is_empty() {
            log::warn!("'{}' contains no polygon features, skipping", layer.name);
        } else {
            layers.push(layer);
        }
    }

    if layers.is_empty() {
        return Err("no polygon layer among the inputs".into());
    }
    if layers.len() == 1 {
        return Ok(layers.pop());
    }

    let labels: Vec<String> = layers
        .iter()
        .map(|layer| format!("{} ({} region(s))", layer.name, layer.regions.len()))
        .collect();

    let selection = Select::new()
        .with_prompt("Select layer for query")
        .items(&labels)
        .default(0)
        .interact_opt()?;

    Ok(selection.map(|idx| layers.swap_remove(idx)))
}
