//! Latch Memory Probe
//!
//! Resolves a handful of engine composites, allocates them through every
//! entry point and verifies the returned alignment.
//!
//! Usage: `latch-memprobe [settings.json]`

mod probe;
mod settings;

use anyhow::{Context, Result};
use latch_memory::AllocationStats;
use settings::ProbeSettings;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Latch Memory v{}", latch_memory::VERSION);

    let settings = match std::env::args().nth(1) {
        Some(path) => ProbeSettings::load(&path).with_context(|| format!("loading {path}"))?,
        None => ProbeSettings::default(),
    };
    tracing::info!(
        simd_alignment = latch_memory::SIMD_ALIGNMENT,
        max_alignment = latch_memory::MAX_ALIGNMENT,
        sizes = ?settings.sizes,
        "probing"
    );

    let reports = probe::run(&settings).context("alignment probe failed")?;
    for report in &reports {
        tracing::info!(
            composite = report.composite,
            winner = report.winner,
            alignment = report.alignment,
            custom_hooks = report.custom_hooks,
            checked = report.allocations_checked,
            "ok"
        );
    }

    let stats = AllocationStats::snapshot();
    tracing::info!(
        allocations = stats.allocations,
        frees = stats.frees,
        live = stats.live(),
        "allocation counters"
    );
    if settings.report_json {
        let out = serde_json::json!({ "composites": reports, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&out)?);
    }

    Ok(())
}
