//! `posetree-sim` – drift-and-correct tracking simulator.
//!
//! This binary exercises the pose forest end to end.  It:
//!
//! 1. Loads `~/.posetree/config.toml` (or `$POSETREE_CONFIG`); writes the
//!    defaults there when the file is absent.
//! 2. Tracks a simulated camera, chaining every frame to its keyframe.
//! 3. Feeds periodic optimizer rounds through the merge coordinator.
//! 4. Stops tracking early on **Ctrl-C** and still drains pending rounds.

mod config;
mod sim;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use crate::sim::{SimReport, Simulation};

fn main() -> ExitCode {
    let _telemetry = posetree_runtime::init_tracing("posetree-sim");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing pending merges …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "  Tracking {} frames (keyframe every {}, optimizer every {}, drift {} m/frame)\n",
        cfg.frames.to_string().bold(),
        cfg.keyframe_interval,
        cfg.optimize_every,
        cfg.drift_per_frame
    );

    // ── Simulation ────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(Simulation::new(cfg, shutdown).run()) {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Simulation failed".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Defaults plus environment overrides; persisted so the user has a file
/// to edit next time.
fn first_run_config() -> config::Config {
    let mut cfg = config::Config::default();
    config::apply_env_overrides(&mut cfg);
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Ignoring environment overrides".yellow(), e);
        cfg = config::Config::default();
    }

    let path = config::config_path();
    match config::save_to(&config::Config::default(), &path) {
        Ok(()) => println!(
            "  No configuration found; defaults written to {}",
            path.display().to_string().bold()
        ),
        Err(e) => warn!(error = %e, "Could not write default config"),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        posetree · tracking sim       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
}

fn print_report(report: &SimReport) {
    let status = if report.interrupted {
        "interrupted".yellow()
    } else {
        "complete".green()
    };
    println!();
    println!("  Run {status}");
    println!("    frames tracked   : {}", report.frames_tracked);
    println!("    keyframes        : {}", report.keyframes);
    println!("    live nodes       : {}", report.live_nodes);
    println!("    epoch            : {}", report.epoch);
    println!(
        "    rounds merged    : {} ({} skipped, {} poses)",
        report.merge.rounds_merged, report.merge.rounds_skipped, report.merge.poses_committed
    );
    println!("    worst drift      : {:.4} m", report.max_tracking_error);

    let final_error = format!("{:.4} m", report.final_error);
    if report.final_error <= report.max_tracking_error {
        println!("    final error      : {}", final_error.green());
    } else {
        println!("    final error      : {}", final_error.red());
    }
    println!();
}
