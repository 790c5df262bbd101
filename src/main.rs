//! `taskolib-run` - a small CLI that loads a persisted sequence and runs it
//! asynchronously, printing progress messages as they arrive and the final variable
//! table once the run completes.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use taskolib::context::Context;
use taskolib::executor::Executor;
use taskolib::persistence;

#[derive(Parser)]
#[command(name = "taskolib-run")]
#[command(about = "Run a persisted Taskolib sequence")]
#[command(version)]
struct Cli {
    /// Directory containing a sequence previously written by `save_sequence`.
    sequence_dir: PathBuf,

    /// Override the sequence's own timeout, in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Request cancellation after this many milliseconds (for demonstrating
    /// cooperative cancellation).
    #[arg(long = "cancel-after-ms")]
    cancel_after_ms: Option<u64>,

    /// Print the final variable table as JSON instead of plain text.
    #[arg(long)]
    json: bool,

    /// Suppress per-message console output; only the final summary is printed.
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut seq = match persistence::load_sequence(&cli.sequence_dir) {
        Ok(seq) => seq,
        Err(e) => {
            eprintln!("error: failed to load sequence from {}: {e}", cli.sequence_dir.display());
            std::process::exit(1);
        }
    };

    if let Some(ms) = cli.timeout_ms {
        seq.set_timeout(Some(Duration::from_millis(ms)));
    }

    if let Err(e) = seq.validate() {
        eprintln!("error: sequence is malformed: {e}");
        std::process::exit(1);
    }

    let quiet = cli.quiet;
    let mut ctx = Context::new();
    if quiet {
        ctx.message_callback = None;
    }

    let mut executor = Executor::new();
    if let Err(e) = executor.run_asynchronously(&mut seq, &ctx) {
        eprintln!("error: failed to start sequence: {e}");
        std::process::exit(1);
    }

    let cancel_after = cli.cancel_after_ms.map(Duration::from_millis);
    let started = std::time::Instant::now();
    let mut cancelled = false;

    while executor.update(&mut seq) {
        if !cancelled {
            if let Some(cancel_after) = cancel_after {
                if started.elapsed() >= cancel_after {
                    executor.cancel_into(&mut seq);
                    cancelled = true;
                    continue;
                }
            }
        }
        thread::sleep(Duration::from_millis(10));
    }

    let variables = executor.get_context_variables().unwrap_or_default();
    if cli.json {
        let as_strings: std::collections::BTreeMap<String, String> = variables
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_string()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&as_strings).expect("map of strings always serializes"));
    } else if !quiet {
        for (name, value) in &variables {
            println!("{name} = {value}");
        }
    }

    std::process::exit(0);
}
