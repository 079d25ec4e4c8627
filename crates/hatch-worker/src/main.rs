//! hatch-worker CLI entry point.
//!
//! Usage:
//!   hatch-worker <encoded-task>    # Run one op and exit
//!   hatch-worker --list            # List registered ops
//!
//! The encoded task is a base64 `{op, arg}` call, normally produced by the
//! parent runtime rather than typed by hand.

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hatch_worker::{register_builtins, OpRegistry, WorkerLink};

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var); stderr only, stdout
    // belongs to the frame protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let mut registry = OpRegistry::new();
    register_builtins(&mut registry);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("--help" | "-h") => {
            print_help();
            ExitCode::SUCCESS
        }

        Some("--version" | "-V") => {
            println!("hatch-worker {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }

        Some("--list") => {
            for name in registry.names() {
                println!("{name}");
            }
            ExitCode::SUCCESS
        }

        _ => {
            let mut link = WorkerLink::stdio();
            let code = hatch_worker::run(&registry, &args, &mut link);
            ExitCode::from(code as u8)
        }
    }
}

fn print_help() {
    println!(
        r#"hatch-worker v{}

Usage:
  hatch-worker <encoded-task>    Run one op and exit
  hatch-worker --list            List registered ops

Options:
  -h, --help                     Show this help
  -V, --version                  Show version

The encoded task is a base64 {{op, arg}} call; the parent runtime produces
it when an op task is spawned."#,
        env!("CARGO_PKG_VERSION")
    );
}
