//! filecast - A TCP File Distribution Server
//!
//! This is the main entry point for the filecast server.
//! It parses the command line, sets up logging, and runs the server until
//! Ctrl+C.

use filecast::{Server, ServerConfig};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                config.host = value(&args, i, "--host").to_string();
                i += 2;
            }
            "--port" | "-p" => {
                config.port = value(&args, i, "--port").parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid port number");
                    std::process::exit(1);
                });
                i += 2;
            }
            "--dir" | "-d" => {
                config.files_dir = PathBuf::from(value(&args, i, "--dir"));
                i += 2;
            }
            "--workers" | "-w" => {
                config.workers = value(&args, i, "--workers").parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid worker count");
                    std::process::exit(1);
                });
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("filecast version {}", filecast::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

/// Returns the value following the flag at `i`, or exits.
fn value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(v) => v,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
filecast - A TCP File Distribution Server

USAGE:
    filecast [OPTIONS]

OPTIONS:
    -h, --host <HOST>       Host to bind to (default: {host})
    -p, --port <PORT>       Port to listen on (default: {port})
    -d, --dir <DIR>         Directory of files to serve (default: {dir})
    -w, --workers <N>       Number of transfer workers (default: {workers})
    -v, --version           Print version information
        --help              Print this help message

ENVIRONMENT:
    RUST_LOG                Log filter (default: info)

EXAMPLES:
    filecast                          # Serve ./files on 0.0.0.0:11011
    filecast --dir /srv/share         # Serve another directory
    filecast --port 9000 -w 8         # Smaller pool on port 9000
"#,
        host = filecast::DEFAULT_HOST,
        port = filecast::DEFAULT_PORT,
        dir = filecast::config::DEFAULT_FILES_DIR,
        workers = filecast::worker::DEFAULT_WORKERS,
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
filecast v{} - TCP File Distribution Server
──────────────────────────────────────────────────────────────
Serving {} on {}
Workers: {}   Queue: {}

Use Ctrl+C to shutdown gracefully.
"#,
        filecast::VERSION,
        config.files_dir.display(),
        config.bind_address(),
        config.workers,
        config.queue_capacity,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Print the banner
    print_banner(&config);

    if !config.files_dir.is_dir() {
        warn!(dir = %config.files_dir.display(), "Files directory does not exist");
    }

    let server = Server::bind(config).await?;

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received");
    };

    server.run_until(shutdown).await?;
    Ok(())
}
