// crates/cstp-cli/src/main.rs
// ============================================================================
// Module: CSTP Server Entry Point
// Description: Argument parsing, configuration load, and server startup.
// Purpose: Run the CSTP decision-intelligence server.
// Dependencies: clap, cstp-config, cstp-core, cstp-providers, cstp-server, tokio
// ============================================================================

//! ## Overview
//! The binary loads YAML configuration (with `CSTP_` environment
//! overrides), wires the vector backend (Chroma when `CHROMA_URL` is set,
//! in-memory otherwise), and serves HTTP until terminated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cstp_config::Config;
use cstp_core::VectorStore;
use cstp_providers::ChromaConfig;
use cstp_providers::ChromaVectorStore;
use cstp_providers::MemoryVectorStore;
use cstp_server::ServerState;

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// CSTP decision-intelligence server.
#[derive(Debug, Parser)]
#[command(name = "cstp-server", version, about = "CSTP decision intelligence server")]
struct Args {
    /// Bind address override.
    #[arg(long)]
    host: Option<String>,

    /// Bind port override.
    #[arg(long)]
    port: Option<u16>,

    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config/server.yaml")]
    config: PathBuf,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Loads config, wires state, and serves.
async fn run(args: Args) -> Result<(), String> {
    let mut config = Config::load(&args.config).map_err(|e| e.to_string())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    for warning in &config.warnings {
        report(&format!("config warning: {warning}"));
    }

    let vector = build_vector_store()?;
    let state = ServerState::from_config(config, vector).map_err(|e| e.to_string())?;
    cstp_server::serve(Arc::new(state))
        .await
        .map_err(|e| e.to_string())
}

/// Chooses the vector backend from the environment.
fn build_vector_store() -> Result<Arc<dyn VectorStore>, String> {
    match std::env::var("CHROMA_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let chroma_config = ChromaConfig {
                base_url: url,
                collection: std::env::var("CHROMA_COLLECTION")
                    .unwrap_or_else(|_| "decisions_gemini".to_string()),
                ..ChromaConfig::default()
            };
            let store = ChromaVectorStore::new(chroma_config).map_err(|e| e.to_string())?;
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(MemoryVectorStore::new())),
    }
}

/// Writes one diagnostic line to standard error.
#[allow(clippy::print_stderr, reason = "The CLI's only diagnostic channel.")]
fn report(message: &str) {
    eprintln!("cstp-server: {message}");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            report(&message);
            ExitCode::FAILURE
        }
    }
}
