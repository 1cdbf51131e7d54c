//! Echomi Server: headless companion daemon
//!
//! Drives the push orchestrator without a phone: push payloads, notification
//! taps, incoming SMS and push tokens arrive as JSON lines on stdin.
//!
//! # Usage
//!
//! ```bash
//! echomi-server --config /path/to/echomi-server.toml
//! echomi-server --check     # Check the backend once and exit
//! echomi-server --validate  # Validate config and exit
//! ```
//!
//! # Input
//!
//! ```text
//! {"source":"push","data":{"type":"delivery_otp_ready","sender":"AMAZON","orderId":"123"}}
//! {"source":"tap","action":"deny","approvalId":"abc123","company":"Amazon"}
//! {"source":"sms","address":"AX-AMAZON","body":"Your OTP is 482913"}
//! {"source":"token","token":"<push token>"}
//! ```

mod config;
mod daemon;
mod host;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Install the ring CryptoProvider before any TLS connection.
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    // Parse CLI args (minimal, no clap)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/echomi-server.toml");
    let mut one_shot = false;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--check" | "--once" => {
                one_shot = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("echomi-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    server_config.apply_env_overrides();

    server_config
        .validate()
        .context("Configuration validation failed")?;

    std::env::set_var("RUST_LOG", &server_config.server.log_level);
    env_logger::init();

    if validate_only {
        println!("✅ Configuration is valid.");
        println!("  Backend:        {}", server_config.backend.base_url);
        println!(
            "  Timeout:        {} secs",
            server_config.backend.request_timeout_secs
        );
        println!(
            "  Signed in:      {}",
            server_config.identity.uid.as_deref().unwrap_or("(nobody)")
        );
        println!(
            "  ID token:       {}",
            if server_config.identity.id_token.is_some() {
                "set"
            } else {
                "missing"
            }
        );
        println!("  Alarm ceiling:  {} secs", server_config.alarm.ceiling_secs);
        println!(
            "  Approval TTL:   {} secs",
            server_config.approval.expiry_secs
        );
        println!(
            "  OTP attempts:   {} ({} secs apart)",
            server_config.otp.max_attempts, server_config.otp.retry_delay_secs
        );
        println!(
            "  SMS limit:      {} (max {})",
            server_config.collection.default_limit, server_config.collection.max_limit
        );
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    if one_shot {
        log::info!("Probing backend…");
        rt.block_on(daemon::run_check(&server_config))?;
        log::info!("Done.");
    } else if let Err(e) = rt.block_on(daemon::run(server_config)) {
        log::error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Echomi Server: headless push orchestrator daemon

USAGE:
    echomi-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/echomi-server.toml)
    --check, --once       Check the backend once and exit
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

INPUT (one JSON object per line on stdin):
    {{"source":"push","data":{{"type":"...", ...}}}}
    {{"source":"tap","action":"approve|deny|open_detail|stop_alarm","approvalId":"...","company":"..."}}
    {{"source":"sms","address":"...","body":"..."}}
    {{"source":"token","token":"..."}}

ENVIRONMENT VARIABLES (override config file):
    ECHOMI_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    ECHOMI_BACKEND_URL      Backend base URL
    ECHOMI_REQUEST_TIMEOUT  Backend request timeout in seconds
    ECHOMI_UID              Signed-in user id
    ECHOMI_ID_TOKEN         ID token sent as the bearer credential
    ECHOMI_MESSAGES_PATH    JSON file of local SMS for collection jobs

EXAMPLES:
    # Run as daemon with config file
    echomi-server --config /path/to/config.toml

    # Health check (useful for container health checks)
    echomi-server --config config.toml --check

    # Validate configuration
    echomi-server --config config.toml --validate
"#
    );
}
