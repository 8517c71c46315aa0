//! Server command implementation

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use ledgerline_core::Engine;
use ledgerline_server::ServerConfig;

pub async fn cmd_serve(
    engine: Engine,
    db_path: &Path,
    host: &str,
    port: u16,
    check_minutes: u64,
) -> Result<()> {
    println!("🚀 Starting Ledgerline API server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    let check_interval = (check_minutes > 0).then(|| Duration::from_secs(check_minutes * 60));
    match check_interval {
        Some(_) => println!("   Retrain/rollout checks: every {} minutes", check_minutes),
        None => println!("   Retrain/rollout checks: disabled"),
    }

    // CORS origins (comma-separated)
    let allowed_origins: Vec<String> = std::env::var("LEDGERLINE_ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let config = ServerConfig {
        allowed_origins,
        check_interval,
    };

    ledgerline_server::serve(engine, host, port, config).await
}
