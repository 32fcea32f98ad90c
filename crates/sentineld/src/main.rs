use anyhow::Result;
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use sentinel_common::{Database, SentinelConfig};
use sentineld::{AlertService, JobService, RuleEngine, RuleService, Scanner, ScannerScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_level(true)
        .init();

    info!(target: "sentineld", "starting {}", env!("CARGO_PKG_VERSION"));

    let config = SentinelConfig::load_or_default();
    let db = Database::open(&config.database.path).await?;
    db.ping().await?;
    info!(target: "sentineld", "database ready: {}", config.database.path.display());

    let alert_service = AlertService::new(&db, &config);
    let rule_service = RuleService::new(&db, &config);
    let job_service = JobService::new(&db);
    let engine = RuleEngine::new(&db, alert_service.clone(), rule_service.clone(), &config);

    // Seed the bundled rule set; rules already present are preserved
    let defaults_path = &config.rules.defaults_path;
    if defaults_path.exists() {
        match rule_service.load_default_rules(defaults_path).await {
            Ok(inserted) => {
                info!(target: "sentineld", "default rules loaded: {inserted} inserted")
            }
            Err(err) => error!(target: "sentineld", "default rule load failed: {err}"),
        }
    } else {
        info!(
            target: "sentineld",
            "no default rule document at {}",
            defaults_path.display()
        );
    }

    let scanner = Scanner::new(engine, job_service);
    let scheduler = Arc::new(ScannerScheduler::new(scanner, config.scanner.interval()));
    scheduler.start().await;
    info!(
        target: "sentineld",
        "auto-close scanner scheduled every {}s",
        config.scanner.interval_secs
    );

    wait_for_shutdown().await;
    info!(target: "sentineld", "shutting down");
    scheduler.shutdown().await;
    info!(target: "sentineld", "shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                error!(target: "sentineld", "failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
