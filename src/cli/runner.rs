use super::Cli;
use crate::models::AppConfig;
use crate::services::config_service::ConfigService;
use crate::services::mysql_service::TunneledDatabase;
use crate::services::ssh_service::SecureTunnel;
use crate::services::transport::{TransportRegistry, DEFAULT_TRANSPORT};
use anyhow::{bail, Context};
use std::io::Write;
use std::sync::Arc;

/// Load the configuration named on the command line and run the query,
/// writing one line per record to `out`.
pub async fn run<W: Write>(cli: &Cli, out: &mut W) -> anyhow::Result<()> {
    let config = ConfigService::load(&cli.config).context("loadConfig failed")?;
    run_with_config(&config, &cli.query, out).await
}

/// Open the tunnel, then the database; release both in reverse order on
/// every path.
pub async fn run_with_config<W: Write>(
    config: &AppConfig,
    query: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    let tunnel = Arc::new(
        SecureTunnel::open(&config.ssh)
            .await
            .context("openSSH failed")?,
    );

    let result = query_through(tunnel.clone(), config, query, out).await;

    if let Err(e) = tunnel.close().await {
        tracing::warn!("Closing tunnel failed: {}", e);
    }
    result
}

async fn query_through<W: Write>(
    tunnel: Arc<SecureTunnel>,
    config: &AppConfig,
    query: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    let registry = TransportRegistry::new();
    registry.register(DEFAULT_TRANSPORT, tunnel).await?;

    let mut db = TunneledDatabase::open(&config.mysql, DEFAULT_TRANSPORT, &registry)
        .await
        .context("openMysql failed")?;

    let outcome = db.query_records(query).await;
    if let Err(e) = db.close().await {
        tracing::warn!("Closing database failed: {}", e);
    }
    let outcome = outcome.context("query failed")?;

    for record in &outcome.records {
        writeln!(out, "{}", record)?;
    }

    if !outcome.is_complete() {
        for error in &outcome.errors {
            tracing::error!("Skipped {}", error);
        }
        bail!(
            "query failed: {} row(s) could not be decoded",
            outcome.errors.len()
        );
    }
    Ok(())
}
