//! Ledger node binary
//!
//! Opens the ledger, applies the configured genesis file and optionally
//! exports the resulting state.

use anyhow::Context;
use assets_core::{Config, GenesisState, Ledger};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::var("ASSETS_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        Err(_) => Config::from_env().context("failed to load config from environment")?,
    };
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting assets ledger node"
    );
    let genesis = config.genesis.clone();
    let metrics_file = config.metrics_file.clone();

    let ledger = Ledger::open(config).context("failed to open ledger")?;
    tracing::info!(data_dir = %ledger.config().data_dir.display(), "Ledger opened");

    if let Some(path) = &genesis.file {
        let state = GenesisState::from_file(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read genesis file");
            e
        })?;
        ledger
            .init_genesis(&state, genesis.mode)
            .with_context(|| format!("genesis {} rejected", path.display()))?;
    }

    if let Some(path) = &genesis.export_file {
        ledger
            .export_genesis()?
            .to_file(path)
            .with_context(|| format!("failed to export state to {}", path.display()))?;
        tracing::info!(path = %path.display(), "State exported");
    }

    let digest = ledger.state_digest()?;
    tracing::info!(digest = %hex::encode(digest), "Ledger ready");

    if let Some(path) = &metrics_file {
        let text = ledger.metrics().encode_text()?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }

    Ok(())
}
