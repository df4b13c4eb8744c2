use std::sync::Arc;

use anyhow::Context;
use db::DBService;
use server::{app, state::AppState};
use services::services::{
    background::{LinkUsageBackgroundService, ProgramBackgroundService},
    config::ReferralConfig,
    ledger::LogLedger,
    notification::LogDelivery,
};
use tokio::net::TcpListener;
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ReferralConfig::from_env().context("failed to load configuration")?;
    let db = DBService::new(&config.database_url)
        .await
        .context("failed to open database")?;
    let state = AppState::new(
        db.clone(),
        &config,
        Arc::new(LogDelivery),
        Arc::new(LogLedger),
    );

    LinkUsageBackgroundService::new(db.clone(), state.locks.clone(), config.schedule.clone())
        .spawn();
    ProgramBackgroundService::new(
        db,
        state.directory.clone(),
        state.notifications.clone(),
        state.locks.clone(),
        config.schedule.clone(),
    )
    .spawn();

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Referral server listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state)).await?;
    Ok(())
}
