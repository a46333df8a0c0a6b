use std::{str::FromStr, sync::Arc};

use anyhow::Context;
use classroom_chat::{
    AppState, app,
    auth::{HmacTokenGate, SharedTokenGate},
    clock::{Clock, SystemClock},
    config::Config,
    db,
    sweeper::SessionSweeper,
};
use cron::Schedule;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;

    let tokens: SharedTokenGate = Arc::new(HmacTokenGate::new(&config.token_secret)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let app_state = AppState::new(db_pool, &config, tokens, Arc::clone(&clock));

    let schedule = Schedule::from_str(&config.sweep_cron)?;
    let sweeper = SessionSweeper::new(Arc::clone(&app_state.sessions), clock, config.close_check_time).spawn(schedule);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        sweep_cron = %config.sweep_cron,
        close_cutoff_time = %config.close_cutoff_time,
        close_check_time = %config.close_check_time,
        "classroom chat listening"
    );

    axum::serve(listener, app(app_state)).await?;

    sweeper.abort();
    Ok(())
}
