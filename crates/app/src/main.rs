use std::sync::Arc;

use reportdesk_app::{demo, AppConfig};
use reportdesk_infra::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    reportdesk_observability::init_with(&config.log);

    tracing::info!(
        engine = %config.engine_name,
        backoff_unit_ms = config.backoff_unit.as_millis() as u64,
        faults = config.faults.len(),
        "starting reportdesk"
    );

    let stats = demo::run(&config, Arc::new(SystemClock)).await?;
    tracing::info!(
        completed = stats.completed,
        dead_letter = stats.dead_letter,
        "reportdesk finished"
    );
    Ok(())
}
