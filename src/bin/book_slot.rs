// Fires the booking race once and exits. Not getting a slot still exits zero.

use anyhow::{Context, Result};
use chrono::Utc;
use slot_sniper::{
    delay_until_release, init_logging, warm_up_and_wait, Credentials, CultClient, RaceConfig,
    RaceOrchestrator, WARM_UP_LEAD,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let config = RaceConfig::from_env().context("invalid race configuration")?;
    let credentials = Credentials::from_env().context("missing booking credentials")?;
    let client = CultClient::new(&config, &credentials).context("failed to build booking client")?;

    let wait = config
        .release_at
        .map(|release_at| delay_until_release(Utc::now(), config.reference_tz, release_at))
        .unwrap_or_default();
    if !wait.is_zero() {
        info!(
            phase = "wait",
            wait_ms = wait.as_millis() as u64,
            warm_up_lead_ms = WARM_UP_LEAD.as_millis() as u64,
            "sleeping until slots open"
        );
    }

    // TCP + TLS handshake out of the way shortly before slots open
    warm_up_and_wait(&client, wait, WARM_UP_LEAD).await;
    info!(phase = "release", "slots open");

    let race = RaceOrchestrator::new(client, config);
    race.run().await;

    Ok(())
}
