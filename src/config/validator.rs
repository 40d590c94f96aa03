//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate broker configuration
pub fn validate_broker(broker: &BrokerConfig) -> Result<()> {
    if broker.workers.is_empty() {
        anyhow::bail!("Broker mode requires at least one worker (--host-list, --clients-file or [broker].workers)");
    }
    if broker.band_timeout_ms == 0 {
        anyhow::bail!("band_timeout_ms must be greater than 0");
    }
    if broker.connect_timeout_ms == 0 {
        anyhow::bail!("connect_timeout_ms must be greater than 0");
    }
    Ok(())
}

/// Validate client configuration
///
/// The worker count is checked against the roster by the broker, which is the only
/// party that knows it.
pub fn validate_client(client: &ClientConfig) -> Result<()> {
    if client.broker.trim().is_empty() {
        anyhow::bail!("broker address must not be empty");
    }
    if client.width == 0 || client.height == 0 {
        anyhow::bail!(
            "board dimensions must be positive, got {}x{}",
            client.width,
            client.height
        );
    }
    if client.threads == 0 {
        anyhow::bail!("threads must be at least 1");
    }
    if client.threads > client.height {
        anyhow::bail!(
            "threads ({}) cannot exceed board height ({})",
            client.threads,
            client.height
        );
    }
    if !(0.0..=1.0).contains(&client.density) {
        anyhow::bail!("density must be between 0.0 and 1.0, got {}", client.density);
    }
    if client.tick_ms == 0 {
        anyhow::bail!("tick_ms must be greater than 0");
    }
    Ok(())
}
