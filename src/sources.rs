use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::connector::ConnectorRegistry;
use crate::db;
use crate::models::{HealthStatus, Trigger};
use crate::store::Store;

/// List configured sources with a live health check per connector.
pub async fn list_sources(config: &Config, registry: &ConnectorRegistry) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = Store::new(pool);
    let now = Utc::now();
    store.seed_sources(config, now).await?;

    println!(
        "{:<16} {:<14} {:<8} {:<22} {:<10} DETAILS",
        "SOURCE", "TYPE", "ENABLED", "TRIGGER", "HEALTH"
    );

    for (source, schedule) in store.list_sources().await? {
        let (healthy, details) = match registry.get(source.source_type) {
            Some(connector) => connector.health_check(&source).await,
            None => (false, "no connector registered".to_string()),
        };
        let health = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        store.set_health(&source.source_id, health, now).await?;

        let trigger = match &schedule.trigger {
            Trigger::IntervalMinutes(m) => format!("every {}m", m),
            Trigger::Cron(expr) => format!("cron {}", expr),
            Trigger::Manual => "manual".to_string(),
        };

        println!(
            "{:<16} {:<14} {:<8} {:<22} {:<10} {}",
            source.source_id,
            source.source_type.as_str(),
            source.enabled,
            trigger,
            health.as_str(),
            details
        );
    }

    Ok(())
}
