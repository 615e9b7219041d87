//! Startup wiring for the two binaries.
//!
//! - [`resources`]: connections to Redis, the message bus and `PostgreSQL`
//! - [`prepare_capacity`]: write the venue table and open the bootstrap event
//!
//! # Example
//!
//! ```rust,ignore
//! let resources = ResourceManager::from_config(&config).await?;
//! prepare_capacity(&resources.capacity_bootstrap(), &config.bootstrap).await;
//! let saga = resources.purchase_saga();
//! ```

pub mod resources;

pub use resources::{ConsumerResources, ResourceManager, connect_bus};

use crate::capacity::{BootstrapError, CapacityBootstrap};
use crate::config::BootstrapConfig;
use tracing::{info, warn};

/// Write the static venue table, then open the configured event on every
/// zone of its venue.
///
/// Opening resets seat state, so restarting the purchase service reopens the
/// bootstrap event. A failure is logged and the service starts anyway;
/// purchases against an unopened zone fail until it is opened.
pub async fn prepare_capacity(bootstrap: &CapacityBootstrap, config: &BootstrapConfig) {
    if let Err(e) = try_prepare_capacity(bootstrap, config).await {
        warn!(
            event_id = %config.event_id,
            venue_id = %config.venue_id,
            error = %e,
            "Capacity bootstrap failed"
        );
    }
}

async fn try_prepare_capacity(bootstrap: &CapacityBootstrap, config: &BootstrapConfig) -> Result<(), BootstrapError> {
    bootstrap.load_venues(&config.venues).await?;
    info!(venues = config.venues.len(), "Venue table loaded");

    let zones = bootstrap
        .initialize_all_zones_for_event(&config.event_id, &config.venue_id)
        .await?;
    info!(
        event_id = %config.event_id,
        venue_id = %config.venue_id,
        zones = zones.len(),
        "Bootstrap event open for sale"
    );
    Ok(())
}
