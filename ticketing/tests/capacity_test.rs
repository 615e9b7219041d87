//! Venue bootstrap and event opening.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use seatguard_core::capacity::{CapacityError, CapacityStore};
use seatguard_core::keys;
use seatguard_core::types::{VenueId, ZoneId};
use seatguard_testing::helpers::{event, purchase, venue};
use seatguard_testing::{InMemoryCapacityStore, InMemorySeatStore};
use std::sync::Arc;
use std::time::Duration;
use ticketing::admission::AdmissionEngine;
use ticketing::capacity::{BootstrapError, CapacityBootstrap};
use ticketing::config::parse_venues;

fn stores() -> (Arc<InMemoryCapacityStore>, Arc<InMemorySeatStore>, CapacityBootstrap) {
    let capacity = Arc::new(InMemoryCapacityStore::new());
    let seats = Arc::new(InMemorySeatStore::new());
    let bootstrap = CapacityBootstrap::new(capacity.clone(), seats.clone());
    (capacity, seats, bootstrap)
}

#[tokio::test]
async fn venue_table_writes_every_zone_shape() {
    let (capacity, _, bootstrap) = stores();
    let venues = parse_venues("Venue1:3:10:30;Venue2:2:26:40").unwrap();

    bootstrap.load_venues(&venues).await.unwrap();

    assert_eq!(
        bootstrap.venue_zones(&venue("Venue1")).await.unwrap(),
        vec![ZoneId::new(1), ZoneId::new(2), ZoneId::new(3)]
    );
    assert!(bootstrap.is_venue_configured(&venue("Venue2")).await.unwrap());
    assert!(!bootstrap.is_venue_configured(&venue("Venue3")).await.unwrap());
    assert_eq!(capacity.capacity(&venue("Venue2"), ZoneId::new(2)).await.unwrap(), 1040);
    assert_eq!(capacity.seats_per_row(&venue("Venue1"), ZoneId::new(3)).await.unwrap(), 30);
}

#[tokio::test]
async fn empty_zone_shape_is_rejected() {
    let (_, _, bootstrap) = stores();
    let err = bootstrap
        .initialize_venue(&venue("Venue1"), 1, 0, 30)
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::InvalidZone(CapacityError::Empty { .. })), "{err:?}");
}

#[tokio::test]
async fn opening_an_event_yields_full_counters_every_time() {
    let (capacity, seats, bootstrap) = stores();
    bootstrap.initialize_venue(&venue("Venue1"), 2, 10, 30).await.unwrap();
    let engine = AdmissionEngine::new(capacity, seats.clone(), Duration::from_secs(1));
    let event = event("Event1");

    bootstrap
        .initialize_all_zones_for_event(&event, &venue("Venue1"))
        .await
        .unwrap();
    engine.try_occupy_seat(&purchase(1, "A", "1")).await.unwrap();
    engine.try_occupy_seat(&purchase(2, "J", "30")).await.unwrap();
    assert_eq!(engine.zone_remaining(&event, ZoneId::new(1)).await.unwrap(), 299);

    let opened = bootstrap
        .initialize_all_zones_for_event(&event, &venue("Venue1"))
        .await
        .unwrap();
    assert_eq!(opened, vec![ZoneId::new(1), ZoneId::new(2)]);

    for zone in opened {
        assert_eq!(engine.zone_remaining(&event, zone).await.unwrap(), 300);
        assert_eq!(seats.popcount(&keys::zone_bitmap(&event, zone)), 0);
        for row in ["A", "E", "J"] {
            assert_eq!(engine.row_remaining(&event, zone, row).await.unwrap(), 30);
        }
    }
    engine.try_occupy_seat(&purchase(1, "A", "1")).await.unwrap();
}

#[tokio::test]
async fn opening_an_unknown_venue_fails() {
    let (_, _, bootstrap) = stores();
    let err = bootstrap
        .initialize_all_zones_for_event(&event("Event1"), &venue("Nowhere"))
        .await
        .unwrap_err();
    assert_eq!(err, BootstrapError::VenueNotConfigured(VenueId::new("Nowhere")));
}

#[tokio::test]
async fn opening_an_unknown_zone_fails() {
    let (_, _, bootstrap) = stores();
    bootstrap.initialize_venue(&venue("Venue1"), 1, 10, 30).await.unwrap();
    let err = bootstrap
        .initialize_event_zone(&event("Event1"), &venue("Venue1"), ZoneId::new(9))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BootstrapError::ZoneNotConfigured {
            venue: VenueId::new("Venue1"),
            zone: ZoneId::new(9),
        }
    );
}

#[tokio::test]
async fn unreachable_store_surfaces_as_store_error() {
    let (capacity, _, bootstrap) = stores();
    capacity.set_unavailable(true);
    let err = bootstrap.is_venue_configured(&venue("Venue1")).await.unwrap_err();
    assert!(matches!(err, BootstrapError::Store(e) if e.is_transient()));
}
