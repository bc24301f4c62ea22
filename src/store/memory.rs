use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{sort_oldest_first, BookingStore, Mutator};
use crate::entities::{validate_update, Booking, Coordinates, Status};
use crate::error::{conflict_error, duplicate_open_booking_error, not_found_error, Error};
use crate::geo::{self, GeoCell};

/// Process-local store. One lock guards the records and their indexes together.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    bookings: HashMap<Uuid, Booking>,
    by_passenger: HashMap<Uuid, HashSet<Uuid>>,
    by_driver: HashMap<Uuid, HashSet<Uuid>>,
    // pending bookings only, keyed by pickup cell
    open_cells: HashMap<GeoCell, HashSet<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn index(&mut self, booking: &Booking) {
        self.by_passenger
            .entry(booking.passenger_id)
            .or_default()
            .insert(booking.id);

        if let Some(driver_id) = booking.driver_id {
            self.by_driver.entry(driver_id).or_default().insert(booking.id);
        }

        if booking.is_pending() {
            self.open_cells
                .entry(GeoCell::of(&booking.pickup))
                .or_default()
                .insert(booking.id);
        }
    }

    fn unindex(&mut self, booking: &Booking) {
        if let Some(driver_id) = booking.driver_id {
            remove_from(&mut self.by_driver, &driver_id, &booking.id);
        }

        if booking.is_pending() {
            remove_from(&mut self.open_cells, &GeoCell::of(&booking.pickup), &booking.id);
        }
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a Uuid>) -> Vec<Booking> {
        ids.filter_map(|id| self.bookings.get(id)).cloned().collect()
    }

    fn passenger_bookings(&self, passenger_id: &Uuid) -> Vec<Booking> {
        match self.by_passenger.get(passenger_id) {
            Some(ids) => self.collect(ids.iter()),
            None => vec![],
        }
    }

    fn driver_bookings(&self, driver_id: &Uuid) -> Vec<Booking> {
        match self.by_driver.get(driver_id) {
            Some(ids) => self.collect(ids.iter()),
            None => vec![],
        }
    }
}

fn remove_from<K: std::hash::Hash + Eq>(index: &mut HashMap<K, HashSet<Uuid>>, key: &K, id: &Uuid) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);

        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn create(&self, booking: Booking) -> Result<Booking, Error> {
        let mut inner = self.inner.write().await;

        let has_open = inner
            .passenger_bookings(&booking.passenger_id)
            .iter()
            .any(|existing| existing.status.is_open());

        if has_open {
            return Err(duplicate_open_booking_error());
        }

        inner.index(&booking);
        inner.bookings.insert(booking.id, booking.clone());

        Ok(booking)
    }

    #[tracing::instrument(skip(self))]
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Booking>, Error> {
        Ok(self.inner.read().await.bookings.get(&id).cloned())
    }

    #[tracing::instrument(skip(self, mutator))]
    async fn update_if_status(
        &self,
        id: Uuid,
        expected: Status,
        mutator: Mutator,
    ) -> Result<Booking, Error> {
        let mut inner = self.inner.write().await;

        let current = inner
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found_error("booking not found"))?;

        if current.status != expected {
            tracing::warn!(
                "expected status {} but found {}",
                expected.name(),
                current.status.name()
            );
            return Err(conflict_error("booking was changed by someone else, refresh and retry"));
        }

        let mut next = current.clone();
        mutator(&mut next)?;
        next.version = current.version + 1;

        validate_update(&current, &next)?;

        inner.unindex(&current);
        inner.index(&next);
        inner.bookings.insert(id, next.clone());

        Ok(next)
    }

    async fn list_open_by_passenger(&self, passenger_id: Uuid) -> Result<Vec<Booking>, Error> {
        let inner = self.inner.read().await;

        let mut bookings: Vec<Booking> = inner
            .passenger_bookings(&passenger_id)
            .into_iter()
            .filter(|booking| booking.status.is_open())
            .collect();
        sort_oldest_first(&mut bookings);

        Ok(bookings)
    }

    async fn list_active_by_driver(&self, driver_id: Uuid) -> Result<Vec<Booking>, Error> {
        let inner = self.inner.read().await;

        let mut bookings: Vec<Booking> = inner
            .driver_bookings(&driver_id)
            .into_iter()
            .filter(|booking| booking.status.is_open())
            .collect();
        sort_oldest_first(&mut bookings);

        Ok(bookings)
    }

    #[tracing::instrument(skip(self))]
    async fn list_open_near(
        &self,
        point: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<Booking>, Error> {
        let radius_meters = radius_km * 1000.0;
        let inner = self.inner.read().await;

        // past the number of occupied cells, scanning those is cheaper than the covering
        let occupied = inner.open_cells.len();
        let ids: Vec<Uuid> = match GeoCell::covering(&point, radius_meters, occupied) {
            Some(covering) => covering
                .iter()
                .filter_map(|cell| inner.open_cells.get(cell))
                .flatten()
                .copied()
                .collect(),
            None => inner.open_cells.values().flatten().copied().collect(),
        };

        let mut bookings: Vec<Booking> = inner
            .collect(ids.iter())
            .into_iter()
            .filter(|booking| booking.is_pending())
            .filter(|booking| geo::within_radius(&booking.pickup, &point, radius_meters))
            .collect();
        sort_oldest_first(&mut bookings);

        Ok(bookings)
    }

    async fn list_by_passenger(&self, passenger_id: Uuid) -> Result<Vec<Booking>, Error> {
        Ok(self.inner.read().await.passenger_bookings(&passenger_id))
    }

    async fn list_by_driver(&self, driver_id: Uuid) -> Result<Vec<Booking>, Error> {
        Ok(self.inner.read().await.driver_bookings(&driver_id))
    }

    async fn list_pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, Error> {
        let inner = self.inner.read().await;

        let mut bookings: Vec<Booking> = inner
            .collect(inner.open_cells.values().flatten())
            .into_iter()
            .filter(|booking| booking.is_pending() && booking.pending_since <= cutoff)
            .collect();
        sort_oldest_first(&mut bookings);

        Ok(bookings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DriverOffer;
    use chrono::Duration;
    use tokio_test::block_on;

    fn booking_at(pickup: Coordinates, created_at: DateTime<Utc>) -> Booking {
        Booking::new(Uuid::new_v4(), pickup, geo::offset_north(&pickup, 500.0), 50.0, created_at)
            .unwrap()
    }

    fn manila() -> Coordinates {
        Coordinates::new(14.5995, 120.9842)
    }

    #[test]
    fn create_and_get() {
        let store = MemoryStore::new();
        let booking = booking_at(manila(), Utc::now());

        block_on(store.create(booking.clone())).unwrap();

        let found = block_on(store.get_by_id(booking.id)).unwrap().unwrap();
        assert_eq!(found.id, booking.id);
        assert!(block_on(store.get_by_id(Uuid::new_v4())).unwrap().is_none());
    }

    #[test]
    fn create_rejects_second_open_booking_for_passenger() {
        let store = MemoryStore::new();
        let first = booking_at(manila(), Utc::now());

        let mut second = booking_at(manila(), Utc::now());
        second.passenger_id = first.passenger_id;

        block_on(store.create(first.clone())).unwrap();
        let err = block_on(store.create(second.clone())).unwrap_err();
        assert!(err.is_duplicate_open_booking_error());

        // once the first is closed the passenger may book again
        block_on(store.update_if_status(
            first.id,
            Status::Pending,
            Box::new(|booking: &mut Booking| booking.cancel(crate::entities::Party::Passenger, "x".into(), Utc::now())),
        ))
        .unwrap();
        block_on(store.create(second)).unwrap();
    }

    #[test]
    fn update_if_status_detects_stale_expectation() {
        let store = MemoryStore::new();
        let booking = booking_at(manila(), Utc::now());
        let driver_id = Uuid::new_v4();
        block_on(store.create(booking.clone())).unwrap();

        let updated = block_on(store.update_if_status(
            booking.id,
            Status::Pending,
            Box::new(move |booking: &mut Booking| booking.accept_directly(driver_id, Utc::now())),
        ))
        .unwrap();
        assert_eq!(updated.status, Status::Accepted);
        assert_eq!(updated.version, 1);

        let err = block_on(store.update_if_status(
            booking.id,
            Status::Pending,
            Box::new(move |booking: &mut Booking| booking.accept_directly(Uuid::new_v4(), Utc::now())),
        ))
        .unwrap_err();
        assert!(err.is_conflict_error());

        let stored = block_on(store.get_by_id(booking.id)).unwrap().unwrap();
        assert_eq!(stored.driver_id, Some(driver_id));
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn failing_mutator_writes_nothing() {
        let store = MemoryStore::new();
        let booking = booking_at(manila(), Utc::now());
        block_on(store.create(booking.clone())).unwrap();

        let err = block_on(store.update_if_status(
            booking.id,
            Status::Pending,
            Box::new(|booking: &mut Booking| booking.rate(5, None)),
        ))
        .unwrap_err();
        assert!(err.is_not_found_error());

        let stored = block_on(store.get_by_id(booking.id)).unwrap().unwrap();
        assert_eq!(stored.version, 0);
        assert_eq!(stored.status, Status::Pending);
    }

    #[test]
    fn illegal_edges_are_refused_by_the_store() {
        let store = MemoryStore::new();
        let booking = booking_at(manila(), Utc::now());
        block_on(store.create(booking.clone())).unwrap();

        let err = block_on(store.update_if_status(
            booking.id,
            Status::Pending,
            Box::new(|booking: &mut Booking| {
                booking.status = Status::Completed;
                Ok(())
            }),
        ))
        .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn nearby_only_sees_pending_bookings_inside_radius() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let near_old = booking_at(geo::offset_north(&manila(), 800.0), now - Duration::minutes(5));
        let near_new = booking_at(geo::offset_north(&manila(), 300.0), now);
        let far = booking_at(geo::offset_north(&manila(), 4_000.0), now);
        let taken = booking_at(manila(), now);

        for booking in [&near_old, &near_new, &far, &taken] {
            block_on(store.create(booking.clone())).unwrap();
        }

        let driver_id = Uuid::new_v4();
        block_on(store.update_if_status(
            taken.id,
            Status::Pending,
            Box::new(move |booking: &mut Booking| {
                booking.make_offer(DriverOffer {
                    amount: 60.0,
                    message: None,
                    driver_id,
                    created_at: Utc::now(),
                })
            }),
        ))
        .unwrap();

        let found = block_on(store.list_open_near(manila(), 1.0)).unwrap();
        let ids: Vec<Uuid> = found.iter().map(|booking| booking.id).collect();

        assert_eq!(ids, vec![near_old.id, near_new.id]);

        let active = block_on(store.list_active_by_driver(driver_id)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, taken.id);
    }

    #[test]
    fn nearby_near_the_pole_or_with_huge_radius_scans_occupied_cells() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let polar = booking_at(Coordinates::new(89.99, 45.0), now - Duration::minutes(1));
        let city = booking_at(manila(), now);

        for booking in [&polar, &city] {
            block_on(store.create(booking.clone())).unwrap();
        }

        let found = block_on(store.list_open_near(Coordinates::new(89.995, -120.0), 5.0)).unwrap();
        let ids: Vec<Uuid> = found.iter().map(|booking| booking.id).collect();
        assert_eq!(ids, vec![polar.id]);

        let found = block_on(store.list_open_near(Coordinates::new(0.0, 0.0), 20_000.0)).unwrap();
        let ids: Vec<Uuid> = found.iter().map(|booking| booking.id).collect();
        assert_eq!(ids, vec![polar.id, city.id]);
    }

    #[test]
    fn declined_booking_returns_to_geo_index() {
        let store = MemoryStore::new();
        let booking = booking_at(manila(), Utc::now());
        let driver_id = Uuid::new_v4();
        block_on(store.create(booking.clone())).unwrap();

        block_on(store.update_if_status(
            booking.id,
            Status::Pending,
            Box::new(move |booking: &mut Booking| {
                booking.make_offer(DriverOffer {
                    amount: 60.0,
                    message: None,
                    driver_id,
                    created_at: Utc::now(),
                })
            }),
        ))
        .unwrap();
        assert!(block_on(store.list_open_near(manila(), 1.0)).unwrap().is_empty());

        block_on(store.update_if_status(
            booking.id,
            Status::OfferMade,
            Box::new(|booking: &mut Booking| booking.decline_offer(Utc::now()).map(|_| ())),
        ))
        .unwrap();

        assert_eq!(block_on(store.list_open_near(manila(), 1.0)).unwrap().len(), 1);
        assert!(block_on(store.list_active_by_driver(driver_id)).unwrap().is_empty());
    }

    #[test]
    fn pending_since_listing_uses_cutoff() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let stale = booking_at(manila(), now - Duration::minutes(45));
        let fresh = booking_at(manila(), now - Duration::minutes(5));
        block_on(store.create(stale.clone())).unwrap();
        block_on(store.create(fresh)).unwrap();

        let found = block_on(store.list_pending_since(now - Duration::minutes(30))).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }
}
