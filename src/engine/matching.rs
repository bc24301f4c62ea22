use uuid::Uuid;

use super::Engine;

use crate::{
    auth::Role,
    entities::{Booking, Coordinates, Status},
    error::{validation_error, Error},
    store::sort_oldest_first,
};

impl Engine {
    /// Requests a driver at `location` could answer, oldest first so long waits get served.
    #[tracing::instrument(skip(self))]
    pub async fn nearby_open_bookings(
        &self,
        location: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<Booking>, Error> {
        location.validate()?;

        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(validation_error("radius must be a positive number of kilometers"));
        }

        if radius_km > self.config.max_search_radius_km {
            return Err(validation_error(format!(
                "radius must not exceed {} km",
                self.config.max_search_radius_km
            )));
        }

        if let Some(area) = &self.config.service_area {
            area.ensure_contains(&location, "location")?;
        }

        let mut bookings = self.store.list_open_near(location, radius_km).await?;

        // the sweeper may lag behind; never offer a request that is already past its wait
        bookings.retain(|booking| !self.is_stale(booking));
        sort_oldest_first(&mut bookings);

        Ok(bookings)
    }

    /// The booking the user is currently involved in, if any. A driver's trip in progress
    /// outranks an accepted one, which outranks an outstanding offer.
    #[tracing::instrument(skip(self))]
    pub async fn active_booking_for(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Option<Booking>, Error> {
        let candidates = match role {
            Role::Passenger => self.store.list_open_by_passenger(user_id).await?,
            Role::Driver => self.store.list_active_by_driver(user_id).await?,
            Role::System => return Ok(None),
        };

        let mut open = vec![];
        for candidate in candidates {
            let booking = self.load(candidate.id).await?;

            if booking.status.is_open() && involves(&booking, user_id, role) {
                open.push(booking);
            }
        }

        open.sort_by_key(|booking| (priority(booking.status), std::cmp::Reverse(booking.created_at)));

        Ok(open.into_iter().next())
    }

    /// Booking history, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn bookings_for(
        &self,
        user_id: Uuid,
        role: Role,
        status: Option<Status>,
    ) -> Result<Vec<Booking>, Error> {
        let bookings = match role {
            Role::Passenger => self.store.list_by_passenger(user_id).await?,
            Role::Driver => self.store.list_by_driver(user_id).await?,
            Role::System => vec![],
        };

        let mut history = vec![];
        for booking in bookings {
            let booking = if self.is_stale(&booking) {
                self.load(booking.id).await?
            } else {
                booking
            };

            if !involves(&booking, user_id, role) {
                continue;
            }

            if status.map_or(true, |status| booking.status == status) {
                history.push(booking);
            }
        }

        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(history)
    }

    pub async fn driver_has_active_booking(&self, driver_id: Uuid) -> Result<bool, Error> {
        let active = self.store.list_active_by_driver(driver_id).await?;

        Ok(active.iter().any(|booking| booking.status.is_driver_engaged()))
    }
}

fn involves(booking: &Booking, user_id: Uuid, role: Role) -> bool {
    match role {
        Role::Passenger => booking.passenger_id == user_id,
        Role::Driver => booking.is_assigned_to(user_id),
        Role::System => false,
    }
}

fn priority(status: Status) -> u8 {
    match status {
        Status::InProgress => 0,
        Status::Accepted => 1,
        Status::OfferMade => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{engine, engine_with, open_booking, pickup};
    use super::super::DriverResponse;
    use super::*;
    use crate::config::EngineConfig;
    use crate::entities::Party;
    use crate::geo::{self, ServiceArea};
    use chrono::Duration;
    use tokio_test::block_on;

    fn accept() -> DriverResponse {
        DriverResponse {
            accept: true,
            counter_offer: None,
            message: None,
        }
    }

    fn counter(amount: f64) -> DriverResponse {
        DriverResponse {
            accept: false,
            counter_offer: Some(amount),
            message: None,
        }
    }

    #[test]
    fn nearby_lists_only_pending_requests_oldest_first() {
        let (engine, clock) = engine();

        let first = block_on(open_booking(&engine));
        clock.advance(Duration::minutes(1));
        let second = block_on(open_booking(&engine));
        clock.advance(Duration::minutes(1));
        let claimed = block_on(open_booking(&engine));

        block_on(engine.driver_respond(Uuid::new_v4(), claimed.id, accept())).unwrap();

        let nearby = block_on(engine.nearby_open_bookings(pickup(), 1.0)).unwrap();
        let ids: Vec<Uuid> = nearby.iter().map(|booking| booking.id).collect();

        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn nearby_respects_the_radius() {
        let (engine, _) = engine();
        block_on(open_booking(&engine));

        let two_km_away = geo::offset_north(&pickup(), 2_000.0);

        assert!(block_on(engine.nearby_open_bookings(two_km_away, 1.0))
            .unwrap()
            .is_empty());
        assert_eq!(
            block_on(engine.nearby_open_bookings(two_km_away, 2.5))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn nearby_hides_stale_requests() {
        let (engine, clock) = engine();
        block_on(open_booking(&engine));

        clock.advance(Duration::minutes(30));

        assert!(block_on(engine.nearby_open_bookings(pickup(), 1.0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn nearby_validates_its_input() {
        let (engine, _) = engine_with(EngineConfig {
            service_area: Some(ServiceArea::new(pickup(), 10_000.0)),
            ..EngineConfig::default()
        });

        for radius in [0.0, -1.0, f64::INFINITY, 26.0] {
            let err = block_on(engine.nearby_open_bookings(pickup(), radius)).unwrap_err();
            assert!(err.is_validation_error());
        }

        let err = block_on(engine.nearby_open_bookings(Coordinates::new(91.0, 0.0), 1.0))
            .unwrap_err();
        assert!(err.is_validation_error());

        let far = geo::offset_north(&pickup(), 20_000.0);
        let err = block_on(engine.nearby_open_bookings(far, 1.0)).unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn active_booking_prefers_trip_in_progress() {
        let (engine, _) = engine();
        let driver_id = Uuid::new_v4();

        let offered = block_on(open_booking(&engine));
        let riding = block_on(open_booking(&engine));

        block_on(engine.driver_respond(driver_id, offered.id, counter(70.0))).unwrap();
        assert_eq!(
            block_on(engine.active_booking_for(driver_id, Role::Driver))
                .unwrap()
                .unwrap()
                .id,
            offered.id
        );

        block_on(engine.driver_respond(driver_id, riding.id, accept())).unwrap();
        block_on(engine.confirm_pickup(driver_id, riding.id, None)).unwrap();

        let active = block_on(engine.active_booking_for(driver_id, Role::Driver))
            .unwrap()
            .unwrap();
        assert_eq!(active.id, riding.id);
        assert!(block_on(engine.driver_has_active_booking(driver_id)).unwrap());
    }

    #[test]
    fn active_booking_for_passenger() {
        let (engine, _) = engine();
        let booking = block_on(open_booking(&engine));

        let active = block_on(engine.active_booking_for(booking.passenger_id, Role::Passenger))
            .unwrap()
            .unwrap();
        assert_eq!(active.id, booking.id);

        block_on(engine.cancel(Party::Passenger, booking.id, "changed plans".into())).unwrap();

        assert!(block_on(engine.active_booking_for(booking.passenger_id, Role::Passenger))
            .unwrap()
            .is_none());
        assert!(block_on(engine.active_booking_for(Uuid::new_v4(), Role::System))
            .unwrap()
            .is_none());
    }

    #[test]
    fn declined_driver_has_nothing_active() {
        let (engine, _) = engine();
        let driver_id = Uuid::new_v4();
        let booking = block_on(open_booking(&engine));

        block_on(engine.driver_respond(driver_id, booking.id, counter(70.0))).unwrap();
        block_on(engine.respond_to_offer(booking.id, false, None)).unwrap();

        assert!(block_on(engine.active_booking_for(driver_id, Role::Driver))
            .unwrap()
            .is_none());
        assert!(!block_on(engine.driver_has_active_booking(driver_id)).unwrap());
    }

    #[test]
    fn history_is_newest_first_and_filterable() {
        let (engine, clock) = engine();
        let passenger_id = Uuid::new_v4();

        let first = block_on(engine.create_booking(
            passenger_id,
            super::super::testing::new_booking(40.0),
        ))
        .unwrap();
        block_on(engine.cancel(Party::Passenger, first.id, "too long a wait".into())).unwrap();

        clock.advance(Duration::minutes(5));

        let second = block_on(engine.create_booking(
            passenger_id,
            super::super::testing::new_booking(45.0),
        ))
        .unwrap();

        let history = block_on(engine.bookings_for(passenger_id, Role::Passenger, None)).unwrap();
        let ids: Vec<Uuid> = history.iter().map(|booking| booking.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let cancelled = block_on(engine.bookings_for(
            passenger_id,
            Role::Passenger,
            Some(Status::Cancelled),
        ))
        .unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, first.id);
    }

    #[test]
    fn driver_history_includes_finished_trips() {
        let (engine, _) = engine();
        let driver_id = Uuid::new_v4();
        let booking = block_on(open_booking(&engine));

        block_on(engine.driver_respond(driver_id, booking.id, accept())).unwrap();
        block_on(engine.confirm_pickup(driver_id, booking.id, None)).unwrap();
        block_on(engine.complete(
            driver_id,
            booking.id,
            super::super::testing::destination(),
        ))
        .unwrap();

        let history = block_on(engine.bookings_for(driver_id, Role::Driver, None)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, Status::Completed);
        assert!(!block_on(engine.driver_has_active_booking(driver_id)).unwrap());
    }

    #[test]
    fn history_shows_lazily_expired_requests() {
        let (engine, clock) = engine();
        let booking = block_on(open_booking(&engine));

        clock.advance(Duration::hours(1));

        let history = block_on(engine.bookings_for(
            booking.passenger_id,
            Role::Passenger,
            Some(Status::Expired),
        ))
        .unwrap();
        assert_eq!(history.len(), 1);
    }
}
