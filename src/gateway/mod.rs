use async_trait::async_trait;
use oso::Oso;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::{BookingAPI, MatchingAPI, API},
    auth::{authorizor, Dispatch, Role, User},
    engine::{DriverResponse, Engine, NewBooking},
    entities::{Booking, Coordinates, Party, Status},
    error::{forbidden_error, Error},
};

/// Identity-bearing front of the engine. Every call is checked against the Polar policy here;
/// the engine itself trusts whatever ids it is handed.
pub struct Gateway {
    engine: Arc<Engine>,
    authorizor: Oso,
}

impl Gateway {
    #[tracing::instrument(name = "Gateway::new", skip_all)]
    pub fn new(engine: Arc<Engine>) -> Result<Self, Error> {
        Ok(Self {
            engine,
            authorizor: authorizor::new()?,
        })
    }

    pub fn authorize<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        if self.authorizor.is_allowed(actor, action, resource)? {
            return Ok(());
        }

        Err(forbidden_error())
    }

    /// Reads the booking and checks `action` on it. The check runs on a snapshot; the engine's
    /// compare-and-swap rejects the write if the booking moves in between.
    async fn authorized_booking(&self, user: &User, action: &str, id: Uuid) -> Result<Booking, Error> {
        let booking = self.engine.find_booking(id).await?;

        self.authorize(user.clone(), action.to_string(), booking.clone())?;

        Ok(booking)
    }
}

#[async_trait]
impl BookingAPI for Gateway {
    #[tracing::instrument(skip(self))]
    async fn create_booking(&self, user: User, request: NewBooking) -> Result<Booking, Error> {
        self.authorize(user.clone(), "create_booking", Dispatch)?;

        self.engine.create_booking(user.id, request).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_booking(&self, user: User, id: Uuid) -> Result<Booking, Error> {
        self.authorized_booking(&user, "read", id).await
    }

    #[tracing::instrument(skip(self))]
    async fn driver_respond(
        &self,
        user: User,
        id: Uuid,
        response: DriverResponse,
    ) -> Result<Booking, Error> {
        self.authorize(user.clone(), "respond_to_bookings", Dispatch)?;

        let booking = self.engine.find_booking(id).await?;

        // a claimed request is reported as gone by the engine, not as forbidden
        if booking.is_pending() {
            self.authorize(user.clone(), "respond", booking)?;
        }

        self.engine.driver_respond(user.id, id, response).await
    }

    #[tracing::instrument(skip(self))]
    async fn respond_to_offer(
        &self,
        user: User,
        id: Uuid,
        accepted: bool,
        offer_driver_id: Option<Uuid>,
    ) -> Result<Booking, Error> {
        self.authorized_booking(&user, "respond_to_offer", id).await?;

        self.engine
            .respond_to_offer(id, accepted, offer_driver_id)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn confirm_pickup(
        &self,
        user: User,
        id: Uuid,
        location: Option<Coordinates>,
    ) -> Result<Booking, Error> {
        self.authorized_booking(&user, "confirm_pickup", id).await?;

        self.engine.confirm_pickup(user.id, id, location).await
    }

    #[tracing::instrument(skip(self))]
    async fn complete_trip(
        &self,
        user: User,
        id: Uuid,
        location: Coordinates,
    ) -> Result<Booking, Error> {
        self.authorized_booking(&user, "complete", id).await?;

        self.engine.complete(user.id, id, location).await
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_booking(
        &self,
        user: User,
        id: Uuid,
        reason: String,
    ) -> Result<Booking, Error> {
        let booking = self.authorized_booking(&user, "cancel", id).await?;

        let by = if booking.passenger_id == user.id {
            Party::Passenger
        } else {
            Party::Driver
        };

        self.engine.cancel(by, id, reason).await
    }

    #[tracing::instrument(skip(self))]
    async fn rate_booking(
        &self,
        user: User,
        id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Booking, Error> {
        self.authorized_booking(&user, "rate", id).await?;

        self.engine.rate(id, rating, comment).await
    }

    #[tracing::instrument(skip(self))]
    async fn expire_booking(&self, user: User, id: Uuid) -> Result<Option<Booking>, Error> {
        self.authorize(user, "expire_bookings", Dispatch)?;

        self.engine.expire(id).await
    }
}

#[async_trait]
impl MatchingAPI for Gateway {
    #[tracing::instrument(skip(self))]
    async fn nearby_open_bookings(
        &self,
        user: User,
        location: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<Booking>, Error> {
        self.authorize(user, "search_bookings", Dispatch)?;

        self.engine.nearby_open_bookings(location, radius_km).await
    }

    /// Drivers see the trip they are servicing; a user holding both roles is answered as a
    /// driver first.
    #[tracing::instrument(skip(self))]
    async fn active_booking(&self, user: User) -> Result<Option<Booking>, Error> {
        if user.has_role(Role::Driver) {
            if let Some(booking) = self.engine.active_booking_for(user.id, Role::Driver).await? {
                return Ok(Some(booking));
            }
        }

        if user.has_role(Role::Passenger) {
            return self.engine.active_booking_for(user.id, Role::Passenger).await;
        }

        Ok(None)
    }

    #[tracing::instrument(skip(self))]
    async fn passenger_bookings(
        &self,
        user: User,
        status: Option<Status>,
    ) -> Result<Vec<Booking>, Error> {
        self.authorize(user.clone(), "list_passenger_bookings", Dispatch)?;

        self.engine
            .bookings_for(user.id, Role::Passenger, status)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn driver_bookings(
        &self,
        user: User,
        status: Option<Status>,
    ) -> Result<Vec<Booking>, Error> {
        self.authorize(user.clone(), "list_driver_bookings", Dispatch)?;

        self.engine.bookings_for(user.id, Role::Driver, status).await
    }
}

impl API for Gateway {}
