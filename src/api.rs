use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::User;
use crate::engine::{DriverResponse, NewBooking};
use crate::entities::{Booking, Coordinates, Status};
use crate::error::Error;

#[async_trait]
pub trait BookingAPI {
    async fn create_booking(&self, user: User, request: NewBooking) -> Result<Booking, Error>;

    async fn find_booking(&self, user: User, id: Uuid) -> Result<Booking, Error>;

    async fn driver_respond(
        &self,
        user: User,
        id: Uuid,
        response: DriverResponse,
    ) -> Result<Booking, Error>;

    async fn respond_to_offer(
        &self,
        user: User,
        id: Uuid,
        accepted: bool,
        offer_driver_id: Option<Uuid>,
    ) -> Result<Booking, Error>;

    async fn confirm_pickup(
        &self,
        user: User,
        id: Uuid,
        location: Option<Coordinates>,
    ) -> Result<Booking, Error>;

    async fn complete_trip(
        &self,
        user: User,
        id: Uuid,
        location: Coordinates,
    ) -> Result<Booking, Error>;

    async fn cancel_booking(&self, user: User, id: Uuid, reason: String)
        -> Result<Booking, Error>;

    async fn rate_booking(
        &self,
        user: User,
        id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Booking, Error>;

    async fn expire_booking(&self, user: User, id: Uuid) -> Result<Option<Booking>, Error>;
}

#[async_trait]
pub trait MatchingAPI {
    async fn nearby_open_bookings(
        &self,
        user: User,
        location: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<Booking>, Error>;

    async fn active_booking(&self, user: User) -> Result<Option<Booking>, Error>;

    async fn passenger_bookings(
        &self,
        user: User,
        status: Option<Status>,
    ) -> Result<Vec<Booking>, Error>;

    async fn driver_bookings(&self, user: User, status: Option<Status>)
        -> Result<Vec<Booking>, Error>;
}

pub trait API: BookingAPI + MatchingAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
