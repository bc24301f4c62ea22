//! Booking persistence. Every write after `create` goes through `update_if_status`.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{Booking, Coordinates, Status};
use crate::error::Error;

/// Mutation applied to the freshly loaded record. An `Err` aborts the update without writing.
pub type Mutator = Box<dyn FnOnce(&mut Booking) -> Result<(), Error> + Send>;

pub type DynStore = Arc<dyn BookingStore>;

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Fails with `DuplicateOpenBookingError` when the passenger already has an open booking.
    async fn create(&self, booking: Booking) -> Result<Booking, Error>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Booking>, Error>;

    /// Compare-and-swap: applies `mutator` only while the stored status is still `expected`,
    /// otherwise fails with `ConflictError`. Secondary indexes change in the same step.
    async fn update_if_status(
        &self,
        id: Uuid,
        expected: Status,
        mutator: Mutator,
    ) -> Result<Booking, Error>;

    /// Non-terminal bookings of a passenger.
    async fn list_open_by_passenger(&self, passenger_id: Uuid) -> Result<Vec<Booking>, Error>;

    /// Non-terminal bookings currently bound to a driver, offers included.
    async fn list_active_by_driver(&self, driver_id: Uuid) -> Result<Vec<Booking>, Error>;

    /// `Pending` bookings whose pickup lies within `radius_km` of `point`, oldest first.
    async fn list_open_near(&self, point: Coordinates, radius_km: f64)
        -> Result<Vec<Booking>, Error>;

    async fn list_by_passenger(&self, passenger_id: Uuid) -> Result<Vec<Booking>, Error>;

    async fn list_by_driver(&self, driver_id: Uuid) -> Result<Vec<Booking>, Error>;

    /// `Pending` bookings that have been waiting since `cutoff` or earlier.
    async fn list_pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, Error>;
}

pub(crate) fn sort_oldest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
