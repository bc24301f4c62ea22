mod expiry;
mod matching;
mod negotiation;

pub use expiry::ExpirySweeper;
pub use negotiation::{DriverResponse, NewBooking};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    clock::DynClock,
    config::EngineConfig,
    entities::{Booking, BookingEvent, EventKind},
    error::{conflict_error, driver_busy_error, not_found_error, Error},
    store::DynStore,
};

const EVENT_BUFFER: usize = 1024;

/// The booking state machine. It trusts the identities handed to it; authorization happens in
/// the gateway.
pub struct Engine {
    store: DynStore,
    clock: DynClock,
    config: EngineConfig,
    events: broadcast::Sender<BookingEvent>,
}

impl Engine {
    pub fn new(store: DynStore, clock: DynClock, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            store,
            clock,
            config,
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Committed transitions, in commit order per booking. Slow subscribers lose old events.
    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.events.subscribe()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn publish(&self, booking: &Booking, kind: EventKind) {
        tracing::info!(
            booking_id = %booking.id,
            status = booking.status.name(),
            version = booking.version,
            "{:?}",
            kind
        );

        // nobody listening is fine
        let _ = self.events.send(BookingEvent::new(booking, kind, self.now()));
    }

    fn is_stale(&self, booking: &Booking) -> bool {
        booking.is_pending() && booking.pending_since + self.config.pending_timeout <= self.now()
    }

    /// Loads a booking, expiring it first if it has sat in `Pending` past the timeout.
    async fn load(&self, id: Uuid) -> Result<Booking, Error> {
        let booking = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| not_found_error("booking not found"))?;

        if !self.is_stale(&booking) {
            return Ok(booking);
        }

        match self.expire(id).await? {
            Some(expired) => Ok(expired),
            None => self
                .store
                .get_by_id(id)
                .await?
                .ok_or_else(|| not_found_error("booking not found")),
        }
    }

    /// Applies `change` through the store's compare-and-swap, guarded by the status and version
    /// of the snapshot the caller decided on.
    async fn transition<F>(&self, snapshot: &Booking, change: F) -> Result<Booking, Error>
    where
        F: FnOnce(&mut Booking) -> Result<(), Error> + Send + 'static,
    {
        let version = snapshot.version;

        let result = self
            .store
            .update_if_status(
                snapshot.id,
                snapshot.status,
                Box::new(move |current: &mut Booking| {
                    if current.version != version {
                        return Err(conflict_error(
                            "booking was changed by someone else, refresh and retry",
                        ));
                    }

                    change(current)
                }),
            )
            .await;

        if let Err(err) = &result {
            if err.is_conflict_error() {
                tracing::warn!(booking_id = %snapshot.id, "lost transition race: {}", err.message);
            }
        }

        result
    }

    /// Fails with `DriverBusyError` if the driver is servicing another trip.
    async fn ensure_driver_available(&self, driver_id: Uuid, except: Uuid) -> Result<(), Error> {
        let engaged = self
            .store
            .list_active_by_driver(driver_id)
            .await?
            .into_iter()
            .any(|booking| booking.id != except && booking.status.is_driver_engaged());

        if engaged {
            return Err(driver_busy_error());
        }

        Ok(())
    }
}
