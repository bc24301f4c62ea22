use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Booking, Party};

/// Published after a transition has been committed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEvent {
    pub booking_id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum EventKind {
    Created,
    OfferMade { amount: f64 },
    OfferDeclined { driver_id: Uuid },
    Accepted { agreed_fare: f64 },
    PickedUp,
    Completed { fare: f64 },
    Cancelled { by: Party },
    Expired,
    Rated { rating: u8 },
}

impl BookingEvent {
    pub fn new(booking: &Booking, kind: EventKind, at: DateTime<Utc>) -> Self {
        Self {
            booking_id: booking.id,
            passenger_id: booking.passenger_id,
            driver_id: booking.driver_id,
            kind,
            at,
        }
    }
}
