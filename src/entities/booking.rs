use chrono::{DateTime, Utc};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;
use crate::error::{
    conflict_error, forbidden_error, not_found_error, unexpected_error, validation_error, Error,
};
use crate::geo;

pub const MAX_REASON_LENGTH: usize = 500;
pub const MAX_COMMENT_LENGTH: usize = 1000;
pub const MAX_MESSAGE_LENGTH: usize = 500;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: Status,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub trip_distance_meters: f64,
    pub preferred_fare: f64,
    pub driver_offer: Option<DriverOffer>,
    pub agreed_fare: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub pending_since: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Party>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub rating_comment: Option<String>,
    pub version: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    OfferMade,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverOffer {
    pub amount: f64,
    pub message: Option<String>,
    pub driver_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Passenger,
    Driver,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Pending,
        Status::OfferMade,
        Status::Accepted,
        Status::InProgress,
        Status::Completed,
        Status::Cancelled,
        Status::Expired,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::OfferMade => "offer_made",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.name() == name)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses in which a driver is servicing the trip.
    pub fn is_driver_engaged(&self) -> bool {
        matches!(self, Self::Accepted | Self::InProgress)
    }

    /// The lifecycle graph. Rating is not a transition, it is a write on a `Completed` booking.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;

        match (self, next) {
            (Pending, OfferMade) | (Pending, Accepted) | (Pending, Expired) => true,
            (OfferMade, Pending) | (OfferMade, Accepted) => true,
            (Accepted, InProgress) => true,
            (InProgress, Completed) => true,
            (Pending | OfferMade | Accepted | InProgress, Cancelled) => true,
            _ => false,
        }
    }
}

impl Booking {
    pub fn new(
        passenger_id: Uuid,
        pickup: Coordinates,
        destination: Coordinates,
        preferred_fare: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        pickup.validate()?;
        destination.validate()?;
        validate_fare(preferred_fare, "preferred fare")?;

        Ok(Self {
            id: Uuid::new_v4(),
            passenger_id,
            driver_id: None,
            status: Status::Pending,
            pickup,
            destination,
            trip_distance_meters: geo::distance_meters(&pickup, &destination),
            preferred_fare,
            driver_offer: None,
            agreed_fare: None,
            created_at: now,
            pending_since: now,
            accepted_at: None,
            picked_up_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            cancelled_by: None,
            expired_at: None,
            rating: None,
            rating_comment: None,
            version: 0,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == Status::Pending
    }

    pub fn is_assigned_to(&self, driver_id: Uuid) -> bool {
        self.driver_id == Some(driver_id)
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn make_offer(&mut self, offer: DriverOffer) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::OfferMade;
                self.driver_id = Some(offer.driver_id);
                self.driver_offer = Some(offer);
                Ok(())
            }
            _ => Err(not_found_error("booking is no longer pending")),
        }
    }

    /// A driver takes the request at the passenger's own fare.
    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn accept_directly(&mut self, driver_id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Accepted;
                self.driver_id = Some(driver_id);
                self.agreed_fare = Some(self.preferred_fare);
                self.accepted_at = Some(now);
                Ok(())
            }
            _ => Err(not_found_error("booking is no longer pending")),
        }
    }

    /// The passenger takes the outstanding counter-offer; returns the driver it binds.
    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn accept_offer(&mut self, now: DateTime<Utc>) -> Result<Uuid, Error> {
        match (self.status, self.driver_offer.take()) {
            (Status::OfferMade, Some(offer)) => {
                self.status = Status::Accepted;
                self.driver_id = Some(offer.driver_id);
                self.agreed_fare = Some(offer.amount);
                self.accepted_at = Some(now);
                Ok(offer.driver_id)
            }
            (_, offer) => {
                self.driver_offer = offer;
                Err(not_found_error("booking has no pending offer"))
            }
        }
    }

    /// Returns the booking to the open pool; the declined driver may offer again.
    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn decline_offer(&mut self, now: DateTime<Utc>) -> Result<Uuid, Error> {
        match (self.status, self.driver_offer.take()) {
            (Status::OfferMade, Some(offer)) => {
                self.status = Status::Pending;
                self.driver_id = None;
                self.pending_since = now;
                Ok(offer.driver_id)
            }
            (_, offer) => {
                self.driver_offer = offer;
                Err(not_found_error("booking has no pending offer"))
            }
        }
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn start_trip(&mut self, driver_id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Accepted if self.is_assigned_to(driver_id) => {
                self.status = Status::InProgress;
                self.picked_up_at = Some(now);
                Ok(())
            }
            Status::Accepted => Err(forbidden_error()),
            _ => Err(not_found_error("booking is not awaiting pickup")),
        }
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn complete(&mut self, driver_id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::InProgress if self.is_assigned_to(driver_id) => {
                self.status = Status::Completed;
                self.completed_at = Some(now);
                Ok(())
            }
            Status::InProgress => Err(forbidden_error()),
            _ => Err(not_found_error("booking is not in progress")),
        }
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn cancel(&mut self, by: Party, reason: String, now: DateTime<Utc>) -> Result<(), Error> {
        validate_reason(&reason)?;

        if self.status.is_terminal() {
            return Err(not_found_error("booking is already closed"));
        }

        self.status = Status::Cancelled;
        self.driver_offer = None;
        self.cancelled_at = Some(now);
        self.cancellation_reason = Some(reason);
        self.cancelled_by = Some(by);

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Expired;
                self.expired_at = Some(now);
                Ok(())
            }
            _ => Err(not_found_error("booking is no longer pending")),
        }
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn rate(&mut self, rating: u8, comment: Option<String>) -> Result<(), Error> {
        if !(1..=5).contains(&rating) {
            return Err(validation_error("rating must be between 1 and 5"));
        }

        if let Some(comment) = &comment {
            if comment.chars().count() > MAX_COMMENT_LENGTH {
                return Err(validation_error("rating comment is too long"));
            }
        }

        if self.status != Status::Completed {
            return Err(not_found_error("booking is not completed"));
        }

        if self.rating.is_some() {
            return Err(conflict_error("booking has already been rated"));
        }

        self.rating = Some(rating);
        self.rating_comment = comment;

        Ok(())
    }
}

pub fn validate_fare(amount: f64, what: &str) -> Result<(), Error> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(validation_error(format!("{} must be a positive amount", what)));
    }

    Ok(())
}

pub fn validate_reason(reason: &str) -> Result<(), Error> {
    if reason.trim().is_empty() {
        return Err(validation_error("a cancellation reason is required"));
    }

    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(validation_error("cancellation reason is too long"));
    }

    Ok(())
}

pub fn validate_message(message: &Option<String>) -> Result<(), Error> {
    match message {
        Some(message) if message.chars().count() > MAX_MESSAGE_LENGTH => {
            Err(validation_error("offer message is too long"))
        }
        _ => Ok(()),
    }
}

/// Integrity check a store runs between a record and its mutated successor before writing.
pub fn validate_update(before: &Booking, after: &Booking) -> Result<(), Error> {
    if after.status != before.status && !before.status.can_transition_to(after.status) {
        return Err(unexpected_error(format!(
            "illegal transition {} -> {}",
            before.status.name(),
            after.status.name()
        )));
    }

    let immutable_changed = after.id != before.id
        || after.passenger_id != before.passenger_id
        || after.pickup != before.pickup
        || after.destination != before.destination
        || after.preferred_fare != before.preferred_fare
        || after.created_at != before.created_at;

    if immutable_changed {
        return Err(unexpected_error("immutable booking field rewritten"));
    }

    let set_once_changed = set_once_violated(&before.agreed_fare, &after.agreed_fare)
        || set_once_violated(&before.accepted_at, &after.accepted_at)
        || set_once_violated(&before.picked_up_at, &after.picked_up_at)
        || set_once_violated(&before.completed_at, &after.completed_at)
        || set_once_violated(&before.cancelled_at, &after.cancelled_at)
        || set_once_violated(&before.expired_at, &after.expired_at)
        || set_once_violated(&before.rating, &after.rating);

    if set_once_changed {
        return Err(unexpected_error("set-once booking field rewritten"));
    }

    Ok(())
}

fn set_once_violated<T: PartialEq>(before: &Option<T>, after: &Option<T>) -> bool {
    before.is_some() && before != after
}

impl PolarClass for Booking {
    fn get_polar_class_builder() -> oso::ClassBuilder<Booking> {
        oso::Class::builder()
            .name("Booking")
            .add_attribute_getter("id", |recv: &Booking| recv.id.to_string())
            .add_attribute_getter("passenger_id", |recv: &Booking| {
                recv.passenger_id.to_string()
            })
            .add_attribute_getter("driver_id", |recv: &Booking| {
                recv.driver_id.map(|id| id.to_string()).unwrap_or_default()
            })
            .add_attribute_getter("status", |recv: &Booking| recv.status.name().to_string())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Booking::get_polar_class_builder();
        builder.build()
    }
}

#[cfg(test)]
fn fixture(now: DateTime<Utc>) -> Booking {
    let pickup = Coordinates::new(14.5995, 120.9842);
    let destination = geo::offset_north(&pickup, 500.0);

    Booking::new(Uuid::new_v4(), pickup, destination, 50.0, now).unwrap()
}

#[cfg(test)]
fn offer(driver_id: Uuid, amount: f64, now: DateTime<Utc>) -> DriverOffer {
    DriverOffer {
        amount,
        message: None,
        driver_id,
        created_at: now,
    }
}

#[test]
fn new_booking_is_pending_without_driver() {
    let now = Utc::now();
    let booking = fixture(now);

    assert_eq!(booking.status, Status::Pending);
    assert!(booking.driver_id.is_none());
    assert!(booking.agreed_fare.is_none());
    assert_eq!(booking.pending_since, now);
    assert!((booking.trip_distance_meters - 500.0).abs() < 1e-6);
}

#[test]
fn new_booking_rejects_bad_fares_and_coordinates() {
    let now = Utc::now();
    let pickup = Coordinates::new(14.5995, 120.9842);

    for fare in [0.0, -10.0, f64::NAN, f64::INFINITY] {
        let err = Booking::new(Uuid::new_v4(), pickup, pickup, fare, now).unwrap_err();
        assert!(err.is_validation_error());
    }

    let err = Booking::new(
        Uuid::new_v4(),
        Coordinates::new(91.0, 0.0),
        pickup,
        50.0,
        now,
    )
    .unwrap_err();
    assert!(err.is_validation_error());
}

#[test]
fn offer_then_accept_fixes_agreed_fare_and_driver() {
    let now = Utc::now();
    let driver_id = Uuid::new_v4();
    let mut booking = fixture(now);

    booking.make_offer(offer(driver_id, 70.0, now)).unwrap();
    assert_eq!(booking.status, Status::OfferMade);
    assert_eq!(booking.driver_id, Some(driver_id));

    assert_eq!(booking.accept_offer(now).unwrap(), driver_id);
    assert_eq!(booking.status, Status::Accepted);
    assert_eq!(booking.agreed_fare, Some(70.0));
    assert!(booking.driver_offer.is_none());
}

#[test]
fn decline_clears_offer_and_driver() {
    let created = Utc::now();
    let declined = created + chrono::Duration::minutes(3);
    let driver_id = Uuid::new_v4();
    let mut booking = fixture(created);

    booking.make_offer(offer(driver_id, 70.0, created)).unwrap();
    assert_eq!(booking.decline_offer(declined).unwrap(), driver_id);

    assert_eq!(booking.status, Status::Pending);
    assert!(booking.driver_offer.is_none());
    assert!(booking.driver_id.is_none());
    assert_eq!(booking.pending_since, declined);

    // the same driver may try again
    booking.make_offer(offer(driver_id, 65.0, declined)).unwrap();
}

#[test]
fn second_offer_is_rejected_while_first_stands() {
    let now = Utc::now();
    let mut booking = fixture(now);

    booking.make_offer(offer(Uuid::new_v4(), 70.0, now)).unwrap();

    let err = booking
        .make_offer(offer(Uuid::new_v4(), 60.0, now))
        .unwrap_err();
    assert!(err.is_not_found_error());
    assert_eq!(booking.driver_offer.as_ref().unwrap().amount, 70.0);
}

#[test]
fn accept_offer_without_offer_leaves_state() {
    let now = Utc::now();
    let mut booking = fixture(now);

    assert!(booking.accept_offer(now).unwrap_err().is_not_found_error());
    assert!(booking.decline_offer(now).unwrap_err().is_not_found_error());
    assert_eq!(booking.status, Status::Pending);
}

#[test]
fn only_assigned_driver_moves_the_trip() {
    let now = Utc::now();
    let driver_id = Uuid::new_v4();
    let mut booking = fixture(now);

    booking.accept_directly(driver_id, now).unwrap();
    assert_eq!(booking.agreed_fare, Some(50.0));

    assert!(booking
        .start_trip(Uuid::new_v4(), now)
        .unwrap_err()
        .is_forbidden_error());

    booking.start_trip(driver_id, now).unwrap();
    assert_eq!(booking.status, Status::InProgress);

    assert!(booking
        .complete(Uuid::new_v4(), now)
        .unwrap_err()
        .is_forbidden_error());

    booking.complete(driver_id, now).unwrap();
    assert_eq!(booking.status, Status::Completed);
    assert_eq!(booking.completed_at, Some(now));
}

#[test]
fn cancel_requires_reason_and_open_booking() {
    let now = Utc::now();
    let mut booking = fixture(now);

    assert!(booking
        .cancel(Party::Passenger, "   ".into(), now)
        .unwrap_err()
        .is_validation_error());

    booking
        .cancel(Party::Passenger, "changed my mind".into(), now)
        .unwrap();
    assert_eq!(booking.status, Status::Cancelled);
    assert_eq!(booking.cancelled_by, Some(Party::Passenger));

    assert!(booking
        .cancel(Party::Passenger, "again".into(), now)
        .unwrap_err()
        .is_not_found_error());
}

#[test]
fn rating_is_written_once_after_completion() {
    let now = Utc::now();
    let driver_id = Uuid::new_v4();
    let mut booking = fixture(now);

    assert!(booking.rate(5, None).unwrap_err().is_not_found_error());

    booking.accept_directly(driver_id, now).unwrap();
    booking.start_trip(driver_id, now).unwrap();
    booking.complete(driver_id, now).unwrap();

    assert!(booking.rate(0, None).unwrap_err().is_validation_error());
    assert!(booking.rate(6, None).unwrap_err().is_validation_error());

    booking.rate(5, Some("smooth ride".into())).unwrap();
    assert!(booking.rate(1, None).unwrap_err().is_conflict_error());

    assert_eq!(booking.rating, Some(5));
    assert_eq!(booking.status, Status::Completed);
}

#[test]
fn expire_only_from_pending() {
    let now = Utc::now();
    let mut booking = fixture(now);

    booking.expire(now).unwrap();
    assert_eq!(booking.status, Status::Expired);
    assert_eq!(booking.expired_at, Some(now));
    assert!(booking.cancelled_at.is_none());
    assert!(booking.cancelled_by.is_none());
    assert!(booking.cancellation_reason.is_none());

    let mut accepted = fixture(now);
    accepted.accept_directly(Uuid::new_v4(), now).unwrap();
    assert!(accepted.expire(now).unwrap_err().is_not_found_error());
    assert_eq!(accepted.status, Status::Accepted);
}

#[test]
fn lifecycle_graph_has_no_exits_from_terminal_states() {
    for from in Status::ALL.iter().filter(|status| status.is_terminal()) {
        for to in Status::ALL {
            assert!(!from.can_transition_to(to));
        }
    }

    assert!(!Status::Completed.can_transition_to(Status::Accepted));
    assert!(!Status::Accepted.can_transition_to(Status::Pending));
    assert!(!Status::OfferMade.can_transition_to(Status::Expired));
    assert!(Status::InProgress.can_transition_to(Status::Cancelled));
}

#[test]
fn validate_update_rejects_rewrites() {
    let now = Utc::now();
    let mut before = fixture(now);
    before.accept_directly(Uuid::new_v4(), now).unwrap();

    let mut after = before.clone();
    after.agreed_fare = Some(999.0);
    assert!(validate_update(&before, &after).unwrap_err().is_internal());

    let mut after = before.clone();
    after.status = Status::Pending;
    assert!(validate_update(&before, &after).unwrap_err().is_internal());

    let mut after = before.clone();
    after.preferred_fare = 1.0;
    assert!(validate_update(&before, &after).unwrap_err().is_internal());

    let mut after = before.clone();
    after.status = Status::InProgress;
    after.picked_up_at = Some(now);
    assert!(validate_update(&before, &after).is_ok());
}

#[test]
fn status_names_round_trip() {
    for status in Status::ALL {
        assert_eq!(Status::from_name(status.name()), Some(status));

        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json, serde_json::json!(status.name()));
    }

    assert_eq!(Status::from_name("searching"), None);
}
