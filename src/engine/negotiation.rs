use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Engine;

use crate::{
    entities::{
        validate_fare, validate_message, validate_reason, Booking, Coordinates, DriverOffer,
        EventKind, Party, Status,
    },
    error::{
        conflict_error, duplicate_open_booking_error, forbidden_error, not_at_destination_error,
        not_found_error, validation_error, Error,
    },
    geo,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub preferred_fare: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverResponse {
    pub accept: bool,
    pub counter_offer: Option<f64>,
    pub message: Option<String>,
}

impl Engine {
    #[tracing::instrument(skip(self))]
    pub async fn create_booking(
        &self,
        passenger_id: Uuid,
        request: NewBooking,
    ) -> Result<Booking, Error> {
        let booking = Booking::new(
            passenger_id,
            request.pickup,
            request.destination,
            request.preferred_fare,
            self.now(),
        )?;

        if let Some(area) = &self.config.service_area {
            area.ensure_contains(&booking.pickup, "pickup")?;
            area.ensure_contains(&booking.destination, "destination")?;
        }

        // stale requests must not block a new one
        for open in self.store.list_open_by_passenger(passenger_id).await? {
            if self.load(open.id).await?.status.is_open() {
                return Err(duplicate_open_booking_error());
            }
        }

        let booking = self.store.create(booking).await?;

        self.publish(&booking, EventKind::Created);

        Ok(booking)
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_booking(&self, id: Uuid) -> Result<Booking, Error> {
        self.load(id).await
    }

    /// A driver either takes the request at the passenger's fare or proposes another fare.
    #[tracing::instrument(skip(self))]
    pub async fn driver_respond(
        &self,
        driver_id: Uuid,
        id: Uuid,
        response: DriverResponse,
    ) -> Result<Booking, Error> {
        let booking = self.load(id).await?;

        if !booking.is_pending() {
            return Err(not_found_error("booking is no longer available"));
        }

        self.ensure_driver_available(driver_id, booking.id).await?;

        let now = self.now();

        if response.accept {
            let booking = self
                .transition(&booking, move |booking| booking.accept_directly(driver_id, now))
                .await?;

            self.publish(
                &booking,
                EventKind::Accepted {
                    agreed_fare: booking.preferred_fare,
                },
            );

            return Ok(booking);
        }

        let amount = response
            .counter_offer
            .ok_or_else(|| validation_error("a counter offer amount is required"))?;
        validate_fare(amount, "counter offer")?;
        validate_message(&response.message)?;

        let offer = DriverOffer {
            amount,
            message: response.message,
            driver_id,
            created_at: now,
        };

        let booking = self
            .transition(&booking, move |booking| booking.make_offer(offer))
            .await?;

        self.publish(&booking, EventKind::OfferMade { amount });

        Ok(booking)
    }

    /// The passenger accepts or declines the outstanding counter-offer. `offer_driver_id`, when
    /// given, must name the driver whose offer the passenger saw.
    #[tracing::instrument(skip(self))]
    pub async fn respond_to_offer(
        &self,
        id: Uuid,
        accepted: bool,
        offer_driver_id: Option<Uuid>,
    ) -> Result<Booking, Error> {
        let booking = self.load(id).await?;

        let offer = match (&booking.status, &booking.driver_offer) {
            (Status::OfferMade, Some(offer)) => offer.clone(),
            _ => return Err(not_found_error("booking has no pending offer")),
        };

        if let Some(expected) = offer_driver_id {
            if expected != offer.driver_id {
                return Err(conflict_error("the offer has changed, refresh and retry"));
            }
        }

        let now = self.now();

        if !accepted {
            let booking = self
                .transition(&booking, move |booking| {
                    booking.decline_offer(now).map(|_| ())
                })
                .await?;

            self.publish(
                &booking,
                EventKind::OfferDeclined {
                    driver_id: offer.driver_id,
                },
            );

            return Ok(booking);
        }

        self.ensure_driver_available(offer.driver_id, booking.id)
            .await?;

        let booking = self
            .transition(&booking, move |booking| booking.accept_offer(now).map(|_| ()))
            .await?;

        self.publish(
            &booking,
            EventKind::Accepted {
                agreed_fare: offer.amount,
            },
        );

        Ok(booking)
    }

    /// The assigned driver has the passenger on board. The location is only checked when a
    /// pickup geofence is configured.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_pickup(
        &self,
        driver_id: Uuid,
        id: Uuid,
        location: Option<Coordinates>,
    ) -> Result<Booking, Error> {
        if let Some(location) = &location {
            location.validate()?;
        }

        let booking = self.load(id).await?;

        if booking.status != Status::Accepted {
            return Err(not_found_error("booking is not awaiting pickup"));
        }

        if !booking.is_assigned_to(driver_id) {
            return Err(forbidden_error());
        }

        if let Some(radius) = self.config.pickup_radius_meters {
            let location =
                location.ok_or_else(|| validation_error("driver location is required"))?;
            let distance = geo::distance_meters(&location, &booking.pickup);

            if distance > radius {
                return Err(validation_error(format!(
                    "driver is {:.0} m from the pickup point, must be within {:.0} m",
                    distance, radius
                )));
            }
        }

        let now = self.now();
        let booking = self
            .transition(&booking, move |booking| booking.start_trip(driver_id, now))
            .await?;

        self.publish(&booking, EventKind::PickedUp);

        Ok(booking)
    }

    /// Completion is only accepted from within the destination geofence; outside it the
    /// booking is left untouched and the driver may retry closer in.
    #[tracing::instrument(skip(self))]
    pub async fn complete(
        &self,
        driver_id: Uuid,
        id: Uuid,
        location: Coordinates,
    ) -> Result<Booking, Error> {
        location.validate()?;

        let booking = self.load(id).await?;

        if booking.status != Status::InProgress {
            return Err(not_found_error("booking is not in progress"));
        }

        if !booking.is_assigned_to(driver_id) {
            return Err(forbidden_error());
        }

        let radius = self.config.completion_radius_meters;
        let distance = geo::distance_meters(&location, &booking.destination);

        if distance > radius {
            tracing::info!(booking_id = %id, distance, "completion attempted outside geofence");
            return Err(not_at_destination_error(distance, radius));
        }

        let now = self.now();
        let booking = self
            .transition(&booking, move |booking| booking.complete(driver_id, now))
            .await?;

        self.publish(
            &booking,
            EventKind::Completed {
                fare: booking.agreed_fare.unwrap_or(booking.preferred_fare),
            },
        );

        Ok(booking)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, by: Party, id: Uuid, reason: String) -> Result<Booking, Error> {
        validate_reason(&reason)?;

        let booking = self.load(id).await?;

        if booking.status.is_terminal() {
            return Err(not_found_error("booking is already closed"));
        }

        let now = self.now();
        let booking = self
            .transition(&booking, move |booking| booking.cancel(by, reason, now))
            .await?;

        self.publish(&booking, EventKind::Cancelled { by });

        Ok(booking)
    }

    #[tracing::instrument(skip(self))]
    pub async fn rate(
        &self,
        id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Booking, Error> {
        let booking = self.load(id).await?;

        let booking = self
            .transition(&booking, move |booking| booking.rate(rating, comment))
            .await?;

        self.publish(&booking, EventKind::Rated { rating });

        Ok(booking)
    }

    /// Moves a `Pending` booking past its timeout to `Expired`. Returns `None`, not an error,
    /// when the booking was claimed, declined back to a fresh wait, or already closed.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, id: Uuid) -> Result<Option<Booking>, Error> {
        let booking = match self.store.get_by_id(id).await? {
            Some(booking) => booking,
            None => return Ok(None),
        };

        if !self.is_stale(&booking) {
            return Ok(None);
        }

        let now = self.now();
        let timeout = self.config.pending_timeout;

        let result = self
            .transition(&booking, move |booking| {
                if booking.pending_since + timeout > now {
                    return Err(conflict_error("booking is no longer stale"));
                }

                booking.expire(now)
            })
            .await;

        match result {
            Ok(booking) => {
                self.publish(&booking, EventKind::Expired);
                Ok(Some(booking))
            }
            Err(err) if err.is_conflict_error() || err.is_not_found_error() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
