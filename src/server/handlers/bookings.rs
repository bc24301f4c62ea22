use axum::extract::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::DynAPI;
use crate::auth::User;
use crate::engine::{DriverResponse, NewBooking};
use crate::entities::{Booking, Coordinates, Status};
use crate::error::{validation_error, Error};
use crate::server::extract::{
    respond, respond_with, BookingId, Envelope, JsonBody, OptionalJsonBody, QueryParams,
};

const DEFAULT_SEARCH_RADIUS_KM: f64 = 5.0;

type Reply<T> = Result<Json<Envelope<T>>, Error>;

#[derive(Serialize, Deserialize)]
pub struct NearbyParams {
    lat: f64,
    lon: f64,
    radius: Option<f64>,
}

#[derive(Serialize, Deserialize)]
pub struct HistoryParams {
    status: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondToOfferParams {
    accepted: bool,
    driver_id: Option<Uuid>,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupParams {
    driver_lat: Option<f64>,
    driver_lon: Option<f64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteParams {
    driver_lat: f64,
    driver_lon: f64,
}

#[derive(Serialize, Deserialize)]
pub struct CancelParams {
    reason: String,
}

#[derive(Serialize, Deserialize)]
pub struct RateParams {
    rating: i64,
    comment: Option<String>,
}

fn parse_status(status: Option<String>) -> Result<Option<Status>, Error> {
    match status.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(name) => Status::from_name(name)
            .map(Some)
            .ok_or_else(|| validation_error(format!("unknown status '{}'", name))),
    }
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    JsonBody(params): JsonBody<NewBooking>,
) -> Reply<Booking> {
    let booking = api.create_booking(user, params).await?;

    Ok(respond_with(booking, "booking created"))
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    BookingId(id): BookingId,
) -> Reply<Booking> {
    let booking = api.find_booking(user, id).await?;

    Ok(respond(booking))
}

pub async fn nearby(
    Extension(api): Extension<DynAPI>,
    user: User,
    QueryParams(params): QueryParams<NearbyParams>,
) -> Reply<Vec<Booking>> {
    let location = Coordinates::new(params.lat, params.lon);
    let radius = params.radius.unwrap_or(DEFAULT_SEARCH_RADIUS_KM);

    let bookings = api.nearby_open_bookings(user, location, radius).await?;

    Ok(respond(bookings))
}

pub async fn active(Extension(api): Extension<DynAPI>, user: User) -> Reply<Option<Booking>> {
    let booking = api.active_booking(user).await?;

    Ok(respond(booking))
}

pub async fn passenger_history(
    Extension(api): Extension<DynAPI>,
    user: User,
    QueryParams(params): QueryParams<HistoryParams>,
) -> Reply<Vec<Booking>> {
    let status = parse_status(params.status)?;
    let bookings = api.passenger_bookings(user, status).await?;

    Ok(respond(bookings))
}

pub async fn driver_history(
    Extension(api): Extension<DynAPI>,
    user: User,
    QueryParams(params): QueryParams<HistoryParams>,
) -> Reply<Vec<Booking>> {
    let status = parse_status(params.status)?;
    let bookings = api.driver_bookings(user, status).await?;

    Ok(respond(bookings))
}

pub async fn driver_respond(
    Extension(api): Extension<DynAPI>,
    user: User,
    BookingId(id): BookingId,
    JsonBody(params): JsonBody<DriverResponse>,
) -> Reply<Booking> {
    let booking = api.driver_respond(user, id, params).await?;

    let message = match booking.status {
        Status::Accepted => "booking accepted",
        _ => "offer sent",
    };

    Ok(respond_with(booking, message))
}

pub async fn respond_to_offer(
    Extension(api): Extension<DynAPI>,
    user: User,
    BookingId(id): BookingId,
    JsonBody(params): JsonBody<RespondToOfferParams>,
) -> Reply<Booking> {
    let booking = api
        .respond_to_offer(user, id, params.accepted, params.driver_id)
        .await?;

    let message = if params.accepted {
        "offer accepted"
    } else {
        "offer declined"
    };

    Ok(respond_with(booking, message))
}

pub async fn pickup(
    Extension(api): Extension<DynAPI>,
    user: User,
    BookingId(id): BookingId,
    OptionalJsonBody(params): OptionalJsonBody<PickupParams>,
) -> Reply<Booking> {
    let params = params.unwrap_or_default();
    let location = match (params.driver_lat, params.driver_lon) {
        (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
        (None, None) => None,
        _ => return Err(validation_error("driverLat and driverLon must be sent together")),
    };

    let booking = api.confirm_pickup(user, id, location).await?;

    Ok(respond_with(booking, "passenger picked up"))
}

pub async fn complete(
    Extension(api): Extension<DynAPI>,
    user: User,
    BookingId(id): BookingId,
    JsonBody(params): JsonBody<CompleteParams>,
) -> Reply<Booking> {
    let location = Coordinates::new(params.driver_lat, params.driver_lon);
    let booking = api.complete_trip(user, id, location).await?;

    Ok(respond_with(booking, "trip completed"))
}

pub async fn cancel(
    Extension(api): Extension<DynAPI>,
    user: User,
    BookingId(id): BookingId,
    JsonBody(params): JsonBody<CancelParams>,
) -> Reply<Booking> {
    let booking = api.cancel_booking(user, id, params.reason).await?;

    Ok(respond_with(booking, "booking cancelled"))
}

pub async fn rate(
    Extension(api): Extension<DynAPI>,
    user: User,
    BookingId(id): BookingId,
    JsonBody(params): JsonBody<RateParams>,
) -> Reply<Booking> {
    let rating = u8::try_from(params.rating)
        .map_err(|_| validation_error("rating must be between 1 and 5"))?;
    let booking = api.rate_booking(user, id, rating, params.comment).await?;

    Ok(respond_with(booking, "thanks for rating"))
}
