use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_types::Geometry;
use geozero::wkb;
use sqlx::{postgres::PgRow, types::Json, Executor, Pool, Postgres, Row};
use uuid::Uuid;

use super::{sort_oldest_first, BookingStore, Mutator};
use crate::entities::{validate_update, Booking, Coordinates, Status};
use crate::error::{
    conflict_error, duplicate_open_booking_error, not_found_error, Error,
};
use crate::geo;

type Database = Postgres;

const OPEN_STATUSES: &str = "('pending', 'offer_made', 'accepted', 'in_progress')";

/// PostGIS-backed store. The record lives in `data`; the other columns are its indexes and are
/// written by the same statement as the record.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool<Database>,
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::new", skip_all)]
    pub async fn new(pool: Pool<Database>) -> Result<Self, Error> {
        pool.execute("CREATE EXTENSION IF NOT EXISTS postgis").await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS bookings (
                id UUID PRIMARY KEY,
                passenger_id UUID NOT NULL,
                driver_id UUID,
                status VARCHAR NOT NULL,
                version INT8 NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                pending_since TIMESTAMPTZ NOT NULL,
                pickup geometry(Point, 4326) NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        pool.execute(
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS bookings_one_open_per_passenger ON bookings (passenger_id) WHERE status IN {}",
                OPEN_STATUSES
            )
            .as_str(),
        )
        .await?;

        pool.execute("CREATE INDEX IF NOT EXISTS bookings_driver ON bookings (driver_id)")
            .await?;

        pool.execute(
            "CREATE INDEX IF NOT EXISTS bookings_pending_pickup ON bookings USING GIST ((pickup::geography)) WHERE status = 'pending'",
        )
        .await?;

        Ok(Self { pool })
    }

    async fn fetch_all(&self, query: sqlx::query::Query<'_, Database, sqlx::postgres::PgArguments>) -> Result<Vec<Booking>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn.fetch_all(query).await?;

        rows.iter().map(booking_from_row).collect()
    }
}

fn booking_from_row(row: &PgRow) -> Result<Booking, Error> {
    let Json(booking): Json<Booking> = row.try_get("data")?;

    Ok(booking)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[async_trait]
impl BookingStore for PgStore {
    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn create(&self, booking: Booking) -> Result<Booking, Error> {
        let mut conn = self.pool.acquire().await?;

        let pickup: Geometry<f64> = booking.pickup.into();

        let result = conn
            .execute(
                sqlx::query(
                    "INSERT INTO bookings (id, passenger_id, driver_id, status, version, created_at, pending_since, pickup, data)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, ST_SetSRID($8, 4326), $9)",
                )
                .bind(&booking.id)
                .bind(&booking.passenger_id)
                .bind(&booking.driver_id)
                .bind(booking.status.name())
                .bind(booking.version as i64)
                .bind(&booking.created_at)
                .bind(&booking.pending_since)
                .bind(wkb::Encode(pickup))
                .bind(Json(&booking)),
            )
            .await;

        match result {
            Ok(_) => Ok(booking),
            Err(err) if is_unique_violation(&err) => Err(duplicate_open_booking_error()),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Booking>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_result = conn
            .fetch_optional(sqlx::query("SELECT data FROM bookings WHERE id = $1").bind(&id))
            .await?;

        maybe_result.as_ref().map(booking_from_row).transpose()
    }

    #[tracing::instrument(skip(self, mutator))]
    async fn update_if_status(
        &self,
        id: Uuid,
        expected: Status,
        mutator: Mutator,
    ) -> Result<Booking, Error> {
        let current = self
            .get_by_id(id)
            .await?
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

        let mut conn = self.pool.acquire().await?;

        // the version guard closes the window between the read above and this write
        let result = conn
            .execute(
                sqlx::query(
                    "UPDATE bookings SET driver_id = $2, status = $3, version = $4, pending_since = $5, data = $6
                     WHERE id = $1 AND status = $7 AND version = $8",
                )
                .bind(&id)
                .bind(&next.driver_id)
                .bind(next.status.name())
                .bind(next.version as i64)
                .bind(&next.pending_since)
                .bind(Json(&next))
                .bind(expected.name())
                .bind(current.version as i64),
            )
            .await?;

        if result.rows_affected() == 0 {
            tracing::warn!("lost update race");
            return Err(conflict_error("booking was changed by someone else, refresh and retry"));
        }

        Ok(next)
    }

    async fn list_open_by_passenger(&self, passenger_id: Uuid) -> Result<Vec<Booking>, Error> {
        let query = format!(
            "SELECT data FROM bookings WHERE passenger_id = $1 AND status IN {} ORDER BY created_at ASC",
            OPEN_STATUSES
        );

        self.fetch_all(sqlx::query(&query).bind(passenger_id)).await
    }

    async fn list_active_by_driver(&self, driver_id: Uuid) -> Result<Vec<Booking>, Error> {
        let query = format!(
            "SELECT data FROM bookings WHERE driver_id = $1 AND status IN {} ORDER BY created_at ASC",
            OPEN_STATUSES
        );

        self.fetch_all(sqlx::query(&query).bind(driver_id)).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_open_near(
        &self,
        point: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<Booking>, Error> {
        let radius_meters = radius_km * 1000.0;
        let center: Geometry<f64> = point.into();

        // PostGIS measures on the spheroid; widen the search and apply the spherical cut here
        let mut bookings = self
            .fetch_all(
                sqlx::query(
                    "SELECT data FROM bookings
                     WHERE status = 'pending'
                     AND ST_DWithin(pickup::geography, ST_SetSRID($1, 4326)::geography, $2)",
                )
                .bind(wkb::Encode(center))
                .bind(radius_meters * 1.01 + 1.0),
            )
            .await?;

        bookings.retain(|booking| geo::within_radius(&booking.pickup, &point, radius_meters));
        sort_oldest_first(&mut bookings);

        Ok(bookings)
    }

    async fn list_by_passenger(&self, passenger_id: Uuid) -> Result<Vec<Booking>, Error> {
        self.fetch_all(
            sqlx::query("SELECT data FROM bookings WHERE passenger_id = $1").bind(passenger_id),
        )
        .await
    }

    async fn list_by_driver(&self, driver_id: Uuid) -> Result<Vec<Booking>, Error> {
        self.fetch_all(sqlx::query("SELECT data FROM bookings WHERE driver_id = $1").bind(driver_id))
            .await
    }

    async fn list_pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, Error> {
        self.fetch_all(
            sqlx::query(
                "SELECT data FROM bookings WHERE status = 'pending' AND pending_since <= $1 ORDER BY created_at ASC",
            )
            .bind(cutoff),
        )
        .await
    }
}

#[test]
#[ignore = "requires a PostGIS instance at DATABASE_URL"]
fn pg_store_round_trip() {
    use crate::db::PgPool;
    use tokio_test::block_on;

    let url = std::env::var("DATABASE_URL").unwrap();
    let PgPool(pool) = block_on(PgPool::new(&url, 2)).unwrap();
    let store = block_on(PgStore::new(pool)).unwrap();

    let pickup = Coordinates::new(14.5995, 120.9842);
    let booking = Booking::new(Uuid::new_v4(), pickup, pickup, 50.0, Utc::now()).unwrap();
    block_on(store.create(booking.clone())).unwrap();

    let near = block_on(store.list_open_near(pickup, 1.0)).unwrap();
    assert!(near.iter().any(|found| found.id == booking.id));

    let driver_id = Uuid::new_v4();
    let accepted = block_on(store.update_if_status(
        booking.id,
        Status::Pending,
        Box::new(move |booking: &mut Booking| booking.accept_directly(driver_id, Utc::now())),
    ))
    .unwrap();
    assert_eq!(accepted.driver_id, Some(driver_id));

    let err = block_on(store.update_if_status(
        booking.id,
        Status::Pending,
        Box::new(|booking: &mut Booking| booking.expire(Utc::now())),
    ))
    .unwrap_err();
    assert!(err.is_conflict_error());
}
