mod extract;
mod handlers;

use std::net::SocketAddr;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};

use crate::api::DynAPI;
use crate::auth::DynIdentity;
use crate::error::{unexpected_error, Error};
use crate::server::handlers::{bookings, health};

pub use extract::Envelope;

pub fn router(api: DynAPI, identity: DynIdentity) -> Router {
    Router::new()
        .route("/health", get(health::check))
        .route("/bookings", post(bookings::create))
        .route("/bookings/nearby", get(bookings::nearby))
        .route("/bookings/active", get(bookings::active))
        .route("/bookings/user", get(bookings::passenger_history))
        .route("/bookings/driver", get(bookings::driver_history))
        .route("/bookings/:id", get(bookings::find))
        .route("/bookings/:id/driver-respond", post(bookings::driver_respond))
        .route("/bookings/:id/respond-to-offer", post(bookings::respond_to_offer))
        .route("/bookings/:id/pickup", post(bookings::pickup))
        .route("/bookings/:id/complete", post(bookings::complete))
        .route("/bookings/:id/cancel", post(bookings::cancel))
        .route("/bookings/:id/rate", post(bookings::rate))
        .layer(Extension(api))
        .layer(Extension(identity))
}

pub async fn serve(api: DynAPI, identity: DynIdentity, addr: SocketAddr) -> Result<(), Error> {
    let app = router(api, identity);

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|err| unexpected_error(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticIdentityProvider, User};
    use crate::engine::testing::{destination, engine, pickup};
    use crate::geo;
    use crate::gateway::Gateway;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Harness {
        app: Router,
        passenger: User,
        driver: User,
    }

    fn harness() -> Harness {
        let (engine, _) = engine();
        let passenger = User::passenger(Uuid::new_v4());
        let driver = User::driver(Uuid::new_v4());

        let identity = StaticIdentityProvider::new()
            .with_user("passenger-token", passenger.clone())
            .with_user("driver-token", driver.clone())
            .with_user("other-driver-token", User::driver(Uuid::new_v4()));

        let api = Arc::new(Gateway::new(engine).unwrap()) as DynAPI;

        Harness {
            app: router(api, Arc::new(identity)),
            passenger,
            driver,
        }
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);

        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();

        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn call_raw(
        app: &Router,
        uri: &str,
        token: &str,
        body: &'static str,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();

        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn assert_validation_envelope(status: StatusCode, body: &Value) {
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], 100);
        assert!(body["message"].is_string());
    }

    fn create_body() -> Value {
        json!({
            "pickup": { "lat": pickup().lat, "lng": pickup().lng },
            "destination": { "lat": destination().lat, "lng": destination().lng },
            "preferredFare": 50.0,
        })
    }

    #[tokio::test]
    async fn health_needs_no_credentials() {
        let h = harness();

        let (status, body) = call(&h.app, Method::GET, "/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn missing_or_unknown_bearer_is_unauthorized() {
        let h = harness();

        let (status, body) = call(&h.app, Method::GET, "/bookings/active", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) =
            call(&h.app, Method::GET, "/bookings/active", Some("forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn full_trip_over_http() {
        let h = harness();

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/bookings",
            Some("passenger-token"),
            Some(create_body()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["passengerId"], h.passenger.id.to_string());
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let uri = format!("/bookings/nearby?lat={}&lon={}&radius=1", pickup().lat, pickup().lng);
        let (status, body) = call(&h.app, Method::GET, &uri, Some("driver-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], id.as_str());

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/driver-respond", id),
            Some("driver-token"),
            Some(json!({ "accept": false, "counterOffer": 70.0, "message": "rush hour" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "offer_made");
        assert_eq!(body["data"]["driverOffer"]["amount"], 70.0);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/respond-to-offer", id),
            Some("passenger-token"),
            Some(json!({ "accepted": true, "driverId": h.driver.id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "offer accepted");
        assert_eq!(body["data"]["agreedFare"], 70.0);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/pickup", id),
            Some("driver-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "in_progress");

        let far = geo::offset_north(&destination(), 310.0);
        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/complete", id),
            Some("driver-token"),
            Some(json!({ "driverLat": far.lat, "driverLon": far.lng })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], 105);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/complete", id),
            Some("driver-token"),
            Some(json!({ "driverLat": destination().lat, "driverLon": destination().lng })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/rate", id),
            Some("passenger-token"),
            Some(json!({ "rating": 5, "comment": "smooth ride" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rating"], 5);

        let (status, body) = call(
            &h.app,
            Method::GET,
            "/bookings/driver?status=completed",
            Some("driver-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn domain_errors_map_to_statuses() {
        let h = harness();

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/bookings",
            Some("passenger-token"),
            Some(create_body()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/bookings",
            Some("passenger-token"),
            Some(create_body()),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 103);

        let (status, _) = call(
            &h.app,
            Method::POST,
            "/bookings",
            Some("driver-token"),
            Some(create_body()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &h.app,
            Method::GET,
            &format!("/bookings/{}", Uuid::new_v4()),
            Some("passenger-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/cancel", id),
            Some("passenger-token"),
            Some(json!({ "reason": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 100);

        let (status, _) = call(
            &h.app,
            Method::GET,
            "/bookings/user?status=lost",
            Some("passenger-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/cancel", id),
            Some("passenger-token"),
            Some(json!({ "reason": "found a jeepney" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");
        assert_eq!(body["data"]["cancelledBy"], "passenger");
    }

    #[tokio::test]
    async fn claimed_booking_is_gone_for_other_drivers() {
        let h = harness();

        let (_, body) = call(
            &h.app,
            Method::POST,
            "/bookings",
            Some("passenger-token"),
            Some(create_body()),
        )
        .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/driver-respond", id),
            Some("driver-token"),
            Some(json!({ "accept": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "booking accepted");

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/driver-respond", id),
            Some("other-driver-token"),
            Some(json!({ "accept": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 101);

        let (status, body) =
            call(&h.app, Method::GET, "/bookings/active", Some("driver-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], id.as_str());
    }

    #[tokio::test]
    async fn unreadable_requests_get_the_error_envelope() {
        let h = harness();

        let (status, body) = call_raw(&h.app, "/bookings", "passenger-token", "{not json").await;
        assert_validation_envelope(status, &body);

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/bookings",
            Some("passenger-token"),
            Some(json!({ "pickup": { "lat": 14.5 } })),
        )
        .await;
        assert_validation_envelope(status, &body);

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/bookings/not-a-uuid/cancel",
            Some("passenger-token"),
            Some(json!({ "reason": "changed plans" })),
        )
        .await;
        assert_validation_envelope(status, &body);

        let (status, body) = call(
            &h.app,
            Method::GET,
            "/bookings/not-a-uuid",
            Some("passenger-token"),
            None,
        )
        .await;
        assert_validation_envelope(status, &body);

        let (status, body) = call(
            &h.app,
            Method::GET,
            "/bookings/nearby?lat=north&lon=120.98",
            Some("driver-token"),
            None,
        )
        .await;
        assert_validation_envelope(status, &body);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/rate", Uuid::new_v4()),
            Some("passenger-token"),
            Some(json!({ "rating": 300 })),
        )
        .await;
        assert_validation_envelope(status, &body);
        assert_eq!(body["message"], "rating must be between 1 and 5");

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/cancel", Uuid::new_v4()),
            Some("passenger-token"),
            None,
        )
        .await;
        assert_validation_envelope(status, &body);
    }

    #[tokio::test]
    async fn pickup_body_is_optional_but_must_be_json_when_sent() {
        let h = harness();

        let (_, body) = call(
            &h.app,
            Method::POST,
            "/bookings",
            Some("passenger-token"),
            Some(create_body()),
        )
        .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &h.app,
            Method::POST,
            &format!("/bookings/{}/driver-respond", id),
            Some("driver-token"),
            Some(json!({ "accept": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/bookings/{}/pickup", id);

        let (status, body) = call_raw(&h.app, &uri, "driver-token", "{\"driverLat\":").await;
        assert_validation_envelope(status, &body);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &uri,
            Some("driver-token"),
            Some(json!({ "driverLat": pickup().lat })),
        )
        .await;
        assert_validation_envelope(status, &body);

        let (status, body) = call(&h.app, Method::POST, &uri, Some("driver-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "in_progress");
        assert_eq!(body["data"]["driverId"], h.driver.id.to_string());
    }
}
