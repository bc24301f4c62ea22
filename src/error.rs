use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::{self, Debug, Display};

pub const VALIDATION: i32 = 100;
pub const NOT_FOUND: i32 = 101;
pub const CONFLICT: i32 = 102;
pub const DUPLICATE_OPEN_BOOKING: i32 = 103;
pub const DRIVER_BUSY: i32 = 104;
pub const NOT_AT_DESTINATION: i32 = 105;
pub const FORBIDDEN: i32 = 106;
pub const UNAUTHORIZED: i32 = 107;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Error {
    /// Internal errors (codes below 100) are faults rather than outcomes a client can act on.
    pub fn is_internal(&self) -> bool {
        self.code < VALIDATION
    }

    pub fn is_validation_error(&self) -> bool {
        self.code == VALIDATION
    }

    pub fn is_not_found_error(&self) -> bool {
        self.code == NOT_FOUND
    }

    pub fn is_conflict_error(&self) -> bool {
        self.code == CONFLICT
    }

    pub fn is_duplicate_open_booking_error(&self) -> bool {
        self.code == DUPLICATE_OPEN_BOOKING
    }

    pub fn is_driver_busy_error(&self) -> bool {
        self.code == DRIVER_BUSY
    }

    pub fn is_not_at_destination_error(&self) -> bool {
        self.code == NOT_AT_DESTINATION
    }

    pub fn is_forbidden_error(&self) -> bool {
        self.code == FORBIDDEN
    }

    pub fn is_unauthorized_error(&self) -> bool {
        self.code == UNAUTHORIZED
    }

    fn status_code(&self) -> StatusCode {
        match self.code {
            VALIDATION => StatusCode::BAD_REQUEST,
            NOT_FOUND => StatusCode::NOT_FOUND,
            CONFLICT | DUPLICATE_OPEN_BOOKING | DRIVER_BUSY => StatusCode::CONFLICT,
            NOT_AT_DESTINATION => StatusCode::UNPROCESSABLE_ENTITY,
            FORBIDDEN => StatusCode::FORBIDDEN,
            UNAUTHORIZED => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        database_error(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        authorizer_error(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        serialization_error(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        io_error(err)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        config_error(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        config_error(err.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(err: std::net::AddrParseError) -> Self {
        config_error(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if self.is_internal() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
            "Internal Server Error".to_string()
        } else {
            self.message
        };

        let body = Json(json!({
            "success": false,
            "code": self.code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub fn validation_error(message: impl Into<String>) -> Error {
    Error {
        code: VALIDATION,
        message: message.into(),
    }
}

pub fn not_found_error(message: impl Into<String>) -> Error {
    Error {
        code: NOT_FOUND,
        message: message.into(),
    }
}

pub fn conflict_error(message: impl Into<String>) -> Error {
    Error {
        code: CONFLICT,
        message: message.into(),
    }
}

pub fn duplicate_open_booking_error() -> Error {
    Error {
        code: DUPLICATE_OPEN_BOOKING,
        message: "passenger already has an open booking".into(),
    }
}

pub fn driver_busy_error() -> Error {
    Error {
        code: DRIVER_BUSY,
        message: "driver already has an active trip".into(),
    }
}

pub fn not_at_destination_error(distance_meters: f64, radius_meters: f64) -> Error {
    Error {
        code: NOT_AT_DESTINATION,
        message: format!(
            "driver is {:.0} m from the destination, must be within {:.0} m",
            distance_meters, radius_meters
        ),
    }
}

pub fn forbidden_error() -> Error {
    Error {
        code: FORBIDDEN,
        message: "forbidden".into(),
    }
}

pub fn unauthorized_error() -> Error {
    Error {
        code: UNAUTHORIZED,
        message: "missing or unknown credentials".into(),
    }
}

pub fn env_var_error(err: env::VarError) -> Error {
    Error {
        code: 1,
        message: format!("environment variable error: {}", err),
    }
}

pub fn database_error<T: Debug>(err: T) -> Error {
    Error {
        code: 2,
        message: format!("database error: {:?}", err),
    }
}

pub fn authorizer_error<T: Debug>(err: T) -> Error {
    Error {
        code: 3,
        message: format!("authorizer error: {:?}", err),
    }
}

pub fn serialization_error<T: Debug>(err: T) -> Error {
    Error {
        code: 4,
        message: format!("serialization error: {:?}", err),
    }
}

pub fn unexpected_error(message: impl Into<String>) -> Error {
    Error {
        code: 5,
        message: message.into(),
    }
}

pub fn io_error(err: std::io::Error) -> Error {
    Error {
        code: 6,
        message: format!("io error: {}", err),
    }
}

pub fn config_error(message: impl Into<String>) -> Error {
    Error {
        code: 7,
        message: format!("configuration error: {}", message.into()),
    }
}

#[test]
fn internal_errors_are_masked() {
    use tokio_test::block_on;

    let response = database_error("connection refused").into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = block_on(hyper::body::to_bytes(response.into_body())).unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 2);
    assert_eq!(body["message"], "Internal Server Error");
}

#[test]
fn domain_errors_are_surfaced_verbatim() {
    use tokio_test::block_on;

    let response = not_found_error("booking is no longer pending").into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let bytes = block_on(hyper::body::to_bytes(response.into_body())).unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["code"], NOT_FOUND);
    assert_eq!(body["message"], "booking is no longer pending");

    assert_eq!(
        not_at_destination_error(310.0, 300.0).status_code(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(driver_busy_error().status_code(), StatusCode::CONFLICT);
}
