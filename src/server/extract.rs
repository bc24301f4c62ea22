use async_trait::async_trait;
use axum::{
    body::{Bytes, HttpBody},
    extract::{Extension, FromRequest, FromRequestParts, Path, Query},
    http::{header::AUTHORIZATION, request::Parts, Request},
    BoxError, Json,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::auth::{DynIdentity, User};
use crate::error::{unauthorized_error, unexpected_error, validation_error, Error};

/// The caller, resolved from the `Authorization: Bearer <token>` header.
#[async_trait]
impl<S> FromRequestParts<S> for User
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(identity) = Extension::<DynIdentity>::from_request_parts(parts, state)
            .await
            .map_err(|_| unexpected_error("identity provider is not configured"))?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(unauthorized_error)?;

        identity.resolve(token).await
    }
}

/// JSON request body; a body axum cannot read or deserialize is a `ValidationError`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| validation_error(rejection.to_string()))?;

        Ok(Self(value))
    }
}

/// Like [`JsonBody`], but an empty body reads as `None`.
pub struct OptionalJsonBody<T>(pub Option<T>);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for OptionalJsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| validation_error(rejection.to_string()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }

        serde_json::from_slice(&bytes)
            .map(|value| Self(Some(value)))
            .map_err(|err| validation_error(format!("invalid JSON body: {}", err)))
    }
}

/// The `:id` path segment of a booking route.
pub struct BookingId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for BookingId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|_| validation_error("booking id must be a UUID"))?;

        Ok(Self(id))
    }
}

pub struct QueryParams<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| validation_error(rejection.to_string()))?;

        Ok(Self(value))
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

pub fn respond<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: None,
        data,
    })
}

pub fn respond_with<T: Serialize>(data: T, message: &str) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: Some(message.to_string()),
        data,
    })
}
