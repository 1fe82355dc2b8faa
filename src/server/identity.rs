//! Extracts the caller identity a JWT-decoding middleware would have
//! already resolved; token decoding itself is out of scope here. Reads
//! the `x-username` header the transport layer is expected to set once
//! a real token verifier sits in front of this service.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::permissions::CallerIdentity;

pub struct Identity(pub CallerIdentity);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get("x-username")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing caller identity".into()))?
            .to_string();
        Ok(Identity(CallerIdentity { username }))
    }
}
