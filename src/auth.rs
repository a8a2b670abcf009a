use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use utoipa::ToSchema;

use crate::config::MAX_JWT_TTL_HOURS;
use crate::error::ApiError;
use crate::models::{Form, Id};
use crate::routes::AppState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // numeric user id
    pub exp: usize,
    pub role: Role,
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Caller {
    pub id: Id,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Creator of the form or an admin.
    pub fn can_manage(&self, form: &Form) -> bool {
        self.is_admin() || form.creator_id == self.id
    }
}

/// Extractor yielding the validated caller.
pub struct Auth(pub Caller);

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            log::error!("AppState missing, cannot validate bearer tokens");
            return ready(Err(ApiError::Internal));
        };
        // Delegate to BearerAuth to parse the header.
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(ApiError::Unauthorized));
        };
        let caller = decode_jwt(bearer.token(), &state.config.jwt_secret)
            .ok()
            .and_then(|claims| {
                let id = claims.sub.parse().ok()?;
                Some(Caller { id, role: claims.role })
            });
        ready(caller.map(Auth).ok_or(ApiError::Unauthorized))
    }
}

/// Create a signed token for a user. The lifetime is capped at
/// `MAX_JWT_TTL_HOURS`.
pub fn create_jwt(
    user_id: Id,
    role: Role,
    secret: &str,
    ttl_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let expiration = chrono::Duration::try_hours(ttl_hours.min(MAX_JWT_TTL_HOURS))
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(now)
        .timestamp() as usize;

    let claims = Claims { sub: user_id.to_string(), exp: expiration, role };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}
