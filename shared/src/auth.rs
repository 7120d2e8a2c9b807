use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const ADMIN_ROLE: &str = "admin";

#[cfg(any(test, feature = "test_utils"))]
pub const TEST_JWT_SECRET: &str = "test-jwt-secret";

/// Claims carried by the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: usize,
}

/// Authenticated caller, inserted as a request extension by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub is_admin: bool,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            is_admin: claims.role.as_deref() == Some(ADMIN_ROLE),
            user_id: claims.sub,
            email: claims.email,
        }
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn jwt_secret() -> Option<String> {
    std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty())
}

/// Validates an HS256 token signed with `secret`.
pub fn decode_token(token: &str, secret: &str) -> Result<AuthUser, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims.into())
}

/// Rejects requests without a valid bearer token; otherwise exposes the caller as
/// `Extension<AuthUser>`.
pub async fn auth_middleware(mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(token) = token else {
        warn!("Request to {} without bearer token", req.uri());
        return reject(StatusCode::UNAUTHORIZED, "Missing bearer token");
    };

    let Some(secret) = jwt_secret() else {
        warn!("JWT_SECRET is not configured, rejecting request");
        return reject(StatusCode::UNAUTHORIZED, "Authentication is not configured");
    };

    match decode_token(&token, &secret) {
        Ok(user) => {
            debug!("Authenticated user {} (admin={})", user.user_id, user.is_admin);
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => {
            warn!("Rejected bearer token: {}", e);
            reject(StatusCode::UNAUTHORIZED, "Invalid bearer token")
        }
    }
}

/// Layered after [`auth_middleware`]; only admins get through.
pub async fn require_admin(req: Request, next: Next) -> Response {
    match req.extensions().get::<AuthUser>() {
        Some(user) if user.is_admin => next.run(req).await,
        Some(user) => {
            warn!("User {} attempted an admin operation", user.user_id);
            reject(StatusCode::FORBIDDEN, "Admin role required")
        }
        None => reject(StatusCode::UNAUTHORIZED, "Not authenticated"),
    }
}

#[cfg(any(test, feature = "test_utils"))]
fn sign_test_token(user_id: &str, role: Option<&str>) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        role: role.map(str::to_string),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    std::env::set_var("JWT_SECRET", TEST_JWT_SECRET);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("test token should encode")
}

#[cfg(any(test, feature = "test_utils"))]
fn build_test_request(
    method: &str,
    uri: &str,
    token: String,
    body: Option<serde_json::Value>,
) -> axum::http::Request<axum::body::Body> {
    let builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token));

    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .expect("test request should build"),
        None => builder
            .body(axum::body::Body::empty())
            .expect("test request should build"),
    }
}

/// Builds a request authenticated as a regular parent.
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_request(
    method: &str,
    uri: &str,
    user_id: &str,
    body: Option<serde_json::Value>,
) -> axum::http::Request<axum::body::Body> {
    build_test_request(method, uri, sign_test_token(user_id, None), body)
}

/// Builds a request authenticated as an administrator.
#[cfg(any(test, feature = "test_utils"))]
pub fn create_admin_request(
    method: &str,
    uri: &str,
    user_id: &str,
    body: Option<serde_json::Value>,
) -> axum::http::Request<axum::body::Body> {
    build_test_request(method, uri, sign_test_token(user_id, Some(ADMIN_ROLE)), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, role: Option<&str>, exp_offset: i64) -> String {
        let claims = Claims {
            sub: "user-1".into(),
            email: "user@example.com".into(),
            role: role.map(str::to_string),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_decode_token_roles() {
        let parent = decode_token(&token("s3cret", None, 600), "s3cret").unwrap();
        assert_eq!(parent.user_id, "user-1");
        assert!(!parent.is_admin);

        let admin = decode_token(&token("s3cret", Some("admin"), 600), "s3cret").unwrap();
        assert!(admin.is_admin);
    }

    #[test]
    fn test_decode_token_rejects_bad_signature_and_expiry() {
        assert!(decode_token(&token("other", None, 600), "s3cret").is_err());
        assert!(decode_token(&token("s3cret", None, -3600), "s3cret").is_err());
    }
}
