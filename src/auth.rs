use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::OnceLock;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    cookie::{time::Duration as CookieDuration, Cookie},
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use futures::future::{ok, ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use mongodb::bson::{doc, DateTime as BsonDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::JwtConfig;
use crate::error::{ApiError, ApiResponse};
use crate::models::{NotificationPreferences, User, UserDocument, USERS};

const BCRYPT_COST: u32 = 10;
const ACCESS_COOKIE: &str = "accessToken";
const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub username: String,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// A registration that passed validation, normalised for storage.
#[derive(Debug, PartialEq)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
}

pub fn is_valid_email(email: &str) -> bool {
    email_pattern().is_some_and(|re| re.is_match(email))
}

pub fn validate_registration(req: &RegisterRequest) -> Result<NewAccount, ApiError> {
    let field = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").to_string();
    let username = field(&req.username).to_lowercase();
    let email = field(&req.email).to_lowercase();
    let password = req.password.clone().unwrap_or_default();

    if username.is_empty() || email.is_empty() || password.trim().is_empty() {
        return Err(ApiError::BadRequest("All fields are required".into()));
    }
    let len = username.chars().count();
    if !(3..=30).contains(&len) {
        return Err(ApiError::BadRequest(
            "Username must be between 3 and 30 characters".into(),
        ));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("Please enter a valid email".into()));
    }
    if password.chars().count() < 6 {
        return Err(ApiError::BadRequest(
            "Password must be at least 6 characters".into(),
        ));
    }
    Ok(NewAccount {
        username,
        email,
        password,
    })
}

fn expiry(ttl: Duration) -> usize {
    (Utc::now() + ttl).timestamp().max(0) as usize
}

pub fn create_access_token(user: &User, jwt: &JwtConfig) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        username: user.username.clone(),
        exp: expiry(Duration::hours(jwt.access_ttl_hours)),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt.access_secret.as_ref()),
    )
    .map_err(|e| ApiError::Internal(format!("Error generating access token: {}", e)))
}

pub fn create_refresh_token(user_id: &str, jwt: &JwtConfig) -> Result<String, ApiError> {
    let claims = RefreshClaims {
        sub: user_id.to_string(),
        exp: expiry(Duration::days(jwt.refresh_ttl_days)),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt.refresh_secret.as_ref()),
    )
    .map_err(|e| ApiError::Internal(format!("Error generating refresh token: {}", e)))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// The caller, as established by [`Authentication`]. Extracting it in a
/// handler makes the route require a valid access token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub username: String,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            username: claims.username,
        }
    }
}

impl FromRequest for CurrentUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let extensions = req.extensions();
        let current = match extensions.get::<CurrentUser>() {
            Some(user) => Ok(user.clone()),
            None if extensions.contains::<RejectedToken>() => {
                Err(ApiError::Unauthorized("Invalid access token".into()))
            }
            None => Err(ApiError::Unauthorized("Unauthorized request".into())),
        };
        ready(current)
    }
}

/// Marks a request whose token failed validation.
#[derive(Debug, Clone, Copy)]
struct RejectedToken;

/// Resolves the access token from the `Authorization` header or the
/// `accessToken` cookie. Every request passes through; only handlers that
/// extract [`CurrentUser`] answer 401, so a stale cookie never blocks the
/// public routes.
#[derive(Clone)]
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Rc::new(secret.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

fn request_token(req: &ServiceRequest) -> Option<String> {
    let bearer = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    bearer.or_else(|| req.cookie(ACCESS_COOKIE).map(|c| c.value().to_string()))
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(token) = request_token(&req) {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(CurrentUser::from(claims));
                }
                Err(e) => {
                    warn!("Ignoring invalid access token on {}: {}", req.path(), e);
                    req.extensions_mut().insert(RejectedToken);
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

fn session_cookie<'c>(name: &'c str, value: String, max_age: CookieDuration, secure: bool) -> Cookie<'c> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .secure(secure)
        .max_age(max_age)
        .finish()
}

fn removal_cookie(name: &str) -> Cookie<'_> {
    let mut cookie = Cookie::build(name, "").path("/").finish();
    cookie.make_removal();
    cookie
}

// Register Endpoint
pub async fn register(
    data: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let account = validate_registration(&body)?;
    let users = data.mongodb.db.collection::<UserDocument>(USERS);

    let existing = users
        .find_one(doc! { "$or": [
            { "username": &account.username },
            { "email": &account.email },
        ] })
        .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let password_hash = hash(&account.password, BCRYPT_COST)
        .map_err(|e| ApiError::Internal(format!("Error hashing password: {}", e)))?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: account.username,
        email: account.email,
        password_hash,
        refresh_token: None,
        email_notifications: NotificationPreferences::default(),
        created_at: now,
        updated_at: now,
    };
    users.insert_one(UserDocument::from(&user)).await?;
    info!("Registered user {} ({})", user.username, user.id);

    Ok(ApiResponse::created(user, "User registered successfully"))
}

// Login Endpoint
pub async fn login(
    data: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let (Some(email), Some(password)) = (
        body.email.as_deref().map(str::trim).filter(|e| !e.is_empty()),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    };

    let users = data.mongodb.db.collection::<UserDocument>(USERS);
    let mut user: User = users
        .find_one(doc! { "email": email.to_lowercase() })
        .await?
        .map(User::from)
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    if !verify(password, &user.password_hash).unwrap_or(false) {
        return Err(ApiError::Unauthorized("Invalid user credentials".into()));
    }

    let jwt = &data.config.jwt;
    let access_token = create_access_token(&user, jwt)?;
    let refresh_token = create_refresh_token(&user.id, jwt)?;
    users
        .update_one(
            doc! { "_id": &user.id },
            doc! { "$set": {
                "refresh_token": &refresh_token,
                "updated_at": BsonDateTime::now(),
            } },
        )
        .await?;
    user.refresh_token = Some(refresh_token.clone());
    info!("User {} logged in", user.id);

    let secure = data.config.secure_cookies;
    Ok(HttpResponse::Ok()
        .cookie(session_cookie(
            ACCESS_COOKIE,
            access_token.clone(),
            CookieDuration::hours(jwt.access_ttl_hours),
            secure,
        ))
        .cookie(session_cookie(
            REFRESH_COOKIE,
            refresh_token.clone(),
            CookieDuration::days(jwt.refresh_ttl_days),
            secure,
        ))
        .json(ApiResponse::new(
            http::StatusCode::OK,
            json!({
                "user": user,
                "accessToken": access_token,
                "refreshToken": refresh_token,
            }),
            "User logged in successfully",
        )))
}

pub async fn logout(
    data: web::Data<AppState>,
    current: CurrentUser,
) -> Result<HttpResponse, ApiError> {
    data.mongodb
        .db
        .collection::<UserDocument>(USERS)
        .update_one(
            doc! { "_id": &current.id },
            doc! {
                "$unset": { "refresh_token": 1 },
                "$set": { "updated_at": BsonDateTime::now() },
            },
        )
        .await?;
    info!("User {} logged out", current.id);

    Ok(HttpResponse::Ok()
        .cookie(removal_cookie(ACCESS_COOKIE))
        .cookie(removal_cookie(REFRESH_COOKIE))
        .json(ApiResponse::new(
            http::StatusCode::OK,
            json!({}),
            "User logged out",
        )))
}

pub async fn me(data: web::Data<AppState>, current: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user = load_user(&data, &current.id).await?;
    Ok(ApiResponse::ok(user, "Current user fetched successfully"))
}

/// Loads the caller's account; a token for a deleted account is a 404.
pub async fn load_user(data: &AppState, user_id: &str) -> Result<User, ApiError> {
    data.mongodb
        .db
        .collection::<UserDocument>(USERS)
        .find_one(doc! { "_id": user_id })
        .await?
        .map(User::from)
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, App};

    fn jwt() -> JwtConfig {
        JwtConfig {
            access_secret: "access-secret".into(),
            access_ttl_hours: 1,
            refresh_secret: "refresh-secret".into(),
            refresh_ttl_days: 10,
        }
    }

    fn user() -> User {
        User {
            id: "u1".into(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            refresh_token: None,
            email_notifications: NotificationPreferences::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn register(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: Some(username.into()),
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    async fn whoami(current: CurrentUser) -> HttpResponse {
        HttpResponse::Ok().body(current.id)
    }

    async fn public() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[test]
    fn registration_is_normalised() {
        let account = validate_registration(&register(" Ada ", "ADA@Example.com", "secret1")).unwrap();
        assert_eq!(account.username, "ada");
        assert_eq!(account.email, "ada@example.com");
    }

    #[test]
    fn registration_rules() {
        assert!(validate_registration(&register("", "a@b.co", "secret1")).is_err());
        assert!(validate_registration(&register("ab", "a@b.co", "secret1")).is_err());
        assert!(validate_registration(&register("ada", "not-an-email", "secret1")).is_err());
        assert!(validate_registration(&register("ada", "a@b.co", "12345")).is_err());
        assert!(validate_registration(&RegisterRequest {
            username: Some("ada".into()),
            email: None,
            password: Some("secret1".into()),
        })
        .is_err());
    }

    #[test]
    fn access_token_round_trips() {
        let token = create_access_token(&user(), &jwt()).unwrap();
        let claims = validate_jwt(&token, "access-secret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "ada");
        assert!(validate_jwt(&token, "refresh-secret").is_err());
    }

    #[actix_web::test]
    async fn middleware_accepts_bearer_and_cookie() {
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication::new("access-secret"))
                .route("/me", web::get().to(whoami)),
        )
        .await;
        let token = create_access_token(&user(), &jwt()).unwrap();

        let req = actix_test::TestRequest::get()
            .uri("/me")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, web::Bytes::from_static(b"u1"));

        let req = actix_test::TestRequest::get()
            .uri("/me")
            .cookie(Cookie::new(ACCESS_COOKIE, token))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn middleware_rejects_bad_and_missing_tokens() {
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication::new("access-secret"))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/me")
            .insert_header((http::header::AUTHORIZATION, "Bearer garbage"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);

        let req = actix_test::TestRequest::get().uri("/me").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn stale_cookie_does_not_block_public_routes() {
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication::new("access-secret"))
                .route("/users/login", web::post().to(public))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/users/login")
            .cookie(Cookie::new(ACCESS_COOKIE, "stale.token.value"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = actix_test::TestRequest::get()
            .uri("/me")
            .cookie(Cookie::new(ACCESS_COOKIE, "stale.token.value"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["message"], "Invalid access token");
    }

    #[actix_web::test]
    async fn expired_token_is_rejected() {
        let mut config = jwt();
        config.access_ttl_hours = -2;
        let token = create_access_token(&user(), &config).unwrap();
        assert!(validate_jwt(&token, "access-secret").is_err());
    }
}
