use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use huddle_core::{DeliveryCoordinator, NotificationFanout, TokenValidator, blocking};
use huddle_db::Database;
use huddle_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use huddle_types::models::Role;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub validator: Arc<TokenValidator>,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub notifications: Arc<NotificationFanout>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&req.username, &req.password)?;

    let username = req.username.clone();
    let existing = blocking(&state.db, move |db| db.get_user_by_username(&username)).await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("username is taken".into()));
    }

    // Hash password with Argon2id
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("spawn_blocking join error: {}", e)))?
    .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?;

    let user_id = Uuid::new_v4();
    let username = req.username.clone();
    let role = req.role;
    // A concurrent registration can take the name between lookup and insert.
    let created = blocking(&state.db, move |db| {
        db.create_user(&user_id.to_string(), &username, &password_hash, role.as_str())
    })
    .await?;
    if !created {
        return Err(ApiError::Conflict("username is taken".into()));
    }

    let token = state
        .validator
        .issue(user_id, &req.username, role)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!("Registered {} {} ({})", role, req.username, user_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

fn validate_registration(username: &str, password: &str) -> Result<(), ApiError> {
    if !(3..=32).contains(&username.chars().count()) {
        return Err(ApiError::Validation("username must be 3-32 characters".into()));
    }
    if password.chars().count() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }
    Ok(())
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.clone();
    let user = blocking(&state.db, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let stored_hash = user.password.clone();
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored_hash).map_err(|e| e.to_string())?;
        Ok::<_, String>(
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
        )
    })
    .await
    .map_err(|e| ApiError::Internal(format!("spawn_blocking join error: {}", e)))?
    .map_err(|e| ApiError::Internal(format!("corrupt password hash for {}: {}", user.id, e)))?;

    if !verified {
        return Err(ApiError::Unauthorized);
    }

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|_| ApiError::Internal(format!("corrupt user id '{}'", user.id)))?;
    let role: Role = user
        .role
        .parse()
        .map_err(|_| ApiError::Internal(format!("corrupt role on user '{}'", user.id)))?;

    let token = state
        .validator
        .issue(user_id, &user.username, role)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        role,
        token,
    }))
}
