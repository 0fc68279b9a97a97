mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use huddle_api::auth::{self, AppState, AppStateInner};
use huddle_api::error::ApiError;
use huddle_api::middleware::require_auth;
use huddle_api::{contacts, messages, notifications};
use huddle_core::{DeliveryCoordinator, Fanout, NotificationFanout, SessionRegistry, TokenValidator};
use huddle_gateway::{Gateway, connection};

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(huddle_db::Database::open(&config.db_path)?);

    // One registry for the whole process; every pipeline fans out through it.
    let registry = SessionRegistry::new();
    let fanout: Arc<dyn Fanout> = Arc::new(registry.clone());

    let validator = Arc::new(TokenValidator::new(&config.jwt_secret));
    let coordinator = Arc::new(DeliveryCoordinator::new(db.clone(), fanout.clone()));
    let notification_fanout = Arc::new(NotificationFanout::new(db.clone(), fanout));

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        validator: validator.clone(),
        coordinator: coordinator.clone(),
        notifications: notification_fanout,
    });

    let gateway = Gateway::new(registry, coordinator, validator, config.gateway.clone());

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/contacts", get(contacts::list_contacts))
        .route("/athletes/{athlete_id}", post(contacts::assign_athlete))
        .route(
            "/conversations/{user_id}/messages",
            get(messages::get_conversation).post(messages::send_message),
        )
        .route("/messages/read", post(messages::mark_read))
        .route("/messages/{message_id}/reactions", post(messages::add_reaction))
        .route("/unread-counts", get(messages::unread_counts))
        .route("/notifications", get(notifications::list))
        .route("/notifications/read", post(notifications::mark_read))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/workflow/events", post(notifications::workflow_event))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let gateway_routes = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(gateway);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(gateway_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    info!("Huddle server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /gateway. A `?token=` is checked before the upgrade so a bad token
/// is a plain 401; without one the socket must `identify` after connecting.
async fn ws_upgrade(
    State(gateway): State<Gateway>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match query.token {
        Some(token) => match gateway.validator.validate(&token) {
            Ok(identity) => ws
                .on_upgrade(move |socket| {
                    connection::handle_connection_authenticated(socket, gateway, identity)
                })
                .into_response(),
            Err(e) => {
                debug!("Gateway upgrade refused: {}", e);
                ApiError::from(e).into_response()
            }
        },
        None => ws
            .on_upgrade(move |socket| connection::handle_connection(socket, gateway))
            .into_response(),
    }
}

async fn health(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "online": gateway.registry.online_identities(),
    }))
}
