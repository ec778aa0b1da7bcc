// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod config;
mod error;
mod request_log;
mod store;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Path, Query, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use games_common::{ApiResponse, Game, GameFields, GameFilter, is_valid_object_id};
use lambda_http::run as lambda_run;
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::{DatabaseUrl, ServiceConfig},
    error::{AppError, NotFoundKind},
    request_log::{RequestLogger, log_requests},
    store::{DynamoGameStore, GameStore, InMemoryGameStore},
};

const JSON_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn GameStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "games_api_service=debug,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let store = connect_store(&config).await?;
    let logger = RequestLogger::spawn(config.log_dir.clone(), config.log_queue_capacity);
    let app = build_router(AppState { store }, logger, config.request_timeout);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running games-api-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    info!(bind_addr = %config.bind_addr, "games-api-service listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("games-api-service stopped");
    Ok(())
}

async fn connect_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn GameStore>> {
    let store: Arc<dyn GameStore> = match &config.database {
        DatabaseUrl::Memory => Arc::new(InMemoryGameStore::with_unique_fields(
            config.unique_fields.clone(),
        )),
        DatabaseUrl::Dynamo { table_name } => Arc::new(
            DynamoGameStore::connect(table_name.clone(), config.unique_fields.clone()).await,
        ),
    };

    store
        .ping()
        .await
        .with_context(|| format!("failed to connect to games store {:?}", config.database))?;
    info!(database = ?config.database, "games store connection established");
    Ok(store)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn build_router(state: AppState, logger: RequestLogger, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route(
            "/games",
            get(list_games_handler).post(create_game_handler),
        )
        .route(
            "/games/{game_id}",
            get(get_game_handler)
                .put(update_game_handler)
                .delete(delete_game_handler),
        )
        .fallback(route_not_found)
        .method_not_allowed_fallback(route_not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT_BYTES))
        .layer(middleware::from_fn_with_state(
            request_timeout,
            enforce_request_timeout,
        ))
        .layer(middleware::from_fn_with_state(logger, log_requests))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn enforce_request_timeout(
    State(request_timeout): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => AppError::Timeout.into_response(),
    }
}

async fn welcome() -> &'static str {
    "Bem Vindo ao Game"
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({"ok": true, "service": "games-api-service"}))
}

async fn route_not_found(method: Method, uri: Uri) -> AppError {
    AppError::RouteNotFound { method, uri }
}

/// A body sent without a JSON content type reads as `{}` so it fails field
/// validation rather than parsing.
fn json_payload(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(Value::Object(Default::default())),
        Err(rejection) => Err(AppError::MalformedJson(rejection.body_text())),
    }
}

/// An id segment that does not decode (bad percent-encoding, invalid UTF-8)
/// is as invalid as one with the wrong shape.
fn game_id_from_path(
    game_id: Result<Path<String>, PathRejection>,
) -> Result<String, AppError> {
    match game_id {
        Ok(Path(game_id)) if is_valid_object_id(&game_id) => Ok(game_id),
        Ok(_) | Err(_) => Err(AppError::InvalidId),
    }
}

async fn create_game_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Game>>), AppError> {
    let payload = json_payload(payload)?;
    let fields = GameFields::from_payload(&payload).map_err(AppError::InvalidPayload)?;
    let game = state.store.create(fields).await?;

    info!(game_id = %game.id, titulo = %game.titulo, "game created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new("Game criado com sucesso", game)),
    ))
}

async fn list_games_handler(
    State(state): State<AppState>,
    filter: Result<Query<GameFilter>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Game>>>, AppError> {
    let Query(filter) =
        filter.map_err(|rejection| AppError::InvalidPayload(vec![rejection.body_text()]))?;
    let games = state.store.find(&filter).await?;
    Ok(Json(ApiResponse::list("Games encontrados", games)))
}

async fn get_game_handler(
    State(state): State<AppState>,
    game_id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Game>>, AppError> {
    let game_id = game_id_from_path(game_id)?;
    let game = state
        .store
        .find_by_id(&game_id)
        .await?
        .ok_or(AppError::NotFound(NotFoundKind::Read))?;
    Ok(Json(ApiResponse::new("Game encontrado", game)))
}

async fn update_game_handler(
    State(state): State<AppState>,
    game_id: Result<Path<String>, PathRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ApiResponse<Game>>, AppError> {
    let payload = json_payload(payload)?;
    let game_id = game_id_from_path(game_id)?;
    let fields = GameFields::from_payload(&payload).map_err(AppError::InvalidPayload)?;

    let game = state
        .store
        .find_by_id_and_update(&game_id, fields)
        .await?
        .ok_or(AppError::NotFound(NotFoundKind::Update))?;

    info!(game_id = %game.id, "game updated");
    Ok(Json(ApiResponse::new("Game atualizado com sucesso", game)))
}

async fn delete_game_handler(
    State(state): State<AppState>,
    game_id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Game>>, AppError> {
    let game_id = game_id_from_path(game_id)?;
    let game = state
        .store
        .find_by_id_and_delete(&game_id)
        .await?
        .ok_or(AppError::NotFound(NotFoundKind::Delete))?;

    info!(game_id = %game.id, "game deleted");
    Ok(Json(ApiResponse::new("Game excluído com sucesso", game)))
}
