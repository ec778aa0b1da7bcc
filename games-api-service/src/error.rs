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

//! Failure taxonomy for the games API and its translation to HTTP.
//!
//! Handlers only deal with the conditions they can detect themselves (bad
//! id, bad payload, missing record). Everything else bubbles up as
//! [`AppError`] and is turned into a status and body by [`classify`].

use std::collections::BTreeMap;

use axum::{
    Json,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use games_common::{InvalidObjectId, iso_timestamp};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

/// Failures raised by a [`crate::store::GameStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The id could not be read as a 12-byte identifier.
    #[error("cast to object id failed for value {0:?}")]
    Cast(String),
    /// The record failed the storage schema, keyed by field.
    #[error("game validation failed: {0:?}")]
    Validation(BTreeMap<String, String>),
    /// A unique field already holds this value in another record.
    #[error("duplicate value for unique field {field}")]
    Duplicate { field: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<InvalidObjectId> for StoreError {
    fn from(error: InvalidObjectId) -> Self {
        Self::Cast(error.0)
    }
}

/// Which operation missed, so the 404 message can say so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Read,
    Update,
    Delete,
}

impl NotFoundKind {
    fn message(self) -> &'static str {
        match self {
            Self::Read => "Nenhum game foi encontrado com o ID fornecido",
            Self::Update => "Nenhum game foi encontrado com o ID fornecido para atualização",
            Self::Delete => "Nenhum game foi encontrado com o ID fornecido para exclusão",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("malformed game id")]
    InvalidId,
    #[error("invalid game payload: {0:?}")]
    InvalidPayload(Vec<String>),
    #[error("game not found ({0:?})")]
    NotFound(NotFoundKind),
    #[error("malformed JSON body: {0}")]
    MalformedJson(String),
    #[error("request timed out")]
    Timeout,
    #[error("no route for {method} {uri}")]
    RouteNotFound { method: Method, uri: Uri },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error envelope shared by every failing response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub erro: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detalhes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub timestamp: String,
}

impl ErrorBody {
    fn new(erro: &str, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            erro: erro.to_string(),
            message: message.into(),
            detalhes: None,
            field: None,
            timestamp: iso_timestamp(at),
        }
    }

    fn with_detalhes(mut self, detalhes: Value) -> Self {
        self.detalhes = Some(detalhes);
        self
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

pub fn classify(error: &AppError) -> (StatusCode, ErrorBody) {
    classify_at(error, Utc::now())
}

/// Maps an error to its status and body. The generic 500 never carries the
/// underlying cause.
pub fn classify_at(error: &AppError, at: DateTime<Utc>) -> (StatusCode, ErrorBody) {
    match error {
        AppError::InvalidId => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(
                "ID inválido",
                "O ID fornecido não possui o formato correto",
                at,
            ),
        ),
        AppError::InvalidPayload(violations) => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(
                "Dados inválidos",
                "Os dados fornecidos não passaram na validação",
                at,
            )
            .with_detalhes(Value::from(violations.clone())),
        ),
        AppError::NotFound(kind) => (
            StatusCode::NOT_FOUND,
            ErrorBody::new("Game não encontrado", kind.message(), at),
        ),
        AppError::Store(StoreError::Cast(_)) => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(
                "ID inválido",
                "O ID fornecido não possui um formato válido",
                at,
            ),
        ),
        AppError::Store(StoreError::Validation(violations)) => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(
                "Validação falhou",
                "Os dados fornecidos não passaram na validação",
                at,
            )
            .with_detalhes(Value::Object(
                violations
                    .iter()
                    .map(|(field, message)| (field.clone(), Value::from(message.as_str())))
                    .collect(),
            )),
        ),
        AppError::Store(StoreError::Duplicate { field }) => (
            StatusCode::CONFLICT,
            ErrorBody::new(
                "Recurso duplicado",
                format!("{field} já existe no sistema"),
                at,
            )
            .with_field(field.clone()),
        ),
        AppError::MalformedJson(_) => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(
                "JSON inválido",
                "O corpo da requisição contém JSON malformado",
                at,
            ),
        ),
        AppError::Timeout => (
            StatusCode::REQUEST_TIMEOUT,
            ErrorBody::new(
                "Tempo esgotado",
                "A requisição excedeu o tempo limite de processamento",
                at,
            ),
        ),
        AppError::RouteNotFound { method, uri } => (
            StatusCode::NOT_FOUND,
            ErrorBody::new(
                "Rota não encontrada",
                format!("A rota {method} {uri} não existe"),
                at,
            ),
        ),
        AppError::Store(StoreError::Backend(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::new(
                "Erro interno do servidor",
                "Algo deu errado no servidor. Tente novamente mais tarde.",
                at,
            ),
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = classify(&self);
        if status.is_server_error() {
            error!(status = %status, error = ?self, "request failed");
        } else {
            warn!(status = %status, error = %self, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn body_json(error: AppError) -> (StatusCode, Value) {
        let (status, body) = classify_at(&error, at());
        (status, serde_json::to_value(body).unwrap())
    }

    #[test]
    fn invalid_id_is_bad_request_without_details() {
        let (status, body) = body_json(AppError::InvalidId);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["erro"], "ID inválido");
        assert_eq!(body["timestamp"], "2026-10-18T12:00:00.000Z");
        assert!(body.get("detalhes").is_none());
        assert!(body.get("field").is_none());
    }

    #[test]
    fn invalid_payload_lists_every_violation() {
        let (status, body) = body_json(AppError::InvalidPayload(vec![
            "a".to_string(),
            "b".to_string(),
        ]));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["erro"], "Dados inválidos");
        assert_eq!(body["detalhes"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn not_found_message_depends_on_operation() {
        let (status, read) = body_json(AppError::NotFound(NotFoundKind::Read));
        let (_, update) = body_json(AppError::NotFound(NotFoundKind::Update));
        let (_, delete) = body_json(AppError::NotFound(NotFoundKind::Delete));

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(read["erro"], "Game não encontrado");
        assert!(update["message"].as_str().unwrap().ends_with("para atualização"));
        assert!(delete["message"].as_str().unwrap().ends_with("para exclusão"));
    }

    #[test]
    fn store_cast_failure_is_bad_request() {
        let (status, body) = body_json(StoreError::Cast("xyz".to_string()).into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["erro"], "ID inválido");
        assert_eq!(body["message"], "O ID fornecido não possui um formato válido");
    }

    #[test]
    fn store_validation_failure_maps_fields_to_messages() {
        let violations = BTreeMap::from([(
            "titulo".to_string(),
            "O título é obrigatório".to_string(),
        )]);
        let (status, body) = body_json(StoreError::Validation(violations).into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["erro"], "Validação falhou");
        assert_eq!(body["detalhes"]["titulo"], "O título é obrigatório");
    }

    #[test]
    fn duplicate_is_conflict_naming_the_field() {
        let (status, body) = body_json(
            StoreError::Duplicate {
                field: "titulo".to_string(),
            }
            .into(),
        );
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["field"], "titulo");
        assert_eq!(body["message"], "titulo já existe no sistema");
    }

    #[test]
    fn malformed_json_is_bad_request() {
        let (status, body) = body_json(AppError::MalformedJson("EOF".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["erro"], "JSON inválido");
        assert!(!body["message"].as_str().unwrap().contains("EOF"));
    }

    #[test]
    fn unmatched_route_names_method_and_uri() {
        let (status, body) = body_json(AppError::RouteNotFound {
            method: Method::PATCH,
            uri: Uri::from_static("/jogos?x=1"),
        });
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "A rota PATCH /jogos?x=1 não existe");
    }

    #[test]
    fn backend_failure_is_generic_internal_error() {
        let (status, body) = body_json(
            StoreError::Backend(anyhow::anyhow!("connection refused to 10.0.0.7")).into(),
        );
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["erro"], "Erro interno do servidor");
        assert!(!body.to_string().contains("10.0.0.7"));
    }

    #[test]
    fn timeout_is_request_timeout() {
        let (status, body) = body_json(AppError::Timeout);
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["erro"], "Tempo esgotado");
    }
}
