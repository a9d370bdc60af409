//! `POST /v1/chat/completions` handler.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::GatewayError;
use crate::models::ChatCompletionRequest;
use crate::server::{
    error_response, provider_priority_from, request_id_from, AppState, REQUEST_ID_HEADER,
};

pub async fn create_chat_completion(
    State(core): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_from(&headers);
    let provider_priority = provider_priority_from(&headers);

    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            let err = GatewayError::BadRequest { message: rejection.body_text() };
            return error_response(&err, &request_id);
        }
    };

    match core.handle_completion(&request, &request_id, provider_priority.as_deref()).await {
        Ok(response) => (
            StatusCode::OK,
            [(REQUEST_ID_HEADER, request_id)],
            Json(response),
        )
            .into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}
