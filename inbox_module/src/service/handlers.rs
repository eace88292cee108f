use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tokio::task;
use tracing::{error, info, warn};

use crate::mailboxes::resolve_recipient_mailbox;
use crate::postmark::PostmarkInbound;
use crate::postman::{PostmanJob, POSTMAN_EVENT};

use super::state::AppState;

fn reply(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "message": message })))
}

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(super) async fn ingest_postman(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(err) = state.verifier.verify(&headers) {
        warn!("postman webhook rejected: {}", err);
        return reply(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let payload: PostmarkInbound = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("postman webhook bad json: {}", err);
            return reply(StatusCode::BAD_REQUEST, "Invalid JSON payload");
        }
    };

    let Some(recipient) = payload.recipient().map(str::to_string) else {
        warn!("postman webhook without recipient");
        return reply(StatusCode::NOT_FOUND, "Mailbox not found");
    };

    let store = state.store.clone();
    let lookup_recipient = recipient.clone();
    let resolved =
        task::spawn_blocking(move || resolve_recipient_mailbox(store.as_ref(), &lookup_recipient))
            .await;
    let mailbox = match resolved {
        Ok(Ok(mailbox)) => mailbox,
        Ok(Err(err)) if err.is_not_found() => {
            warn!("postman webhook for unknown mailbox {}: {}", recipient, err);
            return reply(StatusCode::NOT_FOUND, "Mailbox not found");
        }
        Ok(Err(err)) => {
            error!("postman mailbox lookup failed for {}: {}", recipient, err);
            return reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
        Err(err) => {
            error!("postman mailbox lookup task failed: {}", err);
            return reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    let job = PostmanJob::new(mailbox, payload, &body);
    let job_id = job.job_id;
    let dedupe_key = job.dedupe_key.clone();
    let mailbox_address = job.mailbox.mailbox.address();
    let queue = state.queue.clone();
    let enqueued = task::spawn_blocking(move || queue.enqueue(POSTMAN_EVENT, &job)).await;

    match enqueued {
        Ok(Ok(result)) if result.inserted => {
            info!(
                "postman job {} queued for {} (dedupe_key={})",
                job_id, mailbox_address, dedupe_key
            );
            reply(StatusCode::OK, "accepted")
        }
        Ok(Ok(_)) => {
            info!("postman duplicate ignored (dedupe_key={})", dedupe_key);
            reply(StatusCode::OK, "duplicate")
        }
        Ok(Err(err)) => {
            error!("postman enqueue failed: {}", err);
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
        Err(err) => {
            error!("postman enqueue task failed: {}", err);
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}
