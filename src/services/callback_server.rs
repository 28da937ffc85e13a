//! Overlord callback listener.
//!
//! Receives Minion event POSTs and serves the answer-polling endpoint.
//! Reports are forwarded into the scheduler's event queue; the server never
//! mutates state itself.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::services::scheduler::{AnswerBuffer, OverlordEvent, ReportPayload};

/// Shared handler state.
#[derive(Clone)]
pub struct CallbackState {
    pub event_tx: mpsc::Sender<OverlordEvent>,
    pub answers: AnswerBuffer,
}

/// Build the callback router.
pub fn router(state: CallbackState) -> Router {
    Router::new()
        .route("/minion/report", post(handle_report))
        .route("/minion/answer/{minion_id}", get(handle_answer_poll))
        .with_state(state)
}

/// Bind and serve the callback listener. Fatal when the bind fails.
pub async fn serve(state: CallbackState, bind_addr: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "Callback listener bound");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn handle_report(
    State(state): State<CallbackState>,
    Json(payload): Json<ReportPayload>,
) -> (StatusCode, Json<Value>) {
    tracing::debug!(
        minion_id = payload.minion_id,
        event = payload.event,
        "Callback received"
    );

    if state
        .event_tx
        .send(OverlordEvent::MinionReport(payload))
        .await
        .is_err()
    {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "scheduler unavailable"})),
        );
    }
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct AnswerQuery {
    question_id: String,
}

async fn handle_answer_poll(
    State(state): State<CallbackState>,
    Path(minion_id): Path<String>,
    Query(query): Query<AnswerQuery>,
) -> Json<Value> {
    match state.answers.get(&minion_id, &query.question_id) {
        Some(answer) => Json(json!({"answered": true, "answer": answer})),
        None => Json(json!({"answered": false})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> (CallbackState, mpsc::Receiver<OverlordEvent>) {
        let (event_tx, event_rx) = mpsc::channel(8);
        (
            CallbackState {
                event_tx,
                answers: AnswerBuffer::default(),
            },
            event_rx,
        )
    }

    #[tokio::test]
    async fn report_is_forwarded_to_scheduler() {
        let (state, mut event_rx) = state();
        let app = router(state);

        let body = json!({
            "minion_id": "minion-a",
            "event": "heartbeat",
            "issue": 42,
            "message": "working",
            "data": {},
            "timestamp": "2025-06-01T00:00:00Z"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/minion/report")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        match event_rx.try_recv().unwrap() {
            OverlordEvent::MinionReport(payload) => {
                assert_eq!(payload.minion_id, "minion-a");
                assert_eq!(payload.event, "heartbeat");
                assert_eq!(payload.issue, 42);
            }
            _ => panic!("expected a MinionReport event"),
        }
    }

    #[tokio::test]
    async fn answer_poll_reads_buffer() {
        let (state, _event_rx) = state();
        state.answers.put("minion-a", "q-1", "use sqlite".to_string());
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/minion/answer/minion-a?question_id=q-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["answered"], true);
        assert_eq!(value["answer"], "use sqlite");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/minion/answer/minion-a?question_id=q-2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["answered"], false);
    }
}
