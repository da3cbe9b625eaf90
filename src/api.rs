//! HTTP surface for Rusty RAG.
//!
//! - `POST /api/v1/hackrx/run` – Answer questions about one document. Body
//!   `{ "documents": "<url>", "questions": ["..."] }`, response `{ "answers": ["..."] }`.
//!   Requires `Authorization: Bearer <API_BEARER_TOKEN>` when a token is configured.
//! - `GET /health` – Liveness probe.
//! - `GET /metrics` – Pipeline counters.
//!
//! Failures are returned as `{ "error": { "kind", "stage", "message" } }`.

use crate::metrics::MetricsSnapshot;
use crate::pipeline::{AnswerApi, ErrorKind, PipelineError, QueryRequest, QueryResponse, Stage};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

struct AppState<S> {
    service: Arc<S>,
    bearer_token: Option<String>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            bearer_token: self.bearer_token.clone(),
        }
    }
}

/// Build the HTTP router. Authentication is disabled when `bearer_token` is `None`.
pub fn create_router<S>(service: Arc<S>, bearer_token: Option<String>) -> Router
where
    S: AnswerApi + 'static,
{
    if bearer_token.is_none() {
        tracing::warn!(
            "API_BEARER_TOKEN not set; the run endpoint accepts unauthenticated requests"
        );
    }
    Router::new()
        .route("/api/v1/hackrx/run", post(run_query::<S>))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(AppState {
            service,
            bearer_token,
        })
}

/// Answer the questions of one request.
async fn run_query<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError>
where
    S: AnswerApi,
{
    authorize(state.bearer_token.as_deref(), &headers)?;
    let Json(request) = body.map_err(|rejection| {
        PipelineError::bad_request(format!("invalid request body: {}", rejection.body_text()))
    })?;
    let questions = request.questions.len();

    let response = state.service.run(request).await?;
    tracing::info!(questions, "Run request completed");
    Ok(Json(response))
}

fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), PipelineError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(PipelineError::new(
            Stage::Received,
            ErrorKind::Unauthorized,
            "bearer token rejected",
        )),
        None => Err(PipelineError::new(
            Stage::Received,
            ErrorKind::Unauthorized,
            "missing bearer token",
        )),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_metrics<S>(State(state): State<AppState<S>>) -> Json<MetricsSnapshot>
where
    S: AnswerApi,
{
    Json(state.service.metrics_snapshot())
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: ErrorKind,
    stage: Stage,
    message: &'a str,
}

struct AppError(PipelineError);

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest | ErrorKind::UnsupportedFormat => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::EmptyDocument | ErrorKind::Parse => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Fetch | ErrorKind::Embedding | ErrorKind::Index | ErrorKind::Generation => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Configuration | ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = self.0;
        let body = ErrorBody {
            error: ErrorDetail {
                kind: error.kind,
                stage: error.stage,
                message: &error.message,
            },
        };
        (status_for(error.kind), Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::metrics::MetricsSnapshot;
    use crate::pipeline::{AnswerApi, ErrorKind, PipelineError, QueryRequest, QueryResponse, Stage};
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct StubAnswerService {
        calls: Arc<Mutex<Vec<QueryRequest>>>,
        failure: Option<PipelineError>,
    }

    impl StubAnswerService {
        fn new(failure: Option<PipelineError>) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                failure,
            }
        }

        async fn recorded_calls(&self) -> Vec<QueryRequest> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl AnswerApi for StubAnswerService {
        async fn run(&self, request: QueryRequest) -> Result<QueryResponse, PipelineError> {
            let answers = request
                .questions
                .iter()
                .map(|question| format!("answer: {question}"))
                .collect();
            self.calls.lock().await.push(request);
            match &self.failure {
                Some(error) => Err(error.clone()),
                None => Ok(QueryResponse { answers }),
            }
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_processed: 4,
                questions_answered: 9,
                ..MetricsSnapshot::default()
            }
        }
    }

    fn app(service: &Arc<StubAnswerService>) -> Router {
        create_router(service.clone(), Some("secret".into()))
    }

    fn run_request(token: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/hackrx/run")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    #[tokio::test]
    async fn run_route_returns_answers_in_order() {
        let service = Arc::new(StubAnswerService::new(None));
        let payload = json!({
            "documents": "https://host/policy.pdf",
            "questions": ["grace period?", "waiting period?"]
        });

        let response = app(&service)
            .oneshot(run_request(Some("secret"), payload.to_string()))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(
            json["answers"],
            json!(["answer: grace period?", "answer: waiting period?"])
        );
        let calls = service.recorded_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].documents.as_deref(),
            Some("https://host/policy.pdf")
        );
    }

    #[tokio::test]
    async fn wrong_or_missing_token_is_unauthorized() {
        let service = Arc::new(StubAnswerService::new(None));
        let payload = json!({ "documents": "https://host/a.pdf", "questions": ["q"] }).to_string();

        for token in [Some("wrong"), None] {
            let response = app(&service)
                .oneshot(run_request(token, payload.clone()))
                .await
                .expect("router response");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let json = json_body(response).await;
            assert_eq!(json["error"]["kind"], "unauthorized");
        }
        assert!(service.recorded_calls().await.is_empty());
    }

    #[tokio::test]
    async fn token_is_optional_when_not_configured() {
        let service = Arc::new(StubAnswerService::new(None));
        let payload = json!({ "documents": "https://host/a.pdf", "questions": ["q"] });

        let response = create_router(service.clone(), None)
            .oneshot(run_request(None, payload.to_string()))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let service = Arc::new(StubAnswerService::new(None));
        let response = app(&service)
            .oneshot(run_request(Some("secret"), "{not json".into()))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["kind"], "bad_request");
        assert_eq!(json["error"]["stage"], "received");
    }

    #[tokio::test]
    async fn pipeline_errors_map_to_status_codes() {
        let cases = [
            (ErrorKind::UnsupportedFormat, StatusCode::BAD_REQUEST),
            (ErrorKind::EmptyDocument, StatusCode::UNPROCESSABLE_ENTITY),
            (ErrorKind::Generation, StatusCode::BAD_GATEWAY),
            (ErrorKind::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (ErrorKind::Configuration, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        let payload = json!({ "documents": "https://host/a.pdf", "questions": ["q"] }).to_string();

        for (kind, status) in cases {
            let failure = PipelineError::new(Stage::Parsed, kind, "scripted");
            let service = Arc::new(StubAnswerService::new(Some(failure)));
            let response = app(&service)
                .oneshot(run_request(Some("secret"), payload.clone()))
                .await
                .expect("router response");
            assert_eq!(response.status(), status, "{kind:?}");
            let json = json_body(response).await;
            assert_eq!(json["error"]["stage"], "parsed");
            let message = json["error"]["message"].as_str().unwrap_or_default();
            assert!(message.ends_with("scripted"), "{message}");
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let service = Arc::new(StubAnswerService::new(None));
        let response = app(&service)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn metrics_expose_snapshot() {
        let service = Arc::new(StubAnswerService::new(None));
        let response = app(&service)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        let json = json_body(response).await;
        assert_eq!(json["documents_processed"], 4);
        assert_eq!(json["questions_answered"], 9);
        assert_eq!(json["failed_requests"], 0);
    }
}
