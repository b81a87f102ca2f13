use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, ensure};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use raxm_protocol::{DataMap, ErrorClass, PROTOCOL_HEADER, RaxmError};
use raxm_runtime::{DEFAULT_UPLOAD_TTL_SECS, Environment, Raxm, RenderRequest};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod demo;
mod uploads;

use crate::uploads::{LocalUploadStore, MemoryUploadStore, StoreFull, UploadStore};

/// Path every signed upload URL points at.
const UPLOAD_PATH: &str = "/raxm/upload-file";

#[derive(Debug, Parser)]
#[command(name = "raxm-server")]
#[command(about = "Serves Raxm components over HTTP")]
struct Cli {
    /// Secret used for memo checksums and upload URL signatures.
    #[arg(long, env = "RAXM_APP_KEY", hide_env_values = true)]
    app_key: String,
    #[arg(long, env = "RAXM_LISTEN", default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
    #[arg(long, env = "RAXM_ENV", default_value = "development")]
    environment: Environment,
    /// Keep uploads on disk here instead of in memory. Required in production.
    #[arg(long, env = "RAXM_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,
    #[arg(long, env = "RAXM_UPLOAD_TTL_SECS", default_value_t = DEFAULT_UPLOAD_TTL_SECS)]
    upload_ttl_secs: i64,
}

#[derive(Clone)]
struct AppState {
    raxm: Raxm,
    uploads: Arc<dyn UploadStore>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadQuery {
    expires: Option<i64>,
    signature: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    class: Option<ErrorClass>,
    detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            class: None,
            detail: None,
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    fn from_store(error: anyhow::Error) -> Self {
        if let Some(full) = error.downcast_ref::<StoreFull>() {
            warn!(%full, "upload refused");
            return Self::new(StatusCode::PAYLOAD_TOO_LARGE, full.to_string());
        }
        error!(error = %format!("{error:#}"), "upload store failed");
        Self::internal("failed to store upload")
    }

    /// Map a protocol failure to its HTTP status. Outside production the
    /// body also carries the debug form of the error.
    fn from_raxm(error: RaxmError, environment: Environment) -> Self {
        let class = error.class();
        let status = match class {
            ErrorClass::Integrity => StatusCode::FORBIDDEN,
            ErrorClass::Protocol => StatusCode::BAD_REQUEST,
            ErrorClass::UploadSignature => StatusCode::UNAUTHORIZED,
            ErrorClass::Application => match error {
                RaxmError::ComponentNotFound(_)
                | RaxmError::MethodNotFound { .. }
                | RaxmError::PropertyNotFound { .. } => StatusCode::NOT_FOUND,
                RaxmError::PropertyTypeMismatch { .. } | RaxmError::InvalidPath(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        if status.is_server_error() {
            error!(%error, ?class, "request failed");
        } else {
            warn!(%error, ?class, status = status.as_u16(), "request rejected");
        }

        let message = if status.is_server_error() && environment.is_production() {
            "internal error".to_owned()
        } else {
            error.to_string()
        };
        Self {
            status,
            message,
            class: Some(class),
            detail: (!environment.is_production()).then(|| format!("{error:?}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(class) = self.class {
            body["class"] = json!(class);
        }
        if let Some(detail) = self.detail {
            body["detail"] = json!(detail);
        }
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

impl AppState {
    fn reject(&self, error: RaxmError) -> ApiError {
        ApiError::from_raxm(error, self.raxm.environment())
    }

    fn require_protocol_header(&self, headers: &HeaderMap) -> ApiResult<()> {
        if headers.contains_key(PROTOCOL_HEADER) {
            Ok(())
        } else {
            Err(self.reject(RaxmError::MissingHeader(PROTOCOL_HEADER.to_owned())))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    ensure!(!cli.app_key.trim().is_empty(), "RAXM_APP_KEY must not be empty");
    ensure!(cli.upload_ttl_secs > 0, "upload ttl must be positive");
    ensure!(
        cli.upload_dir.is_some() || !cli.environment.is_production(),
        "RAXM_UPLOAD_DIR must be set in production"
    );

    let raxm = demo::register(
        Raxm::builder(cli.app_key.as_bytes())
            .environment(cli.environment)
            .upload_ttl(chrono::Duration::seconds(cli.upload_ttl_secs)),
    )
    .build();

    let uploads: Arc<dyn UploadStore> = match &cli.upload_dir {
        Some(dir) => Arc::new(LocalUploadStore::new(dir)),
        None => Arc::new(MemoryUploadStore::default()),
    };

    let app = router(AppState { raxm, uploads });

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(
        listen = %cli.listen,
        environment = %cli.environment,
        uploads = ?cli.upload_dir,
        "raxm-server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/raxm/message/{name}", post(message))
        .route("/raxm/render/{name}", get(render))
        .route("/raxm/upload-url", post(upload_url))
        .route(UPLOAD_PATH, post(upload_file))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "raxm-server",
        "components": state.raxm.registry().names(),
    }))
}

async fn message(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    state.require_protocol_header(&headers)?;
    let bytes = state
        .raxm
        .handle_bytes(&name, &body)
        .map_err(|error| state.reject(error))?;

    let mut response = bytes.into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

/// Initial render. Query values are read as JSON when they parse, so
/// `?count=3` mounts an integer.
async fn render(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Html<String>> {
    let params: DataMap = query
        .into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            (key, value)
        })
        .collect();

    let mounted = state
        .raxm
        .mount(&name, &params, &RenderRequest::new(format!("/raxm/render/{name}")))
        .map_err(|error| state.reject(error))?;
    Ok(Html(mounted.html))
}

async fn upload_url(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.require_protocol_header(&headers)?;
    let signed = state.raxm.uploads().sign(UPLOAD_PATH, Utc::now());
    Ok(Json(json!({
        "url": signed.to_string(),
        "expires": signed.expires,
    })))
}

/// Stores every file part of a multipart body once the URL signature holds.
async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Value>> {
    state
        .raxm
        .uploads()
        .verify(
            UPLOAD_PATH,
            query.expires,
            query.signature.as_deref(),
            Utc::now(),
        )
        .map_err(|error| state.reject(error.into()))?;

    let mut multipart =
        multipart.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;
    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::new(error.status(), error.body_text()))?
    {
        let Some(name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::new(error.status(), error.body_text()))?;
        let upload = state
            .uploads
            .store(&name, &bytes)
            .await
            .map_err(ApiError::from_store)?;
        info!(id = %upload.id, size = upload.size, "upload accepted");
        stored.push(upload);
    }

    if stored.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "no file part in upload"));
    }
    Ok(Json(json!({ "files": stored })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use raxm_protocol::{MessageRequest, Update, WireCodec};
    use tower::ServiceExt;

    fn state(environment: Environment) -> (AppState, Arc<MemoryUploadStore>) {
        state_with_store(environment, MemoryUploadStore::default())
    }

    fn state_with_store(
        environment: Environment,
        store: MemoryUploadStore,
    ) -> (AppState, Arc<MemoryUploadStore>) {
        let raxm = demo::register(Raxm::builder("server-test-key").environment(environment)).build();
        let store = Arc::new(store);
        let uploads: Arc<dyn UploadStore> = store.clone();
        (AppState { raxm, uploads }, store)
    }

    const BOUNDARY: &str = "XBOUNDARY";

    fn multipart_body(files: &[(&str, &str)]) -> Body {
        let mut body = String::new();
        for (name, contents) in files {
            body.push_str(&format!(
                concat!(
                    "--{boundary}\r\n",
                    "Content-Disposition: form-data; name=\"files[]\"; filename=\"{name}\"\r\n",
                    "Content-Type: application/octet-stream\r\n\r\n",
                    "{contents}\r\n"
                ),
                boundary = BOUNDARY,
                name = name,
                contents = contents,
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Body::from(body)
    }

    fn multipart_request(uri: &str, files: &[(&str, &str)]) -> Request<Body> {
        Request::post(uri)
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(multipart_body(files))
            .unwrap()
    }

    async fn signed_upload_url(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::post("/raxm/upload-url")
                    .header(PROTOCOL_HEADER, "true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["url"].as_str().unwrap().to_owned()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn counter_request(state: &AppState) -> MessageRequest {
        let mounted = state
            .raxm
            .mount("counter", &DataMap::new(), &RenderRequest::new("/"))
            .unwrap();
        MessageRequest {
            fingerprint: mounted.initial.fingerprint,
            server_memo: mounted.initial.server_memo,
            updates: vec![Update::call_method("increment", Vec::new())],
        }
    }

    fn post_message(name: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/raxm/message/{name}"))
            .header(PROTOCOL_HEADER, "true")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_lists_components() {
        let (state, _) = state(Environment::Development);
        let response = router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["components"].as_array().unwrap().contains(&json!("counter")));
    }

    #[tokio::test]
    async fn render_mounts_with_query_params() {
        let (state, _) = state(Environment::Development);
        let response = router(state)
            .oneshot(
                Request::get("/raxm/render/counter?count=7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("axm:initial-data"));
        assert!(html.contains("<span>7</span>"));
    }

    #[tokio::test]
    async fn render_of_unknown_component_is_not_found() {
        let (state, _) = state(Environment::Development);
        let response = router(state)
            .oneshot(Request::get("/raxm/render/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["class"], "application");
    }

    #[tokio::test]
    async fn message_round_trip() {
        let (state, _) = state(Environment::Development);
        let body = WireCodec::encode_request(&counter_request(&state)).unwrap();
        let response = router(state)
            .oneshot(post_message("counter", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let decoded = WireCodec::decode_response(&bytes).unwrap();
        assert_eq!(decoded.server_memo.data["count"], json!(1));
        assert_eq!(decoded.effects.dirty, vec!["count".to_owned()]);
    }

    #[tokio::test]
    async fn message_without_header_is_a_protocol_error() {
        let (state, _) = state(Environment::Development);
        let body = WireCodec::encode_request(&counter_request(&state)).unwrap();
        let request = Request::post("/raxm/message/counter")
            .body(Body::from(body))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["class"], "protocol");
    }

    #[tokio::test]
    async fn message_to_other_endpoint_is_rejected() {
        let (state, _) = state(Environment::Development);
        let body = WireCodec::encode_request(&counter_request(&state)).unwrap();
        let response = router(state)
            .oneshot(post_message("contact-form", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tampered_memo_is_forbidden_and_hides_detail_in_production() {
        let (state, _) = state(Environment::Production);
        let mut request = counter_request(&state);
        request.server_memo.data.insert("count".into(), json!(1000));
        let body = WireCodec::encode_request(&request).unwrap();

        let response = router(state)
            .oneshot(post_message("counter", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["class"], "integrity");
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn signed_multipart_upload_stores_each_file() {
        let (state, store) = state(Environment::Development);
        let app = router(state);
        let url = signed_upload_url(&app).await;
        assert!(url.starts_with(UPLOAD_PATH));

        let response = app
            .oneshot(multipart_request(
                &url,
                &[("avatar.png", "file-bytes"), ("resume.pdf", "cv")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["name"], "avatar.png");
        assert_eq!(files[0]["size"], 10);
        assert_eq!(files[1]["size"], 2);
        let id = files[0]["id"].as_str().unwrap();
        assert_eq!(store.get(id).as_deref(), Some(&b"file-bytes"[..]));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn signed_upload_without_multipart_body_is_rejected() {
        let (state, store) = state(Environment::Development);
        let app = router(state);
        let url = signed_upload_url(&app).await;

        let response = app
            .clone()
            .oneshot(Request::post(url.as_str()).body(Body::from("file-bytes")).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);

        let text_only = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n--{BOUNDARY}--\r\n"
        );
        let response = app
            .oneshot(
                Request::post(url.as_str())
                    .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
                    .body(Body::from(text_only))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "no file part in upload");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn full_memory_store_answers_payload_too_large() {
        let (state, store) = state_with_store(Environment::Development, MemoryUploadStore::with_limit(4));
        let app = router(state);
        let url = signed_upload_url(&app).await;

        let response = app
            .oneshot(multipart_request(&url, &[("big.bin", "file-bytes")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(json_body(response).await["error"].as_str().unwrap().contains("full"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn forged_upload_signature_is_unauthorized() {
        let (state, store) = state(Environment::Development);
        let expires = Utc::now().timestamp() + 60;
        let uri = format!("{UPLOAD_PATH}?expires={expires}&signature={}", "ab".repeat(32));
        let response = router(state)
            .oneshot(multipart_request(&uri, &[("x.txt", "x")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["class"], "upload_signature");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn upload_without_signature_is_unauthorized() {
        let (state, _) = state(Environment::Development);
        let response = router(state)
            .oneshot(multipart_request(UPLOAD_PATH, &[("x.txt", "x")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
