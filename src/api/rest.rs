use crate::config::ApiConfig;
use crate::context::AppContext;
use crate::error::Error;
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use log::{debug, info};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Parse(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::BAD_REQUEST.as_u16(),
            },
            _ => ApiError {
                message: err.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            },
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

pub struct RestApi {
    config: ApiConfig,
    context: AppContext,
}

impl RestApi {
    pub fn new(config: &ApiConfig, context: AppContext) -> Self {
        Self {
            config: config.clone(),
            context,
        }
    }

    /// Router with the ingestion route and optional response compression
    pub fn router(&self) -> Router {
        let app = Router::new()
            .route(&self.config.path, post(ingest_event))
            .with_state(self.context.clone());

        if self.config.compress {
            app.layer(CompressionLayer::new())
        } else {
            app
        }
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let app = self.router();

        let addr: SocketAddr = self.config.address.parse()?;

        info!("Event endpoint listening on {}{}", addr, self.config.path);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Event endpoint stopped");
        Ok(())
    }
}

/// Camera event ingestion. Only a malformed body changes the response.
async fn ingest_event(
    State(context): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());

    let event = context
        .parser
        .parse(&body, content_type, AppContext::now_ms())
        .map_err(|e| {
            debug!("Rejected event payload: {}", e);
            ApiError::from(e)
        })?;

    // failures past parsing are logged by process() and never reach the camera
    if let Ok(decision) = context.process(&event).await {
        debug!("{} accepted: {}", event.serial, decision.is_accepted());
    }

    Ok(StatusCode::OK)
}
