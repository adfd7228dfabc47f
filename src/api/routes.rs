//! HTTP handlers over the download controller

use crate::api::messages::{
    BatchRequest, BatchStartResponse, BatchStatusResponse, DeleteRequest, DeleteResponse,
    HistoryQuery, HistoryResponse, MessageResponse, StartRequest, StartResponse, StatusResponse,
    VideoRequest,
};
use crate::controller::manager::DownloadController;
use crate::controller::state::{DownloadKind, StartOptions};
use crate::utils::error::LoaderError;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub controller: DownloadController,
}

impl AppState {
    pub fn new(controller: DownloadController) -> Self {
        Self { controller }
    }
}

/// Error reply: `{status: "Error", message}` with a matching status code
#[derive(Debug)]
pub struct ApiError(pub LoaderError);

impl From<LoaderError> for ApiError {
    fn from(error: LoaderError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0 {
            LoaderError::Conflict => StatusCode::CONFLICT,
            LoaderError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(kind = self.0.kind(), "Request failed: {}", self.0);
        }
        (status, Json(MessageResponse::error(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start_download", post(start_download))
        .route("/start_video_download", post(start_video_download))
        .route("/cancel_download", post(cancel_download))
        .route("/download_status", get(download_status))
        .route("/start_batch_download", post(start_batch_download))
        .route("/batch_download_status", get(batch_download_status))
        .route("/download_history", get(download_history))
        .route("/delete_download", post(delete_download))
        .with_state(state)
}

pub async fn start_download(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> ApiResult<StartResponse> {
    let started = state
        .controller
        .start(&req.url, req.save_path, req.options)
        .await?;
    Ok(Json(StartResponse {
        status: "Started",
        job_id: started.job_id,
        file_name: started.file_name,
    }))
}

pub async fn start_video_download(
    State(state): State<AppState>,
    Json(req): Json<VideoRequest>,
) -> ApiResult<StartResponse> {
    let options = StartOptions {
        kind: DownloadKind::Media,
        subtitles: req.subtitles,
        quality: req.quality,
        ..Default::default()
    };
    let started = state.controller.start(&req.url, req.save_path, options).await?;
    Ok(Json(StartResponse {
        status: "Started",
        job_id: started.job_id,
        file_name: started.file_name,
    }))
}

pub async fn cancel_download(State(state): State<AppState>) -> Json<MessageResponse> {
    if state.controller.cancel().await {
        info!("Download cancelled via API");
        Json(MessageResponse::success("Download cancelled"))
    } else {
        Json(MessageResponse::success("No active download"))
    }
}

pub async fn download_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.controller.status().into())
}

pub async fn start_batch_download(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<BatchStartResponse> {
    let accepted = state.controller.batch_start(&req.urls, req.save_path).await?;
    Ok(Json(BatchStartResponse {
        status: "Started",
        accepted,
    }))
}

pub async fn batch_download_status(State(state): State<AppState>) -> Json<BatchStatusResponse> {
    Json(state.controller.batch_status().into())
}

pub async fn download_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(HistoryResponse {
        status: "Success",
        history: state.controller.history().list(limit).await,
    })
}

pub async fn delete_download(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<DeleteResponse> {
    let removed = state
        .controller
        .history()
        .remove(&req.file_path, req.delete_file)
        .await?;
    Ok(Json(DeleteResponse {
        status: "Success",
        removed,
    }))
}
