//! Conversion job route handlers.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use dr_core::{Error, JobId, JobStatus, JobView};

use crate::context::AppContext;
use crate::error::AppError;
use crate::service::{Artifact, QueueSnapshot, SubmitRequest};

/// POST /convert response.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub success: bool,
    pub job_id: JobId,
    pub status: JobStatus,
    pub correlation_token: Option<String>,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
}

/// Ids that could never have been issued are reported as unknown.
fn parse_id(raw: &str) -> Result<JobId, AppError> {
    JobId::parse(raw).map_err(|_| AppError(Error::not_found("job", raw)))
}

fn multipart_error(e: MultipartError, max_upload_bytes: u64) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError(Error::FileTooLarge {
            max: max_upload_bytes,
        })
    } else {
        AppError(Error::Validation(format!(
            "invalid multipart body: {}",
            e.body_text()
        )))
    }
}

/// POST /convert
///
/// Multipart fields: `file` (required), `job_id`, `callback_url`,
/// `correlation_token`, `endpoint`.
pub async fn convert(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<ConvertResponse>, AppError> {
    let max = ctx.config.conversion.max_upload_bytes;
    let mut req = SubmitRequest::default();
    let mut has_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                req.filename = field.file_name().unwrap_or_default().to_string();
                req.bytes = field.bytes().await.map_err(|e| multipart_error(e, max))?;
                has_file = true;
            }
            "job_id" | "callback_url" | "correlation_token" | "endpoint" => {
                let value = field.text().await.map_err(|e| multipart_error(e, max))?;
                let slot = match name.as_str() {
                    "job_id" => &mut req.job_id,
                    "callback_url" => &mut req.callback_url,
                    "correlation_token" => &mut req.correlation_token,
                    _ => &mut req.endpoint_variant,
                };
                *slot = Some(value);
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    if !has_file {
        return Err(Error::Validation("multipart field 'file' is required".into()).into());
    }

    let view = ctx.service.submit(req).await?;
    Ok(Json(ConvertResponse {
        success: true,
        job_id: view.id,
        status: view.status,
        correlation_token: view.correlation_token,
        message: "Conversion request received",
    }))
}

/// GET /status/{id}
pub async fn status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.service.status(&id)?))
}

/// GET /download/{id}
pub async fn download(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let artifact = ctx.service.artifact(&id).await?;
    Ok(pdf_response(artifact, &id, "attachment"))
}

/// GET /pdf/{id}
///
/// Same artifact as `/download`, served for in-browser viewing.
pub async fn view_pdf(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let artifact = ctx.service.artifact(&id).await?;
    Ok(pdf_response(artifact, &id, "inline"))
}

fn pdf_response(artifact: Artifact, id: &JobId, disposition: &str) -> Response {
    let safe_name = artifact
        .download_name
        .chars()
        .all(|c| (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\');
    let name = if safe_name {
        artifact.download_name
    } else {
        format!("{id}.pdf")
    };

    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("{disposition}; filename=\"{name}\""),
            ),
        ],
        artifact.bytes,
    )
        .into_response()
}

/// DELETE /cleanup/{id}
pub async fn cleanup(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<CleanupResponse>, AppError> {
    let id = parse_id(&id)?;
    ctx.service.cleanup(&id).await?;
    Ok(Json(CleanupResponse {
        success: true,
        message: format!("Cleanup completed for {id}"),
    }))
}

/// GET /queue/status
pub async fn queue_status(State(ctx): State<AppContext>) -> Json<QueueSnapshot> {
    Json(ctx.service.queue_snapshot())
}
