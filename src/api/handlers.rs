use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::identity::Visitor;
use crate::service::{CreateLink, OwnerStats, QrImage, Resolution, UrlStats};
use crate::store::UrlRecord;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_QR_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Deserialize)]
pub struct CreateUrlRequest {
    pub title: String,
    pub long_url: String,
    #[serde(default)]
    pub custom_url: Option<String>,
    /// Base64 image, optionally as a `data:` URL
    #[serde(default)]
    pub qr_code: Option<String>,
}

pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    visitor: Visitor,
) -> Result<Response> {
    match state.redirects.resolve(&code, &visitor).await? {
        Resolution::Found { target_url, .. } => {
            Ok((StatusCode::FOUND, [(header::LOCATION, target_url)]).into_response())
        }
        Resolution::NotFound => Err(AppError::NotFound(format!("short url {}", code))),
    }
}

pub async fn create_url(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    user: AuthUser,
    Json(body): Json<CreateUrlRequest>,
) -> Result<(StatusCode, Json<UrlRecord>)> {
    let qr_image = body.qr_code.as_deref().map(decode_qr_image).transpose()?;
    let input = CreateLink {
        title: body.title,
        original_url: body.long_url,
        custom_url: body.custom_url,
        qr_image,
    };

    let record = state
        .links
        .create(&visitor.identifier, user.user_id(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_urls(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    user: AuthUser,
) -> Result<Json<Vec<UrlRecord>>> {
    let records = state.links.list(&visitor.identifier, user.user_id()).await?;
    Ok(Json(records))
}

pub async fn get_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    visitor: Visitor,
    user: AuthUser,
) -> Result<Json<UrlRecord>> {
    let record = state
        .links
        .get_one(&visitor.identifier, id, user.user_id())
        .await?;
    Ok(Json(record))
}

pub async fn delete_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    visitor: Visitor,
    user: AuthUser,
) -> Result<StatusCode> {
    state
        .links
        .delete(&visitor.identifier, id, user.user_id())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn url_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    visitor: Visitor,
    user: AuthUser,
) -> Result<Json<UrlStats>> {
    let stats = state
        .analytics
        .stats(&visitor.identifier, id, user.user_id())
        .await?;
    Ok(Json(stats))
}

pub async fn owner_stats(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    user: AuthUser,
) -> Result<Json<OwnerStats>> {
    let stats = state
        .analytics
        .owner_stats(&visitor.identifier, user.user_id())
        .await?;
    Ok(Json(stats))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "rate_limiter": {
            "redis": state.limiter.is_redis_available(),
            "degraded": state.limiter.is_degraded(),
        },
        "cache": state.cache.backend_name(),
    }))
}

/// Accepts raw base64 or `data:<type>;base64,<payload>`
fn decode_qr_image(raw: &str) -> Result<QrImage> {
    let invalid = || AppError::validation("qr_code", "must be a base64 encoded image");

    let (content_type, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest.split_once(',').ok_or_else(invalid)?;
            let content_type = meta.strip_suffix(";base64").ok_or_else(invalid)?;
            if !content_type.starts_with("image/") {
                return Err(invalid());
            }
            (content_type.to_string(), payload)
        }
        None => (DEFAULT_QR_CONTENT_TYPE.to_string(), raw),
    };

    let bytes = STANDARD.decode(payload.trim()).map_err(|_| invalid())?;
    if bytes.is_empty() {
        return Err(invalid());
    }

    Ok(QrImage {
        bytes,
        content_type,
    })
}
