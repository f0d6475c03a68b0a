use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::catalog::query::Predicate;
use crate::catalog::{parse_id, BatchResult, MediaEntry, MediaType, NewMedia};
use crate::database::AppState;
use crate::error::AppError;
use crate::reconcile::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::structs::{
    AddDescriptionRequest, ApiResponse, BatchAddDescriptionRequest, BatchCreateRequest,
    IdRequest, MediaListRequest, MediaListResponse, MediaView, RemoveDescriptionRequest,
    RemoveMediaResponse, UpdateDescriptionRequest, UpdateMediaRequest,
};
use crate::upload_routes::request_base_url;
use crate::url_canon::file_url;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(create_media))
        .route("/list", post(list_media))
        .route("/findById", post(find_media_by_id))
        .route("/update", post(update_media))
        .route("/remove", post(remove_media))
        .route("/addDescription", post(add_description))
        .route("/removeDescription", post(remove_description))
        .route("/updateDescription", post(update_description))
        .route("/batchCreate", post(batch_create))
        .route("/batchAddDescription", post(batch_add_description))
}

fn view(base_url: &str, entry: MediaEntry) -> MediaView {
    MediaView {
        full_url: file_url(base_url, &entry.url),
        entry,
    }
}

fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    request_base_url(headers, &state.file_base_url)
}

fn id_from(operation: &'static str, raw: &str) -> Result<uuid::Uuid, AppError> {
    parse_id(raw).map_err(|err| AppError::from_media(operation, err))
}

async fn create_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewMedia>,
) -> Result<ApiResponse<MediaView>, AppError> {
    let entry = state
        .catalog
        .create(req)
        .await
        .map_err(|err| AppError::from_media("create_media", err))?;
    Ok(ApiResponse::ok(view(&base_url(&state, &headers), entry)))
}

/// Filter for `/media/list`; blank fields are ignored.
fn media_filter(req: &MediaListRequest) -> Result<Predicate, AppError> {
    let non_blank = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let mut filter = Predicate::All;

    if let Some(raw) = non_blank(&req.media_type) {
        let media_type =
            MediaType::parse(&raw).map_err(|err| AppError::from_media("list_media", err))?;
        filter = filter.and(Predicate::TypeEq(media_type));
    }
    if let Some(url) = non_blank(&req.url) {
        filter = filter.and(Predicate::UrlEq(url));
    }
    if let Some(filename) = non_blank(&req.filename) {
        filter = filter.and(Predicate::FilenameEq(filename));
    }
    if let Some(mimetype) = non_blank(&req.mimetype) {
        filter = filter.and(Predicate::MimeTypeEq(mimetype));
    }
    if let Some(flag) = req.is_added_to_library {
        filter = filter.and(Predicate::AddedToLibrary(flag));
    }
    if let Some(keywords) = req
        .description
        .as_deref()
        .and_then(Predicate::any_description_keyword)
    {
        filter = filter.and(keywords);
    }
    Ok(filter)
}

async fn list_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<MediaListRequest>>,
) -> Result<ApiResponse<MediaListResponse>, AppError> {
    let mut req = body.map(|Json(req)| req).unwrap_or_default();
    // Stored URLs are canonical, so the lookup key must be too.
    req.url = req
        .url
        .take()
        .filter(|u| !u.trim().is_empty())
        .map(|u| state.catalog.canonicalizer().storage_key(&u));

    let filter = media_filter(&req)?;
    let page = req.page.unwrap_or(1).max(1);
    let limit = req.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let (entries, total) = tokio::try_join!(
        state.catalog.find(&filter, page, limit),
        state.catalog.count(&filter)
    )
    .map_err(|err| AppError::from_media("list_media", err))?;

    let base = base_url(&state, &headers);
    Ok(ApiResponse::ok(MediaListResponse {
        list: entries.into_iter().map(|e| view(&base, e)).collect(),
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    }))
}

async fn find_media_by_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IdRequest>,
) -> Result<ApiResponse<MediaView>, AppError> {
    let id = id_from("find_media_by_id", &req.id)?;
    let entry = state
        .catalog
        .find_by_id(id)
        .await
        .map_err(|err| AppError::from_media("find_media_by_id", err))?;
    Ok(ApiResponse::ok(view(&base_url(&state, &headers), entry)))
}

async fn update_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateMediaRequest>,
) -> Result<ApiResponse<MediaView>, AppError> {
    let id = id_from("update_media", &req.id)?;
    let entry = state
        .catalog
        .update(id, req.patch)
        .await
        .map_err(|err| {
            AppError::from_media("update_media", err).with_context("media_id", id.to_string())
        })?;
    Ok(ApiResponse::ok(view(&base_url(&state, &headers), entry)))
}

async fn remove_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IdRequest>,
) -> Result<ApiResponse<RemoveMediaResponse>, AppError> {
    let id = id_from("remove_media", &req.id)?;
    let outcome = state
        .catalog
        .remove(id)
        .await
        .map_err(|err| AppError::from_media("remove_media", err))?;
    Ok(ApiResponse::ok(RemoveMediaResponse {
        entry: view(&base_url(&state, &headers), outcome.entry),
        file_deleted: outcome.file_deleted,
        file_warning: outcome.file_warning,
    }))
}

async fn add_description(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddDescriptionRequest>,
) -> Result<ApiResponse<MediaView>, AppError> {
    let id = id_from("add_description", &req.id)?;
    let entry = state
        .catalog
        .add_description(id, &req.text)
        .await
        .map_err(|err| AppError::from_media("add_description", err))?;
    Ok(ApiResponse::ok(view(&base_url(&state, &headers), entry)))
}

async fn remove_description(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RemoveDescriptionRequest>,
) -> Result<ApiResponse<MediaView>, AppError> {
    let id = id_from("remove_description", &req.id)?;
    let description_id = id_from("remove_description", &req.description_id)?;
    let entry = state
        .catalog
        .remove_description(id, description_id)
        .await
        .map_err(|err| AppError::from_media("remove_description", err))?;
    Ok(ApiResponse::ok(view(&base_url(&state, &headers), entry)))
}

async fn update_description(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateDescriptionRequest>,
) -> Result<ApiResponse<MediaView>, AppError> {
    let id = id_from("update_description", &req.id)?;
    let description_id = id_from("update_description", &req.description_id)?;
    let entry = state
        .catalog
        .update_description(id, description_id, &req.text)
        .await
        .map_err(|err| AppError::from_media("update_description", err))?;
    Ok(ApiResponse::ok(view(&base_url(&state, &headers), entry)))
}

fn batch_response<I: serde::Serialize>(
    base: &str,
    result: BatchResult<MediaEntry, I>,
) -> Response {
    let all_succeeded = result.all_succeeded();
    let result = BatchResult {
        success: result.success.into_iter().map(|e| view(base, e)).collect(),
        failed: result.failed,
        total: result.total,
        success_count: result.success_count,
        fail_count: result.fail_count,
    };
    ApiResponse::batch(all_succeeded, result).into_response()
}

async fn batch_create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BatchCreateRequest>,
) -> Result<Response, AppError> {
    if req.items.is_empty() {
        return Err(AppError::bad_request("batch_create", "items must not be empty"));
    }
    let result = state.catalog.batch_create(req.items).await;
    Ok(batch_response(&base_url(&state, &headers), result))
}

async fn batch_add_description(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BatchAddDescriptionRequest>,
) -> Result<Response, AppError> {
    if req.items.is_empty() {
        return Err(AppError::bad_request(
            "batch_add_description",
            "items must not be empty",
        ));
    }
    let result = state.catalog.batch_add_description(req.items).await;
    Ok(batch_response(&base_url(&state, &headers), result))
}
