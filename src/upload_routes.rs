use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};

use crate::catalog::{MediaType, NewMedia};
use crate::classifier::Category;
use crate::database::AppState;
use crate::error::AppError;
use crate::reconcile::{ListQuery, DEFAULT_PAGE_SIZE};
use crate::structs::{
    ApiResponse, DeleteRequest, DeleteResponse, ListRequest, ListResponse, ListedFile,
    MultiUploadResponse, UploadResponse, UploadedFile,
};
use crate::upload_store::{DeleteTarget, StoredFile};
use crate::url_canon::file_url;

const FILES_FIELD: &str = "files";
const ADD_TO_LIBRARY_FIELD: &str = "addToLibrary";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", post(upload))
        .route("/upload/list", post(list_uploads))
        .route("/upload/delete", post(delete_uploads))
}

/// `scheme://host` of the current request, honouring reverse-proxy headers.
/// Falls back to `fallback` when the request carries no host.
pub fn request_base_url(headers: &HeaderMap, fallback: &str) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    match header("x-forwarded-host").or_else(|| header("host")) {
        Some(host) => {
            let proto = header("x-forwarded-proto").unwrap_or("http");
            format!("{proto}://{host}")
        }
        None => fallback.to_string(),
    }
}

async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<ApiResponse<UploadResponse>, AppError> {
    let mut stored = Vec::new();
    let add_to_library = match receive_parts(&state, &mut multipart, &mut stored).await {
        Ok(flag) => flag,
        Err(err) => {
            for file in &stored {
                state.uploads.discard(file).await;
            }
            return Err(err);
        }
    };

    if stored.is_empty() {
        return Err(AppError::bad_request("upload", "No files were uploaded"));
    }

    let base_url = request_base_url(&headers, &state.file_base_url);
    let mut uploaded = Vec::with_capacity(stored.len());
    for file in stored {
        let (media_id, catalog_error) = if add_to_library {
            register_in_catalog(&state, &file).await
        } else {
            (None, None)
        };
        uploaded.push(UploadedFile {
            url: file_url(&base_url, &file.path),
            file,
            media_id,
            catalog_error,
        });
    }

    if uploaded.len() == 1 {
        if let Some(single) = uploaded.pop() {
            return Ok(ApiResponse::ok(UploadResponse::Single(Box::new(single))));
        }
    }

    let mut type_count = BTreeMap::new();
    for file in &uploaded {
        *type_count
            .entry(file.file.file_type.file_type().to_string())
            .or_insert(0) += 1;
    }
    let total_size = uploaded.iter().map(|f| f.file.size).sum();
    Ok(ApiResponse::ok(UploadResponse::Multiple(MultiUploadResponse {
        count: uploaded.len(),
        files: uploaded,
        total_size,
        type_count,
    })))
}

/// Store every `files` part as it arrives. Returns the `addToLibrary` flag.
async fn receive_parts(
    state: &AppState,
    multipart: &mut Multipart,
    stored: &mut Vec<StoredFile>,
) -> Result<bool, AppError> {
    let mut add_to_library = false;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request("upload", err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILES_FIELD => {}
            ADD_TO_LIBRARY_FIELD => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request("upload", err.body_text()))?;
                add_to_library = value.trim().eq_ignore_ascii_case("true");
                continue;
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
                continue;
            }
        }

        if stored.len() >= state.max_upload_files {
            return Err(AppError::bad_request(
                "upload",
                format!("At most {} files may be uploaded at once", state.max_upload_files),
            ));
        }

        let original_name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("upload", "File part is missing a filename"))?;
        let content_type = field.content_type().map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| AppError::bad_request("upload", err.body_text()))?
        {
            if bytes.len() + chunk.len() > state.max_upload_file_size {
                return Err(AppError::bad_request(
                    "upload",
                    format!(
                        "{original_name} exceeds the {} byte upload limit",
                        state.max_upload_file_size
                    ),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let file = state
            .uploads
            .save(&original_name, content_type.as_deref(), &bytes)
            .await
            .map_err(|err| AppError::from_media("upload", err).with_context("file", original_name))?;
        stored.push(file);
    }

    Ok(add_to_library)
}

/// Only images and videos have a catalog type; other files are skipped.
async fn register_in_catalog(
    state: &AppState,
    file: &StoredFile,
) -> (Option<uuid::Uuid>, Option<String>) {
    let media_type = match file.file_type {
        Category::Images => MediaType::Image,
        Category::Videos => MediaType::Video,
        _ => return (None, None),
    };
    let new_media = NewMedia {
        media_type: media_type.as_str().to_string(),
        url: file.path.clone(),
        filename: Some(file.original_name.clone()),
        size: i64::try_from(file.size).ok(),
        mimetype: Some(file.mimetype.clone()),
        descriptions: Vec::new(),
    };
    match state.catalog.create(new_media).await {
        Ok(entry) => (Some(entry.id), None),
        Err(err) => {
            tracing::warn!(path = %file.path, error = %err, "uploaded file could not be catalogued");
            (None, Some(err.to_string()))
        }
    }
}

async fn list_uploads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<ListRequest>>,
) -> Result<ApiResponse<ListResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let file_type = match req.file_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(tag) => Some(
            Category::from_file_type(tag)
                .or_else(|| Category::from_dir_name(tag))
                .ok_or_else(|| {
                    AppError::bad_request("list_uploads", format!("Unknown fileType {tag:?}"))
                })?,
        ),
    };

    let page = state
        .reconciler
        .list(ListQuery {
            page: req.page.unwrap_or(1),
            limit: req.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            file_type,
            description: req.description.filter(|d| !d.trim().is_empty()),
        })
        .await
        .map_err(|err| AppError::from_media("list_uploads", err))?;

    let base_url = request_base_url(&headers, &state.file_base_url);
    let list: Vec<ListedFile> = page
        .records
        .into_iter()
        .map(|file| ListedFile {
            url: file_url(&base_url, &file.record.path),
            file,
        })
        .collect();
    let images = list
        .iter()
        .filter(|f| f.file.record.file_type == Category::Images)
        .map(clone_listed)
        .collect();
    let files = list.iter().map(clone_listed).collect();

    Ok(ApiResponse::ok(ListResponse {
        count: list.len(),
        list,
        images,
        files,
        total: page.total,
        page: page.page,
        limit: page.limit,
        pages: page.pages,
        total_size: page.total_size,
    }))
}

fn clone_listed(file: &ListedFile) -> ListedFile {
    ListedFile {
        file: file.file.clone(),
        url: file.url.clone(),
    }
}

async fn delete_uploads(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> Result<axum::response::Response, AppError> {
    use axum::response::IntoResponse;

    if let Some(items) = req.files {
        if items.is_empty() {
            return Err(AppError::bad_request("delete_uploads", "files must not be empty"));
        }
        let targets: Vec<DeleteTarget> = items.into_iter().map(Into::into).collect();
        let result = state.uploads.delete_many(&targets).await;

        if req.remove_from_catalog {
            for deleted in &result.success {
                if let Err(err) = state.catalog.remove_by_url(&deleted.path).await {
                    tracing::warn!(path = %deleted.path, error = %err, "failed to drop catalog entry");
                }
            }
        }
        tracing::info!(
            succeeded = result.success_count,
            failed = result.fail_count,
            "batch delete finished"
        );
        return Ok(ApiResponse::batch(result.fail_count == 0, result).into_response());
    }

    let target = DeleteTarget {
        filename: req.filename,
        file_path: req.file_path,
    };
    let deleted = state.uploads.delete(&target).await.map_err(|err| {
        AppError::from_media("delete_uploads", err).with_context("target", target.label())
    })?;

    let (removed_from_catalog, catalog_warning) = if req.remove_from_catalog {
        match state.catalog.remove_by_url(&deleted.path).await {
            Ok(removed) => (removed.is_some(), None),
            Err(err) => {
                tracing::warn!(path = %deleted.path, error = %err, "failed to drop catalog entry");
                (false, Some(err.to_string()))
            }
        }
    } else {
        (false, None)
    };

    Ok(ApiResponse::ok(DeleteResponse {
        filename: deleted.filename,
        path: deleted.path,
        removed_from_catalog,
        catalog_warning,
    })
    .into_response())
}
