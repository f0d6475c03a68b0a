use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{DescriptionInput, MediaEntry, MediaPatch, NewMedia};
use crate::reconcile::AnnotatedFile;
use crate::upload_store::{DeleteTarget, StoredFile};

/// Envelope every endpoint answers with. `code` mirrors the HTTP status.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, "success", data)
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: Some(data),
        }
    }

    /// 200 when every item succeeded, 207 otherwise.
    pub fn batch(all_succeeded: bool, data: T) -> Self {
        if all_succeeded {
            Self::with_status(StatusCode::OK, "all items succeeded", data)
        } else {
            Self::with_status(StatusCode::MULTI_STATUS, "some items failed", data)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

// ---- uploads ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(flatten)]
    pub file: StoredFile,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiUploadResponse {
    pub files: Vec<UploadedFile>,
    pub count: usize,
    pub total_size: u64,
    pub type_count: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UploadResponse {
    Single(Box<UploadedFile>),
    Multiple(MultiUploadResponse),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub file_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedFile {
    #[serde(flatten)]
    pub file: AnnotatedFile,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub list: Vec<ListedFile>,
    pub images: Vec<ListedFile>,
    pub files: Vec<ListedFile>,
    pub count: usize,
    pub total: usize,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
    pub total_size: u64,
}

/// A batch delete item: either a bare filename or an object.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DeleteItem {
    Filename(String),
    Target {
        filename: Option<String>,
        #[serde(rename = "filePath")]
        file_path: Option<String>,
    },
}

impl From<DeleteItem> for DeleteTarget {
    fn from(item: DeleteItem) -> Self {
        match item {
            DeleteItem::Filename(filename) => Self {
                filename: Some(filename),
                file_path: None,
            },
            DeleteItem::Target {
                filename,
                file_path,
            } => Self {
                filename,
                file_path,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub filename: Option<String>,
    pub file_path: Option<String>,
    pub files: Option<Vec<DeleteItem>>,
    #[serde(default)]
    pub remove_from_catalog: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub filename: String,
    pub path: String,
    pub removed_from_catalog: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_warning: Option<String>,
}

// ---- media catalog ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaView {
    #[serde(flatten)]
    pub entry: MediaEntry,
    pub full_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaListRequest {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
    pub is_added_to_library: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaListResponse {
    pub list: Vec<MediaView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Deserialize)]
pub struct IdRequest {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMediaRequest {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub patch: MediaPatch,
}

#[derive(Debug, Deserialize)]
pub struct AddDescriptionRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveDescriptionRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescriptionRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description_id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMediaResponse {
    pub entry: MediaView,
    pub file_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchCreateRequest {
    #[serde(default)]
    pub items: Vec<NewMedia>,
}

#[derive(Debug, Deserialize)]
pub struct BatchAddDescriptionRequest {
    #[serde(default)]
    pub items: Vec<DescriptionInput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_items_accept_strings_and_objects() {
        let req: DeleteRequest = serde_json::from_str(
            r#"{"files": ["a.png", {"filePath": "/uploads/images/b.png"}], "removeFromCatalog": true}"#,
        )
        .unwrap();
        let targets: Vec<DeleteTarget> = req.files.unwrap().into_iter().map(Into::into).collect();
        assert_eq!(targets[0].filename.as_deref(), Some("a.png"));
        assert_eq!(targets[1].file_path.as_deref(), Some("/uploads/images/b.png"));
        assert!(req.remove_from_catalog);
    }

    #[test]
    fn update_request_flattens_patch() {
        let req: UpdateMediaRequest = serde_json::from_str(
            r#"{"id": "x", "type": "video", "isAddedToLibrary": false}"#,
        )
        .unwrap();
        assert_eq!(req.id, "x");
        assert_eq!(req.patch.media_type.as_deref(), Some("video"));
        assert_eq!(req.patch.is_added_to_library, Some(false));
        assert!(req.patch.url.is_none());
    }

    #[test]
    fn batch_envelope_uses_multi_status_on_partial_failure() {
        assert_eq!(ApiResponse::batch(true, ()).code, 200);
        assert_eq!(ApiResponse::batch(false, ()).code, 207);
    }
}
