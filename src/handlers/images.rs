//! Image API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::errors::ApiError;
use crate::metrics;
use crate::storage::validation::extension;
use crate::storage::{ImageListing, ListRequest, Rejection, SortKey, StoreError};
use crate::AppState;

// -- Response bodies ----------------------------------------------------------

/// `{"message": ""}` on success, the client error message otherwise.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn empty() -> Self {
        Self {
            message: String::new(),
        }
    }
}

/// One listed image, content inlined as a data URI.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImageItem {
    pub filename: String,
    /// `data:image/<ext>;base64,<content>`
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListMeta {
    /// Images the user has, ignoring pagination.
    pub total: usize,
    /// Number of pages at the requested page size.
    pub pages: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListResponse {
    pub images: Vec<ImageItem>,
    pub meta: ListMeta,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WeightResponse {
    /// Average number of images per user bucket.
    pub weight: f64,
}

impl From<ImageListing> for ListResponse {
    fn from(listing: ImageListing) -> Self {
        let images = listing
            .images
            .into_iter()
            .map(|image| ImageItem {
                data: format!(
                    "data:image/{};base64,{}",
                    extension(&image.name),
                    STANDARD.encode(&image.data)
                ),
                filename: image.name,
            })
            .collect();
        Self {
            images,
            meta: ListMeta {
                total: listing.total,
                pages: listing.page_count,
            },
        }
    }
}

// -- Request bodies -----------------------------------------------------------

/// Fields pulled out of an upload form.
#[derive(Debug, Default)]
pub struct UploadForm {
    /// `userID` text field.
    pub user_id: Option<String>,
    /// `image` file field.
    pub image: Option<UploadedImage>,
}

#[derive(Debug)]
pub struct UploadedImage {
    /// Original filename as sent by the client; empty if none was sent.
    pub filename: String,
    pub data: Bytes,
}

/// Upload form as documented in the OpenAPI spec.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UploadRequest {
    /// Owner of the image.
    #[schema(rename = "userID")]
    user_id: String,
    /// Image file; its filename must end in `.jpg`, `.jpeg` or `.png`.
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
}

/// `DELETE /image/delete` JSON body: `{"file": {"name": "..."}}`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeleteRequest {
    pub file: Option<DeleteFile>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeleteFile {
    pub name: Option<String>,
}

/// Collect the `userID` and `image` fields of a multipart upload.
/// Unknown fields are skipped.
pub async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or("") {
            "userID" => {
                form.user_id = Some(field.text().await.map_err(multipart_error)?);
            }
            "image" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                form.image = Some(UploadedImage { filename, data });
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok(form)
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Image too large.".to_string())
    } else {
        warn!("Malformed multipart upload: {}", err);
        ApiError::bad_request("Invalid multipart data.")
    }
}

// -- Handlers -----------------------------------------------------------------

/// `POST /image/upload` -- Store an image in the user's bucket.
#[utoipa::path(
    post,
    path = "/image/upload",
    tag = "Image",
    operation_id = "UploadImage",
    request_body(content = UploadRequest, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Image stored", body = MessageResponse),
        (status = 400, description = "Missing user or image, or unsupported file type", body = MessageResponse),
        (status = 401, description = "Missing or invalid API token"),
        (status = 500, description = "Internal error", body = MessageResponse)
    )
)]
pub async fn upload_image(state: Arc<AppState>, form: UploadForm) -> Result<Response, ApiError> {
    let user_id = form
        .user_id
        .ok_or_else(|| ApiError::bad_request(Rejection::MissingUser.to_string()))?;
    let image = form
        .image
        .ok_or_else(|| ApiError::bad_request("No image provided."))?;

    let size = image.data.len();
    let result = state
        .storage
        .upload(&user_id, &image.filename, image.data)
        .await;
    observe("upload", &result);
    result?;

    metrics::record_upload_bytes(size);
    info!("Uploaded {}/{} ({} bytes)", user_id, image.filename, size);
    Ok((StatusCode::CREATED, Json(MessageResponse::empty())).into_response())
}

/// `GET /image/list` -- One sorted page of the user's images.
///
/// Query parameters keep their historical names: `offset` is the page size.
#[utoipa::path(
    get,
    path = "/image/list",
    tag = "Image",
    operation_id = "ListImages",
    params(
        ("user" = String, Header, description = "User ID"),
        ("page" = Option<usize>, Query, description = "1-indexed page (default 1)"),
        ("offset" = Option<usize>, Query, description = "Page size (default 10)"),
        ("ascending" = Option<bool>, Query, description = "`true` for ascending order (default false)"),
        ("sortBy" = Option<String>, Query, description = "`name`, `size` or `date` (default name)"),
    ),
    responses(
        (status = 200, description = "Page of images", body = ListResponse),
        (status = 400, description = "Missing user or invalid paging", body = MessageResponse),
        (status = 401, description = "Missing or invalid API token"),
        (status = 500, description = "Internal error", body = MessageResponse)
    )
)]
pub async fn list_images(
    state: Arc<AppState>,
    user_id: Option<String>,
    query: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    let user_id =
        user_id.ok_or_else(|| ApiError::bad_request(Rejection::MissingUser.to_string()))?;
    let request = parse_list_request(&state, query)?;

    let result = state.storage.list(&user_id, request).await;
    observe("list", &result);
    let listing = result?;

    debug!(
        "Listed {} of {} images for {} (page {}, size {}, sort {} {})",
        listing.images.len(),
        listing.total,
        user_id,
        request.page,
        request.page_size,
        request.sort.as_str(),
        if request.ascending { "asc" } else { "desc" }
    );
    Ok(Json(ListResponse::from(listing)).into_response())
}

/// `DELETE /image/delete` -- Remove one image from the user's bucket.
#[utoipa::path(
    delete,
    path = "/image/delete",
    tag = "Image",
    operation_id = "DeleteImage",
    params(("user" = String, Header, description = "User ID")),
    request_body(content = DeleteRequest, description = "`{\"file\": {\"name\": \"cat.png\"}}`"),
    responses(
        (status = 200, description = "Image deleted", body = MessageResponse),
        (status = 400, description = "Missing user or file, or file not found", body = MessageResponse),
        (status = 401, description = "Missing or invalid API token"),
        (status = 500, description = "Internal error", body = MessageResponse)
    )
)]
pub async fn delete_image(
    state: Arc<AppState>,
    user_id: Option<String>,
    body: &[u8],
) -> Result<Response, ApiError> {
    let user_id = user_id.ok_or_else(|| ApiError::bad_request("User not provided."))?;

    // An unparsable body is treated the same as a body without a file.
    let request: DeleteRequest = serde_json::from_slice(body).unwrap_or_default();
    let filename = request
        .file
        .and_then(|file| file.name)
        .ok_or_else(|| ApiError::bad_request(Rejection::MissingFile.to_string()))?;

    let result = state.storage.delete(&user_id, &filename).await;
    observe("delete", &result);
    result?;

    info!("Deleted {}/{}", user_id, filename);
    Ok(Json(MessageResponse::empty()).into_response())
}

/// `GET /image/list/weight` -- Average images per user, for load balancing.
#[utoipa::path(
    get,
    path = "/image/list/weight",
    tag = "Image",
    operation_id = "InstanceWeight",
    responses(
        (status = 200, description = "Instance weight", body = WeightResponse),
        (status = 401, description = "Missing or invalid API token"),
        (status = 500, description = "Internal error", body = MessageResponse)
    )
)]
pub async fn instance_weight(state: Arc<AppState>) -> Result<Response, ApiError> {
    let result = state.storage.average_images_per_user().await;
    observe("weight", &result);
    let weight = result?;

    metrics::record_weight(weight);
    Ok(Json(WeightResponse { weight }).into_response())
}

// -- Helpers ------------------------------------------------------------------

fn observe<T>(operation: &'static str, result: &Result<T, StoreError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.outcome(),
    };
    metrics::record_operation(operation, outcome);
}

/// Build a [`ListRequest`] from query parameters, applying the configured
/// defaults and page size cap.
fn parse_list_request(
    state: &AppState,
    query: &HashMap<String, String>,
) -> Result<ListRequest, ApiError> {
    let listing = &state.config.listing;

    let page = parse_positive(query.get("page"), 1, Rejection::InvalidPage)?;
    let page_size = parse_positive(
        query.get("offset"),
        listing.default_page_size,
        Rejection::InvalidPageSize,
    )?
    .min(listing.max_page_size.max(1));

    Ok(ListRequest {
        page,
        page_size,
        ascending: query.get("ascending").is_some_and(|v| v == "true"),
        sort: SortKey::parse_or_default(query.get("sortBy").map(String::as_str)),
    })
}

fn parse_positive(
    value: Option<&String>,
    default: usize,
    rejection: Rejection,
) -> Result<usize, ApiError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ApiError::bad_request(rejection.to_string())),
    }
}
