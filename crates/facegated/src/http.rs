//! HTTP surface.
//!
//! The `/verify` route keeps the observed wire contract: it always answers
//! 200 with an outcome body, reporting failures in the `error` field.
//! Admin routes (user management, poller control, catalog refresh) use
//! real status codes.

use crate::state::SharedState;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use facegate_core::{service, FaceScan, ImageData, VerificationOutcome};
use serde_json::{json, Value};
use std::io::Cursor;

/// Multipart form field carrying the probe image.
const IMAGE_FIELD: &str = "image1";

/// Upper bound on uploaded image size.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/verify", post(verify))
        .route("/user", get(last_user))
        .route("/users", get(list_users))
        .route("/add_user/{name}", get(add_user_from_camera))
        .route("/users/{name}/references", post(add_user_from_upload))
        .route("/users/{name}", delete(remove_user))
        .route("/continuous/start", get(continuous_start))
        .route("/continuous/stop", get(continuous_stop))
        .route("/catalog/refresh", post(refresh_catalog))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(json!({
        "service": "facegate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Verify an uploaded image against the reference catalog.
///
/// Always 200; the outcome body carries any failure description.
async fn verify(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Json<VerificationOutcome> {
    let outcome = match read_image_field(multipart).await {
        Err(message) => VerificationOutcome::failure(message),
        Ok(bytes) => {
            let scan = state.engine.scan(ImageData::Encoded(bytes)).await;
            let catalog = state.catalog().await;
            match scan {
                Err(error) => VerificationOutcome::failure(error.to_string()),
                Ok(scan) => {
                    service::resolve_scan(Ok(scan), &catalog, state.config.match_threshold)
                }
            }
        }
    };

    if outcome.verified {
        state.record_verified(&outcome.user).await;
    }
    tracing::info!(
        user = %outcome.user,
        verified = outcome.verified,
        "verification complete"
    );
    state.publisher.publish_outcome(&outcome).await;
    Json(outcome)
}

/// Most recent verified identity, `"NONE"` before any verification.
async fn last_user(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "value": state.last_user().await }))
}

async fn list_users(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "users": state.catalog().await.identities() }))
}

/// Capture one frame from the camera and enroll it for `name`.
async fn add_user_from_camera(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    if let Err(response) = validate_identity(&name) {
        return response;
    }

    let frame = match state.engine.capture_frame().await {
        Ok(frame) => frame,
        Err(error) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("camera capture failed: {error}"),
            )
        }
    };

    let Some(gray) = image::GrayImage::from_raw(frame.width, frame.height, frame.data) else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "captured frame has inconsistent dimensions".to_string(),
        );
    };
    let mut encoded = Vec::new();
    if let Err(error) = gray.write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png) {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("frame encode failed: {error}"),
        );
    }

    add_reference(&state, &name, encoded, "png").await
}

/// Enroll an uploaded reference image for `name`.
async fn add_user_from_upload(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    if let Err(response) = validate_identity(&name) {
        return response;
    }
    match read_image_field(multipart).await {
        Err(message) => error_response(StatusCode::BAD_REQUEST, message),
        Ok(bytes) => add_reference(&state, &name, bytes, "jpg").await,
    }
}

/// Embed the image, persist it under the identity's directory, and publish
/// a catalog snapshot containing the new reference.
async fn add_reference(
    state: &SharedState,
    name: &str,
    bytes: Vec<u8>,
    extension: &str,
) -> (StatusCode, Json<Value>) {
    let embedding = match state.engine.scan(ImageData::Encoded(bytes.clone())).await {
        Err(error) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("embedding failed: {error}"),
            )
        }
        Ok(FaceScan::NoFace) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "no face detected in reference image".to_string(),
            )
        }
        Ok(FaceScan::Face(embedding)) => embedding,
    };

    let dir = state.config.images_dir.join(name);
    if let Err(error) = tokio::fs::create_dir_all(&dir).await {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to create identity directory: {error}"),
        );
    }
    let next_index = count_image_files(&dir) + 1;
    let path = dir.join(format!("{name}_{next_index}.{extension}"));
    if let Err(error) = tokio::fs::write(&path, &bytes).await {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to persist reference image: {error}"),
        );
    }

    let mut next = (*state.catalog().await).clone();
    if let Err(error) = next.add_embedding(name, embedding) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
    }
    state.swap_catalog(next).await;

    tracing::info!(user = name, path = %path.display(), "reference added");
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": format!("reference image added for user {name}"),
        })),
    )
}

/// Remove an identity, its references, and its image directory.
async fn remove_user(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    if let Err(response) = validate_identity(&name) {
        return response;
    }

    let mut next = (*state.catalog().await).clone();
    if !next.remove_identity(&name) {
        return error_response(StatusCode::NOT_FOUND, format!("user {name} not found"));
    }
    state.swap_catalog(next).await;

    let dir = state.config.images_dir.join(&name);
    if dir.is_dir() {
        if let Err(error) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(user = %name, %error, "failed to delete identity image directory");
        }
    }

    tracing::info!(user = %name, "user removed");
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": format!("user {name} deleted"),
        })),
    )
}

async fn continuous_start(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    if state.config.camera_device.is_none() {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "camera not available on this device".to_string(),
        );
    }
    if state.poller.start(state.clone()) {
        (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "continuous verification started",
            })),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({
                "status": "info",
                "message": "continuous verification was already running",
            })),
        )
    }
}

async fn continuous_stop(State(state): State<SharedState>) -> Json<Value> {
    if state.poller.stop() {
        Json(json!({
            "status": "success",
            "message": "continuous verification stopped",
        }))
    } else {
        Json(json!({
            "status": "info",
            "message": "continuous verification was not running",
        }))
    }
}

/// Rebuild the catalog from disk and swap it in atomically.
async fn refresh_catalog(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    match state
        .engine
        .build_catalog(state.config.images_dir.clone())
        .await
    {
        Err(error) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("catalog rebuild failed: {error}"),
        ),
        Ok(catalog) => {
            let identities = catalog.len();
            let references = catalog.reference_count();
            state.swap_catalog(catalog).await;
            tracing::info!(identities, references, "catalog refreshed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "identities": identities,
                    "references": references,
                })),
            )
        }
    }
}

/// Number of image files already stored for an identity, used to pick the
/// next reference file name.
fn count_image_files(dir: &std::path::Path) -> usize {
    const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry
                        .path()
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

/// Pull the probe image bytes out of the multipart body.
async fn read_image_field(mut multipart: Multipart) -> Result<Vec<u8>, String> {
    loop {
        match multipart.next_field().await {
            Err(error) => return Err(format!("invalid multipart body: {error}")),
            Ok(None) => return Err(format!("missing multipart field {IMAGE_FIELD}")),
            Ok(Some(field)) => {
                if field.name() != Some(IMAGE_FIELD) {
                    continue;
                }
                return match field.bytes().await {
                    Ok(bytes) if bytes.is_empty() => {
                        Err(format!("multipart field {IMAGE_FIELD} is empty"))
                    }
                    Ok(bytes) => Ok(bytes.to_vec()),
                    Err(error) => Err(format!("failed to read upload: {error}")),
                };
            }
        }
    }
}

/// Identity names become directory names; reject anything that could
/// escape the images root.
fn validate_identity(name: &str) -> Result<(), (StatusCode, Json<Value>)> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid user name".to_string(),
        ))
    }
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "status": "error",
            "message": message,
        })),
    )
}
