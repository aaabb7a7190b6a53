use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Html,
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    config::Config,
    error::ApiError,
    openai::OpenAiClient,
    pipeline::{self, PromptStage},
    replicate::{AspectRatioTable, DEFAULT_ASPECT_RATIO, DEFAULT_MODEL, ModelRegistry, ReplicateClient},
    store::{IMAGE_EXT, ImageListing, ImageStore, MetadataStore},
};

const INDEX_HTML: &str = include_str!("../static/index.html");
const DEFAULT_PER_PAGE: i64 = 12;

pub struct AppState {
    pub openai: OpenAiClient,
    pub replicate: ReplicateClient,
    pub images: ImageStore,
    pub metadata: MetadataStore,
    pub stages: Vec<PromptStage>,
}

impl AppState {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            openai: OpenAiClient::new(
                http.clone(),
                config.openai_api_key.clone(),
                config.openai_model.clone(),
            ),
            replicate: ReplicateClient::new(
                http.clone(),
                config.replicate_api_token.clone(),
                ModelRegistry::flux_defaults(),
                AspectRatioTable::flux_defaults(),
                config.buffer_image_output,
            ),
            images: ImageStore::new(config.image_dir.clone(), http),
            metadata: MetadataStore::new(config.metadata_dir.clone()),
            stages: config.prompt_pipeline.clone(),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let image_dir = state.images.dir().to_path_buf();
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health))
        .route("/api/generate-image", post(generate_image))
        .route("/api/improve-prompt", post(improve_prompt))
        .route("/api/images", get(list_images))
        .route("/api/metadata/{image_id}", get(get_metadata))
        .route("/api/image/{image_id}", delete(delete_image))
        .nest_service("/images", ServeDir::new(image_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub status: &'static str,
    pub image_id: String,
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ImprovePromptRequest {
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImprovePromptResponse {
    pub improved_prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeleteImageResponse {
    pub status: &'static str,
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>, ApiError> {
    let prompt = required_prompt(request.prompt)?;
    let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
    let aspect_ratio = request
        .aspect_ratio
        .as_deref()
        .unwrap_or(DEFAULT_ASPECT_RATIO);

    let outcome = pipeline::run(&state.stages, &state.openai, &prompt).await?;
    let generation = state
        .replicate
        .generate(&outcome.final_prompt, model, aspect_ratio)
        .await?;

    let mut metadata = generation.metadata;
    if let Value::Object(record) = &mut metadata {
        record.insert("original_prompt".to_string(), Value::String(prompt));
        if let Some(translated) = outcome.translated_prompt {
            record.insert("translated_prompt".to_string(), Value::String(translated));
        }
        if let Some(enhanced) = outcome.enhanced_prompt {
            record.insert("enhanced_prompt".to_string(), Value::String(enhanced));
        }
        record.insert(
            "created_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    // image first, then its sidecar; a failure in between leaves an orphaned
    // image file behind rather than rolling back
    let image_filename = state.images.save(generation.location).await?;
    state.metadata.save(&image_filename, &metadata).await?;

    let image_id = image_filename
        .rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| image_filename.clone());
    tracing::info!(image_id = %image_id, "image generated");

    Ok(Json(GenerateImageResponse {
        status: "success",
        image_id,
        image_url: format!("/images/{image_filename}"),
    }))
}

pub async fn improve_prompt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImprovePromptRequest>,
) -> Result<Json<ImprovePromptResponse>, ApiError> {
    let prompt = required_prompt(request.prompt)?;
    let improved_prompt = state.openai.improve_prompt(&prompt).await?;
    Ok(Json(ImprovePromptResponse { improved_prompt }))
}

pub async fn list_images(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ImageListing>, ApiError> {
    let page = positive(query.page.unwrap_or(1), "page")?;
    let per_page = positive(query.per_page.unwrap_or(DEFAULT_PER_PAGE), "per_page")?;
    let listing = state.metadata.list(page, per_page).await?;
    Ok(Json(listing))
}

pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    validate_image_id(&image_id)?;
    let record = state.metadata.get(&format!("{image_id}.json")).await?;
    match record {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound("Metadata not found".to_string())),
    }
}

pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<Json<DeleteImageResponse>, ApiError> {
    validate_image_id(&image_id)?;
    state.images.delete(&format!("{image_id}.{IMAGE_EXT}")).await?;
    state.metadata.delete(&format!("{image_id}.json")).await?;
    tracing::info!(image_id = %image_id, "image deleted");
    Ok(Json(DeleteImageResponse { status: "success" }))
}

fn required_prompt(prompt: Option<String>) -> Result<String, ApiError> {
    prompt
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::InvalidArgument("Prompt is required".to_string()))
}

fn positive(value: i64, field: &str) -> Result<usize, ApiError> {
    if value <= 0 {
        return Err(ApiError::InvalidArgument(format!(
            "{field} must be positive"
        )));
    }
    Ok(value as usize)
}

/// Identifiers are generated uuids; anything with path characters in it is
/// not ours and must not reach the filesystem layer.
fn validate_image_id(image_id: &str) -> Result<(), ApiError> {
    let valid = !image_id.is_empty()
        && image_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidArgument("Invalid image id".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use serde_json::json;

    use super::*;

    fn test_state(image_dir: &std::path::Path, metadata_dir: &std::path::Path) -> Arc<AppState> {
        let http = reqwest::Client::new();
        Arc::new(AppState {
            openai: OpenAiClient::new(http.clone(), "test-key".to_string(), "gpt-4".to_string()),
            replicate: ReplicateClient::new(
                http.clone(),
                "test-token".to_string(),
                ModelRegistry::flux_defaults(),
                AspectRatioTable::flux_defaults(),
                false,
            ),
            images: ImageStore::new(image_dir.to_path_buf(), http),
            metadata: MetadataStore::new(metadata_dir.to_path_buf()),
            stages: Vec::new(),
        })
    }

    fn fresh_state() -> (tempfile::TempDir, tempfile::TempDir, Arc<AppState>) {
        let image_dir = tempfile::tempdir().unwrap();
        let metadata_dir = tempfile::tempdir().unwrap();
        let state = test_state(image_dir.path(), metadata_dir.path());
        (image_dir, metadata_dir, state)
    }

    #[tokio::test]
    async fn generate_rejects_missing_prompt_before_any_backend_call() {
        let (_i, _m, state) = fresh_state();
        let request = GenerateImageRequest {
            prompt: None,
            model: None,
            aspect_ratio: None,
        };
        let err = generate_image(State(state), Json(request)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_rejects_blank_prompt() {
        let (_i, _m, state) = fresh_state();
        let request = GenerateImageRequest {
            prompt: Some("   ".to_string()),
            model: None,
            aspect_ratio: None,
        };
        let err = generate_image(State(state), Json(request)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_rejects_unsupported_model_without_calling_the_backend() {
        let (_i, _m, state) = fresh_state();
        let request = GenerateImageRequest {
            prompt: Some("a cat".to_string()),
            model: Some("not-a-model".to_string()),
            aspect_ratio: None,
        };
        let err = generate_image(State(state), Json(request)).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_rejects_unsupported_aspect_ratio() {
        let (_i, _m, state) = fresh_state();
        let request = GenerateImageRequest {
            prompt: Some("a cat".to_string()),
            model: None,
            aspect_ratio: Some("7:5".to_string()),
        };
        let err = generate_image(State(state), Json(request)).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn improve_rejects_missing_prompt() {
        let (_i, _m, state) = fresh_state();
        let err = improve_prompt(State(state), Json(ImprovePromptRequest { prompt: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metadata_lookup_returns_404_when_absent() {
        let (_i, _m, state) = fresh_state();
        let err = get_metadata(State(state), Path("deadbeef".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metadata_lookup_finds_stored_records() {
        let (_i, _m, state) = fresh_state();
        let record = json!({ "prompt": "a cat", "model": "flux-pro", "aspect_ratio": "16:9" });
        state.metadata.save("abc123.webp", &record).await.unwrap();
        let Json(found) = get_metadata(State(state), Path("abc123".to_string()))
            .await
            .unwrap();
        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn delete_removes_both_records_and_is_idempotent() {
        let (_i, _m, state) = fresh_state();
        tokio::fs::write(state.images.path_for("abc123.webp"), b"bytes")
            .await
            .unwrap();
        state
            .metadata
            .save("abc123.webp", &json!({ "prompt": "a cat" }))
            .await
            .unwrap();

        delete_image(State(state.clone()), Path("abc123".to_string()))
            .await
            .unwrap();
        assert!(!state.images.path_for("abc123.webp").exists());
        assert!(state.metadata.get("abc123.json").await.unwrap().is_none());

        // second delete of the same id is a no-op
        delete_image(State(state), Path("abc123".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn path_escapes_are_rejected_as_invalid_ids() {
        let (_i, _m, state) = fresh_state();
        let err = delete_image(State(state), Path("../etc/passwd".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_uses_defaults_and_rejects_bad_pagination() {
        let (_i, _m, state) = fresh_state();
        let Json(listing) = list_images(
            State(state.clone()),
            Query(ListQuery {
                page: None,
                per_page: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(listing.page, 1);
        assert_eq!(listing.per_page, 12);
        assert_eq!(listing.total, 0);

        let err = list_images(
            State(state),
            Query(ListQuery {
                page: Some(-1),
                per_page: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
