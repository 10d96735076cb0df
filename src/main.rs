// ABOUTME: On-demand photo resizing proxy
// ABOUTME: Redirects to cached WebP variants, transcoding and storing them lazily

mod error;
mod magick;
mod storage;
mod variant;

use std::{env, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Path, RawQuery, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use serde::Serialize;
use tempfile::TempDir;
use tower::Service;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::error::ResizeError;
use crate::variant::{derive_cache_key, parse_image_request, resolve_params, Variant};

/// Cache directive attached to every redirect, stored variant, and 404
pub const CACHE_FOR_A_YEAR: &str = "public, max-age=31449600, immutable";

// Configuration, read once at startup and passed through AppState
struct Config {
    /// Source bucket holding the originals (read-only)
    photos_bucket: String,
    /// Bucket receiving resized variants (public-read)
    resized_bucket: String,
    /// Deployment region, also used to build public S3 URLs
    region: String,
    port: u16,
    identify_bin: String,
    convert_bin: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            photos_bucket: env::var("PHOTOS_BUCKET").unwrap_or_else(|_| "photos".to_string()),
            resized_bucket: env::var("RESIZED_BUCKET")
                .unwrap_or_else(|_| "photos-resized".to_string()),
            region: env::var("AWS_DEFAULT_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| "eu-central-1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            identify_bin: env::var("IDENTIFY_BIN").unwrap_or_else(|_| "identify".to_string()),
            convert_bin: env::var("CONVERT_BIN").unwrap_or_else(|_| "convert".to_string()),
        }
    }

    /// Public location of an original. Path-style, since the photos bucket
    /// name contains dots.
    fn original_location(&self, original_path: &str) -> String {
        format!(
            "https://s3.{}.amazonaws.com/{}/{}",
            self.region, self.photos_bucket, original_path
        )
    }

    /// Public location of a resized variant
    fn variant_location(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.resized_bucket, self.region, key
        )
    }
}

// App state shared across handlers
struct AppState {
    s3: aws_sdk_s3::Client,
    config: Config,
}

// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    region: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("photo_resizer=info".parse()?),
        )
        .init();

    let config = Config::from_env();
    let port = config.port;

    // Initialize the S3 client against the configured region
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await;
    let s3 = aws_sdk_s3::Client::new(&sdk_config);

    info!(
        "Serving {} -> {} in {}",
        config.photos_bucket, config.resized_bucket, config.region
    );

    let state = Arc::new(AppState { s3, config });

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(86400));

    // Build router
    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/", get(handle_health))
        .route("/*path", get(handle_image))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    info!("Starting resize proxy on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Use hyper's auto builder which supports both HTTP/1 and HTTP/2
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let app = app.clone();

        tokio::spawn(async move {
            let builder = Builder::new(hyper_util::rt::TokioExecutor::new());
            if let Err(e) = builder
                .serve_connection(
                    io,
                    hyper::service::service_fn(move |req| {
                        let mut app = app.clone();
                        async move { app.call(req).await }
                    }),
                )
                .await
            {
                error!("Connection error: {}", e);
            }
        });
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        region: state.config.region.clone(),
    })
}

/// GET /{original path}?f=&w=&q= - Redirect to a presentation variant
async fn handle_image(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    match process_image(&state, &path, query.as_deref().unwrap_or("")).await {
        Ok(response) => response,
        Err(e) => {
            match &e {
                ResizeError::InvalidVariant(value) => info!("Rejected variant: {}", value),
                ResizeError::OriginalNotFound(key) => warn!("Original not found: {}", key),
                ResizeError::StorageUnavailable(source) => {
                    error!("Storage unavailable: {:#}", source)
                }
                ResizeError::Transcode(source) => error!("Transcode failed: {:#}", source),
                ResizeError::Internal(source) => error!("Request failed: {:#}", source),
            }
            e.into_response()
        }
    }
}

/// Resolve a request to a variant location: validate, check the cache,
/// and on a miss fetch the original, transcode, and store before
/// redirecting. All steps are sequential; concurrent requests for the same
/// identity independently transcode and last-write-win.
async fn process_image(state: &AppState, path: &str, query: &str) -> Result<Response, ResizeError> {
    let request = parse_image_request(path, query)?;

    // raw goes straight to the source bucket, bypassing the cache
    if request.variant == Variant::Raw {
        return Ok(redirect(
            &state.config.original_location(&request.original_path),
        ));
    }

    let params = resolve_params(request.variant, request.width, request.quality);
    let key = derive_cache_key(&request.original_path, request.variant, &params);
    let location = state.config.variant_location(&key);

    match storage::variant_exists(&state.s3, &state.config.resized_bucket, &key).await {
        Ok(true) => {
            info!("Resized variant found: {}", key);
            return Ok(redirect(&location));
        }
        Ok(false) => info!("Resized variant does not exist: {}", key),
        // A failed existence check only risks a redundant transcode
        Err(e) => warn!("Existence check failed for {}, treating as miss: {:#}", key, e),
    }

    let original = storage::fetch_original(
        &state.s3,
        &state.config.photos_bucket,
        &request.original_path,
    )
    .await
    .map_err(ResizeError::StorageUnavailable)?
    .ok_or_else(|| ResizeError::OriginalNotFound(request.original_path.clone()))?;

    // Scratch files are local to this invocation and randomly named, so
    // concurrent requests never collide
    let scratch = TempDir::new().map_err(|e| ResizeError::Internal(e.into()))?;
    let source_file = scratch.path().join("source");
    let resized_file = scratch.path().join("resized.webp");
    tokio::fs::write(&source_file, &original)
        .await
        .map_err(|e| ResizeError::Internal(e.into()))?;

    let source_info = magick::inspect(&state.config.identify_bin, &source_file)
        .await
        .map_err(ResizeError::Transcode)?;
    magick::transcode(
        &state.config.convert_bin,
        &source_file,
        &resized_file,
        request.variant,
        &params,
    )
    .await
    .map_err(ResizeError::Transcode)?;
    let resized = tokio::fs::read(&resized_file)
        .await
        .map_err(|e| ResizeError::Internal(e.into()))?;

    let metadata = format!(
        "/{} {} {} {} {}",
        request.original_path,
        source_info.format,
        source_info.dimensions,
        source_info.color_depth,
        source_info.color_space
    );
    storage::store_variant(
        &state.s3,
        &state.config.resized_bucket,
        &key,
        resized.into(),
        &metadata,
    )
    .await
    .map_err(ResizeError::Internal)?;

    info!("Stored resized variant: {}", key);
    Ok(redirect(&location))
}

/// 301 with the one-year immutable cache directive
fn redirect(location: &str) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [
            (header::LOCATION, location),
            (header::CACHE_CONTROL, CACHE_FOR_A_YEAR),
        ],
        (),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            photos_bucket: "photos.example.org".to_string(),
            resized_bucket: "photos-resized".to_string(),
            region: "eu-central-1".to_string(),
            port: 8080,
            identify_bin: "identify".to_string(),
            convert_bin: "convert".to_string(),
        }
    }

    #[test]
    fn test_original_location_is_path_style() {
        assert_eq!(
            test_config().original_location("2023-12-10/1000013814-01.jpeg"),
            "https://s3.eu-central-1.amazonaws.com/photos.example.org/2023-12-10/1000013814-01.jpeg"
        );
    }

    #[test]
    fn test_variant_location_is_virtual_hosted() {
        assert_eq!(
            test_config().variant_location("2023-12-10/1000013814-01.thumb-500-8.webp"),
            "https://photos-resized.s3.eu-central-1.amazonaws.com/2023-12-10/1000013814-01.thumb-500-8.webp"
        );
    }

    #[test]
    fn test_redirect_carries_location_and_cache_directive() {
        let resp = redirect("https://example.com/x.webp");
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap().to_str().unwrap(),
            "https://example.com/x.webp"
        );
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap().to_str().unwrap(),
            CACHE_FOR_A_YEAR
        );
    }
}
