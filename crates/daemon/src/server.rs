//! HTTP server for Reel
//!
//! Thin request boundary over the library index, view store and ingestion
//! pipeline: playlist, media and thumbnail serving, upload and import, and a
//! metrics endpoint.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::ingest::{ErrorKind, IngestError, IngestPipeline, IngestReport};
use crate::library::{Library, SortOrder, Video};
use crate::metrics::{MetricsSnapshot, SharedMetrics};
use crate::views::ViewStore;

/// Errors that can occur when running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<Library>,
    pub views: Arc<ViewStore>,
    pub pipeline: Arc<IngestPipeline>,
    pub metrics: SharedMetrics,
}

/// Error response with a JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{} not found", what))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Status code for an ingestion error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Resource | ErrorKind::ExternalProcess => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Network => StatusCode::BAD_GATEWAY,
        ErrorKind::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

/// Playlist entry as served to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub album: Option<String>,
    pub views: u64,
    pub timestamp_unix_ms: i64,
    pub size_bytes: u64,
    pub has_thumbnail: bool,
}

impl From<&Video> for VideoSummary {
    fn from(video: &Video) -> Self {
        Self {
            id: video.id.clone(),
            title: video.title.clone(),
            description: video.description.clone(),
            album: video.album.clone(),
            views: video.views,
            timestamp_unix_ms: video
                .timestamp
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
            size_bytes: video.size_bytes,
            has_thumbnail: video.thumbnail.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    sort: String,
}

#[derive(Debug, Deserialize)]
struct MediaQuery {
    #[serde(default)]
    quality: String,
}

#[derive(Debug, Deserialize)]
struct ImportForm {
    url: String,
    #[serde(default)]
    target_library_path: Option<String>,
}

/// Handler for GET /api/videos
async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<VideoSummary>>, ApiError> {
    let order = SortOrder::parse(&query.sort)
        .ok_or_else(|| ApiError::bad_request(format!("invalid sort '{}'", query.sort)))?;

    let AppState { library, views, .. } = state;
    let playlist = tokio::task::spawn_blocking(move || {
        library.playlist_with(order, |id| {
            views.get_views(id).unwrap_or_else(|e| {
                warn!(id, error = %e, "View count unavailable");
                0
            })
        })
    })
    .await
    .map_err(internal_error)?;
    Ok(Json(playlist.iter().map(VideoSummary::from).collect()))
}

/// Collection part of an id (`talks/keynote` -> `talks`)
fn collection_of(id: &str) -> &str {
    id.rsplit_once('/').map(|(collection, _)| collection).unwrap_or("")
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ts" | "m2ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// Handler for GET /media/*id
///
/// Every request counts as a view, whichever quality is served.
async fn media(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MediaQuery>,
) -> Result<Response, ApiError> {
    let video = state.library.get(&id).ok_or_else(|| ApiError::not_found("video"))?;

    let views = state.views.clone();
    let counted = id.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = views.migrate(collection_of(&counted), &counted) {
            warn!(id = %counted, error = %e, "View counter migration failed");
        }
        if let Err(e) = views.inc_views(&counted) {
            warn!(id = %counted, error = %e, "View count not recorded");
        }
    })
    .await
    .map_err(internal_error)?;

    let quality = query.quality.trim().to_lowercase();
    let path = video.playback_path(&quality, &state.pipeline.known_suffixes());
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        warn!(path = %path.display(), error = %e, "Media file unreadable");
        ApiError::not_found("video file")
    })?;
    let len = file.metadata().await.map(|m| m.len()).ok();

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, content_type_for(&path));
    if let Some(len) = len {
        response = response.header(header::CONTENT_LENGTH, len);
    }
    response
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(internal_error)
}

/// Handler for GET /thumb/*id
async fn thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let thumbnail = state
        .library
        .get(&id)
        .and_then(|video| video.thumbnail)
        .ok_or_else(|| ApiError::not_found("thumbnail"))?;

    Ok((
        [(header::CONTENT_TYPE, thumbnail.mime.clone())],
        thumbnail.data.clone(),
    )
        .into_response())
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::new(e.status(), e.body_text())
}

/// Handler for POST /upload
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, ApiError> {
    let mut staged = None;
    let mut title = String::new();
    let mut description = String::new();
    let mut target = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mut staging = state.pipeline.begin_upload(&file_name).await?;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    staging.write_chunk(&chunk).await?;
                }
                staged = Some(staging.finish().await?);
            }
            "video_title" => title = field.text().await.map_err(multipart_error)?,
            "video_description" => description = field.text().await.map_err(multipart_error)?,
            "target_library_path" => target = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let staged = staged.ok_or_else(|| ApiError::bad_request("missing video_file"))?;
    info!(file = staged.original_name(), bytes = staged.size_bytes(), "Upload received");
    let report = state
        .pipeline
        .upload(staged, target.as_deref(), &title, &description)
        .await?;
    Ok(Json(report))
}

/// Handler for POST /import
async fn import(
    State(state): State<AppState>,
    Form(form): Form<ImportForm>,
) -> Result<Json<IngestReport>, ApiError> {
    info!(url = %form.url, "Import requested");
    let report = state
        .pipeline
        .import(&form.url, form.target_library_path.as_deref())
        .await?;
    Ok(Json(report))
}

/// Handler for GET /metrics
/// Returns the current MetricsSnapshot as JSON
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let snapshot = state.metrics.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/videos", get(list_videos))
        .route("/media/*id", get(media))
        .route("/thumb/*id", get(thumbnail))
        // size is enforced chunk by chunk while staging
        .route("/upload", post(upload).layer(DefaultBodyLimit::disable()))
        .route("/import", post(import))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

/// Runs the HTTP server until `shutdown` resolves
///
/// # Arguments
/// * `state` - Shared handler state
/// * `addr` - Address to listen on
/// * `shutdown` - Future that completes when the server should stop
///
/// # Returns
/// * `Ok(())` if server shuts down gracefully
/// * `Err(ServerError)` if server fails to start
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DirectLink;
    use crate::ingest::IngestSettings;
    use crate::library::PathEntry;
    use crate::metrics::new_shared_metrics;
    use crate::testing::{mp4_bytes, write_mp4, FakeTranscoder, Mp4Tags, FAKE_JPEG};
    use crate::views::{KvStore, MemoryStore};
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        talks: PathBuf,
        state: AppState,
    }

    fn fixture_with_views(views: ViewStore) -> Fixture {
        let dir = TempDir::new().unwrap();
        let library = Arc::new(Library::new());
        let root = library
            .add_path_entry(PathEntry::new(dir.path().join("lib"), ""))
            .unwrap()
            .root;
        let talks = library
            .add_path_entry(PathEntry::new(dir.path().join("talks"), "talks"))
            .unwrap()
            .root;

        write_mp4(&root.join("clip.mp4"), Some("Clip"));
        std::fs::write(root.join("clip.jpg"), FAKE_JPEG).unwrap();
        std::fs::write(root.join("clip#360p.mp4"), b"small rendition").unwrap();
        write_mp4(&root.join("other.mp4"), Some("Other"));
        write_mp4(&talks.join("keynote.mp4"), Some("Keynote"));
        library.import_all(&root).unwrap();
        library.import_all(&talks).unwrap();

        let metrics = new_shared_metrics();
        let settings = IngestSettings {
            staging_dir: dir.path().join("uploads"),
            max_source_bytes: 1 << 20,
            preserve_upload_filename: false,
            thumbnail_offset_secs: 3,
            variants: vec![crate::ingest::Variant {
                size: "640x360".into(),
                suffix: "360p".into(),
            }],
            max_concurrent: 1,
        };
        let pipeline = IngestPipeline::new(
            library.clone(),
            Arc::new(FakeTranscoder::new()),
            Arc::new(DirectLink),
            settings,
            metrics.clone(),
        )
        .unwrap();

        Fixture {
            _dir: dir,
            root,
            talks,
            state: AppState {
                library,
                views: Arc::new(views),
                pipeline: Arc::new(pipeline),
                metrics,
            },
        }
    }

    fn fixture() -> Fixture {
        fixture_with_views(ViewStore::in_memory())
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn get_path(state: &AppState, uri: &str) -> (StatusCode, Vec<u8>) {
        send(state, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    #[tokio::test]
    async fn test_list_videos_sorted_by_views() {
        let fx = fixture();
        fx.state.views.inc_views("other").unwrap();
        fx.state.views.inc_views("other").unwrap();
        fx.state.views.inc_views("clip").unwrap();

        let (status, body) = get_path(&fx.state, "/api/videos?sort=views").await;
        assert_eq!(status, StatusCode::OK);
        let videos: Vec<VideoSummary> = serde_json::from_slice(&body).unwrap();
        let ids: Vec<_> = videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["other", "clip", "talks/keynote"]);
        assert_eq!(videos[0].views, 2);
        assert!(videos[1].has_thumbnail);
    }

    #[tokio::test]
    async fn test_list_videos_rejects_unknown_sort() {
        let fx = fixture();
        let (status, _) = get_path(&fx.state, "/api/videos?sort=random").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_media_streams_file_and_counts_views() {
        let fx = fixture();
        let (status, body) = get_path(&fx.state, "/media/clip").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, std::fs::read(fx.root.join("clip.mp4")).unwrap());
        assert_eq!(fx.state.views.get_views("clip").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_media_quality_selection() {
        let fx = fixture();
        let (_, body) = get_path(&fx.state, "/media/clip?quality=360p").await;
        assert_eq!(body, b"small rendition");

        // unknown quality falls back to the canonical file
        let (status, body) = get_path(&fx.state, "/media/clip?quality=4k").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, std::fs::read(fx.root.join("clip.mp4")).unwrap());

        // variant requests count too
        assert_eq!(fx.state.views.get_views("clip").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_media_migrates_legacy_counter() {
        let kv = MemoryStore::new();
        kv.put("views/talks/talks/keynote", &7u64.to_be_bytes()).unwrap();
        let fx = fixture_with_views(ViewStore::new(kv));

        let (status, _) = get_path(&fx.state, "/media/talks/keynote").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fx.state.views.get_views("talks/keynote").unwrap(), 8);
        assert!(fx.talks.join("keynote.mp4").exists());
    }

    /// Store that only works off the async workers: `block_on` panics when
    /// called from inside the runtime's worker threads.
    struct BlockingOnlyStore(MemoryStore);

    impl BlockingOnlyStore {
        fn off_worker(&self) {
            tokio::runtime::Handle::current().block_on(async {});
        }
    }

    impl KvStore for BlockingOnlyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, crate::views::StoreError> {
            self.off_worker();
            self.0.get(key)
        }

        fn put(&self, key: &str, value: &[u8]) -> Result<(), crate::views::StoreError> {
            self.off_worker();
            self.0.put(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), crate::views::StoreError> {
            self.off_worker();
            self.0.delete(key)
        }
    }

    #[tokio::test]
    async fn test_view_store_runs_on_blocking_pool() {
        let fx = fixture_with_views(ViewStore::new(BlockingOnlyStore(MemoryStore::new())));

        let (status, _) = get_path(&fx.state, "/media/clip").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get_path(&fx.state, "/media/talks/keynote").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get_path(&fx.state, "/api/videos?sort=views").await;
        assert_eq!(status, StatusCode::OK);
        let videos: Vec<VideoSummary> = serde_json::from_slice(&body).unwrap();
        let clip = videos.iter().find(|v| v.id == "clip").unwrap();
        assert_eq!(clip.views, 1);
    }

    #[tokio::test]
    async fn test_media_unknown_id() {
        let fx = fixture();
        let (status, body) = get_path(&fx.state, "/media/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].is_string());
        assert_eq!(fx.state.views.get_views("nope").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_thumbnail() {
        let fx = fixture();
        let (status, body) = get_path(&fx.state, "/thumb/clip").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, FAKE_JPEG);

        let (status, _) = get_path(&fx.state, "/thumb/other").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    fn multipart_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let boundary = "reel-test-boundary";
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_publishes_video() {
        let fx = fixture();
        let video = mp4_bytes(&Mp4Tags::default());
        let request = multipart_request(&[
            ("video_title", None, b"Holiday"),
            ("video_description", None, b"Beach day"),
            ("video_file", Some("My Clip.mov"), &video),
        ]);

        let (status, body) = send(&fx.state, request).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id = report["id"].as_str().unwrap();

        let indexed = fx.state.library.get(id).unwrap();
        assert_eq!(indexed.title, "Holiday");
        assert_eq!(indexed.description, "Beach day");
        assert!(fx.root.join(format!("{}#360p.mp4", id)).exists());
    }

    #[tokio::test]
    async fn test_upload_to_named_target() {
        let fx = fixture();
        let video = mp4_bytes(&Mp4Tags::default());
        let talks = fx.talks.to_string_lossy().into_owned();
        let request = multipart_request(&[
            ("target_library_path", None, talks.as_bytes()),
            ("video_file", Some("clip.mov"), &video),
        ]);

        let (status, body) = send(&fx.state, request).await;
        assert_eq!(status, StatusCode::OK);
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(report["id"].as_str().unwrap().starts_with("talks/"));
    }

    #[tokio::test]
    async fn test_upload_errors_map_to_status() {
        let fx = fixture();

        let (status, _) = send(&fx.state, multipart_request(&[("video_title", None, b"x")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let video = mp4_bytes(&Mp4Tags::default());
        let request = multipart_request(&[
            ("target_library_path", None, b"/not/registered"),
            ("video_file", Some("clip.mov"), &video),
        ]);
        let (status, _) = send(&fx.state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let big = vec![0u8; (1 << 20) + 1];
        let request = multipart_request(&[("video_file", Some("big.mov"), &big)]);
        let (status, _) = send(&fx.state, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_url() {
        let fx = fixture();
        let request = Request::builder()
            .method("POST")
            .uri("/import")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("url=file%3A%2F%2F%2Fetc%2Fpasswd"))
            .unwrap();

        let (status, _) = send(&fx.state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_metrics_returns_json() {
        let fx = fixture();
        {
            let mut snapshot = fx.state.metrics.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.completed_ingests = 42;
        }

        let (status, body) = get_path(&fx.state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: MetricsSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.timestamp_unix_ms, 1701388800000);
        assert_eq!(snapshot.completed_ingests, 42);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Resource), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status_for(ErrorKind::ExternalProcess),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(ErrorKind::Network), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::SizeExceeded), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_collection_of() {
        assert_eq!(collection_of("clip"), "");
        assert_eq!(collection_of("talks/keynote"), "talks");
        assert_eq!(collection_of("a/b/c"), "a/b");
    }
}
