use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::archive::extract_zip;
use super::blob::{BlobClient, BlobError};
use crate::config_manager::{AssetsConfig, ConfigError};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("cannot reach asset storage")]
    Config(#[from] ConfigError),

    #[error("failed to download model assets")]
    Blob(#[from] BlobError),

    #[error("failed to extract {path}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("filesystem error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

/// Make sure the model bundle is unpacked in `local_path`.
///
/// A directory with any entry in it counts as provisioned and the network is
/// not touched. Otherwise the blob named by `remote` is streamed into a
/// temporary file beside `local_path`, unpacked, and the temporary file is
/// removed. The connection string is only resolved when a download happens.
pub async fn ensure_assets(
    remote: &AssetsConfig,
    local_path: &Path,
    progress: &mut (dyn FnMut(u64, u64) + Send),
) -> Result<Provisioned, ProvisionError> {
    let io_error = |source| ProvisionError::Io {
        path: local_path.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(local_path).await.map_err(io_error)?;
    if is_populated(local_path).await.map_err(io_error)? {
        info!("Model assets already present in {}", local_path.display());
        return Ok(Provisioned::AlreadyPresent);
    }

    let connection_string = remote.resolve_connection_string()?;
    let client = BlobClient::from_connection_string(
        &connection_string,
        &remote.container_name,
        &remote.blob_name,
    )?;

    let properties = client.properties().await?;
    info!(
        "Downloading {} ({} bytes) into {}",
        remote.blob_name,
        properties.content_length,
        local_path.display()
    );

    // Beside the target so a crash mid-download never leaves the target
    // looking populated.
    let staging_dir = staging_dir(local_path);
    let archive = tempfile::Builder::new()
        .prefix(".assets-")
        .suffix(".zip")
        .tempfile_in(&staging_dir)
        .map_err(|source| ProvisionError::Io {
            path: staging_dir.clone(),
            source,
        })?;
    let archive_path = archive.path().to_path_buf();

    let std_file = archive.reopen().map_err(|source| ProvisionError::Io {
        path: archive_path.clone(),
        source,
    })?;
    let mut file = tokio::fs::File::from_std(std_file);
    let bytes = client
        .download(&mut file, properties.content_length, progress)
        .await?;
    drop(file);

    info!("Download complete, extracting {}", archive_path.display());
    let target = local_path.to_path_buf();
    let source_path = archive_path.clone();
    let extracted = tokio::task::spawn_blocking(move || extract_zip(&source_path, &target)).await?;

    match extracted {
        Ok(files) => info!("Extracted {} files into {}", files, local_path.display()),
        Err(source) => {
            clear_dir(local_path).await;
            return Err(ProvisionError::Archive {
                path: archive_path,
                source,
            });
        }
    }

    archive.close().map_err(|source| ProvisionError::Io {
        path: archive_path,
        source,
    })?;

    Ok(Provisioned::Downloaded { bytes })
}

/// Progress reporter that logs every 5% and on completion.
pub fn logging_progress(label: impl Into<String>) -> impl FnMut(u64, u64) + Send {
    let label = label.into();
    let mut last_step = None;
    move |downloaded, total| {
        let percent = if total == 0 {
            100
        } else {
            downloaded.saturating_mul(100) / total
        };
        let step = percent / 5;
        if last_step == Some(step) && downloaded != total {
            return;
        }
        last_step = Some(step);
        info!("{}: {}% ({}/{} bytes)", label, percent, downloaded, total);
    }
}

async fn is_populated(dir: &Path) -> std::io::Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_some())
}

fn staging_dir(local_path: &Path) -> PathBuf {
    match local_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn clear_dir(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        warn!("Failed to clean up {}: {}", dir.display(), err);
    }
    if let Err(err) = tokio::fs::create_dir_all(dir).await {
        warn!("Failed to recreate {}: {}", dir.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::sync::Arc;

    use axum::{
        body::Body,
        extract::State,
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::get,
        Router,
    };
    use zip::write::FileOptions;

    use super::*;

    const BLOB_PATH: &str = "/devstoreaccount1/translationapp/Fine_Tune_Weight.zip";

    fn bundle() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in [
            ("Fine_Tune_Weight/FineTunedHelsinkiTransformer_en_Fr/config.json", "{}"),
            ("Fine_Tune_Weight/FineTunedHelsinkiTransformer_en_Fr/tokenizer.json", "{}"),
        ] {
            writer.start_file(name, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("SharedKey devstoreaccount1:"))
            && headers.contains_key("x-ms-date")
            && headers.contains_key("x-ms-version")
    }

    async fn head_blob(State(body): State<Arc<Vec<u8>>>, headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::FORBIDDEN.into_response();
        }
        (StatusCode::OK, [(header::CONTENT_LENGTH, body.len().to_string())]).into_response()
    }

    async fn get_blob(State(body): State<Arc<Vec<u8>>>, headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::FORBIDDEN.into_response();
        }
        Body::from(body.as_ref().clone()).into_response()
    }

    /// Serves `body` as the weights blob on an ephemeral port.
    async fn fake_blob_store(body: Vec<u8>) -> String {
        let app = Router::new()
            .route(BLOB_PATH, get(get_blob).head(head_blob))
            .with_state(Arc::new(body));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/devstoreaccount1")
    }

    fn remote(blob_endpoint: &str) -> AssetsConfig {
        AssetsConfig {
            connection_string: Some(format!(
                "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;AccountKey=c2VjcmV0LWtleQ==;BlobEndpoint={blob_endpoint}"
            )),
            ..AssetsConfig::default()
        }
    }

    #[tokio::test]
    async fn downloads_and_extracts_bundle() {
        let body = bundle();
        let total = body.len() as u64;
        let endpoint = fake_blob_store(body).await;

        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("Weight");
        let mut seen = Vec::new();
        let mut record = |done: u64, total: u64| seen.push((done, total));

        let outcome = ensure_assets(&remote(&endpoint), &target, &mut record).await.unwrap();

        assert_eq!(outcome, Provisioned::Downloaded { bytes: total });
        assert!(target
            .join("Fine_Tune_Weight/FineTunedHelsinkiTransformer_en_Fr/config.json")
            .is_file());
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last(), Some(&(total, total)));

        // Only the target directory remains beside it.
        let leftovers: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn populated_directory_skips_network() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("Weight");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("marker"), b"x").unwrap();

        // Nothing listens on port 9; a download attempt would fail.
        let outcome = ensure_assets(&remote("http://127.0.0.1:9/devstoreaccount1"), &target, &mut |_, _| {})
            .await
            .unwrap();
        assert_eq!(outcome, Provisioned::AlreadyPresent);
    }

    #[tokio::test]
    async fn corrupt_archive_leaves_target_empty() {
        let endpoint = fake_blob_store(b"this is not a zip archive".to_vec()).await;
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("Weight");

        let err = ensure_assets(&remote(&endpoint), &target, &mut |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Archive { .. }));
        assert!(target.is_dir());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn http_errors_are_typed() {
        let endpoint = fake_blob_store(bundle()).await;
        let mut config = remote(&endpoint);
        config.blob_name = "missing.zip".to_string();
        let root = tempfile::tempdir().unwrap();

        let err = ensure_assets(&config, &root.path().join("Weight"), &mut |_, _| {})
            .await
            .unwrap_err();

        match err {
            ProvisionError::Blob(BlobError::Status { status, .. }) => assert_eq!(status.as_u16(), 404),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_connection_string_only_matters_when_downloading() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("Weight");
        let config = AssetsConfig::default();

        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("marker"), b"x").unwrap();
        assert_eq!(
            ensure_assets(&config, &target, &mut |_, _| {}).await.unwrap(),
            Provisioned::AlreadyPresent
        );
    }

    #[test]
    fn staging_dir_is_never_the_target() {
        assert_eq!(staging_dir(Path::new("Weight")), PathBuf::from("."));
        assert_eq!(staging_dir(Path::new("./Weight")), PathBuf::from("."));
        assert_eq!(staging_dir(Path::new("/srv/app/Weight")), PathBuf::from("/srv/app"));
    }
}
