//! End-to-end controller tests against a local mock HTTP server.

use async_trait::async_trait;
use miaobox::controller::{
    BatchItemStatus, ControllerConfig, DownloadController, DownloadKind, JobOutcome, JobState,
    StartOptions,
};
use miaobox::downloader::probe::SAMPLE_SIZE;
use miaobox::downloader::{DownloadConfig, DownloadEngine};
use miaobox::extractor::{
    FetchOptions, MediaEntry, MediaExtractor, MediaProbe, MediaProgress, ProgressCallback,
};
use miaobox::history::{FileKind, HistoryStatus, HistoryStore};
use miaobox::utils::{LoaderError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `Range: bytes=a-b` requests with 206 slices and plain GETs with 200.
///
/// A delay applies to chunk requests only; the name sample comes back at once.
struct RangeResponder {
    body: Vec<u8>,
    delay: Option<Duration>,
}

impl RangeResponder {
    fn new(body: Vec<u8>) -> Self {
        Self { body, delay: None }
    }

    fn delayed(body: Vec<u8>, delay: Duration) -> Self {
        Self {
            body,
            delay: Some(delay),
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(start, end)| Some((start.parse::<u64>().ok()?, end.parse::<u64>().ok()?)));

        let template = match range {
            Some((start, end)) if start < len => {
                let end = end.min(len - 1);
                ResponseTemplate::new(206)
                    .insert_header("content-range", format!("bytes {}-{}/{}", start, end, len))
                    .set_body_bytes(self.body[start as usize..=end as usize].to_vec())
            }
            Some(_) => ResponseTemplate::new(416),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        };

        match self.delay {
            Some(delay) if range != Some((0, SAMPLE_SIZE as u64 - 1)) => template.set_delay(delay),
            _ => template,
        }
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn mount_head(server: &MockServer, route: &str, body: &[u8], ranges: bool) {
    let mut template = ResponseTemplate::new(200)
        .insert_header("content-length", body.len().to_string())
        .set_body_bytes(body.to_vec());
    if ranges {
        template = template.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

fn small_chunks() -> DownloadConfig {
    DownloadConfig {
        max_threads: 4,
        min_chunk_size: 1024,
        timeout: Duration::from_secs(5),
        progress_interval: Duration::from_millis(10),
        allowed_content_types: None,
    }
}

async fn controller(
    dir: &TempDir,
    config: DownloadConfig,
    extractor: Option<Arc<dyn MediaExtractor>>,
) -> DownloadController {
    let history = HistoryStore::open(dir.path().join("history.json"))
        .await
        .unwrap();
    let engine = DownloadEngine::new(config).unwrap();
    DownloadController::new(
        engine,
        Arc::new(history),
        extractor,
        ControllerConfig {
            save_path: dir.path().join("downloads"),
            max_retries: 3,
            retry_delay: Duration::from_millis(20),
            user_agent: "miaobox-test".to_string(),
            progress_interval: Duration::from_millis(10),
            subtitle_langs: vec!["en".to_string()],
            cookies_file: None,
        },
    )
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn file_options() -> StartOptions {
    StartOptions {
        kind: DownloadKind::File,
        ..Default::default()
    }
}

#[tokio::test]
async fn parallel_download_reassembles_file() {
    let server = MockServer::start().await;
    let body = payload(10_000);
    mount_head(&server, "/files/data.bin", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/files/data.bin"))
        .respond_with(RangeResponder::new(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/files/data.bin", server.uri());

    let started = controller.start(&url, None, file_options()).await.unwrap();
    assert_eq!(started.file_name, "data.bin");

    let outcome = controller.wait().await.unwrap();
    let JobOutcome::Completed {
        file_name,
        path,
        bytes,
    } = outcome
    else {
        panic!("expected completion, got {:?}", outcome);
    };

    assert_eq!(bytes, 10_000);
    assert!(file_name.starts_with("data_"), "{}", file_name);
    assert!(file_name.ends_with(".bin"), "{}", file_name);
    assert_eq!(std::fs::read(&path).unwrap(), body);

    let status = controller.status();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.progress.bytes_downloaded, 10_000);
    assert_eq!(status.progress.chunks.len(), 4);
    assert!((status.progress.percentage - 100.0).abs() < f64::EPSILON);

    let history = controller.history().list(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Completed);
    assert_eq!(history[0].file_type, FileKind::File);
    assert_eq!(history[0].file_size_bytes, 10_000);
    assert!(!controller.is_active());
}

#[tokio::test]
async fn single_stream_without_range_support() {
    let server = MockServer::start().await;
    let body = payload(3_000);
    mount_head(&server, "/report.pdf", &body, false).await;
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=\"Q3 report.pdf\"")
                .set_body_bytes(body.clone()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/report.pdf", server.uri());

    controller.start(&url, None, file_options()).await.unwrap();
    let outcome = controller.wait().await.unwrap();
    let JobOutcome::Completed { file_name, path, .. } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };

    assert!(file_name.starts_with("Q3 report_"), "{}", file_name);
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert_eq!(controller.status().progress.chunks.len(), 1);
}

#[tokio::test]
async fn second_start_conflicts_while_active() {
    let server = MockServer::start().await;
    let body = payload(8_000);
    mount_head(&server, "/slow.bin", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(RangeResponder::delayed(body, Duration::from_millis(800)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/slow.bin", server.uri());

    let first = controller.start(&url, None, file_options()).await.unwrap();
    let err = controller.start(&url, None, file_options()).await.unwrap_err();
    assert!(matches!(err, LoaderError::Conflict));
    assert_eq!(controller.status().job_id, Some(first.job_id));
    assert!(!controller.status().state.is_terminal());

    let err = controller
        .batch_start(&[url.clone()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, LoaderError::Conflict));

    assert!(controller.cancel().await);
    assert!(!controller.is_active());
}

#[tokio::test]
async fn cancel_removes_partial_file_and_records_once() {
    let server = MockServer::start().await;
    let body = payload(20_000);
    mount_head(&server, "/big.iso", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/big.iso"))
        .respond_with(RangeResponder::delayed(body, Duration::from_millis(500)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/big.iso", server.uri());

    controller.start(&url, None, file_options()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(controller.cancel().await);
    assert!(!controller.is_active());
    assert!(!controller.cancel().await);

    let status = controller.status();
    assert_eq!(status.state, JobState::Cancelled);
    assert!(files_in(&dir.path().join("downloads")).is_empty());

    let history = controller.history().list(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Cancelled);
    assert!(matches!(
        controller.wait().await,
        Some(JobOutcome::Cancelled { .. })
    ));
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let server = MockServer::start().await;
    let body = payload(5_000);
    Mock::given(method("HEAD"))
        .and(path("/flaky.bin"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_head(&server, "/flaky.bin", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(RangeResponder::new(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/flaky.bin", server.uri());

    controller.start(&url, None, file_options()).await.unwrap();
    let outcome = controller.wait().await.unwrap();
    let JobOutcome::Completed { path, .. } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert_eq!(controller.status().attempt, 2);

    let history = controller.history().list(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Completed);
}

#[tokio::test]
async fn ignored_range_fails_without_retry() {
    let server = MockServer::start().await;
    let body = payload(6_000);
    mount_head(&server, "/liar.bin", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/liar.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/liar.bin", server.uri());

    controller.start(&url, None, file_options()).await.unwrap();
    let outcome = controller.wait().await.unwrap();
    let JobOutcome::Failed { kind, message } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(kind, "partial_chunk_failure");
    assert!(message.contains("range"), "{}", message);

    let status = controller.status();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempt, 1);
    assert!(files_in(&dir.path().join("downloads")).is_empty());
    assert!(controller.history().list(10).await.is_empty());
}

#[tokio::test]
async fn missing_resource_fails_after_all_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/gone.bin"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/gone.bin", server.uri());

    controller.start(&url, None, file_options()).await.unwrap();
    let outcome = controller.wait().await.unwrap();
    assert!(matches!(outcome, JobOutcome::Failed { kind: "network", .. }));
    assert_eq!(controller.status().attempt, 3);
}

#[tokio::test]
async fn batch_runs_every_url_in_order() {
    let server = MockServer::start().await;
    let first = payload(2_000);
    mount_head(&server, "/one.bin", &first, true).await;
    Mock::given(method("GET"))
        .and(path("/one.bin"))
        .respond_with(RangeResponder::new(first))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/two.bin"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let urls = vec![
        format!("{}/one.bin", server.uri()),
        format!("{}/two.bin", server.uri()),
    ];

    assert_eq!(controller.batch_start(&urls, None).await.unwrap(), 2);
    controller.wait().await;

    let report = controller.batch_status();
    assert!(!report.running);
    assert_eq!(report.total, 2);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].status, BatchItemStatus::Success);
    assert_eq!(report.results[1].status, BatchItemStatus::Failed);
    assert!(report.results[1].error.is_some());
    assert!(!controller.is_active());

    let history = controller.history().list(10).await;
    assert_eq!(history.len(), 1);
}

/// Extractor double: a three-entry playlist whose middle entry fails
struct FakePlaylist;

#[async_trait]
impl MediaExtractor for FakePlaylist {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self, _url: &str) -> Result<MediaProbe> {
        let entry = |id: &str| MediaEntry {
            url: format!("https://video.test/watch/{}", id),
            id: Some(id.to_string()),
            title: Some(format!("Episode {}", id)),
        };
        Ok(MediaProbe {
            is_playlist: true,
            title: Some("Season".to_string()),
            entries: vec![entry("1"), entry("2"), entry("3")],
        })
    }

    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        on_progress: ProgressCallback,
    ) -> Result<PathBuf> {
        if url.ends_with("/2") {
            return Err(LoaderError::Extraction("video unavailable".to_string()));
        }

        let id = url.rsplit('/').next().unwrap_or("x");
        tokio::fs::create_dir_all(&options.save_dir).await?;
        let path = options.save_dir.join(format!("episode-{}.mp4", id));
        tokio::fs::write(&path, vec![0u8; 512]).await?;

        on_progress(MediaProgress {
            downloaded_bytes: 512,
            total_bytes: 512,
            percentage: 100.0,
            speed_bps: 1024.0,
        });
        Ok(path)
    }
}

#[tokio::test]
async fn media_playlist_skips_failed_entries() {
    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), Some(Arc::new(FakePlaylist))).await;

    let options = StartOptions {
        kind: DownloadKind::Media,
        ..Default::default()
    };
    controller
        .start("https://video.test/playlist", None, options)
        .await
        .unwrap();

    let outcome = controller.wait().await.unwrap();
    let JobOutcome::Completed { file_name, .. } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(file_name, "episode-3.mp4");

    let history = controller.history().list(10).await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.file_type == FileKind::Video));
    assert_eq!(history[0].url, "https://video.test/watch/3");
    assert_eq!(history[1].url, "https://video.test/watch/1");
    assert_eq!(history[0].file_size_bytes, 512);
}

#[tokio::test]
async fn media_url_without_extractor_is_rejected() {
    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;

    let err = controller
        .start(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            None,
            StartOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LoaderError::InvalidInput(_)));
    assert!(!controller.is_active());
}

#[tokio::test]
async fn outside_destination_is_rejected() {
    let server = MockServer::start().await;
    let body = payload(4_000);
    mount_head(&server, "/report.pdf", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(RangeResponder::new(body))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/report.pdf", server.uri());
    let escape = outside.path().join("escape");

    controller
        .start(&url, Some(escape.clone()), file_options())
        .await
        .unwrap();
    let outcome = controller.wait().await.unwrap();

    let JobOutcome::Failed { kind, .. } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(kind, "path_traversal");
    assert_eq!(controller.status().attempt, 1);
    assert!(!escape.exists());
    assert!(files_in(outside.path()).is_empty());
    assert!(controller.history().list(10).await.is_empty());

    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn relative_destination_lands_under_save_root() {
    let server = MockServer::start().await;
    let body = payload(3_000);
    mount_head(&server, "/song.mp3", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/song.mp3"))
        .respond_with(RangeResponder::new(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/song.mp3", server.uri());

    controller
        .start(&url, Some(PathBuf::from("music")), file_options())
        .await
        .unwrap();
    let outcome = controller.wait().await.unwrap();

    let JobOutcome::Completed { path, .. } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    let music = dir.path().join("downloads").join("music").canonicalize().unwrap();
    assert_eq!(path.parent(), Some(music.as_path()));
    assert_eq!(std::fs::read(&path).unwrap(), body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_start_stops_the_new_job() {
    let server = MockServer::start().await;
    let body = payload(40_000);
    mount_head(&server, "/race.bin", &body, true).await;
    Mock::given(method("GET"))
        .and(path("/race.bin"))
        .respond_with(RangeResponder::delayed(body, Duration::from_secs(3)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), None).await;
    let url = format!("{}/race.bin", server.uri());

    for _ in 0..5 {
        let racer = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.cancel().await })
        };
        controller.start(&url, None, file_options()).await.unwrap();

        // A cancel that ran before the launch found nothing to stop
        if !racer.await.unwrap() {
            assert!(controller.cancel().await);
        }

        let outcome = tokio::time::timeout(Duration::from_secs(2), controller.wait())
            .await
            .expect("cancelled job should stop well before its chunks arrive");
        assert!(matches!(outcome, Some(JobOutcome::Cancelled { .. })));
        assert!(!controller.is_active());
    }

    assert!(files_in(&dir.path().join("downloads")).is_empty());
}

/// Extractor that writes nothing and waits until the job is cancelled
struct StalledFetch;

#[async_trait]
impl MediaExtractor for StalledFetch {
    fn id(&self) -> &'static str {
        "stalled"
    }

    async fn probe(&self, url: &str) -> Result<MediaProbe> {
        Ok(MediaProbe {
            is_playlist: false,
            title: Some("Clip".to_string()),
            entries: vec![MediaEntry {
                url: url.to_string(),
                id: Some("clip".to_string()),
                title: Some("Clip".to_string()),
            }],
        })
    }

    async fn fetch(
        &self,
        _url: &str,
        options: &FetchOptions,
        on_progress: ProgressCallback,
    ) -> Result<PathBuf> {
        on_progress(MediaProgress {
            downloaded_bytes: 256,
            total_bytes: 1024,
            percentage: 25.0,
            speed_bps: 512.0,
        });
        options.cancel.cancelled().await;
        Err(LoaderError::Cancelled {
            partial: Some(options.save_dir.join("clip.mp4")),
        })
    }
}

#[tokio::test]
async fn media_cancel_records_the_output_path() {
    let dir = TempDir::new().unwrap();
    let controller = controller(&dir, small_chunks(), Some(Arc::new(StalledFetch))).await;

    let options = StartOptions {
        kind: DownloadKind::Media,
        ..Default::default()
    };
    controller
        .start("https://video.test/watch/clip", None, options)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(controller.cancel().await);
    assert!(matches!(
        controller.wait().await,
        Some(JobOutcome::Cancelled { bytes: 256 })
    ));

    let expected = dir
        .path()
        .join("downloads")
        .canonicalize()
        .unwrap()
        .join("clip.mp4");
    let history = controller.history().list(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Cancelled);
    assert_eq!(history[0].file_type, FileKind::Video);
    assert_eq!(history[0].file_name, "clip.mp4");
    assert_eq!(history[0].file_path, expected);
}
