//! Directory-to-transport producer loop.
//!
//! Each pass lists the source directory from scratch, so files added or removed
//! between passes are picked up. The loop only ends when shutdown is requested.

use crate::image_source::{DecodeError, DecodedImage, DecoderRegistry};
use framevault_pipeline::{FrameHeader, FramePublisher, Shutdown};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors that end the producer run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source {path} is unavailable: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },
}

/// How a producer run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// Shutdown was requested
    Stopped,
    /// The source held no decodable files at startup
    EmptySource,
}

/// Statistics for one producer run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProducerStats {
    pub passes: u64,
    pub frames_published: u64,
    pub files_skipped: u64,
    pub decode_failures: u64,
    pub publish_failures: u64,
    pub bytes_published: u64,
    /// Passes where the directory could not be listed
    pub rescan_failures: u64,
}

/// Outcome of loading one file on the blocking pool.
enum Loaded {
    Image(DecodedImage),
    NoDecoder,
    Failed(DecodeError),
}

/// Publishes every decodable file of a directory, pass after pass.
pub struct StreamProducer<P> {
    publisher: P,
    registry: Arc<DecoderRegistry>,
    idle_rescan: Duration,
    next_frame_number: u64,
    last_timestamp_ns: Option<u64>,
    stats: ProducerStats,
}

impl<P: FramePublisher> StreamProducer<P> {
    pub fn new(publisher: P, registry: DecoderRegistry, idle_rescan: Duration) -> Self {
        Self {
            publisher,
            registry: Arc::new(registry),
            idle_rescan,
            next_frame_number: 0,
            last_timestamp_ns: None,
            stats: ProducerStats::default(),
        }
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run until shutdown is requested.
    ///
    /// Fails with [`IngestError::SourceUnavailable`] when `dir` is not a readable
    /// directory at startup. Returns [`ProducerExit::EmptySource`] straight away
    /// when no file in it has a decoder. Later listing failures only skip a pass.
    #[instrument(skip(self, shutdown), fields(source = %dir.display()))]
    pub async fn run(&mut self, dir: &Path, shutdown: &Shutdown) -> Result<ProducerExit, IngestError> {
        let metadata = tokio::fs::metadata(dir)
            .await
            .map_err(|e| unavailable(dir, e.to_string()))?;
        if !metadata.is_dir() {
            return Err(unavailable(dir, "not a directory".to_string()));
        }

        let files = list_files(dir).await?;
        let images = files
            .iter()
            .filter(|path| self.registry.resolve(path).is_some())
            .count();
        if images == 0 {
            info!(files = files.len(), "No image files found in source directory");
            return Ok(ProducerExit::EmptySource);
        }
        info!(files = files.len(), images, "Found source files");

        while shutdown.is_running() {
            // Once running, a directory that cannot be listed is retried, not fatal
            let published = match self.run_pass(dir, shutdown).await {
                Ok(published) => published,
                Err(e) => {
                    self.stats.rescan_failures += 1;
                    warn!(error = %e, "Failed to rescan source directory");
                    0
                }
            };

            if published == 0 && shutdown.is_running() {
                debug!(delay_ms = self.idle_rescan.as_millis() as u64, "Nothing published, idling");
                tokio::select! {
                    _ = shutdown.wait() => {}
                    _ = tokio::time::sleep(self.idle_rescan) => {}
                }
            }
        }

        Ok(ProducerExit::Stopped)
    }

    /// List the directory once and publish every file in name order.
    ///
    /// Returns the number of frames published in this pass.
    pub async fn run_pass(&mut self, dir: &Path, shutdown: &Shutdown) -> Result<u64, IngestError> {
        self.stats.passes += 1;
        let files = list_files(dir).await?;
        let mut published = 0;

        for path in files {
            if !shutdown.is_running() {
                break;
            }

            let image = match self.load(path.clone()).await {
                Loaded::Image(image) => image,
                Loaded::NoDecoder => {
                    self.stats.files_skipped += 1;
                    warn!(path = %path.display(), "No decoder for file, skipping");
                    continue;
                }
                Loaded::Failed(e) => {
                    self.stats.decode_failures += 1;
                    warn!(path = %path.display(), error = %e, "Failed to load image");
                    continue;
                }
            };

            let header = self.next_header(&image);
            match self.publisher.publish(&header, &image.pixels).await {
                Ok(delivery) => {
                    published += 1;
                    self.stats.frames_published += 1;
                    self.stats.bytes_published += header.pixel_count;
                    debug!(
                        path = %path.display(),
                        frame_number = header.frame_number,
                        bytes = header.pixel_count,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Published frame"
                    );
                }
                Err(e) => {
                    self.stats.publish_failures += 1;
                    warn!(
                        path = %path.display(),
                        frame_number = header.frame_number,
                        error = %e,
                        "Failed to publish frame"
                    );
                }
            }
        }

        Ok(published)
    }

    /// Decode one file on the blocking pool.
    async fn load(&self, path: PathBuf) -> Loaded {
        let registry = Arc::clone(&self.registry);
        let task = tokio::task::spawn_blocking(move || match registry.resolve(&path) {
            Some(decoder) => match decoder.load(&path) {
                Ok(image) => Loaded::Image(image),
                Err(e) => Loaded::Failed(e),
            },
            None => Loaded::NoDecoder,
        });

        match task.await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "Decoder task failed");
                Loaded::Failed(DecodeError::Worker(e.to_string()))
            }
        }
    }

    /// Assign the next frame number and a strictly increasing timestamp.
    fn next_header(&mut self, image: &DecodedImage) -> FrameHeader {
        let frame_number = self.next_frame_number;
        self.next_frame_number += 1;

        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .unwrap_or(0);
        let timestamp_ns = match self.last_timestamp_ns {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_timestamp_ns = Some(timestamp_ns);

        FrameHeader {
            width: image.width,
            height: image.height,
            channels: image.channels,
            pixel_format: image.pixel_format.tag(),
            frame_number,
            timestamp_ns,
            pixel_count: image.pixels.len() as u64,
        }
    }
}

fn unavailable(path: &Path, reason: String) -> IngestError {
    IngestError::SourceUnavailable {
        path: path.to_path_buf(),
        reason,
    }
}

/// Regular files directly inside `dir`, sorted by file name.
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| unavailable(dir, e.to_string()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| unavailable(dir, e.to_string()))?
    {
        let path = entry.path();
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framevault_pipeline::{async_trait, DeliveryResult, ProducerError};
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        frames: Mutex<Vec<(FrameHeader, usize)>>,
        fail: bool,
        stop_after: Option<(usize, Shutdown)>,
        remove_after_first: Option<PathBuf>,
    }

    impl RecordingPublisher {
        fn frames(&self) -> Vec<(FrameHeader, usize)> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FramePublisher for RecordingPublisher {
        async fn publish(
            &self,
            header: &FrameHeader,
            pixels: &[u8],
        ) -> Result<DeliveryResult, ProducerError> {
            if self.fail {
                return Err(ProducerError::SendError {
                    topic: "frames".to_string(),
                    message: "broker unavailable".to_string(),
                });
            }

            let mut frames = self.frames.lock().unwrap();
            frames.push((*header, pixels.len()));
            if let Some(dir) = &self.remove_after_first {
                if frames.len() == 1 {
                    std::fs::remove_dir_all(dir).unwrap();
                }
            }
            if let Some((limit, shutdown)) = &self.stop_after {
                if frames.len() >= *limit {
                    shutdown.request();
                }
            }

            Ok(DeliveryResult {
                topic: "frames".to_string(),
                partition: 0,
                offset: frames.len() as i64 - 1,
            })
        }
    }

    fn producer(publisher: RecordingPublisher) -> StreamProducer<RecordingPublisher> {
        StreamProducer::new(publisher, DecoderRegistry::default(), Duration::from_millis(10))
    }

    fn write_source(dir: &Path) {
        RgbImage::from_pixel(4, 3, Rgb([1, 2, 3])).save(dir.join("a.png")).unwrap();
        RgbImage::from_pixel(8, 8, Rgb([200, 100, 50])).save(dir.join("b.jpg")).unwrap();
        std::fs::write(dir.join("c.txt"), b"not an image").unwrap();
    }

    #[tokio::test]
    async fn test_pass_publishes_decodable_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path());

        let mut producer = producer(RecordingPublisher::default());
        let published = producer.run_pass(dir.path(), &Shutdown::new()).await.unwrap();

        assert_eq!(published, 2);
        let frames = producer.publisher().frames();
        assert_eq!(frames.len(), 2);

        let (first, first_len) = frames[0];
        let (second, second_len) = frames[1];
        assert_eq!(first.frame_number, 0);
        assert_eq!(second.frame_number, 1);
        assert!(second.timestamp_ns > first.timestamp_ns);

        assert_eq!((first.width, first.height, first.channels), (4, 3, 3));
        assert_eq!(first.pixel_count, 4 * 3 * 3);
        assert_eq!(first_len as u64, first.pixel_count);
        assert_eq!(second_len as u64, second.pixel_count);

        assert_eq!(producer.stats().files_skipped, 1);
        assert_eq!(producer.stats().frames_published, 2);
    }

    #[tokio::test]
    async fn test_frame_numbers_continue_across_passes() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path());

        let mut producer = producer(RecordingPublisher::default());
        let shutdown = Shutdown::new();
        producer.run_pass(dir.path(), &shutdown).await.unwrap();
        producer.run_pass(dir.path(), &shutdown).await.unwrap();

        let numbers: Vec<u64> = producer
            .publisher()
            .frames()
            .iter()
            .map(|(h, _)| h.frame_number)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);

        let frames = producer.publisher().frames();
        assert!(frames.windows(2).all(|w| w[1].0.timestamp_ns > w[0].0.timestamp_ns));
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_requested() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path());

        let shutdown = Shutdown::new();
        let publisher = RecordingPublisher {
            stop_after: Some((3, shutdown.clone())),
            ..Default::default()
        };
        let mut producer = producer(publisher);

        let exit = producer.run(dir.path(), &shutdown).await.unwrap();

        assert_eq!(exit, ProducerExit::Stopped);
        assert_eq!(producer.publisher().frames().len(), 3);
        assert_eq!(producer.stats().passes, 2);
    }

    #[tokio::test]
    async fn test_publish_failure_consumes_frame_number() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path());

        let mut producer = producer(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let published = producer.run_pass(dir.path(), &Shutdown::new()).await.unwrap();

        assert_eq!(published, 0);
        assert_eq!(producer.stats().publish_failures, 2);
        assert_eq!(producer.next_frame_number, 2);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"garbage").unwrap();
        RgbImage::new(2, 2).save(dir.path().join("ok.png")).unwrap();

        let mut producer = producer(RecordingPublisher::default());
        producer.run_pass(dir.path(), &Shutdown::new()).await.unwrap();

        assert_eq!(producer.stats().decode_failures, 1);
        let frames = producer.publisher().frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.frame_number, 0);
    }

    #[tokio::test]
    async fn test_empty_directory_exits_immediately() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let mut producer = producer(RecordingPublisher::default());
        let exit = producer.run(dir.path(), &Shutdown::new()).await.unwrap();

        assert_eq!(exit, ProducerExit::EmptySource);
        assert_eq!(producer.stats().passes, 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let mut producer = producer(RecordingPublisher::default());
        let result = producer.run(&missing, &Shutdown::new()).await;

        assert!(matches!(result, Err(IngestError::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_file_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        RgbImage::new(1, 1).save(&file).unwrap();

        let mut producer = producer(RecordingPublisher::default());
        let result = producer.run(&file, &Shutdown::new()).await;

        assert!(matches!(result, Err(IngestError::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_only_undecodable_files_is_an_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.txt"), b"not an image").unwrap();
        std::fs::write(dir.path().join("notes.md"), b"# notes").unwrap();

        let mut producer = producer(RecordingPublisher::default());
        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            producer.run(dir.path(), &Shutdown::new()),
        )
        .await
        .expect("run should return without a shutdown request")
        .unwrap();

        assert_eq!(exit, ProducerExit::EmptySource);
        assert_eq!(producer.stats().passes, 0);
    }

    #[tokio::test]
    async fn test_source_removed_while_running_keeps_producer_alive() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("src");
        std::fs::create_dir(&source).unwrap();
        write_source(&source);

        let shutdown = Shutdown::new();
        let mut producer = producer(RecordingPublisher {
            remove_after_first: Some(source.clone()),
            ..Default::default()
        });

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.request();
        });

        let exit = producer.run(&source, &shutdown).await.unwrap();

        assert_eq!(exit, ProducerExit::Stopped);
        assert!(!shutdown.is_running());
        assert_eq!(producer.publisher().frames().len(), 1);
        assert!(producer.stats().rescan_failures >= 1);
        assert!(producer.stats().passes >= 2);
    }
}
