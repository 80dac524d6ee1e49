//! Message handler that feeds the persistence engine.

use crate::engine::PersistenceEngine;
use crate::store::Store;
use framevault_pipeline::{async_trait, ConsumerError, IncomingMessage, MessageHandler, MessageMetadata};
use tracing::{debug, warn};

/// Forwards every received payload to [`PersistenceEngine::write`].
///
/// Frame messages are checked against their header first and only the declared
/// `pixel_count` bytes are stored. Anything without a frame header is stored as is.
pub struct PersistenceHandler<S> {
    engine: PersistenceEngine<S>,
    malformed: u64,
}

impl<S: Store> PersistenceHandler<S> {
    pub fn new(engine: PersistenceEngine<S>) -> Self {
        Self {
            engine,
            malformed: 0,
        }
    }

    pub fn engine(&self) -> &PersistenceEngine<S> {
        &self.engine
    }

    /// Frames dropped because of a bad header or short payload
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

#[async_trait]
impl<S: Store> MessageHandler for PersistenceHandler<S> {
    async fn handle(&mut self, message: IncomingMessage) -> Result<(), ConsumerError> {
        let result = match message.frame() {
            Some(Ok(frame)) => {
                debug!(
                    frame_number = frame.header.frame_number,
                    width = frame.header.width,
                    height = frame.header.height,
                    pixel_count = frame.header.pixel_count,
                    "Storing frame"
                );
                self.engine.write(frame.pixels).await
            }
            Some(Err(e)) => {
                self.malformed += 1;
                return Err(ConsumerError::Malformed(e));
            }
            None => self.engine.write(&message.payload).await,
        };

        result
            .map(|_| ())
            .map_err(|e| ConsumerError::Handler(e.to_string()))
    }

    async fn on_error(&mut self, metadata: &MessageMetadata, error: ConsumerError) {
        match &error {
            // The engine already reported the rejection
            ConsumerError::Handler(_) => {
                debug!(offset = metadata.offset, error = %error, "Payload not stored");
            }
            _ => {
                warn!(
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    error = %error,
                    "Dropping message"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::engine::EngineSettings;
    use crate::store::memory::MemoryStore;
    use framevault_pipeline::wire::FRAME_HEADER_KEY;
    use framevault_pipeline::{consume, FrameHeader, Shutdown};

    const FLAT: &str = r#"
database: { name: fv, user: fv, host: localhost }
tables:
  payloads:
    name: payloads
    columns: { id: SERIAL PRIMARY KEY, payload_data: BYTEA }
"#;

    async fn handler(store: &MemoryStore) -> PersistenceHandler<MemoryStore> {
        let config = StorageConfig::from_yaml_str(FLAT).unwrap();
        let mut engine = PersistenceEngine::new(EngineSettings::from_config(&config));
        let handle = store.clone();
        engine.connect_with(async move { Ok(handle) }).await.unwrap();
        PersistenceHandler::new(engine)
    }

    fn opaque(payload: &[u8], offset: i64) -> IncomingMessage {
        IncomingMessage {
            payload: payload.to_vec(),
            metadata: MessageMetadata {
                topic: "framevault.features".to_string(),
                offset,
                ..Default::default()
            },
        }
    }

    fn frame(header_bytes: Vec<u8>, payload: &[u8], offset: i64) -> IncomingMessage {
        let mut message = opaque(payload, offset);
        message
            .metadata
            .headers
            .insert(FRAME_HEADER_KEY.to_string(), header_bytes);
        message
    }

    #[tokio::test]
    async fn test_frame_forwards_only_declared_pixels() {
        let store = MemoryStore::new();
        let mut handler = handler(&store).await;
        let header = FrameHeader {
            width: 2,
            height: 1,
            channels: 1,
            pixel_count: 2,
            ..Default::default()
        };

        let stream = futures::stream::iter(vec![Ok(frame(
            header.encode().to_vec(),
            &[7, 8, 9, 10],
            0,
        ))]);
        let stats = consume(stream, &mut handler, &Shutdown::new()).await.unwrap();

        assert_eq!(stats.handled, 1);
        assert_eq!(store.rows("payloads")[0].data, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let store = MemoryStore::new();
        let mut handler = handler(&store).await;
        let short = FrameHeader {
            pixel_count: 100,
            ..Default::default()
        };

        let stream = futures::stream::iter(vec![
            Ok(frame(vec![0; 39], b"pixels", 0)),
            Ok(frame(short.encode().to_vec(), b"pixels", 1)),
            Ok(opaque(b"abc", 2)),
        ]);
        let stats = consume(stream, &mut handler, &Shutdown::new()).await.unwrap();

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.handled, 1);
        assert_eq!(handler.malformed(), 2);
        let rows = store.rows("payloads");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, b"abc");
    }

    #[tokio::test]
    async fn test_engine_rejection_does_not_stop_the_loop() {
        let store = MemoryStore::new();
        let config = StorageConfig::from_yaml_str(FLAT).unwrap();
        let engine: PersistenceEngine<MemoryStore> =
            PersistenceEngine::new(EngineSettings::from_config(&config));
        let mut handler = PersistenceHandler::new(engine);

        let stream = futures::stream::iter(vec![Ok(opaque(b"a", 0)), Ok(opaque(b"b", 1))]);
        let stats = consume(stream, &mut handler, &Shutdown::new()).await.unwrap();

        assert_eq!(stats.received, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(handler.engine().counts(), (0, 2));
        assert!(store.rows("payloads").is_empty());
    }
}
