//! Transfer state machine for one firmware or filesystem image.
//!
//! `Idle -> Receiving -> {Completed | Failed}`. A session ends either way and
//! the next `start` replaces it; nothing is retried here.

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::checksum::ExpectedDigest;
use crate::error::OtaError;
use crate::listener::UpdateListener;
use crate::sink::{ImageSink, ImageTarget};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    #[default]
    Idle,
    Receiving,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    #[default]
    Firmware,
    Filesystem,
}

impl UpdateMode {
    /// Resolve the client's `mode` token. Anything unrecognised means
    /// firmware.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "fs" | "filesystem" | "spiffs" | "littlefs" => UpdateMode::Filesystem,
            _ => UpdateMode::Firmware,
        }
    }

    pub fn target(self) -> ImageTarget {
        match self {
            UpdateMode::Firmware => ImageTarget::Firmware,
            UpdateMode::Filesystem => ImageTarget::Filesystem,
        }
    }
}

/// Result of an accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Bytes written, more chunks expected.
    Accepted { bytes_transferred: usize },
    /// Final chunk written and the image committed.
    Completed { bytes_transferred: usize },
}

#[derive(Debug, Default)]
pub struct UpdateSession {
    state: TransferState,
    mode: UpdateMode,
    expected_checksum: Option<ExpectedDigest>,
    bytes_transferred: usize,
    total_size: Option<usize>,
    error: Option<String>,
}

impl UpdateSession {
    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn expected_checksum(&self) -> Option<&ExpectedDigest> {
        self.expected_checksum.as_ref()
    }

    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }

    pub fn total_size(&self) -> Option<usize> {
        self.total_size
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Begin a new session, abandoning any unfinished one.
    ///
    /// A malformed or refused checksum leaves the session `Idle`; a sink that
    /// cannot begin leaves it `Failed`. In both cases the diagnostic is kept
    /// in [`error`](Self::error).
    pub fn start<S: ImageSink + ?Sized>(
        &mut self,
        sink: &mut S,
        listener: &mut dyn UpdateListener,
        mode: UpdateMode,
        checksum: Option<&str>,
    ) -> Result<(), OtaError> {
        if self.state == TransferState::Receiving {
            warn!(
                "Abandoning unfinished {:?} update after {} bytes",
                self.mode, self.bytes_transferred
            );
            sink.abort();
        }

        *self = UpdateSession {
            mode,
            ..Default::default()
        };
        info!("OTA Mode: {mode:?}");

        if let Some(hash) = checksum {
            info!("Checksum: {hash}");
            let digest = match ExpectedDigest::parse(hash) {
                Ok(digest) => digest,
                Err(e) => return Err(self.reject(e)),
            };
            if let Err(e) = sink.expect_digest(digest) {
                return Err(self.reject(OtaError::InvalidChecksum(e.to_string())));
            }
            self.expected_checksum = Some(digest);
        }

        listener.on_start();

        let target = mode.target();
        self.total_size = sink.size_hint(target);
        if let Err(e) = sink.begin(self.total_size, target) {
            // drops the digest pinned above
            sink.abort();
            let err = OtaError::SinkStartFailure(e);
            error!("{err}");
            self.state = TransferState::Failed;
            self.error = Some(err.to_string());
            return Err(err);
        }

        self.state = TransferState::Receiving;
        Ok(())
    }

    /// Feed the chunk that starts at byte offset `index`.
    ///
    /// Offsets must follow each other exactly; offset 0 may be repeated as
    /// long as nothing was written yet.
    pub fn ingest<S: ImageSink + ?Sized>(
        &mut self,
        sink: &mut S,
        listener: &mut dyn UpdateListener,
        index: usize,
        bytes: &[u8],
        is_final: bool,
    ) -> Result<IngestOutcome, OtaError> {
        if self.state != TransferState::Receiving {
            return Err(OtaError::NotReceiving);
        }

        if index == 0 && self.bytes_transferred == 0 {
            debug!("Upload started ({:?})", self.mode);
        } else if index != self.bytes_transferred {
            return Err(self.fail(
                sink,
                listener,
                OtaError::ChunkOutOfOrder {
                    expected: self.bytes_transferred,
                    got: index,
                },
            ));
        }

        if !bytes.is_empty() {
            let written = sink.write(bytes);
            if written != bytes.len() {
                let err = OtaError::SinkWriteShortfall {
                    written,
                    expected: bytes.len(),
                    detail: sink.error(),
                };
                return Err(self.fail(sink, listener, err));
            }
            self.bytes_transferred += bytes.len();
            listener.on_progress(self.bytes_transferred, self.total_size);
        }

        if !is_final {
            return Ok(IngestOutcome::Accepted {
                bytes_transferred: self.bytes_transferred,
            });
        }

        if let Err(e) = sink.end(true) {
            return Err(self.fail(sink, listener, OtaError::SinkFinalizeFailure(e)));
        }

        info!(
            "Update of {:?} complete ({} bytes)",
            self.mode, self.bytes_transferred
        );
        self.state = TransferState::Completed;
        listener.on_end(true);
        Ok(IngestOutcome::Completed {
            bytes_transferred: self.bytes_transferred,
        })
    }

    /// Drop an unfinished session and release the sink. Returns `false` if
    /// nothing was in progress.
    pub fn abort<S: ImageSink + ?Sized>(&mut self, sink: &mut S) -> bool {
        if self.state != TransferState::Receiving {
            return false;
        }
        warn!("Update aborted after {} bytes", self.bytes_transferred);
        sink.abort();
        self.state = TransferState::Idle;
        true
    }

    fn reject(&mut self, err: OtaError) -> OtaError {
        error!("{err}");
        self.state = TransferState::Idle;
        self.error = Some(err.to_string());
        err
    }

    fn fail<S: ImageSink + ?Sized>(
        &mut self,
        sink: &mut S,
        listener: &mut dyn UpdateListener,
        err: OtaError,
    ) -> OtaError {
        error!("Error Occurred: {err}");
        sink.abort();
        self.state = TransferState::Failed;
        self.error = Some(err.to_string());
        listener.on_end(false);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::testing::{sha256_hex, ListenerEvent, MemorySink, RecordingListener};
    use proptest::prelude::*;

    fn receiving(mode: UpdateMode) -> (UpdateSession, MemorySink, RecordingListener) {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::default();
        let mut listener = RecordingListener::default();
        session.start(&mut sink, &mut listener, mode, None).unwrap();
        (session, sink, listener)
    }

    #[test]
    fn test_mode_tokens() {
        assert_eq!(UpdateMode::from_token("fs"), UpdateMode::Filesystem);
        assert_eq!(UpdateMode::from_token("FS"), UpdateMode::Filesystem);
        assert_eq!(UpdateMode::from_token("fw"), UpdateMode::Firmware);
        assert_eq!(UpdateMode::from_token("garbage"), UpdateMode::Firmware);
        assert_eq!(UpdateMode::from_token(""), UpdateMode::Firmware);
    }

    #[test]
    fn test_start_then_first_chunk() {
        let (mut session, mut sink, mut listener) = receiving(UpdateMode::Firmware);
        assert_eq!(session.state(), TransferState::Receiving);
        assert_eq!(sink.begun_target(), Some(ImageTarget::Firmware));

        let outcome = session
            .ingest(&mut sink, &mut listener, 0, &[1, 2, 3], false)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Accepted { bytes_transferred: 3 });
        assert_eq!(session.state(), TransferState::Receiving);
        assert_eq!(session.bytes_transferred(), 3);
    }

    #[test]
    fn test_final_chunk_commits() {
        let (mut session, mut sink, mut listener) = receiving(UpdateMode::Filesystem);
        session.ingest(&mut sink, &mut listener, 0, b"abc", false).unwrap();
        let outcome = session
            .ingest(&mut sink, &mut listener, 3, b"de", true)
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Completed { bytes_transferred: 5 });
        assert_eq!(session.state(), TransferState::Completed);
        assert_eq!(sink.committed(), Some((ImageTarget::Filesystem, b"abcde".to_vec())));
        assert_eq!(
            listener.events(),
            vec![
                ListenerEvent::Start,
                ListenerEvent::Progress(3, None),
                ListenerEvent::Progress(5, None),
                ListenerEvent::End(true),
            ]
        );
    }

    #[test]
    fn test_empty_final_chunk_completes() {
        let (mut session, mut sink, mut listener) = receiving(UpdateMode::Firmware);
        session.ingest(&mut sink, &mut listener, 0, b"abc", false).unwrap();
        session.ingest(&mut sink, &mut listener, 3, &[], true).unwrap();
        assert_eq!(session.state(), TransferState::Completed);
        // no progress event for the empty chunk
        assert_eq!(listener.events().len(), 3);
    }

    #[test]
    fn test_progress_reports_known_total() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::with_capacity(1024);
        let mut listener = RecordingListener::default();
        session
            .start(&mut sink, &mut listener, UpdateMode::Firmware, None)
            .unwrap();
        session.ingest(&mut sink, &mut listener, 0, &[0; 16], false).unwrap();
        assert_eq!(session.total_size(), Some(1024));
        assert_eq!(sink.begun_size(), Some(Some(1024)));
        assert!(listener
            .events()
            .contains(&ListenerEvent::Progress(16, Some(1024))));
    }

    #[test]
    fn test_malformed_checksum_stays_idle() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::default();
        let mut listener = RecordingListener::default();
        let err = session
            .start(&mut sink, &mut listener, UpdateMode::Firmware, Some("deadbeef"))
            .unwrap_err();

        assert!(matches!(err, OtaError::InvalidChecksum(_)));
        assert_eq!(session.state(), TransferState::Idle);
        assert!(session.error().is_some());
        assert_eq!(sink.begun_target(), None);
        assert!(listener.events().is_empty());
        assert!(matches!(
            session.ingest(&mut sink, &mut listener, 0, b"x", false),
            Err(OtaError::NotReceiving)
        ));
    }

    #[test]
    fn test_sink_refusing_checksum_is_invalid_checksum() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::rejecting_digest();
        let mut listener = RecordingListener::default();
        let err = session
            .start(
                &mut sink,
                &mut listener,
                UpdateMode::Firmware,
                Some(&sha256_hex(b"image")),
            )
            .unwrap_err();
        assert!(matches!(err, OtaError::InvalidChecksum(_)));
        assert_eq!(session.state(), TransferState::Idle);
    }

    #[test]
    fn test_checksum_mismatch_fails_at_finalize() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::default();
        let mut listener = RecordingListener::default();
        session
            .start(
                &mut sink,
                &mut listener,
                UpdateMode::Firmware,
                Some(&sha256_hex(b"expected image")),
            )
            .unwrap();

        let err = session
            .ingest(&mut sink, &mut listener, 0, b"corrupted image", true)
            .unwrap_err();
        assert!(matches!(err, OtaError::SinkFinalizeFailure(_)));
        assert_eq!(session.state(), TransferState::Failed);
        assert!(!session.error().unwrap().is_empty());
        assert!(sink.committed().is_none());
        assert_eq!(listener.events().last(), Some(&ListenerEvent::End(false)));
    }

    #[test]
    fn test_checksum_match_completes() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::default();
        let mut listener = RecordingListener::default();
        session
            .start(
                &mut sink,
                &mut listener,
                UpdateMode::Firmware,
                Some(&sha256_hex(b"good image")),
            )
            .unwrap();
        session.ingest(&mut sink, &mut listener, 0, b"good ", false).unwrap();
        session.ingest(&mut sink, &mut listener, 5, b"image", true).unwrap();
        assert_eq!(session.state(), TransferState::Completed);
    }

    #[test]
    fn test_sink_begin_failure() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::failing_begin(SinkError::new(0x1101, "Not enough space"));
        let mut listener = RecordingListener::default();
        let err = session
            .start(&mut sink, &mut listener, UpdateMode::Filesystem, None)
            .unwrap_err();
        assert!(matches!(err, OtaError::SinkStartFailure(_)));
        assert_eq!(session.state(), TransferState::Failed);
        assert!(session.error().unwrap().contains("Not enough space"));
    }

    #[test]
    fn test_begin_failure_forgets_pinned_digest() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::failing_begin(SinkError::new(0x105, "ESP_ERR_NOT_FOUND"));
        let mut listener = RecordingListener::default();
        assert!(session
            .start(
                &mut sink,
                &mut listener,
                UpdateMode::Filesystem,
                Some(&sha256_hex(b"spiffs image")),
            )
            .is_err());

        sink.fail_begin = None;
        session
            .start(&mut sink, &mut listener, UpdateMode::Firmware, None)
            .unwrap();
        let outcome = session
            .ingest(&mut sink, &mut listener, 0, b"firmware image", true)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Completed { bytes_transferred: 14 });
    }

    #[test]
    fn test_short_write_fails_session() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::with_write_limit(4);
        let mut listener = RecordingListener::default();
        session
            .start(&mut sink, &mut listener, UpdateMode::Firmware, None)
            .unwrap();

        let err = session
            .ingest(&mut sink, &mut listener, 0, b"123456", false)
            .unwrap_err();
        assert!(matches!(
            err,
            OtaError::SinkWriteShortfall {
                written: 4,
                expected: 6,
                ..
            }
        ));
        assert_eq!(session.state(), TransferState::Failed);
        assert_eq!(sink.aborts(), 1);
        // terminal until the next start
        assert!(matches!(
            session.ingest(&mut sink, &mut listener, 6, b"78", true),
            Err(OtaError::NotReceiving)
        ));
        assert!(session.error().is_some());
    }

    #[test]
    fn test_out_of_order_chunk_rejected() {
        let (mut session, mut sink, mut listener) = receiving(UpdateMode::Firmware);
        session.ingest(&mut sink, &mut listener, 0, b"abcd", false).unwrap();
        let err = session
            .ingest(&mut sink, &mut listener, 8, b"efgh", false)
            .unwrap_err();
        assert!(matches!(err, OtaError::ChunkOutOfOrder { expected: 4, got: 8 }));
        assert_eq!(session.state(), TransferState::Failed);
    }

    #[test]
    fn test_duplicate_first_chunk_after_data_rejected() {
        let (mut session, mut sink, mut listener) = receiving(UpdateMode::Firmware);
        session.ingest(&mut sink, &mut listener, 0, b"abcd", false).unwrap();
        assert!(session
            .ingest(&mut sink, &mut listener, 0, b"abcd", false)
            .is_err());
        assert_eq!(session.state(), TransferState::Failed);
    }

    #[test]
    fn test_index_zero_is_idempotent_before_data() {
        let (mut session, mut sink, mut listener) = receiving(UpdateMode::Firmware);
        session.ingest(&mut sink, &mut listener, 0, &[], false).unwrap();
        session.ingest(&mut sink, &mut listener, 0, b"ab", false).unwrap();
        assert_eq!(session.bytes_transferred(), 2);
    }

    #[test]
    fn test_restart_abandons_previous_session() {
        let (mut session, mut sink, mut listener) = receiving(UpdateMode::Firmware);
        session.ingest(&mut sink, &mut listener, 0, b"abcd", false).unwrap();

        session
            .start(&mut sink, &mut listener, UpdateMode::Filesystem, None)
            .unwrap();
        assert_eq!(sink.aborts(), 1);
        assert_eq!(session.bytes_transferred(), 0);
        assert_eq!(session.mode(), UpdateMode::Filesystem);
        assert_eq!(session.state(), TransferState::Receiving);
    }

    #[test]
    fn test_error_cleared_by_next_start() {
        let mut session = UpdateSession::default();
        let mut sink = MemorySink::default();
        let mut listener = RecordingListener::default();
        assert!(session
            .start(&mut sink, &mut listener, UpdateMode::Firmware, Some("xyz"))
            .is_err());
        assert!(session.error().is_some());

        session
            .start(&mut sink, &mut listener, UpdateMode::Firmware, None)
            .unwrap();
        assert!(session.error().is_none());
    }

    #[test]
    fn test_abort() {
        let (mut session, mut sink, _) = receiving(UpdateMode::Firmware);
        assert!(session.abort(&mut sink));
        assert_eq!(session.state(), TransferState::Idle);
        assert!(!session.abort(&mut sink));
    }

    proptest! {
        #[test]
        fn prop_bytes_transferred_is_sum_of_chunks(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..16)
        ) {
            let (mut session, mut sink, mut listener) = receiving(UpdateMode::Firmware);
            let mut offset = 0;
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.iter().enumerate() {
                session.ingest(&mut sink, &mut listener, offset, chunk, i == last).unwrap();
                offset += chunk.len();
            }
            prop_assert_eq!(session.state(), TransferState::Completed);
            prop_assert_eq!(session.bytes_transferred(), offset);
            let expected: Vec<u8> = chunks.concat();
            prop_assert_eq!(sink.committed().map(|(_, data)| data), Some(expected));
        }
    }
}
