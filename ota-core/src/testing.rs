//! Test doubles shared by the unit tests.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::checksum::{DigestVerifier, ExpectedDigest};
use crate::error::SinkError;
use crate::listener::UpdateListener;
use crate::reboot::Clock;
use crate::sink::{ImageSink, ImageTarget};

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// In-memory sink that records what happened to it.
#[derive(Default)]
pub struct MemorySink {
    pub capacity: Option<usize>,
    pub reject_digest: bool,
    pub fail_begin: Option<SinkError>,
    pub fail_end: Option<SinkError>,
    /// Total bytes accepted before writes come up short.
    pub write_limit: Option<usize>,
    verifier: DigestVerifier,
    active: Option<(Option<usize>, ImageTarget)>,
    begun: Option<(Option<usize>, ImageTarget)>,
    data: Vec<u8>,
    committed: Option<(ImageTarget, Vec<u8>)>,
    last_error: Option<SinkError>,
    aborts: usize,
}

impl MemorySink {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Default::default()
        }
    }

    pub fn rejecting_digest() -> Self {
        Self {
            reject_digest: true,
            ..Default::default()
        }
    }

    pub fn failing_begin(err: SinkError) -> Self {
        Self {
            fail_begin: Some(err),
            ..Default::default()
        }
    }

    pub fn failing_end(err: SinkError) -> Self {
        Self {
            fail_end: Some(err),
            ..Default::default()
        }
    }

    pub fn with_write_limit(limit: usize) -> Self {
        Self {
            write_limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn begun_target(&self) -> Option<ImageTarget> {
        self.begun.map(|(_, target)| target)
    }

    pub fn begun_size(&self) -> Option<Option<usize>> {
        self.begun.map(|(size, _)| size)
    }

    pub fn committed(&self) -> Option<(ImageTarget, Vec<u8>)> {
        self.committed.clone()
    }

    pub fn aborts(&self) -> usize {
        self.aborts
    }
}

impl ImageSink for MemorySink {
    fn size_hint(&self, _target: ImageTarget) -> Option<usize> {
        self.capacity
    }

    fn expect_digest(&mut self, digest: ExpectedDigest) -> Result<(), SinkError> {
        if self.reject_digest {
            return Err(SinkError::new(-1, "digest not supported"));
        }
        self.verifier.expect(digest);
        Ok(())
    }

    fn begin(&mut self, size: Option<usize>, target: ImageTarget) -> Result<(), SinkError> {
        if let Some(err) = self.fail_begin.clone() {
            self.last_error = Some(err.clone());
            return Err(err);
        }
        self.verifier.reset();
        self.data.clear();
        self.committed = None;
        self.active = Some((size, target));
        self.begun = Some((size, target));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if self.active.is_none() {
            return 0;
        }
        let room = self
            .write_limit
            .map(|limit| limit.saturating_sub(self.data.len()))
            .unwrap_or(usize::MAX);
        let accepted = data.len().min(room);
        self.data.extend_from_slice(&data[..accepted]);
        self.verifier.update(&data[..accepted]);
        if accepted < data.len() {
            self.last_error = Some(SinkError::new(8, "No space left"));
        }
        accepted
    }

    fn end(&mut self, finalize: bool) -> Result<(), SinkError> {
        let Some((_, target)) = self.active.take() else {
            return Err(SinkError::new(6, "Update not started"));
        };
        if let Some(err) = self.fail_end.clone() {
            self.last_error = Some(err.clone());
            return Err(err);
        }
        if let Err(actual) = self.verifier.verify() {
            let err = SinkError::new(9, format!("Checksum mismatch: got {actual}"));
            self.last_error = Some(err.clone());
            return Err(err);
        }
        if finalize {
            self.committed = Some((target, std::mem::take(&mut self.data)));
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.active = None;
        self.verifier.clear();
        self.data.clear();
        self.aborts += 1;
    }

    fn error(&self) -> Option<SinkError> {
        self.last_error.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Start,
    Progress(usize, Option<usize>),
    End(bool),
}

/// Listener that keeps every callback; clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<ListenerEvent>>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl UpdateListener for RecordingListener {
    fn on_start(&mut self) {
        self.events.lock().unwrap().push(ListenerEvent::Start);
    }

    fn on_progress(&mut self, current: usize, total: Option<usize>) {
        self.events
            .lock()
            .unwrap()
            .push(ListenerEvent::Progress(current, total));
    }

    fn on_end(&mut self, success: bool) {
        self.events.lock().unwrap().push(ListenerEvent::End(success));
    }
}

/// Clock advanced by hand; clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Rc<Cell<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            base: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}
