use serde::Serialize;

use crate::checksum::ExpectedDigest;
use crate::error::SinkError;

/// Which flash region an image is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageTarget {
    /// The next application slot.
    Firmware,
    /// The data partition backing the filesystem.
    Filesystem,
}

/// Destination for image bytes.
///
/// One sink serves every session; `begin` always starts from scratch and
/// `abort` releases whatever a previous session left behind.
pub trait ImageSink {
    /// Size of the target region, when the sink knows it up front.
    fn size_hint(&self, target: ImageTarget) -> Option<usize>;

    /// Pin the digest the finished image must match. Called before `begin`.
    fn expect_digest(&mut self, digest: ExpectedDigest) -> Result<(), SinkError>;

    /// Prepare `target` for `size` bytes (`None` = unknown).
    fn begin(&mut self, size: Option<usize>, target: ImageTarget) -> Result<(), SinkError>;

    /// Write the next part of the image, returning how many bytes were
    /// accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Close the image. With `finalize` set the sink verifies it and makes it
    /// bootable/mountable.
    fn end(&mut self, finalize: bool) -> Result<(), SinkError>;

    /// Drop an unfinished image.
    fn abort(&mut self);

    /// Last error the sink recorded, if any.
    fn error(&self) -> Option<SinkError>;
}
