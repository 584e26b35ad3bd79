// OTA (Over-The-Air) update module
//
// Update flow:
// 1. Client calls /ota/start (filesystem updates snapshot the backup first)
// 2. Image is streamed to the next app slot or the SPIFFS partition
// 3. Digest verified, boot partition set / filesystem remounted
// 4. Backed up files are uploaded again (filesystem updates only)
// 5. Restart after the grace period

pub mod progress;
#[cfg(target_os = "espidf")]
pub mod sink;
#[cfg(target_os = "espidf")]
pub mod storage;

pub use progress::ProgressLogger;
#[cfg(target_os = "espidf")]
pub use sink::EspImageSink;
#[cfg(target_os = "espidf")]
pub use storage::Spiffs;
