// Centralized version information

// Cargo package version from Cargo.toml
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

// Set by build.rs from the CI environment, empty for local builds
pub const GIT_OWNER: &str = env!("OTA_GIT_OWNER");
pub const GIT_REPO: &str = env!("OTA_GIT_REPO");
pub const GIT_BRANCH: &str = env!("OTA_GIT_BRANCH");
pub const FW_VARIANT: &str = env!("OTA_FW_VARIANT");
const BUILD: &str = env!("OTA_BUILD");

// CI build number, 0 for local builds
pub fn build_number() -> u16 {
    BUILD.parse().unwrap_or(0)
}

// Version info string for logging
pub fn full_version() -> String {
    if GIT_BRANCH.is_empty() {
        format!("v{}", CARGO_VERSION)
    } else {
        format!("v{} ({}#{})", CARGO_VERSION, GIT_BRANCH, build_number())
    }
}
