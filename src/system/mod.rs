pub mod info;
#[cfg(target_os = "espidf")]
pub mod reset;
