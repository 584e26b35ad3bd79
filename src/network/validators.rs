use anyhow::{anyhow, Result};

pub fn validate_ssid(ssid: &str) -> Result<()> {
    if ssid.is_empty() {
        return Err(anyhow!("WiFi SSID cannot be empty"));
    }
    if ssid.len() > 32 {
        return Err(anyhow!("WiFi SSID must be 32 characters or less"));
    }
    if ssid.chars().any(|c| c.is_control()) {
        return Err(anyhow!("WiFi SSID cannot contain control characters"));
    }
    Ok(())
}

/// Value of `key` in the query string of `uri`, percent-decoded.
///
/// An empty value (`?hash=`) is reported as `None`.
pub fn query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(name, _)| *name == key)
        .map(|(_, value)| decode_component(value))
        .filter(|value| !value.is_empty())
}

// Form encoding: `+` is a space, escapes that do not decode stay as they are
fn decode_component(value: &str) -> String {
    let spaced = value.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Upload filename header: required, single line, bounded.
pub fn validate_filename_header(filename: Option<&str>) -> Result<&str> {
    let filename = filename
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| anyhow!("Missing X-Filename header"))?;
    if filename.chars().any(|c| c.is_control()) {
        return Err(anyhow!("Filename contains invalid characters"));
    }
    Ok(filename)
}
