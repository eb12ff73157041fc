/// Utility helpers

use std::borrow::Cow;
use url::form_urlencoded;
use uuid::Uuid;

/// First `len` hex characters of a fresh v4 UUID.
pub fn random_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

/// Quote a value for interpolation into a remote POSIX shell command.
pub fn quote(value: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(value))
}

/// Percent-encode a credential for use inside a `vi://user:pass@host` locator.
pub fn urlencode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Validate MAC address format
pub fn validate_mac_address(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }

    parts.iter().all(|part| {
        part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit())
    })
}
