//! Log-safe display wrappers.
//!
//! Key material and plaintext never go to a log line directly; wrap them in
//! one of these first.

use std::fmt;

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: fmt::Debug> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl<'a> fmt::Display for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// First 8 characters of a packet id or fingerprint.
pub struct ShortId<'a>(pub &'a str);

impl<'a> fmt::Display for ShortId<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        match s.char_indices().nth(8) {
            Some((end, _)) => write!(f, "{}…", &s[..end]),
            None => f.write_str(s),
        }
    }
}

impl<'a> fmt::Debug for ShortId<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_display() {
        let secret = Redacted("my_secret_password");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
    }

    #[test]
    fn test_redacted_bytes() {
        assert_eq!(format!("{}", RedactedBytes(&[0u8; 42])), "[42 bytes]");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(
            format!("{}", ShortId("00112233445566778899aabbccddeeff")),
            "00112233…"
        );
        assert_eq!(format!("{}", ShortId("abc")), "abc");
    }
}
