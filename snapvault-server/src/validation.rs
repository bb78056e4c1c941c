use url::Url;

/// Hosts the backup-trigger endpoint is allowed to resolve to. Loopback
/// only; the trigger service always runs next to this process.
const ALLOWED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]", "0.0.0.0"];

/// Message fragments the object-store SDKs use for missing objects.
const NOT_FOUND_PHRASES: &[&str] = &[
    "NoSuchKey",
    "does not exist",
    "The specified key does not exist",
    "not found",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyRejection {
    #[error("Invalid key: must start with configured prefix.")]
    InvalidPrefix,
    #[error("Invalid key: path traversal detected.")]
    PathTraversal,
}

/// Validates an object-store key against the configured namespace prefix and
/// path-traversal patterns. Keys are allowed or blocked, never rewritten.
pub fn validate_key(key: &str, prefix: &str) -> Result<(), KeyRejection> {
    if !key.starts_with(prefix) {
        return Err(KeyRejection::InvalidPrefix);
    }

    // Traversal attempts (../, ..\, doubled separators)
    if key.contains("..") || key.contains("//") || key.contains("\\\\") {
        return Err(KeyRejection::PathTraversal);
    }

    Ok(())
}

/// Returns true when `url` is safe to issue a request to: a relative path
/// (same-origin) or an absolute URL whose host is a loopback address.
pub fn is_valid_backup_url(url: &str) -> bool {
    if url.starts_with('/') {
        return true;
    }

    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    match parsed.host_str() {
        Some(host) => ALLOWED_HOSTS.contains(&host.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Normalizes a heterogeneous object-store error shape into a stable
/// "resource not found" signal, independent of SDK version. Any status in
/// the client-error range counts as not-found; callers log the raw inputs
/// at the point of decision.
pub fn is_not_found_error(code: Option<&str>, status: Option<u16>, message: &str) -> bool {
    if matches!(code, Some("NoSuchKey") | Some("NotFound")) {
        return true;
    }

    if status == Some(404) {
        return true;
    }

    if NOT_FOUND_PHRASES.iter().any(|phrase| message.contains(phrase)) {
        return true;
    }

    matches!(status, Some(s) if (400..500).contains(&s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_default_prefix() {
        assert!(validate_key("backups/file.tar.gz", "backups/").is_ok());
    }

    #[test]
    fn test_validate_key_accepts_custom_prefix() {
        assert!(validate_key("custom/prefix/file.tar.gz", "custom/prefix/").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_wrong_prefix() {
        let err = validate_key("etc/passwd", "backups/").unwrap_err();
        assert_eq!(err, KeyRejection::InvalidPrefix);
        assert!(err.to_string().contains("must start with configured prefix"));
    }

    #[test]
    fn test_validate_key_rejects_dot_dot() {
        let err = validate_key("backups/../etc/passwd", "backups/").unwrap_err();
        assert_eq!(err, KeyRejection::PathTraversal);
        assert!(err.to_string().contains("path traversal"));
    }

    #[test]
    fn test_validate_key_rejects_doubled_slash() {
        let err = validate_key("backups//etc/passwd", "backups/").unwrap_err();
        assert_eq!(err, KeyRejection::PathTraversal);
    }

    #[test]
    fn test_validate_key_rejects_doubled_backslash() {
        // No ".." in this one; the doubled-backslash rule has to catch it.
        let err = validate_key("backups/a\\\\b.tar.gz", "backups/").unwrap_err();
        assert_eq!(err, KeyRejection::PathTraversal);

        let err = validate_key("backups/..\\\\etc\\\\passwd", "backups/").unwrap_err();
        assert_eq!(err, KeyRejection::PathTraversal);
    }

    #[test]
    fn test_validate_key_is_idempotent() {
        let key = "backups/a.tar.gz";
        assert!(validate_key(key, "backups/").is_ok());
        assert!(validate_key(key, "backups/").is_ok());
    }

    #[test]
    fn test_backup_url_accepts_relative() {
        assert!(is_valid_backup_url("/backup"));
        assert!(is_valid_backup_url("/api/backup"));
    }

    #[test]
    fn test_backup_url_accepts_loopback_hosts() {
        assert!(is_valid_backup_url("http://localhost:8000/backup"));
        assert!(is_valid_backup_url("https://localhost/backup"));
        assert!(is_valid_backup_url("http://127.0.0.1:8000/backup"));
        assert!(is_valid_backup_url("http://[::1]:8000/backup"));
        assert!(is_valid_backup_url("http://0.0.0.0:8000/backup"));
    }

    #[test]
    fn test_backup_url_rejects_external_hosts() {
        assert!(!is_valid_backup_url("https://evil.com/backup"));
        assert!(!is_valid_backup_url("http://example.com/backup"));
        assert!(!is_valid_backup_url("http://169.254.169.254/latest/meta-data/"));
    }

    #[test]
    fn test_backup_url_rejects_malformed() {
        assert!(!is_valid_backup_url("not-a-url"));
        assert!(!is_valid_backup_url(""));
    }

    #[test]
    fn test_not_found_detects_known_codes() {
        assert!(is_not_found_error(Some("NoSuchKey"), None, ""));
        assert!(is_not_found_error(Some("NotFound"), None, ""));
    }

    #[test]
    fn test_not_found_detects_404_status() {
        assert!(is_not_found_error(None, Some(404), ""));
    }

    #[test]
    fn test_not_found_detects_message_phrases() {
        assert!(is_not_found_error(
            None,
            None,
            "NoSuchKey: The specified key does not exist"
        ));
    }

    #[test]
    fn test_not_found_treats_any_client_error_as_missing() {
        assert!(is_not_found_error(None, Some(403), "Access Denied"));
        assert!(is_not_found_error(None, Some(400), ""));
        assert!(is_not_found_error(None, Some(499), ""));
    }

    #[test]
    fn test_not_found_ignores_server_errors_and_plain_failures() {
        assert!(!is_not_found_error(None, Some(500), "internal error"));
        assert!(!is_not_found_error(None, None, "Network error"));
        assert!(!is_not_found_error(None, None, "timeout"));
    }
}
