//! SHA-256 16-char fingerprint over `{error_type, error_class, service_name,
//! operation, message_template}` (§4.10, property §8.8). `message_template`
//! normalizes the dynamic parts of an error message so two errors that
//! differ only in which id/number/email appears still group together.

use crate::types::{ErrorContext, ErrorType};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static UUID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap());
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+@\S+\.\S+").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[\w/.-]+").unwrap());

/// Replaces UUIDs, emails, URLs, and file paths with placeholders, then
/// numbers last — UUIDs/emails/URLs must be matched before the number
/// pass consumes their digits.
pub fn extract_message_template(message: &str) -> String {
    let template = UUID_RE.replace_all(message, "{uuid}");
    let template = EMAIL_RE.replace_all(&template, "{email}");
    let template = URL_RE.replace_all(&template, "{url}");
    let template = PATH_RE.replace_all(&template, "{path}");
    NUMBER_RE.replace_all(&template, "{number}").into_owned()
}

/// First 16 hex characters of the SHA-256 of the canonical fingerprint
/// payload. Field order is fixed (not sorted-key JSON like the source) so
/// two independent calls with identical inputs always hash identically.
pub fn compute_fingerprint(error_type: ErrorType, error_class: &str, context: &ErrorContext, message: &str) -> String {
    let template = extract_message_template(message);
    let canonical = format!(
        "{:?}|{}|{}|{}|{}",
        error_type, error_class, context.service_name, context.operation_name, template
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_stable_across_dynamic_message_content() {
        let ctx = ErrorContext::new("sync_banking_transactions", "banking_integration", "si");
        let fp1 = compute_fingerprint(ErrorType::Integration, "ValueError", &ctx, "User 42 at x@y.com failed");
        let fp2 = compute_fingerprint(ErrorType::Integration, "ValueError", &ctx, "User 99 at z@w.com failed");
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn fingerprint_changes_with_operation() {
        let ctx1 = ErrorContext::new("op_a", "svc", "si");
        let ctx2 = ErrorContext::new("op_b", "svc", "si");
        let fp1 = compute_fingerprint(ErrorType::Network, "IoError", &ctx1, "timed out");
        let fp2 = compute_fingerprint(ErrorType::Network, "IoError", &ctx2, "timed out");
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn template_normalizes_numbers_uuids_emails_urls_paths() {
        let msg = "Request 404 to https://api.example.com/v1/550e8400-e29b-41d4-a716-446655440000 from a@b.com failed at /var/log/app.log";
        let template = extract_message_template(msg);
        assert_eq!(template, "Request {number} to {url} from {email} failed at {path}");
    }
}
