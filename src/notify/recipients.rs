// src/notify/recipients.rs
// Recipient list parsing and validation

use once_cell::sync::Lazy;
use regex::Regex;

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("valid regex")
});

pub fn is_valid_email(candidate: &str) -> bool {
    candidate.len() <= 254 && RE_EMAIL.is_match(candidate)
}

/// Parse a comma-separated list, keep valid addresses in first-seen order
/// without duplicates, and fall back to the admin address when nothing
/// survives. Returns an empty list only if the admin address is invalid too.
pub fn resolve_recipients(list: &str, admin_email: &str) -> Vec<String> {
    let mut valid: Vec<String> = Vec::new();

    for candidate in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !is_valid_email(candidate) {
            continue;
        }
        if !valid.iter().any(|v| v.eq_ignore_ascii_case(candidate)) {
            valid.push(candidate.to_string());
        }
    }

    if valid.is_empty() {
        let admin = admin_email.trim();
        if is_valid_email(admin) {
            valid.push(admin.to_string());
        }
    }

    valid
}
