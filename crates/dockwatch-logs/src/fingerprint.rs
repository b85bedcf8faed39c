use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use dockwatch_types::{ErrorCategory, Fingerprint};

/// Length of the hex fingerprint hash
pub const HASH_LEN: usize = 12;

/// Error signatures in priority order; the first match wins.
///
/// Specific markers come before generic ones so that
/// `panic: runtime error: ...` is a panic, not a generic `error:`.
pub const SIGNATURES: &[(&str, ErrorCategory)] = &[
    (r"(?i)HTTP/[\d.]+ 5\d{2}", ErrorCategory::Http5xx),
    (r"(?i)\bpanic\b:", ErrorCategory::Panic),
    (r"(?i)\bFATAL\b", ErrorCategory::Fatal),
    (r"(?i)\bOOM\b|out of memory", ErrorCategory::Oom),
    (r"(?i)\bENOMEM\b", ErrorCategory::Oom),
    (r"(?i)\bSIGKILL\b|\bSIGSEGV\b", ErrorCategory::Signal),
    (r"(?i)UnhandledPromiseRejection", ErrorCategory::UnhandledRejection),
    (r"(?i)ECONNREFUSED", ErrorCategory::ConnectionRefused),
    (
        r"(?i)TypeError:|ReferenceError:|SyntaxError:",
        ErrorCategory::TypedException,
    ),
    (r"(?i)at\s+\S+\s+\(.*:\d+:\d+\)", ErrorCategory::StackTrace),
    (r"(?i)\bERROR\b\s+\d{4}", ErrorCategory::ErrorLog),
    (r"(?i)\bError:\s+", ErrorCategory::Error),
];

/// Volatile substrings stripped before hashing, applied in order, with
/// their replacement
const VOLATILE_PATTERNS: &[(&str, &str)] = &[
    // ISO-8601 timestamps
    (r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}[\d.Z+-]*", " "),
    // Bare unix timestamps in seconds or millis. Digits glued to a '-' or '.'
    // belong to a larger id (the last group of a UUID) and are left alone.
    (r"(?P<lead>^|[^\w.-])\d{10,13}\b", "${lead} "),
    // UUIDs
    (
        r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
        " ",
    ),
    // Hex ids (container ids, request ids, digests)
    (r"(?i)\b[0-9a-f]{12,}\b", " "),
    // IPv4 with optional port
    (r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d+)?", " "),
];

static COMPILED_SIGNATURES: LazyLock<Vec<(Regex, ErrorCategory)>> = LazyLock::new(|| {
    SIGNATURES
        .iter()
        .map(|(pattern, category)| (Regex::new(pattern).expect("valid signature"), *category))
        .collect()
});

static VOLATILE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    VOLATILE_PATTERNS
        .iter()
        .map(|(pattern, replacement)| {
            (Regex::new(pattern).expect("valid volatile pattern"), *replacement)
        })
        .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Error classifier and fingerprinter for raw log lines
pub struct Fingerprinter;

impl Fingerprinter {
    /// Classify a line and fingerprint it. Returns `None` for non-error lines.
    pub fn classify(line: &str) -> Option<Fingerprint> {
        let category = Self::category(line)?;
        let normalized = Self::normalize(line);
        let hash = Self::hash(&normalized);
        Some(Fingerprint {
            hash,
            category,
            normalized,
        })
    }

    /// First matching signature category
    pub fn category(line: &str) -> Option<ErrorCategory> {
        COMPILED_SIGNATURES
            .iter()
            .find(|(regex, _)| regex.is_match(line))
            .map(|(_, category)| *category)
    }

    /// Strip volatile tokens so repeated occurrences of an error compare equal.
    /// Each token is replaced by a space, so removal never joins its neighbours.
    pub fn normalize(line: &str) -> String {
        let mut text = line.to_string();
        for (regex, replacement) in VOLATILE.iter() {
            if let Cow::Owned(replaced) = regex.replace_all(&text, *replacement) {
                text = replaced;
            }
        }
        WHITESPACE.replace_all(&text, " ").trim().to_string()
    }

    /// Truncated SHA-256 of the normalized text
    pub fn hash(normalized: &str) -> String {
        let digest = Sha256::digest(normalized.as_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(HASH_LEN);
        hash
    }
}
