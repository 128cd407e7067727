//! Reversible PII tokenization.
//!
//! Detected values are swapped for `[CATEGORY_xxxxxxxx]` tokens derived from a
//! salted SHA-256 of the value. The salt is per instance, so a token is only
//! meaningful to the [`PrivacyLayer`] that issued it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{LazyLock, Mutex};
use tracing::debug;
use uuid::Uuid;

pub const REDACTED: &str = "[REDACTED]";

/// Key fragments (lowercase, separators stripped) that mark a credential field.
const SENSITIVE_KEY_PARTS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "credential",
    "privatekey",
    "apikey",
    "accesskey",
    "authorization",
    "sessionid",
    "cookie",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    CreditCard,
    Iban,
    Ssn,
    Mmsi,
    HullId,
    Email,
    IpAddress,
    Phone,
}

impl PiiCategory {
    pub fn label(&self) -> &'static str {
        match self {
            PiiCategory::CreditCard => "CREDIT_CARD",
            PiiCategory::Iban => "IBAN",
            PiiCategory::Ssn => "SSN",
            PiiCategory::Mmsi => "MMSI",
            PiiCategory::HullId => "HULL_ID",
            PiiCategory::Email => "EMAIL",
            PiiCategory::IpAddress => "IP_ADDRESS",
            PiiCategory::Phone => "PHONE",
        }
    }

    /// Split a detected value into (kept prefix, hidden part, kept suffix)
    /// for format-preserving tokenization.
    fn split<'a>(&self, value: &'a str) -> (&'a str, &'a str, &'a str) {
        let tail = |keep: usize| {
            let digits = value.chars().rev().take_while(|c| c.is_ascii_digit()).count();
            let keep = keep.min(digits);
            value.split_at(value.len() - keep)
        };
        match self {
            PiiCategory::Email => match value.find('@') {
                Some(at) => ("", &value[..at], &value[at..]),
                None => ("", value, ""),
            },
            PiiCategory::Phone => {
                let (hidden, kept) = tail(2);
                ("", hidden, kept)
            }
            PiiCategory::CreditCard => {
                let (hidden, kept) = tail(4);
                ("", hidden, kept)
            }
            PiiCategory::Mmsi => {
                let digits = value.len() - 9;
                (&value[..digits], &value[digits..], "")
            }
            _ => ("", value, ""),
        }
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Detection patterns in priority order; earlier entries win overlaps.
static DETECTORS: LazyLock<Vec<(PiiCategory, Regex)>> = LazyLock::new(|| {
    let pattern = |category, re: &str| {
        (
            category,
            Regex::new(re).expect("PII pattern must compile"),
        )
    };
    vec![
        pattern(PiiCategory::CreditCard, r"\b(?:\d[ -]?){12,18}\d\b"),
        pattern(PiiCategory::Iban, r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b"),
        pattern(PiiCategory::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
        pattern(PiiCategory::Mmsi, r"\bMMSI[:#]?\s*\d{9}\b"),
        pattern(PiiCategory::HullId, r"\b[A-Z]{3}[A-Z0-9]{5}[A-L]\d{3}\b"),
        pattern(
            PiiCategory::Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
        pattern(
            PiiCategory::IpAddress,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
        ),
        pattern(
            PiiCategory::Phone,
            r"(?:\+\d{1,3}[-.\s]?)?(?:\(\d{3}\)|\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b",
        ),
    ]
});

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Z_]+_[0-9a-f]{8}\]").expect("token pattern must compile"));

/// One issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiToken {
    pub original: String,
    pub token: String,
    pub category: PiiCategory,
}

/// Summary of what a text would have tokenized
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyReport {
    pub flagged: bool,
    pub counts: BTreeMap<PiiCategory, usize>,
}

#[derive(Debug, Clone)]
struct Detection {
    category: PiiCategory,
    start: usize,
    end: usize,
}

#[derive(Debug, Default)]
struct TokenVault {
    /// (category, preserve_format, original) -> token
    issued: HashMap<(PiiCategory, bool, String), String>,
    /// token -> the text it replaced
    reverse: HashMap<String, String>,
    tokens: Vec<PiiToken>,
}

/// Detects and reversibly tokenizes sensitive values
#[derive(Debug)]
pub struct PrivacyLayer {
    salt: String,
    preserve_format: bool,
    vault: Mutex<TokenVault>,
}

impl PrivacyLayer {
    pub fn new() -> Self {
        Self::with_format(true)
    }

    /// `preserve_format` is the mode used by [`tokenize_value`](Self::tokenize_value).
    pub fn with_format(preserve_format: bool) -> Self {
        Self {
            salt: Uuid::new_v4().to_string(),
            preserve_format,
            vault: Mutex::new(TokenVault::default()),
        }
    }

    /// Distinct detected values per category, in order of appearance.
    pub fn detect(&self, text: &str) -> BTreeMap<PiiCategory, Vec<String>> {
        let mut found: BTreeMap<PiiCategory, Vec<String>> = BTreeMap::new();
        for detection in detections(text) {
            let value = &text[detection.start..detection.end];
            let values = found.entry(detection.category).or_default();
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        }
        found
    }

    pub fn scan_report(&self, text: &str) -> PrivacyReport {
        let mut report = PrivacyReport::default();
        for detection in detections(text) {
            *report.counts.entry(detection.category).or_default() += 1;
            report.flagged = true;
        }
        report
    }

    /// Replace every detected value with its token.
    ///
    /// Returns the sanitized text and a map from each token used to the text
    /// it replaced.
    pub fn tokenize_pii(&self, text: &str, preserve_format: bool) -> (String, HashMap<String, String>) {
        let found = detections(text);
        if found.is_empty() {
            return (text.to_string(), HashMap::new());
        }

        let mut vault = self.lock();
        let mut out = String::with_capacity(text.len());
        let mut used = HashMap::new();
        let mut cursor = 0;
        for detection in found {
            let value = &text[detection.start..detection.end];
            let (prefix, hidden, suffix) = if preserve_format {
                detection.category.split(value)
            } else {
                ("", value, "")
            };
            let token = self.issue(&mut vault, detection.category, preserve_format, value, hidden);

            out.push_str(&text[cursor..detection.start]);
            out.push_str(prefix);
            out.push_str(&token);
            out.push_str(suffix);
            cursor = detection.end;
            used.insert(token, hidden.to_string());
        }
        out.push_str(&text[cursor..]);
        debug!(tokens = used.len(), "Tokenized sensitive values");
        (out, used)
    }

    /// Restore every token this instance issued; unknown tokens are left alone.
    pub fn detokenize(&self, text: &str) -> String {
        let vault = self.lock();
        if vault.reverse.is_empty() {
            return text.to_string();
        }
        TOKEN_PATTERN
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let token = &caps[0];
                vault
                    .reverse
                    .get(token)
                    .cloned()
                    .unwrap_or_else(|| token.to_string())
            })
            .into_owned()
    }

    /// Tokenize every string inside a JSON tree.
    pub fn tokenize_value(&self, value: &Json) -> Json {
        map_strings(value, &|s: &str| self.tokenize_pii(s, self.preserve_format).0)
    }

    pub fn detokenize_value(&self, value: &Json) -> Json {
        map_strings(value, &|s: &str| self.detokenize(s))
    }

    /// Every token issued so far, oldest first.
    pub fn tokens(&self) -> Vec<PiiToken> {
        self.lock().tokens.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenVault> {
        self.vault.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn issue(
        &self,
        vault: &mut TokenVault,
        category: PiiCategory,
        preserve_format: bool,
        original: &str,
        hidden: &str,
    ) -> String {
        let key = (category, preserve_format, original.to_string());
        if let Some(token) = vault.issued.get(&key) {
            return token.clone();
        }

        let mut nonce = 0u32;
        let token = loop {
            let mut hasher = Sha256::new();
            hasher.update(self.salt.as_bytes());
            hasher.update(category.label().as_bytes());
            hasher.update([preserve_format as u8]);
            hasher.update(original.as_bytes());
            hasher.update(nonce.to_le_bytes());
            let digest = hasher.finalize();
            let candidate = format!("[{}_{}]", category.label(), hex::encode(&digest[..4]));
            if !vault.reverse.contains_key(&candidate) {
                break candidate;
            }
            nonce += 1;
        };

        vault.issued.insert(key, token.clone());
        vault.reverse.insert(token.clone(), hidden.to_string());
        vault.tokens.push(PiiToken {
            original: original.to_string(),
            token: token.clone(),
            category,
        });
        token
    }
}

impl Default for PrivacyLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace credential-like fields anywhere in `value` with [`REDACTED`].
pub fn filter_sensitive_data(value: &Json) -> Json {
    match value {
        Json::Object(map) => Json::Object(
            map.iter()
                .map(|(key, item)| {
                    let item = if is_sensitive_key(key) {
                        Json::String(REDACTED.to_string())
                    } else {
                        filter_sensitive_data(item)
                    };
                    (key.clone(), item)
                })
                .collect(),
        ),
        Json::Array(items) => Json::Array(items.iter().map(filter_sensitive_data).collect()),
        other => other.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect();
    normalized.ends_with("token") || SENSITIVE_KEY_PARTS.iter().any(|part| normalized.contains(part))
}

fn map_strings(value: &Json, f: &dyn Fn(&str) -> String) -> Json {
    match value {
        Json::String(s) => Json::String(f(s)),
        Json::Array(items) => Json::Array(items.iter().map(|v| map_strings(v, f)).collect()),
        Json::Object(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), map_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Non-overlapping detections ordered by position.
fn detections(text: &str) -> Vec<Detection> {
    let mut accepted: Vec<Detection> = Vec::new();
    for (category, regex) in DETECTORS.iter() {
        for m in regex.find_iter(text) {
            if text[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric())
            {
                continue;
            }
            if *category == PiiCategory::CreditCard && !luhn_valid(m.as_str()) {
                continue;
            }
            if accepted.iter().any(|d| m.start() < d.end && d.start < m.end()) {
                continue;
            }
            accepted.push(Detection {
                category: *category,
                start: m.start(),
                end: m.end(),
            });
        }
    }
    accepted.sort_by_key(|d| d.start);
    accepted
}

fn luhn_valid(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SAMPLE: &str = "Owner alice@example.com, phone 555-123-4567, card 4111 1111 1111 1111, \
                          SSN 123-45-6789, from 192.168.1.20, vessel MMSI 366123456, hull ABC12345D404";

    #[test]
    fn detects_every_family() {
        let layer = PrivacyLayer::new();
        let found = layer.detect(SAMPLE);
        assert_eq!(found[&PiiCategory::Email], vec!["alice@example.com"]);
        assert_eq!(found[&PiiCategory::Phone], vec!["555-123-4567"]);
        assert_eq!(found[&PiiCategory::CreditCard], vec!["4111 1111 1111 1111"]);
        assert_eq!(found[&PiiCategory::Ssn], vec!["123-45-6789"]);
        assert_eq!(found[&PiiCategory::IpAddress], vec!["192.168.1.20"]);
        assert_eq!(found[&PiiCategory::Mmsi], vec!["MMSI 366123456"]);
        assert_eq!(found[&PiiCategory::HullId], vec!["ABC12345D404"]);
    }

    #[test]
    fn round_trip_restores_text_and_hides_values() {
        for preserve in [true, false] {
            let layer = PrivacyLayer::new();
            let (sanitized, map) = layer.tokenize_pii(SAMPLE, preserve);
            for secret in ["alice@example.com", "555-123-4567", "4111 1111 1111 1111", "123-45-6789"] {
                assert!(!sanitized.contains(secret), "{secret} leaked in {sanitized}");
            }
            assert!(!map.is_empty());
            assert_eq!(layer.detokenize(&sanitized), SAMPLE);
        }
    }

    #[test]
    fn format_preserving_keeps_hints() {
        let layer = PrivacyLayer::new();
        let (sanitized, _) = layer.tokenize_pii("mail bob@marina.org or call 555-987-6543", true);
        assert!(sanitized.contains("]@marina.org"));
        assert!(sanitized.ends_with("]43"));
        assert!(sanitized.contains("[EMAIL_"));
    }

    #[test]
    fn same_value_gets_same_token() {
        let layer = PrivacyLayer::new();
        let (a, _) = layer.tokenize_pii("ssn 123-45-6789", false);
        let (b, _) = layer.tokenize_pii("again: 123-45-6789", false);
        let token = a.trim_start_matches("ssn ");
        assert!(b.ends_with(token));
        assert_eq!(layer.tokens().len(), 1);
    }

    #[test]
    fn instances_do_not_share_tokens() {
        let first = PrivacyLayer::new();
        let second = PrivacyLayer::new();
        let (a, _) = first.tokenize_pii("123-45-6789", false);
        let (b, _) = second.tokenize_pii("123-45-6789", false);
        assert_ne!(a, b);
        assert_eq!(second.detokenize(&a), a);
    }

    #[test]
    fn invalid_card_numbers_are_ignored() {
        let layer = PrivacyLayer::new();
        assert!(!layer
            .detect("order 1234 5678 9012 3456")
            .contains_key(&PiiCategory::CreditCard));
    }

    #[test]
    fn clean_text_is_untouched() {
        let layer = PrivacyLayer::new();
        let text = "result = 2 + 2";
        assert_eq!(layer.tokenize_pii(text, true).0, text);
        assert!(!layer.scan_report(text).flagged);
    }

    #[test]
    fn scan_report_counts_occurrences() {
        let layer = PrivacyLayer::new();
        let report = layer.scan_report("a@b.io and a@b.io and 10.0.0.1");
        assert!(report.flagged);
        assert_eq!(report.counts[&PiiCategory::Email], 2);
        assert_eq!(report.counts[&PiiCategory::IpAddress], 1);
    }

    #[test]
    fn filter_redacts_credentials_recursively() {
        let input = json!({"password": "abc", "profile": {"api_key": "xyz", "name": "ok"}});
        assert_eq!(
            filter_sensitive_data(&input),
            json!({"password": "[REDACTED]", "profile": {"api_key": "[REDACTED]", "name": "ok"}})
        );
    }

    #[test]
    fn sensitive_key_heuristic() {
        assert!(is_sensitive_key("Access-Token"));
        assert!(is_sensitive_key("client_secret"));
        assert!(is_sensitive_key("DB_PASSWORD"));
        assert!(!is_sensitive_key("max_tokens"));
        assert!(!is_sensitive_key("vessel_name"));
    }

    #[test]
    fn json_values_round_trip() {
        let layer = PrivacyLayer::new();
        let value = json!({"owner": {"email": "carol@harbor.net"}, "slips": [1, "call 555-222-3333"]});
        let tokenized = layer.tokenize_value(&value);
        assert!(!tokenized.to_string().contains("carol@harbor.net"));
        assert_eq!(layer.detokenize_value(&tokenized), value);
    }
}
