use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Ordered redaction table: (label, pattern). Earlier rules run first so a
/// provider-specific key is labelled before the generic assignment rule sees it.
static SECRET_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("anthropic-key", r"\bsk-ant-[A-Za-z0-9_\-]{20,}"),
        ("openai-key", r"\bsk-[A-Za-z0-9_\-]{20,}"),
        ("aws-access-key", r"\bAKIA[0-9A-Z]{16}\b"),
        ("github-token", r"\bgh[pousr]_[A-Za-z0-9]{36,}"),
        ("slack-token", r"\bxox[abprs]-[A-Za-z0-9\-]{10,}"),
        ("private-key", r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----"),
        ("bearer-token", r"(?i)bearer\s+[A-Za-z0-9\-_\.=]{20,}"),
        (
            "secret-assignment",
            r#"(?i)\b(password|passwd|secret|token|api[_-]?key|access[_-]?token|auth[_-]?token)\s*[=:]\s*["']?[^\s"']{4,}"#,
        ),
        ("connection-string", r"(?i)\b[a-z][a-z0-9+]*://[^\s:/@]+:[^\s@]+@[^\s]+"),
    ]
    .into_iter()
    .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| (label, re)))
    .collect()
});

/// Replace anything that looks like a credential with `[REDACTED:<label>]`.
pub fn redact_secrets(text: &str) -> String {
    let mut current: Cow<'_, str> = Cow::Borrowed(text);
    for (label, re) in SECRET_PATTERNS.iter() {
        if re.is_match(&current) {
            let replacement = format!("[REDACTED:{label}]");
            current = Cow::Owned(re.replace_all(&current, replacement.as_str()).into_owned());
        }
    }
    current.into_owned()
}
