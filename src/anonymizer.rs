//! Redaction of personal and tenant data from log text
//!
//! Applied to every log message before it is written to disk or sent to the
//! analysis endpoint. Patterns are applied in a fixed order; tenant masking
//! runs both first and last so identifiers exposed by earlier substitutions
//! are still caught.

use regex::Regex;
use std::sync::LazyLock;

const TENANT: &str = "[TENANT_REDACTED]";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern compiles")
}

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"));
static USERNAME_QUOTED: LazyLock<Regex> = LazyLock::new(|| compile(r"userName='([^']+)'"));
static USERNAME_JSON: LazyLock<Regex> =
    LazyLock::new(|| compile(r#""userName"\s*:\s*"([^"]+)""#));
// Two capitalized words followed by a separator; the separator is captured and
// put back since the regex engine has no lookahead.
static PERSON_NAME: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b([\s,'"])"#));
static STATUS_UPDATER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"statusUpdaterName='([^']+)'"));
static USER_COMMENT: LazyLock<Regex> = LazyLock::new(|| compile(r"userComment='([^']+)'"));
static USER_BRACKET: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\[user:\s*([^\]]+)\]"));
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b"));

static TENANT_BRACKETED_ID: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\[[A-Za-z0-9][A-Za-z0-9._-]*\d{3,}\]"));
static TENANT_BRACKETED_KV: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\[(tenant|customer|org|organization|account)[:=]\s*[^\]]+\]")
});
static TENANT_KV: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?i)\b(tenantId|tenant|tenantName|customer|customerName|organization|organizationName|org|account|accountName)\b\s*[:=]\s*(?:'[^']+'|"[^"]+"|[^,\s\]}\[][^,\s\]}]*)"#,
    )
});
static TENANT_PATH: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)(/tenants/)([^/?\s]+)"));
static TENANT_QUERY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)(tenant(?:Id|Name)?=)([^&\s]+)"));

fn redact_tenants(text: &str) -> String {
    let text = TENANT_BRACKETED_ID.replace_all(text, TENANT);
    let text = TENANT_BRACKETED_KV.replace_all(&text, TENANT);
    let text = TENANT_KV.replace_all(&text, format!("${{1}}={}", TENANT).as_str());
    let text = TENANT_PATH.replace_all(&text, format!("${{1}}{}", TENANT).as_str());
    let text = TENANT_QUERY.replace_all(&text, format!("${{1}}{}", TENANT).as_str());
    text.into_owned()
}

/// Redact emails, user names, person names, phone numbers and tenant identifiers
pub fn anonymize(message: &str) -> String {
    if message.trim().is_empty() {
        return message.to_string();
    }

    let text = redact_tenants(message);
    let text = EMAIL.replace_all(&text, "[EMAIL_REDACTED]");
    let text = USERNAME_QUOTED.replace_all(&text, "userName='[USER_NAME_REDACTED]'");
    let text = USERNAME_JSON.replace_all(&text, r#""userName":"[USER_NAME_REDACTED]""#);
    let text = PERSON_NAME.replace_all(&text, "[NAME_REDACTED]${1}");
    let text = STATUS_UPDATER.replace_all(&text, "statusUpdaterName='[NAME_REDACTED]'");
    let text = USER_COMMENT.replace_all(&text, "userComment='[COMMENT_REDACTED]'");
    let text = USER_BRACKET.replace_all(&text, "[user:[USER_REDACTED]]");
    let text = PHONE.replace_all(&text, "[PHONE_REDACTED]");
    redact_tenants(&text)
}
