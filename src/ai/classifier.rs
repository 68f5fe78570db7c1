use crate::model::{ErrorFinding, LogEntry};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern compiles")
}

static EXCEPTION: LazyLock<Regex> =
    LazyLock::new(|| compile(r"((?:[A-Za-z_$][\w$]*\.)*[A-Za-z_$][\w$]*(?:Exception|Error)):[ \t]*([^\n]+)"));
static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| compile(r"ERROR\s+(\S+)\s+[^\n]*?\]\s+([^\n]+)"));
static ERROR_LOGGER: LazyLock<Regex> = LazyLock::new(|| compile(r"ERROR\s+([\w$]+(?:\.[\w$]+)+)"));
static STACK_FRAME: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\bat\s+((?:[\w$]+\.)+)([\w$<>]+)\("));

static UUID: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
});
static HEX_ID: LazyLock<Regex> = LazyLock::new(|| compile(r"\b[0-9a-f]{12,}\b"));
static ISO_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z?"));
static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| compile(r"\d{2}:\d{2}:\d{2}\.\d+"));
static QUOTED_ID: LazyLock<Regex> = LazyLock::new(|| compile(r"'[0-9]+'"));
static TENANT_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"\[\w+_\w+_\w+_\w+\d+\]"));
static OBJECT_DUMP: LazyLock<Regex> = LazyLock::new(|| compile(r"\b([A-Z]\w*)\{[^}]*\}"));
static LONG_LIST: LazyLock<Regex> = LazyLock::new(|| compile(r"\[[^\]]{50,}\]"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| compile(r"\b\d{3,}\b"));

/// Frames from these packages never identify the failing code
const RUNTIME_PACKAGES: [&str; 5] = ["java.", "javax.", "jdk.", "sun.", "kotlin."];

/// Excerpt length in characters, not bytes
const MAX_EXCERPT_CHARS: usize = 300;

/// Grouping key extracted from one log message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSignature {
    pub error_type: String,
    pub location: String,
    pub signature: String,
}

/// Replace identifiers, timestamps and payload dumps so equal errors compare equal
pub fn normalize_message(message: &str) -> String {
    let text = UUID.replace_all(message, "[UUID]");
    let text = HEX_ID.replace_all(&text, "[HEX-ID]");
    let text = ISO_TIMESTAMP.replace_all(&text, "[TIMESTAMP]");
    let text = CLOCK_TIME.replace_all(&text, "[TIME]");
    let text = QUOTED_ID.replace_all(&text, "'[ID]'");
    let text = TENANT_TAG.replace_all(&text, "[TENANT]");
    let text = OBJECT_DUMP.replace_all(&text, "${1}{...}");
    let text = LONG_LIST.replace_all(&text, "[...]");
    let text = NUMBER.replace_all(&text, "[NUM]");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Class.method` of the first application stack frame, or the logger class
pub fn extract_location(message: &str) -> String {
    for frame in STACK_FRAME.captures_iter(message) {
        let package = &frame[1];
        if RUNTIME_PACKAGES.iter().any(|p| package.starts_with(p)) {
            continue;
        }
        let class = package
            .trim_end_matches('.')
            .rsplit('.')
            .next()
            .unwrap_or(package);
        return format!("{}.{}", class, &frame[2]);
    }

    if let Some(caps) = ERROR_LOGGER.captures(message) {
        if let Some(class) = caps[1].rsplit('.').next() {
            return class.to_string();
        }
    }

    "Unknown".to_string()
}

/// Derive the grouping signature for one log message
///
/// Exceptions yield `Type: normalized message`; plain `ERROR` lines yield
/// `ERROR in Class: normalized message`; anything else falls back to the
/// normalized first line.
pub fn extract_signature(message: &str) -> ErrorSignature {
    if message.trim().is_empty() {
        return ErrorSignature {
            error_type: "Unknown".to_string(),
            location: "Unknown".to_string(),
            signature: "Empty log message".to_string(),
        };
    }

    if let Some(caps) = EXCEPTION.captures(message) {
        let error_type = caps[1].rsplit('.').next().unwrap_or(&caps[1]).to_string();
        let normalized = normalize_message(caps[2].trim());
        return ErrorSignature {
            signature: format!("{}: {}", error_type, normalized),
            error_type,
            location: extract_location(message),
        };
    }

    if let Some(caps) = ERROR_LINE.captures(message) {
        let class = caps[1].rsplit('.').next().unwrap_or(&caps[1]).to_string();
        let normalized = normalize_message(caps[2].trim());
        return ErrorSignature {
            error_type: "ERROR".to_string(),
            signature: format!("ERROR in {}: {}", class, normalized),
            location: class,
        };
    }

    let first_line: String = message.lines().next().unwrap_or("").chars().take(200).collect();
    ErrorSignature {
        error_type: "Unknown".to_string(),
        location: "Unknown".to_string(),
        signature: normalize_message(&first_line),
    }
}

/// Group log entries by signature, most frequent first
///
/// Ties are broken by signature so the order is stable across runs. The
/// first message seen for a signature, cut to 300 characters, becomes its
/// excerpt.
pub fn classify(entries: &[LogEntry]) -> Vec<ErrorFinding> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut findings: Vec<ErrorFinding> = Vec::new();

    for entry in entries {
        if entry.message.trim().is_empty() {
            continue;
        }
        let sig = extract_signature(&entry.message);
        match index.get(&sig.signature) {
            Some(&i) => findings[i].count += 1,
            None => {
                index.insert(sig.signature.clone(), findings.len());
                findings.push(ErrorFinding {
                    signature: sig.signature,
                    error_type: sig.error_type,
                    location: sig.location,
                    log_excerpt: entry.message.chars().take(MAX_EXCERPT_CHARS).collect(),
                    count: 1,
                    category: None,
                    ai_summary: None,
                });
            }
        }
    }

    findings.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.signature.cmp(&b.signature)));
    findings
}
