//! Validation for writes that arrive from outside the terminal UI.
//!
//! Plugins and other external callers can push arbitrary text into a shell.
//! Before that text reaches the transport it is checked against a blocklist
//! of destructive or exfiltrating commands. The check is line oriented so a
//! dangerous command hidden on a later line of a paste is still caught.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest write accepted verbatim, in characters.
pub const MAX_WRITE_CHARS: usize = 64 * 1024;

/// Appended to writes that exceed [`MAX_WRITE_CHARS`].
pub const TRUNCATION_MARKER: &str = "\n[Data truncated for security]\n";

const RULE_SOURCES: &[(&str, &str)] = &[
    ("rm-root", r"(?m)^\s*rm\s+-rf?\s+/[^\r\n]*[\r\n]?$"),
    ("rm-wildcard", r"(?m)^\s*rm\s+-rf?\s+\*[^\r\n]*[\r\n]?$"),
    ("rm-home", r"(?m)^\s*rm\s+-rf?\s+~[^\r\n]*[\r\n]?$"),
    ("mkfs", r"(?m)^\s*mkfs\.[^\r\n]*[\r\n]?$"),
    ("dd-device", r"(?m)^\s*dd\s+if=/[^\r\n]*[\r\n]?$"),
    ("fork-bomb", r"(?m)^\s*:\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:[^\r\n]*[\r\n]?$"),
    ("sudo-dd-device", r"(?m)^\s*sudo\s+dd\s+if=/[^\r\n]*[\r\n]?$"),
    ("sudo-rm-root", r"(?m)^\s*sudo\s+rm\s+-rf?\s+/[^\r\n]*[\r\n]?$"),
    ("curl-pipe-shell", r"(?m)^\s*curl\s+[^\r\n]*\|\s*sh[^\r\n]*[\r\n]?$"),
    ("wget-pipe-shell", r"(?m)^\s*wget\s+[^\r\n]*\|\s*sh[^\r\n]*[\r\n]?$"),
    ("bash-process-substitution", r"(?m)^\s*bash\s+<\s*\([^\r\n]*[\r\n]?$"),
    ("sh-process-substitution", r"(?m)^\s*sh\s+<\s*\([^\r\n]*[\r\n]?$"),
    ("nc-listen", r"(?m)^\s*nc\s+-l\s+-p\s+\d+[^\r\n]*[\r\n]?$"),
    ("ncat-listen", r"(?m)^\s*ncat\s+-l\s+-p\s+\d+[^\r\n]*[\r\n]?$"),
    ("python-simple-http", r"(?m)^\s*python\s+.*SimpleHTTPServer[^\r\n]*[\r\n]?$"),
    ("python-http-server", r"(?m)^\s*python\s+.*http\.server[^\r\n]*[\r\n]?$"),
    ("kill-init", r"(?m)^\s*kill\s+-9\s+1\s*[\r\n]?$"),
    ("killall-wildcard", r"(?m)^\s*killall\s+-9\s+\*[^\r\n]*[\r\n]?$"),
    ("chmod-root", r"(?m)^\s*chmod\s+777\s+/[^\r\n]*[\r\n]?$"),
    ("chown-root", r"(?m)^\s*chown\s+\S+\s+/[^\r\n]*[\r\n]?$"),
    ("read-passwd", r"(?m)^\s*cat\s+/etc/passwd[^\r\n]*[\r\n]?$"),
    ("read-shadow", r"(?m)^\s*cat\s+/etc/shadow[^\r\n]*[\r\n]?$"),
    ("read-root-home", r"(?m)^\s*cat\s+/root/[^\r\n]*[\r\n]?$"),
];

struct BlockRule {
    name: &'static str,
    pattern: Regex,
}

static RULES: Lazy<Vec<BlockRule>> = Lazy::new(|| {
    RULE_SOURCES
        .iter()
        .map(|(name, source)| BlockRule {
            name: *name,
            pattern: Regex::new(source).expect("blocklist pattern is valid"),
        })
        .collect()
});

/// Names of every blocklist rule, in evaluation order.
pub fn rule_names() -> impl Iterator<Item = &'static str> {
    RULE_SOURCES.iter().map(|(name, _)| *name)
}

/// Why a write was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A line matched the named blocklist rule.
    BlockedPattern(&'static str),
    /// The data contained a NUL byte.
    NulByte,
    /// The body of a `$( ... )` span matched the named rule.
    CommandSubstitution(&'static str),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BlockedPattern(rule) => {
                write!(f, "potentially dangerous command blocked ({})", rule)
            }
            RejectReason::NulByte => f.write_str("null byte blocked"),
            RejectReason::CommandSubstitution(rule) => {
                write!(f, "command substitution blocked ({})", rule)
            }
        }
    }
}

/// Outcome of [`CommandSecurityFilter::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub allowed: bool,
    /// Data to forward. Empty when the write was rejected.
    pub sanitized_data: String,
    pub reason: Option<RejectReason>,
}

impl Validation {
    fn allow(data: String) -> Self {
        Self {
            allowed: true,
            sanitized_data: data,
            reason: None,
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Self {
            allowed: false,
            sanitized_data: String::new(),
            reason: Some(reason),
        }
    }
}

/// Stateless blocklist filter for externally originated writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSecurityFilter;

impl CommandSecurityFilter {
    pub fn new() -> Self {
        Self
    }

    /// Check `data` and return what may be forwarded.
    ///
    /// Rejection short-circuits: an oversized write that also contains a
    /// blocked command is rejected, not truncated.
    pub fn validate(&self, data: &str) -> Validation {
        if let Some(rule) = matching_rule(data) {
            return Validation::reject(RejectReason::BlockedPattern(rule));
        }
        if data.contains('\0') {
            return Validation::reject(RejectReason::NulByte);
        }
        if let Some(rule) = check_substitutions(data) {
            return Validation::reject(RejectReason::CommandSubstitution(rule));
        }

        if data.chars().count() > MAX_WRITE_CHARS {
            let mut truncated: String = data.chars().take(MAX_WRITE_CHARS).collect();
            truncated.push_str(TRUNCATION_MARKER);
            return Validation::allow(truncated);
        }

        Validation::allow(data.to_string())
    }
}

fn matching_rule(data: &str) -> Option<&'static str> {
    RULES
        .iter()
        .find(|rule| rule.pattern.is_match(data))
        .map(|rule| rule.name)
}

/// Check the body of every `$( ... )` span, descending into nested spans.
fn check_substitutions(data: &str) -> Option<&'static str> {
    for body in substitution_bodies(data) {
        if let Some(rule) = matching_rule(body) {
            return Some(rule);
        }
        if let Some(rule) = check_substitutions(body) {
            return Some(rule);
        }
    }
    None
}

/// Top-level `$( ... )` bodies in `data`. An unterminated span runs to the end.
fn substitution_bodies(data: &str) -> Vec<&str> {
    let bytes = data.as_bytes();
    let mut bodies = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != b'$' || bytes[i + 1] != b'(' {
            i += 1;
            continue;
        }

        let start = i + 2;
        let mut depth = 1usize;
        let mut j = start;
        while j < bytes.len() {
            match bytes[j] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            j += 1;
        }

        // Only ASCII delimiters are inspected so both ends are char boundaries.
        bodies.push(&data[start..j]);
        i = j + 1;
    }

    bodies
}
