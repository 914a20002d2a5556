//! Pre-persistence quality gate.
//!
//! A pure predicate over candidate content. Rejection reasons are structured
//! so the adapter can surface the triggering rule; the near-duplicate case is
//! handled separately by the store (dedup is a silent success, not a reject).

/// Content shorter than this is noise.
pub const MIN_CONTENT_CHARS: usize = 15;

/// Default upper bound for gate input. The `store_memory` adapter raises this
/// to its own boundary before deriving intent/action.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Phrases too generic to ever be worth recalling.
const GENERIC_BLACKLIST: &[&str] = &[
    "use best practices",
    "follow conventions",
    "handle errors",
    "write clean code",
    "add tests",
    "be careful",
    "keep it simple",
];

const MAX_CHAR_RUN: usize = 8;

/// Why the gate rejected a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    Generic { phrase: String },
    AllCaps,
    RepeatedChar { ch: char },
    BareUrl,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "content is empty or whitespace-only"),
            Self::TooShort { len, min } => {
                write!(f, "content too short ({len} chars, minimum {min})")
            }
            Self::TooLong { len, max } => {
                write!(f, "content too long ({len} chars, maximum {max})")
            }
            Self::Generic { phrase } => {
                write!(f, "content matches generic phrase \"{phrase}\"")
            }
            Self::AllCaps => write!(f, "content is all-caps"),
            Self::RepeatedChar { ch } => {
                write!(f, "character '{ch}' repeats more than {MAX_CHAR_RUN} times")
            }
            Self::BareUrl => write!(f, "content is a bare URL"),
        }
    }
}

/// Check candidate content against every gate rule with the default length cap.
pub fn check(content: &str) -> Result<(), RejectReason> {
    check_with_max(content, MAX_CONTENT_CHARS)
}

/// Check with a caller-supplied maximum length (the adapter boundary is wider
/// than the gate's own default).
pub fn check_with_max(content: &str, max_chars: usize) -> Result<(), RejectReason> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(RejectReason::Empty);
    }

    let len = trimmed.chars().count();
    if len < MIN_CONTENT_CHARS {
        return Err(RejectReason::TooShort {
            len,
            min: MIN_CONTENT_CHARS,
        });
    }
    if len > max_chars {
        return Err(RejectReason::TooLong {
            len,
            max: max_chars,
        });
    }

    let lower = trimmed.to_lowercase();
    for phrase in GENERIC_BLACKLIST {
        if lower == *phrase {
            return Err(RejectReason::Generic {
                phrase: (*phrase).to_string(),
            });
        }
    }

    if len > 20 && is_all_caps(trimmed) {
        return Err(RejectReason::AllCaps);
    }

    if let Some(ch) = longest_char_run(trimmed) {
        return Err(RejectReason::RepeatedChar { ch });
    }

    if is_bare_url(trimmed) {
        return Err(RejectReason::BareUrl);
    }

    Ok(())
}

fn is_all_caps(text: &str) -> bool {
    let mut has_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            has_alpha = true;
            if c.is_lowercase() {
                return false;
            }
        }
    }
    has_alpha
}

/// Returns the character of the first run longer than [`MAX_CHAR_RUN`].
fn longest_char_run(text: &str) -> Option<char> {
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
            if run > MAX_CHAR_RUN {
                return Some(c);
            }
        } else {
            prev = Some(c);
            run = 1;
        }
    }
    None
}

fn is_bare_url(text: &str) -> bool {
    (text.starts_with("http://") || text.starts_with("https://"))
        && !text.contains(char::is_whitespace)
}
