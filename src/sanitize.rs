//! Redaction of client-facing error and log messages.
//!
//! Hand-rolled rather than `regex`-backed: the patterns we need to catch
//! (email addresses, phone numbers, `key=value` password-like tokens) are
//! simple enough to scan with plain byte/char loops, and the crate does not
//! otherwise need a regex engine.

const PASSWORD_KEYS: &[&str] = &["password", "passwd", "pwd", "secret", "token", "api_key", "apikey"];

/// Replace email-like, phone-like, and password-keyed tokens in `message`
/// with `[REDACTED]`. Used on every message attached to a `ProgressRecord`
/// or returned across the external interface boundary.
pub fn redact(message: &str) -> String {
    let after_email = redact_emails(message);
    let after_phone = redact_phones(&after_email);
    redact_password_tokens(&after_phone)
}

fn redact_emails(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for word in split_keep_whitespace(input) {
        if looks_like_email(word) {
            out.push_str("[REDACTED]");
        } else {
            out.push_str(word);
        }
    }
    out
}

fn looks_like_email(word: &str) -> bool {
    let trimmed = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '@' && c != '.' && c != '_' && c != '-' && c != '+');
    let Some(at) = trimmed.find('@') else {
        return false;
    };
    let (local, domain) = (&trimmed[..at], &trimmed[at + 1..]);
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn redact_phones(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(len) = phone_match_len(&chars[i..]) {
            out.push_str("[REDACTED]");
            i += len;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Matches runs of 7+ digits allowing interior `-`, `.`, ` `, `(`, `)`, `+`
/// separators, anchored so we don't eat plain long numbers that aren't
/// phone-shaped (require at least one separator or a leading `+`).
fn phone_match_len(chars: &[char]) -> Option<usize> {
    let mut digits = 0;
    let mut has_separator = false;
    let mut len = 0;
    let leading_plus = chars.first() == Some(&'+');
    if leading_plus {
        len += 1;
    }
    for &c in &chars[len..] {
        if c.is_ascii_digit() {
            digits += 1;
            len += 1;
        } else if c == '-' || c == '.' || c == ' ' || c == '(' || c == ')' {
            has_separator = true;
            len += 1;
        } else {
            break;
        }
    }
    // trim trailing separators from the match
    while len > 0 && matches!(chars.get(len - 1), Some('-') | Some('.') | Some(' ') | Some('(') | Some(')')) {
        len -= 1;
    }
    if digits >= 7 && (has_separator || leading_plus) {
        Some(len)
    } else {
        None
    }
}

fn redact_password_tokens(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for word in split_keep_whitespace(input) {
        if let Some(eq) = word.find('=') {
            let key = word[..eq].to_ascii_lowercase();
            if PASSWORD_KEYS.iter().any(|k| key == *k || key.ends_with(k)) {
                out.push_str(&word[..=eq]);
                out.push_str("[REDACTED]");
                continue;
            }
        }
        if let Some(colon) = word.find(':') {
            let key = word[..colon].to_ascii_lowercase();
            if PASSWORD_KEYS.iter().any(|k| key == *k) {
                out.push_str(&word[..=colon]);
                out.push_str("[REDACTED]");
                continue;
            }
        }
        out.push_str(word);
    }
    out
}

/// Splits on whitespace boundaries but keeps the whitespace itself as
/// separate tokens, so the original spacing can be reconstructed exactly.
fn split_keep_whitespace(input: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = false;
    for (i, c) in input.char_indices() {
        let is_space = c.is_whitespace();
        if i == 0 {
            in_space = is_space;
            continue;
        }
        if is_space != in_space {
            tokens.push(&input[start..i]);
            start = i;
            in_space = is_space;
        }
    }
    tokens.push(&input[start..]);
    tokens
}
