use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("invalid email address: {0}")]
    Invalid(String),
}

/// Recipient address split into the parts mailboxes are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAddress {
    pub local_part: String,
    pub domain: String,
    pub display_name: Option<String>,
}

impl NormalizedAddress {
    pub fn address(&self) -> String {
        format!("{}@{}", self.local_part, self.domain)
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"))
}

/// Parse a raw `To` value such as `"Jane Doe" <jane@x.com>` or `jane@x.com`.
///
/// Lists use their first recipient. The address is trimmed and lower-cased
/// before validation.
pub fn normalize_address(raw: &str) -> Result<NormalizedAddress, AddressError> {
    let entry = split_recipients(raw)
        .into_iter()
        .next()
        .ok_or(AddressError::Empty)?;
    let (display_name, address) = split_display_name(&entry);
    let address = address.trim();
    let address = address.strip_prefix("mailto:").unwrap_or(address).trim();
    let address = address.to_lowercase();
    if !email_pattern().is_match(&address) {
        return Err(AddressError::Invalid(entry));
    }
    let (local_part, domain) = address
        .rsplit_once('@')
        .ok_or_else(|| AddressError::Invalid(entry.clone()))?;
    Ok(NormalizedAddress {
        local_part: local_part.to_string(),
        domain: domain.to_string(),
        display_name,
    })
}

/// Normalized `local@domain` form of a sender or recipient address.
pub fn normalize_email(raw: &str) -> Result<String, AddressError> {
    normalize_address(raw).map(|address| address.address())
}

fn split_display_name(entry: &str) -> (Option<String>, String) {
    let trimmed = entry.trim();

    if trimmed.ends_with('>') {
        if let Some(start) = trimmed.rfind('<') {
            let address = &trimmed[start + 1..trimmed.len() - 1];
            let name = strip_quotes(trimmed[..start].trim());
            return (non_empty(name), address.to_string());
        }
    }

    for quote in ['"', '\''] {
        if let Some(rest) = trimmed.strip_prefix(quote) {
            if let Some(end) = rest.find(quote) {
                let name = rest[..end].trim();
                let address = rest[end + 1..].trim();
                return (non_empty(name), address.to_string());
            }
        }
    }

    (None, trimmed.to_string())
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].trim();
        }
    }
    value
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a header value on `,`/`;` outside quoted display names.
pub fn split_recipients(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        match ch {
            '\\' => {
                escaped = true;
                current.push(ch);
            }
            '"' | '\'' if quote.is_none() && current.trim().is_empty() => {
                quote = Some(ch);
                current.push(ch);
            }
            _ if quote == Some(ch) => {
                quote = None;
                current.push(ch);
            }
            ',' | ';' if quote.is_none() => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }

    out
}
