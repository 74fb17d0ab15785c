//! # Value Cleaning
//!
//! Per-property-type normalization applied to raw statement values before they
//! are attached to an entity. A value that cleans to nothing is rejected.

use crate::schema::PropertyType;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Date;

const DAY_FIRST_DOTTED: &[BorrowedFormatItem<'static>] = format_description!("[day].[month].[year]");
const DAY_FIRST_SLASHED: &[BorrowedFormatItem<'static>] = format_description!("[day]/[month]/[year]");
const MONTH_NAME_FIRST: &[BorrowedFormatItem<'static>] =
    format_description!("[month repr:long case_sensitive:false] [day padding:none], [year]");
const DAY_NAME_MONTH: &[BorrowedFormatItem<'static>] =
    format_description!("[day padding:none] [month repr:long case_sensitive:false] [year]");
const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("afghanistan", "af"),
    ("belarus", "by"),
    ("china", "cn"),
    ("cuba", "cu"),
    ("france", "fr"),
    ("germany", "de"),
    ("india", "in"),
    ("indonesia", "id"),
    ("iran", "ir"),
    ("iraq", "iq"),
    ("north korea", "kp"),
    ("russia", "ru"),
    ("russian federation", "ru"),
    ("syria", "sy"),
    ("ukraine", "ua"),
    ("united kingdom", "gb"),
    ("united states", "us"),
    ("venezuela", "ve"),
];

/// Clean a raw value for the given property type.
///
/// Returns `None` when nothing usable remains.
pub fn clean(kind: PropertyType, raw: &str) -> Option<String> {
    let collapsed = collapse_spaces(raw);
    if collapsed.is_empty() {
        return None;
    }
    match kind {
        PropertyType::Name | PropertyType::Text => Some(collapsed),
        PropertyType::Date => clean_date(&collapsed),
        PropertyType::Identifier => clean_identifier(&collapsed),
        PropertyType::Country => clean_country(&collapsed),
        PropertyType::Email => clean_email(&collapsed),
        PropertyType::Phone => clean_phone(&collapsed),
        PropertyType::Url => clean_url(&collapsed),
        PropertyType::Entity => {
            if collapsed.contains(' ') {
                None
            } else {
                Some(collapsed)
            }
        }
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_spaces(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a date to an ISO prefix (`YYYY`, `YYYY-MM` or `YYYY-MM-DD`).
pub fn clean_date(raw: &str) -> Option<String> {
    let value = raw.trim();

    if let Some(iso) = parse_iso_prefix(value) {
        return Some(iso);
    }

    for format in [DAY_FIRST_DOTTED, DAY_FIRST_SLASHED, MONTH_NAME_FIRST, DAY_NAME_MONTH] {
        if let Ok(date) = Date::parse(value, format) {
            return date.format(ISO_DATE).ok();
        }
    }
    None
}

fn parse_iso_prefix(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let digits = |range: std::ops::Range<usize>| {
        bytes.len() >= range.end && bytes[range].iter().all(u8::is_ascii_digit)
    };

    if !digits(0..4) {
        return None;
    }
    if bytes.len() == 4 {
        return Some(value.to_string());
    }
    if bytes.get(4) != Some(&b'-') || !digits(5..7) {
        return None;
    }
    let month: u8 = value[5..7].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    if bytes.len() == 7 {
        return Some(value.to_string());
    }
    if bytes.len() < 10 || bytes[7] != b'-' {
        return None;
    }
    // Full timestamps are truncated to the day.
    if bytes.len() > 10 && !matches!(bytes[10], b'T' | b' ') {
        return None;
    }
    let date = Date::parse(&value[..10], ISO_DATE).ok()?;
    date.format(ISO_DATE).ok()
}

fn clean_identifier(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn clean_country(raw: &str) -> Option<String> {
    let lowered = raw.to_lowercase();
    if lowered.len() == 2 && lowered.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(lowered);
    }
    COUNTRY_NAMES
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, code)| code.to_string())
}

fn clean_email(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut parts = lowered.split('@');
    let (local, domain) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || local.is_empty() || !domain.contains('.') {
        return None;
    }
    if lowered.contains(' ') {
        return None;
    }
    Some(lowered)
}

fn clean_phone(raw: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for (idx, c) in raw.trim().chars().enumerate() {
        if c.is_ascii_digit() || (c == '+' && idx == 0) {
            cleaned.push(c);
        }
    }
    let digit_count = cleaned.chars().filter(char::is_ascii_digit).count();
    if digit_count < 5 {
        None
    } else {
        Some(cleaned)
    }
}

fn clean_url(raw: &str) -> Option<String> {
    let value = raw.trim();
    let lowered = value.to_lowercase();
    if (lowered.starts_with("http://") || lowered.starts_with("https://"))
        && !value.contains(' ')
    {
        Some(value.to_string())
    } else {
        None
    }
}

/// Slug from the given parts: lowercase ASCII alphanumerics joined by dashes.
pub fn slugify<S: AsRef<str>>(parts: &[S]) -> Option<String> {
    let mut slug = String::new();
    for part in parts {
        for c in part.as_ref().chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Stable hashed ID from the given parts. Empty parts are ignored, so an ID
/// can only be produced when at least one part carries data.
pub fn hash_id<S: AsRef<str>>(parts: &[S]) -> Option<String> {
    let mut hasher = blake3::Hasher::new();
    let mut seen = false;
    for part in parts {
        let part = part.as_ref().trim();
        if part.is_empty() {
            continue;
        }
        seen = true;
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    if !seen {
        return None;
    }
    Some(hasher.finalize().to_hex().as_str()[..40].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_name_collapses_whitespace() {
        assert_eq!(
            clean(PropertyType::Name, "  Jane \n  Doe "),
            Some("Jane Doe".to_string())
        );
        assert_eq!(clean(PropertyType::Name, "   "), None);
        assert_eq!(clean(PropertyType::Text, ""), None);
    }

    #[test]
    fn test_clean_date_formats() {
        assert_eq!(clean_date("1967-12-21"), Some("1967-12-21".to_string()));
        assert_eq!(clean_date("1967-12-21T00:00:00Z"), Some("1967-12-21".to_string()));
        assert_eq!(clean_date("1967-12"), Some("1967-12".to_string()));
        assert_eq!(clean_date("1967"), Some("1967".to_string()));
        assert_eq!(clean_date("21.12.1967"), Some("1967-12-21".to_string()));
        assert_eq!(clean_date("21/12/1967"), Some("1967-12-21".to_string()));
        assert_eq!(clean_date("December 21, 1967"), Some("1967-12-21".to_string()));
        assert_eq!(clean_date("21 december 1967"), Some("1967-12-21".to_string()));
    }

    #[test]
    fn test_clean_date_rejects_garbage() {
        assert_eq!(clean_date("1967-13-01"), None);
        assert_eq!(clean_date("1967-02-30"), None);
        assert_eq!(clean_date("unknown"), None);
        assert_eq!(clean_date("19670"), None);
    }

    #[test]
    fn test_clean_identifier() {
        assert_eq!(
            clean(PropertyType::Identifier, "ab-123 456"),
            Some("AB123456".to_string())
        );
        assert_eq!(clean(PropertyType::Identifier, "--"), None);
    }

    #[test]
    fn test_clean_country() {
        assert_eq!(clean(PropertyType::Country, "DE"), Some("de".to_string()));
        assert_eq!(clean(PropertyType::Country, "Russia"), Some("ru".to_string()));
        assert_eq!(clean(PropertyType::Country, "Atlantis"), None);
    }

    #[test]
    fn test_clean_contacts() {
        assert_eq!(
            clean(PropertyType::Email, "Jane@Example.ORG"),
            Some("jane@example.org".to_string())
        );
        assert_eq!(clean(PropertyType::Email, "not-an-email"), None);
        assert_eq!(
            clean(PropertyType::Phone, "+1 (555) 123-4567"),
            Some("+15551234567".to_string())
        );
        assert_eq!(clean(PropertyType::Phone, "12"), None);
        assert_eq!(clean(PropertyType::Url, "ftp://example.org"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify(&["ID", "Dewan Perwakilan", "42"]),
            Some("id-dewan-perwakilan-42".to_string())
        );
        assert_eq!(slugify(&["  ", "!!"]), None);
    }

    #[test]
    fn test_hash_id_is_stable() {
        let a = hash_id(&["Jane Doe", "1967-12-21"]).unwrap();
        let b = hash_id(&["Jane Doe", "", "1967-12-21"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert_ne!(a, hash_id(&["Jane Doe"]).unwrap());
        assert_eq!(hash_id::<&str>(&[]), None);
    }
}
