use std::sync::LazyLock;

use regex::Regex;

use crate::models::UNKNOWN_NAME;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("email pattern is a valid regex")
});

/// The record fields strategies resolve through selector fallbacks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Field {
    Name,
    Address,
    Phone,
    Website,
    Rating,
    Category,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Address => "address",
            Self::Phone => "phone",
            Self::Website => "website",
            Self::Rating => "rating",
            Self::Category => "category",
        }
    }

    /// Value recorded when no rule yields anything.
    pub fn default_value(self) -> &'static str {
        match self {
            Self::Name => UNKNOWN_NAME,
            _ => "",
        }
    }
}

/// Collapses whitespace runs to single spaces and trims the ends.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First email-shaped substring of `text`, or an empty string.
pub fn extract_email(text: &str) -> String {
    EMAIL_PATTERN
        .find(text)
        .map(|found| found.as_str().to_string())
        .unwrap_or_default()
}

/// First candidate that is non-empty after cleaning. Candidates are consumed
/// lazily, so later rules are never evaluated once one matches.
pub fn first_match<I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(|raw| clean_text(&raw))
        .find(|value| !value.is_empty())
}

pub fn resolve_field<I>(field: Field, candidates: I) -> String
where
    I: IntoIterator<Item = Option<String>>,
{
    first_match(candidates).unwrap_or_else(|| field.default_value().to_string())
}

#[cfg(test)]
mod tests {
    use super::{Field, clean_text, extract_email, resolve_field};

    #[test]
    fn clean_text_collapses_internal_whitespace() {
        assert_eq!(clean_text("  Joe's \n\t Pizza  "), "Joe's Pizza");
        assert_eq!(clean_text(" \n "), "");
    }

    #[test]
    fn extract_email_finds_the_first_address() {
        assert_eq!(
            extract_email("Contact us at Sales@Example.co.uk today"),
            "Sales@Example.co.uk"
        );
        assert_eq!(
            extract_email("a@b.io then c@d.org"),
            "a@b.io"
        );
        assert_eq!(extract_email("no address here"), "");
        assert_eq!(extract_email("broken@host"), "");
    }

    #[test]
    fn later_rules_are_skipped_after_a_match() {
        let mut evaluated = Vec::new();
        let rules: [(&str, Option<&str>); 3] = [
            ("primary", None),
            ("secondary", Some("  Blue Bottle ")),
            ("tertiary", Some("never")),
        ];

        let value = resolve_field(
            Field::Name,
            rules.iter().map(|(label, value)| {
                evaluated.push(*label);
                value.map(str::to_string)
            }),
        );

        assert_eq!(value, "Blue Bottle");
        assert_eq!(evaluated, vec!["primary", "secondary"]);
    }

    #[test]
    fn blank_matches_fall_through_to_the_default() {
        assert_eq!(
            resolve_field(Field::Name, [Some("   ".to_string()), None]),
            "Unknown"
        );
        assert_eq!(resolve_field(Field::Phone, [None]), "");
    }
}
