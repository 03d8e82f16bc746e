use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::OnceLock;

/// Minimal projection of an attendee/guest record as the render pipeline
/// consumes it. Owned by the host attendee store; read-only here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeBinding {
    pub uuid: String,
    pub full_name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub guest_type_name: Option<String>,
}

impl AttendeeBinding {
    /// Fixed token dispatch table. `None` means the token is unknown, which
    /// is different from a known token whose field happens to be empty.
    fn token_value(&self, token: &str) -> Option<&str> {
        match token {
            "fullName" => Some(self.full_name.as_str()),
            "company" => Some(self.company.as_deref().unwrap_or("")),
            "jobTitle" => Some(self.job_title.as_deref().unwrap_or("")),
            "guestType" | "guestTypeName" => Some(self.guest_type_name.as_deref().unwrap_or("")),
            "uuid" => Some(self.uuid.as_str()),
            _ => None,
        }
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Identifier-shaped spans only; `{ spaced }` or `{}` are left alone.
    PATTERN.get_or_init(|| Regex::new(r"\{([A-Za-z][A-Za-z0-9_]*)\}").expect("token pattern"))
}

/// Replaces `{token}` spans in template text with attendee fields.
///
/// Unknown tokens stay verbatim so a template typo is visible on the printed
/// badge instead of silently vanishing. Total: every input yields an output.
pub fn substitute(text: &str, binding: &AttendeeBinding) -> String {
    token_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match binding.token_value(&caps[1]) {
                Some(value) => Cow::Owned(value.to_string()),
                None => Cow::Owned(caps[0].to_string()),
            }
        })
        .into_owned()
}

/// True when the text references the given token anywhere.
pub fn mentions_token(text: &str, token: &str) -> bool {
    token_pattern()
        .captures_iter(text)
        .any(|caps| &caps[1] == token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> AttendeeBinding {
        AttendeeBinding {
            uuid: "u-123".to_string(),
            full_name: "Ada Lovelace".to_string(),
            company: Some("Analytical Engines Ltd".to_string()),
            job_title: Some("Mathematician".to_string()),
            guest_type_name: Some("Speaker".to_string()),
        }
    }

    #[test]
    fn every_known_token_round_trips() {
        let b = binding();
        assert_eq!(substitute("{fullName}", &b), "Ada Lovelace");
        assert_eq!(substitute("{company}", &b), "Analytical Engines Ltd");
        assert_eq!(substitute("{jobTitle}", &b), "Mathematician");
        assert_eq!(substitute("{guestType}", &b), "Speaker");
        assert_eq!(substitute("{guestTypeName}", &b), "Speaker");
        assert_eq!(substitute("{uuid}", &b), "u-123");
    }

    #[test]
    fn unknown_tokens_stay_verbatim() {
        assert_eq!(substitute("{bogus}", &binding()), "{bogus}");
        assert_eq!(substitute("a {b c} d {}", &binding()), "a {b c} d {}");
    }

    #[test]
    fn missing_fields_become_empty_strings() {
        let b = AttendeeBinding {
            uuid: "u".to_string(),
            full_name: "Solo Name".to_string(),
            ..AttendeeBinding::default()
        };
        assert_eq!(substitute("{company}|{jobTitle}|{guestType}", &b), "||");
    }

    #[test]
    fn mixed_text_substitutes_in_place() {
        let out = substitute("Hi {fullName} ({company}) {nope}", &binding());
        assert_eq!(out, "Hi Ada Lovelace (Analytical Engines Ltd) {nope}");
    }

    #[test]
    fn mentions_token_matches_exact_identifier() {
        assert!(mentions_token("x {fullName} y", "fullName"));
        assert!(!mentions_token("x {fullName} y", "full"));
        assert!(!mentions_token("no tokens", "fullName"));
    }
}
