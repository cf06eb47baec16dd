//! Deciding whether a responder message answers a given identifier.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use relay_core::{defaults, labeled_pattern, strip_markup, Error};

/// How much evidence a message needs before it counts as the anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrictness {
    /// Labeled identifier plus one of the responder's banner markers.
    Strict,
    /// Labeled identifier only.
    #[default]
    Labeled,
    /// Labeled identifier, or the bare identifier anywhere in the text.
    /// Prone to cross-talk with other queries for overlapping numbers.
    Loose,
}

impl MatchStrictness {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrictness::Strict => "strict",
            MatchStrictness::Labeled => "labeled",
            MatchStrictness::Loose => "loose",
        }
    }
}

impl fmt::Display for MatchStrictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrictness {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(MatchStrictness::Strict),
            "labeled" | "labelled" => Ok(MatchStrictness::Labeled),
            "loose" => Ok(MatchStrictness::Loose),
            other => Err(Error::Config(format!(
                "unknown match strictness '{}', expected strict|labeled|loose",
                other
            ))),
        }
    }
}

/// Any labeled 8-digit identifier, used to spot replies meant for someone else.
static ANY_LABELED_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&labeled_pattern(defaults::ANCHOR_LABEL, r"([0-9]{8})(?:[^0-9]|$)")).unwrap()
});

static THROTTLE_SECONDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*segundos?").unwrap());

/// Anchor matcher for one identifier.
#[derive(Debug, Clone)]
pub struct AnchorMatcher {
    id_number: String,
    strictness: MatchStrictness,
    labeled: Regex,
}

impl AnchorMatcher {
    /// Build a matcher for an already validated identifier.
    pub fn new(id_number: &str, strictness: MatchStrictness) -> Result<Self, Error> {
        let value = format!("{}(?:[^0-9]|$)", regex::escape(id_number));
        let labeled = Regex::new(&labeled_pattern(defaults::ANCHOR_LABEL, &value))
            .map_err(|e| Error::Internal(format!("anchor pattern: {}", e)))?;
        Ok(Self {
            id_number: id_number.to_string(),
            strictness,
            labeled,
        })
    }

    pub fn strictness(&self) -> MatchStrictness {
        self.strictness
    }

    fn has_label(&self, clean: &str) -> bool {
        self.labeled.is_match(clean)
    }

    /// Whether `text` answers this matcher's identifier.
    pub fn is_anchor(&self, text: &str) -> bool {
        let clean = strip_markup(text);
        match self.strictness {
            MatchStrictness::Strict => self.has_label(&clean) && has_banner(&clean),
            MatchStrictness::Labeled => self.has_label(&clean),
            MatchStrictness::Loose => self.has_label(&clean) || clean.contains(&self.id_number),
        }
    }

    /// Whether `text` labels a different identifier and not ours.
    pub fn is_foreign(&self, text: &str) -> bool {
        let clean = strip_markup(text);
        if self.has_label(&clean) {
            return false;
        }
        ANY_LABELED_ID
            .captures_iter(&clean)
            .any(|caps| caps.get(1).is_some_and(|m| m.as_str() != self.id_number))
    }
}

/// Whether the text carries one of the responder's banner markers.
pub fn has_banner(text: &str) -> bool {
    defaults::BANNER_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// Seconds the responder asked us to wait, if `text` is a busy notice.
pub fn is_throttle_notice(text: &str) -> Option<u64> {
    let lower = text.to_lowercase();
    if !(lower.contains("espera") && lower.contains("segundos")) {
        return None;
    }
    THROTTLE_SECONDS
        .captures(&lower)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "12345678";

    #[test]
    fn test_labeled_anchor_matches() {
        let m = AnchorMatcher::new(ID, MatchStrictness::Labeled).unwrap();
        assert!(m.is_anchor("DNI ➾ 12345678\nNOMBRES ➾ JUAN"));
        assert!(m.is_anchor("**DNI** : 12345678 - 5"));
        assert!(m.is_anchor("DNI=12345678"));
    }

    #[test]
    fn test_labeled_anchor_is_digit_bounded() {
        let m = AnchorMatcher::new(ID, MatchStrictness::Labeled).unwrap();
        assert!(!m.is_anchor("DNI ➾ 123456789"));
        assert!(!m.is_anchor("DNI ➾ 912345678"));
        assert!(!m.is_anchor("DNI ➾ 87654321"));
    }

    #[test]
    fn test_bare_number_only_matches_loose() {
        let text = "Resultado 12345678 procesado";
        assert!(!AnchorMatcher::new(ID, MatchStrictness::Labeled).unwrap().is_anchor(text));
        assert!(!AnchorMatcher::new(ID, MatchStrictness::Strict).unwrap().is_anchor(text));
        assert!(AnchorMatcher::new(ID, MatchStrictness::Loose).unwrap().is_anchor(text));
    }

    #[test]
    fn test_strict_requires_banner() {
        let m = AnchorMatcher::new(ID, MatchStrictness::Strict).unwrap();
        assert!(!m.is_anchor("DNI ➾ 12345678"));
        assert!(m.is_anchor("[#OLIMPO_BOT] RENIEC ONLINE\nDNI ➾ 12345678"));
        assert!(m.is_anchor("**[#OLIMPO_BOT]**\nDNI ➾ 12345678"));
    }

    #[test]
    fn test_foreign_detection() {
        let m = AnchorMatcher::new(ID, MatchStrictness::Labeled).unwrap();
        assert!(m.is_foreign("DNI ➾ 87654321"));
        assert!(!m.is_foreign("DNI ➾ 12345678"));
        assert!(!m.is_foreign("just a photo"));
        assert!(!m.is_foreign(""));
    }

    #[test]
    fn test_strictness_parsing() {
        assert_eq!("STRICT".parse::<MatchStrictness>().unwrap(), MatchStrictness::Strict);
        assert_eq!(" labeled ".parse::<MatchStrictness>().unwrap(), MatchStrictness::Labeled);
        assert_eq!("loose".parse::<MatchStrictness>().unwrap(), MatchStrictness::Loose);
        assert!("fuzzy".parse::<MatchStrictness>().is_err());
        assert_eq!(MatchStrictness::default(), MatchStrictness::Labeled);
    }

    #[test]
    fn test_throttle_notice() {
        assert_eq!(is_throttle_notice("Por favor espera 10 segundos"), Some(10));
        assert_eq!(is_throttle_notice("ESPERA 3 SEGUNDOS antes de consultar"), Some(3));
        assert_eq!(is_throttle_notice("espera un momento"), None);
        assert_eq!(is_throttle_notice("DNI ➾ 12345678"), None);
    }
}
