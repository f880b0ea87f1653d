// Trigger change-type decoding
//
// Dataverse triggers describe what they fire on either as a bitmask
// (1 = added, 2 = modified, 4 = deleted) or as free text.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

/// Which record changes a trigger fires on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChangeType {
    pub added: bool,
    pub modified: bool,
    pub deleted: bool,
}

impl ChangeType {
    /// Matched kinds joined by " or ", or "Unknown"
    pub fn label(&self) -> String {
        let parts: Vec<&str> = [
            (self.added, "Added"),
            (self.modified, "Modified"),
            (self.deleted, "Deleted"),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, label)| *label)
        .collect();

        if parts.is_empty() {
            "Unknown".to_string()
        } else {
            parts.join(" or ")
        }
    }

    fn from_mask(mask: i64) -> Self {
        Self {
            added: mask & 1 == 1,
            modified: mask & 2 == 2,
            deleted: mask & 4 == 4,
        }
    }

    fn from_text(text: &str) -> Self {
        let text = text.to_lowercase();
        Self {
            added: patterns().added.is_match(&text),
            modified: patterns().modified.is_match(&text),
            deleted: patterns().deleted.is_match(&text),
        }
    }
}

struct Patterns {
    added: Regex,
    modified: Regex,
    deleted: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        added: Regex::new(r"\b(add|create)(ed|s|d)?\b").expect("valid added pattern"),
        modified: Regex::new(r"\b(modif(y|ied|ies)|updat(e|ed|es))\b")
            .expect("valid modified pattern"),
        deleted: Regex::new(r"\bdelet(e|ed|es)\b").expect("valid deleted pattern"),
    })
}

/// Decode a trigger message. Total: any input yields a value.
pub fn decode_change_type(message: Option<&Value>) -> ChangeType {
    match message {
        Some(Value::Number(n)) => {
            let mask = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0);
            ChangeType::from_mask(mask)
        }
        Some(Value::String(s)) => ChangeType::from_text(s),
        Some(Value::Null) | None => ChangeType::default(),
        Some(other) => ChangeType::from_text(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bitmask_decoding() {
        let decoded = decode_change_type(Some(&json!(5)));
        assert_eq!(
            decoded,
            ChangeType {
                added: true,
                modified: false,
                deleted: true
            }
        );
        assert_eq!(decoded.label(), "Added or Deleted");
        assert_eq!(decode_change_type(Some(&json!(3))).label(), "Added or Modified");
        assert_eq!(decode_change_type(Some(&json!(7))).label(), "Added or Modified or Deleted");
        assert_eq!(decode_change_type(Some(&json!(0))).label(), "Unknown");
    }

    #[test]
    fn test_text_decoding() {
        let updated = decode_change_type(Some(&json!("Record was Updated")));
        assert!(updated.modified);
        assert!(!updated.added);
        assert!(!updated.deleted);
        assert_eq!(updated.label(), "Modified");

        assert_eq!(decode_change_type(Some(&json!("Create"))).label(), "Added");
        assert_eq!(decode_change_type(Some(&json!("Added"))).label(), "Added");
        assert_eq!(decode_change_type(Some(&json!("Modified"))).label(), "Modified");
        assert_eq!(
            decode_change_type(Some(&json!("Create or Delete"))).label(),
            "Added or Deleted"
        );
    }

    #[test]
    fn test_unrecognized_input_is_unknown() {
        for value in [json!("Assign"), json!(null), json!(true), json!({"a": 1}), json!("address"), json!("3")] {
            let decoded = decode_change_type(Some(&value));
            assert_eq!(decoded, ChangeType::default());
            assert_eq!(decoded.label(), "Unknown");
        }
        assert_eq!(decode_change_type(None).label(), "Unknown");
    }
}
