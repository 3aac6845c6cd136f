//! Weighted lexical matching over service fields.
//!
//! Used when semantic search is unavailable or finds nothing. Each field
//! carries a fixed weight ordered by specificity:
//!
//! | Field | Weight |
//! |-------|--------|
//! | `label` | 1.0 |
//! | `identifier` | 0.95 |
//! | `title` | 0.9 |
//! | `use-for` | 0.8 |
//! | `description` | 0.7 |
//! | `code` | 0.6 |
//! | `entities` | 0.5 |
//!
//! Matching is case-insensitive and treats `_` as a space. A field scores
//! its full weight when it contains the whole query, `0.9 ×` weight when a
//! multi-word query has every word present, and `0.85 ×` weight when at
//! least one word is present. A record's score is its best field.

use crate::models::ServiceRecord;

pub const FIELD_WEIGHTS: [(&str, f64); 7] = [
    ("label", 1.0),
    ("identifier", 0.95),
    ("title", 0.9),
    ("use-for", 0.8),
    ("description", 0.7),
    ("code", 0.6),
    ("entities", 0.5),
];

const ALL_WORDS_FACTOR: f64 = 0.9;
const ANY_WORD_FACTOR: f64 = 0.85;

/// Best-scoring field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalMatch {
    pub score: f64,
    pub field: &'static str,
}

impl LexicalMatch {
    pub fn reason(&self) -> String {
        format!("lexical match on {}", self.field)
    }
}

/// A normalized query.
#[derive(Debug, Clone)]
pub struct LexicalQuery {
    phrase: String,
    words: Vec<String>,
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace('_', " ")
}

impl LexicalQuery {
    pub fn new(query: &str) -> Self {
        let phrase = normalize(query)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let words = phrase.split(' ').filter(|w| !w.is_empty()).map(String::from).collect();
        Self { phrase, words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Score one field's text against this query.
    pub fn score_text(&self, text: &str, weight: f64) -> f64 {
        if self.is_empty() || text.is_empty() {
            return 0.0;
        }
        let text = normalize(text);
        if text.contains(&self.phrase) {
            weight
        } else if self.words.len() > 1 && self.words.iter().all(|w| text.contains(w.as_str())) {
            ALL_WORDS_FACTOR * weight
        } else if self.words.iter().any(|w| text.contains(w.as_str())) {
            ANY_WORD_FACTOR * weight
        } else {
            0.0
        }
    }

    /// Best field of `record`. `entity_names` supplements the hint's key
    /// entities with names from a cached schema. `None` when nothing matches.
    pub fn score_record(&self, record: &ServiceRecord, entity_names: &[String]) -> Option<LexicalMatch> {
        let hint = record.hint.as_ref();
        let mut entities: Vec<&str> = hint
            .map(|h| h.key_entities.iter().map(String::as_str).collect())
            .unwrap_or_default();
        entities.extend(entity_names.iter().map(String::as_str));
        let entities = entities.join(" ");

        let fields: [&str; 7] = [
            hint.and_then(|h| h.label.as_deref()).unwrap_or(""),
            record.id(),
            &record.entry.title,
            hint.and_then(|h| h.use_for.as_deref()).unwrap_or(""),
            record.rich_description(),
            hint.and_then(|h| h.transaction_code.as_deref()).unwrap_or(""),
            &entities,
        ];

        let mut best: Option<LexicalMatch> = None;
        for ((field, weight), text) in FIELD_WEIGHTS.iter().zip(fields.iter()) {
            let score = self.score_text(text, *weight);
            if score > best.as_ref().map(|b| b.score).unwrap_or(0.0) {
                best = Some(LexicalMatch { score, field: *field });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogEntry, Classification, ServiceHint};

    fn record(id: &str, title: &str, description: &str, hint: Option<ServiceHint>) -> ServiceRecord {
        ServiceRecord {
            entry: CatalogEntry {
                id: id.to_string(),
                title: title.to_string(),
                description: description.to_string(),
                service_url: String::new(),
                metadata_url: String::new(),
                technical_name: None,
                version: None,
            },
            classification: Classification::unclassified(),
            hint,
        }
    }

    #[test]
    fn test_match_levels() {
        let q = LexicalQuery::new("customer items");
        assert_eq!(q.score_text("Customer Items overview", 1.0), 1.0);
        assert!((q.score_text("items of a customer", 1.0) - 0.9).abs() < 1e-9);
        assert!((q.score_text("customer master", 1.0) - 0.85).abs() < 1e-9);
        assert_eq!(q.score_text("supplier", 1.0), 0.0);
    }

    #[test]
    fn test_single_word_full_match() {
        let q = LexicalQuery::new("Customer");
        assert_eq!(q.score_text("customer master", 0.7), 0.7);
    }

    #[test]
    fn test_identifier_underscores_match_spaces() {
        let q = LexicalQuery::new("line items");
        let r = record("ZFAR_CUSTOMER_LINE_ITEMS_0001", "Receivables", "", None);
        let m = q.score_record(&r, &[]).unwrap();
        assert_eq!(m.field, "identifier");
        assert!((m.score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_label_outranks_title() {
        let q = LexicalQuery::new("customer");
        let hint = ServiceHint {
            label: Some("Customer Items".to_string()),
            ..Default::default()
        };
        let r = record("Z1", "Customer Items", "", Some(hint));
        let m = q.score_record(&r, &[]).unwrap();
        assert_eq!(m.field, "label");
        assert_eq!(m.reason(), "lexical match on label");
    }

    #[test]
    fn test_entities_field_uses_cached_names() {
        let q = LexicalQuery::new("email");
        let r = record("Z1", "Partners", "business partners", None);
        assert!(q.score_record(&r, &[]).is_none());
        let m = q.score_record(&r, &["EmailAddress".to_string()]).unwrap();
        assert_eq!(m.field, "entities");
    }
}
