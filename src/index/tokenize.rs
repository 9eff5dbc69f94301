//! Text normalization shared by queries and market questions.

use std::collections::BTreeSet;

use crate::types::Outcome;

/// Filler words that carry no market identity.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "an", "and", "any", "are", "as", "at", "be", "before", "bet",
    "by", "can", "do", "does", "for", "from", "get", "give", "has", "have", "i", "if", "in", "into",
    "is", "it", "its", "market", "me", "my", "of", "on", "or", "order", "place", "please", "price",
    "put", "share", "shares", "should", "so", "some", "than", "that", "the", "this", "to", "want",
    "was", "what", "when", "which", "who", "will", "with", "would",
];

/// Trade verbs. Stripped from queries; the side travels separately.
const TRADE_WORDS: &[&str] = &["buy", "sell", "long", "short"];

/// Words that mark the preceding number as a currency or share amount.
const AMOUNT_UNITS: &[&str] = &["usd", "usdc", "dollar", "dollars", "bucks", "cents", "c", "shares", "share"];

/// A normalized trade instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTerms {
    pub terms: BTreeSet<String>,
    /// Outcome named in the text, if exactly one of YES/NO appears.
    pub outcome: Option<Outcome>,
}

impl QueryTerms {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Lowercases, strips currency amounts, price literals, trade verbs, outcome
/// words and stopwords. Plain integers like years survive.
pub fn normalize_query(text: &str) -> QueryTerms {
    let lowered = text.to_lowercase();
    let raw: Vec<&str> = lowered.split_whitespace().collect();

    let mut terms = BTreeSet::new();
    let mut outcomes = BTreeSet::new();
    let mut skip_next = false;

    for (i, word) in raw.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '$' && c != '.' && c != '¢');
        if word.is_empty() || is_amount_literal(word) {
            continue;
        }
        if is_plain_number(word) {
            let next_is_unit = raw
                .get(i + 1)
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
                .is_some_and(|w| AMOUNT_UNITS.contains(&w));
            if next_is_unit {
                skip_next = true;
                continue;
            }
        }

        for piece in word.split(|c: char| !c.is_alphanumeric()).filter(|p| !p.is_empty()) {
            if let Some(outcome) = Outcome::from_word(piece) {
                if piece.len() > 1 {
                    outcomes.insert(outcome);
                }
                continue;
            }
            if TRADE_WORDS.contains(&piece) || STOPWORDS.contains(&piece) {
                continue;
            }
            terms.insert(piece.to_string());
        }
    }

    let outcome = if outcomes.len() == 1 {
        outcomes.into_iter().next()
    } else {
        None
    };

    QueryTerms { terms, outcome }
}

/// Words of a market question, lowercased, without stopwords.
pub fn question_words(question: &str) -> BTreeSet<String> {
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Canonical form used to detect duplicate questions.
pub fn normalized_question(question: &str) -> String {
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `$50`, `50$`, `50usdc`, `0.65`, `65c`, `65¢`, `@0.65`.
fn is_amount_literal(word: &str) -> bool {
    if let Some(rest) = word.strip_prefix('$').or_else(|| word.strip_suffix('$')) {
        return !rest.is_empty() && is_plain_number(rest.trim_end_matches(['k', 'm']));
    }
    for unit in ["usdc", "usd", "¢", "c"] {
        if let Some(num) = word.strip_suffix(unit) {
            if !num.is_empty() && is_plain_number(num) {
                return true;
            }
        }
    }
    // Decimal and comma-grouped literals are prices or sizes, never market identity.
    (word.contains('.') || word.contains(',')) && is_plain_number(word)
}

fn is_plain_number(word: &str) -> bool {
    !word.is_empty()
        && word.chars().any(|c| c.is_ascii_digit())
        && word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
}
