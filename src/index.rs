//! # Blocking Index
//!
//! Inverted index from normalized property tokens to the entities holding
//! them. Only entities that share at least one token become candidate pairs,
//! which keeps candidate generation far below all-pairs comparison.
//!
//! Tokenization runs in parallel over entities; each worker fills its own
//! bucket map and the maps are merged afterwards.

use crate::config::{DEFAULT_INDEX_MIN_SCORE, DEFAULT_MAX_BUCKET_SIZE};
use crate::entity::Entity;
use crate::schema::PropertyType;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// What a token was derived from. Each kind carries its own base weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    /// Full normalized name.
    Name,
    /// One word of a name.
    Word,
    Identifier,
    Date,
    /// Year part of a date.
    Year,
    Country,
    Email,
    Phone,
    /// Character trigram of a full name (fuzzy only).
    Trigram,
    /// Soundex key of a full name (fuzzy only).
    Phonetic,
}

impl TokenKind {
    pub fn weight(self) -> f64 {
        match self {
            TokenKind::Identifier => 4.0,
            TokenKind::Email | TokenKind::Phone => 3.0,
            TokenKind::Name | TokenKind::Date => 2.0,
            TokenKind::Word | TokenKind::Phonetic => 1.0,
            TokenKind::Year => 0.5,
            TokenKind::Trigram => 0.3,
            TokenKind::Country => 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.value)
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// American Soundex over the ASCII letters of `text`.
pub fn soundex(text: &str) -> Option<String> {
    fn code(c: char) -> Option<char> {
        match c {
            'b' | 'f' | 'p' | 'v' => Some('1'),
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
            'd' | 't' => Some('3'),
            'l' => Some('4'),
            'm' | 'n' => Some('5'),
            'r' => Some('6'),
            _ => None,
        }
    }

    let mut letters = text
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase());
    let first = letters.next()?;
    let mut key = String::with_capacity(4);
    key.push(first.to_ascii_uppercase());
    let mut last = code(first);
    for c in letters {
        let current = code(c);
        if current.is_some() && current != last {
            if let Some(digit) = current {
                key.push(digit);
            }
            if key.len() == 4 {
                break;
            }
        }
        // h and w do not separate equal codes
        if c != 'h' && c != 'w' {
            last = current;
        }
    }
    while key.len() < 4 {
        key.push('0');
    }
    Some(key)
}

fn trigrams(name: &str) -> impl Iterator<Item = String> + '_ {
    let chars: Vec<char> = name.chars().collect();
    let count = chars.len().saturating_sub(2);
    (0..count).map(move |i| chars[i..i + 3].iter().collect())
}

/// Index tokens for one entity, deduplicated and sorted.
pub fn tokenize(entity: &Entity, fuzzy: bool) -> Vec<Token> {
    let mut tokens: FxHashSet<Token> = FxHashSet::default();
    for (prop, values) in entity.properties() {
        let Some(property) = entity.schema().property(prop) else {
            continue;
        };
        for value in values {
            match property.kind {
                PropertyType::Name => {
                    let name = normalize_text(value);
                    if name.is_empty() {
                        continue;
                    }
                    for word in name.split(' ').filter(|word| word.chars().count() > 1) {
                        tokens.insert(Token::new(TokenKind::Word, word));
                    }
                    if fuzzy {
                        tokens.extend(trigrams(&name).map(|tri| Token::new(TokenKind::Trigram, tri)));
                        if let Some(key) = soundex(&name) {
                            tokens.insert(Token::new(TokenKind::Phonetic, key));
                        }
                    }
                    tokens.insert(Token::new(TokenKind::Name, name));
                }
                PropertyType::Identifier => {
                    let id: String = value.chars().filter(|c| c.is_alphanumeric()).collect();
                    if !id.is_empty() {
                        tokens.insert(Token::new(TokenKind::Identifier, id.to_uppercase()));
                    }
                }
                PropertyType::Date => {
                    if let Some(year) = value.get(..4) {
                        tokens.insert(Token::new(TokenKind::Year, year));
                    }
                    tokens.insert(Token::new(TokenKind::Date, value.as_str()));
                }
                PropertyType::Country => {
                    tokens.insert(Token::new(TokenKind::Country, value.as_str()));
                }
                PropertyType::Email => {
                    tokens.insert(Token::new(TokenKind::Email, value.to_lowercase()));
                }
                PropertyType::Phone => {
                    tokens.insert(Token::new(TokenKind::Phone, value.as_str()));
                }
                PropertyType::Text | PropertyType::Url | PropertyType::Entity => {}
            }
        }
    }
    let mut tokens: Vec<Token> = tokens.into_iter().collect();
    tokens.sort();
    tokens
}

/// Weighting and scoring of shared tokens.
///
/// Implementations must be monotonic: a larger shared weight never yields a
/// lower score.
pub trait PairScorer: Send + Sync {
    /// Weight of one shared token whose bucket holds `df` entities (`df >= 2`).
    fn token_weight(&self, kind: TokenKind, df: usize) -> f64;

    /// Map the summed weight of all shared tokens to a score.
    fn score(&self, shared_weight: f64) -> f64;
}

/// Kind weight damped by bucket size; `1 - exp(-w)` saturates toward 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScorer;

impl PairScorer for DefaultScorer {
    fn token_weight(&self, kind: TokenKind, df: usize) -> f64 {
        let spread = df.saturating_sub(1).max(1) as f64;
        kind.weight() / spread.sqrt()
    }

    fn score(&self, shared_weight: f64) -> f64 {
        1.0 - (-shared_weight.max(0.0)).exp()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Add trigram and phonetic tokens for near matches.
    pub fuzzy: bool,
    /// Buckets holding more entities than this are skipped.
    pub max_bucket_size: usize,
    /// Pairs scoring below this are not emitted.
    pub min_score: f64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            fuzzy: false,
            max_bucket_size: DEFAULT_MAX_BUCKET_SIZE,
            min_score: DEFAULT_INDEX_MIN_SCORE,
        }
    }
}

/// A scored pair of entity IDs, `left < right`.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePair {
    pub left: String,
    pub right: String,
    pub score: f64,
}

type Buckets = FxHashMap<Token, Vec<u32>>;

pub struct BlockingIndex {
    ids: Vec<String>,
    buckets: Buckets,
    options: IndexOptions,
    scorer: Box<dyn PairScorer>,
}

impl fmt::Debug for BlockingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingIndex")
            .field("entities", &self.ids.len())
            .field("tokens", &self.buckets.len())
            .field("options", &self.options)
            .finish()
    }
}

impl BlockingIndex {
    pub fn build(entities: &[Arc<Entity>], options: IndexOptions) -> Self {
        let fuzzy = options.fuzzy;
        let mut buckets = entities
            .par_iter()
            .enumerate()
            .fold(Buckets::default, |mut acc, (pos, entity)| {
                for token in tokenize(entity, fuzzy) {
                    acc.entry(token).or_default().push(pos as u32);
                }
                acc
            })
            .reduce(Buckets::default, merge_buckets);
        buckets.par_iter_mut().for_each(|(_, postings)| {
            postings.sort_unstable();
            postings.dedup();
        });

        let ids = entities.iter().map(|entity| entity.id.clone()).collect();
        info!(
            entities = entities.len(),
            tokens = buckets.len(),
            fuzzy,
            "Built blocking index"
        );
        Self {
            ids,
            buckets,
            options,
            scorer: Box::new(DefaultScorer),
        }
    }

    pub fn with_scorer(mut self, scorer: impl PairScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Number of indexed entities.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.buckets.len()
    }

    /// IDs of the entities holding `token`.
    pub fn lookup(&self, token: &Token) -> Vec<&str> {
        self.buckets
            .get(token)
            .map(|postings| {
                postings
                    .iter()
                    .map(|&pos| self.ids[pos as usize].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Candidate pairs by descending score, each unordered pair once.
    pub fn pairs(&self) -> impl Iterator<Item = CandidatePair> + '_ {
        let mut shared: FxHashMap<(u32, u32), f64> = FxHashMap::default();
        let mut skipped = 0usize;
        for (token, postings) in &self.buckets {
            if postings.len() < 2 {
                continue;
            }
            if postings.len() > self.options.max_bucket_size {
                debug!(token = %token, size = postings.len(), "Skipping oversized bucket");
                skipped += 1;
                continue;
            }
            let weight = self.scorer.token_weight(token.kind, postings.len());
            for (i, &left) in postings.iter().enumerate() {
                for &right in &postings[i + 1..] {
                    *shared.entry(self.ordered(left, right)).or_default() += weight;
                }
            }
        }
        if skipped > 0 {
            info!(skipped, max_bucket_size = self.options.max_bucket_size, "Skipped oversized buckets");
        }

        let mut pairs: Vec<CandidatePair> = shared
            .into_iter()
            .map(|((left, right), weight)| CandidatePair {
                left: self.ids[left as usize].clone(),
                right: self.ids[right as usize].clone(),
                score: self.scorer.score(weight),
            })
            .filter(|pair| pair.left != pair.right && pair.score >= self.options.min_score)
            .collect();
        pairs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.left.cmp(&b.left))
                .then_with(|| a.right.cmp(&b.right))
        });
        pairs.into_iter()
    }

    /// Positions ordered by entity ID, so `left < right` in every pair.
    fn ordered(&self, a: u32, b: u32) -> (u32, u32) {
        if self.ids[a as usize] <= self.ids[b as usize] {
            (a, b)
        } else {
            (b, a)
        }
    }
}

fn merge_buckets(mut left: Buckets, mut right: Buckets) -> Buckets {
    if left.len() < right.len() {
        std::mem::swap(&mut left, &mut right);
    }
    for (token, postings) in right {
        left.entry(token).or_default().extend(postings);
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{entity, sample_entities};

    fn options(fuzzy: bool) -> IndexOptions {
        IndexOptions {
            fuzzy,
            max_bucket_size: 100,
            min_score: 0.0,
        }
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Jane-DOE,  Jr. "), "jane doe jr");
        assert_eq!(normalize_text("Ångström"), "ångström");
        assert_eq!(normalize_text("--"), "");
    }

    #[test]
    fn test_soundex() {
        assert_eq!(soundex("Robert").as_deref(), Some("R163"));
        assert_eq!(soundex("Rupert").as_deref(), Some("R163"));
        assert_eq!(soundex("Ashcraft").as_deref(), Some("A261"));
        assert_eq!(soundex("Tymczak").as_deref(), Some("T522"));
        assert_eq!(soundex("Lee").as_deref(), Some("L000"));
        assert_eq!(soundex("123"), None);
    }

    #[test]
    fn test_tokenize_fuzzy_adds_tokens() {
        let jane = entity("e1", "Person", &[("name", "Jane Doe"), ("birthDate", "1967-12-21")]);
        let exact = tokenize(&jane, false);
        let fuzzy = tokenize(&jane, true);
        assert!(exact.contains(&Token::new(TokenKind::Name, "jane doe")));
        assert!(exact.contains(&Token::new(TokenKind::Word, "doe")));
        assert!(exact.contains(&Token::new(TokenKind::Year, "1967")));
        assert!(!exact.iter().any(|t| t.kind == TokenKind::Trigram));
        assert!(fuzzy.contains(&Token::new(TokenKind::Trigram, "jan")));
        assert!(fuzzy.iter().any(|t| t.kind == TokenKind::Phonetic));
        assert!(fuzzy.len() > exact.len());
    }

    #[test]
    fn test_sample_pairs() {
        let entities = sample_entities();
        let index = BlockingIndex::build(&entities, options(true));
        let pairs: Vec<CandidatePair> = index.pairs().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].left.as_str(), pairs[0].right.as_str()), ("e1", "e2"));
        assert!(pairs[0].score > 0.99 && pairs[0].score < 1.0);
        assert_eq!(index.lookup(&Token::new(TokenKind::Word, "smith")), vec!["e3"]);
    }

    #[test]
    fn test_fuzzy_catches_spelling_variants() {
        let entities = vec![
            Arc::new(entity("a", "Person", &[("name", "Jon Smyth")])),
            Arc::new(entity("b", "Person", &[("name", "John Smith")])),
        ];
        assert_eq!(BlockingIndex::build(&entities, options(false)).pairs().count(), 0);

        // shared: Soundex J525 and the trigrams "n s" and " sm"
        let index = BlockingIndex::build(&entities, options(true));
        let pairs: Vec<CandidatePair> = index.pairs().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].left.as_str(), pairs[0].right.as_str()), ("a", "b"));
        assert!(pairs[0].score > 0.0);
        assert_eq!(index.lookup(&Token::new(TokenKind::Phonetic, "J525")), vec!["a", "b"]);
    }

    #[test]
    fn test_score_monotonic_in_overlap() {
        let entities = vec![
            Arc::new(entity("a", "Person", &[("name", "Anna Maria Lopez"), ("nationality", "es")])),
            Arc::new(entity("b", "Person", &[("name", "Anna Maria Lopez"), ("nationality", "es")])),
            Arc::new(entity("c", "Person", &[("name", "Anna Maria Garcia"), ("nationality", "es")])),
        ];
        let index = BlockingIndex::build(&entities, options(false));
        let pairs: Vec<CandidatePair> = index.pairs().collect();
        let score = |l: &str, r: &str| {
            pairs
                .iter()
                .find(|p| p.left == l && p.right == r)
                .map(|p| p.score)
                .unwrap_or(0.0)
        };
        assert!(score("a", "b") > score("a", "c"));
        assert_eq!(score("a", "c"), score("b", "c"));
        for window in pairs.windows(2) {
            assert!(window[0].score >= window[1].score);
        }

        let scorer = DefaultScorer;
        let mut last = 0.0;
        for step in 1..20 {
            let current = scorer.score(step as f64 * 0.25);
            assert!(current > last);
            last = current;
        }
    }

    #[test]
    fn test_oversized_bucket_skipped() {
        let entities: Vec<Arc<Entity>> = (0..5)
            .map(|i| Arc::new(entity(&format!("p{}", i), "Person", &[("nationality", "de")])))
            .collect();
        let capped = IndexOptions {
            max_bucket_size: 4,
            ..options(false)
        };
        assert_eq!(BlockingIndex::build(&entities, capped).pairs().count(), 0);
        assert_eq!(BlockingIndex::build(&entities, options(false)).pairs().count(), 10);
    }

    #[test]
    fn test_min_score_and_custom_scorer() {
        struct Flat;
        impl PairScorer for Flat {
            fn token_weight(&self, _kind: TokenKind, _df: usize) -> f64 {
                1.0
            }
            fn score(&self, shared_weight: f64) -> f64 {
                shared_weight / 10.0
            }
        }

        let entities = vec![
            Arc::new(entity("x", "Person", &[("name", "Li Wei"), ("nationality", "cn")])),
            Arc::new(entity("y", "Person", &[("name", "Li Wei"), ("nationality", "cn")])),
        ];
        let strict = IndexOptions {
            min_score: 0.5,
            ..options(false)
        };
        // name, "li", "wei", country: four shared tokens
        let index = BlockingIndex::build(&entities, strict.clone()).with_scorer(Flat);
        assert_eq!(index.pairs().count(), 0);
        let index = BlockingIndex::build(&entities, options(false)).with_scorer(Flat);
        let pair = index.pairs().next().unwrap();
        assert!((pair.score - 0.4).abs() < 1e-9);
    }
}
