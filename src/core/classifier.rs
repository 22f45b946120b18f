//! Quality Classifier: maps engagement text to a tier
//!
//! Three scores, each in [0,1]:
//! - depth: length, reasoning markers, inquiry, vocabulary, sentence structure
//! - novelty: share of content words not already present in the context turns
//! - kindness: density of appreciative and caring vocabulary
//!
//! combined = 0.50·depth + 0.35·novelty + 0.15·kindness, and the tier is the
//! highest band the combined score clears. A hostility/spam hit forces NOISE
//! regardless of the scores.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{QualityScore, QualitySignals, ReasonCode, Tier};
use crate::{
    DEPTH_LENGTH_SATURATION, DEPTH_WEIGHT_INQUIRY, DEPTH_WEIGHT_LENGTH, DEPTH_WEIGHT_REASONING,
    DEPTH_WEIGHT_STRUCTURE, DEPTH_WEIGHT_VOCABULARY, INQUIRY_SATURATION, KINDNESS_SATURATION,
    MIN_WORDS, NOVELTY_CONTENT_SATURATION, QUALITY_WEIGHT_DEPTH, QUALITY_WEIGHT_KINDNESS,
    QUALITY_WEIGHT_NOVELTY, REASONING_SATURATION, REPEAT_CHAR_RUN, REPEAT_WORD_MIN_WORDS,
    REPEAT_WORD_RATIO, STRUCTURE_SATURATION, TIER_THRESHOLD_BREAKTHROUGH, TIER_THRESHOLD_CLARITY,
    TIER_THRESHOLD_RESONANCE,
};

/// Mean word length that scores 0 on vocabulary
const VOCABULARY_BASELINE: f64 = 3.0;
/// Extra mean word length needed to saturate vocabulary
const VOCABULARY_SPAN: f64 = 4.0;
/// Words a segment needs to count as a sentence
const SENTENCE_MIN_WORDS: usize = 3;
/// Minimum length of a content word
const CONTENT_WORD_MIN_LEN: usize = 4;

lazy_static! {
    // =========================================================================
    // Reasoning: causal and contrastive connectives
    // =========================================================================
    static ref RE_REASONING: Regex = Regex::new(
        r"(?i)\b(because|therefore|however|although|though|thus|hence|whereas|consequently|which means|implies|suggests|so that|on the other hand|in contrast|for example|for instance|unless|otherwise)\b"
    ).unwrap();

    // =========================================================================
    // Inquiry: open questions (question marks are counted separately)
    // =========================================================================
    static ref RE_INQUIRY: Regex = Regex::new(
        r"(?i)\b(why|how|what if|wonder|wondering|curious|perhaps|maybe)\b"
    ).unwrap();

    // =========================================================================
    // Kindness: appreciation and care
    // =========================================================================
    static ref RE_KINDNESS: Regex = Regex::new(
        r"(?i)\b(thank|thanks|thank you|grateful|gratitude|appreciate|appreciated|kind|kindness|care|caring|compassion|gentle|gently|support|together|welcome|listen|listening|love|hope)\b"
    ).unwrap();

    // =========================================================================
    // Hostility: any hit forces NOISE
    // =========================================================================
    static ref RE_HOSTILE: Regex = Regex::new(
        r"(?i)\b(idiot|idiots|stupid|moron|morons|shut up|hate you|kill yourself|kys|worthless|loser|losers|pathetic|scum|garbage person)\b"
    ).unwrap();

    static ref RE_SENTENCE_BREAK: Regex = Regex::new(r"[.!?]+").unwrap();

    static ref STOP_WORDS: HashSet<&'static str> = [
        "about", "above", "after", "again", "also", "been", "before", "being", "both",
        "could", "does", "doing", "down", "each", "from", "further", "have", "having",
        "here", "into", "just", "more", "most", "much", "only", "other", "over", "same",
        "should", "some", "such", "than", "that", "their", "them", "then", "there",
        "these", "they", "this", "those", "through", "under", "until", "very", "were",
        "what", "when", "where", "which", "while", "will", "with", "would", "your",
        "yours", "really", "thing", "things", "like", "because", "however",
    ]
    .into_iter()
    .collect();
}

/// Deterministic, pure text scorer
#[derive(Debug, Default)]
pub struct QualityClassifier;

impl QualityClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Score one turn against the prior turns of its session
    pub fn score(&self, text: &str, context: &[String]) -> QualityScore {
        let text = text.trim();
        if text.is_empty() {
            return QualityScore::noise(ReasonCode::R101_EMPTY_INPUT, 0);
        }

        let word_count = text.split_whitespace().count();
        let words = normalized_words(text);

        if let Some(reason) = spam_indicator(text, &words, word_count) {
            let mut score = QualityScore::noise(reason, word_count);
            score.signals.hostile_hits = count_matches(&RE_HOSTILE, text);
            return score;
        }

        let signals = QualitySignals {
            length: (word_count as f64 / DEPTH_LENGTH_SATURATION).min(1.0),
            reasoning: (count_matches(&RE_REASONING, text) as f64 / REASONING_SATURATION).min(1.0),
            inquiry: ((count_matches(&RE_INQUIRY, text) + text.matches('?').count()) as f64
                / INQUIRY_SATURATION)
                .min(1.0),
            vocabulary: vocabulary_signal(&words),
            structure: structure_signal(text),
            hostile_hits: 0,
        };

        let depth_score = (signals.length * DEPTH_WEIGHT_LENGTH
            + signals.reasoning * DEPTH_WEIGHT_REASONING
            + signals.inquiry * DEPTH_WEIGHT_INQUIRY
            + signals.vocabulary * DEPTH_WEIGHT_VOCABULARY
            + signals.structure * DEPTH_WEIGHT_STRUCTURE)
            .clamp(0.0, 1.0);
        let novelty_score = novelty(&words, context);
        let kindness_score =
            (count_matches(&RE_KINDNESS, text) as f64 / KINDNESS_SATURATION).min(1.0);

        let combined = (depth_score * QUALITY_WEIGHT_DEPTH
            + novelty_score * QUALITY_WEIGHT_NOVELTY
            + kindness_score * QUALITY_WEIGHT_KINDNESS)
            .clamp(0.0, 1.0);

        QualityScore {
            tier: tier_for(combined),
            depth_score,
            novelty_score,
            kindness_score,
            combined,
            hostile: false,
            word_count,
            signals,
            reason: ReasonCode::R100_SCORED,
        }
    }
}

/// Highest band cleared by a combined score. Everything that reaches here
/// has passed the spam check, so GENUINE is the baseline.
pub fn tier_for(combined: f64) -> Tier {
    if combined >= TIER_THRESHOLD_BREAKTHROUGH {
        Tier::Breakthrough
    } else if combined >= TIER_THRESHOLD_CLARITY {
        Tier::Clarity
    } else if combined >= TIER_THRESHOLD_RESONANCE {
        Tier::Resonance
    } else {
        Tier::Genuine
    }
}

fn count_matches(re: &Regex, text: &str) -> usize {
    re.find_iter(text).count()
}

/// Lowercased words with surrounding punctuation stripped
fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn is_content_word(word: &str) -> bool {
    word.chars().count() >= CONTENT_WORD_MIN_LEN && !STOP_WORDS.contains(word)
}

fn spam_indicator(text: &str, words: &[String], word_count: usize) -> Option<ReasonCode> {
    if RE_HOSTILE.is_match(text) {
        return Some(ReasonCode::R102_HOSTILE);
    }
    if word_count < MIN_WORDS {
        return Some(ReasonCode::R103_SPAM_TOO_SHORT);
    }
    if longest_char_run(text) >= REPEAT_CHAR_RUN {
        return Some(ReasonCode::R104_SPAM_REPEATED_CHARS);
    }
    if words.len() >= REPEAT_WORD_MIN_WORDS {
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for w in words {
            *freq.entry(w.as_str()).or_default() += 1;
        }
        let top = freq.values().copied().max().unwrap_or(0);
        if top as f64 / words.len() as f64 > REPEAT_WORD_RATIO {
            return Some(ReasonCode::R105_SPAM_REPEATED_WORDS);
        }
    }
    None
}

/// Longest run of one non-whitespace character
fn longest_char_run(text: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if c.is_whitespace() {
            run = 0;
            prev = None;
            continue;
        }
        if prev == Some(c) {
            run += 1;
        } else {
            run = 1;
            prev = Some(c);
        }
        longest = longest.max(run);
    }
    longest
}

fn vocabulary_signal(words: &[String]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let total: usize = words.iter().map(|w| w.chars().count()).sum();
    let mean = total as f64 / words.len() as f64;
    ((mean - VOCABULARY_BASELINE) / VOCABULARY_SPAN).clamp(0.0, 1.0)
}

fn structure_signal(text: &str) -> f64 {
    let sentences = RE_SENTENCE_BREAK
        .split(text)
        .filter(|s| s.split_whitespace().count() >= SENTENCE_MIN_WORDS)
        .count();
    if sentences <= 1 {
        return 0.0;
    }
    ((sentences - 1) as f64 / STRUCTURE_SATURATION).min(1.0)
}

/// Fresh share of distinct content words, discounted for very short turns.
/// With no context the fresh share is the turn's own lexical diversity.
fn novelty(words: &[String], context: &[String]) -> f64 {
    let content: Vec<&str> = words
        .iter()
        .map(String::as_str)
        .filter(|w| is_content_word(w))
        .collect();
    if content.is_empty() {
        return 0.0;
    }
    let distinct: HashSet<&str> = content.iter().copied().collect();

    let fresh_share = if context.is_empty() {
        distinct.len() as f64 / content.len() as f64
    } else {
        let seen: HashSet<String> = context
            .iter()
            .flat_map(|turn| normalized_words(turn))
            .filter(|w| is_content_word(w))
            .collect();
        let fresh = distinct.iter().filter(|w| !seen.contains(**w)).count();
        fresh as f64 / distinct.len() as f64
    };

    let brevity = (distinct.len() as f64 / NOVELTY_CONTENT_SATURATION).min(1.0);
    (fresh_share * brevity).clamp(0.0, 1.0)
}

// =============================================================================
// TESTS
// =============================================================================
