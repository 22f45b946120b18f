//! Thought Keeper: the Proof of Thought engine
//!
//! Engagement text → QualityClassifier → BondingCurve → EngagementLedger →
//! ThoughtChain, driven either by human submissions or by the Keeper's
//! fifteen-minute Pantheon rotation.

pub mod config;
pub mod core;
pub mod error;
pub mod store;
pub mod types;

// =============================================================================
// TIER BANDS - combined score needed to clear each band
// =============================================================================

/// Combined score for RESONANCE (genuine engagement)
pub const TIER_THRESHOLD_RESONANCE: f64 = 0.35;

/// Combined score for CLARITY (sustained depth)
pub const TIER_THRESHOLD_CLARITY: f64 = 0.55;

/// Combined score for BREAKTHROUGH (novel insight)
pub const TIER_THRESHOLD_BREAKTHROUGH: f64 = 0.75;

// =============================================================================
// QUALITY WEIGHTS - combined = depth·0.50 + novelty·0.35 + kindness·0.15
// =============================================================================

pub const QUALITY_WEIGHT_DEPTH: f64 = 0.50;
pub const QUALITY_WEIGHT_NOVELTY: f64 = 0.35;
pub const QUALITY_WEIGHT_KINDNESS: f64 = 0.15;

/// Depth signal weights (sum = 1.0)
pub const DEPTH_WEIGHT_LENGTH: f64 = 0.30;
pub const DEPTH_WEIGHT_REASONING: f64 = 0.30;
pub const DEPTH_WEIGHT_INQUIRY: f64 = 0.15;
pub const DEPTH_WEIGHT_VOCABULARY: f64 = 0.15;
pub const DEPTH_WEIGHT_STRUCTURE: f64 = 0.10;

/// Word count at which the length signal saturates
pub const DEPTH_LENGTH_SATURATION: f64 = 60.0;

/// Marker hits at which the reasoning / inquiry / kindness signals saturate
pub const REASONING_SATURATION: f64 = 3.0;
pub const INQUIRY_SATURATION: f64 = 2.0;
pub const KINDNESS_SATURATION: f64 = 2.0;

/// Sentences beyond the first at which structure saturates
pub const STRUCTURE_SATURATION: f64 = 3.0;

/// Distinct content words at which novelty stops being discounted for brevity
pub const NOVELTY_CONTENT_SATURATION: f64 = 10.0;

// =============================================================================
// SPAM INDICATORS - any hit forces NOISE
// =============================================================================

/// Fewer words than this is not participation
pub const MIN_WORDS: usize = 2;

/// Same character repeated this many times in a row
pub const REPEAT_CHAR_RUN: usize = 8;

/// Minimum words before the repeated-word check applies
pub const REPEAT_WORD_MIN_WORDS: usize = 6;

/// Share of the text taken by its most frequent word
pub const REPEAT_WORD_RATIO: f64 = 0.5;

// =============================================================================
// BONDING CURVE DEFAULTS (in whole tokens)
// =============================================================================

/// Micro-units per token; all balances are integer micro-units
pub const MICRO_PER_TOKEN: u64 = 1_000_000;

pub const DEFAULT_BASE_RATE: f64 = 1.0;
pub const DEFAULT_CURVE_FLOOR: f64 = 0.05;
pub const DEFAULT_CURVE_MIDPOINT: f64 = 1_000_000.0;
pub const DEFAULT_CURVE_STEEPNESS: f64 = 150_000.0;
pub const DEFAULT_SUPPLY_CEILING: f64 = 21_000_000.0;

// =============================================================================
// KEEPER SCHEDULE
// =============================================================================

/// One agent per slot; four slots per hour
pub const DEFAULT_SLOT_PERIOD_SECS: u64 = 900;

/// How often the timer loop wakes to check the current slot
pub const DEFAULT_WAKE_INTERVAL_SECS: u64 = 60;

/// Upper bound on a single completion call
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// COMMIT RETRIES
// =============================================================================

pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 5;
pub const DEFAULT_COMMIT_BACKOFF_MS: u64 = 10;

// =============================================================================
// HISTORY WINDOWS
// =============================================================================

/// Tiers kept in a participant's quality trend
pub const QUALITY_TREND_LEN: usize = 10;

/// Prior session turns handed to the classifier as novelty context
pub const SESSION_CONTEXT_TURNS: usize = 10;

/// Dialogue blocks summarized by a memorial
pub const MEMORIAL_BLOCKS: usize = 20;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "0.3.0";
