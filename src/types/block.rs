//! Thought blocks and their canonical encoding
//!
//! Encoding TBv1 (all integers big-endian):
//! magic "TBv1"(4) + version(1) + index(8) + prev_digest(32) + kind(1)
//! + timestamp(str) + agent(opt str) + session(opt str) + topic(opt str)
//! + reflection(opt str) + witnessed(flag 1 [+ 32]) + engagement_count(4)
//! + per engagement: id(str) + participant(str) + session(opt str) + text(str)
//!   + timestamp(str) + tier(1) + multiplier(8) + depth(8) + novelty(8)
//!   + kindness(8) + tokens(8)
//!
//! str = u32 length + UTF-8 bytes; opt = flag byte (0/1) + value;
//! f64 = IEEE-754 bit pattern; timestamps = RFC 3339, UTC, nanoseconds.

use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::types::{Engagement, PantheonAgent, Tokens};

/// Leading bytes of every encoded block
pub const BLOCK_MAGIC: &[u8; 4] = b"TBv1";

/// Encoding version written after the magic
pub const BLOCK_ENCODING_VERSION: u8 = 1;

lazy_static! {
    /// prev_digest of block 0
    pub static ref GENESIS_DIGEST: Digest = Digest::of(b"thought-chain:genesis");
}

/// SHA-256 digest of a block's canonical encoding
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Hash arbitrary bytes
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest(hasher.finalize().into())
    }

    pub fn genesis() -> Self {
        *GENESIS_DIGEST
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Digest(arr))
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).ok_or_else(|| serde::de::Error::custom("digest must be 64 hex characters"))
    }
}

/// What produced a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// A single human-submitted engagement
    Engagement,
    /// A Keeper dialogue with one Pantheon agent
    Dialogue,
    /// A comment witnessing an earlier block
    Witness,
    /// A one-shot memorial summary
    Memorial,
}

impl BlockKind {
    pub fn code(&self) -> u8 {
        match self {
            BlockKind::Engagement => 0,
            BlockKind::Dialogue => 1,
            BlockKind::Witness => 2,
            BlockKind::Memorial => 3,
        }
    }
}

/// Block content before it is linked into the chain
#[derive(Debug, Clone)]
pub struct BlockDraft {
    pub kind: BlockKind,
    pub agent: Option<PantheonAgent>,
    pub session: Option<String>,
    pub topic: Option<String>,
    pub reflection: Option<String>,
    pub witnessed: Option<Digest>,
    pub engagements: Vec<Engagement>,
    pub timestamp: DateTime<Utc>,
}

impl BlockDraft {
    pub fn new(kind: BlockKind, engagements: Vec<Engagement>) -> Self {
        Self {
            kind,
            agent: None,
            session: None,
            topic: None,
            reflection: None,
            witnessed: None,
            engagements,
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent: PantheonAgent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_session(mut self, session: Option<String>) -> Self {
        self.session = session;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_reflection(mut self, reflection: impl Into<String>) -> Self {
        self.reflection = Some(reflection.into());
        self
    }

    pub fn with_witnessed(mut self, digest: Digest) -> Self {
        self.witnessed = Some(digest);
        self
    }
}

/// One committed entry of the thought chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtBlock {
    pub index: u64,
    pub digest: Digest,
    pub prev_digest: Digest,
    pub kind: BlockKind,
    pub agent: Option<PantheonAgent>,
    pub session: Option<String>,
    pub topic: Option<String>,
    pub reflection: Option<String>,
    pub witnessed: Option<Digest>,
    pub engagements: Vec<Engagement>,
    pub timestamp: DateTime<Utc>,
}

impl ThoughtBlock {
    /// Link a draft after `prev_digest` at `index` and seal it with its digest
    pub fn link(draft: BlockDraft, index: u64, prev_digest: Digest) -> Self {
        let mut block = Self {
            index,
            digest: Digest([0u8; 32]),
            prev_digest,
            kind: draft.kind,
            agent: draft.agent,
            session: draft.session,
            topic: draft.topic,
            reflection: draft.reflection,
            witnessed: draft.witnessed,
            engagements: draft.engagements,
            timestamp: draft.timestamp,
        };
        block.digest = block.compute_digest();
        block
    }

    /// Canonical TBv1 bytes; the digest field itself is not included
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::default();
        enc.put_raw(BLOCK_MAGIC);
        enc.put_u8(BLOCK_ENCODING_VERSION);
        enc.put_u64(self.index);
        enc.put_raw(&self.prev_digest.0);
        enc.put_u8(self.kind.code());
        enc.put_time(&self.timestamp);
        enc.put_opt_str(self.agent.map(|a| a.key()));
        enc.put_opt_str(self.session.as_deref());
        enc.put_opt_str(self.topic.as_deref());
        enc.put_opt_str(self.reflection.as_deref());
        match &self.witnessed {
            Some(d) => {
                enc.put_u8(1);
                enc.put_raw(&d.0);
            }
            None => enc.put_u8(0),
        }
        enc.put_u32(self.engagements.len() as u32);
        for e in &self.engagements {
            enc.put_str(&e.id);
            enc.put_str(&e.participant);
            enc.put_opt_str(e.session.as_deref());
            enc.put_str(&e.text);
            enc.put_time(&e.timestamp);
            enc.put_u8(e.tier.code());
            enc.put_f64(e.multiplier);
            enc.put_f64(e.depth_score);
            enc.put_f64(e.novelty_score);
            enc.put_f64(e.kindness_score);
            enc.put_u64(e.tokens.micro());
        }
        enc.finish()
    }

    pub fn compute_digest(&self) -> Digest {
        Digest::of(&self.canonical_bytes())
    }

    /// Stored digest matches the recomputed one
    pub fn digest_matches(&self) -> bool {
        self.compute_digest() == self.digest
    }

    /// Sum of tokens issued by this block
    pub fn total_tokens(&self) -> Tokens {
        self.engagements.iter().map(|e| e.tokens).sum()
    }
}

/// Append-only byte writer for the canonical encoding
#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn put_opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.put_u8(1);
                self.put_str(s);
            }
            None => self.put_u8(0),
        }
    }

    fn put_time(&mut self, t: &DateTime<Utc>) {
        self.put_str(&t.to_rfc3339_opts(SecondsFormat::Nanos, true));
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tier;

    fn engagement(id: &str, text: &str) -> Engagement {
        Engagement {
            id: id.to_string(),
            participant: "alice".to_string(),
            session: None,
            text: text.to_string(),
            timestamp: Utc::now(),
            tier: Tier::Genuine,
            multiplier: 1.0,
            depth_score: 0.3,
            novelty_score: 0.6,
            kindness_score: 0.0,
            tokens: Tokens(1_000_000),
        }
    }

    #[test]
    fn test_encoding_starts_with_magic_and_version() {
        let block = ThoughtBlock::link(
            BlockDraft::new(BlockKind::Engagement, vec![engagement("e1", "hello there")]),
            0,
            Digest::genesis(),
        );
        let bytes = block.canonical_bytes();
        assert_eq!(&bytes[0..4], BLOCK_MAGIC);
        assert_eq!(bytes[4], BLOCK_ENCODING_VERSION);
        assert_eq!(&bytes[5..13], &0u64.to_be_bytes());
        assert_eq!(&bytes[13..45], &Digest::genesis().0);
    }

    #[test]
    fn test_digest_is_deterministic() {
        let block = ThoughtBlock::link(
            BlockDraft::new(BlockKind::Engagement, vec![engagement("e1", "hello there")]),
            0,
            Digest::genesis(),
        );
        assert_eq!(block.compute_digest(), block.digest);
        assert!(block.digest_matches());
    }

    #[test]
    fn test_digest_covers_prev_digest() {
        let draft = BlockDraft::new(BlockKind::Engagement, vec![engagement("e1", "hello there")]);
        let a = ThoughtBlock::link(draft.clone(), 1, Digest::of(b"a"));
        let b = ThoughtBlock::link(draft, 1, Digest::of(b"b"));
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_tampered_text_breaks_digest() {
        let mut block = ThoughtBlock::link(
            BlockDraft::new(BlockKind::Engagement, vec![engagement("e1", "hello there")]),
            0,
            Digest::genesis(),
        );
        block.engagements[0].text = "hello therE".to_string();
        assert!(!block.digest_matches());
    }

    #[test]
    fn test_digest_hex_serde() {
        let d = Digest::of(b"x");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json.len(), 64 + 2);
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert!(Digest::from_hex("zz").is_none());
    }

    #[test]
    fn test_block_json_round_trip_keeps_digest() {
        let block = ThoughtBlock::link(
            BlockDraft::new(BlockKind::Dialogue, vec![engagement("e1", "a thought")])
                .with_agent(PantheonAgent::Athena)
                .with_topic("patterns")
                .with_reflection("something shifted"),
            3,
            Digest::of(b"prev"),
        );
        let json = serde_json::to_string(&block).unwrap();
        let back: ThoughtBlock = serde_json::from_str(&json).unwrap();
        assert!(back.digest_matches());
        assert_eq!(back, block);
    }
}
