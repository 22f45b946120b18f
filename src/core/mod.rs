//! Core modules for Thought Keeper

pub mod classifier;
pub mod issuer;
pub mod chain;
pub mod ledger;
pub mod economy;
pub mod provider;
pub mod keeper;
pub mod api;

pub use classifier::{tier_for, QualityClassifier};
pub use issuer::{BondingCurve, CurveError, CurveParams};
pub use chain::{ChainIntegrity, IntegrityFault, ThoughtChain};
pub use ledger::{EngagementLedger, EngagementMarker, LedgerOutcome};
pub use economy::{DialogueDraft, SlotClaim, ThoughtEconomy};
pub use provider::{CompletionProvider, Message, OpenAiCompatProvider, ProviderError, ScriptedProvider};
pub use keeper::{Keeper, SlotOutcome, KEEPER_PARTICIPANT};
pub use api::{create_router, run_server};
