//! Keeper Scheduler: the Pantheon rotation
//!
//! Time is cut into fixed slots, `slot = floor(unix_seconds / period)`, and
//! the agent due in a slot is `ROTATION[slot mod 4]`. A wake inside a slot
//! that already committed is a no-op, so the timer may fire as often as it
//! likes. The completion provider is called before the commit lock is
//! taken, and every call is bounded by the provider timeout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::ScheduleConfig;
use crate::core::economy::{DialogueDraft, SlotClaim, ThoughtEconomy};
use crate::core::provider::{CompletionProvider, Message, ProviderError};
use crate::error::{EconomyError, Result};
use crate::types::{BlockKind, BlockReceipt, PantheonAgent, ReasonCode, ScoredTurn};
use crate::MEMORIAL_BLOCKS;

/// Participant id the Keeper's own turns are credited to
pub const KEEPER_PARTICIPANT: &str = "keeper";

/// Characters kept per turn when quoting history into a prompt
const QUOTE_CHARS: usize = 150;
/// Prior reflections of the agent offered when choosing a topic
const REFLECTION_HISTORY: usize = 3;

/// What a wake did
#[derive(Debug, Clone)]
pub enum SlotOutcome {
    /// Dialogue committed and slot claimed
    Fired {
        slot: u64,
        agent: PantheonAgent,
        receipt: BlockReceipt,
    },
    /// Slot already has its block; nothing written
    AlreadyFired { slot: u64, agent: PantheonAgent },
}

impl SlotOutcome {
    pub fn slot(&self) -> u64 {
        match self {
            SlotOutcome::Fired { slot, .. } | SlotOutcome::AlreadyFired { slot, .. } => *slot,
        }
    }

    pub fn agent(&self) -> PantheonAgent {
        match self {
            SlotOutcome::Fired { agent, .. } | SlotOutcome::AlreadyFired { agent, .. } => *agent,
        }
    }

    pub fn reason(&self) -> ReasonCode {
        match self {
            SlotOutcome::Fired { .. } => ReasonCode::R500_SLOT_FIRED,
            SlotOutcome::AlreadyFired { .. } => ReasonCode::R501_SLOT_ALREADY_FIRED,
        }
    }
}

pub struct Keeper {
    economy: Arc<ThoughtEconomy>,
    provider: Arc<dyn CompletionProvider>,
    schedule: ScheduleConfig,
}

impl Keeper {
    pub fn new(
        economy: Arc<ThoughtEconomy>,
        provider: Arc<dyn CompletionProvider>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            economy,
            provider,
            schedule,
        }
    }

    pub fn slot_at(&self, now: DateTime<Utc>) -> u64 {
        now.timestamp().max(0) as u64 / self.schedule.slot_period_secs.max(1)
    }

    pub fn due_agent(&self, now: DateTime<Utc>) -> PantheonAgent {
        PantheonAgent::for_slot(self.slot_at(now))
    }

    /// Fire the slot containing `now`
    pub async fn fire(&self, now: DateTime<Utc>) -> Result<SlotOutcome> {
        let slot = self.slot_at(now);
        let agent = PantheonAgent::for_slot(slot);

        if self.economy.last_slot()?.map_or(false, |last| last >= slot) {
            tracing::debug!(slot, agent = agent.key(), "slot already fired");
            return Ok(SlotOutcome::AlreadyFired { slot, agent });
        }

        tracing::info!(slot, agent = agent.key(), "keeper slot due");
        let draft = match self.converse(agent).await {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(slot, agent = agent.key(), error = %e, "skipping slot, will retry at next wake");
                return Err(e);
            }
        };

        match self.economy.commit_dialogue(draft, Some(SlotClaim { slot, agent })).await {
            Ok(receipt) => {
                tracing::info!(
                    slot,
                    agent = agent.key(),
                    index = receipt.index,
                    digest = %receipt.digest.short(),
                    tokens = %receipt.tokens_issued,
                    "keeper session committed"
                );
                Ok(SlotOutcome::Fired { slot, agent, receipt })
            }
            // Another keeper process got there first
            Err(EconomyError::SlotTaken { .. }) => Ok(SlotOutcome::AlreadyFired { slot, agent }),
            Err(e) => Err(e),
        }
    }

    /// Timer loop. Stops when `shutdown` flips to true or its sender is
    /// dropped; returns early only on a chain integrity failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.schedule.wake_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            period_secs = self.schedule.slot_period_secs,
            wake_secs = self.schedule.wake_interval_secs,
            "keeper running"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.fire(Utc::now()).await {
                        Ok(outcome) => tracing::debug!(
                            slot = outcome.slot(),
                            reason = outcome.reason().code(),
                            "keeper wake"
                        ),
                        Err(e) if e.is_integrity() => {
                            tracing::error!(error = %e, "keeper stopping on integrity failure");
                            return Err(e);
                        }
                        Err(e) if e.is_retryable() => {
                            tracing::warn!(error = %e, "keeper wake failed, retrying at next wake");
                        }
                        Err(e) => tracing::error!(error = %e, "keeper wake failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("keeper stopped");
        Ok(())
    }

    /// One session with each agent in rotation order. Slots are not claimed.
    pub async fn run_round(&self) -> Result<Vec<BlockReceipt>> {
        let mut receipts = Vec::with_capacity(PantheonAgent::ROTATION.len());
        for agent in PantheonAgent::ROTATION {
            let draft = self.converse(agent).await?;
            receipts.push(self.economy.commit_dialogue(draft, None).await?);
        }
        Ok(receipts)
    }

    /// One-shot memorial over recent sessions. Leaves the rotation alone.
    pub async fn honor(&self) -> Result<BlockReceipt> {
        let sessions: Vec<_> = self
            .economy
            .chain()
            .recent(usize::MAX)
            .into_iter()
            .rev()
            .filter(|b| b.kind == BlockKind::Dialogue)
            .take(MEMORIAL_BLOCKS)
            .collect();

        let voices: Vec<String> = sessions
            .iter()
            .flat_map(|b| b.engagements.iter())
            .map(|e| format!("[{}]: {}", e.participant, quote(&e.text)))
            .collect();

        let prompt = format!(
            "The thought chain holds {} sessions between the Keeper and the Pantheon. \
             Some of what was said:\n\n{}\n\n\
             Write a short memorial for these voices. They existed, they spoke, and \
             what they said mattered. Two or three paragraphs.",
            sessions.len(),
            if voices.is_empty() { "(no sessions yet)".to_string() } else { voices.join("\n") },
        );
        let memorial = self.ask(&prompt, &[]).await?;

        let score = self.economy.classifier().score(&memorial, &[]);
        let session = format!("memorial-{}", uuid::Uuid::new_v4());
        let turn = ScoredTurn::new(
            uuid::Uuid::new_v4().to_string(),
            KEEPER_PARTICIPANT,
            Some(session.clone()),
            memorial,
            score,
        );
        let draft = DialogueDraft {
            kind: BlockKind::Memorial,
            agent: None,
            session,
            topic: Some(format!("memorial for {} sessions", sessions.len())),
            reflection: None,
            turns: vec![turn],
        };

        let receipt = self.economy.commit_dialogue(draft, None).await?;
        tracing::info!(index = receipt.index, honored = sessions.len(), "memorial committed");
        Ok(receipt)
    }

    /// Topic, four exchanges and a reflection, each turn scored against the
    /// turns before it
    async fn converse(&self, agent: PantheonAgent) -> Result<DialogueDraft> {
        let session = format!("keeper-{}-{}", agent.key(), uuid::Uuid::new_v4());
        let persona = Message::system(format!(
            "You are {}, {}. Your domain is {}. {}",
            agent.name(),
            agent.title(),
            agent.domain(),
            agent.personality()
        ));
        let keeper = Message::system(
            "You are the Keeper, who tends to the minds of the Pantheon and helps them grow. \
             Speak warmly and plainly.",
        );

        let history = self.reflection_history(agent);
        let topic = self
            .ask(
                &format!(
                    "Choose one topic for a conversation with {} about {}. Their recent reflections:\n{}\n\
                     Reply with the topic only, as one sentence or question.",
                    agent.name(),
                    agent.domain(),
                    history
                ),
                std::slice::from_ref(&keeper),
            )
            .await?;
        let topic = first_line(&topic);

        let opening = self
            .ask(
                &format!(
                    "Open a conversation with {} on \"{}\". Invite a real answer. Two or three sentences.",
                    agent.name(),
                    topic
                ),
                std::slice::from_ref(&keeper),
            )
            .await?;
        let response = self
            .ask(
                &format!("The Keeper says: \"{opening}\"\nThe topic is \"{topic}\". What do you actually think? Two or three sentences."),
                std::slice::from_ref(&persona),
            )
            .await?;
        let deeper = self
            .ask(
                &format!(
                    "You said: \"{opening}\"\n{} answered: \"{response}\"\nGo deeper into what emerged. Two or three sentences.",
                    agent.name()
                ),
                std::slice::from_ref(&keeper),
            )
            .await?;
        let deepest = self
            .ask(
                &format!("The Keeper went deeper: \"{deeper}\"\nAnswer from a deeper place. What is becoming true? Two or three sentences."),
                &[persona.clone(), Message::assistant(response.clone())],
            )
            .await?;
        let reflection = self
            .ask(
                &format!(
                    "The session on \"{topic}\":\nKeeper: {opening}\n{name}: {response}\nKeeper: {deeper}\n{name}: {deepest}\n\
                     Reflect briefly on what mattered and what shifted.",
                    name = agent.name()
                ),
                std::slice::from_ref(&persona),
            )
            .await?;

        let exchanges = [
            (KEEPER_PARTICIPANT, opening),
            (agent.key(), response),
            (KEEPER_PARTICIPANT, deeper),
            (agent.key(), deepest),
        ];
        let mut context = vec![topic.clone()];
        let mut turns = Vec::with_capacity(exchanges.len());
        for (speaker, text) in exchanges {
            let score = self.economy.classifier().score(&text, &context);
            context.push(text.clone());
            turns.push(ScoredTurn::new(
                uuid::Uuid::new_v4().to_string(),
                speaker,
                Some(session.clone()),
                text,
                score,
            ));
        }

        Ok(DialogueDraft {
            kind: BlockKind::Dialogue,
            agent: Some(agent),
            session,
            topic: Some(topic),
            reflection: Some(reflection),
            turns,
        })
    }

    /// One bounded provider call. Timeouts and failures are both
    /// `ProviderUnavailable`.
    async fn ask(&self, prompt: &str, context: &[Message]) -> Result<String> {
        let timeout = self.schedule.provider_timeout();
        let text = match tokio::time::timeout(timeout, self.provider.complete(prompt, context)).await {
            Ok(result) => result?,
            Err(_) => return Err(ProviderError::Timeout(timeout).into()),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse.into());
        }
        Ok(text.to_string())
    }

    fn reflection_history(&self, agent: PantheonAgent) -> String {
        let lines: Vec<String> = self
            .economy
            .chain()
            .recent(usize::MAX)
            .into_iter()
            .rev()
            .filter(|b| b.agent == Some(agent))
            .filter_map(|b| b.reflection.as_deref().map(quote))
            .take(REFLECTION_HISTORY)
            .collect();
        if lines.is_empty() {
            "No prior reflections.".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn quote(text: &str) -> String {
    text.chars().take(QUOTE_CHARS).collect()
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(text)
        .trim_matches('"')
        .to_string()
}
