pub mod interlocutor;
pub mod pending;
pub mod perception;
pub mod policy;
pub mod rag;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use log::{debug, error, info};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::bot_adapter::models::ChatEvent;
use crate::error::Result;
use crate::llm::{AssistantMessage, Message, ReplyStream, UserMessage};

use pending::PendingPerceptions;
use perception::{Perception, CHATTED_ACTION, PAINT_ACTION};
use policy::{TurnOutcome, TurnTakingPolicy};

pub const DEFAULT_HISTORY_LIMIT: usize = 40;

/// What the soul asks the bridge to do
pub enum SoulEvent {
    /// Say something in reply to the chat event that triggered the turn
    Says {
        content: ReplyStream,
        discord_event: Option<ChatEvent>,
    },
    /// Request an image; `metadata` carries `prompt` and `discordMessage`
    Paint { metadata: Value },
}

/// The conversational agent: queues perceptions and works through them one at a time
pub struct Soul {
    policy: TurnTakingPolicy,
    pending: PendingPerceptions,
    history: Mutex<Vec<Message>>,
    history_limit: usize,
    events_tx: UnboundedSender<SoulEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<SoulEvent>>>,
}

impl Soul {
    pub fn new(policy: TurnTakingPolicy, history_limit: usize) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            policy,
            pending: PendingPerceptions::new(),
            history: Mutex::new(Vec::new()),
            history_limit,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Receiver for everything the soul emits. Can be taken once.
    pub async fn take_events(&self) -> Option<UnboundedReceiver<SoulEvent>> {
        self.events_rx.lock().await.take()
    }

    pub async fn dispatch(&self, perception: Perception) {
        debug!("[Soul] Perception from {} queued: {}", perception.user_name(), perception.action);
        self.pending.push(perception).await;
    }

    pub fn emit_paint(&self, metadata: Value) {
        if self.events_tx.send(SoulEvent::Paint { metadata }).is_err() {
            error!("[Soul] Paint request dropped, no one is listening");
        }
    }

    /// Process the oldest pending perception, if any
    pub async fn process_next(&self) -> Option<Result<TurnOutcome>> {
        let perception = self.pending.pop_front().await?;
        Some(self.process(perception).await)
    }

    async fn process(&self, perception: Perception) -> Result<TurnOutcome> {
        if perception.action == PAINT_ACTION {
            info!("[Soul] {} asked for a painting of {}", perception.user_name(), perception.content);
            self.emit_paint(paint_metadata(&perception));
            return Ok(TurnOutcome::PaintRequested);
        }
        if perception.action != CHATTED_ACTION {
            debug!("[Soul] No process handles action {}, ignoring", perception.action);
            return Ok(TurnOutcome::Skipped(policy::SkipReason::NotAddressed));
        }

        let history = {
            let mut history = self.history.lock().await;
            history.push(UserMessage(format!(
                "{} chatted: \"{}\"",
                perception.user_name(),
                perception.content
            )));
            trim_history(&mut history, self.history_limit);
            history.clone()
        };

        let outcome = self
            .policy
            .run(&perception, &self.pending, &history, &self.events_tx)
            .await?;

        if let TurnOutcome::Replied { reply } = &outcome {
            let mut history = self.history.lock().await;
            history.push(AssistantMessage(format!(
                "{} said: \"{}\"",
                self.policy.agent_name(),
                reply
            )));
            trim_history(&mut history, self.history_limit);
        }
        Ok(outcome)
    }

    /// Worker loop: wait for perceptions and process them in arrival order
    pub async fn run(self: Arc<Self>) {
        info!("[Soul] {} is listening", self.policy.agent_name());
        loop {
            while let Some(result) = self.process_next().await {
                match result {
                    Ok(outcome) => debug!("[Soul] Turn finished: {:?}", outcome),
                    Err(e) => error!("[Soul] Turn failed: {}", e),
                }
            }
            self.pending.notified().await;
        }
    }
}

/// `prompt` plus the message to answer, as the bridge's paint handler expects it
fn paint_metadata(perception: &Perception) -> Value {
    let mut metadata = json!({ "prompt": perception.content });
    if let Some(event) = perception.discord_event() {
        metadata["discordMessage"] = json!({
            "messageId": event.message_id,
            "channelId": event.channel_id,
        });
    }
    metadata
}

fn trim_history(history: &mut Vec<Message>, limit: usize) {
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}
