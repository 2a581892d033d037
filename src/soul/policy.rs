use std::sync::Arc;
use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Error, Result};
use crate::llm::function_tools::DecisionTool;
use crate::llm::{AssistantMessage, LLMBase, Message, ReplyStream, UserMessage};
use crate::util::soul_memory_store::SoulMemoryStore;

use super::interlocutor::Interlocutor;
use super::pending::PendingPerceptions;
use super::perception::Perception;
use super::rag::{select_top_documents, Retriever};
use super::SoulEvent;

/// More pending perceptions than this and the soul is considered overloaded
pub const PENDING_PERCEPTIONS_LIMIT: usize = 10;
/// Minimum similarity a retrieved document needs to be used
pub const MIN_SIMILARITY: f64 = 0.6;
pub const MAX_RETRIEVED_DOCUMENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Overloaded,
    MessageBurst,
    NotAddressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Skipped(SkipReason),
    /// The author sent more messages while the turn was being decided
    Aborted,
    Replied { reply: String },
    /// A painting was requested from the bridge
    PaintRequested,
}

impl TurnOutcome {
    pub fn replied(&self) -> bool {
        matches!(self, TurnOutcome::Replied { .. })
    }
}

pub fn last_message_key(user_name: &str) -> String {
    format!("{}-lastMessage", user_name)
}

/// Decides whether the soul answers a perception and builds the context it answers with
pub struct TurnTakingPolicy {
    agent_name: String,
    llm: Arc<dyn LLMBase>,
    retriever: Arc<dyn Retriever>,
    memory: Arc<dyn SoulMemoryStore>,
}

impl TurnTakingPolicy {
    pub fn new(
        agent_name: impl Into<String>,
        llm: Arc<dyn LLMBase>,
        retriever: Arc<dyn Retriever>,
        memory: Arc<dyn SoulMemoryStore>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            llm,
            retriever,
            memory,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Run one turn for `invoking`.
    ///
    /// `pending` is re-read after every await so a turn whose author kept typing is dropped.
    /// On a reply, a `SoulEvent::Says` is sent on `events` as soon as generation starts.
    pub async fn run(
        &self,
        invoking: &Perception,
        pending: &PendingPerceptions,
        history: &[Message],
        events: &UnboundedSender<SoulEvent>,
    ) -> Result<TurnOutcome> {
        let user_name = invoking.user_name();

        if pending.len().await > PENDING_PERCEPTIONS_LIMIT {
            info!("[Policy] Pending perceptions limit reached. Skipping perception.");
            return Ok(TurnOutcome::Skipped(SkipReason::Overloaded));
        }

        if pending.has_from_user(user_name).await {
            info!("[Policy] Skipping perception from {} because it's part of a message burst", user_name);
            return Ok(TurnOutcome::Skipped(SkipReason::MessageBurst));
        }

        let mut memories = history.to_vec();
        if let Some(remembered) = self.remember_user(invoking).await {
            memories.push(remembered);
        }

        if !self.is_user_talking_to_agent(invoking, &memories).await? {
            info!("[Policy] Ignoring message from {} because they're not talking to {}", user_name, self.agent_name);
            return Ok(TurnOutcome::Skipped(SkipReason::NotAddressed));
        }

        if pending.has_from_user(user_name).await {
            info!("[Policy] Aborting response to {} because they've sent more messages in the meantime", user_name);
            return Ok(TurnOutcome::Aborted);
        }

        if let Some(found) = self.search_results(invoking).await? {
            memories.push(found);
        }

        info!("[Policy] Answering message from {}", user_name);
        let reply = self.answer(invoking, memories, events).await?;

        self.memory.set(&last_message_key(user_name), &reply).await;
        Ok(TurnOutcome::Replied { reply })
    }

    /// What the soul remembers about the author, as a working memory
    async fn remember_user(&self, perception: &Perception) -> Option<Message> {
        let user_name = perception.user_name();
        let profile = self
            .memory
            .get(user_name)
            .await
            .unwrap_or_else(|| format!("- Display name: \"{}\"", perception.user_display_name()));
        let last_message = self.memory.get(&last_message_key(user_name)).await.unwrap_or_default();

        let mut remembered = profile;
        if !last_message.is_empty() {
            remembered.push_str(&format!(
                "\n\nThe last message {} sent to {} was:\n- {}",
                self.agent_name, user_name, last_message
            ));
        }

        let remembered = remembered.trim();
        if remembered.is_empty() {
            info!("[Policy] No memory about {}", user_name);
            return None;
        }

        info!("[Policy] Remembered this about {}:\n{}", user_name, remembered);
        Some(AssistantMessage(format!(
            "{} remembers this about {}:\n{}",
            self.agent_name, user_name, remembered
        )))
    }

    async fn is_user_talking_to_agent(&self, perception: &Perception, memories: &[Message]) -> Result<bool> {
        if let Some(bot_id) = perception.metadata.discord_user_id.as_deref() {
            if perception.content.contains(&format!("<@{}>", bot_id)) {
                info!("[Policy] User at-mentioned {}, will reply", self.agent_name);
                return Ok(true);
            }
        }

        let user_name = perception.user_name();
        let decision = DecisionTool::new(
            format!(
                "{agent} is the moderator of this channel. \
                 Participants sometimes talk to {agent}, and sometimes between themselves. \
                 In this last message sent by {user}, guess which person they are probably speaking with.",
                agent = self.agent_name,
                user = user_name,
            ),
            Interlocutor::labels(&self.agent_name),
        );

        let interlocutor = decision
            .decide(self.llm.as_ref(), memories)
            .await?
            .and_then(|label| Interlocutor::from_label(&label, &self.agent_name))
            .unwrap_or(Interlocutor::NotSure);

        info!(
            "[Policy] {} decided that {} is talking to: {}",
            self.agent_name,
            user_name,
            interlocutor.label(&self.agent_name)
        );
        Ok(interlocutor.addresses_agent())
    }

    /// Knowledge-base matches for the message, as a working memory
    async fn search_results(&self, perception: &Perception) -> Result<Option<Message>> {
        let documents = self.retriever.search(&perception.content, MIN_SIMILARITY).await?;
        let found = documents.len();
        let best = select_top_documents(documents, MIN_SIMILARITY, MAX_RETRIEVED_DOCUMENTS);

        let summary = best
            .iter()
            .map(|d| {
                let preview: String = d.content.chars().take(100).collect();
                format!("- {}... (similarity: {})", preview, d.similarity)
            })
            .collect::<Vec<_>>()
            .join("\n");
        info!(
            "[Policy] Found {} related documents with RAG search, using best {} results:\n{}",
            found,
            best.len(),
            summary
        );

        if best.is_empty() {
            return Ok(None);
        }

        let content = best
            .iter()
            .map(|d| format!("- {}", d.content))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(AssistantMessage(format!("{} remembers:\n{}", self.agent_name, content))))
    }

    /// Stream a reply to the bridge while collecting it
    async fn answer(
        &self,
        perception: &Perception,
        mut memories: Vec<Message>,
        events: &UnboundedSender<SoulEvent>,
    ) -> Result<String> {
        memories.push(UserMessage(format!(
            "{} answers {}'s message. Reply only with what {} says.",
            self.agent_name,
            perception.user_name(),
            self.agent_name
        )));

        let mut upstream = self.llm.inference_stream(&memories).await?;

        let (tx, content) = ReplyStream::pair();
        if events
            .send(SoulEvent::Says {
                content,
                discord_event: perception.discord_event().cloned(),
            })
            .is_err()
        {
            return Err(Error::StringError("soul event receiver is closed".to_string()));
        }

        let mut reply = String::new();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(delta) => {
                    reply.push_str(&delta);
                    // The bridge may have stopped listening; the reply is still recorded
                    let _ = tx.send(Ok(delta));
                }
                Err(e) => {
                    let _ = tx.send(Err(Error::Upstream(e.to_string())));
                    return Err(e);
                }
            }
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soul::test_support::{chatted, MockLLM, MockRetriever};
    use crate::soul::rag::RetrievedDocument;
    use crate::util::soul_memory_store::InMemorySoulMemoryStore;
    use tokio::sync::mpsc;

    struct Harness {
        llm: Arc<MockLLM>,
        retriever: Arc<MockRetriever>,
        memory: Arc<InMemorySoulMemoryStore>,
        pending: PendingPerceptions,
        policy: TurnTakingPolicy,
        events_tx: UnboundedSender<SoulEvent>,
        events_rx: mpsc::UnboundedReceiver<SoulEvent>,
    }

    fn harness(llm: MockLLM, documents: Vec<RetrievedDocument>) -> Harness {
        let llm = Arc::new(llm);
        let retriever = Arc::new(MockRetriever::new(documents));
        let memory = Arc::new(InMemorySoulMemoryStore::new());
        let policy = TurnTakingPolicy::new("Glandon", llm.clone(), retriever.clone(), memory.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Harness {
            llm,
            retriever,
            memory,
            pending: PendingPerceptions::new(),
            policy,
            events_tx,
            events_rx,
        }
    }

    impl Harness {
        async fn run(&self, perception: &Perception) -> TurnOutcome {
            self.policy
                .run(perception, &self.pending, &[], &self.events_tx)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_overloaded_queue_skips_without_model_calls() {
        let h = harness(MockLLM::deciding("Glandon, for sure"), Vec::new());
        for i in 0..11 {
            h.pending.push(chatted(&format!("user{}", i), "spam")).await;
        }

        let outcome = h.run(&chatted("alice", "<@999> hello")).await;

        assert_eq!(outcome, TurnOutcome::Skipped(SkipReason::Overloaded));
        assert_eq!(h.llm.decision_calls(), 0);
        assert_eq!(h.llm.stream_calls(), 0);
        assert_eq!(h.retriever.calls(), 0);
    }

    #[tokio::test]
    async fn test_exactly_ten_pending_is_not_overloaded() {
        let h = harness(MockLLM::deciding("Glandon, for sure"), Vec::new());
        for i in 0..10 {
            h.pending.push(chatted(&format!("user{}", i), "hi")).await;
        }
        assert!(h.run(&chatted("alice", "<@999> hello")).await.replied());
    }

    #[tokio::test]
    async fn test_burst_from_same_author_is_skipped() {
        let h = harness(MockLLM::deciding("Glandon, for sure"), Vec::new());
        h.pending.push(chatted("bob", "second message")).await;

        let outcome = h.run(&chatted("bob", "<@999> first message")).await;

        assert_eq!(outcome, TurnOutcome::Skipped(SkipReason::MessageBurst));
        assert_eq!(h.llm.decision_calls(), 0);
        assert_eq!(h.llm.stream_calls(), 0);
    }

    #[tokio::test]
    async fn test_at_mention_admits_without_classification() {
        let mut h = harness(MockLLM::deciding("someone else").replying(&["It's ", "sunny"]), Vec::new());

        let perception = chatted("alice", "<@999> what's the weather");
        let outcome = h.run(&perception).await;

        assert_eq!(outcome, TurnOutcome::Replied { reply: "It's sunny".into() });
        assert_eq!(h.llm.decision_calls(), 0);
        match h.events_rx.try_recv() {
            Ok(SoulEvent::Says { content, discord_event }) => {
                assert_eq!(discord_event.map(|e| e.at_mention_username), Some("alice".to_string()));
                assert_eq!(content.collect_text().await.unwrap(), "It's sunny");
            }
            _ => panic!("expected a says event"),
        }
    }

    #[tokio::test]
    async fn test_mention_of_someone_else_still_classifies() {
        let h = harness(MockLLM::deciding("someone else"), Vec::new());
        let outcome = h.run(&chatted("alice", "<@123> are you there")).await;
        assert_eq!(outcome, TurnOutcome::Skipped(SkipReason::NotAddressed));
        assert_eq!(h.llm.decision_calls(), 1);
    }

    #[tokio::test]
    async fn test_classification_labels_decide_admission() {
        for (label, admitted) in [
            ("Glandon, for sure", true),
            ("Glandon, possibly", true),
            ("someone else", false),
            ("not sure", false),
            ("Glandon", false),
        ] {
            let h = harness(MockLLM::deciding(label), Vec::new());
            let outcome = h.run(&chatted("carol", "anyone know the rules?")).await;
            assert_eq!(outcome.replied(), admitted, "label {:?}", label);
            if !admitted {
                assert_eq!(outcome, TurnOutcome::Skipped(SkipReason::NotAddressed));
                assert_eq!(h.llm.stream_calls(), 0);
                assert_eq!(h.retriever.calls(), 0);
            }
        }
    }

    #[tokio::test]
    async fn test_new_message_during_classification_aborts() {
        let h = harness(MockLLM::deciding("Glandon, for sure"), Vec::new());
        h.llm.push_during_decision(h.pending.clone(), chatted("dave", "wait, one more thing"));

        let outcome = h.run(&chatted("dave", "hey glandon")).await;

        assert_eq!(outcome, TurnOutcome::Aborted);
        assert_eq!(h.llm.decision_calls(), 1);
        assert_eq!(h.llm.stream_calls(), 0);
        assert_eq!(h.retriever.calls(), 0);
        assert_eq!(h.memory.get(&last_message_key("dave")).await, None);
    }

    #[tokio::test]
    async fn test_other_author_arriving_during_classification_does_not_abort() {
        let h = harness(MockLLM::deciding("Glandon, for sure"), Vec::new());
        h.llm.push_during_decision(h.pending.clone(), chatted("erin", "hello all"));
        assert!(h.run(&chatted("dave", "hey glandon")).await.replied());
    }

    #[tokio::test]
    async fn test_retrieval_enrichment_uses_top_three_above_threshold() {
        let docs = vec![
            RetrievedDocument { content: "low".into(), similarity: 0.3 },
            RetrievedDocument { content: "third".into(), similarity: 0.65 },
            RetrievedDocument { content: "first".into(), similarity: 0.9 },
            RetrievedDocument { content: "fourth".into(), similarity: 0.6 },
            RetrievedDocument { content: "second".into(), similarity: 0.7 },
        ];
        let h = harness(MockLLM::deciding("Glandon, for sure"), docs);

        h.run(&chatted("alice", "<@999> tell me about the server")).await;

        assert_eq!(h.retriever.last_query().as_deref(), Some("<@999> tell me about the server"));
        let prompt = h.llm.last_stream_prompt();
        let enrichment = prompt
            .iter()
            .filter_map(|m| m.content.clone())
            .find(|c| c.starts_with("Glandon remembers:\n"))
            .expect("retrieval memory");
        assert_eq!(enrichment, "Glandon remembers:\n- first\n- second\n- third");
        assert!(!prompt.iter().any(|m| m.content.as_deref().unwrap_or("").contains("low")));
    }

    #[tokio::test]
    async fn test_user_memory_is_attached_and_last_message_written() {
        let h = harness(MockLLM::deciding("Glandon, for sure").replying(&["Welcome back!"]), Vec::new());
        h.memory.set("alice", "- Display name: \"Alice\"\n- Likes chess").await;
        h.memory.set(&last_message_key("alice"), "See you tomorrow").await;

        h.run(&chatted("alice", "<@999> I'm back")).await;

        let prompt = h.llm.last_stream_prompt();
        let remembered = prompt
            .iter()
            .filter_map(|m| m.content.clone())
            .find(|c| c.starts_with("Glandon remembers this about alice:"))
            .expect("user memory");
        assert!(remembered.contains("Likes chess"));
        assert!(remembered.contains("The last message Glandon sent to alice was:\n- See you tomorrow"));
        assert_eq!(h.memory.get(&last_message_key("alice")).await.as_deref(), Some("Welcome back!"));
    }

    #[tokio::test]
    async fn test_unknown_user_gets_display_name_memory() {
        let h = harness(MockLLM::deciding("Glandon, for sure"), Vec::new());
        h.run(&chatted("frank", "<@999> hi")).await;
        let prompt = h.llm.last_stream_prompt();
        assert!(prompt
            .iter()
            .filter_map(|m| m.content.as_deref())
            .any(|c| c == "Glandon remembers this about frank:\n- Display name: \"frank\""));
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let h = harness(MockLLM::deciding("Glandon, for sure").failing_stream(), Vec::new());
        let result = h
            .policy
            .run(&chatted("alice", "<@999> hi"), &h.pending, &[], &h.events_tx)
            .await;
        assert!(result.is_err());
        assert_eq!(h.memory.get(&last_message_key("alice")).await, None);
    }
}
