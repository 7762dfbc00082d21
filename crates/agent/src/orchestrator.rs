use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use recoveries_core::context::render_business_context;
use recoveries_core::{validate_candidate, BusinessRules, PtpRecord};

use crate::customers::CustomerDirectory;
use crate::detector::looks_like_commitment;
use crate::extraction::{parse_candidate, render_transcript};
use crate::gateway::ToolGateway;
use crate::llm::{ChatMessage, ModelClient, ModelError};
use crate::prompts::{PromptRef, PromptResolver};
use crate::session::{Session, SessionStore};
use crate::telemetry::{NoopTelemetry, SpanReport, Telemetry};

/// Injectable source of "today". All date-dependent logic in the
/// pipeline goes through this so tests can pin the calendar.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// One named prompt plus its locally supplied fallback text.
pub struct PromptSource {
    pub reference: Option<PromptRef>,
    pub fallback: Option<String>,
}

/// The resolver and the two prompts the pipeline needs: the
/// conversational system prompt and the extraction prompt.
pub struct PromptSuite {
    pub resolver: PromptResolver,
    pub system: PromptSource,
    pub extraction: PromptSource,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    pub session_id: String,
    pub customer_id: String,
    pub turn: u64,
    pub ptp_recorded: bool,
    pub recorded_ptp: Option<PtpRecord>,
}

/// Failures that prevent producing a conversational reply. Everything
/// downstream of "reply already produced" is absorbed instead.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("conversational model call failed: {0}")]
    Model(#[from] ModelError),
}

/// The conversation orchestrator: one entry point, `process_turn`.
pub struct RecoveriesAgent {
    rules: BusinessRules,
    prompts: PromptSuite,
    model: Arc<dyn ModelClient>,
    sessions: Arc<dyn SessionStore>,
    customers: Arc<dyn CustomerDirectory>,
    telemetry: Arc<dyn Telemetry>,
    clock: Arc<dyn Clock>,
    gateway: Option<ToolGateway>,
}

impl RecoveriesAgent {
    pub fn new(
        rules: BusinessRules,
        prompts: PromptSuite,
        model: Arc<dyn ModelClient>,
        sessions: Arc<dyn SessionStore>,
        customers: Arc<dyn CustomerDirectory>,
    ) -> Self {
        Self {
            rules,
            prompts,
            model,
            sessions,
            customers,
            telemetry: Arc::new(NoopTelemetry),
            clock: Arc::new(SystemClock),
            gateway: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables the best-effort `record_ptp` write-through to the tool
    /// gateway. The local session record stays authoritative.
    pub fn with_record_gateway(mut self, gateway: ToolGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Runs one conversation turn to completion.
    ///
    /// History is caller-supplied and authoritative; it is never
    /// reordered here, and the new exchange is only appended by the
    /// caller after the reply is produced. A primary model failure is
    /// fatal to the turn; every failure after the reply exists (prompt
    /// resolution for extraction, the extraction call itself, parsing,
    /// validation) is absorbed and the reply is still returned.
    pub async fn process_turn(
        &self,
        message: &str,
        session_id: &str,
        history: &[ChatMessage],
    ) -> Result<TurnOutcome, TurnError> {
        let session = self
            .sessions
            .get_or_create(
                session_id,
                Box::pin(async { Session::new(self.customers.snapshot(session_id).await) }),
            )
            .await;

        let today = self.clock.today();
        let system_prompt = self.system_prompt().await;
        let context_block = render_business_context(&session.customer_snapshot, &self.rules, today);

        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(ChatMessage::system(system_prompt));
        messages.push(ChatMessage::system(context_block));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(message));

        let reply = match self.model.invoke(&messages).await {
            Ok(reply) => {
                self.telemetry.report(SpanReport {
                    name: "llm_invoke",
                    session_id,
                    input: message,
                    outcome: Ok(&reply),
                });
                reply
            }
            Err(error) => {
                self.telemetry.report(SpanReport {
                    name: "llm_invoke",
                    session_id,
                    input: message,
                    outcome: Err(&error.to_string()),
                });
                return Err(error.into());
            }
        };

        // Extraction only runs while nothing is recorded yet, and only
        // when the raw user message (not the reply) trips the detector.
        if !session.commitment_recorded && looks_like_commitment(message) {
            self.try_record_commitment(session_id, &session, history, &reply, today).await;
        }

        let turn = self.sessions.increment_turn(session_id).await;
        let current = self.sessions.get(session_id).await.unwrap_or(session);

        Ok(TurnOutcome {
            reply,
            session_id: session_id.to_string(),
            customer_id: current.customer_snapshot.customer_id.0,
            turn,
            ptp_recorded: current.commitment_recorded,
            recorded_ptp: current.recorded_ptp,
        })
    }

    /// Conversational system prompt, tiered: prompt service (with the
    /// local fallback handled inside the resolver) -> local fallback ->
    /// built-in default. Always yields text.
    async fn system_prompt(&self) -> String {
        let source = &self.prompts.system;
        if let Some(reference) = &source.reference {
            match self.prompts.resolver.resolve(reference, source.fallback.as_deref()).await {
                Ok(text) => return text,
                Err(error) => warn!(
                    event_name = "agent.prompts.system_unresolved",
                    error = %error,
                    "system prompt unresolved, using built-in default"
                ),
            }
        } else if let Some(fallback) = nonblank(source.fallback.as_deref()) {
            return fallback.to_string();
        }

        default_system_prompt(&self.rules)
    }

    /// Extraction prompt; unlike the system prompt there is no built-in
    /// default, so `None` means extraction is skipped this turn.
    async fn extraction_prompt(&self) -> Option<String> {
        let source = &self.prompts.extraction;
        match &source.reference {
            Some(reference) => {
                self.prompts.resolver.resolve(reference, source.fallback.as_deref()).await.ok()
            }
            None => nonblank(source.fallback.as_deref()).map(str::to_string),
        }
    }

    /// The extraction sub-pipeline. Infallible from the caller's point of
    /// view: every failure path logs and returns, leaving the session as
    /// it was.
    async fn try_record_commitment(
        &self,
        session_id: &str,
        session: &Session,
        history: &[ChatMessage],
        reply: &str,
        today: NaiveDate,
    ) {
        let Some(extraction_prompt) = self.extraction_prompt().await else {
            debug!(
                event_name = "agent.ptp.extraction_skipped",
                session_id,
                "no extraction prompt available"
            );
            return;
        };

        let mut conversation = history.to_vec();
        conversation.push(ChatMessage::assistant(reply));
        let transcript = render_transcript(&conversation, today);
        let context_block = render_business_context(&session.customer_snapshot, &self.rules, today);

        let extraction_messages = [
            ChatMessage::system(extraction_prompt),
            ChatMessage::user(format!("{context_block}\n\n{transcript}")),
        ];

        let extraction_text = match self.model.invoke(&extraction_messages).await {
            Ok(text) => {
                self.telemetry.report(SpanReport {
                    name: "ptp_extraction",
                    session_id,
                    input: &transcript,
                    outcome: Ok(&text),
                });
                text
            }
            Err(error) => {
                self.telemetry.report(SpanReport {
                    name: "ptp_extraction",
                    session_id,
                    input: &transcript,
                    outcome: Err(&error.to_string()),
                });
                info!(
                    event_name = "agent.ptp.extraction_failed",
                    session_id,
                    error = %error,
                    "extraction call failed, continuing without a record"
                );
                return;
            }
        };

        let Some(candidate) = parse_candidate(&extraction_text) else {
            debug!(
                event_name = "agent.ptp.extraction_unparsable",
                session_id,
                "extraction output had no usable object"
            );
            return;
        };
        if !candidate.has_ptp {
            debug!(event_name = "agent.ptp.no_commitment", session_id, "model saw no commitment");
            return;
        }

        let record =
            match validate_candidate(&session.customer_snapshot, &self.rules, &candidate, today) {
                Ok(record) => record,
                Err(rejection) => {
                    info!(
                        event_name = "agent.ptp.rejected",
                        session_id,
                        rejection = %rejection,
                        "candidate rejected, negotiation continues"
                    );
                    return;
                }
            };

        if !self.sessions.try_record_ptp(session_id, record.clone()).await {
            debug!(
                event_name = "agent.ptp.duplicate_ignored",
                session_id,
                "a record already exists, first committed wins"
            );
            return;
        }

        info!(
            event_name = "agent.ptp.recorded",
            session_id,
            amount = record.amount,
            payment_date = %record.payment_date,
            "promise to pay recorded"
        );

        if let Some(gateway) = &self.gateway {
            let arguments = json!({
                "customer_id": session.customer_snapshot.customer_id.0,
                "session_id": session_id,
                "amount": record.amount,
                "payment_date": record.payment_date.format("%Y-%m-%d").to_string(),
                "notes": record.notes,
            });
            if let Err(error) = gateway.call_tool("record_ptp", arguments).await {
                warn!(
                    event_name = "agent.ptp.write_through_failed",
                    session_id,
                    error = %error,
                    "gateway record_ptp failed, local record kept"
                );
            }
        }
    }
}

fn nonblank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|value| !value.is_empty())
}

fn default_system_prompt(rules: &BusinessRules) -> String {
    format!(
        "You are Andrea, a compassionate and professional loan recovery specialist at Tala.\n\
         Lead with empathy, understand the customer's situation, and help agree a realistic Promise to Pay.\n\
         Business rules: minimum PTP amount is {percent}% of total owed; max plan is {days} days.\n\
         Ask 1-2 questions at a time. Propose a specific amount and date. Get explicit commitment and confirm next steps.",
        percent = (rules.min_ptp_percent * 100.0).round() as u32,
        days = rules.max_ptp_days,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use recoveries_core::BusinessRules;

    use crate::customers::StaticCustomerDirectory;
    use crate::llm::{ChatMessage, ModelClient, ModelError, Role};
    use crate::prompts::PromptResolver;
    use crate::session::{InMemorySessionStore, SessionStore};

    use super::{FixedClock, PromptSource, PromptSuite, RecoveriesAgent, TurnError};

    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("lock should not be poisoned").len()
        }

        fn call(&self, index: usize) -> Vec<ChatMessage> {
            self.calls.lock().expect("lock should not be poisoned")[index].clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
            self.calls.lock().expect("lock should not be poisoned").push(messages.to_vec());
            self.responses
                .lock()
                .expect("lock should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(ModelError::MalformedResponse("script exhausted".to_string()))
                })
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).expect("valid date")
    }

    fn prompt_suite() -> PromptSuite {
        PromptSuite {
            resolver: PromptResolver::new(None, Duration::from_secs(60)),
            system: PromptSource {
                reference: None,
                fallback: Some("You are Andrea.".to_string()),
            },
            extraction: PromptSource {
                reference: None,
                fallback: Some("Extract the agreed PTP as JSON.".to_string()),
            },
        }
    }

    fn agent_with(model: Arc<ScriptedModel>, sessions: Arc<InMemorySessionStore>) -> RecoveriesAgent {
        RecoveriesAgent::new(
            BusinessRules::default(),
            prompt_suite(),
            model,
            sessions,
            Arc::new(StaticCustomerDirectory),
        )
        .with_clock(Arc::new(FixedClock(today())))
    }

    // Demo snapshot owes 562.50, so the default minimum is 140.625.
    fn extraction_json(amount: f64, date: &str) -> String {
        format!(
            r#"Here you go: {{"has_ptp": true, "amount": {amount}, "payment_date": "{date}", "notes": "payday"}}"#
        )
    }

    #[tokio::test]
    async fn plain_turn_replies_without_extraction() {
        let model = ScriptedModel::new(vec![Ok("How are things going?".to_string())]);
        let agent = agent_with(model.clone(), Arc::new(InMemorySessionStore::new()));

        let outcome = agent
            .process_turn("my business slowed", "sess-1", &[])
            .await
            .expect("turn should succeed");

        assert_eq!(outcome.reply, "How are things going?");
        assert_eq!(outcome.turn, 1);
        assert!(!outcome.ptp_recorded);
        assert_eq!(model.call_count(), 1);

        let messages = model.call(0);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You are Andrea.");
        assert!(messages[1].content.contains("Today: 2025-01-06"));
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("my business slowed"));
    }

    #[tokio::test]
    async fn commitment_turn_extracts_validates_and_records() {
        let model = ScriptedModel::new(vec![
            Ok("Great, so 150 by January 16th.".to_string()),
            Ok(extraction_json(150.0, "2025-01-16")),
        ]);
        let sessions = Arc::new(InMemorySessionStore::new());
        let agent = agent_with(model.clone(), sessions.clone());

        let outcome = agent
            .process_turn("Yes, I can commit to that", "sess-1", &[])
            .await
            .expect("turn should succeed");

        assert!(outcome.ptp_recorded);
        let record = outcome.recorded_ptp.expect("record should be present");
        assert_eq!(record.amount, 150.00);
        assert_eq!(record.payment_date, NaiveDate::from_ymd_opt(2025, 1, 16).expect("valid date"));
        assert_eq!(record.notes, "payday");

        assert_eq!(model.call_count(), 2);
        let extraction_call = model.call(1);
        assert_eq!(extraction_call[0].content, "Extract the agreed PTP as JSON.");
        assert!(extraction_call[1].content.contains("Transcript:"));
        assert!(extraction_call[1].content.contains("AGENT: Great, so 150 by January 16th."));

        let session = sessions.get("sess-1").await.expect("session should exist");
        assert!(session.commitment_recorded);
    }

    #[tokio::test]
    async fn extraction_failure_still_returns_the_reply() {
        let model = ScriptedModel::new(vec![
            Ok("Thanks for confirming.".to_string()),
            Err(ModelError::Status { status: 502, body: "bad gateway".to_string() }),
        ]);
        let agent = agent_with(model.clone(), Arc::new(InMemorySessionStore::new()));

        let outcome = agent
            .process_turn("yes, deal", "sess-1", &[])
            .await
            .expect("turn should still succeed");

        assert_eq!(outcome.reply, "Thanks for confirming.");
        assert!(!outcome.ptp_recorded);
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn unparsable_extraction_output_is_absorbed() {
        let model = ScriptedModel::new(vec![
            Ok("Sounds good.".to_string()),
            Ok("I could not find a commitment in this chat.".to_string()),
        ]);
        let agent = agent_with(model.clone(), Arc::new(InMemorySessionStore::new()));

        let outcome =
            agent.process_turn("okay", "sess-1", &[]).await.expect("turn should succeed");

        assert!(!outcome.ptp_recorded);
        assert!(outcome.recorded_ptp.is_none());
    }

    #[tokio::test]
    async fn rejected_candidate_leaves_the_session_unchanged() {
        // 100 is below the 140.625 minimum for the demo snapshot.
        let model = ScriptedModel::new(vec![
            Ok("Let me check that amount.".to_string()),
            Ok(extraction_json(100.0, "2025-01-16")),
        ]);
        let sessions = Arc::new(InMemorySessionStore::new());
        let agent = agent_with(model.clone(), sessions.clone());

        let outcome = agent
            .process_turn("yes, 100 works", "sess-1", &[])
            .await
            .expect("turn should succeed");

        assert!(!outcome.ptp_recorded);
        let session = sessions.get("sess-1").await.expect("session should exist");
        assert!(!session.commitment_recorded);
        assert!(session.recorded_ptp.is_none());
    }

    #[tokio::test]
    async fn primary_model_failure_is_fatal_to_the_turn() {
        let model = ScriptedModel::new(vec![Err(ModelError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })]);
        let agent = agent_with(model, Arc::new(InMemorySessionStore::new()));

        let outcome = agent.process_turn("hello", "sess-1", &[]).await;
        assert!(matches!(outcome, Err(TurnError::Model(ModelError::Status { status: 503, .. }))));
    }

    #[tokio::test]
    async fn first_committed_wins_across_turns() {
        let model = ScriptedModel::new(vec![
            Ok("Recorded, thank you.".to_string()),
            Ok(extraction_json(150.0, "2025-01-16")),
            Ok("You are already set.".to_string()),
        ]);
        let sessions = Arc::new(InMemorySessionStore::new());
        let agent = agent_with(model.clone(), sessions.clone());

        let first = agent
            .process_turn("yes, 150 on the 16th", "sess-1", &[])
            .await
            .expect("turn should succeed");
        assert!(first.ptp_recorded);

        let second = agent
            .process_turn("actually yes, make it 300", "sess-1", &[])
            .await
            .expect("turn should succeed");

        assert_eq!(second.turn, 2);
        assert!(second.ptp_recorded);
        assert_eq!(second.recorded_ptp.expect("record should persist").amount, 150.00);
        // The commitment flag gates extraction, so turn two pays for a
        // single model call.
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn detector_runs_on_the_user_message_not_the_reply() {
        let model = ScriptedModel::new(vec![Ok(
            "Yes, I can offer a plan by next week.".to_string()
        )]);
        let agent = agent_with(model.clone(), Arc::new(InMemorySessionStore::new()));

        agent
            .process_turn("things are difficult", "sess-1", &[])
            .await
            .expect("turn should succeed");

        // The reply is full of markers but must not trigger extraction.
        assert_eq!(model.call_count(), 1);
    }
}
