// src/repair/orchestrator.rs
// The repair state machine: INIT -> ENTRY_VALIDATED(done) | ITERATING ->
// RESOLVED. Drives the backend through bounded, validator-guided steps.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::MermendConfig;
use crate::llm::{BackendEvent, BackendRequest, ContentBlock, Message, ModelBackend, TokenUsage};
use crate::tools::{validate_tool_schema, Proposal, ToolExecutor};
use crate::validator::{normalize, DiagramValidator};

use super::compactor::compact;
use super::prompt;
use super::resolver::{self, ResolvedVia};
use super::{FinalOutcome, RepairAttempt, RepairError, RunEvent};

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub max_steps: usize,
    pub max_hints: usize,
    pub run_timeout: std::time::Duration,
    pub max_tokens: u32,
}

impl RepairOptions {
    pub fn from_config(config: &MermendConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            max_hints: config.max_hints,
            run_timeout: config.run_timeout(),
            max_tokens: config.max_output_tokens,
        }
    }
}

/// Per-run bookkeeping. The backend-call counter is advisory debug
/// state scoped to this run; runs never share it.
#[derive(Debug, Default)]
struct RunContext {
    backend_calls: u32,
}

/// The current failing state, restated in every step prompt.
struct FailingState {
    code: String,
    error: Option<String>,
    hints: Vec<String>,
}

pub struct RepairOrchestrator {
    backend: Arc<dyn ModelBackend>,
    executor: ToolExecutor,
    options: RepairOptions,
}

impl RepairOrchestrator {
    pub fn new(backend: Arc<dyn ModelBackend>, options: RepairOptions) -> Self {
        let executor = ToolExecutor::new(DiagramValidator::new(options.max_hints));
        Self {
            backend,
            executor,
            options,
        }
    }

    pub fn validator(&self) -> &DiagramValidator {
        self.executor.validator()
    }

    /// Run one repair. `on_event` sees step-level events in order; the
    /// returned outcome is the authoritative summary. Only pre-loop
    /// conditions produce an error; everything mid-loop degrades into
    /// the outcome.
    pub async fn run<F>(&self, raw_code: &str, mut on_event: F) -> Result<FinalOutcome, RepairError>
    where
        F: FnMut(RunEvent) -> Result<()> + Send,
    {
        let source = normalize(raw_code);
        let entry = self.executor.validator().validate(&source);

        // Clearly unrelated input never costs a model call.
        if !entry.is_valid && !entry.is_likely_mermaid_like {
            return Err(RepairError::NotDiagramInput);
        }

        // Entry validation already passes: terminal success, zero calls.
        if entry.is_valid {
            info!("entry validation passed; no repair needed");
            return Ok(FinalOutcome {
                success: true,
                is_complete: true,
                fixed_code: source,
                explanation: "No changes required; the diagram is already valid.".to_string(),
                validated: true,
                validation_error: None,
                attempts: Vec::new(),
                usage: TokenUsage::default(),
                finish_reason: Some("entry_valid".to_string()),
                steps_count: 0,
            });
        }

        let deadline = tokio::time::Instant::now() + self.options.run_timeout;
        let mut ctx = RunContext::default();
        let mut messages: Vec<Message> = Vec::new();
        let mut attempts: Vec<RepairAttempt> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut finish_reason: Option<String> = None;
        let mut accumulated_text = String::new();
        let mut structured: Option<Proposal> = None;
        let mut failing = FailingState {
            code: source.clone(),
            error: entry.error_message.clone(),
            hints: entry.hints.clone(),
        };
        let mut steps_count = 0usize;
        let mut timed_out = false;
        let mut solved = false;

        'steps: for step in 1..=self.options.max_steps {
            if tokio::time::Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            steps_count = step;

            compact(&mut messages);
            messages.push(Message::user_text(prompt::step_prompt(
                step,
                &failing.code,
                failing.error.as_deref(),
                &failing.hints,
            )));

            let request = BackendRequest {
                system: prompt::SYSTEM_PROMPT.to_string(),
                messages: messages.clone(),
                tools: vec![validate_tool_schema()],
                max_tokens: self.options.max_tokens,
            };

            ctx.backend_calls += 1;
            debug!(step, backend_calls = ctx.backend_calls, "starting model round");

            // The whole round — connect and stream consumption — runs
            // under the run deadline, so a slow or hung backend cannot
            // outlive the wall-clock ceiling.
            let round = tokio::time::timeout_at(deadline, async {
                let mut stream = match self.backend.start(request).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(step, "backend failed to start round: {}", e);
                        on_event(RunEvent::Error { message: e.to_string() })
                            .map_err(RepairError::Sink)?;
                        return Ok(None);
                    }
                };

                let mut step_text = String::new();
                // Emission order matters: tool calls run strictly in the
                // order the backend produced them.
                let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();

                while let Some(event) = stream.next().await {
                    match event {
                        Ok(BackendEvent::TextDelta { delta }) => {
                            step_text.push_str(&delta);
                            on_event(RunEvent::TextDelta { delta }).map_err(RepairError::Sink)?;
                        }
                        Ok(BackendEvent::ToolCallStart { .. })
                        | Ok(BackendEvent::ToolCallArgumentsDelta { .. }) => {
                            // Only complete calls reach the transcript.
                        }
                        Ok(BackendEvent::ToolCallComplete { id, name, arguments }) => {
                            tool_calls.push((id, name, arguments));
                        }
                        Ok(BackendEvent::Done { usage: round_usage, finish_reason: reason }) => {
                            usage.add(&round_usage);
                            if reason.is_some() {
                                finish_reason = reason;
                            }
                        }
                        Ok(BackendEvent::Error { message }) => {
                            warn!(step, "backend error mid-round: {}", message);
                            on_event(RunEvent::Error { message }).map_err(RepairError::Sink)?;
                        }
                        Err(e) => {
                            warn!(step, "stream error mid-round: {}", e);
                            on_event(RunEvent::Error { message: e.to_string() })
                                .map_err(RepairError::Sink)?;
                        }
                    }
                }

                Ok::<_, RepairError>(Some((step_text, tool_calls)))
            })
            .await;

            let (step_text, tool_calls) = match round {
                Err(_) => {
                    warn!(step, "run deadline expired mid-round; dropping the backend stream");
                    timed_out = true;
                    break 'steps;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => break 'steps,
                Ok(Ok(Some(pair))) => pair,
            };

            accumulated_text.push_str(&step_text);

            // Record the assistant turn before its tool results.
            let mut blocks: Vec<ContentBlock> = Vec::new();
            if !step_text.is_empty() {
                blocks.push(ContentBlock::Text { text: step_text });
            }
            for (id, name, arguments) in &tool_calls {
                blocks.push(ContentBlock::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: arguments.clone(),
                });
            }
            if !blocks.is_empty() {
                messages.push(Message::assistant(blocks));
            }

            if tool_calls.is_empty() {
                // Terminal finish with no further tool calls: the model
                // declined to act. Stop and let the resolver report it.
                info!(step, ?finish_reason, "round produced no tool calls; stopping");
                break;
            }

            // Execute tool calls sequentially, each awaited before the
            // transcript moves on.
            for (id, name, arguments) in tool_calls {
                if let Some(proposal) = Proposal::from_arguments(&arguments) {
                    structured = Some(proposal);
                }
                on_event(RunEvent::ToolCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                })
                .map_err(RepairError::Sink)?;

                match self.executor.execute(&name, &arguments) {
                    Ok(output) => {
                        let validated = output["validated"].as_bool().unwrap_or(false);
                        let attempt = RepairAttempt {
                            candidate_code: output["candidateCode"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                            explanation: arguments["explanation"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                            validated,
                            validation_error: output["validationError"]
                                .as_str()
                                .map(ToString::to_string),
                        };

                        if validated {
                            solved = true;
                        } else {
                            failing = FailingState {
                                code: attempt.candidate_code.clone(),
                                error: attempt.validation_error.clone(),
                                hints: output["hints"]
                                    .as_array()
                                    .map(|a| {
                                        a.iter()
                                            .filter_map(|h| h.as_str().map(ToString::to_string))
                                            .collect()
                                    })
                                    .unwrap_or_default(),
                            };
                        }
                        attempts.push(attempt);

                        on_event(RunEvent::ToolResult {
                            name: name.clone(),
                            output: output.clone(),
                        })
                        .map_err(RepairError::Sink)?;
                        messages.push(Message::tool_result(id, name, output));
                    }
                    Err(e) => {
                        // A malformed call is feedback, not a crash.
                        warn!(step, tool = %name, "tool execution failed: {}", e);
                        let output = json!({"error": e.to_string()});
                        on_event(RunEvent::Error { message: e.to_string() })
                            .map_err(RepairError::Sink)?;
                        messages.push(Message::tool_result(id, name, output));
                    }
                }
            }

            if solved {
                info!(step, "validated candidate found; stopping");
                break;
            }
        }

        let resolution = resolver::resolve(&source, &attempts, structured.as_ref(), &accumulated_text);

        // The final verdict is always an independent re-validation of
        // the chosen code, never a copied claim.
        let final_check = self.executor.validator().validate(&resolution.fixed_code);
        if resolution.claimed_validated && !final_check.is_valid {
            warn!(
                via = ?resolution.via,
                "soundness violation: tool-reported validated=true contradicted by final re-validation"
            );
        }

        if timed_out {
            finish_reason = Some("timeout".to_string());
        } else if attempts.is_empty() && matches!(resolution.via, ResolvedVia::OriginalEcho) {
            // The model never called the tool: a reported outcome.
            info!("model never invoked the validation tool");
            finish_reason = finish_reason.or_else(|| Some("no_tool_call".to_string()));
        }

        let validated = final_check.is_valid;
        Ok(FinalOutcome {
            success: validated,
            is_complete: validated,
            fixed_code: resolution.fixed_code,
            explanation: resolution.explanation,
            validated,
            validation_error: final_check.error_message,
            attempts,
            usage,
            finish_reason,
            steps_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::BackendStream;
    use crate::tools::VALIDATE_TOOL;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays one scripted event list per round, in order.
    struct Scripted {
        rounds: Mutex<Vec<Vec<BackendEvent>>>,
    }

    impl Scripted {
        fn new(rounds: Vec<Vec<BackendEvent>>) -> Self {
            Self {
                rounds: Mutex::new(rounds),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn supports_native_tools(&self) -> bool {
            true
        }

        async fn start(&self, _request: BackendRequest) -> Result<BackendStream> {
            let mut rounds = self.rounds.lock().unwrap();
            let events = if rounds.is_empty() {
                Vec::new()
            } else {
                rounds.remove(0)
            };
            Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
        }
    }

    fn options(max_steps: usize) -> RepairOptions {
        RepairOptions {
            max_steps,
            max_hints: 4,
            run_timeout: Duration::from_secs(30),
            max_tokens: 1024,
        }
    }

    fn tool_call(n: usize, candidate: &str) -> BackendEvent {
        BackendEvent::ToolCallComplete {
            id: format!("call-{n}"),
            name: VALIDATE_TOOL.to_string(),
            arguments: json!({"candidateCode": candidate, "explanation": "fix"}),
        }
    }

    fn done() -> BackendEvent {
        BackendEvent::Done {
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: Some("tool_use".to_string()),
        }
    }

    #[tokio::test]
    async fn test_already_valid_input_makes_zero_calls() {
        let backend = Arc::new(Scripted::new(vec![]));
        let orchestrator = RepairOrchestrator::new(backend, options(3));

        let outcome = orchestrator
            .run("graph TD\n  A-->B", |_| Ok(()))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.validated);
        assert_eq!(outcome.steps_count, 0);
        assert!(outcome.attempts.is_empty());
        assert_eq!(outcome.usage.total_tokens, 0);
    }

    #[tokio::test]
    async fn test_non_diagram_input_rejected_before_any_call() {
        let backend = Arc::new(Scripted::new(vec![]));
        let orchestrator = RepairOrchestrator::new(backend, options(3));

        let err = orchestrator
            .run("SELECT * FROM users WHERE id = 1;", |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::NotDiagramInput));
    }

    #[tokio::test]
    async fn test_one_shot_fix_stops_after_first_validated_attempt() {
        let backend = Arc::new(Scripted::new(vec![vec![
            BackendEvent::TextDelta {
                delta: "Fixing the missing arrow.".to_string(),
            },
            tool_call(1, "graph TD\n  A-->B"),
            done(),
        ]]));
        let orchestrator = RepairOrchestrator::new(backend, options(3));

        let mut events = Vec::new();
        let outcome = orchestrator
            .run("graph TD\n  A[Start --> B", |e| {
                events.push(e);
                Ok(())
            })
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.fixed_code, "graph TD\n  A-->B");
        assert_eq!(outcome.steps_count, 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].validated);
        assert_eq!(outcome.usage.total_tokens, 15);
        // text delta, tool call, tool result.
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::ToolCall { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::ToolResult { .. })));
    }

    #[tokio::test]
    async fn test_unfixable_within_budget_reports_failure_honestly() {
        // Every round proposes another broken candidate.
        let rounds = (1..=3)
            .map(|n| vec![tool_call(n, &format!("graph TD\n  A[{n} --> B")), done()])
            .collect();
        let backend = Arc::new(Scripted::new(rounds));
        let orchestrator = RepairOrchestrator::new(backend, options(3));

        let outcome = orchestrator.run("graph TD\n  A[x --> B", |_| Ok(())).await.unwrap();

        assert!(!outcome.success);
        assert!(!outcome.validated);
        assert_eq!(outcome.steps_count, 3);
        assert_eq!(outcome.attempts.len(), 3);
        // Last attempt wins the fallback when nothing validated.
        assert_eq!(outcome.fixed_code, "graph TD\n  A[3 --> B");
        assert!(outcome.validation_error.is_some());
    }

    #[tokio::test]
    async fn test_no_tool_call_round_stops_loop_and_echoes_original() {
        let backend = Arc::new(Scripted::new(vec![vec![
            BackendEvent::TextDelta {
                delta: "I cannot repair this.".to_string(),
            },
            BackendEvent::Done {
                usage: TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
            },
        ]]));
        let orchestrator = RepairOrchestrator::new(backend, options(3));

        let outcome = orchestrator.run("graph TD\n  A[x --> B", |_| Ok(())).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.steps_count, 1);
        assert!(outcome.attempts.is_empty());
        assert!(outcome.fixed_code.contains("A[x --> B"));
        assert_eq!(outcome.explanation, "I cannot repair this.");
        assert_eq!(outcome.finish_reason.as_deref(), Some("stop"));
    }

    /// Streams one character every 20ms and never calls the tool, so a
    /// single round takes ~800ms of wall clock.
    struct SlowDrip;

    #[async_trait]
    impl ModelBackend for SlowDrip {
        fn name(&self) -> &'static str {
            "slow-drip"
        }

        fn supports_native_tools(&self) -> bool {
            true
        }

        async fn start(&self, _request: BackendRequest) -> Result<BackendStream> {
            let stream = async_stream::stream! {
                for _ in 0..40 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    yield Ok(BackendEvent::TextDelta { delta: "x".to_string() });
                }
                yield Ok(BackendEvent::Done {
                    usage: TokenUsage::default(),
                    finish_reason: Some("stop".to_string()),
                });
            };
            Ok(Box::pin(stream))
        }
    }

    #[tokio::test]
    async fn test_deadline_interrupts_an_inflight_round() {
        let mut opts = options(3);
        opts.run_timeout = Duration::from_millis(50);
        let orchestrator = RepairOrchestrator::new(Arc::new(SlowDrip), opts);

        let started = std::time::Instant::now();
        let outcome = orchestrator
            .run("graph TD\n  A[x --> B", |_| Ok(()))
            .await
            .unwrap();

        // The ceiling cut the 800ms round short instead of waiting for
        // the stream to drain.
        assert!(
            started.elapsed() < Duration::from_millis(400),
            "run outlived its deadline: {:?}",
            started.elapsed()
        );
        assert!(!outcome.success);
        assert_eq!(outcome.finish_reason.as_deref(), Some("timeout"));
        assert!(outcome.fixed_code.contains("A[x --> B"));
    }

    struct Unreachable;

    #[async_trait]
    impl ModelBackend for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn supports_native_tools(&self) -> bool {
            true
        }

        async fn start(&self, _request: BackendRequest) -> Result<BackendStream> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_backend_start_failure_degrades_to_echo() {
        let orchestrator = RepairOrchestrator::new(Arc::new(Unreachable), options(3));

        let mut errors = Vec::new();
        let outcome = orchestrator
            .run("graph TD\n  A[x --> B", |event| {
                if let RunEvent::Error { message } = event {
                    errors.push(message);
                }
                Ok(())
            })
            .await
            .unwrap();

        // One error event, then a degraded outcome instead of a crash.
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("connection refused"));
        assert!(!outcome.success);
        assert!(outcome.attempts.is_empty());
        assert!(outcome.fixed_code.contains("A[x --> B"));
        assert_eq!(outcome.steps_count, 1);
    }

    #[tokio::test]
    async fn test_second_step_succeeds_after_failed_first() {
        let backend = Arc::new(Scripted::new(vec![
            vec![tool_call(1, "graph TD\n  A[x --> B"), done()],
            vec![tool_call(2, "graph TD\n  A[x]-->B"), done()],
        ]));
        let orchestrator = RepairOrchestrator::new(backend, options(4));

        let outcome = orchestrator.run("graph TD\n  A[x -> B", |_| Ok(())).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.steps_count, 2);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].validated);
        assert!(outcome.attempts[1].validated);
        assert_eq!(outcome.fixed_code, "graph TD\n  A[x]-->B");
    }
}
