// tests/repair_loop.rs
// End-to-end repair loop behavior over scripted backends, native and
// emulated, without any network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use mermend::llm::{BackendEvent, BackendRequest, BackendStream, ModelBackend, TokenUsage};
use mermend::repair::orchestrator::{RepairOptions, RepairOrchestrator};
use mermend::repair::{RepairError, RunEvent};
use mermend::llm::emulation::JsonToolEmulation;
use mermend::validator::DiagramValidator;

/// Replays one scripted event list per round and counts rounds started.
struct ScriptedBackend {
    rounds: Mutex<Vec<Vec<BackendEvent>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(rounds: Vec<Vec<BackendEvent>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn start(&self, _request: BackendRequest) -> Result<BackendStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rounds = self.rounds.lock().unwrap();
        let events = if rounds.is_empty() {
            Vec::new()
        } else {
            rounds.remove(0)
        };
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

/// Text-only scripted backend for the emulation path.
struct TextOnlyBackend {
    rounds: Mutex<Vec<Vec<&'static str>>>,
}

#[async_trait]
impl ModelBackend for TextOnlyBackend {
    fn name(&self) -> &'static str {
        "text-only"
    }

    async fn start(&self, request: BackendRequest) -> Result<BackendStream> {
        // The emulation decorator must have stripped declared tools.
        assert!(request.tools.is_empty());
        let mut rounds = self.rounds.lock().unwrap();
        let parts = if rounds.is_empty() {
            Vec::new()
        } else {
            rounds.remove(0)
        };
        let mut events: Vec<Result<BackendEvent>> = parts
            .into_iter()
            .map(|p| Ok(BackendEvent::TextDelta { delta: p.to_string() }))
            .collect();
        events.push(Ok(BackendEvent::Done {
            usage: TokenUsage::default(),
            finish_reason: Some("stop".to_string()),
        }));
        Ok(Box::pin(futures::stream::iter(events)))
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

fn tool_call(candidate: &str) -> BackendEvent {
    BackendEvent::ToolCallComplete {
        id: "call-1".to_string(),
        name: "validate_diagram".to_string(),
        arguments: json!({"candidateCode": candidate, "explanation": "fix"}),
    }
}

fn done() -> BackendEvent {
    BackendEvent::Done {
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
        },
        finish_reason: Some("tool_use".to_string()),
    }
}

#[tokio::test]
async fn valid_input_short_circuits_without_model_calls() {
    let backend = ScriptedBackend::new(vec![]);
    let orchestrator = RepairOrchestrator::new(backend.clone(), options(4));

    let outcome = orchestrator
        .run("sequenceDiagram\nAlice->>Bob: hello", |_| Ok(()))
        .await
        .unwrap();

    assert!(outcome.success && outcome.is_complete && outcome.validated);
    assert_eq!(outcome.steps_count, 0);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn fenced_input_is_normalized_before_entry_validation() {
    let backend = ScriptedBackend::new(vec![]);
    let orchestrator = RepairOrchestrator::new(backend.clone(), options(4));

    let outcome = orchestrator
        .run("```mermaid\ngraph TD\n  A-->B\n```", |_| Ok(()))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.fixed_code, "graph TD\n  A-->B");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn unrelated_text_never_reaches_the_backend() {
    let backend = ScriptedBackend::new(vec![]);
    let orchestrator = RepairOrchestrator::new(backend.clone(), options(4));

    let err = orchestrator
        .run("Dear team,\n\nPlease find attached the quarterly report.", |_| Ok(()))
        .await
        .unwrap_err();

    assert!(matches!(err, RepairError::NotDiagramInput));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn loop_terminates_at_step_budget_even_with_rounds_left() {
    // Seed more broken rounds than the budget allows.
    let rounds: Vec<Vec<BackendEvent>> = (0..10)
        .map(|n| vec![tool_call(&format!("graph TD\n  A[broken {n} --> B")), done()])
        .collect();
    let backend = ScriptedBackend::new(rounds);
    let orchestrator = RepairOrchestrator::new(backend.clone(), options(3));

    let outcome = orchestrator
        .run("graph TD\n  A[start --> B", |_| Ok(()))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.steps_count, 3);
    assert_eq!(backend.calls(), 3);
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(outcome.usage.total_tokens, 360);
}

#[tokio::test]
async fn validated_attempt_ends_the_loop_early() {
    let rounds = vec![
        vec![tool_call("graph TD\n  A[still broken --> B"), done()],
        vec![tool_call("graph TD\n  A[ok]-->B"), done()],
        vec![tool_call("graph TD\n  never-->consumed"), done()],
    ];
    let backend = ScriptedBackend::new(rounds);
    let orchestrator = RepairOrchestrator::new(backend.clone(), options(5));

    let outcome = orchestrator
        .run("graph TD\n  A[start --> B", |_| Ok(()))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.fixed_code, "graph TD\n  A[ok]-->B");
    assert_eq!(backend.calls(), 2);
    assert_eq!(outcome.steps_count, 2);
}

#[tokio::test]
async fn outcome_validity_always_matches_an_independent_check() {
    // Whatever path resolution takes, `validated` must agree with the
    // validator run fresh over the returned code.
    let cases: Vec<Vec<Vec<BackendEvent>>> = vec![
        vec![vec![tool_call("graph TD\n  A-->B"), done()]],
        vec![vec![tool_call("graph TD\n  A[bad --> B"), done()]],
        vec![vec![BackendEvent::TextDelta { delta: "no idea".into() }, done()]],
    ];
    for rounds in cases {
        let backend = ScriptedBackend::new(rounds);
        let orchestrator = RepairOrchestrator::new(backend, options(2));
        let outcome = orchestrator
            .run("graph TD\n  A[start --> B", |_| Ok(()))
            .await
            .unwrap();

        let fresh = DiagramValidator::new(4).validate(&outcome.fixed_code);
        assert_eq!(outcome.validated, fresh.is_valid);
        assert_eq!(outcome.success, fresh.is_valid);
    }
}

#[tokio::test]
async fn events_arrive_in_execution_order() {
    let rounds = vec![vec![
        BackendEvent::TextDelta { delta: "Fixing.".into() },
        tool_call("graph TD\n  A-->B"),
        done(),
    ]];
    let backend = ScriptedBackend::new(rounds);
    let orchestrator = RepairOrchestrator::new(backend, options(2));

    let mut kinds = Vec::new();
    orchestrator
        .run("graph TD\n  A[start --> B", |event| {
            kinds.push(match event {
                RunEvent::TextDelta { .. } => "text",
                RunEvent::ToolCall { .. } => "call",
                RunEvent::ToolResult { .. } => "result",
                RunEvent::Error { .. } => "error",
            });
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(kinds, vec!["text", "call", "result"]);
}

#[tokio::test]
async fn emulated_backend_repairs_end_to_end() {
    let inner = Arc::new(TextOnlyBackend {
        rounds: Mutex::new(vec![vec![
            "{\"candidateCode\": \"graph TD\\n  A[ok]-->B\", ",
            "\"explanation\": \"closed the bracket\"}",
        ]]),
    });
    let backend = Arc::new(JsonToolEmulation::new(inner));
    let orchestrator = RepairOrchestrator::new(backend, options(3));

    let outcome = orchestrator
        .run("graph TD\n  A[ok --> B", |_| Ok(()))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.fixed_code, "graph TD\n  A[ok]-->B");
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.attempts[0].validated);
    assert_eq!(outcome.attempts[0].explanation, "closed the bracket");
}

#[tokio::test]
async fn emulated_backend_rambling_falls_back_to_raw_text() {
    let inner = Arc::new(TextOnlyBackend {
        rounds: Mutex::new(vec![
            vec!["I am not sure what to do here."],
        ]),
    });
    let backend = Arc::new(JsonToolEmulation::new(inner));
    let orchestrator = RepairOrchestrator::new(backend, options(2));

    let outcome = orchestrator
        .run("graph TD\n  A[ok --> B", |_| Ok(()))
        .await
        .unwrap();

    // No tool call ever happened; the original comes back with the raw
    // text as explanation, honestly marked invalid.
    assert!(!outcome.success);
    assert!(outcome.fixed_code.contains("A[ok --> B"));
    assert_eq!(outcome.explanation, "I am not sure what to do here.");
    assert!(outcome.attempts.is_empty());
}

#[tokio::test]
async fn sink_failure_aborts_the_run() {
    let rounds = vec![vec![
        BackendEvent::TextDelta { delta: "working".into() },
        tool_call("graph TD\n  A-->B"),
        done(),
    ]];
    let backend = ScriptedBackend::new(rounds);
    let orchestrator = RepairOrchestrator::new(backend, options(2));

    let err = orchestrator
        .run("graph TD\n  A[start --> B", |_| {
            Err(anyhow::anyhow!("client went away"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RepairError::Sink(_)));
}
