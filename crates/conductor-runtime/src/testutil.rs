//! Shared test utilities — scripted fakes for every collaborator boundary
//! and harness builders wiring the full runtime, previously copy-pasted
//! across test modules.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::collab::{
    ModelGenerator, ModelRequest, ModelResponse, NotificationSink, ToolExecutor, ToolOutcome,
    TurnPersister,
};
use conductor_core::CollabError;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::agent::decision::{Decision, DecisionEngine, TurnContext};
use crate::agent::decision_loop::{DecisionLoop, LoopConfig};
use crate::agent::registry::{AgentProfile, AgentRegistry};
use crate::agent::validation::{SelfValidator, ValidationVerdict};
use crate::bus::{Projection, WorkflowBus};
use crate::delegation::{DelegationRunner, DelegationSpec, SubagentInvoker, SubagentReport};
use crate::dispatcher::replay::BroadcastProjection;
use crate::dispatcher::Dispatcher;
use crate::gates::GateManager;
use crate::obligations::KeywordOverlapMatcher;
use crate::state::{AuditProjection, StateProjection};

// ─────────────────────────────────────────────────────────────────────────────
// Scripted decision engine
// ─────────────────────────────────────────────────────────────────────────────

/// Pops scripted decisions in order; once exhausted, returns the default
/// (`Continue` unless overridden).
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<Decision, String>>>,
    default: Decision,
    seen: Mutex<Vec<TurnContext>>,
}

impl ScriptedEngine {
    /// Script of successful decisions.
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self::new_with_errors(decisions.into_iter().map(Ok).collect())
    }

    /// Script that may include engine failures.
    pub fn new_with_errors(script: Vec<Result<Decision, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            default: Decision::Continue { note: None },
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Engine that returns the same decision forever.
    pub fn always(decision: Decision) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: decision,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every context the engine was asked to decide on, in order.
    pub fn contexts(&self) -> Vec<TurnContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn decide(&self, ctx: &TurnContext) -> Result<Decision, CollabError> {
        self.seen.lock().push(ctx.clone());
        match self.script.lock().pop_front() {
            Some(Ok(decision)) => Ok(decision),
            Some(Err(message)) => Err(CollabError::Provider(message)),
            None => Ok(self.default.clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake tool executor
// ─────────────────────────────────────────────────────────────────────────────

/// Returns configured outcomes per tool name; unknown tools succeed with an
/// empty object. Records every call for assertions.
pub struct FakeTools {
    results: Mutex<HashMap<String, ToolOutcome>>,
    calls: Mutex<Vec<(String, Value)>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeTools {
    /// Empty executor (all tools succeed).
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    /// Configure the outcome for one tool.
    pub fn set_result(&self, tool_name: &str, outcome: ToolOutcome) {
        let _ = self.results.lock().insert(tool_name.to_string(), outcome);
    }

    /// Delay every execution (for timeout tests).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Recorded `(tool_name, arguments)` calls, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ToolExecutor for FakeTools {
    async fn execute(&self, tool_name: &str, arguments: &Value) -> ToolOutcome {
        self.calls
            .lock()
            .push((tool_name.to_string(), arguments.clone()));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.results
            .lock()
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| ToolOutcome::ok(json!({}), 1))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake self-validator
// ─────────────────────────────────────────────────────────────────────────────

/// Pops scripted verdicts; once exhausted, passes everything.
pub struct FakeValidator {
    verdicts: Mutex<VecDeque<ValidationVerdict>>,
}

impl FakeValidator {
    /// Script of verdicts, consumed in order.
    pub fn new(verdicts: Vec<ValidationVerdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into_iter().collect()),
        }
    }
}

#[async_trait]
impl SelfValidator for FakeValidator {
    async fn validate(
        &self,
        _request: &str,
        _answer: &str,
    ) -> Result<ValidationVerdict, CollabError> {
        Ok(self
            .verdicts
            .lock()
            .pop_front()
            .unwrap_or_else(ValidationVerdict::pass))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake sub-agent invoker
// ─────────────────────────────────────────────────────────────────────────────

struct ScriptedRun {
    delay: Option<Duration>,
    result: Result<SubagentReport, String>,
}

/// Scripted sub-agent runs per target agent. Records the context each run
/// received so escalation-resumption tests can assert on it.
pub struct FakeInvoker {
    runs: Mutex<HashMap<String, VecDeque<ScriptedRun>>>,
    seen_contexts: Mutex<HashMap<String, Vec<Option<String>>>>,
}

impl FakeInvoker {
    /// Empty invoker (every run succeeds with a generic report).
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            seen_contexts: Mutex::new(HashMap::new()),
        }
    }

    fn push(&self, target: &str, run: ScriptedRun) {
        self.runs
            .lock()
            .entry(target.to_string())
            .or_default()
            .push_back(run);
    }

    /// Queue a successful run for a target.
    pub fn push_ok(&self, target: &str, report: SubagentReport) {
        self.push(
            target,
            ScriptedRun {
                delay: None,
                result: Ok(report),
            },
        );
    }

    /// Queue a successful run that settles after a delay.
    pub fn push_ok_after(&self, target: &str, delay: Duration, report: SubagentReport) {
        self.push(
            target,
            ScriptedRun {
                delay: Some(delay),
                result: Ok(report),
            },
        );
    }

    /// Queue a failing run for a target.
    pub fn push_err(&self, target: &str, error: &str) {
        self.push(
            target,
            ScriptedRun {
                delay: None,
                result: Err(error.to_string()),
            },
        );
    }

    /// Contexts passed to runs of a target, in order.
    pub fn contexts(&self, target: &str) -> Vec<Option<String>> {
        self.seen_contexts
            .lock()
            .get(target)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SubagentInvoker for FakeInvoker {
    async fn run(&self, spec: &DelegationSpec) -> Result<SubagentReport, CollabError> {
        self.seen_contexts
            .lock()
            .entry(spec.target_agent.clone())
            .or_default()
            .push(spec.context.clone());

        let run = self
            .runs
            .lock()
            .get_mut(&spec.target_agent)
            .and_then(VecDeque::pop_front);
        let Some(run) = run else {
            return Ok(SubagentReport {
                summary: format!("{} completed: {}", spec.target_agent, spec.objective),
                tool_evidence: vec![],
                escalation: None,
                partial: false,
            });
        };
        if let Some(delay) = run.delay {
            tokio::time::sleep(delay).await;
        }
        run.result.map_err(CollabError::Provider)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Records notifications; optionally fails every call.
#[derive(Default)]
pub struct RecordingNotifier {
    /// `(session_id, message)` pairs, in order.
    pub messages: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, session_id: &str, message: &str) {
        self.messages
            .lock()
            .push((session_id.to_string(), message.to_string()));
    }
}

/// Records persisted turns; fails when configured to.
#[derive(Default)]
pub struct RecordingPersister {
    /// `(session_id, turn_id, message)` triples, in order.
    pub turns: Mutex<Vec<(String, String, String)>>,
    /// When true, every persist call errors.
    pub fail: Mutex<bool>,
}

#[async_trait]
impl TurnPersister for RecordingPersister {
    async fn persist_turn(
        &self,
        session_id: &str,
        turn_id: &str,
        message: &str,
    ) -> Result<(), CollabError> {
        if *self.fail.lock() {
            return Err(CollabError::Provider("persistence unavailable".into()));
        }
        self.turns.lock().push((
            session_id.to_string(),
            turn_id.to_string(),
            message.to_string(),
        ));
        Ok(())
    }
}

/// Model stub that always returns the same content (for adapter tests).
pub struct CannedModel {
    /// Content every call returns.
    pub content: String,
}

#[async_trait]
impl ModelGenerator for CannedModel {
    async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, CollabError> {
        Ok(ModelResponse {
            content: self.content.clone(),
            tool_calls: vec![],
            finish_reason: conductor_core::collab::FinishReason::Stop,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harnesses
// ─────────────────────────────────────────────────────────────────────────────

/// Standard test registry: a coordinator plus a handful of specialists.
pub fn make_registry() -> Arc<AgentRegistry> {
    let profiles = [
        ("coordinator", true),
        ("researcher", false),
        ("x", false),
        ("y", false),
        ("z", false),
    ]
    .into_iter()
    .map(|(name, is_coordinator)| AgentProfile {
        name: name.into(),
        domain: "general".into(),
        description: format!("the {name} agent"),
        is_coordinator,
    })
    .collect();
    Arc::new(AgentRegistry::new(profiles).unwrap())
}

/// A fully wired decision loop over fakes, with handles to every piece.
pub struct LoopHarness {
    /// Shared bus (state projection registered).
    pub bus: Arc<WorkflowBus>,
    /// State projection handle.
    pub state: Arc<StateProjection>,
    /// The loop under test.
    pub decision_loop: DecisionLoop,
    engine: Arc<ScriptedEngine>,
    invoker: Arc<FakeInvoker>,
}

impl LoopHarness {
    /// Contexts the engine decided on.
    pub fn engine_contexts(&self) -> Vec<TurnContext> {
        self.engine.contexts()
    }

    /// Contexts passed to a delegate's runs.
    pub fn invoker_contexts(&self, target: &str) -> Vec<Option<String>> {
        self.invoker.contexts(target)
    }
}

/// The full runtime wired over fakes: bus → state → broadcast → audit, the
/// decision loop, and a dispatcher with recording sinks.
pub struct RuntimeHarness {
    /// The dispatcher under test.
    pub dispatcher: Dispatcher,
    /// Shared bus.
    pub bus: Arc<WorkflowBus>,
    /// State projection handle.
    pub state: Arc<StateProjection>,
    /// Client replay buffer handle.
    pub broadcast: Arc<BroadcastProjection>,
    /// Recording turn persister.
    pub persister: Arc<RecordingPersister>,
    /// Recording notifier.
    pub notifier: Arc<RecordingNotifier>,
}

/// Build a dispatcher harness with short timeouts suitable for tests.
pub fn runtime_harness(
    engine: ScriptedEngine,
    tools: FakeTools,
    validator: Option<FakeValidator>,
    invoker: FakeInvoker,
    max_iterations: u32,
) -> RuntimeHarness {
    let bus = Arc::new(WorkflowBus::new());
    let state = Arc::new(StateProjection::new());
    let broadcast = Arc::new(BroadcastProjection::new());
    bus.register(Arc::clone(&state) as Arc<dyn Projection>);
    bus.register(Arc::clone(&broadcast) as Arc<dyn Projection>);
    bus.register(Arc::new(AuditProjection::new()));

    let invoker = Arc::new(invoker);
    let delegations = DelegationRunner::with_timeout(
        Arc::clone(&invoker) as Arc<dyn SubagentInvoker>,
        Arc::clone(&bus),
        Arc::clone(&state),
        Duration::from_millis(500),
    );
    let gates = GateManager::new(Arc::clone(&bus), Arc::clone(&state));
    let decision_loop = Arc::new(DecisionLoop::new(
        LoopConfig {
            max_iterations,
            decision_timeout: Duration::from_millis(500),
            tool_timeout: Duration::from_millis(500),
            validation_confidence_floor: 0.6,
        },
        make_registry(),
        Arc::new(engine) as Arc<dyn DecisionEngine>,
        Arc::new(tools),
        validator.map(|v| Arc::new(v) as Arc<dyn SelfValidator>),
        delegations,
        gates.clone(),
        Arc::clone(&bus),
        Arc::clone(&state),
    ));

    let persister = Arc::new(RecordingPersister::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = Dispatcher::new(
        Arc::clone(&bus),
        Arc::clone(&state),
        Arc::clone(&broadcast),
        decision_loop,
        gates,
        Arc::new(KeywordOverlapMatcher::default()),
        Arc::clone(&persister) as Arc<dyn TurnPersister>,
        Arc::clone(&notifier) as Arc<dyn NotificationSink>,
    );

    RuntimeHarness {
        dispatcher,
        bus,
        state,
        broadcast,
        persister,
        notifier,
    }
}

/// Build a loop harness with short timeouts suitable for tests.
pub fn loop_harness(
    engine: ScriptedEngine,
    tools: FakeTools,
    validator: Option<FakeValidator>,
    invoker: FakeInvoker,
    max_iterations: u32,
) -> LoopHarness {
    let bus = Arc::new(WorkflowBus::new());
    let state = Arc::new(StateProjection::new());
    bus.register(Arc::clone(&state) as Arc<dyn Projection>);
    bus.register(Arc::new(AuditProjection::new()));

    let engine = Arc::new(engine);
    let invoker = Arc::new(invoker);
    let delegations = DelegationRunner::with_timeout(
        Arc::clone(&invoker) as Arc<dyn SubagentInvoker>,
        Arc::clone(&bus),
        Arc::clone(&state),
        Duration::from_millis(500),
    );
    let gates = GateManager::new(Arc::clone(&bus), Arc::clone(&state));
    let decision_loop = DecisionLoop::new(
        LoopConfig {
            max_iterations,
            decision_timeout: Duration::from_millis(500),
            tool_timeout: Duration::from_millis(500),
            validation_confidence_floor: 0.6,
        },
        make_registry(),
        Arc::clone(&engine) as Arc<dyn DecisionEngine>,
        Arc::new(tools),
        validator.map(|v| Arc::new(v) as Arc<dyn SelfValidator>),
        delegations,
        gates,
        Arc::clone(&bus),
        Arc::clone(&state),
    );

    LoopHarness {
        bus,
        state,
        decision_loop,
        engine,
        invoker,
    }
}
