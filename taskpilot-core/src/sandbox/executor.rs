use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::capture::{LogCapture, LogLevel};
use crate::config::{deadline_after, SandboxConfig};
use crate::error::PilotError;
use crate::models::{ExecutionResult, ToolResult};
use crate::tools::ToolRegistry;

/// Error text of a run that exceeded its time budget.
pub const TIMEOUT_ERROR: &str = "timed out";

/// Error text of a run stopped through its [`AbortSignal`].
pub const ABORTED_ERROR: &str = "aborted";

/// Slack given to the worker to notice its own deadline before the caller
/// gives up on it.
const JOIN_GRACE: Duration = Duration::from_millis(250);

/// Shared, sticky cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which registry tools a run may call, and the scope value injected into
/// each call.
#[derive(Debug, Clone, Default)]
pub struct ToolBindings {
    /// `None` binds every registered tool.
    tools: Option<Vec<String>>,
    scope: Option<(String, String)>,
}

impl ToolBindings {
    /// No tools at all.
    pub fn none() -> Self {
        Self {
            tools: Some(Vec::new()),
            scope: None,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: Some(names.into_iter().map(Into::into).collect()),
            scope: None,
        }
    }

    /// Inject `key: value` into every call whose tool declares `key` and
    /// whose arguments leave it out.
    pub fn with_scope(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.scope = Some((key.into(), value.into()));
        self
    }
}

struct RunState {
    capture: LogCapture,
    tools_invoked: Vec<String>,
    artifacts: Vec<String>,
}

type SharedState = Arc<Mutex<RunState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
struct StopCheck {
    deadline: Instant,
    stop: AbortSignal,
    external: AbortSignal,
}

impl StopCheck {
    fn reason(&self) -> Option<&'static str> {
        if self.external.is_aborted() {
            Some(ABORTED_ERROR)
        } else if self.stop.is_aborted() || Instant::now() >= self.deadline {
            Some(TIMEOUT_ERROR)
        } else {
            None
        }
    }
}

fn terminated(reason: &str) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorTerminated(
        Dynamic::from(reason.to_string()),
        Position::NONE,
    ))
}

/// Bridges a synchronous script call to the async tool registry.
struct ToolCaller {
    name: String,
    scope: Option<(String, String)>,
    registry: Arc<ToolRegistry>,
    handle: Handle,
    state: SharedState,
    stop: StopCheck,
}

impl ToolCaller {
    fn call(&self, args: Map) -> Result<Dynamic, Box<EvalAltResult>> {
        lock(&self.state).tools_invoked.push(self.name.clone());

        let mut json: Value = rhai::serde::from_dynamic(&Dynamic::from_map(args))?;
        if let (Some((key, value)), Value::Object(obj)) = (&self.scope, &mut json) {
            obj.entry(key.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }

        if let Some(reason) = self.stop.reason() {
            return Err(terminated(reason));
        }
        let remaining = self.stop.deadline.saturating_duration_since(Instant::now());

        let registry = self.registry.clone();
        let name = self.name.clone();
        let outcome = self.handle.block_on(async move {
            tokio::time::timeout(remaining, registry.execute(&name, json)).await
        });

        let result = match outcome {
            Ok(result) => result,
            Err(_) => return Err(terminated(TIMEOUT_ERROR)),
        };

        lock(&self.state)
            .artifacts
            .extend(result.artifacts.iter().cloned());
        Ok(result_to_dynamic(&result))
    }
}

fn result_to_dynamic(result: &ToolResult) -> Dynamic {
    let mut map = Map::new();
    map.insert("success".into(), Dynamic::from(result.success));
    map.insert("output".into(), Dynamic::from(result.output.clone()));
    map.insert(
        "error".into(),
        result
            .error
            .clone()
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT),
    );
    map.insert(
        "artifacts".into(),
        Dynamic::from_array(result.artifacts.iter().cloned().map(Dynamic::from).collect()),
    );
    Dynamic::from_map(map)
}

struct BoundTool {
    name: String,
    inject_scope: bool,
}

fn build_engine(
    config: &SandboxConfig,
    state: SharedState,
    stop: StopCheck,
    tools: Vec<BoundTool>,
    scope: Option<(String, String)>,
    registry: Arc<ToolRegistry>,
    handle: Handle,
) -> Engine {
    let mut engine = Engine::new();

    engine.disable_symbol("eval");
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.set_max_operations(config.max_operations.unwrap_or(0));
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);

    let s = state.clone();
    engine.on_print(move |text| lock(&s).capture.push(LogLevel::Info, text));
    let s = state.clone();
    engine.on_debug(move |text, _source, _pos| lock(&s).capture.push(LogLevel::Debug, text));

    let progress = stop.clone();
    engine.on_progress(move |_ops| progress.reason().map(|r| Dynamic::from(r.to_string())));

    let s = state.clone();
    engine.register_fn("log_warn", move |value: Dynamic| {
        lock(&s).capture.push(LogLevel::Warn, &value.to_string())
    });
    let s = state.clone();
    engine.register_fn("log_error", move |value: Dynamic| {
        lock(&s).capture.push(LogLevel::Error, &value.to_string())
    });

    engine.register_fn(
        "json_stringify",
        |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let json: Value = rhai::serde::from_dynamic(&value)?;
            serde_json::to_string(&json).map_err(|e| e.to_string().into())
        },
    );
    engine.register_fn(
        "json_parse",
        |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let json: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
            rhai::serde::to_dynamic(json)
        },
    );
    engine.register_fn("now_iso", || chrono::Utc::now().to_rfc3339());

    for tool in tools {
        let caller = Arc::new(ToolCaller {
            scope: if tool.inject_scope { scope.clone() } else { None },
            name: tool.name.clone(),
            registry: registry.clone(),
            handle: handle.clone(),
            state: state.clone(),
            stop: stop.clone(),
        });

        let c = caller.clone();
        engine.register_fn(tool.name.as_str(), move |args: Map| c.call(args));
        let c = caller;
        engine.register_fn(tool.name.as_str(), move || c.call(Map::new()));
    }

    engine
}

fn stop_reason(err: &EvalAltResult) -> Option<String> {
    match err {
        EvalAltResult::ErrorTerminated(token, _) => Some(token.to_string()),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => stop_reason(inner),
        _ => None,
    }
}

fn describe_error(err: Box<EvalAltResult>) -> String {
    match stop_reason(&err) {
        Some(reason) if reason == ABORTED_ERROR => ABORTED_ERROR.to_string(),
        Some(_) => TIMEOUT_ERROR.to_string(),
        None => err.to_string(),
    }
}

/// Escape `text` for use inside a double-quoted script string literal.
pub fn escape_string_literal(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn render_value(value: Dynamic) -> Option<String> {
    if value.is_unit() {
        None
    } else if value.is_string() {
        value.into_string().ok()
    } else {
        Some(value.to_string())
    }
}

/// Runs generated scripts in a fresh, time-bounded Rhai engine per call.
///
/// The engine has no filesystem, network or process access. Scripts reach
/// the outside world only through the tool functions bound for the run.
pub struct SandboxExecutor {
    registry: Arc<ToolRegistry>,
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: SandboxConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        code: &str,
        bindings: &ToolBindings,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        self.execute_with_signal(code, bindings, timeout, AbortSignal::new())
            .await
    }

    /// Like [`execute`](Self::execute), but `signal` stops the script early
    /// with the `aborted` error.
    pub async fn execute_with_signal(
        &self,
        code: &str,
        bindings: &ToolBindings,
        timeout: Option<Duration>,
        signal: AbortSignal,
    ) -> ExecutionResult {
        let start = Instant::now();
        let timeout = self.config.effective_timeout(timeout);

        let infos = self.registry.list_tools().await;
        let tools: Vec<BoundTool> = match &bindings.tools {
            None => infos
                .iter()
                .map(|info| BoundTool {
                    name: info.name.clone(),
                    inject_scope: scope_applies(bindings, info),
                })
                .collect(),
            Some(names) => names
                .iter()
                .filter(|name| crate::tools::is_valid_tool_name(name))
                .map(|name| BoundTool {
                    name: name.clone(),
                    inject_scope: infos
                        .iter()
                        .find(|info| &info.name == name)
                        .map(|info| scope_applies(bindings, info))
                        .unwrap_or(false),
                })
                .collect(),
        };

        let state: SharedState = Arc::new(Mutex::new(RunState {
            capture: LogCapture::new(self.config.max_log_lines, self.config.max_log_line_chars),
            tools_invoked: Vec::new(),
            artifacts: Vec::new(),
        }));
        let stop = StopCheck {
            deadline: deadline_after(start, timeout),
            stop: AbortSignal::new(),
            external: signal,
        };

        let worker = {
            let config = self.config.clone();
            let state = state.clone();
            let stop = stop.clone();
            let scope = bindings.scope.clone();
            let registry = self.registry.clone();
            let handle = Handle::current();
            let code = code.to_string();

            tokio::task::spawn_blocking(move || -> Result<Dynamic, String> {
                let engine = build_engine(&config, state, stop, tools, scope, registry, handle);
                let ast = engine
                    .compile(&code)
                    .map_err(|e| format!("Syntax error: {}", e))?;
                let mut scope = Scope::new();
                engine
                    .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
                    .map_err(describe_error)
            })
        };

        let join_budget = timeout.saturating_add(JOIN_GRACE);
        let (return_value, error) = match tokio::time::timeout(join_budget, worker).await {
            Ok(Ok(Ok(value))) => (render_value(value), None),
            Ok(Ok(Err(message))) => (None, Some(message)),
            Ok(Err(join_err)) => (
                None,
                Some(PilotError::SandboxCrashed(join_err.to_string()).to_string()),
            ),
            Err(_) => {
                stop.stop.abort();
                (None, Some(TIMEOUT_ERROR.to_string()))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let state = lock(&state);
        let output = state.capture.render(return_value.as_deref());

        match error.as_deref() {
            Some(TIMEOUT_ERROR) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                duration_ms, "Sandbox execution timed out"
            ),
            Some(message) => debug!(duration_ms, "Sandbox execution failed: {}", message),
            None => debug!(
                duration_ms,
                tools = state.tools_invoked.len(),
                "Sandbox execution finished"
            ),
        }

        ExecutionResult {
            code: code.to_string(),
            output,
            artifacts: state.artifacts.clone(),
            error,
            tools_invoked: state.tools_invoked.clone(),
            return_value,
            duration_ms,
        }
    }
}

fn scope_applies(bindings: &ToolBindings, info: &crate::tools::ToolInfo) -> bool {
    bindings
        .scope
        .as_ref()
        .map(|(key, _)| info.has_parameter(key))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(Arc::new(ToolRegistry::new()), SandboxConfig::default())
    }

    #[tokio::test]
    async fn test_output_and_return_value() {
        let result = executor()
            .execute("print(\"hello\"); 40 + 2", &ToolBindings::none(), None)
            .await;
        assert!(result.is_success());
        assert_eq!(result.output, "hello\n=> 42");
        assert_eq!(result.return_value.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_runtime_error_is_captured() {
        let result = executor()
            .execute(
                "print(\"before\"); throw \"broken\";",
                &ToolBindings::none(),
                None,
            )
            .await;
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("broken"));
        assert_eq!(result.output, "before");
    }

    #[tokio::test]
    async fn test_syntax_error() {
        let result = executor()
            .execute("let x = ;", &ToolBindings::none(), None)
            .await;
        assert!(result.error.unwrap().starts_with("Syntax error"));
    }

    #[tokio::test]
    async fn test_eval_is_disabled() {
        let result = executor()
            .execute("eval(\"1 + 1\")", &ToolBindings::none(), None)
            .await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_stderr_block() {
        let result = executor()
            .execute(
                "print(\"ok\"); log_error(\"disk full\"); \"\"",
                &ToolBindings::none(),
                None,
            )
            .await;
        assert!(result.is_success());
        assert_eq!(result.output, "ok\n[stderr]\ndisk full");
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let result = executor()
            .execute(
                "let v = json_parse(\"{\\\"a\\\": [1, 2]}\"); v.a.len()",
                &ToolBindings::none(),
                None,
            )
            .await;
        assert_eq!(result.return_value.as_deref(), Some("2"));

        let result = executor()
            .execute("json_stringify(#{ n: 1 })", &ToolBindings::none(), None)
            .await;
        assert_eq!(result.return_value.as_deref(), Some("{\"n\":1}"));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let started = Instant::now();
        let result = executor()
            .execute(
                "print(\"spinning\"); loop { }",
                &ToolBindings::none(),
                Some(Duration::from_millis(100)),
            )
            .await;
        assert!(result.timed_out());
        assert_eq!(result.output, "spinning");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_abort_signal() {
        let signal = AbortSignal::new();
        signal.abort();
        let result = executor()
            .execute_with_signal("loop { }", &ToolBindings::none(), None, signal)
            .await;
        assert_eq!(result.error.as_deref(), Some(ABORTED_ERROR));
    }
}
