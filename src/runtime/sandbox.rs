//! Function invoker: sandboxed Lua transforms
//!
//! Each invocation gets a fresh Lua state on the blocking pool with only the
//! table, string, math and utf8 libraries loaded. The payload and merged
//! configuration are copied in as `payload` and `config` globals; the chunk's
//! return value is copied back out as the new payload. An instruction hook
//! enforces the time budget, the allocator limit bounds memory, and a
//! wall-clock timeout backs both.

use crate::config::EngineConfig;
use crate::flow::types::{Function, Payload};
use crate::runtime::overlay_config;
use chrono::{DateTime, Utc};
use mlua::{
    DeserializeOptions, HookTriggers, Lua, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib,
    Variadic, VmState,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Instructions between two deadline checks
const HOOK_INSTRUCTION_INTERVAL: u32 = 1_000;

/// Extra wall-clock allowance before the blocking task is abandoned
const WALL_CLOCK_GRACE: Duration = Duration::from_millis(250);

/// Base library entries that reach outside the sandbox
const REMOVED_GLOBALS: [&str; 5] = ["dofile", "loadfile", "load", "require", "collectgarbage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionFailureKind {
    /// The script raised an error or failed to compile
    Script,
    /// The time budget ran out
    Timeout,
    /// The memory limit was hit
    Resource,
    /// The script returned nothing usable as a payload
    InvalidOutput,
    /// Required configuration is missing
    Configuration,
}

impl std::fmt::Display for FunctionFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FunctionFailureKind::Script => "script",
            FunctionFailureKind::Timeout => "timeout",
            FunctionFailureKind::Resource => "resource",
            FunctionFailureKind::InvalidOutput => "invalid_output",
            FunctionFailureKind::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// Structured failure of a function node
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct FunctionFailure {
    pub kind: FunctionFailureKind,
    pub message: String,
    /// Lua stack traceback, when the script produced one
    pub stack: Option<String>,
}

impl FunctionFailure {
    fn new(kind: FunctionFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
        }
    }

    /// Split mlua's "message\nstack traceback:..." rendering
    fn from_lua_error(error: &mlua::Error) -> Self {
        let rendered = error.to_string();
        let kind = if matches!(error, mlua::Error::MemoryError(_)) || rendered.contains("not enough memory") {
            FunctionFailureKind::Resource
        } else {
            FunctionFailureKind::Script
        };

        match rendered.split_once("\nstack traceback:") {
            Some((message, stack)) => Self {
                kind,
                message: message.trim().to_string(),
                stack: Some(format!("stack traceback:{}", stack)),
            },
            None => Self::new(kind, rendered),
        }
    }
}

/// Everything captured about one invocation
#[derive(Debug, Clone)]
pub struct FunctionInvocation {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: Result<Payload, FunctionFailure>,
}

/// Runs function scripts under the configured time and memory budgets
#[derive(Debug, Clone)]
pub struct FunctionInvoker {
    timeout: Duration,
    memory_limit: usize,
}

impl FunctionInvoker {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_limits(config.function_timeout(), config.function_memory_limit)
    }

    pub fn with_limits(timeout: Duration, memory_limit: usize) -> Self {
        Self {
            timeout,
            memory_limit,
        }
    }

    /// Execute `function` against `payload`
    ///
    /// Never fails: script errors, timeouts and bad output are returned as
    /// a `FunctionFailure` in the invocation result. The caller's payload is
    /// only read.
    pub async fn invoke(&self, function: &Function, node_config: &Value, payload: &Payload) -> FunctionInvocation {
        let started_at = Utc::now();
        tracing::debug!("🧠 Invoking function '{}' ({})", function.name, function.id);

        let result = match resolve_config(function, node_config) {
            Ok(config) => self.run_script(function.code.clone(), config, payload.to_value()).await,
            Err(failure) => Err(failure),
        };

        if let Err(failure) = &result {
            tracing::warn!("⚠️ Function '{}' failed: {}", function.id, failure);
        }

        FunctionInvocation {
            started_at,
            finished_at: Utc::now(),
            result: result.map(Payload::new),
        }
    }

    async fn run_script(&self, code: String, config: Value, input: Value) -> Result<Value, FunctionFailure> {
        let budget = self.timeout;
        let memory_limit = self.memory_limit;
        let task = tokio::task::spawn_blocking(move || execute_sandboxed(&code, &config, &input, budget, memory_limit));

        match tokio::time::timeout(budget + WALL_CLOCK_GRACE, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(FunctionFailure::new(
                FunctionFailureKind::Script,
                format!("sandbox task aborted: {}", join_error),
            )),
            Err(_) => Err(FunctionFailure::new(
                FunctionFailureKind::Timeout,
                format!("exceeded wall-clock budget of {:?}", budget),
            )),
        }
    }
}

/// Build the `config` global: parameter defaults, then function config, then node config
pub fn resolve_config(function: &Function, node_config: &Value) -> Result<Value, FunctionFailure> {
    let mut merged = Map::new();
    for parameter in &function.parameters {
        if let Some(default) = &parameter.default {
            merged.insert(parameter.name.clone(), default.clone());
        }
    }
    let merged = overlay_config(&overlay_config(&Value::Object(merged), &function.config), node_config);

    for parameter in function.parameters.iter().filter(|p| p.required) {
        if merged.get(&parameter.name).map_or(true, Value::is_null) {
            return Err(FunctionFailure::new(
                FunctionFailureKind::Configuration,
                format!("missing required parameter '{}'", parameter.name),
            ));
        }
    }

    Ok(merged)
}

/// Synchronous body of an invocation, run on the blocking pool
fn execute_sandboxed(
    code: &str,
    config: &Value,
    input: &Value,
    budget: Duration,
    memory_limit: usize,
) -> Result<Value, FunctionFailure> {
    let lua = new_sandbox(memory_limit).map_err(|e| FunctionFailure::from_lua_error(&e))?;

    let expired = install_deadline(&lua, Instant::now() + budget)?;

    // JSON null becomes nil rather than mlua's null sentinel
    let to_lua_options = || {
        SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false)
    };
    let globals = lua.globals();
    let bind = || -> mlua::Result<()> {
        globals.set("payload", lua.to_value_with(input, to_lua_options())?)?;
        globals.set("config", lua.to_value_with(config, to_lua_options())?)?;
        Ok(())
    };
    bind().map_err(|e| FunctionFailure::from_lua_error(&e))?;

    let returned = lua.load(code).set_name("function").eval::<mlua::Value>();

    match returned {
        Err(_) if expired.load(Ordering::Relaxed) => Err(FunctionFailure::new(
            FunctionFailureKind::Timeout,
            format!("exceeded time budget of {:?}", budget),
        )),
        Err(e) => Err(FunctionFailure::from_lua_error(&e)),
        Ok(mlua::Value::Nil) => Err(FunctionFailure::new(
            FunctionFailureKind::InvalidOutput,
            "function returned no payload",
        )),
        Ok(value) => lua
            .from_value_with::<Value>(value, DeserializeOptions::new().deny_unsupported_types(false))
            .map_err(|e| {
                FunctionFailure::new(
                    FunctionFailureKind::InvalidOutput,
                    format!("returned value is not a JSON payload: {}", e),
                )
            }),
    }
}

/// Abort the script once `deadline` passes
///
/// The returned flag is set when the hook fired. A script never runs
/// without this hook in place.
fn install_deadline(lua: &Lua, deadline: Instant) -> Result<Arc<AtomicBool>, FunctionFailure> {
    let expired = Arc::new(AtomicBool::new(false));
    let hook_expired = Arc::clone(&expired);
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                hook_expired.store(true, Ordering::Relaxed);
                Err(mlua::Error::runtime("time budget exceeded"))
            } else {
                Ok(VmState::Continue)
            }
        },
    )
    .map_err(|e| {
        FunctionFailure::new(
            FunctionFailureKind::Resource,
            format!("could not install time limit: {}", e),
        )
    })?;

    Ok(expired)
}

/// Fresh Lua state with host access stripped and the helper API installed
fn new_sandbox(memory_limit: usize) -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
        LuaOptions::new(),
    )?;
    lua.set_memory_limit(memory_limit)?;

    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.set(name, mlua::Nil)?;
    }

    // Safe time functions (replace os.date, os.time)
    globals.set(
        "now",
        lua.create_function(|_, ()| Ok(Utc::now().to_rfc3339()))?,
    )?;
    globals.set(
        "time",
        lua.create_function(|_, ()| Ok(Utc::now().timestamp()))?,
    )?;
    globals.set(
        "date",
        lua.create_function(|_, format: String| {
            let items: Vec<_> = chrono::format::StrftimeItems::new(&format).collect();
            if items.iter().any(|item| matches!(item, chrono::format::Item::Error)) {
                return Err(mlua::Error::runtime(format!("invalid date format '{}'", format)));
            }
            Ok(Utc::now().format_with_items(items.into_iter()).to_string())
        })?,
    )?;

    globals.set(
        "print",
        lua.create_function(|_, args: Variadic<mlua::Value>| {
            let line: Vec<String> = args
                .iter()
                .map(|arg| match arg {
                    mlua::Value::String(s) => s.to_string_lossy().to_string(),
                    other => format!("{:?}", other),
                })
                .collect();
            tracing::debug!("📝 Lua print: {}", line.join("\t"));
            Ok(())
        })?,
    )?;

    Ok(lua)
}
