//! Lua 5.3 execution context backed by mlua.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    path::Path,
    rc::Rc,
    time::Duration,
};

use mlua::{DebugEvent, Function, HookTriggers, Lua, MultiValue, Value, VmState};

use crate::{
    bindings::{install_host_bindings, HostContext, HostMessage},
    error::ScriptError,
    sandbox::{SandboxBudget, SANDBOX_INSTRUCTION_CHECKPOINT_INTERVAL},
    trace::{DebugLevel, TraceLog},
    RuntimeOptions, ScriptRuntime, ScriptValue, ScriptVersion,
};

/// Message Lua raises when an allocation is refused.
const LUA_MEMORY_ERROR_MESSAGE: &str = "not enough memory";

/// One sandboxed Lua 5.3 interpreter bound to one extension.
pub struct Lua53Runtime {
    lua: Lua,
    budget: Rc<SandboxBudget>,
    host: Rc<RefCell<HostContext>>,
    tracer: Option<Rc<RefCell<TraceLog>>>,
    api_version: u32,
    context_id: String,
}

impl Lua53Runtime {
    pub fn new(options: RuntimeOptions) -> Result<Self, ScriptError> {
        let supported = ScriptVersion::Lua53.max_debug_level();
        if options.debug_level > supported {
            return Err(ScriptError::UnsupportedDebugLevel {
                requested: options.debug_level,
                supported,
            });
        }

        let tracer = if options.debug_level == DebugLevel::Tracing {
            let log = TraceLog::open(&options.trace_dir, &options.context_id).map_err(|error| {
                ScriptError::Load {
                    path: options.trace_dir.display().to_string(),
                    message: format!("failed to open debug trace log: {error}"),
                }
            })?;
            Some(Rc::new(RefCell::new(log)))
        } else {
            None
        };

        let lua = Lua::new();
        let budget = Rc::new(SandboxBudget::new(options.limits));
        let host = Rc::new(RefCell::new(options.host));

        install_sandbox_hook(&lua, &budget, tracer.clone());
        install_guarded_error_catchers(&lua, &budget).map_err(internal_error)?;
        install_host_bindings(&lua, &host).map_err(internal_error)?;
        if let Some(limit) = options.limits.max_memory_bytes {
            lua.set_memory_limit(limit).map_err(internal_error)?;
        }

        tracing::debug!(
            context_id = %options.context_id,
            implementation = ScriptVersion::Lua53.implementation_name(),
            implementation_version = ScriptVersion::Lua53.implementation_version(),
            api_version = options.api_version,
            debug_level = options.debug_level.as_str(),
            max_time_ms = options.limits.max_time.map(|limit| limit.as_millis() as u64),
            max_memory_bytes = options.limits.max_memory_bytes,
            "created execution context"
        );

        Ok(Self {
            lua,
            budget,
            host,
            tracer,
            api_version: options.api_version,
            context_id: options.context_id,
        })
    }

    /// Runs one unit of work and resolves which error slot the caller sees.
    fn run_unit<R>(&self, work: impl FnOnce(&Lua) -> mlua::Result<R>) -> Result<R, ScriptError> {
        if let Err(error) = self.budget.resume() {
            let _ = self.budget.take_error();
            seal_allocations(&self.lua);
            return Err(ScriptError::Sandbox(error));
        }
        if let Some(tracer) = self.tracer.as_ref() {
            tracer.borrow_mut().start_script();
        }

        let result = work(&self.lua);

        self.budget.pause();
        if let Some(tracer) = self.tracer.as_ref() {
            tracer.borrow_mut().end_script();
        }

        if let Err(error) = result.as_ref() {
            if !self.budget.is_cancelled()
                && self.budget.limits().max_memory_bytes.is_some()
                && is_memory_error(error)
            {
                self.budget.record_memory_refusal();
            }
        }
        if let Some(sandbox) = self.budget.take_error() {
            seal_allocations(&self.lua);
            tracing::debug!(
                context_id = %self.context_id,
                reason_code = %sandbox.reason_code,
                "script call ended by sandbox"
            );
            return Err(ScriptError::Sandbox(sandbox));
        }
        self.budget.ensure_not_cancelled()?;

        result.map_err(|error| ScriptError::Runtime {
            message: lua_error_message(&error),
        })
    }

    fn global_function(&self, name: &str) -> Option<Function> {
        match self.lua.globals().get::<Value>(name) {
            Ok(Value::Function(function)) => Some(function),
            _ => None,
        }
    }
}

impl ScriptRuntime for Lua53Runtime {
    fn script_version(&self) -> ScriptVersion {
        ScriptVersion::Lua53
    }

    fn api_version(&self) -> u32 {
        self.api_version
    }

    fn load_file(&mut self, path: &Path) -> Result<(), ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|error| ScriptError::Load {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        tracing::debug!(context_id = %self.context_id, path = %path.display(), "loading script file");
        let chunk_name = format!("@{}", path.display());
        self.run_unit(|lua| lua.load(source.as_str()).set_name(chunk_name).exec())
    }

    fn load_source(&mut self, chunk_name: &str, source: &str) -> Result<(), ScriptError> {
        let chunk_name = format!("={chunk_name}");
        self.run_unit(|lua| lua.load(source).set_name(chunk_name).exec())
    }

    fn function_exists(&self, name: &str) -> bool {
        self.global_function(name).is_some()
    }

    fn call_function(&mut self, name: &str) -> Result<Option<ScriptValue>, ScriptError> {
        let function = self
            .global_function(name)
            .ok_or_else(|| ScriptError::Internal(format!("function '{name}' is not defined")))?;
        let value = self.run_unit(|_| function.call::<Value>(()))?;
        script_value_from_lua(value)
    }

    fn set_call_context(&mut self, hook: &str, func: Option<&str>) {
        let mut host = self.host.borrow_mut();
        host.hook = Some(hook.to_string());
        if let Some(func) = func {
            host.current_function = Some(func.to_string());
        }
    }

    fn disable_extension_binding(&mut self) {
        self.host.borrow_mut().extension_binding_enabled = false;
    }

    fn extension_binding_enabled(&self) -> bool {
        self.host.borrow().extension_binding_enabled
    }

    fn take_messages(&mut self) -> Vec<HostMessage> {
        std::mem::take(&mut self.host.borrow_mut().messages)
    }

    fn elapsed(&self) -> Duration {
        self.budget.elapsed()
    }

    fn memory_in_use(&self) -> usize {
        self.lua.used_memory()
    }

    fn is_cancelled(&self) -> bool {
        self.budget.is_cancelled()
    }
}

fn install_sandbox_hook(
    lua: &Lua,
    budget: &Rc<SandboxBudget>,
    tracer: Option<Rc<RefCell<TraceLog>>>,
) {
    let mut triggers =
        HookTriggers::new().every_nth_instruction(SANDBOX_INSTRUCTION_CHECKPOINT_INTERVAL);
    if tracer.is_some() {
        triggers = triggers.every_line().on_calls().on_returns();
    }
    let budget = Rc::clone(budget);
    lua.set_hook(triggers, move |lua, debug| {
        if let Some(tracer) = tracer.as_ref() {
            let mut tracer = tracer.borrow_mut();
            match debug.event() {
                DebugEvent::Call => tracer.enter_function(),
                DebugEvent::Ret => tracer.leave_function(),
                DebugEvent::Line => {
                    let source = debug.source();
                    if let Some(chunk_name) = source.source.as_deref() {
                        tracer.record_line(chunk_name, debug.curr_line() as i64);
                    }
                }
                _ => {}
            }
        }
        if let Err(error) = budget.check_time() {
            seal_allocations(lua);
            return Err(mlua::Error::external(error));
        }
        Ok(VmState::Continue)
    });
}

/// Wraps the interpreter's error-catching builtins so a cancelled run cannot be swallowed.
///
/// `pcall` and `xpcall` run their target under the original `xpcall` with a
/// marker handler. Lua invokes message handlers for raised errors but never
/// for allocation failures, so a `"not enough memory"` result that bypassed
/// the marker came from the allocator.
fn install_guarded_error_catchers(lua: &Lua, budget: &Rc<SandboxBudget>) -> mlua::Result<()> {
    let globals = lua.globals();
    let xpcall: Function = globals.get("xpcall")?;

    let pcall_guard = {
        let xpcall = xpcall.clone();
        let budget = Rc::clone(budget);
        lua.create_function(move |lua, mut args: MultiValue| {
            let target = args.pop_front().unwrap_or(Value::Nil);
            let raised = Rc::new(Cell::new(false));
            args.push_front(Value::Function(raised_error_marker(lua, &raised, None)?));
            args.push_front(target);
            let results = xpcall.call::<MultiValue>(args)?;
            settle_protected_call(lua, &budget, &results, !raised.get())?;
            Ok(results)
        })?
    };
    let xpcall_guard = {
        let budget = Rc::clone(budget);
        lua.create_function(move |lua, mut args: MultiValue| {
            let raised = Rc::new(Cell::new(false));
            if let Some(Value::Function(handler)) = args.get(1).cloned() {
                args[1] = Value::Function(raised_error_marker(lua, &raised, Some(handler))?);
            }
            let results = xpcall.call::<MultiValue>(args)?;
            settle_protected_call(lua, &budget, &results, !raised.get())?;
            Ok(results)
        })?
    };
    globals.set("pcall", pcall_guard)?;
    globals.set("xpcall", xpcall_guard)?;

    if let Value::Table(coroutine) = globals.get::<Value>("coroutine")? {
        let resume: Function = coroutine.get("resume")?;
        let budget = Rc::clone(budget);
        let resume_guard = lua.create_function(move |lua, args: MultiValue| {
            let results = resume.call::<MultiValue>(args)?;
            // Coroutine bodies get no message handler; a refusal leaves the heap near the limit.
            let near_limit = budget
                .limits()
                .max_memory_bytes
                .is_some_and(|limit| lua.used_memory().saturating_mul(2) >= limit);
            settle_protected_call(lua, &budget, &results, near_limit)?;
            Ok(results)
        })?;
        coroutine.set("resume", resume_guard)?;
    }
    Ok(())
}

/// Message handler that flags a raised error, then defers to the script's own handler.
fn raised_error_marker(
    lua: &Lua,
    raised: &Rc<Cell<bool>>,
    handler: Option<Function>,
) -> mlua::Result<Function> {
    let raised = Rc::clone(raised);
    lua.create_function(move |_, args: MultiValue| {
        raised.set(true);
        match handler.as_ref() {
            Some(handler) => handler.call::<MultiValue>(args),
            None => Ok(args),
        }
    })
}

fn settle_protected_call(
    lua: &Lua,
    budget: &SandboxBudget,
    results: &MultiValue,
    allocator_refusal_possible: bool,
) -> mlua::Result<()> {
    if !budget.is_cancelled()
        && budget.limits().max_memory_bytes.is_some()
        && reports_memory_failure(results, allocator_refusal_possible)
    {
        budget.record_memory_refusal();
    }
    if let Err(error) = budget.ensure_not_cancelled() {
        seal_allocations(lua);
        return Err(mlua::Error::external(error));
    }
    Ok(())
}

fn reports_memory_failure(results: &MultiValue, allocator_refusal_possible: bool) -> bool {
    let mut values = results.iter();
    if !matches!(values.next(), Some(Value::Boolean(false))) {
        return false;
    }
    match values.next() {
        Some(Value::String(message)) => {
            allocator_refusal_possible
                && &*message.as_bytes() == LUA_MEMORY_ERROR_MESSAGE.as_bytes()
        }
        Some(Value::Error(error)) => is_memory_error(error),
        _ => false,
    }
}

/// Once cancelled, allocations may only shrink the heap.
fn seal_allocations(lua: &Lua) {
    let _ = lua.set_memory_limit(lua.used_memory());
}

fn is_memory_error(error: &mlua::Error) -> bool {
    match error {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        _ => false,
    }
}

fn lua_error_message(error: &mlua::Error) -> String {
    match error {
        mlua::Error::RuntimeError(message) | mlua::Error::MemoryError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => lua_error_message(cause),
        other => other.to_string(),
    }
}

fn internal_error(error: mlua::Error) -> ScriptError {
    ScriptError::Internal(format!("failed to prepare lua state: {error}"))
}

fn script_value_from_lua(value: Value) -> Result<Option<ScriptValue>, ScriptError> {
    match value {
        Value::Nil => Ok(None),
        Value::Boolean(flag) => Ok(Some(ScriptValue::Bool(flag))),
        Value::Integer(number) => Ok(Some(ScriptValue::Int(number))),
        Value::Number(number) => {
            if number.is_finite()
                && number.fract() == 0.0
                && number >= i64::MIN as f64
                && number <= i64::MAX as f64
            {
                Ok(Some(ScriptValue::Int(number as i64)))
            } else {
                Err(ScriptError::BadReturn {
                    detail: format!("non-integral number {number}"),
                })
            }
        }
        Value::String(text) => Ok(Some(ScriptValue::String(utf8_string(&text)?))),
        Value::Table(table) => {
            let mut entries = BTreeMap::new();
            for pair in table.pairs::<Value, Value>() {
                let (key, value) = pair.map_err(|error| ScriptError::BadReturn {
                    detail: lua_error_message(&error),
                })?;
                match (key, value) {
                    (Value::String(key), Value::String(value)) => {
                        entries.insert(utf8_string(&key)?, utf8_string(&value)?);
                    }
                    (key, value) => {
                        return Err(ScriptError::BadReturn {
                            detail: format!(
                                "table entries must map string to string, found {} to {}",
                                key.type_name(),
                                value.type_name()
                            ),
                        })
                    }
                }
            }
            Ok(Some(ScriptValue::Map(entries)))
        }
        other => Err(ScriptError::BadReturn {
            detail: format!("unsupported {} value", other.type_name()),
        }),
    }
}

fn utf8_string(text: &mlua::String) -> Result<String, ScriptError> {
    String::from_utf8(text.as_bytes().to_vec()).map_err(|_| ScriptError::BadReturn {
        detail: "string is not valid UTF-8".to_string(),
    })
}
