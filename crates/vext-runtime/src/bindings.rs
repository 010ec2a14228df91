//! Host capabilities exposed to scripts under `Helix.Core.Client`.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use mlua::{Lua, Table, Value};
use serde::{Deserialize, Serialize};

/// Numeric action values published to scripts as `Helix.Core.Client.Action`.
pub const SCRIPT_ACTION_CONSTANTS: [(&str, i64); 6] = [
    ("FAIL", 0),
    ("PASS", 1),
    ("REPLACE", 2),
    ("PRE_DEBUG", 3),
    ("ABORT", 4),
    ("EARLY_RETURN", 5),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostMessageLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Message emitted by a script through `ClientMsg` or `ClientError`.
pub struct HostMessage {
    pub level: HostMessageLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Read-only caller state a script can observe, plus the messages it produced.
pub struct HostContext {
    pub vars: BTreeMap<String, String>,
    pub argv: Vec<String>,
    pub hook: Option<String>,
    pub current_function: Option<String>,
    pub extension_binding_enabled: bool,
    pub extension_activation_requests: usize,
    pub messages: Vec<HostMessage>,
}

impl Default for HostContext {
    fn default() -> Self {
        Self {
            vars: BTreeMap::new(),
            argv: Vec::new(),
            hook: None,
            current_function: None,
            extension_binding_enabled: true,
            extension_activation_requests: 0,
            messages: Vec::new(),
        }
    }
}

impl HostContext {
    fn lookup(&self, lua: &Lua, name: &str) -> mlua::Result<Value> {
        match name {
            "argc" => Ok(Value::Integer(
                i64::try_from(self.argv.len()).unwrap_or(i64::MAX),
            )),
            "argv" => Ok(Value::Table(lua.create_sequence_from(self.argv.clone())?)),
            "func" => optional_string(lua, self.current_function.as_deref()),
            "hook" => optional_string(lua, self.hook.as_deref()),
            other => optional_string(lua, self.vars.get(other).map(String::as_str)),
        }
    }
}

fn optional_string(lua: &Lua, value: Option<&str>) -> mlua::Result<Value> {
    match value {
        Some(text) => Ok(Value::String(lua.create_string(text)?)),
        None => Ok(Value::Nil),
    }
}

pub(crate) fn install_host_bindings(lua: &Lua, host: &Rc<RefCell<HostContext>>) -> mlua::Result<()> {
    let globals = lua.globals();
    let helix = ensure_table(lua, &globals, "Helix")?;
    let core = ensure_table(lua, &helix, "Core")?;
    let client = ensure_table(lua, &core, "Client")?;

    let actions = lua.create_table()?;
    for (name, value) in SCRIPT_ACTION_CONSTANTS {
        actions.set(name, value)?;
    }
    client.set("Action", actions)?;

    let context = Rc::clone(host);
    client.set(
        "GetVar",
        lua.create_function(move |lua, name: String| context.borrow().lookup(lua, &name))?,
    )?;

    let context = Rc::clone(host);
    client.set(
        "ClientMsg",
        lua.create_function(move |_, text: String| {
            tracing::info!(message = %text, "client extension message");
            context.borrow_mut().messages.push(HostMessage {
                level: HostMessageLevel::Info,
                text,
            });
            Ok(())
        })?,
    )?;

    let context = Rc::clone(host);
    client.set(
        "ClientError",
        lua.create_function(move |_, text: String| {
            tracing::warn!(message = %text, "client extension error message");
            context.borrow_mut().messages.push(HostMessage {
                level: HostMessageLevel::Error,
                text,
            });
            Ok(())
        })?,
    )?;

    let context = Rc::clone(host);
    client.set(
        "EnableExtensions",
        lua.create_function(move |_, ()| {
            let mut context = context.borrow_mut();
            if !context.extension_binding_enabled {
                return Err(mlua::Error::RuntimeError(
                    "extension loading is disabled for this execution context".to_string(),
                ));
            }
            context.extension_activation_requests += 1;
            Ok(true)
        })?,
    )?;

    let context = Rc::clone(host);
    client.set(
        "DisableExtensionBinding",
        lua.create_function(move |_, ()| {
            context.borrow_mut().extension_binding_enabled = false;
            Ok(())
        })?,
    )?;

    Ok(())
}

fn ensure_table(lua: &Lua, parent: &Table, name: &str) -> mlua::Result<Table> {
    match parent.get::<Value>(name)? {
        Value::Table(existing) => Ok(existing),
        _ => {
            let created = lua.create_table()?;
            parent.set(name, created.clone())?;
            Ok(created)
        }
    }
}
