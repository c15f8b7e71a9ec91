/// Sandboxed Lua runner for Code nodes
///
/// Scripts run in a separate `flowlite-sandbox` process so that a runaway
/// script can be killed without touching the host. The host writes one JSON
/// request on the child's stdin; the child answers with line-delimited,
/// tagged JSON messages on stdout:
///
/// ```text
/// {"type":"log","value":"..."}      print() output, in order
/// {"type":"error","value":"..."}    the script raised
/// {"type":"result","value":[...]}   the returned value
/// ```
///
/// The child half ([`run_stdio`]) lives here as well so the wire types stay in
/// one place.

use crate::error::NodeError;
use crate::runtime::handlers::RunContext;
use crate::workflow::types::Item;
use mlua::{Function, Lua, Table, Variadic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};

/// Default wall-clock budget for one script
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default Lua heap limit (32 MiB)
pub const DEFAULT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Globals visible to untrusted code
const ALLOWED_GLOBALS: [&str; 9] = [
    "pairs", "ipairs", "next", "select", "type", "tostring", "tonumber", "error", "pcall",
];

/// Standard libraries exposed as shallow copies
const ALLOWED_LIBRARIES: [&str; 3] = ["string", "table", "math"];

/// Request written to the child's stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRequest {
    /// Lua source of the form `function(items) ... return items end`
    pub code: String,
    pub items: Vec<Item>,
    pub memory_limit: usize,
}

/// One line of child output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SandboxMessage {
    Log(String),
    Error(String),
    Result(Value),
}

/// Host side: spawns the sandbox program once per Code node dispatch
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    program: PathBuf,
    timeout: Duration,
    memory_limit: usize,
}

impl ScriptRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// Run `code` over `items` in a fresh child process
    ///
    /// `print` lines are appended to the context's logs as they arrive, so
    /// they survive a later failure. On timeout the child is killed and
    /// reaped before returning [`NodeError::Timeout`].
    pub async fn run(
        &self,
        code: &str,
        items: Vec<Item>,
        ctx: &mut RunContext,
    ) -> Result<Vec<Item>, NodeError> {
        let deadline = Instant::now() + self.timeout;
        let request = serde_json::to_vec(&SandboxRequest {
            code: code.to_string(),
            items,
            memory_limit: self.memory_limit,
        })
        .map_err(|e| NodeError::Sandbox(format!("failed to encode request: {}", e)))?;

        let mut child = Command::new(&self.program)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                NodeError::Sandbox(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| NodeError::Sandbox("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NodeError::Sandbox("child stdout unavailable".into()))?;

        tracing::debug!("🧪 Sandbox started for node {} (pid {:?})", ctx.node_id, child.id());

        let exchange = async {
            stdin.write_all(&request).await?;
            drop(stdin);

            let mut outcome: Option<Result<Value, NodeError>> = None;
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match serde_json::from_str::<SandboxMessage>(&line) {
                    Ok(SandboxMessage::Log(text)) => ctx.log(text),
                    Ok(SandboxMessage::Error(message)) => {
                        outcome = Some(Err(NodeError::Script(message)))
                    }
                    Ok(SandboxMessage::Result(value)) => outcome = Some(Ok(value)),
                    Err(e) => {
                        tracing::warn!("⚠️ Ignoring malformed sandbox message: {}", e);
                    }
                }
            }

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((outcome, status))
        };

        let finished = timeout_at(deadline, exchange).await;
        match finished {
            Err(_) => {
                tracing::warn!(
                    "⏱️ Code node {} exceeded {:?}, killing sandbox",
                    ctx.node_id,
                    self.timeout
                );
                if let Err(e) = child.kill().await {
                    tracing::error!("❌ Failed to kill sandbox process: {}", e);
                }
                Err(NodeError::Timeout)
            }
            Ok(Err(e)) => Err(NodeError::Sandbox(format!("sandbox I/O failed: {}", e))),
            Ok(Ok((Some(Ok(value)), _))) => items_from_value(value),
            Ok(Ok((Some(Err(e)), _))) => Err(e),
            Ok(Ok((None, status))) => Err(NodeError::Sandbox(format!(
                "sandbox exited without a result ({})",
                status
            ))),
        }
    }
}

/// Accept only a JSON array of objects as a script result
pub fn items_from_value(value: Value) -> Result<Vec<Item>, NodeError> {
    match value {
        Value::Array(values) => values
            .into_iter()
            .map(|value| match value {
                Value::Object(item) => Ok(item),
                _ => Err(NodeError::NonListReturn),
            })
            .collect(),
        _ => Err(NodeError::NonListReturn),
    }
}

// -------------------------------------------------------------------------
// Child side
// -------------------------------------------------------------------------

/// Write one message line to stdout and flush it
pub fn emit(message: &SandboxMessage) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, message)?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

/// Entry point of the sandbox binary: read a request, run it, report back
pub fn run_stdio() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let request: SandboxRequest = serde_json::from_str(&input)?;

    let message = match execute_script(&request, |line| {
        let _ = emit(&SandboxMessage::Log(line));
    }) {
        Ok(value) => SandboxMessage::Result(value),
        Err(e) => SandboxMessage::Error(e.to_string()),
    };

    emit(&message)?;
    Ok(())
}

/// Evaluate the request's function over its items inside a restricted env
///
/// `on_log` receives each `print` line.
pub fn execute_script<F>(request: &SandboxRequest, on_log: F) -> mlua::Result<Value>
where
    F: Fn(String) + 'static,
{
    let lua = Lua::new();
    lua.set_memory_limit(request.memory_limit)?;

    let env = restricted_env(&lua, on_log)?;
    let function: Function = lua
        .load(format!("return {}", request.code))
        .set_name("code")
        .set_environment(env)
        .eval()
        .map_err(|e| mlua::Error::runtime(format!("Code node must define a function: {}", e)))?;

    let items = lua.create_table()?;
    for (i, item) in request.items.iter().enumerate() {
        items.raw_set(i + 1, object_to_lua(&lua, item)?)?;
    }

    let result: mlua::Value = function.call(items)?;
    lua_to_json(result)
}

fn restricted_env<F>(lua: &Lua, on_log: F) -> mlua::Result<Table>
where
    F: Fn(String) + 'static,
{
    let globals = lua.globals();
    let env = lua.create_table()?;

    for name in ALLOWED_GLOBALS {
        env.set(name, globals.get::<mlua::Value>(name)?)?;
    }

    for name in ALLOWED_LIBRARIES {
        let library: Table = globals.get(name)?;
        let copy = lua.create_table()?;
        for pair in library.pairs::<mlua::Value, mlua::Value>() {
            let (key, value) = pair?;
            copy.raw_set(key, value)?;
        }
        env.set(name, copy)?;
    }

    let tostring: Function = globals.get("tostring")?;
    env.set(
        "print",
        lua.create_function(move |_, args: Variadic<mlua::Value>| {
            let parts = args
                .iter()
                .map(|arg| tostring.call::<String>(arg.clone()))
                .collect::<mlua::Result<Vec<_>>>()?;
            on_log(parts.join(" "));
            Ok(())
        })?,
    )?;

    env.set(
        "len",
        lua.create_function(|_, value: mlua::Value| match value {
            mlua::Value::Table(table) => Ok(table.raw_len() as i64),
            mlua::Value::String(s) => Ok(s.as_bytes().len() as i64),
            other => Err(mlua::Error::runtime(format!(
                "len() expects a table or string, got {}",
                other.type_name()
            ))),
        })?,
    )?;

    env.set(
        "range",
        lua.create_function(
            |lua, (first, second, step): (i64, Option<i64>, Option<i64>)| {
                let (start, stop) = match second {
                    Some(stop) => (first, stop),
                    None => (0, first),
                };
                let step = step.unwrap_or(1);
                if step == 0 {
                    return Err(mlua::Error::runtime("range() step must not be zero"));
                }

                let out = lua.create_table()?;
                let mut index = 1;
                let mut current = start;
                while (step > 0 && current < stop) || (step < 0 && current > stop) {
                    out.raw_set(index, current)?;
                    index += 1;
                    current += step;
                }
                Ok(out)
            },
        )?,
    )?;

    env.set(
        "min",
        lua.create_function(|_, args: Variadic<mlua::Value>| {
            extremum(args, |a, b| a < b)
        })?,
    )?;
    env.set(
        "max",
        lua.create_function(|_, args: Variadic<mlua::Value>| {
            extremum(args, |a, b| a > b)
        })?,
    )?;

    Ok(env)
}

/// Shared body of `min`/`max`: numbers as varargs or one sequence table
fn extremum(
    args: Variadic<mlua::Value>,
    better: fn(f64, f64) -> bool,
) -> mlua::Result<mlua::Value> {
    let values: Vec<mlua::Value> = match args.first() {
        Some(mlua::Value::Table(table)) if args.len() == 1 => {
            table.sequence_values().collect::<mlua::Result<_>>()?
        }
        _ => args.iter().cloned().collect(),
    };

    let mut best: Option<(f64, mlua::Value)> = None;
    for value in values {
        let number = match &value {
            mlua::Value::Integer(i) => *i as f64,
            mlua::Value::Number(n) => *n,
            other => {
                return Err(mlua::Error::runtime(format!(
                    "expected numbers, got {}",
                    other.type_name()
                )))
            }
        };
        match &best {
            Some((current, _)) if !better(number, *current) => {}
            _ => best = Some((number, value)),
        }
    }

    best.map(|(_, value)| value)
        .ok_or_else(|| mlua::Error::runtime("expected at least one number"))
}

fn object_to_lua(lua: &Lua, object: &serde_json::Map<String, Value>) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    for (key, value) in object {
        table.raw_set(key.as_str(), json_to_lua(lua, value)?)?;
    }
    Ok(table)
}

/// Convert JSON into a Lua value (null becomes nil)
fn json_to_lua(lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    Ok(match value {
        Value::Null => mlua::Value::Nil,
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => mlua::Value::Integer(i),
            None => mlua::Value::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Array(values) => {
            let table = lua.create_table()?;
            for (i, value) in values.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, value)?)?;
            }
            mlua::Value::Table(table)
        }
        Value::Object(object) => mlua::Value::Table(object_to_lua(lua, object)?),
    })
}

/// Convert a Lua value back into JSON
///
/// Tables with keys 1..n become arrays, the empty table becomes `[]`, any
/// other table becomes an object. Functions and userdata become null.
pub fn lua_to_json(value: mlua::Value) -> mlua::Result<Value> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::Number(serde_json::Number::from(i))),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        mlua::Value::Table(table) => {
            let mut is_array = true;
            let mut max_index = 0;
            let mut count = 0;

            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                let (key, _) = pair?;
                count += 1;
                match key {
                    mlua::Value::Integer(i) if i > 0 => max_index = max_index.max(i as usize),
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count == max_index {
                let mut values = Vec::with_capacity(count);
                for i in 1..=max_index {
                    values.push(lua_to_json(table.raw_get(i)?)?);
                }
                return Ok(Value::Array(values));
            }

            let mut object = serde_json::Map::new();
            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                let (key, value) = pair?;
                let key = match key {
                    mlua::Value::String(s) => s.to_str()?.to_string(),
                    mlua::Value::Integer(i) => i.to_string(),
                    mlua::Value::Number(f) => f.to_string(),
                    _ => continue,
                };
                object.insert(key, lua_to_json(value)?);
            }
            Ok(Value::Object(object))
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn request(code: &str, items: Value) -> SandboxRequest {
        SandboxRequest {
            code: code.to_string(),
            items: serde_json::from_value(items).unwrap(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    fn run(code: &str, items: Value) -> (mlua::Result<Value>, Vec<String>) {
        let logs = Rc::new(RefCell::new(Vec::new()));
        let sink = logs.clone();
        let result = execute_script(&request(code, items), move |line| sink.borrow_mut().push(line));
        let logs = logs.borrow().clone();
        (result, logs)
    }

    #[test]
    fn transforms_items() {
        let (result, logs) = run(
            r#"function(items)
                for _, item in ipairs(items) do
                    item.total = item.price * item.qty
                end
                print("processed", len(items))
                return items
            end"#,
            json!([{ "price": 2, "qty": 3 }, { "price": 5, "qty": 1 }]),
        );

        assert_eq!(
            result.unwrap(),
            json!([{ "price": 2, "qty": 3, "total": 6 }, { "price": 5, "qty": 1, "total": 5 }])
        );
        assert_eq!(logs, vec!["processed 2".to_string()]);
    }

    #[test]
    fn helpers_behave_like_their_names() {
        let (result, _) = run(
            r#"function(items)
                local r = range(3)
                return {{ count = len(r), first = r[1], low = min(4, 2, 9), high = max({4, 2, 9}) }}
            end"#,
            json!([]),
        );
        assert_eq!(
            result.unwrap(),
            json!([{ "count": 3, "first": 0, "low": 2, "high": 9 }])
        );
    }

    #[test]
    fn dangerous_globals_are_absent() {
        let (result, _) = run(
            r#"function(items)
                return {{ os = type(os), io = type(io), req = type(require), load = type(load) }}
            end"#,
            json!([]),
        );
        assert_eq!(
            result.unwrap(),
            json!([{ "os": "nil", "io": "nil", "req": "nil", "load": "nil" }])
        );
    }

    #[test]
    fn script_errors_are_reported() {
        let (result, _) = run(r#"function(items) error("bad input") end"#, json!([]));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("bad input"), "{message}");
    }

    #[test]
    fn scripts_can_use_string_table_and_math() {
        let (result, _) = run(
            r#"function(items)
                local out = {}
                for _, item in ipairs(items) do
                    table.insert(out, { name = string.upper(item.name), half = math.floor(item.n / 2) })
                end
                return out
            end"#,
            json!([{ "name": "ada", "n": 7 }]),
        );
        assert_eq!(result.unwrap(), json!([{ "name": "ADA", "half": 3 }]));
    }

    #[test]
    fn pcall_catches_script_errors() {
        let (result, _) = run(
            r#"function(items)
                local ok, err = pcall(function() error("boom", 0) end)
                return {{ ok = ok, err = err }}
            end"#,
            json!([]),
        );
        assert_eq!(result.unwrap(), json!([{ "ok": false, "err": "boom" }]));
    }

    #[test]
    fn empty_table_is_an_empty_list() {
        let (result, _) = run("function(items) return {} end", json!([{ "a": 1 }]));
        assert_eq!(result.unwrap(), json!([]));
    }

    #[test]
    fn only_arrays_of_objects_are_items() {
        assert!(items_from_value(json!([{ "a": 1 }])).is_ok());
        assert!(matches!(items_from_value(json!({ "a": 1 })), Err(NodeError::NonListReturn)));
        assert!(matches!(items_from_value(json!([1, 2])), Err(NodeError::NonListReturn)));
        assert!(matches!(items_from_value(Value::Null), Err(NodeError::NonListReturn)));
    }

    #[test]
    fn messages_use_tagged_lines() {
        let line = serde_json::to_string(&SandboxMessage::Log("hi".into())).unwrap();
        assert_eq!(line, r#"{"type":"log","value":"hi"}"#);
        let parsed: SandboxMessage =
            serde_json::from_str(r#"{"type":"result","value":[]}"#).unwrap();
        assert_eq!(parsed, SandboxMessage::Result(json!([])));
    }
}
