//! Native command bridge exposed to scripts.
//!
//! A single native entry point collects a script's call arguments, gates and
//! dispatches the command, and hands back the converted reply (or an
//! `{err=..}` table). Two thin Lua wrappers give it the two call styles:
//! `redis.call` re-raises the error with the caller's source/line prepended,
//! `redis.pcall` returns the table for in-script inspection.

use mlua::{Lua, Table, Value, Variadic};
use std::sync::Arc;

use crate::command::{CommandDispatcher, DispatchMode};
use crate::digest::sha1_hex;
use crate::error::Error;
use crate::marshal::wire_to_script;

/// Script-visible log levels, mirrored as `redis.LOG_*` constants.
const LOG_DEBUG: i64 = 0;
const LOG_VERBOSE: i64 = 1;
const LOG_NOTICE: i64 = 2;
const LOG_WARNING: i64 = 3;

/// Bootstrap run with the raw bridge function as its argument. Executed
/// during trusted setup, before globals protection is installed. The level-2
/// `error` makes a failed `redis.call` report the script line that issued
/// the command rather than the bridge itself.
const CALL_WRAPPERS: &str = r#"
local raw = ...
redis.call = function(...)
    local r = raw(...)
    if type(r) == 'table' and r.err ~= nil then
        error(r.err, 2)
    end
    return r
end
redis.pcall = raw
"#;

/// Register the `redis` command table (and its store-branded alias) on an
/// interpreter under construction.
pub(crate) fn register(lua: &Lua, dispatcher: Arc<dyn CommandDispatcher>) -> mlua::Result<()> {
    let redis = lua.create_table()?;

    let raw = lua.create_function(move |lua, args: Variadic<Value<'_>>| {
        match dispatch(lua, dispatcher.as_ref(), &args) {
            Ok(value) => Ok(value),
            Err(msg) => single_field_table(lua, "err", &msg).map(Value::Table),
        }
    })?;

    redis.set("log", lua.create_function(script_log)?)?;
    redis.set("LOG_DEBUG", LOG_DEBUG)?;
    redis.set("LOG_VERBOSE", LOG_VERBOSE)?;
    redis.set("LOG_NOTICE", LOG_NOTICE)?;
    redis.set("LOG_WARNING", LOG_WARNING)?;

    redis.set(
        "sha1hex",
        lua.create_function(|lua, data: mlua::String<'_>| {
            lua.create_string(sha1_hex(data.as_bytes()))
        })?,
    )?;
    redis.set(
        "error_reply",
        lua.create_function(|lua, msg: mlua::String<'_>| {
            single_field_table(lua, "err", &String::from_utf8_lossy(msg.as_bytes()))
        })?,
    )?;
    redis.set(
        "status_reply",
        lua.create_function(|lua, msg: mlua::String<'_>| {
            single_field_table(lua, "ok", &String::from_utf8_lossy(msg.as_bytes()))
        })?,
    )?;

    let globals = lua.globals();
    globals.raw_set("redis", redis.clone())?;
    // Same table under the store's own name, so scripts written against
    // either API keep working.
    globals.raw_set("cinder", redis)?;

    lua.load(CALL_WRAPPERS)
        .set_name("@bridge_boot")
        .into_function()?
        .call::<_, ()>(raw)?;

    Ok(())
}

/// Core of both call styles: validate, gate, dispatch, convert.
fn dispatch<'lua>(
    lua: &'lua Lua,
    dispatcher: &dyn CommandDispatcher,
    args: &Variadic<Value<'lua>>,
) -> std::result::Result<Value<'lua>, String> {
    if args.is_empty() {
        return Err("Please specify at least one argument for redis.call()".to_string());
    }

    let mut cmd: Vec<Vec<u8>> = Vec::with_capacity(args.len());
    for arg in args.iter() {
        match arg {
            Value::String(s) => cmd.push(s.as_bytes().to_vec()),
            Value::Integer(n) => cmd.push(n.to_string().into_bytes()),
            Value::Number(f) => cmd.push(f.to_string().into_bytes()),
            _ => return Err(Error::ArgumentType.to_string()),
        }
    }

    let name = String::from_utf8_lossy(&cmd[0]).to_lowercase();
    cmd[0] = name.clone().into_bytes();

    let setting = dispatcher
        .find_setting(&name)
        .ok_or_else(|| Error::UnknownCommand(name.clone()).to_string())?;
    if setting.no_script() {
        return Err(Error::Forbidden(name).to_string());
    }

    // Replication of the enclosing script is the caller's concern; the
    // per-call dispatch must not log itself.
    let reply = dispatcher.execute(&cmd, DispatchMode::SuppressReplication);
    wire_to_script(lua, &reply).map_err(|e| e.to_string())
}

/// `redis.log(level, ...)` routed to the host logging sink.
fn script_log(lua: &Lua, (level, parts): (i64, Variadic<Value<'_>>)) -> mlua::Result<()> {
    if parts.is_empty() {
        return Err(mlua::Error::RuntimeError(
            "redis.log() requires two arguments or more.".to_string(),
        ));
    }
    if !(LOG_DEBUG..=LOG_WARNING).contains(&level) {
        return Err(mlua::Error::RuntimeError("Invalid debug level.".to_string()));
    }

    let mut message = String::new();
    for part in parts.iter() {
        if let Some(s) = lua.coerce_string(part.clone())? {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&String::from_utf8_lossy(s.as_bytes()));
        }
    }

    match level {
        LOG_DEBUG => log::debug!("{}", message),
        LOG_VERBOSE => log::trace!("{}", message),
        LOG_NOTICE => log::info!("{}", message),
        _ => log::warn!("{}", message),
    }
    Ok(())
}

fn single_field_table<'lua>(lua: &'lua Lua, field: &str, msg: &str) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    table.set(field, msg)?;
    Ok(table)
}
