//! Conversions between wire replies and interpreter values.
//!
//! The two directions are deliberately not inverses of each other. A wire
//! integer becomes a Lua number, but a Lua `true` becomes `Integer(1)` and a
//! Lua `false` becomes `Nil`, so integers do not survive a trip through the
//! boolean conversions. This asymmetry is protocol design, not a bug, and
//! the tests pin it down.

use mlua::{Lua, Table, Value};

use crate::reply::{sanitize_line, WireReply};

/// Convert a wire reply into an interpreter value.
///
/// No validation is performed: replies are produced by the trusted
/// dispatcher and assumed well-formed.
pub fn wire_to_script<'lua>(lua: &'lua Lua, reply: &WireReply) -> mlua::Result<Value<'lua>> {
    match reply {
        WireReply::Integer(n) => Ok(Value::Integer(*n)),
        WireReply::Nil => Ok(Value::Boolean(false)),
        WireReply::Bulk(bytes) => Ok(Value::String(lua.create_string(bytes)?)),
        WireReply::Status(msg) => {
            let table = lua.create_table()?;
            table.set("ok", msg.as_str())?;
            Ok(Value::Table(table))
        }
        WireReply::Error(msg) => {
            let table = lua.create_table()?;
            table.set("err", msg.as_str())?;
            Ok(Value::Table(table))
        }
        WireReply::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i as i64 + 1, wire_to_script(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

/// Convert a script return value into a wire reply.
pub fn script_to_wire(value: Value<'_>) -> mlua::Result<WireReply> {
    match value {
        Value::String(s) => Ok(WireReply::Bulk(s.as_bytes().to_vec())),
        Value::Boolean(false) => Ok(WireReply::Nil),
        Value::Boolean(true) => Ok(WireReply::Integer(1)),
        Value::Integer(n) => Ok(WireReply::Integer(n)),
        // Truncation toward zero, matching the protocol's integer replies.
        Value::Number(f) => Ok(WireReply::Integer(f as i64)),
        Value::Table(table) => table_to_wire(table),
        _ => Ok(WireReply::Nil),
    }
}

fn table_to_wire(table: Table<'_>) -> mlua::Result<WireReply> {
    if let Value::String(err) = table.get::<_, Value<'_>>("err")? {
        let msg = String::from_utf8_lossy(err.as_bytes()).into_owned();
        return Ok(WireReply::Error(sanitize_line(&msg)));
    }
    if let Value::String(ok) = table.get::<_, Value<'_>>("ok")? {
        let msg = String::from_utf8_lossy(ok.as_bytes()).into_owned();
        return Ok(WireReply::Status(sanitize_line(&msg)));
    }

    // Sequential table: probe ascending 1-based indices and stop at the
    // first missing entry. A sparse table therefore truncates at its first
    // hole; dependent behavior relies on this boundary.
    let mut items = Vec::new();
    let mut index = 1i64;
    loop {
        let item: Value<'_> = table.get(index)?;
        if let Value::Nil = item {
            break;
        }
        items.push(script_to_wire(item)?);
        index += 1;
    }
    Ok(WireReply::Array(items))
}
