//! Sandboxed interpreter construction.
//!
//! Every engine owns one interpreter built here: a whitelisted library
//! surface (base, table, string, math, and a debug table pruned to
//! stack-frame inspection), no filesystem loaders, the command bridge and
//! structured-encoding helpers, a deterministic `math.random`, a
//! pre-registered run error handler, and, as the final step, a protected
//! global namespace that rejects undeclared reads and writes.
//!
//! Setup-phase code writes globals through the raw path; once the
//! protection metatable is installed, only raw access bypasses it.

pub(crate) mod encoding;

use mlua::{Lua, LuaOptions, StdLib, Table, Value};
use std::sync::Arc;

use crate::bridge;
use crate::command::CommandDispatcher;
use crate::error::Error;
use crate::rand::Lrand48;

/// Global name of the run error handler defined during setup.
pub(crate) const ERR_HANDLER_NAME: &str = "__script_err_handler";

/// Augments a run failure with the source/line of the frame that raised it,
/// skipping native frames so the report points at script code.
const ERR_HANDLER_DEF: &str = r#"
function __script_err_handler(err)
    local i = debug.getinfo(2, 'nSl')
    if i and i.what == 'C' then
        i = debug.getinfo(3, 'nSl')
    end
    if i and i.source then
        return i.source .. ':' .. i.currentline .. ': ' .. tostring(err)
    end
    return tostring(err)
end
"#;

/// Build a fully sandboxed interpreter.
pub(crate) fn build(
    dispatcher: Arc<dyn CommandDispatcher>,
    rng: Arc<Lrand48>,
) -> crate::Result<Lua> {
    // The debug library counts as unsafe to load; it is pruned to read-only
    // stack inspection immediately below.
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::DEBUG,
            LuaOptions::new(),
        )
    };

    remove_unsupported(&lua)?;
    bridge::register(&lua, dispatcher)?;
    encoding::register(&lua)?;
    install_deterministic_random(&lua, rng)?;

    lua.load(ERR_HANDLER_DEF)
        .set_name("@err_handler_def")
        .exec()
        .map_err(|e| Error::Engine(e.to_string()))?;

    // Must be last: later setup steps write globals and would trip the traps.
    enable_globals_protection(&lua)?;

    Ok(lua)
}

/// Remove filesystem loaders and reduce `debug` to stack-frame inspection.
fn remove_unsupported(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.raw_set("loadfile", Value::Nil)?;
    globals.raw_set("dofile", Value::Nil)?;

    let debug: Table<'_> = globals.get("debug")?;
    let pruned = lua.create_table()?;
    pruned.set("getinfo", debug.get::<_, mlua::Function<'_>>("getinfo")?)?;
    pruned.set("traceback", debug.get::<_, mlua::Function<'_>>("traceback")?)?;
    globals.raw_set("debug", pruned)?;
    Ok(())
}

/// Replace `math.random`/`math.randomseed` with the shared deterministic
/// generator. Argument forms and bounds checks match the stock library.
fn install_deterministic_random(lua: &Lua, rng: Arc<Lrand48>) -> mlua::Result<()> {
    let math: Table<'_> = lua.globals().get("math")?;

    let draw = Arc::clone(&rng);
    math.set(
        "random",
        lua.create_function(move |_, (a, b): (Option<i64>, Option<i64>)| {
            let r = draw.next_unit();
            match (a, b) {
                (None, _) => Ok(Value::Number(r)),
                (Some(upper), None) => {
                    if upper < 1 {
                        return Err(mlua::Error::RuntimeError(
                            "bad argument #1 to 'random' (interval is empty)".to_string(),
                        ));
                    }
                    Ok(Value::Integer((r * upper as f64).floor() as i64 + 1))
                }
                (Some(lower), Some(upper)) => {
                    if lower > upper {
                        return Err(mlua::Error::RuntimeError(
                            "bad argument #2 to 'random' (interval is empty)".to_string(),
                        ));
                    }
                    let span = (upper - lower + 1) as f64;
                    Ok(Value::Integer((r * span).floor() as i64 + lower))
                }
            }
        })?,
    )?;

    math.set(
        "randomseed",
        lua.create_function(move |_, seed: i64| {
            rng.seed(seed as u32);
            Ok(())
        })?,
    )?;

    Ok(())
}

/// Install the `_G` metatable that fails loudly on undeclared global access.
fn enable_globals_protection(lua: &Lua) -> mlua::Result<()> {
    let mt = lua.create_table()?;

    mt.set(
        "__newindex",
        lua.create_function(
            |_, (_t, key, _value): (Table<'_>, Value<'_>, Value<'_>)| -> mlua::Result<()> {
                Err(mlua::Error::RuntimeError(
                    Error::GlobalWrite(describe_key(&key)).to_string(),
                ))
            },
        )?,
    )?;

    mt.set(
        "__index",
        lua.create_function(|_, (_t, key): (Table<'_>, Value<'_>)| -> mlua::Result<()> {
            Err(mlua::Error::RuntimeError(
                Error::GlobalRead(describe_key(&key)).to_string(),
            ))
        })?,
    )?;

    lua.globals().set_metatable(Some(mt));
    Ok(())
}

fn describe_key(key: &Value<'_>) -> String {
    match key {
        Value::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        Value::Integer(n) => n.to_string(),
        Value::Number(f) => f.to_string(),
        other => format!("({})", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSetting, DispatchMode};
    use crate::reply::WireReply;

    struct NullDispatcher;

    impl CommandDispatcher for NullDispatcher {
        fn find_setting(&self, _name: &str) -> Option<CommandSetting> {
            None
        }

        fn execute(&self, _args: &[Vec<u8>], _mode: DispatchMode) -> WireReply {
            WireReply::error("ERR no dispatcher")
        }
    }

    fn sandbox() -> (Lua, Arc<Lrand48>) {
        let rng = Arc::new(Lrand48::new());
        let lua = build(Arc::new(NullDispatcher), Arc::clone(&rng)).unwrap();
        (lua, rng)
    }

    #[test]
    fn test_filesystem_loaders_removed() {
        let (lua, _) = sandbox();
        // The globals are protected, so even reading the removed names
        // raises; rawget proves they are gone rather than hidden.
        let gone: bool = lua
            .load("return rawget(_G, 'loadfile') == nil and rawget(_G, 'dofile') == nil")
            .eval()
            .unwrap();
        assert!(gone);
    }

    #[test]
    fn test_debug_restricted_to_inspection() {
        let (lua, _) = sandbox();
        let shape: (bool, bool, bool) = lua
            .load("return debug.getinfo ~= nil, debug.traceback ~= nil, debug.sethook == nil")
            .eval()
            .unwrap();
        assert_eq!(shape, (true, true, true));
    }

    #[test]
    fn test_global_write_is_rejected_by_name() {
        let (lua, _) = sandbox();
        let err = lua.load("leaked = 1").exec().unwrap_err();
        assert!(
            err.to_string().contains("create global variable 'leaked'"),
            "got: {}",
            err
        );
    }

    #[test]
    fn test_global_read_fails_loudly() {
        let (lua, _) = sandbox();
        let err = lua.load("return no_such_binding").exec().unwrap_err();
        assert!(
            err.to_string().contains("nonexistent global variable 'no_such_binding'"),
            "got: {}",
            err
        );
    }

    #[test]
    fn test_local_bindings_unaffected_by_protection() {
        let (lua, _) = sandbox();
        let v: i64 = lua.load("local x = 41 return x + 1").eval().unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn test_raw_set_bypasses_protection() {
        let (lua, _) = sandbox();
        lua.globals().raw_set("KEYS", lua.create_table().unwrap()).unwrap();
        let empty: i64 = lua.load("return #KEYS").eval().unwrap();
        assert_eq!(empty, 0);
    }

    #[test]
    fn test_math_random_is_seed_deterministic() {
        let (lua, rng) = sandbox();
        rng.seed(0);
        let first: (i64, i64, f64) = lua
            .load("return math.random(1000), math.random(5, 10), math.random()")
            .eval()
            .unwrap();
        rng.seed(0);
        let second: (i64, i64, f64) = lua
            .load("return math.random(1000), math.random(5, 10), math.random()")
            .eval()
            .unwrap();
        assert_eq!(first, second);
        assert!((1..=1000).contains(&first.0));
        assert!((5..=10).contains(&first.1));
    }

    #[test]
    fn test_math_random_empty_interval_errors() {
        let (lua, _) = sandbox();
        let err = lua.load("return math.random(0)").exec().unwrap_err();
        assert!(err.to_string().contains("interval is empty"));
    }

    #[test]
    fn test_randomseed_reaches_shared_generator() {
        let (lua, rng) = sandbox();
        lua.load("math.randomseed(7)").exec().unwrap();
        let from_script: i64 = lua.load("return math.random(1000000)").eval().unwrap();

        rng.seed(7);
        let expected = (rng.next_unit() * 1000000.0).floor() as i64 + 1;
        assert_eq!(from_script, expected);
    }

    #[test]
    fn test_err_handler_registered() {
        let (lua, _) = sandbox();
        let handler: mlua::Function<'_> = lua.globals().raw_get(ERR_HANDLER_NAME).unwrap();
        let msg: String = handler.call("boom").unwrap();
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_encoding_helpers_present() {
        let (lua, _) = sandbox();
        let present: (bool, bool, bool) = lua
            .load("return cjson ~= nil, struct ~= nil, cmsgpack ~= nil")
            .eval()
            .unwrap();
        assert_eq!(present, (true, true, true));
    }
}
