//! Structured-encoding helpers registered into the sandbox.
//!
//! Scripts get three global tables: `cjson` (JSON encode/decode), `struct`
//! (fixed-width binary pack/unpack) and `cmsgpack` (binary map-like
//! serialization). All three operate on plain Lua values; none of them can
//! reach outside the interpreter.

use bytes::{Buf, BufMut, BytesMut};
use mlua::{DeserializeOptions, Lua, LuaSerdeExt, MultiValue, SerializeOptions, Value, Variadic};

/// Register `cjson`, `struct` and `cmsgpack` as globals.
pub(crate) fn register(lua: &Lua) -> mlua::Result<()> {
    register_cjson(lua)?;
    register_struct(lua)?;
    register_cmsgpack(lua)?;
    Ok(())
}

fn decode_options() -> SerializeOptions {
    // Decoded null becomes plain nil and arrays stay ordinary tables.
    SerializeOptions::new()
        .set_array_metatable(false)
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

fn register_cjson(lua: &Lua) -> mlua::Result<()> {
    let cjson = lua.create_table()?;

    cjson.set(
        "encode",
        lua.create_function(|lua, value: Value<'_>| {
            let json: serde_json::Value =
                lua.from_value_with(value, DeserializeOptions::new())?;
            serde_json::to_string(&json).map_err(mlua::Error::external)
        })?,
    )?;

    cjson.set(
        "decode",
        lua.create_function(|lua, text: mlua::String<'_>| {
            let json: serde_json::Value =
                serde_json::from_slice(text.as_bytes()).map_err(mlua::Error::external)?;
            lua.to_value_with(&json, decode_options())
        })?,
    )?;

    lua.globals().raw_set("cjson", cjson)
}

fn register_cmsgpack(lua: &Lua) -> mlua::Result<()> {
    let cmsgpack = lua.create_table()?;

    cmsgpack.set(
        "pack",
        lua.create_function(|lua, values: Variadic<Value<'_>>| {
            let mut out = Vec::new();
            for value in values.into_iter() {
                let json: serde_json::Value =
                    lua.from_value_with(value, DeserializeOptions::new())?;
                let encoded = rmp_serde::to_vec(&json).map_err(mlua::Error::external)?;
                out.extend_from_slice(&encoded);
            }
            lua.create_string(&out)
        })?,
    )?;

    cmsgpack.set(
        "unpack",
        lua.create_function(|lua, data: mlua::String<'_>| {
            let bytes = data.as_bytes();
            let mut cursor = std::io::Cursor::new(bytes);
            let mut values = Vec::new();
            while (cursor.position() as usize) < bytes.len() {
                let json: serde_json::Value =
                    rmp_serde::from_read(&mut cursor).map_err(mlua::Error::external)?;
                values.push(lua.to_value_with(&json, decode_options())?);
            }
            Ok(MultiValue::from_vec(values))
        })?,
    )?;

    lua.globals().raw_set("cmsgpack", cmsgpack)
}

// ---------------------------------------------------------------------------
// struct: fixed-width binary pack/unpack
// ---------------------------------------------------------------------------

enum Code {
    Int { size: usize, signed: bool },
    Float,
    Double,
    /// Zero-terminated string.
    Str,
    /// Fixed-length byte field `c<n>`.
    Fixed(usize),
}

struct FormatParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    big: bool,
}

impl<'a> FormatParser<'a> {
    fn new(fmt: &'a str) -> Self {
        Self {
            chars: fmt.chars().peekable(),
            big: cfg!(target_endian = "big"),
        }
    }

    fn read_size(&mut self, default: usize) -> usize {
        let mut size = 0usize;
        while let Some(c) = self.chars.peek().copied() {
            if let Some(d) = c.to_digit(10) {
                size = size * 10 + d as usize;
                self.chars.next();
            } else {
                break;
            }
        }
        if size == 0 {
            default
        } else {
            size
        }
    }

    fn next_code(&mut self) -> Option<mlua::Result<Code>> {
        loop {
            let c = self.chars.next()?;
            let code = match c {
                ' ' | '\t' => continue,
                '>' => {
                    self.big = true;
                    continue;
                }
                '<' => {
                    self.big = false;
                    continue;
                }
                '=' | '!' => {
                    self.big = cfg!(target_endian = "big");
                    continue;
                }
                'b' => Code::Int { size: 1, signed: true },
                'B' => Code::Int { size: 1, signed: false },
                'h' => Code::Int { size: 2, signed: true },
                'H' => Code::Int { size: 2, signed: false },
                'i' => Code::Int { size: self.read_size(4), signed: true },
                'I' => Code::Int { size: self.read_size(4), signed: false },
                'l' => Code::Int { size: 8, signed: true },
                'L' => Code::Int { size: 8, signed: false },
                'f' => Code::Float,
                'd' => Code::Double,
                's' => Code::Str,
                'c' => {
                    let size = self.read_size(0);
                    if size == 0 {
                        return Some(Err(runtime_error("missing size for format option 'c'")));
                    }
                    Code::Fixed(size)
                }
                other => {
                    return Some(Err(runtime_error(&format!(
                        "invalid format option '{}'",
                        other
                    ))))
                }
            };
            if let Code::Int { size, .. } = code {
                if size == 0 || size > 8 {
                    return Some(Err(runtime_error("integral size must be in 1..8")));
                }
            }
            return Some(Ok(code));
        }
    }
}

fn runtime_error(msg: &str) -> mlua::Error {
    mlua::Error::RuntimeError(msg.to_string())
}

fn arg_i64(value: &Value<'_>) -> mlua::Result<i64> {
    match value {
        Value::Integer(n) => Ok(*n),
        Value::Number(f) => Ok(*f as i64),
        _ => Err(runtime_error("integer argument expected")),
    }
}

fn arg_f64(value: &Value<'_>) -> mlua::Result<f64> {
    match value {
        Value::Integer(n) => Ok(*n as f64),
        Value::Number(f) => Ok(*f),
        _ => Err(runtime_error("number argument expected")),
    }
}

fn next_value<'a, 'lua>(
    args: &'a Variadic<Value<'lua>>,
    index: &mut usize,
) -> mlua::Result<&'a Value<'lua>> {
    let value = args
        .get(*index)
        .ok_or_else(|| runtime_error("not enough arguments for format"))?;
    *index += 1;
    Ok(value)
}

fn struct_pack<'lua>(
    lua: &'lua Lua,
    (fmt, args): (String, Variadic<Value<'lua>>),
) -> mlua::Result<mlua::String<'lua>> {
    let mut parser = FormatParser::new(&fmt);
    let mut out = BytesMut::new();
    let mut next_arg = 0usize;

    while let Some(code) = parser.next_code() {
        match code? {
            Code::Int { size, .. } => {
                let v = arg_i64(next_value(&args, &mut next_arg)?)?;
                if parser.big {
                    out.put_int(v, size);
                } else {
                    out.put_int_le(v, size);
                }
            }
            Code::Float => {
                let v = arg_f64(next_value(&args, &mut next_arg)?)? as f32;
                if parser.big {
                    out.put_f32(v);
                } else {
                    out.put_f32_le(v);
                }
            }
            Code::Double => {
                let v = arg_f64(next_value(&args, &mut next_arg)?)?;
                if parser.big {
                    out.put_f64(v);
                } else {
                    out.put_f64_le(v);
                }
            }
            Code::Str => match next_value(&args, &mut next_arg)? {
                Value::String(s) => {
                    out.put_slice(s.as_bytes());
                    out.put_u8(0);
                }
                _ => return Err(runtime_error("string argument expected")),
            },
            Code::Fixed(size) => match next_value(&args, &mut next_arg)? {
                Value::String(s) => {
                    let bytes = s.as_bytes();
                    if bytes.len() != size {
                        return Err(runtime_error("string size mismatch for format option 'c'"));
                    }
                    out.put_slice(bytes);
                }
                _ => return Err(runtime_error("string argument expected")),
            },
        }
    }
    lua.create_string(&out)
}

fn struct_unpack<'lua>(
    lua: &'lua Lua,
    (fmt, data): (String, mlua::String<'lua>),
) -> mlua::Result<MultiValue<'lua>> {
    let mut parser = FormatParser::new(&fmt);
    let all = data.as_bytes();
    let mut buf = all;
    let mut values = Vec::new();

    while let Some(code) = parser.next_code() {
        match code? {
            Code::Int { size, signed } => {
                if buf.remaining() < size {
                    return Err(runtime_error("data string too short"));
                }
                let v = match (signed, parser.big) {
                    (true, true) => buf.get_int(size),
                    (true, false) => buf.get_int_le(size),
                    (false, true) => buf.get_uint(size) as i64,
                    (false, false) => buf.get_uint_le(size) as i64,
                };
                values.push(Value::Integer(v));
            }
            Code::Float => {
                if buf.remaining() < 4 {
                    return Err(runtime_error("data string too short"));
                }
                let v = if parser.big { buf.get_f32() } else { buf.get_f32_le() };
                values.push(Value::Number(f64::from(v)));
            }
            Code::Double => {
                if buf.remaining() < 8 {
                    return Err(runtime_error("data string too short"));
                }
                let v = if parser.big { buf.get_f64() } else { buf.get_f64_le() };
                values.push(Value::Number(v));
            }
            Code::Str => {
                let pos = buf
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| runtime_error("unfinished string for format 's'"))?;
                values.push(Value::String(lua.create_string(&buf[..pos])?));
                buf.advance(pos + 1);
            }
            Code::Fixed(size) => {
                if buf.remaining() < size {
                    return Err(runtime_error("data string too short"));
                }
                values.push(Value::String(lua.create_string(&buf[..size])?));
                buf.advance(size);
            }
        }
    }

    // Trailing value is the 1-based index of the first unread byte, so
    // callers can resume decoding from where this unpack stopped.
    let consumed = all.len() - buf.remaining();
    values.push(Value::Integer(consumed as i64 + 1));
    Ok(MultiValue::from_vec(values))
}

fn register_struct(lua: &Lua) -> mlua::Result<()> {
    let strukt = lua.create_table()?;
    strukt.set("pack", lua.create_function(struct_pack)?)?;
    strukt.set("unpack", lua.create_function(struct_unpack)?)?;
    lua.globals().raw_set("struct", strukt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> Lua {
        let lua = Lua::new();
        register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_cjson_round_trip() {
        let lua = lua();
        let out: String = lua
            .load("return cjson.encode(cjson.decode('{\"a\":[1,2,3]}')['a'])")
            .eval()
            .unwrap();
        assert_eq!(out, "[1,2,3]");
    }

    #[test]
    fn test_cjson_null_decodes_to_nil() {
        let lua = lua();
        let is_nil: bool = lua.load("return cjson.decode('null') == nil").eval().unwrap();
        assert!(is_nil);
    }

    #[test]
    fn test_struct_pack_big_endian_u32() {
        let lua = lua();
        let packed: mlua::String<'_> = lua.load("return struct.pack('>I4', 1)").eval().unwrap();
        assert_eq!(packed.as_bytes(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_struct_pack_unpack_round_trip() {
        let lua = lua();
        let (a, b, s, pos): (i64, i64, String, i64) = lua
            .load("return struct.unpack('<hI4s', struct.pack('<hI4s', -2, 70000, 'hey'))")
            .eval()
            .unwrap();
        assert_eq!(a, -2);
        assert_eq!(b, 70000);
        assert_eq!(s, "hey");
        // 2 + 4 + 4 bytes consumed, next index is 11.
        assert_eq!(pos, 11);
    }

    #[test]
    fn test_struct_unpack_short_data_errors() {
        let lua = lua();
        let err = lua.load("return struct.unpack('>I4', 'ab')").exec().unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_struct_invalid_format_errors() {
        let lua = lua();
        let err = lua.load("return struct.pack('q', 1)").exec().unwrap_err();
        assert!(err.to_string().contains("invalid format option"));
    }

    #[test]
    fn test_cmsgpack_round_trip_multiple_values() {
        let lua = lua();
        let (n, s, third): (i64, String, i64) = lua
            .load("return cmsgpack.unpack(cmsgpack.pack(5, 'abc', {10, 20}))")
            .eval()
            .map(|(n, s, t): (i64, String, mlua::Table<'_>)| {
                (n, s, t.get::<_, i64>(2).unwrap())
            })
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(s, "abc");
        assert_eq!(third, 20);
    }

    #[test]
    fn test_cmsgpack_map_round_trip() {
        let lua = lua();
        let v: i64 = lua
            .load("return cmsgpack.unpack(cmsgpack.pack({x = 7})).x")
            .eval()
            .unwrap();
        assert_eq!(v, 7);
    }
}
