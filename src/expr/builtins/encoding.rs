/// Base64 and URL codec built-ins.
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::errors::{self, Error, Result};
use crate::expr::eval::Machine;
use crate::value::Value;

use super::CallCtx;

fn type_error(ctx: &CallCtx, what: &str) -> Error {
    Error::new(
        errors::T0410_ARGUMENT_TYPE,
        ctx.position,
        format!("argument of ${what} does not match the expected type"),
    )
}

fn string_arg<'a>(ctx: &CallCtx, args: &'a [Value], what: &str) -> Result<Option<&'a str>> {
    match &args[0] {
        Value::Undefined => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(type_error(ctx, what)),
    }
}

pub fn base64_encode(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match string_arg(ctx, args, "base64encode")? {
        None => Ok(Value::Undefined),
        Some(s) => Ok(Value::String(STANDARD.encode(s.as_bytes()))),
    }
}

pub fn base64_decode(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Some(s) = string_arg(ctx, args, "base64decode")? else {
        return Ok(Value::Undefined);
    };
    let bytes = STANDARD.decode(s).map_err(|e| {
        Error::new(
            errors::D3137_EVALUATOR_ERROR,
            ctx.position,
            format!("$base64decode: invalid input: {e}"),
        )
    })?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|_| {
            Error::new(
                errors::D3137_EVALUATOR_ERROR,
                ctx.position,
                "$base64decode: decoded bytes are not valid UTF-8",
            )
        })
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

fn is_url_reserved(b: u8) -> bool {
    matches!(
        b,
        b';' | b'/' | b'?' | b':' | b'@' | b'&' | b'=' | b'+' | b'$' | b',' | b'#'
    )
}

fn percent_encode(s: &str, keep_reserved: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) || (keep_reserved && is_url_reserved(b)) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn percent_decode(ctx: &CallCtx, s: &str, what: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3).and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    return Err(Error::new(
                        errors::D3137_EVALUATOR_ERROR,
                        ctx.position,
                        format!("${what}: malformed percent escape"),
                    ));
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    // CESU-8 encodings of lone surrogates start with ED A0..BF.
    let unpaired = out
        .windows(2)
        .any(|w| w[0] == 0xED && (0xA0..=0xBF).contains(&w[1]));
    String::from_utf8(out).map_err(|_| {
        if unpaired {
            Error::new(
                errors::D3140_UNPAIRED_SURROGATE,
                ctx.position,
                format!("${what}: unpaired surrogate in input"),
            )
        } else {
            Error::new(
                errors::D3137_EVALUATOR_ERROR,
                ctx.position,
                format!("${what}: decoded bytes are not valid UTF-8"),
            )
        }
    })
}

pub fn encode_url(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match string_arg(ctx, args, "encodeUrl")? {
        None => Ok(Value::Undefined),
        Some(s) => Ok(Value::String(percent_encode(s, true))),
    }
}

pub fn encode_url_component(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match string_arg(ctx, args, "encodeUrlComponent")? {
        None => Ok(Value::Undefined),
        Some(s) => Ok(Value::String(percent_encode(s, false))),
    }
}

pub fn decode_url(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match string_arg(ctx, args, "decodeUrl")? {
        None => Ok(Value::Undefined),
        Some(s) => percent_decode(ctx, s, "decodeUrl").map(Value::String),
    }
}

pub fn decode_url_component(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match string_arg(ctx, args, "decodeUrlComponent")? {
        None => Ok(Value::Undefined),
        Some(s) => percent_decode(ctx, s, "decodeUrlComponent").map(Value::String),
    }
}
