/// String built-ins: casting, slicing, case, padding, pattern matching.
use crate::errors::{self, Error, Result};
use crate::expr::eval::Machine;
use crate::expr::functions;
use crate::output;
use crate::value::Value;

use super::CallCtx;

fn type_error(ctx: &CallCtx, what: &str) -> Error {
    Error::new(
        errors::T0410_ARGUMENT_TYPE,
        ctx.position,
        format!("argument of ${what} does not match the expected type"),
    )
}

pub fn string(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    // A non-boolean second argument is ignored.
    let pretty = matches!(args.get(1), Some(Value::Bool(true)));
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::String(s) => Ok(Value::String(s.clone())),
        f if f.is_callable() => Ok(Value::String(String::new())),
        other => Ok(Value::String(output::stringify(other, pretty)?)),
    }
}

pub fn length(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        _ => Err(type_error(ctx, "length")),
    }
}

pub fn substring(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let s = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => s,
        _ => return Err(type_error(ctx, "substring")),
    };
    let Some(start) = args[1].as_f64() else {
        return Err(type_error(ctx, "substring"));
    };
    let length = match args.get(2) {
        None | Some(Value::Undefined) => None,
        Some(v) => Some(v.as_f64().ok_or_else(|| type_error(ctx, "substring"))?),
    };
    let chars: Vec<char> = s.chars().collect();
    let mut start = start.floor();
    if start < 0.0 {
        start += chars.len() as f64;
    }
    let start = start.max(0.0) as usize;
    let taken: String = match length {
        Some(len) => chars
            .iter()
            .skip(start)
            .take(len.floor().max(0.0) as usize)
            .collect(),
        None => chars.iter().skip(start).collect(),
    };
    Ok(Value::String(taken))
}

pub fn substring_before(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let (s, sep) = match (&args[0], &args[1]) {
        (Value::Undefined, _) => return Ok(Value::Undefined),
        (Value::String(s), Value::String(sep)) => (s, sep),
        _ => return Err(type_error(ctx, "substringBefore")),
    };
    Ok(Value::String(match s.find(sep.as_str()) {
        Some(at) => s[..at].to_string(),
        None => s.clone(),
    }))
}

pub fn substring_after(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let (s, sep) = match (&args[0], &args[1]) {
        (Value::Undefined, _) => return Ok(Value::Undefined),
        (Value::String(s), Value::String(sep)) => (s, sep),
        _ => return Err(type_error(ctx, "substringAfter")),
    };
    Ok(Value::String(match s.find(sep.as_str()) {
        Some(at) => s[at + sep.len()..].to_string(),
        None => s.clone(),
    }))
}

pub fn uppercase(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::String(s) => Ok(Value::String(s.to_uppercase())),
        _ => Err(type_error(ctx, "uppercase")),
    }
}

pub fn lowercase(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::String(s) => Ok(Value::String(s.to_lowercase())),
        _ => Err(type_error(ctx, "lowercase")),
    }
}

/// Trims leading/trailing whitespace and collapses internal runs to a
/// single space.
pub fn trim(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::String(s) => Ok(Value::String(
            s.split_whitespace().collect::<Vec<_>>().join(" "),
        )),
        _ => Err(type_error(ctx, "trim")),
    }
}

pub fn pad(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let s = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => s,
        _ => return Err(type_error(ctx, "pad")),
    };
    let Some(width) = args[1].as_integer() else {
        return Err(type_error(ctx, "pad"));
    };
    let pad_chars: Vec<char> = match args.get(2) {
        None | Some(Value::Undefined) => vec![' '],
        Some(Value::String(p)) if !p.is_empty() => p.chars().collect(),
        Some(Value::String(_)) => vec![' '],
        _ => return Err(type_error(ctx, "pad")),
    };
    let current = s.chars().count();
    let target = width.unsigned_abs() as usize;
    if current >= target {
        return Ok(Value::String(s.clone()));
    }
    let padding: String = pad_chars
        .iter()
        .cycle()
        .take(target - current)
        .collect();
    let padded = if width < 0 {
        format!("{padding}{s}")
    } else {
        format!("{s}{padding}")
    };
    Ok(Value::String(padded))
}

pub fn contains(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let s = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => s,
        _ => return Err(type_error(ctx, "contains")),
    };
    match &args[1] {
        Value::String(pat) => Ok(Value::Bool(s.contains(pat.as_str()))),
        Value::Regex(re) => Ok(Value::Bool(re.is_match(s))),
        _ => Err(type_error(ctx, "contains")),
    }
}

pub fn split(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let s = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => s,
        _ => return Err(type_error(ctx, "split")),
    };
    let limit = match args.get(2) {
        None | Some(Value::Undefined) => None,
        Some(Value::Number(n)) => {
            if *n < 0.0 {
                return Err(Error::new(
                    errors::D3020_NEGATIVE_SPLIT_LIMIT,
                    ctx.position,
                    "the limit of $split must not be negative",
                ));
            }
            Some(n.floor() as usize)
        }
        _ => return Err(type_error(ctx, "split")),
    };
    let mut parts: Vec<Value> = match &args[1] {
        // An empty separator splits into individual characters.
        Value::String(sep) if sep.is_empty() => {
            s.chars().map(|c| Value::String(c.to_string())).collect()
        }
        Value::String(sep) => s
            .split(sep.as_str())
            .map(|p| Value::String(p.to_string()))
            .collect(),
        Value::Regex(re) => re
            .split(s)
            .map(|p| Value::String(p.to_string()))
            .collect(),
        _ => return Err(type_error(ctx, "split")),
    };
    if let Some(limit) = limit {
        parts.truncate(limit);
    }
    Ok(Value::array(parts))
}

pub fn join(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let sep = match args.get(1) {
        None | Some(Value::Undefined) => "",
        Some(Value::String(s)) => s.as_str(),
        _ => return Err(type_error(ctx, "join")),
    };
    let parts: Vec<&str> = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => vec![s.as_str()],
        Value::Array(items, _) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item.unbound() {
                    Value::String(s) => out.push(s.as_str()),
                    _ => return Err(type_error(ctx, "join")),
                }
            }
            out
        }
        _ => return Err(type_error(ctx, "join")),
    };
    Ok(Value::String(parts.join(sep)))
}

/// Build the `{match, index, groups}` object for one regex capture.
fn capture_object(haystack: &str, caps: &regex::Captures) -> Value {
    let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    let byte_index = caps.get(0).map(|m| m.start()).unwrap_or(0);
    let char_index = haystack[..byte_index].chars().count();
    let groups: Vec<Value> = caps
        .iter()
        .skip(1)
        .map(|g| match g {
            Some(m) => Value::String(m.as_str().to_string()),
            None => Value::String(String::new()),
        })
        .collect();
    Value::object(vec![
        ("match".to_string(), Value::String(whole.to_string())),
        ("index".to_string(), Value::Number(char_index as f64)),
        ("groups".to_string(), Value::array(groups)),
    ])
}

/// First-match helper, also used when a regex value is applied as a
/// function.
pub(crate) fn first_match(re: &regex::Regex, s: &str) -> Value {
    match re.captures(s) {
        Some(caps) => capture_object(s, &caps),
        None => Value::Undefined,
    }
}

pub fn match_(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let s = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => s,
        _ => return Err(type_error(ctx, "match")),
    };
    let Value::Regex(re) = &args[1] else {
        return Err(type_error(ctx, "match"));
    };
    let limit = match args.get(2) {
        None | Some(Value::Undefined) => usize::MAX,
        Some(Value::Number(n)) if *n >= 0.0 => n.floor() as usize,
        _ => return Err(type_error(ctx, "match")),
    };
    let mut out = Vec::new();
    for caps in re.captures_iter(s) {
        if out.len() >= limit {
            break;
        }
        let m = caps.get(0).map(|m| m.as_str().len()).unwrap_or(0);
        if m == 0 {
            return Err(Error::new(
                errors::D1004_ZERO_LENGTH_MATCH,
                ctx.position,
                "the regular expression matched a zero-length string",
            ));
        }
        out.push(capture_object(s, &caps));
    }
    Ok(crate::expr::eval::collapse(out, false))
}

pub fn replace(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let s = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => s,
        _ => return Err(type_error(ctx, "replace")),
    };
    let limit = match args.get(3) {
        None | Some(Value::Undefined) => usize::MAX,
        Some(Value::Number(n)) => {
            if *n < 0.0 {
                return Err(Error::new(
                    errors::D3011_NEGATIVE_REPLACE_LIMIT,
                    ctx.position,
                    "the limit of $replace must not be negative",
                ));
            }
            n.floor() as usize
        }
        _ => return Err(type_error(ctx, "replace")),
    };
    match &args[1] {
        Value::String(pattern) => {
            if pattern.is_empty() {
                return Err(Error::new(
                    errors::D3010_EMPTY_PATTERN,
                    ctx.position,
                    "the pattern of $replace must not be an empty string",
                ));
            }
            let Value::String(replacement) = &args[2] else {
                return Err(type_error(ctx, "replace"));
            };
            let mut out = String::new();
            let mut rest = s.as_str();
            let mut done = 0usize;
            while done < limit {
                match rest.find(pattern.as_str()) {
                    Some(at) => {
                        out.push_str(&rest[..at]);
                        out.push_str(replacement);
                        rest = &rest[at + pattern.len()..];
                        done += 1;
                    }
                    None => break,
                }
            }
            out.push_str(rest);
            Ok(Value::String(out))
        }
        Value::Regex(re) => {
            let mut out = String::new();
            let mut last = 0usize;
            let mut done = 0usize;
            for caps in re.captures_iter(s) {
                if done >= limit {
                    break;
                }
                let m = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
                if m.0 == m.1 {
                    return Err(Error::new(
                        errors::D1004_ZERO_LENGTH_MATCH,
                        ctx.position,
                        "the regular expression matched a zero-length string",
                    ));
                }
                out.push_str(&s[last..m.0]);
                match &args[2] {
                    Value::String(template) => {
                        out.push_str(&expand_template(template, &caps));
                    }
                    f if f.is_callable() => {
                        let replaced = functions::apply(
                            machine,
                            f,
                            vec![capture_object(s, &caps)],
                            ctx,
                        )?;
                        match replaced.unbound() {
                            Value::String(r) => out.push_str(r),
                            _ => return Err(type_error(ctx, "replace")),
                        }
                    }
                    _ => return Err(type_error(ctx, "replace")),
                }
                last = m.1;
                done += 1;
            }
            out.push_str(&s[last..]);
            Ok(Value::String(out))
        }
        _ => Err(type_error(ctx, "replace")),
    }
}

/// Substitute `$0`…`$N` group references in a replacement template;
/// `$$` is a literal dollar.
fn expand_template(template: &str, caps: &regex::Captures) -> String {
    let bytes = template.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'$' {
                out.push('$');
                i += 2;
                continue;
            }
            if bytes[i + 1].is_ascii_digit() {
                // Take the longest group number that exists.
                let mut end = i + 2;
                if end < bytes.len() && bytes[end].is_ascii_digit() {
                    let two: usize = template[i + 1..end + 1].parse().unwrap_or(0);
                    if two < caps.len() {
                        end += 1;
                    }
                }
                let n: usize = template[i + 1..end].parse().unwrap_or(0);
                if let Some(m) = caps.get(n) {
                    out.push_str(m.as_str());
                }
                i = end;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap_or('$');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(pattern: &str) -> regex::Regex {
        regex::Regex::new(pattern).unwrap()
    }

    #[test]
    fn template_expansion() {
        let caps = re(r"(\w+)@(\w+)").captures("user@host").unwrap();
        assert_eq!(expand_template("$2:$1", &caps), "host:user");
        assert_eq!(expand_template("$$$0", &caps), "$user@host");
        assert_eq!(expand_template("$9", &caps), "");
    }

    #[test]
    fn capture_object_reports_char_index() {
        let caps = re("b+").captures("ααbb").unwrap();
        let obj = capture_object("ααbb", &caps);
        assert_eq!(obj.lookup("index"), Some(&Value::Number(2.0)));
        assert_eq!(obj.lookup("match"), Some(&Value::String("bb".into())));
    }
}
