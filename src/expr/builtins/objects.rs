/// Object built-ins. All objects are insertion-ordered, so `$keys`,
/// `$each` and `$sift` iterate in that order.
use std::rc::Rc;

use crate::errors::{self, Error, Result};
use crate::expr::eval::{collapse, Machine};
use crate::expr::functions;
use crate::value::Value;

use super::CallCtx;

fn type_error(ctx: &CallCtx, what: &str) -> Error {
    Error::new(
        errors::T0410_ARGUMENT_TYPE,
        ctx.position,
        format!("argument of ${what} does not match the expected type"),
    )
}

pub fn keys(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let mut out: Vec<String> = Vec::new();
    collect_keys(&args[0], &mut out);
    Ok(collapse(out.into_iter().map(Value::String).collect(), false))
}

/// Keys of an object; for an array, the deduplicated union of the keys of
/// its element objects, in first-seen order.
fn collect_keys(v: &Value, out: &mut Vec<String>) {
    match v.unbound() {
        Value::Object(pairs) => {
            for (k, _) in pairs.iter() {
                if !out.iter().any(|seen| seen == k) {
                    out.push(k.clone());
                }
            }
        }
        Value::Array(items, _) => {
            for item in items.iter() {
                collect_keys(item, out);
            }
        }
        _ => {}
    }
}

pub fn lookup(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Value::String(key) = &args[1] else {
        return Err(type_error(ctx, "lookup"));
    };
    Ok(lookup_in(&args[0], key))
}

fn lookup_in(v: &Value, key: &str) -> Value {
    match v.unbound() {
        Value::Object(_) => v.lookup(key).cloned().unwrap_or(Value::Undefined),
        Value::Array(items, _) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match lookup_in(item, key) {
                    Value::Undefined => {}
                    Value::Array(sub, _) => out.extend(sub.iter().cloned()),
                    found => out.push(found),
                }
            }
            collapse(out, false)
        }
        _ => Value::Undefined,
    }
}

pub fn merge(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let sources: Vec<Value> = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::Array(items, _) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mut out: Vec<(String, Value)> = Vec::new();
    for source in sources {
        let Value::Object(pairs) = source.unbound() else {
            return Err(type_error(ctx, "merge"));
        };
        for (k, v) in pairs.iter() {
            match out.iter_mut().find(|(key, _)| key == k) {
                Some(slot) => slot.1 = v.clone(),
                None => out.push((k.clone(), v.clone())),
            }
        }
    }
    Ok(Value::object(out))
}

pub fn spread(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let mut out = Vec::new();
    spread_into(&args[0], &mut out);
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::Object(_) | Value::Array(..) => Ok(collapse(out, false)),
        other => Ok(other.clone()),
    }
}

fn spread_into(v: &Value, out: &mut Vec<Value>) {
    match v.unbound() {
        Value::Object(pairs) => {
            for (k, val) in pairs.iter() {
                out.push(Value::object(vec![(k.clone(), val.clone())]));
            }
        }
        Value::Array(items, _) => {
            for item in items.iter() {
                spread_into(item, out);
            }
        }
        _ => {}
    }
}

pub fn each(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Value::Object(pairs) = &args[0] else {
        return match &args[0] {
            Value::Undefined => Ok(Value::Undefined),
            _ => Err(type_error(ctx, "each")),
        };
    };
    let func = &args[1];
    if !func.is_callable() {
        return Err(type_error(ctx, "each"));
    }
    let mut out = Vec::with_capacity(pairs.len());
    for (k, v) in pairs.iter() {
        let result = functions::apply_trimmed(
            machine,
            func,
            vec![
                v.clone(),
                Value::String(k.clone()),
                Value::Object(Rc::clone(pairs)),
            ],
            ctx,
        )?;
        if !result.is_undefined() {
            out.push(result.deep_unbound());
        }
    }
    Ok(collapse(out, false))
}

pub fn sift(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let func = &args[1];
    if !func.is_callable() {
        return Err(type_error(ctx, "sift"));
    }
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::Object(pairs) => sift_object(machine, ctx, pairs, func),
        // On an array, sift maps element-wise.
        Value::Array(items, _) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item.unbound() {
                    Value::Object(pairs) => {
                        let sifted = sift_object(machine, ctx, pairs, func)?;
                        if !sifted.is_undefined() {
                            out.push(sifted);
                        }
                    }
                    _ => return Err(type_error(ctx, "sift")),
                }
            }
            Ok(collapse(out, false))
        }
        _ => Err(type_error(ctx, "sift")),
    }
}

fn sift_object(
    machine: &Machine,
    ctx: &CallCtx,
    pairs: &Rc<Vec<(String, Value)>>,
    func: &Value,
) -> Result<Value> {
    let mut out = Vec::new();
    for (k, v) in pairs.iter() {
        let verdict = functions::apply_trimmed(
            machine,
            func,
            vec![
                v.clone(),
                Value::String(k.clone()),
                Value::Object(Rc::clone(pairs)),
            ],
            ctx,
        )?;
        if verdict.is_truthy() {
            out.push((k.clone(), v.clone()));
        }
    }
    if out.is_empty() {
        Ok(Value::Undefined)
    } else {
        Ok(Value::object(out))
    }
}
