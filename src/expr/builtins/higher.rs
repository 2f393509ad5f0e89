/// Higher-order built-ins. These re-enter the evaluator through the
/// lambda runtime, trimming their `(item, index, array)` argument lists
/// to the callee's arity.
use crate::errors::{self, Error, Result};
use crate::expr::eval::{collapse, to_items, Machine};
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

pub fn map(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    if args[0].is_undefined() {
        return Ok(Value::Undefined);
    }
    let func = &args[1];
    if !func.is_callable() {
        return Err(type_error(ctx, "map"));
    }
    let items = to_items(args[0].clone());
    let whole = Value::array(items.clone());
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let result = functions::apply_trimmed(
            machine,
            func,
            vec![item.clone(), Value::Number(i as f64), whole.clone()],
            ctx,
        )?;
        if !result.is_undefined() {
            out.push(result.deep_unbound());
        }
    }
    Ok(collapse(out, false))
}

pub fn filter(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    if args[0].is_undefined() {
        return Ok(Value::Undefined);
    }
    let pred = &args[1];
    if !pred.is_callable() {
        return Err(type_error(ctx, "filter"));
    }
    let items = to_items(args[0].clone());
    let whole = Value::array(items.clone());
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let verdict = functions::apply_trimmed(
            machine,
            pred,
            vec![item.clone(), Value::Number(i as f64), whole.clone()],
            ctx,
        )?;
        if verdict.is_truthy() {
            out.push(item.clone());
        }
    }
    Ok(collapse(out, false))
}

pub fn reduce(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    if args[0].is_undefined() {
        return Ok(Value::Undefined);
    }
    let func = &args[1];
    if !func.is_callable() {
        return Err(type_error(ctx, "reduce"));
    }
    if functions::arity(func) < 2 {
        return Err(Error::new(
            errors::D3050_REDUCE_ARITY,
            ctx.position,
            "the callback of $reduce must accept at least two arguments",
        ));
    }
    let items = to_items(args[0].clone());
    let whole = Value::array(items.clone());
    let init = args.get(2).cloned().filter(|v| !v.is_undefined());
    let (mut acc, start) = match init {
        Some(init) => (init, 0),
        None => match items.first() {
            Some(first) => (first.deep_unbound(), 1),
            None => return Ok(Value::Undefined),
        },
    };
    for (i, item) in items.iter().enumerate().skip(start) {
        acc = functions::apply_trimmed(
            machine,
            func,
            vec![
                acc,
                item.clone(),
                Value::Number(i as f64),
                whole.clone(),
            ],
            ctx,
        )?;
    }
    Ok(acc.deep_unbound())
}

pub fn single(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    if args[0].is_undefined() {
        return Ok(Value::Undefined);
    }
    let pred = match args.get(1) {
        None | Some(Value::Undefined) => None,
        Some(f) if f.is_callable() => Some(f),
        Some(_) => return Err(type_error(ctx, "single")),
    };
    let items = to_items(args[0].clone());
    let whole = Value::array(items.clone());
    let mut found: Option<Value> = None;
    for (i, item) in items.iter().enumerate() {
        let keep = match pred {
            Some(pred) => functions::apply_trimmed(
                machine,
                pred,
                vec![item.clone(), Value::Number(i as f64), whole.clone()],
                ctx,
            )?
            .is_truthy(),
            None => true,
        };
        if keep {
            if found.is_some() {
                return Err(Error::new(
                    errors::D3138_SINGLE_MULTIPLE_MATCHES,
                    ctx.position,
                    "$single matched more than one value",
                ));
            }
            found = Some(item.clone());
        }
    }
    found.ok_or_else(|| {
        Error::new(
            errors::D3139_SINGLE_NO_MATCH,
            ctx.position,
            "$single matched no values",
        )
    })
}
