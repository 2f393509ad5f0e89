/// Array built-ins: append, reverse, shuffle, zip, distinct, sort.
use rand::seq::SliceRandom;

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

pub fn append(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Undefined, b) => Ok(b.clone()),
        (a, Value::Undefined) => Ok(a.clone()),
        (a, b) => {
            let mut items = to_items(a.clone());
            items.extend(to_items(b.clone()));
            Ok(Value::sequence(items))
        }
    }
}

pub fn reverse(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        other => {
            let mut items = to_items(other.clone());
            items.reverse();
            Ok(Value::array(items))
        }
    }
}

pub fn shuffle(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        other => {
            let mut items = to_items(other.clone());
            items.shuffle(&mut rand::thread_rng());
            Ok(Value::array(items))
        }
    }
}

pub fn zip(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let mut columns = Vec::with_capacity(args.len());
    for arg in args {
        if arg.is_undefined() {
            // Any missing argument truncates the zip to nothing.
            return Ok(Value::array(vec![]));
        }
        columns.push(to_items(arg.clone()));
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        out.push(Value::array(
            columns.iter().map(|col| col[row].clone()).collect(),
        ));
    }
    Ok(Value::array(out))
}

pub fn distinct(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        other => {
            let mut out: Vec<Value> = Vec::new();
            for item in to_items(other.clone()) {
                if !out.iter().any(|seen| *seen == item) {
                    out.push(item);
                }
            }
            Ok(collapse(out, false))
        }
    }
}

pub fn sort(machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let items = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        other => to_items(other.clone()),
    };
    if items.len() <= 1 {
        return Ok(Value::array(items));
    }
    let sorted = match args.get(1) {
        None | Some(Value::Undefined) => {
            // Default comparator needs a homogeneous sequence of numbers
            // or strings.
            let all_numbers = items
                .iter()
                .all(|v| matches!(v.unbound(), Value::Number(_)));
            let all_strings = items
                .iter()
                .all(|v| matches!(v.unbound(), Value::String(_)));
            if !all_numbers && !all_strings {
                return Err(Error::new(
                    errors::D3070_SORT_MIXED_TYPES,
                    ctx.position,
                    "the arguments of $sort must all be numbers or all be strings",
                ));
            }
            merge_sort(items, &|a, b| {
                Ok(match (a.unbound(), b.unbound()) {
                    (Value::Number(x), Value::Number(y)) => x > y,
                    (Value::String(x), Value::String(y)) => x > y,
                    _ => false,
                })
            })?
        }
        Some(f) if f.is_callable() => merge_sort(items, &|a, b| {
            let verdict =
                functions::apply(machine, f, vec![a.deep_unbound(), b.deep_unbound()], ctx)?;
            Ok(verdict.is_truthy())
        })?,
        Some(_) => return Err(type_error(ctx, "sort")),
    };
    Ok(Value::array(sorted))
}

/// Stable bottom-up merge sort with a fallible "should swap" comparator:
/// `swap(a, b)` true means `a` sorts after `b`. Equal elements keep their
/// input order because the left run wins ties.
pub(crate) fn merge_sort(
    items: Vec<Value>,
    swap: &dyn Fn(&Value, &Value) -> Result<bool>,
) -> Result<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mid = items.len() / 2;
    let mut right = items;
    let left = merge_sort(right.drain(..mid).collect(), swap)?;
    let right = merge_sort(right, swap)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (l.peek(), r.peek()) {
        if swap(a, b)? {
            out.push(r.next().unwrap());
        } else {
            out.push(l.next().unwrap());
        }
    }
    out.extend(l);
    out.extend(r);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(ns: &[f64]) -> Vec<Value> {
        ns.iter().map(|n| Value::Number(*n)).collect()
    }

    #[test]
    fn merge_sort_orders_and_is_stable() {
        let sorted = merge_sort(numbers(&[3.0, 1.0, 2.0, 1.0]), &|a, b| {
            Ok(a.as_f64() > b.as_f64())
        })
        .unwrap();
        assert_eq!(sorted, numbers(&[1.0, 1.0, 2.0, 3.0]));
    }

    #[test]
    fn merge_sort_propagates_comparator_errors() {
        let result = merge_sort(numbers(&[2.0, 1.0]), &|_, _| {
            Err(Error::unpositioned(errors::D3137_EVALUATOR_ERROR, "boom"))
        });
        assert!(result.is_err());
    }
}
