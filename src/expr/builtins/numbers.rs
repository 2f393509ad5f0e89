/// Numeric built-ins and the array aggregators.
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

fn number_arg(ctx: &CallCtx, args: &[Value], i: usize, what: &str) -> Result<Option<f64>> {
    match args.get(i) {
        None | Some(Value::Undefined) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(*n)),
        _ => Err(type_error(ctx, what)),
    }
}

pub fn number(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => {
            let parsed: std::result::Result<f64, _> = s.trim().parse();
            match parsed {
                Ok(n) if n.is_finite() => Ok(Value::Number(n)),
                _ => Err(Error::new(
                    errors::D3030_CAST_FAILED,
                    ctx.position,
                    format!("unable to cast '{s}' to a number"),
                )),
            }
        }
        _ => Err(type_error(ctx, "number")),
    }
}

pub fn abs(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    Ok(number_arg(ctx, args, 0, "abs")?
        .map_or(Value::Undefined, |n| Value::Number(n.abs())))
}

pub fn floor(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    Ok(number_arg(ctx, args, 0, "floor")?
        .map_or(Value::Undefined, |n| Value::Number(n.floor())))
}

pub fn ceil(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    Ok(number_arg(ctx, args, 0, "ceil")?
        .map_or(Value::Undefined, |n| Value::Number(n.ceil())))
}

/// Banker's rounding (round half to even), with an optional decimal
/// precision that may be negative.
pub fn round(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Some(n) = number_arg(ctx, args, 0, "round")? else {
        return Ok(Value::Undefined);
    };
    let precision = number_arg(ctx, args, 1, "round")?.unwrap_or(0.0) as i32;
    Ok(Value::Number(round_to(n, precision)))
}

fn round_to(n: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (n * factor).round_ties_even() / factor
}

pub fn power(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let (Some(base), Some(exp)) = (
        number_arg(ctx, args, 0, "power")?,
        number_arg(ctx, args, 1, "power")?,
    ) else {
        return Ok(Value::Undefined);
    };
    let result = base.powf(exp);
    if result.is_finite() {
        Ok(Value::Number(result))
    } else {
        Err(Error::new(
            errors::D3061_POWER_NOT_FINITE,
            ctx.position,
            format!("the result of $power({base}, {exp}) is out of range"),
        ))
    }
}

pub fn sqrt(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Some(n) = number_arg(ctx, args, 0, "sqrt")? else {
        return Ok(Value::Undefined);
    };
    if n < 0.0 {
        return Err(Error::new(
            errors::D3060_SQRT_NEGATIVE,
            ctx.position,
            "$sqrt cannot be applied to a negative number",
        ));
    }
    Ok(Value::Number(n.sqrt()))
}

pub fn random(_machine: &Machine, _ctx: &CallCtx, _args: &[Value]) -> Result<Value> {
    Ok(Value::Number(rand::random::<f64>()))
}

pub fn format_base(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Some(n) = number_arg(ctx, args, 0, "formatBase")? else {
        return Ok(Value::Undefined);
    };
    let radix = number_arg(ctx, args, 1, "formatBase")?.unwrap_or(10.0) as i64;
    if !(2..=36).contains(&radix) {
        return Err(Error::new(
            errors::D3100_BAD_RADIX,
            ctx.position,
            format!("the radix of $formatBase must be between 2 and 36, got {radix}"),
        ));
    }
    let rounded = n.round_ties_even() as i64;
    let negative = rounded < 0;
    let mut rest = rounded.unsigned_abs();
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(digits[(rest % radix as u64) as usize]);
        rest /= radix as u64;
        if rest == 0 {
            break;
        }
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    Ok(Value::String(String::from_utf8_lossy(&out).into_owned()))
}

/// Coerce an aggregate argument to a number list. Scalars auto-wrap;
/// a non-number element is a type error.
fn number_items(ctx: &CallCtx, args: &[Value], what: &str) -> Result<Option<Vec<f64>>> {
    match &args[0] {
        Value::Undefined => Ok(None),
        Value::Number(n) => Ok(Some(vec![*n])),
        Value::Array(items, _) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item.unbound() {
                    Value::Number(n) => out.push(*n),
                    _ => return Err(type_error(ctx, what)),
                }
            }
            Ok(Some(out))
        }
        _ => Err(type_error(ctx, what)),
    }
}

pub fn sum(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    Ok(number_items(ctx, args, "sum")?
        .map_or(Value::Undefined, |nums| {
            Value::Number(nums.iter().sum())
        }))
}

pub fn max(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match number_items(ctx, args, "max")? {
        None => Ok(Value::Undefined),
        Some(nums) => Ok(nums
            .into_iter()
            .reduce(f64::max)
            .map_or(Value::Undefined, Value::Number)),
    }
}

pub fn min(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match number_items(ctx, args, "min")? {
        None => Ok(Value::Undefined),
        Some(nums) => Ok(nums
            .into_iter()
            .reduce(f64::min)
            .map_or(Value::Undefined, Value::Number)),
    }
}

pub fn average(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match number_items(ctx, args, "average")? {
        None => Ok(Value::Undefined),
        Some(nums) if nums.is_empty() => Ok(Value::Undefined),
        Some(nums) => Ok(Value::Number(nums.iter().sum::<f64>() / nums.len() as f64)),
    }
}

pub fn count(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let n = match &args[0] {
        Value::Undefined => 0,
        Value::Array(items, _) => items.len(),
        _ => 1,
    };
    Ok(Value::Number(n as f64))
}
