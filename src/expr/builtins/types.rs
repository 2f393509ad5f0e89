/// Boolean casts, existence checks, type names, and the user-raised
/// error functions.
use crate::errors::{self, Error, Result};
use crate::expr::eval::Machine;
use crate::value::Value;

use super::CallCtx;

pub fn boolean(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        other => Ok(Value::Bool(other.is_truthy())),
    }
}

pub fn not(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        other => Ok(Value::Bool(!other.is_truthy())),
    }
}

pub fn exists(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!args[0].is_undefined()))
}

/// `$type` of an absent value is absent, consistent with undefined
/// propagation elsewhere.
pub fn type_of(_machine: &Machine, _ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Undefined => Ok(Value::Undefined),
        other => Ok(Value::String(other.type_name().to_string())),
    }
}

pub fn error(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let message = match args.first() {
        None | Some(Value::Undefined) => "$error() function evaluated".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(Error::new(
                errors::T0410_ARGUMENT_TYPE,
                ctx.position,
                format!(
                    "the message of $error must be a string (got {})",
                    other.type_name()
                ),
            ));
        }
    };
    Err(Error::new(errors::D3137_EVALUATOR_ERROR, ctx.position, message))
}

pub fn assert(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Value::Bool(condition) = &args[0] else {
        return Err(Error::new(
            errors::T0410_ARGUMENT_TYPE,
            ctx.position,
            format!(
                "the condition of $assert must be a boolean (got {})",
                args[0].type_name()
            ),
        ));
    };
    if *condition {
        return Ok(Value::Undefined);
    }
    let message = match args.get(1) {
        Some(Value::String(s)) => s.clone(),
        _ => "$assert() statement failed".to_string(),
    };
    Err(Error::new(errors::D3141_ASSERT_FAILED, ctx.position, message))
}
