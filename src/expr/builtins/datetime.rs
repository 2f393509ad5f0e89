/// Date/time built-ins (jiff). The clock is captured once per evaluation,
/// at first use.
use jiff::Timestamp;

use crate::errors::{self, Error, Result};
use crate::expr::eval::Machine;
use crate::value::Value;

use super::CallCtx;

/// ISO 8601 with millisecond precision, always UTC.
fn iso(ts: Timestamp) -> String {
    let zoned = ts.to_zoned(jiff::tz::TimeZone::UTC);
    format!(
        "{}.{:03}Z",
        zoned.strftime("%Y-%m-%dT%H:%M:%S"),
        zoned.millisecond()
    )
}

pub fn now(machine: &Machine, _ctx: &CallCtx, _args: &[Value]) -> Result<Value> {
    Ok(Value::String(iso(machine.now())))
}

pub fn millis(machine: &Machine, _ctx: &CallCtx, _args: &[Value]) -> Result<Value> {
    Ok(Value::Number(machine.now().as_millisecond() as f64))
}

pub fn from_millis(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let Some(n) = args[0].as_f64() else {
        return match &args[0] {
            Value::Undefined => Ok(Value::Undefined),
            other => Err(Error::new(
                errors::T0410_ARGUMENT_TYPE,
                ctx.position,
                format!("argument of $fromMillis must be a number (got {})", other.type_name()),
            )),
        };
    };
    let ts = Timestamp::from_millisecond(n as i64).map_err(|e| {
        Error::new(
            errors::D3110_BAD_TIMESTAMP,
            ctx.position,
            format!("$fromMillis: {e}"),
        )
    })?;
    Ok(Value::String(iso(ts)))
}

pub fn to_millis(_machine: &Machine, ctx: &CallCtx, args: &[Value]) -> Result<Value> {
    let s = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(s) => s,
        other => {
            return Err(Error::new(
                errors::T0410_ARGUMENT_TYPE,
                ctx.position,
                format!("argument of $toMillis must be a string (got {})", other.type_name()),
            ));
        }
    };
    // Try a full timestamp first, then a civil datetime assumed UTC.
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Ok(Value::Number(ts.as_millisecond() as f64));
    }
    if let Ok(dt) = s.parse::<jiff::civil::DateTime>() {
        if let Ok(zoned) = dt.to_zoned(jiff::tz::TimeZone::UTC) {
            return Ok(Value::Number(zoned.timestamp().as_millisecond() as f64));
        }
    }
    if let Ok(date) = s.parse::<jiff::civil::Date>() {
        if let Ok(zoned) = date.to_zoned(jiff::tz::TimeZone::UTC) {
            return Ok(Value::Number(zoned.timestamp().as_millisecond() as f64));
        }
    }
    Err(Error::new(
        errors::D3110_BAD_TIMESTAMP,
        ctx.position,
        format!("$toMillis: unable to parse '{s}' as a timestamp"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_formats_with_milliseconds() {
        let ts = Timestamp::from_millisecond(1_700_000_000_123).unwrap();
        assert_eq!(iso(ts), "2023-11-14T22:13:20.123Z");
    }
}
