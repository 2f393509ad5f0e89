/// JSON output formatting.
///
/// Writes `Value` directly to a `Write` sink — no intermediate `String`
/// allocation. Uses `itoa` for integral numbers and `ryu` for the rest.
use std::io::{self, Write};

use crate::errors::{self, Error};
use crate::value::Value;

/// Output formatting mode.
#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    /// Pretty-printed with indentation (default for TTY).
    Pretty,
    /// Compact single-line output (`-c`).
    Compact,
    /// Raw string output (`-r`) — strings without quotes.
    Raw,
}

/// ANSI color scheme for JSON output.
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub null: &'static str,
    pub bool_val: &'static str,
    pub number: &'static str,
    pub string: &'static str,
    pub bracket: &'static str,
    pub object_key: &'static str,
    pub reset: &'static str,
}

impl ColorScheme {
    pub fn default_colors() -> Self {
        Self {
            null: "\x1b[0;90m",
            bool_val: "\x1b[0;39m",
            number: "\x1b[0;39m",
            string: "\x1b[0;32m",
            bracket: "\x1b[1;39m",
            object_key: "\x1b[1;34m",
            reset: "\x1b[0m",
        }
    }

    /// No-color scheme (all empty strings).
    pub fn none() -> Self {
        Self {
            null: "",
            bool_val: "",
            number: "",
            string: "",
            bracket: "",
            object_key: "",
            reset: "",
        }
    }

    fn is_enabled(&self) -> bool {
        !self.reset.is_empty()
    }
}

/// Configuration for output formatting.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub mode: OutputMode,
    /// Indentation string (default "  ", or "\t" with --tab).
    pub indent: String,
    /// Sort object keys alphabetically (`-S`).
    pub sort_keys: bool,
    /// Color scheme for output.
    pub color: ColorScheme,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::Pretty,
            indent: "  ".to_string(),
            sort_keys: false,
            color: ColorScheme::none(),
        }
    }
}

/// JSON has no representation for non-finite numbers; refuse before
/// anything has been written to the sink.
pub fn check_serializable(value: &Value) -> errors::Result<()> {
    match value.unbound() {
        Value::Number(n) if !n.is_finite() => Err(Error::unpositioned(
            errors::D1001_NUMBER_NOT_FINITE,
            format!("attempting to serialize a non-finite number ({n})"),
        )),
        Value::Array(items, _) => items.iter().try_for_each(check_serializable),
        Value::Object(pairs) => pairs.iter().try_for_each(|(_, v)| check_serializable(v)),
        _ => Ok(()),
    }
}

/// Serialize a value to a JSON string (compact or pretty).
pub fn stringify(value: &Value, pretty: bool) -> errors::Result<String> {
    check_serializable(value)?;
    let config = OutputConfig {
        mode: if pretty {
            OutputMode::Pretty
        } else {
            OutputMode::Compact
        },
        ..OutputConfig::default()
    };
    let mut buf = Vec::new();
    write_value(&mut buf, value, &config).map_err(|e| {
        Error::unpositioned(errors::D3137_EVALUATOR_ERROR, format!("serialization failed: {e}"))
    })?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write a value to the output sink (no trailing newline). Callers should
/// run `check_serializable` first; a non-finite number that slips through
/// is written as `null`.
pub fn write_value<W: Write>(w: &mut W, value: &Value, config: &OutputConfig) -> io::Result<()> {
    match config.mode {
        OutputMode::Pretty => {
            let fmt = PrettyFmt {
                indent: &config.indent,
            };
            write_value_inner(w, value, &fmt, 0, config.sort_keys, &config.color)
        }
        OutputMode::Compact => {
            write_value_inner(w, value, &CompactFmt, 0, config.sort_keys, &config.color)
        }
        OutputMode::Raw => match value.unbound() {
            Value::String(s) => w.write_all(s.as_bytes()),
            _ => write_value_inner(w, value, &CompactFmt, 0, config.sort_keys, &config.color),
        },
    }
}

// ---------------------------------------------------------------------------
// Generic formatter infrastructure
// ---------------------------------------------------------------------------

/// Trait abstracting the whitespace/indentation differences between compact
/// and pretty-printed JSON output. Methods handle **only** whitespace;
/// structural characters are written by `write_value_inner` with color
/// wrapping.
trait JsonFormatter {
    fn after_open<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()>;
    fn before_first<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()>;
    fn after_sep<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()>;
    fn before_close<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()>;
    fn after_colon<W: Write>(&self, w: &mut W) -> io::Result<()>;
}

struct CompactFmt;

impl JsonFormatter for CompactFmt {
    #[inline]
    fn after_open<W: Write>(&self, _w: &mut W, _depth: usize) -> io::Result<()> {
        Ok(())
    }
    #[inline]
    fn before_first<W: Write>(&self, _w: &mut W, _depth: usize) -> io::Result<()> {
        Ok(())
    }
    #[inline]
    fn after_sep<W: Write>(&self, _w: &mut W, _depth: usize) -> io::Result<()> {
        Ok(())
    }
    #[inline]
    fn before_close<W: Write>(&self, _w: &mut W, _depth: usize) -> io::Result<()> {
        Ok(())
    }
    #[inline]
    fn after_colon<W: Write>(&self, _w: &mut W) -> io::Result<()> {
        Ok(())
    }
}

struct PrettyFmt<'a> {
    indent: &'a str,
}

impl JsonFormatter for PrettyFmt<'_> {
    fn after_open<W: Write>(&self, w: &mut W, _depth: usize) -> io::Result<()> {
        w.write_all(b"\n")
    }
    fn before_first<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()> {
        write_indent(w, depth + 1, self.indent)
    }
    fn after_sep<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()> {
        w.write_all(b"\n")?;
        write_indent(w, depth + 1, self.indent)
    }
    fn before_close<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()> {
        w.write_all(b"\n")?;
        write_indent(w, depth, self.indent)
    }
    fn after_colon<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(b" ")
    }
}

fn write_indent<W: Write>(w: &mut W, depth: usize, indent: &str) -> io::Result<()> {
    for _ in 0..depth {
        w.write_all(indent.as_bytes())?;
    }
    Ok(())
}

/// Write a colored structural character (brace, bracket, comma, colon).
#[inline]
fn write_colored<W: Write>(w: &mut W, ch: &[u8], color_code: &str, reset: &str) -> io::Result<()> {
    if !color_code.is_empty() {
        w.write_all(color_code.as_bytes())?;
        w.write_all(ch)?;
        w.write_all(reset.as_bytes())
    } else {
        w.write_all(ch)
    }
}

fn write_value_inner<W: Write, F: JsonFormatter>(
    w: &mut W,
    value: &Value,
    fmt: &F,
    depth: usize,
    sort_keys: bool,
    color: &ColorScheme,
) -> io::Result<()> {
    let c = color.is_enabled();
    match value.unbound() {
        // Absent values have no JSON form; inside aggregates they should
        // already have been dropped, so null is the safe rendering.
        Value::Undefined | Value::Null => {
            if c {
                w.write_all(color.null.as_bytes())?;
            }
            w.write_all(b"null")?;
            if c {
                w.write_all(color.reset.as_bytes())?;
            }
            Ok(())
        }
        Value::Bool(b) => {
            if c {
                w.write_all(color.bool_val.as_bytes())?;
            }
            w.write_all(if *b { b"true" } else { b"false" })?;
            if c {
                w.write_all(color.reset.as_bytes())?;
            }
            Ok(())
        }
        Value::Number(n) => {
            if c {
                w.write_all(color.number.as_bytes())?;
            }
            write_number(w, *n)?;
            if c {
                w.write_all(color.reset.as_bytes())?;
            }
            Ok(())
        }
        Value::String(s) => {
            if c {
                w.write_all(color.string.as_bytes())?;
            }
            write_json_string(w, s)?;
            if c {
                w.write_all(color.reset.as_bytes())?;
            }
            Ok(())
        }
        Value::Array(items, _) if items.is_empty() => {
            write_colored(w, b"[]", color.bracket, color.reset)
        }
        Value::Array(items, _) => {
            write_colored(w, b"[", color.bracket, color.reset)?;
            fmt.after_open(w, depth)?;
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write_colored(w, b",", color.bracket, color.reset)?;
                    fmt.after_sep(w, depth)?;
                } else {
                    fmt.before_first(w, depth)?;
                }
                write_value_inner(w, v, fmt, depth + 1, sort_keys, color)?;
            }
            fmt.before_close(w, depth)?;
            write_colored(w, b"]", color.bracket, color.reset)
        }
        Value::Object(pairs) if pairs.is_empty() => {
            write_colored(w, b"{}", color.bracket, color.reset)
        }
        Value::Object(pairs) => {
            write_colored(w, b"{", color.bracket, color.reset)?;
            fmt.after_open(w, depth)?;
            let sorted;
            let pairs: &[(String, Value)] = if sort_keys {
                sorted = {
                    let mut v: Vec<(String, Value)> = pairs.as_ref().clone();
                    v.sort_by(|a, b| a.0.cmp(&b.0));
                    v
                };
                &sorted
            } else {
                pairs
            };
            let mut first = true;
            for (k, v) in pairs.iter() {
                if v.is_undefined() {
                    continue;
                }
                if first {
                    fmt.before_first(w, depth)?;
                    first = false;
                } else {
                    write_colored(w, b",", color.bracket, color.reset)?;
                    fmt.after_sep(w, depth)?;
                }
                if c {
                    w.write_all(color.object_key.as_bytes())?;
                }
                write_json_string(w, k)?;
                if c {
                    w.write_all(color.reset.as_bytes())?;
                }
                write_colored(w, b":", color.bracket, color.reset)?;
                fmt.after_colon(w)?;
                write_value_inner(w, v, fmt, depth + 1, sort_keys, color)?;
            }
            fmt.before_close(w, depth)?;
            write_colored(w, b"}", color.bracket, color.reset)
        }
        // Functions have no JSON representation.
        _ => w.write_all(b"\"\""),
    }
}

/// Numbers print without a decimal point when they are integral and fit
/// the exact integer range of a double.
fn write_number<W: Write>(w: &mut W, n: f64) -> io::Result<()> {
    const EXACT_INT: f64 = 9_007_199_254_740_992.0; // 2^53
    if !n.is_finite() {
        return w.write_all(b"null");
    }
    if n.fract() == 0.0 && n.abs() < EXACT_INT {
        let mut buf = itoa::Buffer::new();
        w.write_all(buf.format(n as i64).as_bytes())
    } else {
        let mut buf = ryu::Buffer::new();
        w.write_all(buf.format(n).as_bytes())
    }
}

fn write_json_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(b"\"")?;
    let mut start = 0;
    for (i, b) in s.bytes().enumerate() {
        let escape: &[u8] = match b {
            b'"' => b"\\\"",
            b'\\' => b"\\\\",
            0x08 => b"\\b",
            0x0C => b"\\f",
            b'\n' => b"\\n",
            b'\r' => b"\\r",
            b'\t' => b"\\t",
            0x00..=0x1F => b"",
            _ => continue,
        };
        w.write_all(&s.as_bytes()[start..i])?;
        if escape.is_empty() {
            write!(w, "\\u{b:04x}")?;
        } else {
            w.write_all(escape)?;
        }
        start = i + 1;
    }
    w.write_all(&s.as_bytes()[start..])?;
    w.write_all(b"\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact(value: &Value) -> String {
        stringify(value, false).unwrap()
    }

    #[test]
    fn integral_numbers_print_without_decimal_point() {
        assert_eq!(compact(&Value::Number(3.0)), "3");
        assert_eq!(compact(&Value::Number(-12.0)), "-12");
        assert_eq!(compact(&Value::Number(2.5)), "2.5");
    }

    #[test]
    fn strings_escape_control_characters() {
        assert_eq!(
            compact(&Value::String("a\"b\\c\nd".into())),
            r#""a\"b\\c\nd""#
        );
        assert_eq!(compact(&Value::String("\u{1}".into())), r#""\u0001""#);
    }

    #[test]
    fn objects_keep_insertion_order() {
        let obj = Value::object(vec![
            ("z".into(), Value::Number(1.0)),
            ("a".into(), Value::Number(2.0)),
        ]);
        assert_eq!(compact(&obj), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn pretty_printing_indents() {
        let obj = Value::object(vec![("a".into(), Value::array(vec![Value::Number(1.0)]))]);
        assert_eq!(stringify(&obj, true).unwrap(), "{\n  \"a\": [\n    1\n  ]\n}");
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let err = stringify(&Value::Number(f64::INFINITY), false).unwrap_err();
        assert_eq!(err.code, "D1001");
    }
}
