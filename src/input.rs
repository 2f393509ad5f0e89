//! Input preprocessing: BOM stripping and JSON parsing into Values.

use anyhow::{Context, Result};

use crate::value::Value;

/// Strip UTF-8 BOM (U+FEFF, bytes EF BB BF) from the beginning of a buffer.
pub fn strip_bom(buf: &mut Vec<u8>) {
    if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
        buf.drain(..3);
    }
}

/// Collect parsed JSON values from a buffer. A single document is the
/// common case; concatenated or newline-separated documents (`{"a":1}
/// {"b":2}`) are streamed one by one.
pub fn collect_values_from_buf(buf: &[u8], values: &mut Vec<Value>) -> Result<()> {
    // Empty/whitespace-only input produces no values.
    if buf
        .iter()
        .all(|&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
    {
        return Ok(());
    }
    let text = std::str::from_utf8(buf).context("input is not valid UTF-8")?;
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<serde_json::Value>();
    for doc in &mut stream {
        let doc = doc.context("failed to parse JSON input")?;
        values.push(Value::from_json(&doc));
    }
    Ok(())
}
