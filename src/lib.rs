pub mod errors;
pub mod expr;
pub mod input;
pub mod output;
pub mod value;

pub use errors::Error;
pub use expr::builtins::BuiltinDef;
pub use expr::eval::{CancelToken, EvalOptions, Evaluator};
pub use expr::{parse, Node};
pub use value::Value;

/// Parse and evaluate an expression against a JSON document in one step.
/// Returns `None` when the result is the absent value.
pub fn query(expression: &str, input: &serde_json::Value) -> errors::Result<Option<serde_json::Value>> {
    let ast = parse(expression)?;
    let evaluator = Evaluator::new();
    let result = evaluator.evaluate(&ast, &Value::from_json(input))?;
    Ok(result.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_end_to_end() {
        let input = serde_json::json!({"a": {"b": [1, 2, 3]}});
        let out = query("a.b[1]", &input).unwrap();
        assert_eq!(out, Some(serde_json::json!(2)));
    }

    #[test]
    fn query_absent_result() {
        let input = serde_json::json!({"a": 1});
        assert_eq!(query("nothing.here", &input).unwrap(), None);
    }
}
