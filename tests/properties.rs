/// Property tests for the evaluator's algebraic invariants.
use proptest::prelude::*;

use nata::{parse, Evaluator, Value};

fn eval(expr: &str, input: &Value) -> Value {
    let ast = parse(expr).unwrap();
    Evaluator::new().evaluate(&ast, input).unwrap()
}

/// JSON-shaped values with integer numbers, so equality is exact.
fn json_value() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        (-1000i64..1000).prop_map(serde_json::Value::from),
        "[a-z]{0,8}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// The identity expression reproduces any input value.
    #[test]
    fn identity_round_trips(doc in json_value()) {
        let input = Value::from_json(&doc);
        prop_assert_eq!(eval("$", &input), input.clone());
    }

    /// Filtering keeps exactly the matching elements, in order, and is
    /// idempotent.
    #[test]
    fn filters_are_order_preserving_and_idempotent(
        xs in prop::collection::vec(-100i64..100, 0..20),
        threshold in -100i64..100,
    ) {
        let doc = serde_json::json!({ "a": xs });
        let input = Value::from_json(&doc);
        let once = eval(&format!("a[$ > {threshold}]"), &input);
        let twice = eval(&format!("a[$ > {threshold}][$ > {threshold}]"), &input);
        prop_assert_eq!(&once, &twice);

        let expected: Vec<Value> = xs
            .iter()
            .filter(|x| **x > threshold)
            .map(|x| Value::Number(*x as f64))
            .collect();
        let expected = match expected.len() {
            0 => Value::Undefined,
            1 => expected.into_iter().next().unwrap(),
            _ => Value::array(expected),
        };
        prop_assert_eq!(once, expected);
    }

    /// `count([lo..hi])` is `max(0, hi - lo + 1)`.
    #[test]
    fn range_counts(lo in -2000i64..2000, hi in -2000i64..2000) {
        let out = eval(&format!("$count([{lo}..{hi}])"), &Value::Null);
        let expected = (hi - lo + 1).max(0) as f64;
        prop_assert_eq!(out, Value::Number(expected));
    }

    /// `$keys` reports insertion order.
    #[test]
    fn key_order_is_insertion_order(names in prop::collection::vec("[a-z]{1,6}", 1..8)) {
        let mut unique = Vec::new();
        for name in names {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        let pairs: Vec<(String, Value)> = unique
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), Value::Number(i as f64)))
            .collect();
        let input = Value::object(pairs);
        let out = eval("$keys($)", &input);
        let expected = match unique.len() {
            1 => Value::String(unique[0].clone()),
            _ => Value::array(unique.into_iter().map(Value::String).collect()),
        };
        prop_assert_eq!(out, expected);
    }

    /// Sorting is idempotent on homogeneous input.
    #[test]
    fn sort_is_idempotent(xs in prop::collection::vec(-1000i64..1000, 0..20)) {
        let doc = serde_json::json!({ "a": xs });
        let input = Value::from_json(&doc);
        let once = eval("$sort(a)", &input);
        let twice = eval("$sort($sort(a))", &input);
        prop_assert_eq!(once, twice);
    }

    /// Operations on the absent value stay absent.
    #[test]
    fn absence_propagates(n in -1000i64..1000) {
        let input = Value::from_json(&serde_json::json!({ "a": n }));
        prop_assert_eq!(eval("missing + a", &input), Value::Undefined);
        prop_assert_eq!(eval("a * missing", &input), Value::Undefined);
        prop_assert_eq!(eval("missing.further.down", &input), Value::Undefined);
        prop_assert_eq!(eval("a[$ > 1000]", &input), Value::Undefined);
        // Concatenation treats one absent side as empty.
        prop_assert_eq!(
            eval("\"v\" & missing", &input),
            Value::String("v".into())
        );
    }
}
