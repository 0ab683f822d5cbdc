//! Property tests for transform convergence of the built-in JSON type.
//!
//! For any two operations valid against the same base document, applying
//! one and then the other's transform must equal applying them in the
//! opposite order. This is the invariant everything else in the protocol
//! leans on.

use proptest::prelude::*;
use serde_json::{json, Value};
use tandem_engine::ot::{JsonOt, OtType};

fn base_doc() -> Value {
    json!({
        "a": 1,
        "b": 2,
        "xs": [10, 20, 30],
        "o": {"k": "v"}
    })
}

#[derive(Debug, Clone)]
enum GenOp {
    AddNumber(&'static str, i64),
    InsertKey(&'static str, i64),
    RemoveKey(&'static str),
    ListInsert(usize, i64),
    ListRemove(usize),
}

impl GenOp {
    fn delta(&self) -> Value {
        match self {
            GenOp::AddNumber(key, n) => json!([{"p": [key], "na": n}]),
            GenOp::InsertKey(key, v) => json!([{"p": [key], "oi": v}]),
            GenOp::RemoveKey(key) => json!([{"p": [key], "od": null}]),
            GenOp::ListInsert(index, v) => json!([{"p": ["xs", index], "li": v}]),
            GenOp::ListRemove(index) => json!([{"p": ["xs", index], "ld": null}]),
        }
    }
}

fn gen_op() -> impl Strategy<Value = GenOp> {
    prop_oneof![
        (prop_oneof![Just("a"), Just("b")], -100i64..100)
            .prop_map(|(key, n)| GenOp::AddNumber(key, n)),
        (prop_oneof![Just("a"), Just("b"), Just("x"), Just("y")], -100i64..100)
            .prop_map(|(key, v)| GenOp::InsertKey(key, v)),
        prop_oneof![Just("a"), Just("b")].prop_map(GenOp::RemoveKey),
        (0usize..=3, -100i64..100).prop_map(|(index, v)| GenOp::ListInsert(index, v)),
        (0usize..3).prop_map(GenOp::ListRemove),
    ]
}

proptest! {
    #[test]
    fn concurrent_pairs_converge(left in gen_op(), right in gen_op()) {
        let ty = JsonOt;
        let doc = base_doc();
        let left_delta = left.delta();
        let right_delta = right.delta();

        let (left_t, right_t) = ty.transform_x(&left_delta, &right_delta).unwrap();

        let via_left = ty
            .apply(ty.apply(doc.clone(), &left_delta).unwrap(), &right_t)
            .unwrap();
        let via_right = ty
            .apply(ty.apply(doc, &right_delta).unwrap(), &left_t)
            .unwrap();

        prop_assert_eq!(via_left, via_right);
    }

    #[test]
    fn transform_against_noop_is_identity(op in gen_op()) {
        let ty = JsonOt;
        let delta = op.delta();
        let noop = json!([]);
        let (left_t, right_t) = ty.transform_x(&delta, &noop).unwrap();
        prop_assert_eq!(&left_t, &delta);
        prop_assert_eq!(right_t, noop);
    }

    #[test]
    fn invert_roundtrips(op in gen_op()) {
        let ty = JsonOt;
        let doc = base_doc();
        let delta = op.delta();
        // the inverse needs faithful od/ld payloads, so record them first
        let recorded = match &op {
            GenOp::InsertKey(key, v) if doc.get(*key).is_some() => {
                json!([{"p": [key], "oi": v, "od": doc[*key]}])
            }
            GenOp::RemoveKey(key) => json!([{"p": [key], "od": doc[*key]}]),
            GenOp::ListRemove(index) => json!([{"p": ["xs", index], "ld": doc["xs"][*index]}]),
            _ => delta,
        };
        let applied = ty.apply(doc.clone(), &recorded).unwrap();
        let inverse = ty.invert(&recorded).unwrap();
        prop_assert_eq!(ty.apply(applied, &inverse).unwrap(), doc);
    }
}

#[test]
fn spec_scenario_concurrent_increments() {
    let ty = JsonOt;
    let doc = json!({"age": 3});
    let first = json!([{"p": ["age"], "na": 2}]);
    let second = json!([{"p": ["age"], "na": 7}]);

    let (first_t, second_t) = ty.transform_x(&first, &second).unwrap();
    let via_first = ty
        .apply(ty.apply(doc.clone(), &first).unwrap(), &second_t)
        .unwrap();
    let via_second = ty
        .apply(ty.apply(doc, &second).unwrap(), &first_t)
        .unwrap();

    assert_eq!(via_first, via_second);
    assert_eq!(via_first, json!({"age": 12}));
}
