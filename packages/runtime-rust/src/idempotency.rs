//! Call identity for dispatch tracking and caching.

use repokeeper_core::{idempotency_key, OpInput};

use crate::operator::Operator;

/// Idempotency key for running `op` with `input`.
///
/// An explicit `input.idempotency_key` is returned unchanged; otherwise the key
/// is derived from the operator's name and version, the target repository and
/// the canonicalized parameters.
#[must_use]
pub fn make_id_key(op: &dyn Operator, input: &OpInput) -> String {
    idempotency_key(op.name(), op.version(), input)
}

/// Default cache key. Identical to [`make_id_key`].
#[must_use]
pub fn make_cache_key(op: &dyn Operator, input: &OpInput) -> String {
    make_id_key(op, input)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use repokeeper_core::RepoRef;
    use serde_json::json;

    use super::*;
    use crate::middleware::test_support::FlakyOp;

    #[test]
    fn same_params_in_any_order_give_same_key() {
        let (op, _) = FlakyOp::new(0);

        let mut a = OpInput::new(RepoRef::new("a", "b"));
        a.params = BTreeMap::from([("x".to_string(), json!(1)), ("y".to_string(), json!(2))]);
        let mut b = OpInput::new(RepoRef::new("a", "b"));
        b.params = BTreeMap::from([("y".to_string(), json!(2)), ("x".to_string(), json!(1))]);

        let key = make_id_key(&op, &a);
        for _ in 0..10 {
            assert_eq!(make_id_key(&op, &b), key);
        }
        assert_eq!(make_cache_key(&op, &a), key);
    }

    #[test]
    fn explicit_key_wins() {
        let (op, _) = FlakyOp::new(0);
        let input = OpInput::new(RepoRef::new("a", "b")).with_idempotency_key("job-42");
        assert_eq!(make_id_key(&op, &input), "job-42");
    }

    #[test]
    fn head_makes_key_content_specific() {
        let (op, _) = FlakyOp::new(0);
        let plain = OpInput::new(RepoRef::new("a", "b"));
        let pinned = OpInput::new(RepoRef::new("a", "b").at("c0ffee"));
        assert_ne!(make_id_key(&op, &plain), make_id_key(&op, &pinned));
    }
}
