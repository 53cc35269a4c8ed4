use std::cmp::Ordering;

use pantograph_node_contracts::Value;
use serde::{Deserialize, Serialize};

/// A search/delete-search predicate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    /// Whether `field_value` satisfies `field_value OP target`.
    ///
    /// Range operators (`<,<=,>,>=`) are only well-defined for orderable
    /// value kinds (numbers, strings, timestamps); comparing incompatible
    /// kinds always evaluates to `false` rather than panicking.
    pub fn matches(self, field_value: &Value, target: &Value) -> bool {
        match self {
            Op::Eq => field_value == target,
            Op::Ne => field_value != target,
            _ => match compare(field_value, target) {
                Some(ordering) => match self {
                    Op::Lt => ordering == Ordering::Less,
                    Op::Le => ordering != Ordering::Greater,
                    Op::Gt => ordering == Ordering::Greater,
                    Op::Ge => ordering != Ordering::Less,
                    Op::Eq | Op::Ne => unreachable!(),
                },
                None => false,
            },
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.partial_cmp(y),
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Integer(x), Value::Number(y)) => (*x as f64).partial_cmp(y),
        (Value::Number(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => x.partial_cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.partial_cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.partial_cmp(y),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_and_ne() {
        assert!(Op::Eq.matches(&Value::Integer(1), &Value::Integer(1)));
        assert!(Op::Ne.matches(&Value::Integer(1), &Value::Integer(2)));
    }

    #[test]
    fn range_ops_on_numbers() {
        assert!(Op::Lt.matches(&Value::Integer(1), &Value::Integer(2)));
        assert!(Op::Ge.matches(&Value::Integer(2), &Value::Integer(2)));
        assert!(!Op::Gt.matches(&Value::Integer(2), &Value::Integer(2)));
    }

    #[test]
    fn incompatible_kinds_never_match_range_ops() {
        assert!(!Op::Lt.matches(&Value::String("a".into()), &Value::Integer(2)));
    }
}
