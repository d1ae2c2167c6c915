// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Total order over query values
//!
//! Values of different types order by type: undefined, null, booleans,
//! numbers, strings, arrays, objects. Undefined is represented by `None`.

use std::cmp::Ordering;

use serde_json::Value;

use crate::plan::SortOrder;

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Compare two possibly-undefined values
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(Some(left), Some(right));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            let mut left: Vec<(&String, &Value)> = x.iter().collect();
            let mut right: Vec<(&String, &Value)> = y.iter().collect();
            left.sort_by(|a, b| a.0.cmp(b.0));
            right.sort_by(|a, b| a.0.cmp(b.0));
            for ((lk, lv), (rk, rv)) in left.iter().zip(right.iter()) {
                let ordering = lk
                    .cmp(rk)
                    .then_with(|| compare_values(Some(*lv), Some(*rv)));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            left.len().cmp(&right.len())
        }
        _ => Ordering::Equal,
    }
}

/// The value of an `{"item": v}` wrapper; a missing `item` is undefined
pub fn item_value(wrapper: &Value) -> Option<&Value> {
    wrapper.get("item")
}

/// Compare two rows by their order-by items, then by resource id
///
/// Items are `{"item": v}` wrappers, one per ORDER BY expression. The
/// resource id breaks ties in ascending order regardless of direction.
pub fn compare_order_by(
    left_items: &[Value],
    left_rid: &str,
    right_items: &[Value],
    right_rid: &str,
    orders: &[SortOrder],
) -> Ordering {
    for (index, (left, right)) in left_items.iter().zip(right_items.iter()).enumerate() {
        let ordering = compare_values(item_value(left), item_value(right));
        let ordering = match orders.get(index) {
            Some(SortOrder::Descending) => ordering.reverse(),
            _ => ordering,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left_rid.cmp(right_rid)
}
