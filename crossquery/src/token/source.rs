// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Source continuation tokens: the part of a pipeline token that positions the
//! fan-out, single-range or gateway stage

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TokenError;
use crate::routing::Range;

const ODE_PROPERTY: &str = "OptimisticDirectExecutionToken";
const GATEWAY_PROPERTY: &str = "DistributedGatewayToken";

fn decode_as<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, TokenError> {
    serde_json::from_value(value.clone())
        .map_err(|e| TokenError::malformed(format!("invalid {}: {}", what, e)))
}

/// Position inside one key range of a fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelContinuationToken {
    /// Backend continuation; `None` means the range has not started yet
    pub token: Option<String>,
    pub range: Range,
}

impl ParallelContinuationToken {
    pub fn new(token: Option<String>, range: Range) -> Self {
        Self { token, range }
    }

    /// Encode one token per still-active range
    pub fn encode_all(tokens: &[ParallelContinuationToken]) -> Value {
        Value::Array(tokens.iter().map(|t| t.to_value()).collect())
    }

    /// Decode the array form produced by `encode_all`
    pub fn decode_all(value: &Value) -> Result<Vec<ParallelContinuationToken>, TokenError> {
        let items = value
            .as_array()
            .ok_or_else(|| TokenError::malformed("parallel continuation must be an array"))?;
        if items.is_empty() {
            return Err(TokenError::malformed(
                "parallel continuation must name at least one range",
            ));
        }
        items
            .iter()
            .map(|item| {
                let token: ParallelContinuationToken =
                    decode_as(item, "parallel continuation token")?;
                if token.range.is_empty() {
                    return Err(TokenError::malformed(format!(
                        "empty range {} in parallel continuation",
                        token.range
                    )));
                }
                Ok(token)
            })
            .collect()
    }

    pub fn to_value(&self) -> Value {
        json!({"token": self.token, "range": {"min": self.range.min, "max": self.range.max}})
    }
}

/// Position of a query pinned to exactly one key range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticDirectExecutionToken {
    pub token: Option<String>,
    pub range: Range,
}

impl OptimisticDirectExecutionToken {
    pub fn new(token: Option<String>, range: Range) -> Self {
        Self { token, range }
    }

    pub fn to_value(&self) -> Value {
        json!({ODE_PROPERTY: {"token": self.token, "range": {"min": self.range.min, "max": self.range.max}}})
    }

    /// Decode, failing when the value is not an ODE token at all
    pub fn decode(value: &Value) -> Result<Self, TokenError> {
        let inner = value
            .get(ODE_PROPERTY)
            .ok_or_else(|| TokenError::malformed("not an optimistic direct execution token"))?;
        decode_as(inner, "optimistic direct execution token")
    }

    pub fn is_ode_token(value: &Value) -> bool {
        value.get(ODE_PROPERTY).is_some()
    }

    /// The equivalent fan-out position, used when the pinned range split
    pub fn into_parallel(self) -> ParallelContinuationToken {
        ParallelContinuationToken::new(self.token, self.range)
    }
}

/// Position of a query run by the distributed gateway
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedGatewayToken {
    pub token: String,
}

impl DistributedGatewayToken {
    pub fn to_value(&self) -> Value {
        json!({GATEWAY_PROPERTY: self.token})
    }

    pub fn decode(value: &Value) -> Result<Self, TokenError> {
        value
            .get(GATEWAY_PROPERTY)
            .and_then(Value::as_str)
            .map(|token| Self {
                token: token.to_string(),
            })
            .ok_or_else(|| TokenError::malformed("not a distributed gateway token"))
    }
}

/// Position of an ORDER BY merge
///
/// Every row of the query is totally ordered by its order-by values and
/// then its resource id; `resume_values`/`rid` name the last row returned.
/// Each range restarts from the backend continuation of its first unconsumed
/// page and drops rows at or before that position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByContinuationToken {
    pub resume_values: Vec<Value>,
    pub rid: String,
    pub ranges: Vec<ParallelContinuationToken>,
}

impl OrderByContinuationToken {
    pub fn to_value(&self) -> Value {
        json!({
            "resumeValues": self.resume_values,
            "rid": self.rid,
            "ranges": ParallelContinuationToken::encode_all(&self.ranges),
        })
    }

    pub fn decode(value: &Value) -> Result<Self, TokenError> {
        let token: OrderByContinuationToken = decode_as(value, "order by continuation token")?;
        if token.ranges.is_empty() {
            return Err(TokenError::malformed(
                "order by continuation must name at least one range",
            ));
        }
        Ok(token)
    }
}

/// What a source token claims about where the query left off
#[derive(Debug, Clone, PartialEq)]
pub enum SourceToken<'a> {
    /// No token: start every range from the beginning
    Absent,
    /// Pinned to a single range by optimistic direct execution
    OptimisticDirect(&'a Value),
    /// Run by the distributed gateway
    DistributedGateway(&'a Value),
    /// Fan-out, ORDER BY or operator-wrapped token
    Composite(&'a Value),
}

impl<'a> SourceToken<'a> {
    pub fn classify(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => SourceToken::Absent,
            Some(v) if OptimisticDirectExecutionToken::is_ode_token(v) => {
                SourceToken::OptimisticDirect(v)
            }
            Some(v) if v.get(GATEWAY_PROPERTY).is_some() => SourceToken::DistributedGateway(v),
            Some(v) => SourceToken::Composite(v),
        }
    }

    pub fn is_single_range(&self) -> bool {
        matches!(self, SourceToken::OptimisticDirect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_tokens_round_trip() {
        let tokens = vec![
            ParallelContinuationToken::new(Some("12".to_string()), Range::new("", "80")),
            ParallelContinuationToken::new(None, Range::new("80", "FF")),
        ];
        let encoded = ParallelContinuationToken::encode_all(&tokens);
        assert_eq!(
            encoded[1],
            json!({"token": null, "range": {"min": "80", "max": "FF"}})
        );
        assert_eq!(ParallelContinuationToken::decode_all(&encoded).unwrap(), tokens);
    }

    #[test]
    fn test_parallel_tokens_reject_bad_shapes() {
        assert!(ParallelContinuationToken::decode_all(&json!({})).is_err());
        assert!(ParallelContinuationToken::decode_all(&json!([])).is_err());
        assert!(ParallelContinuationToken::decode_all(&json!([{"token": "1"}])).is_err());
        assert!(ParallelContinuationToken::decode_all(
            &json!([{"token": "1", "range": {"min": "80", "max": "20"}}])
        )
        .is_err());
    }

    #[test]
    fn test_ode_token_shape() {
        let token = OptimisticDirectExecutionToken::new(Some("5".to_string()), Range::full());
        let value = token.to_value();
        assert_eq!(
            value,
            json!({"OptimisticDirectExecutionToken": {"token": "5", "range": {"min": "", "max": "FF"}}})
        );
        assert_eq!(OptimisticDirectExecutionToken::decode(&value).unwrap(), token);
        assert!(OptimisticDirectExecutionToken::decode(&json!([])).is_err());
    }

    #[test]
    fn test_order_by_token_round_trip() {
        let token = OrderByContinuationToken {
            resume_values: vec![json!(42)],
            rid: "0000000A".to_string(),
            ranges: vec![ParallelContinuationToken::new(None, Range::full())],
        };
        assert_eq!(
            OrderByContinuationToken::decode(&token.to_value()).unwrap(),
            token
        );
    }

    #[test]
    fn test_classify() {
        let ode = OptimisticDirectExecutionToken::new(None, Range::full()).to_value();
        let gateway = DistributedGatewayToken {
            token: "g1".to_string(),
        }
        .to_value();
        let parallel = json!([]);

        assert_eq!(SourceToken::classify(None), SourceToken::Absent);
        assert_eq!(SourceToken::classify(Some(&Value::Null)), SourceToken::Absent);
        assert!(SourceToken::classify(Some(&ode)).is_single_range());
        assert!(matches!(
            SourceToken::classify(Some(&gateway)),
            SourceToken::DistributedGateway(_)
        ));
        assert!(matches!(
            SourceToken::classify(Some(&parallel)),
            SourceToken::Composite(_)
        ));
    }
}
