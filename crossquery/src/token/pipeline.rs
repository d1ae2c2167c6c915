// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Versioned pipeline continuation tokens
//!
//! The outermost token handed to callers. Three shapes exist:
//!
//! - V0: an unversioned value, the source token itself (legacy)
//! - V1.0: `{"Version": "1.0", "SourceContinuationToken": ...}`
//! - V1.1: `{"Version": "1.1", "SourceContinuationToken": ..., "QueryPlan": ...}`
//!
//! A missing token is not a version at all: the query starts from scratch.

use serde_json::{Map, Value};

use crate::error::TokenError;
use crate::plan::PartitionedQueryExecutionInfo;

const VERSION_PROPERTY: &str = "Version";
const SOURCE_PROPERTY: &str = "SourceContinuationToken";
const QUERY_PLAN_PROPERTY: &str = "QueryPlan";

/// Protocol version of a versioned token
///
/// Tags have one to four dot-separated numeric parts; missing parts are zero
/// and versions compare part by part, major first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl TokenVersion {
    pub const V1_0: TokenVersion = TokenVersion::new(1, 0);
    pub const V1_1: TokenVersion = TokenVersion::new(1, 1);
    pub const LATEST: TokenVersion = Self::V1_1;

    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: 0,
            revision: 0,
        }
    }

    pub fn parse(text: &str) -> Result<Self, TokenError> {
        let invalid = || TokenError::malformed(format!("invalid version tag '{}'", text));
        let parts = text
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<u32>, TokenError>>()?;
        if parts.len() > 4 {
            return Err(invalid());
        }
        let part = |index: usize| parts.get(index).copied().unwrap_or(0);
        Ok(Self {
            major: part(0),
            minor: part(1),
            build: part(2),
            revision: part(3),
        })
    }
}

impl std::fmt::Display for TokenVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.build != 0 || self.revision != 0 {
            write!(f, ".{}", self.build)?;
        }
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        Ok(())
    }
}

/// Latest token: source token plus an optional cached plan
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineContinuationTokenV1_1 {
    pub source_continuation_token: Value,
    pub query_plan: Option<PartitionedQueryExecutionInfo>,
}

/// A decoded pipeline continuation token
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineContinuationToken {
    V0 { source_continuation_token: Value },
    V1 { source_continuation_token: Value },
    V1_1(PipelineContinuationTokenV1_1),
}

impl PipelineContinuationToken {
    pub fn latest(
        source_continuation_token: Value,
        query_plan: Option<PartitionedQueryExecutionInfo>,
    ) -> Self {
        Self::V1_1(PipelineContinuationTokenV1_1 {
            source_continuation_token,
            query_plan,
        })
    }

    pub fn version(&self) -> Option<TokenVersion> {
        match self {
            Self::V0 { .. } => None,
            Self::V1 { .. } => Some(TokenVersion::V1_0),
            Self::V1_1(_) => Some(TokenVersion::V1_1),
        }
    }

    /// Decode a token, rejecting versions newer than `TokenVersion::LATEST`
    pub fn decode(value: &Value) -> Result<Self, TokenError> {
        let object = match value {
            Value::Object(object) if object.contains_key(VERSION_PROPERTY) => object,
            other => {
                return Ok(Self::V0 {
                    source_continuation_token: other.clone(),
                })
            }
        };

        let version_text = object
            .get(VERSION_PROPERTY)
            .and_then(Value::as_str)
            .ok_or_else(|| TokenError::malformed("version tag must be a string"))?;
        let version = TokenVersion::parse(version_text)?;
        if version > TokenVersion::LATEST {
            return Err(TokenError::FromNewerVersion(version.to_string()));
        }

        let source = object
            .get(SOURCE_PROPERTY)
            .cloned()
            .ok_or_else(|| TokenError::malformed(format!("missing {}", SOURCE_PROPERTY)))?;

        if version == TokenVersion::V1_0 {
            return Ok(Self::V1 {
                source_continuation_token: source,
            });
        }
        if version == TokenVersion::V1_1 {
            let query_plan = match object.get(QUERY_PLAN_PROPERTY) {
                None | Some(Value::Null) => None,
                Some(plan) => Some(serde_json::from_value(plan.clone()).map_err(|e| {
                    TokenError::malformed(format!("invalid {}: {}", QUERY_PLAN_PROPERTY, e))
                })?),
            };
            return Ok(Self::V1_1(PipelineContinuationTokenV1_1 {
                source_continuation_token: source,
                query_plan,
            }));
        }

        Err(TokenError::malformed(format!(
            "unknown token version {}",
            version
        )))
    }

    /// Exact inverse of `decode`
    pub fn encode(&self) -> Value {
        match self {
            Self::V0 {
                source_continuation_token,
            } => source_continuation_token.clone(),
            Self::V1 {
                source_continuation_token,
            } => {
                let mut object = Map::new();
                object.insert(
                    VERSION_PROPERTY.to_string(),
                    Value::String(TokenVersion::V1_0.to_string()),
                );
                object.insert(SOURCE_PROPERTY.to_string(), source_continuation_token.clone());
                Value::Object(object)
            }
            Self::V1_1(token) => {
                let mut object = Map::new();
                object.insert(
                    VERSION_PROPERTY.to_string(),
                    Value::String(TokenVersion::V1_1.to_string()),
                );
                object.insert(
                    SOURCE_PROPERTY.to_string(),
                    token.source_continuation_token.clone(),
                );
                if let Some(plan) = &token.query_plan {
                    // Plans are plain data; serialization cannot fail.
                    if let Ok(plan) = serde_json::to_value(plan) {
                        object.insert(QUERY_PLAN_PROPERTY.to_string(), plan);
                    }
                }
                Value::Object(object)
            }
        }
    }

    /// Upgrade an older token to the latest version
    ///
    /// Unversioned tokens whose source is a bare scalar come from the opaque
    /// string era and cannot be mapped onto a pipeline.
    pub fn convert_to_latest(self) -> Result<PipelineContinuationTokenV1_1, TokenError> {
        match self {
            Self::V1_1(token) => Ok(token),
            Self::V1 {
                source_continuation_token,
            } => Ok(PipelineContinuationTokenV1_1 {
                source_continuation_token,
                query_plan: None,
            }),
            Self::V0 {
                source_continuation_token,
            } => match source_continuation_token {
                Value::Object(_) | Value::Array(_) => Ok(PipelineContinuationTokenV1_1 {
                    source_continuation_token,
                    query_plan: None,
                }),
                other => Err(TokenError::NoLongerSupported(other.to_string())),
            },
        }
    }
}

/// Parse a caller-supplied continuation string into its JSON value
pub fn parse_continuation(text: &str) -> Result<Value, TokenError> {
    serde_json::from_str(text)
        .map_err(|e| TokenError::malformed(format!("continuation is not valid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::QueryInfo;
    use serde_json::json;

    fn sample_plan() -> PartitionedQueryExecutionInfo {
        PartitionedQueryExecutionInfo::passthrough().with_query_info(QueryInfo {
            top: Some(3),
            ..QueryInfo::default()
        })
    }

    #[test]
    fn test_round_trip_every_version() {
        let source = json!([{"token": "7", "range": {"min": "", "max": "FF"}}]);
        let tokens = vec![
            PipelineContinuationToken::V0 {
                source_continuation_token: source.clone(),
            },
            PipelineContinuationToken::V1 {
                source_continuation_token: source.clone(),
            },
            PipelineContinuationToken::latest(source.clone(), None),
            PipelineContinuationToken::latest(source, Some(sample_plan())),
        ];

        for token in tokens {
            let decoded = PipelineContinuationToken::decode(&token.encode()).unwrap();
            assert_eq!(decoded, token);
        }
    }

    #[test]
    fn test_future_version_rejected() {
        for version in ["1.2", "2.0", "10.0", "1.2.0", "2", "1.1.1", "1.1.0.7"] {
            let token = json!({"Version": version, "SourceContinuationToken": "x"});
            assert!(matches!(
                PipelineContinuationToken::decode(&token),
                Err(TokenError::FromNewerVersion(_))
            ));
        }

        // Rejected before any other field is looked at.
        let missing_source = json!({"Version": "3.0"});
        assert!(matches!(
            PipelineContinuationToken::decode(&missing_source),
            Err(TokenError::FromNewerVersion(_))
        ));
    }

    #[test]
    fn test_version_tags_with_trailing_zero_parts() {
        assert_eq!(TokenVersion::parse("1.1.0").unwrap(), TokenVersion::V1_1);
        assert_eq!(TokenVersion::parse("1.0.0.0").unwrap(), TokenVersion::V1_0);
        assert!(TokenVersion::parse("1.1.1").unwrap() > TokenVersion::LATEST);
        assert_eq!(TokenVersion::parse("1.1.0.3").unwrap().to_string(), "1.1.0.3");
    }

    #[test]
    fn test_malformed_versioned_tokens() {
        let bad_tag = json!({"Version": 1, "SourceContinuationToken": []});
        assert!(matches!(
            PipelineContinuationToken::decode(&bad_tag),
            Err(TokenError::Malformed(_))
        ));

        let unparsable = json!({"Version": "one", "SourceContinuationToken": []});
        assert!(matches!(
            PipelineContinuationToken::decode(&unparsable),
            Err(TokenError::Malformed(_))
        ));

        let missing_source = json!({"Version": "1.1"});
        assert!(matches!(
            PipelineContinuationToken::decode(&missing_source),
            Err(TokenError::Malformed(_))
        ));

        for tag in ["1..1", "1.1.0.0.0", ""] {
            let token = json!({"Version": tag, "SourceContinuationToken": []});
            assert!(matches!(
                PipelineContinuationToken::decode(&token),
                Err(TokenError::Malformed(_))
            ));
        }

        let unknown_old = json!({"Version": "0.9", "SourceContinuationToken": []});
        assert!(matches!(
            PipelineContinuationToken::decode(&unknown_old),
            Err(TokenError::Malformed(_))
        ));

        let bad_plan = json!({"Version": "1.1", "SourceContinuationToken": [], "QueryPlan": 5});
        assert!(matches!(
            PipelineContinuationToken::decode(&bad_plan),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_convert_to_latest() {
        let v1 = PipelineContinuationToken::V1 {
            source_continuation_token: json!({"limit": 3, "sourceToken": []}),
        };
        let latest = v1.convert_to_latest().unwrap();
        assert!(latest.query_plan.is_none());
        assert_eq!(latest.source_continuation_token["limit"], json!(3));

        let structured_v0 = PipelineContinuationToken::decode(&json!([])).unwrap();
        assert!(structured_v0.convert_to_latest().is_ok());

        let opaque_v0 = PipelineContinuationToken::decode(&json!("+RID:abc#RT:1")).unwrap();
        assert!(matches!(
            opaque_v0.convert_to_latest(),
            Err(TokenError::NoLongerSupported(_))
        ));
    }

    #[test]
    fn test_parse_continuation() {
        assert!(parse_continuation("[1,2]").is_ok());
        assert!(matches!(
            parse_continuation("{not json"),
            Err(TokenError::Malformed(_))
        ));
    }
}
