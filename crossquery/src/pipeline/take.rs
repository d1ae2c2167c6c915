// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! TOP and LIMIT

use serde_json::{json, Value};

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::page::QueryState;

use super::{take_produced, PageSlot, PipelineStage};

const SOURCE_TOKEN_PROPERTY: &str = "sourceToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeKind {
    Limit,
    Top,
}

impl TakeKind {
    fn property(self) -> &'static str {
        match self {
            TakeKind::Limit => "limit",
            TakeKind::Top => "top",
        }
    }
}

/// Returns at most a fixed number of results
pub struct TakeStage {
    source: PipelineStage,
    kind: TakeKind,
    remaining: u64,
    pub(crate) slot: PageSlot,
}

impl TakeStage {
    /// Split a continuation into the remaining count and the source continuation
    pub fn peel(
        kind: TakeKind,
        count: u64,
        continuation: Option<&Value>,
    ) -> QueryResult<(u64, Option<Value>)> {
        let Some(token) = continuation.filter(|value| !value.is_null()) else {
            return Ok((count, None));
        };
        let remaining = token
            .get(kind.property())
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                QueryError::malformed_token(format!(
                    "continuation is missing a numeric '{}'",
                    kind.property()
                ))
            })?;
        if remaining > count {
            return Err(QueryError::malformed_token(format!(
                "continuation {} {} exceeds the query's {}",
                kind.property(),
                remaining,
                count
            )));
        }
        let source = token.get(SOURCE_TOKEN_PROPERTY).cloned().ok_or_else(|| {
            QueryError::malformed_token(format!(
                "{} continuation is missing '{}'",
                kind.property(),
                SOURCE_TOKEN_PROPERTY
            ))
        })?;
        Ok((remaining, Some(source)))
    }

    pub fn monadic_create(
        source: PipelineStage,
        kind: TakeKind,
        remaining: u64,
    ) -> QueryResult<PipelineStage> {
        Ok(PipelineStage::Take(Box::new(Self {
            source,
            kind,
            remaining,
            slot: PageSlot::default(),
        })))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("Take")?;
        if self.remaining == 0 || !self.source.move_next(cancel).await? {
            return Ok(self.slot.finish());
        }

        match take_produced(&mut self.source) {
            Ok(mut page) => {
                let keep = (self.remaining as usize).min(page.documents.len());
                page.documents.truncate(keep);
                self.remaining -= keep as u64;

                let source_state = page.state.take();
                page.state = match source_state {
                    Some(state) if self.remaining > 0 => Some(QueryState::new(json!({
                        self.kind.property(): self.remaining,
                        SOURCE_TOKEN_PROPERTY: state.into_value(),
                    }))),
                    _ => None,
                };
                Ok(self.slot.set(Ok(page)))
            }
            Err(error) => Ok(self.slot.set(Err(error))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::QueryPage;
    use crate::pipeline::basic::ScriptedStage;

    fn page(documents: Vec<Value>, state: Option<Value>) -> crate::page::PageResult {
        Ok(QueryPage::new(documents, state.map(QueryState::new)))
    }

    #[tokio::test]
    async fn test_top_truncates_and_ends() {
        let source = ScriptedStage::stage(vec![
            page(vec![json!(1), json!(2)], Some(json!("s1"))),
            page(vec![json!(3), json!(4)], Some(json!("s2"))),
        ]);
        let mut stage = TakeStage::monadic_create(source, TakeKind::Top, 3).unwrap();
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await.unwrap());
        let first = stage.take_current().unwrap().unwrap();
        assert_eq!(first.documents.len(), 2);
        assert_eq!(
            first.state.unwrap().into_value(),
            json!({"top": 1, "sourceToken": "s1"})
        );

        assert!(stage.move_next(&cancel).await.unwrap());
        let second = stage.take_current().unwrap().unwrap();
        assert_eq!(second.documents, vec![json!(3)]);
        assert!(second.state.is_none());

        assert!(!stage.move_next(&cancel).await.unwrap());
    }

    #[test]
    fn test_peel() {
        assert_eq!(TakeStage::peel(TakeKind::Limit, 5, None).unwrap(), (5, None));

        let token = json!({"limit": 2, "sourceToken": [1]});
        assert_eq!(
            TakeStage::peel(TakeKind::Limit, 5, Some(&token)).unwrap(),
            (2, Some(json!([1])))
        );

        assert!(TakeStage::peel(TakeKind::Top, 5, Some(&token))
            .unwrap_err()
            .is_malformed_token());
        assert!(TakeStage::peel(TakeKind::Limit, 1, Some(&token))
            .unwrap_err()
            .is_malformed_token());
        assert!(TakeStage::peel(TakeKind::Limit, 5, Some(&json!({"limit": 1})))
            .unwrap_err()
            .is_malformed_token());
    }
}
