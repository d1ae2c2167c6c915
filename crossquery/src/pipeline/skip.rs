// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! OFFSET

use serde_json::{json, Value};

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::page::QueryState;

use super::{take_produced, PageSlot, PipelineStage};

const OFFSET_PROPERTY: &str = "offsetCount";
const SOURCE_TOKEN_PROPERTY: &str = "sourceToken";

/// Drops the first results
pub struct SkipStage {
    source: PipelineStage,
    remaining: u64,
    pub(crate) slot: PageSlot,
}

impl SkipStage {
    pub fn peel(offset: u64, continuation: Option<&Value>) -> QueryResult<(u64, Option<Value>)> {
        let Some(token) = continuation.filter(|value| !value.is_null()) else {
            return Ok((offset, None));
        };
        let remaining = token
            .get(OFFSET_PROPERTY)
            .and_then(Value::as_u64)
            .ok_or_else(|| QueryError::malformed_token("continuation is missing 'offsetCount'"))?;
        if remaining > offset {
            return Err(QueryError::malformed_token(format!(
                "continuation offset {} exceeds the query's {}",
                remaining, offset
            )));
        }
        let source = token
            .get(SOURCE_TOKEN_PROPERTY)
            .cloned()
            .ok_or_else(|| QueryError::malformed_token("offset continuation is missing 'sourceToken'"))?;
        Ok((remaining, Some(source)))
    }

    pub fn monadic_create(source: PipelineStage, remaining: u64) -> QueryResult<PipelineStage> {
        Ok(PipelineStage::Skip(Box::new(Self {
            source,
            remaining,
            slot: PageSlot::default(),
        })))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("Skip")?;
        if !self.source.move_next(cancel).await? {
            return Ok(self.slot.finish());
        }

        match take_produced(&mut self.source) {
            Ok(mut page) => {
                let skip = (self.remaining as usize).min(page.documents.len());
                page.documents.drain(..skip);
                self.remaining -= skip as u64;
                page.state = page.state.take().map(|state| {
                    QueryState::new(json!({
                        OFFSET_PROPERTY: self.remaining,
                        SOURCE_TOKEN_PROPERTY: state.into_value(),
                    }))
                });
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

    #[tokio::test]
    async fn test_skip_spans_pages() {
        let source = ScriptedStage::stage(vec![
            Ok(QueryPage::new(vec![json!(1), json!(2)], Some(QueryState::new(json!("a"))))),
            Ok(QueryPage::new(vec![json!(3), json!(4)], None)),
        ]);
        let mut stage = SkipStage::monadic_create(source, 3).unwrap();
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await.unwrap());
        let first = stage.take_current().unwrap().unwrap();
        assert!(first.documents.is_empty());
        assert_eq!(
            first.state.unwrap().into_value(),
            json!({"offsetCount": 1, "sourceToken": "a"})
        );

        assert!(stage.move_next(&cancel).await.unwrap());
        let second = stage.take_current().unwrap().unwrap();
        assert_eq!(second.documents, vec![json!(4)]);
        assert!(second.state.is_none());
    }

    #[test]
    fn test_peel_rejects_larger_offset() {
        let token = json!({"offsetCount": 9, "sourceToken": null});
        assert!(SkipStage::peel(3, Some(&token)).unwrap_err().is_malformed_token());
    }
}
