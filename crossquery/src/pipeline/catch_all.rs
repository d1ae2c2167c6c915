// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Outermost guard: turns failures of the source into error pages

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};

use super::{take_produced, PageSlot, PipelineStage};

pub struct CatchAllStage {
    source: PipelineStage,
    poisoned: bool,
    pub(crate) slot: PageSlot,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl CatchAllStage {
    pub fn new(source: PipelineStage) -> Self {
        Self {
            source,
            poisoned: false,
            slot: PageSlot::default(),
        }
    }

    pub fn into_stage(self) -> PipelineStage {
        PipelineStage::CatchAll(Box::new(self))
    }

    /// Errors the caller must see as a failed advance rather than a page
    fn must_propagate(error: &QueryError, cancel: &CancellationToken) -> bool {
        error.is_fatal() || (matches!(error, QueryError::Cancelled) && cancel.is_cancelled())
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("CatchAll")?;
        if self.poisoned {
            return Ok(self.slot.finish());
        }

        let advanced = AssertUnwindSafe(self.source.move_next(cancel))
            .catch_unwind()
            .await;

        match advanced {
            Ok(Ok(true)) => match take_produced(&mut self.source) {
                Err(error) if Self::must_propagate(&error, cancel) => Err(error),
                page => Ok(self.slot.set(page)),
            },
            Ok(Ok(false)) => Ok(self.slot.finish()),
            Ok(Err(error)) if Self::must_propagate(&error, cancel) => Err(error),
            Ok(Err(error)) => {
                log::warn!("Query stage failed, surfacing as page error: {}", error);
                Ok(self.slot.set(Err(error)))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Query stage panicked: {}", message);
                self.poisoned = true;
                Ok(self
                    .slot
                    .set(Err(QueryError::internal(format!("stage panicked: {}", message)))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::lazy::{LazyStage, StageBuilder};
    use std::sync::Arc;

    fn guarded(error: QueryError) -> PipelineStage {
        let builder: StageBuilder = Arc::new(move |_: CancellationToken| {
            let error = error.clone();
            async move { Err::<PipelineStage, _>(error) }.boxed()
        });
        CatchAllStage::new(LazyStage::new(builder).into_stage()).into_stage()
    }

    #[tokio::test]
    async fn test_source_error_becomes_page() {
        let cancel = CancellationToken::new();
        let mut stage = guarded(QueryError::throttled("busy"));

        assert!(stage.move_next(&cancel).await.unwrap());
        assert_eq!(stage.current(), Some(&Err(QueryError::throttled("busy"))));
        assert!(!stage.move_next(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_own_cancellation_propagates() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stage = guarded(QueryError::Cancelled);
        assert_eq!(stage.move_next(&cancel).await, Err(QueryError::Cancelled));
    }

    #[tokio::test]
    async fn test_foreign_cancellation_becomes_page() {
        let cancel = CancellationToken::new();
        let mut stage = guarded(QueryError::Cancelled);
        assert!(stage.move_next(&cancel).await.unwrap());
        assert_eq!(stage.current(), Some(&Err(QueryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_panic_becomes_page_and_poisons() {
        let builder: StageBuilder = Arc::new(|_: CancellationToken| {
            async move {
                if true {
                    panic!("exploded");
                }
                Ok::<_, QueryError>(PipelineStage::empty())
            }
            .boxed()
        });
        let mut stage = CatchAllStage::new(LazyStage::new(builder).into_stage()).into_stage();
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await.unwrap());
        match stage.current() {
            Some(Err(QueryError::Internal(message))) => assert!(message.contains("exploded")),
            other => panic!("unexpected page {:?}", other),
        }
        assert!(!stage.move_next(&cancel).await.unwrap());
    }
}
