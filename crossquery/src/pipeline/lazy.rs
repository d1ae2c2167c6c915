// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deferred stage construction

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};

use super::{take_produced, PageSlot, PipelineStage};

/// Builds a value asynchronously; may be invoked again if a build is abandoned
pub type LazyFactory<T> = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, T> + Send + Sync>;

/// A value built on first use
///
/// Concurrent callers await the same in-flight build; the factory runs again
/// only when a build future is dropped before finishing.
pub struct AsyncLazy<T> {
    cell: OnceCell<T>,
    factory: LazyFactory<T>,
}

impl<T: Send + Sync> AsyncLazy<T> {
    pub fn new(factory: LazyFactory<T>) -> Self {
        Self {
            cell: OnceCell::new(),
            factory,
        }
    }

    pub async fn get_or_init(&self, cancel: &CancellationToken) -> &T {
        self.cell
            .get_or_init(|| (self.factory)(cancel.clone()))
            .await
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.cell.get_mut()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

/// Factory of a stage built on the first advance
pub type StageBuilder =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, QueryResult<PipelineStage>> + Send + Sync>;

/// Defers building its source until the first advance
///
/// A failed build is reported as the first page; the stage ends after it.
pub struct LazyStage {
    lazy: AsyncLazy<Mutex<QueryResult<PipelineStage>>>,
    build_failure_reported: bool,
    pub(crate) slot: PageSlot,
}

impl LazyStage {
    pub fn new(builder: StageBuilder) -> Self {
        let factory: LazyFactory<Mutex<QueryResult<PipelineStage>>> = Arc::new(move |cancel: CancellationToken| {
            let builder = builder.clone();
            async move { Mutex::new(builder(cancel).await) }.boxed()
        });
        Self {
            lazy: AsyncLazy::new(factory),
            build_failure_reported: false,
            slot: PageSlot::default(),
        }
    }

    pub fn into_stage(self) -> PipelineStage {
        PipelineStage::Lazy(Box::new(self))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("Lazy")?;
        cancel.check()?;

        self.lazy.get_or_init(cancel).await;
        let built = match self.lazy.get_mut() {
            Some(built) => built.get_mut(),
            None => {
                return Err(QueryError::internal("lazy stage was not initialized"));
            }
        };

        match built {
            Ok(stage) => {
                if stage.move_next(cancel).await? {
                    let page = take_produced(stage);
                    Ok(self.slot.set(page))
                } else {
                    Ok(self.slot.finish())
                }
            }
            Err(QueryError::Cancelled) if cancel.is_cancelled() => Err(QueryError::Cancelled),
            Err(error) => {
                if self.build_failure_reported {
                    return Ok(self.slot.finish());
                }
                self.build_failure_reported = true;
                log::debug!("Lazy stage construction failed: {}", error);
                Ok(self.slot.set(Err(error.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_build() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let factory: LazyFactory<usize> = Arc::new(move |_: CancellationToken| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst) + 41
            }
            .boxed()
        });
        let lazy = Arc::new(AsyncLazy::new(factory));
        let cancel = CancellationToken::new();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lazy = lazy.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { *lazy.get_or_init(&cancel).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 41);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(lazy.is_initialized());
    }

    #[tokio::test]
    async fn test_lazy_stage_builds_on_first_advance() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let builder: StageBuilder = Arc::new(move |_: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, QueryError>(PipelineStage::empty()) }.boxed()
        });
        let mut stage = LazyStage::new(builder).into_stage();
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let cancel = CancellationToken::new();
        assert!(!stage.move_next(&cancel).await.unwrap());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_first_page() {
        let builder: StageBuilder = Arc::new(|_: CancellationToken| {
            async move { Err::<PipelineStage, _>(QueryError::QueryPlan("no plan".to_string())) }.boxed()
        });
        let mut stage = LazyStage::new(builder).into_stage();
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await.unwrap());
        assert!(matches!(stage.current(), Some(Err(QueryError::QueryPlan(_)))));
        assert!(!stage.move_next(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_pages_flow_through() {
        let builder: StageBuilder = Arc::new(|_: CancellationToken| {
            async move { Ok::<_, QueryError>(PipelineStage::faulted(QueryError::timeout("slow"))) }
                .boxed()
        });
        let mut stage = LazyStage::new(builder).into_stage();
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await.unwrap());
        assert_eq!(stage.take_current(), Some(Err(QueryError::timeout("slow"))));
        assert!(!stage.move_next(&cancel).await.unwrap());
    }
}
