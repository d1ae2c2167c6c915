// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Result pages produced by pipeline stages

use serde_json::Value;

use crate::client::BackendPage;
use crate::error::QueryError;

/// Opaque continuation state of a stage after it produced a page
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState(pub Value);

impl QueryState {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub documents: Vec<Value>,
    pub request_charge: f64,
    pub activity_id: Option<String>,
    pub response_length_bytes: usize,
    pub diagnostics: Option<String>,
    pub disallow_continuation_reason: Option<String>,
    /// `None` once the query is fully drained
    pub state: Option<QueryState>,
}

/// A page slot: either a page or the failure that took its place
pub type PageResult = Result<QueryPage, QueryError>;

impl QueryPage {
    pub fn new(documents: Vec<Value>, state: Option<QueryState>) -> Self {
        Self {
            documents,
            state,
            ..Self::default()
        }
    }

    /// Lift a backend page, replacing its raw continuation with `state`
    pub fn from_backend(page: BackendPage, state: Option<QueryState>) -> Self {
        Self {
            documents: page.documents,
            request_charge: page.request_charge,
            activity_id: page.activity_id,
            response_length_bytes: page.response_length_bytes,
            diagnostics: page.diagnostics,
            disallow_continuation_reason: None,
            state,
        }
    }

    /// Same metrics, new documents and state
    pub fn with_documents(self, documents: Vec<Value>, state: Option<QueryState>) -> Self {
        Self {
            documents,
            state,
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Fold the accounting of another page into this one
    pub fn absorb_metrics(&mut self, metrics: &PageMetrics) {
        self.request_charge += metrics.request_charge;
        self.response_length_bytes += metrics.response_length_bytes;
        if self.activity_id.is_none() {
            self.activity_id = metrics.activity_id.clone();
        }
    }
}

/// Accounting carried over from pages that were never shown to the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub request_charge: f64,
    pub response_length_bytes: usize,
    pub activity_id: Option<String>,
}

impl PageMetrics {
    pub fn add_page(&mut self, page: &QueryPage) {
        self.request_charge += page.request_charge;
        self.response_length_bytes += page.response_length_bytes;
        if page.activity_id.is_some() {
            self.activity_id = page.activity_id.clone();
        }
    }

    pub fn add_backend(&mut self, page: &BackendPage) {
        self.request_charge += page.request_charge;
        self.response_length_bytes += page.response_length_bytes;
        if page.activity_id.is_some() {
            self.activity_id = page.activity_id.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.request_charge == 0.0 && self.response_length_bytes == 0
    }

    /// Move the accumulated accounting out, leaving zeros behind
    pub fn take(&mut self) -> PageMetrics {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absorb_metrics() {
        let mut metrics = PageMetrics::default();
        metrics.add_page(&QueryPage {
            request_charge: 2.5,
            response_length_bytes: 10,
            activity_id: Some("a1".to_string()),
            ..QueryPage::default()
        });

        let mut page = QueryPage::new(vec![json!(1)], None);
        page.request_charge = 1.0;
        page.absorb_metrics(&metrics.take());

        assert_eq!(page.request_charge, 3.5);
        assert_eq!(page.response_length_bytes, 10);
        assert_eq!(page.activity_id.as_deref(), Some("a1"));
        assert!(metrics.is_empty());
    }
}
