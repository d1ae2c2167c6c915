// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! GROUP BY
//!
//! Ranges return one row per group they saw:
//! `{"groupByItems": [...], "payload": {alias: {"item": partial} | value}}`.
//! The stage folds every row into a grouping table, and only once the source
//! is drained does it hand the groups out, a page at a time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::page::{PageMetrics, QueryPage, QueryState};
use crate::plan::GroupByAlias;
use crate::routing::canonical_json;

use super::aggregate::{Aggregator, Item};
use super::ordering::item_value;
use super::{take_produced, PageSlot, PipelineStage};

const TABLE_PROPERTY: &str = "groupingTable";
const SOURCE_TOKEN_PROPERTY: &str = "sourceToken";
/// Source position once every range was folded into the table
const DONE_MARKER: &str = "DONE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GroupColumn {
    Aggregate { aggregator: Aggregator },
    /// A grouping expression; the first value seen wins
    Scalar { value: Option<Item> },
}

impl GroupColumn {
    fn result(&self) -> Option<Value> {
        match self {
            GroupColumn::Aggregate { aggregator } => aggregator.result(),
            GroupColumn::Scalar { value } => value.as_ref().map(|v| v.item.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    pub group_by_items: Vec<Value>,
    pub columns: Vec<GroupColumn>,
}

/// Groups keyed by the canonical text of their grouping values
pub type GroupingTable = BTreeMap<String, GroupEntry>;

/// Table and progress restored from a continuation
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByState {
    pub table: GroupingTable,
    pub source_done: bool,
}

pub struct GroupByStage {
    source: PipelineStage,
    aliases: Vec<GroupByAlias>,
    select_value: bool,
    page_size: usize,
    table: GroupingTable,
    source_done: bool,
    metrics: PageMetrics,
    pub(crate) slot: PageSlot,
}

impl GroupByStage {
    pub fn peel(continuation: Option<&Value>) -> QueryResult<(Option<GroupByState>, Option<Value>)> {
        let Some(token) = continuation.filter(|value| !value.is_null()) else {
            return Ok((None, None));
        };
        let table = token
            .get(TABLE_PROPERTY)
            .cloned()
            .ok_or_else(|| QueryError::malformed_token("continuation is missing 'groupingTable'"))?;
        let table: GroupingTable = serde_json::from_value(table)
            .map_err(|e| QueryError::malformed_token(format!("invalid grouping table: {}", e)))?;
        let source = token
            .get(SOURCE_TOKEN_PROPERTY)
            .ok_or_else(|| QueryError::malformed_token("group by continuation is missing 'sourceToken'"))?;

        if source.as_str() == Some(DONE_MARKER) {
            let state = GroupByState {
                table,
                source_done: true,
            };
            return Ok((Some(state), None));
        }
        let state = GroupByState {
            table,
            source_done: false,
        };
        Ok((Some(state), Some(source.clone())))
    }

    pub fn monadic_create(
        source: PipelineStage,
        aliases: Vec<GroupByAlias>,
        select_value: bool,
        page_size: usize,
        state: Option<GroupByState>,
    ) -> QueryResult<PipelineStage> {
        let (table, source_done) = match state {
            Some(state) => {
                let consistent = state
                    .table
                    .values()
                    .all(|entry| entry.columns.len() == aliases.len());
                if !consistent {
                    return Err(QueryError::malformed_token(
                        "grouping table does not match the query's projection",
                    ));
                }
                (state.table, state.source_done)
            }
            None => (GroupingTable::new(), false),
        };
        Ok(PipelineStage::GroupBy(Box::new(Self {
            source,
            aliases,
            select_value,
            page_size: page_size.max(1),
            table,
            source_done,
            metrics: PageMetrics::default(),
            slot: PageSlot::default(),
        })))
    }

    fn new_columns(&self) -> Vec<GroupColumn> {
        self.aliases
            .iter()
            .map(|alias| match alias.aggregate {
                Some(operator) => GroupColumn::Aggregate {
                    aggregator: Aggregator::new(operator),
                },
                None => GroupColumn::Scalar { value: None },
            })
            .collect()
    }

    fn fold(&mut self, row: &Value) -> QueryResult<()> {
        let group_by_items = row
            .get("groupByItems")
            .and_then(Value::as_array)
            .ok_or_else(|| QueryError::internal("group by row is missing groupByItems"))?;
        let key = canonical_json(&Value::Array(group_by_items.clone()));
        let payload = row.get("payload");

        if !self.table.contains_key(&key) {
            let entry = GroupEntry {
                group_by_items: group_by_items.clone(),
                columns: self.new_columns(),
            };
            self.table.insert(key.clone(), entry);
        }
        let Some(entry) = self.table.get_mut(&key) else {
            return Ok(());
        };

        for (column, alias) in entry.columns.iter_mut().zip(&self.aliases) {
            let value = match (payload, self.select_value && self.aliases.len() == 1) {
                (Some(Value::Object(fields)), false) => fields.get(&alias.alias),
                (payload, _) => payload,
            };
            match column {
                GroupColumn::Aggregate { aggregator } => {
                    aggregator.add(value.and_then(item_value));
                }
                GroupColumn::Scalar { value: current } => {
                    if current.is_none() {
                        *current = value.map(|v| Item { item: v.clone() });
                    }
                }
            }
        }
        Ok(())
    }

    fn render(&self, entry: &GroupEntry) -> Option<Value> {
        if self.select_value && entry.columns.len() == 1 {
            return entry.columns[0].result();
        }
        let mut row = Map::new();
        for (column, alias) in entry.columns.iter().zip(&self.aliases) {
            if let Some(value) = column.result() {
                row.insert(alias.alias.clone(), value);
            }
        }
        Some(Value::Object(row))
    }

    fn table_state(&self, source: Value) -> QueryResult<QueryState> {
        let table = serde_json::to_value(&self.table)
            .map_err(|e| QueryError::internal(format!("cannot encode grouping table: {}", e)))?;
        Ok(QueryState::new(json!({
            TABLE_PROPERTY: table,
            SOURCE_TOKEN_PROPERTY: source,
        })))
    }

    fn emit_groups(&mut self) -> QueryResult<QueryPage> {
        let mut documents = Vec::new();
        while documents.len() < self.page_size {
            let Some((_, entry)) = self.table.pop_first() else {
                break;
            };
            if let Some(row) = self.render(&entry) {
                documents.push(row);
            }
        }
        let state = if self.table.is_empty() {
            None
        } else {
            Some(self.table_state(json!(DONE_MARKER))?)
        };
        let mut page = QueryPage::new(documents, state);
        page.absorb_metrics(&self.metrics.take());
        Ok(page)
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("GroupBy")?;

        if !self.source_done {
            if self.source.move_next(cancel).await? {
                match take_produced(&mut self.source) {
                    Ok(mut page) => {
                        let rows = std::mem::take(&mut page.documents);
                        for row in &rows {
                            if let Err(error) = self.fold(row) {
                                return Ok(self.slot.set(Err(error)));
                            }
                        }
                        match page.state.take() {
                            Some(source_state) => {
                                return match self.table_state(source_state.into_value()) {
                                    Ok(state) => {
                                        page.state = Some(state);
                                        Ok(self.slot.set(Ok(page)))
                                    }
                                    Err(error) => Ok(self.slot.set(Err(error))),
                                };
                            }
                            None => {
                                self.metrics.add_page(&page);
                                self.source_done = true;
                            }
                        }
                    }
                    Err(error) => return Ok(self.slot.set(Err(error))),
                }
            } else {
                self.source_done = true;
            }
            log::debug!("Group by folded {} groups", self.table.len());
            return match self.emit_groups() {
                Ok(page) => Ok(self.slot.set(Ok(page))),
                Err(error) => Ok(self.slot.set(Err(error))),
            };
        }

        if self.table.is_empty() {
            return Ok(self.slot.finish());
        }
        match self.emit_groups() {
            Ok(page) => Ok(self.slot.set(Ok(page))),
            Err(error) => Ok(self.slot.set(Err(error))),
        }
    }
}
