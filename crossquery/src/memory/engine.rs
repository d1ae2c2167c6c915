// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-range query evaluation of the in-memory backend
//!
//! A backend runs the query on one range and returns rows already shaped for
//! the client-side operators: ORDER BY rows carry their sort items, aggregate
//! queries return partial results, GROUP BY queries return one row per group.
//! Whole-query requests skip that shaping and get final rows, with every
//! operator of the plan applied on the range.

use std::collections::{BTreeMap, HashSet};

use serde_json::{json, Map, Value};

use crate::error::QueryResult;
use crate::pipeline::aggregate::{default_alias, number_value, Aggregator};
use crate::pipeline::ordering::{compare_order_by, compare_values};
use crate::plan::{AggregateOperator, QueryInfo, SortOrder, SqlQuerySpec};
use crate::routing::canonical_json;

/// A document as stored by the in-memory container
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Resource id; orders documents by insertion
    pub rid: String,
    pub effective_partition_key: String,
    pub body: Value,
}

/// One result row of a range
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRow {
    pub rid: String,
    /// `{"item": v}` wrappers, one per ORDER BY expression
    pub order_by_items: Vec<Value>,
    pub value: Value,
}

impl ServerRow {
    pub fn new(rid: impl Into<String>, value: Value) -> Self {
        Self {
            rid: rid.into(),
            order_by_items: Vec::new(),
            value,
        }
    }

    pub fn ordered(rid: impl Into<String>, order_by_items: Vec<Value>, value: Value) -> Self {
        Self {
            rid: rid.into(),
            order_by_items,
            value,
        }
    }
}

/// Rows of a range plus how they are sorted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerResult {
    pub rows: Vec<ServerRow>,
    /// Empty for unordered results
    pub sort_orders: Vec<SortOrder>,
}

/// Evaluates a query over the documents of one range
pub trait ServerQueryEngine: Send + Sync {
    fn execute(&self, query: &SqlQuerySpec, documents: &[StoredDocument]) -> QueryResult<ServerResult>;

    /// Evaluate the whole query on `documents`; nothing runs after it on the client
    ///
    /// Engines whose `execute` already returns final rows keep the default.
    fn execute_whole(
        &self,
        query: &SqlQuerySpec,
        documents: &[StoredDocument],
    ) -> QueryResult<ServerResult> {
        self.execute(query, documents)
    }
}

impl<F> ServerQueryEngine for F
where
    F: Fn(&SqlQuerySpec, &[StoredDocument]) -> QueryResult<ServerResult> + Send + Sync,
{
    fn execute(&self, query: &SqlQuerySpec, documents: &[StoredDocument]) -> QueryResult<ServerResult> {
        self(query, documents)
    }
}

/// Resolve a path expression such as `c.address.city` against a document
///
/// The first segment names the document itself.
pub fn eval_path<'a>(document: &'a Value, expression: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in expression.split('.').skip(1) {
        current = current.get(segment)?;
    }
    Some(current)
}

fn wrap(value: Option<Value>) -> Value {
    match value {
        Some(value) => json!({ "item": value }),
        None => json!({}),
    }
}

/// Range-local result of one aggregate over `values`; `None` is undefined
fn partial(operator: AggregateOperator, values: &[Option<&Value>]) -> Option<Value> {
    match operator {
        AggregateOperator::Count => Some(json!(values.iter().filter(|v| v.is_some()).count())),
        AggregateOperator::Sum => {
            let mut sum = 0.0;
            for value in values {
                sum += value.and_then(Value::as_f64)?;
            }
            Some(number_value(sum))
        }
        AggregateOperator::Min | AggregateOperator::Max => {
            let mut best: Option<&Value> = None;
            for value in values.iter().flatten().copied() {
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let ordering = compare_values(Some(value), Some(current));
                        if operator == AggregateOperator::Min {
                            ordering.is_lt()
                        } else {
                            ordering.is_gt()
                        }
                    }
                };
                if replace {
                    best = Some(value);
                }
            }
            best.cloned()
        }
        AggregateOperator::Average => {
            if values.is_empty() {
                return None;
            }
            let mut sum = 0.0;
            for value in values {
                sum += value.and_then(Value::as_f64)?;
            }
            Some(json!({ "sum": number_value(sum), "count": values.len() }))
        }
    }
}

/// Grouping items of a group and its member documents
type Group<'a> = (Vec<Value>, Vec<&'a StoredDocument>);

/// Final value of one aggregate computed on a single range
fn finalize(operator: AggregateOperator, values: &[Option<&Value>]) -> Option<Value> {
    let mut aggregator = Aggregator::new(operator);
    aggregator.add(partial(operator, values).as_ref());
    aggregator.result()
}

/// Plan-shaped evaluation without a SQL parser
///
/// Filters are equality tests on path expressions; ORDER BY and GROUP BY
/// expressions of the plan are read as path expressions; aggregate arguments
/// are supplied as path expressions in aggregate order (COUNT without one
/// counts documents).
#[derive(Debug, Clone, Default)]
pub struct ScanEngine {
    info: QueryInfo,
    filters: Vec<(String, Value)>,
    aggregate_arguments: Vec<String>,
}

impl ScanEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_plan(info: QueryInfo) -> Self {
        Self {
            info,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, expression: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((expression.into(), value.into()));
        self
    }

    pub fn with_aggregate_arguments(mut self, arguments: Vec<String>) -> Self {
        self.aggregate_arguments = arguments;
        self
    }

    fn matches(&self, document: &Value) -> bool {
        self.filters
            .iter()
            .all(|(expression, expected)| eval_path(document, expression) == Some(expected))
    }

    fn matching<'a>(&self, documents: &'a [StoredDocument]) -> Vec<&'a StoredDocument> {
        documents
            .iter()
            .filter(|document| self.matches(&document.body))
            .collect()
    }

    fn document_rows(&self, documents: &[&StoredDocument]) -> ServerResult {
        if !self.info.has_order_by() {
            return ServerResult {
                rows: documents
                    .iter()
                    .map(|document| ServerRow::new(document.rid.clone(), document.body.clone()))
                    .collect(),
                sort_orders: Vec::new(),
            };
        }
        let rows = documents
            .iter()
            .map(|document| {
                let items = self
                    .info
                    .order_by_expressions
                    .iter()
                    .map(|expression| wrap(eval_path(&document.body, expression).cloned()))
                    .collect();
                ServerRow::ordered(document.rid.clone(), items, document.body.clone())
            })
            .collect();
        ServerResult {
            rows,
            sort_orders: self.info.order_by.clone(),
        }
    }

    fn argument_values<'a>(&self, index: usize, documents: &[&'a StoredDocument]) -> Vec<Option<&'a Value>> {
        match self.aggregate_arguments.get(index) {
            Some(expression) => documents
                .iter()
                .map(|document| eval_path(&document.body, expression))
                .collect(),
            None => documents.iter().map(|document| Some(&document.body)).collect(),
        }
    }

    fn aggregate_operators(&self) -> Vec<AggregateOperator> {
        if self.info.has_group_by() {
            self.info
                .group_by_aliases
                .iter()
                .filter_map(|alias| alias.aggregate)
                .collect()
        } else {
            self.info.aggregates.clone()
        }
    }

    fn aggregate_row(&self, documents: &[&StoredDocument]) -> ServerRow {
        let partials: Vec<Value> = self
            .aggregate_operators()
            .into_iter()
            .enumerate()
            .map(|(index, operator)| wrap(partial(operator, &self.argument_values(index, documents))))
            .collect();

        let value = if self.info.has_select_value {
            Value::Array(partials)
        } else {
            let mut row = Map::new();
            for (index, partial) in partials.into_iter().enumerate() {
                let alias = self
                    .info
                    .aggregate_aliases
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| default_alias(index));
                row.insert(alias, partial);
            }
            Value::Object(row)
        };
        ServerRow::new("0", value)
    }

    /// Documents keyed by the canonical text of their grouping items
    fn groups<'a>(&self, documents: &[&'a StoredDocument]) -> BTreeMap<String, Group<'a>> {
        let mut groups: BTreeMap<String, Group<'a>> = BTreeMap::new();
        for document in documents {
            let items: Vec<Value> = self
                .info
                .group_by_expressions
                .iter()
                .map(|expression| wrap(eval_path(&document.body, expression).cloned()))
                .collect();
            let key = canonical_json(&Value::Array(items.clone()));
            groups.entry(key).or_insert_with(|| (items, Vec::new())).1.push(*document);
        }
        groups
    }

    /// The finished aggregate projection; `None` when a VALUE aggregate is undefined
    fn final_aggregate_row(&self, documents: &[&StoredDocument]) -> Option<ServerRow> {
        let results: Vec<Option<Value>> = self
            .info
            .aggregates
            .iter()
            .enumerate()
            .map(|(index, operator)| finalize(*operator, &self.argument_values(index, documents)))
            .collect();

        let value = if self.info.has_select_value {
            results.into_iter().next().flatten()?
        } else {
            let mut row = Map::new();
            for (index, result) in results.into_iter().enumerate() {
                if let Some(result) = result {
                    let alias = self
                        .info
                        .aggregate_aliases
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| default_alias(index));
                    row.insert(alias, result);
                }
            }
            Value::Object(row)
        };
        Some(ServerRow::new("0", value))
    }

    fn final_group_rows(&self, documents: &[&StoredDocument]) -> Vec<ServerRow> {
        let single = self.info.has_select_value && self.info.group_by_aliases.len() == 1;
        self.groups(documents)
            .into_values()
            .enumerate()
            .filter_map(|(index, (items, members))| {
                let mut row = Map::new();
                let mut aggregate_index = 0;
                let mut scalar_index = 0;
                for alias in &self.info.group_by_aliases {
                    let value = match alias.aggregate {
                        Some(operator) => {
                            let values = self.argument_values(aggregate_index, &members);
                            aggregate_index += 1;
                            finalize(operator, &values)
                        }
                        None => {
                            let value = items.get(scalar_index).and_then(|item| item.get("item")).cloned();
                            scalar_index += 1;
                            value
                        }
                    };
                    if let Some(value) = value {
                        row.insert(alias.alias.clone(), value);
                    }
                }
                let value = if single {
                    row.into_values().next()?
                } else {
                    Value::Object(row)
                };
                Some(ServerRow::new(format!("{:08}", index), value))
            })
            .collect()
    }

    fn group_rows(&self, documents: &[&StoredDocument]) -> Vec<ServerRow> {
        let groups = self.groups(documents);
        let single = self.info.has_select_value && self.info.group_by_aliases.len() == 1;
        groups
            .into_values()
            .enumerate()
            .map(|(index, (items, members))| {
                let mut payload = Map::new();
                let mut aggregate_index = 0;
                let mut scalar_index = 0;
                for alias in &self.info.group_by_aliases {
                    let value = match alias.aggregate {
                        Some(operator) => {
                            let values = self.argument_values(aggregate_index, &members);
                            aggregate_index += 1;
                            Some(wrap(partial(operator, &values)))
                        }
                        None => {
                            let value = items.get(scalar_index).and_then(|item| item.get("item")).cloned();
                            scalar_index += 1;
                            value
                        }
                    };
                    if let Some(value) = value {
                        payload.insert(alias.alias.clone(), value);
                    }
                }
                let payload = if single {
                    payload.into_values().next().unwrap_or(Value::Null)
                } else {
                    Value::Object(payload)
                };
                ServerRow::new(
                    format!("{:08}", index),
                    json!({ "groupByItems": items, "payload": payload }),
                )
            })
            .collect()
    }
}

impl ServerQueryEngine for ScanEngine {
    fn execute(&self, _query: &SqlQuerySpec, documents: &[StoredDocument]) -> QueryResult<ServerResult> {
        let matching = self.matching(documents);

        if self.info.has_group_by() {
            return Ok(ServerResult {
                rows: self.group_rows(&matching),
                sort_orders: Vec::new(),
            });
        }
        if self.info.has_aggregates() {
            return Ok(ServerResult {
                rows: vec![self.aggregate_row(&matching)],
                sort_orders: Vec::new(),
            });
        }
        Ok(self.document_rows(&matching))
    }

    fn execute_whole(&self, _query: &SqlQuerySpec, documents: &[StoredDocument]) -> QueryResult<ServerResult> {
        let matching = self.matching(documents);

        let ServerResult {
            mut rows,
            sort_orders,
        } = if self.info.has_group_by() {
            ServerResult {
                rows: self.final_group_rows(&matching),
                sort_orders: Vec::new(),
            }
        } else if self.info.has_aggregates() {
            ServerResult {
                rows: self.final_aggregate_row(&matching).into_iter().collect(),
                sort_orders: Vec::new(),
            }
        } else {
            self.document_rows(&matching)
        };

        rows.sort_by(|a, b| {
            compare_order_by(&a.order_by_items, &a.rid, &b.order_by_items, &b.rid, &sort_orders)
        });
        if self.info.has_distinct() {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(canonical_json(&row.value)));
        }
        let skip = self.info.offset.unwrap_or(0);
        let take = [self.info.limit, self.info.top]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(u64::MAX);
        let rows = rows
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(take).unwrap_or(usize::MAX))
            .collect();

        Ok(ServerResult { rows, sort_orders })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DistinctType, GroupByAlias};

    fn documents() -> Vec<StoredDocument> {
        [("a", 3), ("b", 5), ("a", 4)]
            .iter()
            .enumerate()
            .map(|(i, (team, score))| StoredDocument {
                rid: format!("{:04}", i),
                effective_partition_key: "00000000".to_string(),
                body: json!({"team": team, "score": score}),
            })
            .collect()
    }

    #[test]
    fn test_eval_path() {
        let document = json!({"address": {"city": "Oslo"}});
        assert_eq!(eval_path(&document, "c.address.city"), Some(&json!("Oslo")));
        assert_eq!(eval_path(&document, "c"), Some(&document));
        assert_eq!(eval_path(&document, "c.zip"), None);
    }

    #[test]
    fn test_partials() {
        let one = json!(1);
        let text = json!("x");
        assert_eq!(partial(AggregateOperator::Sum, &[Some(&one), Some(&one)]), Some(json!(2)));
        assert_eq!(partial(AggregateOperator::Sum, &[Some(&one), Some(&text)]), None);
        assert_eq!(partial(AggregateOperator::Sum, &[]), Some(json!(0)));
        assert_eq!(partial(AggregateOperator::Max, &[Some(&one), Some(&text)]), Some(text.clone()));
        assert_eq!(partial(AggregateOperator::Average, &[]), None);
        assert_eq!(partial(AggregateOperator::Count, &[Some(&one), None]), Some(json!(1)));
    }

    #[test]
    fn test_count_value_row() {
        let engine = ScanEngine::for_plan(QueryInfo {
            aggregates: vec![AggregateOperator::Count],
            has_select_value: true,
            ..QueryInfo::default()
        });
        let result = engine
            .execute(&SqlQuerySpec::new("SELECT VALUE COUNT(1) FROM c"), &documents())
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].value, json!([{"item": 3}]));
    }

    #[test]
    fn test_group_rows() {
        let engine = ScanEngine::for_plan(QueryInfo {
            group_by_expressions: vec!["c.team".to_string()],
            group_by_aliases: vec![
                GroupByAlias {
                    alias: "team".to_string(),
                    aggregate: None,
                },
                GroupByAlias {
                    alias: "total".to_string(),
                    aggregate: Some(AggregateOperator::Sum),
                },
            ],
            ..QueryInfo::default()
        })
        .with_aggregate_arguments(vec!["c.score".to_string()]);

        let result = engine
            .execute(&SqlQuerySpec::new("SELECT c.team, SUM(c.score) AS total FROM c GROUP BY c.team"), &documents())
            .unwrap();
        let values: Vec<&Value> = result.rows.iter().map(|row| &row.value).collect();
        assert!(values.contains(&&json!({
            "groupByItems": [{"item": "a"}],
            "payload": {"team": "a", "total": {"item": 7}}
        })));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_whole_query_returns_final_values() {
        let count = ScanEngine::for_plan(QueryInfo {
            aggregates: vec![AggregateOperator::Count],
            has_select_value: true,
            ..QueryInfo::default()
        });
        let query = SqlQuerySpec::new("SELECT VALUE COUNT(1) FROM c");
        let result = count.execute_whole(&query, &documents()).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].value, json!(3));

        let average = ScanEngine::for_plan(QueryInfo {
            aggregates: vec![AggregateOperator::Average],
            aggregate_aliases: vec!["mean".to_string()],
            ..QueryInfo::default()
        })
        .with_aggregate_arguments(vec!["c.score".to_string()]);
        let result = average.execute_whole(&query, &documents()).unwrap();
        assert_eq!(result.rows[0].value, json!({"mean": 4}));

        let minimum = ScanEngine::for_plan(QueryInfo {
            aggregates: vec![AggregateOperator::Min],
            has_select_value: true,
            ..QueryInfo::default()
        })
        .with_aggregate_arguments(vec!["c.missing".to_string()]);
        assert!(minimum.execute_whole(&query, &documents()).unwrap().rows.is_empty());
    }

    #[test]
    fn test_whole_query_applies_distinct_and_window() {
        let engine = ScanEngine::for_plan(QueryInfo {
            distinct_type: DistinctType::Ordered,
            offset: Some(1),
            limit: Some(5),
            order_by: vec![SortOrder::Ascending],
            order_by_expressions: vec!["c".to_string()],
            has_select_value: true,
            ..QueryInfo::default()
        });
        let teams: Vec<StoredDocument> = [("0001", "b"), ("0002", "a"), ("0003", "a")]
            .iter()
            .map(|(rid, team)| StoredDocument {
                rid: rid.to_string(),
                effective_partition_key: "00000000".to_string(),
                body: json!(team),
            })
            .collect();

        let result = engine
            .execute_whole(&SqlQuerySpec::new("SELECT DISTINCT VALUE c FROM c ORDER BY c OFFSET 1 LIMIT 5"), &teams)
            .unwrap();
        let values: Vec<&Value> = result.rows.iter().map(|row| &row.value).collect();
        assert_eq!(values, vec![&json!("b")]);
    }

    #[test]
    fn test_filter_and_order() {
        let engine = ScanEngine::for_plan(QueryInfo {
            order_by: vec![SortOrder::Descending],
            order_by_expressions: vec!["c.score".to_string()],
            ..QueryInfo::default()
        })
        .with_filter("c.team", "a");

        let result = engine
            .execute(&SqlQuerySpec::new("SELECT * FROM c WHERE c.team = 'a' ORDER BY c.score DESC"), &documents())
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.sort_orders, vec![SortOrder::Descending]);
        assert_eq!(result.rows[0].order_by_items, vec![json!({"item": 3})]);
    }
}
