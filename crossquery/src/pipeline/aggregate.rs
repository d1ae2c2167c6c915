// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Aggregates without GROUP BY
//!
//! Every range returns a partial result per aggregate. The stage folds the
//! partials of all ranges and produces one final row once the source is
//! drained. Until then it hands out empty pages whose continuation carries
//! the running accumulators.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::page::{PageMetrics, QueryPage, QueryState};
use crate::plan::AggregateOperator;

use super::ordering::{compare_values, item_value};
use super::{take_produced, PageSlot, PipelineStage};

const AGGREGATES_PROPERTY: &str = "aggregates";
const SOURCE_TOKEN_PROPERTY: &str = "sourceToken";

/// JSON number, integral when the value has no fraction
pub fn number_value(value: f64) -> Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// A value that may be JSON null; absence is the undefined value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item: Value,
}

/// Running state of one aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Aggregator {
    Count {
        count: u64,
    },
    Sum {
        sum: f64,
        undefined: bool,
    },
    Min {
        best: Option<Item>,
    },
    Max {
        best: Option<Item>,
    },
    Average {
        sum: f64,
        count: u64,
        undefined: bool,
    },
}

impl Aggregator {
    pub fn new(operator: AggregateOperator) -> Self {
        match operator {
            AggregateOperator::Count => Aggregator::Count { count: 0 },
            AggregateOperator::Sum => Aggregator::Sum {
                sum: 0.0,
                undefined: false,
            },
            AggregateOperator::Min => Aggregator::Min { best: None },
            AggregateOperator::Max => Aggregator::Max { best: None },
            AggregateOperator::Average => Aggregator::Average {
                sum: 0.0,
                count: 0,
                undefined: false,
            },
        }
    }

    pub fn operator(&self) -> AggregateOperator {
        match self {
            Aggregator::Count { .. } => AggregateOperator::Count,
            Aggregator::Sum { .. } => AggregateOperator::Sum,
            Aggregator::Min { .. } => AggregateOperator::Min,
            Aggregator::Max { .. } => AggregateOperator::Max,
            Aggregator::Average { .. } => AggregateOperator::Average,
        }
    }

    /// Fold one partial result; `None` is an undefined partial
    pub fn add(&mut self, partial: Option<&Value>) {
        match self {
            Aggregator::Count { count } => {
                if let Some(n) = partial.and_then(Value::as_f64) {
                    *count += n.max(0.0) as u64;
                }
            }
            Aggregator::Sum { sum, undefined } => match partial.and_then(Value::as_f64) {
                Some(n) => *sum += n,
                None => *undefined = true,
            },
            Aggregator::Min { best } => {
                if let Some(value) = partial {
                    let replace = match best {
                        Some(current) => {
                            compare_values(Some(value), Some(&current.item)).is_lt()
                        }
                        None => true,
                    };
                    if replace {
                        *best = Some(Item {
                            item: value.clone(),
                        });
                    }
                }
            }
            Aggregator::Max { best } => {
                if let Some(value) = partial {
                    let replace = match best {
                        Some(current) => {
                            compare_values(Some(value), Some(&current.item)).is_gt()
                        }
                        None => true,
                    };
                    if replace {
                        *best = Some(Item {
                            item: value.clone(),
                        });
                    }
                }
            }
            Aggregator::Average {
                sum,
                count,
                undefined,
            } => {
                let Some(partial) = partial else {
                    return;
                };
                let part_sum = partial.get("sum").and_then(Value::as_f64);
                let part_count = partial.get("count").and_then(Value::as_u64);
                match (part_sum, part_count) {
                    (Some(s), Some(c)) => {
                        *sum += s;
                        *count += c;
                    }
                    _ => *undefined = true,
                }
            }
        }
    }

    /// Final value; `None` is undefined
    pub fn result(&self) -> Option<Value> {
        match self {
            Aggregator::Count { count } => Some(json!(count)),
            Aggregator::Sum { sum, undefined } => (!undefined).then(|| number_value(*sum)),
            Aggregator::Min { best } | Aggregator::Max { best } => {
                best.as_ref().map(|best| best.item.clone())
            }
            Aggregator::Average {
                sum,
                count,
                undefined,
            } => {
                if *undefined || *count == 0 {
                    None
                } else {
                    Some(number_value(*sum / *count as f64))
                }
            }
        }
    }
}

/// Default projection name of the n-th unnamed aggregate
pub fn default_alias(index: usize) -> String {
    format!("${}", index + 1)
}

pub struct AggregateStage {
    source: PipelineStage,
    aggregators: Vec<Aggregator>,
    aliases: Vec<String>,
    select_value: bool,
    source_drained: bool,
    metrics: PageMetrics,
    pub(crate) slot: PageSlot,
}

impl AggregateStage {
    pub fn peel(continuation: Option<&Value>) -> QueryResult<(Option<Vec<Aggregator>>, Option<Value>)> {
        let Some(token) = continuation.filter(|value| !value.is_null()) else {
            return Ok((None, None));
        };
        let aggregates = token
            .get(AGGREGATES_PROPERTY)
            .cloned()
            .ok_or_else(|| QueryError::malformed_token("continuation is missing 'aggregates'"))?;
        let aggregators: Vec<Aggregator> = serde_json::from_value(aggregates)
            .map_err(|e| QueryError::malformed_token(format!("invalid aggregate state: {}", e)))?;
        let source = token
            .get(SOURCE_TOKEN_PROPERTY)
            .cloned()
            .ok_or_else(|| QueryError::malformed_token("aggregate continuation is missing 'sourceToken'"))?;
        Ok((Some(aggregators), Some(source)))
    }

    /// Build over `source`, resuming from peeled accumulators when given
    pub fn monadic_create(
        source: PipelineStage,
        operators: &[AggregateOperator],
        aliases: &[String],
        select_value: bool,
        state: Option<Vec<Aggregator>>,
    ) -> QueryResult<PipelineStage> {
        let aggregators = match state {
            Some(restored) => {
                let matches = restored.len() == operators.len()
                    && restored
                        .iter()
                        .zip(operators)
                        .all(|(aggregator, operator)| aggregator.operator() == *operator);
                if !matches {
                    return Err(QueryError::malformed_token(
                        "aggregate continuation does not match the query's aggregates",
                    ));
                }
                restored
            }
            None => operators.iter().copied().map(Aggregator::new).collect(),
        };
        let aliases = (0..operators.len())
            .map(|index| {
                aliases
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| default_alias(index))
            })
            .collect();

        Ok(PipelineStage::Aggregate(Box::new(Self {
            source,
            aggregators,
            aliases,
            select_value,
            source_drained: false,
            metrics: PageMetrics::default(),
            slot: PageSlot::default(),
        })))
    }

    fn fold(&mut self, row: &Value) {
        if self.select_value {
            let partial = match row {
                Value::Array(items) => items.first(),
                other => Some(other),
            };
            if let Some(aggregator) = self.aggregators.first_mut() {
                aggregator.add(partial.and_then(item_value));
            }
            return;
        }
        for (aggregator, alias) in self.aggregators.iter_mut().zip(&self.aliases) {
            aggregator.add(row.get(alias).and_then(item_value));
        }
    }

    fn final_documents(&self) -> Vec<Value> {
        if self.select_value {
            return self
                .aggregators
                .first()
                .and_then(Aggregator::result)
                .into_iter()
                .collect();
        }
        let mut row = Map::new();
        for (aggregator, alias) in self.aggregators.iter().zip(&self.aliases) {
            if let Some(value) = aggregator.result() {
                row.insert(alias.clone(), value);
            }
        }
        vec![Value::Object(row)]
    }

    fn state(&self, source_state: QueryState) -> QueryResult<QueryState> {
        let aggregates = serde_json::to_value(&self.aggregators)
            .map_err(|e| QueryError::internal(format!("cannot encode aggregate state: {}", e)))?;
        Ok(QueryState::new(json!({
            AGGREGATES_PROPERTY: aggregates,
            SOURCE_TOKEN_PROPERTY: source_state.into_value(),
        })))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("Aggregate")?;
        if self.source_drained {
            return Ok(self.slot.finish());
        }

        if !self.source.move_next(cancel).await? {
            self.source_drained = true;
            let mut page = QueryPage::new(self.final_documents(), None);
            page.absorb_metrics(&self.metrics.take());
            return Ok(self.slot.set(Ok(page)));
        }

        match take_produced(&mut self.source) {
            Ok(mut page) => {
                let rows = std::mem::take(&mut page.documents);
                for row in &rows {
                    self.fold(row);
                }
                page.absorb_metrics(&self.metrics.take());
                match page.state.take() {
                    Some(source_state) => match self.state(source_state) {
                        Ok(state) => page.state = Some(state),
                        Err(error) => return Ok(self.slot.set(Err(error))),
                    },
                    None => {
                        self.source_drained = true;
                        page.documents = self.final_documents();
                    }
                }
                Ok(self.slot.set(Ok(page)))
            }
            Err(error) => Ok(self.slot.set(Err(error))),
        }
    }
}
