// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Partition range resolution
//!
//! Turns the targeting information of a request into the list of key ranges
//! the query has to visit, and maps continuation tokens recorded against an
//! older topology onto the live one.

use std::sync::Arc;

use crate::client::QueryClient;
use crate::error::{GoneSubStatus, QueryError, QueryResult};
use crate::token::ParallelContinuationToken;

use super::partition_key::PartitionKey;
use super::range::{covers_exactly, sort_by_min, uncovered, FeedRange, PartitionKeyRange, Range};

/// Everything a request says about which part of the container it targets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetScope {
    pub partition_key_range_id: Option<String>,
    pub partition_key: Option<PartitionKey>,
    /// Effective partition key supplied as a request property
    pub effective_partition_key: Option<String>,
    pub feed_range: Option<FeedRange>,
    /// Ranges computed by the query plan
    pub query_ranges: Vec<Range>,
}

impl TargetScope {
    pub fn with_query_ranges(mut self, ranges: Vec<Range>) -> Self {
        self.query_ranges = ranges;
        self
    }

    /// Keys the query can read
    ///
    /// A partition key range id is not known to the scope itself, so it
    /// reads as the whole key space.
    pub fn key_space(&self) -> Vec<Range> {
        if self.partition_key_range_id.is_some() {
            return vec![Range::full()];
        }
        if let Some(key) = &self.partition_key {
            return vec![Range::point(key.effective_partition_key())];
        }
        if let Some(epk) = &self.effective_partition_key {
            return vec![Range::point(epk.clone())];
        }
        match &self.feed_range {
            Some(FeedRange::PartitionKeyRangeId(_)) => vec![Range::full()],
            Some(FeedRange::PartitionKey(key)) => {
                vec![Range::point(key.effective_partition_key())]
            }
            Some(FeedRange::Range(range)) => vec![range.clone()],
            None if self.query_ranges.is_empty() => vec![Range::full()],
            None => self.query_ranges.clone(),
        }
    }
}

/// Resolves target ranges through the routing map of one container
#[derive(Clone)]
pub struct PartitionRangeResolver {
    client: Arc<dyn QueryClient>,
    resource_link: String,
    collection_rid: String,
}

impl PartitionRangeResolver {
    pub fn new(
        client: Arc<dyn QueryClient>,
        resource_link: impl Into<String>,
        collection_rid: impl Into<String>,
    ) -> Self {
        Self {
            client,
            resource_link: resource_link.into(),
            collection_rid: collection_rid.into(),
        }
    }

    pub fn collection_rid(&self) -> &str {
        &self.collection_rid
    }

    /// Ranges to visit, sorted by min key
    ///
    /// The most specific targeting wins: partition key range id, then
    /// partition key, then the effective partition key property, then the
    /// feed range, then the plan's query ranges. With none of those the
    /// whole key space is visited.
    pub async fn resolve(&self, scope: &TargetScope, force_refresh: bool) -> QueryResult<Vec<Range>> {
        if let Some(id) = &scope.partition_key_range_id {
            return self.resolve_range_id(id, force_refresh).await;
        }
        if let Some(key) = &scope.partition_key {
            return self
                .resolve_point(&key.effective_partition_key(), force_refresh)
                .await;
        }
        if let Some(epk) = &scope.effective_partition_key {
            return self.resolve_point(epk, force_refresh).await;
        }
        if let Some(feed_range) = &scope.feed_range {
            return match feed_range {
                FeedRange::PartitionKeyRangeId(id) => self.resolve_range_id(id, force_refresh).await,
                FeedRange::PartitionKey(key) => {
                    self.resolve_point(&key.effective_partition_key(), force_refresh)
                        .await
                }
                FeedRange::Range(range) => self.resolve_intersecting(range, force_refresh).await,
            };
        }

        let query_ranges = if scope.query_ranges.is_empty() {
            vec![Range::full()]
        } else {
            scope.query_ranges.clone()
        };
        let partitions = self.overlapping(&query_ranges, force_refresh).await?;
        Ok(partitions.iter().map(PartitionKeyRange::to_range).collect())
    }

    /// Live ranges covering `range` after a split, each narrowed to `range`
    pub async fn resolve_children(&self, range: &Range, force_refresh: bool) -> QueryResult<Vec<Range>> {
        let children = self.resolve_intersecting(range, force_refresh).await?;
        if !covers_exactly(range, &children) {
            return Err(QueryError::PartitionTopologyChanged(format!(
                "live ranges do not cover {}",
                range
            )));
        }
        log::debug!("Range {} resolved to {} live range(s)", range, children.len());
        Ok(children)
    }

    async fn resolve_range_id(&self, id: &str, force_refresh: bool) -> QueryResult<Vec<Range>> {
        let partition = self
            .client
            .get_partition_key_range_by_id(&self.resource_link, &self.collection_rid, id, force_refresh)
            .await?
            .ok_or_else(|| {
                QueryError::gone(
                    GoneSubStatus::PartitionKeyRangeGone,
                    format!("partition key range '{}' does not exist", id),
                )
            })?;
        Ok(vec![partition.to_range()])
    }

    async fn resolve_point(&self, epk: &str, force_refresh: bool) -> QueryResult<Vec<Range>> {
        let partitions = self.overlapping(&[Range::point(epk)], force_refresh).await?;
        Ok(partitions.iter().map(PartitionKeyRange::to_range).collect())
    }

    async fn resolve_intersecting(&self, range: &Range, force_refresh: bool) -> QueryResult<Vec<Range>> {
        let partitions = self
            .overlapping(std::slice::from_ref(range), force_refresh)
            .await?;
        let mut ranges: Vec<Range> = partitions
            .iter()
            .filter_map(|partition| partition.to_range().intersection(range))
            .collect();
        sort_by_min(&mut ranges);
        Ok(ranges)
    }

    async fn overlapping(&self, ranges: &[Range], force_refresh: bool) -> QueryResult<Vec<PartitionKeyRange>> {
        let mut partitions = self
            .client
            .get_target_partition_key_ranges(
                &self.resource_link,
                &self.collection_rid,
                ranges,
                force_refresh,
            )
            .await?;
        partitions.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
        partitions.dedup_by(|a, b| a.id == b.id);
        if partitions.is_empty() {
            return Err(QueryError::PartitionTopologyChanged(
                "no live partition key range overlaps the query".to_string(),
            ));
        }
        Ok(partitions)
    }
}

/// Map resumed tokens onto the current target ranges
///
/// A token whose range sits inside one target is kept unchanged (the
/// partition may have merged). A token whose range spans several targets
/// came from a partition that split: each piece gets a copy of the parent's
/// backend continuation narrowed to that piece. Targets no token touches
/// were finished before the token was issued. Part of a token range may lack
/// a target only where it lies outside `key_space`.
pub fn remap_tokens(
    tokens: &[ParallelContinuationToken],
    targets: &[Range],
    key_space: &[Range],
) -> QueryResult<Vec<ParallelContinuationToken>> {
    let mut sorted: Vec<&ParallelContinuationToken> = tokens.iter().collect();
    sorted.sort_by(|a, b| a.range.min.cmp(&b.range.min));
    for pair in sorted.windows(2) {
        if pair[0].range.overlaps(&pair[1].range) {
            return Err(QueryError::malformed_token(format!(
                "continuation ranges {} and {} overlap",
                pair[0].range, pair[1].range
            )));
        }
    }

    let mut remapped = Vec::new();
    for token in sorted {
        let overlapping: Vec<&Range> = targets
            .iter()
            .filter(|target| target.overlaps(&token.range))
            .collect();

        match overlapping.as_slice() {
            [] => {
                return Err(QueryError::malformed_token(format!(
                    "continuation range {} is outside every target range",
                    token.range
                )))
            }
            [single] if single.contains_range(&token.range) => remapped.push(token.clone()),
            pieces => {
                log::debug!(
                    "Continuation range {} now spans {} ranges",
                    token.range,
                    pieces.len()
                );
                let children: Vec<Range> = pieces
                    .iter()
                    .filter_map(|piece| piece.intersection(&token.range))
                    .collect();
                let lost = uncovered(&token.range, &children)
                    .into_iter()
                    .find(|gap| key_space.iter().any(|keys| keys.overlaps(gap)));
                if let Some(gap) = lost {
                    return Err(QueryError::malformed_token(format!(
                        "continuation range {} has no target range for {}",
                        token.range, gap
                    )));
                }
                remapped.extend(
                    children
                        .into_iter()
                        .map(|child| ParallelContinuationToken::new(token.token.clone(), child)),
                );
            }
        }
    }
    Ok(remapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: Option<&str>, min: &str, max: &str) -> ParallelContinuationToken {
        ParallelContinuationToken::new(value.map(str::to_string), Range::new(min, max))
    }

    fn everything() -> Vec<Range> {
        vec![Range::full()]
    }

    #[test]
    fn test_unchanged_topology_keeps_tokens() {
        let targets = vec![Range::new("", "80"), Range::new("80", "FF")];
        let tokens = vec![token(Some("4"), "80", "FF")];
        assert_eq!(remap_tokens(&tokens, &targets, &everything()).unwrap(), tokens);
    }

    #[test]
    fn test_split_copies_parent_token_to_children() {
        let targets = vec![
            Range::new("", "40"),
            Range::new("40", "80"),
            Range::new("80", "FF"),
        ];
        let tokens = vec![token(Some("9"), "", "80")];
        let remapped = remap_tokens(&tokens, &targets, &everything()).unwrap();

        assert_eq!(
            remapped,
            vec![token(Some("9"), "", "40"), token(Some("9"), "40", "80")]
        );
        let children: Vec<Range> = remapped.iter().map(|t| t.range.clone()).collect();
        assert!(covers_exactly(&Range::new("", "80"), &children));
    }

    #[test]
    fn test_merge_keeps_sub_range_tokens() {
        let targets = vec![Range::full()];
        let tokens = vec![token(Some("1"), "", "80"), token(None, "80", "FF")];
        assert_eq!(remap_tokens(&tokens, &targets, &everything()).unwrap(), tokens);
    }

    #[test]
    fn test_invalid_tokens_are_malformed() {
        let targets = vec![Range::new("", "80")];

        let overlapping = vec![token(None, "", "60"), token(None, "40", "80")];
        assert!(remap_tokens(&overlapping, &targets, &everything())
            .unwrap_err()
            .is_malformed_token());

        let outside = vec![token(None, "80", "FF")];
        assert!(remap_tokens(&outside, &targets, &everything())
            .unwrap_err()
            .is_malformed_token());
    }

    #[test]
    fn test_partly_covered_token_is_malformed() {
        let tokens = vec![token(Some("2"), "", "80")];

        let short = vec![Range::new("", "40")];
        assert!(remap_tokens(&tokens, &short, &everything())
            .unwrap_err()
            .is_malformed_token());

        let gap = vec![Range::new("", "20"), Range::new("60", "FF")];
        assert!(remap_tokens(&tokens, &gap, &everything())
            .unwrap_err()
            .is_malformed_token());
    }

    #[test]
    fn test_scoped_query_keeps_only_the_child_it_reads() {
        let tokens = vec![token(Some("2"), "", "80")];
        let targets = vec![Range::new("", "40")];

        let remapped = remap_tokens(&tokens, &targets, &[Range::point("2A")]).unwrap();
        assert_eq!(remapped, vec![token(Some("2"), "", "40")]);

        assert!(remap_tokens(&tokens, &targets, &[Range::point("5A")])
            .unwrap_err()
            .is_malformed_token());
    }

    #[test]
    fn test_key_space_follows_the_most_specific_scope() {
        let scope = TargetScope {
            effective_partition_key: Some("2A".to_string()),
            query_ranges: vec![Range::new("", "40")],
            ..TargetScope::default()
        };
        assert_eq!(scope.key_space(), vec![Range::point("2A")]);

        let planned = TargetScope::default().with_query_ranges(vec![Range::new("10", "20")]);
        assert_eq!(planned.key_space(), vec![Range::new("10", "20")]);
        assert_eq!(TargetScope::default().key_space(), vec![Range::full()]);
    }
}
