// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers for crossquery

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use crossquery::token::{
    parse_continuation, DistributedGatewayToken, OptimisticDirectExecutionToken,
    OrderByContinuationToken, ParallelContinuationToken, PipelineContinuationToken,
};
use crossquery::{
    CrossPartitionQuery, InMemoryContainer, PartitionKey, PartitionedQueryExecutionInfo,
    QueryRequestOptions, QueryResponse, QueryTarget, Range, ScanEngine, SqlQuerySpec,
};
use serde_json::Value;

use super::commands::OutputFormat;
use super::output::{PageFormatter, TokenSummary};

const RESOURCE_LINK: &str = "dbs/cli/colls/documents";

/// Operator layers of a pipeline token, outermost first
const OPERATOR_PROPERTIES: [&str; 6] = [
    "top",
    "limit",
    "offsetCount",
    "distinctMapToken",
    "aggregates",
    "groupingTable",
];

/// Arguments of the `run` command
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub data: PathBuf,
    pub query: String,
    pub plan: Option<PathBuf>,
    pub partition_key_path: String,
    pub partitions: usize,
    pub partition_key: Option<String>,
    pub page_size: Option<i64>,
    pub max_concurrency: Option<i64>,
    pub continuation: Option<String>,
    pub all: bool,
    pub format: OutputFormat,
}

/// Handle the run command
pub fn handle_run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let pages = runtime.block_on(run_query(&args))?;

    if pages.is_empty() {
        println!("{}", "Query is already drained".yellow());
    }
    for (index, page) in pages.iter().enumerate() {
        println!("{}", PageFormatter::format_page(index + 1, page, args.format));
    }
    Ok(())
}

/// Handle the decode-token command
pub fn handle_decode_token(token: String) -> Result<(), Box<dyn Error>> {
    let summary = describe_token(&token)?;
    println!("{}", PageFormatter::format_token(&summary));
    Ok(())
}

/// Documents from a JSON array or newline-delimited JSON file
pub fn load_documents(path: &Path) -> Result<Vec<Value>, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&text)?);
    }
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

pub fn load_plan(path: &Path) -> Result<PartitionedQueryExecutionInfo, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Partition key given on the command line; JSON when it parses, a string otherwise
fn parse_partition_key(text: &str) -> PartitionKey {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => PartitionKey::new(value),
        Err(_) => PartitionKey::from(text),
    }
}

fn build_container(args: &RunArgs) -> Result<Arc<InMemoryContainer>, Box<dyn Error>> {
    let mut container = InMemoryContainer::new(args.partition_key_path.clone(), args.partitions);
    if let Some(path) = &args.plan {
        let plan = load_plan(path)?;
        container = container.with_engine(ScanEngine::for_plan(plan.query_info.clone()));
        container.register_plan(args.query.clone(), plan);
    }

    let documents = load_documents(&args.data)?;
    let inserted = container.insert_all(documents)?;
    log::info!(
        "Loaded {} documents into {} partitions",
        inserted,
        args.partitions
    );
    Ok(container.into_shared())
}

/// Run the query and collect the pages it produced
pub async fn run_query(args: &RunArgs) -> Result<Vec<QueryResponse>, Box<dyn Error>> {
    let container = build_container(args)?;
    let target = QueryTarget::new(
        container.clone(),
        container.clone(),
        container,
        RESOURCE_LINK,
    );
    let options = QueryRequestOptions {
        partition_key: args.partition_key.as_deref().map(parse_partition_key),
        max_item_count: args.page_size,
        max_concurrency: args.max_concurrency,
        ..QueryRequestOptions::default()
    };

    let mut query = CrossPartitionQuery::new(
        target,
        SqlQuerySpec::new(args.query.clone()),
        args.continuation.as_deref(),
        &options,
    )?;

    let mut pages = Vec::new();
    while let Some(page) = query.read_next().await? {
        pages.push(page);
        if !args.all {
            break;
        }
    }
    if let Some(kind) = query.selected_pipeline() {
        log::info!("Query ran on the {} pipeline", kind);
    }
    Ok(pages)
}

/// Break a continuation token into its layers
pub fn describe_token(text: &str) -> Result<TokenSummary, Box<dyn Error>> {
    let value = parse_continuation(text)?;
    let token = PipelineContinuationToken::decode(&value)?;
    let version = match token.version() {
        Some(version) => version.to_string(),
        None => "unversioned".to_string(),
    };
    let latest = token.convert_to_latest()?;

    let mut layers = Vec::new();
    describe_layers(&latest.source_continuation_token, &mut layers);
    Ok(TokenSummary {
        version,
        cached_plan: latest.query_plan.is_some(),
        layers,
    })
}

fn describe_layers(value: &Value, layers: &mut Vec<(String, String)>) {
    if value.is_null() {
        layers.push(("source".to_string(), "not started".to_string()));
        return;
    }
    if value.as_str() == Some("DONE") {
        layers.push(("source".to_string(), "drained".to_string()));
        return;
    }

    if let Some(source) = value.get("sourceToken") {
        for property in OPERATOR_PROPERTIES {
            if let Some(state) = value.get(property) {
                layers.push((property.to_string(), describe_operator(property, state)));
            }
        }
        describe_layers(source, layers);
        return;
    }

    if OptimisticDirectExecutionToken::is_ode_token(value) {
        if let Ok(token) = OptimisticDirectExecutionToken::decode(value) {
            layers.push(("direct".to_string(), describe_position(&token.range, token.token.as_deref())));
            return;
        }
    }
    if let Ok(token) = DistributedGatewayToken::decode(value) {
        layers.push(("gateway".to_string(), token.token));
        return;
    }
    if value.is_array() {
        if let Ok(ranges) = ParallelContinuationToken::decode_all(value) {
            push_ranges(&ranges, layers);
            return;
        }
    }
    if let Ok(token) = OrderByContinuationToken::decode(value) {
        let values: Vec<String> = token.resume_values.iter().map(Value::to_string).collect();
        layers.push((
            "orderBy".to_string(),
            format!("after [{}] rid {}", values.join(", "), token.rid),
        ));
        push_ranges(&token.ranges, layers);
        return;
    }

    layers.push(("unknown".to_string(), value.to_string()));
}

fn describe_operator(property: &str, state: &Value) -> String {
    match property {
        "top" | "limit" | "offsetCount" => format!("{} remaining", state),
        "distinctMapToken" => match state {
            Value::Null => "nothing seen".to_string(),
            Value::Array(hashes) => format!("{} values seen", hashes.len()),
            other => format!("last value {}", other),
        },
        "aggregates" => format!(
            "{} partial aggregates",
            state.as_array().map(Vec::len).unwrap_or(0)
        ),
        "groupingTable" => format!(
            "{} groups",
            state.as_object().map(|table| table.len()).unwrap_or(0)
        ),
        _ => state.to_string(),
    }
}

fn describe_position(range: &Range, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("{} at {}", range, token),
        None => format!("{} from start", range),
    }
}

fn push_ranges(ranges: &[ParallelContinuationToken], layers: &mut Vec<(String, String)>) {
    for position in ranges {
        layers.push((
            "range".to_string(),
            describe_position(&position.range, position.token.as_deref()),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn run_args(data: PathBuf) -> RunArgs {
        RunArgs {
            data,
            query: "SELECT * FROM c".to_string(),
            plan: None,
            partition_key_path: "/pk".to_string(),
            partitions: 3,
            partition_key: None,
            page_size: Some(4),
            max_concurrency: None,
            continuation: None,
            all: false,
            format: OutputFormat::Json,
        }
    }

    fn write_documents(dir: &tempfile::TempDir, count: usize) -> PathBuf {
        let path = dir.path().join("documents.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..count {
            writeln!(file, "{}", json!({"id": i, "pk": format!("p{}", i % 5)})).unwrap();
        }
        path
    }

    #[test]
    fn test_load_documents_accepts_both_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let lines = write_documents(&dir, 3);
        let array = dir.path().join("documents.json");
        std::fs::write(&array, "[{\"id\": 1, \"pk\": \"a\"}]").unwrap();

        assert_eq!(load_documents(&lines).unwrap().len(), 3);
        assert_eq!(load_documents(&array).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_partition_key() {
        assert_eq!(parse_partition_key("7").value(), &json!(7));
        assert_eq!(parse_partition_key("p1").value(), &json!("p1"));
    }

    #[tokio::test]
    async fn test_run_resumes_from_printed_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = run_args(write_documents(&dir, 10));

        let first = run_query(&args).await.unwrap();
        assert_eq!(first.len(), 1);
        let continuation = first[0].continuation.clone().unwrap();

        args.continuation = Some(continuation.clone());
        args.all = true;
        let rest = run_query(&args).await.unwrap();
        let total: usize = first
            .iter()
            .chain(rest.iter())
            .map(|page| page.documents.len())
            .sum();
        assert_eq!(total, 10);

        let summary = describe_token(&continuation).unwrap();
        assert_eq!(summary.version, "1.1");
        assert!(summary.layers.iter().any(|(layer, _)| layer == "range"));
    }

    #[test]
    fn test_describe_operator_layers() {
        let token = json!({
            "Version": "1.1",
            "SourceContinuationToken": {"limit": 3, "sourceToken": null}
        })
        .to_string();

        let summary = describe_token(&token).unwrap();
        assert!(!summary.cached_plan);
        assert_eq!(
            summary.layers,
            vec![
                ("limit".to_string(), "3 remaining".to_string()),
                ("source".to_string(), "not started".to_string()),
            ]
        );
    }

    #[test]
    fn test_describe_rejects_newer_versions() {
        let token = json!({"Version": "9.0", "SourceContinuationToken": null}).to_string();
        assert!(describe_token(&token).is_err());
    }
}
