// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Result formatting for CLI output

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use crossquery::QueryResponse;
use serde_json::Value;

use super::commands::OutputFormat;

/// What a continuation token holds
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSummary {
    pub version: String,
    pub cached_plan: bool,
    /// `(layer, detail)` pairs, outermost operator first
    pub layers: Vec<(String, String)>,
}

/// Page formatter for different output formats
pub struct PageFormatter;

impl PageFormatter {
    /// Format one page in the specified format
    pub fn format_page(number: usize, page: &QueryResponse, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(number, page),
            OutputFormat::Json => Self::format_json(page),
        }
    }

    /// Format a page as a table using comfy-table
    fn format_table(number: usize, page: &QueryResponse) -> String {
        let mut output = String::new();

        output.push_str(&format!("{}\n", format!("Page {}", number).bold().green()));
        output.push_str(&format!("Documents: {}\n", page.documents.len()));
        output.push_str(&format!("Request charge: {:.2}\n", page.request_charge));
        output.push_str(&format!(
            "Correlated activity: {}\n",
            page.correlated_activity_id
        ));

        if page.documents.is_empty() {
            output.push_str(&format!("{}\n", "No documents on this page".yellow()));
        } else {
            let columns = Self::columns(&page.documents);
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(
                columns
                    .iter()
                    .map(|column| Cell::new(column).fg(Color::Green))
                    .collect::<Vec<Cell>>(),
            );
            for document in &page.documents {
                let row: Vec<String> = match document {
                    Value::Object(fields) => columns
                        .iter()
                        .map(|column| {
                            fields
                                .get(column)
                                .map(Self::value_to_string)
                                .unwrap_or_default()
                        })
                        .collect(),
                    other => vec![Self::value_to_string(other)],
                };
                table.add_row(row);
            }
            output.push_str(&table.to_string());
            output.push('\n');
        }

        match &page.continuation {
            Some(continuation) => {
                output.push_str(&format!("{}\n{}\n", "Continuation:".bold(), continuation));
            }
            None => output.push_str(&format!("{}\n", "Query drained".bold().green())),
        }
        output
    }

    /// Format a page as JSON
    fn format_json(page: &QueryResponse) -> String {
        let json_result = serde_json::json!({
            "documents": page.documents,
            "continuation": page.continuation,
            "requestCharge": page.request_charge,
            "activityId": page.activity_id,
            "correlatedActivityId": page.correlated_activity_id.to_string(),
            "responseLengthBytes": page.response_length_bytes,
        });

        serde_json::to_string_pretty(&json_result).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize page to JSON\"}".to_string()
        })
    }

    /// Format a decoded continuation token
    pub fn format_token(summary: &TokenSummary) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}\n", "Continuation token".bold().green()));
        output.push_str(&format!("Version: {}\n", summary.version));
        output.push_str(&format!(
            "Cached query plan: {}\n\n",
            if summary.cached_plan { "yes" } else { "no" }
        ));

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("layer").fg(Color::Green),
            Cell::new("state").fg(Color::Green),
        ]);
        for (layer, detail) in &summary.layers {
            table.add_row(vec![layer.clone(), detail.clone()]);
        }
        output.push_str(&table.to_string());
        output
    }

    /// Object keys in first-seen order; scalar pages get one `value` column
    fn columns(documents: &[Value]) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for document in documents {
            match document {
                Value::Object(fields) => {
                    for key in fields.keys() {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
                _ => return vec!["value".to_string()],
            }
        }
        columns
    }

    /// Convert a value to a display string
    fn value_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_columns_follow_first_appearance() {
        let documents = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "age": 3})];
        assert_eq!(PageFormatter::columns(&documents), vec!["id", "name", "age"]);
        assert_eq!(PageFormatter::columns(&[json!(5)]), vec!["value"]);
    }
}
