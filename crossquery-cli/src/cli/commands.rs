// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "crossquery", version, about = "Run cross-partition queries page by page")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (overridden by --verbose)
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// Load documents into an in-memory container and run a query
    Run {
        /// JSON array or newline-delimited JSON file of documents
        #[arg(short, long)]
        data: PathBuf,

        /// Query text
        query: String,

        /// Query plan as JSON; the query runs as passthrough without one
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Partition key path of the documents
        #[arg(long, default_value = "/pk")]
        partition_key_path: String,

        /// Number of physical partitions
        #[arg(long, default_value_t = 4)]
        partitions: usize,

        /// Restrict the query to one logical partition
        #[arg(long)]
        partition_key: Option<String>,

        /// Page size requested from each partition
        #[arg(long)]
        page_size: Option<i64>,

        /// Concurrent partition requests (-1 = unbounded)
        #[arg(long)]
        max_concurrency: Option<i64>,

        /// Resume from a continuation token printed by a previous run
        #[arg(long)]
        continuation: Option<String>,

        /// Read every page instead of the first one
        #[arg(long)]
        all: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show what a continuation token contains
    DecodeToken {
        /// Token text as printed by `run`
        token: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}
