// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! crossquery CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands, RunArgs};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        // RUST_LOG can still raise it
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "crossquery".bold().green(), crossquery::VERSION);
            println!("Cross-partition query execution");
            Ok(())
        }

        Commands::Run {
            data,
            query,
            plan,
            partition_key_path,
            partitions,
            partition_key,
            page_size,
            max_concurrency,
            continuation,
            all,
            format,
        } => cli::handle_run(RunArgs {
            data,
            query,
            plan,
            partition_key_path,
            partitions,
            partition_key,
            page_size,
            max_concurrency,
            continuation,
            all,
            format,
        }),

        Commands::DecodeToken { token } => cli::handle_decode_token(token),
    }
}
