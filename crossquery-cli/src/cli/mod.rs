// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for crossquery
//!
//! Runs queries against an in-memory container loaded from a file and
//! decodes continuation tokens.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{handle_decode_token, handle_run, RunArgs};
