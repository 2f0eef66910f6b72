// Copyright 2025 clustersh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # clustersh
//!
//! Interactive shell for a live database cluster.
//!
//! The shell contacts the seed nodes, discovers the rest of the cluster and
//! then reads administrative commands, one line at a time or from a `-e`
//! script. Each command is sent to every reachable node and the merged
//! result is printed as JSON.
//!
//! ## Architecture
//!
//! - [`config`]: layered settings (defaults, TOML file, environment, flags)
//! - [`repl`]: the read loop and the single executor worker behind it
//!
//! Parsing and execution live in `clustersh-command`; membership, broadcast
//! and caching in `clustersh-session`.
//!
//! ## Key Commands
//!
//! - `show nodes`, `show statistics`, `show config -diff`, `show features`
//! - `summary`: numeric statistics aggregated across nodes
//! - `info <request> [key=value..]`: any request, sent to every node
//! - `refresh`: rediscover and drop cached results
//! - `watch [seconds] [count] <command>`: rerun a command until interrupted
//! - `like`, `select`, `sort`, `limit`, `count`: pipeline stages after `|`

pub mod config;
pub mod repl;

pub use config::{ConfigError, Overrides, Settings};
pub use repl::{Interrupter, OutputFormat, RunSummary, Shell, ShellError};
