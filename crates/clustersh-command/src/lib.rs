//! Command language front end and executor.
//!
//! Operator input is tokenized and parsed into a [`CommandNode`] tree against
//! a static [`Grammar`] table. The [`Executor`] binds each tree to cluster
//! session operations, merges per-node replies and returns a typed
//! [`CommandResult`].
//!
//! ```
//! use clustersh_command::{parse, CommandNode};
//!
//! let node = parse("sh stat | like objects | count").unwrap();
//! assert_eq!(node.stages().len(), 3);
//! assert_eq!(node.stages()[0].to_string(), "show statistics");
//! ```

pub mod ast;
pub mod error;
pub mod executor;
pub mod grammar;
pub mod lexer;
pub mod merge;
pub mod output;
pub mod parser;
pub mod pipeline;

pub use ast::CommandNode;
pub use error::{ExecutionError, Result, SyntaxError};
pub use executor::{execute, Executor};
pub use grammar::{Action, CommandSpec, Grammar, StageKind};
pub use lexer::{Span, Token, TokenKind};
pub use merge::Merge;
pub use output::{CommandResult, Output, Table};
pub use parser::{parse, parse_script, Parser};
