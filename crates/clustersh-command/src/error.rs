use clustersh_session::SessionError;
use thiserror::Error;

use crate::lexer::Span;

/// Rejected command line. Positions are byte offsets into the input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("empty command")]
    Empty,

    #[error("unterminated {quote} quote starting at byte {position}")]
    UnterminatedQuote { quote: char, position: usize },

    #[error("dangling escape at byte {position}")]
    DanglingEscape { position: usize },

    #[error("unknown command '{name}' at byte {}", .span.start)]
    UnknownCommand { name: String, span: Span },

    #[error("ambiguous command '{word}' at byte {}: may be {}", .span.start, .candidates.join(", "))]
    AmbiguousCommand {
        word: String,
        candidates: Vec<String>,
        span: Span,
    },

    #[error("expected a command at byte {}, found '{found}'", .span.start)]
    ExpectedCommand { found: String, span: Span },

    #[error("option without a name at byte {}", .span.start)]
    EmptyOptionName { span: Span },

    #[error("'|' at byte {} is not followed by a command", .span.start)]
    EmptyStage { span: Span },

    #[error("unexpected ';' at byte {}", .span.start)]
    UnexpectedDelimiter { span: Span },
}

impl SyntaxError {
    /// Byte range of the offending input, when there is one.
    pub fn span(&self) -> Option<Span> {
        match self {
            SyntaxError::Empty => None,
            SyntaxError::UnterminatedQuote { position, .. } | SyntaxError::DanglingEscape { position } => {
                Some(Span::new(*position, position + 1))
            }
            SyntaxError::UnknownCommand { span, .. }
            | SyntaxError::AmbiguousCommand { span, .. }
            | SyntaxError::ExpectedCommand { span, .. }
            | SyntaxError::EmptyOptionName { span }
            | SyntaxError::EmptyStage { span }
            | SyntaxError::UnexpectedDelimiter { span } => Some(*span),
        }
    }
}

/// Failure of one command. The session stays usable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("cannot merge '{key}': {left} on one node, {right} on another")]
    Irreconcilable {
        key: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("{command}: {reason}")]
    InvalidArgument { command: String, reason: String },

    #[error("'{0}' needs input from a preceding command")]
    MissingInput(String),

    #[error("'{command}' requires one of: {}", .expected.join(", "))]
    MissingSubcommand { command: String, expected: Vec<String> },

    #[error("no handler for '{0}'")]
    UnknownCommand(String),
}

impl ExecutionError {
    pub fn invalid(command: impl Into<String>, reason: impl Into<String>) -> Self {
        ExecutionError::InvalidArgument {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
