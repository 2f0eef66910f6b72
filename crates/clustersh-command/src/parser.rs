//! Command line parser.
//!
//! ```text
//! pipeline := command ('|' command)*
//! command  := identifier (option | positional | subcommand)*
//! option   := '-'+ name ('=' value)?
//! ```
//!
//! A word matching a keyword of the current command is always that keyword.
//! A keyword with nested keywords of its own consumes the rest of the
//! command; a leaf keyword consumes nothing and parsing continues in the
//! enclosing command.

use crate::ast::CommandNode;
use crate::error::SyntaxError;
use crate::grammar::{match_keyword, CommandSpec, Grammar, KeywordMatch};
use crate::lexer::{tokenize, Token, TokenKind};

/// Parses one command line with the built-in vocabulary.
///
/// # Example
///
/// ```
/// use clustersh_command::{parse, CommandNode};
///
/// let node = parse("show nodes -format=json").unwrap();
/// assert_eq!(
///     node,
///     CommandNode::subcommand(
///         "show",
///         vec![
///             CommandNode::subcommand("nodes", vec![]),
///             CommandNode::option("format", Some("json")),
///         ],
///     )
/// );
/// ```
pub fn parse(input: &str) -> Result<CommandNode, SyntaxError> {
    Parser::new(Grammar::default_vocabulary()).parse(input)
}

/// Parses `;`-separated statements with the built-in vocabulary.
pub fn parse_script(input: &str) -> Result<Vec<CommandNode>, SyntaxError> {
    Parser::new(Grammar::default_vocabulary()).parse_script(input)
}

/// Stateless parser over a grammar table.
#[derive(Debug, Clone, Copy)]
pub struct Parser<'g> {
    grammar: &'g Grammar,
}

impl<'g> Parser<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self { grammar }
    }

    /// Parses a single statement. A `;` is an error here.
    pub fn parse(&self, input: &str) -> Result<CommandNode, SyntaxError> {
        let tokens = tokenize(input)?;
        if let Some(delimiter) = tokens.iter().find(|t| t.kind == TokenKind::Delimiter) {
            return Err(SyntaxError::UnexpectedDelimiter { span: delimiter.span });
        }
        self.parse_statement(&tokens)
    }

    /// Parses every non-empty `;`-separated statement.
    pub fn parse_script(&self, input: &str) -> Result<Vec<CommandNode>, SyntaxError> {
        let tokens = tokenize(input)?;
        tokens
            .split(|t| t.kind == TokenKind::Delimiter)
            .filter(|statement| !statement.is_empty())
            .map(|statement| self.parse_statement(statement))
            .collect()
    }

    fn parse_statement(&self, tokens: &[Token]) -> Result<CommandNode, SyntaxError> {
        if tokens.is_empty() {
            return Err(SyntaxError::Empty);
        }

        let mut stages = Vec::new();
        let mut start = 0;
        for (i, token) in tokens.iter().enumerate() {
            if token.kind == TokenKind::Operator {
                stages.push(self.parse_stage(&tokens[start..i], token)?);
                start = i + 1;
            }
        }
        match tokens.last() {
            Some(last) if last.kind == TokenKind::Operator => {
                return Err(SyntaxError::EmptyStage { span: last.span })
            }
            _ => stages.push(self.parse_command(&tokens[start..])?),
        }

        if stages.len() == 1 {
            Ok(stages.remove(0))
        } else {
            Ok(CommandNode::Pipeline(stages))
        }
    }

    /// Parses the stage in front of the pipe `pipe`.
    fn parse_stage(&self, tokens: &[Token], pipe: &Token) -> Result<CommandNode, SyntaxError> {
        if tokens.is_empty() {
            return Err(SyntaxError::ExpectedCommand {
                found: pipe.raw.clone(),
                span: pipe.span,
            });
        }
        self.parse_command(tokens)
    }

    fn parse_command(&self, tokens: &[Token]) -> Result<CommandNode, SyntaxError> {
        let Some((head, rest)) = tokens.split_first() else {
            return Err(SyntaxError::Empty);
        };

        match head.kind {
            TokenKind::Identifier | TokenKind::Literal => {}
            _ => {
                return Err(SyntaxError::ExpectedCommand {
                    found: head.raw.clone(),
                    span: head.span,
                })
            }
        }

        let spec = match match_keyword(self.grammar.commands(), &head.text) {
            KeywordMatch::Found(spec) if head.kind == TokenKind::Identifier => spec,
            KeywordMatch::Ambiguous(candidates) if head.kind == TokenKind::Identifier => {
                return Err(SyntaxError::AmbiguousCommand {
                    word: head.text.clone(),
                    candidates: candidates.into_iter().map(str::to_string).collect(),
                    span: head.span,
                })
            }
            _ => {
                return Err(SyntaxError::UnknownCommand {
                    name: head.text.clone(),
                    span: head.span,
                })
            }
        };

        Ok(CommandNode::Subcommand(spec.name.to_string(), parse_body(spec, rest)?))
    }
}

/// Parses the words following keyword `spec`.
fn parse_body(spec: &CommandSpec, tokens: &[Token]) -> Result<Vec<CommandNode>, SyntaxError> {
    let mut children = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Option => children.push(parse_option(token)?),
            TokenKind::Identifier if !spec.subcommands.is_empty() => {
                match match_keyword(spec.subcommands, &token.text) {
                    KeywordMatch::Found(sub) if sub.subcommands.is_empty() => {
                        children.push(CommandNode::Subcommand(sub.name.to_string(), Vec::new()));
                    }
                    KeywordMatch::Found(sub) => {
                        let nested = parse_body(sub, &tokens[i + 1..])?;
                        children.push(CommandNode::Subcommand(sub.name.to_string(), nested));
                        break;
                    }
                    KeywordMatch::Ambiguous(candidates) => {
                        return Err(SyntaxError::AmbiguousCommand {
                            word: token.text.clone(),
                            candidates: candidates.into_iter().map(str::to_string).collect(),
                            span: token.span,
                        })
                    }
                    KeywordMatch::NotFound => children.push(CommandNode::Literal(token.text.clone())),
                }
            }
            _ => children.push(CommandNode::Literal(token.text.clone())),
        }
    }

    Ok(children)
}

fn parse_option(token: &Token) -> Result<CommandNode, SyntaxError> {
    let body = token.text.trim_start_matches('-');
    let (name, value) = match body.split_once('=') {
        Some((name, value)) => (name, Some(value.to_string())),
        None => (body, None),
    };
    if name.is_empty() {
        return Err(SyntaxError::EmptyOptionName { span: token.span });
    }
    Ok(CommandNode::Option(name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Action, StageKind};
    use crate::lexer::Span;

    fn sub(name: &str, children: Vec<CommandNode>) -> CommandNode {
        CommandNode::subcommand(name, children)
    }

    fn opt(name: &str, value: Option<&str>) -> CommandNode {
        CommandNode::option(name, value)
    }

    fn lit(text: &str) -> CommandNode {
        CommandNode::literal(text)
    }

    #[test]
    fn test_leaf_keyword_consumes_nothing() {
        assert_eq!(
            parse("show nodes -format=json").unwrap(),
            sub("show", vec![sub("nodes", vec![]), opt("format", Some("json"))])
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let input = "show config -diff -with=10.0.0.1,10.0.0.2 | like 'repl factor' | sort name -desc";
        let first = parse(input).unwrap();
        for _ in 0..10 {
            assert_eq!(parse(input).unwrap(), first);
        }
    }

    #[test]
    fn test_abbreviations_expand() {
        assert_eq!(parse("sh nod").unwrap(), parse("show nodes").unwrap());
        assert_eq!(parse("su").unwrap(), sub("summary", vec![]));
        assert_eq!(
            parse("sh c -d").unwrap(),
            sub("show", vec![sub("config", vec![]), opt("d", None)])
        );
    }

    #[test]
    fn test_positionals_and_options() {
        assert_eq!(
            parse("info statistics scope=node --fresh -5 -1.5").unwrap(),
            sub(
                "info",
                vec![
                    lit("statistics"),
                    lit("scope=node"),
                    opt("fresh", None),
                    lit("-5"),
                    lit("-1.5")
                ]
            )
        );
    }

    #[test]
    fn test_empty_option_value() {
        assert_eq!(parse("info x -with=").unwrap(), sub("info", vec![lit("x"), opt("with", Some(""))]));
    }

    #[test]
    fn test_quoted_keyword_is_positional() {
        assert_eq!(parse("show 'nodes'").unwrap(), sub("show", vec![lit("nodes")]));
    }

    #[test]
    fn test_pipeline() {
        assert_eq!(
            parse("show statistics|like obj|count").unwrap(),
            CommandNode::Pipeline(vec![
                sub("show", vec![sub("statistics", vec![])]),
                sub("like", vec![lit("obj")]),
                sub("count", vec![]),
            ])
        );
    }

    #[test]
    fn test_unknown_command_position() {
        assert_eq!(
            parse("  bogus x").unwrap_err(),
            SyntaxError::UnknownCommand {
                name: "bogus".to_string(),
                span: Span::new(2, 7)
            }
        );
        assert_eq!(
            parse("show nodes | 10.0.0.1").unwrap_err(),
            SyntaxError::UnknownCommand {
                name: "10.0.0.1".to_string(),
                span: Span::new(13, 21)
            }
        );
    }

    #[test]
    fn test_ambiguous_leading_prefix() {
        match parse("s nodes").unwrap_err() {
            SyntaxError::AmbiguousCommand { word, candidates, span } => {
                assert_eq!(word, "s");
                assert_eq!(candidates, vec!["select", "show", "sort", "summary"]);
                assert_eq!(span, Span::new(0, 1));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse("").unwrap_err(), SyntaxError::Empty);
        assert_eq!(parse("   ").unwrap_err(), SyntaxError::Empty);
        assert_eq!(
            parse("info x -").unwrap_err(),
            SyntaxError::EmptyOptionName { span: Span::new(7, 8) }
        );
        assert_eq!(
            parse("info --").unwrap_err(),
            SyntaxError::EmptyOptionName { span: Span::new(5, 7) }
        );
        assert_eq!(
            parse("info -=x").unwrap_err(),
            SyntaxError::EmptyOptionName { span: Span::new(5, 8) }
        );
        assert_eq!(
            parse("show nodes |").unwrap_err(),
            SyntaxError::EmptyStage { span: Span::new(11, 12) }
        );
        assert_eq!(
            parse("| count").unwrap_err(),
            SyntaxError::ExpectedCommand {
                found: "|".to_string(),
                span: Span::new(0, 1)
            }
        );
        assert_eq!(
            parse("show nodes || count").unwrap_err(),
            SyntaxError::ExpectedCommand {
                found: "|".to_string(),
                span: Span::new(12, 13)
            }
        );
        assert_eq!(
            parse("-x show").unwrap_err(),
            SyntaxError::ExpectedCommand {
                found: "-x".to_string(),
                span: Span::new(0, 2)
            }
        );
        assert_eq!(
            parse("show nodes; summary").unwrap_err(),
            SyntaxError::UnexpectedDelimiter { span: Span::new(10, 11) }
        );
        assert!(matches!(
            parse("info 'abc").unwrap_err(),
            SyntaxError::UnterminatedQuote { position: 5, .. }
        ));
    }

    #[test]
    fn test_parse_script() {
        let statements = parse_script("show nodes; ; summary -fresh;").unwrap();
        assert_eq!(
            statements,
            vec![
                sub("show", vec![sub("nodes", vec![])]),
                sub("summary", vec![opt("fresh", None)])
            ]
        );
        assert!(parse_script("  ").unwrap().is_empty());
        assert!(matches!(
            parse_script("show nodes; bogus").unwrap_err(),
            SyntaxError::UnknownCommand { .. }
        ));
    }

    #[test]
    fn test_nested_grammar_consumes_rest() {
        static CLUSTER: &[CommandSpec] = &[CommandSpec::leaf("stop", Action::Refresh, "")];
        static MANAGE: &[CommandSpec] = &[CommandSpec::group("cluster", CLUSTER, "")];
        static COMMANDS: &[CommandSpec] = &[
            CommandSpec::group("manage", MANAGE, ""),
            CommandSpec::leaf("count", Action::Stage(StageKind::Count), ""),
        ];
        static GRAMMAR: Grammar = Grammar::new(COMMANDS);

        let node = Parser::new(&GRAMMAR).parse("manage -v cluster stop now").unwrap();
        assert_eq!(
            node,
            sub(
                "manage",
                vec![opt("v", None), sub("cluster", vec![sub("stop", vec![]), lit("now")])]
            )
        );
    }

    #[test]
    fn test_display_round_trip() {
        let node = parse(r#"sh conf -diff -with="a b" | like "it's""#).unwrap();
        assert_eq!(node.to_string(), r#"show config -diff -with='a b' | like 'it'\''s'"#);
        assert_eq!(parse(&node.to_string()).unwrap(), node);
    }
}
