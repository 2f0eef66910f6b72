//! Tokenizer for command lines.
//!
//! Words are split on whitespace with POSIX shell quoting: single quotes are
//! literal, double quotes honour backslash escapes for `"`, `\`, `$` and
//! `` ` ``, and a backslash outside quotes escapes the next character.
//! Unquoted `|` and `;` are tokens of their own even when glued to a word.

use serde::Serialize;
use std::fmt;

use crate::error::SyntaxError;

/// Byte range `[start, end)` into the input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    /// Unquoted word that may name a command or keyword.
    Identifier,
    /// Anything else usable as a positional value.
    Literal,
    /// Word starting with an unquoted `-`, other than a negative number.
    Option,
    /// Unquoted `|`.
    Operator,
    /// Unquoted `;`.
    Delimiter,
}

/// A lexed word. `raw` is the input slice, `text` the unquoted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub raw: String,
    pub text: String,
    pub span: Span,
}

/// Splits `input` into tokens.
///
/// # Errors
///
/// [`SyntaxError::UnterminatedQuote`] when a quote is never closed and
/// [`SyntaxError::DanglingEscape`] for a backslash at the end of input.
///
/// # Example
///
/// ```
/// use clustersh_command::lexer::{tokenize, TokenKind};
///
/// let tokens = tokenize("info 'a b'|count").unwrap();
/// assert_eq!(tokens.len(), 4);
/// assert_eq!(tokens[1].text, "a b");
/// assert_eq!(tokens[2].kind, TokenKind::Operator);
/// ```
pub fn tokenize(input: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut word: Option<Word> = None;
    let mut chars = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if let Some(w) = word.take() {
                    tokens.push(w.finish(input, pos));
                }
            }
            '|' | ';' => {
                if let Some(w) = word.take() {
                    tokens.push(w.finish(input, pos));
                }
                let kind = if c == '|' {
                    TokenKind::Operator
                } else {
                    TokenKind::Delimiter
                };
                tokens.push(Token {
                    kind,
                    raw: c.to_string(),
                    text: c.to_string(),
                    span: Span::new(pos, pos + 1),
                });
            }
            '\'' => {
                let w = word.get_or_insert_with(|| Word::starting(pos, true));
                w.quoted = true;
                loop {
                    match chars.next() {
                        Some((_, '\'')) => break,
                        Some((_, ch)) => w.text.push(ch),
                        None => return Err(SyntaxError::UnterminatedQuote { quote: '\'', position: pos }),
                    }
                }
            }
            '"' => {
                let w = word.get_or_insert_with(|| Word::starting(pos, true));
                w.quoted = true;
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.peek().copied() {
                            Some((_, esc @ ('"' | '\\' | '$' | '`'))) => {
                                chars.next();
                                w.text.push(esc);
                            }
                            Some((_, '\n')) => {
                                chars.next();
                            }
                            _ => w.text.push('\\'),
                        },
                        Some((_, ch)) => w.text.push(ch),
                        None => return Err(SyntaxError::UnterminatedQuote { quote: '"', position: pos }),
                    }
                }
            }
            '\\' => {
                let w = word.get_or_insert_with(|| Word::starting(pos, true));
                w.quoted = true;
                match chars.next() {
                    // Line continuation
                    Some((_, '\n')) => {}
                    Some((_, ch)) => w.text.push(ch),
                    None => return Err(SyntaxError::DanglingEscape { position: pos }),
                }
            }
            c => word.get_or_insert_with(|| Word::starting(pos, false)).text.push(c),
        }
    }

    if let Some(w) = word.take() {
        tokens.push(w.finish(input, input.len()));
    }
    Ok(tokens)
}

/// True for `-5`, `-1.5`, `-.5`: negative numbers are positionals.
pub fn is_negative_number(text: &str) -> bool {
    match text.strip_prefix('-') {
        Some(rest) => {
            rest.starts_with(|c: char| c.is_ascii_digit() || c == '.') && rest.parse::<f64>().is_ok()
        }
        None => false,
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Word being assembled.
struct Word {
    start: usize,
    text: String,
    /// First character came from a quote or escape.
    leading_quoted: bool,
    /// Any part came from a quote or escape.
    quoted: bool,
}

impl Word {
    fn starting(start: usize, leading_quoted: bool) -> Self {
        Self {
            start,
            text: String::new(),
            leading_quoted,
            quoted: leading_quoted,
        }
    }

    fn finish(self, input: &str, end: usize) -> Token {
        let kind = if !self.leading_quoted && self.text.starts_with('-') && !is_negative_number(&self.text) {
            TokenKind::Option
        } else if !self.quoted && is_identifier(&self.text) {
            TokenKind::Identifier
        } else {
            TokenKind::Literal
        };
        Token {
            kind,
            raw: input[self.start..end].to_string(),
            text: self.text,
            span: Span::new(self.start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn texts(input: &str) -> Vec<String> {
        tokenize(input).unwrap().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_plain_words() {
        let tokens = tokenize("show  nodes -format=json").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].span, Span::new(0, 4));
        assert_eq!(tokens[1].span, Span::new(6, 11));
        assert_eq!(tokens[2].kind, TokenKind::Option);
        assert_eq!(tokens[2].text, "-format=json");
    }

    #[test]
    fn test_operators_without_spaces() {
        assert_eq!(texts("info a|like x;count"), vec!["info", "a", "|", "like", "x", ";", "count"]);
        assert_eq!(
            kinds("a|b;c"),
            vec![
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Identifier,
                TokenKind::Delimiter,
                TokenKind::Identifier
            ]
        );
    }

    #[test]
    fn test_single_quotes_are_literal() {
        let tokens = tokenize(r#"like 'a "b" \n|;'"#).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, r#"a "b" \n|;"#);
        assert_eq!(tokens[1].kind, TokenKind::Literal);
        assert_eq!(tokens[1].raw, r#"'a "b" \n|;'"#);
    }

    #[test]
    fn test_double_quote_escapes() {
        let tokens = tokenize(r#""a \"q\" \\ \$x \`y\` \n""#).unwrap();
        assert_eq!(tokens[0].text, r#"a "q" \ $x `y` \n"#);
    }

    #[test]
    fn test_backslash_outside_quotes() {
        assert_eq!(texts(r"a\ b c\|d"), vec!["a b", "c|d"]);
    }

    #[test]
    fn test_adjacent_quoted_parts_join() {
        assert_eq!(texts(r#"ab'c d'"e""#), vec!["abc de"]);
    }

    #[test]
    fn test_quoted_option_value() {
        let tokens = tokenize(r#"-like="a b""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Option);
        assert_eq!(tokens[0].text, "-like=a b");
    }

    #[test]
    fn test_quoted_dash_is_literal() {
        assert_eq!(kinds("'-x'"), vec![TokenKind::Literal]);
    }

    #[test]
    fn test_negative_numbers_are_literals() {
        assert_eq!(kinds("-5 -1.5 -.5 -x -"), vec![
            TokenKind::Literal,
            TokenKind::Literal,
            TokenKind::Literal,
            TokenKind::Option,
            TokenKind::Option
        ]);
        assert!(!is_negative_number("-inf"));
    }

    #[test]
    fn test_addresses_are_literals() {
        assert_eq!(kinds("10.0.0.1:3000 node-a"), vec![TokenKind::Literal, TokenKind::Identifier]);
    }

    #[test]
    fn test_unterminated_quotes() {
        assert_eq!(
            tokenize("info 'abc").unwrap_err(),
            SyntaxError::UnterminatedQuote { quote: '\'', position: 5 }
        );
        assert_eq!(
            tokenize(r#"info x"ab\""#).unwrap_err(),
            SyntaxError::UnterminatedQuote { quote: '"', position: 6 }
        );
    }

    #[test]
    fn test_dangling_escape() {
        assert_eq!(tokenize("abc\\").unwrap_err(), SyntaxError::DanglingEscape { position: 3 });
    }

    #[test]
    fn test_multibyte_spans() {
        let tokens = tokenize("like 'é' x").unwrap();
        assert_eq!(tokens[1].span, Span::new(5, 9));
        assert_eq!(tokens[2].span, Span::new(10, 11));
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("   ").unwrap().is_empty());
    }
}
