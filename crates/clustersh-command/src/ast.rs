use std::borrow::Cow;
use std::fmt;

/// Parsed command tree.
///
/// Keyword abbreviations are expanded during parsing, so `sh nod` and
/// `show nodes` produce identical trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandNode {
    /// Positional value.
    Literal(String),
    /// `-name` or `-name=value`.
    Option(String, Option<String>),
    /// Command or keyword with everything it consumed.
    Subcommand(String, Vec<CommandNode>),
    /// Two or more commands joined by `|`.
    Pipeline(Vec<CommandNode>),
}

impl CommandNode {
    pub fn subcommand(name: impl Into<String>, children: Vec<CommandNode>) -> Self {
        CommandNode::Subcommand(name.into(), children)
    }

    pub fn option(name: impl Into<String>, value: Option<&str>) -> Self {
        CommandNode::Option(name.into(), value.map(str::to_string))
    }

    pub fn literal(text: impl Into<String>) -> Self {
        CommandNode::Literal(text.into())
    }

    /// Name of a subcommand node.
    pub fn name(&self) -> Option<&str> {
        match self {
            CommandNode::Subcommand(name, _) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn children(&self) -> &[CommandNode] {
        match self {
            CommandNode::Subcommand(_, children) | CommandNode::Pipeline(children) => children,
            _ => &[],
        }
    }

    /// Pipeline stages, or the node itself when it is a single command.
    pub fn stages(&self) -> &[CommandNode] {
        match self {
            CommandNode::Pipeline(stages) => stages,
            other => std::slice::from_ref(other),
        }
    }

    /// First nested subcommand.
    pub fn nested(&self) -> Option<&CommandNode> {
        self.children().iter().find(|c| matches!(c, CommandNode::Subcommand(..)))
    }

    pub fn positionals(&self) -> impl Iterator<Item = &str> {
        self.children().iter().filter_map(|c| match c {
            CommandNode::Literal(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn options(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.children().iter().filter_map(|c| match c {
            CommandNode::Option(name, value) => Some((name.as_str(), value.as_deref())),
            _ => None,
        })
    }

    /// Whether option `name` is present, with or without a value.
    pub fn has_option(&self, name: &str) -> bool {
        self.options().any(|(n, _)| n == name)
    }

    /// Value of the last occurrence of option `name`.
    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.options().filter(|(n, _)| *n == name).filter_map(|(_, v)| v).last()
    }
}

/// A word as it would be typed: bare when it lexes back unchanged, single
/// quoted otherwise.
pub(crate) fn quote_word(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '=' | ',' | '/'));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// A positional as it would be typed. Quoting a leading dash keeps it from
/// reading back as an option.
pub(crate) fn quote_literal(text: &str) -> Cow<'_, str> {
    if text.starts_with('-') && !crate::lexer::is_negative_number(text) {
        Cow::Owned(format!("'{}'", text.replace('\'', r"'\''")))
    } else {
        quote_word(text)
    }
}

fn write_word(f: &mut fmt::Formatter<'_>, word: &str) -> fmt::Result {
    f.write_str(&quote_word(word))
}

/// Canonical command text, with keywords spelled out in full.
impl fmt::Display for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandNode::Literal(text) => f.write_str(&quote_literal(text)),
            CommandNode::Option(name, None) => write!(f, "-{}", name),
            CommandNode::Option(name, Some(value)) => {
                write!(f, "-{}=", name)?;
                write_word(f, value)
            }
            CommandNode::Subcommand(name, children) => {
                write!(f, "{}", name)?;
                for child in children {
                    write!(f, " {}", child)?;
                }
                Ok(())
            }
            CommandNode::Pipeline(stages) => {
                for (i, stage) in stages.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", stage)?;
                }
                Ok(())
            }
        }
    }
}
