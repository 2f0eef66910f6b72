//! Command grammar tables.
//!
//! The grammar is plain static data: each [`CommandSpec`] names a keyword,
//! the action bound to it, the options it takes beyond the common ones and
//! its nested keywords. The parser and executor are driven entirely by the
//! table they are handed, so a different vocabulary is a different table.

use crate::merge::Merge;

/// Options every cluster command accepts.
pub const CLUSTER_OPTIONS: &[&str] = &["with", "fresh"];

/// Options accepted everywhere. `format` is read by output collaborators.
pub const GLOBAL_OPTIONS: &[&str] = &["format"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Requires one of the nested keywords.
    Group,
    /// Sends its first positional as a raw request.
    Info,
    /// Reports the local cluster view.
    ShowNodes,
    /// Broadcasts `request` and merges the replies.
    Broadcast { request: &'static str, merge: Merge },
    /// Forces rediscovery.
    Refresh,
    /// Transforms the previous stage's result.
    Stage(StageKind),
}

impl Action {
    /// Whether the action talks to the cluster.
    pub fn is_cluster(&self) -> bool {
        matches!(self, Action::Info | Action::ShowNodes | Action::Broadcast { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Like,
    Select,
    Sort,
    Limit,
    Count,
}

#[derive(Debug, PartialEq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub action: Action,
    pub options: &'static [&'static str],
    pub subcommands: &'static [CommandSpec],
    pub help: &'static str,
}

impl CommandSpec {
    pub const fn leaf(name: &'static str, action: Action, help: &'static str) -> Self {
        Self {
            name,
            action,
            options: &[],
            subcommands: &[],
            help,
        }
    }

    pub const fn with_options(mut self, options: &'static [&'static str]) -> Self {
        self.options = options;
        self
    }

    pub const fn group(name: &'static str, subcommands: &'static [CommandSpec], help: &'static str) -> Self {
        Self {
            name,
            action: Action::Group,
            options: &[],
            subcommands,
            help,
        }
    }

    /// Whether `option` may appear on this command.
    pub fn accepts_option(&self, option: &str) -> bool {
        self.options.contains(&option)
            || GLOBAL_OPTIONS.contains(&option)
            || (self.action.is_cluster() && CLUSTER_OPTIONS.contains(&option))
    }

    pub fn subcommand(&self, name: &str) -> Option<&CommandSpec> {
        self.subcommands.iter().find(|s| s.name == name)
    }
}

/// Outcome of looking a word up among keywords.
#[derive(Debug, PartialEq)]
pub enum KeywordMatch<'g> {
    /// Exact match, or the only keyword the word is a prefix of.
    Found(&'g CommandSpec),
    /// Prefix of several keywords, sorted.
    Ambiguous(Vec<&'static str>),
    NotFound,
}

/// Resolves `word` among `specs`. An exact match always wins.
pub fn match_keyword<'g>(specs: &'g [CommandSpec], word: &str) -> KeywordMatch<'g> {
    if let Some(spec) = specs.iter().find(|s| s.name == word) {
        return KeywordMatch::Found(spec);
    }
    let candidates: Vec<&'g CommandSpec> = specs.iter().filter(|s| s.name.starts_with(word)).collect();
    match candidates.as_slice() {
        [] => KeywordMatch::NotFound,
        [spec] => KeywordMatch::Found(*spec),
        many => {
            let mut names: Vec<&'static str> = many.iter().map(|s| s.name).collect();
            names.sort_unstable();
            KeywordMatch::Ambiguous(names)
        }
    }
}

/// A command vocabulary.
#[derive(Debug)]
pub struct Grammar {
    commands: &'static [CommandSpec],
}

static SHOW: &[CommandSpec] = &[
    CommandSpec::leaf("nodes", Action::ShowNodes, "Cluster view as known to this session"),
    CommandSpec::leaf(
        "statistics",
        Action::Broadcast {
            request: "statistics",
            merge: Merge::PassThrough,
        },
        "Statistics reported by every node",
    ),
    CommandSpec::leaf(
        "config",
        Action::Broadcast {
            request: "config",
            merge: Merge::PassThrough,
        },
        "Configuration of every node; -diff keeps differing keys only",
    )
    .with_options(&["diff"]),
    CommandSpec::leaf(
        "features",
        Action::Broadcast {
            request: "features",
            merge: Merge::KeyUnion,
        },
        "Union of the features every node supports",
    ),
];

static DEFAULT_COMMANDS: &[CommandSpec] = &[
    CommandSpec::leaf("info", Action::Info, "info <request> [key=value..]: send a raw request to every node"),
    CommandSpec::group("show", SHOW, "Show cluster state"),
    CommandSpec::leaf(
        "summary",
        Action::Broadcast {
            request: "statistics",
            merge: Merge::NumericAggregate,
        },
        "Sum, average, minimum and maximum of numeric statistics",
    ),
    CommandSpec::leaf("refresh", Action::Refresh, "Rediscover the cluster and drop cached results"),
    CommandSpec::leaf("like", Action::Stage(StageKind::Like), "like <pattern..>: keep rows containing any pattern"),
    CommandSpec::leaf("select", Action::Stage(StageKind::Select), "select <column..>: keep the named columns"),
    CommandSpec::leaf("sort", Action::Stage(StageKind::Sort), "sort <column> [-desc]: order rows by a column")
        .with_options(&["desc"]),
    CommandSpec::leaf("limit", Action::Stage(StageKind::Limit), "limit <n>: keep the first n rows"),
    CommandSpec::leaf("count", Action::Stage(StageKind::Count), "count: number of rows"),
];

static DEFAULT: Grammar = Grammar::new(DEFAULT_COMMANDS);

impl Grammar {
    pub const fn new(commands: &'static [CommandSpec]) -> Self {
        Self { commands }
    }

    /// The built-in vocabulary.
    pub fn default_vocabulary() -> &'static Grammar {
        &DEFAULT
    }

    pub fn commands(&self) -> &'static [CommandSpec] {
        self.commands
    }

    /// Follows a path of full keyword names, e.g. `["show", "config"]`.
    pub fn lookup(&self, path: &[&str]) -> Option<&'static CommandSpec> {
        let (first, rest) = path.split_first()?;
        let mut spec = self.commands.iter().find(|s| s.name == *first)?;
        for name in rest {
            spec = spec.subcommands.iter().find(|s| s.name == *name)?;
        }
        Some(spec)
    }
}
