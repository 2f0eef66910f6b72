//! Binds parsed commands to session operations.
//!
//! Every cluster command goes through the same steps: look the command
//! identity up in the session cache under the current view generation,
//! broadcast on a miss, merge the per-node replies and store the response
//! for the next caller. Pipelines thread each stage's result into the next
//! in-process; a later stage that repeats an earlier command reuses its
//! response unless it carries `-fresh`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use clustersh_client::Connector;
use clustersh_common::{Request, Value};
use clustersh_session::{AggregatedResponse, CancellationToken, ClusterSession, NodeError};
use tracing::{debug, info};

use crate::ast::{quote_literal, quote_word, CommandNode};
use crate::error::{ExecutionError, Result};
use crate::grammar::{Action, CommandSpec, Grammar};
use crate::merge::Merge;
use crate::output::{CommandResult, Output, Table};
use crate::pipeline;

/// Executes `node` against `session` with the built-in vocabulary.
pub async fn execute<C: Connector>(node: &CommandNode, session: &ClusterSession<C>) -> Result<CommandResult> {
    Executor::default()
        .execute(node, session, &CancellationToken::new())
        .await
}

/// A command resolved against the grammar: the full keyword path, the leaf
/// spec and the words collected along the path.
#[derive(Debug)]
struct Invocation<'n> {
    path: Vec<&'static str>,
    spec: &'static CommandSpec,
    node: &'n CommandNode,
    positionals: Vec<&'n str>,
    options: Vec<(&'n str, Option<&'n str>)>,
}

impl<'n> Invocation<'n> {
    fn name(&self) -> String {
        self.path.join(" ")
    }

    fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|(n, _)| *n == name)
    }

    fn option_value(&self, name: &str) -> Option<&'n str> {
        self.options
            .iter()
            .filter(|(n, _)| *n == name)
            .filter_map(|(_, v)| *v)
            .last()
    }

    /// Cache identity: what the command asks and of which nodes. Options
    /// that change neither are left out.
    fn identity(&self, subset: Option<&[String]>) -> String {
        let mut options: Vec<String> = self
            .options
            .iter()
            .filter(|(n, _)| !matches!(*n, "fresh" | "format" | "with"))
            .map(|(n, v)| match v {
                Some(v) => format!("-{}={}", n, quote_word(v)),
                None => format!("-{}", n),
            })
            .collect();
        options.sort();
        options.dedup();

        let mut identity = self.name();
        // Quoted as typed, so `a b` and `'a b'` stay distinct
        for word in self.positionals.iter().map(|p| quote_literal(p).into_owned()).chain(options) {
            identity.push(' ');
            identity.push_str(&word);
        }
        if let Some(subset) = subset {
            identity.push_str(" @");
            identity.push_str(&subset.join(","));
        }
        identity
    }
}

/// Executes command trees against a cluster session.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'g> {
    grammar: &'g Grammar,
}

impl Default for Executor<'static> {
    fn default() -> Self {
        Self::new(Grammar::default_vocabulary())
    }
}

impl<'g> Executor<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self { grammar }
    }

    /// Runs every stage of `node`.
    ///
    /// Rediscovers first when the session's refresh interval has elapsed.
    /// `cancel` interrupts an outstanding broadcast; the stage then completes
    /// with the nodes that had answered, and its partial response is not
    /// cached.
    ///
    /// # Errors
    ///
    /// Fails the command, never the session: unknown keywords or options,
    /// bad stage arguments, replies that cannot be merged, or a broadcast
    /// with no reachable node.
    pub async fn execute<C: Connector>(
        &self,
        node: &CommandNode,
        session: &ClusterSession<C>,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        if session.discover_if_stale().await {
            debug!(generation = session.generation(), "view refreshed before command");
        }

        let mut responses: HashMap<String, Arc<AggregatedResponse>> = HashMap::new();
        let mut current: Option<CommandResult> = None;

        for stage in node.stages() {
            let invocation = self.resolve(stage)?;
            let result = match invocation.spec.action {
                Action::Stage(kind) => {
                    let input = current
                        .take()
                        .ok_or_else(|| ExecutionError::MissingInput(invocation.name()))?;
                    let output = pipeline::apply(kind, invocation.node, input.output.clone())?;
                    input.with_output(output)
                }
                Action::Info => {
                    let request = info_request(&invocation)?;
                    self.broadcast(session, &invocation, request, Merge::PassThrough, cancel, &mut responses)
                        .await?
                }
                Action::Broadcast { request, merge } => {
                    let merge = if invocation.spec.options.contains(&"diff") && invocation.has_option("diff") {
                        Merge::Diff
                    } else {
                        merge
                    };
                    self.broadcast(session, &invocation, Request::command(request), merge, cancel, &mut responses)
                        .await?
                }
                Action::ShowNodes => show_nodes(session, &invocation)?,
                Action::Refresh => {
                    let view = session.refresh().await;
                    responses.clear();
                    let mut result = CommandResult::message(format!(
                        "generation {}: {} of {} nodes up",
                        view.generation(),
                        view.up_addresses().len(),
                        view.len()
                    ));
                    result.generation = Some(view.generation());
                    result
                }
                Action::Group => {
                    return Err(ExecutionError::UnknownCommand(invocation.name()));
                }
            };
            current = Some(result);
        }

        current.ok_or_else(|| ExecutionError::UnknownCommand(node.to_string()))
    }

    /// `node` with `-fresh` added to every stage that talks to the cluster,
    /// so running it bypasses the cache. Stages that do not resolve are left
    /// as they are and fail when executed.
    pub fn fresh(&self, node: &CommandNode) -> CommandNode {
        let stages: Vec<CommandNode> = node
            .stages()
            .iter()
            .map(|stage| match (stage, self.resolve(stage)) {
                (CommandNode::Subcommand(name, children), Ok(invocation))
                    if invocation.spec.action.is_cluster() && !invocation.has_option("fresh") =>
                {
                    let mut children = children.clone();
                    children.push(CommandNode::option("fresh", None));
                    CommandNode::Subcommand(name.clone(), children)
                }
                _ => stage.clone(),
            })
            .collect();
        match node {
            CommandNode::Pipeline(_) => CommandNode::Pipeline(stages),
            _ => stages.into_iter().next().unwrap_or_else(|| node.clone()),
        }
    }

    /// Walks the grammar along the node's keywords, collecting positionals
    /// and options from every level.
    fn resolve<'n>(&self, node: &'n CommandNode) -> Result<Invocation<'n>> {
        let name = match node {
            CommandNode::Subcommand(name, _) => name,
            other => return Err(ExecutionError::UnknownCommand(other.to_string())),
        };
        let mut spec = self
            .grammar
            .commands()
            .iter()
            .find(|s| s.name == name.as_str())
            .ok_or_else(|| ExecutionError::UnknownCommand(name.clone()))?;

        let mut invocation = Invocation {
            path: vec![spec.name],
            spec,
            node,
            positionals: Vec::new(),
            options: Vec::new(),
        };

        let mut level = node;
        loop {
            let mut nested: Option<(&'static CommandSpec, &'n CommandNode)> = None;
            for child in level.children() {
                match child {
                    CommandNode::Literal(text) => invocation.positionals.push(text),
                    CommandNode::Option(name, value) => invocation.options.push((name.as_str(), value.as_deref())),
                    CommandNode::Subcommand(name, _) => match spec.subcommand(name) {
                        Some(sub) if nested.is_none() => nested = Some((sub, child)),
                        Some(_) => {
                            return Err(ExecutionError::invalid(
                                invocation.name(),
                                format!("unexpected keyword '{}'", name),
                            ))
                        }
                        None => return Err(ExecutionError::UnknownCommand(format!("{} {}", invocation.name(), name))),
                    },
                    CommandNode::Pipeline(_) => return Err(ExecutionError::UnknownCommand(child.to_string())),
                }
            }

            match nested {
                Some((sub, child)) => {
                    spec = sub;
                    invocation.path.push(sub.name);
                    invocation.spec = sub;
                    level = child;
                }
                None => break,
            }
        }

        if spec.action == Action::Group {
            return Err(ExecutionError::MissingSubcommand {
                command: invocation.name(),
                expected: spec.subcommands.iter().map(|s| s.name.to_string()).collect(),
            });
        }

        if let Some((unknown, _)) = invocation.options.iter().find(|(n, _)| !spec.accepts_option(n)) {
            return Err(ExecutionError::invalid(
                invocation.name(),
                format!("unknown option -{}", unknown),
            ));
        }

        Ok(invocation)
    }

    async fn broadcast<C: Connector>(
        &self,
        session: &ClusterSession<C>,
        invocation: &Invocation<'_>,
        request: Request,
        merge: Merge,
        cancel: &CancellationToken,
        responses: &mut HashMap<String, Arc<AggregatedResponse>>,
    ) -> Result<CommandResult> {
        let subset = subset(session, invocation)?;
        let identity = invocation.identity(subset.as_deref());
        let generation = session.generation();

        let hit = if invocation.has_option("fresh") {
            None
        } else {
            responses
                .get(&identity)
                .cloned()
                .or_else(|| session.cache().get(&identity, generation))
        };

        let (response, cached) = match hit {
            Some(response) => {
                debug!(identity = %identity, generation, "cache hit");
                (response, true)
            }
            None => {
                let response = Arc::new(
                    session
                        .broadcast_with_cancel(&request, subset.as_deref(), session.config().timeout(), cancel)
                        .await?,
                );
                let interrupted = response.failures().any(|(_, e)| *e == NodeError::Cancelled);
                if interrupted {
                    info!(identity = %identity, "partial response after interrupt, not cached");
                } else {
                    session.cache().insert(&identity, response.clone(), session.generation());
                }
                (response, false)
            }
        };
        responses.insert(identity, response.clone());

        let output = merge.apply(&response)?;
        Ok(CommandResult {
            output,
            contributors: response.contributors(),
            failures: failures(&response),
            generation: Some(response.generation()),
            cached,
        })
    }
}

/// Resolves `-with=<sel>[,<sel>..]` to member addresses.
fn subset<C: Connector>(session: &ClusterSession<C>, invocation: &Invocation<'_>) -> Result<Option<Vec<String>>> {
    let Some(with) = invocation.option_value("with") else {
        if invocation.has_option("with") {
            return Err(ExecutionError::invalid(invocation.name(), "-with needs at least one node"));
        }
        return Ok(None);
    };
    let selectors: Vec<String> = with
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if selectors.is_empty() {
        return Err(ExecutionError::invalid(invocation.name(), "-with needs at least one node"));
    }
    Ok(Some(session.resolve_selectors(&selectors)?))
}

fn failures(response: &AggregatedResponse) -> BTreeMap<String, String> {
    response
        .failures()
        .map(|(address, error)| (address.clone(), error.to_string()))
        .collect()
}

/// `info <request> [key=value..] [word..]`: pairs become arguments, bare
/// words go to the `args` list.
fn info_request(invocation: &Invocation<'_>) -> Result<Request> {
    let Some((command, rest)) = invocation.positionals.split_first() else {
        return Err(ExecutionError::invalid(invocation.name(), "expects a request name"));
    };

    let mut request = Request::command(*command);
    let mut bare: Vec<Value> = Vec::new();
    for word in rest {
        match word.split_once('=') {
            Some((key, value)) if !key.is_empty() => request = request.with_arg(key, value),
            _ => bare.push(Value::from(*word)),
        }
    }
    if !bare.is_empty() {
        request = request.with_arg("args", bare);
    }
    Ok(request)
}

/// The local cluster view, one row per node.
fn show_nodes<C: Connector>(session: &ClusterSession<C>, invocation: &Invocation<'_>) -> Result<CommandResult> {
    let view = session.view();
    let with = match invocation.option_value("with") {
        Some(_) => subset(session, invocation)?,
        None => None,
    };

    let mut table = Table::new(
        ["address", "node_id", "liveness", "failures", "last_error"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    );
    for node in view.nodes() {
        if let Some(with) = &with {
            if !with.iter().any(|a| a == node.address()) {
                continue;
            }
        }
        table.push(vec![
            Some(Value::from(node.address())),
            node.node_id.as_deref().map(Value::from),
            Some(Value::from(node.liveness.to_string())),
            Some(Value::from(node.consecutive_failures)),
            node.last_error.as_deref().map(Value::from),
        ]);
    }

    let mut result = CommandResult::local(Output::Table(table));
    result.generation = Some(view.generation());
    Ok(result)
}
