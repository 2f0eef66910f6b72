//! The interactive loop.
//!
//! Input is read and parsed on the caller's task. Parsed commands travel over
//! a channel to a single executor worker that owns the cluster session, so
//! commands run strictly one after another. An interrupt cancels only the
//! command in flight; the worker keeps running.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clustersh_client::Connector;
use clustersh_command::{
    parse, parse_script, CommandNode, CommandResult, CommandSpec, ExecutionError, Executor, Grammar, SyntaxError,
};
use clustersh_session::{CancellationToken, ClusterSession};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub const PROMPT: &str = "clustersh> ";

/// Commands queued ahead of the worker.
const JOB_QUEUE: usize = 16;

/// Pause between `watch` runs when none is given.
const WATCH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("unknown output format '{0}', expected json or pretty")]
    UnknownFormat(String),

    #[error("executor worker stopped")]
    WorkerStopped,

    #[error("watch: {0}")]
    Watch(String),
}

/// How a result is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Indented JSON
    #[default]
    Pretty,
    /// One JSON document per line
    Json,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Result<Self, ShellError> {
        match name {
            "pretty" => Ok(OutputFormat::Pretty),
            "json" => Ok(OutputFormat::Json),
            other => Err(ShellError::UnknownFormat(other.to_string())),
        }
    }

    /// The `-format` option of `node`, wherever it was given. The last
    /// stage that sets it wins.
    pub fn for_command(node: &CommandNode, default: OutputFormat) -> Result<Self, ShellError> {
        match node.stages().iter().filter_map(|stage| find_option(stage, "format")).last() {
            Some(name) => Self::from_name(name),
            None => Ok(default),
        }
    }

    pub fn render(self, result: &CommandResult) -> String {
        let json = result.to_json();
        let text = match self {
            OutputFormat::Pretty => serde_json::to_string_pretty(&json),
            OutputFormat::Json => serde_json::to_string(&json),
        };
        text.unwrap_or_else(|_| json.to_string())
    }
}

fn find_option<'a>(node: &'a CommandNode, name: &str) -> Option<&'a str> {
    node.nested()
        .and_then(|nested| find_option(nested, name))
        .or_else(|| node.option_value(name))
}

struct Job {
    node: CommandNode,
    cancel: CancellationToken,
    reply: oneshot::Sender<clustersh_command::Result<CommandResult>>,
}

/// Cancels the command currently in flight.
#[derive(Clone)]
pub struct Interrupter {
    current: Arc<ArcSwap<CancellationToken>>,
}

impl Interrupter {
    fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(CancellationToken::new())),
        }
    }

    /// Token for the next command. Earlier tokens are no longer reachable.
    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.current.store(Arc::new(token.clone()));
        token
    }

    pub fn interrupt(&self) {
        self.current.load().cancel();
    }
}

/// Lines run and lines that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub commands: usize,
    pub failures: usize,
}

enum LineOutcome {
    Continue,
    Exit,
}

/// `watch [interval] [count] <command>`: rerun a command until `count` runs
/// are done or the user interrupts.
#[derive(Debug, Clone)]
struct Watch<'a> {
    interval: Duration,
    count: Option<u64>,
    command: &'a str,
}

impl<'a> Watch<'a> {
    /// `None` when `line` is not a watch command.
    fn parse(line: &'a str) -> Option<Result<Self, ShellError>> {
        let rest = line.trim().strip_prefix("watch")?;
        if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
            return None;
        }
        Some(Self::parse_arguments(rest.trim_start()))
    }

    fn parse_arguments(mut rest: &'a str) -> Result<Self, ShellError> {
        let mut watch = Watch {
            interval: WATCH_INTERVAL,
            count: None,
            command: "",
        };

        if let Some((word, tail)) = leading_word(rest) {
            if let Ok(seconds) = word.parse::<f64>() {
                if !seconds.is_finite() || seconds <= 0.0 {
                    return Err(ShellError::Watch(format!("interval must be a positive number of seconds, got '{}'", word)));
                }
                watch.interval = Duration::from_secs_f64(seconds);
                rest = tail;

                if let Some((word, tail)) = leading_word(rest) {
                    if let Ok(count) = word.parse::<u64>() {
                        if count == 0 {
                            return Err(ShellError::Watch("count must be at least 1".to_string()));
                        }
                        watch.count = Some(count);
                        rest = tail;
                    }
                }
            }
        }

        watch.command = rest.trim();
        if watch.command.is_empty() {
            return Err(ShellError::Watch("expects a command to run".to_string()));
        }
        Ok(watch)
    }
}

fn leading_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    Some(text.split_once(char::is_whitespace).unwrap_or((text, "")))
}

/// Front end of the shell, paired with its executor worker.
pub struct Shell {
    jobs: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
    interrupter: Interrupter,
    grammar: &'static Grammar,
    format: OutputFormat,
}

impl Shell {
    /// Spawns the executor worker, which takes ownership of `session`.
    pub fn spawn<C: Connector>(session: ClusterSession<C>) -> Self {
        let (jobs, rx) = mpsc::channel(JOB_QUEUE);
        let worker = tokio::spawn(run_worker(session, rx));
        Self {
            jobs,
            worker,
            interrupter: Interrupter::new(),
            grammar: Grammar::default_vocabulary(),
            format: OutputFormat::default(),
        }
    }

    /// Format used when a command does not pick one.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Sends one parsed command to the worker and waits for its result.
    pub async fn submit(&self, node: CommandNode) -> Result<CommandResult, ShellError> {
        self.submit_with(node, self.interrupter.arm()).await
    }

    async fn submit_with(&self, node: CommandNode, cancel: CancellationToken) -> Result<CommandResult, ShellError> {
        let (reply, rx) = oneshot::channel();
        let job = Job { node, cancel, reply };
        self.jobs.send(job).await.map_err(|_| ShellError::WorkerStopped)?;
        Ok(rx.await.map_err(|_| ShellError::WorkerStopped)??)
    }

    /// Runs every `;`-separated statement of `script`.
    pub async fn run_script<W, E>(&self, script: &str, out: &mut W, err: &mut E) -> std::io::Result<RunSummary>
    where
        W: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let mut summary = RunSummary::default();
        self.run_line(script, out, err, &mut summary).await?;
        Ok(summary)
    }

    /// Reads commands from `input` until end of input or `exit`.
    ///
    /// A line ending in a backslash continues on the next one. With
    /// `prompt`, a prompt is written to `out` before each line.
    pub async fn run<R, W, E>(&self, input: R, out: &mut W, err: &mut E, prompt: bool) -> std::io::Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut summary = RunSummary::default();
        let mut pending = String::new();

        loop {
            if prompt {
                let marker = if pending.is_empty() { PROMPT } else { "... " };
                out.write_all(marker.as_bytes()).await?;
                out.flush().await?;
            }
            let Some(line) = lines.next_line().await? else {
                break;
            };
            pending.push_str(&line);
            if continues(&pending) {
                pending.push('\n');
                continue;
            }

            let text = std::mem::take(&mut pending);
            if let LineOutcome::Exit = self.run_line(&text, out, err, &mut summary).await? {
                break;
            }
        }

        if !pending.is_empty() {
            self.run_line(&pending, out, err, &mut summary).await?;
        }
        Ok(summary)
    }

    async fn run_line<W, E>(&self, line: &str, out: &mut W, err: &mut E, summary: &mut RunSummary) -> std::io::Result<LineOutcome>
    where
        W: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        match line.trim() {
            "" => return Ok(LineOutcome::Continue),
            "exit" | "quit" => return Ok(LineOutcome::Exit),
            "help" => {
                out.write_all(help_text(self.grammar).as_bytes()).await?;
                return Ok(LineOutcome::Continue);
            }
            _ => {}
        }

        match Watch::parse(line) {
            Some(Ok(watch)) => {
                self.run_watch(&watch, out, err, summary).await?;
                return Ok(LineOutcome::Continue);
            }
            Some(Err(e)) => {
                summary.commands += 1;
                summary.failures += 1;
                err.write_all(format!("error: {}\n", e).as_bytes()).await?;
                return Ok(LineOutcome::Continue);
            }
            None => {}
        }

        let statements = match parse_script(line) {
            Ok(statements) => statements,
            Err(e) => {
                summary.commands += 1;
                summary.failures += 1;
                err.write_all(syntax_report(line, &e).as_bytes()).await?;
                return Ok(LineOutcome::Continue);
            }
        };

        for node in statements {
            summary.commands += 1;
            match self.run_command(node).await {
                Ok(text) => {
                    out.write_all(text.as_bytes()).await?;
                    out.write_all(b"\n").await?;
                }
                Err(e) => {
                    summary.failures += 1;
                    err.write_all(format!("error: {}\n", e).as_bytes()).await?;
                }
            }
        }
        out.flush().await?;
        err.flush().await?;
        Ok(LineOutcome::Continue)
    }

    async fn run_command(&self, node: CommandNode) -> Result<String, ShellError> {
        let format = OutputFormat::for_command(&node, self.format)?;
        let result = self.submit(node).await?;
        if result.is_partial() {
            warn!(failed = result.failures.len(), "partial result");
        }
        Ok(format.render(&result))
    }

    /// Runs the watched command every interval, bypassing the cache. Each
    /// run counts as one command. An interrupt stops the loop, cancelling the
    /// run in flight if there is one.
    async fn run_watch<W, E>(&self, watch: &Watch<'_>, out: &mut W, err: &mut E, summary: &mut RunSummary) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let node = match parse(watch.command) {
            Ok(node) => Executor::new(self.grammar).fresh(&node),
            Err(e) => {
                summary.commands += 1;
                summary.failures += 1;
                err.write_all(syntax_report(watch.command, &e).as_bytes()).await?;
                return Ok(());
            }
        };
        let format = match OutputFormat::for_command(&node, self.format) {
            Ok(format) => format,
            Err(e) => {
                summary.commands += 1;
                summary.failures += 1;
                err.write_all(format!("error: {}\n", e).as_bytes()).await?;
                return Ok(());
            }
        };

        let stop = self.interrupter.arm();
        let mut ticks = tokio::time::interval(watch.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut iteration: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticks.tick() => {}
            }
            iteration += 1;
            summary.commands += 1;

            let of = watch.count.map(|c| format!(" of {}", c)).unwrap_or_default();
            err.write_all(
                format!(
                    "[watch '{}' every {:?}, run {}{}]\n",
                    watch.command, watch.interval, iteration, of
                )
                .as_bytes(),
            )
            .await?;

            match self.submit_with(node.clone(), stop.child_token()).await {
                Ok(result) => {
                    out.write_all(format.render(&result).as_bytes()).await?;
                    out.write_all(b"\n").await?;
                }
                Err(ShellError::WorkerStopped) => {
                    summary.failures += 1;
                    err.write_all(format!("error: {}\n", ShellError::WorkerStopped).as_bytes()).await?;
                    break;
                }
                Err(e) => {
                    summary.failures += 1;
                    err.write_all(format!("error: {}\n", e).as_bytes()).await?;
                }
            }
            out.flush().await?;
            err.flush().await?;

            if stop.is_cancelled() || watch.count.is_some_and(|c| iteration >= c) {
                break;
            }
        }
        debug!(runs = iteration, "watch ended");
        out.flush().await?;
        err.flush().await?;
        Ok(())
    }

    /// Closes the queue and waits for the worker to finish.
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(e) = self.worker.await {
            warn!("executor worker ended abnormally: {}", e);
        }
    }
}

async fn run_worker<C: Connector>(session: ClusterSession<C>, mut jobs: mpsc::Receiver<Job>) {
    let executor = Executor::default();
    while let Some(job) = jobs.recv().await {
        debug!(command = %job.node, "executing");
        let result = executor.execute(&job.node, &session, &job.cancel).await;
        if job.reply.send(result).is_err() {
            debug!("command result dropped, caller went away");
        }
    }
    debug!("executor worker stopped");
}

/// An odd number of trailing backslashes escapes the newline.
fn continues(text: &str) -> bool {
    text.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// The error, with the offending input underlined when it has a position.
pub fn syntax_report(line: &str, error: &SyntaxError) -> String {
    let mut report = format!("syntax error: {}\n", error);
    if let Some(span) = error.span() {
        // Only single-line input can be underlined meaningfully
        if !line.contains('\n') && span.start <= line.len() {
            let width = span.end.min(line.len()).saturating_sub(span.start).max(1);
            let indent = line[..span.start].chars().count();
            report.push_str(&format!("  {}\n  {}{}\n", line, " ".repeat(indent), "^".repeat(width)));
        }
    }
    report
}

/// Command overview, one line per keyword.
pub fn help_text(grammar: &Grammar) -> String {
    fn walk(specs: &[CommandSpec], depth: usize, text: &mut String) {
        for spec in specs {
            text.push_str(&format!("{:indent$}{:<12} {}\n", "", spec.name, spec.help, indent = depth * 2));
            walk(spec.subcommands, depth + 1, text);
        }
    }

    let mut text = String::new();
    walk(grammar.commands(), 0, &mut text);
    text.push_str(&format!(
        "{:<12} watch [seconds] [count] <command>: rerun a command, bypassing the cache, until interrupted\n",
        "watch"
    ));
    text.push_str("\nCluster commands take -with=<node>[,<node>..] and -fresh; any command takes -format=json|pretty.\n");
    text.push_str("Keywords may be abbreviated to any unique prefix. Stages are chained with '|'.\n");
    text
}
