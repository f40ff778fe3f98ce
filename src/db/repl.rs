//! Interactive REPL (Read-Eval-Print Loop) for kvdb.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use super::api::{format_bytes, Store};
use crate::engine::Backend;

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Show timing information.
    pub timing: bool,
    /// Max records to display for `dump`.
    pub max_rows: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "kvdb> ".into(),
            timing: false,
            max_rows: 100,
        }
    }
}

/// A parsed REPL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Get(String),
    Set(String, String),
    MultiSet(Vec<(String, String)>),
    Del(String),
    Dump,
    Len,
}

/// Parse one statement line.
///
/// `set` takes the rest of the line as the value, so values may contain
/// spaces. `mset` takes `key=value` pairs separated by whitespace.
pub fn parse_statement(line: &str) -> Result<Statement, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_lowercase().as_str() {
        "get" => single_key(rest, "get <key>").map(Statement::Get),
        "del" | "delete" => single_key(rest, "del <key>").map(Statement::Del),
        "set" => match rest.split_once(char::is_whitespace) {
            Some((key, value)) => Ok(Statement::Set(key.to_string(), value.trim().to_string())),
            None => Err("usage: set <key> <value>".into()),
        },
        "mset" => {
            if rest.is_empty() {
                return Err("usage: mset <key>=<value> ...".into());
            }
            rest.split_whitespace()
                .map(|pair| match pair.split_once('=') {
                    Some((key, value)) if !key.is_empty() => {
                        Ok((key.to_string(), value.to_string()))
                    }
                    _ => Err(format!("expected key=value, got '{}'", pair)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Statement::MultiSet)
        }
        "dump" if rest.is_empty() => Ok(Statement::Dump),
        "len" | "count" if rest.is_empty() => Ok(Statement::Len),
        "" => Err("empty statement".into()),
        other => Err(format!("unknown statement: {}", other)),
    }
}

fn single_key(rest: &str, usage: &str) -> Result<String, String> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(key), None) => Ok(key.to_string()),
        _ => Err(format!("usage: {}", usage)),
    }
}

/// The interactive REPL.
pub struct Repl<B: Backend> {
    store: Store<B>,
    config: ReplConfig,
    history: Vec<String>,
}

impl<B: Backend> Repl<B> {
    /// Create a new REPL over the given store.
    pub fn new(store: Store<B>) -> Self {
        Self::with_config(store, ReplConfig::default())
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(store: Store<B>, config: ReplConfig) -> Self {
        Self {
            store,
            config,
            history: Vec::new(),
        }
    }

    /// Give the store back, e.g. to close it explicitly.
    pub fn into_store(self) -> Store<B> {
        self.store
    }

    /// Run the REPL on stdin/stdout.
    pub fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.print_banner(&mut stdout.lock())?;
        self.run_with(stdin.lock(), stdout.lock())
    }

    /// Run the REPL over arbitrary input and output. Returns on EOF or
    /// `.quit`. Statement errors are printed, never returned.
    pub fn run_with<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> io::Result<()> {
        let mut line = String::new();
        loop {
            write!(out, "{}", self.config.prompt)?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }

            let cmd = line.trim();
            if cmd.is_empty() {
                continue;
            }
            self.history.push(cmd.to_string());

            if cmd.starts_with('.') {
                if self.handle_command(cmd, &mut out)? {
                    break;
                }
                continue;
            }

            let start = Instant::now();
            match parse_statement(cmd) {
                Ok(stmt) => self.execute(&stmt, &mut out)?,
                Err(msg) => writeln!(out, "Error: {}", msg)?,
            }
            if self.config.timing {
                writeln!(out, "Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0)?;
            }
        }
        Ok(())
    }

    fn print_banner<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "kvdb {} ({}, {})", env!("CARGO_PKG_VERSION"), self.store.path().display(), self.store.lifecycle())?;
        writeln!(out, "Type .help for commands.")
    }

    fn execute<W: Write>(&self, stmt: &Statement, out: &mut W) -> io::Result<()> {
        match stmt {
            Statement::Get(key) => match self.store.get(key) {
                Ok(value) => writeln!(out, "{}", format_bytes(&value)),
                Err(e) if e.is_not_found() => writeln!(out, "(not found)"),
                Err(e) => writeln!(out, "Error: {}", e),
            },
            Statement::Set(key, value) => match self.store.set(key, value) {
                Ok(()) => writeln!(out, "OK"),
                Err(e) => writeln!(out, "Error: {}", e),
            },
            Statement::MultiSet(pairs) => {
                match self.store.multi_set(pairs.iter().map(|(k, v)| (k, v))) {
                    Ok(()) => writeln!(out, "OK ({} pairs)", pairs.len()),
                    Err(e) => writeln!(out, "Error: {}", e),
                }
            }
            Statement::Del(key) => match self.store.del(key) {
                Ok(()) => writeln!(out, "OK"),
                Err(e) => writeln!(out, "Error: {}", e),
            },
            Statement::Dump => match self.store.dump() {
                Ok(records) => {
                    for (key, value) in records.iter().take(self.config.max_rows) {
                        writeln!(out, "{} = {}", format_bytes(key), format_bytes(value))?;
                    }
                    if records.len() > self.config.max_rows {
                        writeln!(out, "... ({} more)", records.len() - self.config.max_rows)?;
                    }
                    writeln!(out, "({} records)", records.len())
                }
                Err(e) => writeln!(out, "Error: {}", e),
            },
            Statement::Len => match self.store.len() {
                Ok(len) => writeln!(out, "{}", len),
                Err(e) => writeln!(out, "Error: {}", e),
            },
        }
    }

    fn handle_command<W: Write>(&mut self, cmd: &str, out: &mut W) -> io::Result<bool> {
        let command = cmd.trim_start_matches('.').to_lowercase();

        match command.as_str() {
            "help" | "h" | "?" => self.print_help(out)?,
            "quit" | "exit" | "q" => return Ok(true),
            "stats" => match self.store.stats() {
                Ok(stats) => writeln!(out, "{}", stats)?,
                Err(e) => writeln!(out, "Error: {}", e)?,
            },
            "history" => {
                for (i, cmd) in self.history.iter().enumerate() {
                    writeln!(out, "  {}: {}", i + 1, cmd)?;
                }
            }
            "timing" => {
                self.config.timing = !self.config.timing;
                writeln!(out, "Timing: {}", if self.config.timing { "on" } else { "off" })?;
            }
            "clear" => write!(out, "\x1B[2J\x1B[H")?,
            other => {
                writeln!(out, "Unknown command: .{}", other)?;
                writeln!(out, "Type .help for available commands")?;
            }
        }
        Ok(false)
    }

    fn print_help<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Commands:")?;
        writeln!(out, "  .help, .h, .?           Show this help message")?;
        writeln!(out, "  .quit, .exit, .q        Exit the REPL")?;
        writeln!(out, "  .stats                  Show store statistics")?;
        writeln!(out, "  .history                Show command history")?;
        writeln!(out, "  .timing                 Toggle timing display")?;
        writeln!(out, "  .clear                  Clear the screen")?;
        writeln!(out)?;
        writeln!(out, "Statements:")?;
        writeln!(out, "  get <key>")?;
        writeln!(out, "  set <key> <value>")?;
        writeln!(out, "  mset <key>=<value> ...")?;
        writeln!(out, "  del <key>")?;
        writeln!(out, "  dump")?;
        writeln!(out, "  len")
    }
}
