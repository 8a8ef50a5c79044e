//! Restricted command interpreter over one workspace.
//!
//! A [`Session`] accepts one line at a time and answers with an [`Output`]
//! transcript. It never fails: every error from the layers below becomes a
//! labeled line, and every non-blank line lands in the history and the audit
//! sink. File-name arguments always go through [`Workspace::resolve`].

use crate::access::{self, Decision, Role};
use crate::audit::{self, AuditEvent, AuditSink};
use crate::checksum::checksum_file;
use crate::chunk;
use crate::error::{Error, IoContext, Result};
use crate::localize::FluentLoc;
use crate::manifest;
use crate::workspace::Workspace;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const RULE: &str = "─────────────────────────────────────────────────────";
const DOUBLE_RULE: &str = "═══════════════════════════════════════════════════════════";

/// `(usage, description)` for every command, in `help` order.
pub const VOCABULARY: &[(&str, &str)] = &[
    ("ls", "List files in workspace"),
    ("ls -l", "List files with size and date"),
    ("cat <file>", "Display file contents"),
    ("pwd", "Show current workspace path"),
    ("crc32 <file>", "Calculate CRC32 checksum"),
    ("chunk-check <file>", "Check for file chunks"),
    ("history", "Show command history"),
    ("clear", "Clear output window"),
    ("help", "Show this help message"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    List { long: bool },
    Cat(String),
    Pwd,
    Crc32(String),
    ChunkCheck(String),
    Help,
    Clear,
    History,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    MissingArgument { verb: &'static str, usage: &'static str },
    UnexpectedArgument { verb: &'static str, arg: String, usage: &'static str },
}

impl Command {
    /// Case-insensitive verb, whitespace-separated tokens. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> std::result::Result<Option<Command>, ParseError> {
        let mut tokens = line.split_whitespace();
        let Some(verb) = tokens.next() else {
            return Ok(None);
        };
        let arg = tokens.next();
        let cmd = match verb.to_ascii_lowercase().as_str() {
            "ls" => match (arg, tokens.next()) {
                (None, _) => Command::List { long: false },
                (Some("-l"), None) => Command::List { long: true },
                (Some("-l"), Some(extra)) | (Some(extra), _) => {
                    return Err(ParseError::UnexpectedArgument {
                        verb: "ls",
                        arg: extra.to_string(),
                        usage: "ls [-l]",
                    })
                }
            },
            "cat" => Command::Cat(required(arg, "cat", "cat <filename>")?),
            "pwd" => Command::Pwd,
            "crc32" => Command::Crc32(required(arg, "crc32", "crc32 <filename>")?),
            "chunk-check" | "chunkcheck" => {
                Command::ChunkCheck(required(arg, "chunk-check", "chunk-check <filename>")?)
            }
            "help" => Command::Help,
            "clear" => Command::Clear,
            "history" => Command::History,
            _ => return Err(ParseError::Unknown(verb.to_string())),
        };
        Ok(Some(cmd))
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::List { long: false } => "ls",
            Command::List { long: true } => "ls -l",
            Command::Cat(_) => "cat",
            Command::Pwd => "pwd",
            Command::Crc32(_) => "crc32",
            Command::ChunkCheck(_) => "chunk-check",
            Command::Help => "help",
            Command::Clear => "clear",
            Command::History => "history",
        }
    }

    pub fn argument(&self) -> Option<&str> {
        match self {
            Command::Cat(a) | Command::Crc32(a) | Command::ChunkCheck(a) => Some(a),
            _ => None,
        }
    }
}

fn required(
    arg: Option<&str>,
    verb: &'static str,
    usage: &'static str,
) -> std::result::Result<String, ParseError> {
    arg.map(str::to_string).ok_or(ParseError::MissingArgument { verb, usage })
}

/// Up/down recall over a history it never modifies. `previous` walks from the
/// most recent entry towards the oldest and stops there; `next` walks back and
/// yields `None` once past the most recent (an empty input line).
#[derive(Clone, Debug, Default)]
pub struct HistoryCursor {
    offset: Option<usize>,
}

impl HistoryCursor {
    pub fn previous<'h>(&mut self, history: &'h [String]) -> Option<&'h str> {
        if history.is_empty() {
            return None;
        }
        let offset = match self.offset {
            None => 0,
            Some(o) if o + 1 < history.len() => o + 1,
            Some(o) => o,
        };
        self.offset = Some(offset);
        Some(&history[history.len() - 1 - offset])
    }

    pub fn next<'h>(&mut self, history: &'h [String]) -> Option<&'h str> {
        match self.offset {
            None | Some(0) => {
                self.offset = None;
                None
            }
            Some(o) => {
                self.offset = Some(o - 1);
                history.get(history.len() - o).map(String::as_str)
            }
        }
    }

    pub fn reset(&mut self) {
        self.offset = None;
    }
}

/// Lines produced by one command. `cleared` asks the presenter to wipe its view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub lines: Vec<String>,
    pub cleared: bool,
}

pub struct Session {
    identity: String,
    role: Role,
    workspace: Workspace,
    history: Vec<String>,
    transcript: Vec<String>,
    cursor: HistoryCursor,
    audit: Arc<dyn AuditSink>,
    loc: FluentLoc,
}

impl Session {
    /// Create the workspace if needed and start a session for `identity`.
    pub fn open(
        identity: &str,
        role: Role,
        workspace: Workspace,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        workspace.ensure()?;
        let mut s = Self {
            identity: identity.to_string(),
            role,
            workspace,
            history: Vec::new(),
            transcript: Vec::new(),
            cursor: HistoryCursor::default(),
            audit,
            loc: FluentLoc::from_env(),
        };
        s.transcript = s.banner();
        info!(user = identity, workspace = %s.workspace.root().display(), "shell opened");
        audit::emit(&*s.audit, AuditEvent::new(identity, audit::SHELL_OPEN, "Opened shell emulator"));
        Ok(s)
    }

    pub fn banner(&self) -> Vec<String> {
        let role = self.role.to_string();
        let root = self.workspace.root().display().to_string();
        vec![
            DOUBLE_RULE.to_string(),
            format!("{:^59}", self.loc.msg("shell-banner-title", &[])),
            DOUBLE_RULE.to_string(),
            String::new(),
            self.loc.msg("shell-banner-user", &[("user", &self.identity), ("role", &role)]),
            self.loc.msg("shell-banner-workspace", &[("workspace", &root)]),
            String::new(),
            self.loc.msg("shell-banner-hint", &[]),
            DOUBLE_RULE.to_string(),
        ]
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn recall_previous(&mut self) -> Option<&str> {
        self.cursor.previous(&self.history)
    }

    pub fn recall_next(&mut self) -> Option<&str> {
        self.cursor.next(&self.history)
    }

    /// Run one input line to completion.
    pub fn execute(&mut self, line: &str) -> Output {
        let entered = line.trim_end_matches(&['\r', '\n'][..]);
        let mut out = Output::default();
        match Command::parse(entered) {
            Ok(None) => return out,
            Ok(Some(cmd)) => self.dispatch(&cmd, &mut out),
            Err(ParseError::Unknown(verb)) => {
                out.lines.push(self.loc.msg("unknown-command", &[("verb", &verb)]));
                out.lines.push(self.loc.msg("unknown-hint", &[]));
            }
            Err(ParseError::MissingArgument { verb, usage }) => {
                out.lines.push(self.loc.msg("missing-argument", &[("verb", verb)]));
                out.lines.push(self.loc.msg("usage", &[("usage", usage)]));
            }
            Err(ParseError::UnexpectedArgument { verb, arg, usage }) => {
                out.lines.push(self.loc.msg("unexpected-argument", &[("verb", verb), ("arg", arg.as_str())]));
                out.lines.push(self.loc.msg("usage", &[("usage", usage)]));
            }
        }

        self.cursor.reset();
        self.history.push(entered.to_string());
        audit::emit(
            &*self.audit,
            AuditEvent::new(&self.identity, audit::SHELL_COMMAND, format!("Executed: {entered}")),
        );
        if out.cleared {
            self.transcript.clear();
        } else {
            self.transcript.push(format!("> {entered}"));
        }
        self.transcript.extend(out.lines.iter().cloned());
        out
    }

    /// End the session; records the close in the audit trail.
    pub fn close(self) {
        info!(user = %self.identity, commands = self.history.len(), "shell closed");
        audit::emit(
            &*self.audit,
            AuditEvent::new(&self.identity, audit::SHELL_CLOSE, "Closed shell emulator"),
        );
    }

    fn dispatch(&self, cmd: &Command, out: &mut Output) {
        let result = match cmd {
            Command::List { long: false } => self.ls(out),
            Command::List { long: true } => self.ls_long(out),
            Command::Cat(file) => self.cat(file, out),
            Command::Pwd => {
                let root = self.workspace.root();
                let shown = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
                out.lines.push(shown.display().to_string());
                Ok(())
            }
            Command::Crc32(file) => self.crc32(file, out),
            Command::ChunkCheck(name) => self.chunk_check(name, out),
            Command::Help => {
                self.help(out);
                Ok(())
            }
            Command::Clear => {
                out.cleared = true;
                out.lines.push(self.loc.msg("clear-done", &[]));
                Ok(())
            }
            Command::History => {
                self.list_history(out);
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!(command = cmd.verb(), error = %e, "shell command failed");
            out.lines.push(self.describe(&e, cmd));
        }
    }

    fn describe(&self, e: &Error, cmd: &Command) -> String {
        let file = cmd.argument().unwrap_or_default();
        match e {
            Error::PathEscape { .. } => self.loc.msg("err-path-escape", &[("file", file)]),
            Error::InvalidName { reason, .. } => {
                self.loc.msg("err-invalid-name", &[("file", file), ("reason", *reason)])
            }
            Error::NotFound(_) => self.loc.msg("err-not-found", &[("file", file)]),
            Error::NotRegularFile(_) => self.loc.msg("err-not-regular", &[("file", file)]),
            Error::AccessDenied { identity, .. } => {
                self.loc.msg("err-access-denied", &[("file", file), ("user", identity.as_str())])
            }
            Error::MalformedManifest { reason, .. } => {
                self.loc.msg("err-malformed", &[("file", file), ("reason", reason.as_str())])
            }
            Error::Busy { .. } => self.loc.msg("err-busy", &[("file", file)]),
            other => {
                let detail = other.to_string();
                self.loc.msg("err-failed", &[("command", cmd.verb()), ("detail", &detail)])
            }
        }
    }

    fn ls(&self, out: &mut Output) -> Result<()> {
        let entries = self.workspace.entries()?;
        if entries.is_empty() {
            out.lines.push(self.loc.msg("ls-empty", &[]));
        }
        out.lines.extend(entries.into_iter().map(|e| format!("  {}", e.name)));
        Ok(())
    }

    fn ls_long(&self, out: &mut Output) -> Result<()> {
        let entries = self.workspace.entries()?;
        out.lines.push(format!("{:<10} {:<20} {}", "SIZE", "MODIFIED", "NAME"));
        out.lines.push(RULE.to_string());
        for e in entries {
            let modified = e
                .modified
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            out.lines.push(format!("{:<10} {:<20} {}", e.size, modified, e.name));
        }
        Ok(())
    }

    fn cat(&self, file: &str, out: &mut Output) -> Result<()> {
        let path = self.workspace.resolve(file)?;
        require_regular(&path)?;
        let bytes = fs::read(&path).io_ctx("read", &path)?;
        let text = String::from_utf8_lossy(&bytes);
        out.lines.push(self.loc.msg("cat-header", &[("file", file)]));
        out.lines.push(text.strip_suffix('\n').unwrap_or(&text).to_string());
        out.lines.push(self.loc.msg("cat-footer", &[]));
        Ok(())
    }

    fn crc32(&self, file: &str, out: &mut Output) -> Result<()> {
        let path = self.workspace.resolve(file)?;
        let crc = checksum_file(&path)?.to_string();
        out.lines.push(self.loc.msg("crc32-result", &[("file", file), ("checksum", &crc)]));
        Ok(())
    }

    /// Manifest-driven when `<name>.meta.json` exists, otherwise a name-pattern scan.
    fn chunk_check(&self, name: &str, out: &mut Output) -> Result<()> {
        let meta = self.workspace.resolve_flat(&manifest::manifest_name(name))?;
        if !meta.is_file() {
            let files = chunk::find_chunk_files(&self.workspace, name)?;
            if files.is_empty() {
                out.lines.push(self.loc.msg("chunks-none", &[("name", name)]));
            } else {
                let count = files.len().to_string();
                out.lines.push(self.loc.msg("chunks-found", &[("count", &count), ("name", name)]));
                out.lines.extend(files.into_iter().map(|f| format!("  ✓ {f}")));
            }
            return Ok(());
        }

        let mf = manifest::load(&meta)?;
        if access::evaluate(&self.identity, self.role, &mf) == Decision::Denied {
            return Err(Error::AccessDenied {
                identity: self.identity.clone(),
                file: name.to_string(),
            });
        }
        let found = chunk::existence(&self.workspace, &mf)?;
        let present = found.iter().filter(|(_, ok)| *ok).count().to_string();
        let total = found.len().to_string();
        out.lines.push(self.loc.msg(
            "chunks-manifest",
            &[("present", &present), ("total", &total), ("name", name), ("owner", &mf.owner)],
        ));
        let missing = self.loc.msg("chunk-missing", &[]);
        for (chunk, ok) in found {
            out.lines.push(if ok { format!("  ✓ {chunk}") } else { format!("  ✗ {chunk} ({missing})") });
        }
        Ok(())
    }

    fn help(&self, out: &mut Output) {
        out.lines.push(DOUBLE_RULE.to_string());
        out.lines.push(format!("{:^59}", self.loc.msg("help-title", &[])));
        out.lines.push(DOUBLE_RULE.to_string());
        out.lines.push(String::new());
        for (usage, what) in VOCABULARY {
            out.lines.push(format!("  {usage:<20}- {what}"));
        }
        out.lines.push(String::new());
        out.lines.push(DOUBLE_RULE.to_string());
        out.lines.push(String::new());
        out.lines.push(self.loc.msg("help-note-confined", &[]));
        out.lines.push(self.loc.msg("help-note-outside", &[]));
    }

    fn list_history(&self, out: &mut Output) {
        if self.history.is_empty() {
            out.lines.push(self.loc.msg("history-empty", &[]));
            return;
        }
        out.lines.push(self.loc.msg("history-title", &[]));
        out.lines.push(RULE.to_string());
        for (i, cmd) in self.history.iter().enumerate() {
            out.lines.push(format!("{:>3}  {}", i + 1, cmd));
        }
    }
}

fn require_regular(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(md) if md.is_file() => Ok(()),
        Ok(_) => Err(Error::NotRegularFile(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(path.to_path_buf())),
        Err(e) => Err(Error::io("stat", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive_and_keeps_argument_case() {
        assert_eq!(Command::parse("  CAT  Notes.TXT ").unwrap(), Some(Command::Cat("Notes.TXT".into())));
        assert_eq!(Command::parse("Ls -l").unwrap(), Some(Command::List { long: true }));
        assert_eq!(Command::parse("ls").unwrap(), Some(Command::List { long: false }));
        assert_eq!(Command::parse("chunkcheck a").unwrap(), Some(Command::ChunkCheck("a".into())));
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Command::parse("rm x"), Err(ParseError::Unknown("rm".into())));
        assert_eq!(
            Command::parse("crc32"),
            Err(ParseError::MissingArgument { verb: "crc32", usage: "crc32 <filename>" })
        );
        for line in ["ls -a", "ls foo", "ls -l extra"] {
            assert!(
                matches!(Command::parse(line), Err(ParseError::UnexpectedArgument { verb: "ls", .. })),
                "{line}"
            );
        }
    }

    #[test]
    fn cursor_walks_back_and_forth_without_mutating() {
        let history: Vec<String> = ["ls", "pwd", "help"].iter().map(|s| s.to_string()).collect();
        let mut c = HistoryCursor::default();
        assert_eq!(c.next(&history), None);
        assert_eq!(c.previous(&history), Some("help"));
        assert_eq!(c.previous(&history), Some("pwd"));
        assert_eq!(c.previous(&history), Some("ls"));
        assert_eq!(c.previous(&history), Some("ls"));
        assert_eq!(c.next(&history), Some("pwd"));
        assert_eq!(c.next(&history), Some("help"));
        assert_eq!(c.next(&history), None);
        assert_eq!(c.previous(&history), Some("help"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn cursor_on_empty_history() {
        let mut c = HistoryCursor::default();
        assert_eq!(c.previous(&[]), None);
        assert_eq!(c.next(&[]), None);
    }
}
