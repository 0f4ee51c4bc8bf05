//! External compiler front end.
//!
//! The devserver never tokenizes or compiles anything itself. `lint` and
//! `compile` requests are handed to a [`Compiler`]; the shipped
//! implementation runs the configured compiler executable with the source on
//! stdin and reads a JSON report from stdout:
//!
//! ```json
//! {"ok": true, "symbols": {"variables": ["x"], "functions": ["main"]}}
//! {"ok": false, "errors": [{"line": 3, "message": "unexpected ')'", "kind": "tokenizer"}]}
//! ```
//!
//! Executables that print plain text instead are understood as long as
//! their diagnostics look like `line <n>: <message>` on stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{CompilerConfig, OutputConfig};
use crate::error::{Result, ServerError};
use crate::socket_server::properties::FlagSnapshot;

// ============================================================================
// Core Types
// ============================================================================

/// Which compiler stage rejected the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Tokenizer,
    Statement,
    #[default]
    Runtime,
}

impl DiagnosticKind {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::Tokenizer => "TokenizerError",
            DiagnosticKind::Statement => "StatementError",
            DiagnosticKind::Runtime => "RuntimeError",
        }
    }
}

/// A structured compiler error with a source line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileDiagnostic {
    #[serde(default)]
    pub line: u32,
    pub message: String,
    #[serde(default)]
    pub kind: DiagnosticKind,
}

impl CompileDiagnostic {
    pub fn new(line: u32, message: impl Into<String>, kind: DiagnosticKind) -> Self {
        Self {
            line,
            message: message.into(),
            kind,
        }
    }

    /// Text shown to the user, e.g. `TokenizerError: unexpected ')'`
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind.label(), self.message)
    }
}

/// Names defined by a successfully linted program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolListing {
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub macros: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Summary of a successful compile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileSummary {
    /// Files written by the compiler
    #[serde(default)]
    pub files: Vec<String>,
}

/// Either the success artifact or the compiler's diagnostics.
///
/// Diagnostics are an expected outcome, not an `Err`: `Err` is reserved for
/// failures to run the compiler at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome<T> {
    Success(T),
    Failed(Vec<CompileDiagnostic>),
}

/// Inputs for a full compile
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub code: &'a str,
    pub project: Option<&'a str>,
    pub flags: FlagSnapshot,
    pub output: &'a OutputConfig,
    /// Directory relative includes resolve against
    pub working_dir: Option<&'a Path>,
}

/// The compiler front end as seen by the dispatcher
pub trait Compiler: Send + Sync {
    /// Check `code` without emitting files
    fn lint(
        &self,
        code: &str,
        flags: FlagSnapshot,
        working_dir: Option<&Path>,
    ) -> Result<CompileOutcome<SymbolListing>>;

    /// Run the full pipeline into the configured output directories
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome<CompileSummary>>;
}

// ============================================================================
// External process implementation
// ============================================================================

/// Runs the compiler as a child process
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    program: PathBuf,
    extra_args: Vec<String>,
}

#[derive(Debug, PartialEq, Deserialize)]
struct Report {
    ok: bool,
    #[serde(default)]
    symbols: Option<SymbolListing>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    errors: Vec<CompileDiagnostic>,
}

struct RawOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl ExternalCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            program: PathBuf::from(&config.command),
            extra_args: config.extra_args.clone(),
        }
    }

    fn flag_args(flags: FlagSnapshot) -> Vec<String> {
        let mut args = Vec::new();
        if flags.debug {
            args.push("--debug".to_string());
        }
        if flags.decorate {
            args.push("--decorate".to_string());
        }
        if flags.export_all {
            args.push("--export-all".to_string());
        }
        args
    }

    fn run(&self, args: &[String], code: &str, working_dir: Option<&Path>) -> Result<RawOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).args(&self.extra_args).arg("-");
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running {} {:?}", self.program.display(), args);
        let mut child = cmd.spawn().map_err(|e| {
            ServerError::action(format!("Failed to run {}: {}", self.program.display(), e))
        })?;

        // Feed stdin from another thread so a chatty compiler cannot
        // deadlock against a full stdout pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let code = code.to_string();
            std::thread::spawn(move || {
                let _ = stdin.write_all(code.as_bytes());
            })
        });

        let output = child.wait_with_output().map_err(|e| {
            ServerError::action(format!("{} did not finish: {}", self.program.display(), e))
        })?;
        if let Some(handle) = writer {
            let _ = handle.join();
        }

        Ok(RawOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

impl Compiler for ExternalCompiler {
    fn lint(
        &self,
        code: &str,
        flags: FlagSnapshot,
        working_dir: Option<&Path>,
    ) -> Result<CompileOutcome<SymbolListing>> {
        let mut args = vec!["lint".to_string(), "--lint-only".to_string()];
        args.extend(Self::flag_args(flags));
        let raw = self.run(&args, code, working_dir)?;
        Ok(match parse_report(&raw) {
            CompileOutcome::Success(report) => {
                CompileOutcome::Success(report.symbols.unwrap_or_default())
            }
            CompileOutcome::Failed(errors) => CompileOutcome::Failed(errors),
        })
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome<CompileSummary>> {
        let mut args = vec!["compile".to_string()];
        args.extend(Self::flag_args(request.flags));
        if let Some(dir) = &request.output.behavior_pack {
            args.push("--behavior-pack".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(dir) = &request.output.resource_pack {
            args.push("--resource-pack".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(project) = request.project.filter(|p| !p.is_empty()) {
            args.push("--project".to_string());
            args.push(project.to_string());
        }
        let raw = self.run(&args, request.code, request.working_dir)?;
        Ok(match parse_report(&raw) {
            CompileOutcome::Success(report) => CompileOutcome::Success(CompileSummary {
                files: report.files,
            }),
            CompileOutcome::Failed(errors) => CompileOutcome::Failed(errors),
        })
    }
}

// ============================================================================
// Output Parsing
// ============================================================================

static LINE_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)line\s+(\d+)\s*:\s*(.+)$").expect("diagnostic pattern is valid")
});

/// Interpret compiler output as a report.
fn parse_report(raw: &RawOutput) -> CompileOutcome<Report> {
    if let Ok(report) = serde_json::from_str::<Report>(raw.stdout.trim()) {
        if report.ok {
            return CompileOutcome::Success(report);
        }
        if !report.errors.is_empty() {
            return CompileOutcome::Failed(report.errors);
        }
        return CompileOutcome::Failed(vec![CompileDiagnostic::new(
            0,
            "compiler reported failure without diagnostics",
            DiagnosticKind::Runtime,
        )]);
    }

    let scraped = scrape_diagnostics(&raw.stderr);
    if !scraped.is_empty() {
        return CompileOutcome::Failed(scraped);
    }

    if raw.success {
        return CompileOutcome::Success(Report {
            ok: true,
            symbols: None,
            files: Vec::new(),
            errors: Vec::new(),
        });
    }

    let message = raw
        .stderr
        .lines()
        .chain(raw.stdout.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("compiler exited with an error")
        .to_string();
    CompileOutcome::Failed(vec![CompileDiagnostic::new(
        0,
        message,
        DiagnosticKind::Runtime,
    )])
}

/// Pull `line <n>: <message>` diagnostics out of plain-text output.
fn scrape_diagnostics(text: &str) -> Vec<CompileDiagnostic> {
    text.lines()
        .filter_map(|line| {
            let caps = LINE_DIAGNOSTIC.captures(line)?;
            let line_num = caps.get(1)?.as_str().parse().ok()?;
            let message = caps.get(2)?.as_str().trim();
            let kind = if line.contains("Tokenizer") {
                DiagnosticKind::Tokenizer
            } else if line.contains("Statement") {
                DiagnosticKind::Statement
            } else {
                DiagnosticKind::Runtime
            };
            Some(CompileDiagnostic::new(line_num, message, kind))
        })
        .collect()
}
