//! Shared fixtures for the socket server unit tests.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::connection::{ConnectionContext, FrameSender};
use super::dispatch::Dispatcher;
use super::frame::{self, Frame, Opcode, DEFAULT_MAX_PAYLOAD};
use super::handshake;
use crate::compiler::{
    CompileDiagnostic, CompileOutcome, CompileRequest, CompileSummary, Compiler, DiagnosticKind,
    SymbolListing,
};
use crate::desktop::{FileDialog, FolderOpener};
use crate::error::{Result, ServerError};
use crate::socket_server::properties::FlagSnapshot;

/// In-memory socket write half
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encode frames the way a browser would: masked.
pub fn client_frames(frames: &[Frame]) -> Vec<u8> {
    frames
        .iter()
        .flat_map(|f| frame::encode(&f.clone().masked([0x37, 0xfa, 0x21, 0x3d])).unwrap())
        .collect()
}

/// Split server output into the handshake response and the frames after it.
pub fn decode_server_output(bytes: &[u8]) -> (String, Vec<Frame>) {
    let (response, mut rest) = if bytes.starts_with(b"HTTP/") {
        let end = handshake::find_request_end(bytes).unwrap();
        (String::from_utf8_lossy(&bytes[..end]).into_owned(), &bytes[end..])
    } else {
        (String::new(), bytes)
    };

    let mut frames = Vec::new();
    while !rest.is_empty() {
        let (frame, used) = frame::decode(rest, DEFAULT_MAX_PAYLOAD).unwrap();
        frames.push(frame);
        rest = &rest[used..];
    }
    (response, frames)
}

pub fn envelope(frame: &Frame) -> serde_json::Value {
    assert_eq!(frame.opcode, Opcode::Text);
    serde_json::from_slice(&frame.payload).unwrap()
}

/// All JSON messages written to `buf` so far.
pub fn messages(buf: &SharedBuf) -> Vec<serde_json::Value> {
    decode_server_output(&buf.contents())
        .1
        .iter()
        .filter(|f| f.opcode == Opcode::Text)
        .map(envelope)
        .collect()
}

/// Poll until a message with `action` shows up.
pub fn wait_for_action(buf: &SharedBuf, action: &str) -> Vec<serde_json::Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let all = messages(buf);
        if all.iter().any(|m| m["action"] == action) {
            return all;
        }
        assert!(Instant::now() < deadline, "no {} message in {:?}", action, all);
        std::thread::sleep(Duration::from_millis(10));
    }
}

pub fn decoded_text(message: &serde_json::Value) -> String {
    crate::socket_server::protocol::decode_b64("text", message["text"].as_str().unwrap()).unwrap()
}

/// Treats unbalanced parentheses as a tokenizer error and `var <name>`
/// lines as variable definitions.
#[derive(Default)]
pub struct FakeCompiler {
    pub lint_flags: Mutex<Vec<FlagSnapshot>>,
    pub compiled: Mutex<Vec<(String, Option<String>)>>,
}

pub fn check_parens(code: &str) -> Option<CompileDiagnostic> {
    let mut depth = 0i32;
    for (index, line) in code.lines().enumerate() {
        for c in line.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Some(CompileDiagnostic::new(
                    index as u32 + 1,
                    "unexpected ')'",
                    DiagnosticKind::Tokenizer,
                ));
            }
        }
    }
    if depth > 0 {
        let line = code.lines().count().max(1) as u32;
        return Some(CompileDiagnostic::new(line, "unclosed '('", DiagnosticKind::Tokenizer));
    }
    None
}

impl Compiler for FakeCompiler {
    fn lint(
        &self,
        code: &str,
        flags: FlagSnapshot,
        _working_dir: Option<&Path>,
    ) -> Result<CompileOutcome<SymbolListing>> {
        self.lint_flags.lock().push(flags);
        if code.contains("!!crash") {
            return Err(ServerError::action("compiler crashed"));
        }
        if let Some(diag) = check_parens(code) {
            return Ok(CompileOutcome::Failed(vec![diag]));
        }
        let variables = code
            .lines()
            .filter_map(|line| line.trim().strip_prefix("var "))
            .filter_map(|rest| rest.split_whitespace().next())
            .map(str::to_string)
            .collect();
        Ok(CompileOutcome::Success(SymbolListing {
            variables,
            ..Default::default()
        }))
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome<CompileSummary>> {
        self.compiled.lock().push((
            request.code.to_string(),
            request.project.map(str::to_string),
        ));
        if let Some(diag) = check_parens(request.code) {
            return Ok(CompileOutcome::Failed(vec![diag]));
        }
        Ok(CompileOutcome::Success(CompileSummary {
            files: vec!["functions/main.mcfunction".to_string()],
        }))
    }
}

/// Answers prompts from preset paths; `None` means canceled.
#[derive(Default)]
pub struct FakeDialog {
    pub save_path: Mutex<Option<PathBuf>>,
    pub open_path: Mutex<Option<PathBuf>>,
    pub save_prompts: Mutex<usize>,
    pub open_prompts: Mutex<Vec<Option<PathBuf>>>,
}

impl FileDialog for FakeDialog {
    fn pick_save_path(&self, _suggested: Option<&Path>) -> Option<PathBuf> {
        *self.save_prompts.lock() += 1;
        self.save_path.lock().clone()
    }

    fn pick_open_path(&self, start_dir: Option<&Path>) -> Option<PathBuf> {
        self.open_prompts.lock().push(start_dir.map(Path::to_path_buf));
        self.open_path.lock().clone()
    }
}

#[derive(Default)]
pub struct FakeOpener {
    pub opened: Mutex<Vec<PathBuf>>,
}

impl FolderOpener for FakeOpener {
    fn open(&self, path: &Path) -> Result<()> {
        self.opened.lock().push(path.to_path_buf());
        Ok(())
    }
}

pub struct Fixture {
    pub compiler: Arc<FakeCompiler>,
    pub dialog: Arc<FakeDialog>,
    pub opener: Arc<FakeOpener>,
    pub dispatcher: Dispatcher,
}

impl Fixture {
    pub fn new() -> Self {
        let compiler = Arc::new(FakeCompiler::default());
        let dialog = Arc::new(FakeDialog::default());
        let opener = Arc::new(FakeOpener::default());
        let dispatcher = Dispatcher::new(compiler.clone(), dialog.clone(), opener.clone());
        Self {
            compiler,
            dialog,
            opener,
            dispatcher,
        }
    }

    /// A connection context writing into a fresh buffer.
    pub fn context(&self) -> (ConnectionContext, SharedBuf) {
        let out = SharedBuf::default();
        let ctx = ConnectionContext {
            id: "conn_test".to_string(),
            sender: FrameSender::new(out.clone()),
            state: Arc::new(Mutex::new(self.dispatcher.new_state())),
        };
        (ctx, out)
    }
}

pub fn test_dispatcher() -> Dispatcher {
    Fixture::new().dispatcher
}
