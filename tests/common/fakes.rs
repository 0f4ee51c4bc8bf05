//! Fake collaborators and a throwaway server

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use bedrock_devserver::compiler::{
    CompileDiagnostic, CompileOutcome, CompileRequest, CompileSummary, Compiler, DiagnosticKind,
    SymbolListing,
};
use bedrock_devserver::desktop::{FileDialog, FolderOpener};
use bedrock_devserver::socket_server::frame::DEFAULT_MAX_PAYLOAD;
use bedrock_devserver::socket_server::{Dispatcher, FlagSnapshot, Listener, ListenerHandle};

/// Rejects unbalanced parentheses with a tokenizer error on the offending
/// line and records the flags each lint ran with.
#[derive(Default)]
pub struct FakeCompiler {
    pub lint_flags: Mutex<Vec<FlagSnapshot>>,
}

fn check(code: &str) -> Option<CompileDiagnostic> {
    let mut depth = 0i32;
    let mut last_line = 1;
    for (index, line) in code.lines().enumerate() {
        last_line = index as u32 + 1;
        for c in line.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Some(CompileDiagnostic::new(
                    last_line,
                    "unexpected ')'",
                    DiagnosticKind::Tokenizer,
                ));
            }
        }
    }
    (depth > 0).then(|| CompileDiagnostic::new(last_line, "unclosed '('", DiagnosticKind::Tokenizer))
}

impl Compiler for FakeCompiler {
    fn lint(
        &self,
        code: &str,
        flags: FlagSnapshot,
        _working_dir: Option<&Path>,
    ) -> bedrock_devserver::Result<CompileOutcome<SymbolListing>> {
        self.lint_flags.lock().push(flags);
        Ok(match check(code) {
            Some(diag) => CompileOutcome::Failed(vec![diag]),
            None => CompileOutcome::Success(SymbolListing {
                functions: vec!["main".to_string()],
                ..Default::default()
            }),
        })
    }

    fn compile(
        &self,
        request: &CompileRequest<'_>,
    ) -> bedrock_devserver::Result<CompileOutcome<CompileSummary>> {
        Ok(match check(request.code) {
            Some(diag) => CompileOutcome::Failed(vec![diag]),
            None => CompileOutcome::Success(CompileSummary::default()),
        })
    }
}

/// Returns preset paths; `None` reads as canceled.
#[derive(Default)]
pub struct FakeDialog {
    pub save_path: Mutex<Option<PathBuf>>,
    pub open_path: Mutex<Option<PathBuf>>,
}

impl FileDialog for FakeDialog {
    fn pick_save_path(&self, _suggested: Option<&Path>) -> Option<PathBuf> {
        self.save_path.lock().clone()
    }

    fn pick_open_path(&self, _start_dir: Option<&Path>) -> Option<PathBuf> {
        self.open_path.lock().clone()
    }
}

pub struct NoopOpener;

impl FolderOpener for NoopOpener {
    fn open(&self, _path: &Path) -> bedrock_devserver::Result<()> {
        Ok(())
    }
}

/// Listener on an ephemeral port, stopped on drop
pub struct TestServer {
    pub addr: SocketAddr,
    pub compiler: Arc<FakeCompiler>,
    pub dialog: Arc<FakeDialog>,
    handle: ListenerHandle,
    join: Option<JoinHandle<bedrock_devserver::Result<()>>>,
}

impl TestServer {
    pub fn start() -> Self {
        let compiler = Arc::new(FakeCompiler::default());
        let dialog = Arc::new(FakeDialog::default());
        let dispatcher = Dispatcher::new(compiler.clone(), dialog.clone(), Arc::new(NoopOpener));
        let listener =
            Listener::bind("127.0.0.1:0", dispatcher, DEFAULT_MAX_PAYLOAD).expect("bind");
        let (handle, join) = listener.spawn().expect("spawn listener");
        Self {
            addr: handle.local_addr(),
            compiler,
            dialog,
            handle,
            join: Some(join),
        }
    }

    pub fn stop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            join.join().expect("accept thread").expect("accept loop");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}
