//! Desktop integration: file pickers and opening folders.
//!
//! Both go through traits so the dispatcher can run headless in tests.
//! The shipped implementations shell out to whatever the platform offers.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, ServerError};

/// Modal file picker. `None` means the user canceled.
pub trait FileDialog: Send + Sync {
    fn pick_save_path(&self, suggested: Option<&Path>) -> Option<PathBuf>;
    fn pick_open_path(&self, start_dir: Option<&Path>) -> Option<PathBuf>;
}

/// Reveals a directory in the OS file manager.
pub trait FolderOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialogTool {
    Zenity,
    KDialog,
}

/// Picker backed by `zenity` or `kdialog`, whichever is installed.
///
/// With neither available every prompt reads as canceled.
#[derive(Debug, Clone)]
pub struct ZenityDialog {
    tool: Option<(DialogTool, PathBuf)>,
}

impl ZenityDialog {
    pub fn detect() -> Self {
        let tool = which::which("zenity")
            .map(|path| (DialogTool::Zenity, path))
            .or_else(|_| which::which("kdialog").map(|path| (DialogTool::KDialog, path)))
            .ok();
        if tool.is_none() {
            tracing::warn!("No file dialog tool found (zenity, kdialog); save/load prompts will cancel");
        }
        Self { tool }
    }

    fn run(&self, save: bool, start: Option<&Path>) -> Option<PathBuf> {
        let (tool, program) = self.tool.as_ref()?;
        let start = start.map(|p| p.display().to_string()).unwrap_or_default();
        let mut cmd = Command::new(program);
        match (tool, save) {
            (DialogTool::Zenity, true) => {
                cmd.args(["--file-selection", "--save", "--confirm-overwrite"]);
                if !start.is_empty() {
                    cmd.arg(format!("--filename={}", start));
                }
            }
            (DialogTool::Zenity, false) => {
                cmd.arg("--file-selection");
                if !start.is_empty() {
                    cmd.arg(format!("--filename={}/", start));
                }
            }
            (DialogTool::KDialog, true) => {
                cmd.arg("--getsavefilename").arg(&start);
            }
            (DialogTool::KDialog, false) => {
                cmd.arg("--getopenfilename").arg(&start);
            }
        }
        cmd.stdin(Stdio::null()).stderr(Stdio::null());

        let output = match cmd.output() {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Failed to run {}: {}", program.display(), e);
                return None;
            }
        };
        // Both tools exit non-zero on cancel.
        if !output.status.success() {
            return None;
        }
        let chosen = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if chosen.is_empty() {
            None
        } else {
            Some(PathBuf::from(chosen))
        }
    }
}

impl FileDialog for ZenityDialog {
    fn pick_save_path(&self, suggested: Option<&Path>) -> Option<PathBuf> {
        self.run(true, suggested)
    }

    fn pick_open_path(&self, start_dir: Option<&Path>) -> Option<PathBuf> {
        self.run(false, start_dir)
    }
}

/// Opens folders with the platform's default handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl SystemOpener {
    fn program() -> &'static str {
        if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        }
    }
}

impl FolderOpener for SystemOpener {
    fn open(&self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(ServerError::action(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        let program = Self::program();
        Command::new(program)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|mut child| {
                // Reap the handler once it exits.
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            })
            .map_err(|e| ServerError::action(format!("Failed to run {}: {}", program, e)))
    }
}
