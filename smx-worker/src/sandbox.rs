//! Timeout sandbox for stem isolation
//!
//! Separator backends can hang inside native code, so stem isolation runs in
//! a freshly spawned child process (a re-exec of this binary's hidden
//! `stem-worker` subcommand, clean state, no forked memory). The child runs
//! the tool runner and prints exactly one JSON result line on stdout; the
//! parent enforces a hard wall-clock budget and kills the child on expiry.

use serde::{Deserialize, Serialize};
use smx_common::{Error, Result, ToolType};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::tools;

/// Grace period for the child to exit after a kill.
const KILL_GRACE: Duration = Duration::from_secs(10);

/// The single result message the child posts on stdout.
#[derive(Debug, Serialize, Deserialize)]
struct SandboxResult {
    ok: bool,
    #[serde(default)]
    model: String,
    #[serde(default)]
    files: Vec<PathBuf>,
    #[serde(default)]
    error: Option<String>,
}

/// Arguments of the hidden `stem-worker` subcommand.
#[derive(Debug, clap::Args)]
pub struct StemWorkerArgs {
    #[arg(long)]
    pub tool: String,
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub output_dir: PathBuf,
    /// Tool params as a JSON object
    #[arg(long, default_value = "{}")]
    pub params: String,
}

/// Run a tool in an isolated child with a hard wall-clock bound.
///
/// On expiry the child is terminated (waited up to 10 s) and the call fails
/// with [`Error::Timeout`]. A child that exits without posting a result
/// fails with [`Error::WorkerExited`]; a posted failure becomes
/// [`Error::ToolFailure`].
pub async fn run_with_hard_timeout(
    tool: ToolType,
    input: &std::path::Path,
    output_dir: &std::path::Path,
    params: &serde_json::Map<String, serde_json::Value>,
    timeout_sec: u64,
) -> Result<(String, Vec<PathBuf>)> {
    let exe = worker_executable()?;
    let params_json = serde_json::to_string(params)
        .map_err(|e| Error::Internal(format!("params encode: {e}")))?;

    debug!(
        exe = %exe.display(),
        tool = %tool,
        timeout_sec = timeout_sec,
        "Spawning sandboxed tool child"
    );

    let mut child = Command::new(&exe)
        .arg("stem-worker")
        .arg("--tool")
        .arg(tool.as_str())
        .arg("--input")
        .arg(input)
        .arg("--output-dir")
        .arg(output_dir)
        .arg("--params")
        .arg(&params_json)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("sandbox child has no stdout".to_string()))?;

    match tokio::time::timeout(
        Duration::from_secs(timeout_sec),
        wait_for_result(&mut child, stdout),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_sec = timeout_sec, "Sandbox deadline expired, killing child");
            let _ = child.start_kill();
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                warn!("Sandbox child did not exit within the kill grace period");
            }
            Err(Error::Timeout(timeout_sec))
        }
    }
}

/// Read stdout lines until a result message appears or the child exits.
async fn wait_for_result(
    child: &mut Child,
    stdout: ChildStdout,
) -> Result<(String, Vec<PathBuf>)> {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await? {
            Some(line) => {
                let Ok(result) = serde_json::from_str::<SandboxResult>(&line) else {
                    // Not the protocol line; separator chatter is ignored
                    continue;
                };
                let _ = child.wait().await;
                return if result.ok {
                    Ok((result.model, result.files))
                } else {
                    Err(Error::ToolFailure(
                        result
                            .error
                            .unwrap_or_else(|| "processing_worker_failed".to_string()),
                    ))
                };
            }
            None => {
                let status = child.wait().await?;
                return Err(Error::WorkerExited(status.code()));
            }
        }
    }
}

/// Executable re-invoked as the sandbox child.
///
/// `SMX_WORKER_EXE` overrides the current executable (wrapper deployments,
/// test harnesses).
fn worker_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SMX_WORKER_EXE") {
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::current_exe()?)
}

/// Child-side entry point: run the tool, print the result line, return the
/// process exit code.
pub fn run_stem_worker(args: &StemWorkerArgs) -> i32 {
    let result = stem_worker_result(args);
    let line = serde_json::to_string(&result).unwrap_or_else(|_| {
        "{\"ok\":false,\"error\":\"result encoding failed\"}".to_string()
    });
    println!("{line}");
    if result.ok {
        0
    } else {
        1
    }
}

fn stem_worker_result(args: &StemWorkerArgs) -> SandboxResult {
    let run = || -> Result<(String, Vec<PathBuf>)> {
        let config = WorkerConfig::from_env()?;
        let tool: ToolType = args.tool.parse()?;
        let params: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&args.params)
                .map_err(|e| Error::Validation(format!("bad params JSON: {e}")))?;
        tools::run(&config, tool, &args.input, &args.output_dir, &params)
    };

    match run() {
        Ok((model, files)) => SandboxResult {
            ok: true,
            model,
            files,
            error: None,
        },
        Err(e) => SandboxResult {
            ok: false,
            model: String::new(),
            files: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}
