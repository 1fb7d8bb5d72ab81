use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

use crate::error::HarnessError;
use crate::files::{ensure_dir, read_log};
use crate::inputs::{Host, HostInputs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCommand {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl ExecutorCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("empty runtime command"))?;
        Ok(Self {
            program: program.to_string(),
            leading_args: parts.map(|p| p.to_string()).collect(),
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    fn host_args(&self, host: &Host, input: &Path, artifact: &Path) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push("run".to_string());
        args.push(host.to_string());
        args.push("--input".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push(artifact.to_string_lossy().to_string());
        args
    }

    pub fn display_for(&self, host: &Host, input: &Path, artifact: &Path) -> String {
        std::iter::once(self.program.clone())
            .chain(self.host_args(host, input, artifact))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command_for(&self, host: &Host, input: &Path, artifact: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.host_args(host, input, artifact));
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    Buffer,
    /// Redirected straight into the file, which is read back after exit.
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Report failed hosts and return every host's outcome.
    Tolerate,
    /// Join every host, then fail with the first failed host.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLog {
    pub host: Host,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct HostOutcome {
    pub log: HostLog,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
}

impl HostOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn status_label(&self) -> String {
        status_label(self.exit_code)
    }
}

pub(crate) fn status_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

struct Launched {
    host: Host,
    child: Child,
    drain: Option<JoinHandle<io::Result<Vec<u8>>>>,
    capture: CaptureTarget,
}

fn spawn_drain<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        Ok(bytes)
    })
}

fn launch(
    executor: &ExecutorCommand,
    host: &Host,
    input: &Path,
    artifact: &Path,
    capture: CaptureTarget,
) -> Result<Launched> {
    let mut cmd = executor.command_for(host, input, artifact);
    info!("{}", executor.display_for(host, input, artifact));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(io::stderr()));
    match &capture {
        CaptureTarget::Buffer => {
            cmd.stderr(Stdio::piped());
        }
        CaptureTarget::File(path) => {
            if let Some(parent) = path.parent() {
                ensure_dir(parent)?;
            }
            let file = fs::File::create(path)
                .with_context(|| format!("creating log {}", path.display()))?;
            cmd.stderr(Stdio::from(file));
        }
    }
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {} for host {}", executor.program, host))?;
    let drain = child.stderr.take().map(spawn_drain);
    Ok(Launched {
        host: host.clone(),
        child,
        drain,
        capture,
    })
}

fn collect(launched: Launched) -> Result<HostOutcome> {
    let Launched {
        host,
        mut child,
        drain,
        capture,
    } = launched;
    let waited: io::Result<ExitStatus> = child.wait();
    let drained = drain.map(|handle| {
        handle
            .join()
            .map_err(|_| anyhow!("log drain for host {} panicked", host))
    });
    let status = waited.with_context(|| format!("waiting for host {}", host))?;

    let (text, log_path) = match capture {
        CaptureTarget::Buffer => {
            let bytes = match drained {
                Some(joined) => joined?.with_context(|| format!("reading log of host {}", host))?,
                None => Vec::new(),
            };
            (String::from_utf8_lossy(&bytes).into_owned(), None)
        }
        CaptureTarget::File(path) => (read_log(&path)?, Some(path)),
    };
    Ok(HostOutcome {
        log: HostLog { host, text },
        exit_code: status.code(),
        log_path,
    })
}

/// Runs `artifact` once on every host in `inputs` concurrently.
///
/// Every host is started before any is waited on, and a buffered log gets its
/// own drain thread so no host stalls on a full pipe. All processes are joined
/// before this returns, whatever happens to any of them. Outcomes come back in
/// host order.
pub fn run_host_group<F>(
    executor: &ExecutorCommand,
    artifact: &Path,
    inputs: &HostInputs,
    mut capture_for: F,
    policy: FailurePolicy,
) -> Result<Vec<HostOutcome>>
where
    F: FnMut(&Host) -> CaptureTarget,
{
    let mut launched = Vec::with_capacity(inputs.len());
    for (host, input) in inputs {
        match launch(executor, host, input, artifact, capture_for(host)) {
            Ok(l) => launched.push(l),
            Err(err) => {
                for mut started in launched {
                    let _ = started.child.kill();
                    let _ = started.child.wait();
                    if let Some(handle) = started.drain.take() {
                        let _ = handle.join();
                    }
                }
                return Err(err);
            }
        }
    }

    let mut outcomes = Vec::with_capacity(launched.len());
    let mut first_error = None;
    for l in launched {
        match collect(l) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    for outcome in outcomes.iter().filter(|o| !o.success()) {
        error!(
            "process for {} failed with status {}:\n{}",
            outcome.log.host,
            outcome.status_label(),
            outcome.log.text
        );
    }
    if policy == FailurePolicy::Abort {
        if let Some(failed) = outcomes.iter().find(|o| !o.success()) {
            return Err(HarnessError::HostFailed {
                host: failed.log.host.to_string(),
                status: failed.status_label(),
            }
            .into());
        }
    }
    Ok(outcomes)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::files::scratch_dir;

    #[test]
    fn status_labels_name_signals() {
        assert_eq!(status_label(Some(3)), "3");
        assert_eq!(status_label(None), "signal");
    }

    const FAKE_RUNTIME: &str = r#"
case "$1" in
  bob) echo "bob refuses" >&2; exit 3 ;;
esac
echo "stdout chatter for $1"
echo "Runtime - bytes sent to host peer: 10" >&2
echo "Runtime - bytes received from host peer: 20" >&2
echo "input was $(cat "$3")" >&2
echo "Interpreter - finished interpretation, total running time: 7ms" >&2
"#;

    fn sh(script: &str) -> ExecutorCommand {
        ExecutorCommand::new("sh").arg("-c").arg(script)
    }

    fn three_hosts(root: &Path) -> HostInputs {
        ["alice", "bob", "chuck"]
            .iter()
            .map(|h| {
                let path = root.join(format!("{}.txt", h));
                fs::write(&path, format!("{}-secret", h)).expect("input");
                (Host::new(*h), path)
            })
            .collect()
    }

    #[test]
    fn failed_host_does_not_stop_collection() {
        let root = scratch_dir("group_tolerate");
        let inputs = three_hosts(&root);
        let outcomes = run_host_group(
            &sh(FAKE_RUNTIME),
            Path::new("prog.via"),
            &inputs,
            |_| CaptureTarget::Buffer,
            FailurePolicy::Tolerate,
        )
        .expect("group");

        assert_eq!(outcomes.len(), 3);
        let hosts: Vec<&str> = outcomes.iter().map(|o| o.log.host.as_str()).collect();
        assert_eq!(hosts, vec!["alice", "bob", "chuck"]);
        assert!(outcomes[0].success());
        assert!(outcomes[0].log.text.contains("input was alice-secret"));
        assert!(!outcomes[0].log.text.contains("stdout chatter"));
        assert_eq!(outcomes[1].exit_code, Some(3));
        assert!(outcomes[1].log.text.contains("bob refuses"));
        assert!(outcomes[2].success());
        assert!(outcomes[2].log.text.contains("total running time: 7ms"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn abort_policy_names_the_failed_host() {
        let root = scratch_dir("group_abort");
        let inputs = three_hosts(&root);
        let logs = root.join("logs");
        let err = run_host_group(
            &sh(FAKE_RUNTIME),
            Path::new("prog.via"),
            &inputs,
            |host| CaptureTarget::File(logs.join(format!("{}.log", host))),
            FailurePolicy::Abort,
        )
        .expect_err("bob fails");
        match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::HostFailed { host, status }) => {
                assert_eq!(host, "bob");
                assert_eq!(status, "3");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Every host ran to completion and left its log behind.
        let chuck = fs::read_to_string(logs.join("chuck.log")).expect("chuck log");
        assert!(chuck.contains("total running time: 7ms"));
        let bob = fs::read_to_string(logs.join("bob.log")).expect("bob log");
        assert!(bob.contains("bob refuses"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn file_capture_is_read_back() {
        let root = scratch_dir("group_file");
        let mut inputs = three_hosts(&root);
        inputs.remove(&Host::new("bob"));
        let logs = root.join("logs");
        let outcomes = run_host_group(
            &sh(FAKE_RUNTIME),
            Path::new("prog.via"),
            &inputs,
            |host| CaptureTarget::File(logs.join(format!("{}.log", host))),
            FailurePolicy::Abort,
        )
        .expect("group");
        for outcome in &outcomes {
            let path = outcome.log_path.as_ref().expect("log path");
            assert_eq!(fs::read_to_string(path).expect("log"), outcome.log.text);
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn large_outputs_do_not_deadlock() {
        let root = scratch_dir("group_large");
        let inputs = three_hosts(&root);
        let script = "head -c 300000 /dev/zero | tr '\\0' x >&2; echo done >&2";
        let outcomes = run_host_group(
            &sh(script),
            Path::new("prog.via"),
            &inputs,
            |_| CaptureTarget::Buffer,
            FailurePolicy::Abort,
        )
        .expect("group");
        for outcome in outcomes {
            assert_eq!(outcome.log.text.len(), 300000 + "done\n".len());
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let root = scratch_dir("group_spawn");
        let inputs = three_hosts(&root);
        let err = run_host_group(
            &ExecutorCommand::new("/nonexistent/bench-runtime"),
            Path::new("prog.via"),
            &inputs,
            |_| CaptureTarget::Buffer,
            FailurePolicy::Tolerate,
        )
        .expect_err("spawn");
        assert!(err.to_string().contains("spawning"), "unexpected: {}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn command_line_layout() {
        let executor = ExecutorCommand::parse("java -jar viaduct.jar").expect("parse").arg("-v");
        assert_eq!(
            executor.display_for(&Host::new("alice"), Path::new("in/a.txt"), Path::new("b/M.via")),
            "java -jar viaduct.jar -v run alice --input in/a.txt b/M.via"
        );
        assert!(ExecutorCommand::parse("   ").is_err());
    }
}
