// # -----------------------------
// # crates/exec/src/lib.rs
// # -----------------------------
//! Command runner (spec §4.C): host-mode subprocess execution with timeout
//! enforcement and a sanitized environment, plus container-mode execution
//! via an external container runtime. Grounded on the teacher's
//! `devit-sandbox::run_shell_sandboxed_capture` (bash -lc, output capture)
//! and `devit-tools::shell::run`, generalized with a kill-on-timeout loop in
//! the style of `devit-cli::test_runner::run_impacted`'s `Instant`-based
//! polling.
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use pp_common::{is_secret_env_name, EnvSnapshot, Network, PpError, Result, SandboxCfg};
use pp_policy::prefers_unshelled;
use tracing::{info, warn};

const TAIL_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub duration_ms: u128,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn is_pass(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    pub fn stdout_tail(&self) -> String {
        tail(&self.stdout, TAIL_BYTES)
    }

    pub fn stderr_tail(&self) -> String {
        tail(&self.stderr, TAIL_BYTES)
    }
}

fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let start = s.len() - max_bytes;
    // Avoid splitting a UTF-8 char boundary.
    let mut start = start;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// Environment variables dropped before spawning the verification command
/// (spec §4.C, §6): every name in the live process environment that looks
/// like a secret, per `pp_common::is_secret_env_name`. The attestation key's
/// own env var name is whatever `policy.attestation.key_env` names; callers
/// pass that through `RunRequest::extra_env_to_drop` since this module
/// doesn't see the policy.
fn sanitized_envs(_snapshot: &EnvSnapshot) -> Vec<String> {
    std::env::vars()
        .map(|(name, _)| name)
        .filter(|name| is_secret_env_name(name))
        .collect()
}

pub struct RunRequest<'a> {
    pub cwd: &'a Path,
    pub cmd: &'a str,
    pub argv: Option<&'a [String]>,
    /// Resolved by the caller via [`should_run_unshelled`] against the
    /// session's policy (spec §4.C "Shell vs argv").
    pub unshelled: bool,
    pub timeout: Duration,
    pub env_snapshot: &'a EnvSnapshot,
    pub extra_env_to_drop: &'a [String],
}

fn build_command(req: &RunRequest<'_>) -> Command {
    let mut command = if req.unshelled {
        let argv = req.argv.expect("unshelled execution requires argv");
        let mut c = Command::new(&argv[0]);
        c.args(&argv[1..]);
        c
    } else if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", req.cmd]);
        c
    } else {
        let mut c = Command::new("bash");
        c.args(["-lc", req.cmd]);
        c
    };
    command.current_dir(req.cwd);
    for name in sanitized_envs(req.env_snapshot)
        .iter()
        .chain(req.extra_env_to_drop.iter())
    {
        command.env_remove(name);
    }
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    command
}

#[cfg(unix)]
fn prepare_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // New process group whose id equals the child's pid, so the whole
    // subtree can be killed together on timeout.
    command.process_group(0);
}

#[cfg(not(unix))]
fn prepare_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_group(child: &Child) {
    unsafe {
        libc::kill(-(child.id() as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(child: &Child) {
    let _ = child;
}

/// Run the target command in host mode, killing the whole process group if
/// it exceeds `req.timeout` (spec §4.C).
pub fn run_host(req: RunRequest<'_>) -> Result<ExecResult> {
    let mut command = build_command(&req);
    prepare_process_group(&mut command);

    let t0 = Instant::now();
    let mut child = command.spawn()?;
    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    let poll_interval = Duration::from_millis(50).min(req.timeout);
    let timed_out;
    loop {
        match child.try_wait()? {
            Some(_status) => {
                timed_out = false;
                break;
            }
            None => {
                if t0.elapsed() >= req.timeout {
                    warn!(cmd = req.cmd, "command timed out, killing process group");
                    kill_group(&child);
                    let _ = child.kill();
                    let _ = child.wait();
                    timed_out = true;
                    break;
                }
                std::thread::sleep(poll_interval);
            }
        }
    }

    use std::io::Read;
    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut h) = stdout_handle.take() {
        let _ = h.read_to_string(&mut stdout);
    }
    if let Some(mut h) = stderr_handle.take() {
        let _ = h.read_to_string(&mut stderr);
    }
    let exit_code = if timed_out {
        -1
    } else {
        child.wait()?.code().unwrap_or(-1)
    };
    info!(cmd = req.cmd, exit_code, timed_out, "verification command finished");

    Ok(ExecResult {
        exit_code,
        duration_ms: t0.elapsed().as_millis(),
        stdout,
        stderr,
        timed_out,
    })
}

/// Resolve whether to execute unshelled, given the policy (spec §4.C "Shell
/// vs argv"): unshelled is preferred when `allowed_argv` matches by vector
/// equality.
pub fn should_run_unshelled(policy: &pp_common::Policy, argv: Option<&[String]>) -> bool {
    argv.map(|a| prefers_unshelled(policy, a)).unwrap_or(false)
}

/// Invoke `container_runtime run --rm --workdir <container_workdir> -v
/// <sandbox>:<container_workdir>`, with `--network none` when the policy
/// denies network, and `--cpus`/`--memory` flags if configured.
pub fn run_container(
    sandbox_root: &Path,
    cmd: &str,
    sandbox_cfg: &SandboxCfg,
    network: Network,
    timeout: Duration,
) -> Result<ExecResult> {
    let runtime = sandbox_cfg
        .container_runtime
        .as_deref()
        .unwrap_or("docker");
    let workdir = sandbox_cfg.container_workdir.as_deref().unwrap_or("/work");
    let image = sandbox_cfg
        .container_image
        .as_deref()
        .ok_or_else(|| PpError::InvalidConfig("sandbox.container_image is required".into()))?;

    let mount = format!("{}:{}", sandbox_root.display(), workdir);
    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "--workdir".into(),
        workdir.into(),
        "-v".into(),
        mount,
    ];
    if matches!(network, Network::Deny) {
        args.push("--network".into());
        args.push("none".into());
    }
    if let Some(cpus) = &sandbox_cfg.cpu_limit {
        args.push("--cpus".into());
        args.push(cpus.clone());
    }
    if let Some(mem) = &sandbox_cfg.memory_limit {
        args.push("--memory".into());
        args.push(mem.clone());
    }
    args.push(image.to_string());
    args.push("bash".into());
    args.push("-lc".into());
    args.push(cmd.to_string());

    let t0 = Instant::now();
    let mut child = Command::new(runtime)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let timed_out;
    loop {
        match child.try_wait()? {
            Some(_) => {
                timed_out = false;
                break;
            }
            None => {
                if t0.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    timed_out = true;
                    break;
                }
                std::thread::sleep(Duration::from_millis(50).min(timeout));
            }
        }
    }
    use std::io::Read;
    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut h) = child.stdout.take() {
        let _ = h.read_to_string(&mut stdout);
    }
    if let Some(mut h) = child.stderr.take() {
        let _ = h.read_to_string(&mut stderr);
    }
    let exit_code = if timed_out { -1 } else { child.wait()?.code().unwrap_or(-1) };

    Ok(ExecResult {
        exit_code,
        duration_ms: t0.elapsed().as_millis(),
        stdout,
        stderr,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_common::{LocalEnv, OpenAiEnv};

    fn snapshot() -> EnvSnapshot {
        EnvSnapshot {
            provider: "openai".into(),
            openai: OpenAiEnv {
                api_key: None,
                base_url: None,
                model: None,
                max_tokens: None,
            },
            local: LocalEnv {
                base_url: None,
                model: None,
                timeout_sec: None,
                api_key: None,
            },
            attest_key: None,
        }
    }

    #[test]
    fn host_command_captures_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let req = RunRequest {
            cwd: dir.path(),
            cmd: "echo hello",
            argv: None,
            unshelled: false,
            timeout: Duration::from_secs(5),
            env_snapshot: &snapshot(),
            extra_env_to_drop: &[],
        };
        let result = run_host(req).unwrap();
        assert!(result.is_pass());
        assert!(result.stdout.contains("hello"));
    }

    #[test]
    fn host_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let req = RunRequest {
            cwd: dir.path(),
            cmd: "sleep 5",
            argv: None,
            unshelled: false,
            timeout: Duration::from_millis(200),
            env_snapshot: &snapshot(),
            extra_env_to_drop: &[],
        };
        let result = run_host(req).unwrap();
        assert!(result.timed_out);
        assert!(!result.is_pass());
    }

    #[test]
    fn tail_truncates_to_last_bytes() {
        let s = "a".repeat(200_000);
        let t = tail(&s, 64 * 1024);
        assert_eq!(t.len(), 64 * 1024);
    }
}
