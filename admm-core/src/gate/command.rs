//! Certifier backed by external commands.
//!
//! Each stage is a program invoked once per call, with no retry. Text stages
//! (`translate`, `check`, `prove`) receive their input on stdin and answer on
//! stdout. The verifier receives the path of a proof file written under a
//! per-call unique name, and its exit status is the verdict.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{parse_check_output, Certifier, ConformanceReport, GateError, MathForm, ProofSource, ProofVerdict};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Program and leading arguments of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

fn default_proof_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_timeout_secs() -> u64 {
    120
}

/// Configuration of [`CommandCertifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCertifierConfig {
    pub translate: CommandSpec,
    pub check: CommandSpec,
    pub prove: CommandSpec,

    /// Verifier; the proof path is appended as the last argument
    pub verify: CommandSpec,

    /// Directory receiving generated proof files
    #[serde(default = "default_proof_dir")]
    pub proof_dir: PathBuf,

    /// Working directory of every stage
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Per-call timeout of the text stages, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

pub struct CommandCertifier {
    config: CommandCertifierConfig,
}

impl CommandCertifier {
    pub fn new(config: CommandCertifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandCertifierConfig {
        &self.config
    }

    fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn run_text_stage(&self, stage: &'static str, spec: &CommandSpec, input: &str) -> Result<String, GateError> {
        let output = run_with_timeout(
            stage,
            spec,
            &[],
            Some(input),
            self.config.working_dir.as_deref(),
            self.stage_timeout(),
        )?;
        if !output.status.success() {
            return Err(GateError::Failed {
                stage,
                status: output.status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Directory receiving proof files. A relative `proof_dir` is taken
    /// relative to `working_dir`, where the verifier runs.
    pub fn proof_dir(&self) -> PathBuf {
        match &self.config.working_dir {
            Some(dir) if self.config.proof_dir.is_relative() => dir.join(&self.config.proof_dir),
            _ => self.config.proof_dir.clone(),
        }
    }

    /// Write `proof` under a fresh `generated_prove_<8 hex>.lean` name.
    pub fn write_proof(&self, proof: &ProofSource) -> std::io::Result<PathBuf> {
        let dir = self.proof_dir();
        fs::create_dir_all(&dir)?;
        let id = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!("generated_prove_{}.lean", &id[..8]));
        fs::write(&path, &proof.0)?;
        Ok(path)
    }

    fn proof_arg(&self, path: &Path) -> String {
        let relative = self
            .config
            .working_dir
            .as_deref()
            .and_then(|dir| path.strip_prefix(dir).ok())
            .unwrap_or(path);
        relative.to_string_lossy().into_owned()
    }
}

impl Certifier for CommandCertifier {
    fn translate(&self, source: &str) -> Result<MathForm, GateError> {
        self.run_text_stage("translate", &self.config.translate, source)
            .map(MathForm)
    }

    fn check(&self, form: &MathForm) -> Result<ConformanceReport, GateError> {
        let text = self.run_text_stage("check", &self.config.check, &form.0)?;
        Ok(parse_check_output(&text))
    }

    fn prove(&self, form: &MathForm) -> Result<ProofSource, GateError> {
        self.run_text_stage("prove", &self.config.prove, &form.0)
            .map(ProofSource)
    }

    fn verify(&self, proof: &ProofSource, timeout: Duration) -> ProofVerdict {
        let path = match self.write_proof(proof) {
            Ok(path) => path,
            Err(err) => return ProofVerdict::TransportError(format!("failed to write proof: {err}")),
        };
        tracing::debug!(path = %path.display(), "proof written");

        let arg = self.proof_arg(&path);
        match run_with_timeout(
            "verify",
            &self.config.verify,
            &[arg.as_str()],
            None,
            self.config.working_dir.as_deref(),
            timeout,
        ) {
            Ok(output) if output.status.success() => ProofVerdict::Proven,
            Ok(output) => {
                tracing::debug!(status = %output.status, stderr = %output.stderr.trim(), "proof rejected");
                ProofVerdict::NotProven
            }
            Err(GateError::Timeout { .. }) => ProofVerdict::TimedOut,
            Err(err) => ProofVerdict::TransportError(err.to_string()),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle.and_then(|h| h.join().ok()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kill the child's whole process group so helpers it spawned die with it.
#[cfg(unix)]
fn kill(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: killpg only sends a signal; the group was created for this child
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `spec` with `extra_args` appended, feeding `stdin`, and wait at most
/// `timeout`. A child still running at the deadline is killed.
pub fn run_with_timeout(
    stage: &'static str,
    spec: &CommandSpec,
    extra_args: &[&str],
    stdin: Option<&str>,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, GateError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .args(extra_args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|source| GateError::Io { stage, source })?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_string();
            Some(thread::spawn(move || {
                // a child that exits without reading closes the pipe early
                let _ = pipe.write_all(input.as_bytes());
            }))
        }
        _ => None,
    };
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill(&mut child);
                // grandchildren may still hold the pipes; leave the readers detached
                return Err(GateError::Timeout { stage, timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                kill(&mut child);
                return Err(GateError::Io { stage, source });
            }
        }
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }

    Ok(CommandOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", &["-c", script])
    }

    fn certifier(dir: &Path, verify: CommandSpec) -> CommandCertifier {
        CommandCertifier::new(CommandCertifierConfig {
            translate: CommandSpec::new("cat", &[]),
            check: sh("cat >/dev/null; printf 'R1 ok\\nR6 violated\\nFalse\\n'"),
            prove: sh("cat >/dev/null; printf '```lean\\ntheorem t : True := trivial\\n```\\n'"),
            verify,
            proof_dir: dir.join("proofs"),
            working_dir: None,
            timeout_secs: 5,
        })
    }

    #[test]
    fn test_text_stages() {
        let dir = tempfile::tempdir().unwrap();
        let cert = certifier(dir.path(), sh("exit 0"));

        let form = cert.translate("rho_{k+1} = rho_k (1 + tau_k)").unwrap();
        assert_eq!(form.0, "rho_{k+1} = rho_k (1 + tau_k)");

        let report = cert.check(&form).unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.issues, vec!["R1 ok", "R6 violated"]);

        let proof = cert.prove(&form).unwrap();
        assert!(proof.0.contains("theorem t"));
    }

    #[test]
    fn test_failed_stage_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = certifier(dir.path(), sh("exit 0")).config().clone();
        config.translate = sh("echo oops >&2; exit 3");
        let cert = CommandCertifier::new(config);

        match cert.translate("x") {
            Err(GateError::Failed { stage, stderr, .. }) => {
                assert_eq!(stage, "translate");
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_verify_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let proof = ProofSource("theorem t : True := trivial".into());

        let ok = certifier(dir.path(), sh("test -f \"$0\""));
        assert_eq!(ok.verify(&proof, Duration::from_secs(5)), ProofVerdict::Proven);

        let bad = certifier(dir.path(), sh("exit 1"));
        assert_eq!(bad.verify(&proof, Duration::from_secs(5)), ProofVerdict::NotProven);
    }

    #[test]
    fn test_verify_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let cert = certifier(dir.path(), sh("sleep 5"));
        let start = Instant::now();
        let verdict = cert.verify(&ProofSource("x".into()), Duration::from_millis(200));
        assert_eq!(verdict, ProofVerdict::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_verify_spawn_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let cert = certifier(dir.path(), CommandSpec::new("/nonexistent/lean-verifier", &[]));
        let verdict = cert.verify(&ProofSource("x".into()), Duration::from_secs(1));
        assert!(matches!(verdict, ProofVerdict::TransportError(_)), "{verdict:?}");
    }

    #[test]
    fn test_proof_files_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let cert = certifier(dir.path(), sh("exit 0"));
        let proof = ProofSource("x".into());

        let a = cert.write_proof(&proof).unwrap();
        let b = cert.write_proof(&proof).unwrap();
        assert_ne!(a, b);
        for path in [&a, &b] {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("generated_prove_"), "{name}");
            assert!(name.ends_with(".lean"));
            assert_eq!(name.len(), "generated_prove_".len() + 8 + ".lean".len());
        }
    }

    #[test]
    fn test_proof_path_relative_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = certifier(dir.path(), sh("test -f \"$0\"")).config().clone();
        config.working_dir = Some(dir.path().to_path_buf());
        let cert = CommandCertifier::new(config);

        let path = dir.path().join("proofs").join("generated_prove_deadbeef.lean");
        assert_eq!(cert.proof_arg(&path), Path::new("proofs").join("generated_prove_deadbeef.lean").to_string_lossy());
        assert_eq!(
            cert.verify(&ProofSource("x".into()), Duration::from_secs(5)),
            ProofVerdict::Proven
        );
    }

    #[test]
    fn test_relative_proof_dir_lives_under_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = certifier(dir.path(), sh("test -f \"$0\"")).config().clone();
        config.proof_dir = PathBuf::from("proofs");
        config.working_dir = Some(dir.path().to_path_buf());
        let cert = CommandCertifier::new(config);

        assert_eq!(cert.proof_dir(), dir.path().join("proofs"));
        assert_eq!(
            cert.verify(&ProofSource("x".into()), Duration::from_secs(5)),
            ProofVerdict::Proven
        );

        let written: Vec<_> = fs::read_dir(dir.path().join("proofs")).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[cfg(target_os = "linux")]
    fn is_gone(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pidfile.display());

        let result = run_with_timeout("verify", &sh(&script), &[], None, None, Duration::from_millis(300));
        assert!(matches!(result, Err(GateError::Timeout { .. })), "{result:?}");

        let pid = fs::read_to_string(&pidfile).unwrap().trim().to_string();
        let deadline = Instant::now() + Duration::from_secs(3);
        while !is_gone(&pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(is_gone(&pid), "grandchild {pid} survived the timeout");
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: CommandCertifierConfig = serde_json::from_str(
            r#"{
                "translate": {"program": "translate-rule"},
                "check": {"program": "check-rule"},
                "prove": {"program": "prove-rule"},
                "verify": {"program": "lake", "args": ["env", "lean"]}
            }"#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.proof_dir, PathBuf::from("."));
        assert_eq!(config.verify.args, vec!["env", "lean"]);
        assert!(config.working_dir.is_none());
    }
}
