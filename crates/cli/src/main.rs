// # -----------------------------
// # crates/cli/src/main.rs
// # -----------------------------
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pp_common::{AttestationMode, EnvSnapshot, PpError, Session};
use pp_proposer::OpenAiCompatProposer;

#[derive(Parser, Debug)]
#[command(name = "pp", version, about = "Policy-governed proving engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute one ad-hoc verification target under the attempt loop.
    Run {
        cmd: String,
        /// Run the command unshelled with these argv tokens instead of `sh -c cmd`.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        argv: Option<Vec<String>>,
        #[arg(long, default_value = "policy.json")]
        policy: PathBuf,
        #[arg(long, default_value = ".")]
        artifact_dir: PathBuf,
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run every `policy.proof_targets[*]`.
    Prove {
        #[arg(long, default_value = "policy.json")]
        policy: PathBuf,
        #[arg(long, default_value = ".")]
        artifact_dir: PathBuf,
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Reconstruct a sandbox from a bundle and rerun its proof targets.
    Replay {
        bundle_path: PathBuf,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long = "verify-attestation")]
        verify_attestation: bool,
        #[arg(long)]
        json: bool,
    },
    /// Sign a bundle (spec §4.H "Sign").
    Attest {
        bundle_path: PathBuf,
        #[arg(long, default_value = "hmac-sha256")]
        mode: String,
        #[arg(long = "key-env")]
        key_env: String,
    },
    /// Verify a bundle's attestation (spec §4.H "Verify").
    VerifyAttestation { bundle_path: PathBuf },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("PP_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    std::process::exit(run().await);
}

/// Exit codes per spec §6: 0 all pass, 1 at least one fail, 2 policy
/// violation / invalid input, 3 attestation mismatch, 4 internal error.
async fn run() -> i32 {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            cmd,
            argv,
            policy,
            artifact_dir,
            workspace,
            provider,
            json,
        } => {
            let policy = match pp_common::config::load_policy(&policy) {
                Ok(p) => p,
                Err(e) => return fail(&e),
            };
            let env_snapshot = EnvSnapshot::capture(policy.attestation.key_env.as_deref());
            let provider = provider.unwrap_or_else(|| env_snapshot.provider.clone());
            let proposer = match OpenAiCompatProposer::from_env(&env_snapshot) {
                Ok(p) => p,
                Err(e) => return fail(&e),
            };
            match pp_orchestrator::run_adhoc(
                &workspace,
                &artifact_dir,
                &policy,
                &cmd,
                argv,
                &proposer,
                &env_snapshot,
                &provider,
            )
            .await
            {
                Ok(output) => report_session(&output.session, &output.bundle_dir, json),
                Err(e) => fail(&e),
            }
        }
        Commands::Prove {
            policy,
            artifact_dir,
            workspace,
            provider,
            json,
        } => {
            let policy = match pp_common::config::load_policy(&policy) {
                Ok(p) => p,
                Err(e) => return fail(&e),
            };
            let env_snapshot = EnvSnapshot::capture(policy.attestation.key_env.as_deref());
            let provider = provider.unwrap_or_else(|| env_snapshot.provider.clone());
            let proposer = match OpenAiCompatProposer::from_env(&env_snapshot) {
                Ok(p) => p,
                Err(e) => return fail(&e),
            };
            match pp_orchestrator::prove_all(
                &workspace,
                &artifact_dir,
                &policy,
                &proposer,
                &env_snapshot,
                &provider,
            )
            .await
            {
                Ok(outputs) => report_prove(&outputs, json),
                Err(e) => fail(&e),
            }
        }
        Commands::Replay {
            bundle_path,
            cwd,
            verify_attestation,
            json,
        } => replay(&bundle_path, cwd, verify_attestation, json),
        Commands::Attest {
            bundle_path,
            mode,
            key_env,
        } => attest(&bundle_path, &mode, &key_env),
        Commands::VerifyAttestation { bundle_path } => verify_attestation_cmd(&bundle_path),
    }
}

fn report_session(session: &Session, bundle_dir: &std::path::Path, json: bool) -> i32 {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "session_id": session.session_id,
                "result": session.result,
                "attempts_used": session.attempts_used(),
                "bundle_dir": bundle_dir,
            }))
            .unwrap()
        );
    } else {
        println!("session {}: {:?}", session.session_id, session.result);
        println!("bundle written to {}", bundle_dir.display());
    }
    match session.result {
        pp_common::ResultKind::Pass => 0,
        _ => 1,
    }
}

fn report_prove(outputs: &[pp_orchestrator::RunSessionOutput], json: bool) -> i32 {
    let all_pass = outputs
        .iter()
        .all(|o| o.session.result == pp_common::ResultKind::Pass);
    if json {
        let summaries: Vec<_> = outputs
            .iter()
            .map(|o| {
                serde_json::json!({
                    "session_id": o.session.session_id,
                    "result": o.session.result,
                    "bundle_dir": o.bundle_dir,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries).unwrap());
    } else {
        for o in outputs {
            println!(
                "{}: {:?} ({})",
                o.session.session_id,
                o.session.result,
                o.bundle_dir.display()
            );
        }
    }
    if all_pass {
        0
    } else {
        1
    }
}

fn replay(
    bundle_path: &std::path::Path,
    cwd: Option<PathBuf>,
    verify_attestation: bool,
    json: bool,
) -> i32 {
    let repro_text = match std::fs::read_to_string(bundle_path.join("repro.json")) {
        Ok(s) => s,
        Err(e) => return fail(&PpError::Io(e)),
    };
    let repro: serde_json::Value = match serde_json::from_str(&repro_text) {
        Ok(v) => v,
        Err(e) => return fail(&PpError::InvalidConfig(e.to_string())),
    };
    let recorded_root = repro
        .get("workspace_root")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let source_root = match cwd.or(recorded_root) {
        Some(p) => p,
        None => {
            eprintln!("error: no --cwd given and repro.json has no workspace_root");
            return pp_common::ErrorKind::InvalidConfig.exit_code();
        }
    };

    let dest = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => return fail(&PpError::Io(e)),
    };
    let key = match attestation_key(bundle_path) {
        Ok(k) => k,
        Err(e) => return fail(&e),
    };
    let outcome = match pp_bundle::replay_bundle(
        bundle_path,
        &source_root,
        dest.path(),
        verify_attestation,
        key.as_deref(),
    ) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };
    let all_pass = outcome.all_passed();
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome).unwrap());
    } else {
        println!("sandbox: {}", outcome.sandbox_path.display());
        for t in &outcome.targets {
            println!(
                "  {}: {} (exit_code={} timed_out={})",
                t.name,
                if t.passed { "pass" } else { "fail" },
                t.exit_code,
                t.timed_out
            );
        }
    }
    // Keep the materialized sandbox around for inspection.
    let _ = dest.into_path();
    if all_pass {
        0
    } else {
        1
    }
}

fn attest(bundle_path: &std::path::Path, mode: &str, key_env: &str) -> i32 {
    let mode = match mode {
        "hmac-sha256" => AttestationMode::HmacSha256,
        "none" => AttestationMode::None,
        other => {
            eprintln!("error: unknown attestation mode: {other}");
            return pp_common::ErrorKind::InvalidConfig.exit_code();
        }
    };
    let key = std::env::var(key_env).ok();
    match pp_bundle::sign(bundle_path, mode, key.as_deref().map(str::as_bytes)) {
        Ok(_) => {
            println!("wrote {}", bundle_path.join("attestation.json").display());
            0
        }
        Err(e) => fail(&e),
    }
}

fn verify_attestation_cmd(bundle_path: &std::path::Path) -> i32 {
    let key = match attestation_key(bundle_path) {
        Ok(k) => k,
        Err(e) => return fail(&e),
    };
    match pp_bundle::verify(bundle_path, key.as_deref()) {
        Ok(()) => {
            println!("attestation OK");
            0
        }
        Err(e) => fail(&e),
    }
}

fn attestation_key(bundle_path: &std::path::Path) -> Result<Option<Vec<u8>>, PpError> {
    let text = std::fs::read_to_string(bundle_path.join("policy.json"))?;
    let policy: pp_common::Policy =
        serde_json::from_str(&text).map_err(|e| PpError::InvalidConfig(e.to_string()))?;
    Ok(policy
        .attestation
        .key_env
        .and_then(|name| std::env::var(name).ok())
        .map(String::into_bytes))
}

fn fail(e: &PpError) -> i32 {
    eprintln!("error: {e}");
    e.kind().exit_code()
}
