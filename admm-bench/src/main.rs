//! Command-line front end for the adaptive-ρ ADMM evaluator.

mod report;
mod rule_choice;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use admm_core::{load_candidate, AdmmSolver, Evaluator, HarnessConfig, PenaltyUpdateRule, ProblemInstance};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use report::{candidate_files, print_ranking, rank, save_json, BatchEntry};
use rule_choice::{certifier_for_choice, rule_for_choice, CertifierChoice, RuleChoice};

#[derive(Parser)]
#[command(name = "admm-eval")]
#[command(about = "Score adaptive-rho penalty rules on a fixed ADMM LASSO instance")]
struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one candidate and print the JSON result
    Evaluate {
        /// Candidate `.rho` file
        path: PathBuf,

        /// Attach diagnostics to converged results
        #[arg(long, env = "RICH_FEEDBACK", value_parser = parse_flag, num_args = 0..=1, default_value = "false", default_missing_value = "true")]
        rich_feedback: bool,

        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Certifier behind the formal gate
        #[arg(long, value_enum, default_value = "fixed-accept")]
        certifier: CertifierChoice,

        /// Also write the result to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run a built-in rule and print a convergence summary
    Solve {
        #[arg(long, value_enum, default_value = "reference")]
        rule: RuleChoice,

        #[arg(long, default_value = "0")]
        seed: u64,

        #[arg(long)]
        max_iters: Option<usize>,

        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Load and validate a candidate without running it
    Check {
        path: PathBuf,
    },

    /// Evaluate every `*.rho` file in a directory and rank them
    Batch {
        dir: PathBuf,

        #[arg(long, env = "RICH_FEEDBACK", value_parser = parse_flag, num_args = 0..=1, default_value = "false", default_missing_value = "true")]
        rich_feedback: bool,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "fixed-accept")]
        certifier: CertifierChoice,

        /// JSON summary path
        #[arg(long, default_value = "batch_results.json")]
        output: PathBuf,
    },
}

/// Accepts the usual spellings of a boolean, including the `1`/`0` used in
/// the environment.
fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).without_time())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
            HarnessConfig::from_json(&text).with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => HarnessConfig::default(),
    };
    config.evaluator.validate()?;
    Ok(config)
}

fn build_evaluator(
    config: Option<&Path>,
    rich_feedback: bool,
    certifier: CertifierChoice,
) -> Result<Evaluator> {
    let config = load_config(config)?;
    let certifier = certifier_for_choice(certifier, config.certifier.as_ref())?;
    let settings = config.evaluator.with_rich_feedback(rich_feedback);
    Ok(Evaluator::new(settings, certifier)?)
}

fn run_evaluate(
    path: &Path,
    rich_feedback: bool,
    config: Option<&Path>,
    certifier: CertifierChoice,
    output: Option<&Path>,
) -> Result<()> {
    let evaluator = build_evaluator(config, rich_feedback, certifier)?;
    let result = evaluator.evaluate(path);

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(output) = output {
        save_json(&result, output)?;
    }
    Ok(())
}

fn run_solve(
    rule: RuleChoice,
    seed: u64,
    max_iters: Option<usize>,
    config: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let mut settings = config.evaluator.with_seed(seed);
    if let Some(max_iters) = max_iters {
        settings.admm = settings.admm.with_max_iters(max_iters);
    }
    if verbose {
        settings.admm = settings.admm.verbose();
    }

    let instance = ProblemInstance::generate_with_shape(settings.seed, &settings.instance);
    let rule = rule_for_choice(rule);

    println!("Rule:     {}", rule.name());
    println!(
        "Instance: m={} d={} seed={} fingerprint={}",
        instance.num_samples(),
        instance.num_features(),
        instance.seed,
        &instance.fingerprint()[..16]
    );

    let start = Instant::now();
    let trace = AdmmSolver::new(&instance, &settings.admm)
        .run(rule.as_ref())
        .with_context(|| format!("Solve with rule {} failed", rule.name()))?;
    let elapsed = start.elapsed();

    let counts = trace.mode_counts();
    println!("{:-<60}", "");
    println!("Converged:  {}", trace.converged);
    println!("Iterations: {}", trace.iters);
    println!("Final r:    {:.3e}", trace.final_r_norm().unwrap_or(f64::NAN));
    println!("Final s:    {:.3e}", trace.final_s_norm().unwrap_or(f64::NAN));
    println!("Final rho:  {:.6}", trace.rho_hist.last().copied().unwrap_or(settings.admm.rho0));
    println!("rho var:    {:.6}", trace.rho_variance());
    println!(
        "Modes:      mul={} div={} keep={} other={}",
        counts.mul, counts.div, counts.keep, counts.other
    );
    println!("Time:       {:.1}ms", elapsed.as_secs_f64() * 1000.0);
    Ok(())
}

fn run_check(path: &Path) -> Result<()> {
    match load_candidate(path) {
        Ok(candidate) => {
            println!("{}: ok ({})", path.display(), candidate.rule.name());
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", err.traceback());
            Err(anyhow!("{}: {err}", path.display()))
        }
    }
}

fn run_batch(
    dir: &Path,
    rich_feedback: bool,
    config: Option<&Path>,
    certifier: CertifierChoice,
    output: &Path,
) -> Result<()> {
    let evaluator = build_evaluator(config, rich_feedback, certifier)?;
    let files = candidate_files(dir)?;
    println!("Evaluating {} candidates in {}", files.len(), dir.display());

    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let result = evaluator.evaluate(&path);
        tracing::info!(
            path = %path.display(),
            status = %result.status(),
            score = result.combined_score,
            iters = result.metrics.iters,
            "candidate evaluated"
        );
        entries.push(BatchEntry::new(path, &result));
    }

    rank(&mut entries);
    print_ranking(&entries);
    save_json(&entries, output)?;
    println!("Summary written to {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_logging(verbose);

    match cli.command {
        Commands::Evaluate {
            path,
            rich_feedback,
            config,
            certifier,
            output,
        } => run_evaluate(&path, rich_feedback, config.as_deref(), certifier, output.as_deref()),
        Commands::Solve {
            rule,
            seed,
            max_iters,
            config,
        } => run_solve(rule, seed, max_iters, config.as_deref(), verbose),
        Commands::Check { path } => run_check(&path),
        Commands::Batch {
            dir,
            rich_feedback,
            config,
            certifier,
            output,
        } => run_batch(&dir, rich_feedback, config.as_deref(), certifier, &output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_batch_logs_each_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let reference = Path::new(env!("CARGO_MANIFEST_DIR")).join("../candidates/reference.rho");
        fs::copy(&reference, dir.path().join("reference.rho")).unwrap();
        let output = dir.path().join("summary.json");

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            run_batch(dir.path(), false, None, CertifierChoice::FixedAccept, &output)
        })
        .unwrap();

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("candidate evaluated"), "{logs}");
        assert!(logs.contains("reference.rho"), "{logs}");
        assert!(logs.contains("CONVERGED"), "{logs}");
        assert!(output.exists());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Ok(true));
        assert_eq!(parse_flag("off"), Ok(false));
        assert!(parse_flag("maybe").is_err());
    }
}
