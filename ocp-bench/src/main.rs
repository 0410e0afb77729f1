//! Command-line driver running the SQP solver on demo problems.

mod problems;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ocp_qp::{available_backends, BackendOptions, OptionValue};
use ocp_sqp::{RegularizationKind, SqpOptions, SqpSolver};
use tracing_subscriber::EnvFilter;

use problems::{ProblemChoice, ProblemConfig};

#[derive(Parser)]
#[command(name = "ocp-bench", about = "Solve demo optimal control problems with SQP")]
struct Cli {
    /// Problem to solve
    #[arg(long, value_enum, default_value_t = ProblemChoice::Pendulum)]
    problem: ProblemChoice,

    /// Number of shooting intervals
    #[arg(long, default_value_t = 40)]
    horizon: usize,

    /// Discretization step
    #[arg(long, default_value_t = 0.05)]
    dt: f64,

    /// Symmetric bound on every control
    #[arg(long)]
    u_max: Option<f64>,

    /// QP backend name
    #[arg(long)]
    solver: Option<String>,

    /// Maximum number of SQP iterations
    #[arg(long)]
    max_iter: Option<usize>,

    /// Tolerance applied to all four residuals
    #[arg(long)]
    tol: Option<f64>,

    /// Threads used for linearization
    #[arg(long)]
    threads: Option<usize>,

    /// Hessian regularization: none, mirror or project
    #[arg(long)]
    regularization: Option<RegularizationKind>,

    /// Eigenvalue floor of the regularization
    #[arg(long, default_value_t = 1e-4)]
    reg_epsilon: f64,

    /// Record QP residuals in the statistics table
    #[arg(long)]
    ext_qp_res: bool,

    /// SQP options as a JSON file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend options as a JSON object, e.g. '{"max_iter": 50}'
    #[arg(long = "options", value_name = "JSON")]
    qp_options: Option<String>,

    /// Extra option as key=value, e.g. qp.tol_gap=1e-9 (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// List the compiled-in QP backends and exit
    #[arg(long)]
    list_backends: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Parses a command-line option value; anything that isn't a JSON scalar is
/// taken as a string.
fn parse_value(raw: &str) -> OptionValue {
    serde_json::from_str::<OptionValue>(raw).unwrap_or_else(|_| OptionValue::Str(raw.to_string()))
}

fn build_options(cli: &Cli) -> Result<SqpOptions> {
    let mut opts = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<SqpOptions>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SqpOptions::default(),
    };

    if let Some(name) = &cli.solver {
        opts = opts.with_qp_solver(name);
    }
    if let Some(max_iter) = cli.max_iter {
        opts = opts.with_max_iter(max_iter);
    }
    if let Some(tol) = cli.tol {
        opts = opts.with_tolerance(tol);
    }
    if let Some(threads) = cli.threads {
        opts = opts.with_threads(threads);
    }
    if let Some(kind) = cli.regularization {
        opts = opts.with_regularization(kind, cli.reg_epsilon);
    }
    if cli.ext_qp_res {
        opts = opts.with_ext_qp_res(true);
    }
    if let Some(raw) = &cli.qp_options {
        let extra: BackendOptions = serde_json::from_str(raw).context("parsing --options")?;
        opts.qp_options.extend(extra);
    }
    for entry in &cli.set {
        let Some((key, raw)) = entry.split_once('=') else {
            bail!("expected KEY=VALUE, got '{entry}'");
        };
        opts.set(key.trim(), &parse_value(raw.trim()))?;
    }
    opts.validate()?;
    Ok(opts)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_backends {
        for name in available_backends() {
            println!("{name}");
        }
        return Ok(());
    }

    let cfg = ProblemConfig { horizon: cli.horizon, dt: cli.dt, u_max: cli.u_max };
    let nlp = problems::build(cli.problem, &cfg)?;
    let opts = build_options(&cli)?;

    println!("{}", "=".repeat(60));
    println!("{:?} (N = {}, dt = {})", cli.problem, cfg.horizon, cfg.dt);
    println!("{}", "=".repeat(60));
    println!("QP solver:        {}", opts.qp_solver);
    println!("Regularization:   {}", opts.regularization);
    println!("Threads:          {}", opts.num_threads);

    let mut solver = SqpSolver::new(nlp, opts)?;
    let status = solver.solve()?;
    let memory = solver.memory();

    println!("\n{}", memory.stats);
    println!("Status:           {status}");
    println!("SQP iterations:   {}", memory.sqp_iter);
    println!("Cost:             {:.6e}", memory.cost);
    println!(
        "Residuals:        stat {:.2e}  eq {:.2e}  ineq {:.2e}  comp {:.2e}",
        memory.residuals.stat, memory.residuals.eq, memory.residuals.ineq, memory.residuals.comp
    );
    println!("\n{}", memory.timings);

    if let Some(u0) = solver.controls().first() {
        println!("First control:    {:?}", u0.as_slice());
    }

    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_scalars() {
        assert_eq!(parse_value("true"), OptionValue::Bool(true));
        assert_eq!(parse_value("12"), OptionValue::Int(12));
        assert_eq!(parse_value("1e-9"), OptionValue::Float(1e-9));
        assert_eq!(parse_value("riccati"), OptionValue::Str("riccati".into()));
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "ocp-bench",
            "--max-iter",
            "7",
            "--tol",
            "1e-6",
            "--set",
            "step_length=0.5",
            "--options",
            r#"{"max_iter": 30}"#,
        ]);
        let opts = build_options(&cli).unwrap();
        assert_eq!(opts.max_iter, 7);
        assert_eq!(opts.tol_comp, 1e-6);
        assert_eq!(opts.step_length, 0.5);
        assert_eq!(opts.qp_options.get("max_iter"), Some(&OptionValue::Int(30)));
    }

    #[test]
    fn test_malformed_set_is_rejected() {
        let cli = Cli::parse_from(["ocp-bench", "--set", "max_iter"]);
        assert!(build_options(&cli).is_err());
    }
}
