//! Command-line front-end.
//!
//! ```text
//! duc <algorithm> <instance-dir> <demand-scale> <limit-scale> [careful]
//! ```
//!
//! `algorithm` is one of `tcuc-central`, `scuc-central`, `tcuc-isf`,
//! `scuc-isf`, `tcuc-theta`. Any clean stop (convergence, iteration cap,
//! time budget) exits 0 after emitting the summary record; uncaught errors
//! exit nonzero.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use duc_algo::admm::AdmmParams;
use duc_algo::central::{solve_central, solve_theta};
use duc_algo::driver::{run_decentralized, DecentralizedConfig, WorkerReport};
use duc_algo::partition::{normalize_boundary_demand, partition, PartitionConfig};
use duc_algo::screening::Violation;
use duc_algo::Algorithm;
use duc_core::{graph, GenId, UnitCommitmentInstance};
use duc_solver::SolverFactory;
use duc_io::{write_solutions, SolutionRecord};

#[derive(Parser, Debug)]
#[command(author, version, about = "Decentralized security-constrained unit commitment")]
struct Cli {
    /// Algorithm variant to run
    algorithm: String,

    /// Instance directory holding buses.csv, lines.csv, generators.csv
    instance: PathBuf,

    /// Demand scaling factor
    demand_scale: f64,

    /// Flow-limit scaling factor
    limit_scale: f64,

    /// Tighten solver tolerances
    #[arg(default_value_t = false)]
    careful: bool,

    /// Set the logging level
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Wall-clock budget in seconds
    #[arg(long, default_value_t = 900.0)]
    max_time: f64,

    /// ADMM iteration cap for the decentralized variants
    #[arg(long, default_value_t = 1000)]
    max_iterations: usize,

    /// Spinning-reserve fraction of demand
    #[arg(long, default_value_t = 0.0)]
    reserve: f64,

    /// Zone balance tolerance for the partitioner
    #[arg(long, default_value_t = 0.25)]
    balance_tolerance: f64,

    /// Link-matrix cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Solution CSV output path
    #[arg(long, default_value = "solution.csv")]
    out: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging already initialized");
    }

    if let Err(err) = run(&cli) {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let algorithm: Algorithm = cli.algorithm.parse()?;

    let mut instance = duc_io::read_instance(&cli.instance)
        .with_context(|| format!("loading instance from {}", cli.instance.display()))?;
    instance.scale_demand(cli.demand_scale);
    instance.scale_limits(cli.limit_scale);
    graph::require_connected(&instance)?;

    let factory = if cli.careful {
        SolverFactory::default().careful()
    } else {
        SolverFactory::default()
    };

    let variation = format!("d{:.2}_l{:.2}", cli.demand_scale, cli.limit_scale);
    info!(
        instance = %instance.name,
        algorithm = algorithm.as_str(),
        %variation,
        "starting run"
    );

    let (record, infeas, iterations, wall_time) = match algorithm {
        Algorithm::TcucCentral | Algorithm::ScucCentral => {
            let outcome = solve_central(
                &instance,
                true,
                algorithm.is_security(),
                cli.reserve,
                &factory,
                cli.max_time,
            )?;
            let record = central_record(&instance, &variation, &outcome);
            (record, 0.0, outcome.rounds, outcome.wall_time_secs)
        }
        Algorithm::TcucTheta => {
            let outcome = solve_theta(&instance, cli.reserve, &factory, cli.max_time)?;
            let uc = &outcome.uc;
            let sol = &outcome.solution;
            let record = record_from_handles(
                &instance,
                &variation,
                outcome.cost,
                |g, t| sol.value(uc.is_on[&(g, t)]),
                |g, t| sol.value(uc.prod[&(g, t)]),
                |g, t| sol.value(uc.reserve[&(g, t)]),
                |b, t| sol.value(uc.inj[&(b, t)]),
                &[],
            );
            (record, 0.0, 1, outcome.wall_time_secs)
        }
        Algorithm::TcucIsf | Algorithm::ScucIsf => {
            prepare_zones(&mut instance, cli, &factory)?;
            let config = DecentralizedConfig {
                security: algorithm.is_security(),
                reserve_fraction: cli.reserve,
                relax: false,
                admm: AdmmParams {
                    max_iterations: cli.max_iterations,
                    max_time_secs: cli.max_time,
                    ..AdmmParams::default()
                },
                cache_dir: cli.cache_dir.clone(),
            };
            let reports = run_decentralized(&instance, &factory, &config)?;
            let record = decentralized_record(&instance, &variation, &reports)?;
            let lead = &reports[0].admm;
            (record, lead.infeasibility, lead.iterations, lead.wall_time_secs)
        }
    };

    write_solutions(&cli.out, std::slice::from_ref(&record))
        .with_context(|| format!("writing {}", cli.out.display()))?;

    // Termination summary, one CSV record on stdout.
    let time_per_iter = wall_time / iterations.max(1) as f64;
    println!(
        "{},{},{},{},{},{},{:.4},{:.6},{},{:.2},{:.3}",
        instance.name,
        algorithm.as_str(),
        cli.demand_scale,
        cli.limit_scale,
        true,
        algorithm.is_security(),
        record.cost,
        infeas,
        iterations,
        wall_time,
        time_per_iter
    );
    Ok(())
}

/// Partition on the fly when the instance arrives unzoned; trust file
/// zones otherwise, after enforcing the zero-demand boundary invariant.
fn prepare_zones(
    instance: &mut UnitCommitmentInstance,
    cli: &Cli,
    factory: &SolverFactory,
) -> Result<()> {
    if instance.zone_ids().len() < 2 {
        let config = PartitionConfig::two_zones(instance.lines.len(), cli.balance_tolerance);
        let zones = partition(instance, &config, factory)?;
        info!(zones = zones.len(), "network partitioned");
    } else {
        normalize_boundary_demand(instance);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn record_from_handles(
    instance: &UnitCommitmentInstance,
    variation: &str,
    cost: f64,
    is_on: impl Fn(GenId, usize) -> f64,
    prod: impl Fn(GenId, usize) -> f64,
    reserve: impl Fn(GenId, usize) -> f64,
    inj: impl Fn(duc_core::BusId, usize) -> f64,
    violations: &[Violation],
) -> SolutionRecord {
    let horizon = instance.time_horizon;
    let series = |f: &dyn Fn(usize) -> f64| (0..horizon).map(f).collect::<Vec<_>>();
    SolutionRecord {
        instance: instance.name.clone(),
        variation: variation.to_string(),
        cost,
        is_on: instance
            .generators
            .iter()
            .map(|g| series(&|t| is_on(g.id, t)))
            .collect(),
        prod: instance
            .generators
            .iter()
            .map(|g| series(&|t| prod(g.id, t)))
            .collect(),
        reserve: instance
            .generators
            .iter()
            .map(|g| series(&|t| reserve(g.id, t)))
            .collect(),
        inj: instance
            .buses
            .iter()
            .map(|b| series(&|t| inj(b.id, t)))
            .collect(),
        violations: violations
            .iter()
            .filter(|v| v.time == 0)
            .map(|v| (v.monitored.value(), v.outage.value()))
            .collect(),
    }
}

fn central_record(
    instance: &UnitCommitmentInstance,
    variation: &str,
    outcome: &duc_algo::central::CentralOutcome,
) -> SolutionRecord {
    let uc = &outcome.subproblem.uc;
    let sol = &outcome.solution;
    record_from_handles(
        instance,
        variation,
        outcome.cost,
        |g, t| sol.value(uc.is_on[&(g, t)]),
        |g, t| sol.value(uc.prod[&(g, t)]),
        |g, t| sol.value(uc.reserve[&(g, t)]),
        |b, t| sol.value(uc.inj[&(b, t)]),
        &outcome.violations,
    )
}

/// Merge worker solutions: every generator and interior bus is owned by
/// exactly one zone; boundary buses inject nothing.
fn decentralized_record(
    instance: &UnitCommitmentInstance,
    variation: &str,
    reports: &[WorkerReport],
) -> Result<SolutionRecord> {
    let find_gen = |g: GenId, t: usize| -> Option<(usize, usize)> {
        reports
            .iter()
            .position(|r| r.subproblem.uc.is_on.contains_key(&(g, t)))
            .map(|i| (i, t))
    };

    let violations: Vec<Violation> = reports
        .iter()
        .flat_map(|r| r.violations.iter().cloned())
        .collect();

    let record = record_from_handles(
        instance,
        variation,
        reports[0].admm.objective,
        |g, t| {
            find_gen(g, t)
                .map(|(i, t)| reports[i].admm.solution.value(reports[i].subproblem.uc.is_on[&(g, t)]))
                .unwrap_or(0.0)
        },
        |g, t| {
            find_gen(g, t)
                .map(|(i, t)| reports[i].admm.solution.value(reports[i].subproblem.uc.prod[&(g, t)]))
                .unwrap_or(0.0)
        },
        |g, t| {
            find_gen(g, t)
                .map(|(i, t)| {
                    reports[i].admm.solution.value(reports[i].subproblem.uc.reserve[&(g, t)])
                })
                .unwrap_or(0.0)
        },
        |b, t| {
            // Interior buses live in exactly one worker; boundary buses
            // appear in several but inject exactly zero in all of them.
            reports
                .iter()
                .find(|r| r.subproblem.uc.inj.contains_key(&(b, t)))
                .map(|r| r.admm.solution.value(r.subproblem.uc.inj[&(b, t)]))
                .unwrap_or(0.0)
        },
        &violations,
    );
    Ok(record)
}
