//! Thread-per-zone orchestration of the decentralized solve.
//!
//! Sensitivity matrices and zone extraction are deterministic, so they run
//! once up front; each worker thread then owns one zonal subproblem and a
//! screening context and enters the sharing-ADMM loop against the team
//! communicator. All fallible setup happens before any thread starts, so
//! a worker can never abandon its teammates between collectives.

use std::path::PathBuf;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::info;

use duc_core::{DucError, DucResult, LocalCommunicator, SoloCommunicator, UnitCommitmentInstance, ZoneId};
use duc_solver::SolverFactory;

use crate::admm::{run_sharing_admm, AdmmParams, AdmmResult};
use crate::cache::LinkCache;
use crate::screening::{ScreeningContext, Violation};
use crate::sensitivity::{build_isf, build_lodf};
use crate::subproblem::{build_zonal_subproblem, ZonalSubproblem};
use crate::zones::extract_zones;

/// Configuration of a decentralized run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecentralizedConfig {
    /// Enforce N-1 security (scuc) instead of base-case limits only (tcuc).
    pub security: bool,
    /// Spinning-reserve fraction of zonal demand.
    pub reserve_fraction: f64,
    /// Solve linear relaxations instead of the mixed-integer subproblems.
    pub relax: bool,
    pub admm: AdmmParams,
    /// Root of the link-matrix cache; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

impl Default for DecentralizedConfig {
    fn default() -> Self {
        Self {
            security: false,
            reserve_fraction: 0.0,
            relax: false,
            admm: AdmmParams::default(),
            cache_dir: None,
        }
    }
}

/// One worker's view of the finished run.
pub struct WorkerReport {
    pub zone: ZoneId,
    pub subproblem: ZonalSubproblem,
    pub admm: AdmmResult,
    pub violations: Vec<Violation>,
}

/// Run the sharing-ADMM engine with one worker thread per zone.
pub fn run_decentralized(
    instance: &UnitCommitmentInstance,
    factory: &SolverFactory,
    config: &DecentralizedConfig,
) -> DucResult<Vec<WorkerReport>> {
    let zone_ids = instance.zone_ids();
    if zone_ids.is_empty() {
        return Err(DucError::Config("instance has no lines to decompose".into()));
    }

    let isf = build_isf(&instance.lines, instance.buses.len())?;
    let lodf = build_lodf(&isf, &instance.lines);
    let cache = config.cache_dir.clone().map(LinkCache::new);
    let zones = extract_zones(
        instance,
        &isf,
        &lodf,
        config.security,
        cache.as_ref(),
        &SoloCommunicator,
    )?;

    // Fallible setup happens before any thread exists.
    let mut workers: Vec<(ZonalSubproblem, ScreeningContext)> = zones
        .iter()
        .map(|zone| {
            let sub = build_zonal_subproblem(
                instance,
                zone,
                &zones,
                config.reserve_fraction,
                config.relax,
            )?;
            let ctx = ScreeningContext::new(instance, zone, &isf, &lodf, config.security)?;
            Ok((sub, ctx))
        })
        .collect::<DucResult<_>>()?;

    info!(
        zones = zones.len(),
        security = config.security,
        relax = config.relax,
        "starting decentralized solve"
    );

    let team = LocalCommunicator::team(zones.len());
    let mut reports: Vec<DucResult<WorkerReport>> = Vec::new();
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for ((mut sub, mut ctx), comm) in workers.drain(..).zip(team.iter()) {
            let admm_params = config.admm.clone();
            handles.push(scope.spawn(move || {
                let zone = sub.zone_id;
                let mut callback = |sub: &mut ZonalSubproblem,
                                    sol: &duc_solver::Solution,
                                    comm: &dyn duc_core::Communicator| {
                    ctx.screen(sub, sol, comm).map(|_| ())
                };
                let admm =
                    run_sharing_admm(comm, &mut sub, factory, &admm_params, Some(&mut callback))?;
                Ok(WorkerReport {
                    zone,
                    subproblem: sub,
                    admm,
                    violations: ctx.violations,
                })
            }));
        }
        for handle in handles {
            reports.push(handle.join().unwrap_or_else(|_| {
                Err(DucError::Other("worker thread panicked".into()))
            }));
        }
    });

    let mut out = Vec::with_capacity(reports.len());
    for report in reports {
        out.push(report?);
    }
    out.sort_by_key(|r| r.zone);
    Ok(out)
}
