//! # duc-algo: decomposition and coordination engine
//!
//! The algorithmic core of the decentralized security-constrained unit
//! commitment system, leaves first:
//!
//! - [`sensitivity`] - ISF / LODF / post-contingency shift factors
//! - [`partition`] - balanced zone splitting via an auxiliary MIP
//! - [`zones`] - bus classification and link matrices, with [`cache`]
//! - [`uc`] - the generator-level commitment model
//! - [`subproblem`] - one zone's local program with virtual boundary
//!   injections
//! - [`admm`] - the sharing-ADMM coordinator with MIQP/QP dual mode
//! - [`screening`] - lazy contingency constraint generation
//! - [`central`] / [`driver`] - centralized and thread-per-zone drivers

pub mod admm;
pub mod cache;
pub mod central;
pub mod driver;
pub mod partition;
pub mod screening;
pub mod sensitivity;
pub mod subproblem;
pub mod test_fixtures;
pub mod uc;
pub mod zones;

use duc_core::{DucError, DucResult};
use serde::{Deserialize, Serialize};

/// The algorithm variants the front-end can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Centralized, pre-contingency transmission limits.
    TcucCentral,
    /// Centralized, N-1 security.
    ScucCentral,
    /// Decentralized ISF formulation, pre-contingency limits.
    TcucIsf,
    /// Decentralized ISF formulation, N-1 security.
    ScucIsf,
    /// Centralized angle formulation.
    TcucTheta,
}

impl Algorithm {
    pub fn is_decentralized(&self) -> bool {
        matches!(self, Algorithm::TcucIsf | Algorithm::ScucIsf)
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Algorithm::ScucCentral | Algorithm::ScucIsf)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TcucCentral => "tcuc-central",
            Algorithm::ScucCentral => "scuc-central",
            Algorithm::TcucIsf => "tcuc-isf",
            Algorithm::ScucIsf => "scuc-isf",
            Algorithm::TcucTheta => "tcuc-theta",
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = DucError;

    fn from_str(s: &str) -> DucResult<Self> {
        match s {
            "tcuc-central" => Ok(Algorithm::TcucCentral),
            "scuc-central" => Ok(Algorithm::ScucCentral),
            "tcuc-isf" => Ok(Algorithm::TcucIsf),
            "scuc-isf" => Ok(Algorithm::ScucIsf),
            "tcuc-theta" => Ok(Algorithm::TcucTheta),
            other => Err(DucError::Config(format!(
                "unsupported algorithm '{}'; expected one of tcuc-central, scuc-central, tcuc-isf, scuc-isf, tcuc-theta",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_round_trip() {
        for name in ["tcuc-central", "scuc-central", "tcuc-isf", "scuc-isf", "tcuc-theta"] {
            let alg: Algorithm = name.parse().unwrap();
            assert_eq!(alg.as_str(), name);
        }
    }

    #[test]
    fn unknown_algorithm_is_a_config_error() {
        let err = "acuc-magic".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, DucError::Config(_)));
    }

    #[test]
    fn security_and_distribution_flags() {
        assert!(Algorithm::ScucIsf.is_security());
        assert!(Algorithm::ScucIsf.is_decentralized());
        assert!(!Algorithm::TcucTheta.is_decentralized());
        assert!(!Algorithm::TcucCentral.is_security());
    }
}
