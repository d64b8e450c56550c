//! Injection-shift-factor and line-outage sensitivity matrices.
//!
//! ## Injection Shift Factors (ISF)
//!
//! `ISF[l,b]` is the change in MW flow on line `l` per MW injected at bus
//! `b` and withdrawn at the slack bus:
//! ```text
//! flow = ISF * injection      (for any balanced injection vector)
//! ```
//!
//! Built from the signed incidence matrix `M` (source +1, target -1) and
//! the diagonal susceptance matrix `D`: drop the slack column of `M` to get
//! `M'`, form the reduced Laplacian `L = M'^T D M'`, and solve
//! `ISF = [0 | D M' L^-1]`. A singular Laplacian means the network is
//! disconnected and is reported as fatal.
//!
//! ## Line Outage Distribution Factors (LODF)
//!
//! `LODF[m,c]` is the fraction of line `c`'s pre-outage flow that shifts to
//! line `m` when `c` trips; the diagonal is exactly -1:
//! ```text
//! flow_m_post = flow_m_pre + LODF[m,c] * flow_c_pre
//! ```
//!
//! Post-contingency shift factors combine the two:
//! `ISF_c[l,b] = ISF[l,b] + LODF[l,c] * ISF[c,b]`.

use faer::{prelude::*, solvers::PartialPivLu, Mat};
use sprs::{CsMat, TriMat};
use thiserror::Error;

use duc_core::{BusId, DucError, LineId, TransmissionLine};

/// Errors from sensitivity matrix construction.
#[derive(Debug, Error)]
pub enum SensitivityError {
    #[error("network must have at least 2 buses")]
    TooFewBuses,

    #[error("network must have at least 1 line")]
    NoLines,

    #[error("susceptance Laplacian is singular; the network is disconnected")]
    SingularLaplacian,
}

impl From<SensitivityError> for DucError {
    fn from(err: SensitivityError) -> Self {
        DucError::Numerical(err.to_string())
    }
}

/// Dense L x B injection-shift-factor matrix.
#[derive(Debug, Clone)]
pub struct IsfMatrix {
    /// Row per line, column per bus, both in instance order.
    pub values: Vec<Vec<f64>>,
    /// 0-based column currently acting as slack.
    slack: usize,
}

impl IsfMatrix {
    pub fn n_lines(&self) -> usize {
        self.values.len()
    }

    pub fn n_buses(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    /// 0-based slack column.
    pub fn slack(&self) -> usize {
        self.slack
    }

    #[inline]
    pub fn get(&self, line: LineId, bus: BusId) -> f64 {
        self.values[line.idx()][bus.idx()]
    }

    pub fn row(&self, line: LineId) -> &[f64] {
        &self.values[line.idx()]
    }

    /// Line flows for a full injection vector (one entry per bus).
    pub fn flows(&self, injection: &[f64]) -> Vec<f64> {
        self.values
            .iter()
            .map(|row| row.iter().zip(injection).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// Re-slack the matrix in place by subtracting the new slack's column
    /// from every column. Repeated applications compose.
    pub fn change_slack(&mut self, new_slack: BusId) {
        let k = new_slack.idx();
        for row in &mut self.values {
            let pivot = row[k];
            if pivot != 0.0 {
                for v in row.iter_mut() {
                    *v -= pivot;
                }
            }
            row[k] = 0.0;
        }
        self.slack = k;
    }

    /// Zero every entry with magnitude below `eps`.
    pub fn truncate(&mut self, eps: f64) {
        for row in &mut self.values {
            for v in row.iter_mut() {
                if v.abs() < eps {
                    *v = 0.0;
                }
            }
        }
    }
}

/// Dense L x L line-outage-distribution-factor matrix.
#[derive(Debug, Clone)]
pub struct LodfMatrix {
    pub values: Vec<Vec<f64>>,
}

impl LodfMatrix {
    pub fn n_lines(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn get(&self, monitored: LineId, outage: LineId) -> f64 {
        self.values[monitored.idx()][outage.idx()]
    }

    /// Zero every entry with magnitude below `eps`, diagonal excepted.
    pub fn truncate(&mut self, eps: f64) {
        for (m, row) in self.values.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                if m != c && v.abs() < eps {
                    *v = 0.0;
                }
            }
        }
    }
}

/// Sparse signed incidence `M'` (slack column dropped) and its
/// susceptance-scaled companion `D M'`, both L x (B-1).
fn reduced_incidence(lines: &[TransmissionLine], n_bus: usize) -> (CsMat<f64>, CsMat<f64>) {
    let mut m = TriMat::new((lines.len(), n_bus - 1));
    let mut dm = TriMat::new((lines.len(), n_bus - 1));
    for (l, line) in lines.iter().enumerate() {
        for (bus, sign) in [(line.source, 1.0), (line.target, -1.0)] {
            let b = bus.idx();
            if b > 0 {
                m.add_triplet(l, b - 1, sign);
                dm.add_triplet(l, b - 1, sign * line.susceptance);
            }
        }
    }
    (m.to_csr(), dm.to_csr())
}

/// Build the ISF matrix with bus 1 as slack.
///
/// Lines with zero susceptance are carried as all-zero rows, which is how
/// an outaged line is represented when re-deriving post-contingency
/// matrices from scratch.
pub fn build_isf(lines: &[TransmissionLine], n_bus: usize) -> Result<IsfMatrix, SensitivityError> {
    if n_bus < 2 {
        return Err(SensitivityError::TooFewBuses);
    }
    if lines.is_empty() {
        return Err(SensitivityError::NoLines);
    }

    let (m_red, dm_red) = reduced_incidence(lines, n_bus);
    let n = n_bus - 1;

    // Reduced Laplacian M'^T (D M'), accumulated dense from the sparse rows.
    let mut lap = vec![vec![0.0; n]; n];
    for (row_m, row_dm) in m_red.outer_iterator().zip(dm_red.outer_iterator()) {
        for (j1, &v1) in row_m.iter() {
            for (j2, &v2) in row_dm.iter() {
                lap[j1][j2] += v1 * v2;
            }
        }
    }

    // Solve L Y = (D M')^T, so that ISF = Y^T with a zero slack column
    // prepended. The Laplacian is symmetric, which makes this exactly
    // D M' L^-1 without forming the inverse.
    let lap_mat = Mat::from_fn(n, n, |i, j| lap[i][j]);
    let mut rhs = Mat::zeros(n, lines.len());
    for (l, row_dm) in dm_red.outer_iterator().enumerate() {
        for (j, &v) in row_dm.iter() {
            rhs.write(j, l, v);
        }
    }
    let lu = PartialPivLu::new(lap_mat.as_ref());
    let sol = lu.solve(&rhs);

    let mut values = vec![vec![0.0; n_bus]; lines.len()];
    for l in 0..lines.len() {
        for b in 0..n {
            let v = sol.read(b, l);
            if !v.is_finite() {
                return Err(SensitivityError::SingularLaplacian);
            }
            values[l][b + 1] = v;
        }
    }

    Ok(IsfMatrix { values, slack: 0 })
}

/// Build the LODF matrix from an ISF matrix in bus-1 slack form.
pub fn build_lodf(isf: &IsfMatrix, lines: &[TransmissionLine]) -> LodfMatrix {
    debug_assert_eq!(isf.slack(), 0, "LODF derivation expects bus-1 slack form");
    let n = lines.len();
    let mut values = vec![vec![0.0; n]; n];

    // Raw product ISF[:, 2..] * M'^T: column c only touches the incidence
    // entries of line c.
    for c in 0..n {
        let src = lines[c].source.idx();
        let tgt = lines[c].target.idx();
        for m in 0..n {
            let mut v = 0.0;
            if src > 0 {
                v += isf.values[m][src];
            }
            if tgt > 0 {
                v -= isf.values[m][tgt];
            }
            values[m][c] = v;
        }
    }

    for c in 0..n {
        let denom = 1.0 - values[c][c];
        if denom.abs() < 1e-10 {
            // Removing a bridge line islands the network; the factors are
            // undefined, so the column is disabled rather than poisoned.
            tracing::warn!(line = c + 1, "bridge line; outage distribution disabled");
            for m in 0..n {
                values[m][c] = 0.0;
            }
        } else {
            let scale = 1.0 / denom;
            for m in 0..n {
                values[m][c] *= scale;
            }
        }
        values[c][c] = -1.0;
    }

    LodfMatrix { values }
}

/// One post-contingency ISF row: sensitivity of `monitored`'s flow to every
/// bus injection after `outage` trips.
pub fn post_contingency_row(
    isf: &IsfMatrix,
    lodf: &LodfMatrix,
    monitored: LineId,
    outage: LineId,
) -> Vec<f64> {
    let factor = lodf.get(monitored, outage);
    isf.row(monitored)
        .iter()
        .zip(isf.row(outage))
        .map(|(&m, &o)| m + factor * o)
        .collect()
}

/// Full post-contingency ISF for a single line outage.
pub fn post_contingency_isf(isf: &IsfMatrix, lodf: &LodfMatrix, outage: LineId) -> IsfMatrix {
    let values = (0..isf.n_lines())
        .map(|m| post_contingency_row(isf, lodf, LineId::new(m + 1), outage))
        .collect();
    IsfMatrix {
        values,
        slack: isf.slack(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duc_core::ZoneId;

    fn line(id: usize, source: usize, target: usize, reactance: f64) -> TransmissionLine {
        TransmissionLine {
            id: LineId::new(id),
            source: BusId::new(source),
            target: BusId::new(target),
            reactance,
            susceptance: TransmissionLine::susceptance_from_reactance(reactance),
            normal_limit: 100.0,
            emergency_limit: 100.0,
            vulnerable: true,
            zone: ZoneId::new(1),
        }
    }

    fn triangle() -> Vec<TransmissionLine> {
        vec![line(1, 1, 2, 0.1), line(2, 2, 3, 0.1), line(3, 1, 3, 0.2)]
    }

    #[test]
    fn slack_column_is_zero() {
        let lines = triangle();
        let isf = build_isf(&lines, 3).unwrap();
        for l in 0..3 {
            assert_eq!(isf.values[l][0], 0.0);
        }
    }

    #[test]
    fn change_slack_zeroes_new_column_and_preserves_flows() {
        let lines = triangle();
        let mut isf = build_isf(&lines, 3).unwrap();
        // Balanced injection: +10 at bus 2, -10 at bus 3.
        let injection = [0.0, 10.0, -10.0];
        let flows_before = isf.flows(&injection);

        isf.change_slack(BusId::new(2));
        assert_eq!(isf.slack(), 1);
        for l in 0..3 {
            assert_eq!(isf.values[l][1], 0.0);
        }
        let flows_after = isf.flows(&injection);
        for (a, b) in flows_before.iter().zip(&flows_after) {
            assert!((a - b).abs() < 1e-9, "flow changed under re-slack");
        }
    }

    #[test]
    fn change_slack_composes() {
        let lines = triangle();
        let mut twice = build_isf(&lines, 3).unwrap();
        twice.change_slack(BusId::new(3));
        twice.change_slack(BusId::new(2));
        let mut once = build_isf(&lines, 3).unwrap();
        once.change_slack(BusId::new(2));
        for l in 0..3 {
            for b in 0..3 {
                assert!((twice.values[l][b] - once.values[l][b]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn lodf_diagonal_is_negative_one() {
        let lines = triangle();
        let isf = build_isf(&lines, 3).unwrap();
        let lodf = build_lodf(&isf, &lines);
        for c in 0..3 {
            assert_eq!(lodf.values[c][c], -1.0);
        }
    }

    #[test]
    fn lodf_triangle_off_diagonal_rows_cancel() {
        // In a triangle every surviving line absorbs the outaged flow with
        // factor +-1, and the two off-diagonal entries of each row cancel.
        let lines = triangle();
        let isf = build_isf(&lines, 3).unwrap();
        let lodf = build_lodf(&isf, &lines);
        for m in 0..3 {
            let sum: f64 = (0..3).filter(|&c| c != m).map(|c| lodf.values[m][c]).sum();
            assert!(sum.abs() < 1e-8, "row {} off-diagonal sum {}", m, sum);
        }
    }

    #[test]
    fn post_contingency_matches_rebuilt_isf() {
        let lines = triangle();
        let isf = build_isf(&lines, 3).unwrap();
        let lodf = build_lodf(&isf, &lines);

        for outage in 1..=3usize {
            let mut reduced = lines.clone();
            reduced[outage - 1].susceptance = 0.0;
            let rebuilt = build_isf(&reduced, 3).unwrap();
            let predicted = post_contingency_isf(&isf, &lodf, LineId::new(outage));
            for m in 0..3 {
                if m == outage - 1 {
                    continue;
                }
                for b in 0..3 {
                    assert!(
                        (predicted.values[m][b] - rebuilt.values[m][b]).abs() < 1e-6,
                        "outage {} line {} bus {}: {} vs {}",
                        outage,
                        m + 1,
                        b + 1,
                        predicted.values[m][b],
                        rebuilt.values[m][b]
                    );
                }
            }
        }
    }

    #[test]
    fn disconnected_network_is_singular() {
        let lines = vec![line(1, 1, 2, 0.1), line(2, 3, 4, 0.1)];
        assert!(matches!(
            build_isf(&lines, 4),
            Err(SensitivityError::SingularLaplacian)
        ));
    }

    #[test]
    fn truncation_zeroes_small_entries() {
        let lines = triangle();
        let mut isf = build_isf(&lines, 3).unwrap();
        isf.values[0][1] = 1e-9;
        isf.truncate(1e-6);
        assert_eq!(isf.values[0][1], 0.0);
    }
}
