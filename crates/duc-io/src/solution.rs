//! Solution CSV: one row per solved variant.
//!
//! Columns: `instance, variation, cost`, then `is_on[g:t]`, `prod[g:t]`,
//! `reserve[g:t]` blocks (generator-major), an `inj[b:t]` block, and a
//! trailing `violations` column holding space-separated `monitored:outage`
//! pairs for the first period.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

/// One solved variant, shaped `[generator][period]` / `[bus][period]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionRecord {
    pub instance: String,
    pub variation: String,
    pub cost: f64,
    pub is_on: Vec<Vec<f64>>,
    pub prod: Vec<Vec<f64>>,
    pub reserve: Vec<Vec<f64>>,
    pub inj: Vec<Vec<f64>>,
    /// `(monitored, outage)` line ids of the first-period constraints.
    pub violations: Vec<(usize, usize)>,
}

impl SolutionRecord {
    fn horizon(&self) -> usize {
        self.is_on.first().map_or(0, Vec::len)
    }
}

/// Write records to `path`, header included. All records must share the
/// same generator, bus, and horizon counts.
pub fn write_solutions(path: &Path, records: &[SolutionRecord]) -> Result<()> {
    let first = records
        .first()
        .ok_or_else(|| anyhow!("no solution records to write"))?;
    let (n_gen, n_bus, horizon) = (first.is_on.len(), first.inj.len(), first.horizon());

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    let mut header = vec!["instance".to_string(), "variation".to_string(), "cost".to_string()];
    for block in ["is_on", "prod", "reserve"] {
        for g in 1..=n_gen {
            for t in 1..=horizon {
                header.push(format!("{}[{}:{}]", block, g, t));
            }
        }
    }
    for b in 1..=n_bus {
        for t in 1..=horizon {
            header.push(format!("inj[{}:{}]", b, t));
        }
    }
    header.push("violations".to_string());
    writer.write_record(&header)?;

    for record in records {
        if record.is_on.len() != n_gen || record.inj.len() != n_bus || record.horizon() != horizon
        {
            bail!("solution records disagree on instance dimensions");
        }
        let mut row = vec![
            record.instance.clone(),
            record.variation.clone(),
            record.cost.to_string(),
        ];
        for block in [&record.is_on, &record.prod, &record.reserve, &record.inj] {
            for series in block.iter() {
                for v in series {
                    row.push(v.to_string());
                }
            }
        }
        row.push(
            record
                .violations
                .iter()
                .map(|(m, o)| format!("{}:{}", m, o))
                .collect::<Vec<_>>()
                .join(" "),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a solution CSV written by [`write_solutions`]. Block shapes are
/// recovered from the header labels.
pub fn read_solutions(path: &Path) -> Result<Vec<SolutionRecord>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let mut n_gen = 0usize;
    let mut n_bus = 0usize;
    let mut horizon = 0usize;
    for label in headers.iter() {
        if let Some((g, t)) = parse_label(label, "is_on") {
            n_gen = n_gen.max(g);
            horizon = horizon.max(t);
        } else if let Some((b, _)) = parse_label(label, "inj") {
            n_bus = n_bus.max(b);
        }
    }
    if n_gen == 0 || horizon == 0 {
        bail!("solution header carries no is_on block");
    }

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.context("reading solution record")?;
        let mut cursor = 3usize;
        let mut block = |rows: usize| -> Result<Vec<Vec<f64>>> {
            let mut out = Vec::with_capacity(rows);
            for _ in 0..rows {
                let mut series = Vec::with_capacity(horizon);
                for _ in 0..horizon {
                    let raw = record
                        .get(cursor)
                        .ok_or_else(|| anyhow!("solution row too short at column {}", cursor))?;
                    series.push(raw.parse::<f64>().with_context(|| {
                        format!("parsing numeric solution field '{}'", raw)
                    })?);
                    cursor += 1;
                }
                out.push(series);
            }
            Ok(out)
        };

        let is_on = block(n_gen)?;
        let prod = block(n_gen)?;
        let reserve = block(n_gen)?;
        let inj = block(n_bus)?;

        let violations = record
            .get(cursor)
            .unwrap_or("")
            .split_whitespace()
            .map(|pair| {
                let (m, o) = pair
                    .split_once(':')
                    .ok_or_else(|| anyhow!("malformed violation pair '{}'", pair))?;
                Ok((m.parse::<usize>()?, o.parse::<usize>()?))
            })
            .collect::<Result<Vec<_>>>()?;

        records.push(SolutionRecord {
            instance: record.get(0).unwrap_or_default().to_string(),
            variation: record.get(1).unwrap_or_default().to_string(),
            cost: record
                .get(2)
                .ok_or_else(|| anyhow!("missing cost column"))?
                .parse()
                .context("parsing cost")?,
            is_on,
            prod,
            reserve,
            inj,
            violations,
        });
    }
    Ok(records)
}

fn parse_label(label: &str, block: &str) -> Option<(usize, usize)> {
    let inner = label.strip_prefix(block)?.strip_prefix('[')?.strip_suffix(']')?;
    let (a, b) = inner.split_once(':')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> SolutionRecord {
        SolutionRecord {
            instance: "case7".into(),
            variation: "d1.00_l1.00".into(),
            cost: 12345.678,
            is_on: vec![vec![1.0, 1.0], vec![0.0, 1.0]],
            prod: vec![vec![40.0, 42.5], vec![0.0, 8.0]],
            reserve: vec![vec![5.0, 5.0], vec![0.0, 2.0]],
            inj: vec![vec![40.0, 42.5], vec![-20.0, -22.0], vec![-20.0, -20.5]],
            violations: vec![(3, 3), (2, 5)],
        }
    }

    #[test]
    fn round_trip_preserves_numeric_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.csv");
        let record = sample_record();
        write_solutions(&path, std::slice::from_ref(&record)).unwrap();
        let loaded = read_solutions(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
    }

    #[test]
    fn empty_violations_read_back_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.csv");
        let mut record = sample_record();
        record.violations.clear();
        write_solutions(&path, std::slice::from_ref(&record)).unwrap();
        let loaded = read_solutions(&path).unwrap();
        assert!(loaded[0].violations.is_empty());
    }

    #[test]
    fn mismatched_record_shapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.csv");
        let a = sample_record();
        let mut b = sample_record();
        b.inj.pop();
        assert!(write_solutions(&path, &[a, b]).is_err());
    }
}
