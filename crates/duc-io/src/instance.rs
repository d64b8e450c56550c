//! Instance directory reader and writer.
//!
//! An instance is three CSV files in one directory:
//!
//! - `buses.csv`: `Bus, Demand 1..T, Zone`
//! - `lines.csv`: `Line, Source, Target, Reactance, Normal Flow Limit,
//!   [Emergency Flow Limit,] Vulnerable?, Zone` (the emergency column is
//!   optional and defaults to the normal limit)
//! - `generators.csv`: 20 columns of commitment physics and the
//!   three-segment offer curve
//!
//! `Max Power` is not trusted from the file: it is recomputed as
//! `Min Power + sum of offer segments`, which is what the segment
//! decomposition in the commitment model assumes.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use duc_core::{
    Bus, BusId, CostSegment, GenId, Generator, LineId, TransmissionLine, UnitCommitmentInstance,
    ZoneId,
};

/// Column layout of `generators.csv`.
const GENERATOR_COLUMNS: usize = 20;

/// Read an instance directory; its name is the directory's base name.
pub fn read_instance(dir: &Path) -> Result<UnitCommitmentInstance> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "instance".to_string());

    let (buses, horizon) = read_buses(&dir.join("buses.csv"))?;
    let lines = read_lines(&dir.join("lines.csv"))?;
    let generators = read_generators(&dir.join("generators.csv"))?;

    let instance = UnitCommitmentInstance {
        name,
        buses,
        lines,
        generators,
        time_horizon: horizon,
    };
    instance
        .validate()
        .map_err(|e| anyhow!("instance {} failed validation: {}", instance.name, e))?;
    Ok(instance)
}

fn read_buses(path: &Path) -> Result<(Vec<Bus>, usize)> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    if headers.len() < 3 {
        bail!("buses.csv needs Bus, at least one Demand column, and Zone");
    }
    let horizon = headers.len() - 2;

    let mut buses = Vec::new();
    for record in reader.records() {
        let record = record.context("reading buses.csv record")?;
        let id: usize = field(&record, 0, "Bus")?;
        let mut demand = Vec::with_capacity(horizon);
        for t in 0..horizon {
            demand.push(field(&record, 1 + t, "Demand")?);
        }
        let zone: usize = field(&record, 1 + horizon, "Zone")?;
        buses.push(Bus {
            id: BusId::new(id),
            demand,
            zone: ZoneId::new(zone),
        });
    }
    Ok((buses, horizon))
}

fn read_lines(path: &Path) -> Result<Vec<TransmissionLine>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let has_emergency = match reader.headers()?.len() {
        8 => true,
        7 => false,
        n => bail!("lines.csv has {} columns, expected 7 or 8", n),
    };

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.context("reading lines.csv record")?;
        let id: usize = field(&record, 0, "Line")?;
        let source: usize = field(&record, 1, "Source")?;
        let target: usize = field(&record, 2, "Target")?;
        let reactance: f64 = field(&record, 3, "Reactance")?;
        let normal_limit: f64 = field(&record, 4, "Normal Flow Limit")?;
        let (emergency_limit, next) = if has_emergency {
            (field(&record, 5, "Emergency Flow Limit")?, 6)
        } else {
            (normal_limit, 5)
        };
        let vulnerable = bool_field(&record, next, "Vulnerable?")?;
        let zone: usize = field(&record, next + 1, "Zone")?;
        lines.push(TransmissionLine {
            id: LineId::new(id),
            source: BusId::new(source),
            target: BusId::new(target),
            reactance,
            susceptance: TransmissionLine::susceptance_from_reactance(reactance),
            normal_limit,
            emergency_limit,
            vulnerable,
            zone: ZoneId::new(zone),
        });
    }
    Ok(lines)
}

fn read_generators(path: &Path) -> Result<Vec<Generator>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    if reader.headers()?.len() != GENERATOR_COLUMNS {
        bail!(
            "generators.csv has {} columns, expected {}",
            reader.headers()?.len(),
            GENERATOR_COLUMNS
        );
    }

    let mut generators = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.context("reading generators.csv record")?;
        let name: String = record
            .get(0)
            .ok_or_else(|| anyhow!("missing Unit column"))?
            .to_string();
        let min_power: f64 = field(&record, 1, "Min Power")?;
        let ramp_down: f64 = field(&record, 3, "Ramp-Down")?;
        let ramp_up: f64 = field(&record, 4, "Ramp-Up")?;
        let shutdown_ramp: f64 = field(&record, 5, "Shutdown Ramp")?;
        let startup_ramp: f64 = field(&record, 6, "Startup Ramp")?;
        let initial_status: i64 = field(&record, 7, "Initial State")?;
        let bus: usize = field(&record, 8, "Bus")?;
        let always_on = bool_field(&record, 9, "Always On")?;
        let min_uptime: usize = field(&record, 10, "Min Uptime")?;
        let min_downtime: usize = field(&record, 11, "Min Downtime")?;
        let min_power_cost: f64 = field(&record, 12, "Cost Min Power")?;
        let mut cost_segments = Vec::with_capacity(3);
        for s in 0..3 {
            cost_segments.push(CostSegment {
                price: field(&record, 13 + s, "Price Segment")?,
                amount: field(&record, 16 + s, "Offer Segment")?,
            });
        }
        let startup_cost: f64 = field(&record, 19, "Startup Cost")?;

        // Max Power is derived, not read.
        let max_power = min_power + cost_segments.iter().map(|s| s.amount).sum::<f64>();

        generators.push(Generator {
            id: GenId::new(idx + 1),
            name,
            bus: BusId::new(bus),
            min_power,
            max_power,
            ramp_up,
            ramp_down,
            startup_ramp,
            shutdown_ramp,
            initial_status,
            always_on,
            min_uptime,
            min_downtime,
            min_power_cost,
            cost_segments,
            startup_cost,
        });
    }
    Ok(generators)
}

/// Write an instance back to the three-file layout.
pub fn write_instance(dir: &Path, instance: &UnitCommitmentInstance) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating {}", dir.display()))?;

    let mut buses = csv::Writer::from_path(dir.join("buses.csv"))?;
    let mut header = vec!["Bus".to_string()];
    for t in 1..=instance.time_horizon {
        header.push(format!("Demand {}", t));
    }
    header.push("Zone".to_string());
    buses.write_record(&header)?;
    for bus in &instance.buses {
        let mut row = vec![bus.id.value().to_string()];
        row.extend(bus.demand.iter().map(|d| d.to_string()));
        row.push(bus.zone.value().to_string());
        buses.write_record(&row)?;
    }
    buses.flush()?;

    let mut lines = csv::Writer::from_path(dir.join("lines.csv"))?;
    lines.write_record([
        "Line",
        "Source",
        "Target",
        "Reactance",
        "Normal Flow Limit",
        "Emergency Flow Limit",
        "Vulnerable?",
        "Zone",
    ])?;
    for line in &instance.lines {
        lines.write_record(&[
            line.id.value().to_string(),
            line.source.value().to_string(),
            line.target.value().to_string(),
            line.reactance.to_string(),
            line.normal_limit.to_string(),
            line.emergency_limit.to_string(),
            line.vulnerable.to_string(),
            line.zone.value().to_string(),
        ])?;
    }
    lines.flush()?;

    let mut gens = csv::Writer::from_path(dir.join("generators.csv"))?;
    gens.write_record([
        "Unit",
        "Min Power",
        "Max Power",
        "Ramp-Down",
        "Ramp-Up",
        "Shutdown Ramp",
        "Startup Ramp",
        "Initial State",
        "Bus",
        "Always On",
        "Min Uptime",
        "Min Downtime",
        "Cost Min Power",
        "Price Segment 1",
        "Price Segment 2",
        "Price Segment 3",
        "Offer Segment 1",
        "Offer Segment 2",
        "Offer Segment 3",
        "Startup Cost",
    ])?;
    for gen in &instance.generators {
        let mut row = vec![
            gen.name.clone(),
            gen.min_power.to_string(),
            gen.max_power.to_string(),
            gen.ramp_down.to_string(),
            gen.ramp_up.to_string(),
            gen.shutdown_ramp.to_string(),
            gen.startup_ramp.to_string(),
            gen.initial_status.to_string(),
            gen.bus.value().to_string(),
            gen.always_on.to_string(),
            gen.min_uptime.to_string(),
            gen.min_downtime.to_string(),
            gen.min_power_cost.to_string(),
        ];
        for s in 0..3 {
            row.push(gen.cost_segments[s].price.to_string());
        }
        for s in 0..3 {
            row.push(gen.cost_segments[s].amount.to_string());
        }
        row.push(gen.startup_cost.to_string());
        gens.write_record(&row)?;
    }
    gens.flush()?;

    Ok(())
}

fn field<T: std::str::FromStr>(record: &csv::StringRecord, idx: usize, name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = record
        .get(idx)
        .ok_or_else(|| anyhow!("missing column {} ({})", idx, name))?
        .trim();
    raw.parse()
        .map_err(|e| anyhow!("parsing {} from '{}': {}", name, raw, e))
}

fn bool_field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<bool> {
    let raw = record
        .get(idx)
        .ok_or_else(|| anyhow!("missing column {} ({})", idx, name))?
        .trim()
        .to_ascii_lowercase();
    match raw.as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(anyhow!("parsing {}: '{}' is not a boolean", name, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duc_core::CostSegment;

    fn sample_instance() -> UnitCommitmentInstance {
        UnitCommitmentInstance {
            name: "sample".into(),
            buses: vec![
                Bus {
                    id: BusId::new(1),
                    demand: vec![10.0, 12.5],
                    zone: ZoneId::new(1),
                },
                Bus {
                    id: BusId::new(2),
                    demand: vec![8.0, 7.25],
                    zone: ZoneId::new(2),
                },
            ],
            lines: vec![TransmissionLine {
                id: LineId::new(1),
                source: BusId::new(1),
                target: BusId::new(2),
                reactance: 0.25,
                susceptance: TransmissionLine::susceptance_from_reactance(0.25),
                normal_limit: 90.0,
                emergency_limit: 99.0,
                vulnerable: true,
                zone: ZoneId::new(1),
            }],
            generators: vec![Generator {
                id: GenId::new(1),
                name: "gen1".into(),
                bus: BusId::new(1),
                min_power: 5.0,
                max_power: 5.0 + 30.0,
                ramp_up: 20.0,
                ramp_down: 18.0,
                startup_ramp: 15.0,
                shutdown_ramp: 14.0,
                initial_status: -2,
                always_on: false,
                min_uptime: 3,
                min_downtime: 2,
                min_power_cost: 120.0,
                cost_segments: vec![
                    CostSegment {
                        amount: 10.0,
                        price: 11.0,
                    },
                    CostSegment {
                        amount: 10.0,
                        price: 17.0,
                    },
                    CostSegment {
                        amount: 10.0,
                        price: 23.0,
                    },
                ],
                startup_cost: 400.0,
            }],
            time_horizon: 2,
        }
    }

    #[test]
    fn round_trip_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        let original = sample_instance();
        write_instance(&path, &original).unwrap();
        let loaded = read_instance(&path).unwrap();

        assert_eq!(loaded.name, "sample");
        assert_eq!(loaded.time_horizon, 2);
        assert_eq!(loaded.buses.len(), 2);
        assert_eq!(loaded.buses[0].demand, original.buses[0].demand);
        assert_eq!(loaded.buses[1].zone, original.buses[1].zone);

        let line = &loaded.lines[0];
        assert_eq!(line.reactance, 0.25);
        assert_eq!(line.emergency_limit, 99.0);
        assert!(line.vulnerable);

        let gen = &loaded.generators[0];
        assert_eq!(gen.name, "gen1");
        assert_eq!(gen.initial_status, -2);
        assert_eq!(gen.min_uptime, 3);
        assert_eq!(gen.cost_segments, original.generators[0].cost_segments);
        // Recomputed, and equal because the fixture was consistent.
        assert_eq!(gen.max_power, 35.0);
    }

    #[test]
    fn max_power_is_recomputed_from_offers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        let mut original = sample_instance();
        original.generators[0].max_power = 999.0;
        write_instance(&path, &original).unwrap();
        let loaded = read_instance(&path).unwrap();
        assert_eq!(loaded.generators[0].max_power, 35.0);
    }

    #[test]
    fn seven_column_lines_default_emergency_to_normal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lines.csv"),
            "Line,Source,Target,Reactance,Normal Flow Limit,Vulnerable?,Zone\n\
             1,1,2,0.1,80,true,1\n",
        )
        .unwrap();
        let lines = read_lines(&dir.path().join("lines.csv")).unwrap();
        assert_eq!(lines[0].emergency_limit, 80.0);
    }

    #[test]
    fn malformed_generator_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("generators.csv"), "Unit,Bus\ng1,1\n").unwrap();
        assert!(read_generators(&dir.path().join("generators.csv")).is_err());
    }
}
