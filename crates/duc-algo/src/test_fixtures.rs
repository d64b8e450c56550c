//! Small deterministic instances shared by unit and integration tests.

use duc_core::{
    Bus, BusId, CostSegment, GenId, Generator, LineId, TransmissionLine, UnitCommitmentInstance,
    ZoneId,
};

/// A generator with easy physics: wide ramps, short up/down times.
pub fn simple_generator(id: usize, bus: usize, min_power: f64, segment: f64) -> Generator {
    Generator {
        id: GenId::new(id),
        name: format!("g{}", id),
        bus: BusId::new(bus),
        min_power,
        max_power: min_power + 3.0 * segment,
        ramp_up: 1e3,
        ramp_down: 1e3,
        startup_ramp: 1e3,
        shutdown_ramp: 1e3,
        initial_status: 8,
        always_on: false,
        min_uptime: 1,
        min_downtime: 1,
        min_power_cost: 10.0 * min_power,
        cost_segments: vec![
            CostSegment {
                amount: segment,
                price: 12.0,
            },
            CostSegment {
                amount: segment,
                price: 20.0,
            },
            CostSegment {
                amount: segment,
                price: 35.0,
            },
        ],
        startup_cost: 300.0,
    }
}

fn ring_line(id: usize, source: usize, target: usize) -> TransmissionLine {
    TransmissionLine {
        id: LineId::new(id),
        source: BusId::new(source),
        target: BusId::new(target),
        reactance: 0.1,
        susceptance: TransmissionLine::susceptance_from_reactance(0.1),
        normal_limit: 200.0,
        emergency_limit: 220.0,
        vulnerable: true,
        zone: ZoneId::new(1),
    }
}

/// Ring of `n_buses` buses with `n_gens` generators (1 or 2), horizon 2.
pub fn ladder_instance(n_buses: usize, n_gens: usize) -> UnitCommitmentInstance {
    let gen_buses: Vec<usize> = if n_gens >= 2 {
        vec![1, n_buses / 2 + 1]
    } else {
        vec![1]
    };
    let buses = (1..=n_buses)
        .map(|i| {
            let demand = if gen_buses.contains(&i) {
                vec![0.0, 0.0]
            } else {
                vec![8.0 + i as f64, 9.0 + i as f64]
            };
            Bus {
                id: BusId::new(i),
                demand,
                zone: ZoneId::new(1),
            }
        })
        .collect();
    let lines = (1..=n_buses)
        .map(|i| ring_line(i, i, i % n_buses + 1))
        .collect();
    let generators = gen_buses
        .iter()
        .enumerate()
        .map(|(k, &b)| simple_generator(k + 1, b, 10.0, 40.0))
        .collect();
    UnitCommitmentInstance {
        name: format!("ring{}", n_buses),
        buses,
        lines,
        generators,
        time_horizon: 2,
    }
}

fn zoned_line(id: usize, source: usize, target: usize, reactance: f64, zone: usize) -> TransmissionLine {
    TransmissionLine {
        id: LineId::new(id),
        source: BusId::new(source),
        target: BusId::new(target),
        reactance,
        susceptance: TransmissionLine::susceptance_from_reactance(reactance),
        normal_limit: 120.0,
        emergency_limit: 140.0,
        vulnerable: true,
        zone: ZoneId::new(zone),
    }
}

/// Seven buses, two zones, boundary buses 4 and 5, no bridges.
///
/// Zone 1 owns buses 1-3 (generator at 1), zone 2 owns buses 6-7
/// (generator at 6). Boundary buses carry zero demand, matching the
/// partition-time invariant.
pub fn two_zone_instance() -> UnitCommitmentInstance {
    let demands: [(usize, [f64; 2]); 7] = [
        (1, [0.0, 0.0]),
        (2, [20.0, 22.0]),
        (3, [15.0, 16.0]),
        (4, [0.0, 0.0]),
        (5, [0.0, 0.0]),
        (6, [0.0, 0.0]),
        (7, [25.0, 28.0]),
    ];
    let buses = demands
        .iter()
        .map(|&(i, d)| Bus {
            id: BusId::new(i),
            demand: d.to_vec(),
            zone: ZoneId::new(if i <= 5 { 1 } else { 2 }),
        })
        .collect();
    let lines = vec![
        zoned_line(1, 1, 2, 0.10, 1),
        zoned_line(2, 2, 3, 0.15, 1),
        zoned_line(3, 1, 3, 0.20, 1),
        zoned_line(4, 2, 4, 0.10, 1),
        zoned_line(5, 3, 5, 0.12, 1),
        zoned_line(6, 4, 6, 0.10, 2),
        zoned_line(7, 6, 7, 0.15, 2),
        zoned_line(8, 5, 7, 0.10, 2),
        zoned_line(9, 4, 7, 0.20, 2),
    ];
    let generators = vec![
        simple_generator(1, 1, 10.0, 30.0),
        simple_generator(2, 6, 8.0, 25.0),
    ];
    UnitCommitmentInstance {
        name: "two_zone7".into(),
        buses,
        lines,
        generators,
        time_horizon: 2,
    }
}

/// Thirteen buses in two zones of ladder-of-cycles topology; boundary
/// buses 6 and 7. Every line sits on a cycle, so no LODF column is a
/// bridge.
pub fn thirteen_bus_instance() -> UnitCommitmentInstance {
    let buses = (1..=13)
        .map(|i| {
            let boundary = i == 6 || i == 7;
            let gen_bus = i == 1 || i == 13;
            Bus {
                id: BusId::new(i),
                demand: if boundary || gen_bus {
                    vec![0.0]
                } else {
                    vec![10.0 + i as f64]
                },
                zone: ZoneId::new(if i <= 7 { 1 } else { 2 }),
            }
        })
        .collect();
    let line_defs: [(usize, usize, f64, usize); 18] = [
        (1, 2, 0.10, 1),
        (1, 3, 0.12, 1),
        (2, 3, 0.15, 1),
        (2, 4, 0.10, 1),
        (3, 5, 0.11, 1),
        (4, 5, 0.14, 1),
        (4, 6, 0.10, 1),
        (5, 7, 0.12, 1),
        (6, 7, 0.16, 1),
        (6, 8, 0.10, 2),
        (7, 9, 0.11, 2),
        (8, 9, 0.15, 2),
        (8, 10, 0.10, 2),
        (9, 11, 0.12, 2),
        (10, 11, 0.14, 2),
        (10, 12, 0.10, 2),
        (11, 13, 0.11, 2),
        (12, 13, 0.13, 2),
    ];
    let lines = line_defs
        .iter()
        .enumerate()
        .map(|(i, &(s, t, x, z))| zoned_line(i + 1, s, t, x, z))
        .collect();
    let generators = vec![
        simple_generator(1, 1, 15.0, 50.0),
        simple_generator(2, 13, 12.0, 40.0),
    ];
    UnitCommitmentInstance {
        name: "thirteen_bus".into(),
        buses,
        lines,
        generators,
        time_horizon: 1,
    }
}
