//! Cross-module scenarios: whole boards driven through the update loop.

use crate::board::{Board, StepOutcome};
use crate::config::BoardConfig;
use crate::particle::ParticleRegistry;
use crate::pattern_set::PatternSet;
use crate::rng::StdRandom;
use crate::template::{BondExpression, EnergyRuleRecord, EnergyRuleTemplate, TransformRuleTemplate};
use crate::topology::{Point, Topology};

fn patterns(rules: Vec<TransformRuleTemplate>, energies: &[(&str, &str, &str, f64)]) -> PatternSet {
    let mut set = PatternSet::new(Topology::Square4);
    for rule in rules {
        set.add_transform_rule(rule);
    }
    for &(source, target, bond, energy) in energies {
        set.add_energy_rule(
            EnergyRuleTemplate::from_record(&EnergyRuleRecord {
                source: Some(source.into()),
                target: Some(target.into()),
                bond: Some(bond.into()),
                energy: Some(energy),
                ..Default::default()
            })
            .unwrap(),
        );
    }
    set
}

fn board(width: usize, height: usize, seed: u64, patterns: PatternSet) -> Board {
    let config = BoardConfig {
        seed: Some(seed),
        ..BoardConfig::with_size(width, height)
    };
    Board::new(config, patterns).unwrap()
}

#[test]
fn test_two_cell_swap() {
    let rule = TransformRuleTemplate::simple("a", "_", "_", "a", 1.0);
    let mut b = board(2, 1, 3, patterns(vec![rule], &[]));
    let (left, right) = (Point::new(0, 0), Point::new(1, 0));
    b.set_particle(left, "a");
    let before = (b.write_count(left).unwrap(), b.write_count(right).unwrap());

    let mut steps = 0;
    while b.step() != StepOutcome::Accepted {
        steps += 1;
        assert!(steps < 1000, "swap never accepted");
    }

    assert_eq!(b.particle_name(left), Some("_"));
    assert_eq!(b.particle_name(right), Some("a"));
    assert_eq!(b.write_count(left), Some(before.0 + 1));
    assert_eq!(b.write_count(right), Some(before.1 + 1));
    assert_eq!(b.count("a"), 1);
    assert_eq!(b.count("_"), 1);
}

#[test]
fn test_partial_probability_leaves_no_op_residual() {
    let rule = TransformRuleTemplate::simple("a", "b", "c", "d", 0.3);
    let mut registry = ParticleRegistry::new(patterns(vec![rule], &[]), 256);
    let a = registry.get_or_create("a");
    let b = registry.get_or_create("b");
    registry.compile_transform(a, 1, b);
    let sampler = registry.transform(a, 1, b).unwrap();

    let mut rng = StdRandom::from_u64_seed(99);
    let trials = 20_000;
    let mut unchanged = 0;
    for _ in 0..trials {
        let outcome = sampler.sample(&mut rng).expect("closed total is 1");
        if outcome.is_no_op() {
            unchanged += 1;
        } else {
            assert_eq!(registry.name(outcome.new_source), "c");
            assert_eq!(registry.name(outcome.new_target), "d");
        }
    }
    let freq = unchanged as f64 / trials as f64;
    assert!((freq - 0.7).abs() < 0.02, "no-op frequency {}", freq);
}

#[test]
fn test_zero_energy_change_always_accepted() {
    let rule = TransformRuleTemplate::simple("a", "_", "_", "a", 1.0);
    let mut b = board(4, 4, 11, patterns(vec![rule], &[]));
    b.set_particle(Point::new(0, 0), "a");
    b.set_particle(Point::new(3, 3), "a");

    let stats = b.update(500);
    assert!(stats.accepted > 0);
    assert_eq!(stats.rejected, 0);
}

/// `a` bonded to its east neighbor `b`; turning into `c` breaks the bond.
fn bond_breaking_board(seed: u64) -> Board {
    let rule = TransformRuleTemplate::simple("a", "b", "c", "$T", 1.0);
    let mut b = board(2, 1, seed, patterns(vec![rule], &[("a", "b", "k", 1.0)]));
    b.set_particle(Point::new(0, 0), "a");
    b.set_particle(Point::new(1, 0), "b");
    b.add_bond(Point::new(0, 0), Point::new(1, 0), "k");
    b
}

#[test]
fn test_unfavorable_change_accepted_at_boltzmann_rate() {
    let mut b = bond_breaking_board(17);
    let initial = b.snapshot();

    let (mut accepted, mut rejected) = (0usize, 0usize);
    while accepted + rejected < 5_000 {
        match b.step() {
            StepOutcome::Accepted => {
                accepted += 1;
                b.restore(&initial).unwrap();
            }
            StepOutcome::Rejected => rejected += 1,
            _ => {}
        }
    }
    let rate = accepted as f64 / (accepted + rejected) as f64;
    assert!((rate - 0.1).abs() < 0.02, "acceptance rate {}", rate);
}

#[test]
fn test_rejection_leaves_board_untouched() {
    let mut b = bond_breaking_board(23);
    let mut before = b.snapshot();
    let rates: Vec<f64> = b.grid().points().map(|p| b.activity_rate(p)).collect();
    let top = b.top_rate();
    let counts = |b: &Board| ["a", "b", "c"].map(|name| b.count(name));
    let initial_counts = counts(&b);
    assert_eq!(initial_counts, [1, 1, 0]);

    let mut rejections = 0;
    while rejections < 50 {
        match b.step() {
            StepOutcome::Rejected => {
                rejections += 1;
                assert_eq!(b.snapshot(), before);
                assert_eq!(counts(&b), initial_counts);
                let now: Vec<f64> = b.grid().points().map(|p| b.activity_rate(p)).collect();
                assert_eq!(now, rates);
                assert_eq!(b.top_rate(), top);
            }
            StepOutcome::Accepted => {
                assert_eq!(counts(&b), [0, 1, 1]);
                b.restore(&before).unwrap();
                // Rolling back advances the write counters.
                before = b.snapshot();
            }
            _ => {}
        }
    }
}

#[test]
fn test_failed_binding_leaves_board_untouched() {
    let mut rule = TransformRuleTemplate::simple("a", "_", "_", "a", 1.0);
    rule.required.push(BondExpression::new("s", "x", "leash"));
    let mut b = board(3, 3, 5, patterns(vec![rule], &[]));
    b.set_particle(Point::new(1, 1), "a");
    let before = b.snapshot();

    let stats = b.update(200);
    assert_eq!(stats.accepted, 0);
    assert!(stats.bind_failures > 0);
    assert_eq!(b.snapshot(), before);
}

#[test]
fn test_bonds_stay_consistent_under_motion() {
    // Walkers drag a tether to their anchors; unleashed walkers roam freely.
    let mut drag = TransformRuleTemplate::simple("walker", "_", "_", "walker", 1.0);
    drag.required.push(BondExpression::new("x", "s", "tether"));
    drag.created.push(BondExpression::new("x", "sT", "tether"));
    let mut snap = TransformRuleTemplate::simple("walker", "walker", "walker", "walker", 0.2);
    snap.created.push(BondExpression::new("s", "t", "link"));
    let mut b = board(
        8,
        8,
        31,
        patterns(vec![drag, snap], &[("anchor", "walker", "tether", 0.5), ("walker", "walker", "link", 1.0)]),
    );

    for i in 0..4 {
        let anchor = Point::new(0, i * 2);
        let walker = Point::new(1, i * 2);
        b.set_particle(anchor, "anchor");
        b.set_particle(walker, "walker");
        b.add_bond(anchor, walker, "tether");
    }
    assert!(b.check_bond_consistency().is_ok());

    for _ in 0..20 {
        b.update(100);
        if let Err(e) = b.check_bond_consistency() {
            panic!("inconsistent bonds: {}", e);
        }
    }
    assert_eq!(b.count("anchor"), 4);
    assert_eq!(b.count("walker"), 4);
    assert_eq!(b.count("_"), 56);
}
