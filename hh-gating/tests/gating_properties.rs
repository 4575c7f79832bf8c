//! Property checks and end-to-end scenarios over the public gating API.

use approx::assert_relative_eq;
use hh_gating::{presets, Channel, Gate1D, InputIndex, Slot, Tick};
use proptest::prelude::*;

const OWNER: u64 = 100_001;

fn table_gate(pairs: &[(f64, f64)], min: f64, max: f64) -> Gate1D {
    let mut gate = Gate1D::new(OWNER);
    gate.set_range(OWNER, min, max, pairs.len() - 1).unwrap();
    let a: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let b: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    gate.set_tables(OWNER, a, b).unwrap();
    gate
}

fn entry_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((1e-3f64..1e3, 1e-3f64..1e3), 2..40)
}

proptest! {
    #[test]
    fn lookup_clamps_to_endpoints(
        pairs in entry_strategy(),
        min in -1.0f64..0.0,
        width in 0.1f64..2.0,
    ) {
        let max = min + width;
        let gate = table_gate(&pairs, min, max);
        let first = pairs[0];
        let last = pairs[pairs.len() - 1];
        prop_assert_eq!(gate.lookup(min), first);
        prop_assert_eq!(gate.lookup(min - 5.0), first);
        prop_assert_eq!(gate.lookup(max), last);
        prop_assert_eq!(gate.lookup(max + 5.0), last);
    }

    #[test]
    fn direct_lookup_indexes_by_floor(
        pairs in entry_strategy(),
        min in -1.0f64..0.0,
        width in 0.1f64..2.0,
        t in 0.01f64..0.99,
    ) {
        let max = min + width;
        let gate = table_gate(&pairs, min, max);
        let x = min + t * width;
        prop_assume!(x > min && x < max);
        let inv_dx = (pairs.len() - 1) as f64 / (max - min);
        let i = (((x - min) * inv_dx) as usize).min(pairs.len() - 1);
        prop_assert_eq!(gate.lookup(x), pairs[i]);
    }

    #[test]
    fn interpolated_lookup_is_convex(
        pairs in entry_strategy(),
        min in -1.0f64..0.0,
        width in 0.1f64..2.0,
        t in 0.01f64..0.99,
    ) {
        let max = min + width;
        let mut gate = table_gate(&pairs, min, max);
        gate.set_use_interpolation(OWNER, true);
        let x = min + t * width;
        prop_assume!(x > min && x < max);
        let inv_dx = (pairs.len() - 1) as f64 / (max - min);
        let i = (((x - min) * inv_dx) as usize).min(pairs.len() - 1);
        let j = (i + 1).min(pairs.len() - 1);
        let (a, b) = gate.lookup(x);
        let lo_a = pairs[i].0.min(pairs[j].0);
        let hi_a = pairs[i].0.max(pairs[j].0);
        let lo_b = pairs[i].1.min(pairs[j].1);
        let hi_b = pairs[i].1.max(pairs[j].1);
        prop_assert!(a >= lo_a - 1e-9 && a <= hi_a + 1e-9, "a = {a} not in [{lo_a}, {hi_a}]");
        prop_assert!(b >= lo_b - 1e-9 && b <= hi_b + 1e-9, "b = {b} not in [{lo_b}, {hi_b}]");
    }

    #[test]
    fn formula_refill_tracks_grid_changes(
        min in -0.5f64..0.0,
        width in 0.05f64..1.0,
        divs in 1usize..120,
    ) {
        let mut gate = Gate1D::new(OWNER);
        gate.set_range(OWNER, -0.1, 0.05, 20).unwrap();
        gate.set_alpha_exprs(OWNER, "1000*exp(v*10)+2", "3000").unwrap();

        let max = min + width;
        gate.set_range(OWNER, min, max, divs).unwrap();
        prop_assert_eq!(gate.table_a().len(), divs + 1);
        let dx = (max - min) / divs as f64;
        for i in 0..=divs {
            let v = min + i as f64 * dx;
            let want = 1000.0 * (v * 10.0f64).exp() + 2.0;
            prop_assert!(
                (gate.table_a()[i] - want).abs() <= 1e-9 * want.max(1.0),
                "entry {i}: {} vs {want}", gate.table_a()[i]
            );
        }
    }
}

// Scenario: squid sodium activation gate from the canonical parametric
// form, using the absolute-voltage coefficient set. The reinit state must
// match the closed-form steady state at the -70 mV grid point to 1e-9; the
// rounded textbook figure is a coarser sanity bound.
#[test]
fn squid_m_gate_steady_state_at_rest() {
    let dx = (0.050_f64 - (-0.110_f64)) / 3000.0;
    let x = -0.110 + 750.0 * dx; // -70 mV
    let mut na = presets::squid_na().unwrap();
    na.set_vm(x + dx / 2.0);
    na.reinit(&Tick { dt: 1e-5 }).unwrap();

    let alpha = (-4.5e3 + -1.0e5 * x) / (-1.0 + ((x + 0.045) / -0.010).exp());
    let beta = 4.0e3 / ((x + 0.070) / 0.018).exp();
    let m = na.state(Slot::X).unwrap();
    assert_relative_eq!(m, alpha / (alpha + beta), epsilon = 1e-9);
    assert_relative_eq!(m, 0.0529, epsilon = 5e-4);
}

// Scenario: analytic alpha/beta supply agrees with direct expression
// evaluation at a grid point.
#[test]
fn analytic_n_gate_matches_direct_evaluation() {
    let mut gate = Gate1D::new(OWNER);
    gate.set_range(OWNER, -0.110, 0.050, 3200).unwrap();
    gate.set_alpha_exprs(
        OWNER,
        "0.01*(10 - (v*1000+70))/(exp((10 - (v*1000+70))/10) - 1)*1000",
        "0.125*exp(-(v*1000+70)/80)*1000",
    )
    .unwrap();

    let dv = (0.050_f64 - (-0.110_f64)) / 3200.0;
    let v = -0.110 + 900.0 * dv; // -0.065 V
    let (a, b) = gate.lookup(v + dv / 2.0);
    let x = 10.0 - (v * 1000.0 + 70.0);
    let alpha = 0.01 * x / ((x / 10.0).exp() - 1.0) * 1000.0;
    let beta = 0.125 * (-(v * 1000.0 + 70.0) / 80.0).exp() * 1000.0;
    assert_relative_eq!(a, alpha, max_relative = 1e-12);
    assert_relative_eq!(b, alpha + beta, max_relative = 1e-12);
}

// Scenario: tau/inf supply, constant 1 ms time constant.
#[test]
fn tau_inf_channel_reinit_hits_half_activation() {
    let mut ch = Channel::new();
    ch.set_gbar(1.0);
    ch.set_power(Slot::X, 1).unwrap();
    ch.set_gate_range(Slot::X, -0.100, 0.050, 3000).unwrap();
    ch.set_tau_exprs(Slot::X, "1e-3", "1/(1+exp(-(v+0.040)/0.005))")
        .unwrap();

    let dv = (0.050_f64 - (-0.100_f64)) / 3000.0;
    ch.set_vm(-0.040 + dv / 2.0);
    ch.reinit(&Tick { dt: 1e-4 }).unwrap();
    assert_relative_eq!(ch.state(Slot::X).unwrap(), 0.5, epsilon = 1e-9);

    let gate = ch.gate1(Slot::X).unwrap();
    let (_, b) = gate.read().unwrap().lookup(-0.040 + dv / 2.0);
    assert_relative_eq!(1.0 / b, 1e-3, epsilon = 1e-12);
}

// Scenario: stability of the gating integrator under stiff rates.
#[test]
fn stiff_gate_converges_within_ten_steps() {
    let mut ch = Channel::new();
    ch.set_gbar(1.0);
    ch.set_power(Slot::X, 1).unwrap();
    ch.set_gate_range(Slot::X, -1.0, 1.0, 1).unwrap();
    ch.set_gate_tables(Slot::X, vec![6.0e3; 2], vec![1.0e4; 2])
        .unwrap();
    ch.set_state(Slot::X, 0.0).unwrap();
    ch.reinit(&Tick { dt: 1e-4 }).unwrap();

    let target = 0.6;
    let mut prev = 0.0;
    for step in 1..=10 {
        ch.process(&Tick { dt: 1e-4 });
        let g = ch.state(Slot::X).unwrap();
        assert!(g > prev, "not monotone at step {step}");
        assert!(g <= target + 1e-12, "overshoot at step {step}");
        prev = g;
    }
    assert!((target - prev) / target < 0.01);
}

// Scenario: two-dimensional input routing follows the index property.
#[test]
fn two_dim_routing_selects_concentration() {
    let mut ch = Channel::new_two_dim();
    ch.set_gbar(1.0);
    ch.set_power(Slot::X, 1).unwrap();
    ch.set_alpha_exprs(Slot::X, "1500/(1 + (c/1.5e-4 * exp(-77 * v)))", "500")
        .unwrap();
    ch.set_input_index(Slot::X, "VOLT_C1_INDEX".parse::<InputIndex>().unwrap())
        .unwrap();
    ch.set_vm(-0.05);
    ch.set_conc1(1e-4);
    ch.set_conc2(5e-4);

    let alpha = |c: f64| 1500.0 / (1.0 + (c / 1.5e-4 * (-77.0 * -0.05f64).exp()));

    ch.reinit(&Tick { dt: 1e-4 }).unwrap();
    let with_c1 = alpha(1e-4) / (alpha(1e-4) + 500.0);
    assert_relative_eq!(ch.state(Slot::X).unwrap(), with_c1, max_relative = 1e-12);

    ch.set_input_index(Slot::X, "VOLT_C2_INDEX".parse::<InputIndex>().unwrap())
        .unwrap();
    ch.reinit(&Tick { dt: 1e-4 }).unwrap();
    let with_c2 = alpha(5e-4) / (alpha(5e-4) + 500.0);
    assert_relative_eq!(ch.state(Slot::X).unwrap(), with_c2, max_relative = 1e-12);
    assert_ne!(with_c1, with_c2);
}

// Scenario: a duplicated channel shares its gates read-only.
#[test]
fn copied_channel_cannot_mutate_shared_gate() {
    let mut original = Channel::new();
    original.set_gbar(1.0);
    original.set_power(Slot::X, 1).unwrap();
    original.set_gate_range(Slot::X, -0.1, 0.05, 100).unwrap();
    original
        .set_alpha_exprs(Slot::X, "1000*exp(v*10)+2", "3000")
        .unwrap();

    let copy = original.duplicate();
    let gate = original.gate1(Slot::X).unwrap();
    let before_a = gate.read().unwrap().table_a().to_vec();
    let before_sources = {
        let g = gate.read().unwrap();
        let (a, b) = g.expr_sources().unwrap();
        (a.to_string(), b.to_string())
    };

    // Refused through the copy, tables untouched
    assert!(copy.set_alpha_exprs(Slot::X, "7", "7").is_ok());
    assert_eq!(gate.read().unwrap().table_a(), &before_a[..]);
    {
        let g = gate.read().unwrap();
        let (a, b) = g.expr_sources().unwrap();
        assert_eq!((a.to_string(), b.to_string()), before_sources);
    }

    // Honoured through the original, visible through the copy
    original
        .set_alpha_exprs(Slot::X, "2000*exp(v*10)+2", "3000")
        .unwrap();
    let shared = copy.gate1(Slot::X).unwrap();
    assert_ne!(shared.read().unwrap().table_a(), &before_a[..]);
}

// Setting the same expressions twice produces bit-identical tables.
#[test]
fn expression_refill_is_idempotent() {
    let mut ch = Channel::new();
    ch.set_power(Slot::X, 1).unwrap();
    ch.set_gate_range(Slot::X, -0.1, 0.05, 400).unwrap();
    let alpha = "1000*exp(v*20)";
    let beta = "500/(1+exp(-(v+0.02)/0.01))";
    ch.set_alpha_exprs(Slot::X, alpha, beta).unwrap();
    let gate = ch.gate1(Slot::X).unwrap();
    let a1 = gate.read().unwrap().table_a().to_vec();
    let b1 = gate.read().unwrap().table_b().to_vec();
    ch.set_alpha_exprs(Slot::X, alpha, beta).unwrap();
    assert_eq!(gate.read().unwrap().table_a(), &a1[..]);
    assert_eq!(gate.read().unwrap().table_b(), &b1[..]);
}

// The 13-scalar parametric setup reads back unchanged.
#[test]
fn parametric_setup_round_trips() {
    let parms = [
        -4.5e3, -1.0e5, -1.0, 0.045, -0.010, 4.0e3, 0.0, 0.0, 0.070, 0.018, 3000.0, -0.110, 0.050,
    ];
    let mut ch = Channel::new();
    ch.set_power(Slot::X, 3).unwrap();
    ch.setup_alpha(Slot::X, parms).unwrap();
    let gate = ch.gate1(Slot::X).unwrap();
    assert_eq!(gate.read().unwrap().alpha_parms().unwrap(), parms);
}
