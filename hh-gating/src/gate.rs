//! One-dimensional Hodgkin-Huxley gates.
//!
//! A gate maps one scalar input, usually the membrane voltage, to the rate
//! pair `(A, B)` consumed by the channel integrator. Whatever supplied the
//! rates, the pair always follows the same convention: `A` is the forward
//! rate alpha and `B` is `alpha + beta`, or the equivalent `inf/tau` and
//! `1/tau` when the model is parameterised by time constant and steady
//! state. Keeping one convention at the query boundary is what lets the
//! channel treat every gate identically in its inner loop.
//!
//! Rates can be supplied three ways, and all of them end up in the same
//! lookup tables:
//!
//! - direct table assignment,
//! - a pair of compiled rate-law expressions evaluated over the grid,
//! - the canonical five-coefficient sigmoid/exponential family
//!   `y(x) = (P0 + P1*x) / (P2 + exp((x + P3)/P4))`, which covers the
//!   classic squid-axon rate functions with a single coefficient set.
//!
//! The query itself is a clamped table read with optional linear
//! interpolation. It runs once per gate per compartment per time step, so
//! it allocates nothing and touches at most two table entries.

use crate::error::{GatingError, Result};
use rate_expr::CompiledExpr;
use serde::{Deserialize, Serialize};

/// Identifier of the channel that owns a gate.
///
/// Copied channels alias the original's gates; a gate only accepts mutation
/// from the channel id it was created with.
pub type ChannelId = u64;

/// Entries smaller than this in magnitude are treated as singular during
/// table fills and healed from their neighbours.
pub const SINGULARITY_EPS: f64 = 1e-6;

/// Variables a one-dimensional rate expression may reference. `v` is the
/// gate input; the rest are writable scratch helpers.
pub const GATE_VARS: [&str; 5] = ["v", "alpha", "beta", "tau", "inf"];

/// How the gate's tables were supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GateForm {
    /// Tables assigned directly (also the parametric setup, which writes
    /// tables once and keeps its coefficients only for refills).
    #[default]
    Table,
    /// Tables filled from alpha and beta expressions.
    AlphaBeta,
    /// Tables filled from tau and inf expressions.
    TauInf,
}

/// A compiled expression pair: alpha/beta or tau/inf depending on the form.
#[derive(Debug, Clone)]
pub(crate) struct RatePair {
    pub(crate) first: CompiledExpr,
    pub(crate) second: CompiledExpr,
}

/// A single HH gating particle's rate source.
///
/// # Examples
///
/// ```
/// use hh_gating::{Gate1D, GateForm};
///
/// let owner = 1;
/// let mut gate = Gate1D::new(owner);
/// gate.set_range(owner, -0.1, 0.05, 1500).unwrap();
/// gate.set_tau_exprs(owner, "1e-3", "1/(1+exp(-(v+0.040)/0.005))").unwrap();
/// assert_eq!(gate.form(), GateForm::TauInf);
///
/// // Half-activation sits at -40 mV; query just above the grid point.
/// let dv = (0.05_f64 - (-0.1_f64)) / 1500.0;
/// let (a, b) = gate.lookup(-0.040 + dv / 2.0);
/// assert!((a / b - 0.5).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct Gate1D {
    owner: ChannelId,
    min: f64,
    max: f64,
    divs: usize,
    inv_dx: f64,
    a: Vec<f64>,
    b: Vec<f64>,
    use_interpolation: bool,
    form: GateForm,
    exprs: Option<RatePair>,
    alpha_coeffs: Option<[f64; 10]>,
    tau_coeffs: Option<[f64; 10]>,
}

impl Gate1D {
    /// Create an unfilled gate owned by `owner` with the default unit grid.
    pub fn new(owner: ChannelId) -> Self {
        Self {
            owner,
            min: 0.0,
            max: 1.0,
            divs: 1,
            inv_dx: 1.0,
            a: Vec::new(),
            b: Vec::new(),
            use_interpolation: false,
            form: GateForm::Table,
            exprs: None,
            alpha_coeffs: None,
            tau_coeffs: None,
        }
    }

    /// The id of the owning channel.
    pub fn owner(&self) -> ChannelId {
        self.owner
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn divs(&self) -> usize {
        self.divs
    }

    pub fn form(&self) -> GateForm {
        self.form
    }

    pub fn use_interpolation(&self) -> bool {
        self.use_interpolation
    }

    pub fn table_a(&self) -> &[f64] {
        &self.a
    }

    pub fn table_b(&self) -> &[f64] {
        &self.b
    }

    /// Source strings of the current expression pair, if the gate is
    /// formula-backed.
    pub fn expr_sources(&self) -> Option<(&str, &str)> {
        self.exprs
            .as_ref()
            .map(|pair| (pair.first.source(), pair.second.source()))
    }

    /// The 13-scalar parametric setup last applied with [`Self::setup_alpha`],
    /// re-assembled with the current grid.
    pub fn alpha_parms(&self) -> Option<[f64; 13]> {
        self.alpha_coeffs.map(|c| {
            let mut parms = [0.0; 13];
            parms[..10].copy_from_slice(&c);
            parms[10] = self.divs as f64;
            parms[11] = self.min;
            parms[12] = self.max;
            parms
        })
    }

    /// Whether the tables can be queried.
    pub fn is_filled(&self) -> bool {
        self.a.len() >= 2 && self.a.len() == self.b.len()
    }

    /// Look up the rate pair at `x`.
    ///
    /// Inputs below `min` or above `max` clamp to the endpoint entries.
    /// Between them the entry at `floor((x - min) * divs / (max - min))` is
    /// returned, linearly blended with the next entry when interpolation is
    /// enabled. An unfilled gate reports zero rates.
    pub fn lookup(&self, x: f64) -> (f64, f64) {
        if !self.is_filled() {
            return (0.0, 0.0);
        }
        if x <= self.min {
            return (self.a[0], self.b[0]);
        }
        let last = self.a.len() - 1;
        if x >= self.max {
            return (self.a[last], self.b[last]);
        }
        let pos = (x - self.min) * self.inv_dx;
        let i = (pos as usize).min(last);
        if !self.use_interpolation || i == last {
            return (self.a[i], self.b[i]);
        }
        let frac = pos - i as f64;
        (
            self.a[i] * (1.0 - frac) + self.a[i + 1] * frac,
            self.b[i] * (1.0 - frac) + self.b[i + 1] * frac,
        )
    }

    /// Switch between direct indexing and linear interpolation.
    pub fn set_use_interpolation(&mut self, caller: ChannelId, flag: bool) {
        if !self.original(caller, "interpolation mode change") {
            return;
        }
        self.use_interpolation = flag;
    }

    /// Assign both tables directly.
    ///
    /// The tables must have equal length of at least two entries; the grid
    /// keeps its current `min`/`max` and takes `divs` from the table length.
    pub fn set_tables(&mut self, caller: ChannelId, a: Vec<f64>, b: Vec<f64>) -> Result<()> {
        if !self.original(caller, "table assignment") {
            return Ok(());
        }
        if a.len() != b.len() {
            return Err(GatingError::ShapeMismatch {
                a_len: a.len(),
                b_len: b.len(),
            });
        }
        if a.len() < 2 {
            return Err(GatingError::out_of_range(
                "divs",
                a.len() as f64 - 1.0,
                "tables need at least two entries",
            ));
        }
        if let Some(&bad) = a.iter().chain(b.iter()).find(|x| !x.is_finite()) {
            return Err(GatingError::out_of_range(
                "table entry",
                bad,
                "tables must be finite",
            ));
        }
        self.divs = a.len() - 1;
        self.inv_dx = self.divs as f64 / (self.max - self.min);
        self.a = a;
        self.b = b;
        self.form = GateForm::Table;
        self.exprs = None;
        self.alpha_coeffs = None;
        self.tau_coeffs = None;
        Ok(())
    }

    /// Supply alpha and beta as expressions of `v` and refill the tables.
    ///
    /// Both expressions are compiled before anything changes, so a malformed
    /// pair leaves the previous supply intact.
    pub fn set_alpha_exprs(&mut self, caller: ChannelId, alpha: &str, beta: &str) -> Result<()> {
        if !self.original(caller, "alpha/beta expression update") {
            return Ok(());
        }
        let first = CompiledExpr::compile(alpha, &GATE_VARS)?;
        let second = CompiledExpr::compile(beta, &GATE_VARS)?;
        self.exprs = Some(RatePair { first, second });
        self.form = GateForm::AlphaBeta;
        self.alpha_coeffs = None;
        self.tau_coeffs = None;
        self.refill_from_exprs();
        Ok(())
    }

    /// Supply tau and inf as expressions of `v` and refill the tables.
    pub fn set_tau_exprs(&mut self, caller: ChannelId, tau: &str, inf: &str) -> Result<()> {
        if !self.original(caller, "tau/inf expression update") {
            return Ok(());
        }
        let first = CompiledExpr::compile(tau, &GATE_VARS)?;
        let second = CompiledExpr::compile(inf, &GATE_VARS)?;
        self.exprs = Some(RatePair { first, second });
        self.form = GateForm::TauInf;
        self.alpha_coeffs = None;
        self.tau_coeffs = None;
        self.refill_from_exprs();
        Ok(())
    }

    /// Canonical parametric setup of an alpha/beta pair.
    ///
    /// `parms` is `[A0..A4, B0..B4, divs, min, max]`. Each coefficient
    /// quintet describes one curve of the family
    /// `y(x) = (P0 + P1*x) / (P2 + exp((x + P3)/P4))`; after sampling, the B
    /// table is rewritten to `alpha + beta`. The call replaces the grid and
    /// retains the coefficients so [`Self::alpha_parms`] round-trips and
    /// grid changes can re-run the fill.
    pub fn setup_alpha(&mut self, caller: ChannelId, parms: [f64; 13]) -> Result<()> {
        if !self.original(caller, "parametric alpha setup") {
            return Ok(());
        }
        self.apply_grid_from_parms(&parms)?;
        let coeffs = split_coeffs(&parms);
        self.fill_parametric(&coeffs, false);
        self.alpha_coeffs = Some(coeffs_flat(&coeffs));
        self.tau_coeffs = None;
        self.exprs = None;
        self.form = GateForm::Table;
        Ok(())
    }

    /// Canonical parametric setup with the curves read as tau and inf.
    pub fn setup_tau(&mut self, caller: ChannelId, parms: [f64; 13]) -> Result<()> {
        if !self.original(caller, "parametric tau setup") {
            return Ok(());
        }
        self.apply_grid_from_parms(&parms)?;
        let coeffs = split_coeffs(&parms);
        self.fill_parametric(&coeffs, true);
        self.tau_coeffs = Some(coeffs_flat(&coeffs));
        self.alpha_coeffs = None;
        self.exprs = None;
        self.form = GateForm::Table;
        Ok(())
    }

    /// Change the input range and grid resolution.
    ///
    /// A formula- or parametric-backed gate re-runs its fill on the new
    /// grid; a direct table is resampled onto it by linear interpolation.
    pub fn set_range(&mut self, caller: ChannelId, min: f64, max: f64, divs: usize) -> Result<()> {
        if !self.original(caller, "range change") {
            return Ok(());
        }
        if divs < 1 {
            return Err(GatingError::out_of_range(
                "divs",
                divs as f64,
                "at least one division required",
            ));
        }
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(GatingError::out_of_range(
                "min/max",
                min,
                "min must be finite and strictly below max",
            ));
        }
        let (old_min, old_max) = (self.min, self.max);
        self.min = min;
        self.max = max;
        self.divs = divs;
        self.inv_dx = divs as f64 / (max - min);
        if self.exprs.is_some() {
            self.refill_from_exprs();
        } else if let Some(c) = self.alpha_coeffs {
            self.fill_parametric(&split_flat(&c), false);
        } else if let Some(c) = self.tau_coeffs {
            self.fill_parametric(&split_flat(&c), true);
        } else if self.a.len() >= 2 {
            self.a = resample(&self.a, old_min, old_max, min, max, divs);
            self.b = resample(&self.b, old_min, old_max, min, max, divs);
        }
        Ok(())
    }

    pub fn set_min(&mut self, caller: ChannelId, min: f64) -> Result<()> {
        self.set_range(caller, min, self.max, self.divs)
    }

    pub fn set_max(&mut self, caller: ChannelId, max: f64) -> Result<()> {
        self.set_range(caller, self.min, max, self.divs)
    }

    pub fn set_divs(&mut self, caller: ChannelId, divs: usize) -> Result<()> {
        self.set_range(caller, self.min, self.max, divs)
    }

    /// Mutation guard. Copies of a channel alias the original's gate, and
    /// only the original may change it.
    fn original(&self, caller: ChannelId, what: &str) -> bool {
        if caller == self.owner {
            return true;
        }
        log::warn!(
            "ignoring {} from channel {}: gate is owned by channel {}",
            what,
            caller,
            self.owner
        );
        false
    }

    fn apply_grid_from_parms(&mut self, parms: &[f64; 13]) -> Result<()> {
        let divs = parms[10];
        if !divs.is_finite() || divs < 1.0 {
            return Err(GatingError::out_of_range(
                "divs",
                divs,
                "at least one division required",
            ));
        }
        let (min, max) = (parms[11], parms[12]);
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(GatingError::out_of_range(
                "min/max",
                min,
                "min must be finite and strictly below max",
            ));
        }
        self.divs = divs as usize;
        self.min = min;
        self.max = max;
        self.inv_dx = self.divs as f64 / (max - min);
        Ok(())
    }

    fn fill_parametric(&mut self, coeffs: &([f64; 5], [f64; 5]), tau_form: bool) {
        let n = self.divs + 1;
        let dx = (self.max - self.min) / self.divs as f64;
        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        for i in 0..n {
            let x = self.min + i as f64 * dx;
            a.push(param_curve(&coeffs.0, x, dx));
            b.push(param_curve(&coeffs.1, x, dx));
        }
        if tau_form {
            tau_inf_to_rates(&mut a, &mut b);
        } else {
            for i in 0..n {
                b[i] += a[i];
            }
        }
        self.a = a;
        self.b = b;
    }

    fn refill_from_exprs(&mut self) {
        let Some(pair) = self.exprs.clone() else {
            return;
        };
        let n = self.divs + 1;
        let dx = (self.max - self.min) / self.divs as f64;
        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        for i in 0..n {
            let v = self.min + i as f64 * dx;
            // The helper slots are shared by the pair within one sample, so
            // the second expression sees what the first assigned.
            let mut slots = [v, 0.0, 0.0, 0.0, 0.0];
            let first = pair.first.eval(&mut slots);
            let second = pair.second.eval(&mut slots);
            a.push(first);
            b.push(second);
        }
        match self.form {
            GateForm::TauInf => tau_inf_to_rates(&mut a, &mut b),
            _ => {
                for i in 0..n {
                    b[i] += a[i];
                }
            }
        }
        heal_table(&mut a);
        heal_table(&mut b);
        self.a = a;
        self.b = b;
    }
}

/// Evaluate one curve of the canonical family at `x`.
///
/// A curve with `|P4| < eps` is zero everywhere. A sample whose denominator
/// vanishes sits on a removable singularity and is replaced by the average
/// of two flanking samples at `x +/- dx/10`.
fn param_curve(p: &[f64; 5], x: f64, dx: f64) -> f64 {
    if p[4].abs() < SINGULARITY_EPS {
        return 0.0;
    }
    let value_at = |x: f64| (p[0] + p[1] * x) / (p[2] + ((x + p[3]) / p[4]).exp());
    let denom = p[2] + ((x + p[3]) / p[4]).exp();
    if denom.abs() < SINGULARITY_EPS {
        return 0.5 * (value_at(x - 0.1 * dx) + value_at(x + 0.1 * dx));
    }
    (p[0] + p[1] * x) / denom
}

/// Convert sampled tau/inf tables to the (A, B) rate convention in place.
/// Entries where tau vanishes carry the previous entry forward.
fn tau_inf_to_rates(a: &mut [f64], b: &mut [f64]) {
    for i in 0..a.len() {
        let tau = a[i];
        let inf = b[i];
        if tau.abs() < SINGULARITY_EPS {
            if i > 0 {
                a[i] = a[i - 1];
                b[i] = b[i - 1];
            } else {
                a[i] = 0.0;
                b[i] = 0.0;
            }
        } else {
            a[i] = inf / tau;
            b[i] = 1.0 / tau;
        }
    }
}

/// Replace NaN, infinite and near-zero entries by linear extension from the
/// nearest two valid neighbours. With fewer than two valid entries there is
/// nothing to anchor on and the table is left alone.
fn heal_table(table: &mut [f64]) {
    let is_valid = |x: f64| x.is_finite() && x.abs() >= SINGULARITY_EPS;
    let valid: Vec<usize> = (0..table.len())
        .filter(|&i| is_valid(table[i]))
        .collect();
    if valid.len() < 2 || valid.len() == table.len() {
        return;
    }
    for i in 0..table.len() {
        if is_valid(table[i]) {
            continue;
        }
        let below = valid.iter().rev().find(|&&j| j < i).copied();
        let above = valid.iter().find(|&&j| j > i).copied();
        let (j1, j2) = match (below, above) {
            (Some(b), Some(a)) => (b, a),
            (Some(b), None) => match valid.iter().rev().find(|&&j| j < b).copied() {
                Some(b2) => (b2, b),
                None => continue,
            },
            (None, Some(a)) => match valid.iter().find(|&&j| j > a).copied() {
                Some(a2) => (a, a2),
                None => continue,
            },
            (None, None) => continue,
        };
        let slope = (table[j2] - table[j1]) / (j2 - j1) as f64;
        table[i] = table[j1] + slope * (i as f64 - j1 as f64);
    }
}

/// Resample a table from one uniform grid onto another, clamping beyond the
/// old endpoints.
fn resample(
    table: &[f64],
    old_min: f64,
    old_max: f64,
    new_min: f64,
    new_max: f64,
    new_divs: usize,
) -> Vec<f64> {
    let old_last = table.len() - 1;
    let old_inv_dx = old_last as f64 / (old_max - old_min);
    let new_dx = (new_max - new_min) / new_divs as f64;
    (0..=new_divs)
        .map(|i| {
            let x = new_min + i as f64 * new_dx;
            if x <= old_min {
                return table[0];
            }
            if x >= old_max {
                return table[old_last];
            }
            let pos = (x - old_min) * old_inv_dx;
            let j = (pos as usize).min(old_last - 1);
            let frac = pos - j as f64;
            table[j] * (1.0 - frac) + table[j + 1] * frac
        })
        .collect()
}

fn split_coeffs(parms: &[f64; 13]) -> ([f64; 5], [f64; 5]) {
    let mut a = [0.0; 5];
    let mut b = [0.0; 5];
    a.copy_from_slice(&parms[..5]);
    b.copy_from_slice(&parms[5..10]);
    (a, b)
}

fn split_flat(flat: &[f64; 10]) -> ([f64; 5], [f64; 5]) {
    let mut a = [0.0; 5];
    let mut b = [0.0; 5];
    a.copy_from_slice(&flat[..5]);
    b.copy_from_slice(&flat[5..]);
    (a, b)
}

fn coeffs_flat(coeffs: &([f64; 5], [f64; 5])) -> [f64; 10] {
    let mut flat = [0.0; 10];
    flat[..5].copy_from_slice(&coeffs.0);
    flat[5..].copy_from_slice(&coeffs.1);
    flat
}
