//! Two-dimensional gates: rates over voltage and a concentration.
//!
//! Calcium-dependent potassium channels and their relatives need rate laws
//! over two scalars at once. Unlike the one-dimensional gate there is no
//! precomputed table here; the compiled expression pair is evaluated on
//! every query. The query contract is identical, so a channel composes 1-D
//! and 2-D gates the same way.

use crate::error::Result;
use crate::gate::{ChannelId, GateForm};
use rate_expr::CompiledExpr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Variables a two-dimensional rate expression may reference. `v` and `c`
/// are the gate inputs; the rest are writable scratch helpers.
pub const GATE2D_VARS: [&str; 6] = ["v", "c", "alpha", "beta", "tau", "inf"];

/// Time constants below this magnitude are clamped during evaluation so a
/// degenerate tau expression degrades instead of producing infinities.
const TAU_FLOOR: f64 = 1e-15;

/// A gate whose rates depend on two inputs, evaluated per call.
///
/// # Examples
///
/// ```
/// use hh_gating::Gate2D;
///
/// let owner = 1;
/// let mut gate = Gate2D::new(owner);
/// gate.set_alpha_exprs(owner, "1500/(1 + (c/1.5e-4 * exp(-77 * v)))", "500")
///     .unwrap();
///
/// let (a, b) = gate.evaluate(-0.05, 1e-4);
/// assert!(a > 0.0 && b > a);
/// ```
#[derive(Debug)]
pub struct Gate2D {
    owner: ChannelId,
    form: GateForm,
    first: Option<CompiledExpr>,
    second: Option<CompiledExpr>,
    warned_degenerate_tau: AtomicBool,
}

impl Gate2D {
    /// Create an unconfigured gate owned by `owner`.
    pub fn new(owner: ChannelId) -> Self {
        Self {
            owner,
            form: GateForm::AlphaBeta,
            first: None,
            second: None,
            warned_degenerate_tau: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> ChannelId {
        self.owner
    }

    pub fn form(&self) -> GateForm {
        self.form
    }

    /// Whether an expression pair has been supplied.
    pub fn is_configured(&self) -> bool {
        self.first.is_some() && self.second.is_some()
    }

    /// Source strings of the current expression pair.
    pub fn expr_sources(&self) -> Option<(&str, &str)> {
        match (&self.first, &self.second) {
            (Some(first), Some(second)) => Some((first.source(), second.source())),
            _ => None,
        }
    }

    /// Supply alpha and beta as expressions of `v` and `c`.
    pub fn set_alpha_exprs(&mut self, caller: ChannelId, alpha: &str, beta: &str) -> Result<()> {
        if !self.original(caller, "alpha/beta expression update") {
            return Ok(());
        }
        let first = CompiledExpr::compile(alpha, &GATE2D_VARS)?;
        let second = CompiledExpr::compile(beta, &GATE2D_VARS)?;
        self.first = Some(first);
        self.second = Some(second);
        self.form = GateForm::AlphaBeta;
        Ok(())
    }

    /// Supply tau and inf as expressions of `v` and `c`.
    pub fn set_tau_exprs(&mut self, caller: ChannelId, tau: &str, inf: &str) -> Result<()> {
        if !self.original(caller, "tau/inf expression update") {
            return Ok(());
        }
        let first = CompiledExpr::compile(tau, &GATE2D_VARS)?;
        let second = CompiledExpr::compile(inf, &GATE2D_VARS)?;
        self.first = Some(first);
        self.second = Some(second);
        self.form = GateForm::TauInf;
        Ok(())
    }

    /// Evaluate the rate pair at `(v, c)` in the (A, B) convention.
    ///
    /// An unconfigured gate reports zero rates.
    pub fn evaluate(&self, v: f64, c: f64) -> (f64, f64) {
        let (Some(first), Some(second)) = (&self.first, &self.second) else {
            return (0.0, 0.0);
        };
        let mut slots = [v, c, 0.0, 0.0, 0.0, 0.0];
        let x = first.eval(&mut slots);
        let y = second.eval(&mut slots);
        match self.form {
            GateForm::TauInf => {
                let mut tau = x;
                if tau.abs() < TAU_FLOOR {
                    if !self.warned_degenerate_tau.swap(true, Ordering::Relaxed) {
                        log::warn!(
                            "tau expression evaluated to {tau} at (v={v}, c={c}); clamping"
                        );
                    }
                    tau = TAU_FLOOR;
                }
                (y / tau, 1.0 / tau)
            }
            _ => (x, x + y),
        }
    }

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
}

impl Clone for Gate2D {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            form: self.form,
            first: self.first.clone(),
            second: self.second.clone(),
            warned_degenerate_tau: AtomicBool::new(
                self.warned_degenerate_tau.load(Ordering::Relaxed),
            ),
        }
    }
}
