//! Voltage-gated channel composition and per-tick integration.
//!
//! A channel owns up to three gating particles, conventionally X, Y and Z,
//! each raised to an integer power, and folds their states into a
//! conductance every tick:
//!
//! ```text
//! Gk = gBar * X^xp * Y^yp * Z^zp * modulation
//! Ik = (Ek - Vm) * Gk
//! ```
//!
//! The scheduler drives a channel with `reinit` once and `process` every
//! tick thereafter; between calls the compartment and any calcium pools
//! push their scalars in through the setters. All work happens
//! synchronously inside those calls.
//!
//! Gates are shared read-mostly: duplicating a channel hands the copy
//! references to the original's gates, and the gates themselves refuse
//! mutation through anything but the owning channel's id. State that moves
//! during `process` (the per-slot open fractions, the cached outputs) lives
//! in the channel, never in the gate, which is what makes sharing safe.

use crate::error::{GatingError, Result};
use crate::gate::{ChannelId, Gate1D};
use crate::gate2d::Gate2D;
use crate::routing::{InputIndex, InputSource};
use crate::solve::{advance_gate, take_power};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reinit refuses to seed a gate whose total rate is below this.
pub const REINIT_B_FLOOR: f64 = 1e-15;

/// Instant-mode bits, one per slot.
pub const INSTANT_X: u8 = 1;
pub const INSTANT_Y: u8 = 2;
pub const INSTANT_Z: u8 = 4;

fn next_channel_id() -> ChannelId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// One tick of simulated time, as delivered by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Step length in seconds.
    pub dt: f64,
}

/// The per-tick payload a channel hands back to its compartment: the
/// conductance/reversal pair and the driven current.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelOutput {
    pub gk: f64,
    pub ek: f64,
    pub ik: f64,
}

/// The gate slots, in composition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    X,
    Y,
    Z,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::X, Slot::Y, Slot::Z];

    fn idx(self) -> usize {
        match self {
            Slot::X => 0,
            Slot::Y => 1,
            Slot::Z => 2,
        }
    }

    fn label(self) -> char {
        match self {
            Slot::X => 'X',
            Slot::Y => 'Y',
            Slot::Z => 'Z',
        }
    }

    fn from_idx(i: usize) -> Slot {
        Slot::ALL[i]
    }
}

/// Who steps the channel.
///
/// A solver that takes ownership of a compartment's channels does its own
/// implicit update of the gate states; such a channel keeps its full field
/// surface but turns `process` and `reinit` into no-ops that report the
/// last outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Driver {
    #[default]
    SelfStepping,
    SolverDriven,
}

/// Configuration lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelPhase {
    /// No gates allocated.
    Empty,
    /// At least one gate allocated, not yet initialised.
    Configured,
    /// `reinit` has run.
    Running,
}

/// Whether the channel's gates take one input or two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    OneDim,
    TwoDim,
}

#[derive(Debug, Clone)]
enum GateRef {
    OneDim(Arc<RwLock<Gate1D>>),
    TwoDim(Arc<RwLock<Gate2D>>),
}

/// A powered gate slot and its integration state.
#[derive(Debug, Clone)]
struct SlotState {
    gate: GateRef,
    power: u32,
    /// Open fraction in [0, 1].
    state: f64,
    /// Set when the state was seeded explicitly; reinit then leaves it.
    inited: bool,
    index: InputIndex,
}

/// Serialisable snapshot of a channel's scalar configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub gbar: f64,
    pub ek: f64,
    pub xpower: i32,
    pub ypower: i32,
    pub zpower: i32,
    pub instant: u8,
    pub xindex: InputIndex,
    pub yindex: InputIndex,
    pub zindex: InputIndex,
}

/// A voltage- (and optionally concentration-) gated conductance.
///
/// # Examples
///
/// ```
/// use hh_gating::{Channel, Slot, Tick};
///
/// let mut ch = Channel::new();
/// ch.set_gbar(360.0);
/// ch.set_ek(-0.082);
/// ch.set_power(Slot::X, 4).unwrap();
/// ch.set_gate_range(Slot::X, -0.1, 0.05, 3000).unwrap();
/// ch.set_alpha_exprs(Slot::X, "100*(v+0.06)/(1-exp(-(v+0.06)/0.01))*1000", "125*exp(-(v+0.07)/0.08)")
///     .unwrap();
///
/// ch.set_vm(-0.07);
/// ch.reinit(&Tick { dt: 1e-4 }).unwrap();
/// let out = ch.process(&Tick { dt: 1e-4 });
/// assert!(out.gk >= 0.0);
/// ```
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    kind: ChannelKind,
    gbar: f64,
    ek: f64,
    gk: f64,
    ik: f64,
    vm: f64,
    conc1: f64,
    conc2: f64,
    modulation: f64,
    instant: u8,
    driver: Driver,
    phase: ChannelPhase,
    slots: [Option<SlotState>; 3],
    numeric_warned: bool,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// Create an empty one-dimensional channel.
    pub fn new() -> Self {
        Self::with_kind(ChannelKind::OneDim)
    }

    /// Create an empty channel whose gates take voltage and a concentration.
    pub fn new_two_dim() -> Self {
        Self::with_kind(ChannelKind::TwoDim)
    }

    fn with_kind(kind: ChannelKind) -> Self {
        Self {
            id: next_channel_id(),
            kind,
            gbar: 0.0,
            ek: 0.0,
            gk: 0.0,
            ik: 0.0,
            vm: 0.0,
            conc1: 0.0,
            conc2: 0.0,
            modulation: 1.0,
            instant: 0,
            driver: Driver::SelfStepping,
            phase: ChannelPhase::Empty,
            slots: [None, None, None],
            numeric_warned: false,
        }
    }

    /// Duplicate this channel. The copy gets a fresh id and shares the
    /// original's gates read-only; its own state, powers and scalars start
    /// as copies of the original's.
    pub fn duplicate(&self) -> Channel {
        Channel {
            id: next_channel_id(),
            kind: self.kind,
            gbar: self.gbar,
            ek: self.ek,
            gk: self.gk,
            ik: self.ik,
            vm: self.vm,
            conc1: self.conc1,
            conc2: self.conc2,
            modulation: self.modulation,
            instant: self.instant,
            driver: self.driver,
            phase: self.phase,
            slots: self.slots.clone(),
            numeric_warned: false,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn set_driver(&mut self, driver: Driver) {
        self.driver = driver;
    }

    pub fn gbar(&self) -> f64 {
        self.gbar
    }

    pub fn set_gbar(&mut self, gbar: f64) {
        self.gbar = gbar;
    }

    pub fn ek(&self) -> f64 {
        self.ek
    }

    pub fn set_ek(&mut self, ek: f64) {
        self.ek = ek;
    }

    pub fn gk(&self) -> f64 {
        self.gk
    }

    pub fn ik(&self) -> f64 {
        self.ik
    }

    pub fn vm(&self) -> f64 {
        self.vm
    }

    pub fn modulation(&self) -> f64 {
        self.modulation
    }

    /// Multiplicative conductance scaling from collaborators, default 1.
    pub fn set_modulation(&mut self, modulation: f64) {
        self.modulation = modulation;
    }

    pub fn instant(&self) -> u8 {
        self.instant
    }

    /// Bitmask of slots clamped to steady state each tick instead of
    /// integrated; see [`INSTANT_X`], [`INSTANT_Y`], [`INSTANT_Z`].
    pub fn set_instant(&mut self, mask: u8) {
        self.instant = mask;
    }

    /// Membrane voltage from the compartment.
    pub fn set_vm(&mut self, vm: f64) {
        self.vm = vm;
    }

    /// First concentration input, typically a calcium pool.
    pub fn set_conc1(&mut self, conc: f64) {
        self.conc1 = conc;
    }

    /// Second concentration input.
    pub fn set_conc2(&mut self, conc: f64) {
        self.conc2 = conc;
    }

    /// Exponent of a slot. Zero if the slot is not allocated.
    pub fn power(&self, slot: Slot) -> u32 {
        self.slots[slot.idx()].as_ref().map_or(0, |s| s.power)
    }

    /// Set a slot's exponent, allocating its gate on the first positive
    /// power and destroying the slot when the power returns to zero.
    pub fn set_power(&mut self, slot: Slot, power: i32) -> Result<()> {
        if power < 0 {
            return Err(GatingError::out_of_range(
                "power",
                power as f64,
                "gate powers cannot be negative",
            ));
        }
        let i = slot.idx();
        if power == 0 {
            self.slots[i] = None;
        } else {
            match &mut self.slots[i] {
                Some(existing) => existing.power = power as u32,
                None => {
                    let gate = match self.kind {
                        ChannelKind::OneDim => {
                            GateRef::OneDim(Arc::new(RwLock::new(Gate1D::new(self.id))))
                        }
                        ChannelKind::TwoDim => {
                            GateRef::TwoDim(Arc::new(RwLock::new(Gate2D::new(self.id))))
                        }
                    };
                    self.slots[i] = Some(SlotState {
                        gate,
                        power: power as u32,
                        state: 0.0,
                        inited: false,
                        index: InputIndex::Volt,
                    });
                }
            }
        }
        // Any power change drops a running channel back to configured; the
        // next reinit brings it up again.
        self.phase = if self.slots.iter().all(Option::is_none) {
            ChannelPhase::Empty
        } else {
            ChannelPhase::Configured
        };
        Ok(())
    }

    /// The open fraction of a slot.
    pub fn state(&self, slot: Slot) -> Option<f64> {
        self.slots[slot.idx()].as_ref().map(|s| s.state)
    }

    /// Seed a slot's open fraction before `reinit`. A seeded slot keeps its
    /// value through subsequent reinits.
    pub fn set_state(&mut self, slot: Slot, value: f64) -> Result<()> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(GatingError::out_of_range(
                "state",
                value,
                "gate state must be in [0, 1]",
            ));
        }
        match &mut self.slots[slot.idx()] {
            Some(s) => {
                s.state = value;
                s.inited = true;
                Ok(())
            }
            None => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "slot has no gate (power is zero)".to_string(),
            }),
        }
    }

    /// Input routing of a slot.
    pub fn input_index(&self, slot: Slot) -> Option<InputIndex> {
        self.slots[slot.idx()].as_ref().map(|s| s.index)
    }

    /// Route a slot's gate inputs; consulted on every query.
    pub fn set_input_index(&mut self, slot: Slot, index: InputIndex) -> Result<()> {
        match &mut self.slots[slot.idx()] {
            Some(s) => {
                s.index = index;
                Ok(())
            }
            None => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "slot has no gate (power is zero)".to_string(),
            }),
        }
    }

    /// Shared handle to a slot's one-dimensional gate.
    pub fn gate1(&self, slot: Slot) -> Result<Arc<RwLock<Gate1D>>> {
        match self.slots[slot.idx()].as_ref().map(|s| &s.gate) {
            Some(GateRef::OneDim(gate)) => Ok(Arc::clone(gate)),
            Some(GateRef::TwoDim(_)) => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "gate takes two inputs".to_string(),
            }),
            None => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "slot has no gate (power is zero)".to_string(),
            }),
        }
    }

    /// Shared handle to a slot's two-dimensional gate.
    pub fn gate2(&self, slot: Slot) -> Result<Arc<RwLock<Gate2D>>> {
        match self.slots[slot.idx()].as_ref().map(|s| &s.gate) {
            Some(GateRef::TwoDim(gate)) => Ok(Arc::clone(gate)),
            Some(GateRef::OneDim(_)) => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "gate takes one input".to_string(),
            }),
            None => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "slot has no gate (power is zero)".to_string(),
            }),
        }
    }

    /// Set a one-dimensional slot's input range and grid resolution.
    pub fn set_gate_range(&self, slot: Slot, min: f64, max: f64, divs: usize) -> Result<()> {
        let gate = self.gate1(slot)?;
        let mut gate = write_lock(&gate);
        gate.set_range(self.id, min, max, divs)
    }

    /// Assign a one-dimensional slot's tables directly.
    pub fn set_gate_tables(&self, slot: Slot, a: Vec<f64>, b: Vec<f64>) -> Result<()> {
        let gate = self.gate1(slot)?;
        let mut gate = write_lock(&gate);
        gate.set_tables(self.id, a, b)
    }

    /// Canonical 13-scalar parametric alpha/beta setup of a slot.
    pub fn setup_alpha(&self, slot: Slot, parms: [f64; 13]) -> Result<()> {
        let gate = self.gate1(slot)?;
        let mut gate = write_lock(&gate);
        gate.setup_alpha(self.id, parms)
    }

    /// Canonical 13-scalar parametric tau/inf setup of a slot.
    pub fn setup_tau(&self, slot: Slot, parms: [f64; 13]) -> Result<()> {
        let gate = self.gate1(slot)?;
        let mut gate = write_lock(&gate);
        gate.setup_tau(self.id, parms)
    }

    /// Switch a one-dimensional slot between direct and interpolated lookup.
    pub fn set_use_interpolation(&self, slot: Slot, flag: bool) -> Result<()> {
        let gate = self.gate1(slot)?;
        let mut gate = write_lock(&gate);
        gate.set_use_interpolation(self.id, flag);
        Ok(())
    }

    /// Supply a slot's alpha and beta expressions.
    pub fn set_alpha_exprs(&self, slot: Slot, alpha: &str, beta: &str) -> Result<()> {
        match self.slots[slot.idx()].as_ref().map(|s| &s.gate) {
            Some(GateRef::OneDim(gate)) => write_lock(gate).set_alpha_exprs(self.id, alpha, beta),
            Some(GateRef::TwoDim(gate)) => write_lock(gate).set_alpha_exprs(self.id, alpha, beta),
            None => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "slot has no gate (power is zero)".to_string(),
            }),
        }
    }

    /// Supply a slot's tau and inf expressions.
    pub fn set_tau_exprs(&self, slot: Slot, tau: &str, inf: &str) -> Result<()> {
        match self.slots[slot.idx()].as_ref().map(|s| &s.gate) {
            Some(GateRef::OneDim(gate)) => write_lock(gate).set_tau_exprs(self.id, tau, inf),
            Some(GateRef::TwoDim(gate)) => write_lock(gate).set_tau_exprs(self.id, tau, inf),
            None => Err(GatingError::GateUninitialised {
                slot: slot.label(),
                reason: "slot has no gate (power is zero)".to_string(),
            }),
        }
    }

    /// Snapshot of the scalar configuration.
    pub fn settings(&self) -> ChannelSettings {
        let index = |slot: Slot| self.input_index(slot).unwrap_or_default();
        ChannelSettings {
            gbar: self.gbar,
            ek: self.ek,
            xpower: self.power(Slot::X) as i32,
            ypower: self.power(Slot::Y) as i32,
            zpower: self.power(Slot::Z) as i32,
            instant: self.instant,
            xindex: index(Slot::X),
            yindex: index(Slot::Y),
            zindex: index(Slot::Z),
        }
    }

    /// Apply a scalar configuration snapshot, allocating or destroying
    /// gates as the powers dictate.
    pub fn apply_settings(&mut self, settings: &ChannelSettings) -> Result<()> {
        self.set_power(Slot::X, settings.xpower)?;
        self.set_power(Slot::Y, settings.ypower)?;
        self.set_power(Slot::Z, settings.zpower)?;
        self.gbar = settings.gbar;
        self.ek = settings.ek;
        self.instant = settings.instant;
        for (slot, index) in [
            (Slot::X, settings.xindex),
            (Slot::Y, settings.yindex),
            (Slot::Z, settings.zindex),
        ] {
            if self.slots[slot.idx()].is_some() {
                self.set_input_index(slot, index)?;
            }
        }
        Ok(())
    }

    fn output(&self) -> ChannelOutput {
        ChannelOutput {
            gk: self.gk,
            ek: self.ek,
            ik: self.ik,
        }
    }

    fn routed_query(slot: &SlotState, vm: f64, conc1: f64, conc2: f64) -> (f64, f64) {
        let pick = |source: InputSource| match source {
            InputSource::Volt => vm,
            InputSource::C1 => conc1,
            InputSource::C2 => conc2,
        };
        let (dim0, dim1) = slot.index.dims();
        match &slot.gate {
            GateRef::OneDim(gate) => read_lock(gate).lookup(pick(dim0)),
            GateRef::TwoDim(gate) => {
                read_lock(gate).evaluate(pick(dim0), dim1.map(pick).unwrap_or(0.0))
            }
        }
    }

    /// Advance one tick and report the conductance and driven current.
    ///
    /// Instant slots are clamped to their steady state `A/B`; the rest take
    /// one step of the gating integrator. A solver-driven channel reports
    /// its last outputs untouched.
    pub fn process(&mut self, tick: &Tick) -> ChannelOutput {
        if self.driver == Driver::SolverDriven {
            return self.output();
        }
        let (vm, conc1, conc2) = (self.vm, self.conc1, self.conc2);
        let instant = self.instant;
        let mut g = self.gbar;
        let mut degenerate = false;
        for (i, entry) in self.slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            let (a, b) = Self::routed_query(slot, vm, conc1, conc2);
            if instant & (1 << i) != 0 {
                if b.abs() < REINIT_B_FLOOR {
                    degenerate = true;
                } else {
                    slot.state = a / b;
                }
            } else {
                slot.state = advance_gate(slot.state, a, b, tick.dt);
            }
            g *= take_power(slot.state, slot.power);
        }
        if degenerate && !self.numeric_warned {
            self.numeric_warned = true;
            log::warn!(
                "channel {}: instant gate has near-zero total rate; keeping previous state",
                self.id
            );
        }
        self.gk = g * self.modulation;
        self.ik = (self.ek - self.vm) * self.gk;
        self.output()
    }

    /// Reset to initial state.
    ///
    /// Every powered slot is queried at the current inputs; a slot that was
    /// not explicitly seeded takes its steady state `A/B`. Seeding a slot
    /// whose total rate is below [`REINIT_B_FLOOR`] is refused with a
    /// warning and the state is left alone. The outputs are recomputed from
    /// the resulting states.
    pub fn reinit(&mut self, _tick: &Tick) -> Result<ChannelOutput> {
        if self.driver == Driver::SolverDriven {
            return Ok(self.output());
        }
        let (vm, conc1, conc2) = (self.vm, self.conc1, self.conc2);
        let id = self.id;
        let mut g = self.gbar;
        for (i, entry) in self.slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            match &slot.gate {
                GateRef::OneDim(gate) => {
                    if !read_lock(gate).is_filled() {
                        return Err(GatingError::GateUninitialised {
                            slot: Slot::from_idx(i).label(),
                            reason: "tables have not been filled".to_string(),
                        });
                    }
                }
                GateRef::TwoDim(gate) => {
                    if !read_lock(gate).is_configured() {
                        return Err(GatingError::GateUninitialised {
                            slot: Slot::from_idx(i).label(),
                            reason: "no rate expressions supplied".to_string(),
                        });
                    }
                }
            }
            let (a, b) = Self::routed_query(slot, vm, conc1, conc2);
            if !slot.inited {
                if b.abs() < REINIT_B_FLOOR {
                    log::warn!(
                        "channel {id}: refusing to seed gate {} from steady state, total rate {b} is too small",
                        Slot::from_idx(i).label()
                    );
                } else {
                    slot.state = a / b;
                }
            }
            g *= take_power(slot.state, slot.power);
        }
        self.gk = g * self.modulation;
        self.ik = (self.ek - self.vm) * self.gk;
        self.phase = ChannelPhase::Running;
        Ok(self.output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant_rate_channel(a: f64, b: f64) -> Channel {
        let mut ch = Channel::new();
        ch.set_power(Slot::X, 1).unwrap();
        let n = 11;
        ch.set_gate_range(Slot::X, -1.0, 1.0, n - 1).unwrap();
        ch.set_gate_tables(Slot::X, vec![a; n], vec![b; n]).unwrap();
        ch
    }

    #[test]
    fn test_lifecycle_phases() {
        let mut ch = Channel::new();
        assert_eq!(ch.phase(), ChannelPhase::Empty);
        ch.set_power(Slot::X, 3).unwrap();
        assert_eq!(ch.phase(), ChannelPhase::Configured);
        assert_eq!(ch.power(Slot::X), 3);
        ch.set_power(Slot::X, 0).unwrap();
        assert_eq!(ch.phase(), ChannelPhase::Empty);
        assert!(ch.state(Slot::X).is_none());
    }

    #[test]
    fn test_negative_power_rejected() {
        let mut ch = Channel::new();
        assert!(ch.set_power(Slot::X, -1).is_err());
        assert_eq!(ch.phase(), ChannelPhase::Empty);
    }

    #[test]
    fn test_power_zero_destroys_gate() {
        let mut ch = Channel::new();
        ch.set_power(Slot::Y, 2).unwrap();
        assert!(ch.gate1(Slot::Y).is_ok());
        ch.set_power(Slot::Y, 0).unwrap();
        assert!(ch.gate1(Slot::Y).is_err());
    }

    #[test]
    fn test_reinit_requires_filled_gate() {
        let mut ch = Channel::new();
        ch.set_power(Slot::X, 1).unwrap();
        let err = ch.reinit(&Tick { dt: 1e-4 }).unwrap_err();
        assert!(matches!(
            err,
            GatingError::GateUninitialised { slot: 'X', .. }
        ));
    }

    #[test]
    fn test_reinit_seeds_steady_state() {
        let mut ch = constant_rate_channel(600.0, 1000.0);
        ch.set_gbar(10.0);
        ch.set_ek(0.05);
        ch.set_vm(0.0);
        let out = ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        assert_relative_eq!(ch.state(Slot::X).unwrap(), 0.6, epsilon = 1e-12);
        assert_relative_eq!(out.gk, 6.0, epsilon = 1e-12);
        assert_relative_eq!(out.ik, 0.05 * 6.0, epsilon = 1e-12);
        assert_eq!(ch.phase(), ChannelPhase::Running);
    }

    #[test]
    fn test_preseeded_state_survives_reinit() {
        let mut ch = constant_rate_channel(600.0, 1000.0);
        ch.set_state(Slot::X, 0.25).unwrap();
        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        assert_relative_eq!(ch.state(Slot::X).unwrap(), 0.25, epsilon = 1e-15);
    }

    #[test]
    fn test_set_state_validation() {
        let mut ch = constant_rate_channel(1.0, 2.0);
        assert!(ch.set_state(Slot::X, -0.1).is_err());
        assert!(ch.set_state(Slot::X, 1.1).is_err());
        assert!(ch.set_state(Slot::X, f64::NAN).is_err());
        assert!(ch.set_state(Slot::Y, 0.5).is_err());
        assert!(ch.set_state(Slot::X, 0.5).is_ok());
    }

    #[test]
    fn test_reinit_refuses_vanishing_rates() {
        let mut ch = constant_rate_channel(0.0, 1e-18);
        ch.set_state(Slot::X, 0.5).unwrap();
        // Seeded, so the tiny B only matters for unseeded slots
        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        assert_relative_eq!(ch.state(Slot::X).unwrap(), 0.5, epsilon = 1e-15);

        let mut fresh = constant_rate_channel(0.0, 1e-18);
        fresh.reinit(&Tick { dt: 1e-4 }).unwrap();
        // Refused: state stays at its default instead of 0/1e-18
        assert_relative_eq!(fresh.state(Slot::X).unwrap(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_process_converges_monotonically() {
        let mut ch = constant_rate_channel(6.0e3, 1.0e4);
        ch.set_gbar(1.0);
        let tick = Tick { dt: 1e-4 };
        // Start from zero rather than the steady state
        ch.set_state(Slot::X, 0.0).unwrap();
        ch.reinit(&tick).unwrap();
        let target = 0.6;
        let mut prev = 0.0;
        for _ in 0..10 {
            ch.process(&tick);
            let g = ch.state(Slot::X).unwrap();
            assert!(g > prev && g <= target);
            prev = g;
        }
        assert!((target - prev) / target < 0.01);
    }

    #[test]
    fn test_instant_gate_clamps_to_steady_state() {
        let mut ch = constant_rate_channel(600.0, 1000.0);
        ch.set_gbar(2.0);
        ch.set_instant(INSTANT_X);
        ch.set_state(Slot::X, 0.0).unwrap();
        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        ch.process(&Tick { dt: 1e-4 });
        assert_relative_eq!(ch.state(Slot::X).unwrap(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_conductance_composition() {
        let mut ch = Channel::new();
        for (slot, power) in [(Slot::X, 3), (Slot::Y, 1)] {
            ch.set_power(slot, power).unwrap();
            ch.set_gate_range(slot, -1.0, 1.0, 1).unwrap();
        }
        ch.set_gate_tables(Slot::X, vec![500.0; 2], vec![1000.0; 2])
            .unwrap();
        ch.set_gate_tables(Slot::Y, vec![250.0; 2], vec![1000.0; 2])
            .unwrap();
        ch.set_gbar(100.0);
        ch.set_ek(-0.08);
        ch.set_vm(-0.06);
        ch.set_modulation(2.0);
        let out = ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        // Gk = gbar * 0.5^3 * 0.25 * modulation
        assert_relative_eq!(out.gk, 100.0 * 0.125 * 0.25 * 2.0, epsilon = 1e-12);
        assert_relative_eq!(out.ik, (-0.08 - -0.06) * out.gk, epsilon = 1e-12);
    }

    #[test]
    fn test_solver_driven_channel_is_inert() {
        let mut ch = constant_rate_channel(600.0, 1000.0);
        ch.set_gbar(1.0);
        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        let before = ch.process(&Tick { dt: 1e-4 });
        ch.set_driver(Driver::SolverDriven);
        ch.set_vm(0.1);
        let after = ch.process(&Tick { dt: 1e-4 });
        assert_eq!(before.gk, after.gk);
        assert_eq!(before.ik, after.ik);
        assert!(ch.reinit(&Tick { dt: 1e-4 }).is_ok());
    }

    #[test]
    fn test_duplicate_shares_gates() {
        let ch = constant_rate_channel(600.0, 1000.0);
        let mut copy = ch.duplicate();
        assert_ne!(ch.id(), copy.id());

        // Mutation through the copy is ignored
        assert!(copy
            .set_gate_tables(Slot::X, vec![1.0; 11], vec![2.0; 11])
            .is_ok());
        let gate = ch.gate1(Slot::X).unwrap();
        assert_eq!(read_lock(&gate).table_a()[0], 600.0);

        // Mutation through the original is visible to both
        ch.set_gate_tables(Slot::X, vec![500.0; 11], vec![1000.0; 11])
            .unwrap();
        let shared = copy.gate1(Slot::X).unwrap();
        assert_eq!(read_lock(&shared).table_a()[0], 500.0);

        // Each channel integrates its own state over the shared tables
        copy.reinit(&Tick { dt: 1e-4 }).unwrap();
        assert_relative_eq!(copy.state(Slot::X).unwrap(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(ch.state(Slot::X).unwrap(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_two_dim_routing() {
        let mut ch = Channel::new_two_dim();
        ch.set_power(Slot::X, 1).unwrap();
        ch.set_alpha_exprs(Slot::X, "1500/(1 + (c/1.5e-4 * exp(-77 * v)))", "500")
            .unwrap();
        ch.set_input_index(Slot::X, InputIndex::VoltC1).unwrap();
        ch.set_gbar(1.0);
        ch.set_vm(-0.05);
        ch.set_conc1(1e-4);
        ch.set_conc2(5e-4);

        let alpha = |c: f64| 1500.0 / (1.0 + (c / 1.5e-4 * (77.0 * 0.05f64).exp()));

        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        let want_c1 = alpha(1e-4) / (alpha(1e-4) + 500.0);
        assert_relative_eq!(ch.state(Slot::X).unwrap(), want_c1, max_relative = 1e-12);

        ch.set_input_index(Slot::X, InputIndex::VoltC2).unwrap();
        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        let want_c2 = alpha(5e-4) / (alpha(5e-4) + 500.0);
        assert_relative_eq!(ch.state(Slot::X).unwrap(), want_c2, max_relative = 1e-12);
        assert!(want_c1 != want_c2);
    }

    #[test]
    fn test_one_dim_slot_routed_to_concentration() {
        let mut ch = Channel::new();
        ch.set_power(Slot::Z, 1).unwrap();
        ch.set_gate_range(Slot::Z, 0.0, 1e-3, 100).unwrap();
        // A is proportional to c over the range, B constant
        let n = 101;
        let a: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        ch.set_gate_tables(Slot::Z, a, vec![100.0; n]).unwrap();
        ch.set_input_index(Slot::Z, InputIndex::C1).unwrap();
        ch.set_gbar(1.0);
        ch.set_vm(0.5); // would index entry 50 if voltage were used
        ch.set_conc1(0.0);
        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        assert_relative_eq!(ch.state(Slot::Z).unwrap(), 1.0 / 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_settings_snapshot_round_trip() {
        let mut ch = Channel::new_two_dim();
        ch.set_power(Slot::X, 2).unwrap();
        ch.set_power(Slot::Z, 1).unwrap();
        ch.set_gbar(120.0);
        ch.set_ek(0.045);
        ch.set_instant(INSTANT_Z);
        ch.set_input_index(Slot::X, InputIndex::VoltC1).unwrap();
        ch.set_input_index(Slot::Z, InputIndex::C2).unwrap();

        let settings = ch.settings();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: ChannelSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);

        let mut other = Channel::new_two_dim();
        other.apply_settings(&parsed).unwrap();
        assert_eq!(other.settings(), settings);
    }

    #[test]
    fn test_output_emits_ek_and_gk() {
        let mut ch = constant_rate_channel(600.0, 1000.0);
        ch.set_gbar(4.0);
        ch.set_ek(-0.09);
        ch.set_vm(-0.07);
        ch.reinit(&Tick { dt: 1e-4 }).unwrap();
        let out = ch.process(&Tick { dt: 1e-4 });
        assert_eq!(out.ek, -0.09);
        assert_relative_eq!(out.ik, (-0.09 + 0.07) * out.gk, epsilon = 1e-12);
        assert_eq!(ch.gk(), out.gk);
        assert_eq!(ch.ik(), out.ik);
    }
}
