//! Medium-tagged energy quantities, ports, and storage, grounded on
//! `eflips/energy.py`'s `EnergyMedium`/`Energy`/`EnergyFlow`/`Port`/
//! `MultiPort`/`EnergyStorage`/`Battery`.

use std::fmt;

/// An energy carrier. Fuel media carry a heating value and density so a
/// quantity can be converted to mass or volume; electricity and mechanical
/// energy do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub enum Medium {
    Electricity,
    Diesel,
    Hydrogen,
    Heat,
    Mechanical,
}

impl Medium {
    /// Heating value in kJ/kg, for fuel media that can be expressed as mass.
    pub fn heating_value_kj_per_kg(self) -> Option<f64> {
        match self {
            Medium::Diesel => Some(42_800.0),
            Medium::Hydrogen => Some(120_000.0),
            _ => None,
        }
    }

    /// Density in kg/L, for fuel media that can be expressed as volume.
    pub fn density_kg_per_l(self) -> Option<f64> {
        match self {
            Medium::Diesel => Some(0.832),
            _ => None,
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Raised whenever two medium-tagged quantities of different media are
/// combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediumMismatch {
    pub lhs: Medium,
    pub rhs: Medium,
}

impl fmt::Display for MediumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot combine {} with {}", self.lhs, self.rhs)
    }
}

impl std::error::Error for MediumMismatch {}

fn require_same_medium(a: Medium, b: Medium) -> Result<(), MediumMismatch> {
    if a == b {
        Ok(())
    } else {
        Err(MediumMismatch { lhs: a, rhs: b })
    }
}

/// A quantity of energy (kWh) of a given medium.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Energy {
    pub kwh: f64,
    pub medium: Medium,
}

impl Energy {
    pub fn new(kwh: f64, medium: Medium) -> Self {
        Self { kwh, medium }
    }

    pub fn add(&self, other: &Energy) -> Result<Energy, MediumMismatch> {
        require_same_medium(self.medium, other.medium)?;
        Ok(Energy::new(self.kwh + other.kwh, self.medium))
    }

    pub fn sub(&self, other: &Energy) -> Result<Energy, MediumMismatch> {
        require_same_medium(self.medium, other.medium)?;
        Ok(Energy::new(self.kwh - other.kwh, self.medium))
    }

    /// Mass in kg, for media with a heating value.
    pub fn mass_kg(&self) -> Option<f64> {
        self.medium.heating_value_kj_per_kg().map(|hv| self.kwh * 3_600.0 / hv)
    }

    /// Volume in litres, for media with both a heating value and a density.
    pub fn volume_l(&self) -> Option<f64> {
        self.mass_kg().and_then(|mass| self.medium.density_kg_per_l().map(|d| mass / d))
    }
}

/// A rate of energy flow (kW) of a given medium.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyFlow {
    pub kw: f64,
    pub medium: Medium,
}

impl EnergyFlow {
    pub fn new(kw: f64, medium: Medium) -> Self {
        Self { kw, medium }
    }

    pub fn add(&self, other: &EnergyFlow) -> Result<EnergyFlow, MediumMismatch> {
        require_same_medium(self.medium, other.medium)?;
        Ok(EnergyFlow::new(self.kw + other.kw, self.medium))
    }

    /// Exact integration of a constant flow over `duration_s` seconds.
    pub fn integrate(&self, duration_s: f64) -> Energy {
        Energy::new(self.kw * duration_s / 3_600.0, self.medium)
    }
}

/// A point in the power graph holding a single current flow. Fires its
/// subscribers only when the flow's value actually changes (exact equality,
/// per the port-graph contract) — this is the sole mechanism by which
/// upstream components learn of downstream changes.
pub struct Port {
    flow: EnergyFlow,
    subscribers: Vec<Box<dyn FnMut(EnergyFlow)>>,
}

impl Port {
    pub fn new(medium: Medium) -> Self {
        Self { flow: EnergyFlow::new(0.0, medium), subscribers: Vec::new() }
    }

    pub fn flow(&self) -> EnergyFlow {
        self.flow
    }

    pub fn subscribe(&mut self, f: impl FnMut(EnergyFlow) + 'static) {
        self.subscribers.push(Box::new(f));
    }

    /// Sets the port's flow, notifying subscribers only if the value changed.
    pub fn set_flow(&mut self, flow: EnergyFlow) {
        if flow.kw != self.flow.kw || flow.medium != self.flow.medium {
            self.flow = flow;
            for sub in self.subscribers.iter_mut() {
                sub(flow);
            }
        }
    }
}

/// A port whose output continuously re-exposes the sum of named input flows.
pub struct MultiPort {
    medium: Medium,
    inputs: Vec<EnergyFlow>,
    pub output: Port,
}

impl MultiPort {
    pub fn new(medium: Medium) -> Self {
        Self { medium, inputs: Vec::new(), output: Port::new(medium) }
    }

    /// Registers a new input, initially zero, and returns its index for use
    /// with `set_input`.
    pub fn add_input(&mut self) -> usize {
        self.inputs.push(EnergyFlow::new(0.0, self.medium));
        self.inputs.len() - 1
    }

    /// Updates one input's flow and republishes the output sum.
    pub fn set_input(&mut self, index: usize, flow: EnergyFlow) -> Result<(), MediumMismatch> {
        require_same_medium(flow.medium, self.medium)?;
        self.inputs[index] = flow;
        let total: f64 = self.inputs.iter().map(|f| f.kw).sum();
        self.output.set_flow(EnergyFlow::new(total, self.medium));
        Ok(())
    }

    pub fn output_flow(&self) -> EnergyFlow {
        self.output.flow()
    }
}

/// Outcome of `Storage::update`: what the caller (vehicle/controller loop)
/// must schedule with the event kernel as a result of this integration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageUpdate {
    /// Seconds from `now` at which a `fully_charged` event should fire, if
    /// the storage is presently charging.
    pub seconds_to_full: Option<f64>,
    pub soc_invalid: bool,
}

/// Generic energy storage: nominal/current energy, signed flow limits,
/// charge/discharge efficiencies. Integrates on every call to `update`,
/// which the owning port graph invokes on any change touching it.
#[derive(Debug, Clone)]
pub struct Storage {
    pub medium: Medium,
    pub nominal_kwh: f64,
    pub energy_kwh: f64,
    /// Most negative (i.e. most charging) permissible flow, kW. `<= 0`.
    pub flow_limit_lower_kw: f64,
    /// Most positive (i.e. most discharging) permissible flow, kW. `>= 0`.
    pub flow_limit_upper_kw: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    last_update_s: i64,
    current_flow: EnergyFlow,
    pub allow_invalid_soc: bool,
    was_invalid: bool,
}

impl Storage {
    pub fn new(
        medium: Medium,
        nominal_kwh: f64,
        initial_kwh: f64,
        flow_limit_lower_kw: f64,
        flow_limit_upper_kw: f64,
        charge_efficiency: f64,
        discharge_efficiency: f64,
        allow_invalid_soc: bool,
    ) -> Self {
        assert!(nominal_kwh > 0.0);
        assert!(flow_limit_lower_kw <= 0.0 && flow_limit_upper_kw >= 0.0);
        assert!((0.0..=1.0).contains(&charge_efficiency));
        assert!((0.0..=1.0).contains(&discharge_efficiency));
        Self {
            medium,
            nominal_kwh,
            energy_kwh: initial_kwh.clamp(0.0, nominal_kwh),
            flow_limit_lower_kw,
            flow_limit_upper_kw,
            charge_efficiency,
            discharge_efficiency,
            last_update_s: 0,
            current_flow: EnergyFlow::new(0.0, medium),
            allow_invalid_soc,
            was_invalid: false,
        }
    }

    pub fn soc(&self) -> f64 {
        self.energy_kwh / self.nominal_kwh
    }

    pub fn was_invalid(&self) -> bool {
        self.was_invalid
    }

    /// Integrate the flow held since `last_update_s` forward to `now_s`,
    /// then record `new_flow` as the flow going forward. Returns what the
    /// caller must (re)schedule.
    pub fn update(&mut self, now_s: i64, new_flow: EnergyFlow) -> Result<StorageUpdate, MediumMismatch> {
        require_same_medium(new_flow.medium, self.medium)?;
        let dt = (now_s - self.last_update_s).max(0) as f64;
        if dt > 0.0 {
            let eff = if self.current_flow.kw >= 0.0 { self.discharge_efficiency } else { self.charge_efficiency };
            let delta = if self.current_flow.kw >= 0.0 {
                -self.current_flow.integrate(dt).kwh / eff.max(f64::EPSILON)
            } else {
                -self.current_flow.integrate(dt).kwh * eff
            };
            self.energy_kwh += delta;
        }
        let invalid = self.energy_kwh < -1e-9 || self.energy_kwh > self.nominal_kwh + 1e-9;
        if invalid {
            self.was_invalid = true;
        }
        self.energy_kwh = self.energy_kwh.clamp(0.0, self.nominal_kwh);
        self.last_update_s = now_s;
        self.current_flow = new_flow;

        let seconds_to_full = if new_flow.kw > 0.0 {
            None
        } else if new_flow.kw < 0.0 {
            let headroom = self.nominal_kwh - self.energy_kwh;
            let rate = -new_flow.kw * self.charge_efficiency;
            if rate > 1e-9 {
                Some(headroom * 3_600.0 / rate)
            } else {
                None
            }
        } else {
            None
        };

        Ok(StorageUpdate { seconds_to_full, soc_invalid: invalid && !self.allow_invalid_soc })
    }
}

/// A `Storage` specialised with SoC thresholds and a state-of-health derate,
/// grounded on `eflips/energy.py`'s `Battery(EnergyStorage)`.
#[derive(Debug, Clone)]
pub struct Battery {
    pub storage: Storage,
    pub soc_min: f64,
    pub soc_reserve: f64,
    pub soc_max: f64,
    pub state_of_health: f64,
}

impl Battery {
    pub fn new(
        capacity_max_kwh: f64,
        initial_soc: f64,
        soc_min: f64,
        soc_reserve: f64,
        soc_max: f64,
        state_of_health: f64,
        charge_rate_kw: f64,
        discharge_rate_kw: f64,
        allow_invalid_soc: bool,
    ) -> Self {
        assert!((0.0..=1.0).contains(&state_of_health) && state_of_health > 0.0);
        let nominal = capacity_max_kwh * state_of_health;
        let storage = Storage::new(
            Medium::Electricity,
            nominal,
            nominal * initial_soc,
            -charge_rate_kw,
            discharge_rate_kw,
            0.95,
            0.95,
            allow_invalid_soc,
        );
        Self { storage, soc_min, soc_reserve, soc_max, state_of_health }
    }

    pub fn soc(&self) -> f64 {
        self.storage.soc()
    }

    pub fn is_critical(&self) -> bool {
        self.soc() < self.soc_reserve
    }

    pub fn is_valid(&self) -> bool {
        self.soc() >= self.soc_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medium_mismatch_on_add() {
        let e1 = Energy::new(1.0, Medium::Electricity);
        let e2 = Energy::new(1.0, Medium::Diesel);
        assert!(e1.add(&e2).is_err());
    }

    #[test]
    fn flow_integration_matches_power_times_duration_over_3600() {
        let f = EnergyFlow::new(10.0, Medium::Electricity);
        let e = f.integrate(3_600.0);
        assert!((e.kwh - 10.0).abs() < 1e-9);
    }

    #[test]
    fn port_notifies_only_on_actual_change() {
        let mut port = Port::new(Medium::Electricity);
        let count = std::rc::Rc::new(std::cell::Cell::new(0));
        let c = count.clone();
        port.subscribe(move |_| c.set(c.get() + 1));
        port.set_flow(EnergyFlow::new(5.0, Medium::Electricity));
        port.set_flow(EnergyFlow::new(5.0, Medium::Electricity));
        port.set_flow(EnergyFlow::new(6.0, Medium::Electricity));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn multiport_output_is_sum_of_inputs() {
        let mut mp = MultiPort::new(Medium::Electricity);
        let a = mp.add_input();
        let b = mp.add_input();
        mp.set_input(a, EnergyFlow::new(3.0, Medium::Electricity)).unwrap();
        mp.set_input(b, EnergyFlow::new(4.0, Medium::Electricity)).unwrap();
        assert_eq!(mp.output_flow().kw, 7.0);
    }

    #[test]
    fn idle_battery_has_no_fully_charged_schedule_and_unchanged_soc() {
        let mut battery = Battery::new(300.0, 0.9, 0.1, 0.15, 1.0, 1.0, 150.0, 150.0, true);
        let update = battery.storage.update(3_600, EnergyFlow::new(0.0, Medium::Electricity)).unwrap();
        assert!(update.seconds_to_full.is_none());
        assert!((battery.soc() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn storage_bounds_stay_within_nominal_even_on_overcharge() {
        let mut storage = Storage::new(Medium::Electricity, 100.0, 95.0, -50.0, 50.0, 0.95, 0.95, true);
        for t in (0..10_000).step_by(100) {
            storage.update(t, EnergyFlow::new(-50.0, Medium::Electricity)).unwrap();
        }
        assert!(storage.energy_kwh >= 0.0 && storage.energy_kwh <= 100.0 + 1e-6);
    }

    #[test]
    fn fully_charged_timing_matches_closed_form() {
        // 270 - 100 = 170 kWh headroom at 150 kW * 0.95 efficiency input rate.
        let mut storage = Storage::new(Medium::Electricity, 270.0, 100.0, -150.0, 150.0, 0.95, 0.95, true);
        let update = storage.update(0, EnergyFlow::new(-150.0, Medium::Electricity)).unwrap();
        let expected = (270.0 - 100.0) * 3_600.0 / (150.0 * 0.95);
        assert!((update.seconds_to_full.unwrap() - expected).abs() < 1e-6);
    }
}
