//! Per-subsystem arbiter between an aggregated load, a storage, and an
//! optionally connected interface, grounded on `eflips/energy.py`'s
//! `ChargeController._update`.

use crate::energy::{EnergyFlow, Medium, Storage};

/// The flow split computed for one reconfiguration, all magnitudes in kW.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChargeFlows {
    pub interface_to_load_kw: f64,
    pub interface_to_storage_kw: f64,
    pub storage_to_load_kw: f64,
    pub load_to_storage_kw: f64,
    pub load_to_interface_kw: f64,
}

impl ChargeFlows {
    /// Net flow into the storage (negative = charging), the sign convention
    /// `Storage::update` expects.
    fn storage_net_kw(&self) -> f64 {
        self.storage_to_load_kw - self.interface_to_storage_kw - self.load_to_storage_kw
    }
}

/// Cumulative integrated energy through each path, kept so the controller
/// can always report totals even though `Storage` only tracks its own
/// balance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChargeLedger {
    pub interface_to_load_kwh: f64,
    pub interface_to_storage_kwh: f64,
    pub storage_to_load_kwh: f64,
    pub load_to_storage_kwh: f64,
    pub load_to_interface_kwh: f64,
}

pub struct ChargeController {
    medium: Medium,
    last_time_s: i64,
    last_flows: ChargeFlows,
    pub ledger: ChargeLedger,
}

impl ChargeController {
    pub fn new(medium: Medium) -> Self {
        Self { medium, last_time_s: 0, last_flows: ChargeFlows::default(), ledger: ChargeLedger::default() }
    }

    /// Recomputes the flow split for `load_kw` (positive = consumption,
    /// negative = recuperation) given an optionally connected interface's
    /// signed max supply and bidirectionality, integrating the *previous*
    /// split's energies over the elapsed time first, then applying the new
    /// split to `storage`.
    pub fn reconfigure(
        &mut self,
        now_s: i64,
        load_kw: f64,
        interface: Option<(f64, bool)>,
        storage: &mut Storage,
    ) -> ChargeFlows {
        self.integrate(now_s);

        let (max_supply_kw, bidirectional) = interface.unwrap_or((0.0, false));
        let discharge_limit = storage.flow_limit_upper_kw;
        let charge_limit = storage.flow_limit_lower_kw.abs();

        let flows = if load_kw >= 0.0 {
            if load_kw > max_supply_kw + discharge_limit {
                eprintln!(
                    "warning: consumption {load_kw:.2} kW exceeds interface+storage capacity {:.2} kW",
                    max_supply_kw + discharge_limit
                );
            }
            let interface_to_load = load_kw.min(max_supply_kw).max(0.0);
            let storage_to_load = (load_kw - interface_to_load).max(0.0);
            let headroom = (max_supply_kw - interface_to_load).max(0.0);
            let interface_to_storage = headroom.min(charge_limit);
            ChargeFlows {
                interface_to_load_kw: interface_to_load,
                storage_to_load_kw: storage_to_load,
                interface_to_storage_kw: interface_to_storage,
                load_to_storage_kw: 0.0,
                load_to_interface_kw: 0.0,
            }
        } else {
            let magnitude = -load_kw;
            let load_to_storage = magnitude.min(charge_limit);
            let excess = magnitude - load_to_storage;
            let load_to_interface = if bidirectional {
                excess.min(max_supply_kw.abs())
            } else {
                if excess > 1e-9 {
                    eprintln!("warning: recuperation excess {excess:.2} kW dissipated (non-bidirectional interface)");
                }
                0.0
            };
            let remaining_charge_headroom = (charge_limit - load_to_storage).max(0.0);
            let interface_to_storage = remaining_charge_headroom.min(max_supply_kw.max(0.0));
            ChargeFlows {
                interface_to_load_kw: 0.0,
                storage_to_load_kw: 0.0,
                interface_to_storage_kw: interface_to_storage,
                load_to_storage_kw: load_to_storage,
                load_to_interface_kw: load_to_interface,
            }
        };

        let _ = storage.update(now_s, EnergyFlow::new(flows.storage_net_kw(), self.medium));
        self.last_time_s = now_s;
        self.last_flows = flows;
        flows
    }

    fn integrate(&mut self, now_s: i64) {
        let dt_hours = (now_s - self.last_time_s).max(0) as f64 / 3_600.0;
        let f = self.last_flows;
        self.ledger.interface_to_load_kwh += f.interface_to_load_kw * dt_hours;
        self.ledger.interface_to_storage_kwh += f.interface_to_storage_kw * dt_hours;
        self.ledger.storage_to_load_kwh += f.storage_to_load_kw * dt_hours;
        self.ledger.load_to_storage_kwh += f.load_to_storage_kw * dt_hours;
        self.ledger.load_to_interface_kwh += f.load_to_interface_kw * dt_hours;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Storage {
        Storage::new(Medium::Electricity, 300.0, 150.0, -150.0, 150.0, 0.95, 0.95, true)
    }

    #[test]
    fn consumption_prefers_interface_then_storage() {
        let mut controller = ChargeController::new(Medium::Electricity);
        let mut storage = storage();
        let flows = controller.reconfigure(0, 100.0, Some((60.0, false)), &mut storage);
        assert_eq!(flows.interface_to_load_kw, 60.0);
        assert_eq!(flows.storage_to_load_kw, 40.0);
        assert_eq!(flows.interface_to_storage_kw, 0.0);
    }

    #[test]
    fn excess_interface_headroom_charges_storage() {
        let mut controller = ChargeController::new(Medium::Electricity);
        let mut storage = storage();
        let flows = controller.reconfigure(0, 20.0, Some((60.0, false)), &mut storage);
        assert_eq!(flows.interface_to_load_kw, 20.0);
        assert_eq!(flows.interface_to_storage_kw, 40.0);
    }

    #[test]
    fn recuperation_without_bidirectional_interface_dissipates_excess() {
        let mut controller = ChargeController::new(Medium::Electricity);
        let mut storage = storage();
        let flows = controller.reconfigure(0, -200.0, Some((60.0, false)), &mut storage);
        assert_eq!(flows.load_to_storage_kw, 150.0);
        assert_eq!(flows.load_to_interface_kw, 0.0);
    }

    #[test]
    fn recuperation_with_bidirectional_interface_feeds_back_excess() {
        let mut controller = ChargeController::new(Medium::Electricity);
        let mut storage = storage();
        let flows = controller.reconfigure(0, -200.0, Some((60.0, true)), &mut storage);
        assert_eq!(flows.load_to_storage_kw, 150.0);
        assert_eq!(flows.load_to_interface_kw, 50.0);
    }

    #[test]
    fn ledger_integrates_previous_split_before_recomputing() {
        let mut controller = ChargeController::new(Medium::Electricity);
        let mut storage = storage();
        controller.reconfigure(0, 100.0, Some((60.0, false)), &mut storage);
        controller.reconfigure(3_600, 0.0, None, &mut storage);
        assert!((controller.ledger.interface_to_load_kwh - 60.0).abs() < 1e-9);
        assert!((controller.ledger.storage_to_load_kwh - 40.0).abs() < 1e-9);
    }
}
