//! Charging interfaces and facilities: the docking state machine and the
//! capacity-limited slot pool vehicles queue for, grounded on
//! `eflips/energy.py`'s `ChargingInterfaceType`/`ChargingInterface` and
//! `eflips/charging.py`'s `ChargingFacility`/`ChargingPoint`/
//! `ChargingSegment`/`ChargingNetwork`.

use std::collections::HashMap;

use crate::energy::Medium;
use crate::kernel::{Kernel, SlotPool};

/// A category of charging hardware (e.g. "plug" or "pantograph"), shared by
/// every interface and facility of that kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize)]
pub struct InterfaceTypeId(pub String);

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceType {
    pub id: InterfaceTypeId,
    pub medium: Medium,
    /// Whether the vehicle can dock/undock while moving (a trolley wire)
    /// rather than only while stationary.
    pub dynamic_dock: bool,
    pub dynamic_undock: bool,
    pub max_flow_stationary_kw: f64,
    pub max_flow_in_motion_kw: f64,
    pub dead_time_dock_s: i64,
    pub dead_time_undock_s: i64,
    pub bidirectional: bool,
}

/// Docking state of one vehicle-side interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockState {
    Undocked,
    Docked,
    Connected { facility_id: u32 },
}

/// A vehicle-side charging interface: its type plus current docking state.
/// A vehicle may have several, listed in descending preference order; at
/// most one may be connected at a time per subsystem.
#[derive(Debug, Clone)]
pub struct Interface {
    pub interface_type: InterfaceType,
    state: DockState,
}

impl Interface {
    pub fn new(interface_type: InterfaceType) -> Self {
        Self { interface_type, state: DockState::Undocked }
    }

    pub fn is_docked(&self) -> bool {
        !matches!(self.state, DockState::Undocked)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, DockState::Connected { .. })
    }

    /// Begins docking; `on_done` fires after the type's dock dead time.
    pub fn dock(&mut self, kernel: &mut Kernel, on_done: impl FnOnce(&mut Kernel) + 'static) {
        debug_assert!(!self.is_docked());
        kernel.schedule_after(self.interface_type.dead_time_dock_s, on_done);
    }

    /// Marks docking complete (called from the `dock` callback once the
    /// caller has confirmed the dead time elapsed).
    pub fn mark_docked(&mut self) {
        self.state = DockState::Docked;
    }

    pub fn connect(&mut self, facility_id: u32) -> Result<(), DuplicateConnect> {
        if self.is_connected() {
            return Err(DuplicateConnect);
        }
        self.state = DockState::Connected { facility_id };
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.is_connected() {
            self.state = DockState::Docked;
        }
    }

    pub fn undock(&mut self, kernel: &mut Kernel, on_done: impl FnOnce(&mut Kernel) + 'static) {
        debug_assert!(!self.is_connected());
        kernel.schedule_after(self.interface_type.dead_time_undock_s, on_done);
    }

    pub fn mark_undocked(&mut self) {
        self.state = DockState::Undocked;
    }

    /// Signed max supply in the present kinematic context (stationary vs in
    /// motion); negative values are only meaningful for bidirectional
    /// interfaces feeding flow back from the vehicle.
    pub fn max_supply_kw(&self, in_motion: bool) -> f64 {
        if in_motion { self.interface_type.max_flow_in_motion_kw } else { self.interface_type.max_flow_stationary_kw }
    }
}

/// A vehicle tried to connect an interface that was already connected.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateConnect;

impl std::fmt::Display for DuplicateConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interface already connected")
    }
}
impl std::error::Error for DuplicateConnect {}

/// A location-bound, capacity-limited charging resource: a `ChargingPoint`
/// (dwell-time opportunity charger with manoeuvre dead times) or a
/// `ChargingSegment` (in-route trolley/pantograph segment, no manoeuvre).
pub struct Facility {
    pub id: u32,
    pub location_id: u32,
    pub interface_type: InterfaceTypeId,
    pub manoeuvre_duration_before_s: i64,
    pub manoeuvre_duration_after_s: i64,
    pub slots: SlotPool,
}

impl Facility {
    pub fn new_point(id: u32, location_id: u32, interface_type: InterfaceTypeId, capacity: u32, manoeuvre_before_s: i64, manoeuvre_after_s: i64) -> Self {
        Self { id, location_id, interface_type, manoeuvre_duration_before_s: manoeuvre_before_s, manoeuvre_duration_after_s: manoeuvre_after_s, slots: SlotPool::new(capacity) }
    }

    pub fn new_segment(id: u32, location_id: u32, interface_type: InterfaceTypeId, capacity: u32) -> Self {
        Self { id, location_id, interface_type, manoeuvre_duration_before_s: 0, manoeuvre_duration_after_s: 0, slots: SlotPool::new(capacity) }
    }

    pub fn is_vacant(&self) -> bool {
        self.slots.is_vacant()
    }
}

/// Maps `(location, interface type)` to the `Facility` offering it, so a
/// vehicle can find what charging infrastructure exists at its current
/// position.
#[derive(Default)]
pub struct ChargingNetwork {
    by_location: HashMap<u32, HashMap<InterfaceTypeId, u32>>,
    facilities: HashMap<u32, Facility>,
}

impl ChargingNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, facility: Facility) {
        self.by_location.entry(facility.location_id).or_default().insert(facility.interface_type.clone(), facility.id);
        self.facilities.insert(facility.id, facility);
    }

    pub fn facility(&self, id: u32) -> Option<&Facility> {
        self.facilities.get(&id)
    }

    pub fn facility_mut(&mut self, id: u32) -> Option<&mut Facility> {
        self.facilities.get_mut(&id)
    }

    /// Returns the interface-type -> facility-id map available at `location`,
    /// or `None` if nothing is installed there.
    pub fn at_location(&self, location: u32) -> Option<&HashMap<InterfaceTypeId, u32>> {
        self.by_location.get(&location)
    }

    /// First-match-wins scan over `preference_order`, ties broken by the
    /// vehicle's own interface preference first (argument order here),
    /// then by facility insertion order within a location (the `HashMap`
    /// iteration order is not literally insertion order, so ties are, in
    /// practice, resolved entirely by preference order — see DESIGN.md).
    pub fn select(&self, location: u32, preference_order: &[InterfaceTypeId]) -> Option<(InterfaceTypeId, u32)> {
        let available = self.at_location(location)?;
        for ty in preference_order {
            if let Some(facility_id) = available.get(ty) {
                return Some((ty.clone(), *facility_id));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plug_type() -> InterfaceType {
        InterfaceType {
            id: InterfaceTypeId("plug".into()),
            medium: Medium::Electricity,
            dynamic_dock: false,
            dynamic_undock: false,
            max_flow_stationary_kw: 150.0,
            max_flow_in_motion_kw: 0.0,
            dead_time_dock_s: 60,
            dead_time_undock_s: 60,
            bidirectional: false,
        }
    }

    #[test]
    fn dock_then_connect_then_disconnect_cycle() {
        let mut kernel = Kernel::new();
        let mut iface = Interface::new(plug_type());
        assert!(!iface.is_docked());
        let docked = std::rc::Rc::new(std::cell::Cell::new(false));
        let d = docked.clone();
        iface.dock(&mut kernel, move |_| d.set(true));
        kernel.run(None);
        assert!(docked.get());
        iface.mark_docked();
        assert!(iface.is_docked());
        iface.connect(42).unwrap();
        assert!(iface.is_connected());
        assert!(iface.connect(7).is_err());
        iface.disconnect();
        assert!(!iface.is_connected());
        assert!(iface.is_docked());
    }

    #[test]
    fn network_select_prefers_vehicle_order_over_facility_order() {
        let mut network = ChargingNetwork::new();
        network.add(Facility::new_point(1, 100, InterfaceTypeId("pantograph".into()), 1, 10, 10));
        network.add(Facility::new_point(2, 100, InterfaceTypeId("plug".into()), 1, 0, 0));
        let prefs = vec![InterfaceTypeId("plug".into()), InterfaceTypeId("pantograph".into())];
        let (ty, facility_id) = network.select(100, &prefs).unwrap();
        assert_eq!(ty, InterfaceTypeId("plug".into()));
        assert_eq!(facility_id, 2);
    }

    #[test]
    fn facility_capacity_bounds_occupied() {
        let mut kernel = Kernel::new();
        let mut facility = Facility::new_point(1, 100, InterfaceTypeId("plug".into()), 1, 0, 0);
        let granted_a = std::rc::Rc::new(std::cell::Cell::new(None));
        let ga = granted_a.clone();
        facility.slots.request(&mut kernel, move |_, s| ga.set(s));
        let granted_b = std::rc::Rc::new(std::cell::Cell::new(None));
        let gb = granted_b.clone();
        let req_b = facility.slots.request(&mut kernel, move |_, s| gb.set(Some(s)));
        kernel.run(None);
        assert_eq!(granted_a.get(), Some(0));
        assert_eq!(granted_b.get(), None);
        assert!(facility.slots.occupied() <= facility.slots.capacity());
        let _ = req_b;
    }
}
