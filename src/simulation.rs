//! The simulation facade: wires a charging network, a fleet of depots, and
//! a set of duty schedules into one event kernel run, then assembles an
//! evaluation record. Grounded on `eflips/simulation.py`'s
//! `ScheduleSimulation` and `BatchScheduleSimulation`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::charge_controller::ChargeController;
use crate::depot::{DepotWithCharging, Fleet, SimpleDepot, VehicleId};
use crate::driver::{drive_schedule, Driver, LocationLookup};
use crate::energy::{Medium, Storage};
use crate::grid::Grid;
use crate::interface::{ChargingNetwork, Facility, Interface, InterfaceType, InterfaceTypeId};
use crate::kernel::Kernel;
use crate::schedule::{NodeKind, Tree};
use crate::vehicle::{ChargingParams, FaultSink, InterfaceFault, Subsystem};

/// Fatal conditions that abort the facade's run, grounded on the error
/// table in SPEC_FULL.md §7. Wraps both a charging-chain fault surfaced via
/// the shared [`FaultSink`] and the two configuration-lookup failures the
/// facade's own setup loop can hit before the kernel starts.
#[derive(Debug, Clone)]
pub enum SimulationError {
    Interface(InterfaceFault),
    UnknownVehicleType(String),
    UnconfiguredDepotLocation(u32),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::Interface(e) => write!(f, "{e}"),
            SimulationError::UnknownVehicleType(name) => write!(f, "unknown vehicle type \"{name}\" referenced by schedule"),
            SimulationError::UnconfiguredDepotLocation(location) => write!(f, "schedule references unconfigured depot location {location}"),
        }
    }
}
impl std::error::Error for SimulationError {}

impl From<InterfaceFault> for SimulationError {
    fn from(e: InterfaceFault) -> Self {
        SimulationError::Interface(e)
    }
}

#[derive(Debug, Clone)]
pub struct VehicleTypeParams {
    pub medium: Medium,
    pub interfaces: Vec<InterfaceType>,
    pub storage_nominal_kwh: f64,
    pub storage_initial_kwh: f64,
    pub flow_limit_lower_kw: f64,
    pub flow_limit_upper_kw: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    pub allow_invalid_soc: bool,
    pub traction_consumption_kwh_per_km: f64,
}

#[derive(Debug, Clone)]
pub struct ChargingPointParams {
    pub location: u32,
    pub interface: InterfaceTypeId,
    pub capacity: u32,
    pub manoeuvre_before_s: i64,
    pub manoeuvre_after_s: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DepotChargingParams {
    pub dead_time_before_s: i64,
    pub dead_time_after_s: i64,
    pub interrupt_charging: bool,
}

#[derive(Debug, Clone)]
pub struct DepotParams {
    pub charging: bool,
    pub locations: Vec<u32>,
    pub driver_additional_paid_time_s: i64,
    pub depot_charging_params: HashMap<u32, DepotChargingParams>,
}

#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub run_until: Option<i64>,
    pub charging_points: Vec<ChargingPointParams>,
    pub depots: DepotParams,
    pub delays_enabled: bool,
}

/// One completed trip, tagged with the vehicle and vehicle type that drove
/// it, as kept for CSV export.
#[derive(Debug, Clone, Copy)]
pub struct TripLogRecord {
    pub vehicle_id: u32,
    pub trip: crate::driver::TripRecord,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationRecord {
    pub fleet_consumption: HashMap<Medium, f64>,
    pub fleet_consumption_by_vehicle_type: HashMap<String, HashMap<Medium, f64>>,
    pub fleet_mileage_by_vehicle_type: HashMap<String, f64>,
    pub fleet_specific_consumption_by_vehicle_type: HashMap<String, HashMap<Medium, f64>>,
    pub driver_driving_time_s: i64,
    pub driver_pause_time_s: i64,
    pub driver_additional_paid_time_s: i64,
    pub driver_total_time_s: i64,
    pub facility_max_occupation: HashMap<u32, u32>,
    /// Per-vehicle-type trip log, keyed the same way as
    /// `fleet_consumption_by_vehicle_type`, for flattened CSV export.
    pub trip_log_by_vehicle_type: HashMap<String, Vec<TripLogRecord>>,
}

enum DepotHandle {
    Simple(SimpleDepot),
    Charging(Rc<RefCell<DepotWithCharging>>),
}

/// Resolves charging eligibility and policy per stop purely from whether
/// the charging network has any facility there; real per-schedule charging
/// policy selection (`ChargingScheduleParameterSet` in the source) is a
/// refinement the rest of this crate's plumbing already supports but this
/// facade does not yet expose a configuration surface for.
struct DefaultLocationLookup {
    grid: Rc<Grid>,
    network: Rc<RefCell<ChargingNetwork>>,
}

impl LocationLookup for DefaultLocationLookup {
    fn location_of_segment(&self, grid_segment_id: u32) -> u32 {
        self.grid.segment(grid_segment_id).map(|s| s.destination).unwrap_or(0)
    }

    fn charging_params_at(&self, location: u32) -> ChargingParams {
        if self.network.borrow().at_location(location).is_some() {
            ChargingParams { try_charging: true, queue_for_charging: true, ..ChargingParams::default() }
        } else {
            ChargingParams { try_charging: false, ..ChargingParams::default() }
        }
    }
}

fn build_subsystem(vt: &VehicleTypeParams) -> Rc<RefCell<Subsystem>> {
    Rc::new(RefCell::new(Subsystem {
        interfaces: vt.interfaces.iter().cloned().map(Interface::new).collect(),
        storage: Storage::new(
            vt.medium,
            vt.storage_nominal_kwh,
            vt.storage_initial_kwh,
            vt.flow_limit_lower_kw,
            vt.flow_limit_upper_kw,
            vt.charge_efficiency,
            vt.discharge_efficiency,
            vt.allow_invalid_soc,
        ),
        controller: ChargeController::new(vt.medium),
    }))
}

fn schedule_vehicle_type(tree: &Tree) -> String {
    match &tree.node(tree.root()).kind {
        NodeKind::Schedule { vehicle_type } => vehicle_type.clone(),
        _ => unreachable!("tree root must carry NodeKind::Schedule"),
    }
}

fn schedule_depot_location(tree: &Tree, grid: &Grid) -> u32 {
    let root = tree.root();
    let first_trip = tree.children(root)[0];
    let first_leg = tree.children(first_trip)[0];
    let first_segment = tree.children(first_leg)[0];
    let grid_segment_id = match &tree.node(first_segment).kind {
        NodeKind::Segment { grid_segment_id, .. } => *grid_segment_id,
        _ => unreachable!("leg child must carry NodeKind::Segment"),
    };
    grid.segment(grid_segment_id).map(|s| s.origin).unwrap_or(0)
}

/// Runs every `trees` entry as an independently dispatched duty: requests a
/// vehicle from the depot at its starting location, drives it to
/// completion, returns it, then aggregates per-vehicle-type energy and
/// driver-hour totals. Grounded on `ScheduleSimulation.__init__`'s
/// construct-run-evaluate sequence.
pub fn run_schedule_simulation(trees: Vec<Tree>, grid: Rc<Grid>, vehicle_types: &HashMap<String, VehicleTypeParams>, params: &SimulationParams) -> Result<EvaluationRecord, SimulationError> {
    let mut kernel = Kernel::new();
    let fault: FaultSink = Rc::new(RefCell::new(None));
    let network = Rc::new(RefCell::new(ChargingNetwork::new()));
    for (idx, cp) in params.charging_points.iter().enumerate() {
        network.borrow_mut().add(Facility::new_point(idx as u32, cp.location, cp.interface.clone(), cp.capacity, cp.manoeuvre_before_s, cp.manoeuvre_after_s));
    }

    let mut fleet = Fleet::default();
    let mut depots: HashMap<u32, DepotHandle> = HashMap::new();
    for &location in &params.depots.locations {
        let handle = if params.depots.charging {
            let dc = params.depots.depot_charging_params.get(&location).cloned().unwrap_or_default();
            DepotHandle::Charging(Rc::new(RefCell::new(DepotWithCharging::new(location, dc.dead_time_before_s, dc.dead_time_after_s, dc.interrupt_charging))))
        } else {
            DepotHandle::Simple(SimpleDepot::new(location))
        };
        depots.insert(location, handle);
    }
    let depots = Rc::new(RefCell::new(depots));

    let mut subsystems: HashMap<VehicleId, Rc<RefCell<Subsystem>>> = HashMap::new();
    let mut drivers: HashMap<VehicleId, Rc<RefCell<Driver>>> = HashMap::new();
    let mut vehicle_type_of: HashMap<VehicleId, String> = HashMap::new();
    let mut mileage_by_vehicle_type: HashMap<String, f64> = HashMap::new();

    for tree in trees {
        let vehicle_type = schedule_vehicle_type(&tree);
        let vt = vehicle_types.get(&vehicle_type).ok_or_else(|| SimulationError::UnknownVehicleType(vehicle_type.clone()))?.clone();
        let depot_location = schedule_depot_location(&tree, &grid);
        let required_range_km = tree.distance_km(tree.root());

        let vehicle_id = {
            let mut map = depots.borrow_mut();
            match map.get_mut(&depot_location).ok_or(SimulationError::UnconfiguredDepotLocation(depot_location))? {
                DepotHandle::Simple(d) => d.request_vehicle(&mut fleet),
                DepotHandle::Charging(d) => {
                    let consumption = vt.traction_consumption_kwh_per_km;
                    let subsystems_ref = &subsystems;
                    d.borrow_mut().request_vehicle(&mut fleet, required_range_km, |vid| {
                        subsystems_ref.get(&vid).map(|s| s.borrow().storage.energy_kwh / consumption.max(f64::EPSILON)).unwrap_or(0.0)
                    })
                }
            }
        };

        let subsystem = subsystems.entry(vehicle_id).or_insert_with(|| build_subsystem(&vt)).clone();
        let driver = drivers.entry(vehicle_id).or_insert_with(|| Rc::new(RefCell::new(Driver::default()))).clone();
        vehicle_type_of.insert(vehicle_id, vehicle_type.clone());
        *mileage_by_vehicle_type.entry(vehicle_type.clone()).or_insert(0.0) += tree.distance_km(tree.root());

        let locations: Rc<dyn LocationLookup> = Rc::new(DefaultLocationLookup { grid: grid.clone(), network: network.clone() });
        let tree = Rc::new(tree);
        let subsystem_for_return = subsystem.clone();
        let network_for_return = network.clone();
        let depots_for_return = depots.clone();
        let fault_for_return = fault.clone();

        drive_schedule(
            &mut kernel,
            tree.clone(),
            tree.root(),
            subsystem.clone(),
            network.clone(),
            locations,
            vt.traction_consumption_kwh_per_km,
            params.delays_enabled,
            driver,
            fault.clone(),
            move |kernel| {
                let charging_handle = {
                    let mut map = depots_for_return.borrow_mut();
                    match map.get_mut(&depot_location) {
                        Some(DepotHandle::Simple(d)) => {
                            d.return_vehicle(vehicle_id);
                            None
                        }
                        Some(DepotHandle::Charging(d)) => Some(d.clone()),
                        None => None,
                    }
                };
                if let Some(d) = charging_handle {
                    DepotWithCharging::return_vehicle(&d, kernel, vehicle_id, subsystem_for_return, network_for_return, fault_for_return);
                }
            },
        );
    }

    kernel.run(params.run_until);

    if let Some(interface_fault) = fault.borrow_mut().take() {
        return Err(SimulationError::from(interface_fault));
    }

    let mut evaluation = EvaluationRecord { driver_additional_paid_time_s: params.depots.driver_additional_paid_time_s, ..Default::default() };
    for (vehicle_id, driver) in &drivers {
        let vehicle_type = vehicle_type_of.get(vehicle_id).cloned().unwrap_or_default();
        let d = driver.borrow();
        evaluation.driver_driving_time_s += d.driving_time_s;
        evaluation.driver_pause_time_s += d.pause_time_s;
        evaluation.driver_total_time_s += d.driving_time_s + d.pause_time_s;

        let consumed_kwh: f64 = d.trips.iter().map(|t| t.energy_consumed_kwh).sum();
        let medium = vehicle_types.get(&vehicle_type).map(|v| v.medium).unwrap_or(Medium::Electricity);
        *evaluation.fleet_consumption.entry(medium).or_insert(0.0) += consumed_kwh;
        *evaluation.fleet_consumption_by_vehicle_type.entry(vehicle_type.clone()).or_default().entry(medium).or_insert(0.0) += consumed_kwh;

        let log = evaluation.trip_log_by_vehicle_type.entry(vehicle_type.clone()).or_default();
        log.extend(d.trips.iter().map(|&trip| TripLogRecord { vehicle_id: vehicle_id.0, trip }));
    }
    evaluation.fleet_mileage_by_vehicle_type = mileage_by_vehicle_type;

    for (vtype, consumption) in &evaluation.fleet_consumption_by_vehicle_type {
        let mileage = evaluation.fleet_mileage_by_vehicle_type.get(vtype).copied().unwrap_or(0.0);
        let entry = evaluation.fleet_specific_consumption_by_vehicle_type.entry(vtype.clone()).or_default();
        for (medium, energy) in consumption {
            entry.insert(*medium, if mileage > 0.0 { energy / mileage } else { 0.0 });
        }
    }

    for idx in 0..params.charging_points.len() as u32 {
        if let Some(facility) = network.borrow().facility(idx) {
            evaluation.facility_max_occupation.insert(facility.id, facility.slots.max_occupation());
        }
    }

    Ok(evaluation)
}

/// One case in a batch run: its own parameter record, schedule set, grid,
/// and a multiplier applied when folding its evaluation into the combined
/// total. Grounded on `BatchScheduleSimulation`'s `list_of_param_dicts`.
pub struct BatchCase {
    pub id: String,
    pub multiplier: f64,
    pub trees: Vec<Tree>,
    pub grid: Rc<Grid>,
    pub vehicle_types: HashMap<String, VehicleTypeParams>,
    pub params: SimulationParams,
}

/// Runs every case (independently; each gets its own kernel and state, so
/// this is safe to parallelise across an external thread pool by splitting
/// `cases` — nothing here shares mutable state across cases) and combines
/// their evaluations weighted by `multiplier`. Grounded on
/// `BatchScheduleSimulation._execute_simulation`/`_evaluate_simulation`.
pub fn run_batch_schedule_simulation(cases: Vec<BatchCase>) -> Result<(HashMap<String, EvaluationRecord>, EvaluationRecord), SimulationError> {
    let mut per_case = HashMap::new();
    let mut combined = EvaluationRecord::default();

    for case in cases {
        let result = run_schedule_simulation(case.trees, case.grid, &case.vehicle_types, &case.params)?;

        for (medium, energy) in &result.fleet_consumption {
            *combined.fleet_consumption.entry(*medium).or_insert(0.0) += energy * case.multiplier;
        }
        for (vtype, by_medium) in &result.fleet_consumption_by_vehicle_type {
            let entry = combined.fleet_consumption_by_vehicle_type.entry(vtype.clone()).or_default();
            for (medium, energy) in by_medium {
                *entry.entry(*medium).or_insert(0.0) += energy * case.multiplier;
            }
        }
        for (vtype, mileage) in &result.fleet_mileage_by_vehicle_type {
            *combined.fleet_mileage_by_vehicle_type.entry(vtype.clone()).or_insert(0.0) += mileage * case.multiplier;
        }
        combined.driver_driving_time_s += (result.driver_driving_time_s as f64 * case.multiplier).round() as i64;
        combined.driver_pause_time_s += (result.driver_pause_time_s as f64 * case.multiplier).round() as i64;
        combined.driver_additional_paid_time_s += (result.driver_additional_paid_time_s as f64 * case.multiplier).round() as i64;
        combined.driver_total_time_s += (result.driver_total_time_s as f64 * case.multiplier).round() as i64;

        per_case.insert(case.id, result);
    }

    for (vtype, consumption) in &combined.fleet_consumption_by_vehicle_type {
        let mileage = combined.fleet_mileage_by_vehicle_type.get(vtype).copied().unwrap_or(0.0);
        let entry = combined.fleet_specific_consumption_by_vehicle_type.entry(vtype.clone()).or_default();
        for (medium, energy) in consumption {
            entry.insert(*medium, if mileage > 0.0 { energy / mileage } else { 0.0 });
        }
    }

    Ok((per_case, combined))
}
