//! The per-vehicle driving loop: walks a trip tree trip-by-trip, leg-by-leg,
//! segment-by-segment, consuming traction energy while driving and handing
//! off to the interface controller during each leg's post-arrival pause.
//! Grounded on `eflips/schedule.py`'s `Driver.drive_schedule` and
//! `eflips/vehicle.py`'s `drive_leg`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::kernel::Kernel;
use crate::schedule::{NodeKind, Tree};
use crate::vehicle::{run_interface_controller, ChargingParams, FaultSink, Subsystem};

/// Bookkeeping captured once per trip, mirroring the fields
/// `Driver.drive_schedule` stashes into `self.trips_data` for later
/// evaluation/export.
#[derive(Debug, Clone, Copy)]
pub struct TripRecord {
    pub trip_node: usize,
    pub departure_time_sim_s: i64,
    pub arrival_time_sim_s: i64,
    pub energy_departure_kwh: f64,
    pub energy_arrival_kwh: f64,
    pub soc_departure: f64,
    pub soc_arrival: f64,
    pub energy_consumed_kwh: f64,
    pub total_driving_time_s: i64,
    pub total_break_time_s: i64,
    /// Total distance driven across every segment of the trip.
    pub distance_km: f64,
    /// `now − scheduled_arrival` at the last segment of the trip's final
    /// leg, before that leg's pause is shortened by it.
    pub delay_s: i64,
}

/// Accumulates a driver's totals and per-trip records across one schedule.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    pub total_time_s: i64,
    pub driving_time_s: i64,
    pub pause_time_s: i64,
    pub trips: Vec<TripRecord>,
}

/// Where this vehicle is located at the start of a leg's pause, used to
/// pick the charging policy and interface at that stop. Resolved by the
/// caller's location table before `drive_schedule` is invoked.
pub trait LocationLookup {
    fn location_of_segment(&self, grid_segment_id: u32) -> u32;
    fn charging_params_at(&self, location: u32) -> ChargingParams;
}

/// Drives every trip under `schedule_root`, starting once the tree's own
/// departure time arrives (waiting out any head start, or logging a late
/// start, exactly as the source's `timeout = departure - env.now` does).
/// `delays_enabled` mirrors `GlobalConfig::delays`: when set, a segment's
/// recorded `delay_s` extends its driven duration rather than being purely
/// informational. Any fatal condition raised deep inside the interface
/// controller's callback chain is recorded into `fault` rather than
/// unwinding the kernel; the caller checks it once the kernel drains.
#[allow(clippy::too_many_arguments)]
pub fn drive_schedule(
    kernel: &mut Kernel,
    tree: Rc<Tree>,
    schedule_root: usize,
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<crate::interface::ChargingNetwork>>,
    locations: Rc<dyn LocationLookup>,
    consumption_kwh_per_km: f64,
    delays_enabled: bool,
    driver: Rc<RefCell<Driver>>,
    fault: FaultSink,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let timeout = (tree.departure(schedule_root) - kernel.now()).max(0);
    if tree.departure(schedule_root) < kernel.now() {
        eprintln!("warning: start of schedule is delayed");
    }
    kernel.schedule_after(timeout, move |kernel| {
        let trips = tree.children(schedule_root).to_vec();
        drive_trip(kernel, tree, trips, 0, subsystem, network, locations, consumption_kwh_per_km, delays_enabled, driver, fault, on_complete);
    });
}

#[allow(clippy::too_many_arguments)]
fn drive_trip(
    kernel: &mut Kernel,
    tree: Rc<Tree>,
    trips: Vec<usize>,
    trip_idx: usize,
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<crate::interface::ChargingNetwork>>,
    locations: Rc<dyn LocationLookup>,
    consumption_kwh_per_km: f64,
    delays_enabled: bool,
    driver: Rc<RefCell<Driver>>,
    fault: FaultSink,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let Some(&trip) = trips.get(trip_idx) else {
        on_complete(kernel);
        return;
    };

    let (energy_departure_kwh, soc_departure) = {
        let s = subsystem.borrow();
        (s.storage.energy_kwh, s.storage.soc())
    };
    let departure_time_sim_s = kernel.now();
    let legs = tree.children(trip).to_vec();

    drive_leg(
        kernel,
        tree,
        trips,
        trip_idx,
        legs,
        0,
        0,
        0,
        0.0,
        0,
        subsystem,
        network,
        locations,
        consumption_kwh_per_km,
        delays_enabled,
        driver,
        fault,
        departure_time_sim_s,
        energy_departure_kwh,
        soc_departure,
        on_complete,
    );
}

/// `delay_s` here is the delay observed at the end of the *previous* leg (0
/// for a trip's first leg); it is either folded into the trip record (if
/// `leg_idx` runs off the end) or discarded in favour of a fresh per-leg
/// running delay before the next leg's segments are driven.
#[allow(clippy::too_many_arguments)]
fn drive_leg(
    kernel: &mut Kernel,
    tree: Rc<Tree>,
    trips: Vec<usize>,
    trip_idx: usize,
    legs: Vec<usize>,
    leg_idx: usize,
    driving_time_s: i64,
    break_time_s: i64,
    distance_km: f64,
    delay_s: i64,
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<crate::interface::ChargingNetwork>>,
    locations: Rc<dyn LocationLookup>,
    consumption_kwh_per_km: f64,
    delays_enabled: bool,
    driver: Rc<RefCell<Driver>>,
    fault: FaultSink,
    departure_time_sim_s: i64,
    energy_departure_kwh: f64,
    soc_departure: f64,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let Some(&leg) = legs.get(leg_idx) else {
        let trip = trips[trip_idx];
        let (energy_arrival_kwh, soc_arrival) = {
            let s = subsystem.borrow();
            (s.storage.energy_kwh, s.storage.soc())
        };
        driver.borrow_mut().trips.push(TripRecord {
            trip_node: trip,
            departure_time_sim_s,
            arrival_time_sim_s: kernel.now(),
            energy_departure_kwh,
            energy_arrival_kwh,
            soc_departure,
            soc_arrival,
            energy_consumed_kwh: energy_departure_kwh - energy_arrival_kwh,
            total_driving_time_s: driving_time_s,
            total_break_time_s: break_time_s,
            distance_km,
            delay_s,
        });
        driver.borrow_mut().driving_time_s += driving_time_s;
        driver.borrow_mut().pause_time_s += break_time_s;
        drive_trip(kernel, tree, trips, trip_idx + 1, subsystem, network, locations, consumption_kwh_per_km, delays_enabled, driver, fault, on_complete);
        return;
    };

    let segments = tree.children(leg).to_vec();
    drive_segment(
        kernel,
        tree,
        trips,
        trip_idx,
        legs,
        leg_idx,
        segments,
        0,
        driving_time_s,
        break_time_s,
        distance_km,
        0,
        subsystem,
        network,
        locations,
        consumption_kwh_per_km,
        delays_enabled,
        driver,
        fault,
        departure_time_sim_s,
        energy_departure_kwh,
        soc_departure,
        on_complete,
    );
}

/// `delay_s` is the running delay observed after the most recently
/// completed segment of *this* leg (reset to 0 at the leg's first
/// segment), used to shorten the pause once the leg's segments are spent.
#[allow(clippy::too_many_arguments)]
fn drive_segment(
    kernel: &mut Kernel,
    tree: Rc<Tree>,
    trips: Vec<usize>,
    trip_idx: usize,
    legs: Vec<usize>,
    leg_idx: usize,
    segments: Vec<usize>,
    seg_idx: usize,
    driving_time_s: i64,
    break_time_s: i64,
    distance_km: f64,
    delay_s: i64,
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<crate::interface::ChargingNetwork>>,
    locations: Rc<dyn LocationLookup>,
    consumption_kwh_per_km: f64,
    delays_enabled: bool,
    driver: Rc<RefCell<Driver>>,
    fault: FaultSink,
    departure_time_sim_s: i64,
    energy_departure_kwh: f64,
    soc_departure: f64,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let Some(&segment) = segments.get(seg_idx) else {
        // All segments of this leg driven; flush the last segment's
        // consumption and hand off to the interface controller for the
        // leg's pause (shortened by whatever delay accrued), then continue
        // to the next leg.
        let leg = legs[leg_idx];
        let pause_s = match &tree.node(leg).kind {
            NodeKind::Leg { pause_s } => *pause_s,
            _ => unreachable!("leg node must carry NodeKind::Leg"),
        };
        let now = kernel.now();
        {
            let mut s = subsystem.borrow_mut();
            let crate::vehicle::Subsystem { controller, storage, .. } = &mut *s;
            controller.reconfigure(now, 0.0, None, storage);
        }
        let last_segment = *segments.last().expect("leg has no segments");
        let grid_segment_id = match &tree.node(last_segment).kind {
            NodeKind::Segment { grid_segment_id, .. } => *grid_segment_id,
            _ => unreachable!("leg child must carry NodeKind::Segment"),
        };
        let location = locations.location_of_segment(grid_segment_id);
        let params = locations.charging_params_at(location);

        let effective_pause_s = (pause_s - delay_s).max(0);
        let next_driving_time = driving_time_s;
        let next_break_time = break_time_s + effective_pause_s;

        let fault_for_continue = fault.clone();
        let continue_to_next_leg = {
            let tree = tree.clone();
            let trips = trips.clone();
            let legs = legs.clone();
            let subsystem = subsystem.clone();
            let network = network.clone();
            let locations = locations.clone();
            let driver = driver.clone();
            move |kernel: &mut Kernel| {
                {
                    let mut s = subsystem.borrow_mut();
                    let now = kernel.now();
                    let crate::vehicle::Subsystem { controller, storage, .. } = &mut *s;
                    controller.reconfigure(now, 0.0, None, storage);
                }
                drive_leg(
                    kernel, tree, trips, trip_idx, legs, leg_idx + 1, next_driving_time, next_break_time, distance_km, delay_s, subsystem, network, locations, consumption_kwh_per_km,
                    delays_enabled, driver, fault_for_continue, departure_time_sim_s, energy_departure_kwh, soc_departure, on_complete,
                );
            }
        };

        if pause_s <= delay_s {
            // Delay has consumed the whole pause: skip the charging
            // opportunity entirely rather than scheduling a zero-duration
            // interface-controller event.
            continue_to_next_leg(kernel);
        } else {
            run_interface_controller(subsystem.clone(), network.clone(), kernel, location, effective_pause_s, false, params, fault, continue_to_next_leg);
        }
        return;
    };

    let (distance_seg_km, duration_s, departure_s, authored_delay_s) = match &tree.node(segment).kind {
        NodeKind::Segment { distance_km, duration_s, departure_s, delay_s, .. } => (*distance_km, *duration_s, *departure_s, *delay_s),
        _ => unreachable!("trip leg child must carry NodeKind::Segment"),
    };
    let extra_delay_s = if delays_enabled { authored_delay_s } else { 0 };
    let actual_duration_s = duration_s + extra_delay_s;
    let consumption_kw = if actual_duration_s > 0 { consumption_kwh_per_km * distance_seg_km * 3_600.0 / actual_duration_s as f64 } else { 0.0 };
    {
        let mut s = subsystem.borrow_mut();
        let now = kernel.now();
        let crate::vehicle::Subsystem { controller, storage, .. } = &mut *s;
        controller.reconfigure(now, consumption_kw, None, storage);
    }

    let next_driving_time = driving_time_s + actual_duration_s;
    let next_distance_km = distance_km + distance_seg_km;
    let scheduled_arrival_s = departure_s + duration_s;
    kernel.schedule_after(actual_duration_s, move |kernel| {
        let observed_delay_s = kernel.now() - scheduled_arrival_s;
        drive_segment(
            kernel,
            tree,
            trips,
            trip_idx,
            legs,
            leg_idx,
            segments,
            seg_idx + 1,
            next_driving_time,
            break_time_s,
            next_distance_km,
            observed_delay_s,
            subsystem,
            network,
            locations,
            consumption_kwh_per_km,
            delays_enabled,
            driver,
            fault,
            departure_time_sim_s,
            energy_departure_kwh,
            soc_departure,
            on_complete,
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::{Medium, Storage};
    use crate::interface::ChargingNetwork;
    use crate::schedule::{Tree, TripType};

    struct NoCharging;
    impl LocationLookup for NoCharging {
        fn location_of_segment(&self, _grid_segment_id: u32) -> u32 {
            1
        }
        fn charging_params_at(&self, _location: u32) -> ChargingParams {
            ChargingParams { try_charging: false, ..ChargingParams::default() }
        }
    }

    fn subsystem(initial_kwh: f64) -> Rc<RefCell<Subsystem>> {
        Rc::new(RefCell::new(Subsystem {
            interfaces: Vec::new(),
            storage: Storage::new(Medium::Electricity, 300.0, initial_kwh, -150.0, 150.0, 0.95, 0.95, true),
            controller: crate::charge_controller::ChargeController::new(Medium::Electricity),
        }))
    }

    fn no_fault() -> FaultSink {
        Rc::new(RefCell::new(None))
    }

    #[test]
    fn single_trip_single_leg_consumes_expected_energy_and_records_trip() {
        let mut kernel = Kernel::new();
        let mut tree = Tree::new_schedule("standard");
        let root = tree.root();
        let trip = tree.add_trip(root, TripType::Passenger, Some("1".into()));
        let leg = tree.add_leg(trip, 0);
        // 10 km in 1000 s.
        tree.add_segment(leg, 1, 10.0, 0, 1_000, 0);
        let tree = Rc::new(tree);

        let sub = subsystem(200.0);
        let network = Rc::new(RefCell::new(ChargingNetwork::new()));
        let locations = Rc::new(NoCharging);
        let driver = Rc::new(RefCell::new(Driver::default()));

        let done = Rc::new(RefCell::new(false));
        let d = done.clone();
        drive_schedule(&mut kernel, tree, root, sub.clone(), network, locations, 1.2, false, driver.clone(), no_fault(), move |_| *d.borrow_mut() = true);
        kernel.run(None);

        assert!(*done.borrow());
        assert_eq!(driver.borrow().trips.len(), 1);
        let record = driver.borrow().trips[0];
        assert_eq!(record.total_driving_time_s, 1_000);
        assert_eq!(record.distance_km, 10.0);
        assert_eq!(record.delay_s, 0);
        // 10 km * 1.2 kWh/km = 12 kWh of traction energy, grossed up by the
        // 0.95 discharge efficiency the storage applies.
        let expected = 12.0 / 0.95;
        assert!((record.energy_consumed_kwh - expected).abs() < 1e-6);
        assert!((sub.borrow().storage.energy_kwh - (200.0 - expected)).abs() < 1e-6);
    }

    #[test]
    fn two_trips_run_sequentially() {
        let mut kernel = Kernel::new();
        let mut tree = Tree::new_schedule("standard");
        let root = tree.root();
        for i in 0..2i64 {
            let trip = tree.add_trip(root, TripType::Passenger, None);
            let leg = tree.add_leg(trip, 60);
            tree.add_segment(leg, 1, 5.0, i * 560, 500, 0);
        }
        let tree = Rc::new(tree);

        let sub = subsystem(200.0);
        let network = Rc::new(RefCell::new(ChargingNetwork::new()));
        let locations = Rc::new(NoCharging);
        let driver = Rc::new(RefCell::new(Driver::default()));

        let done = Rc::new(RefCell::new(false));
        let d = done.clone();
        drive_schedule(&mut kernel, tree, root, sub, network, locations, 1.0, false, driver.clone(), no_fault(), move |_| *d.borrow_mut() = true);
        kernel.run(None);

        assert!(*done.borrow());
        assert_eq!(driver.borrow().trips.len(), 2);
    }

    #[test]
    fn delay_extends_duration_and_shortens_pause_when_delays_enabled() {
        let mut kernel = Kernel::new();
        let mut tree = Tree::new_schedule("standard");
        let root = tree.root();
        let trip = tree.add_trip(root, TripType::Passenger, Some("1".into()));
        let leg = tree.add_leg(trip, 200);
        // Authored delay of 120s on the only segment of the leg.
        tree.add_segment(leg, 1, 10.0, 0, 1_000, 120);
        let tree = Rc::new(tree);

        let sub = subsystem(200.0);
        let network = Rc::new(RefCell::new(ChargingNetwork::new()));
        let locations = Rc::new(NoCharging);
        let driver = Rc::new(RefCell::new(Driver::default()));

        let done = Rc::new(RefCell::new(false));
        let d = done.clone();
        drive_schedule(&mut kernel, tree, root, sub, network, locations, 1.2, true, driver.clone(), no_fault(), move |_| *d.borrow_mut() = true);
        kernel.run(None);

        assert!(*done.borrow());
        let record = driver.borrow().trips[0];
        // Driving took the nominal 1000s plus the 120s authored delay.
        assert_eq!(record.total_driving_time_s, 1_120);
        assert_eq!(record.delay_s, 120);
        // 200s pause shortened by the 120s delay.
        assert_eq!(record.total_break_time_s, 80);
    }

    #[test]
    fn delay_ignored_when_delays_disabled() {
        let mut kernel = Kernel::new();
        let mut tree = Tree::new_schedule("standard");
        let root = tree.root();
        let trip = tree.add_trip(root, TripType::Passenger, Some("1".into()));
        let leg = tree.add_leg(trip, 200);
        tree.add_segment(leg, 1, 10.0, 0, 1_000, 120);
        let tree = Rc::new(tree);

        let sub = subsystem(200.0);
        let network = Rc::new(RefCell::new(ChargingNetwork::new()));
        let locations = Rc::new(NoCharging);
        let driver = Rc::new(RefCell::new(Driver::default()));

        let done = Rc::new(RefCell::new(false));
        let d = done.clone();
        drive_schedule(&mut kernel, tree, root, sub, network, locations, 1.2, false, driver.clone(), no_fault(), move |_| *d.borrow_mut() = true);
        kernel.run(None);

        assert!(*done.borrow());
        let record = driver.borrow().trips[0];
        assert_eq!(record.total_driving_time_s, 1_000);
        assert_eq!(record.delay_s, 0);
        assert_eq!(record.total_break_time_s, 200);
    }

    #[test]
    fn pause_fully_consumed_by_delay_clamps_to_zero_and_skips_event() {
        let mut kernel = Kernel::new();
        let mut tree = Tree::new_schedule("standard");
        let root = tree.root();
        let trip = tree.add_trip(root, TripType::Passenger, Some("1".into()));
        let leg = tree.add_leg(trip, 50);
        // Authored delay exceeds the pause entirely.
        tree.add_segment(leg, 1, 10.0, 0, 1_000, 500);
        let tree = Rc::new(tree);

        let sub = subsystem(200.0);
        let network = Rc::new(RefCell::new(ChargingNetwork::new()));
        let locations = Rc::new(NoCharging);
        let driver = Rc::new(RefCell::new(Driver::default()));

        let done = Rc::new(RefCell::new(false));
        let d = done.clone();
        drive_schedule(&mut kernel, tree, root, sub, network, locations, 1.2, true, driver.clone(), no_fault(), move |_| *d.borrow_mut() = true);
        kernel.run(None);

        assert!(*done.borrow());
        let record = driver.borrow().trips[0];
        assert_eq!(record.total_break_time_s, 0);
    }
}
