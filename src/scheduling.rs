//! Greedy single-depot duty generator, grounded on
//! `eflips/scheduling.py`'s `generate_schedules_singledepot` and its
//! helpers (`_capacity`, `_charge_duration`, `_add_deadhead_trip`,
//! `_find_next_trip`, `_concatenate_schedules`).
//!
//! Deviation from the source: deadhead trip ids are never consulted
//! downstream (this crate's `schedule::Tree` carries no id field on trip
//! nodes), so the `next_deadhead_trip_id` counter threaded through the
//! source is dropped entirely. The concatenation phase's nested
//! `unprocessed_schedules`/`original_schedules`/`new_schedules` bookkeeping
//! is collapsed to a single pass over duties sorted by last-passenger-trip
//! arrival, each greedily absorbing the best-matching duty (by
//! first-passenger-trip departure) from what remains — the same selection
//! order and feasibility checks, without tracking three overlapping lists.

use std::collections::HashMap;

use rand::Rng;

use crate::grid::Grid;
use crate::schedule::{Tree, TripType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayMode {
    All,
    ChargingOnly,
    SelectedOnly,
}

#[derive(Debug, Clone)]
pub enum ChargingPointNames {
    Any(Vec<String>),
    ByLine(HashMap<String, Vec<String>>),
}

fn charging_possible(grid: &Grid, location_id: u32, line: Option<&str>, charging: &ChargingPointNames) -> bool {
    let Some(point) = grid.point(location_id) else { return false };
    match charging {
        ChargingPointNames::Any(names) => names.iter().any(|n| n == &point.name),
        ChargingPointNames::ByLine(by_line) => line.and_then(|l| by_line.get(l)).is_some_and(|names| names.iter().any(|n| n == &point.name)),
    }
}

#[derive(Debug, Clone)]
pub struct VehicleParams {
    pub capacity_kwh: f64,
    pub static_range_km: f64,
    pub traction_consumption_kwh_per_km: f64,
    pub aux_power_driving_kw: f64,
    pub aux_power_pausing_kw: f64,
    pub charge_power_kw: f64,
    pub reduce_charge_time: f64,
    pub dead_time_s: i64,
}

#[derive(Debug, Clone)]
pub struct SchedulingParams {
    pub depot_location: u32,
    pub min_pause_duration_s: i64,
    pub max_pause_duration_s: i64,
    pub max_deadheading_duration_s: i64,
    pub use_static_range: bool,
    pub default_depot_trip_distance_km: f64,
    pub default_depot_trip_velocity_kmh: f64,
    pub default_deadhead_trip_distance_km: f64,
    pub default_deadhead_trip_velocity_kmh: f64,
    pub deadheading: bool,
    pub mix_lines_at_stop: bool,
    pub mix_lines_deadheading: bool,
    pub add_delays: bool,
    pub delay_mode: DelayMode,
    pub delayed_trip_ids: Option<Vec<u32>>,
    pub delay_threshold_s: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PassengerTrip {
    pub id: u32,
    pub vehicle_type: String,
    pub line: String,
    pub origin: u32,
    pub destination: u32,
    pub departure_s: i64,
    pub duration_s: i64,
    pub distance_km: f64,
    pub delay_s: i64,
    pub grid_segment_id: u32,
}

impl PassengerTrip {
    pub fn arrival_s(&self) -> i64 {
        self.departure_s + self.duration_s
    }
}

/// Draws a uniform random delay in `[delay_min_s, delay_max_s]` for every
/// trip, overwriting `delay_s`. Grounded on `eflips/schedule.py`'s
/// `add_random_delays`.
pub fn inject_random_delays(trips: &mut [PassengerTrip], delay_min_s: i64, delay_max_s: i64, rng: &mut impl Rng) {
    for trip in trips {
        trip.delay_s = rng.random_range(delay_min_s..=delay_max_s);
    }
}

#[derive(Debug, Clone)]
struct DutyTrip {
    trip_type: TripType,
    vehicle_type: String,
    line: Option<String>,
    origin: u32,
    destination: u32,
    departure_s: i64,
    duration_s: i64,
    distance_km: f64,
    delay_s: i64,
    pause_s: i64,
    charge: bool,
    source_trip_id: Option<u32>,
    grid_segment_id: u32,
}

impl DutyTrip {
    fn arrival_s(&self) -> i64 {
        self.departure_s + self.duration_s
    }
}

fn passenger_to_duty_trip(t: PassengerTrip) -> DutyTrip {
    DutyTrip {
        trip_type: TripType::Passenger,
        vehicle_type: t.vehicle_type,
        line: Some(t.line),
        origin: t.origin,
        destination: t.destination,
        departure_s: t.departure_s,
        duration_s: t.duration_s,
        distance_km: t.distance_km,
        delay_s: t.delay_s,
        pause_s: 0,
        charge: false,
        source_trip_id: Some(t.id),
        grid_segment_id: t.grid_segment_id,
    }
}

fn duty_trip_to_passenger(t: DutyTrip) -> PassengerTrip {
    PassengerTrip {
        id: t.source_trip_id.expect("passenger trip always carries its source id"),
        vehicle_type: t.vehicle_type,
        line: t.line.unwrap_or_default(),
        origin: t.origin,
        destination: t.destination,
        departure_s: t.departure_s,
        duration_s: t.duration_s,
        distance_km: t.distance_km,
        delay_s: t.delay_s,
        grid_segment_id: t.grid_segment_id,
    }
}

#[derive(Debug, Clone)]
struct Duty {
    vehicle_type: String,
    trips: Vec<DutyTrip>,
}

fn duty_distance_km(duty: &Duty) -> f64 {
    duty.trips.iter().map(|t| t.distance_km).sum()
}

fn last_passenger_arrival(d: &Duty) -> i64 {
    d.trips.iter().rev().find(|t| t.trip_type == TripType::Passenger).map(|t| t.arrival_s()).unwrap_or(i64::MAX)
}

fn first_passenger_departure(d: &Duty) -> i64 {
    d.trips.iter().find(|t| t.trip_type == TripType::Passenger).map(|t| t.departure_s).unwrap_or(i64::MAX)
}

/// Grounded on the repeated `add_delay_here` blocks: whether a delay should
/// be folded into the minimum post-trip dwell, and by how much.
fn delay_to_add(trip: &DutyTrip, params: &SchedulingParams) -> i64 {
    if !params.add_delays {
        return 0;
    }
    let mut add = false;
    if let Some(ids) = &params.delayed_trip_ids {
        if trip.source_trip_id.is_some_and(|id| ids.contains(&id)) {
            add = true;
        }
    }
    match params.delay_mode {
        DelayMode::All => add = true,
        DelayMode::ChargingOnly => {
            if trip.charge {
                add = true;
            }
        }
        DelayMode::SelectedOnly => {}
    }
    if add { (trip.delay_s - params.delay_threshold_s).max(0) } else { 0 }
}

#[derive(Debug, Clone, Copy)]
pub struct CapacityResult {
    pub capacity_kwh: f64,
    pub capacity_min_kwh: f64,
    pub consumption_driving_kwh: f64,
    pub consumption_total_kwh: f64,
    pub specific_consumption_driving: f64,
    pub specific_consumption_total: f64,
}

/// Walks the duty's trips, subtracting driving consumption and either
/// crediting a charge or debiting a pause's auxiliary load, tracking the
/// minimum capacity seen. Grounded on `_capacity`.
fn capacity(duty: &Duty, vehicle: &VehicleParams, params: &SchedulingParams) -> CapacityResult {
    let capacity_max = vehicle.capacity_kwh;
    let mut capacity = vehicle.capacity_kwh;
    let mut capacity_min = capacity;
    let mut cons_driving_total = 0.0;
    let mut cons_pausing_total = 0.0;
    let mut distance_total = 0.0;

    for trip in &duty.trips {
        let delay = delay_to_add(trip, params);
        let time_driving_s = (trip.duration_s + delay - trip.pause_s) as f64;
        let time_pausing_s = (trip.pause_s - delay).max(0) as f64;

        let cons_driving = trip.distance_km * vehicle.traction_consumption_kwh_per_km + time_driving_s / 3_600.0 * vehicle.aux_power_driving_kw;
        cons_driving_total += cons_driving;
        distance_total += trip.distance_km;
        capacity -= cons_driving;
        capacity_min = capacity_min.min(capacity);

        let cons_pausing = time_pausing_s / 3_600.0 * vehicle.aux_power_pausing_kw;
        let max_energy_charged = if trip.charge && time_pausing_s > vehicle.dead_time_s as f64 {
            (time_pausing_s - vehicle.dead_time_s as f64) / 3_600.0 * vehicle.charge_power_kw
        } else {
            0.0
        };
        cons_pausing_total += cons_pausing;
        capacity = capacity_max.min(capacity - cons_pausing + max_energy_charged);
        capacity_min = capacity_min.min(capacity);
    }

    let cons_total = cons_driving_total + cons_pausing_total;
    let (spec_driving, spec_total) =
        if distance_total == 0.0 { (0.0, 0.0) } else { (cons_driving_total / distance_total, cons_total / distance_total) };

    CapacityResult {
        capacity_kwh: capacity,
        capacity_min_kwh: capacity_min,
        consumption_driving_kwh: cons_driving_total,
        consumption_total_kwh: cons_total,
        specific_consumption_driving: spec_driving,
        specific_consumption_total: spec_total,
    }
}

/// Minutes-rounded time to refill from the duty's current capacity to full,
/// grounded on `_charge_duration`.
fn required_charge_duration_s(duty: &Duty, vehicle: &VehicleParams, params: &SchedulingParams) -> i64 {
    let cap = capacity(duty, vehicle, params);
    let rate = vehicle.charge_power_kw - vehicle.aux_power_pausing_kw;
    let t = ((vehicle.capacity_kwh - cap.capacity_kwh) / rate * 3_600.0 + vehicle.dead_time_s as f64) * (1.0 - vehicle.reduce_charge_time);
    t.ceil() as i64
}

fn deadhead_segment(grid: &mut Grid, origin: u32, destination: u32, default_distance_km: f64) -> (u32, f64) {
    if let Some(segment) = grid.shortest_segment(origin, destination) {
        (segment.id, segment.distance_km)
    } else {
        let id = grid.create_segment(origin, destination, default_distance_km);
        (id, default_distance_km)
    }
}

fn deadhead_duration_s(distance_km: f64, velocity_kmh: f64) -> i64 {
    ((distance_km / velocity_kmh * 60.0).ceil() * 60.0) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadheadEnd {
    Start,
    End,
}

/// Prepends a pull-out (`Start`) or appends a pull-in / connecting deadhead
/// (`End`) to `duty`, sizing its pause for a full charge if the connecting
/// location permits charging on the duty's line. Grounded on
/// `_add_deadhead_trip`.
fn add_deadhead_trip(
    duty: &mut Duty,
    end: DeadheadEnd,
    connecting_location: u32,
    grid: &mut Grid,
    vehicles: &HashMap<String, VehicleParams>,
    charging: &ChargingPointNames,
    params: &SchedulingParams,
) {
    let vehicle_type = duty.vehicle_type.clone();
    let vehicle = vehicles.get(&vehicle_type).expect("unknown vehicle type");

    match end {
        DeadheadEnd::Start => {
            let (destination, base_departure, line) = {
                let first = duty.trips.first().expect("duty has a trip before pull-out");
                (first.origin, first.departure_s, first.line.clone())
            };
            let origin = connecting_location;
            let (segment_id, distance_km) = deadhead_segment(grid, origin, destination, params.default_deadhead_trip_distance_km);
            let duration_s = deadhead_duration_s(distance_km, params.default_deadhead_trip_velocity_kmh);

            let charge = charging_possible(grid, destination, line.as_deref(), charging);
            let pause_s = if charge {
                let temp = Duty {
                    vehicle_type: vehicle_type.clone(),
                    trips: vec![DutyTrip {
                        trip_type: TripType::PullOut,
                        vehicle_type: vehicle_type.clone(),
                        line: line.clone(),
                        origin,
                        destination,
                        departure_s: 0,
                        duration_s,
                        distance_km,
                        delay_s: 0,
                        pause_s: 0,
                        charge: true,
                        source_trip_id: None,
                        grid_segment_id: segment_id,
                    }],
                };
                ((required_charge_duration_s(&temp, vehicle, params) as f64 / 60.0).ceil() * 60.0) as i64
            } else {
                0
            };

            let departure_s = base_departure - duration_s - pause_s;
            duty.trips.insert(
                0,
                DutyTrip {
                    trip_type: TripType::PullOut,
                    vehicle_type,
                    line,
                    origin,
                    destination,
                    departure_s,
                    duration_s,
                    distance_km,
                    delay_s: 0,
                    pause_s,
                    charge,
                    source_trip_id: None,
                    grid_segment_id: segment_id,
                },
            );
        }
        DeadheadEnd::End => {
            let (origin, line, base_arrival) = {
                let last = duty.trips.last_mut().expect("duty has a trip before pull-in");
                last.pause_s = 0;
                (last.destination, last.line.clone(), last.arrival_s())
            };
            let destination = connecting_location;
            let (segment_id, distance_km) = deadhead_segment(grid, origin, destination, params.default_deadhead_trip_distance_km);
            let duration_s = deadhead_duration_s(distance_km, params.default_deadhead_trip_velocity_kmh);

            let charge = charging_possible(grid, origin, line.as_deref(), charging);
            let mut pause_s = if charge {
                duty.trips.last_mut().unwrap().charge = true;
                ((required_charge_duration_s(duty, vehicle, params) as f64 / 60.0).ceil() * 60.0) as i64
            } else {
                0
            };
            pause_s += delay_to_add(duty.trips.last().unwrap(), params);
            duty.trips.last_mut().unwrap().pause_s = pause_s;

            let departure_s = base_arrival + pause_s;
            duty.trips.push(DutyTrip {
                trip_type: TripType::PullIn,
                vehicle_type,
                line,
                origin,
                destination,
                departure_s,
                duration_s,
                distance_km,
                delay_s: 0,
                pause_s: 0,
                charge: false,
                source_trip_id: None,
                grid_segment_id: segment_id,
            });
        }
    }
}

fn find_next_trip(trips: &[PassengerTrip], location: u32, min_departure_s: i64, vehicle_type: &str, line: Option<&str>) -> Option<usize> {
    trips
        .iter()
        .position(|t| t.departure_s >= min_departure_s && t.origin == location && t.vehicle_type == vehicle_type && line.is_none_or(|l| t.line == l))
}

#[derive(Debug, Clone, Copy)]
pub struct UnserviceableTrip;

impl std::fmt::Display for UnserviceableTrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unserviceable trips in timetable, cannot complete scheduling")
    }
}
impl std::error::Error for UnserviceableTrip {}

fn try_concatenate(a: &Duty, b: &Duty, charging: &ChargingPointNames, grid: &mut Grid, vehicles: &HashMap<String, VehicleParams>, params: &SchedulingParams) -> Option<Duty> {
    if a.vehicle_type != b.vehicle_type {
        return None;
    }
    let mut a_trips = a.trips.clone();
    let mut b_trips = b.trips.clone();
    while matches!(a_trips.last().map(|t| t.trip_type), Some(TripType::PullIn) | Some(TripType::Deadhead)) {
        a_trips.pop();
    }
    while matches!(b_trips.first().map(|t| t.trip_type), Some(TripType::PullOut) | Some(TripType::Deadhead)) {
        b_trips.remove(0);
    }
    let last_a = a_trips.last()?.clone();
    let first_b = b_trips.first()?.clone();

    if !params.mix_lines_deadheading && last_a.line != first_b.line {
        return None;
    }

    let charge_time = if last_a.charge { last_a.pause_s } else { 0 };
    let gap = first_b.departure_s - last_a.arrival_s() - charge_time;
    if gap < 0 || gap > params.max_deadheading_duration_s {
        return None;
    }

    let mut merged = Duty { vehicle_type: a.vehicle_type.clone(), trips: a_trips };

    if last_a.destination == first_b.origin {
        merged.trips.last_mut().unwrap().pause_s = first_b.departure_s - last_a.arrival_s();
    } else {
        add_deadhead_trip(&mut merged, DeadheadEnd::End, first_b.origin, grid, vehicles, charging, params);
        let (d_arrival, d_pause, d_departure, d_duration) = {
            let d = merged.trips.last().unwrap();
            (d.arrival_s(), d.pause_s, d.departure_s, d.duration_s)
        };
        if d_arrival + d_pause > first_b.departure_s {
            return None;
        }
        merged.trips.last_mut().unwrap().pause_s = first_b.departure_s - d_departure - d_duration;
    }

    merged.trips.extend(b_trips);

    let vehicle = vehicles.get(&merged.vehicle_type)?;
    let cap = capacity(&merged, vehicle, params);
    if cap.capacity_min_kwh < 0.0 {
        return None;
    }
    if params.use_static_range && duty_distance_km(&merged) > vehicle.static_range_km {
        return None;
    }
    Some(merged)
}

/// Greedily absorbs duties into one another by deadhead connection, sorted
/// by last-passenger-trip arrival with candidates considered by
/// first-passenger-trip departure. Grounded on `_concatenate_schedules` and
/// its caller's outer loop, collapsed per the module doc comment.
fn concatenate_duties(duties: Vec<Duty>, charging: &ChargingPointNames, grid: &mut Grid, vehicles: &HashMap<String, VehicleParams>, params: &SchedulingParams) -> Vec<Duty> {
    let n = duties.len();
    let mut used = vec![false; n];
    let pool = duties;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| last_passenger_arrival(&pool[i]));

    let mut result = Vec::new();
    for &i in &order {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut merged = pool[i].clone();

        let mut connecting: Vec<usize> = (0..n).filter(|&j| !used[j]).collect();
        connecting.sort_by_key(|&j| first_passenger_departure(&pool[j]));

        for j in connecting {
            if used[j] {
                continue;
            }
            if let Some(candidate) = try_concatenate(&merged, &pool[j], charging, grid, vehicles, params) {
                merged = candidate;
                used[j] = true;
            }
        }
        result.push(merged);
    }
    result
}

fn duty_to_tree(duty: Duty) -> Tree {
    let mut tree = Tree::new_schedule(duty.vehicle_type);
    let root = tree.root();
    for trip in duty.trips {
        let trip_node = tree.add_trip(root, trip.trip_type, trip.line);
        let leg = tree.add_leg(trip_node, trip.pause_s);
        tree.add_segment(leg, trip.grid_segment_id, trip.distance_km, trip.departure_s, trip.duration_s, trip.delay_s);
    }
    tree
}

/// Builds a set of vehicle duties covering every passenger trip in
/// `trips`, each starting and ending at `params.depot_location`. Grounded
/// on `generate_schedules_singledepot`.
pub fn generate_schedules_single_depot(
    mut trips: Vec<PassengerTrip>,
    grid: &mut Grid,
    vehicles: &HashMap<String, VehicleParams>,
    charging: &ChargingPointNames,
    params: &SchedulingParams,
) -> Result<Vec<Tree>, UnserviceableTrip> {
    trips.sort_by_key(|t| t.departure_s);
    let mut duties: Vec<Duty> = Vec::new();

    while !trips.is_empty() {
        let first = trips.remove(0);
        let vehicle_type = first.vehicle_type.clone();
        let line = first.line.clone();
        let vehicle = vehicles.get(&vehicle_type).expect("unknown vehicle type").clone();

        let mut duty = Duty { vehicle_type: vehicle_type.clone(), trips: vec![passenger_to_duty_trip(first)] };
        add_deadhead_trip(&mut duty, DeadheadEnd::Start, params.depot_location, grid, vehicles, charging, params);

        loop {
            let cap = capacity(&duty, &vehicle, params);
            if params.use_static_range && duty_distance_km(&duty) > vehicle.static_range_km {
                break;
            }
            if cap.capacity_min_kwh < 0.0 {
                break;
            }

            let (current_location, current_line, current_arrival, current_pause, is_single) = {
                let t = duty.trips.last().unwrap();
                (t.destination, t.line.clone(), t.arrival_s(), t.pause_s, duty.trips.len() == 1)
            };

            let min_departure_s = if is_single {
                current_arrival + current_pause
            } else {
                let charge = charging_possible(grid, current_location, current_line.as_deref(), charging);
                let charge_dur = if charge {
                    duty.trips.last_mut().unwrap().charge = true;
                    ((required_charge_duration_s(&duty, &vehicle, params) as f64 / 60.0).ceil() * 60.0) as i64
                } else {
                    0
                };
                let delay = delay_to_add(duty.trips.last().unwrap(), params);
                current_arrival + delay + params.min_pause_duration_s.max(charge_dur)
            };

            let next_line = if params.mix_lines_at_stop { None } else { Some(line.as_str()) };
            let Some(idx) = find_next_trip(&trips, current_location, min_departure_s, &vehicle_type, next_line) else { break };
            let pause_duration = trips[idx].departure_s - current_arrival;
            if pause_duration > params.max_pause_duration_s {
                break;
            }

            duty.trips.last_mut().unwrap().pause_s = pause_duration;
            let next_trip = trips.remove(idx);
            duty.trips.push(passenger_to_duty_trip(next_trip));
        }

        loop {
            if !duty.trips.iter().any(|t| t.trip_type == TripType::Passenger) {
                return Err(UnserviceableTrip);
            }
            duty.trips.last_mut().unwrap().pause_s = 0;
            add_deadhead_trip(&mut duty, DeadheadEnd::End, params.depot_location, grid, vehicles, charging, params);

            let cap = capacity(&duty, &vehicle, params);
            let distance = duty_distance_km(&duty);
            let infeasible = cap.capacity_min_kwh < 0.0 || (params.use_static_range && distance > vehicle.static_range_km);

            if infeasible {
                duty.trips.pop();
                let passenger = duty.trips.pop().expect("duty still holds at least the pull-out");
                trips.push(duty_trip_to_passenger(passenger));
                trips.sort_by_key(|t| t.departure_s);
            } else {
                break;
            }
        }

        duties.push(duty);
    }

    let duties = if params.deadheading { concatenate_duties(duties, charging, grid, vehicles, params) } else { duties };

    let mut duties = duties;
    duties.sort_by_key(first_passenger_departure);
    Ok(duties.into_iter().map(duty_to_tree).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridPoint, PointKind};

    fn vehicle() -> VehicleParams {
        VehicleParams {
            capacity_kwh: 270.0,
            static_range_km: 200.0,
            traction_consumption_kwh_per_km: 1.2,
            aux_power_driving_kw: 5.0,
            aux_power_pausing_kw: 2.0,
            charge_power_kw: 150.0,
            reduce_charge_time: 0.0,
            dead_time_s: 60,
        }
    }

    fn params() -> SchedulingParams {
        SchedulingParams {
            depot_location: 1,
            min_pause_duration_s: 120,
            max_pause_duration_s: 2_700,
            max_deadheading_duration_s: 2_700,
            use_static_range: true,
            default_depot_trip_distance_km: 3.0,
            default_depot_trip_velocity_kmh: 25.0,
            default_deadhead_trip_distance_km: 3.0,
            default_deadhead_trip_velocity_kmh: 25.0,
            deadheading: true,
            mix_lines_at_stop: false,
            mix_lines_deadheading: true,
            add_delays: false,
            delay_mode: DelayMode::All,
            delayed_trip_ids: None,
            delay_threshold_s: 180,
        }
    }

    fn grid_with_terminus_and_depot() -> Grid {
        let mut grid = Grid::new();
        grid.add_point(GridPoint { id: 1, name: "depot".into(), kind: PointKind::Depot, coords: None });
        grid.add_point(GridPoint { id: 2, name: "A".into(), kind: PointKind::Stop, coords: None });
        grid.add_point(GridPoint { id: 3, name: "B".into(), kind: PointKind::Stop, coords: None });
        grid
    }

    #[test]
    fn single_trip_becomes_one_pull_out_trip_pull_in_duty() {
        let mut grid = grid_with_terminus_and_depot();
        let mut vehicles = HashMap::new();
        vehicles.insert("standard".to_string(), vehicle());
        let charging = ChargingPointNames::Any(vec![]);
        let p = params();

        let trips = vec![PassengerTrip {
            id: 1,
            vehicle_type: "standard".into(),
            line: "1".into(),
            origin: 2,
            destination: 3,
            departure_s: 10_000,
            duration_s: 600,
            distance_km: 10.0,
            delay_s: 0,
            grid_segment_id: 99,
        }];

        let trees = generate_schedules_single_depot(trips, &mut grid, &vehicles, &charging, &p).unwrap();
        assert_eq!(trees.len(), 1);
        let tree = &trees[0];
        assert_eq!(tree.children(tree.root()).len(), 3);
        assert!(tree.check_monotonic(tree.root()).is_ok());
    }

    #[test]
    fn two_compatible_trips_chain_into_a_single_duty() {
        let mut grid = grid_with_terminus_and_depot();
        let mut vehicles = HashMap::new();
        vehicles.insert("standard".to_string(), vehicle());
        let charging = ChargingPointNames::Any(vec![]);
        let p = params();

        let trips = vec![
            PassengerTrip { id: 1, vehicle_type: "standard".into(), line: "1".into(), origin: 2, destination: 3, departure_s: 10_000, duration_s: 600, distance_km: 10.0, delay_s: 0, grid_segment_id: 99 },
            PassengerTrip { id: 2, vehicle_type: "standard".into(), line: "1".into(), origin: 3, destination: 2, departure_s: 10_800, duration_s: 600, distance_km: 10.0, delay_s: 0, grid_segment_id: 98 },
        ];

        let trees = generate_schedules_single_depot(trips, &mut grid, &vehicles, &charging, &p).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].children(trees[0].root()).len(), 4);
    }

    #[test]
    fn unreachable_static_range_still_produces_a_feasible_single_trip_duty() {
        let mut grid = grid_with_terminus_and_depot();
        let mut vehicles = HashMap::new();
        let mut v = vehicle();
        v.static_range_km = 1_000.0;
        vehicles.insert("standard".to_string(), v);
        let charging = ChargingPointNames::Any(vec![]);
        let p = params();

        let trips = vec![PassengerTrip { id: 1, vehicle_type: "standard".into(), line: "1".into(), origin: 2, destination: 3, departure_s: 0, duration_s: 1_200, distance_km: 15.0, delay_s: 0, grid_segment_id: 1 }];
        let trees = generate_schedules_single_depot(trips, &mut grid, &vehicles, &charging, &p).unwrap();
        assert_eq!(trees.len(), 1);
    }

    #[test]
    fn inject_random_delays_stays_within_bounds_and_is_deterministic_per_seed() {
        use rand::{rngs::StdRng, SeedableRng};

        let mut trips = vec![
            PassengerTrip { id: 1, vehicle_type: "standard".into(), line: "1".into(), origin: 2, destination: 3, departure_s: 0, duration_s: 600, distance_km: 5.0, delay_s: 0, grid_segment_id: 1 },
            PassengerTrip { id: 2, vehicle_type: "standard".into(), line: "1".into(), origin: 3, destination: 2, departure_s: 1_800, duration_s: 600, distance_km: 5.0, delay_s: 0, grid_segment_id: 2 },
        ];
        let mut rng = StdRng::seed_from_u64(42);
        inject_random_delays(&mut trips, 10, 60, &mut rng);
        for t in &trips {
            assert!(t.delay_s >= 10 && t.delay_s <= 60);
        }

        let mut trips_a = trips.clone();
        let mut trips_b = trips.clone();
        inject_random_delays(&mut trips_a, 0, 300, &mut StdRng::seed_from_u64(7));
        inject_random_delays(&mut trips_b, 0, 300, &mut StdRng::seed_from_u64(7));
        let delays_a: Vec<i64> = trips_a.iter().map(|t| t.delay_s).collect();
        let delays_b: Vec<i64> = trips_b.iter().map(|t| t.delay_s).collect();
        assert_eq!(delays_a, delays_b);
    }

    #[test]
    fn delay_past_threshold_eats_into_pause_and_clamps_at_zero() {
        let mut p = params();
        p.add_delays = true;
        p.delay_mode = DelayMode::All;
        p.delay_threshold_s = 180;

        let trip = DutyTrip {
            trip_type: TripType::Passenger,
            vehicle_type: "standard".into(),
            line: Some("1".into()),
            origin: 2,
            destination: 3,
            departure_s: 0,
            duration_s: 1_200,
            distance_km: 8.0,
            delay_s: 420,
            pause_s: 300,
            charge: false,
            source_trip_id: Some(1),
            grid_segment_id: 1,
        };
        assert_eq!(delay_to_add(&trip, &p), 240);

        let duty = Duty { vehicle_type: "standard".into(), trips: vec![trip] };
        let v = vehicle();
        let result = capacity(&duty, &v, &p);
        assert!(result.consumption_total_kwh >= result.consumption_driving_kwh);

        // A delay that exceeds the pause entirely clamps the pausing time
        // at zero rather than going negative.
        let mut short_pause = duty.trips[0].clone();
        short_pause.pause_s = 60;
        let clamped = Duty { vehicle_type: "standard".into(), trips: vec![short_pause] };
        let clamped_result = capacity(&clamped, &v, &p);
        assert!(clamped_result.consumption_total_kwh.is_finite());
        assert!((clamped_result.consumption_total_kwh - clamped_result.consumption_driving_kwh).abs() < 1e-9);
    }
}
