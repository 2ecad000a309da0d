//! TOML-based scenario configuration and preset definitions.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::energy::Medium;
use crate::grid::{Grid, GridPoint, GridSegment};
use crate::interface::{InterfaceType, InterfaceTypeId};
use crate::scheduling::{ChargingPointNames, DelayMode, PassengerTrip, SchedulingParams, VehicleParams};
use crate::simulation::{ChargingPointParams, DepotChargingParams, DepotParams, SimulationParams, VehicleTypeParams};

/// Top-level scenario configuration parsed from TOML.
///
/// All fields except `vehicle_types` have defaults matching the baseline
/// scenario. Load from TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation run window and global toggles.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Duty generation parameters.
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    /// One entry per vehicle type referenced by the timetable.
    #[serde(default)]
    pub vehicle_types: Vec<VehicleTypeConfig>,
    /// Stationary charging infrastructure.
    #[serde(default)]
    pub charging_points: Vec<ChargingPointConfig>,
    /// Depot pooling/charging behaviour.
    #[serde(default)]
    pub depot: DepotConfig,
    /// The stop/depot network the timetable runs over.
    #[serde(default)]
    pub grid_points: Vec<GridPoint>,
    /// Known point-to-point distances; the scheduler falls back to
    /// `scheduling.default_deadhead_trip_distance_km` for any pair missing
    /// here.
    #[serde(default)]
    pub grid_segments: Vec<GridSegment>,
    /// The passenger timetable to generate duties for.
    #[serde(default)]
    pub trips: Vec<PassengerTrip>,
}

/// Global run window and diagnostic toggles, grounded on
/// `eflips/settings.py`'s `global_constants`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Stop the kernel after this many simulated seconds; `None` runs until
    /// the event queue drains on its own.
    pub run_until_s: Option<i64>,
    /// Print diagnostic messages as the kernel processes events.
    pub debug_msgs: bool,
    /// Allow a storage's state of charge to leave `[0, 1]` rather than
    /// treating it as a fatal error.
    pub allow_invalid_soc: bool,
    /// Force a charge controller update on every kernel tick while
    /// charging rather than only at state transitions.
    pub force_updates_while_charging: bool,
    /// Interval, in seconds, between forced charging updates when
    /// `force_updates_while_charging` is set.
    pub charging_update_interval_s: i64,
    /// Keep per-trip/per-event records for later export.
    pub data_logging: bool,
    /// Inject recorded delays into duty generation and the driving loop.
    pub delays: bool,
    /// Average passenger mass, used by vehicle types that model payload-
    /// dependent traction consumption.
    pub average_passenger_weight_kg: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            run_until_s: None,
            debug_msgs: false,
            allow_invalid_soc: false,
            force_updates_while_charging: false,
            charging_update_interval_s: 300,
            data_logging: true,
            delays: false,
            average_passenger_weight_kg: 68.0,
        }
    }
}

/// Duty generation parameters, grounded on `eflips/scheduling.py`'s
/// scheduler parameter record.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulingConfig {
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
    pub delay_mode: DelayModeConfig,
    pub delayed_trip_ids: Option<Vec<u32>>,
    pub delay_threshold_s: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            depot_location: 0,
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
            delay_mode: DelayModeConfig::All,
            delayed_trip_ids: None,
            delay_threshold_s: 180,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayModeConfig {
    All,
    ChargingOnly,
    SelectedOnly,
}

impl From<DelayModeConfig> for DelayMode {
    fn from(mode: DelayModeConfig) -> Self {
        match mode {
            DelayModeConfig::All => DelayMode::All,
            DelayModeConfig::ChargingOnly => DelayMode::ChargingOnly,
            DelayModeConfig::SelectedOnly => DelayMode::SelectedOnly,
        }
    }
}

impl SchedulingConfig {
    /// Builds a `SchedulingParams` for the generator; `add_delays` is taken
    /// from [`GlobalConfig::delays`] rather than duplicated here.
    pub fn to_scheduling_params(&self, add_delays: bool) -> SchedulingParams {
        SchedulingParams {
            depot_location: self.depot_location,
            min_pause_duration_s: self.min_pause_duration_s,
            max_pause_duration_s: self.max_pause_duration_s,
            max_deadheading_duration_s: self.max_deadheading_duration_s,
            use_static_range: self.use_static_range,
            default_depot_trip_distance_km: self.default_depot_trip_distance_km,
            default_depot_trip_velocity_kmh: self.default_depot_trip_velocity_kmh,
            default_deadhead_trip_distance_km: self.default_deadhead_trip_distance_km,
            default_deadhead_trip_velocity_kmh: self.default_deadhead_trip_velocity_kmh,
            deadheading: self.deadheading,
            mix_lines_at_stop: self.mix_lines_at_stop,
            mix_lines_deadheading: self.mix_lines_deadheading,
            add_delays,
            delay_mode: self.delay_mode.into(),
            delayed_trip_ids: self.delayed_trip_ids.clone(),
            delay_threshold_s: self.delay_threshold_s,
        }
    }
}

/// One vehicle type's energy subsystem and range-feasibility parameters,
/// grounded on SPEC_FULL.md's `vehicle_params.<type>` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleTypeConfig {
    pub name: String,
    pub medium: Medium,
    pub interfaces: Vec<InterfaceType>,
    pub capacity_kwh: f64,
    pub initial_kwh: f64,
    pub static_range_km: f64,
    pub flow_limit_lower_kw: f64,
    pub flow_limit_upper_kw: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    pub traction_consumption_kwh_per_km: f64,
    pub aux_power_driving_kw: f64,
    pub aux_power_pausing_kw: f64,
    pub charge_power_kw: f64,
    pub reduce_charge_time: f64,
    pub dead_time_s: i64,
}

impl VehicleTypeConfig {
    pub fn to_scheduling_params(&self, allow_invalid_soc: bool) -> VehicleParams {
        let _ = allow_invalid_soc;
        VehicleParams {
            capacity_kwh: self.capacity_kwh,
            static_range_km: self.static_range_km,
            traction_consumption_kwh_per_km: self.traction_consumption_kwh_per_km,
            aux_power_driving_kw: self.aux_power_driving_kw,
            aux_power_pausing_kw: self.aux_power_pausing_kw,
            charge_power_kw: self.charge_power_kw,
            reduce_charge_time: self.reduce_charge_time,
            dead_time_s: self.dead_time_s,
        }
    }

    pub fn to_vehicle_type_params(&self, allow_invalid_soc: bool) -> VehicleTypeParams {
        VehicleTypeParams {
            medium: self.medium,
            interfaces: self.interfaces.clone(),
            storage_nominal_kwh: self.capacity_kwh,
            storage_initial_kwh: self.initial_kwh,
            flow_limit_lower_kw: self.flow_limit_lower_kw,
            flow_limit_upper_kw: self.flow_limit_upper_kw,
            charge_efficiency: self.charge_efficiency,
            discharge_efficiency: self.discharge_efficiency,
            allow_invalid_soc,
            traction_consumption_kwh_per_km: self.traction_consumption_kwh_per_km,
        }
    }
}

/// One stop-level charging facility, grounded on SPEC_FULL.md's
/// `charging_point_params.<gridpoint_id>` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChargingPointConfig {
    pub location: u32,
    pub interface: String,
    pub capacity: u32,
    #[serde(default)]
    pub manoeuvre_before_s: i64,
    #[serde(default)]
    pub manoeuvre_after_s: i64,
    #[serde(default)]
    pub line_restricted: bool,
}

impl ChargingPointConfig {
    pub fn to_charging_point_params(&self) -> ChargingPointParams {
        ChargingPointParams {
            location: self.location,
            interface: InterfaceTypeId(self.interface.clone()),
            capacity: self.capacity,
            manoeuvre_before_s: self.manoeuvre_before_s,
            manoeuvre_after_s: self.manoeuvre_after_s,
        }
    }
}

/// Depot pooling/charging behaviour, grounded on SPEC_FULL.md's
/// `depot_params`/`depot_charging_params` tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DepotConfig {
    pub charging: bool,
    pub locations: Vec<u32>,
    pub driver_additional_paid_time_s: i64,
    pub depot_charging: Vec<DepotChargingConfig>,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self { charging: true, locations: Vec::new(), driver_additional_paid_time_s: 0, depot_charging: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepotChargingConfig {
    pub location: u32,
    #[serde(default)]
    pub dead_time_before_s: i64,
    #[serde(default)]
    pub dead_time_after_s: i64,
    #[serde(default)]
    pub interrupt_charging: bool,
}

impl DepotConfig {
    pub fn to_depot_params(&self) -> DepotParams {
        let mut depot_charging_params = HashMap::new();
        for dc in &self.depot_charging {
            depot_charging_params.insert(dc.location, DepotChargingParams { dead_time_before_s: dc.dead_time_before_s, dead_time_after_s: dc.dead_time_after_s, interrupt_charging: dc.interrupt_charging });
        }
        DepotParams { charging: self.charging, locations: self.locations.clone(), driver_additional_paid_time_s: self.driver_additional_paid_time_s, depot_charging_params }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"scheduling.depot_location"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {} — {}", self.field, self.message)
    }
}

impl ScenarioConfig {
    /// Returns the baseline scenario: a single-depot electric standard bus
    /// fleet with one stop-level opportunity charger.
    pub fn baseline() -> Self {
        Self {
            global: GlobalConfig::default(),
            scheduling: SchedulingConfig { depot_location: 1, ..SchedulingConfig::default() },
            vehicle_types: vec![VehicleTypeConfig {
                name: "standard".to_string(),
                medium: Medium::Electricity,
                interfaces: vec![InterfaceType {
                    id: InterfaceTypeId("plug".to_string()),
                    medium: Medium::Electricity,
                    dynamic_dock: false,
                    dynamic_undock: false,
                    max_flow_stationary_kw: 150.0,
                    max_flow_in_motion_kw: 0.0,
                    dead_time_dock_s: 60,
                    dead_time_undock_s: 60,
                    bidirectional: false,
                }],
                capacity_kwh: 270.0,
                initial_kwh: 270.0,
                static_range_km: 200.0,
                flow_limit_lower_kw: -150.0,
                flow_limit_upper_kw: 150.0,
                charge_efficiency: 0.95,
                discharge_efficiency: 0.95,
                traction_consumption_kwh_per_km: 1.2,
                aux_power_driving_kw: 5.0,
                aux_power_pausing_kw: 2.0,
                charge_power_kw: 150.0,
                reduce_charge_time: 0.0,
                dead_time_s: 60,
            }],
            charging_points: vec![],
            depot: DepotConfig { charging: true, locations: vec![1], ..DepotConfig::default() },
            grid_points: vec![
                GridPoint { id: 1, name: "depot".to_string(), kind: crate::grid::PointKind::Depot, coords: None },
                GridPoint { id: 2, name: "terminus-a".to_string(), kind: crate::grid::PointKind::Stop, coords: None },
                GridPoint { id: 3, name: "terminus-b".to_string(), kind: crate::grid::PointKind::Stop, coords: None },
            ],
            grid_segments: vec![
                GridSegment { id: 1, origin: 2, destination: 3, distance_km: 8.0 },
                GridSegment { id: 2, origin: 3, destination: 2, distance_km: 8.0 },
            ],
            trips: vec![
                PassengerTrip { id: 1, vehicle_type: "standard".to_string(), line: "1".to_string(), origin: 2, destination: 3, departure_s: 21_600, duration_s: 1_200, distance_km: 8.0, delay_s: 0, grid_segment_id: 1 },
                PassengerTrip { id: 2, vehicle_type: "standard".to_string(), line: "1".to_string(), origin: 3, destination: 2, departure_s: 23_400, duration_s: 1_200, distance_km: 8.0, delay_s: 0, grid_segment_id: 2 },
            ],
        }
    }

    /// Returns the single-duty preset: a timetable with one passenger trip
    /// and a static range just tight enough to cover its pull-out, the trip
    /// itself, and its pull-in with nothing to spare — the generator has no
    /// room to grow the duty further, so it always closes out at exactly
    /// one duty. Exercises the minimal-duty path through
    /// `generate_schedules_single_depot` rather than the multi-duty split
    /// covered by the `tight_static_range` scenario.
    pub fn single_duty() -> Self {
        let mut cfg = Self::baseline();
        cfg.vehicle_types[0].static_range_km = 15.0;
        cfg.trips = vec![PassengerTrip {
            id: 1,
            vehicle_type: "standard".to_string(),
            line: "1".to_string(),
            origin: 2,
            destination: 3,
            departure_s: 21_600,
            duration_s: 1_200,
            distance_km: 8.0,
            delay_s: 0,
            grid_segment_id: 1,
        }];
        cfg
    }

    /// Returns the deadhead-heavy preset: three passenger trips that chain
    /// across three different termini on alternating lines, so consecutive
    /// duties never already meet at a common stop. Concatenation has to
    /// bridge every join with an explicit deadhead trip rather than merging
    /// duties for free, exercising the heavy-deadheading generator path
    /// (as opposed to the dwell-only merge covered by the
    /// `adjacent_duties_concatenate` scenario).
    pub fn deadhead_heavy() -> Self {
        let mut cfg = Self::baseline();
        cfg.grid_points.push(GridPoint { id: 4, name: "terminus-c".to_string(), kind: crate::grid::PointKind::Stop, coords: None });
        cfg.grid_segments.push(GridSegment { id: 3, origin: 3, destination: 4, distance_km: 6.0 });
        cfg.grid_segments.push(GridSegment { id: 4, origin: 4, destination: 3, distance_km: 6.0 });
        cfg.grid_segments.push(GridSegment { id: 5, origin: 4, destination: 2, distance_km: 9.0 });
        cfg.scheduling.mix_lines_deadheading = true;
        cfg.trips = vec![
            PassengerTrip { id: 1, vehicle_type: "standard".to_string(), line: "1".to_string(), origin: 2, destination: 3, departure_s: 21_600, duration_s: 1_200, distance_km: 8.0, delay_s: 0, grid_segment_id: 1 },
            PassengerTrip { id: 2, vehicle_type: "standard".to_string(), line: "2".to_string(), origin: 3, destination: 4, departure_s: 23_400, duration_s: 900, distance_km: 6.0, delay_s: 0, grid_segment_id: 3 },
            PassengerTrip { id: 3, vehicle_type: "standard".to_string(), line: "3".to_string(), origin: 4, destination: 2, departure_s: 25_200, duration_s: 1_500, distance_km: 9.0, delay_s: 0, grid_segment_id: 5 },
        ];
        cfg
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "single_duty", "deadhead_heavy"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "single_duty" => Ok(Self::single_duty()),
            "deadhead_heavy" => Ok(Self::deadhead_heavy()),
            _ => Err(ConfigError { field: "preset".to_string(), message: format!("unknown preset \"{name}\", available: {}", Self::PRESETS.join(", ")) }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError { field: "scenario".to_string(), message: format!("cannot read \"{}\": {e}", path.display()) })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError { field: "toml".to_string(), message: e.to_string() })
    }

    /// Validates all fields and returns a list of errors. Returns an empty
    /// vector if the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.vehicle_types.is_empty() {
            errors.push(ConfigError { field: "vehicle_types".into(), message: "must declare at least one vehicle type".into() });
        }
        for vt in &self.vehicle_types {
            if vt.capacity_kwh <= 0.0 {
                errors.push(ConfigError { field: format!("vehicle_types.{}.capacity_kwh", vt.name), message: "must be > 0".into() });
            }
            if !(0.0..=vt.capacity_kwh).contains(&vt.initial_kwh) {
                errors.push(ConfigError { field: format!("vehicle_types.{}.initial_kwh", vt.name), message: "must be in [0, capacity_kwh]".into() });
            }
            if vt.charge_efficiency <= 0.0 || vt.charge_efficiency > 1.0 {
                errors.push(ConfigError { field: format!("vehicle_types.{}.charge_efficiency", vt.name), message: "must be in (0, 1]".into() });
            }
            if vt.interfaces.is_empty() {
                errors.push(ConfigError { field: format!("vehicle_types.{}.interfaces", vt.name), message: "must declare at least one interface".into() });
            }
        }

        let s = &self.scheduling;
        if s.min_pause_duration_s > s.max_pause_duration_s {
            errors.push(ConfigError { field: "scheduling.min_pause_duration_s".into(), message: "must be <= scheduling.max_pause_duration_s".into() });
        }
        if s.default_depot_trip_velocity_kmh <= 0.0 {
            errors.push(ConfigError { field: "scheduling.default_depot_trip_velocity_kmh".into(), message: "must be > 0".into() });
        }
        if s.default_deadhead_trip_velocity_kmh <= 0.0 {
            errors.push(ConfigError { field: "scheduling.default_deadhead_trip_velocity_kmh".into(), message: "must be > 0".into() });
        }

        if self.depot.locations.is_empty() {
            errors.push(ConfigError { field: "depot.locations".into(), message: "must declare at least one depot location".into() });
        }
        if !self.depot.locations.contains(&self.scheduling.depot_location) {
            errors.push(ConfigError { field: "scheduling.depot_location".into(), message: "must be one of depot.locations".into() });
        }

        for cp in &self.charging_points {
            if cp.capacity == 0 {
                errors.push(ConfigError { field: format!("charging_points[location={}].capacity", cp.location), message: "must be > 0".into() });
            }
        }

        errors
    }

    /// Builds the stop/depot/segment network from `grid_points`/
    /// `grid_segments`.
    pub fn build_grid(&self) -> Grid {
        let mut grid = Grid::new();
        for point in &self.grid_points {
            grid.add_point(point.clone());
        }
        for segment in &self.grid_segments {
            grid.add_segment(segment.clone());
        }
        grid
    }

    /// Resolves this configuration into the parameter records consumed by
    /// [`crate::simulation::run_schedule_simulation`] and
    /// [`crate::scheduling::generate_schedules_single_depot`]. The charging
    /// point name list the scheduler matches against is read off `grid`'s
    /// point names, since `ChargingPointNames` matches by name rather than
    /// by location id.
    pub fn resolve(&self, grid: &Grid) -> (SchedulingParams, HashMap<String, VehicleParams>, HashMap<String, VehicleTypeParams>, SimulationParams, ChargingPointNames) {
        let scheduling_params = self.scheduling.to_scheduling_params(self.global.delays);

        let mut scheduling_vehicles = HashMap::new();
        let mut simulation_vehicles = HashMap::new();
        for vt in &self.vehicle_types {
            scheduling_vehicles.insert(vt.name.clone(), vt.to_scheduling_params(self.global.allow_invalid_soc));
            simulation_vehicles.insert(vt.name.clone(), vt.to_vehicle_type_params(self.global.allow_invalid_soc));
        }

        let charging_names = ChargingPointNames::Any(
            self.charging_points.iter().filter(|cp| !cp.line_restricted).filter_map(|cp| grid.point(cp.location)).map(|p| p.name.clone()).collect(),
        );

        let simulation_params = SimulationParams {
            run_until: self.global.run_until_s,
            charging_points: self.charging_points.iter().map(ChargingPointConfig::to_charging_point_params).collect(),
            depots: self.depot.to_depot_params(),
            delays_enabled: self.global.delays,
        };

        (scheduling_params, scheduling_vehicles, simulation_vehicles, simulation_params, charging_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_preset_valid() {
        let cfg = ScenarioConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn from_preset_baseline() {
        let cfg = ScenarioConfig::from_preset("baseline");
        assert!(cfg.is_ok());
    }

    #[test]
    fn from_preset_unknown() {
        let err = ScenarioConfig::from_preset("nonexistent");
        assert!(err.is_err());
        assert!(err.unwrap_err().message.contains("unknown preset"));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name).unwrap_or_else(|_| panic!("preset \"{name}\" should load"));
            let errors = cfg.validate();
            assert!(errors.is_empty(), "preset \"{name}\" should be valid: {errors:?}");
        }
    }

    #[test]
    fn single_duty_has_one_trip_and_a_tight_range() {
        let base = ScenarioConfig::baseline();
        let cfg = ScenarioConfig::single_duty();
        assert_eq!(cfg.trips.len(), 1);
        assert!(cfg.vehicle_types[0].static_range_km < base.vehicle_types[0].static_range_km);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn deadhead_heavy_chains_three_termini_on_distinct_lines() {
        let cfg = ScenarioConfig::deadhead_heavy();
        assert_eq!(cfg.trips.len(), 3);
        let lines: std::collections::HashSet<&str> = cfg.trips.iter().map(|t| t.line.as_str()).collect();
        assert_eq!(lines.len(), 3, "every trip should be on its own line so duties never already meet at a shared stop");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn validation_catches_empty_vehicle_types() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.vehicle_types.clear();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "vehicle_types"));
    }

    #[test]
    fn validation_catches_depot_location_mismatch() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.scheduling.depot_location = 99;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "scheduling.depot_location"));
    }

    #[test]
    fn validation_catches_bad_pause_window() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.scheduling.min_pause_duration_s = 10_000;
        cfg.scheduling.max_pause_duration_s = 100;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "scheduling.min_pause_duration_s"));
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[global]
run_until_s = 86400
debug_msgs = true

[scheduling]
depot_location = 1

[[vehicle_types]]
name = "standard"
medium = "Electricity"
capacity_kwh = 270.0
initial_kwh = 270.0
static_range_km = 200.0
flow_limit_lower_kw = -150.0
flow_limit_upper_kw = 150.0
charge_efficiency = 0.95
discharge_efficiency = 0.95
traction_consumption_kwh_per_km = 1.2
aux_power_driving_kw = 5.0
aux_power_pausing_kw = 2.0
charge_power_kw = 150.0
reduce_charge_time = 0.0
dead_time_s = 60

[[vehicle_types.interfaces]]
id = "plug"
medium = "Electricity"
dynamic_dock = false
dynamic_undock = false
max_flow_stationary_kw = 150.0
max_flow_in_motion_kw = 0.0
dead_time_dock_s = 60
dead_time_undock_s = 60
bidirectional = false

[depot]
locations = [1]
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.unwrap();
        assert_eq!(cfg.global.run_until_s, Some(86_400));
        assert_eq!(cfg.vehicle_types.len(), 1);
        assert_eq!(cfg.vehicle_types[0].interfaces.len(), 1);
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[global]
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn resolve_produces_matching_vehicle_type_keys() {
        let cfg = ScenarioConfig::baseline();
        let grid = cfg.build_grid();
        let (_scheduling_params, scheduling_vehicles, simulation_vehicles, _sim_params, _charging) = cfg.resolve(&grid);
        assert!(scheduling_vehicles.contains_key("standard"));
        assert!(simulation_vehicles.contains_key("standard"));
    }

    #[test]
    fn baseline_grid_and_trips_are_populated() {
        let cfg = ScenarioConfig::baseline();
        assert!(!cfg.grid_points.is_empty());
        assert!(!cfg.trips.is_empty());
        let grid = cfg.build_grid();
        assert!(grid.point(cfg.scheduling.depot_location).is_some());
    }
}
