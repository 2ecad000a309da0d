//! Electric bus fleet simulator entry point — CLI wiring and config-driven
//! run orchestration.

use std::path::Path;
use std::process;
use std::rc::Rc;

use rand::{rngs::StdRng, SeedableRng};

use fleet_sim::config::ScenarioConfig;
use fleet_sim::io::export::{export_csv, TripLogEntry};
use fleet_sim::scheduling::{generate_schedules_single_depot, inject_random_delays};
use fleet_sim::simulation::run_schedule_simulation;

/// Default delay window, in seconds, applied when `--seed` enables delay
/// injection on a scenario whose own config leaves it unset.
const DEFAULT_DELAY_MIN_S: i64 = 0;
const DEFAULT_DELAY_MAX_S: i64 = 300;

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    seed: Option<u64>,
    csv_out: Option<String>,
}

fn print_help() {
    eprintln!("fleet-sim — electric bus fleet simulator");
    eprintln!();
    eprintln!("Usage: fleet-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>   Load scenario from TOML config file");
    eprintln!("  --preset <name>     Use a built-in preset (baseline, single_duty, deadhead_heavy)");
    eprintln!("  --seed <u64>        Seed for random delay injection");
    eprintln!("  --csv-out <path>    Export the driver trip log to CSV");
    eprintln!("  --help              Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the baseline preset is used.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs { scenario_path: None, preset: None, seed: None, csv_out: None };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --scenario requires a path argument");
                    process::exit(1);
                }
                cli.scenario_path = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --preset requires a name argument");
                    process::exit(1);
                }
                cli.preset = Some(args[i].clone());
            }
            "--seed" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --seed requires a u64 argument");
                    process::exit(1);
                }
                if let Ok(s) = args[i].parse::<u64>() {
                    cli.seed = Some(s);
                } else {
                    eprintln!("error: --seed value \"{}\" is not a valid u64", args[i]);
                    process::exit(1);
                }
            }
            "--csv-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --csv-out requires a path argument");
                    process::exit(1);
                }
                cli.csv_out = Some(args[i].clone());
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn main() {
    let cli = parse_args();

    let scenario = if let Some(ref path) = cli.scenario_path {
        match ScenarioConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match ScenarioConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        ScenarioConfig::baseline()
    };

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let mut grid = scenario.build_grid();
    let (scheduling_params, scheduling_vehicles, simulation_vehicles, simulation_params, charging_names) = scenario.resolve(&grid);

    let mut trips = scenario.trips.clone();
    if scenario.global.delays {
        let seed = cli.seed.unwrap_or(0);
        let mut rng = StdRng::seed_from_u64(seed);
        inject_random_delays(&mut trips, DEFAULT_DELAY_MIN_S, DEFAULT_DELAY_MAX_S, &mut rng);
    }

    let trees = match generate_schedules_single_depot(trips, &mut grid, &scheduling_vehicles, &charging_names, &scheduling_params) {
        Ok(trees) => trees,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    let duty_count = trees.len();

    let grid = Rc::new(grid);
    let evaluation = match run_schedule_simulation(trees, grid, &simulation_vehicles, &simulation_params) {
        Ok(evaluation) => evaluation,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    println!("Duties dispatched: {duty_count}");
    println!("Driver driving time: {}s", evaluation.driver_driving_time_s);
    println!("Driver pause time: {}s", evaluation.driver_pause_time_s);
    println!("Driver additional paid time: {}s", evaluation.driver_additional_paid_time_s);
    println!("Driver total time: {}s", evaluation.driver_total_time_s);
    println!();
    println!("Fleet consumption:");
    for (medium, energy) in &evaluation.fleet_consumption {
        println!("  {medium}: {energy:.2} kWh");
    }
    println!();
    println!("Per vehicle type:");
    for (vtype, mileage) in &evaluation.fleet_mileage_by_vehicle_type {
        println!("  {vtype}: {mileage:.1} km");
        if let Some(specific) = evaluation.fleet_specific_consumption_by_vehicle_type.get(vtype) {
            for (medium, per_km) in specific {
                println!("    {medium}: {per_km:.3} kWh/km");
            }
        }
    }
    if !evaluation.facility_max_occupation.is_empty() {
        println!();
        println!("Peak facility occupation:");
        for (facility_id, occupied) in &evaluation.facility_max_occupation {
            println!("  facility {facility_id}: {occupied}");
        }
    }

    if let Some(ref path) = cli.csv_out {
        let entries: Vec<TripLogEntry<'_>> = evaluation
            .trip_log_by_vehicle_type
            .iter()
            .flat_map(|(vtype, records)| records.iter().map(move |r| TripLogEntry { vehicle_id: r.vehicle_id, vehicle_type: vtype.as_str(), record: r.trip }))
            .collect();
        if let Err(e) = export_csv(&entries, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Trip log written to {path}");
    }
}
