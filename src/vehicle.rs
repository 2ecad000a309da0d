//! Per-vehicle interface controller: the decision loop invoked once per
//! driving segment and once per post-leg pause, grounded on
//! `eflips/vehicle.py`'s `VehicleAbstract._charging_process` and its
//! helpers (`_get_dock_actions`, `_select_interface`, `_get_time_remaining`,
//! `_request_handler`, `_timekeeper`, `_finish_charging`,
//! `_release_facility`).
//!
//! Unlike the source, which represents `_charging_process` as one `simpy`
//! generator, this implementation expresses the same sequence of
//! suspension points as a chain of kernel-scheduled callbacks sharing an
//! `Rc<RefCell<_>>` handle to the subsystem being charged (see DESIGN.md).

use std::cell::RefCell;
use std::rc::Rc;

use crate::charge_controller::ChargeController;
use crate::energy::{EnergyFlow, MediumMismatch, Storage};
use crate::interface::{ChargingNetwork, DuplicateConnect, Interface, InterfaceTypeId};
use crate::kernel::Kernel;

/// A fatal condition discovered inside the docking/charging callback chain.
/// The kernel's callbacks return nothing, so these are written into a
/// shared [`FaultSink`] instead of unwinding; the simulation facade checks
/// the sink once the kernel drains and surfaces it as a `Result`.
#[derive(Debug, Clone)]
pub enum InterfaceFault {
    DuplicateConnect(DuplicateConnect),
    MediumMismatch(MediumMismatch),
}

impl std::fmt::Display for InterfaceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceFault::DuplicateConnect(e) => write!(f, "{e}"),
            InterfaceFault::MediumMismatch(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for InterfaceFault {}

impl From<DuplicateConnect> for InterfaceFault {
    fn from(e: DuplicateConnect) -> Self {
        InterfaceFault::DuplicateConnect(e)
    }
}
impl From<MediumMismatch> for InterfaceFault {
    fn from(e: MediumMismatch) -> Self {
        InterfaceFault::MediumMismatch(e)
    }
}

/// Slot a fault discovered inside a kernel callback is recorded into.
pub type FaultSink = Rc<RefCell<Option<InterfaceFault>>>;

/// Per-(schedule, location) charging policy, consulted with a process-wide
/// default fallback. Mirrors `eflips/schedule.py`'s
/// `ChargingScheduleParameterSet`.
#[derive(Debug, Clone, Copy)]
pub struct ChargingParams {
    pub try_charging: bool,
    pub queue_for_charging: bool,
    pub charge_full: bool,
    pub release_when_full: bool,
    pub min_charge_duration_s: i64,
}

impl Default for ChargingParams {
    fn default() -> Self {
        Self { try_charging: true, queue_for_charging: false, charge_full: false, release_when_full: true, min_charge_duration_s: 0 }
    }
}

/// One vehicle energy subsystem: its storage, its charge controller, and
/// the physical interfaces it can dock through, listed in descending
/// preference order. `controller` arbitrates storage vs. interface vs.
/// auxiliary load while driving (see `driver.rs`); while docked at a
/// facility there is no concurrent load to arbitrate, so the interface
/// controller below drives `storage` directly.
pub struct Subsystem {
    pub interfaces: Vec<Interface>,
    pub storage: Storage,
    pub controller: ChargeController,
}

/// Determines whether dock/undock actions are required at the start/end of
/// this segment or pause, grounded on `_get_dock_actions`.
pub fn decide_dock_actions(interface_is_docked: bool, next_location_reuses_same_type: bool, dynamic_undock: bool) -> (bool, bool) {
    let dock = !interface_is_docked;
    let undock = if next_location_reuses_same_type {
        false
    } else {
        !dynamic_undock
    };
    (dock, undock)
}

/// `_get_time_remaining`: budget left in `duration_s` after reserving dock,
/// undock, manoeuvre and (if `charge`) the minimum charge duration. May be
/// negative.
#[allow(clippy::too_many_arguments)]
pub fn time_remaining(
    duration_s: i64,
    time_passed_s: i64,
    min_charge_duration_s: i64,
    dock_time_s: i64,
    undock_time_s: i64,
    manoeuvre_before_s: i64,
    manoeuvre_after_s: i64,
    charge: bool,
    dock: bool,
    undock: bool,
    manoeuvre_before: bool,
    manoeuvre_after: bool,
) -> i64 {
    duration_s
        - time_passed_s
        - if charge { min_charge_duration_s } else { 0 }
        - if dock { dock_time_s } else { 0 }
        - if undock { undock_time_s } else { 0 }
        - if manoeuvre_before { manoeuvre_before_s } else { 0 }
        - if manoeuvre_after { manoeuvre_after_s } else { 0 }
}

/// Entry point: consults the network for a matching interface, then drives
/// the dock/charge/undock sequence to completion, finally invoking
/// `on_complete`. Idles for `duration_s` and calls `on_complete` immediately
/// if there is no match, charging is gated off, or there is no time budget.
#[allow(clippy::too_many_arguments)]
pub fn run_interface_controller(
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<ChargingNetwork>>,
    kernel: &mut Kernel,
    location: u32,
    duration_s: i64,
    next_location_reuses_same_type: bool,
    params: ChargingParams,
    fault: FaultSink,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let preference: Vec<InterfaceTypeId> = subsystem.borrow().interfaces.iter().map(|i| i.interface_type.id.clone()).collect();
    let selected = network.borrow().select(location, &preference);

    let Some((interface_type_id, facility_id)) = selected else {
        kernel.schedule_after(duration_s, on_complete);
        return;
    };
    if !params.try_charging {
        kernel.schedule_after(duration_s, on_complete);
        return;
    }

    let interface_index = subsystem.borrow().interfaces.iter().position(|i| i.interface_type.id == interface_type_id).unwrap();
    let facility_is_vacant = network.borrow().facility(facility_id).unwrap().is_vacant();

    let (queueing, skip) = if facility_is_vacant {
        (false, false)
    } else if params.queue_for_charging {
        (true, false)
    } else {
        (false, true)
    };

    if skip {
        kernel.schedule_after(duration_s, on_complete);
        return;
    }

    let is_docked = subsystem.borrow().interfaces[interface_index].is_docked();
    let dynamic_undock = subsystem.borrow().interfaces[interface_index].interface_type.dynamic_undock;
    let (dock, undock) = decide_dock_actions(is_docked, next_location_reuses_same_type, dynamic_undock);

    let (dock_time, undock_time, manoeuvre_before_s, manoeuvre_after_s) = {
        let s = subsystem.borrow();
        let f = network.borrow();
        let facility = f.facility(facility_id).unwrap();
        (s.interfaces[interface_index].interface_type.dead_time_dock_s, s.interfaces[interface_index].interface_type.dead_time_undock_s, facility.manoeuvre_duration_before_s, facility.manoeuvre_duration_after_s)
    };

    let budget = time_remaining(duration_s, 0, params.min_charge_duration_s, dock_time, undock_time, manoeuvre_before_s, manoeuvre_after_s, true, dock, undock, queueing, false);

    if !params.charge_full && budget < 0 {
        // Not enough time to bother requesting; wait out the interval.
        kernel.schedule_after(duration_s, on_complete);
        return;
    }

    let time_start = kernel.now();
    let request = network.borrow_mut().facility_mut(facility_id).unwrap().slots.request(kernel, {
        let subsystem = subsystem.clone();
        let network = network.clone();
        move |kernel, slot| {
            on_request_resolved(
                subsystem,
                network,
                kernel,
                facility_id,
                interface_index,
                slot,
                queueing,
                dock,
                undock,
                manoeuvre_before_s,
                manoeuvre_after_s,
                duration_s,
                time_start,
                params,
                fault,
                on_complete,
            )
        }
    });

    if !params.charge_full {
        let cancel = request.clone();
        let network_for_timeout = network.clone();
        kernel.schedule_after(budget.max(0), move |kernel| {
            network_for_timeout.borrow_mut().facility_mut(facility_id).unwrap().slots.cancel(kernel, &cancel);
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn on_request_resolved(
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<ChargingNetwork>>,
    kernel: &mut Kernel,
    facility_id: u32,
    interface_index: usize,
    slot: Option<u32>,
    queueing: bool,
    dock: bool,
    undock: bool,
    manoeuvre_before_s: i64,
    manoeuvre_after_s: i64,
    duration_s: i64,
    time_start: i64,
    params: ChargingParams,
    fault: FaultSink,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let Some(slot) = slot else {
        // Timed out or cancelled: proceed without charging for the rest of
        // the interval.
        let remaining = (duration_s - (kernel.now() - time_start)).max(0);
        kernel.schedule_after(remaining, on_complete);
        return;
    };

    let proceed = move |kernel: &mut Kernel| {
        {
            let mut s = subsystem.borrow_mut();
            if dock {
                s.interfaces[interface_index].mark_docked();
            }
            if let Err(e) = s.interfaces[interface_index].connect(facility_id) {
                *fault.borrow_mut() = Some(e.into());
                return;
            }
        }
        begin_charging(subsystem, network, kernel, facility_id, interface_index, slot, undock, manoeuvre_after_s, duration_s, time_start, params, fault, on_complete);
    };

    if queueing {
        kernel.schedule_after(manoeuvre_before_s, proceed);
    } else {
        proceed(kernel);
    }
}

#[allow(clippy::too_many_arguments)]
fn begin_charging(
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<ChargingNetwork>>,
    kernel: &mut Kernel,
    facility_id: u32,
    interface_index: usize,
    slot: u32,
    undock: bool,
    manoeuvre_after_s: i64,
    duration_s: i64,
    time_start: i64,
    params: ChargingParams,
    fault: FaultSink,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let now = kernel.now();
    let max_supply = subsystem.borrow().interfaces[interface_index].max_supply_kw(false);
    let medium = subsystem.borrow().storage.medium;

    let seconds_to_full = {
        let mut s = subsystem.borrow_mut();
        match s.storage.update(now, EnergyFlow::new(-max_supply, medium)) {
            Ok(update) => update.seconds_to_full,
            Err(e) => {
                drop(s);
                *fault.borrow_mut() = Some(e.into());
                return;
            }
        }
    };

    let time_passed = now - time_start;
    let remaining = (duration_s - time_passed - if undock { subsystem.borrow().interfaces[interface_index].interface_type.dead_time_undock_s } else { 0 } - manoeuvre_after_s).max(0);

    let finish = {
        let subsystem = subsystem.clone();
        let network = network.clone();
        move |kernel: &mut Kernel| {
            finish_charging(subsystem, network, kernel, facility_id, interface_index, slot, undock, manoeuvre_after_s, duration_s, time_start, params, on_complete);
        }
    };

    match (params.charge_full, seconds_to_full) {
        (true, Some(secs)) => {
            kernel.schedule_after(secs.round() as i64, finish);
        }
        (false, Some(secs)) if (secs.round() as i64) < remaining => {
            kernel.schedule_after(secs.round() as i64, finish);
        }
        _ => {
            kernel.schedule_after(remaining, finish);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn finish_charging(
    subsystem: Rc<RefCell<Subsystem>>,
    network: Rc<RefCell<ChargingNetwork>>,
    kernel: &mut Kernel,
    facility_id: u32,
    interface_index: usize,
    slot: u32,
    undock: bool,
    manoeuvre_after_s: i64,
    duration_s: i64,
    time_start: i64,
    params: ChargingParams,
    on_complete: impl FnOnce(&mut Kernel) + 'static,
) {
    let release_now = params.release_when_full && (duration_s - (kernel.now() - time_start)) >= manoeuvre_after_s;

    let release = move |kernel: &mut Kernel| {
        {
            let mut s = subsystem.borrow_mut();
            s.interfaces[interface_index].disconnect();
        }
        network.borrow_mut().facility_mut(facility_id).unwrap().slots.release(kernel, slot);
        if undock {
            let subsystem_for_undock = subsystem.clone();
            let mut s = subsystem.borrow_mut();
            s.interfaces[interface_index].undock(kernel, move |kernel| {
                subsystem_for_undock.borrow_mut().interfaces[interface_index].mark_undocked();
                on_complete(kernel);
            });
        } else {
            on_complete(kernel);
        }
    };

    if release_now {
        kernel.schedule_after(manoeuvre_after_s, release);
    } else {
        let remaining = (duration_s - (kernel.now() - time_start)).max(0);
        kernel.schedule_after(remaining, release);
    }
}
