//! Startup synchronization barrier over the interface registry.
//!
//! Subsystems report readiness with `register_module`. When the expected
//! number of reports has arrived the barrier publishes one aggregate
//! "Module status" message on the startup channel; every report after
//! that produces its own individual message (re-reports on reconnect).

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bus::StatusBus;
use crate::status::{Destination, EntryKind, StatusMessage};

/// Number of subsystems expected to report at startup: the chat-platform
/// client, the console client, the HTTP server, and the reserved speech
/// subsystem slot.
pub const EXPECTED_MODULES: usize = 4;

/// Readiness status carried by a registration report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleStatus {
    Okay,
    Failed(String),
}

impl ModuleStatus {
    /// Map the wire sentinel: the literal `"Okay"` means healthy, any
    /// other string is a failure description.
    pub fn from_report(status: &str) -> Self {
        if status == "Okay" {
            Self::Okay
        } else {
            Self::Failed(status.to_string())
        }
    }

    pub fn is_okay(&self) -> bool {
        matches!(self, Self::Okay)
    }

    pub fn describe(&self) -> &str {
        match self {
            Self::Okay => "Okay",
            Self::Failed(detail) => detail,
        }
    }
}

/// A subsystem readiness report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationReport {
    pub name: String,
    pub status: ModuleStatus,
}

/// Barrier phase, derived from the report count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierState {
    Accumulating,
    Reached,
    Settled,
}

struct RegistryInner {
    reports: Vec<RegistrationReport>,
    last_by_name: HashMap<String, ModuleStatus>,
    aggregate_fired: bool,
}

/// Counts subsystem readiness reports and publishes status through the bus.
pub struct StartupBarrier {
    expected: usize,
    bus: StatusBus,
    inner: Mutex<RegistryInner>,
}

impl StartupBarrier {
    pub fn new(bus: StatusBus) -> Self {
        Self::with_expected(bus, EXPECTED_MODULES)
    }

    pub fn with_expected(bus: StatusBus, expected: usize) -> Self {
        Self {
            expected,
            bus,
            inner: Mutex::new(RegistryInner {
                reports: Vec::new(),
                last_by_name: HashMap::new(),
                aggregate_fired: false,
            }),
        }
    }

    /// Record a readiness report.
    ///
    /// Reports are not deduplicated by name: every call counts toward the
    /// threshold, and a module re-registering before the threshold is
    /// reached advances the barrier just like a distinct module would.
    pub fn register_module(&self, name: impl Into<String>, status: ModuleStatus) {
        let report = RegistrationReport {
            name: name.into(),
            status,
        };
        tracing::info!(
            module = %report.name,
            okay = report.status.is_okay(),
            "module registered"
        );

        let outgoing = {
            let mut inner = self.inner.lock();
            inner
                .last_by_name
                .insert(report.name.clone(), report.status.clone());
            inner.reports.push(report.clone());
            let count = inner.reports.len();

            if count == self.expected && !inner.aggregate_fired {
                inner.aggregate_fired = true;
                Some(Outgoing::Aggregate(Self::aggregate_message(&inner.reports)))
            } else if count > self.expected {
                Some(Outgoing::Individual(Self::individual_message(&report)))
            } else {
                None
            }
        };

        match outgoing {
            Some(Outgoing::Aggregate(msg)) => self.bus.emit_startup(msg),
            Some(Outgoing::Individual(msg)) => self.bus.emit(msg),
            None => {}
        }
    }

    /// String-status variant of `register_module` matching the subsystem
    /// registration interface (`"Okay"` sentinel or failure description).
    pub fn register_report(&self, name: &str, status: &str) {
        self.register_module(name, ModuleStatus::from_report(status));
    }

    pub fn state(&self) -> BarrierState {
        let inner = self.inner.lock();
        match inner.reports.len() {
            n if n < self.expected => BarrierState::Accumulating,
            n if n == self.expected => BarrierState::Reached,
            _ => BarrierState::Settled,
        }
    }

    /// Total number of reports received. Monotonically non-decreasing.
    pub fn count(&self) -> usize {
        self.inner.lock().reports.len()
    }

    /// Last reported status for a subsystem, if it has registered.
    pub fn module_status(&self, name: &str) -> Option<ModuleStatus> {
        self.inner.lock().last_by_name.get(name).cloned()
    }

    fn aggregate_message(reports: &[RegistrationReport]) -> StatusMessage {
        StatusMessage::formatted(
            "startup",
            "Module status",
            reports.iter().map(|r| {
                let kind = if r.status.is_okay() {
                    EntryKind::Success
                } else {
                    EntryKind::Warning
                };
                (kind, format!("{}: {}", r.name, r.status.describe()))
            }),
        )
        .addressed_to(Destination::Any)
    }

    fn individual_message(report: &RegistrationReport) -> StatusMessage {
        let kind = if report.status.is_okay() {
            EntryKind::Success
        } else {
            EntryKind::Warning
        };
        StatusMessage::single(kind, "startup", report.name.clone(), report.status.describe())
            .addressed_to(Destination::Any)
    }
}

enum Outgoing {
    Aggregate(StatusMessage),
    Individual(StatusMessage),
}
