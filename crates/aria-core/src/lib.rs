pub mod bus;
pub mod config;
pub mod registry;
pub mod status;

pub use bus::{BusEvent, StatusBus};
pub use config::{Config, ConfigWarning, RunMode};
pub use registry::{ModuleStatus, StartupBarrier};
pub use status::{Destination, Entry, EntryKind, StatusError, StatusMessage};
