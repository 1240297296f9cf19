//! Side-effecting adapters: filesystem layout, descriptor loading, processes.

pub mod jsonc;
pub mod paths;
pub mod pod_registry;
pub mod process;
pub mod settings;
pub mod tempdirs;
pub mod translator;
