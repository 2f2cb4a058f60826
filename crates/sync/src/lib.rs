mod gate;
mod runner;

pub use gate::TaskGate;
pub use runner::{SyncResult, SyncRunner};
