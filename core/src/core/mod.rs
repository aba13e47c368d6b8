//! Facade that owns RAM/BIOS/bus/CPU/GPU/SPU/CDROM and drives the step loop
//! (spec §4.8).

mod machine;

pub use machine::{Machine, MachineOptions};
