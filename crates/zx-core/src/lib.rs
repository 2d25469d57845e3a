//! Core traits shared between the CPU, the machine, and the runner.

mod bus;
mod cpu;
mod machine;

pub use bus::{Bus, IoBus};
pub use cpu::Cpu;
pub use machine::{AudioConfig, JoystickState, KeyCode, Machine, VideoConfig};
