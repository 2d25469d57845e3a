use crate::IoBus;

/// A CPU that executes instructions against an I/O-capable bus.
pub trait Cpu<B: IoBus> {
    /// Execute one instruction. Returns the T-states consumed.
    fn step(&mut self, bus: &mut B) -> u32;

    /// Reset the CPU to its power-on state. The bus is available for CPUs
    /// that fetch a reset vector.
    fn reset(&mut self, bus: &mut B);

    /// Accept a maskable interrupt if enabled.
    ///
    /// Returns the T-states consumed, or 0 if interrupts are disabled.
    fn interrupt(&mut self, bus: &mut B) -> u32;

    /// Accept a non-maskable interrupt. Returns the T-states consumed.
    fn nmi(&mut self, bus: &mut B) -> u32;

    /// The current program counter.
    fn pc(&self) -> u16;

    /// Whether the CPU is halted (waiting for an interrupt).
    fn halted(&self) -> bool;
}
