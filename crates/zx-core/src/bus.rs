/// A bus that supports byte read/write in a 16-bit address space.
///
/// Timing is instruction-level: the CPU accounts for T-states itself and
/// returns the total from `step()`. Bus implementations may additionally
/// accumulate wait states (memory contention) for the scheduler to collect;
/// individual accesses never block.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to the given address.
    ///
    /// Writes to read-only regions are silently discarded.
    fn write(&mut self, addr: u16, value: u8);

    /// Read a little-endian word (low byte at the lower address).
    fn read_word(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr);
        let hi = self.read(addr.wrapping_add(1));
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Write a little-endian word (low byte at the lower address).
    fn write_word(&mut self, addr: u16, value: u16) {
        self.write(addr, value as u8);
        self.write(addr.wrapping_add(1), (value >> 8) as u8);
    }
}

/// A bus that also supports the Z80's separate 16-bit I/O address space.
pub trait IoBus: Bus {
    /// Read a byte from the given I/O port.
    fn read_io(&mut self, port: u16) -> u8;

    /// Write a byte to the given I/O port.
    fn write_io(&mut self, port: u16, value: u8);
}
