//! The port bus: a 12-cell register file multiplexing console and file I/O
//! through a synchronous request/response protocol.
//!
//! The bus is the only channel between the interpreter and external devices.
//! The guest raises a request by writing a port with `OUT` (which clears the
//! busy flag in port 0) and executing `WAIT`; the device handler services at
//! most one request per `WAIT` and acknowledges by setting port 0 back to 1.
//! `IN` is a consuming read: fetching a port zeroes it.

use crate::cell::Cell;
use crate::fault::Fault;

pub const NUM_PORTS: usize = 12;

// Register roles.
pub const PORT_FLAG: usize = 0; // nonzero: a request is pending/serviced
pub const PORT_INPUT: usize = 1; // keyboard / input stack reads
pub const PORT_OUTPUT: usize = 2; // console writes
pub const PORT_FILES: usize = 4; // image save, input push, file operations
pub const PORT_QUERY: usize = 5; // machine facts, negative codes only

pub struct PortBus {
  registers: [Cell; NUM_PORTS],
}

impl PortBus {
  pub fn new() -> PortBus {
    PortBus { registers: [0; NUM_PORTS] }
  }

  /// Guest-visible read, used by `IN` with a stack-supplied index.
  pub fn get(&self, port: Cell) -> Result<Cell, Fault> {
    match self.registers.get(port as usize) {
      Some(value) if port >= 0 => Ok(*value),
      _ => Err(Fault::BadPort(port)),
    }
  }

  /// Guest-visible write, used by `OUT` with a stack-supplied index.
  pub fn set(&mut self, port: Cell, value: Cell) -> Result<(), Fault> {
    match self.registers.get_mut(port as usize) {
      Some(cell) if port >= 0 => {
        *cell = value;
        Ok(())
      }
      _ => Err(Fault::BadPort(port)),
    }
  }

  // Device-side access with a known register role. Indices are compile-time
  // constants, so these don't fault.

  pub fn at(&self, port: usize) -> Cell {
    self.registers[port]
  }

  pub fn set_at(&mut self, port: usize, value: Cell) {
    self.registers[port] = value;
  }

  pub fn clear(&mut self) {
    self.registers = [0; NUM_PORTS];
  }

  pub fn as_cells(&self) -> &[Cell] {
    &self.registers
  }
}
