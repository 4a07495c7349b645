//! A bounded LIFO stack of cells with explicit depth and no auto-growth.
//!
//! The machine carries two of these: the data stack, holding working values
//! for arithmetic and logic, and the address stack, holding return addresses
//! pushed by implicit calls and `PUSH`/`POP`. The reference implementation
//! indexes a raw array and lets underflow and overflow corrupt whatever is
//! adjacent; here both are checked and reported as faults, which changes
//! nothing observable for well-formed images.

use crate::cell::Cell;
use crate::fault::Fault;

pub struct Stack {
  // Name reported in faults, e.g. "data" or "address".
  name: &'static str,
  capacity: usize,
  cells: Vec<Cell>,
}

impl Stack {
  pub fn new(name: &'static str, capacity: usize) -> Stack {
    Stack {
      name,
      capacity,
      cells: Vec::with_capacity(capacity),
    }
  }

  pub fn depth(&self) -> Cell {
    self.cells.len() as Cell
  }

  pub fn push(&mut self, value: Cell) -> Result<(), Fault> {
    if self.cells.len() == self.capacity {
      return Err(Fault::StackOverflow(self.name));
    }
    self.cells.push(value);
    Ok(())
  }

  pub fn pop(&mut self) -> Result<Cell, Fault> {
    self.cells.pop().ok_or(Fault::StackUnderflow(self.name))
  }

  /// The top of the stack, without consuming it.
  pub fn peek(&self) -> Result<Cell, Fault> {
    self.cells.last().copied().ok_or(Fault::StackUnderflow(self.name))
  }

  /// The second cell from the top, without consuming anything.
  pub fn peek2(&self) -> Result<Cell, Fault> {
    match self.cells.len() {
      n if n >= 2 => Ok(self.cells[n - 2]),
      _ => Err(Fault::StackUnderflow(self.name)),
    }
  }

  /// Discards the top `n` cells.
  pub fn drop(&mut self, n: usize) -> Result<(), Fault> {
    if n > self.cells.len() {
      return Err(Fault::StackUnderflow(self.name));
    }
    self.cells.truncate(self.cells.len() - n);
    Ok(())
  }

  pub fn as_cells(&self) -> &[Cell] {
    &self.cells
  }
}
