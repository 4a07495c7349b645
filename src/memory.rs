//! Flat addressable cell memory, the base substrate for code and data.
//!
//! There is no alignment and no type tag: any cell may be fetched as an
//! opcode one moment and stored through as data the next. Address 0 is the
//! load-success sentinel — it is nonzero after a successful image load, and
//! zero means "no image", which is fatal at startup.

use crate::cell::{to_char, Cell};
use crate::fault::Fault;

pub struct Memory {
  cells: Vec<Cell>,
}

impl Memory {
  /// A new memory of `n` cells, cleared to all-zero.
  pub fn new(n: usize) -> Memory {
    Memory { cells: vec![0; n] }
  }

  pub fn size(&self) -> usize {
    self.cells.len()
  }

  pub fn get(&self, address: Cell) -> Result<Cell, Fault> {
    match self.cells.get(address as usize) {
      Some(value) if address >= 0 => Ok(*value),
      _ => Err(Fault::OutOfBounds { address, size: self.cells.len() }),
    }
  }

  pub fn set(&mut self, address: Cell, value: Cell) -> Result<(), Fault> {
    let size = self.cells.len();
    match self.cells.get_mut(address as usize) {
      Some(cell) if address >= 0 => {
        *cell = value;
        Ok(())
      }
      _ => Err(Fault::OutOfBounds { address, size }),
    }
  }

  /// Bulk copy of `values` into memory starting at `address`.
  pub fn set_block(&mut self, address: usize, values: &[Cell]) -> Result<(), Fault> {
    let end = address + values.len();
    if end > self.cells.len() {
      return Err(Fault::OutOfBounds {
        address: end as Cell,
        size: self.cells.len(),
      });
    }
    self.cells[address..end].copy_from_slice(values);
    Ok(())
  }

  /// Zero-fills the entire memory.
  pub fn clear(&mut self) {
    self.cells.iter_mut().for_each(|cell| *cell = 0);
  }

  pub fn as_cells(&self) -> &[Cell] {
    &self.cells
  }

  /**
    Reads a 0-terminated string starting at `address`: a run of nonzero
    cells, each truncated to a character, ending at the first zero cell.
    The terminator is required to lie in bounds.
  */
  pub fn string_at(&self, address: Cell) -> Result<String, Fault> {
    let mut text = String::new();
    let mut current = address;
    loop {
      let cell = self.get(current)?;
      if cell == 0 {
        return Ok(text);
      }
      text.push(to_char(cell));
      current += 1;
    }
  }
}
