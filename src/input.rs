//! The input source stack.
//!
//! Input is read from a LIFO of byte sources. The bottom source is the
//! interactive standard input and is never popped; pushing a file name opens
//! that file and makes it the read target until it is exhausted, at which
//! point it is closed and popped automatically and reading falls through to
//! the source beneath it.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::cell::Cell;

/// Returned once every source, including the interactive one, is exhausted.
pub const END_OF_INPUT: Cell = -1;

pub struct InputStack {
  base: Box<dyn Read>,
  // Pushed sources, topmost (current) last.
  sources: Vec<Box<dyn Read>>,
}

impl InputStack {
  /// An input stack bottoming out at the process's standard input.
  pub fn new() -> InputStack {
    InputStack::with_base(Box::new(std::io::stdin()))
  }

  /// An input stack bottoming out at an arbitrary source, e.g. an in-memory
  /// buffer under test.
  pub fn with_base(base: Box<dyn Read>) -> InputStack {
    InputStack { base, sources: Vec::new() }
  }

  /// Opens `path` and makes it the active read source.
  pub fn push_name(&mut self, path: impl AsRef<Path>) -> std::io::Result<()> {
    let file = File::open(path)?;
    self.sources.push(Box::new(BufReader::new(file)));
    Ok(())
  }

  /**
    Pulls the next byte from the topmost source, transparently closing and
    popping exhausted sources. Returns the byte as 0..=255, or
    `END_OF_INPUT` once even the base source has nothing left. Reading the
    base source may block on the host.
  */
  pub fn read(&mut self) -> Cell {
    let mut byte = [0u8; 1];
    while let Some(source) = self.sources.last_mut() {
      match source.read(&mut byte) {
        Ok(1) => return byte[0] as Cell,
        // EOF or a read error both retire the source.
        _ => {
          self.sources.pop();
        }
      }
    }
    match self.base.read(&mut byte) {
      Ok(1) => byte[0] as Cell,
      _ => END_OF_INPUT,
    }
  }
}
