//! The device capability interface behind the port bus.
//!
//! The interpreter never touches the host console or filesystem directly;
//! every byte in or out of the machine goes through an `IoManager`. The
//! default backend binds the process's standard streams and real files. The
//! in-memory backend feeds input from a buffer and collects output into a
//! string, for tests and embedders running the machine headless.

use std::io::{Cursor, Stdout, Write};

use crate::cell::{to_char, Cell};
use crate::files::FileTable;
use crate::input::InputStack;

pub trait IoManager {
  /// The next input byte (0..=255), or -1 once all sources are exhausted.
  /// May block on the host waiting for interactive input.
  fn read(&mut self) -> Cell;

  /// Emits one character on the console.
  fn write(&mut self, value: Cell);

  /// Opens the named source and makes it the active input.
  fn push_input_name(&mut self, name: &str) -> std::io::Result<()>;

  // File operations, all answering with the port 4 sentinel conventions.

  fn open_file(&mut self, mode: Cell, name: &str) -> Cell;
  fn read_file(&mut self, slot: Cell) -> Cell;
  fn write_file(&mut self, slot: Cell, value: Cell) -> Cell;
  fn close_file(&mut self, slot: Cell) -> Cell;
  fn file_position(&mut self, slot: Cell) -> Cell;
  fn set_file_position(&mut self, slot: Cell, position: Cell) -> Cell;
  fn file_size(&mut self, slot: Cell) -> Cell;
  fn delete_file(&mut self, name: &str) -> Cell;
}

/// The default backend: standard input beneath any pushed input files,
/// standard output for the console, real files in the slot table.
pub struct StandardIo {
  input: InputStack,
  files: FileTable,
  output: Stdout,
}

impl StandardIo {
  pub fn new() -> StandardIo {
    StandardIo {
      input: InputStack::new(),
      files: FileTable::new(),
      output: std::io::stdout(),
    }
  }
}

impl IoManager for StandardIo {
  fn read(&mut self) -> Cell {
    self.input.read()
  }

  fn write(&mut self, value: Cell) {
    // Flushed per character so prompts appear before a blocking read.
    let mut buffer = [0u8; 4];
    let encoded = to_char(value).encode_utf8(&mut buffer);
    let _ = self.output.write_all(encoded.as_bytes());
    let _ = self.output.flush();
  }

  fn push_input_name(&mut self, name: &str) -> std::io::Result<()> {
    self.input.push_name(name)
  }

  fn open_file(&mut self, mode: Cell, name: &str) -> Cell {
    self.files.open(mode, name)
  }

  fn read_file(&mut self, slot: Cell) -> Cell {
    self.files.read_byte(slot)
  }

  fn write_file(&mut self, slot: Cell, value: Cell) -> Cell {
    self.files.write_byte(slot, value)
  }

  fn close_file(&mut self, slot: Cell) -> Cell {
    self.files.close(slot)
  }

  fn file_position(&mut self, slot: Cell) -> Cell {
    self.files.tell(slot)
  }

  fn set_file_position(&mut self, slot: Cell, position: Cell) -> Cell {
    self.files.seek(slot, position)
  }

  fn file_size(&mut self, slot: Cell) -> Cell {
    self.files.size(slot)
  }

  fn delete_file(&mut self, name: &str) -> Cell {
    self.files.delete(name)
  }
}

/// An in-memory backend: input comes from a fixed buffer, console output
/// accumulates in a string. File operations still hit the real filesystem
/// through a slot table, which suits scratch-file tests.
pub struct MemoryIo {
  input: InputStack,
  files: FileTable,
  pub written: String,
}

impl MemoryIo {
  pub fn new(input: &[u8]) -> MemoryIo {
    MemoryIo {
      input: InputStack::with_base(Box::new(Cursor::new(input.to_vec()))),
      files: FileTable::new(),
      written: String::new(),
    }
  }
}

impl IoManager for MemoryIo {
  fn read(&mut self) -> Cell {
    self.input.read()
  }

  fn write(&mut self, value: Cell) {
    self.written.push(to_char(value));
  }

  fn push_input_name(&mut self, name: &str) -> std::io::Result<()> {
    self.input.push_name(name)
  }

  fn open_file(&mut self, mode: Cell, name: &str) -> Cell {
    self.files.open(mode, name)
  }

  fn read_file(&mut self, slot: Cell) -> Cell {
    self.files.read_byte(slot)
  }

  fn write_file(&mut self, slot: Cell, value: Cell) -> Cell {
    self.files.write_byte(slot, value)
  }

  fn close_file(&mut self, slot: Cell) -> Cell {
    self.files.close(slot)
  }

  fn file_position(&mut self, slot: Cell) -> Cell {
    self.files.tell(slot)
  }

  fn set_file_position(&mut self, slot: Cell, position: Cell) -> Cell {
    self.files.seek(slot, position)
  }

  fn file_size(&mut self, slot: Cell) -> Cell {
    self.files.size(slot)
  }

  fn delete_file(&mut self, name: &str) -> Cell {
    self.files.delete(name)
  }
}
