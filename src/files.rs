//! The file slot table: open file handles keyed by randomly allocated
//! positive slot ids.
//!
//! Every operation reports failure as a sentinel cell rather than an error —
//! the guest observes host I/O trouble only as a 0 or -1 in port 4, never as
//! a fault. Slot ids are never reused while open; a collision during
//! allocation is simply retried.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use num_enum::TryFromPrimitive;
use rand::Rng;

use crate::cell::Cell;

/// Access disciplines of the file-open request, numbered per the port 4
/// wire contract.
#[derive(TryFromPrimitive, Clone, Copy, Eq, PartialEq, Debug)]
#[repr(i32)]
pub enum FileMode {
  /// Fails if the file is absent.
  Read = 0,
  /// Creates or truncates.
  Write = 1,
  /// Creates if needed, positioned at the end.
  Append = 2,
  /// Read-write on an existing file; fails if absent.
  Modify = 3,
}

pub struct FileTable {
  slots: HashMap<Cell, File>,
}

impl FileTable {
  pub fn new() -> FileTable {
    FileTable { slots: HashMap::new() }
  }

  fn find_open_slot(&self) -> Cell {
    let mut rng = rand::thread_rng();
    loop {
      let slot = rng.gen_range(1..=100_000);
      if !self.slots.contains_key(&slot) {
        return slot;
      }
    }
  }

  /// Opens `name` in the given mode. Returns the new slot id, or 0 if the
  /// mode is unknown or the host refuses.
  pub fn open(&mut self, mode: Cell, name: &str) -> Cell {
    let mode = match FileMode::try_from(mode) {
      Ok(mode) => mode,
      Err(_) => return 0,
    };

    let opened = match mode {
      FileMode::Read => OpenOptions::new().read(true).open(name),

      FileMode::Write => {
        OpenOptions::new().read(true).write(true).create(true).truncate(true).open(name)
      }

      FileMode::Append => {
        OpenOptions::new().read(true).write(true).create(true).open(name).and_then(
          |mut file| {
            file.seek(SeekFrom::End(0))?;
            Ok(file)
          },
        )
      }

      FileMode::Modify => OpenOptions::new().read(true).write(true).open(name),
    };

    match opened {
      Ok(file) => {
        let slot = self.find_open_slot();
        self.slots.insert(slot, file);
        slot
      }
      Err(_) => 0,
    }
  }

  /// The next byte of `slot`, or 0 at end of file or on a bad slot.
  pub fn read_byte(&mut self, slot: Cell) -> Cell {
    let mut byte = [0u8; 1];
    match self.slots.get_mut(&slot) {
      Some(file) => match file.read(&mut byte) {
        Ok(1) => byte[0] as Cell,
        _ => 0,
      },
      None => 0,
    }
  }

  /// Writes the low byte of `value` to `slot`. Returns 1 on success.
  pub fn write_byte(&mut self, slot: Cell, value: Cell) -> Cell {
    match self.slots.get_mut(&slot) {
      Some(file) => match file.write_all(&[value as u8]) {
        Ok(()) => 1,
        Err(_) => 0,
      },
      None => 0,
    }
  }

  /// Closes and forgets `slot`. Always reports 0.
  pub fn close(&mut self, slot: Cell) -> Cell {
    self.slots.remove(&slot);
    0
  }

  /// The current position in `slot`, or -1.
  pub fn tell(&mut self, slot: Cell) -> Cell {
    match self.slots.get_mut(&slot) {
      Some(file) => match file.stream_position() {
        Ok(position) => position as Cell,
        Err(_) => -1,
      },
      None => -1,
    }
  }

  /// Repositions `slot` to `position` from the start. Returns 0, or -1.
  pub fn seek(&mut self, slot: Cell, position: Cell) -> Cell {
    match self.slots.get_mut(&slot) {
      Some(file) => match file.seek(SeekFrom::Start(position as u64)) {
        Ok(_) => 0,
        Err(_) => -1,
      },
      None => -1,
    }
  }

  /// The length of `slot` in bytes, or -1.
  pub fn size(&mut self, slot: Cell) -> Cell {
    match self.slots.get(&slot) {
      Some(file) => match file.metadata() {
        Ok(metadata) => metadata.len() as Cell,
        Err(_) => -1,
      },
      None => -1,
    }
  }

  /// Deletes the named file. Returns -1 on success, 0 on failure.
  pub fn delete(&mut self, name: &str) -> Cell {
    match std::fs::remove_file(name) {
      Ok(()) => -1,
      Err(_) => 0,
    }
  }
}
