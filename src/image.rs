//! Boot image load and save.
//!
//! An image is a flat file of 32-bit big-endian words. Loading byte-swaps
//! each word into the host's native representation and writes the sequence
//! into memory starting at address 0; saving performs the exact inverse, so
//! a load/save pair is byte-for-byte idempotent. Whether the load actually
//! produced a runnable image is judged by the caller from the sentinel at
//! address 0.

use std::fs::File;
use std::io::{BufReader, BufWriter, Error, ErrorKind, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::cell::Cell;
use crate::memory::Memory;

/// Loads the image at `path` into memory from address 0. Returns the number
/// of cells read.
pub fn load(path: impl AsRef<Path>, memory: &mut Memory) -> std::io::Result<usize> {
  let file = File::open(path)?;
  let mut reader = BufReader::new(file);

  let mut words: Vec<Cell> = Vec::new();
  loop {
    match reader.read_i32::<BigEndian>() {
      Ok(word) => words.push(word),
      Err(error) if error.kind() == ErrorKind::UnexpectedEof => break,
      Err(error) => return Err(error),
    }
  }

  memory
    .set_block(0, &words)
    .map_err(|_| Error::new(ErrorKind::InvalidData, "image larger than memory"))?;
  Ok(words.len())
}

/// Saves the entire memory to `path` as big-endian words.
pub fn save(path: impl AsRef<Path>, memory: &Memory) -> std::io::Result<()> {
  let file = File::create(path)?;
  let mut writer = BufWriter::new(file);
  for cell in memory.as_cells() {
    writer.write_i32::<BigEndian>(*cell)?;
  }
  writer.flush()
}
