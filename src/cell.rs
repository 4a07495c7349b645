//! The machine's single storage unit. A cell is a signed 32-bit integer with
//! overloaded meaning: opcode, literal, address, character code, boolean, or
//! signed magnitude, depending entirely on how the executing image uses it.

// If you change this you must also change `image::load`/`image::save`, which
// assume a 4 byte big-endian word on disk.
pub type Cell = i32;

/// Width of a cell in bits, reported through the port 5 query interface.
pub const CELL_BITS: Cell = 32;

/// Converts a cell to the character it encodes. Out-of-range values map to
/// the replacement character rather than faulting, since character data is
/// device output, not machine state.
pub fn to_char(value: Cell) -> char {
  char::from_u32(value as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
}
