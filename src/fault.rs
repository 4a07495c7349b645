//! Faults the machine can raise while executing an image.
//!
//! The reference implementations index raw arrays and let malformed images
//! corrupt adjacent memory or crash the host. Here every stack, memory, and
//! arithmetic violation is converted into a `Fault` that terminates the run
//! loop and is surfaced to the embedder. Device I/O failures are *not*
//! faults: they are reported to the guest as sentinel values in the port
//! registers and never escape the device layer.

use thiserror::Error;

use crate::cell::Cell;

#[derive(Error, Clone, Copy, Eq, PartialEq, Debug)]
pub enum Fault {
  /// A pop or peek on an empty stack.
  #[error("{0} stack underflow")]
  StackUnderflow(&'static str),

  /// A push beyond the stack's fixed capacity.
  #[error("{0} stack overflow")]
  StackOverflow(&'static str),

  /// A memory access outside [0, size).
  #[error("memory address {address} out of bounds (size {size})")]
  OutOfBounds { address: Cell, size: usize },

  /// A port index outside the bus width.
  #[error("port index {0} out of bounds")]
  BadPort(Cell),

  /// `DIVMOD` with a zero divisor.
  #[error("division by zero at ip {ip}")]
  DivideByZero { ip: Cell },
}

/// Fatal conditions before any execution begins. These abort the process
/// with a diagnostic and a nonzero exit status.
#[derive(Error, Debug)]
pub enum StartupError {
  #[error("could not read image file {path}: {source}")]
  ImageUnreadable {
    path: String,
    source: std::io::Error,
  },

  /// The loaded image left address 0 at zero, the "no image" sentinel.
  #[error("image file {path} holds no image")]
  NoImage { path: String },
}
