use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

use crate::cell::Cell;

/**
  Opcodes of the virtual machine.

  The instruction set is a closed enumeration of 31 primitives numbered
  0 through 30. Any other in-range cell value is not an error: it is an
  implicit call, with the cell's own value as the call target. Decoding
  therefore never fails — it produces either a primitive or a call — and
  the numeric values below are part of the image wire format and cannot
  be reordered.
*/
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq, PartialEq,    Debug,         Hash
)]
#[repr(i32)]
pub enum Opcode {
  Nop      =  0,
  Lit      =  1, // lit( value )
  Dup      =  2,
  Drop     =  3,
  Swap     =  4,
  Push     =  5,
  Pop      =  6,
  Loop     =  7, // loop( target )
  Jump     =  8, // jump( target )
  Return   =  9,
  LtJump   = 10, // lt_jump( target )
  GtJump   = 11, // gt_jump( target )
  NeJump   = 12, // ne_jump( target )
  EqJump   = 13, // eq_jump( target )
  Fetch    = 14,
  Store    = 15,
  Add      = 16,
  Sub      = 17,
  Mul      = 18,
  DivMod   = 19,
  And      = 20,
  Or       = 21,
  Xor      = 22,
  Shl      = 23,
  Shr      = 24,
  ZeroExit = 25,
  Inc      = 26,
  Dec      = 27,
  In       = 28,
  Out      = 29,
  Wait     = 30,
}

impl Opcode {
  pub fn code(&self) -> Cell {
    Into::<Cell>::into(*self)
  }
}

/// A decoded cell: either one of the 31 primitives, or an implicit call to
/// the address given by the cell's own value.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Instruction {
  Primitive(Opcode),
  Call(Cell),
}

impl Instruction {
  pub fn decode(cell: Cell) -> Instruction {
    match Opcode::try_from(cell) {
      Ok(opcode) => Instruction::Primitive(opcode),
      Err(_) => Instruction::Call(cell),
    }
  }
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Instruction::Primitive(opcode) => {
        write!(f, "{}", opcode)
      }

      Instruction::Call(target) => {
        write!(f, "Call({})", target)
      }
    }
  }
}
