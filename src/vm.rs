//! Structures and functions for the Ngaro virtual machine: the
//! fetch/decode/execute loop over cell memory, the two machine stacks, and
//! the `WAIT`-driven device handler behind the port bus.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use prettytable::{format as TableFormat, Table};

use crate::cell::{Cell, CELL_BITS};
use crate::fault::{Fault, StartupError};
use crate::image;
use crate::io::IoManager;
use crate::memory::Memory;
use crate::opcode::{Instruction, Opcode};
use crate::ports::{PortBus, PORT_FILES, PORT_FLAG, PORT_INPUT, PORT_OUTPUT, PORT_QUERY};
use crate::stack::Stack;

/// Sizing and boot parameters. The defaults match the reference machine.
pub struct VmConfig {
  pub data_stack_size: usize,
  pub address_stack_size: usize,
  pub memory_size: usize,
  /// Loaded at startup and rewritten by the save-image port request.
  pub image_path: PathBuf,
}

impl Default for VmConfig {
  fn default() -> VmConfig {
    VmConfig {
      data_stack_size: 128,
      address_stack_size: 1024,
      memory_size: 1_000_000,
      image_path: PathBuf::from("retroImage"),
    }
  }
}

pub struct NgaroVM<IO: IoManager> {
  // Registers //
  ip: Cell, // Instruction pointer

  // Memory stores //
  memory: Memory,
  data: Stack,
  address: Stack,
  ports: PortBus,

  // Devices //
  io: IO,
  image_path: PathBuf,
}

impl<IO: IoManager> NgaroVM<IO> {
  pub fn new(config: VmConfig, io: IO) -> NgaroVM<IO> {
    NgaroVM {
      ip: 0,
      memory: Memory::new(config.memory_size),
      data: Stack::new("data", config.data_stack_size),
      address: Stack::new("address", config.address_stack_size),
      ports: PortBus::new(),
      io,
      image_path: config.image_path,
    }
  }

  // region Accessors

  pub fn ip(&self) -> Cell {
    self.ip
  }

  pub fn memory(&self) -> &Memory {
    &self.memory
  }

  pub fn memory_mut(&mut self) -> &mut Memory {
    &mut self.memory
  }

  pub fn io(&self) -> &IO {
    &self.io
  }

  pub fn io_mut(&mut self) -> &mut IO {
    &mut self.io
  }

  // endregion

  /// Clears the machine and loads the boot image. Address 0 must be nonzero
  /// afterwards — a zero there means no image was loaded, which is fatal.
  pub fn initialize(&mut self) -> Result<(), StartupError> {
    self.memory.clear();
    self.ports.clear();
    self.ip = 0;

    let path = self.image_path.display().to_string();
    image::load(&self.image_path, &mut self.memory)
      .map_err(|source| StartupError::ImageUnreadable { path: path.clone(), source })?;

    match self.memory.get(0) {
      Ok(sentinel) if sentinel != 0 => Ok(()),
      _ => Err(StartupError::NoImage { path }),
    }
  }

  /// Runs until the instruction pointer walks past the end of memory or a
  /// fault terminates execution.
  pub fn run(&mut self) -> Result<(), Fault> {
    while self.ip < self.memory.size() as Cell {
      self.step()?;
    }
    Ok(())
  }

  /// Executes the single opcode at `ip` and performs the standard fetch
  /// advance. Opcodes that reposition `ip` themselves set it to target - 1
  /// precisely so this advance lands on the target.
  pub fn step(&mut self) -> Result<(), Fault> {
    self.process()?;
    self.ip += 1;

    #[cfg(feature = "trace_execution")]
    println!("{}", self);

    Ok(())
  }

  // region Dispatch

  fn process(&mut self) -> Result<(), Fault> {
    match Instruction::decode(self.memory.get(self.ip)?) {
      Instruction::Primitive(opcode) => self.primitive(opcode),

      // Any non-primitive cell is an implicit call to the address given by
      // its own value.
      Instruction::Call(target) => {
        self.address.push(self.ip)?;
        self.ip = target - 1;
        self.skip_padding()
      }
    }
  }

  fn primitive(&mut self, opcode: Opcode) -> Result<(), Fault> {
    match opcode {
      Opcode::Nop => {}

      Opcode::Lit => {
        self.ip += 1;
        let value = self.memory.get(self.ip)?;
        self.data.push(value)?;
      }

      Opcode::Dup => {
        let top = self.data.peek()?;
        self.data.push(top)?;
      }

      Opcode::Drop => {
        self.data.pop()?;
      }

      Opcode::Swap => {
        let x = self.data.pop()?;
        let y = self.data.pop()?;
        self.data.push(x)?;
        self.data.push(y)?;
      }

      Opcode::Push => {
        let value = self.data.pop()?;
        self.address.push(value)?;
      }

      Opcode::Pop => {
        let value = self.address.pop()?;
        self.data.push(value)?;
      }

      Opcode::Loop => {
        let counter = self.data.pop()?.wrapping_sub(1);
        self.data.push(counter)?;
        self.ip += 1;
        if counter != 0 && counter > -1 {
          self.ip = self.memory.get(self.ip)? - 1;
        } else {
          self.data.drop(1)?;
        }
      }

      Opcode::Jump => {
        self.ip += 1;
        self.ip = self.memory.get(self.ip)? - 1;
        self.skip_padding()?;
      }

      Opcode::Return => {
        self.ip = self.address.pop()?;
        self.skip_padding()?;
      }

      Opcode::LtJump => self.conditional_jump(|second, first| second < first)?,
      Opcode::GtJump => self.conditional_jump(|second, first| second > first)?,
      Opcode::NeJump => self.conditional_jump(|second, first| second != first)?,
      Opcode::EqJump => self.conditional_jump(|second, first| second == first)?,

      Opcode::Fetch => {
        let address = self.data.pop()?;
        let value = self.memory.get(address)?;
        self.data.push(value)?;
      }

      Opcode::Store => {
        // The address is popped first.
        let address = self.data.pop()?;
        let value = self.data.pop()?;
        self.memory.set(address, value)?;
      }

      Opcode::Add => self.binary_op(|x, y| x.wrapping_add(y))?,
      Opcode::Sub => self.binary_op(|x, y| x.wrapping_sub(y))?,
      Opcode::Mul => self.binary_op(|x, y| x.wrapping_mul(y))?,

      Opcode::DivMod => {
        let x = self.data.pop()?; // divisor
        let y = self.data.pop()?; // dividend
        if x == 0 {
          return Err(Fault::DivideByZero { ip: self.ip });
        }
        self.data.push(y.wrapping_rem(x))?;
        self.data.push(y.wrapping_div(x))?;
      }

      Opcode::And => self.binary_op(|x, y| x & y)?,
      Opcode::Or => self.binary_op(|x, y| x | y)?,
      Opcode::Xor => self.binary_op(|x, y| x ^ y)?,
      // Shift counts are taken modulo the cell width, as on the reference
      // machine. `Shr` preserves sign.
      Opcode::Shl => self.binary_op(|x, y| x.wrapping_shl(y as u32))?,
      Opcode::Shr => self.binary_op(|x, y| x.wrapping_shr(y as u32))?,

      Opcode::ZeroExit => {
        if self.data.peek()? == 0 {
          self.data.drop(1)?;
          self.ip = self.address.pop()?;
        }
      }

      Opcode::Inc => {
        let value = self.data.pop()?;
        self.data.push(value.wrapping_add(1))?;
      }

      Opcode::Dec => {
        let value = self.data.pop()?;
        self.data.push(value.wrapping_sub(1))?;
      }

      Opcode::In => {
        // A consuming read: fetching a port zeroes it.
        let port = self.data.pop()?;
        let value = self.ports.get(port)?;
        self.data.push(value)?;
        self.ports.set(port, 0)?;
      }

      Opcode::Out => {
        // Clearing the busy flag signals a new request. An `Out` targeting
        // port 0 itself therefore stores the written value.
        self.ports.set_at(PORT_FLAG, 0);
        let port = self.data.pop()?;
        let value = self.data.pop()?;
        self.ports.set(port, value)?;
      }

      Opcode::Wait => self.handle_devices()?,
    }
    Ok(())
  }

  /// Pop y, pop x, push `op(x, y)`.
  fn binary_op(&mut self, op: fn(Cell, Cell) -> Cell) -> Result<(), Fault> {
    let y = self.data.pop()?;
    let x = self.data.pop()?;
    self.data.push(op(x, y))
  }

  /**
    The consuming comparison branches. The operand cell follows the opcode;
    two values are popped and compared as second-popped against first-popped,
    and both are consumed whether or not the branch is taken.
  */
  fn conditional_jump(&mut self, condition: fn(Cell, Cell) -> bool) -> Result<(), Fault> {
    self.ip += 1;
    let first = self.data.pop()?;
    let second = self.data.pop()?;
    if condition(second, first) {
      self.ip = self.memory.get(self.ip)? - 1;
    }
    Ok(())
  }

  /**
    The trailing-NOP skip applied after `JUMP`, `RETURN`, and implicit
    calls: at most two zero cells immediately following the transfer target
    are stepped over. Images pad call sites with zero cells, and control
    transfer is wrong without reproducing this exactly.
  */
  fn skip_padding(&mut self) -> Result<(), Fault> {
    if self.memory.get(self.ip + 1)? == 0 {
      self.ip += 1;
    }
    if self.memory.get(self.ip + 1)? == 0 {
      self.ip += 1;
    }
    Ok(())
  }

  // endregion

  // region Devices

  /// Pops a string address off the data stack and reads the 0-terminated
  /// string it points at.
  fn pop_string(&mut self) -> Result<String, Fault> {
    let address = self.data.pop()?;
    self.memory.string_at(address)
  }

  /**
    Services the port bus, one pass per `WAIT`. A still-unserviced prior
    request (port 0 nonzero) blocks everything; otherwise each pending
    request register is handled in bus order and acknowledged by setting
    port 0 back to 1.
  */
  fn handle_devices(&mut self) -> Result<(), Fault> {
    if self.ports.at(PORT_FLAG) == 1 {
      return Ok(());
    }

    // Keyboard / input stack. May block on the host.
    if self.ports.at(PORT_FLAG) == 0 && self.ports.at(PORT_INPUT) == 1 {
      let byte = self.io.read();
      // Stored sign-extended through 8 bits; end of input stays -1.
      self.ports.set_at(PORT_INPUT, (byte as u8 as i8) as Cell);
      self.ports.set_at(PORT_FLAG, 1);
    }

    // Console output. A negative cell is the clear-screen signal.
    if self.ports.at(PORT_OUTPUT) == 1 {
      let value = self.data.pop()?;
      if value < 0 {
        for _ in 0..300 {
          self.io.write('\n' as Cell);
        }
      } else {
        self.io.write(value);
      }
      self.ports.set_at(PORT_OUTPUT, 0);
      self.ports.set_at(PORT_FLAG, 1);
    }

    self.handle_storage()?;
    self.handle_query();

    Ok(())
  }

  /// Port 4: image save, input source push, and the negative-code file
  /// operations. Host I/O failure never faults — it answers with the
  /// operation's sentinel value.
  fn handle_storage(&mut self) -> Result<(), Fault> {
    let request = self.ports.at(PORT_FILES);
    if request == 0 {
      return Ok(());
    }

    let reply = match request {
      1 => {
        let _ = image::save(&self.image_path, &self.memory);
        0
      }

      2 => {
        let name = self.pop_string()?;
        let _ = self.io.push_input_name(&name);
        0
      }

      -1 => {
        let mode = self.data.pop()?;
        let name = self.pop_string()?;
        self.io.open_file(mode, &name)
      }

      -2 => {
        let slot = self.data.pop()?;
        self.io.read_file(slot)
      }

      -3 => {
        let slot = self.data.pop()?;
        let value = self.data.pop()?;
        self.io.write_file(slot, value)
      }

      -4 => {
        let slot = self.data.pop()?;
        self.io.close_file(slot)
      }

      -5 => {
        let slot = self.data.pop()?;
        self.io.file_position(slot)
      }

      -6 => {
        let slot = self.data.pop()?;
        let position = self.data.pop()?;
        self.io.set_file_position(slot, position)
      }

      -7 => {
        let slot = self.data.pop()?;
        self.io.file_size(slot)
      }

      -8 => {
        let name = self.pop_string()?;
        self.io.delete_file(&name)
      }

      _ => 0,
    };

    self.ports.set_at(PORT_FILES, reply);
    self.ports.set_at(PORT_FLAG, 1);
    Ok(())
  }

  /// Port 5: machine facts, negative codes only. Code -9 forces a halt by
  /// parking the instruction pointer past the end of memory.
  fn handle_query(&mut self) {
    let query = self.ports.at(PORT_QUERY);
    if !(-15..=-1).contains(&query) {
      return;
    }

    let answer = match query {
      -1 => self.memory.size() as Cell,
      -5 => self.data.depth(),
      -6 => self.address.depth(),
      -8 => unix_time(),
      -9 => {
        self.ip = self.memory.size() as Cell;
        0
      }
      -13 => CELL_BITS,
      -14 => 1,
      -15 => -1,
      _ => 0,
    };

    self.ports.set_at(PORT_QUERY, answer);
    self.ports.set_at(PORT_FLAG, 1);
  }

  // endregion

  // region Display methods

  fn make_cell_table(name: char, cells: &[Cell]) -> Table {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Contents"]);

    for (i, cell) in cells.iter().enumerate() {
      table.add_row(row![r->format!("{}[{}] =", name, i), format!("{}", cell)]);
    }
    table
  }

  // endregion
}

fn unix_time() -> Cell {
  match SystemTime::now().duration_since(UNIX_EPOCH) {
    Ok(elapsed) => elapsed.as_secs() as Cell,
    Err(_) => 0,
  }
}

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

impl<IO: IoManager> Display for NgaroVM<IO> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let data_table = NgaroVM::<IO>::make_cell_table('D', self.data.as_cells());
    let address_table = NgaroVM::<IO>::make_cell_table('A', self.address.as_cells());
    let ports_table = NgaroVM::<IO>::make_cell_table('P', self.ports.as_cells());

    let mut combined_table = table!([data_table, address_table, ports_table]);

    combined_table.set_titles(row![ub->"Data Stack", ub->"Address Stack", ub->"Ports"]);
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);

    let next = match self.memory.get(self.ip) {
      Ok(cell) => format!("{}", Instruction::decode(cell)),
      Err(_) => String::from("halted"),
    };

    write!(f, "ip = {}\tNext: {}\n{}", self.ip, next, combined_table)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::io::MemoryIo;
  use std::path::PathBuf;

  const NOP: Cell = 0;
  const LIT: Cell = 1;
  const DUP: Cell = 2;
  const DROP: Cell = 3;
  const SWAP: Cell = 4;
  const PUSH: Cell = 5;
  const POP: Cell = 6;
  const LOOP: Cell = 7;
  const JUMP: Cell = 8;
  const RETURN: Cell = 9;
  const LT_JUMP: Cell = 10;
  const GT_JUMP: Cell = 11;
  const NE_JUMP: Cell = 12;
  const EQ_JUMP: Cell = 13;
  const FETCH: Cell = 14;
  const STORE: Cell = 15;
  const ADD: Cell = 16;
  const SUB: Cell = 17;
  const MUL: Cell = 18;
  const DIVMOD: Cell = 19;
  const AND: Cell = 20;
  const OR: Cell = 21;
  const XOR: Cell = 22;
  const SHL: Cell = 23;
  const SHR: Cell = 24;
  const ZERO_EXIT: Cell = 25;
  const INC: Cell = 26;
  const DEC: Cell = 27;
  const IN: Cell = 28;
  const OUT: Cell = 29;
  const WAIT: Cell = 30;

  fn scratch_path(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("ngaro-vm-{}-{}", tag, std::process::id()));
    path
  }

  fn small_config() -> VmConfig {
    VmConfig {
      data_stack_size: 32,
      address_stack_size: 32,
      memory_size: 256,
      image_path: PathBuf::from("retroImage"),
    }
  }

  fn machine(program: &[Cell]) -> NgaroVM<MemoryIo> {
    machine_reading(program, b"")
  }

  fn machine_reading(program: &[Cell], input: &[u8]) -> NgaroVM<MemoryIo> {
    let mut vm = NgaroVM::new(small_config(), MemoryIo::new(input));
    vm.memory.set_block(0, program).unwrap();
    vm
  }

  fn step_n(vm: &mut NgaroVM<MemoryIo>, n: usize) {
    for _ in 0..n {
      vm.step().unwrap();
    }
  }

  // region Stack and literal opcodes

  #[test]
  fn lit_pushes_following_cell_and_advances_ip_by_two() {
    let mut vm = machine(&[LIT, 42]);
    vm.step().unwrap();
    assert_eq!(vm.data.as_cells(), &[42]);
    assert_eq!(vm.ip, 2);
  }

  #[test]
  fn dup_drop_swap() {
    let mut vm = machine(&[LIT, 3, LIT, 9, SWAP, DUP, DROP]);
    step_n(&mut vm, 5);
    assert_eq!(vm.data.as_cells(), &[9, 3]);
  }

  #[test]
  fn push_then_pop_round_trips_with_no_net_depth_change() {
    let mut vm = machine(&[LIT, 7, PUSH, POP]);
    step_n(&mut vm, 2);
    assert_eq!(vm.data.depth(), 0);
    assert_eq!(vm.address.as_cells(), &[7]);
    vm.step().unwrap();
    assert_eq!(vm.data.as_cells(), &[7]);
    assert_eq!(vm.address.depth(), 0);
  }

  #[test]
  fn underflow_is_a_fault_not_corruption() {
    let mut vm = machine(&[DROP]);
    assert_eq!(vm.step(), Err(Fault::StackUnderflow("data")));
  }

  // endregion

  // region Control flow

  #[test]
  fn loop_branches_while_counter_is_positive() {
    // 2 LOOP: 2 -> 1, branch back; 1 -> 0, drop and fall through.
    let mut vm = machine(&[LIT, 2, LOOP, 2, NOP]);
    vm.step().unwrap();
    vm.step().unwrap();
    assert_eq!(vm.ip, 2); // branched back to the LOOP opcode
    assert_eq!(vm.data.as_cells(), &[1]);
    vm.step().unwrap();
    assert_eq!(vm.ip, 4); // fell through past the operand
    assert_eq!(vm.data.depth(), 0);
  }

  #[test]
  fn loop_drops_a_negative_counter() {
    let mut vm = machine(&[LIT, -3, LOOP, 2]);
    step_n(&mut vm, 2);
    assert_eq!(vm.ip, 4);
    assert_eq!(vm.data.depth(), 0);
  }

  #[test]
  fn jump_skips_up_to_two_zero_cells_at_the_target() {
    // Target 5 has two leading zero cells; execution must land on cell 7.
    let mut vm = machine(&[JUMP, 5, NOP, NOP, NOP, 0, 0, LIT, 11]);
    vm.step().unwrap();
    assert_eq!(vm.ip, 7);
    vm.step().unwrap();
    assert_eq!(vm.data.as_cells(), &[11]);
  }

  #[test]
  fn jump_does_not_skip_a_nonzero_target() {
    let mut vm = machine(&[JUMP, 4, NOP, NOP, LIT, 5]);
    vm.step().unwrap();
    assert_eq!(vm.ip, 4);
  }

  #[test]
  fn implicit_call_pushes_return_address_and_returns() {
    // Cell 0 calls address 40 (any value past the primitives is a call);
    // the subroutine returns to the call site.
    let mut program = vec![NOP; 48];
    program[0] = 40;
    program[1] = LIT; // nonzero, so the return applies no padding skip
    program[40] = RETURN;

    let mut vm = machine(&program);
    vm.step().unwrap();
    assert_eq!(vm.ip, 40);
    assert_eq!(vm.address.as_cells(), &[0]);
    vm.step().unwrap();
    // Returned to cell 0, then the fetch advance moved past it.
    assert_eq!(vm.ip, 1);
    assert_eq!(vm.address.depth(), 0);
  }

  #[test]
  fn call_target_padding_is_skipped() {
    let mut program = vec![NOP; 48];
    program[0] = 40;
    program[42] = LIT;
    program[43] = 3;

    let mut vm = machine(&program);
    vm.step().unwrap();
    // Cells 40 and 41 are zero: execution lands on cell 42.
    assert_eq!(vm.ip, 42);
  }

  #[test]
  fn zero_exit_returns_early_only_on_zero() {
    let mut program = vec![NOP; 48];
    program[0] = 40;
    program[1] = LIT;
    program[40] = LIT;
    program[41] = 0;
    program[42] = ZERO_EXIT;

    let mut vm = machine(&program);
    step_n(&mut vm, 3);
    // Returned to the call site with the zero consumed.
    assert_eq!(vm.ip, 1);
    assert_eq!(vm.data.depth(), 0);
    assert_eq!(vm.address.depth(), 0);

    let mut vm = machine(&[LIT, 8, ZERO_EXIT]);
    step_n(&mut vm, 2);
    assert_eq!(vm.ip, 3);
    assert_eq!(vm.data.as_cells(), &[8]);
  }

  // endregion

  // region Comparison jumps

  #[test]
  fn lt_jump_branches_when_second_popped_is_less() {
    let mut vm = machine(&[LIT, 1, LIT, 2, LT_JUMP, 9, NOP, NOP, NOP, LIT, 4]);
    step_n(&mut vm, 3);
    assert_eq!(vm.ip, 9);
    assert_eq!(vm.data.depth(), 0);
  }

  #[test]
  fn lt_jump_falls_through_and_still_consumes_both() {
    let mut vm = machine(&[LIT, 2, LIT, 1, LT_JUMP, 9]);
    step_n(&mut vm, 3);
    assert_eq!(vm.ip, 6); // advanced past the operand cell
    assert_eq!(vm.data.depth(), 0);
  }

  #[test]
  fn gt_eq_ne_jumps() {
    let mut vm = machine(&[LIT, 5, LIT, 3, GT_JUMP, 9]);
    step_n(&mut vm, 3);
    assert_eq!(vm.ip, 9);

    let mut vm = machine(&[LIT, 5, LIT, 5, EQ_JUMP, 9]);
    step_n(&mut vm, 3);
    assert_eq!(vm.ip, 9);

    let mut vm = machine(&[LIT, 5, LIT, 5, NE_JUMP, 9]);
    step_n(&mut vm, 3);
    assert_eq!(vm.ip, 6);
  }

  // endregion

  // region Memory and arithmetic

  #[test]
  fn fetch_and_store() {
    let mut vm = machine(&[LIT, 99, LIT, 8, STORE, LIT, 8, FETCH, NOP]);
    step_n(&mut vm, 3);
    assert_eq!(vm.memory.get(8), Ok(99));
    step_n(&mut vm, 2);
    assert_eq!(vm.data.as_cells(), &[99]);
  }

  #[test]
  fn fetch_out_of_bounds_faults() {
    let mut vm = machine(&[LIT, -2, FETCH]);
    vm.step().unwrap();
    assert!(matches!(vm.step(), Err(Fault::OutOfBounds { address: -2, .. })));
  }

  #[test]
  fn arithmetic_and_increments() {
    let mut vm = machine(&[LIT, 10, LIT, 3, SUB, INC, INC, DEC, LIT, 4, MUL, LIT, 2, ADD]);
    step_n(&mut vm, 10);
    assert_eq!(vm.data.as_cells(), &[34]);
  }

  #[test]
  fn divmod_pushes_remainder_then_quotient() {
    let mut vm = machine(&[LIT, 7, LIT, 3, DIVMOD]);
    step_n(&mut vm, 3);
    assert_eq!(vm.data.as_cells(), &[1, 2]);
  }

  #[test]
  fn divmod_truncates_toward_zero() {
    for (y, x) in [(7, 3), (-7, 3), (7, -3), (-7, -3), (12, 4)] {
      let mut vm = machine(&[LIT, y, LIT, x, DIVMOD]);
      step_n(&mut vm, 3);
      let quotient = vm.data.pop().unwrap();
      let remainder = vm.data.pop().unwrap();
      assert_eq!(y, x * quotient + remainder, "y={} x={}", y, x);
    }
  }

  #[test]
  fn divmod_by_zero_faults() {
    let mut vm = machine(&[LIT, 7, LIT, 0, DIVMOD]);
    step_n(&mut vm, 2);
    assert_eq!(vm.step(), Err(Fault::DivideByZero { ip: 4 }));
  }

  #[test]
  fn bitwise_and_shifts() {
    let mut vm = machine(&[LIT, 0b1100, LIT, 0b1010, AND]);
    step_n(&mut vm, 3);
    assert_eq!(vm.data.as_cells(), &[0b1000]);

    let mut vm = machine(&[LIT, 0b1100, LIT, 0b1010, OR, LIT, 0b0110, XOR]);
    step_n(&mut vm, 5);
    assert_eq!(vm.data.as_cells(), &[0b1000]);

    let mut vm = machine(&[LIT, 3, LIT, 4, SHL]);
    step_n(&mut vm, 3);
    assert_eq!(vm.data.as_cells(), &[48]);

    // Arithmetic right shift preserves sign.
    let mut vm = machine(&[LIT, -8, LIT, 1, SHR]);
    step_n(&mut vm, 3);
    assert_eq!(vm.data.as_cells(), &[-4]);
  }

  // endregion

  // region Ports and devices

  #[test]
  fn out_stores_and_clears_the_busy_flag() {
    let mut vm = machine(&[LIT, 5, LIT, 2, OUT]);
    vm.ports.set_at(PORT_FLAG, 1);
    step_n(&mut vm, 3);
    assert_eq!(vm.ports.at(PORT_OUTPUT), 5);
    assert_eq!(vm.ports.at(PORT_FLAG), 0);
  }

  #[test]
  fn in_is_a_consuming_read() {
    let mut vm = machine(&[LIT, 2, IN]);
    vm.ports.set_at(PORT_OUTPUT, 7);
    step_n(&mut vm, 2);
    assert_eq!(vm.data.as_cells(), &[7]);
    assert_eq!(vm.ports.at(PORT_OUTPUT), 0);
  }

  #[test]
  fn bad_port_index_faults() {
    let mut vm = machine(&[LIT, 12, IN]);
    vm.step().unwrap();
    assert_eq!(vm.step(), Err(Fault::BadPort(12)));
  }

  #[test]
  fn console_write_emits_character_and_acknowledges() {
    let mut vm = machine(&[LIT, 72, LIT, 1, LIT, 2, OUT, WAIT]);
    step_n(&mut vm, 5);
    assert_eq!(vm.io.written, "H");
    assert_eq!(vm.ports.at(PORT_OUTPUT), 0);
    assert_eq!(vm.ports.at(PORT_FLAG), 1);
    assert_eq!(vm.data.depth(), 0);
  }

  #[test]
  fn negative_console_value_clears_the_screen() {
    let mut vm = machine(&[LIT, -1, LIT, 1, LIT, 2, OUT, WAIT]);
    step_n(&mut vm, 5);
    assert_eq!(vm.io.written.len(), 300);
    assert!(vm.io.written.chars().all(|c| c == '\n'));
  }

  #[test]
  fn wait_services_nothing_while_a_request_is_pending() {
    let mut vm = machine(&[LIT, 72, WAIT]);
    vm.ports.set_at(PORT_FLAG, 1);
    vm.ports.set_at(PORT_OUTPUT, 1);
    step_n(&mut vm, 2);
    // Busy flag set: the console request is left unserviced.
    assert_eq!(vm.io.written, "");
    assert_eq!(vm.data.as_cells(), &[72]);
  }

  #[test]
  fn input_request_reads_one_byte_per_wait() {
    let program = [
      LIT, 1, LIT, 1, OUT, WAIT, // request a byte
      LIT, 1, IN, // fetch it
      LIT, 1, LIT, 1, OUT, WAIT, // and the next (end of input)
      LIT, 1, IN,
    ];
    let mut vm = machine_reading(&program, b"A");
    step_n(&mut vm, 12);
    assert_eq!(vm.data.as_cells(), &[65, -1]);
  }

  #[test]
  fn query_reports_data_stack_depth() {
    let program = [
      LIT, 10, LIT, 20, LIT, 30, // three working values
      LIT, -5, LIT, 5, OUT, WAIT,
    ];
    let mut vm = machine(&program);
    step_n(&mut vm, 7);
    assert_eq!(vm.ports.at(PORT_QUERY), 3);
    assert_eq!(vm.ports.at(PORT_FLAG), 1);
  }

  #[test]
  fn query_reports_machine_facts() {
    for (code, expected) in [(-1, 256), (-6, 0), (-13, 32), (-14, 1), (-15, -1), (-4, 0)] {
      let mut vm = machine(&[LIT, code, LIT, 5, OUT, WAIT]);
      step_n(&mut vm, 4);
      assert_eq!(vm.ports.at(PORT_QUERY), expected, "query code {}", code);
      assert_eq!(vm.ports.at(PORT_FLAG), 1);
    }
  }

  #[test]
  fn query_code_minus_nine_halts_the_machine() {
    let mut vm = machine(&[LIT, -9, LIT, 5, OUT, WAIT, LIT, 42]);
    vm.run().unwrap();
    assert_eq!(vm.ip, 256 + 1);
    // The LIT after the halt request never executed.
    assert_eq!(vm.data.depth(), 0);
  }

  #[test]
  fn run_halts_past_the_end_of_memory() {
    let mut vm = machine(&[LIT, 1]);
    vm.run().unwrap();
    assert_eq!(vm.ip, 256);
    assert_eq!(vm.data.as_cells(), &[1]);
  }

  // endregion

  // region Storage port

  // Writes `text` into memory as a 0-terminated string at `address`.
  fn plant_string(vm: &mut NgaroVM<MemoryIo>, address: usize, text: &str) {
    let mut cells: Vec<Cell> = text.chars().map(|c| c as Cell).collect();
    cells.push(0);
    vm.memory.set_block(address, &cells).unwrap();
  }

  #[test]
  fn file_bytes_survive_a_write_close_read_cycle() {
    let path = scratch_path("cycle");
    let name_addr: Cell = 100;
    #[rustfmt::skip]
    let program = [
      // open for writing: name address, then mode, then the request
      LIT, name_addr, LIT, 1, LIT, -1, LIT, 4, OUT, WAIT,
      LIT, 4, IN, DUP,                              // slot, kept for closing
      LIT, 104, SWAP, LIT, -3, LIT, 4, OUT, WAIT,   // write 'h'
      DUP, LIT, 105, SWAP, LIT, -3, LIT, 4, OUT, WAIT, // write 'i'
      LIT, -4, LIT, 4, OUT, WAIT,                   // close
      // reopen for reading and pull both bytes back
      LIT, name_addr, LIT, 0, LIT, -1, LIT, 4, OUT, WAIT,
      LIT, 4, IN, DUP,
      LIT, -2, LIT, 4, OUT, WAIT, LIT, 4, IN, SWAP,
      LIT, -2, LIT, 4, OUT, WAIT, LIT, 4, IN,
      // halt
      LIT, -9, LIT, 5, OUT, WAIT,
    ];
    let mut vm = machine(&program);
    plant_string(&mut vm, name_addr as usize, path.to_str().unwrap());
    vm.run().unwrap();

    assert_eq!(vm.data.as_cells(), &[104, 105]);
    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn opening_a_missing_file_for_reading_reports_zero() {
    let name_addr: Cell = 50;
    let program = [LIT, name_addr, LIT, 0, LIT, -1, LIT, 4, OUT, WAIT];
    let mut vm = machine(&program);
    plant_string(&mut vm, name_addr as usize, "/nonexistent/ngaro-file");
    step_n(&mut vm, 6);
    assert_eq!(vm.ports.at(PORT_FILES), 0);
    assert_eq!(vm.ports.at(PORT_FLAG), 1);
  }

  #[test]
  fn pushed_input_source_feeds_the_input_port() {
    let path = scratch_path("script");
    std::fs::write(&path, b"Q").unwrap();

    let name_addr: Cell = 50;
    let program = [
      LIT, name_addr, LIT, 2, LIT, 4, OUT, WAIT, // push the named source
      LIT, 1, LIT, 1, OUT, WAIT, // request a byte
      LIT, 1, IN,
    ];
    let mut vm = machine(&program);
    plant_string(&mut vm, name_addr as usize, path.to_str().unwrap());
    step_n(&mut vm, 11);
    assert_eq!(vm.data.as_cells(), &['Q' as Cell]);
    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn save_request_writes_the_boot_image() {
    let path = scratch_path("save");
    let mut config = small_config();
    config.image_path = path.clone();
    let mut vm = NgaroVM::new(config, MemoryIo::new(b""));
    vm.memory.set_block(0, &[LIT, 1, LIT, 4, OUT, WAIT]).unwrap();

    step_n(&mut vm, 4);
    assert_eq!(vm.ports.at(PORT_FILES), 0);
    assert_eq!(vm.ports.at(PORT_FLAG), 1);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 256 * 4);
    // First word round-trips big-endian: LIT is 1.
    assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
    std::fs::remove_file(&path).unwrap();
  }

  // endregion

  // region Startup

  #[test]
  fn initialize_rejects_a_missing_image() {
    let mut config = small_config();
    config.image_path = PathBuf::from("/nonexistent/retroImage");
    let mut vm = NgaroVM::new(config, MemoryIo::new(b""));
    assert!(matches!(
      vm.initialize(),
      Err(StartupError::ImageUnreadable { .. })
    ));
  }

  #[test]
  fn initialize_rejects_an_all_zero_image() {
    let path = scratch_path("zero-image");
    let zeroes = Memory::new(8);
    image::save(&path, &zeroes).unwrap();

    let mut config = small_config();
    config.image_path = path.clone();
    let mut vm = NgaroVM::new(config, MemoryIo::new(b""));
    assert!(matches!(vm.initialize(), Err(StartupError::NoImage { .. })));
    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn initialize_accepts_and_runs_a_real_image() {
    let path = scratch_path("boot");
    let mut boot = Memory::new(8);
    boot.set_block(0, &[LIT, 7, LIT, 5, ADD]).unwrap();
    image::save(&path, &boot).unwrap();

    let mut config = small_config();
    config.image_path = path.clone();
    let mut vm = NgaroVM::new(config, MemoryIo::new(b""));
    vm.initialize().unwrap();
    vm.run().unwrap();
    assert_eq!(vm.data.as_cells(), &[12]);
    std::fs::remove_file(&path).unwrap();
  }

  // endregion
}
