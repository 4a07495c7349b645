//! Command-line front end for the Ngaro virtual machine: load a boot image,
//! queue any initial input scripts, and run until the machine halts.

#[macro_use]
extern crate prettytable;
#[macro_use]
extern crate lazy_static;

mod cell;
mod fault;
mod files;
mod image;
mod input;
mod io;
mod memory;
mod opcode;
mod ports;
mod stack;
mod vm;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::io::{IoManager, StandardIo};
use crate::vm::{NgaroVM, VmConfig};

#[derive(Parser, Debug)]
#[command(name = "ngaro")]
#[command(about = "A bytecode interpreter for the Ngaro virtual machine", long_about = None)]
struct Args {
  /// Path to the boot image
  #[arg(default_value = "retroImage")]
  image: PathBuf,

  /// Input script pushed onto the input stack before the run; repeatable,
  /// consumed in the order given
  #[arg(long = "with", value_name = "FILE")]
  with: Vec<PathBuf>,

  /// Data stack size in cells
  #[arg(long, default_value_t = 128)]
  data_stack: usize,

  /// Address stack size in cells
  #[arg(long, default_value_t = 1024)]
  address_stack: usize,

  /// Memory size in cells
  #[arg(long, default_value_t = 1_000_000)]
  memory: usize,
}

fn main() -> anyhow::Result<()> {
  let args = Args::parse();

  #[cfg(feature = "trace_execution")]
  println!("Execution Tracing ENABLED");

  let mut io = StandardIo::new();
  // The topmost input source is read first, so push in reverse to consume
  // the scripts in command-line order.
  for script in args.with.iter().rev() {
    io.push_input_name(&script.to_string_lossy())
      .with_context(|| format!("could not open input script {}", script.display()))?;
  }

  let config = VmConfig {
    data_stack_size: args.data_stack,
    address_stack_size: args.address_stack,
    memory_size: args.memory,
    image_path: args.image,
  };

  let mut vm = NgaroVM::new(config, io);
  vm.initialize()?;
  vm.run().context("machine fault")?;
  Ok(())
}
