//! Bytecode representation and generation
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. Method bodies are essentially just a CFG of basic blocks, with an
//! operand stack and a stack of local variables. We split up the [list of bytecode
//! instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions (the body of the basic blocks)
//!   - [`BranchInstruction`] for instructions that may branch (the end of the basic blocks)
//!
//! With these, we can literally represent the method [`Code`] as an ordered sequence of
//! [`BasicBlock`]s.
//!
//! ### Code generation
//!
//! Since there is actually a little bit more that the JVM needs (see [`crate::jvm::verifier`]), it
//! can get quite tedious and error prone to generate valid bytecode. In order to aid in this
//! process, [`CodeBuilder`] accepts method code from top to bottom, splitting it into blocks as
//! labels get placed. When the method is finished:
//!
//!   1. [`dataflow`] infers the frame at the start of each block (or just the stack heights)
//!   2. unreachable blocks are overwritten with `nop`s and a final `athrow`
//!   3. [`jump_encoding`] decides which jumps need 32-bit offsets and lays out the code array
//!   4. the `StackMapTable` is written for the blocks that need explicit frames
//!
//! ### Code reading
//!
//! [`DecodedCode`] goes the other way, decoding an existing `Code` attribute so that it can be
//! replayed through a [`CodeBuilder`].
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod basic_block;
mod code;
mod code_builder;
mod code_reader;
pub mod dataflow;
mod instructions;
pub mod jump_encoding;
mod label;

pub use basic_block::*;
pub use code::*;
pub use code_builder::*;
pub use code_reader::*;
pub use instructions::*;
pub use label::*;
