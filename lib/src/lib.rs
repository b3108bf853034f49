//! Emit JVM class files from a stream of class, member, and instruction events
//!
//! Callers describe what goes in a method body; the crate works out the things the class file
//! format wants but which are tedious to compute by hand: the maximum operand stack depth, the
//! number of local variable slots, the encoding width of every jump, and the stack map frames
//! that the verifier expects at each branch target.
//!
//! See [`jvm`] for an end-to-end example.

pub mod jvm;
pub mod util;
