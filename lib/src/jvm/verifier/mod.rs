//! Stack map frame computation
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`Frame`]) and the set of stack map frames for all possible jump
//! targets in a method is the _stack map table_.
//!
//! The "types" used in verification (represented using [`VerificationType`]) are slightly
//! augmented to take into account initialization and null. Inferring the frames is a fixpoint
//! computation over the control flow graph: each basic block summarizes its own effect once (see
//! [`BlockFrame`]), then input frames get merged along edges until nothing changes. Merging two
//! class types needs the class hierarchy, which is why [`VType::merge`] takes a
//! [`ClassHierarchy`](crate::jvm::class_graph::ClassHierarchy).
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod block_frame;
mod frame;
mod type_table;
mod types;

pub use block_frame::*;
pub use frame::*;
pub use type_table::*;
pub use types::*;
