//! Manipulate JVM classes
//!
//! ### Simple example
//!
//! Consider the following simple Java class:
//!
//! ```java,ignore,no_run
//! public class Point {
//!     public final int x;
//!     public final int y;
//!
//!     public Point(int x, int y) {
//!         this.x = x;
//!         this.y = y;
//!     }
//! }
//! ```
//!
//! Generating an analogous class file can be done as follows:
//!
//! ```
//! use classforge::jvm::class_graph::ObjectHierarchy;
//! use classforge::jvm::code::{InvokeType, Instruction::*, BranchInstruction::*};
//! use classforge::jvm::class_file::Version;
//! use classforge::jvm::*;
//!
//! # fn generate_class() -> Result<(), Error> {
//! let point = BinaryName::from_string(String::from("me/alec/Point")).unwrap();
//! let x = UnqualifiedName::from_string(String::from("x")).unwrap();
//! let y = UnqualifiedName::from_string(String::from("y")).unwrap();
//!
//! // Declare the class (merges in frames only ever need `java/lang/Object` here)
//! let mut class = ClassBuilder::new(
//!     Version::JAVA11,
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//!     point.clone(),
//!     Some(BinaryName::OBJECT),
//!     vec![],
//!     ComputeMode::Frames,
//!     &ObjectHierarchy,
//! )?;
//!
//! // Add the fields to the class
//! class.add_field(FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL, &x, &FieldType::int(), None)?;
//! class.add_field(FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL, &y, &FieldType::int(), None)?;
//!
//! // Generate the constructor method body
//! let mut code = class.start_method(
//!     MethodAccessFlags::PUBLIC,
//!     UnqualifiedName::INIT,
//!     MethodDescriptor {
//!         parameters: vec![FieldType::int(), FieldType::int()],
//!         return_type: None,
//!     },
//! );
//! let object_init = MethodRef::new(
//!     BinaryName::OBJECT,
//!     UnqualifiedName::INIT,
//!     MethodDescriptor { parameters: vec![], return_type: None },
//! );
//! code.push_instruction(ALoad(0))?;
//! code.push_instruction(Invoke(InvokeType::Special, object_init))?;
//! code.push_instruction(ALoad(0))?;
//! code.push_instruction(ILoad(1))?;
//! code.push_instruction(PutField(FieldRef::new(point.clone(), x, FieldType::int())))?;
//! code.push_instruction(ALoad(0))?;
//! code.push_instruction(ILoad(2))?;
//! code.push_instruction(PutField(FieldRef::new(point, y, FieldType::int())))?;
//! code.push_branch_instruction(Return)?;
//! code.finish()?;
//!
//! // Finally, encode the class into bytes
//! let class_bytes: Vec<u8> = class.finish()?.to_bytes()?;
//! # Ok(())
//! # }
//! # generate_class().unwrap();
//! ```

mod access_flags;
mod class_builder;
pub mod class_file;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
mod names;
mod symbols;
pub mod verifier;

pub use access_flags::*;
pub use class_builder::*;
pub use class_file::{ClassConstantIndex, Constant, ConstantIndex, Utf8ConstantIndex};
pub use descriptors::*;
pub use errors::*;
pub use names::*;
pub use symbols::*;
