//! Binary representation of class files
//!
//! Everything here mirrors a structure from [chapter 4 of the JVM specification][0] and knows
//! how to [`Serialize`] itself. The [`ClassReader`] goes the other way.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html

mod attribute;
mod class;
mod constants;
mod members;
mod reader;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use members::*;
pub use reader::*;
pub use serialize::*;
pub use version::*;
