use crate::jvm::class_file::{Attribute, Serialize};
use crate::jvm::{FieldAccessFlags, MethodAccessFlags, Utf8ConstantIndex};
use byteorder::WriteBytesExt;

/// Field or method declared by a class or interface
///
/// Both have the same layout in the class file, only the meaning of the access flags differs.
///
///   - [fields][0] use [`FieldAccessFlags`]
///   - [methods][1] use [`MethodAccessFlags`]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.5
/// [1]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone)]
pub struct Member<Flags> {
    pub access_flags: Flags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

pub type Field = Member<FieldAccessFlags>;
pub type Method = Member<MethodAccessFlags>;

impl<Flags: Serialize> Serialize for Member<Flags> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
