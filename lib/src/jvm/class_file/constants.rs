use crate::jvm::class_file::{Attribute, AttributeLike, BootstrapMethod, Serialize};
use crate::jvm::descriptors::{ParseDescriptor, RenderDescriptor};
use crate::jvm::names::Name;
use crate::jvm::{
    BinaryName, CallSite, ConstantData, DynamicConstant, Error, FieldRef, FieldType, Handle,
    MethodDescriptor, MethodRef, RefType, UnqualifiedName,
};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::result::Result;

/// Class file constants pool builder
///
/// The pool is append only: entries never move and every `get_*` method returns the index of
/// an existing equal entry if there is one. A pool can also be seeded from the constants of an
/// existing class file (see [`ConstantsPool::from_constants`]) in which case every original
/// index is preserved. The [`ConstantsWriter`] trait exposes inserting symbolic references into
/// the pool.
///
/// Bootstrap methods are scoped to the pool since `CONSTANT_InvokeDynamic_info` and
/// `CONSTANT_Dynamic_info` refer to them by index.
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,
    bootstrap_methods: Vec<BootstrapMethod>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    entries: HashMap<Constant, ConstantIndex>,
    bootstrap_indices: HashMap<BootstrapMethod, u16>,
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            bootstrap_methods: vec![],
            utf8s: HashMap::new(),
            entries: HashMap::new(),
            bootstrap_indices: HashMap::new(),
        }
    }

    /// Extend an existing pool (eg. from a class file being rewritten)
    ///
    /// Existing entries keep their indices. When the existing pool has duplicate entries, only
    /// the first occurrence will be returned by future lookups.
    pub fn from_constants(
        constants: OffsetVec<Constant>,
        bootstrap_methods: Vec<BootstrapMethod>,
    ) -> ConstantsPool {
        let mut utf8s = HashMap::new();
        let mut entries = HashMap::new();
        for (offset, _, constant) in &constants {
            let index = ConstantIndex(offset.0 as u16);
            match constant {
                Constant::Utf8(utf8) => {
                    utf8s
                        .entry(utf8.clone())
                        .or_insert(Utf8ConstantIndex(index));
                }
                other => {
                    entries.entry(other.clone()).or_insert(index);
                }
            }
        }

        let mut bootstrap_indices = HashMap::new();
        for (index, bootstrap_method) in bootstrap_methods.iter().enumerate() {
            bootstrap_indices
                .entry(bootstrap_method.clone())
                .or_insert(index as u16);
        }

        ConstantsPool {
            constants,
            bootstrap_methods,
            utf8s,
            entries,
            bootstrap_indices,
        }
    }

    /// Look up a constant by its index
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get_offset(Offset(index.0 as usize))
    }

    /// Constants in the pool so far
    pub fn constants(&self) -> &OffsetVec<Constant> {
        &self.constants
    }

    /// Bootstrap methods referenced from the pool so far
    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    /// Consume the pool and return the final vector of constants along with the bootstrap
    /// methods table
    pub fn into_parts(self) -> (OffsetVec<Constant>, Vec<BootstrapMethod>) {
        (self.constants, self.bootstrap_methods)
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let offset = self.constants.offset_len().0;
        let next_offset = offset + constant.width();
        if next_offset > u16::MAX as usize {
            return Err(ConstantPoolOverflow {
                constant,
                offset: offset.min(u16::MAX as usize) as u16,
            });
        }

        log::trace!("constant #{} = {:?}", offset, constant);
        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    /// Get or insert a (non-UTF8) constant
    fn intern(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        if let Some(idx) = self.entries.get(&constant) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(constant.clone())?;
            self.entries.insert(constant, idx);
            Ok(idx)
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, Error> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(&mut self, string: &str) -> Result<StringConstantIndex, Error> {
        let utf8 = self.get_utf8(string)?;
        self.intern(Constant::String(utf8)).map(StringConstantIndex)
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        self.intern(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    /// Get or insert a method type constant from the constant pool
    pub fn get_method_type(
        &mut self,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> Result<ConstantIndex, Error> {
        let descriptor = self.get_utf8(descriptor.render())?;
        self.intern(Constant::MethodType { descriptor })
    }

    /// Get or insert a bootstrap method, returning its index in the `BootstrapMethods` table
    pub fn get_bootstrap_method(
        &mut self,
        bootstrap: &Handle,
        arguments: &[ConstantData],
    ) -> Result<u16, Error> {
        let bootstrap_method = bootstrap.constant_index(self)?;
        let bootstrap_arguments = arguments
            .iter()
            .map(|argument| argument.constant_index(self))
            .collect::<Result<Vec<_>, _>>()?;
        let entry = BootstrapMethod {
            bootstrap_method,
            bootstrap_arguments,
        };

        if let Some(idx) = self.bootstrap_indices.get(&entry) {
            Ok(*idx)
        } else {
            let count = self.bootstrap_methods.len();
            if count >= u16::MAX as usize {
                return Err(Error::TooManyEntries {
                    table: "BootstrapMethods",
                    count: count + 1,
                });
            }
            let idx = count as u16;
            self.bootstrap_methods.push(entry.clone());
            self.bootstrap_indices.insert(entry, idx);
            Ok(idx)
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info).map_err(Error::IoError)?;

        Ok(Attribute { name_index, info })
    }

    fn malformed(index: impl Into<ConstantIndex>, expected: &str) -> Error {
        Error::MalformedClass(format!(
            "constant #{} is not a valid {}",
            index.into().0,
            expected
        ))
    }

    /// Read back a UTF8 constant
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index.0) {
            Some(Constant::Utf8(utf8)) => Ok(utf8),
            _ => Err(Self::malformed(index, "Utf8")),
        }
    }

    fn unqualified_name(&self, index: Utf8ConstantIndex) -> Result<UnqualifiedName, Error> {
        UnqualifiedName::from_str(self.utf8(index)?).map_err(Error::MalformedClass)
    }

    fn name_and_type(
        &self,
        index: NameAndTypeConstantIndex,
    ) -> Result<(UnqualifiedName, &str), Error> {
        match self.get(index.0) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Ok((self.unqualified_name(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(Self::malformed(index, "NameAndType")),
        }
    }

    /// Read back a class constant
    pub fn class(&self, index: ClassConstantIndex) -> Result<RefType<BinaryName>, Error> {
        match self.get(index.0) {
            Some(Constant::Class(name)) => RefType::from_class_info_name(self.utf8(*name)?)
                .map_err(|err| Error::MalformedClass(err.to_string())),
            _ => Err(Self::malformed(index, "Class")),
        }
    }

    /// Read back a class constant which must be a plain class (not an array)
    pub fn class_name(&self, index: ClassConstantIndex) -> Result<BinaryName, Error> {
        match self.class(index)? {
            RefType::Object(name) => Ok(name),
            _ => Err(Self::malformed(index, "non-array Class")),
        }
    }

    /// Read back a field reference constant
    pub fn field_ref(&self, index: FieldRefConstantIndex) -> Result<FieldRef, Error> {
        match self.get(index.0) {
            Some(Constant::FieldRef(class, name_and_type)) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(FieldRef {
                    class: self.class_name(*class)?,
                    name,
                    descriptor: FieldType::parse(descriptor)
                        .map_err(|err| Error::BadDescriptor(err.to_string()))?,
                })
            }
            _ => Err(Self::malformed(index, "Fieldref")),
        }
    }

    /// Read back a method reference constant
    pub fn method_ref(&self, index: MethodRefConstantIndex) -> Result<MethodRef, Error> {
        match self.get(index.0) {
            Some(Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            }) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MethodRef {
                    class: self.class(*class)?,
                    name,
                    descriptor: MethodDescriptor::parse(descriptor)
                        .map_err(|err| Error::BadDescriptor(err.to_string()))?,
                    is_interface: *is_interface,
                })
            }
            _ => Err(Self::malformed(index, "Methodref")),
        }
    }

    /// Read back a method handle constant
    pub fn handle(&self, index: ConstantIndex) -> Result<Handle, Error> {
        match self.get(index) {
            Some(Constant::MethodHandle {
                handle_kind,
                member,
            }) => {
                if handle_kind.is_field_access() {
                    let field = self.field_ref(FieldRefConstantIndex(*member))?;
                    Ok(Handle::Field(*handle_kind, field))
                } else {
                    let method = self.method_ref(MethodRefConstantIndex(*member))?;
                    Ok(Handle::Method(*handle_kind, method))
                }
            }
            _ => Err(Self::malformed(index, "MethodHandle")),
        }
    }

    fn bootstrap(&self, index: u16) -> Result<(Handle, Vec<ConstantData>), Error> {
        let entry = self
            .bootstrap_methods
            .get(index as usize)
            .ok_or_else(|| Error::MalformedClass(format!("no bootstrap method #{}", index)))?;
        let handle = self.handle(entry.bootstrap_method)?;
        let arguments = entry
            .bootstrap_arguments
            .iter()
            .map(|argument| self.constant_data(*argument))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((handle, arguments))
    }

    /// Read back a loadable constant
    pub fn constant_data(&self, index: ConstantIndex) -> Result<ConstantData, Error> {
        Ok(match self.get(index) {
            Some(Constant::Integer(integer)) => ConstantData::Integer(*integer),
            Some(Constant::Float(float)) => ConstantData::Float(*float),
            Some(Constant::Long(long)) => ConstantData::Long(*long),
            Some(Constant::Double(double)) => ConstantData::Double(*double),
            Some(Constant::String(utf8)) => ConstantData::String(self.utf8(*utf8)?.to_owned()),
            Some(Constant::Class(_)) => ConstantData::Class(self.class(ClassConstantIndex(index))?),
            Some(Constant::MethodType { descriptor }) => ConstantData::MethodType(
                MethodDescriptor::parse(self.utf8(*descriptor)?)
                    .map_err(|err| Error::BadDescriptor(err.to_string()))?,
            ),
            Some(Constant::MethodHandle { .. }) => ConstantData::MethodHandle(self.handle(index)?),
            Some(Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }) => {
                let (bootstrap, arguments) = self.bootstrap(*bootstrap_method)?;
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                ConstantData::Dynamic(Box::new(DynamicConstant {
                    bootstrap,
                    arguments,
                    name,
                    descriptor: FieldType::parse(descriptor)
                        .map_err(|err| Error::BadDescriptor(err.to_string()))?,
                }))
            }
            _ => return Err(Self::malformed(index, "loadable constant")),
        })
    }

    /// Read back an invoke dynamic constant
    pub fn call_site(&self, index: InvokeDynamicConstantIndex) -> Result<CallSite, Error> {
        match self.get(index.0) {
            Some(Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            }) => {
                let (bootstrap, arguments) = self.bootstrap(*bootstrap_method)?;
                let (name, descriptor) = self.name_and_type(*method_descriptor)?;
                Ok(CallSite {
                    bootstrap,
                    arguments,
                    name,
                    descriptor: MethodDescriptor::parse(descriptor)
                        .map_err(|err| Error::BadDescriptor(err.to_string()))?,
                })
            }
            _ => Err(Self::malformed(index, "InvokeDynamic")),
        }
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),

    Package(Utf8ConstantIndex),
}

/// Floats compare by their bit pattern, see [`ConstantData`]
impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        use Constant::*;
        match (self, other) {
            (Class(a), Class(b)) => a == b,
            (FieldRef(c1, n1), FieldRef(c2, n2)) => c1 == c2 && n1 == n2,
            (
                MethodRef {
                    class: c1,
                    name_and_type: n1,
                    is_interface: i1,
                },
                MethodRef {
                    class: c2,
                    name_and_type: n2,
                    is_interface: i2,
                },
            ) => c1 == c2 && n1 == n2 && i1 == i2,
            (String(a), String(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (
                NameAndType {
                    name: n1,
                    descriptor: d1,
                },
                NameAndType {
                    name: n2,
                    descriptor: d2,
                },
            ) => n1 == n2 && d1 == d2,
            (Utf8(a), Utf8(b)) => a == b,
            (
                MethodHandle {
                    handle_kind: k1,
                    member: m1,
                },
                MethodHandle {
                    handle_kind: k2,
                    member: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (MethodType { descriptor: a }, MethodType { descriptor: b }) => a == b,
            (
                Dynamic {
                    bootstrap_method: b1,
                    name_and_type: n1,
                },
                Dynamic {
                    bootstrap_method: b2,
                    name_and_type: n2,
                },
            ) => b1 == b2 && n1 == n2,
            (
                InvokeDynamic {
                    bootstrap_method: b1,
                    method_descriptor: n1,
                },
                InvokeDynamic {
                    bootstrap_method: b2,
                    method_descriptor: n2,
                },
            ) => b1 == b2 && n1 == n2,
            (Module(a), Module(b)) => a == b,
            (Package(a), Package(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Class(name) => name.hash(state),
            Constant::FieldRef(class, name_and_type) => (class, name_and_type).hash(state),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => (class, name_and_type, is_interface).hash(state),
            Constant::String(utf8) => utf8.hash(state),
            Constant::Integer(integer) => integer.hash(state),
            Constant::Float(float) => float.to_bits().hash(state),
            Constant::Long(long) => long.hash(state),
            Constant::Double(double) => double.to_bits().hash(state),
            Constant::NameAndType { name, descriptor } => (name, descriptor).hash(state),
            Constant::Utf8(utf8) => utf8.hash(state),
            Constant::MethodHandle {
                handle_kind,
                member,
            } => (handle_kind, member).hash(state),
            Constant::MethodType { descriptor } => descriptor.hash(state),
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => (bootstrap_method, name_and_type).hash(state),
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => (bootstrap_method, method_descriptor).hash(state),
            Constant::Module(name) => name.hash(state),
            Constant::Package(name) => name.hash(state),
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                if buffer.len() > u16::MAX as usize {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("UTF8 constant is {} bytes long", buffer.len()),
                    ));
                }
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// The count written is one more than the largest index (indexing starts at 1)
impl Serialize for OffsetVec<Constant> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.offset_len().0 as u16).serialize(writer)?;
        for (_, _, constant) in self {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x1F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Unpaired surrogates have no representation in a Rust string, so they are rejected.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        let continuation = |at: usize| -> Result<u16, String> {
            match bytes.get(at) {
                Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
                _ => Err(format!("bad continuation byte at {}", at)),
            }
        };
        if b0 & 0x80 == 0 && b0 != 0 {
            units.push(b0);
            i += 1;
        } else if b0 & 0b1110_0000 == 0b1100_0000 {
            units.push((b0 & 0x1F) << 6 | continuation(i + 1)?);
            i += 2;
        } else if b0 & 0b1111_0000 == 0b1110_0000 {
            units.push((b0 & 0x0F) << 12 | continuation(i + 1)? << 6 | continuation(i + 2)?);
            i += 3;
        } else {
            return Err(format!("bad leading byte 0x{:02x} at {}", b0, i));
        }
    }
    String::from_utf16(&units).map_err(|err| err.to_string())
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the spec:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

macro_rules! typed_constant_index {
    ($($(#[$meta:meta])* $name:ident,)*) => {
        $(
            $(#[$meta])*
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
            pub struct $name(pub ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(index: $name) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

typed_constant_index! {
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    /// Index of either a `Methodref` or an `InterfaceMethodref`
    MethodRefConstantIndex,
    InvokeDynamicConstantIndex,
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    /// Does the handle refer to a field (as opposed to a method)?
    pub fn is_field_access(&self) -> bool {
        matches!(
            self,
            HandleKind::GetField | HandleKind::GetStatic | HandleKind::PutField | HandleKind::PutStatic
        )
    }

    pub fn from_tag(tag: u8) -> Option<HandleKind> {
        Some(match tag {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

pub trait ConstantsWriter<Index = ConstantIndex> {
    /// Get or insert a constant into the constant pool and return the associated index
    fn constant_index(&self, constants_pool: &mut ConstantsPool) -> Result<Index, Error>;
}

/// When making a `CONSTANT_Class_info`, reference types are almost always objects. However,
/// there are a handful of places where an array type needs to be fit in (eg. for a `checkcast`
/// to an array type). See [this section of the spec][0] for more.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4.1
impl ConstantsWriter<ClassConstantIndex> for RefType<BinaryName> {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ClassConstantIndex, Error> {
        let name = constants.get_utf8(self.class_info_name())?;
        constants.intern(Constant::Class(name)).map(ClassConstantIndex)
    }
}

/// Write a `CONSTANT_Class_info`
impl ConstantsWriter<ClassConstantIndex> for BinaryName {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ClassConstantIndex, Error> {
        let name = constants.get_utf8(self.as_str())?;
        constants.intern(Constant::Class(name)).map(ClassConstantIndex)
    }
}

/// Write a `CONSTANT_Fieldref_info`
impl ConstantsWriter<FieldRefConstantIndex> for FieldRef {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<FieldRefConstantIndex, Error> {
        let class_idx = self.class.constant_index(constants)?;
        let field_utf8 = constants.get_utf8(self.name.as_str())?;
        let desc_utf8 = constants.get_utf8(self.descriptor.render())?;
        let name_and_type_idx = constants.get_name_and_type(field_utf8, desc_utf8)?;
        constants
            .intern(Constant::FieldRef(class_idx, name_and_type_idx))
            .map(FieldRefConstantIndex)
    }
}

/// Write a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
impl ConstantsWriter<MethodRefConstantIndex> for MethodRef {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class_idx = self.class.constant_index(constants)?;
        let method_utf8 = constants.get_utf8(self.name.as_str())?;
        let desc_utf8 = constants.get_utf8(self.descriptor.render())?;
        let name_and_type_idx = constants.get_name_and_type(method_utf8, desc_utf8)?;
        let constant = Constant::MethodRef {
            class: class_idx,
            name_and_type: name_and_type_idx,
            is_interface: self.is_interface,
        };
        constants.intern(constant).map(MethodRefConstantIndex)
    }
}

/// Write a `CONSTANT_MethodHandle_info`
impl ConstantsWriter<ConstantIndex> for Handle {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        let member: ConstantIndex = match self {
            Handle::Field(_, field) => field.constant_index(constants)?.into(),
            Handle::Method(_, method) => method.constant_index(constants)?.into(),
        };
        constants.intern(Constant::MethodHandle {
            handle_kind: self.kind(),
            member,
        })
    }
}

/// Write a `CONSTANT_InvokeDynamic_info`
impl ConstantsWriter<InvokeDynamicConstantIndex> for CallSite {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        let bootstrap_method = constants.get_bootstrap_method(&self.bootstrap, &self.arguments)?;
        let name_utf8 = constants.get_utf8(self.name.as_str())?;
        let desc_utf8 = constants.get_utf8(self.descriptor.render())?;
        let method_descriptor = constants.get_name_and_type(name_utf8, desc_utf8)?;
        constants
            .intern(Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            })
            .map(InvokeDynamicConstantIndex)
    }
}

/// Write a `CONSTANT_Dynamic_info`
impl ConstantsWriter<ConstantIndex> for DynamicConstant {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        let bootstrap_method = constants.get_bootstrap_method(&self.bootstrap, &self.arguments)?;
        let name_utf8 = constants.get_utf8(self.name.as_str())?;
        let desc_utf8 = constants.get_utf8(self.descriptor.render())?;
        let name_and_type = constants.get_name_and_type(name_utf8, desc_utf8)?;
        constants.intern(Constant::Dynamic {
            bootstrap_method,
            name_and_type,
        })
    }
}

/// Write a constant which can be loaded up using `ldc` or `ldc2_w`
impl ConstantsWriter<ConstantIndex> for ConstantData {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        match self {
            ConstantData::String(string) => Ok(constants.get_string(string)?.into()),
            ConstantData::Class(class) => Ok(class.constant_index(constants)?.into()),
            ConstantData::Integer(integer) => constants.intern(Constant::Integer(*integer)),
            ConstantData::Long(long) => constants.intern(Constant::Long(*long)),
            ConstantData::Float(float) => constants.intern(Constant::Float(*float)),
            ConstantData::Double(double) => constants.intern(Constant::Double(*double)),
            ConstantData::MethodHandle(handle) => handle.constant_index(constants),
            ConstantData::MethodType(method) => constants.get_method_type(method),
            ConstantData::Dynamic(dynamic) => dynamic.constant_index(constants),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut pool = ConstantsPool::new();
        let string = ConstantData::String(String::from("hello"));
        let first = string.constant_index(&mut pool).unwrap();
        let len_after_first = pool.constants().offset_len();
        let second = string.constant_index(&mut pool).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.constants().offset_len(), len_after_first);

        let field = FieldRef::new(
            BinaryName::from_str("me/Point").unwrap(),
            UnqualifiedName::from_str("x").unwrap(),
            FieldType::int(),
        );
        let field_first = field.constant_index(&mut pool).unwrap();
        let len_after_field = pool.constants().offset_len();
        assert_eq!(field.constant_index(&mut pool).unwrap(), field_first);
        assert_eq!(pool.constants().offset_len(), len_after_field);
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantsPool::new();
        let long = ConstantData::Long(1).constant_index(&mut pool).unwrap();
        let int = ConstantData::Integer(1).constant_index(&mut pool).unwrap();
        assert_eq!(long, ConstantIndex(1));
        assert_eq!(int, ConstantIndex(3));
        assert!(pool.get(ConstantIndex(2)).is_none());
    }

    #[test]
    fn float_constants_dedup_on_bits() {
        let mut pool = ConstantsPool::new();
        let pos = ConstantData::Float(0.0).constant_index(&mut pool).unwrap();
        let neg = ConstantData::Float(-0.0).constant_index(&mut pool).unwrap();
        let nan1 = ConstantData::Double(f64::NAN).constant_index(&mut pool).unwrap();
        let nan2 = ConstantData::Double(f64::NAN).constant_index(&mut pool).unwrap();
        assert_ne!(pos, neg);
        assert_eq!(nan1, nan2);
    }

    #[test]
    fn adopted_pool_keeps_indices_and_first_occurrence() {
        let mut constants = OffsetVec::new_starting_at(Offset(1));
        constants.push(Constant::Utf8(String::from("a")));
        constants.push(Constant::Utf8(String::from("a")));
        constants.push(Constant::Long(5));
        constants.push(Constant::Integer(7));
        let mut pool = ConstantsPool::from_constants(constants, vec![]);

        assert_eq!(
            pool.get_utf8("a").unwrap(),
            Utf8ConstantIndex(ConstantIndex(1))
        );
        assert_eq!(
            ConstantData::Integer(7).constant_index(&mut pool).unwrap(),
            ConstantIndex(5)
        );
        assert_eq!(
            ConstantData::Integer(8).constant_index(&mut pool).unwrap(),
            ConstantIndex(6)
        );
    }

    #[test]
    fn pool_overflow_is_reported() {
        let mut pool = ConstantsPool::new();
        for i in 0..(u16::MAX as i32 - 1) {
            ConstantData::Integer(i).constant_index(&mut pool).unwrap();
        }
        assert!(matches!(
            ConstantData::Long(0).constant_index(&mut pool),
            Err(Error::ConstantPoolOverflow { .. })
        ));
        assert!(matches!(
            ConstantData::Integer(-1).constant_index(&mut pool),
            Err(Error::ConstantPoolOverflow { .. })
        ));
    }

    #[test]
    fn bootstrap_methods_are_shared() {
        let mut pool = ConstantsPool::new();
        let bootstrap = Handle::Method(
            HandleKind::InvokeStatic,
            MethodRef::new(
                BinaryName::from_str("me/Bootstraps").unwrap(),
                UnqualifiedName::from_str("bsm").unwrap(),
                MethodDescriptor {
                    parameters: vec![],
                    return_type: Some(FieldType::object(BinaryName::OBJECT)),
                },
            ),
        );
        let call_site = |name: &str| CallSite {
            bootstrap: bootstrap.clone(),
            arguments: vec![ConstantData::Integer(1)],
            name: UnqualifiedName::from_str(name).unwrap(),
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        };
        let first = call_site("a").constant_index(&mut pool).unwrap();
        let second = call_site("b").constant_index(&mut pool).unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.bootstrap_methods().len(), 1);

        assert_eq!(pool.call_site(first).unwrap(), call_site("a"));
    }

    #[test]
    fn symbols_read_back() {
        let mut pool = ConstantsPool::new();
        let method = MethodRef::interface(
            BinaryName::from_str("java/util/List").unwrap(),
            UnqualifiedName::from_str("size").unwrap(),
            MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::int()),
            },
        );
        let idx = method.constant_index(&mut pool).unwrap();
        assert_eq!(pool.method_ref(idx).unwrap(), method);

        let array = RefType::array(FieldType::object(BinaryName::STRING));
        let class_idx = array.constant_index(&mut pool).unwrap();
        assert_eq!(pool.class(class_idx).unwrap(), array);
        assert!(pool.class_name(class_idx).is_err());
    }
}

#[cfg(test)]
mod encode_modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
    }

    #[test]
    fn supplementary_characters() {
        assert_eq!(
            encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}"),
            vec![
                237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237,
                191, 191
            ]
        );
    }

    #[test]
    fn decoding_inverts_encoding() {
        for text in ["", "a\x00a", "ĄǍǞǠǺȀ", "ऄअॲঅ", "\u{10000}x\u{10FFFF}"] {
            assert_eq!(decode_modified_utf8(&encode_modified_utf8(text)).unwrap(), text);
        }
    }

    #[test]
    fn decoding_rejects_unpaired_surrogates() {
        assert!(decode_modified_utf8(&[237, 160, 128]).is_err());
        assert!(decode_modified_utf8(&[0xC0]).is_err());
    }
}
