use crate::jvm::class_file::{
    decode_modified_utf8, Attribute, AttributeLike, BootstrapMethod, BootstrapMethods,
    ClassConstantIndex, ClassFile, Code, Constant, ConstantIndex, ConstantsPool, Field,
    HandleKind, Member, Method, NameAndTypeConstantIndex, Utf8ConstantIndex, Version,
};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::code::DecodedCode;
use crate::jvm::{
    ClassAccessFlags, ClassBuilder, ComputeMode, Error, FieldAccessFlags, MethodAccessFlags,
    MethodDescriptor, Name, ParseDescriptor, RenderDescriptor, UnqualifiedName,
};
use crate::util::{Offset, OffsetVec};
use byteorder::{BigEndian, ByteOrder};

/// Cursor over big-endian class file data
///
/// Running out of bytes is reported as a malformed class.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteReader<'a> {
        ByteReader { bytes, position: 0 }
    }

    /// Number of bytes read so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position >= self.bytes.len()
    }

    pub fn bytes(&mut self, length: usize) -> Result<&'a [u8], Error> {
        let end = self
            .position
            .checked_add(length)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                Error::MalformedClass(format!(
                    "unexpected end of data reading {} bytes at {}",
                    length, self.position
                ))
            })?;
        let bytes = &self.bytes[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Skip to the next multiple of `alignment`, returning how many bytes were skipped
    pub fn align(&mut self, alignment: usize) -> Result<u8, Error> {
        let padding = (alignment - self.position % alignment) % alignment;
        self.bytes(padding)?;
        Ok(padding as u8)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, Error> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16, Error> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    pub fn i16(&mut self) -> Result<i16, Error> {
        Ok(BigEndian::read_i16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, Error> {
        Ok(BigEndian::read_u32(self.bytes(4)?))
    }

    pub fn i32(&mut self) -> Result<i32, Error> {
        Ok(BigEndian::read_i32(self.bytes(4)?))
    }

    pub fn i64(&mut self) -> Result<i64, Error> {
        Ok(BigEndian::read_i64(self.bytes(8)?))
    }

    fn utf8_index(&mut self) -> Result<Utf8ConstantIndex, Error> {
        Ok(Utf8ConstantIndex(ConstantIndex(self.u16()?)))
    }

    fn class_index(&mut self) -> Result<ClassConstantIndex, Error> {
        Ok(ClassConstantIndex(ConstantIndex(self.u16()?)))
    }

    fn name_and_type_index(&mut self) -> Result<NameAndTypeConstantIndex, Error> {
        Ok(NameAndTypeConstantIndex(ConstantIndex(self.u16()?)))
    }
}

/// Class file decoded into its constant pool and raw members
///
/// Fields, methods, and attributes are left encoded. The `BootstrapMethods` attribute is the one
/// exception: since it is scoped to the constant pool, it gets pulled out into
/// [`ClassReader::bootstrap_methods`].
#[derive(Debug)]
pub struct ClassReader {
    pub version: Version,
    pub constants: OffsetVec<Constant>,
    pub bootstrap_methods: Vec<BootstrapMethod>,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassReader {
    /// Decode a class file
    pub fn parse(bytes: &[u8]) -> Result<ClassReader, Error> {
        let mut reader = ByteReader::new(bytes);
        if reader.bytes(4)? != &ClassFile::MAGIC[..] {
            return Err(Error::MalformedClass(String::from("bad magic number")));
        }
        let minor_version = reader.u16()?;
        let major_version = reader.u16()?;
        let version = Version {
            major_version,
            minor_version,
        };

        let constants = parse_constants(&mut reader)?;
        let access_flags = ClassAccessFlags::from_bits_truncate(reader.u16()?);
        let this_class = reader.class_index()?;
        let super_class = match reader.u16()? {
            0 => None,
            idx => Some(ClassConstantIndex(ConstantIndex(idx))),
        };
        let interfaces = (0..reader.u16()?)
            .map(|_| reader.class_index())
            .collect::<Result<Vec<_>, _>>()?;

        let fields = (0..reader.u16()?)
            .map(|_| parse_member(&mut reader, FieldAccessFlags::from_bits_truncate))
            .collect::<Result<Vec<_>, _>>()?;
        let methods = (0..reader.u16()?)
            .map(|_| parse_member(&mut reader, MethodAccessFlags::from_bits_truncate))
            .collect::<Result<Vec<_>, _>>()?;
        let mut attributes = parse_attributes(&mut reader)?;
        if !reader.is_empty() {
            log::warn!("ignoring {} trailing bytes", bytes.len() - reader.position());
        }

        let mut bootstrap_methods = vec![];
        let mut bootstrap_attribute = None;
        for (i, attribute) in attributes.iter().enumerate() {
            if attribute_name(&constants, attribute)? == BootstrapMethods::NAME {
                bootstrap_methods = parse_bootstrap_methods(&attribute.info)?;
                bootstrap_attribute = Some(i);
            }
        }
        if let Some(i) = bootstrap_attribute {
            attributes.remove(i);
        }

        Ok(ClassReader {
            version,
            constants,
            bootstrap_methods,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Re-emit the class, rebuilding every method body through a [`ClassBuilder`]
    ///
    /// Constant pool indices are preserved. Each `Code` attribute is decoded and replayed, so
    /// that max stack, max locals, and stack map frames get recomputed according to `mode`.
    /// Everything else (fields, non-code attributes) is copied over as is.
    pub fn replay(
        self,
        mode: ComputeMode,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<ClassFile, Error> {
        let constants_pool = ConstantsPool::from_constants(self.constants, self.bootstrap_methods);
        let mut class = ClassBuilder::from_pool(
            constants_pool,
            self.version,
            self.access_flags,
            self.this_class,
            self.super_class,
            self.interfaces,
            mode,
            hierarchy,
        )?;

        for field in self.fields {
            class.push_field(field)?;
        }

        for method in self.methods {
            let mut code_attribute = None;
            let mut other_attributes = vec![];
            for attribute in method.attributes {
                let name = class.constants_pool.utf8(attribute.name_index)?;
                if name == Code::NAME && code_attribute.is_none() {
                    code_attribute = Some(attribute);
                } else {
                    other_attributes.push(attribute);
                }
            }

            let code_attribute = match code_attribute {
                None => {
                    class.push_method(Method {
                        attributes: other_attributes,
                        ..method
                    })?;
                    continue;
                }
                Some(code_attribute) => code_attribute,
            };

            let name = class.constants_pool.utf8(method.name_index)?;
            let name = UnqualifiedName::from_str(name).map_err(Error::MalformedClass)?;
            let descriptor = class.constants_pool.utf8(method.descriptor_index)?;
            let descriptor = MethodDescriptor::parse(descriptor)
                .map_err(|err| Error::BadDescriptor(err.to_string()))?;
            let method_name = format!("{}{}", name.as_str(), descriptor.render());
            let decoded = DecodedCode::parse(&code_attribute.info, &class.constants_pool)
                .map_err(|err| err.in_method(method_name.clone()))?;

            let mut code = class.start_method(method.access_flags, name, descriptor);
            decoded
                .replay(&mut code)
                .map_err(|err| err.in_method(method_name))?;
            for attribute in other_attributes {
                code.push_attribute(attribute);
            }
            code.finish()?;
        }

        for attribute in self.attributes {
            class.push_attribute(attribute);
        }
        class.finish()
    }
}

fn attribute_name<'a>(
    constants: &'a OffsetVec<Constant>,
    attribute: &Attribute,
) -> Result<&'a str, Error> {
    match constants.get_offset(Offset((attribute.name_index.0).0 as usize)) {
        Some(Constant::Utf8(name)) => Ok(name),
        _ => Err(Error::MalformedClass(format!(
            "attribute name #{} is not a Utf8 constant",
            (attribute.name_index.0).0
        ))),
    }
}

fn parse_constants(reader: &mut ByteReader<'_>) -> Result<OffsetVec<Constant>, Error> {
    let count = reader.u16()? as usize;
    let mut constants = OffsetVec::new_starting_at(Offset(1));
    while constants.offset_len().0 < count {
        let offset = reader.position();
        let constant = match reader.u8()? {
            1 => {
                let length = reader.u16()? as usize;
                let utf8 = decode_modified_utf8(reader.bytes(length)?).map_err(|err| {
                    Error::MalformedClass(format!("bad Utf8 constant at {}: {}", offset, err))
                })?;
                Constant::Utf8(utf8)
            }
            3 => Constant::Integer(reader.i32()?),
            4 => Constant::Float(f32::from_bits(reader.u32()?)),
            5 => Constant::Long(reader.i64()?),
            6 => Constant::Double(f64::from_bits(reader.i64()? as u64)),
            7 => Constant::Class(reader.utf8_index()?),
            8 => Constant::String(reader.utf8_index()?),
            9 => Constant::FieldRef(reader.class_index()?, reader.name_and_type_index()?),
            tag @ 10 | tag @ 11 => Constant::MethodRef {
                class: reader.class_index()?,
                name_and_type: reader.name_and_type_index()?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: reader.utf8_index()?,
                descriptor: reader.utf8_index()?,
            },
            15 => {
                let tag = reader.u8()?;
                let handle_kind = HandleKind::from_tag(tag).ok_or_else(|| {
                    Error::MalformedClass(format!("bad method handle kind {} at {}", tag, offset))
                })?;
                Constant::MethodHandle {
                    handle_kind,
                    member: ConstantIndex(reader.u16()?),
                }
            }
            16 => Constant::MethodType {
                descriptor: reader.utf8_index()?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: reader.u16()?,
                name_and_type: reader.name_and_type_index()?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: reader.u16()?,
                method_descriptor: reader.name_and_type_index()?,
            },
            19 => Constant::Module(reader.utf8_index()?),
            20 => Constant::Package(reader.utf8_index()?),
            tag => {
                return Err(Error::MalformedClass(format!(
                    "unknown constant tag {} at {}",
                    tag, offset
                )))
            }
        };
        constants.push(constant);
    }
    if constants.offset_len().0 != count {
        return Err(Error::MalformedClass(String::from(
            "last constant overruns the constant pool count",
        )));
    }
    Ok(constants)
}

fn parse_attributes(reader: &mut ByteReader<'_>) -> Result<Vec<Attribute>, Error> {
    (0..reader.u16()?)
        .map(|_| {
            let name_index = reader.utf8_index()?;
            let length = reader.u32()? as usize;
            let info = reader.bytes(length)?.to_vec();
            Ok(Attribute { name_index, info })
        })
        .collect()
}

fn parse_member<Flags>(
    reader: &mut ByteReader<'_>,
    flags: impl Fn(u16) -> Flags,
) -> Result<Member<Flags>, Error> {
    Ok(Member {
        access_flags: flags(reader.u16()?),
        name_index: reader.utf8_index()?,
        descriptor_index: reader.utf8_index()?,
        attributes: parse_attributes(reader)?,
    })
}

fn parse_bootstrap_methods(info: &[u8]) -> Result<Vec<BootstrapMethod>, Error> {
    let mut reader = ByteReader::new(info);
    (0..reader.u16()?)
        .map(|_| {
            let bootstrap_method = ConstantIndex(reader.u16()?);
            let bootstrap_arguments = (0..reader.u16()?)
                .map(|_| Ok(ConstantIndex(reader.u16()?)))
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(BootstrapMethod {
                bootstrap_method,
                bootstrap_arguments,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Serialize;
    use crate::jvm::class_graph::ObjectHierarchy;
    use crate::jvm::code::BranchInstruction;
    use crate::jvm::{BinaryName, FieldType};

    fn sample_class() -> ClassFile {
        let mut class = ClassBuilder::new(
            Version::JAVA8,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            BinaryName::from_str("sample/Sample").unwrap(),
            Some(BinaryName::OBJECT),
            vec![],
            ComputeMode::Frames,
            &ObjectHierarchy,
        )
        .unwrap();
        class
            .add_field(
                FieldAccessFlags::PRIVATE,
                &UnqualifiedName::from_str("count").unwrap(),
                &FieldType::long(),
                None,
            )
            .unwrap();
        let mut code = class.start_method(
            MethodAccessFlags::STATIC,
            UnqualifiedName::from_str("nothing").unwrap(),
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
        code.push_branch_instruction(BranchInstruction::Return).unwrap();
        code.finish().unwrap();
        class.finish().unwrap()
    }

    #[test]
    fn reads_back_structure() {
        let bytes = sample_class().to_bytes().unwrap();
        let reader = ClassReader::parse(&bytes).unwrap();
        assert_eq!(reader.version, Version::JAVA8);
        assert_eq!(
            reader.access_flags,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER
        );
        assert_eq!(reader.fields.len(), 1);
        assert_eq!(reader.methods.len(), 1);
        assert!(reader.bootstrap_methods.is_empty());

        let mut reserialized = vec![];
        reader.constants.serialize(&mut reserialized).unwrap();
        let mut original = vec![];
        sample_class().constants.serialize(&mut original).unwrap();
        assert_eq!(reserialized, original);
    }

    #[test]
    fn replay_is_identity() {
        let bytes = sample_class().to_bytes().unwrap();
        let replayed = ClassReader::parse(&bytes)
            .unwrap()
            .replay(ComputeMode::Frames, &ObjectHierarchy)
            .unwrap();
        assert_eq!(replayed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            ClassReader::parse(&[0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 52]),
            Err(Error::MalformedClass(_))
        ));
        assert!(matches!(
            ClassReader::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]),
            Err(Error::MalformedClass(_))
        ));
    }

    #[test]
    fn byte_reader_alignment() {
        let mut reader = ByteReader::new(&[0xaa, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(reader.u8().unwrap(), 0xaa);
        assert_eq!(reader.align(4).unwrap(), 3);
        assert_eq!(reader.i32().unwrap(), 7);
        assert!(reader.is_empty());
        assert!(reader.u8().is_err());
    }
}
