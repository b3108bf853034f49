use super::class_file::{
    Attribute, AttributeLike, BootstrapMethods, ClassConstantIndex, ClassFile, ConstantsPool,
    ConstantsWriter, Field, Method, Signature, Version,
};
use super::class_graph::ClassHierarchy;
use super::code::CodeBuilder;
use super::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, RenderDescriptor, UnqualifiedName,
};

/// What gets computed automatically when method bodies are finished
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComputeMode {
    /// Max stack and locals come from [`CodeBuilder::set_max_stack_and_locals`], no frames
    Nothing,

    /// Max stack and locals are computed, but no `StackMapTable` is emitted
    MaxStackAndLocals,

    /// Full stack map frames are computed, along with max stack and locals
    Frames,
}

pub struct ClassBuilder<'h> {
    /// Class file version
    pub version: Version,

    /// Class access flags
    pub access_flags: ClassAccessFlags,

    /// Class name
    pub this_class: BinaryName,

    /// Class name constant
    this_class_index: ClassConstantIndex,

    /// Superclass name constant
    super_class_index: Option<ClassConstantIndex>,

    /// Implemented interfaces constants
    interfaces: Vec<ClassConstantIndex>,

    /// Constants pool
    pub constants_pool: ConstantsPool,

    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    attributes: Vec<Attribute>,

    pub mode: ComputeMode,

    /// Resolves common superclasses when merging frames
    pub hierarchy: &'h dyn ClassHierarchy,
}

impl<'h> ClassBuilder<'h> {
    /// Create a new class builder with a fresh constant pool
    pub fn new(
        version: Version,
        access_flags: ClassAccessFlags,
        this_class: BinaryName,
        super_class: Option<BinaryName>,
        interfaces: Vec<BinaryName>,
        mode: ComputeMode,
        hierarchy: &'h dyn ClassHierarchy,
    ) -> Result<ClassBuilder<'h>, Error> {
        let mut constants_pool = ConstantsPool::new();
        let this_class_index = this_class.constant_index(&mut constants_pool)?;
        let super_class_index = super_class
            .map(|super_class| super_class.constant_index(&mut constants_pool))
            .transpose()?;
        let interfaces = interfaces
            .iter()
            .map(|interface| interface.constant_index(&mut constants_pool))
            .collect::<Result<_, _>>()?;

        Ok(ClassBuilder {
            version,
            access_flags,
            this_class,
            this_class_index,
            super_class_index,
            interfaces,
            constants_pool,
            fields: vec![],
            methods: vec![],
            attributes: vec![],
            mode,
            hierarchy,
        })
    }

    /// Create a class builder which extends an existing constant pool
    ///
    /// Class names are given as indices into that pool, and every existing constant keeps its
    /// index.
    #[allow(clippy::too_many_arguments)]
    pub fn from_pool(
        constants_pool: ConstantsPool,
        version: Version,
        access_flags: ClassAccessFlags,
        this_class_index: ClassConstantIndex,
        super_class_index: Option<ClassConstantIndex>,
        interfaces: Vec<ClassConstantIndex>,
        mode: ComputeMode,
        hierarchy: &'h dyn ClassHierarchy,
    ) -> Result<ClassBuilder<'h>, Error> {
        let this_class = constants_pool.class_name(this_class_index)?;
        Ok(ClassBuilder {
            version,
            access_flags,
            this_class,
            this_class_index,
            super_class_index,
            interfaces,
            constants_pool,
            fields: vec![],
            methods: vec![],
            attributes: vec![],
            mode,
            hierarchy,
        })
    }

    /// Compute mode actually used for methods
    ///
    /// Class files older than Java 6 have no `StackMapTable`, so frames are never computed for
    /// them (but max stack and locals still are).
    pub fn effective_mode(&self) -> ComputeMode {
        match self.mode {
            ComputeMode::Frames if !self.version.has_stack_map_frames() => {
                ComputeMode::MaxStackAndLocals
            }
            mode => mode,
        }
    }

    /// Add an attribute to the class
    pub fn add_attribute(&mut self, attribute: impl AttributeLike) -> Result<(), Error> {
        let attribute = self.constants_pool.get_attribute(attribute)?;
        self.attributes.push(attribute);
        Ok(())
    }

    /// Add an already encoded attribute to the class
    pub fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Add a field to the class
    pub fn add_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &UnqualifiedName,
        descriptor: &FieldType<BinaryName>,
        signature: Option<&str>,
    ) -> Result<(), Error> {
        let name_index = self.constants_pool.get_utf8(name.as_str())?;
        let descriptor_index = self.constants_pool.get_utf8(descriptor.render())?;
        let mut attributes: Vec<Attribute> = vec![];

        // Add the optional generic `Signature` attribute
        if let Some(generic_sig) = signature {
            let signature = self.constants_pool.get_utf8(generic_sig)?;
            attributes.push(self.constants_pool.get_attribute(Signature { signature })?);
        }

        self.push_field(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    /// Add an already encoded field
    pub fn push_field(&mut self, field: Field) -> Result<(), Error> {
        check_count("fields", self.fields.len() + 1)?;
        self.fields.push(field);
        Ok(())
    }

    /// Start building the body of a method
    ///
    /// The method is added to the class once [`CodeBuilder::finish`] is called.
    pub fn start_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> CodeBuilder<'_, 'h> {
        CodeBuilder::new(self, access_flags, name, descriptor)
    }

    /// Add a method without any code (eg. `abstract` or `native` methods)
    pub fn add_method_without_code(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
        attributes: Vec<Attribute>,
    ) -> Result<(), Error> {
        let name_index = self.constants_pool.get_utf8(name.as_str())?;
        let descriptor_index = self.constants_pool.get_utf8(descriptor.render())?;
        self.push_method(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    /// Add an already encoded method
    pub fn push_method(&mut self, method: Method) -> Result<(), Error> {
        check_count("methods", self.methods.len() + 1)?;
        self.methods.push(method);
        Ok(())
    }

    /// Consume the builder and return the final class file
    ///
    /// Bootstrap methods referenced from the constant pool are added as the last attribute.
    pub fn finish(mut self) -> Result<ClassFile, Error> {
        if !self.constants_pool.bootstrap_methods().is_empty() {
            let bootstrap_methods = BootstrapMethods(self.constants_pool.bootstrap_methods().to_vec());
            self.add_attribute(bootstrap_methods)?;
        }
        check_count("interfaces", self.interfaces.len())?;
        check_count("class attributes", self.attributes.len())?;

        let (constants, _) = self.constants_pool.into_parts();
        log::debug!(
            "class {}: {} constants, {} fields, {} methods",
            self.this_class.as_str(),
            constants.len(),
            self.fields.len(),
            self.methods.len()
        );

        Ok(ClassFile {
            version: self.version,
            constants,
            access_flags: self.access_flags,
            this_class: self.this_class_index,
            super_class: self.super_class_index,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        })
    }
}

fn check_count(table: &'static str, count: usize) -> Result<(), Error> {
    if count > u16::MAX as usize {
        Err(Error::TooManyEntries { table, count })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{Constant, Serialize};
    use crate::jvm::class_graph::ObjectHierarchy;
    use crate::jvm::code::{BranchInstruction::*, Instruction::*, InvokeType};
    use crate::jvm::MethodRef;

    #[test]
    fn sample_class() -> Result<(), Error> {
        let mut class_builder = ClassBuilder::new(
            Version::JAVA11,
            ClassAccessFlags::PUBLIC,
            BinaryName::from_str("me/alec/Point").unwrap(),
            Some(BinaryName::OBJECT),
            vec![],
            ComputeMode::Frames,
            &ObjectHierarchy,
        )?;

        class_builder.add_field(
            FieldAccessFlags::PUBLIC,
            &UnqualifiedName::from_str("x").unwrap(),
            &FieldType::int(),
            None,
        )?;

        let mut code = class_builder.start_method(
            MethodAccessFlags::PUBLIC,
            UnqualifiedName::INIT,
            MethodDescriptor {
                parameters: vec![FieldType::int()],
                return_type: None,
            },
        );
        code.push_instruction(ALoad(0))?;
        code.push_instruction(Invoke(
            InvokeType::Special,
            MethodRef::new(
                BinaryName::OBJECT,
                UnqualifiedName::INIT,
                MethodDescriptor {
                    parameters: vec![],
                    return_type: None,
                },
            ),
        ))?;
        code.push_branch_instruction(Return)?;
        code.finish()?;

        let class_file = class_builder.finish()?;
        assert_eq!(class_file.methods.len(), 1);
        assert_eq!(class_file.fields.len(), 1);

        let mut bytes = vec![];
        class_file.serialize(&mut bytes)?;
        assert_eq!(&bytes[0..4], &ClassFile::MAGIC);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 55]);
        Ok(())
    }

    #[test]
    fn old_versions_skip_frames() {
        let mut class_builder = ClassBuilder::new(
            Version::JAVA5,
            ClassAccessFlags::PUBLIC,
            BinaryName::from_str("Old").unwrap(),
            Some(BinaryName::OBJECT),
            vec![],
            ComputeMode::Frames,
            &ObjectHierarchy,
        )
        .unwrap();
        assert_eq!(class_builder.effective_mode(), ComputeMode::MaxStackAndLocals);

        let mut code = class_builder.start_method(
            MethodAccessFlags::STATIC,
            UnqualifiedName::from_str("f").unwrap(),
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
        let target = code.fresh_label();
        code.push_branch_instruction(Goto(target)).unwrap();
        code.place_label(target).unwrap();
        code.push_branch_instruction(Return).unwrap();
        code.finish().unwrap();

        let class_file = class_builder.finish().unwrap();
        let stack_map_table = class_file
            .constants
            .iter()
            .any(|(_, _, constant)| matches!(constant, Constant::Utf8(s) if s == "StackMapTable"));
        assert!(!stack_map_table);
    }
}
