use super::{ElementType, ObjectType, TypeHandle, VType, VerificationType};
use crate::jvm::class_file::{ClassConstantIndex, ConstantsPool, ConstantsWriter};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::code::BlockId;
use crate::jvm::{ArrayType, BinaryName, Error, FieldType, RefType};
use crate::util::Offset;
use std::collections::HashMap;

/// Entry in a [`TypeTable`]
#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub enum TypeEntry {
    /// Class or interface
    Object(BinaryName),

    /// Result of a `new` instruction, before its constructor has been called
    Uninitialized {
        /// Class that will be there once it is initialized
        class: BinaryName,

        /// Block containing the `new` instruction
        block: BlockId,

        /// Offset of the `new` instruction from the start of its block
        offset_in_block: usize,
    },
}

/// Interns the classes and uninitialized values that appear in frames of one method
///
/// Verification types refer to table entries by [`TypeHandle`], which keeps them small and
/// `Copy`. The table also caches the results of common superclass queries.
#[derive(Default, Debug)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
    lookup: HashMap<TypeEntry, TypeHandle>,
    merged: HashMap<(TypeHandle, TypeHandle), TypeHandle>,
}

impl TypeTable {
    pub fn new() -> TypeTable {
        TypeTable::default()
    }

    fn intern(&mut self, entry: TypeEntry) -> TypeHandle {
        if let Some(handle) = self.lookup.get(&entry) {
            return *handle;
        }
        let handle = TypeHandle(self.entries.len() as u32);
        self.entries.push(entry.clone());
        self.lookup.insert(entry, handle);
        handle
    }

    pub fn get(&self, handle: TypeHandle) -> &TypeEntry {
        &self.entries[handle.0 as usize]
    }

    /// Number of interned entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handle for a class
    pub fn object(&mut self, class: BinaryName) -> TypeHandle {
        self.intern(TypeEntry::Object(class))
    }

    /// Handle for the value produced by a `new` instruction
    pub fn uninitialized(
        &mut self,
        class: BinaryName,
        block: BlockId,
        offset_in_block: usize,
    ) -> TypeHandle {
        self.intern(TypeEntry::Uninitialized {
            class,
            block,
            offset_in_block,
        })
    }

    /// Class of an entry (for uninitialized values, the class they'll have once initialized)
    pub fn class_name(&self, handle: TypeHandle) -> &BinaryName {
        match self.get(handle) {
            TypeEntry::Object(class) => class,
            TypeEntry::Uninitialized { class, .. } => class,
        }
    }

    pub fn object_type(&mut self, ref_type: &RefType<BinaryName>) -> ObjectType {
        match ref_type {
            RefType::Object(class) => ObjectType::class(self.object(class.clone())),
            RefType::ObjectArray(arr) => ObjectType {
                dimensions: arr.dimensions() as u8,
                element: ElementType::Class(self.object(arr.element_type.clone())),
            },
            RefType::PrimitiveArray(arr) => ObjectType {
                dimensions: arr.dimensions() as u8,
                element: ElementType::Base(arr.element_type),
            },
        }
    }

    /// Verification type of a value with the given field type
    pub fn field_type(&mut self, field_type: &FieldType<BinaryName>) -> VType {
        match field_type {
            FieldType::Base(base) => VType::from_base_type(*base),
            FieldType::Ref(ref_type) => VerificationType::Object(self.object_type(ref_type)),
        }
    }

    /// Inverse of [`TypeTable::object_type`]
    pub fn ref_type(&self, object: &ObjectType) -> RefType<BinaryName> {
        match (object.dimensions, object.element) {
            (0, ElementType::Class(handle)) => RefType::Object(self.class_name(handle).clone()),

            // Primitive elements always have at least one dimension
            (0, ElementType::Base(_)) => RefType::Object(BinaryName::OBJECT),

            (dimensions, ElementType::Class(handle)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: dimensions as usize - 1,
                element_type: self.class_name(handle).clone(),
            }),
            (dimensions, ElementType::Base(element_type)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: dimensions as usize - 1,
                element_type,
            }),
        }
    }

    /// Most specific common superclass of two classes, asking the hierarchy only on a cache miss
    fn common_superclass(
        &mut self,
        class1: TypeHandle,
        class2: TypeHandle,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<TypeHandle, Error> {
        if class1 == class2 {
            return Ok(class1);
        }
        let key = (class1.min(class2), class1.max(class2));
        if let Some(merged) = self.merged.get(&key) {
            return Ok(*merged);
        }
        let name1 = self.class_name(key.0).clone();
        let name2 = self.class_name(key.1).clone();
        let merged_name = hierarchy.common_superclass(&name1, &name2)?;
        let merged = self.object(merged_name);
        self.merged.insert(key, merged);
        Ok(merged)
    }

    /// Merge two object types (see [`VType::merge`])
    pub(super) fn merge_objects(
        &mut self,
        obj1: ObjectType,
        obj2: ObjectType,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<ObjectType, Error> {
        if obj1 == obj2 {
            return Ok(obj1);
        }

        if obj1.dimensions == obj2.dimensions {
            match (obj1.element, obj2.element) {
                (ElementType::Class(cls1), ElementType::Class(cls2)) => {
                    let element = self.common_superclass(cls1, cls2, hierarchy)?;
                    return Ok(ObjectType {
                        dimensions: obj1.dimensions,
                        element: ElementType::Class(element),
                    });
                }

                // Different primitive arrays: `int[][]` and `float[][]` share `Object[]`
                (ElementType::Base(_), ElementType::Base(_)) => {
                    return Ok(ObjectType {
                        dimensions: obj1.dimensions - 1,
                        element: ElementType::Class(self.object(BinaryName::OBJECT)),
                    });
                }
                _ => (),
            }
        }

        // A primitive array is an object array with one fewer dimension
        let object_dimensions = |obj: &ObjectType| match obj.element {
            ElementType::Base(_) => obj.dimensions.saturating_sub(1),
            ElementType::Class(_) => obj.dimensions,
        };
        Ok(ObjectType {
            dimensions: object_dimensions(&obj1).min(object_dimensions(&obj2)),
            element: ElementType::Class(self.object(BinaryName::OBJECT)),
        })
    }

    /// Resolve a type into its serializable form
    ///
    /// Uninitialized values are located using the final offsets of the blocks.
    pub fn serializable(
        &self,
        vtype: &VType,
        constants_pool: &mut ConstantsPool,
        block_offsets: &[Offset],
    ) -> Result<VerificationType<ClassConstantIndex, u16>, Error> {
        Ok(match vtype {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(object) => {
                let class_index = self.ref_type(object).constant_index(constants_pool)?;
                VerificationType::Object(class_index)
            }
            VerificationType::Uninitialized(handle) => match self.get(*handle) {
                TypeEntry::Uninitialized {
                    block,
                    offset_in_block,
                    ..
                } => {
                    let absolute_offset = block_offsets[block.0].0 + offset_in_block;
                    VerificationType::Uninitialized(absolute_offset as u16)
                }
                TypeEntry::Object(class) => {
                    let msg = format!("{} is not an uninitialized value", class);
                    return Err(Error::MalformedClass(msg));
                }
            },
        })
    }
}
