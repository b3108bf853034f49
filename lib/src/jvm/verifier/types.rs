use super::TypeTable;
use crate::jvm::class_file::{ClassConstantIndex, Serialize};
use crate::jvm::BaseType;
use crate::util::Width;
use byteorder::WriteBytesExt;

/// These types are from [this hierarchy][0], with `Top` standing for unusable slots
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Slot whose value can't be used (unassigned, conflicting, or the second half of a `long`
    /// or `double`)
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not been called
    ///
    ///   - while computing frames, we use [`TypeHandle`] for `U`, pointing at the `new`
    ///     instruction by block and offset within that block
    ///   - when serializing into a classfile, we use `u16` for `U`, corresponding to the offset of
    ///     the `new` instruction from the start of the method body
    Uninitialized(U),
}

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    pub fn map<C2, U2>(
        &self,
        map_class: impl Fn(&Cls) -> C2,
        map_uninitialized: impl Fn(&U) -> U2,
    ) -> VerificationType<C2, U2> {
        match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)),
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Uninitialized(map_uninitialized(uninit))
            }
        }
    }
}

impl Serialize for VerificationType<ClassConstantIndex, u16> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

/// Index of a class or uninitialized entry in a [`TypeTable`]
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct TypeHandle(pub(super) u32);

/// Underlying element of an [`ObjectType`]
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub enum ElementType {
    /// Only ever used with at least one array dimension
    Base(BaseType),
    Class(TypeHandle),
}

/// Object or array type, with classes interned in a [`TypeTable`]
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ObjectType {
    pub dimensions: u8,
    pub element: ElementType,
}

impl ObjectType {
    pub fn class(handle: TypeHandle) -> ObjectType {
        ObjectType {
            dimensions: 0,
            element: ElementType::Class(handle),
        }
    }

    /// Type of the elements of this array type
    ///
    /// Loading from something that is not an array gives `Top`.
    pub fn element_of(&self) -> VType {
        match (self.dimensions, self.element) {
            (0, _) => VerificationType::Top,
            (1, ElementType::Base(base)) => VType::from_base_type(base),
            (dimensions, element) => VerificationType::Object(ObjectType {
                dimensions: dimensions - 1,
                element,
            }),
        }
    }

    /// Array type whose elements have this type
    pub fn array_of(&self) -> ObjectType {
        ObjectType {
            dimensions: self.dimensions.saturating_add(1),
            element: self.element,
        }
    }
}

/// Verification type used while computing frames
pub type VType = VerificationType<ObjectType, TypeHandle>;

impl VType {
    /// Verification type of a value of the given primitive type (`boolean`, `byte`, `char`,
    /// and `short` all widen to `int`)
    pub fn from_base_type(base: BaseType) -> VType {
        match base {
            BaseType::Int
            | BaseType::Char
            | BaseType::Short
            | BaseType::Byte
            | BaseType::Boolean => VerificationType::Integer,
            BaseType::Float => VerificationType::Float,
            BaseType::Long => VerificationType::Long,
            BaseType::Double => VerificationType::Double,
        }
    }

    /// Merge two types at a control flow join
    ///
    /// Equal types merge to themselves, `null` merges into any object type, two object types merge
    /// into their common super type, and everything else is `Top`. The type table caches class
    /// merges, so calling this repeatedly on the same pair is cheap.
    pub fn merge(
        self,
        other: VType,
        types: &mut TypeTable,
        hierarchy: &dyn crate::jvm::class_graph::ClassHierarchy,
    ) -> Result<VType, crate::jvm::Error> {
        match (self, other) {
            (t1, t2) if t1 == t2 => Ok(t1),
            (VerificationType::Null, object @ VerificationType::Object(_))
            | (object @ VerificationType::Object(_), VerificationType::Null) => Ok(object),
            (VerificationType::Object(obj1), VerificationType::Object(obj2)) => Ok(
                VerificationType::Object(types.merge_objects(obj1, obj2, hierarchy)?),
            ),
            _ => Ok(VerificationType::Top),
        }
    }
}
