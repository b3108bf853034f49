//! Symbolic references to classes, members, and loadable constants
//!
//! These are what instructions refer to before they are interned into a constant pool (see
//! [`ConstantsWriter`](super::class_file::ConstantsWriter)), and what the class reader
//! recovers from the pool when decoding code.

use super::class_file::HandleKind;
use super::{BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::util::Width;
use std::hash::{Hash, Hasher};

/// Field reference (`CONSTANT_Fieldref_info`)
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

impl FieldRef {
    pub fn new(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: FieldType<BinaryName>,
    ) -> FieldRef {
        FieldRef {
            class,
            name,
            descriptor,
        }
    }
}

/// Method reference (`CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`)
///
/// The owner is a reference type since methods on arrays (eg. `clone`) are referenced with the
/// array descriptor as class.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodRef {
    pub class: RefType<BinaryName>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub is_interface: bool,
}

impl MethodRef {
    pub fn new(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> MethodRef {
        MethodRef {
            class: RefType::Object(class),
            name,
            descriptor,
            is_interface: false,
        }
    }

    pub fn interface(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> MethodRef {
        MethodRef {
            is_interface: true,
            ..MethodRef::new(class, name, descriptor)
        }
    }

    /// Is this a constructor call (`<init>`)?
    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}

/// Method handle (`CONSTANT_MethodHandle_info`)
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Handle {
    /// Kind is one of the four field accessor kinds
    Field(HandleKind, FieldRef),

    /// Kind is one of the five method invocation kinds
    Method(HandleKind, MethodRef),
}

impl Handle {
    pub fn kind(&self) -> HandleKind {
        match self {
            Handle::Field(kind, _) | Handle::Method(kind, _) => *kind,
        }
    }
}

/// Call site for `invokedynamic`
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CallSite {
    pub bootstrap: Handle,
    pub arguments: Vec<ConstantData>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
}

/// Dynamically computed constant (`CONSTANT_Dynamic_info`)
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DynamicConstant {
    pub bootstrap: Handle,
    pub arguments: Vec<ConstantData>,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

/// Constants which can be loaded with `ldc`, `ldc_w`, or `ldc2_w` (and which can be passed as
/// static arguments to bootstrap methods)
#[derive(Clone, Debug)]
pub enum ConstantData {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType<BinaryName>),
    MethodType(MethodDescriptor<BinaryName>),
    MethodHandle(Handle),
    Dynamic(Box<DynamicConstant>),
}

impl ConstantData {
    /// Type pushed onto the stack when loading this constant
    pub fn field_type(&self) -> FieldType<BinaryName> {
        match self {
            ConstantData::Integer(_) => FieldType::int(),
            ConstantData::Float(_) => FieldType::float(),
            ConstantData::Long(_) => FieldType::long(),
            ConstantData::Double(_) => FieldType::double(),
            ConstantData::String(_) => FieldType::object(BinaryName::STRING),
            ConstantData::Class(_) => FieldType::object(BinaryName::CLASS),
            ConstantData::MethodType(_) => FieldType::object(BinaryName::METHODTYPE),
            ConstantData::MethodHandle(_) => FieldType::object(BinaryName::METHODHANDLE),
            ConstantData::Dynamic(dynamic) => dynamic.descriptor.clone(),
        }
    }
}

/// Floating point constants are compared by bit pattern, so that `NaN` payloads and `-0.0` each
/// get their own pool entry.
impl PartialEq for ConstantData {
    fn eq(&self, other: &Self) -> bool {
        use ConstantData::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Class(a), Class(b)) => a == b,
            (MethodType(a), MethodType(b)) => a == b,
            (MethodHandle(a), MethodHandle(b)) => a == b,
            (Dynamic(a), Dynamic(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstantData {}

impl Hash for ConstantData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ConstantData::Integer(i) => i.hash(state),
            ConstantData::Float(f) => f.to_bits().hash(state),
            ConstantData::Long(l) => l.hash(state),
            ConstantData::Double(d) => d.to_bits().hash(state),
            ConstantData::String(s) => s.hash(state),
            ConstantData::Class(c) => c.hash(state),
            ConstantData::MethodType(m) => m.hash(state),
            ConstantData::MethodHandle(h) => h.hash(state),
            ConstantData::Dynamic(d) => d.hash(state),
        }
    }
}

/// `long` and `double` (including dynamic constants of those types) need `ldc2_w`
impl Width for ConstantData {
    fn width(&self) -> usize {
        self.field_type().width()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;
    use std::collections::HashSet;

    #[test]
    fn floats_compare_by_bits() {
        assert_ne!(ConstantData::Float(0.0), ConstantData::Float(-0.0));
        assert_eq!(ConstantData::Double(f64::NAN), ConstantData::Double(f64::NAN));

        let set: HashSet<ConstantData> = vec![
            ConstantData::Float(0.0),
            ConstantData::Float(-0.0),
            ConstantData::Float(0.0),
            ConstantData::Integer(0),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn loaded_widths() {
        assert_eq!(ConstantData::Long(1).width(), 2);
        assert_eq!(ConstantData::Double(1.0).width(), 2);
        assert_eq!(ConstantData::String(String::from("hi")).width(), 1);
        let dynamic = DynamicConstant {
            bootstrap: Handle::Method(
                HandleKind::InvokeStatic,
                MethodRef::new(
                    BinaryName::OBJECT,
                    UnqualifiedName::from_str("bsm").unwrap(),
                    MethodDescriptor {
                        parameters: vec![],
                        return_type: Some(FieldType::long()),
                    },
                ),
            ),
            arguments: vec![],
            name: UnqualifiedName::from_str("x").unwrap(),
            descriptor: FieldType::long(),
        };
        assert_eq!(ConstantData::Dynamic(Box::new(dynamic)).width(), 2);
    }
}
