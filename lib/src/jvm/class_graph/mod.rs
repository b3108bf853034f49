//! Class hierarchy queries needed while computing stack map frames
//!
//! Merging two reference types at a control flow join requires knowing their most specific
//! common superclass. The [`ClassHierarchy`] trait is the seam through which the frame
//! computation asks that question. [`ClassGraph`] answers it from an explicit graph of classes,
//! while [`ObjectHierarchy`] is the "know nothing" answer that always gives `java/lang/Object`.

use super::{BinaryName, Error};
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Debug;
use typed_arena::Arena;

mod java_classes;

pub use java_classes::*;

/// Resolves the most specific common superclass of two classes
pub trait ClassHierarchy {
    /// Most specific common superclass of two classes
    ///
    /// When either type is assignable to the other, the answer is the super type. Otherwise, if
    /// either is an interface, the answer is `java/lang/Object`.
    fn common_superclass(
        &self,
        class1: &BinaryName,
        class2: &BinaryName,
    ) -> Result<BinaryName, Error>;
}

/// Hierarchy which knows nothing, so every pair of distinct classes merges to `java/lang/Object`
///
/// Frames computed this way are always well-formed, but may be rejected by the verifier if the
/// merged value is later used as something more specific than `Object`.
#[derive(Copy, Clone, Debug, Default)]
pub struct ObjectHierarchy;

impl ClassHierarchy for ObjectHierarchy {
    fn common_superclass(
        &self,
        class1: &BinaryName,
        class2: &BinaryName,
    ) -> Result<BinaryName, Error> {
        if class1 == class2 {
            Ok(class1.clone())
        } else {
            Ok(BinaryName::OBJECT)
        }
    }
}

pub struct ClassGraphArenas<'g> {
    class_arena: Arena<ClassData<'g>>,
}

impl<'g> ClassGraphArenas<'g> {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
        }
    }
}

impl<'g> Default for ClassGraphArenas<'g> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the superclass and interface relationships between classes
///
/// Classes are added by shared reference, so a graph can keep growing while earlier lookups
/// are still held. The graph must contain every class whose common superclass gets queried,
/// along with all of their super types.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas<'g>,
    classes: FrozenMap<&'g BinaryName, &'g ClassData<'g>>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas<'g>) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
        }
    }

    /// Add standard library types to the graph
    pub fn insert_java_library_types(&self) -> JavaClasses<'g> {
        JavaClasses::add_to_graph(self)
    }

    /// Add a class to the class graph
    ///
    /// A class with the same name that is already in the graph gets shadowed.
    pub fn add_class(&self, class: ClassData<'g>) -> &'g ClassData<'g> {
        let class_ref: &'g ClassData<'g> = self.arenas.class_arena.alloc(class);
        self.classes.insert(&class_ref.name, class_ref);
        class_ref
    }

    /// Find a class by name
    pub fn lookup_class(&self, name: &BinaryName) -> Option<&'g ClassData<'g>> {
        self.classes.map_get(name, |class| *class)
    }

    fn lookup_known_class(&self, name: &BinaryName) -> Result<&'g ClassData<'g>, Error> {
        self.lookup_class(name)
            .ok_or_else(|| Error::MissingClass(name.clone()))
    }

    /// Object to object assignability
    ///
    /// This does a search up the superclasses and superinterfaces looking for the super type.
    pub fn is_object_type_assignable(sub_type: &ClassData<'g>, super_type: &ClassData<'g>) -> bool {
        // Every class (and interface) is assignable to `Object`
        if super_type.name == BinaryName::OBJECT {
            return true;
        }

        let mut supertypes_to_visit: Vec<&ClassData<'g>> = vec![sub_type];
        let mut dont_revisit: HashSet<&BinaryName> = HashSet::new();
        dont_revisit.insert(&sub_type.name);

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class: bool = !super_type.is_interface;

        while let Some(class_data) = supertypes_to_visit.pop() {
            if class_data.name == super_type.name {
                return true;
            }

            // Enqueue next types to visit
            if let Some(superclass) = class_data.superclass {
                if dont_revisit.insert(&superclass.name) {
                    supertypes_to_visit.push(superclass);
                }
            }
            if !super_is_class {
                for interface in &class_data.interfaces {
                    if dont_revisit.insert(&interface.name) {
                        supertypes_to_visit.push(interface);
                    }
                }
            }
        }

        false
    }
}

impl<'g> ClassHierarchy for ClassGraph<'g> {
    fn common_superclass(
        &self,
        class1: &BinaryName,
        class2: &BinaryName,
    ) -> Result<BinaryName, Error> {
        if class1 == class2 {
            return Ok(class1.clone());
        }

        let class1 = self.lookup_known_class(class1)?;
        let class2 = self.lookup_known_class(class2)?;

        if Self::is_object_type_assignable(class2, class1) {
            return Ok(class1.name.clone());
        }
        if Self::is_object_type_assignable(class1, class2) {
            return Ok(class2.name.clone());
        }
        if class1.is_interface || class2.is_interface {
            return Ok(BinaryName::OBJECT);
        }

        let mut candidate = class1;
        while let Some(superclass) = candidate.superclass {
            if Self::is_object_type_assignable(class2, superclass) {
                return Ok(superclass.name.clone());
            }
            candidate = superclass;
        }
        Ok(BinaryName::OBJECT)
    }
}

pub struct ClassData<'g> {
    pub name: BinaryName,

    /// Only `java/lang/Object` (and interfaces, which implicitly extend `Object`) have none
    pub superclass: Option<&'g ClassData<'g>>,

    pub interfaces: FrozenVec<&'g ClassData<'g>>,
    pub is_interface: bool,
}

impl<'g> ClassData<'g> {
    /// Regular class extending `superclass`
    pub fn new(name: BinaryName, superclass: &'g ClassData<'g>) -> ClassData<'g> {
        ClassData {
            name,
            superclass: Some(superclass),
            interfaces: FrozenVec::new(),
            is_interface: false,
        }
    }

    /// Interface, with the given super interfaces
    pub fn new_interface(name: BinaryName, interfaces: &[&'g ClassData<'g>]) -> ClassData<'g> {
        let class = ClassData {
            name,
            superclass: None,
            interfaces: FrozenVec::new(),
            is_interface: true,
        };
        for interface in interfaces {
            class.add_interface(interface);
        }
        class
    }

    /// Record that this class implements (or extends, for an interface) another interface
    pub fn add_interface(&self, interface: &'g ClassData<'g>) {
        self.interfaces.push(interface);
    }

    /// Builder-style variant of [`ClassData::add_interface`]
    pub fn implementing(self, interfaces: &[&'g ClassData<'g>]) -> ClassData<'g> {
        for interface in interfaces {
            self.add_interface(interface);
        }
        self
    }
}

impl<'g> Debug for ClassData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassData")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;

    #[test]
    fn simple_classes() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let java = class_graph.insert_java_library_types();

        assert!(ClassGraph::is_object_type_assignable(java.object, java.object));
        assert!(ClassGraph::is_object_type_assignable(java.string, java.object));
        assert!(ClassGraph::is_object_type_assignable(java.string, java.char_sequence));
        assert!(!ClassGraph::is_object_type_assignable(java.object, java.string));
        assert!(ClassGraph::is_object_type_assignable(java.integer, java.number));
        assert!(ClassGraph::is_object_type_assignable(
            java.illegal_argument_exception,
            java.throwable
        ));
    }

    #[test]
    fn common_superclass_of_siblings() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let _java = class_graph.insert_java_library_types();

        let merged = class_graph
            .common_superclass(&BinaryName::INTEGER, &BinaryName::LONG)
            .unwrap();
        assert_eq!(merged, BinaryName::NUMBER);

        let merged = class_graph
            .common_superclass(&BinaryName::ARITHMETICEXCEPTION, &BinaryName::ERROR)
            .unwrap();
        assert_eq!(merged, BinaryName::THROWABLE);

        let merged = class_graph
            .common_superclass(&BinaryName::EXCEPTION, &BinaryName::NULLPOINTEREXCEPTION)
            .unwrap();
        assert_eq!(merged, BinaryName::EXCEPTION);

        let merged = class_graph
            .common_superclass(&BinaryName::STRING, &BinaryName::STRING)
            .unwrap();
        assert_eq!(merged, BinaryName::STRING);
    }

    #[test]
    fn common_superclass_with_interfaces() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let java = class_graph.insert_java_library_types();

        // Interface against an implementing class gives the interface
        let merged = class_graph
            .common_superclass(&BinaryName::CHARSEQUENCE, &BinaryName::STRING)
            .unwrap();
        assert_eq!(merged, BinaryName::CHARSEQUENCE);

        // Unrelated interface and class gives `Object`
        let merged = class_graph
            .common_superclass(&BinaryName::CHARSEQUENCE, &BinaryName::INTEGER)
            .unwrap();
        assert_eq!(merged, BinaryName::OBJECT);

        let runnable = class_graph.add_class(ClassData::new_interface(
            BinaryName::from_str("java/lang/Runnable").unwrap(),
            &[],
        ));
        let task = class_graph.add_class(
            ClassData::new(BinaryName::from_str("me/Task").unwrap(), java.object)
                .implementing(&[runnable]),
        );
        let merged = class_graph
            .common_superclass(&task.name, &runnable.name)
            .unwrap();
        assert_eq!(merged, runnable.name);
    }

    #[test]
    fn missing_class() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let _java = class_graph.insert_java_library_types();

        let unknown = BinaryName::from_str("me/Unknown").unwrap();
        match class_graph.common_superclass(&unknown, &BinaryName::STRING) {
            Err(Error::MissingClass(name)) => assert_eq!(name, unknown),
            other => panic!("expected missing class, got {:?}", other),
        }
    }

    #[test]
    fn object_hierarchy() {
        let merged = ObjectHierarchy
            .common_superclass(&BinaryName::INTEGER, &BinaryName::LONG)
            .unwrap();
        assert_eq!(merged, BinaryName::OBJECT);
        let merged = ObjectHierarchy
            .common_superclass(&BinaryName::STRING, &BinaryName::STRING)
            .unwrap();
        assert_eq!(merged, BinaryName::STRING);
    }
}
