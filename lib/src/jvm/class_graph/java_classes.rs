use super::{BinaryName, ClassData, ClassGraph};
use elsa::FrozenVec;

/// Commonly referenced classes and interfaces from `java.lang` and `java.io`
///
/// These are the super types most often involved in frame merges: boxed numbers, strings, the
/// throwable hierarchy, and the types loaded by `ldc`.
pub struct JavaClasses<'g> {
    pub object: &'g ClassData<'g>,
    pub cloneable: &'g ClassData<'g>,
    pub serializable: &'g ClassData<'g>,
    pub char_sequence: &'g ClassData<'g>,
    pub comparable: &'g ClassData<'g>,
    pub string: &'g ClassData<'g>,
    pub class: &'g ClassData<'g>,
    pub number: &'g ClassData<'g>,
    pub integer: &'g ClassData<'g>,
    pub long: &'g ClassData<'g>,
    pub float: &'g ClassData<'g>,
    pub double: &'g ClassData<'g>,
    pub boolean: &'g ClassData<'g>,
    pub throwable: &'g ClassData<'g>,
    pub error: &'g ClassData<'g>,
    pub exception: &'g ClassData<'g>,
    pub runtime_exception: &'g ClassData<'g>,
    pub arithmetic_exception: &'g ClassData<'g>,
    pub illegal_argument_exception: &'g ClassData<'g>,
    pub illegal_state_exception: &'g ClassData<'g>,
    pub null_pointer_exception: &'g ClassData<'g>,
    pub method_type: &'g ClassData<'g>,
    pub method_handle: &'g ClassData<'g>,
}

impl<'g> JavaClasses<'g> {
    pub fn add_to_graph(class_graph: &ClassGraph<'g>) -> JavaClasses<'g> {
        let object = class_graph.add_class(ClassData {
            name: BinaryName::OBJECT,
            superclass: None,
            interfaces: FrozenVec::new(),
            is_interface: false,
        });

        // Interfaces
        let cloneable =
            class_graph.add_class(ClassData::new_interface(BinaryName::CLONEABLE, &[]));
        let serializable =
            class_graph.add_class(ClassData::new_interface(BinaryName::SERIALIZABLE, &[]));
        let char_sequence =
            class_graph.add_class(ClassData::new_interface(BinaryName::CHARSEQUENCE, &[]));
        let comparable =
            class_graph.add_class(ClassData::new_interface(BinaryName::COMPARABLE, &[]));

        let string = class_graph.add_class(
            ClassData::new(BinaryName::STRING, object).implementing(&[
                serializable,
                comparable,
                char_sequence,
            ]),
        );
        let class = class_graph.add_class(
            ClassData::new(BinaryName::CLASS, object).implementing(&[serializable]),
        );

        // Boxed primitives
        let number = class_graph.add_class(
            ClassData::new(BinaryName::NUMBER, object).implementing(&[serializable]),
        );
        let boxed_number = |name: BinaryName| {
            class_graph.add_class(ClassData::new(name, number).implementing(&[comparable]))
        };
        let integer = boxed_number(BinaryName::INTEGER);
        let long = boxed_number(BinaryName::LONG);
        let float = boxed_number(BinaryName::FLOAT);
        let double = boxed_number(BinaryName::DOUBLE);
        let boolean = class_graph.add_class(
            ClassData::new(BinaryName::BOOLEAN, object).implementing(&[serializable, comparable]),
        );

        // Throwables
        let throwable = class_graph.add_class(
            ClassData::new(BinaryName::THROWABLE, object).implementing(&[serializable]),
        );
        let error = class_graph.add_class(ClassData::new(BinaryName::ERROR, throwable));
        let exception = class_graph.add_class(ClassData::new(BinaryName::EXCEPTION, throwable));
        let runtime_exception =
            class_graph.add_class(ClassData::new(BinaryName::RUNTIMEEXCEPTION, exception));
        let runtime_subclass =
            |name: BinaryName| class_graph.add_class(ClassData::new(name, runtime_exception));
        let arithmetic_exception = runtime_subclass(BinaryName::ARITHMETICEXCEPTION);
        let illegal_argument_exception = runtime_subclass(BinaryName::ILLEGALARGUMENTEXCEPTION);
        let illegal_state_exception = runtime_subclass(BinaryName::ILLEGALSTATEEXCEPTION);
        let null_pointer_exception = runtime_subclass(BinaryName::NULLPOINTEREXCEPTION);

        // `java.lang.invoke`
        let method_type = class_graph.add_class(
            ClassData::new(BinaryName::METHODTYPE, object).implementing(&[serializable]),
        );
        let method_handle = class_graph.add_class(ClassData::new(BinaryName::METHODHANDLE, object));

        JavaClasses {
            object,
            cloneable,
            serializable,
            char_sequence,
            comparable,
            string,
            class,
            number,
            integer,
            long,
            float,
            double,
            boolean,
            throwable,
            error,
            exception,
            runtime_exception,
            arithmetic_exception,
            illegal_argument_exception,
            illegal_state_exception,
            null_pointer_exception,
            method_type,
            method_handle,
        }
    }
}
