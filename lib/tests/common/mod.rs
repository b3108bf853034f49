#![allow(dead_code)]

use classforge::jvm::class_file::{ByteReader, ClassFile, ClassReader, ConstantsPool, Version};
use classforge::jvm::class_graph::{ClassHierarchy, ObjectHierarchy};
use classforge::jvm::code::DecodedCode;
use classforge::jvm::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn class_builder(version: Version, mode: ComputeMode) -> ClassBuilder<'static> {
    class_builder_in(version, mode, &ObjectHierarchy)
}

/// Like [`class_builder`], but merging object types through `hierarchy`
pub fn class_builder_in<'h>(
    version: Version,
    mode: ComputeMode,
    hierarchy: &'h dyn ClassHierarchy,
) -> ClassBuilder<'h> {
    ClassBuilder::new(
        version,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        BinaryName::from_str("test/Sample").unwrap(),
        Some(BinaryName::OBJECT),
        vec![],
        mode,
        hierarchy,
    )
    .unwrap()
}

pub fn name(name: &str) -> UnqualifiedName {
    UnqualifiedName::from_str(name).unwrap()
}

pub fn descriptor(
    parameters: Vec<FieldType<BinaryName>>,
    return_type: Option<FieldType<BinaryName>>,
) -> MethodDescriptor<BinaryName> {
    MethodDescriptor {
        parameters,
        return_type,
    }
}

/// Method body read back out of serialized class bytes
pub struct MethodBody {
    pub constants: ConstantsPool,
    pub code: DecodedCode,
    pub code_array: Vec<u8>,
    pub exception_table: Vec<[u16; 4]>,

    /// Body of the `StackMapTable` attribute, if there was one
    pub stack_map_table: Option<Vec<u8>>,
}

pub fn method_body(class_file: &ClassFile, method_name: &str) -> MethodBody {
    let bytes = class_file.to_bytes().unwrap();
    let reader = ClassReader::parse(&bytes).unwrap();
    let constants = ConstantsPool::from_constants(reader.constants, reader.bootstrap_methods);

    let method = reader
        .methods
        .iter()
        .find(|method| constants.utf8(method.name_index).unwrap() == method_name)
        .expect("method not found");
    let code_attribute = method
        .attributes
        .iter()
        .find(|attribute| constants.utf8(attribute.name_index).unwrap() == "Code")
        .expect("method has no code");
    let code = DecodedCode::parse(&code_attribute.info, &constants).unwrap();

    let mut info = ByteReader::new(&code_attribute.info);
    info.u16().unwrap();
    info.u16().unwrap();
    let code_length = info.u32().unwrap() as usize;
    let code_array = info.bytes(code_length).unwrap().to_vec();
    let exception_table = (0..info.u16().unwrap())
        .map(|_| {
            [
                info.u16().unwrap(),
                info.u16().unwrap(),
                info.u16().unwrap(),
                info.u16().unwrap(),
            ]
        })
        .collect();
    let mut stack_map_table = None;
    for _ in 0..info.u16().unwrap() {
        let name_index = info.u16().unwrap();
        let length = info.u32().unwrap() as usize;
        let body = info.bytes(length).unwrap();
        let name = constants
            .utf8(Utf8ConstantIndex(ConstantIndex(name_index)))
            .unwrap();
        if name == "StackMapTable" {
            stack_map_table = Some(body.to_vec());
        }
    }

    MethodBody {
        constants,
        code,
        code_array,
        exception_table,
        stack_map_table,
    }
}
