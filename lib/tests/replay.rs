mod common;

use classforge::jvm::class_file::{ClassFile, ClassReader, SourceFile, Version};
use classforge::jvm::class_graph::ObjectHierarchy;
use classforge::jvm::code::{BranchInstruction::*, Instruction::*, InvokeType, OrdComparison};
use classforge::jvm::*;
use common::*;

/// Class exercising switches, handlers, wide jumps, dead code, and `invokedynamic`
fn varied_class() -> Result<ClassFile, Error> {
    let mut class = class_builder(Version::JAVA8, ComputeMode::Frames);
    let this_class = class.this_class.clone();
    let string = FieldType::object(BinaryName::STRING);

    let source_file = class.constants_pool.get_utf8("Sample.java")?;
    class.add_attribute(SourceFile(source_file))?;
    class.add_field(FieldAccessFlags::PRIVATE, &name("count"), &FieldType::long(), None)?;

    // Constructor
    let mut code = class.start_method(
        MethodAccessFlags::PUBLIC,
        UnqualifiedName::INIT,
        descriptor(vec![], None),
    );
    code.push_instruction(ALoad(0))?;
    code.push_instruction(Invoke(
        InvokeType::Special,
        MethodRef::new(BinaryName::OBJECT, UnqualifiedName::INIT, descriptor(vec![], None)),
    ))?;
    code.push_branch_instruction(Return)?;
    code.finish()?;

    // Switch inside an exception handler, with debug information
    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("choose"),
        descriptor(vec![FieldType::int()], Some(string.clone())),
    );
    let try_start = code.fresh_label();
    let try_end = code.fresh_label();
    let handler = code.fresh_label();
    let zero = code.fresh_label();
    let one = code.fresh_label();
    let two = code.fresh_label();
    let many = code.fresh_label();
    let start = code.position();
    code.place_label(try_start)?;
    code.add_line_number(10);
    code.push_instruction(ILoad(0))?;
    code.push_branch_instruction(TableSwitch {
        padding: 0,
        default: many,
        low: 0,
        targets: vec![zero, one, two],
    })?;
    code.place_label(zero)?;
    code.push_instruction(Ldc(ConstantData::String(String::from("zero"))))?;
    code.push_branch_instruction(AReturn)?;
    code.place_label(one)?;
    code.add_line_number(11);
    code.push_instruction(Ldc(ConstantData::String(String::from("one"))))?;
    code.push_branch_instruction(AReturn)?;
    code.place_label(two)?;
    code.push_instruction(Ldc2(ConstantData::Long(42)))?;
    code.push_instruction(L2I)?;
    code.push_instruction(Invoke(
        InvokeType::Static,
        MethodRef::new(
            this_class.clone(),
            name("helper"),
            descriptor(vec![FieldType::int()], Some(string.clone())),
        ),
    ))?;
    code.push_branch_instruction(AReturn)?;
    code.place_label(many)?;
    code.push_instruction(Ldc(ConstantData::String(String::from("many"))))?;
    code.push_branch_instruction(AReturn)?;
    code.place_label(try_end)?;
    code.place_label(handler)?;
    code.add_line_number(12);
    code.push_instruction(AStore(1))?;
    code.push_instruction(Ldc(ConstantData::String(String::from("oops"))))?;
    code.push_branch_instruction(AReturn)?;
    let end = code.position();
    code.add_local_variable(start, end, &name("n"), &FieldType::int(), 0)?;
    code.add_exception_handler(try_start, try_end, handler, Some(BinaryName::RUNTIMEEXCEPTION))?;
    code.finish()?;

    // Backwards jump too far for a 16-bit offset
    let mut code = class.start_method(MethodAccessFlags::STATIC, name("spin"), descriptor(vec![], None));
    let top = code.fresh_label();
    code.place_label(top)?;
    for _ in 0..40_000 {
        code.push_instruction(Nop)?;
    }
    code.push_instruction(IConst0)?;
    code.push_branch_instruction(If(OrdComparison::EQ, top, ()))?;
    code.push_branch_instruction(Return)?;
    code.finish()?;

    // Unreachable code covered by a handler
    let mut code = class.start_method(MethodAccessFlags::STATIC, name("dead"), descriptor(vec![], None));
    let start = code.fresh_label();
    let end = code.fresh_label();
    let handler = code.fresh_label();
    code.place_label(start)?;
    code.push_branch_instruction(Return)?;
    code.push_instruction(IConst1)?;
    code.push_instruction(Pop)?;
    code.push_branch_instruction(Return)?;
    code.place_label(end)?;
    code.place_label(handler)?;
    code.push_branch_instruction(AThrow)?;
    code.add_exception_handler(start, end, handler, None)?;
    code.finish()?;

    // Call site with static arguments
    let runnable = BinaryName::from_str("java/lang/Runnable").unwrap();
    let mut code = class.start_method(MethodAccessFlags::STATIC, name("indy"), descriptor(vec![], None));
    code.push_instruction(InvokeDynamic(CallSite {
        bootstrap: Handle::Method(
            class_file::HandleKind::InvokeStatic,
            MethodRef::new(
                this_class,
                name("bootstrap"),
                descriptor(vec![], Some(FieldType::object(BinaryName::OBJECT))),
            ),
        ),
        arguments: vec![ConstantData::String(String::from("x")), ConstantData::Integer(3)],
        name: name("run"),
        descriptor: descriptor(vec![], Some(FieldType::object(runnable))),
    }))?;
    code.push_instruction(Pop)?;
    code.push_branch_instruction(Return)?;
    code.finish()?;

    class.finish()
}

const METHODS: [&str; 5] = ["<init>", "choose", "spin", "dead", "indy"];

#[test]
fn replay_reproduces_class() -> Result<(), Error> {
    init_logging();
    let bytes = varied_class()?.to_bytes()?;
    let replayed = ClassReader::parse(&bytes)?.replay(ComputeMode::Frames, &ObjectHierarchy)?;
    assert_eq!(replayed.to_bytes()?, bytes);
    Ok(())
}

#[test]
fn replay_decodes_debug_information() -> Result<(), Error> {
    init_logging();
    let body = method_body(&varied_class()?, "choose");
    let lines: Vec<u16> = body.code.line_numbers.iter().map(|(_, line)| *line).collect();
    assert_eq!(lines, vec![10, 11, 12]);
    assert_eq!(body.code.line_numbers[0].0, 0);

    assert_eq!(body.code.local_variables.len(), 1);
    let local = &body.code.local_variables[0];
    assert_eq!((local.start_pc, local.end_pc), (0, body.code.code_length));
    assert_eq!(local.name, name("n"));

    assert_eq!(body.code.exception_table.len(), 1);
    assert_eq!(
        body.code.exception_table[0].catch_type,
        Some(BinaryName::RUNTIMEEXCEPTION)
    );
    assert_eq!(body.code.max_locals, 2);
    Ok(())
}

#[test]
fn replay_without_frames() -> Result<(), Error> {
    init_logging();
    let original = varied_class()?;
    let bytes = original.to_bytes()?;
    let replayed =
        ClassReader::parse(&bytes)?.replay(ComputeMode::MaxStackAndLocals, &ObjectHierarchy)?;

    for method in METHODS {
        let before = method_body(&original, method);
        let after = method_body(&replayed, method);
        assert_eq!(before.code_array, after.code_array, "code of {}", method);
        assert_eq!(before.exception_table, after.exception_table, "handlers of {}", method);
        assert_eq!(before.code.max_stack, after.code.max_stack, "max stack of {}", method);
        assert_eq!(before.code.max_locals, after.code.max_locals, "max locals of {}", method);
        assert_eq!(after.stack_map_table, None);
    }
    Ok(())
}

#[test]
fn bootstrap_methods_come_last() -> Result<(), Error> {
    init_logging();
    let bytes = varied_class()?.to_bytes()?;
    let reader = ClassReader::parse(&bytes)?;
    assert_eq!(reader.bootstrap_methods.len(), 1);
    assert_eq!(reader.bootstrap_methods[0].bootstrap_arguments.len(), 2);

    // Only the `SourceFile` is left once bootstrap methods are pulled out
    assert_eq!(reader.attributes.len(), 1);
    Ok(())
}
