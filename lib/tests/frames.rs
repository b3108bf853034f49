mod common;

use classforge::jvm::class_file::Version;
use classforge::jvm::class_graph::{ClassGraph, ClassGraphArenas, ClassHierarchy};
use classforge::jvm::code::{
    BranchInstruction::*, DecodedInstruction, Instruction::*, InvokeType, OrdComparison,
};
use classforge::jvm::*;
use common::*;

#[test]
fn branch_join() -> Result<(), Error> {
    init_logging();
    let mut class = class_builder(Version::JAVA8, ComputeMode::Frames);

    // static int pick(int x) { return x == 0 ? 2 : 1; }
    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("pick"),
        descriptor(vec![FieldType::int()], Some(FieldType::int())),
    );
    let is_zero = code.fresh_label();
    let join = code.fresh_label();
    code.push_instruction(ILoad(0))?;
    code.push_branch_instruction(If(OrdComparison::EQ, is_zero, ()))?;
    code.push_instruction(IConst1)?;
    code.push_branch_instruction(Goto(join))?;
    code.place_label(is_zero)?;
    code.push_instruction(IConst2)?;
    code.place_label(join)?;
    code.push_branch_instruction(IReturn)?;
    code.finish()?;

    let body = method_body(&class.finish()?, "pick");
    assert_eq!(body.code.max_stack, 1);
    assert_eq!(body.code.max_locals, 1);
    assert_eq!(
        body.code_array,
        vec![0x1a, 0x99, 0x00, 0x07, 0x04, 0xa7, 0x00, 0x04, 0x05, 0xac]
    );

    // `same_frame` at 8, then `same_locals_1_stack_item_frame` (an `int`) at 9
    assert_eq!(body.stack_map_table, Some(vec![0, 2, 8, 64, 1]));
    Ok(())
}

#[test]
fn join_merges_to_common_superclass() -> Result<(), Error> {
    init_logging();
    let class_graph_arenas = ClassGraphArenas::new();
    let class_graph = ClassGraph::new(&class_graph_arenas);
    class_graph.insert_java_library_types();
    let mut class = class_builder_in(Version::JAVA8, ComputeMode::Frames, &class_graph);

    // static Object pick(boolean b) { return b ? (Integer) null : (Long) null; }
    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("pick"),
        descriptor(
            vec![FieldType::boolean()],
            Some(FieldType::object(BinaryName::OBJECT)),
        ),
    );
    let long = code.fresh_label();
    let join = code.fresh_label();
    code.push_instruction(ILoad(0))?;
    code.push_branch_instruction(If(OrdComparison::EQ, long, ()))?;
    code.push_instruction(AConstNull)?;
    code.push_instruction(CheckCast(RefType::Object(BinaryName::INTEGER)))?;
    code.push_branch_instruction(Goto(join))?;
    code.place_label(long)?;
    code.push_instruction(AConstNull)?;
    code.push_instruction(CheckCast(RefType::Object(BinaryName::LONG)))?;
    code.place_label(join)?;
    code.push_branch_instruction(AReturn)?;
    code.finish()?;

    let body = method_body(&class.finish()?, "pick");
    let frames = body.stack_map_table.unwrap();
    assert_eq!(&frames[0..5], &[0, 2, 11, 67, 7]);
    let merged = u16::from_be_bytes([frames[5], frames[6]]);
    assert_eq!(
        body.constants
            .class_name(ClassConstantIndex(ConstantIndex(merged)))?,
        BinaryName::NUMBER
    );
    Ok(())
}

#[test]
fn loop_generalizes_local() -> Result<(), Error> {
    init_logging();
    let class_graph_arenas = ClassGraphArenas::new();
    let class_graph = ClassGraph::new(&class_graph_arenas);
    class_graph.insert_java_library_types();
    let mut class = class_builder_in(Version::JAVA8, ComputeMode::Frames, &class_graph);

    // static void spin(Integer n) { while (true) { n = (Long) null; } }
    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("spin"),
        descriptor(vec![FieldType::object(BinaryName::INTEGER)], None),
    );
    let head = code.fresh_label();
    code.place_label(head)?;
    code.push_instruction(AConstNull)?;
    code.push_instruction(CheckCast(RefType::Object(BinaryName::LONG)))?;
    code.push_instruction(AStore(0))?;
    code.push_branch_instruction(Goto(head))?;
    code.finish()?;

    // The back edge widens `n` from `Integer` to `Number`, so the loop head needs a full frame
    let body = method_body(&class.finish()?, "spin");
    let frames = body.stack_map_table.unwrap();
    assert_eq!(frames.len(), 12);
    assert_eq!(&frames[0..8], &[0, 1, 255, 0, 0, 0, 1, 7]);
    assert_eq!(&frames[10..12], &[0, 0]);
    let local = u16::from_be_bytes([frames[8], frames[9]]);
    assert_eq!(
        body.constants
            .class_name(ClassConstantIndex(ConstantIndex(local)))?,
        BinaryName::NUMBER
    );
    assert_eq!((body.code.max_stack, body.code.max_locals), (1, 1));
    Ok(())
}

/// Hierarchy which fails every query
struct BrokenHierarchy;

impl ClassHierarchy for BrokenHierarchy {
    fn common_superclass(
        &self,
        _class1: &BinaryName,
        _class2: &BinaryName,
    ) -> Result<BinaryName, Error> {
        Err(Error::ResolverFailure(String::from("classpath unavailable")))
    }
}

#[test]
fn resolver_failures_propagate() {
    init_logging();
    let mut class = class_builder_in(Version::JAVA8, ComputeMode::Frames, &BrokenHierarchy);

    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("pick"),
        descriptor(
            vec![FieldType::int()],
            Some(FieldType::object(BinaryName::OBJECT)),
        ),
    );
    let other = code.fresh_label();
    let join = code.fresh_label();
    code.push_instruction(ILoad(0)).unwrap();
    code.push_branch_instruction(If(OrdComparison::EQ, other, ())).unwrap();
    code.push_instruction(AConstNull).unwrap();
    code.push_instruction(CheckCast(RefType::Object(BinaryName::INTEGER)))
        .unwrap();
    code.push_branch_instruction(Goto(join)).unwrap();
    code.place_label(other).unwrap();
    code.push_instruction(AConstNull).unwrap();
    code.push_instruction(CheckCast(RefType::Object(BinaryName::STRING)))
        .unwrap();
    code.place_label(join).unwrap();
    code.push_branch_instruction(AReturn).unwrap();

    match code.finish() {
        Err(Error::InMethod { method, error }) => {
            assert_eq!(method, "pick(I)Ljava/lang/Object;");
            match *error {
                Error::ResolverFailure(msg) => assert_eq!(msg, "classpath unavailable"),
                other => panic!("expected a resolver failure, got {:?}", other),
            }
        }
        other => panic!("expected a resolver failure, got {:?}", other),
    }
}

#[test]
fn uninitialized_offsets_survive_layout() -> Result<(), Error> {
    init_logging();
    let mut class = class_builder(Version::JAVA8, ComputeMode::Frames);

    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("make"),
        descriptor(
            vec![FieldType::boolean()],
            Some(FieldType::object(BinaryName::OBJECT)),
        ),
    );
    let construct = code.fresh_label();
    code.push_instruction(Nop)?;
    code.push_instruction(New(RefType::Object(BinaryName::OBJECT)))?;
    code.push_instruction(Dup)?;
    code.push_instruction(ILoad(0))?;
    code.push_branch_instruction(If(OrdComparison::EQ, construct, ()))?;
    code.place_label(construct)?;
    code.push_instruction(Invoke(
        InvokeType::Special,
        MethodRef::new(
            BinaryName::OBJECT,
            UnqualifiedName::INIT,
            descriptor(vec![], None),
        ),
    ))?;
    code.push_branch_instruction(AReturn)?;
    code.finish()?;

    // Full frame at 9 with two `uninitialized(1)` entries on the stack
    let body = method_body(&class.finish()?, "make");
    assert_eq!(
        body.stack_map_table,
        Some(vec![0, 1, 255, 0, 9, 0, 1, 1, 0, 2, 8, 0, 1, 8, 0, 1])
    );
    assert_eq!(body.code.max_stack, 2);
    Ok(())
}

#[test]
fn long_backward_jump() -> Result<(), Error> {
    init_logging();
    let mut class = class_builder(Version::JAVA8, ComputeMode::Frames);

    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("spin"),
        descriptor(vec![], None),
    );
    let top = code.fresh_label();
    code.place_label(top)?;
    for _ in 0..40_000 {
        code.push_instruction(Nop)?;
    }
    code.push_instruction(IConst0)?;
    code.push_branch_instruction(If(OrdComparison::EQ, top, ()))?;
    code.push_branch_instruction(Return)?;
    code.finish()?;

    let body = method_body(&class.finish()?, "spin");
    assert_eq!(body.code.code_length, 40_010);

    // The conditional gets inverted to hop over a `goto_w`
    let tail: Vec<_> = body.code.instructions[40_001..].to_vec();
    assert_eq!(
        tail,
        vec![
            (
                40_001,
                DecodedInstruction::Branch(If(OrdComparison::NE, 40_009, ()))
            ),
            (40_004, DecodedInstruction::Branch(GotoW(0))),
            (40_009, DecodedInstruction::Branch(Return)),
        ]
    );

    // Frames at the loop head and after the `goto_w` (delta 40008 needs `same_frame_extended`)
    assert_eq!(body.stack_map_table, Some(vec![0, 2, 0, 251, 0x9c, 0x48]));
    Ok(())
}

#[test]
fn dead_code_is_replaced() -> Result<(), Error> {
    init_logging();
    let mut class = class_builder(Version::JAVA8, ComputeMode::Frames);

    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("dead"),
        descriptor(vec![], None),
    );
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

    let body = method_body(&class.finish()?, "dead");

    // Same length as before, but now just `nop`s and an `athrow`
    assert_eq!(body.code_array, vec![0xb1, 0x00, 0x00, 0xbf, 0xbf]);

    // The handler range no longer covers the dead block
    assert_eq!(body.exception_table, vec![[0, 1, 4, 0]]);

    // Both the dead block and the handler start with a single `Throwable` on the stack
    let frames = body.stack_map_table.unwrap();
    assert_eq!(frames.len(), 2 + 4 + 4);
    assert_eq!(&frames[0..3], &[0, 2, 65]);
    assert_eq!(frames[3], 7);
    assert_eq!(frames[6], 66);
    assert_eq!(&frames[3..6], &frames[7..10]);
    let throwable = u16::from_be_bytes([frames[4], frames[5]]);
    assert_eq!(
        body.constants
            .class_name(ClassConstantIndex(ConstantIndex(throwable)))?,
        BinaryName::THROWABLE
    );
    Ok(())
}

fn subroutine_class(
    version: Version,
    mode: ComputeMode,
) -> Result<ClassBuilder<'static>, Error> {
    let mut class = class_builder(version, mode);
    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("sub"),
        descriptor(vec![], None),
    );
    let subroutine = code.fresh_label();
    code.push_branch_instruction(Jsr(subroutine, ()))?;
    code.push_branch_instruction(Return)?;
    code.place_label(subroutine)?;
    code.push_instruction(AStore(0))?;
    code.push_instruction(IConst1)?;
    code.push_instruction(Pop)?;
    code.push_branch_instruction(Ret(0))?;
    code.finish()?;
    Ok(class)
}

#[test]
fn subroutines_in_height_mode() -> Result<(), Error> {
    init_logging();
    let class = subroutine_class(Version::JAVA5, ComputeMode::MaxStackAndLocals)?;
    let body = method_body(&class.finish()?, "sub");

    assert_eq!(
        body.code_array,
        vec![0xa8, 0x00, 0x04, 0xb1, 0x4b, 0x04, 0x57, 0xa9, 0x00]
    );
    assert_eq!(body.code.max_stack, 1);
    assert_eq!(body.code.max_locals, 1);
    assert_eq!(body.stack_map_table, None);
    Ok(())
}

#[test]
fn subroutines_need_height_mode() {
    init_logging();
    match subroutine_class(Version::JAVA8, ComputeMode::Frames) {
        Err(Error::InMethod { method, error }) => {
            assert_eq!(method, "sub()V");
            assert!(matches!(*error, Error::UnsupportedSubroutine));
        }
        other => panic!("expected a subroutine error, got {:?}", other.err()),
    }
}

#[test]
fn inconsistent_heights_are_rejected() {
    init_logging();
    let mut class = class_builder(Version::JAVA8, ComputeMode::Frames);
    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("uneven"),
        descriptor(vec![FieldType::int()], None),
    );
    let join = code.fresh_label();
    code.push_instruction(ILoad(0)).unwrap();
    code.push_branch_instruction(If(OrdComparison::EQ, join, ())).unwrap();
    code.push_instruction(IConst1).unwrap();
    code.place_label(join).unwrap();
    code.push_branch_instruction(Return).unwrap();

    match code.finish() {
        Err(Error::InMethod { error, .. }) => {
            assert!(matches!(*error, Error::InconsistentStackHeight { .. }))
        }
        other => panic!("expected a stack height error, got {:?}", other),
    }
}

#[test]
fn explicit_maxs_without_computation() -> Result<(), Error> {
    init_logging();
    let mut class = class_builder(Version::JAVA8, ComputeMode::Nothing);

    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("given"),
        descriptor(vec![], None),
    );
    code.push_instruction(IConst1)?;
    code.push_instruction(Pop)?;
    code.push_branch_instruction(Return)?;
    code.set_max_stack_and_locals(7, 3);
    code.finish()?;

    let mut code = class.start_method(
        MethodAccessFlags::STATIC,
        name("defaulted"),
        descriptor(vec![FieldType::long()], None),
    );
    code.push_instruction(IConst1)?;
    code.push_instruction(Pop)?;
    code.push_branch_instruction(Return)?;
    code.finish()?;

    let class_file = class.finish()?;
    let given = method_body(&class_file, "given");
    assert_eq!((given.code.max_stack, given.code.max_locals), (7, 3));
    assert_eq!(given.stack_map_table, None);

    // Without a hint, max stack is zero and max locals covers the parameters
    let defaulted = method_body(&class_file, "defaulted");
    assert_eq!((defaulted.code.max_stack, defaulted.code.max_locals), (0, 2));
    Ok(())
}
