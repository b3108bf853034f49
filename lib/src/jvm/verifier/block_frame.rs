//! Effect of a basic block on the frame, computed once per block
//!
//! While instructions are being pushed, the types flowing into a block are not known yet (they
//! depend on all of the block's predecessors). Rather than re-interpreting every instruction on
//! each iteration of the fixpoint, each block records its effect symbolically: the output stack
//! and assigned locals are expressed with [`AbstractType`]s, which may refer back to a slot of the
//! block's input frame. Resolving the output frame is then cheap.

use super::{ElementType, ObjectType, SlotFrame, TypeTable, VType, VerificationType};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::code::{BlockId, BranchInstruction, Instruction, InvokeType, SymbolicInstruction};
use crate::jvm::{BinaryName, Error, FieldType, RefType};
use crate::util::Width;

/// Slot of the block's input frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RelativeBase {
    InputLocal(u16),

    /// Depth from the top of the input stack (1 is the top slot)
    InputStack(usize),
}

/// Type derived from the input frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RelativeType {
    pub base: RelativeBase,

    /// Number of array dimensions stripped off (by `aaload`)
    pub element_of: u8,

    /// Whether the slot became unusable if it held a `long` or `double` (since the slot after it
    /// was overwritten)
    pub top_if_wide: bool,
}

impl RelativeType {
    fn new(base: RelativeBase) -> RelativeType {
        RelativeType {
            base,
            element_of: 0,
            top_if_wide: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbstractType {
    Known(VType),
    Relative(RelativeType),
}

const TOP: AbstractType = AbstractType::Known(VerificationType::Top);
const INTEGER: AbstractType = AbstractType::Known(VerificationType::Integer);
const FLOAT: AbstractType = AbstractType::Known(VerificationType::Float);
const LONG: AbstractType = AbstractType::Known(VerificationType::Long);
const DOUBLE: AbstractType = AbstractType::Known(VerificationType::Double);

impl AbstractType {
    fn element_of(self) -> AbstractType {
        match self {
            AbstractType::Known(VerificationType::Object(object)) => {
                AbstractType::Known(object.element_of())
            }
            AbstractType::Known(VerificationType::Null) => {
                AbstractType::Known(VerificationType::Null)
            }
            AbstractType::Known(_) => TOP,
            AbstractType::Relative(relative) => AbstractType::Relative(RelativeType {
                element_of: relative.element_of.saturating_add(1),
                ..relative
            }),
        }
    }
}

/// Summary of what a block does to the locals and stack
#[derive(Clone, Debug, Default)]
pub struct BlockFrame {
    /// Locals assigned in the block (`None` for locals left untouched)
    output_locals: Vec<Option<AbstractType>>,

    /// Slots pushed by the block and still on the stack
    output_stack: Vec<AbstractType>,

    /// Number of input stack slots popped
    popped: usize,

    /// Highest stack height reached, relative to the input height
    max_relative_height: isize,

    /// Receivers of `<init>` calls
    initializations: Vec<AbstractType>,

    /// Every local assignment, in order
    assigned_locals: Vec<(u16, AbstractType)>,
}

impl BlockFrame {
    /// Number of slots of the input stack that must be present for this block to execute
    pub fn popped(&self) -> usize {
        self.popped
    }

    /// Current stack height, relative to the input height
    pub fn relative_height(&self) -> isize {
        self.output_stack.len() as isize - self.popped as isize
    }

    pub fn max_relative_height(&self) -> isize {
        self.max_relative_height
    }

    fn push(&mut self, abstract_type: AbstractType) {
        self.output_stack.push(abstract_type);
        self.max_relative_height = self.max_relative_height.max(self.relative_height());
    }

    fn push_vtype(&mut self, vtype: VType) {
        self.push(AbstractType::Known(vtype));
        if vtype.width() == 2 {
            self.push(TOP);
        }
    }

    fn push_field_type(&mut self, field_type: &FieldType<BinaryName>, types: &mut TypeTable) {
        let vtype = types.field_type(field_type);
        self.push_vtype(vtype);
    }

    fn push_object(&mut self, object: ObjectType) {
        self.push(AbstractType::Known(VerificationType::Object(object)));
    }

    fn pop(&mut self) -> AbstractType {
        match self.output_stack.pop() {
            Some(abstract_type) => abstract_type,
            None => {
                self.popped += 1;
                AbstractType::Relative(RelativeType::new(RelativeBase::InputStack(self.popped)))
            }
        }
    }

    fn pop_n(&mut self, count: usize) {
        for _ in 0..count {
            self.pop();
        }
    }

    fn get_local(&self, idx: u16) -> AbstractType {
        match self.output_locals.get(idx as usize) {
            Some(Some(abstract_type)) => *abstract_type,
            _ => AbstractType::Relative(RelativeType::new(RelativeBase::InputLocal(idx))),
        }
    }

    fn set_local(&mut self, idx: u16, abstract_type: AbstractType) {
        let idx_usize = idx as usize;
        if self.output_locals.len() <= idx_usize {
            self.output_locals.resize(idx_usize + 1, None);
        }
        self.output_locals[idx_usize] = Some(abstract_type);
        self.assigned_locals.push((idx, abstract_type));
    }

    /// Store into a local, invalidating a `long` or `double` in the previous slot
    fn store(&mut self, idx: u16, abstract_type: AbstractType, wide: bool) {
        self.set_local(idx, abstract_type);
        if let (true, Some(next)) = (wide, idx.checked_add(1)) {
            self.set_local(next, TOP);
        }
        if idx > 0 {
            match self.get_local(idx - 1) {
                AbstractType::Known(VerificationType::Long | VerificationType::Double) => {
                    self.set_local(idx - 1, TOP)
                }
                AbstractType::Relative(relative) if !relative.top_if_wide => self.set_local(
                    idx - 1,
                    AbstractType::Relative(RelativeType {
                        top_if_wide: true,
                        ..relative
                    }),
                ),
                _ => (),
            }
        }
    }

    /// Record the effect of a straight-line instruction
    ///
    /// `block` and `offset_in_block` locate the instruction, which is needed to identify the
    /// uninitialized value created by `new`.
    pub fn execute(
        &mut self,
        insn: &SymbolicInstruction,
        types: &mut TypeTable,
        block: BlockId,
        offset_in_block: usize,
    ) {
        use Instruction::*;

        match insn {
            Nop | INeg | LNeg | FNeg | DNeg | I2B | I2C | I2S => (),

            AConstNull => self.push(AbstractType::Known(VerificationType::Null)),
            IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 | BiPush(_)
            | SiPush(_) => self.push(INTEGER),
            LConst0 | LConst1 => self.push_vtype(VerificationType::Long),
            FConst0 | FConst1 | FConst2 => self.push(FLOAT),
            DConst0 | DConst1 => self.push_vtype(VerificationType::Double),
            Ldc(constant) | Ldc2(constant) => self.push_field_type(&constant.field_type(), types),

            ILoad(_) => self.push(INTEGER),
            LLoad(_) => self.push_vtype(VerificationType::Long),
            FLoad(_) => self.push(FLOAT),
            DLoad(_) => self.push_vtype(VerificationType::Double),
            ALoad(idx) => {
                let local = self.get_local(*idx);
                self.push(local);
            }

            IALoad | BALoad | CALoad | SALoad => {
                self.pop_n(2);
                self.push(INTEGER);
            }
            LALoad => {
                self.pop_n(2);
                self.push_vtype(VerificationType::Long);
            }
            FALoad => {
                self.pop_n(2);
                self.push(FLOAT);
            }
            DALoad => {
                self.pop_n(2);
                self.push_vtype(VerificationType::Double);
            }
            AALoad => {
                self.pop();
                let array = self.pop();
                self.push(array.element_of());
            }

            IStore(idx) | FStore(idx) | AStore(idx) => {
                let value = self.pop();
                self.store(*idx, value, false);
            }
            LStore(idx) | DStore(idx) => {
                self.pop();
                let value = self.pop();
                self.store(*idx, value, true);
            }

            IAStore | BAStore | CAStore | SAStore | FAStore | AAStore => self.pop_n(3),
            LAStore | DAStore => self.pop_n(4),

            Pop => self.pop_n(1),
            Pop2 => self.pop_n(2),
            Dup => {
                let t1 = self.pop();
                self.push(t1);
                self.push(t1);
            }
            DupX1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            DupX2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            Dup2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            Dup2X1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            Dup2X2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                let t4 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t4);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            Swap => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
            }

            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | ISh(_) | FCmp(_) => {
                self.pop_n(2);
                self.push(INTEGER);
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
                self.pop_n(4);
                self.push_vtype(VerificationType::Long);
            }
            LSh(_) => {
                self.pop_n(3);
                self.push_vtype(VerificationType::Long);
            }
            FAdd | FSub | FMul | FDiv | FRem => {
                self.pop_n(2);
                self.push(FLOAT);
            }
            DAdd | DSub | DMul | DDiv | DRem => {
                self.pop_n(4);
                self.push_vtype(VerificationType::Double);
            }
            LCmp | DCmp(_) => {
                self.pop_n(4);
                self.push(INTEGER);
            }

            IInc(idx, _) => self.store(*idx, INTEGER, false),

            I2L | F2L => {
                self.pop_n(1);
                self.push_vtype(VerificationType::Long);
            }
            I2F => {
                self.pop_n(1);
                self.push(FLOAT);
            }
            I2D | F2D => {
                self.pop_n(1);
                self.push_vtype(VerificationType::Double);
            }
            L2I | D2I => {
                self.pop_n(2);
                self.push(INTEGER);
            }
            L2F | D2F => {
                self.pop_n(2);
                self.push(FLOAT);
            }
            L2D => {
                self.pop_n(2);
                self.push_vtype(VerificationType::Double);
            }
            D2L => {
                self.pop_n(2);
                self.push_vtype(VerificationType::Long);
            }
            F2I => {
                self.pop_n(1);
                self.push(INTEGER);
            }

            GetStatic(field) => self.push_field_type(&field.descriptor, types),
            PutStatic(field) => self.pop_n(field.descriptor.width()),
            GetField(field) => {
                self.pop();
                self.push_field_type(&field.descriptor, types);
            }
            PutField(field) => self.pop_n(field.descriptor.width() + 1),

            Invoke(invoke_type, method) => {
                self.pop_n(method.descriptor.parameter_length(false));
                if *invoke_type != InvokeType::Static {
                    let receiver = self.pop();
                    if *invoke_type == InvokeType::Special && method.is_constructor() {
                        self.initializations.push(receiver);
                    }
                }
                if let Some(return_type) = &method.descriptor.return_type {
                    self.push_field_type(return_type, types);
                }
            }
            InvokeDynamic(call_site) => {
                self.pop_n(call_site.descriptor.parameter_length(false));
                if let Some(return_type) = &call_site.descriptor.return_type {
                    self.push_field_type(return_type, types);
                }
            }

            New(RefType::Object(class)) => {
                let handle = types.uninitialized(class.clone(), block, offset_in_block);
                self.push(AbstractType::Known(VerificationType::Uninitialized(handle)));
            }
            New(other) => {
                let object = types.object_type(other);
                self.push_object(object);
            }
            NewArray(base_type) => {
                self.pop();
                self.push_object(ObjectType {
                    dimensions: 1,
                    element: ElementType::Base(*base_type),
                });
            }
            ANewArray(class) => {
                self.pop();
                let object = types.object_type(class).array_of();
                self.push_object(object);
            }
            ArrayLength | InstanceOf(_) => {
                self.pop();
                self.push(INTEGER);
            }
            CheckCast(class) => {
                self.pop();
                let object = types.object_type(class);
                self.push_object(object);
            }
            MonitorEnter | MonitorExit => self.pop_n(1),
            MultiANewArray(class, dimensions) => {
                self.pop_n(*dimensions as usize);
                let object = types.object_type(class);
                self.push_object(object);
            }
        }
    }

    /// Record the operands consumed by the branch instruction ending the block
    pub fn execute_branch<Lbl, LblWide, LblNext>(
        &mut self,
        branch: &BranchInstruction<Lbl, LblWide, LblNext>,
    ) {
        use BranchInstruction::*;

        let popped = match branch {
            If(..) | IfNull(..) | TableSwitch { .. } | LookupSwitch { .. } => 1,
            IfICmp(..) | IfACmp(..) => 2,
            IReturn | FReturn | AReturn | AThrow => 1,
            LReturn | DReturn => 2,
            Return | Goto(_) | GotoW(_) | Jsr(..) | JsrW(..) | Ret(_) | FallThrough(_) => 0,
        };
        self.pop_n(popped);
    }

    fn resolve(&self, abstract_type: &AbstractType, input: &SlotFrame) -> VType {
        let relative = match abstract_type {
            AbstractType::Known(vtype) => return *vtype,
            AbstractType::Relative(relative) => relative,
        };

        let mut vtype = match relative.base {
            RelativeBase::InputLocal(idx) => input.locals.get(idx as usize).copied(),
            RelativeBase::InputStack(depth) => input
                .stack
                .len()
                .checked_sub(depth)
                .and_then(|idx| input.stack.get(idx))
                .copied(),
        }
        .unwrap_or(VerificationType::Top);

        for _ in 0..relative.element_of {
            vtype = match vtype {
                VerificationType::Object(object) => object.element_of(),
                VerificationType::Null => VerificationType::Null,
                _ => VerificationType::Top,
            };
        }

        if relative.top_if_wide && vtype.width() == 2 {
            vtype = VerificationType::Top;
        }
        vtype
    }

    /// Pairs of (uninitialized, initialized) types for the constructors called in the block
    fn initialized_types(
        &self,
        input: &SlotFrame,
        types: &mut TypeTable,
        this_class: &BinaryName,
    ) -> Vec<(VType, VType)> {
        let mut initialized = vec![];
        for receiver in &self.initializations {
            let uninitialized = self.resolve(receiver, input);
            let class = match uninitialized {
                VerificationType::UninitializedThis => this_class.clone(),
                VerificationType::Uninitialized(handle) => types.class_name(handle).clone(),
                _ => continue,
            };
            let object = ObjectType::class(types.object(class));
            initialized.push((uninitialized, VerificationType::Object(object)));
        }
        initialized
    }

    /// Frame at the end of the block, given the frame at its start
    ///
    /// The input stack must have at least [`BlockFrame::popped`] entries.
    pub fn output_frame(
        &self,
        input: &SlotFrame,
        types: &mut TypeTable,
        this_class: &BinaryName,
    ) -> SlotFrame {
        let initialized = self.initialized_types(input, types, this_class);
        let substitute = |vtype: VType| -> VType {
            initialized
                .iter()
                .find(|(uninitialized, _)| *uninitialized == vtype)
                .map_or(vtype, |(_, initialized)| *initialized)
        };

        let locals_len = input.locals.len().max(self.output_locals.len());
        let locals = (0..locals_len)
            .map(|idx| {
                let vtype = match self.output_locals.get(idx) {
                    Some(Some(abstract_type)) => self.resolve(abstract_type, input),
                    _ => input
                        .locals
                        .get(idx)
                        .copied()
                        .unwrap_or(VerificationType::Top),
                };
                substitute(vtype)
            })
            .collect();

        let kept = input.stack.len().saturating_sub(self.popped);
        let stack = input.stack[..kept]
            .iter()
            .copied()
            .chain(
                self.output_stack
                    .iter()
                    .map(|abstract_type| self.resolve(abstract_type, input)),
            )
            .map(substitute)
            .collect();

        SlotFrame { locals, stack }
    }

    /// Frame on entry to an exception handler covering the block
    ///
    /// Since the exception could be thrown anywhere in the block, every local is the merge of all
    /// the values it held over the course of the block. The stack holds only the exception.
    pub fn exception_frame(
        &self,
        input: &SlotFrame,
        output: &SlotFrame,
        catch_type: VType,
        types: &mut TypeTable,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<SlotFrame, Error> {
        let mut locals = input.locals.clone();
        let locals_len = locals.len().max(output.locals.len());
        locals.resize(locals_len, VerificationType::Top);

        for (idx, abstract_type) in &self.assigned_locals {
            let assigned = self.resolve(abstract_type, input);
            let idx = *idx as usize;
            if idx >= locals.len() {
                locals.resize(idx + 1, VerificationType::Top);
            }
            locals[idx] = locals[idx].merge(assigned, types, hierarchy)?;
        }
        for (local, output_local) in locals.iter_mut().zip(&output.locals) {
            *local = local.merge(*output_local, types, hierarchy)?;
        }

        Ok(SlotFrame {
            locals,
            stack: vec![catch_type],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ObjectHierarchy;
    use crate::jvm::{ConstantData, MethodDescriptor, MethodRef, Name, UnqualifiedName};

    fn string_type(types: &mut TypeTable) -> VType {
        types.field_type(&FieldType::object(BinaryName::STRING))
    }

    fn run(frame: &mut BlockFrame, types: &mut TypeTable, insns: Vec<SymbolicInstruction>) {
        for (offset, insn) in insns.iter().enumerate() {
            frame.execute(insn, types, BlockId(0), offset);
        }
    }

    #[test]
    fn straight_line_effect() {
        let mut types = TypeTable::new();
        let mut frame = BlockFrame::default();
        run(
            &mut frame,
            &mut types,
            vec![
                Instruction::ALoad(0),
                Instruction::ILoad(1),
                Instruction::LConst1,
                Instruction::LStore(2),
                Instruction::Pop,
                Instruction::Ldc(ConstantData::Double(1.5)),
            ],
        );
        assert_eq!(frame.popped(), 0);
        assert_eq!(frame.relative_height(), 3);
        assert_eq!(frame.max_relative_height(), 4);

        let string = string_type(&mut types);
        let input = SlotFrame {
            locals: vec![
                string,
                VerificationType::Integer,
                VerificationType::Top,
                VerificationType::Top,
            ],
            stack: vec![VerificationType::Float],
        };
        let output = frame.output_frame(&input, &mut types, &BinaryName::OBJECT);
        assert_eq!(
            output.locals,
            vec![
                string,
                VerificationType::Integer,
                VerificationType::Long,
                VerificationType::Top,
            ]
        );
        assert_eq!(
            output.stack,
            vec![
                VerificationType::Float,
                string,
                VerificationType::Double,
                VerificationType::Top,
            ]
        );
    }

    #[test]
    fn popping_into_the_input_stack() {
        let mut types = TypeTable::new();
        let mut frame = BlockFrame::default();
        run(
            &mut frame,
            &mut types,
            vec![Instruction::Swap, Instruction::AStore(1)],
        );
        assert_eq!(frame.popped(), 2);
        assert_eq!(frame.relative_height(), -1);

        let string = string_type(&mut types);
        let input = SlotFrame {
            locals: vec![VerificationType::Integer, VerificationType::Top],
            stack: vec![string, VerificationType::Null],
        };
        let output = frame.output_frame(&input, &mut types, &BinaryName::OBJECT);
        assert_eq!(output.locals, vec![VerificationType::Integer, string]);
        assert_eq!(output.stack, vec![VerificationType::Null]);
    }

    #[test]
    fn storing_clobbers_wide_local() {
        let mut types = TypeTable::new();
        let mut frame = BlockFrame::default();
        run(
            &mut frame,
            &mut types,
            vec![Instruction::IConst0, Instruction::IStore(1)],
        );
        let input = SlotFrame {
            locals: vec![VerificationType::Long, VerificationType::Top],
            stack: vec![],
        };
        let output = frame.output_frame(&input, &mut types, &BinaryName::OBJECT);
        assert_eq!(
            output.locals,
            vec![VerificationType::Top, VerificationType::Integer]
        );

        // A non-wide value in the previous slot survives
        let input = SlotFrame {
            locals: vec![VerificationType::Float, VerificationType::Top],
            stack: vec![],
        };
        let output = frame.output_frame(&input, &mut types, &BinaryName::OBJECT);
        assert_eq!(
            output.locals,
            vec![VerificationType::Float, VerificationType::Integer]
        );
    }

    #[test]
    fn constructor_initializes_value() {
        let mut types = TypeTable::new();
        let mut frame = BlockFrame::default();
        let init = MethodRef::new(
            BinaryName::STRING,
            UnqualifiedName::INIT,
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
        run(
            &mut frame,
            &mut types,
            vec![
                Instruction::New(RefType::Object(BinaryName::STRING)),
                Instruction::Dup,
                Instruction::Invoke(InvokeType::Special, init.clone()),
                Instruction::ALoad(0),
                Instruction::Invoke(
                    InvokeType::Special,
                    MethodRef::new(BinaryName::OBJECT, UnqualifiedName::INIT, init.descriptor),
                ),
            ],
        );

        let input = SlotFrame {
            locals: vec![VerificationType::UninitializedThis],
            stack: vec![],
        };
        let this_class = BinaryName::from_str("me/Point").unwrap();
        let output = frame.output_frame(&input, &mut types, &this_class);
        let point = types.field_type(&FieldType::object(this_class));
        let string = string_type(&mut types);
        assert_eq!(output.locals, vec![point]);
        assert_eq!(output.stack, vec![string]);
    }

    #[test]
    fn array_elements() {
        let mut types = TypeTable::new();
        let mut frame = BlockFrame::default();
        run(
            &mut frame,
            &mut types,
            vec![
                Instruction::ALoad(0),
                Instruction::IConst0,
                Instruction::AALoad,
                Instruction::IConst0,
                Instruction::AALoad,
            ],
        );
        let nested = types.field_type(&FieldType::array(FieldType::array(FieldType::object(
            BinaryName::STRING,
        ))));
        let input = SlotFrame {
            locals: vec![nested],
            stack: vec![],
        };
        let output = frame.output_frame(&input, &mut types, &BinaryName::OBJECT);
        let string = string_type(&mut types);
        assert_eq!(output.stack, vec![string]);
    }

    #[test]
    fn exception_frame_merges_assignments() {
        let mut types = TypeTable::new();
        let mut frame = BlockFrame::default();
        run(
            &mut frame,
            &mut types,
            vec![
                Instruction::IConst0,
                Instruction::IStore(0),
                Instruction::AConstNull,
                Instruction::AStore(0),
                Instruction::IConst1,
                Instruction::IStore(1),
            ],
        );
        let input = SlotFrame {
            locals: vec![VerificationType::Integer, VerificationType::Integer],
            stack: vec![VerificationType::Float],
        };
        let output = frame.output_frame(&input, &mut types, &BinaryName::OBJECT);
        let throwable = types.field_type(&FieldType::object(BinaryName::THROWABLE));
        let handler = frame
            .exception_frame(&input, &output, throwable, &mut types, &ObjectHierarchy)
            .unwrap();
        assert_eq!(
            handler.locals,
            vec![VerificationType::Top, VerificationType::Integer]
        );
        assert_eq!(handler.stack, vec![throwable]);
    }
}
