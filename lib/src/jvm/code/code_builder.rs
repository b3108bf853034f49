use crate::jvm::class_builder::{ClassBuilder, ComputeMode};
use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, ConstantsWriter, Exceptions, Method, Utf8ConstantIndex,
};
use crate::jvm::code::{
    dataflow, BasicBlock, BlockId, BranchInstruction, Code, CodePosition, Edge, EdgeKind,
    ExceptionRange, Instruction, LocalVariableRange, SerializableInstruction, StoredFrames,
    SymbolicInstruction, SynLabel, SynLabelGenerator,
};
use crate::jvm::verifier::{BlockFrame, TypeHandle, TypeTable};
use crate::jvm::{
    BinaryName, Error, FieldType, MethodAccessFlags, MethodDescriptor, Name, RenderDescriptor,
    UnqualifiedName,
};
use crate::util::{OffsetVec, Width};
use std::cell::RefCell;
use std::collections::HashMap;

/// This provides an interface for building up method bodies from top to bottom. Instructions and
/// labels get pushed in program order, and the builder splits them into basic blocks as it goes.
///
/// ### Computing frames
///
/// Every basic block records the effect it has on the frame as it is built up, but it cannot know
/// its own input frame yet (that depends on jumps which might not have been pushed yet). The
/// effects are instead expressed relative to the unknown input frame. Once the method is
/// finished, a fixpoint analysis over the block graph resolves the input frames (see
/// [`dataflow`]), and only then are jumps sized and everything serialized.
///
/// What gets computed depends on the [`ComputeMode`] of the class:
///
///   - [`ComputeMode::Frames`] infers full frames for a `StackMapTable`, along with max stack and
///     locals. Unreachable code gets replaced with `nop`s followed by `athrow`.
///   - [`ComputeMode::MaxStackAndLocals`] only tracks stack heights, which also works for
///     subroutines.
///   - [`ComputeMode::Nothing`] uses the values from [`CodeBuilder::set_max_stack_and_locals`].
///
/// ### Labels
///
/// Labels are generated with [`CodeBuilder::fresh_label`] and placed (exactly once) with
/// [`CodeBuilder::place_label`]. They can be used as jump targets before or after they are
/// placed. Placing a label starts a new block (unless the current block is still empty), so debug
/// information which shouldn't affect the shape of the code refers to a [`CodePosition`] instead.
pub struct CodeBuilder<'c, 'h> {
    class: &'c mut ClassBuilder<'h>,

    access_flags: MethodAccessFlags,
    name: UnqualifiedName,
    descriptor: MethodDescriptor<BinaryName>,

    label_generator: SynLabelGenerator,

    /// Blocks closed so far, in layout order
    blocks: Vec<BasicBlock<SynLabel, SynLabel>>,

    /// Block currently under construction (its identifier is `blocks.len()`)
    current: CurrentBlock,

    /// Block of every label placed so far
    label_blocks: HashMap<SynLabel, BlockId>,

    /// Classes and `new` sites used in frames
    types: TypeTable,

    exception_handlers: Vec<PendingHandler>,
    line_numbers: Vec<(CodePosition, u16)>,
    local_variables: Vec<LocalVariableRange>,

    /// One past the highest local variable slot used so far
    max_locals: usize,

    /// Explicit max stack and locals, used only if nothing is being computed
    max_stack_and_locals_hint: Option<(u16, u16)>,

    throws: Vec<ClassConstantIndex>,
    attributes: Vec<Attribute>,
}

struct CurrentBlock {
    instructions: OffsetVec<SerializableInstruction>,
    frame: BlockFrame,
}

impl CurrentBlock {
    fn new() -> CurrentBlock {
        CurrentBlock {
            instructions: OffsetVec::new(),
            frame: BlockFrame::default(),
        }
    }

    fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

struct PendingHandler {
    start: SynLabel,
    end: SynLabel,
    handler: SynLabel,
    catch_type: Option<ClassConstantIndex>,
    catch_handle: TypeHandle,
}

impl<'c, 'h> CodeBuilder<'c, 'h> {
    /// Start building the body of a method of the class
    pub fn new(
        class: &'c mut ClassBuilder<'h>,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> CodeBuilder<'c, 'h> {
        let max_locals =
            descriptor.parameter_length(!access_flags.contains(MethodAccessFlags::STATIC));

        let mut label_generator = SynLabelGenerator::new(SynLabel::START);
        let mut label_blocks = HashMap::new();
        label_blocks.insert(label_generator.fresh_label(), BlockId(0));

        CodeBuilder {
            class,
            access_flags,
            name,
            descriptor,
            label_generator,
            blocks: vec![],
            current: CurrentBlock::new(),
            label_blocks,
            types: TypeTable::new(),
            exception_handlers: vec![],
            line_numbers: vec![],
            local_variables: vec![],
            max_locals,
            max_stack_and_locals_hint: None,
            throws: vec![],
            attributes: vec![],
        }
    }

    /// Name and descriptor of the method, as used in error messages
    pub fn method_name(&self) -> String {
        format!("{}{}", self.name.as_str(), self.descriptor.render())
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> SynLabel {
        self.label_generator.fresh_label()
    }

    fn current_block_id(&self) -> BlockId {
        BlockId(self.blocks.len())
    }

    /// Current position in the code, which does not start a new block
    pub fn position(&self) -> CodePosition {
        CodePosition {
            block: self.current_block_id(),
            offset_in_block: self.current.instructions.offset_len().0,
        }
    }

    fn touch_local(&mut self, extent: usize) {
        self.max_locals = self.max_locals.max(extent);
    }

    /// Close the current block and open a new one starting at `next_label`
    fn close_block(
        &mut self,
        branch_end: BranchInstruction<SynLabel, SynLabel, ()>,
        edges: Vec<Edge<SynLabel>>,
        next_label: SynLabel,
    ) {
        let current = std::mem::replace(&mut self.current, CurrentBlock::new());
        self.blocks.push(BasicBlock {
            instructions: current.instructions,
            branch_end,
            frame: current.frame,
            edges,
            widened: false,
        });
        self.label_blocks.insert(next_label, self.current_block_id());
    }

    /// Place a label at the current position
    ///
    /// If the current block already has instructions, it falls through into a new block starting
    /// at the label.
    pub fn place_label(&mut self, label: SynLabel) -> Result<(), Error> {
        if self.label_blocks.contains_key(&label) {
            return Err(Error::DuplicateLabel(label));
        }

        if self.current.is_empty() {
            let current_block = self.current_block_id();
            self.label_blocks.insert(label, current_block);
        } else {
            let relative_height = self.current.frame.relative_height();
            let edges = vec![Edge {
                successor: label,
                kind: EdgeKind::FallThrough,
                relative_height,
            }];
            self.close_block(BranchInstruction::FallThrough(()), edges, label);
        }
        Ok(())
    }

    /// Push a new instruction to the current block
    pub fn push_instruction(&mut self, insn: SymbolicInstruction) -> Result<(), Error> {
        // `ldc` vs. `ldc2_w` depends only on the type of the constant
        let insn = match insn {
            Instruction::Ldc(constant) | Instruction::Ldc2(constant) => {
                if constant.width() == 2 {
                    Instruction::Ldc2(constant)
                } else {
                    Instruction::Ldc(constant)
                }
            }
            other => other,
        };

        let block = self.current_block_id();
        let offset_in_block = self.current.instructions.offset_len().0;
        self.current
            .frame
            .execute(&insn, &mut self.types, block, offset_in_block);
        if let Some(extent) = insn.locals_extent() {
            self.touch_local(extent);
        }

        let constants = RefCell::new(&mut self.class.constants_pool);
        let insn = insn.map(
            |class| class.constant_index(&mut constants.borrow_mut()),
            |constant| constant.constant_index(&mut constants.borrow_mut()),
            |field| field.constant_index(&mut constants.borrow_mut()),
            |method| method.constant_index(&mut constants.borrow_mut()),
            |call_site| call_site.constant_index(&mut constants.borrow_mut()),
        )?;
        self.current.instructions.push(insn);
        Ok(())
    }

    /// Push a branch instruction, ending the current block
    ///
    /// The fallthrough target is always the next block, so it is left as `()`. A new block is
    /// started right after the branch (if it can't be reached from the branch, it'll be dead
    /// unless a label placed there is jumped to).
    pub fn push_branch_instruction(
        &mut self,
        insn: BranchInstruction<SynLabel, SynLabel, ()>,
    ) -> Result<(), Error> {
        if let BranchInstruction::FallThrough(()) = insn {
            return Ok(());
        }

        self.current.frame.execute_branch(&insn);
        let relative_height = self.current.frame.relative_height();
        if let BranchInstruction::Ret(idx) = insn {
            self.touch_local(idx as usize + 1);
        }

        let next_label = self.fresh_label();
        let mut edges: Vec<Edge<SynLabel>> = vec![];
        if insn.is_subroutine_call() {
            edges.push(Edge {
                successor: next_label,
                kind: EdgeKind::SubroutineReturn,
                relative_height,
            });
            for target in insn.jump_targets().targets() {
                edges.push(Edge {
                    successor: *target,
                    kind: EdgeKind::SubroutineCall,
                    relative_height,
                });
            }
        } else {
            for target in insn.jump_targets().targets() {
                if edges.iter().all(|edge| edge.successor != *target) {
                    edges.push(Edge {
                        successor: *target,
                        kind: EdgeKind::Jump,
                        relative_height,
                    });
                }
            }
            if insn.fallthrough_target().is_some() {
                edges.push(Edge {
                    successor: next_label,
                    kind: EdgeKind::FallThrough,
                    relative_height,
                });
            }
        }

        self.close_block(insn, edges, next_label);
        Ok(())
    }

    /// Associate a source line number with the current position
    pub fn add_line_number(&mut self, line_number: u16) {
        let position = self.position();
        self.line_numbers.push((position, line_number));
    }

    /// Name a local variable slot between two positions
    pub fn add_local_variable(
        &mut self,
        start: CodePosition,
        end: CodePosition,
        name: &UnqualifiedName,
        descriptor: &FieldType<BinaryName>,
        index: u16,
    ) -> Result<(), Error> {
        let name_index: Utf8ConstantIndex = self.class.constants_pool.get_utf8(name.as_str())?;
        let descriptor_index = self.class.constants_pool.get_utf8(descriptor.render())?;
        self.touch_local(index as usize + descriptor.width());
        self.local_variables.push(LocalVariableRange {
            start,
            end,
            name_index,
            descriptor_index,
            index,
        });
        Ok(())
    }

    /// Register an exception handler for the code between `start` (inclusive) and `end`
    /// (exclusive)
    ///
    /// Handlers registered earlier take priority. When `catch_type` is `None`, everything is
    /// caught.
    pub fn add_exception_handler(
        &mut self,
        start: SynLabel,
        end: SynLabel,
        handler: SynLabel,
        catch_type: Option<BinaryName>,
    ) -> Result<(), Error> {
        let (catch_type, catch_class) = match catch_type {
            Some(class) => (
                Some(class.constant_index(&mut self.class.constants_pool)?),
                class,
            ),
            None => (None, BinaryName::THROWABLE),
        };
        let catch_handle = self.types.object(catch_class);
        self.exception_handlers.push(PendingHandler {
            start,
            end,
            handler,
            catch_type,
            catch_handle,
        });
        Ok(())
    }

    /// Provide max stack and locals explicitly
    ///
    /// This is ignored unless the class is built with [`ComputeMode::Nothing`].
    pub fn set_max_stack_and_locals(&mut self, max_stack: u16, max_locals: u16) {
        self.max_stack_and_locals_hint = Some((max_stack, max_locals));
    }

    /// Declare an exception the method may throw (in the `Exceptions` attribute)
    pub fn declare_throws(&mut self, class: &BinaryName) -> Result<(), Error> {
        let class_index = class.constant_index(&mut self.class.constants_pool)?;
        self.throws.push(class_index);
        Ok(())
    }

    /// Add an extra method attribute (after `Code` and `Exceptions`)
    pub fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Finish the method body, and add the method to the class
    pub fn finish(self) -> Result<(), Error> {
        let method_name = self.method_name();
        self.finish_method().map_err(|err| err.in_method(method_name))
    }

    fn finish_method(mut self) -> Result<(), Error> {
        let method_name = self.method_name();

        // Labels on a trailing empty block already refer to the end of the method
        if !self.current.is_empty() {
            let end_label = self.fresh_label();
            let relative_height = self.current.frame.relative_height();
            let edges = vec![Edge {
                successor: end_label,
                kind: EdgeKind::FallThrough,
                relative_height,
            }];
            self.close_block(BranchInstruction::FallThrough(()), edges, end_label);
        }
        if self.blocks.is_empty() {
            return Err(Error::MethodCodeNotFinished);
        }
        let end = BlockId(self.blocks.len());

        // Resolve labels into block identifiers
        let lookup = |label: &SynLabel| -> Result<BlockId, Error> {
            self.label_blocks
                .get(label)
                .copied()
                .ok_or(Error::UnplacedLabel(*label))
        };
        for block in &self.blocks {
            for edge in &block.edges {
                lookup(&edge.successor)?;
            }
        }
        let mut exception_handlers = vec![];
        for pending in &self.exception_handlers {
            let range = ExceptionRange {
                start: lookup(&pending.start)?,
                end: lookup(&pending.end)?,
                handler: lookup(&pending.handler)?,
                catch_type: pending.catch_type,
            };
            if range.start > range.end {
                return Err(Error::InvalidExceptionRange {
                    start: pending.start,
                    end: pending.end,
                });
            }
            exception_handlers.push((range, pending.catch_handle));
        }
        let label_blocks = &self.label_blocks;
        let mut blocks: Vec<BasicBlock<BlockId, BlockId>> = std::mem::take(&mut self.blocks)
            .into_iter()
            .map(|block| block.map_labels(|label| label_blocks.get(label).copied().unwrap_or(end)))
            .collect();

        // Every block covered by a handler might jump to it
        for (range, catch_handle) in &exception_handlers {
            for block in &mut blocks[range.start.0.min(end.0)..range.end.0.min(end.0)] {
                block.edges.push(Edge {
                    successor: range.handler,
                    kind: EdgeKind::Exception(*catch_handle),
                    relative_height: 0,
                });
            }
        }
        let mut exception_handlers: Vec<ExceptionRange> = exception_handlers
            .into_iter()
            .map(|(range, _)| range)
            .collect();

        // Analyze the control flow graph
        let mode = self.class.effective_mode();
        let mut dead_blocks = vec![];
        let (max_stack, max_locals, frames) = match mode {
            ComputeMode::Frames => {
                let entry = dataflow::entry_frame(
                    self.access_flags,
                    &self.class.this_class,
                    &self.name,
                    &self.descriptor,
                    self.max_locals,
                    &mut self.types,
                );
                let analysis = dataflow::compute_frames(
                    &blocks,
                    entry.clone(),
                    &self.class.this_class,
                    &mut self.types,
                    self.class.hierarchy,
                )?;
                dead_blocks = dataflow::replace_dead_blocks(&mut blocks, &analysis);

                let mut inputs = analysis.inputs;
                let mut must_store = analysis.must_store;
                let mut max_stack = analysis.max_stack;
                if !dead_blocks.is_empty() {
                    let dead_frame = dataflow::dead_block_frame(&mut self.types);
                    for dead in &dead_blocks {
                        inputs[dead.0] = Some(dead_frame.clone());
                        must_store[dead.0] = true;
                    }
                    max_stack = max_stack.max(1);
                    exception_handlers = exception_handlers
                        .iter()
                        .flat_map(|range| range.excise(&dead_blocks))
                        .collect();
                }

                let frames = StoredFrames {
                    entry,
                    inputs,
                    must_store,
                };
                (max_stack, self.max_locals, Some(frames))
            }
            ComputeMode::MaxStackAndLocals => {
                let max_stack = dataflow::compute_max_stack(&blocks)?;
                (max_stack, self.max_locals, None)
            }
            ComputeMode::Nothing => match self.max_stack_and_locals_hint {
                Some((max_stack, max_locals)) => (max_stack as usize, max_locals as usize, None),
                None => (0, self.max_locals, None),
            },
        };

        log::debug!(
            "{}: {} blocks, max stack {}, max locals {}, {} dead blocks",
            method_name,
            blocks.len(),
            max_stack,
            max_locals,
            dead_blocks.len(),
        );

        let code = Code {
            max_locals,
            max_stack,
            blocks,
            frames,
            exception_handlers,
            line_numbers: self.line_numbers,
            local_variables: self.local_variables,
        };
        let code = code.serialize_code(&mut self.class.constants_pool, &self.types)?;
        log::debug!("{}: {} bytes of code", method_name, code.code_array.0.len());

        let constants_pool = &mut self.class.constants_pool;
        let mut attributes = vec![constants_pool.get_attribute(code)?];
        if !self.throws.is_empty() {
            attributes.push(constants_pool.get_attribute(Exceptions(self.throws))?);
        }
        attributes.extend(self.attributes);

        let method = Method {
            access_flags: self.access_flags,
            name_index: constants_pool.get_utf8(self.name.as_str())?,
            descriptor_index: constants_pool.get_utf8(self.descriptor.render())?,
            attributes,
        };
        self.class.push_method(method)?;
        Ok(())
    }
}
