use super::{BranchInstruction, SerializableInstruction};
use crate::jvm::verifier::{BlockFrame, TypeHandle};
use crate::util::{OffsetVec, Width};

/// Index of a basic block in a method body
///
/// Blocks are numbered in the order they are laid out in the code array. The identifier one past
/// the last block stands for the end of the method body.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

/// Position of an instruction relative to the block containing it
///
/// Since blocks move around when jumps are widened, this is the only stable way to refer to an
/// instruction before the code is serialized.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CodePosition {
    pub block: BlockId,
    pub offset_in_block: usize,
}

/// How control gets from one block to another
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Falling through from the end of a block (including the non-taken side of a conditional)
    FallThrough,

    /// Explicit jump target of a branch or switch
    Jump,

    /// `jsr` or `jsr_w` into the first block of a subroutine
    SubroutineCall,

    /// Control coming back after the subroutine called by the block returns
    SubroutineReturn,

    /// Exception handler covering the block (`Object` handle of the caught class)
    Exception(TypeHandle),
}

/// Outgoing control flow edge of a block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge<B> {
    pub successor: B,
    pub kind: EdgeKind,

    /// Stack height at the end of the block, relative to its input height, when taking the edge
    ///
    /// For exception edges, this is irrelevant (the stack is cleared) and always zero.
    pub relative_height: isize,
}

/// Straight-line instructions followed by exactly one branch instruction
#[derive(Debug)]
pub struct BasicBlock<Lbl, LblWide> {
    pub instructions: OffsetVec<SerializableInstruction>,
    pub branch_end: BranchInstruction<Lbl, LblWide, ()>,

    /// Effect of the block's instructions on the frame
    pub frame: BlockFrame,

    /// Outgoing edges (exception edges only get added once the method is finished)
    pub edges: Vec<Edge<Lbl>>,

    /// A conditional branch whose target is too far for a 16-bit offset gets encoded as the
    /// inverted condition jumping over a `goto_w` to the real target
    pub widened: bool,
}

impl<Lbl, LblWide> BasicBlock<Lbl, LblWide> {
    /// Width of the block's branch instruction, including the `goto_w` of a widened conditional
    pub fn branch_width(&self) -> usize {
        let extra = if self.widened { 5 } else { 0 };
        self.branch_end.width() + extra
    }

    /// Total width of the block in the code array
    pub fn width(&self) -> usize {
        self.instructions.offset_len().0 + self.branch_width()
    }
}

impl<Lbl: Copy> BasicBlock<Lbl, Lbl> {
    /// Swap out the representation of jump targets and edge successors
    pub fn map_labels<B: Copy>(self, map_label: impl Fn(&Lbl) -> B) -> BasicBlock<B, B> {
        BasicBlock {
            instructions: self.instructions,
            branch_end: self.branch_end.map_labels(&map_label, &map_label, |_| ()),
            frame: self.frame,
            edges: self
                .edges
                .iter()
                .map(|edge| Edge {
                    successor: map_label(&edge.successor),
                    kind: edge.kind,
                    relative_height: edge.relative_height,
                })
                .collect(),
            widened: self.widened,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::Instruction;

    #[test]
    fn widened_conditional_width() {
        let mut block: BasicBlock<BlockId, BlockId> = BasicBlock {
            instructions: vec![Instruction::ILoad(1), Instruction::ILoad(7)]
                .into_iter()
                .collect(),
            branch_end: BranchInstruction::If(crate::jvm::code::OrdComparison::EQ, BlockId(3), ()),
            frame: BlockFrame::default(),
            edges: vec![],
            widened: false,
        };
        assert_eq!(block.width(), 1 + 2 + 3);
        block.widened = true;
        assert_eq!(block.width(), 1 + 2 + 8);
    }
}
