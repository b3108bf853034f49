//! This module is responsible for fixing jumps that require bigger relative offsets than the jump
//! instruction supports. The general idea is to switch to using `goto_w` for all jumps that don't
//! fit in the signed 16-bit offset that most other jump instructions have.
//!
//! ### Termination
//!
//! This is a tricky problem because the `goto_w` rewrites are themselves longer than the initial
//! jump instruction, so the rewrites risk causing other jumps to become oversized and also need to
//! be rewritten. Thankfully, we know the process will finish because the number of rewritable
//! 16-bit jump instructions only ever decreases: once a jump is rewritten, it is never considered
//! again (`goto_w` is definitely enough) and rewrites never shrink.
//!
//! Switch padding depends on the absolute offset of the switch, so it is recomputed on every
//! iteration along with block offsets.
//!
//! ### Rewriting
//!
//! There are two categories of 16-bit jumps that need to be rewritten. `goto` and `jsr` just
//! become `goto_w` and `jsr_w`. Conditional branches have no wide form, so the block gets marked
//! as widened, meaning it'll be serialized as the inverted condition jumping over a `goto_w`:
//!
//! ```text,ignore,no_run
//!                           ifnot* L1
//!     if* L2                goto_w L2
//! L1: ...         =>    L1: ...
//!     ...                   ...
//! L2: ...               L2: ...
//! ```

use super::{BasicBlock, BlockId, BranchInstruction};
use crate::jvm::Error;
use crate::util::Offset;
use std::ops::Range;

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: Range<isize> = Range {
    start: i16::MIN as isize,
    end: i16::MAX as isize + 1,
};

/// Largest valid length of a code array
pub const MAX_CODE_LENGTH: usize = u16::MAX as usize;

/// Compute the offset of every block, followed by the end offset of the code
///
/// Switch padding is updated to match the offsets.
pub fn block_offsets(blocks: &mut [BasicBlock<BlockId, BlockId>]) -> Vec<Offset> {
    let mut offsets = Vec::with_capacity(blocks.len() + 1);
    let mut offset = 0;
    for block in blocks.iter_mut() {
        offsets.push(Offset(offset));
        let branch_offset = offset + block.instructions.offset_len().0;
        block.branch_end.set_padding(branch_offset);
        offset = branch_offset + block.branch_width();
    }
    offsets.push(Offset(offset));
    offsets
}

/// Rewrite jumps until all of their relative offsets fit in `jump_range`, then return the final
/// block offsets
pub fn widen_oversized_jumps(
    blocks: &mut [BasicBlock<BlockId, BlockId>],
    jump_range: Range<isize>,
) -> Result<Vec<Offset>, Error> {
    let mut iteration = 0;
    loop {
        let offsets = block_offsets(blocks);
        let mut widened = 0;

        for (idx, block) in blocks.iter_mut().enumerate() {
            let branch_offset = (offsets[idx].0 + block.instructions.offset_len().0) as isize;
            let fits = |target: &BlockId| {
                jump_range.contains(&(offsets[target.0].0 as isize - branch_offset))
            };

            match &block.branch_end {
                BranchInstruction::Goto(target) if !fits(target) => {
                    block.branch_end = BranchInstruction::GotoW(*target);
                    widened += 1;
                }
                BranchInstruction::Jsr(target, ()) if !fits(target) => {
                    block.branch_end = BranchInstruction::JsrW(*target, ());
                    widened += 1;
                }
                BranchInstruction::If(_, target, ())
                | BranchInstruction::IfICmp(_, target, ())
                | BranchInstruction::IfACmp(_, target, ())
                | BranchInstruction::IfNull(_, target, ())
                    if !block.widened && !fits(target) =>
                {
                    block.widened = true;
                    widened += 1;
                }
                _ => (),
            }
        }

        log::trace!("resize iteration {}: widened {} jumps", iteration, widened);
        iteration += 1;

        if widened == 0 {
            let code_length = offsets[blocks.len()];
            if code_length.0 > MAX_CODE_LENGTH {
                return Err(Error::MethodCodeOverflow(code_length));
            }
            return Ok(offsets);
        }
    }
}

/// Rewrite jumps that don't fit in 16-bit offsets, and return the final block offsets
pub fn resolve_offsets(blocks: &mut [BasicBlock<BlockId, BlockId>]) -> Result<Vec<Offset>, Error> {
    widen_oversized_jumps(blocks, SIGNED_16BIT_JUMP_RANGE)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{Instruction, OrdComparison, SerializableInstruction};
    use crate::jvm::verifier::BlockFrame;

    fn block(
        instructions: Vec<SerializableInstruction>,
        branch_end: BranchInstruction<BlockId, BlockId, ()>,
    ) -> BasicBlock<BlockId, BlockId> {
        BasicBlock {
            instructions: instructions.into_iter().collect(),
            branch_end,
            frame: BlockFrame::default(),
            edges: vec![],
            widened: false,
        }
    }

    fn filler(count: usize) -> Vec<SerializableInstruction> {
        (0..count)
            .flat_map(|_| vec![Instruction::IConst1, Instruction::IAdd])
            .collect()
    }

    #[test]
    fn single_block() {
        let mut blocks = vec![block(
            vec![Instruction::IConst1, Instruction::IConst2, Instruction::IAdd],
            BranchInstruction::IReturn,
        )];
        let offsets = widen_oversized_jumps(&mut blocks, SIGNED_16BIT_JUMP_RANGE).unwrap();
        assert_eq!(offsets, vec![Offset(0), Offset(4)]);
        assert_eq!(blocks[0].branch_end, BranchInstruction::IReturn);
    }

    // Several block with a short jump that should not be rewritten
    #[test]
    fn short_jump() {
        let mut blocks = vec![
            block(vec![Instruction::IConst1], BranchInstruction::Goto(BlockId(2))),
            block(filler(1), BranchInstruction::IReturn),
            block(filler(1), BranchInstruction::IReturn),
        ];
        let offsets = widen_oversized_jumps(&mut blocks, -20..20).unwrap();
        assert_eq!(
            offsets,
            vec![Offset(0), Offset(4), Offset(7), Offset(10)]
        );
        assert_eq!(blocks[0].branch_end, BranchInstruction::Goto(BlockId(2)));
    }

    #[test]
    fn rewrite_goto_to_wide_goto() {
        let mut blocks = vec![
            block(vec![Instruction::IConst1], BranchInstruction::Goto(BlockId(2))),
            block(filler(20), BranchInstruction::IReturn),
            block(filler(1), BranchInstruction::Goto(BlockId(2))),
        ];
        let offsets = widen_oversized_jumps(&mut blocks, -20..20).unwrap();
        assert_eq!(blocks[0].branch_end, BranchInstruction::GotoW(BlockId(2)));
        assert_eq!(blocks[2].branch_end, BranchInstruction::Goto(BlockId(2)));
        assert_eq!(offsets[1], Offset(6));
        assert_eq!(offsets[2], Offset(6 + 41));
    }

    #[test]
    fn widen_conditional() {
        let mut blocks = vec![
            block(
                vec![Instruction::ILoad(0)],
                BranchInstruction::If(OrdComparison::EQ, BlockId(2), ()),
            ),
            block(filler(20), BranchInstruction::Return),
            block(vec![], BranchInstruction::Return),
        ];
        let offsets = widen_oversized_jumps(&mut blocks, -20..20).unwrap();
        assert!(blocks[0].widened);
        assert_eq!(
            blocks[0].branch_end,
            BranchInstruction::If(OrdComparison::EQ, BlockId(2), ())
        );
        assert_eq!(offsets[1], Offset(1 + 3 + 5));
    }

    // The first jump only goes out of range once the jump it skips over gets widened
    #[test]
    fn cascading_widening() {
        let mut blocks = vec![
            block(vec![], BranchInstruction::Goto(BlockId(2))),
            block(filler(3), BranchInstruction::Goto(BlockId(3))),
            block(filler(5), BranchInstruction::Return),
            block(vec![], BranchInstruction::Return),
        ];

        let offsets = widen_oversized_jumps(&mut blocks, -16..14).unwrap();
        assert_eq!(blocks[0].branch_end, BranchInstruction::GotoW(BlockId(2)));
        assert_eq!(blocks[1].branch_end, BranchInstruction::GotoW(BlockId(3)));
        assert_eq!(
            offsets,
            vec![Offset(0), Offset(5), Offset(16), Offset(27), Offset(28)]
        );
    }

    #[test]
    fn switch_padding_tracks_offsets() {
        let mut blocks = vec![
            block(
                vec![Instruction::ILoad(0)],
                BranchInstruction::TableSwitch {
                    padding: 0,
                    default: BlockId(1),
                    low: 0,
                    targets: vec![BlockId(1)],
                },
            ),
            block(vec![], BranchInstruction::Return),
        ];
        let offsets = widen_oversized_jumps(&mut blocks, SIGNED_16BIT_JUMP_RANGE).unwrap();
        assert!(matches!(
            blocks[0].branch_end,
            BranchInstruction::TableSwitch { padding: 2, .. }
        ));
        assert_eq!(offsets[1], Offset(1 + 1 + 2 + 16));
    }

    #[test]
    fn code_too_long() {
        let mut blocks = vec![block(filler(40000), BranchInstruction::Return)];
        assert!(matches!(
            resolve_offsets(&mut blocks),
            Err(Error::MethodCodeOverflow(Offset(80001)))
        ));
    }
}
