use super::{TypeTable, VType, VerificationType};
use crate::jvm::class_file::{ClassConstantIndex, ConstantsPool, StackMapFrame};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::Error;
use crate::util::{Offset, OffsetVec, Width};

/// Types of the locals and stack at some point in the code, one entry per slot
///
/// `long` and `double` take up two slots, the second of which is always `Top`. This is the
/// representation used while propagating frames, since instructions address locals and stack
/// entries by slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotFrame {
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

impl SlotFrame {
    /// Merge another frame into this one, returning whether this frame changed
    ///
    /// The stacks must have the same height. Locals missing on either side are `Top`.
    pub fn merge_from(
        &mut self,
        other: &SlotFrame,
        types: &mut TypeTable,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<bool, Error> {
        let mut changed = false;

        let locals_len = self.locals.len().max(other.locals.len());
        self.locals.resize(locals_len, VerificationType::Top);
        for (idx, local) in self.locals.iter_mut().enumerate() {
            let incoming = other
                .locals
                .get(idx)
                .copied()
                .unwrap_or(VerificationType::Top);
            let merged = local.merge(incoming, types, hierarchy)?;
            if merged != *local {
                *local = merged;
                changed = true;
            }
        }

        for (entry, incoming) in self.stack.iter_mut().zip(&other.stack) {
            let merged = entry.merge(*incoming, types, hierarchy)?;
            if merged != *entry {
                *entry = merged;
                changed = true;
            }
        }

        Ok(changed)
    }
}

/// Frame as it appears in the class file, with one entry per value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame<Cls, U> {
    pub locals: OffsetVec<VerificationType<Cls, U>>,
    pub stack: OffsetVec<VerificationType<Cls, U>>,
}

impl Frame<super::ObjectType, super::TypeHandle> {
    /// Collapse the slot representation
    ///
    /// The `Top` following a `long` or `double` is dropped, as are trailing `Top` locals.
    pub fn from_slots(frame: &SlotFrame) -> Self {
        let mut locals = collapse_slots(&frame.locals);
        while let Some(VerificationType::Top) = locals.last() {
            locals.pop();
        }
        Frame {
            locals: locals.into_iter().collect(),
            stack: collapse_slots(&frame.stack).into_iter().collect(),
        }
    }

    pub fn into_serializable(
        &self,
        types: &TypeTable,
        constants: &mut ConstantsPool,
        block_offsets: &[Offset],
    ) -> Result<Frame<ClassConstantIndex, u16>, Error> {
        let mut convert = |entries: &OffsetVec<VType>| {
            entries
                .iter()
                .map(|(_, _, t)| types.serializable(t, constants, block_offsets))
                .collect::<Result<OffsetVec<_>, Error>>()
        };
        let locals = convert(&self.locals)?;
        let stack = convert(&self.stack)?;
        Ok(Frame { locals, stack })
    }
}

fn collapse_slots(slots: &[VType]) -> Vec<VType> {
    let mut entries = Vec::with_capacity(slots.len());
    let mut idx = 0;
    while idx < slots.len() {
        let entry = slots[idx];
        idx += entry.width();
        entries.push(entry);
    }
    entries
}

impl Frame<ClassConstantIndex, u16> {
    /// Compute the most compact stack map frame encoding of this frame, given the previous frame
    ///
    /// The first frame in a method is compared against the implicit frame built from the method
    /// descriptor.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        let this_locals: Vec<_> = self.locals.iter().map(|(_, _, t)| *t).collect();
        let prev_locals: Vec<_> = previous_frame.locals.iter().map(|(_, _, t)| *t).collect();

        match self.stack.len() {
            0 => {
                if this_locals.len() <= prev_locals.len() {
                    let len_difference = prev_locals.len() - this_locals.len();
                    if len_difference < 4 && prev_locals.starts_with(&this_locals) {
                        if len_difference == 0 {
                            return StackMapFrame::SameLocalsNoStack { offset_delta };
                        } else {
                            return StackMapFrame::ChopLocalsNoStack {
                                offset_delta,
                                chopped_k: len_difference as u8,
                            };
                        }
                    }
                } else if this_locals.len() - prev_locals.len() < 4
                    && this_locals.starts_with(&prev_locals)
                {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: this_locals[prev_locals.len()..].to_vec(),
                    };
                }
            }
            1 if this_locals == prev_locals => {
                if let Some((_, _, stack)) = self.stack.iter().next() {
                    return StackMapFrame::SameLocalsOneStack {
                        offset_delta,
                        stack: *stack,
                    };
                }
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a full stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.iter().map(|(_, _, t)| *t).collect(),
            locals: self.locals.iter().map(|(_, _, t)| *t).collect(),
        }
    }
}
