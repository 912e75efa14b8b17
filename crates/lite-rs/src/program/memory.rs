//! Liveness-based reuse plan for intermediate tensors.
//!
//! Positions are instruction indices in the main block. A variable is live
//! from the instruction that first writes it to the last instruction that
//! reads it. Two variables may share a slot only when one's range ends
//! strictly before the other's begins.

use crate::graph::{BlockDesc, VarKind};
use crate::tensor::DType;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub start: usize,
    pub end: usize,
}

impl LiveRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// One shared storage location and the variables mapped onto it, in
/// assignment order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseSlot {
    pub id: usize,
    pub dtype: Option<DType>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPlan {
    pub slots: Vec<ReuseSlot>,
    pub assignments: BTreeMap<String, usize>,
    pub live_ranges: BTreeMap<String, LiveRange>,
}

impl MemoryPlan {
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.assignments.get(name).copied()
    }

    /// Number of variables that share a slot with at least one other variable.
    pub fn shared_var_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.members.len() > 1)
            .map(|slot| slot.members.len())
            .sum()
    }

    /// Computes the plan for `block`. Persistables, tensor arrays, feed
    /// targets, and fetch operands never take part in reuse.
    pub fn for_block(block: &BlockDesc) -> MemoryPlan {
        let mut excluded: HashSet<&str> = HashSet::new();
        for var in &block.vars {
            if var.persistable || var.kind == VarKind::TensorArray {
                excluded.insert(var.name.as_str());
            }
        }
        for op in &block.ops {
            match op.op_type.as_str() {
                "feed" => excluded.extend(op.output_names()),
                "fetch" => {
                    excluded.extend(op.input_names());
                    excluded.extend(op.output_names());
                }
                _ => {}
            }
        }

        let mut live_ranges: BTreeMap<String, LiveRange> = BTreeMap::new();
        for (pos, op) in block.ops.iter().enumerate() {
            for name in op.output_names() {
                if excluded.contains(name) || block.var(name).is_none() {
                    continue;
                }
                live_ranges
                    .entry(name.to_string())
                    .or_insert_with(|| LiveRange::new(pos, pos));
            }
        }
        for (pos, op) in block.ops.iter().enumerate() {
            for name in op.input_names() {
                if let Some(range) = live_ranges.get_mut(name) {
                    range.end = range.end.max(pos);
                }
            }
        }

        let mut groups: BTreeMap<Option<DType>, Vec<(&String, LiveRange)>> = BTreeMap::new();
        for (name, range) in &live_ranges {
            let dtype = block.var(name).and_then(|v| v.dtype);
            groups.entry(dtype).or_default().push((name, *range));
        }

        let mut slots: Vec<ReuseSlot> = Vec::new();
        let mut slot_end: Vec<usize> = Vec::new();
        let mut assignments = BTreeMap::new();
        for (dtype, mut members) in groups {
            members.sort_by(|a, b| (a.1.start, a.0).cmp(&(b.1.start, b.0)));
            let mut local_slots: Vec<usize> = Vec::new();
            for (name, range) in members {
                let reusable = local_slots
                    .iter()
                    .copied()
                    .find(|&slot_id| slot_end[slot_id] < range.start);
                let slot_id = match reusable {
                    Some(id) => id,
                    None => {
                        let id = slots.len();
                        slots.push(ReuseSlot {
                            id,
                            dtype,
                            members: Vec::new(),
                        });
                        slot_end.push(0);
                        local_slots.push(id);
                        id
                    }
                };
                slots[slot_id].members.push(name.clone());
                slot_end[slot_id] = slot_end[slot_id].max(range.end);
                assignments.insert(name.clone(), slot_id);
            }
        }

        MemoryPlan {
            slots,
            assignments,
            live_ranges,
        }
    }
}
