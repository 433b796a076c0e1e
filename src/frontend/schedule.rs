//! Final ordering passes over the finished graph: weight assignment and
//! block collection, successor adjustment for fallthrough-friendly layout,
//! and use-count computation for the instruction scheduler.

use crate::flags::Flags;
use crate::ir::instr::InstrKind;
use crate::ir::{BlockId, InstrId, Ir, STD_ENTRY_FLAG};

/// Computes the final code order: collect all reachable blocks while
/// assigning weights, sort by weight, renumber and adjust branches, then
/// compute use counts in one backward sweep.
pub fn compute_code(ir: &mut Ir, flags: &Flags) {
    let mut code = collect_and_set_weights(ir);
    code.sort_by_key(|&block| ir.block(block).weight);
    adjust_sux_and_weights(ir, &code);
    compute_use_counts(ir, &code, flags);
    ir.set_code(code);
}

/// The ordering key favors source order (bci) first and distance from the
/// entry second; blocks ending in a throw or return sink towards the end.
fn calc_weight(ir: &mut Ir, block: BlockId, distance: u32) {
    let bci = ir.block(block).bci as u32;
    let mut weight = ((bci & 0x7ffff) << 10) | (distance & 0x3ff);
    if let Some(end) = ir.block(block).end {
        if !ir.block(block).is_flag_set(STD_ENTRY_FLAG) {
            match ir.instr(end).kind {
                InstrKind::Throw { .. } => weight |= 1 << 30,
                InstrKind::Return { .. } => weight |= 1 << 29,
                _ => {}
            }
        }
    }
    ir.block_mut(block).weight = weight;
}

/// Preorder walk over every reachable block (successors, subroutines and
/// exception handlers), setting weights in the same pass.
fn collect_and_set_weights(ir: &mut Ir) -> Vec<BlockId> {
    let mut marked = vec![false; ir.count_blocks()];
    let mut code = Vec::new();
    let mut worklist: Vec<(BlockId, u32)> = Vec::new();
    if let Some(osr) = ir.osr_entry() {
        worklist.push((osr, 0));
    }
    worklist.push((ir.std_entry(), 0));
    while let Some((block, distance)) = worklist.pop() {
        if std::mem::replace(&mut marked[block.0 as usize], true) {
            continue;
        }
        calc_weight(ir, block, distance);
        code.push(block);
        // Push order: successors, subroutines, handlers, each forward, so
        // pops see handlers first and each group in reverse, matching the
        // recursive formulation.
        let data = ir.block(block);
        let end = data.end.expect("collected block must be complete");
        let mut children: Vec<BlockId> = Vec::new();
        children.extend(ir.instr(end).sux.iter().copied());
        children.extend(data.subroutines.iter().copied());
        children.extend(data.xhandlers.iter().copied());
        for child in children {
            worklist.push((child, distance + 1));
        }
    }
    code
}

/// Reassigns weights strictly increasing from 0 in final order, and swaps
/// the successors of a two-way branch whose fallthrough is not the next
/// block while its taken side is, negating the condition to preserve
/// semantics.
fn adjust_sux_and_weights(ir: &mut Ir, code: &[BlockId]) {
    let mut prev: Option<BlockId> = None;
    for &block in code {
        match prev {
            None => ir.block_mut(block).weight = 0,
            Some(prev) => {
                ir.block_mut(block).weight = ir.block(prev).weight + 1;
                let end = ir.block(prev).end.expect("ordered block must be complete");
                let data = ir.instr(end);
                if data.sux.len() == 2
                    && *data.sux.last().unwrap() != block
                    && data.sux.contains(&block)
                    && matches!(data.kind, InstrKind::If { .. })
                {
                    let data = ir.instr_mut(end);
                    data.sux.swap(0, 1);
                    let InstrKind::If { cond, unordered_is_true, .. } = &mut data.kind else {
                        unreachable!()
                    };
                    *cond = cond.negate();
                    *unordered_is_true = !*unordered_is_true;
                }
            }
        }
        prev = Some(block);
    }
}

fn is_pinned(ir: &Ir, id: InstrId, flags: &Flags) -> bool {
    ir.instr(id).pinned || flags.pin_all_instructions
}

/// Marks one use of `value`; an unpinned value touched for the first time
/// propagates into its own operands first.
fn count_value(ir: &mut Ir, value: InstrId, flags: &Flags) {
    if !is_pinned(ir, value, flags) && ir.instr(value).use_count == 0 {
        count_uses(ir, value, flags);
    }
    ir.instr_mut(value).use_count += 1;
}

/// Counts the input values of `instr`, and for jumps and subroutine calls
/// also every value live in the attached state.
fn count_uses(ir: &mut Ir, instr: InstrId, flags: &Flags) {
    for value in ir.instr(instr).kind.inputs() {
        count_value(ir, value, flags);
    }
    let carries_state = matches!(ir.instr(instr).kind, InstrKind::Jsr { .. })
        || ir.instr(instr).kind.is_block_end();
    if carries_state {
        let live = match &ir.instr(instr).state {
            Some(state) => state.stack_values(ir),
            None => Vec::new(),
        };
        for value in live {
            count_value(ir, value, flags);
        }
    }
}

fn basic_compute_use_count(ir: &mut Ir, block: BlockId, flags: &Flags) {
    let chain: Vec<_> = ir.block_instrs(block).collect();
    for instr in chain {
        if is_pinned(ir, instr, flags) {
            count_uses(ir, instr, flags);
        }
    }
}

/// Pins instructions that ended up unused but can trap; they must stay.
fn update_pinning(ir: &mut Ir, block: BlockId) -> bool {
    let mut updated = false;
    let chain: Vec<_> = ir.block_instrs(block).collect();
    for instr in chain {
        if ir.instr(instr).use_count == 0 && ir.instr(instr).kind.can_trap() {
            ir.instr_mut(instr).pinned = true;
            updated = true;
        }
    }
    updated
}

fn clear_use_counts(ir: &mut Ir, block: BlockId) {
    let entry_values = match &ir.block(block).state {
        Some(state) => state.stack_values(ir),
        None => Vec::new(),
    };
    for value in entry_values {
        ir.instr_mut(value).use_count = 0;
    }
    let chain: Vec<_> = ir.block_instrs(block).collect();
    for instr in chain {
        ir.instr_mut(instr).use_count = 0;
    }
}

/// Two-pass fixed point per block: count, then if pinning changed, reset
/// and count exactly once more.
fn compute_use_counts(ir: &mut Ir, code: &[BlockId], flags: &Flags) {
    for &block in code.iter().rev() {
        basic_compute_use_count(ir, block, flags);
        if update_pinning(ir, block) {
            clear_use_counts(ir, block);
            basic_compute_use_count(ir, block, flags);
        }
    }
}
