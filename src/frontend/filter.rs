//! Tests whether a candidate callee body contains instructions that prevent
//! inlining, and substitutes every argument load with the caller's actual
//! argument value at the same time.

use crate::ir::instr::InstrKind;
use crate::ir::state::ValueStack;
use crate::ir::{BlockId, Ir};

/// Walks the single-block body starting at `block`'s first instruction.
/// Returns false if any instruction is not inline-safe; otherwise every
/// `LoadLocal` has its substitution set to the caller's matching stack
/// value.
pub fn filter_and_substitute(
    ir: &mut Ir,
    caller_state: &ValueStack,
    arg_size: usize,
    block: BlockId,
) -> bool {
    debug_assert!(caller_state.stack_size() >= arg_size, "stack too small");
    let arg_base = caller_state.stack_size() - arg_size;
    let chain: Vec<_> = ir.block_instrs(block).collect();
    for id in chain {
        match ir.instr(id).kind {
            InstrKind::LoadLocal { index } => {
                debug_assert!(index < arg_size, "index out of bounds");
                let actual = caller_state.stack_at(arg_base + index, ir);
                ir.instr_mut(id).subst = Some(actual);
            }
            // Pure computation and memory reads/writes are fine; so is the
            // terminating return.
            InstrKind::Constant(_)
            | InstrKind::ArithmeticOp { .. }
            | InstrKind::ShiftOp { .. }
            | InstrKind::LogicOp { .. }
            | InstrKind::CompareOp { .. }
            | InstrKind::NegateOp { .. }
            | InstrKind::Convert { .. }
            | InstrKind::ArrayLength { .. }
            | InstrKind::LoadField { .. }
            | InstrKind::StoreField { .. }
            | InstrKind::LoadIndexed { .. }
            | InstrKind::StoreIndexed { .. }
            | InstrKind::Phi { .. }
            | InstrKind::Return { .. } => {}
            // Anything that allocates, locks, calls, re-enters control flow
            // or touches the callee frame disqualifies the body.
            InstrKind::StoreLocal { .. }
            | InstrKind::CheckCast { .. }
            | InstrKind::InstanceOf { .. }
            | InstrKind::NullCheck { .. }
            | InstrKind::NewInstance { .. }
            | InstrKind::NewTypeArray { .. }
            | InstrKind::NewObjectArray { .. }
            | InstrKind::NewMultiArray { .. }
            | InstrKind::Invoke { .. }
            | InstrKind::IntrinsicCall { .. }
            | InstrKind::MonitorEnter { .. }
            | InstrKind::MonitorExit { .. }
            | InstrKind::Jsr { .. }
            | InstrKind::JsrContinuation
            | InstrKind::Ret { .. }
            | InstrKind::Throw { .. } => return false,
            // A single-block body cannot contain interior control transfers.
            InstrKind::Goto
            | InstrKind::If { .. }
            | InstrKind::TableSwitch { .. }
            | InstrKind::LookupSwitch { .. } => {
                unreachable!("control transfer inside a single-block inline body")
            }
        }
    }
    true
}

/// Resolves every value reference in the block (instruction inputs and state
/// stacks, including the entry state) through the substitution chain.
pub fn resolve_substitution(ir: &mut Ir, block: BlockId) {
    let resolve = |ir: &Ir, id| ir.subst_of(id);

    if let Some(mut state) = ir.block_mut(block).state.take() {
        state.replace_stack_values(ir, &mut |v| resolve(ir, v));
        ir.block_mut(block).state = Some(state);
    }
    let chain: Vec<_> = ir.block_instrs(block).collect();
    for id in chain {
        let mut kind = std::mem::replace(&mut ir.instr_mut(id).kind, InstrKind::JsrContinuation);
        kind.replace_inputs(&mut |v| resolve(ir, v));
        ir.instr_mut(id).kind = kind;
        if let Some(mut state) = ir.instr_mut(id).state.take() {
            state.replace_stack_values(ir, &mut |v| resolve(ir, v));
            ir.instr_mut(id).state = Some(state);
        }
    }
}
