//! Builds the intermediate representation: leader discovery, graph
//! building, and the ordering/use-count post passes.

pub mod block_list;
pub mod canon;
pub mod filter;
pub mod graph;
pub mod schedule;

use crate::Bailout;
use crate::ci::Method;
use crate::flags::{Flags, SYNC_ENTRY_BCI};
use crate::frontend::block_list::BlockListBuilder;
use crate::frontend::graph::GraphBuilder;
use crate::ir::state::ValueStack;
use crate::ir::{Ir, ScopeId, TOP_SCOPE, WAS_VISITED_FLAG};
use std::sync::Arc;

/// Compiles the method's bytecode into a block-structured IR. `osr_bci`
/// requests an on-stack-replacement entry at the given loop header, -1
/// compiles from the method entry. The result is either a finished graph
/// or a bail-out; the caller decides the fallback policy.
pub fn build_ir(method: Arc<Method>, osr_bci: i32, flags: &Flags) -> Result<Ir, Bailout> {
    if flags.trace_bytecodes {
        log::trace!("{}", crate::printer::disassemble(&method));
    }
    let mut ir = Ir::new(method);
    build_graph(&mut ir, TOP_SCOPE, osr_bci, flags)?;
    schedule::compute_code(&mut ir, flags);
    if flags.print_cfg {
        log::debug!("CFG BEFORE CODE GENERATION:\n{}", crate::printer::print_cfg(&ir));
    }
    if flags.print_ir {
        log::debug!("IR BEFORE CODE GENERATION:\n{}", crate::printer::print_ir(&ir));
    }
    Ok(ir)
}

/// Builds the control flow graph for one scope (the compiled method, or an
/// inlined callee).
pub(crate) fn build_graph(
    ir: &mut Ir,
    scope: ScopeId,
    osr_bci: i32,
    flags: &Flags,
) -> Result<(), Bailout> {
    let blb = BlockListBuilder::build(ir, scope, osr_bci)?;
    let method = ir.scope(scope).method.clone();
    let mut state = ValueStack::new(method.max_locals);
    if method.is_synchronized {
        let lock_no = state.lock(SYNC_ENTRY_BCI);
        ir.scope_mut(scope).set_min_locks(lock_no + 1);
    }
    ir.block_mut(blb.std_entry).state = Some(state);
    GraphBuilder::new(ir, scope, &blb.bci2block, flags).build(blb.std_entry)?;
    if osr_bci >= 0 {
        let osr_entry = blb.osr_entry.expect("osr entry was created by leader discovery");
        if ir.scope(scope).found_jsr && !flags.accept_jsr_for_osr {
            return Err(Bailout::JsrWithOsr);
        }
        if !ir.block(osr_entry).is_flag_set(WAS_VISITED_FLAG) {
            return Err(Bailout::OsrEntryMissing);
        }
        if !ir.block(osr_entry).state.as_ref().unwrap().is_stack_empty() {
            return Err(Bailout::OsrStackNotEmpty);
        }
    }
    ir.scope_mut(scope).std_entry = Some(blb.std_entry);
    ir.scope_mut(scope).osr_entry = blb.osr_entry;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecodes::*;
    use crate::ci::{BasicType, ClassInfo, ConstantPool, ExceptionHandler, IntrinsicId, Method, PoolEntry};
    use crate::ir::instr::{Cond, ConstValue, InstrKind};
    use crate::test_fixtures::{leaf_method, method_with};
    use std::sync::Arc;

    fn build(code: &[u8], max_locals: usize) -> Result<Ir, Bailout> {
        build_ir(leaf_method(code, max_locals), -1, &Flags::default())
    }

    fn kinds_of(ir: &Ir, block: crate::ir::BlockId) -> Vec<String> {
        ir.block_instrs(block)
            .map(|id| {
                let kind = &ir.instr(id).kind;
                let name: &str = match kind {
                    InstrKind::Constant(_) => "const",
                    InstrKind::LoadLocal { .. } => "load_local",
                    InstrKind::StoreLocal { .. } => "store_local",
                    InstrKind::ArithmeticOp { .. } => "arith",
                    InstrKind::ShiftOp { .. } => "shift",
                    InstrKind::LogicOp { .. } => "logic",
                    InstrKind::NullCheck { .. } => "null_check",
                    InstrKind::Invoke { .. } => "invoke",
                    InstrKind::Return { .. } => "return",
                    InstrKind::Goto => "goto",
                    InstrKind::If { .. } => "if",
                    other => {
                        return format!("{other:?}");
                    }
                };
                name.to_string()
            })
            .collect()
    }

    #[test]
    fn straight_line_add_builds_one_block() {
        // iload_0; iconst_1; iadd; ireturn
        let ir = build(&[ILOAD_0, ICONST_1, IADD, IRETURN], 1).unwrap();
        assert_eq!(ir.code().len(), 1);
        let entry = ir.std_entry();
        assert_eq!(ir.code()[0], entry);
        assert_eq!(kinds_of(&ir, entry), ["load_local", "const", "arith", "return"]);
        let add = ir.block_instrs(entry).nth(2).unwrap();
        assert_eq!(ir.instr(add).use_count, 1, "the add is consumed by the return alone");
        match ir.instr(ir.block(entry).end.unwrap()).kind {
            InstrKind::Return { result: Some(result), .. } => assert_eq!(result, add),
            ref other => panic!("expected a value return, found {other:?}"),
        }
    }

    #[test]
    fn value_numbering_reuses_repeated_subexpressions() {
        // (a + b) + (a + b): the second iadd reuses the first.
        let code = [ILOAD_0, ILOAD_1, IADD, ILOAD_0, ILOAD_1, IADD, IADD, IRETURN];
        let ir = build(&code, 2).unwrap();
        let entry = ir.std_entry();
        // load a, load b, add, add(top) -- the repeated loads and the inner
        // add are value-numbered away.
        assert_eq!(kinds_of(&ir, entry), ["load_local", "load_local", "arith", "arith", "return"]);
    }

    #[test]
    fn diamond_produces_phi_at_the_merge() {
        // iload_0; ifeq else; iconst_1; goto merge; else: iconst_0;
        // merge: ireturn
        let code = [ILOAD_0, IFEQ, 0, 7, ICONST_1, GOTO, 0, 4, ICONST_0, IRETURN];
        let ir = build(&code, 1).unwrap();
        // entry, two arms, merge block
        assert_eq!(ir.code().len(), 4);
        let merge = *ir.code().last().unwrap();
        assert_eq!(ir.block(merge).bci, 9);
        let entry_state = ir.block(merge).state.as_ref().unwrap();
        let merged = entry_state.stack_values(&ir);
        assert_eq!(merged.len(), 1);
        assert!(
            matches!(ir.instr(merged[0]).kind, InstrKind::Phi { index: 0, .. }),
            "merge entry must hold a phi for the two incoming constants"
        );
    }

    #[test]
    fn constant_branch_folds_to_a_single_successor() {
        // iconst_2; iconst_2; if_icmpeq +5 -> the branch must fold into a
        // goto to the taken side.
        let code = [ICONST_2, ICONST_2, IF_ICMPEQ, 0, 5, ICONST_0, IRETURN, ICONST_1, IRETURN];
        let ir = build(&code, 0).unwrap();
        let entry = ir.std_entry();
        let end = ir.block(entry).end.unwrap();
        assert!(matches!(ir.instr(end).kind, InstrKind::Goto));
        assert_eq!(ir.instr(end).sux.len(), 1);
        assert_eq!(ir.block(ir.instr(end).sux[0]).bci, 7, "must jump to the true successor");
    }

    #[test]
    fn monitorexit_underflow_bails_out() {
        let code = [ALOAD_0, MONITOREXIT, RETURN];
        assert_eq!(build(&code, 1).unwrap_err(), Bailout::MonitorStackUnderflow);
    }

    #[test]
    fn breakpoint_bails_out() {
        assert_eq!(build(&[BREAKPOINT], 0).unwrap_err(), Bailout::Breakpoint);
    }

    #[test]
    fn incompatible_join_bails_out() {
        // Two paths reach bci 8 with different stack types:
        // iload_0; ifeq 7; fconst_0; goto 8; 7: iconst_0; 8: pop; return
        let code = [ILOAD_0, IFEQ, 0, 6, FCONST_0, GOTO, 0, 3, ICONST_0, POP, RETURN];
        assert_eq!(build(&code, 1).unwrap_err(), Bailout::BlockJoinFailed);
    }

    fn instance_class() -> Arc<ClassInfo> {
        ClassInfo::resolved("Callee")
    }

    fn callee(code: &[u8], arg_size: usize, is_static: bool) -> Arc<Method> {
        Arc::new(Method {
            name: "callee".to_string(),
            holder: instance_class(),
            code: Arc::from(code),
            max_locals: arg_size,
            arg_size,
            return_type: BasicType::Void,
            is_static,
            is_synchronized: false,
            is_native: false,
            is_strict: false,
            is_final_method: true,
            is_loaded: true,
            intrinsic: None,
            exception_handlers: Vec::new(),
            constants: Arc::new(ConstantPool::default()),
        })
    }

    fn pool_with_method(target: Arc<Method>) -> Arc<ConstantPool> {
        Arc::new(ConstantPool { entries: vec![PoolEntry::Unresolved, PoolEntry::Method(target)] })
    }

    #[test]
    fn trivial_void_callee_inlines_to_a_null_check() {
        // caller: aload_0; invokespecial #1; return
        let target = callee(&[RETURN], 1, false);
        let caller_code = [ALOAD_0, INVOKESPECIAL, 0, 1, RETURN];
        let method =
            method_with(&caller_code, 1, 1, BasicType::Void, pool_with_method(target));
        let ir = build_ir(method, -1, &Flags::default()).unwrap();
        let entry = ir.std_entry();
        assert_eq!(kinds_of(&ir, entry), ["load_local", "null_check", "return"]);
    }

    #[test]
    fn callee_with_exception_handler_is_not_inlined() {
        let mut target = (*callee(&[RETURN], 1, false)).clone();
        target.exception_handlers =
            vec![ExceptionHandler { start: 0, limit: 1, target: 0, type_index: 0 }];
        let caller_code = [ALOAD_0, INVOKESPECIAL, 0, 1, RETURN];
        let method =
            method_with(&caller_code, 1, 1, BasicType::Void, pool_with_method(Arc::new(target)));
        let ir = build_ir(method, -1, &Flags::default()).unwrap();
        let entry = ir.std_entry();
        assert_eq!(kinds_of(&ir, entry), ["load_local", "invoke", "return"]);
        let invoke = ir.block_instrs(entry).nth(1).unwrap();
        match &ir.instr(invoke).kind {
            InstrKind::Invoke { recv: Some(_), args, .. } => assert!(args.is_empty()),
            other => panic!("expected an invoke with a receiver, found {other:?}"),
        }
    }

    #[test]
    fn single_block_body_is_spliced_into_the_caller() {
        // static int callee(int x) { return x + 1; }:
        //   iload_0; iconst_1; iadd; ireturn
        let body = [ILOAD_0, ICONST_1, IADD, IRETURN];
        let mut target = (*callee(&body, 1, true)).clone();
        target.return_type = BasicType::Int;
        // caller: iload_0; invokestatic #1; ireturn
        let caller_code = [ILOAD_0, INVOKESTATIC, 0, 1, IRETURN];
        let method =
            method_with(&caller_code, 1, 1, BasicType::Int, pool_with_method(Arc::new(target)));
        let ir = build_ir(method, -1, &Flags::default()).unwrap();
        let entry = ir.std_entry();
        let kinds = kinds_of(&ir, entry);
        assert!(!kinds.contains(&"invoke".to_string()), "call must be gone: {kinds:?}");
        assert!(kinds.contains(&"arith".to_string()), "body must be spliced: {kinds:?}");
        // The callee's x + 1 flows into the caller's return.
        match ir.instr(ir.block(entry).end.unwrap()).kind {
            InstrKind::Return { result: Some(result), .. } => {
                assert!(matches!(ir.instr(result).kind, InstrKind::ArithmeticOp { op: IADD, .. }));
            }
            ref other => panic!("expected a value return, found {other:?}"),
        }
    }

    #[test]
    fn intrinsic_callee_becomes_an_intrinsic_call() {
        let mut target = (*callee(&[], 2, true)).clone();
        target.name = "sqrt".to_string();
        target.return_type = BasicType::Double;
        target.is_native = true;
        target.intrinsic = Some(IntrinsicId::Dsqrt);
        let caller_code = [DLOAD_0, INVOKESTATIC, 0, 1, DRETURN];
        let method =
            method_with(&caller_code, 2, 2, BasicType::Double, pool_with_method(Arc::new(target)));
        let ir = build_ir(method, -1, &Flags::default()).unwrap();
        let entry = ir.std_entry();
        let has_intrinsic = ir
            .block_instrs(entry)
            .any(|id| matches!(ir.instr(id).kind, InstrKind::IntrinsicCall { id: IntrinsicId::Dsqrt, .. }));
        assert!(has_intrinsic);
    }

    #[test]
    fn exception_edges_reach_covering_handlers() {
        // try { arraylength } catch (any) { ... }:
        // 0: aload_0; 1: arraylength; 2: pop; 3: return;
        // handler at 4: pop(exception); return
        let code = [ALOAD_0, ARRAYLENGTH, POP, RETURN, POP, RETURN];
        let mut method = (*leaf_method(&code, 1)).clone();
        method.exception_handlers =
            vec![ExceptionHandler { start: 0, limit: 3, target: 4, type_index: 0 }];
        let ir = build_ir(Arc::new(method), -1, &Flags::default()).unwrap();
        let entry = ir.std_entry();
        assert_eq!(ir.block(entry).xhandlers.len(), 1);
        let handler = ir.block(entry).xhandlers[0];
        assert_eq!(ir.block(handler).bci, 4);
        let entry_state = ir.block(handler).state.as_ref().unwrap();
        assert_eq!(entry_state.stack_size(), 1, "handler entry holds the exception object");
    }

    #[test]
    fn weights_increase_in_final_order_and_branches_fall_through() {
        let code = [ILOAD_0, IFEQ, 0, 7, ICONST_1, GOTO, 0, 4, ICONST_0, IRETURN];
        let ir = build(&code, 1).unwrap();
        for (position, &block) in ir.code().iter().enumerate() {
            assert_eq!(ir.block(block).weight, position as u32);
        }
        // After adjustment every two-way branch falls through to the next
        // block in layout order.
        for window in ir.code().windows(2) {
            let end = ir.block(window[0]).end.unwrap();
            if let InstrKind::If { .. } = ir.instr(end).kind {
                assert_eq!(*ir.instr(end).sux.last().unwrap(), window[1]);
            }
        }
    }

    #[test]
    fn jsr_ret_builds_subroutine_and_continues() {
        // 0: jsr 4; 3: return; subroutine at 4: astore_1; 5: ret 1
        let code = [JSR, 0, 4, RETURN, ASTORE_1, RET, 1];
        let ir = build(&code, 2).unwrap();
        let entry = ir.std_entry();
        assert_eq!(ir.block(entry).subroutines.len(), 1);
        let kinds: Vec<_> = ir
            .block_instrs(entry)
            .map(|id| format!("{:?}", ir.instr(id).kind))
            .collect();
        assert!(kinds.iter().any(|k| k.starts_with("Jsr")), "jsr node expected: {kinds:?}");
        assert!(
            kinds.iter().any(|k| k.starts_with("JsrContinuation")),
            "continuation expected: {kinds:?}"
        );
    }

    #[test]
    fn osr_entry_must_be_reachable_and_stack_free() {
        // 0: iinc 0 1; 3: iload_0; 4: ifne 3 (-> 0? no, loop back to 0);
        // simpler: 0: iinc; 3: goto 0
        let code = [IINC, 0, 1, GOTO, 0xff, 0xfd];
        let ir = build_ir(leaf_method(&code, 1), 0, &Flags::default()).unwrap();
        let osr = ir.osr_entry().unwrap();
        assert!(ir.block(osr).is_flag_set(crate::ir::OSR_ENTRY_FLAG));
        assert_eq!(
            build_ir(leaf_method(&code, 1), 3, &Flags::default()).unwrap_err(),
            Bailout::OsrEntryMissing
        );
    }

    #[test]
    fn synchronized_return_releases_the_entry_lock() {
        let mut method = (*leaf_method(&[RETURN], 1)).clone();
        method.is_synchronized = true;
        let ir = build_ir(Arc::new(method), -1, &Flags::default()).unwrap();
        let entry = ir.std_entry();
        match ir.instr(ir.block(entry).end.unwrap()).kind {
            InstrKind::Return { monitor_no, .. } => assert_eq!(monitor_no, 0),
            ref other => panic!("expected a return, found {other:?}"),
        }
        assert_eq!(ir.scope(TOP_SCOPE).number_of_locks, 1);
    }

    #[test]
    fn branch_against_constant_keeps_condition_shape() {
        // iload_0; iconst_5; if_icmpeq -> stays a branch with Eq.
        let code = [ILOAD_0, ICONST_5, IF_ICMPEQ, 0, 5, ICONST_0, IRETURN, ICONST_1, IRETURN];
        let ir = build(&code, 1).unwrap();
        let entry = ir.std_entry();
        let end = ir.block(entry).end.unwrap();
        match ir.instr(end).kind {
            InstrKind::If { cond, .. } => {
                assert!(cond == Cond::Eq || cond == Cond::Ne, "swap may negate, found {cond:?}")
            }
            ref other => panic!("branch must remain, found {other:?}"),
        }
        assert_eq!(ir.instr(end).sux.len(), 2);
    }

    #[test]
    fn unresolved_ldc_bails_out() {
        let pool = Arc::new(ConstantPool {
            entries: vec![PoolEntry::Unresolved, PoolEntry::Unresolved],
        });
        let method = method_with(&[LDC, 1, RETURN], 0, 0, BasicType::Void, pool);
        assert_eq!(build_ir(method, -1, &Flags::default()).unwrap_err(), Bailout::UnresolvedConstant);
    }

    #[test]
    fn ldc_pushes_the_pool_constant() {
        let pool = Arc::new(ConstantPool {
            entries: vec![PoolEntry::Unresolved, PoolEntry::Int(1234)],
        });
        let method = method_with(&[LDC, 1, IRETURN], 0, 0, BasicType::Int, pool);
        let ir = build_ir(method, -1, &Flags::default()).unwrap();
        let entry = ir.std_entry();
        let first = ir.block(entry).first.unwrap();
        assert_eq!(ir.as_const(first), Some(&ConstValue::Int(1234)));
    }
}
