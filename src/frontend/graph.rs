//! Fills the gaps between the basic blocks. This is the second pass of
//! building the intermediate representation, run immediately after leader
//! discovery.
//!
//! Per block: clone the frozen entry state, interpret bytecodes one at a
//! time, translate each into IR instructions (running every appended value
//! through the canonicalizer and the per-block value map), synthesize a
//! jump when execution falls through into the next leader, then join the
//! exit state into every successor. Blocks are processed from an explicit
//! worklist; exception handler entries and subroutines are built by nested
//! traversals whose per-block registers are saved and restored around the
//! recursion.

use crate::Bailout;
use crate::bytecodes::{self, *};
use crate::ci::{BasicType, IntrinsicId, Method};
use crate::cursor::BytecodeCursor;
use crate::flags::Flags;
use crate::frontend::{canon, filter};
use crate::ir::instr::{Cond, ConstValue, InstrKind, ValueType};
use crate::ir::state::ValueStack;
use crate::ir::{BlockId, InstrId, Ir, ScopeId, SUBROUTINE_ENTRY_FLAG, WAS_VISITED_FLAG};
use crate::ir::instr::ValueKey;
use rustc_hash::FxHashMap;
use std::mem;
use std::sync::Arc;

/// Where the next instruction gets linked: directly after the block header,
/// or after the previously appended instruction.
#[derive(Clone, Copy)]
enum Link {
    Block(BlockId),
    Instr(InstrId),
}

pub(crate) struct GraphBuilder<'a> {
    ir: &'a mut Ir,
    flags: &'a Flags,
    scope: ScopeId,
    method: Arc<Method>,
    bci2block: &'a FxHashMap<i32, BlockId>,
    has_handler: bool,
    // Per-block registers, reset by connect_to_end and saved around nested
    // closure builds.
    cursor: BytecodeCursor,
    vmap: FxHashMap<ValueKey, InstrId>,
    block: BlockId,
    state: ValueStack,
    last: Link,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        ir: &'a mut Ir,
        scope: ScopeId,
        bci2block: &'a FxHashMap<i32, BlockId>,
        flags: &'a Flags,
    ) -> GraphBuilder<'a> {
        let method = ir.scope(scope).method.clone();
        let has_handler = !ir.scope(scope).xhandlers.is_empty();
        let cursor = BytecodeCursor::new(method.code.clone());
        GraphBuilder {
            ir,
            flags,
            scope,
            method,
            bci2block,
            has_handler,
            cursor,
            vmap: FxHashMap::default(),
            block: BlockId(0),
            state: ValueStack::new(0),
            last: Link::Block(BlockId(0)),
        }
    }

    /// Builds the transitive closure of blocks reachable from `root`.
    pub fn build(&mut self, root: BlockId) -> Result<(), Bailout> {
        self.build_closure(root)
    }

    fn block_at(&self, bci: i32) -> Option<BlockId> {
        self.bci2block.get(&bci).copied()
    }

    fn build_closure(&mut self, root: BlockId) -> Result<(), Bailout> {
        let mut worklist = vec![root];
        while let Some(block) = worklist.pop() {
            if self.ir.block(block).is_flag_set(WAS_VISITED_FLAG) {
                continue;
            }
            self.ir.block_mut(block).set_flag(WAS_VISITED_FLAG);
            let end = self.connect_to_end(block)?;
            // Pushing in successor order makes the worklist process the
            // last successor first, like the recursive formulation.
            let sux = self.ir.instr(end).sux.clone();
            worklist.extend(sux);
        }
        Ok(())
    }

    /// Runs a nested closure build (handler entry, subroutine) without
    /// disturbing the block currently being filled.
    fn build_closure_nested(&mut self, root: BlockId) -> Result<(), Bailout> {
        let saved_cursor = self.cursor.clone();
        let saved_vmap = mem::take(&mut self.vmap);
        let saved_state = mem::take(&mut self.state);
        let saved_block = self.block;
        let saved_last = self.last;
        let result = self.build_closure(root);
        self.cursor = saved_cursor;
        self.vmap = saved_vmap;
        self.state = saved_state;
        self.block = saved_block;
        self.last = saved_last;
        result
    }

    /// Translates the bytecodes of one basic block into instructions and
    /// joins the resulting state into every successor.
    fn connect_to_end(&mut self, begin: BlockId) -> Result<InstrId, Bailout> {
        self.vmap.clear();
        self.block = begin;
        self.state = self.ir.block(begin).state.as_ref().expect("entry state must be set").duplicate();
        self.last = Link::Block(begin);
        let mut pos = self.ir.block(begin).bci;
        self.cursor.reset(pos);
        let mut prev = pos;
        let mut prev_is_monitorenter = false;
        while !self.last_is_block_end()
            && self.cursor.advance()
            && (self.block_at(pos).is_none() || self.block_at(pos) == Some(begin))
        {
            let code = self.cursor.opcode();
            if self.has_handler && (prev_is_monitorenter || bytecodes::can_trap(code)) {
                self.handle_exception(prev_is_monitorenter || bytecodes::is_async(code))?;
            }
            self.handle_bytecode(code)?;
            prev_is_monitorenter = code == MONITORENTER;
            prev = pos;
            pos = self.cursor.next_bci();
        }
        if !self.last_is_block_end() {
            // Fell through into the next leader: make the transfer explicit.
            let target = self.block_at(pos).expect("execution fell off the end of the bytecode");
            let goto = self.ir.alloc_end(ValueType::Illegal, InstrKind::Goto, vec![target]);
            self.link_raw(goto, prev);
        }
        let Link::Instr(end) = self.last else { unreachable!("block produced no end") };
        if matches!(self.ir.instr(end).kind, InstrKind::Return { .. } | InstrKind::Throw { .. }) {
            self.state.clear_stack();
        }
        self.state.pin_stack_all(self.ir);
        self.ir.block_mut(begin).end = Some(end);
        let state = mem::take(&mut self.state);
        let sux = self.ir.instr(end).sux.clone();
        for target in sux {
            if !self.ir.try_join(target, &state) {
                return Err(Bailout::BlockJoinFailed);
            }
        }
        self.ir.instr_mut(end).state = Some(state);
        Ok(end)
    }

    fn last_is_block_end(&self) -> bool {
        match self.last {
            Link::Block(_) => false,
            Link::Instr(id) => self.ir.instr(id).kind.is_block_end(),
        }
    }

    /// Links an instruction after the current tail, anchoring it at `bci`.
    fn link_raw(&mut self, instr: InstrId, bci: i32) {
        debug_assert!(bci >= 0, "illegal bytecode index");
        {
            let data = self.ir.instr_mut(instr);
            data.bci = bci;
            data.next = None;
        }
        match self.last {
            Link::Block(block) => self.ir.block_mut(block).first = Some(instr),
            Link::Instr(prev) => {
                debug_assert!(
                    !self.ir.instr(prev).kind.is_block_end(),
                    "end nodes must not have next"
                );
                self.ir.instr_mut(prev).next = Some(instr);
            }
        }
        self.last = Link::Instr(instr);
    }

    /// Looks for an already-appended value that is structurally equal to the
    /// given one and can be reused instead.
    fn find(&mut self, instr: InstrId) -> InstrId {
        if !self.flags.use_value_numbering {
            return instr;
        }
        let Some(key) = self.ir.instr(instr).kind.value_key() else { return instr };
        *self.vmap.entry(key).or_insert(instr)
    }

    /// Recursively appends the operands a canonical replacement synthesized
    /// that are not anchored yet.
    fn append_operand(&mut self, value: InstrId) -> InstrId {
        if self.ir.instr(value).bci != -1 {
            return value;
        }
        let known = match self.ir.instr(value).kind.value_key() {
            Some(key) => self.vmap.contains_key(&key),
            None => false,
        };
        if !known {
            self.append_inputs(value);
        }
        let i1 = self.find(value);
        if i1 == value {
            let bci = self.cursor.bci();
            self.link_raw(i1, bci);
        }
        i1
    }

    fn append_inputs(&mut self, instr: InstrId) {
        let mut kind = mem::replace(&mut self.ir.instr_mut(instr).kind, InstrKind::Goto);
        kind.replace_inputs(&mut |v| self.append_operand(v));
        self.ir.instr_mut(instr).kind = kind;
    }

    /// Canonicalizes, value-numbers and appends an instruction; returns the
    /// instruction that actually represents the value.
    fn append(&mut self, instr: InstrId) -> InstrId {
        let i1 = canon::simplify(self.ir, self.flags, instr);
        if self.ir.instr(i1).bci != -1 {
            return i1;
        }
        if i1 != instr {
            self.append_inputs(i1);
        }
        let i2 = self.find(i1);
        if i2 == i1 {
            let bci = self.cursor.bci();
            self.link_raw(i2, bci);
            let splits = self.ir.instr(i2).kind.is_state_split();
            let is_end = self.ir.instr(i2).kind.is_block_end();
            if splits && !is_end {
                // Cached values must not survive a point where the abstract
                // state can escape or be invalidated.
                self.vmap.clear();
                self.state.clear_locals();
                self.state.pin_stack_for_state_split(self.ir);
                let snapshot = self.state.duplicate();
                self.ir.instr_mut(i2).state = Some(snapshot);
            }
        }
        i2
    }

    /// Drops cached field and array loads of the given type from the value
    /// map after a memory write.
    fn kill_memory(&mut self, ty: ValueType) {
        let ir: &Ir = self.ir;
        self.vmap.retain(|_, value| {
            let is_load = matches!(
                ir.instr(*value).kind,
                InstrKind::LoadField { .. } | InstrKind::LoadIndexed { .. }
            );
            !(is_load && ir.ty(*value) == ty)
        });
    }

    fn constant(&mut self, value: ConstValue) -> InstrId {
        let ty = value.value_type();
        self.ir.alloc(ty, InstrKind::Constant(value))
    }

    fn push_constant(&mut self, value: ConstValue) {
        let ty = value.value_type();
        let instr = self.constant(value);
        let appended = self.append(instr);
        self.state.push(ty, appended, self.ir);
    }

    fn load_constant(&mut self, index: usize) -> Result<(), Bailout> {
        let value = match self.method.constants.constant_at(index)? {
            crate::ci::PoolEntry::Int(v) => ConstValue::Int(*v),
            crate::ci::PoolEntry::Long(v) => ConstValue::Long(*v),
            crate::ci::PoolEntry::Float(v) => ConstValue::Float(*v),
            crate::ci::PoolEntry::Double(v) => ConstValue::Double(*v),
            crate::ci::PoolEntry::Str(s) => ConstValue::Str(s.clone()),
            _ => unreachable!("constant_at filtered unloadable entries"),
        };
        self.push_constant(value);
        Ok(())
    }

    fn load_local(&mut self, ty: ValueType, index: usize) {
        let mut cached = None;
        if self.flags.eliminate_loads {
            cached = self.state.load_local(index);
        }
        let value = match cached {
            Some(value) => {
                if self.flags.print_load_elimination {
                    log::debug!("load local {index} eliminated at {}", self.cursor.bci());
                }
                value
            }
            None => {
                let load = self.ir.alloc(ty, InstrKind::LoadLocal { index });
                let appended = self.append(load);
                self.state.store_local(index, appended, self.ir);
                appended
            }
        };
        self.state.push(ty, value, self.ir);
    }

    fn store_local(&mut self, ty: ValueType, index: usize) {
        let value = self.state.pop(ty, self.ir);
        if self.flags.round_floats_with_store && ty.is_float_kind() {
            // A float store truncates to storage precision; the cache must
            // not hand back the wider value on a re-read.
            self.state.kill_local(index);
        } else {
            self.state.store_local(index, value, self.ir);
        }
        let store = self.ir.alloc(ty, InstrKind::StoreLocal { index, value });
        self.append(store);
        self.state.pin_stack_locals(index, self.ir);
        if ty.is_double_word() {
            self.state.pin_stack_locals(index + 1, self.ir);
        }
    }

    fn load_indexed(&mut self, elem_type: BasicType) {
        let index = self.state.pop(ValueType::Int, self.ir);
        let array = self.state.pop(ValueType::Object, self.ir);
        let ty = ValueType::of(elem_type);
        let load = self.ir.alloc(ty, InstrKind::LoadIndexed { array, index, elem_type });
        let appended = self.append(load);
        self.state.push(ty, appended, self.ir);
    }

    fn store_indexed(&mut self, elem_type: BasicType) {
        let ty = ValueType::of(elem_type);
        let value = self.state.pop(ty, self.ir);
        let index = self.state.pop(ValueType::Int, self.ir);
        let array = self.state.pop(ValueType::Object, self.ir);
        let store = self.ir.alloc(ty, InstrKind::StoreIndexed { array, index, elem_type, value });
        if ty == ValueType::Object {
            // A reference store may alias anything; drop every cached value
            // and snapshot the state.
            self.vmap.clear();
            self.state.clear_locals();
            self.state.pin_stack_all(self.ir);
            let snapshot = self.state.duplicate();
            self.ir.instr_mut(store).state = Some(snapshot);
        } else {
            self.kill_memory(ty);
            self.state.pin_stack_indexed(self.ir);
        }
        self.append(store);
    }

    /// The dup/swap family shuffles physical words, not typed values.
    fn stack_op(&mut self, code: u8) {
        match code {
            POP => {
                self.state.raw_pop();
            }
            POP2 => {
                self.state.raw_pop();
                self.state.raw_pop();
            }
            DUP => {
                let w1 = self.state.raw_pop();
                self.state.raw_push(w1);
                self.state.raw_push(w1);
            }
            DUP_X1 => {
                let w1 = self.state.raw_pop();
                let w2 = self.state.raw_pop();
                self.state.raw_push(w1);
                self.state.raw_push(w2);
                self.state.raw_push(w1);
            }
            DUP_X2 => {
                let w1 = self.state.raw_pop();
                let w2 = self.state.raw_pop();
                let w3 = self.state.raw_pop();
                self.state.raw_push(w1);
                self.state.raw_push(w3);
                self.state.raw_push(w2);
                self.state.raw_push(w1);
            }
            DUP2 => {
                let w1 = self.state.raw_pop();
                let w2 = self.state.raw_pop();
                self.state.raw_push(w2);
                self.state.raw_push(w1);
                self.state.raw_push(w2);
                self.state.raw_push(w1);
            }
            DUP2_X1 => {
                let w1 = self.state.raw_pop();
                let w2 = self.state.raw_pop();
                let w3 = self.state.raw_pop();
                self.state.raw_push(w2);
                self.state.raw_push(w1);
                self.state.raw_push(w3);
                self.state.raw_push(w2);
                self.state.raw_push(w1);
            }
            DUP2_X2 => {
                let w1 = self.state.raw_pop();
                let w2 = self.state.raw_pop();
                let w3 = self.state.raw_pop();
                let w4 = self.state.raw_pop();
                self.state.raw_push(w2);
                self.state.raw_push(w1);
                self.state.raw_push(w4);
                self.state.raw_push(w3);
                self.state.raw_push(w2);
                self.state.raw_push(w1);
            }
            SWAP => {
                let w1 = self.state.raw_pop();
                let w2 = self.state.raw_pop();
                self.state.raw_push(w1);
                self.state.raw_push(w2);
            }
            _ => unreachable!("should not reach here"),
        }
    }

    fn arithmetic_op(&mut self, ty: ValueType, code: u8) {
        let y = self.state.pop(ty, self.ir);
        let x = self.state.pop(ty, self.ir);
        let instr = self.ir.alloc(ty, InstrKind::ArithmeticOp { op: code, x, y });
        let appended = self.append(instr);
        self.state.push(ty, appended, self.ir);
    }

    fn negate_op(&mut self, ty: ValueType) {
        let x = self.state.pop(ty, self.ir);
        let instr = self.ir.alloc(ty, InstrKind::NegateOp { x });
        let appended = self.append(instr);
        self.state.push(ty, appended, self.ir);
    }

    fn shift_op(&mut self, ty: ValueType, code: u8) {
        let y = self.state.pop(ValueType::Int, self.ir);
        let x = self.state.pop(ty, self.ir);
        let instr = self.ir.alloc(ty, InstrKind::ShiftOp { op: code, x, y });
        let appended = self.append(instr);
        self.state.push(ty, appended, self.ir);
    }

    fn logic_op(&mut self, ty: ValueType, code: u8) {
        let y = self.state.pop(ty, self.ir);
        let x = self.state.pop(ty, self.ir);
        let instr = self.ir.alloc(ty, InstrKind::LogicOp { op: code, x, y });
        let appended = self.append(instr);
        self.state.push(ty, appended, self.ir);
    }

    fn increment(&mut self, index: usize, delta: i32) {
        self.load_local(ValueType::Int, index);
        self.push_constant(ConstValue::Int(delta));
        self.arithmetic_op(ValueType::Int, IADD);
        self.store_local(ValueType::Int, index);
    }

    fn convert(&mut self, code: u8, from: BasicType, to: BasicType) {
        let src = ValueType::of(from);
        let target = ValueType::of(to);
        let value = self.state.pop(src, self.ir);
        let instr = self.ir.alloc(target, InstrKind::Convert { op: code, value });
        let appended = self.append(instr);
        self.state.push(target, appended, self.ir);
    }

    fn compare_op(&mut self, ty: ValueType, code: u8) {
        let y = self.state.pop(ty, self.ir);
        let x = self.state.pop(ty, self.ir);
        let instr = self.ir.alloc(ValueType::Int, InstrKind::CompareOp { op: code, x, y });
        let appended = self.append(instr);
        self.state.push(ValueType::Int, appended, self.ir);
    }

    fn if_node(&mut self, x: InstrId, cond: Cond, y: InstrId) {
        let tsux = self.block_at(self.cursor.destination(1, false)).expect("branch target must be a block");
        let fsux = self.block_at(self.cursor.next_bci()).expect("fallthrough must be a block");
        let instr = self.ir.alloc_end(
            ValueType::Illegal,
            InstrKind::If { x, cond, unordered_is_true: false, y },
            vec![tsux, fsux],
        );
        self.append(instr);
    }

    fn if_zero(&mut self, cond: Cond) {
        let zero = self.constant(ConstValue::Int(0));
        let y = self.append(zero);
        let x = self.state.pop(ValueType::Int, self.ir);
        self.if_node(x, cond, y);
    }

    fn if_compare(&mut self, ty: ValueType, cond: Cond) {
        let y = self.state.pop(ty, self.ir);
        let x = self.state.pop(ty, self.ir);
        self.if_node(x, cond, y);
    }

    fn if_null(&mut self, cond: Cond) {
        let null = self.constant(ConstValue::Null);
        let y = self.append(null);
        let x = self.state.pop(ValueType::Object, self.ir);
        self.if_node(x, cond, y);
    }

    /// Translates a jump to a subroutine. The first visit builds the
    /// subroutine's own transitive closure; every visit splices a jsr plus
    /// continuation marker and resumes from the agreed ret-exit state.
    fn jsr(&mut self, dest: i32) -> Result<(), Bailout> {
        self.ir.scope_mut(self.scope).found_jsr = true;
        let subroutine = self.block_at(dest).expect("subroutine entry must be a block");
        debug_assert!(
            self.ir.block(subroutine).is_flag_set(SUBROUTINE_ENTRY_FLAG),
            "must be marked as subroutine entry"
        );
        if !self.ir.block(subroutine).is_flag_set(WAS_VISITED_FLAG) {
            let addr = self.constant(ConstValue::Address(self.cursor.next_bci()));
            self.state.push(ValueType::Address, addr, self.ir);
            if !self.ir.try_join(subroutine, &self.state) {
                return Err(Bailout::JsrJoinFailed);
            }
            self.state.raw_pop();
            self.build_closure_nested(subroutine)?;
        }
        let ends = self.ir.collect_ends(subroutine);
        let mut ret = None;
        for &end in ends.iter().rev() {
            if matches!(self.ir.instr(end).kind, InstrKind::Ret { .. }) {
                match ret {
                    None => ret = Some(end),
                    Some(first) => {
                        let a = self.ir.instr(first).state.as_ref().expect("ret state must be set");
                        let b = self.ir.instr(end).state.as_ref().expect("ret state must be set");
                        if !a.is_compatible(b, self.ir) {
                            return Err(Bailout::JsrRetStatesIncompatible);
                        }
                    }
                }
            }
        }
        match ret {
            Some(ret) => {
                self.ir.block_mut(self.block).add_subroutine(subroutine);
                let jsr = self.ir.alloc(ValueType::Illegal, InstrKind::Jsr { subroutine });
                self.append(jsr);
                let cont = self.ir.alloc(ValueType::Illegal, InstrKind::JsrContinuation);
                let bci = self.cursor.next_bci();
                self.link_raw(cont, bci);
                self.state = self.ir.instr(ret).state.as_ref().unwrap().duplicate();
                if !self.state.is_stack_empty() {
                    return Err(Bailout::JsrNonEmptyStack);
                }
            }
            None => {
                // No ret exit: the subroutine leaves by return or throw, so
                // the call degenerates to a plain jump.
                let addr = self.constant(ConstValue::Address(self.cursor.next_bci()));
                let appended = self.append(addr);
                self.state.push(ValueType::Address, appended, self.ir);
                let target = self.block_at(dest).unwrap();
                let goto = self.ir.alloc_end(ValueType::Illegal, InstrKind::Goto, vec![target]);
                self.append(goto);
            }
        }
        Ok(())
    }

    fn table_switch(&mut self) {
        let bci = self.cursor.bci();
        let mut offset = ((bci + 4) & !0x03) - bci;
        let default_sux =
            self.block_at(self.cursor.destination(offset, true)).expect("switch target must be a block");
        let lo = self.cursor.signed_operand(offset + 4, 4);
        let hi = self.cursor.signed_operand(offset + 8, 4);
        let mut sux = Vec::with_capacity((hi - lo + 2) as usize);
        offset += 12;
        for _ in 0..=(hi - lo) {
            sux.push(
                self.block_at(self.cursor.destination(offset, true))
                    .expect("switch target must be a block"),
            );
            offset += 4;
        }
        sux.push(default_sux);
        let tag = self.state.pop(ValueType::Int, self.ir);
        let instr =
            self.ir.alloc_end(ValueType::Illegal, InstrKind::TableSwitch { tag, lo_key: lo }, sux);
        self.append(instr);
    }

    fn lookup_switch(&mut self) {
        let bci = self.cursor.bci();
        let mut offset = ((bci + 4) & !0x03) - bci;
        let default_sux =
            self.block_at(self.cursor.destination(offset, true)).expect("switch target must be a block");
        let npairs = self.cursor.signed_operand(offset + 4, 4);
        let mut keys = Vec::with_capacity(npairs as usize);
        let mut sux = Vec::with_capacity(npairs as usize + 1);
        offset += 8;
        for _ in 0..npairs {
            keys.push(self.cursor.signed_operand(offset, 4));
            sux.push(
                self.block_at(self.cursor.destination(offset + 4, true))
                    .expect("switch target must be a block"),
            );
            offset += 8;
        }
        sux.push(default_sux);
        let tag = self.state.pop(ValueType::Int, self.ir);
        let instr = self.ir.alloc_end(ValueType::Illegal, InstrKind::LookupSwitch { tag, keys }, sux);
        self.append(instr);
    }

    fn method_return(&mut self, result: Option<InstrId>) {
        let monitor_no = if self.method.is_synchronized { self.state.unlock() as i32 } else { -1 };
        let ty = match result {
            Some(value) => self.ir.ty(value),
            None => ValueType::Void,
        };
        let instr =
            self.ir.alloc_end(ty, InstrKind::Return { result, monitor_no }, Vec::new());
        self.append(instr);
    }

    fn load_field(&mut self, index: usize, code: u8) {
        let field = self.method.constants.field_at(index).clone();
        let ty = ValueType::of(field.field_type);
        let is_static = code == GETSTATIC;
        let obj = if is_static {
            let class = self.constant(ConstValue::Class(field.holder.clone()));
            self.append(class)
        } else {
            self.state.pop(ValueType::Object, self.ir)
        };
        let load = self.ir.alloc(
            ty,
            InstrKind::LoadField {
                obj,
                offset: field.offset,
                field_type: field.field_type,
                is_static,
                loaded: field.loaded,
                initialized: field.initialized,
            },
        );
        let appended = self.append(load);
        self.state.push(ty, appended, self.ir);
    }

    fn store_field(&mut self, index: usize, code: u8) {
        let field = self.method.constants.field_at(index).clone();
        let ty = ValueType::of(field.field_type);
        let value = self.state.pop(ty, self.ir);
        let is_static = code == PUTSTATIC;
        let obj = if is_static {
            let class = self.constant(ConstValue::Class(field.holder.clone()));
            self.append(class)
        } else {
            self.state.pop(ValueType::Object, self.ir)
        };
        let store = self.ir.alloc(
            ty,
            InstrKind::StoreField {
                obj,
                offset: field.offset,
                field_type: field.field_type,
                value,
                is_static,
                loaded: field.loaded,
                initialized: field.initialized,
            },
        );
        self.append(store);
        self.kill_memory(ty);
        self.state.pin_stack_fields(self.ir);
    }

    fn try_inline_intrinsics(&mut self, callee: &Arc<Method>) -> bool {
        if !self.flags.inline_intrinsics || callee.is_synchronized {
            return false;
        }
        let id = match callee.intrinsic {
            Some(
                id @ (IntrinsicId::Dsin | IntrinsicId::Dcos | IntrinsicId::Dsqrt
                | IntrinsicId::Arraycopy),
            ) => id,
            _ => return false,
        };
        let result_ty = ValueType::of(callee.return_type);
        let args = self.state.pop_arguments(callee.arg_size, self.ir);
        let call = self.ir.alloc(result_ty, InstrKind::IntrinsicCall { id, args: args.clone() });
        if !callee.is_static {
            let obj = args[0];
            let check = self.ir.alloc(self.ir.ty(obj), InstrKind::NullCheck { obj });
            self.append(check);
        }
        let appended = self.append(call);
        if result_ty != ValueType::Void {
            self.state.push(result_ty, appended, self.ir);
        }
        true
    }

    /// Inlines a callee with neither exception handlers nor locals beyond
    /// its arguments: a trivial void body is dropped entirely, a single
    /// block body below the size ceiling is built out of line, argument
    /// loads substituted for the caller's stack values, and spliced into
    /// the current block.
    fn try_inline_simple(&mut self, callee: &Arc<Method>) -> Result<bool, Bailout> {
        debug_assert!(!callee.is_native, "callee must not be native");
        let arg_size = callee.arg_size;
        let arg_base = self.state.stack_size() - arg_size;
        let mut result = None;
        if !self.flags.inline_simple_methods
            || callee.has_exception_handlers()
            || callee.max_locals != arg_size
            || callee.is_synchronized
            || callee.code.len() > self.flags.max_inline_size
            || self.method.is_strict != callee.is_strict
        {
            return Ok(false);
        }
        if callee.code.len() == 1 && callee.code[0] == RETURN {
            debug_assert!(callee.return_type == BasicType::Void, "inconsistent result type");
            if self.cursor.opcode() != INVOKESTATIC {
                debug_assert!(!callee.is_static, "callee must not be static");
                debug_assert!(arg_size > 0, "must have at least receiver");
                let obj = self.state.stack_at(arg_base, self.ir);
                let check = self.ir.alloc(self.ir.ty(obj), InstrKind::NullCheck { obj });
                let bci = self.cursor.bci();
                self.link_raw(check, bci);
            }
        } else if self.ir.scope(self.scope).level > 0 {
            return Ok(false);
        } else {
            let callee_scope = self.ir.new_scope(self.scope, callee.clone());
            super::build_graph(self.ir, callee_scope, -1, self.flags)?;
            let start = self.ir.scope(callee_scope).std_entry.expect("callee graph must have an entry");
            debug_assert!(
                self.ir.block(start).state.as_ref().unwrap().is_stack_empty(),
                "stack must be empty"
            );
            let stop = self.ir.block(start).end.expect("callee entry must be complete");
            if !matches!(self.ir.instr(stop).kind, InstrKind::Return { .. }) {
                return Ok(false);
            }
            debug_assert!(
                self.ir.ty(stop) == ValueType::of(callee.return_type),
                "types must match"
            );
            if !filter::filter_and_substitute(self.ir, &self.state, arg_size, start) {
                return Ok(false);
            }
            filter::resolve_substitution(self.ir, start);
            if self.cursor.opcode() != INVOKESTATIC {
                debug_assert!(!callee.is_static, "callee must not be static");
                let receiver = self.state.stack_at(arg_base, self.ir);
                // The null check is redundant when the body immediately
                // dereferences the exact receiver.
                let mut getfield_on_receiver = false;
                if let Some(first) = self.ir.block(start).first {
                    if matches!(self.ir.instr(first).kind, InstrKind::LoadLocal { .. }) {
                        if let Some(second) = self.ir.instr(first).next {
                            if let InstrKind::LoadField { obj, is_static, .. } =
                                self.ir.instr(second).kind
                            {
                                debug_assert!(!is_static, "must not be static");
                                getfield_on_receiver = obj == receiver;
                            }
                        }
                    }
                }
                if !getfield_on_receiver {
                    let check =
                        self.ir.alloc(self.ir.ty(receiver), InstrKind::NullCheck { obj: receiver });
                    let bci = self.cursor.bci();
                    self.link_raw(check, bci);
                }
            }
            // Splice the body (everything before the return) into the
            // caller's block, re-anchored at the call site.
            let mut cursor = self.ir.block(start).first;
            while let Some(instr) = cursor {
                if instr == stop {
                    break;
                }
                let next = self.ir.instr(instr).next;
                let bci = self.cursor.bci();
                self.link_raw(instr, bci);
                cursor = next;
            }
            if callee.return_type != BasicType::Void {
                let InstrKind::Return { result: ret_value, .. } = self.ir.instr(stop).kind else {
                    unreachable!()
                };
                result = ret_value;
            }
        }
        // The arguments were evaluated for their effects whether or not the
        // body uses them.
        let mut i = arg_base;
        while i < self.state.stack_size() {
            let value = self.state.stack_at(i, self.ir);
            self.ir.instr_mut(value).pinned = true;
            i += self.ir.ty(value).size();
        }
        self.state.truncate_stack(arg_base);
        if let Some(value) = result {
            self.ir.instr_mut(value).pinned = true;
            let ty = self.ir.ty(value);
            self.state.push(ty, value, self.ir);
        }
        if self.flags.print_inlining {
            log::debug!("inlined method at {} ({} bytes)", self.cursor.bci(), callee.code.len());
        }
        Ok(true)
    }

    fn try_inline(&mut self, callee: &Arc<Method>) -> Result<bool, Bailout> {
        if self.try_inline_intrinsics(callee) {
            Ok(true)
        } else if callee.is_native {
            Ok(false)
        } else {
            self.try_inline_simple(callee)
        }
    }

    fn invoke(&mut self, code: u8, index: usize) -> Result<(), Bailout> {
        let target = self.method.constants.method_at(index).clone();
        if target.is_loaded && (target.is_static != (code == INVOKESTATIC)) {
            return Err(Bailout::InvalidInvokeKind);
        }
        let holder = target.holder.clone();
        let inlining = self.flags.inline
            && holder.loaded
            && holder.initialized
            && target.is_loaded
            && (code == INVOKESTATIC
                || code == INVOKESPECIAL
                || (code == INVOKEVIRTUAL && target.is_final_method))
            && self.try_inline(&target)?;
        if !inlining {
            let is_static = code == INVOKESTATIC;
            let result_ty = ValueType::of(target.return_type);
            let args = self.state.pop_arguments(target.arg_size_no_receiver(), self.ir);
            let recv =
                if is_static { None } else { Some(self.state.pop(ValueType::Object, self.ir)) };
            let call = self.ir.alloc(
                result_ty,
                InstrKind::Invoke {
                    op: code,
                    recv,
                    args,
                    target_final: target.is_loaded && target.is_final_method,
                    target_loaded: target.is_loaded,
                },
            );
            let appended = self.append(call);
            if result_ty != ValueType::Void {
                self.state.push(result_ty, appended, self.ir);
            }
        }
        Ok(())
    }

    fn new_instance(&mut self, index: usize) {
        let class = self.method.constants.class_at(index).clone();
        let instr = self.ir.alloc(ValueType::Object, InstrKind::NewInstance { class });
        let appended = self.append(instr);
        self.state.push(ValueType::Object, appended, self.ir);
    }

    fn new_type_array(&mut self, type_code: i32) {
        let elem_type = BasicType::from_newarray_code(type_code);
        let length = self.state.pop(ValueType::Int, self.ir);
        let instr = self.ir.alloc(ValueType::Object, InstrKind::NewTypeArray { length, elem_type });
        let appended = self.append(instr);
        self.state.push(ValueType::Object, appended, self.ir);
    }

    fn new_object_array(&mut self, index: usize) {
        let class = self.method.constants.class_at(index).clone();
        let length = self.state.pop(ValueType::Int, self.ir);
        let instr = self.ir.alloc(ValueType::Object, InstrKind::NewObjectArray { class, length });
        let appended = self.append(instr);
        self.state.push(ValueType::Object, appended, self.ir);
    }

    fn new_multi_array(&mut self, index: usize, dimensions: i32) {
        let class = self.method.constants.class_at(index).clone();
        let mut dims = Vec::with_capacity(dimensions as usize);
        for _ in 0..dimensions {
            let dim = self.state.pop(ValueType::Int, self.ir);
            dims.insert(0, dim);
        }
        let instr = self.ir.alloc(ValueType::Object, InstrKind::NewMultiArray { class, dims });
        let appended = self.append(instr);
        self.state.push(ValueType::Object, appended, self.ir);
    }

    fn check_cast(&mut self, index: usize) {
        let class = self.method.constants.class_at(index).clone();
        let obj = self.state.pop(ValueType::Object, self.ir);
        let instr = self.ir.alloc(ValueType::Object, InstrKind::CheckCast { class, obj });
        let appended = self.append(instr);
        self.state.push(ValueType::Object, appended, self.ir);
    }

    fn instance_of(&mut self, index: usize) {
        let class = self.method.constants.class_at(index).clone();
        let obj = self.state.pop(ValueType::Object, self.ir);
        let instr = self.ir.alloc(ValueType::Int, InstrKind::InstanceOf { class, obj });
        let appended = self.append(instr);
        self.state.push(ValueType::Int, appended, self.ir);
    }

    fn monitor_enter(&mut self) {
        let obj = self.state.pop(ValueType::Object, self.ir);
        let monitor_no = self.state.lock(self.cursor.bci());
        self.ir.scope_mut(self.scope).set_min_locks(monitor_no + 1);
        let instr = self.ir.alloc(ValueType::Illegal, InstrKind::MonitorEnter { obj, monitor_no });
        self.append(instr);
    }

    fn monitor_exit(&mut self) -> Result<(), Bailout> {
        let obj = self.state.pop(ValueType::Object, self.ir);
        if self.state.locks_size() < 1 {
            return Err(Bailout::MonitorStackUnderflow);
        }
        let monitor_no = self.state.unlock();
        let instr = self.ir.alloc(ValueType::Illegal, InstrKind::MonitorExit { obj, monitor_no });
        self.append(instr);
        Ok(())
    }

    /// Joins the current block with every handler whose protected range
    /// covers the current bci, passing a sanitized state (stack cleared,
    /// a single exception object pushed) into the handler's entry.
    fn handle_exception(&mut self, is_async: bool) -> Result<(), Bailout> {
        let handlers = self.ir.scope(self.scope).xhandlers.clone();
        for handler in handlers {
            if !handler.covers(self.cursor.bci()) {
                continue;
            }
            let entry = handler.entry;
            if self.ir.block(entry).is_flag_set(WAS_VISITED_FLAG) {
                let entry_locks =
                    self.ir.block(entry).state.as_ref().expect("handler state must be set").locks_size();
                if self.state.locks_size() != entry_locks {
                    if is_async {
                        // An interrupt point whose lock depth disagrees with
                        // the handler simply never dispatches there.
                        return Ok(());
                    }
                    return Err(Bailout::IllegalMonitorState);
                }
            } else {
                let mut stack = self.state.duplicate();
                stack.clear_stack();
                let exception = self.constant(ConstValue::Null);
                stack.push(ValueType::Object, exception, self.ir);
                let joined = self.ir.try_join(entry, &stack);
                debug_assert!(joined, "join failed");
                self.build_closure_nested(entry)?;
            }
            self.ir.block_mut(self.block).add_exception_handler(entry);
            if handler.is_catch_all() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Translates one bytecode against the abstract state. Exhaustive over
    /// the classic instruction set; anything else means the stream was not
    /// verified.
    fn handle_bytecode(&mut self, code: u8) -> Result<(), Bailout> {
        match code {
            NOP => {}
            ACONST_NULL => self.push_constant(ConstValue::Null),
            ICONST_M1 => self.push_constant(ConstValue::Int(-1)),
            ICONST_0 => self.push_constant(ConstValue::Int(0)),
            ICONST_1 => self.push_constant(ConstValue::Int(1)),
            ICONST_2 => self.push_constant(ConstValue::Int(2)),
            ICONST_3 => self.push_constant(ConstValue::Int(3)),
            ICONST_4 => self.push_constant(ConstValue::Int(4)),
            ICONST_5 => self.push_constant(ConstValue::Int(5)),
            LCONST_0 => self.push_constant(ConstValue::Long(0)),
            LCONST_1 => self.push_constant(ConstValue::Long(1)),
            FCONST_0 => self.push_constant(ConstValue::Float(0.0)),
            FCONST_1 => self.push_constant(ConstValue::Float(1.0)),
            FCONST_2 => self.push_constant(ConstValue::Float(2.0)),
            DCONST_0 => self.push_constant(ConstValue::Double(0.0)),
            DCONST_1 => self.push_constant(ConstValue::Double(1.0)),
            BIPUSH => self.push_constant(ConstValue::Int(self.cursor.signed_operand(1, 1))),
            SIPUSH => self.push_constant(ConstValue::Int(self.cursor.signed_operand(1, 2))),
            LDC => self.load_constant(self.cursor.unsigned_operand(1, 1) as usize)?,
            LDC_W | LDC2_W => self.load_constant(self.cursor.unsigned_operand(1, 2) as usize)?,
            ILOAD => {
                self.load_local(ValueType::Int, self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize)
            }
            LLOAD => {
                self.load_local(ValueType::Long, self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize)
            }
            FLOAD => {
                self.load_local(ValueType::Float, self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize)
            }
            DLOAD => self.load_local(
                ValueType::Double,
                self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize,
            ),
            ALOAD => self.load_local(
                ValueType::Object,
                self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize,
            ),
            ILOAD_0 | ILOAD_1 | ILOAD_2 | ILOAD_3 => {
                self.load_local(ValueType::Int, (code - ILOAD_0) as usize)
            }
            LLOAD_0 | LLOAD_1 | LLOAD_2 | LLOAD_3 => {
                self.load_local(ValueType::Long, (code - LLOAD_0) as usize)
            }
            FLOAD_0 | FLOAD_1 | FLOAD_2 | FLOAD_3 => {
                self.load_local(ValueType::Float, (code - FLOAD_0) as usize)
            }
            DLOAD_0 | DLOAD_1 | DLOAD_2 | DLOAD_3 => {
                self.load_local(ValueType::Double, (code - DLOAD_0) as usize)
            }
            ALOAD_0 | ALOAD_1 | ALOAD_2 | ALOAD_3 => {
                self.load_local(ValueType::Object, (code - ALOAD_0) as usize)
            }
            IALOAD => self.load_indexed(BasicType::Int),
            LALOAD => self.load_indexed(BasicType::Long),
            FALOAD => self.load_indexed(BasicType::Float),
            DALOAD => self.load_indexed(BasicType::Double),
            AALOAD => self.load_indexed(BasicType::Object),
            BALOAD => self.load_indexed(BasicType::Byte),
            CALOAD => self.load_indexed(BasicType::Char),
            SALOAD => self.load_indexed(BasicType::Short),
            ISTORE => {
                self.store_local(ValueType::Int, self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize)
            }
            LSTORE => {
                self.store_local(ValueType::Long, self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize)
            }
            FSTORE => {
                self.store_local(ValueType::Float, self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize)
            }
            DSTORE => self.store_local(
                ValueType::Double,
                self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize,
            ),
            ASTORE => self.store_local(
                ValueType::Object,
                self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize,
            ),
            ISTORE_0 | ISTORE_1 | ISTORE_2 | ISTORE_3 => {
                self.store_local(ValueType::Int, (code - ISTORE_0) as usize)
            }
            LSTORE_0 | LSTORE_1 | LSTORE_2 | LSTORE_3 => {
                self.store_local(ValueType::Long, (code - LSTORE_0) as usize)
            }
            FSTORE_0 | FSTORE_1 | FSTORE_2 | FSTORE_3 => {
                self.store_local(ValueType::Float, (code - FSTORE_0) as usize)
            }
            DSTORE_0 | DSTORE_1 | DSTORE_2 | DSTORE_3 => {
                self.store_local(ValueType::Double, (code - DSTORE_0) as usize)
            }
            ASTORE_0 | ASTORE_1 | ASTORE_2 | ASTORE_3 => {
                self.store_local(ValueType::Object, (code - ASTORE_0) as usize)
            }
            IASTORE => self.store_indexed(BasicType::Int),
            LASTORE => self.store_indexed(BasicType::Long),
            FASTORE => self.store_indexed(BasicType::Float),
            DASTORE => self.store_indexed(BasicType::Double),
            AASTORE => self.store_indexed(BasicType::Object),
            BASTORE => self.store_indexed(BasicType::Byte),
            CASTORE => self.store_indexed(BasicType::Char),
            SASTORE => self.store_indexed(BasicType::Short),
            POP | POP2 | DUP | DUP_X1 | DUP_X2 | DUP2 | DUP2_X1 | DUP2_X2 | SWAP => {
                self.stack_op(code)
            }
            IADD | ISUB | IMUL | IDIV | IREM => self.arithmetic_op(ValueType::Int, code),
            LADD | LSUB | LMUL | LDIV | LREM => self.arithmetic_op(ValueType::Long, code),
            FADD | FSUB | FMUL | FDIV | FREM => self.arithmetic_op(ValueType::Float, code),
            DADD | DSUB | DMUL | DDIV | DREM => self.arithmetic_op(ValueType::Double, code),
            INEG => self.negate_op(ValueType::Int),
            LNEG => self.negate_op(ValueType::Long),
            FNEG => self.negate_op(ValueType::Float),
            DNEG => self.negate_op(ValueType::Double),
            ISHL | ISHR | IUSHR => self.shift_op(ValueType::Int, code),
            LSHL | LSHR | LUSHR => self.shift_op(ValueType::Long, code),
            IAND | IOR | IXOR => self.logic_op(ValueType::Int, code),
            LAND | LOR | LXOR => self.logic_op(ValueType::Long, code),
            IINC => self.increment(
                self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize,
                self.cursor.signed_operand_wide(2, 1, 4, 2),
            ),
            I2L => self.convert(code, BasicType::Int, BasicType::Long),
            I2F => self.convert(code, BasicType::Int, BasicType::Float),
            I2D => self.convert(code, BasicType::Int, BasicType::Double),
            L2I => self.convert(code, BasicType::Long, BasicType::Int),
            L2F => self.convert(code, BasicType::Long, BasicType::Float),
            L2D => self.convert(code, BasicType::Long, BasicType::Double),
            F2I => self.convert(code, BasicType::Float, BasicType::Int),
            F2L => self.convert(code, BasicType::Float, BasicType::Long),
            F2D => self.convert(code, BasicType::Float, BasicType::Double),
            D2I => self.convert(code, BasicType::Double, BasicType::Int),
            D2L => self.convert(code, BasicType::Double, BasicType::Long),
            D2F => self.convert(code, BasicType::Double, BasicType::Float),
            I2B => self.convert(code, BasicType::Int, BasicType::Byte),
            I2C => self.convert(code, BasicType::Int, BasicType::Char),
            I2S => self.convert(code, BasicType::Int, BasicType::Short),
            LCMP => self.compare_op(ValueType::Long, code),
            FCMPL | FCMPG => self.compare_op(ValueType::Float, code),
            DCMPL | DCMPG => self.compare_op(ValueType::Double, code),
            IFEQ => self.if_zero(Cond::Eq),
            IFNE => self.if_zero(Cond::Ne),
            IFLT => self.if_zero(Cond::Lt),
            IFGE => self.if_zero(Cond::Ge),
            IFGT => self.if_zero(Cond::Gt),
            IFLE => self.if_zero(Cond::Le),
            IF_ICMPEQ => self.if_compare(ValueType::Int, Cond::Eq),
            IF_ICMPNE => self.if_compare(ValueType::Int, Cond::Ne),
            IF_ICMPLT => self.if_compare(ValueType::Int, Cond::Lt),
            IF_ICMPGE => self.if_compare(ValueType::Int, Cond::Ge),
            IF_ICMPGT => self.if_compare(ValueType::Int, Cond::Gt),
            IF_ICMPLE => self.if_compare(ValueType::Int, Cond::Le),
            IF_ACMPEQ => self.if_compare(ValueType::Object, Cond::Eq),
            IF_ACMPNE => self.if_compare(ValueType::Object, Cond::Ne),
            GOTO => {
                let target = self
                    .block_at(self.cursor.destination(1, false))
                    .expect("goto target must be a block");
                let instr = self.ir.alloc_end(ValueType::Illegal, InstrKind::Goto, vec![target]);
                self.append(instr);
            }
            JSR => self.jsr(self.cursor.destination(1, false))?,
            RET => {
                let index = self.cursor.unsigned_operand_wide(1, 1, 2, 2) as usize;
                let instr = self.ir.alloc_end(ValueType::Illegal, InstrKind::Ret { index }, Vec::new());
                self.append(instr);
            }
            TABLESWITCH => self.table_switch(),
            LOOKUPSWITCH => self.lookup_switch(),
            IRETURN => {
                let value = self.state.pop(ValueType::Int, self.ir);
                self.method_return(Some(value));
            }
            LRETURN => {
                let value = self.state.pop(ValueType::Long, self.ir);
                self.method_return(Some(value));
            }
            FRETURN => {
                let value = self.state.pop(ValueType::Float, self.ir);
                self.method_return(Some(value));
            }
            DRETURN => {
                let value = self.state.pop(ValueType::Double, self.ir);
                self.method_return(Some(value));
            }
            ARETURN => {
                let value = self.state.pop(ValueType::Object, self.ir);
                self.method_return(Some(value));
            }
            RETURN => self.method_return(None),
            GETSTATIC | GETFIELD => {
                self.load_field(self.cursor.unsigned_operand(1, 2) as usize, code)
            }
            PUTSTATIC | PUTFIELD => {
                self.store_field(self.cursor.unsigned_operand(1, 2) as usize, code)
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                self.invoke(code, self.cursor.unsigned_operand(1, 2) as usize)?
            }
            NEW => self.new_instance(self.cursor.unsigned_operand(1, 2) as usize),
            NEWARRAY => self.new_type_array(self.cursor.signed_operand(1, 1)),
            ANEWARRAY => self.new_object_array(self.cursor.unsigned_operand(1, 2) as usize),
            ARRAYLENGTH => {
                let array = self.state.pop(ValueType::Object, self.ir);
                let instr = self.ir.alloc(ValueType::Int, InstrKind::ArrayLength { array });
                let appended = self.append(instr);
                self.state.push(ValueType::Int, appended, self.ir);
            }
            ATHROW => {
                let exception = self.state.pop(ValueType::Object, self.ir);
                let instr =
                    self.ir.alloc_end(ValueType::Illegal, InstrKind::Throw { exception }, Vec::new());
                self.append(instr);
            }
            CHECKCAST => self.check_cast(self.cursor.unsigned_operand(1, 2) as usize),
            INSTANCEOF => self.instance_of(self.cursor.unsigned_operand(1, 2) as usize),
            MONITORENTER => self.monitor_enter(),
            MONITOREXIT => self.monitor_exit()?,
            MULTIANEWARRAY => self.new_multi_array(
                self.cursor.unsigned_operand(1, 2) as usize,
                self.cursor.signed_operand(3, 1),
            ),
            IFNULL => self.if_null(Cond::Eq),
            IFNONNULL => self.if_null(Cond::Ne),
            GOTO_W => {
                let target = self
                    .block_at(self.cursor.destination(1, true))
                    .expect("goto target must be a block");
                let instr = self.ir.alloc_end(ValueType::Illegal, InstrKind::Goto, vec![target]);
                self.append(instr);
            }
            JSR_W => self.jsr(self.cursor.destination(1, true))?,
            BREAKPOINT => return Err(Bailout::Breakpoint),
            _ => unreachable!("should not reach here"),
        }
        Ok(())
    }
}
