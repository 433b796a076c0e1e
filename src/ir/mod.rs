//! The intermediate representation: arena-owned instructions, basic blocks
//! and inlining scopes, addressed by ids.
//!
//! Block topology is immutable once the graph builder finishes; later passes
//! only touch weights, pin flags and use counts. The finished [`Ir`] is what
//! the back end consumes: the entry block, the optional OSR entry and the
//! ordered code list.

pub mod instr;
pub mod state;

use crate::ci::Method;
use crate::ir::instr::{ConstValue, InstrKind, Instruction, ValueType};
use crate::ir::state::ValueStack;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

pub const NO_FLAG: u8 = 0;
pub const STD_ENTRY_FLAG: u8 = 1 << 0;
pub const OSR_ENTRY_FLAG: u8 = 1 << 1;
pub const EXCEPTION_ENTRY_FLAG: u8 = 1 << 2;
pub const SUBROUTINE_ENTRY_FLAG: u8 = 1 << 3;
pub const WAS_VISITED_FLAG: u8 = 1 << 4;

/// A basic block. Created once per leader bci; instructions hang off the
/// `first`/`next` chain and terminate in the `end` instruction.
#[derive(Debug)]
pub struct BlockData {
    pub bci: i32,
    pub scope: ScopeId,
    pub flags: u8,
    /// Ordering rank; the key assigned during collection, then renumbered
    /// 0,1,2,... in final layout order.
    pub weight: u32,
    /// Frozen state on entry, installed by the first predecessor to arrive.
    pub state: Option<ValueStack>,
    pub first: Option<InstrId>,
    pub end: Option<InstrId>,
    /// Subroutines called from this block.
    pub subroutines: Vec<BlockId>,
    /// Exception handler entries reachable from this block.
    pub xhandlers: Vec<BlockId>,
}

impl BlockData {
    pub fn set_flag(&mut self, flag: u8) {
        self.flags |= flag;
    }

    pub fn is_flag_set(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_entry_block(&self) -> bool {
        self.flags & (STD_ENTRY_FLAG | EXCEPTION_ENTRY_FLAG | SUBROUTINE_ENTRY_FLAG) != 0
    }

    pub fn add_subroutine(&mut self, block: BlockId) {
        if !self.subroutines.contains(&block) {
            self.subroutines.push(block);
        }
    }

    pub fn add_exception_handler(&mut self, block: BlockId) {
        if !self.xhandlers.contains(&block) {
            self.xhandlers.push(block);
        }
    }
}

/// An exception handler bound to its entry block within a scope.
#[derive(Clone, Debug)]
pub struct ScopeHandler {
    pub start: i32,
    pub limit: i32,
    pub target: i32,
    pub type_index: u16,
    pub entry: BlockId,
}

impl ScopeHandler {
    pub fn covers(&self, bci: i32) -> bool {
        self.start <= bci && bci < self.limit
    }

    pub fn is_catch_all(&self) -> bool {
        self.type_index == 0
    }
}

/// One method scope; inlining a callee creates a nested scope.
#[derive(Debug)]
pub struct ScopeData {
    pub caller: Option<ScopeId>,
    pub level: u32,
    pub method: Arc<Method>,
    pub xhandlers: Vec<ScopeHandler>,
    pub std_entry: Option<BlockId>,
    pub osr_entry: Option<BlockId>,
    /// Number of monitor lock slots the scope needs.
    pub number_of_locks: usize,
    /// Whether any jsr was translated in this scope.
    pub found_jsr: bool,
}

impl ScopeData {
    pub fn set_min_locks(&mut self, count: usize) {
        if count > self.number_of_locks {
            self.number_of_locks = count;
        }
    }
}

#[derive(Debug)]
pub struct Ir {
    instrs: Vec<Instruction>,
    blocks: Vec<BlockData>,
    scopes: Vec<ScopeData>,
    code: Option<Vec<BlockId>>,
}

pub const TOP_SCOPE: ScopeId = ScopeId(0);

impl Ir {
    pub fn new(method: Arc<Method>) -> Ir {
        Ir {
            instrs: Vec::new(),
            blocks: Vec::new(),
            scopes: vec![ScopeData {
                caller: None,
                level: 0,
                method,
                xhandlers: Vec::new(),
                std_entry: None,
                osr_entry: None,
                number_of_locks: 0,
                found_jsr: false,
            }],
            code: None,
        }
    }

    pub fn new_scope(&mut self, caller: ScopeId, method: Arc<Method>) -> ScopeId {
        let level = self.scope(caller).level + 1;
        self.scopes.push(ScopeData {
            caller: Some(caller),
            level,
            method,
            xhandlers: Vec::new(),
            std_entry: None,
            osr_entry: None,
            number_of_locks: 0,
            found_jsr: false,
        });
        ScopeId(self.scopes.len() as u32 - 1)
    }

    /// Allocates a fresh, unanchored instruction (bci -1, not linked into
    /// any block).
    pub fn alloc(&mut self, ty: ValueType, kind: InstrKind) -> InstrId {
        let pinned = kind.initially_pinned();
        self.instrs.push(Instruction {
            ty,
            bci: -1,
            pinned,
            use_count: 0,
            next: None,
            subst: None,
            state: None,
            sux: Vec::new(),
            kind,
        });
        InstrId(self.instrs.len() as u32 - 1)
    }

    /// Allocates a block-ending instruction with the given successors.
    pub fn alloc_end(&mut self, ty: ValueType, kind: InstrKind, sux: Vec<BlockId>) -> InstrId {
        let id = self.alloc(ty, kind);
        self.instr_mut(id).sux = sux;
        id
    }

    pub fn new_block(&mut self, scope: ScopeId, bci: i32) -> BlockId {
        self.blocks.push(BlockData {
            bci,
            scope,
            flags: NO_FLAG,
            weight: 0,
            state: None,
            first: None,
            end: None,
            subroutines: Vec::new(),
            xhandlers: Vec::new(),
        });
        BlockId(self.blocks.len() as u32 - 1)
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.0 as usize]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instrs[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeData {
        &mut self.scopes[id.0 as usize]
    }

    pub fn count_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn count_instrs(&self) -> usize {
        self.instrs.len()
    }

    pub fn ty(&self, id: InstrId) -> ValueType {
        self.instr(id).ty
    }

    /// The constant an instruction evaluates to, if it is a constant.
    pub fn as_const(&self, id: InstrId) -> Option<&ConstValue> {
        match &self.instr(id).kind {
            InstrKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Follows the substitution chain installed by inlining.
    pub fn subst_of(&self, id: InstrId) -> InstrId {
        match self.instr(id).subst {
            Some(subst) => self.subst_of(subst),
            None => id,
        }
    }

    /// The method entry of the compiled (top) scope.
    pub fn std_entry(&self) -> BlockId {
        self.scope(TOP_SCOPE).std_entry.expect("graph has not been built")
    }

    pub fn osr_entry(&self) -> Option<BlockId> {
        self.scope(TOP_SCOPE).osr_entry
    }

    pub fn method(&self) -> &Arc<Method> {
        &self.scope(TOP_SCOPE).method
    }

    pub fn set_code(&mut self, code: Vec<BlockId>) {
        self.code = Some(code);
    }

    /// Blocks in final layout order.
    pub fn code(&self) -> &[BlockId] {
        self.code.as_deref().expect("code order has not been computed")
    }

    /// Iterates over the block's instruction chain (excluding the block
    /// header itself).
    pub fn block_instrs(&self, block: BlockId) -> BlockInstrs<'_> {
        BlockInstrs { ir: self, next: self.block(block).first }
    }

    /// First predecessor installs its state, later ones must agree with it.
    pub fn try_join(&mut self, block: BlockId, state: &ValueStack) -> bool {
        if self.block(block).state.is_none() {
            let entry = ValueStack::with_phis(state, self);
            self.block_mut(block).state = Some(entry);
            true
        } else {
            self.block(block).state.as_ref().unwrap().is_compatible(state, self)
        }
    }

    /// All end instructions without successors reachable from `from` via
    /// successor edges. Used to find the ret exits of a subroutine.
    pub fn collect_ends(&self, from: BlockId) -> Vec<InstrId> {
        let mut marked = vec![false; self.blocks.len()];
        let mut ends = Vec::new();
        let mut worklist = vec![from];
        while let Some(block) = worklist.pop() {
            if std::mem::replace(&mut marked[block.0 as usize], true) {
                continue;
            }
            let end = self.block(block).end.expect("block has not been completed yet");
            let sux = &self.instr(end).sux;
            if sux.is_empty() {
                ends.push(end);
            } else {
                // Push in forward order so the deepest successor pops first,
                // matching a reverse-order recursive walk.
                worklist.extend(sux.iter().copied());
            }
        }
        ends
    }
}

pub struct BlockInstrs<'a> {
    ir: &'a Ir,
    next: Option<InstrId>,
}

impl Iterator for BlockInstrs<'_> {
    type Item = InstrId;

    fn next(&mut self) -> Option<InstrId> {
        let current = self.next?;
        self.next = self.ir.instr(current).next;
        Some(current)
    }
}
