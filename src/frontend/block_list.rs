//! Determines the starts of all basic blocks. This is the first pass of
//! building the intermediate representation; the graph builder then fills
//! the gaps between the discovered leaders with instructions.

use crate::Bailout;
use crate::bytecodes::*;
use crate::cursor::BytecodeCursor;
use crate::ir::{
    BlockId, EXCEPTION_ENTRY_FLAG, Ir, NO_FLAG, OSR_ENTRY_FLAG, STD_ENTRY_FLAG, ScopeHandler,
    ScopeId, SUBROUTINE_ENTRY_FLAG,
};
use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct BlockListBuilder {
    pub bci2block: FxHashMap<i32, BlockId>,
    pub std_entry: BlockId,
    pub osr_entry: Option<BlockId>,
}

impl BlockListBuilder {
    /// Scans the scope's bytecode and creates one block per leader. The
    /// handler table is bound to its entry blocks and stored on the scope.
    pub fn build(ir: &mut Ir, scope: ScopeId, osr_bci: i32) -> Result<BlockListBuilder, Bailout> {
        let mut builder = Leaders { ir, scope, bci2block: FxHashMap::default() };
        builder.set_leaders();
        builder.set_exception_handler_entries();
        let std_entry = builder.block_at(0, STD_ENTRY_FLAG);
        let osr_entry = if osr_bci >= 0 {
            // The OSR entry must already have been discovered as a jump
            // target; compiling into the middle of a straight-line sequence
            // is not supported.
            if !builder.bci2block.contains_key(&osr_bci) {
                return Err(Bailout::OsrEntryMissing);
            }
            Some(builder.block_at(osr_bci, OSR_ENTRY_FLAG))
        } else {
            None
        };
        Ok(BlockListBuilder { bci2block: builder.bci2block, std_entry, osr_entry })
    }
}

struct Leaders<'a> {
    ir: &'a mut Ir,
    scope: ScopeId,
    bci2block: FxHashMap<i32, BlockId>,
}

impl Leaders<'_> {
    /// The block starting at `bci`, created on first request. Re-requesting
    /// an existing bci returns the same block with the new flag OR'd in.
    fn block_at(&mut self, bci: i32, flag: u8) -> BlockId {
        let block = match self.bci2block.get(&bci) {
            Some(&block) => block,
            None => {
                let block = self.ir.new_block(self.scope, bci);
                self.bci2block.insert(bci, block);
                block
            }
        };
        if flag != NO_FLAG {
            self.ir.block_mut(block).set_flag(flag);
        }
        block
    }

    fn table_switch(&mut self, stream: &BytecodeCursor) {
        let bci = stream.bci();
        let mut offset = ((bci + 4) & !0x03) - bci;
        let lo = stream.signed_operand(offset + 4, 4);
        let hi = stream.signed_operand(offset + 8, 4);
        self.block_at(stream.destination(offset, true), NO_FLAG);
        offset += 12;
        for _ in 0..=(hi - lo) {
            self.block_at(stream.destination(offset, true), NO_FLAG);
            offset += 4;
        }
    }

    fn lookup_switch(&mut self, stream: &BytecodeCursor) {
        let bci = stream.bci();
        let mut offset = ((bci + 4) & !0x03) - bci;
        let npairs = stream.signed_operand(offset + 4, 4);
        self.block_at(stream.destination(offset, true), NO_FLAG);
        offset += 12;
        for _ in 0..npairs {
            self.block_at(stream.destination(offset, true), NO_FLAG);
            offset += 8;
        }
    }

    fn set_leaders(&mut self) {
        let mut stream = BytecodeCursor::new(self.ir.scope(self.scope).method.code.clone());
        while stream.advance() {
            match stream.opcode() {
                IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE | IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT
                | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE | IF_ACMPEQ | IF_ACMPNE | IFNULL
                | IFNONNULL => {
                    self.block_at(stream.destination(1, false), NO_FLAG);
                    self.block_at(stream.next_bci(), NO_FLAG);
                }
                GOTO => {
                    self.block_at(stream.destination(1, false), NO_FLAG);
                }
                JSR => {
                    self.block_at(stream.destination(1, false), SUBROUTINE_ENTRY_FLAG);
                }
                TABLESWITCH => self.table_switch(&stream),
                LOOKUPSWITCH => self.lookup_switch(&stream),
                GOTO_W => {
                    self.block_at(stream.destination(1, true), NO_FLAG);
                }
                JSR_W => {
                    self.block_at(stream.destination(1, true), SUBROUTINE_ENTRY_FLAG);
                }
                _ => {}
            }
        }
    }

    fn set_exception_handler_entries(&mut self) {
        let handlers = self.ir.scope(self.scope).method.exception_handlers.clone();
        let mut bound = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let entry = self.block_at(handler.target, EXCEPTION_ENTRY_FLAG);
            bound.push(ScopeHandler {
                start: handler.start,
                limit: handler.limit,
                target: handler.target,
                type_index: handler.type_index,
                entry,
            });
        }
        self.ir.scope_mut(self.scope).xhandlers = bound;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecodes::*;
    use crate::ci::ExceptionHandler;
    use crate::ir::{Ir, TOP_SCOPE};
    use crate::test_fixtures::leaf_method;

    fn leaders_of(code: &[u8]) -> (Ir, BlockListBuilder) {
        let mut ir = Ir::new(leaf_method(code, 4));
        let blb = BlockListBuilder::build(&mut ir, TOP_SCOPE, -1).unwrap();
        (ir, blb)
    }

    #[test]
    fn conditional_branch_splits_target_and_fallthrough() {
        // 0: iload_0; 1: ifeq +5 (-> 6); 4: iconst_0; 5: ireturn; 6: iconst_1; 7: ireturn
        let code = [ILOAD_0, IFEQ, 0, 5, ICONST_0, IRETURN, ICONST_1, IRETURN];
        let (_, blb) = leaders_of(&code);
        assert!(blb.bci2block.contains_key(&0));
        assert!(blb.bci2block.contains_key(&4), "fallthrough must be a leader");
        assert!(blb.bci2block.contains_key(&6), "branch target must be a leader");
        assert_eq!(blb.bci2block.len(), 3);
    }

    #[test]
    fn blocks_are_deduplicated_by_bci() {
        // Two branches to the same target produce one block with both roles.
        let code = [ILOAD_0, IFEQ, 0, 5, GOTO, 0, 2, NOP, RETURN];
        let (ir, blb) = leaders_of(&code);
        let target = blb.bci2block[&6];
        assert_eq!(blb.bci2block.values().filter(|&&b| b == target).count(), 1);
        assert_eq!(ir.block(blb.std_entry).bci, 0);
        assert!(ir.block(blb.std_entry).is_flag_set(STD_ENTRY_FLAG));
    }

    #[test]
    fn switch_records_every_target_including_default() {
        // 0: iload_0, then tableswitch at 1 (pad to 4): default 30->31, lo 0
        // hi 1, targets 28->29 and 29->30.
        let mut code = vec![ILOAD_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&[0, 0, 0, 30]); // default (1 + 30 = 31)
        code.extend_from_slice(&[0, 0, 0, 0]); // lo
        code.extend_from_slice(&[0, 0, 0, 1]); // hi
        code.extend_from_slice(&[0, 0, 0, 28]); // case 0 -> 29
        code.extend_from_slice(&[0, 0, 0, 29]); // case 1 -> 30
        code.resize(29, NOP);
        code.extend_from_slice(&[RETURN, RETURN, RETURN]);
        let (_, blb) = leaders_of(&code);
        for target in [29, 30, 31] {
            assert!(blb.bci2block.contains_key(&target), "missing switch target {target}");
        }
    }

    #[test]
    fn jsr_marks_a_subroutine_entry() {
        let code = [JSR, 0, 4, RETURN, ASTORE_1, RET, 1];
        let (ir, blb) = leaders_of(&code);
        let sub = blb.bci2block[&4];
        assert!(ir.block(sub).is_flag_set(SUBROUTINE_ENTRY_FLAG));
    }

    #[test]
    fn handler_entries_are_flagged_and_bound() {
        let mut method = (*leaf_method(&[NOP, NOP, RETURN], 1)).clone();
        method.exception_handlers =
            vec![ExceptionHandler { start: 0, limit: 2, target: 2, type_index: 0 }];
        let mut ir = Ir::new(std::sync::Arc::new(method));
        let blb = BlockListBuilder::build(&mut ir, TOP_SCOPE, -1).unwrap();
        let entry = blb.bci2block[&2];
        assert!(ir.block(entry).is_flag_set(EXCEPTION_ENTRY_FLAG));
        assert_eq!(ir.scope(TOP_SCOPE).xhandlers[0].entry, entry);
        assert!(ir.scope(TOP_SCOPE).xhandlers[0].covers(1));
        assert!(!ir.scope(TOP_SCOPE).xhandlers[0].covers(2));
    }

    #[test]
    fn osr_entry_must_be_a_discovered_leader() {
        // 0..3 straight line, backward goto to 1.
        let code = [NOP, NOP, NOP, NOP, GOTO, 0xff, 0xfd];
        let mut ir = Ir::new(leaf_method(&code, 0));
        assert_eq!(
            BlockListBuilder::build(&mut ir, TOP_SCOPE, 2).unwrap_err(),
            Bailout::OsrEntryMissing
        );
        let mut ir = Ir::new(leaf_method(&code, 0));
        let blb = BlockListBuilder::build(&mut ir, TOP_SCOPE, 1).unwrap();
        let osr = blb.osr_entry.unwrap();
        assert!(ir.block(osr).is_flag_set(OSR_ENTRY_FLAG));
    }
}
