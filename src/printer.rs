//! Textual dumps of instructions, blocks and bytecodes for tracing.
//!
//! Everything here produces strings; the driver routes them through the
//! `log` facade when the corresponding diagnostic flags are set. None of
//! these functions affect compilation.

use crate::bytecodes::{self, *};
use crate::ci::Method;
use crate::cursor::BytecodeCursor;
use crate::ir::instr::{ConstValue, InstrKind, ValueType};
use crate::ir::{BlockId, InstrId, Ir};
use std::fmt::Write;

fn type_char(ty: ValueType) -> char {
    match ty {
        ValueType::Void => 'v',
        ValueType::Int => 'i',
        ValueType::Long => 'l',
        ValueType::Float => 'f',
        ValueType::Double => 'd',
        ValueType::Object => 'a',
        ValueType::Address => 'r',
        ValueType::Illegal => '!',
    }
}

/// Type character and identification number, e.g. `i17`.
fn temp(ir: &Ir, id: InstrId) -> String {
    format!("{}{}", type_char(ir.ty(id)), id.0)
}

fn op_name(op: u8) -> &'static str {
    match op {
        IADD | LADD | FADD | DADD => "+",
        ISUB | LSUB | FSUB | DSUB => "-",
        IMUL | LMUL | FMUL | DMUL => "*",
        IDIV | LDIV | FDIV | DDIV => "/",
        IREM | LREM | FREM | DREM => "%",
        ISHL | LSHL => "<<",
        ISHR | LSHR => ">>",
        IUSHR | LUSHR => ">>>",
        IAND | LAND => "&",
        IOR | LOR => "|",
        IXOR | LXOR => "^",
        _ => bytecodes::name(op),
    }
}

fn const_string(value: &ConstValue) -> String {
    match value {
        ConstValue::Int(v) => format!("{v}"),
        ConstValue::Long(v) => format!("{v}L"),
        ConstValue::Float(v) => format!("{v}f"),
        ConstValue::Double(v) => format!("{v}d"),
        ConstValue::Null => "null".to_string(),
        ConstValue::Str(s) => format!("\"{s}\""),
        ConstValue::Class(class) => format!("<class {}>", class.name),
        ConstValue::Address(bci) => format!("bci:{bci}"),
    }
}

fn block_name(block: BlockId) -> String {
    format!("B{}", block.0)
}

/// The operation of one instruction with its operand ids, without the line
/// prefix.
pub fn instr_to_string(ir: &Ir, id: InstrId) -> String {
    let sux = &ir.instr(id).sux;
    match &ir.instr(id).kind {
        InstrKind::Constant(value) => const_string(value),
        InstrKind::LoadLocal { index } => format!("local[{index}]"),
        InstrKind::StoreLocal { index, value } => {
            format!("local[{index}] := {}", temp(ir, *value))
        }
        InstrKind::LoadField { obj, offset, is_static, .. } => {
            let suffix = if *is_static { " (static)" } else { "" };
            format!("{}.field@{offset}{suffix}", temp(ir, *obj))
        }
        InstrKind::StoreField { obj, offset, value, is_static, .. } => {
            let suffix = if *is_static { " (static)" } else { "" };
            format!("{}.field@{offset}{suffix} := {}", temp(ir, *obj), temp(ir, *value))
        }
        InstrKind::LoadIndexed { array, index, .. } => {
            format!("{}[{}]", temp(ir, *array), temp(ir, *index))
        }
        InstrKind::StoreIndexed { array, index, value, .. } => {
            format!("{}[{}] := {}", temp(ir, *array), temp(ir, *index), temp(ir, *value))
        }
        InstrKind::ArrayLength { array } => format!("{}.length", temp(ir, *array)),
        InstrKind::ArithmeticOp { op, x, y }
        | InstrKind::ShiftOp { op, x, y }
        | InstrKind::LogicOp { op, x, y } => {
            format!("{} {} {}", temp(ir, *x), op_name(*op), temp(ir, *y))
        }
        InstrKind::CompareOp { op, x, y } => {
            format!("{} {} {}", bytecodes::name(*op), temp(ir, *x), temp(ir, *y))
        }
        InstrKind::NegateOp { x } => format!("- {}", temp(ir, *x)),
        InstrKind::Convert { op, value } => {
            format!("{}({})", bytecodes::name(*op), temp(ir, *value))
        }
        InstrKind::NewInstance { class } => format!("new instance of {}", class.name),
        InstrKind::NewTypeArray { length, elem_type } => {
            format!("new {elem_type} array [{}]", temp(ir, *length))
        }
        InstrKind::NewObjectArray { class, length } => {
            format!("new {} array [{}]", class.name, temp(ir, *length))
        }
        InstrKind::NewMultiArray { class, dims } => {
            let dims: Vec<_> = dims.iter().map(|&dim| temp(ir, dim)).collect();
            format!("new {} multi array [{}]", class.name, dims.join(", "))
        }
        InstrKind::CheckCast { class, obj } => {
            format!("checkcast({}) {}", temp(ir, *obj), class.name)
        }
        InstrKind::InstanceOf { class, obj } => {
            format!("instanceof({}) {}", temp(ir, *obj), class.name)
        }
        InstrKind::NullCheck { obj } => format!("null_check({})", temp(ir, *obj)),
        InstrKind::Invoke { op, recv, args, .. } => {
            let args: Vec<_> = args.iter().map(|&arg| temp(ir, arg)).collect();
            match recv {
                Some(recv) => {
                    format!("{}.{}({})", temp(ir, *recv), bytecodes::name(*op), args.join(", "))
                }
                None => format!("{}({})", bytecodes::name(*op), args.join(", ")),
            }
        }
        InstrKind::IntrinsicCall { id, args } => {
            let args: Vec<_> = args.iter().map(|&arg| temp(ir, arg)).collect();
            format!("{id}({})", args.join(", "))
        }
        InstrKind::MonitorEnter { obj, monitor_no } => {
            format!("enter monitor[{monitor_no}]({})", temp(ir, *obj))
        }
        InstrKind::MonitorExit { obj, monitor_no } => {
            format!("exit monitor[{monitor_no}]({})", temp(ir, *obj))
        }
        InstrKind::Phi { index, stack_size } => format!("phi[{index} of {stack_size}]"),
        InstrKind::Jsr { subroutine } => format!("jsr {}", block_name(*subroutine)),
        InstrKind::JsrContinuation => "jsr continuation".to_string(),
        InstrKind::Goto => format!("goto {}", block_name(sux[0])),
        InstrKind::If { x, cond, unordered_is_true, y } => {
            let bias = if *unordered_is_true { " (unordered is true)" } else { "" };
            format!(
                "if {} {cond} {} then {} else {}{bias}",
                temp(ir, *x),
                temp(ir, *y),
                block_name(sux[0]),
                block_name(sux[1]),
            )
        }
        InstrKind::TableSwitch { tag, lo_key } => {
            let mut text = format!("tableswitch {}", temp(ir, *tag));
            for (i, &target) in sux[..sux.len() - 1].iter().enumerate() {
                write!(text, " {}: {}", lo_key + i as i32, block_name(target)).unwrap();
            }
            write!(text, " default: {}", block_name(*sux.last().unwrap())).unwrap();
            text
        }
        InstrKind::LookupSwitch { tag, keys } => {
            let mut text = format!("lookupswitch {}", temp(ir, *tag));
            for (&key, &target) in keys.iter().zip(sux.iter()) {
                write!(text, " {key}: {}", block_name(target)).unwrap();
            }
            write!(text, " default: {}", block_name(*sux.last().unwrap())).unwrap();
            text
        }
        InstrKind::Return { result, .. } => match result {
            Some(result) => {
                format!("{}return {}", type_char(ir.ty(*result)), temp(ir, *result))
            }
            None => "return".to_string(),
        },
        InstrKind::Throw { exception } => format!("throw {}", temp(ir, *exception)),
        InstrKind::Ret { index } => format!("ret local[{index}]"),
    }
}

/// Block header: id, bci range, role flags, successors, subroutines in
/// parentheses, exception handlers in braces.
pub fn block_to_string(ir: &Ir, block: BlockId) -> String {
    let data = ir.block(block);
    let end_bci = match data.end {
        Some(end) => ir.instr(end).bci,
        None => -1,
    };
    let mut text = format!("{} [{}, {end_bci}]", block_name(block), data.bci);
    for (flag, label) in [
        (crate::ir::STD_ENTRY_FLAG, "std entry"),
        (crate::ir::OSR_ENTRY_FLAG, "osr entry"),
        (crate::ir::EXCEPTION_ENTRY_FLAG, "exception entry"),
        (crate::ir::SUBROUTINE_ENTRY_FLAG, "subroutine entry"),
    ] {
        if data.is_flag_set(flag) {
            write!(text, " {label}").unwrap();
        }
    }
    if let Some(end) = data.end {
        let sux = &ir.instr(end).sux;
        if !sux.is_empty() {
            write!(text, " ->").unwrap();
            for &target in sux {
                write!(text, " {}", block_name(target)).unwrap();
            }
        }
    }
    if !data.subroutines.is_empty() {
        let names: Vec<_> = data.subroutines.iter().map(|&sub| block_name(sub)).collect();
        write!(text, " ({})", names.join(" ")).unwrap();
    }
    if !data.xhandlers.is_empty() {
        let names: Vec<_> = data.xhandlers.iter().map(|&handler| block_name(handler)).collect();
        write!(text, " {{{}}}", names.join(" ")).unwrap();
    }
    text
}

fn stack_to_string(ir: &Ir, block: BlockId) -> String {
    let mut text = String::from("stack [");
    if let Some(state) = &ir.block(block).state {
        let values: Vec<_> =
            state.stack_values(ir).into_iter().map(|value| temp(ir, value)).collect();
        text.push_str(&values.join(" "));
    }
    text.push(']');
    text
}

fn print_line(ir: &Ir, out: &mut String, id: InstrId) {
    let data = ir.instr(id);
    let pin = if data.pinned { '.' } else { ' ' };
    let tid = temp(ir, id);
    writeln!(out, "{pin}{:>4}{:>5}  {tid:<6}{}", data.bci, data.use_count, instr_to_string(ir, id))
        .unwrap();
}

/// One block with its entry stack and instruction table.
fn print_block(ir: &Ir, out: &mut String, block: BlockId) {
    writeln!(out, "{}", block_to_string(ir, block)).unwrap();
    writeln!(out, "{}", stack_to_string(ir, block)).unwrap();
    writeln!(out, "__bci__use__tid____instr____________________________________").unwrap();
    for instr in ir.block_instrs(block) {
        print_line(ir, out, instr);
    }
    out.push('\n');
}

/// The whole graph in final code order.
pub fn print_ir(ir: &Ir) -> String {
    let mut out = String::new();
    for &block in ir.code() {
        print_block(ir, &mut out, block);
    }
    out
}

/// Block headers only, in final code order.
pub fn print_cfg(ir: &Ir) -> String {
    let mut out = String::new();
    for &block in ir.code() {
        writeln!(out, "{}", block_to_string(ir, block)).unwrap();
    }
    out
}

fn operand_string(stream: &BytecodeCursor) -> String {
    match stream.opcode() {
        BIPUSH => format!(" {}", stream.signed_operand(1, 1)),
        SIPUSH => format!(" {}", stream.signed_operand(1, 2)),
        LDC => format!(" #{}", stream.unsigned_operand(1, 1)),
        LDC_W | LDC2_W | GETSTATIC | GETFIELD | PUTSTATIC | PUTFIELD | INVOKEVIRTUAL
        | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | NEW | ANEWARRAY | CHECKCAST
        | INSTANCEOF => format!(" #{}", stream.unsigned_operand(1, 2)),
        ILOAD | LLOAD | FLOAD | DLOAD | ALOAD | ISTORE | LSTORE | FSTORE | DSTORE | ASTORE
        | RET => format!(" {}", stream.unsigned_operand_wide(1, 1, 2, 2)),
        IINC => format!(
            " {} {}",
            stream.unsigned_operand_wide(1, 1, 2, 2),
            stream.signed_operand_wide(2, 1, 4, 2)
        ),
        NEWARRAY => format!(" {}", stream.signed_operand(1, 1)),
        MULTIANEWARRAY => {
            format!(" #{} {}", stream.unsigned_operand(1, 2), stream.signed_operand(3, 1))
        }
        IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE | IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE
        | IF_ICMPGT | IF_ICMPLE | IF_ACMPEQ | IF_ACMPNE | IFNULL | IFNONNULL | GOTO | JSR => {
            format!(" {}", stream.destination(1, false))
        }
        GOTO_W | JSR_W => format!(" {}", stream.destination(1, true)),
        TABLESWITCH => {
            let bci = stream.bci();
            let offset = ((bci + 4) & !0x03) - bci;
            let lo = stream.signed_operand(offset + 4, 4);
            let hi = stream.signed_operand(offset + 8, 4);
            format!(" {lo} to {hi} default {}", stream.destination(offset, true))
        }
        LOOKUPSWITCH => {
            let bci = stream.bci();
            let offset = ((bci + 4) & !0x03) - bci;
            let npairs = stream.signed_operand(offset + 4, 4);
            format!(" {npairs} pairs default {}", stream.destination(offset, true))
        }
        _ => String::new(),
    }
}

/// Bytecode listing of a method: one line per instruction with index, name
/// and operands, followed by the exception handler table.
pub fn disassemble(method: &Method) -> String {
    let mut out = String::new();
    let mut stream = BytecodeCursor::new(method.code.clone());
    while stream.advance() {
        let wide = if stream.is_wide() { "wide " } else { "" };
        writeln!(
            out,
            "{:>4} {wide}{}{}",
            stream.bci(),
            bytecodes::name(stream.opcode()),
            operand_string(&stream)
        )
        .unwrap();
    }
    for handler in &method.exception_handlers {
        writeln!(
            out,
            "handler [{}, {}) -> {} type #{}",
            handler.start, handler.limit, handler.target, handler.type_index
        )
        .unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Flags;
    use crate::test_fixtures::leaf_method;

    #[test]
    fn ir_dump_shows_blocks_and_instructions() {
        let method = leaf_method(&[ILOAD_0, ICONST_1, IADD, IRETURN], 1);
        let ir = crate::build_ir(method, -1, &Flags::default()).unwrap();
        let dump = print_ir(&ir);
        assert!(dump.contains("std entry"), "missing entry marker:\n{dump}");
        assert!(dump.contains("local[0]"), "missing local load:\n{dump}");
        assert!(dump.contains(" + "), "missing the add:\n{dump}");
        assert!(dump.contains("ireturn"), "missing the return:\n{dump}");
    }

    #[test]
    fn cfg_dump_lists_successors() {
        let code = [ILOAD_0, IFEQ, 0, 7, ICONST_1, GOTO, 0, 4, ICONST_0, IRETURN];
        let ir = crate::build_ir(leaf_method(&code, 1), -1, &Flags::default()).unwrap();
        let dump = print_cfg(&ir);
        assert_eq!(dump.lines().count(), ir.code().len());
        assert!(dump.lines().next().unwrap().contains("->"), "entry must list successors:\n{dump}");
    }

    #[test]
    fn disassembly_covers_every_instruction() {
        let method = leaf_method(&[ILOAD_0, IFEQ, 0, 4, NOP, IINC, 0, 1, RETURN], 1);
        let listing = disassemble(&method);
        assert!(listing.contains("iload_0"));
        assert!(listing.contains("ifeq 5"), "branch target must be absolute:\n{listing}");
        assert!(listing.contains("iinc 0 1"));
        assert!(listing.contains("return"));
    }
}
