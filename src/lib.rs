//! `smelter` is the front end of a just-in-time bytecode compiler: it turns
//! a method's bytecode array into an optimized, block-structured IR ready
//! for machine-code generation.
//!
//! The pipeline is bytecode cursor -> leader discovery -> graph building
//! (which drives the cursor again, the canonicalizer and the abstract
//! machine state) -> weight/use-count post passes. The caller provides
//! resolved metadata through the [`ci`] layer and receives either a
//! finished [`ir::Ir`] or a [`Bailout`]; there is no third outcome short of
//! a bug in the compiler itself.

pub mod bytecodes;
pub mod ci;
pub mod cursor;
pub mod flags;
pub mod frontend;
pub mod ir;
pub mod printer;

pub use flags::Flags;
pub use frontend::build_ir;

use thiserror::Error;

/// A deliberate, recoverable refusal to compile the current method. The
/// driver is expected to fall back to a non-optimizing execution path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Bailout {
    #[error("could not resolve a constant")]
    UnresolvedConstant,

    #[error("block join failed")]
    BlockJoinFailed,

    #[error("jsr join failed")]
    JsrJoinFailed,

    #[error("jsr ret states incompatible")]
    JsrRetStatesIncompatible,

    #[error("jsr returns with non-empty stack")]
    JsrNonEmptyStack,

    #[error("monitor stack underflow")]
    MonitorStackUnderflow,

    #[error("illegal monitor state")]
    IllegalMonitorState,

    #[error("invalid code for calling this method")]
    InvalidInvokeKind,

    #[error("osr entry must exist")]
    OsrEntryMissing,

    #[error("stack not empty at osr entry")]
    OsrStackNotEmpty,

    #[error("compiler does not accept jsr for osr")]
    JsrWithOsr,

    #[error("concurrent setting of breakpoint")]
    Breakpoint,
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use crate::ci::{BasicType, ClassInfo, ConstantPool, Method};
    use std::sync::Arc;

    pub fn method_with(
        code: &[u8],
        max_locals: usize,
        arg_size: usize,
        return_type: BasicType,
        constants: Arc<ConstantPool>,
    ) -> Arc<Method> {
        Arc::new(Method {
            name: "test".to_string(),
            holder: ClassInfo::resolved("Test"),
            code: Arc::from(code),
            max_locals,
            arg_size,
            return_type,
            is_static: true,
            is_synchronized: false,
            is_native: false,
            is_strict: false,
            is_final_method: false,
            is_loaded: true,
            intrinsic: None,
            exception_handlers: Vec::new(),
            constants,
        })
    }

    /// A static method with no arguments and an empty constant pool.
    pub fn leaf_method(code: &[u8], max_locals: usize) -> Arc<Method> {
        method_with(code, max_locals, 0, BasicType::Int, Arc::new(ConstantPool::default()))
    }
}
