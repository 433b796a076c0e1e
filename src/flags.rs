//! Compiler configuration. The driver reads these once at startup and hands
//! the same instance to every compilation; nothing in the front end mutates
//! them.

/// Pseudo-bci used for the lock taken on entry to a synchronized method.
pub const SYNC_ENTRY_BCI: i32 = -1;

#[derive(Clone, Debug)]
pub struct Flags {
    /// Run the canonicalizer on every appended instruction.
    pub canonicalize_nodes: bool,
    /// Reuse structurally equal values within a block.
    pub use_value_numbering: bool,
    /// Reuse cached local variable values instead of re-loading.
    pub eliminate_loads: bool,
    /// Master switch for inlining.
    pub inline: bool,
    pub inline_intrinsics: bool,
    pub inline_simple_methods: bool,
    /// Byte-size ceiling for simple-method inlining.
    pub max_inline_size: usize,
    /// Do not cache float/double locals across a store, so re-reads observe
    /// storage precision.
    pub round_floats_with_store: bool,
    /// Allow OSR compilation of methods containing jsr.
    pub accept_jsr_for_osr: bool,
    /// Treat every instruction as pinned (debugging aid).
    pub pin_all_instructions: bool,

    // Diagnostic toggles; output goes through the `log` facade.
    pub print_canonicalization: bool,
    pub print_inlining: bool,
    pub print_load_elimination: bool,
    pub print_ir: bool,
    pub print_cfg: bool,
    pub trace_bytecodes: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            canonicalize_nodes: true,
            use_value_numbering: true,
            eliminate_loads: true,
            inline: true,
            inline_intrinsics: true,
            inline_simple_methods: true,
            max_inline_size: 35,
            round_floats_with_store: true,
            accept_jsr_for_osr: true,
            pin_all_instructions: false,
            print_canonicalization: false,
            print_inlining: false,
            print_load_elimination: false,
            print_ir: false,
            print_cfg: false,
            trace_bytecodes: false,
        }
    }
}
