use std::path::PathBuf;

use clap::Parser;

/// Whether the value of a wrapped expression is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValuePrinting {
    #[default]
    Disabled,
    Enabled,
    /// Print unless the input ends with a semicolon.
    Auto,
}

/// Per-transaction switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilationOptions {
    /// Move top-level locals of a wrapper to global scope.
    pub declaration_extraction: bool,
    /// Give redefinitions a transaction-unique linkage name instead of
    /// rejecting them.
    pub enable_shadowing: bool,
    pub value_printing: ValuePrinting,
    /// Make the wrapper return its last expression.
    pub result_evaluation: bool,
    pub dynamic_scoping: bool,
    pub debug: bool,
    pub code_generation: bool,
    /// Generate code for declarations that arrived from a precompiled
    /// artifact as well.
    pub code_generation_for_module: bool,
    /// Drop warnings triggered inside synthesized wrappers.
    pub ignore_prompt_diags: bool,
    pub check_pointer_validity: bool,
    pub opt_level: u8,
    pub code_completion_offset: Option<usize>,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        CompilationOptions {
            declaration_extraction: false,
            enable_shadowing: false,
            value_printing: ValuePrinting::Disabled,
            result_evaluation: false,
            dynamic_scoping: false,
            debug: false,
            code_generation: true,
            code_generation_for_module: false,
            ignore_prompt_diags: false,
            check_pointer_validity: true,
            opt_level: 1,
            code_completion_offset: None,
        }
    }
}

impl CompilationOptions {
    /// Whether wrapper transformers need the last expression as result.
    pub fn wants_result(&self) -> bool {
        self.result_evaluation || self.value_printing == ValuePrinting::Enabled
    }
}

/// Session switches that may change while the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeOptions {
    pub allow_redefinition: bool,
}

/// Session configuration fixed at startup.
#[derive(Debug, Clone, Parser)]
#[command(name = "kiln", version, about = "Incremental compiler prompt")]
pub struct InvocationOptions {
    /// Do not print the banner
    #[arg(long)]
    pub no_logo: bool,

    /// Optimization level for generated code
    #[arg(short = 'O', default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub opt_level: u8,

    /// Evaluate a fragment and exit
    #[arg(short = 'e', long = "expr")]
    pub exprs: Vec<String>,

    /// Source files to declare before the prompt starts
    pub inputs: Vec<PathBuf>,

    /// Shared libraries to make available for symbol lookup
    #[arg(short = 'l', long = "library")]
    pub libs_to_load: Vec<PathBuf>,

    /// Exit with an error status when a fragment fails
    #[arg(long)]
    pub error_out: bool,

    #[arg(short, long)]
    pub verbose: bool,

    /// Shadow redefinitions instead of rejecting them
    #[arg(long)]
    pub allow_redefinition: bool,

    /// Weak functions smaller than this keep a private copy when a
    /// definition is already loaded
    #[arg(long, default_value_t = 50)]
    pub weak_inline_threshold: usize,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        InvocationOptions {
            no_logo: false,
            opt_level: 1,
            exprs: Vec::new(),
            inputs: Vec::new(),
            libs_to_load: Vec::new(),
            error_out: false,
            verbose: false,
            allow_redefinition: false,
            weak_inline_threshold: 50,
        }
    }
}
