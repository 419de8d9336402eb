//! minic: a small C subset frontend
//!
//! Enough C to drive the engine from a prompt: `int`/`long` globals,
//! functions over 64-bit integers, `inline` and `extern`, `if`, `while`,
//! `return`, and object-like `#define`/`#undef`. Every value is an i64.
//!
//! ```text
//! fragment text → Lexer → Parser → Decl batches → MinicCodegen → CodeModule
//! ```
//!
//! Statement-like input is parsed as the body of a wrapper function so the
//! prompt can evaluate it.

mod codegen;
mod lexer;
mod parser;

pub use codegen::MinicCodegen;

use crate::frontend::{Frontend, FrontendContext, ParseRequest};

/// Frontend for minic fragments.
#[derive(Debug, Default)]
pub struct MinicFrontend;

impl MinicFrontend {
    pub fn new() -> Self {
        MinicFrontend
    }
}

impl Frontend for MinicFrontend {
    fn parse(&mut self, request: &ParseRequest<'_>, cx: &mut FrontendContext<'_>) {
        parser::parse_fragment(request, cx);
    }

    fn should_wrap(&self, input: &str) -> bool {
        parser::should_wrap(input)
    }
}
