//! Render-time scalar function VM and its expression compiler.
//!
//! Source text such as `sqrt(x*x + y*y) - 1` is parsed by a table driven
//! stage parser into an [`ast::ExprTree`], constant folded, lowered by
//! [`codegen`] to a register/stack bytecode and installed in a
//! [`vm::FunctionVM`]. Any number of [`vm::FPUContext`]s can then evaluate
//! the installed functions concurrently.
//!
//! ```
//! use fnvm::codegen::compile_function;
//! use fnvm::parser::{default_parameters, SymbolTable};
//! use fnvm::vm::{FunctionVM, SourceInfo};
//!
//! let mut vm = FunctionVM::new();
//! let f = compile_function(&mut vm, &SymbolTable::new(), "x*x + y", SourceInfo::named("f"), default_parameters())
//!     .unwrap();
//! let mut ctx = vm.create_context();
//! assert_eq!(ctx.evaluate(f.handle, &[3.0, 1.0, 0.0]).unwrap(), 10.0);
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostic;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod vm;
