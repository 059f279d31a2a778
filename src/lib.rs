//! This library provides a static validator for [Wasm](https://webassembly.org/) modules
//! according to the [Wasm core 1 spec](https://www.w3.org/TR/2019/REC-wasm-core-1-20191205/),
//! restricted to the MVP feature set (no SIMD, reference types, multi-value
//! results, or GC types).
//!
//! The input is an already-decoded [`Module`](types::Module) together with
//! the raw bytes of each function body. Validation has two layers
//!
//! - [`validate_definitions`](validate::validate_definitions) checks the
//!   module-level rules: referential integrity of all indices, size limits,
//!   uniqueness of exports, and typing of initializer expressions.
//! - [`validate_code`](validate::validate_code) checks every function body
//!   against the Wasm type system by walking its opcode stream with a shadow
//!   operand stack and a shadow control stack.
//!
//! A module accepted by both layers is guaranteed to execute without
//! undefined behaviour at the instruction level.

pub mod constants;
pub mod decode;
pub mod types;
pub mod validate;

#[cfg(test)]
mod validate_test;
