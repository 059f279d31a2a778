//! Tests of module and code validation.
//!
//! Function bodies are given directly in the binary encoding, since the
//! validator consumes the raw code bytes of each function. Immediates are
//! written out in their LEB128 form; all values used here are small enough
//! to fit a single byte unless noted otherwise.

use crate::{
    decode::OpCodeIterator,
    types::*,
    validate::{
        validate_code, validate_definitions, validate_initializer, validate_module,
        CodeValidationStream, ValidateResult,
    },
};
use std::rc::Rc;

fn func_type(parameters: Vec<ValueType>, result: Option<ValueType>) -> Rc<FunctionType> {
    Rc::new(FunctionType {
        parameters,
        result,
    })
}

/// A module with a single defined function and nothing else.
fn module_with_body(
    parameters: Vec<ValueType>,
    result: Option<ValueType>,
    locals: Vec<Local>,
    body: &[u8],
) -> Module {
    Module {
        types: vec![func_type(parameters, result)],
        funcs: vec![FunctionDef {
            type_idx: 0,
            locals,
            code: CodeRange {
                offset:    0,
                num_bytes: body.len(),
            },
        }],
        code: body.to_vec(),
        ..Default::default()
    }
}

fn limits(min: u64, max: Option<u64>) -> Limits {
    Limits {
        min,
        max,
    }
}

fn expect_err_contains(res: ValidateResult<()>, msg: &str) {
    let err = res.expect_err("expected validation failure");
    let text = err.to_string();
    assert!(text.contains(msg), "unexpected diagnostic `{}`, expected `{}`", text, msg);
}

#[test]
fn const_satisfies_function_result() {
    // (func (result i32) i32.const 7)
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[0x41, 0x07, 0x0B]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn binary_op_operand_mismatch() {
    // (func (result i32) i32.const 1 i64.const 2 i32.add)
    let module =
        module_with_body(vec![], Some(ValueType::I32), vec![], &[
            0x41, 0x01, 0x42, 0x02, 0x6A, 0x0B,
        ]);
    expect_err_contains(
        validate_code(&module),
        "type mismatch: expected i32 but got i64 in i32.add operand",
    );
}

#[test]
fn unreachable_code_is_stack_polymorphic() {
    // (func (result i32) unreachable)
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[0x00, 0x0B]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn block_result_is_materialized() {
    // (func (result i32) (block (result i32) unreachable))
    // The inner block produces a real i32 on the outer stack even though its
    // own body is unreachable.
    let module =
        module_with_body(vec![], Some(ValueType::I32), vec![], &[0x02, 0x7F, 0x00, 0x0B, 0x0B]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn else_less_if_with_result_rejected() {
    // (func (if (result i32) (i32.const 0) (then (i32.const 1))))
    let module = module_with_body(vec![], None, vec![], &[
        0x41, 0x00, 0x04, 0x7F, 0x41, 0x01, 0x0B, 0x0B,
    ]);
    expect_err_contains(validate_code(&module), "else-less if may not yield a result");
}

#[test]
fn if_with_else_may_yield_result() {
    // (func (result i32)
    //   (if (result i32) (i32.const 0) (then (i32.const 1)) (else (i32.const 2))))
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x41, 0x00, 0x04, 0x7F, 0x41, 0x01, 0x05, 0x41, 0x02, 0x0B, 0x0B,
    ]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn br_table_with_uniform_targets() {
    // (func (block (i32.const 0) (br_table 0 0 0)))
    let module = module_with_body(vec![], None, vec![], &[
        0x02, 0x40, 0x41, 0x00, 0x0E, 0x02, 0x00, 0x00, 0x00, 0x0B, 0x0B,
    ]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn br_table_targets_must_agree() {
    // (func (result i32)
    //   (block (result i32) (block (i32.const 0) (br_table 0 1))))
    // The default target yields i32, the listed target nothing.
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x02, 0x7F, 0x02, 0x40, 0x41, 0x00, 0x0E, 0x01, 0x00, 0x01, 0x0B, 0x0B, 0x0B,
    ]);
    expect_err_contains(
        validate_code(&module),
        "br_table target argument must match default target argument",
    );
}

#[test]
fn br_table_targets_must_agree_even_in_unreachable_code() {
    // Same shape as above, but the br_table sits after an unreachable. The
    // target agreement is structural and is enforced regardless.
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x02, 0x7F, 0x02, 0x40, 0x00, 0x41, 0x00, 0x0E, 0x01, 0x00, 0x01, 0x0B, 0x0B, 0x0B,
    ]);
    expect_err_contains(
        validate_code(&module),
        "br_table target argument must match default target argument",
    );
}

#[test]
fn branch_to_loop_consumes_nothing() {
    // (func (result i32) (loop (result i32) (br 0)))
    // A branch to a loop jumps to its head, so it needs no argument even
    // though the loop produces one on fall-through.
    let module =
        module_with_body(vec![], Some(ValueType::I32), vec![], &[0x03, 0x7F, 0x0C, 0x00, 0x0B, 0x0B]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn br_if_falls_through_with_argument() {
    // (func (result i32) (block (result i32) (i32.const 5) (i32.const 1) (br_if 0)))
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x02, 0x7F, 0x41, 0x05, 0x41, 0x01, 0x0D, 0x00, 0x0B, 0x0B,
    ]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn branch_depth_out_of_range() {
    // (func (br 2))
    let module = module_with_body(vec![], None, vec![], &[0x0C, 0x02, 0x0B]);
    expect_err_contains(validate_code(&module), "invalid branch depth");
}

#[test]
fn pop_of_empty_reachable_stack_rejected() {
    // (func (drop))
    let module = module_with_body(vec![], None, vec![], &[0x1A, 0x0B]);
    expect_err_contains(validate_code(&module), "invalid stack access");
}

#[test]
fn leftover_operand_at_end_rejected() {
    // (func (i32.const 1))
    let module = module_with_body(vec![], None, vec![], &[0x41, 0x01, 0x0B]);
    expect_err_contains(validate_code(&module), "stack was not empty at end of control structure");
}

#[test]
fn code_ends_before_function_does() {
    // A body that never closes the function frame.
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[0x41, 0x07]);
    expect_err_contains(validate_code(&module), "end of code reached before end of function");
}

#[test]
fn function_ends_before_code_does() {
    // Trailing bytes after the end of the function.
    let module = module_with_body(vec![], None, vec![], &[0x0B, 0x41, 0x07]);
    expect_err_contains(validate_code(&module), "function end reached before end of code");
}

#[test]
fn unknown_opcode_rejected() {
    let module = module_with_body(vec![], None, vec![], &[0xFE, 0x0B]);
    expect_err_contains(validate_code(&module), "unknown opcode");
}

#[test]
fn return_checks_declared_result() {
    // (func (result i32) (i64.const 1) (return))
    let module =
        module_with_body(vec![], Some(ValueType::I32), vec![], &[0x42, 0x01, 0x0F, 0x0B]);
    expect_err_contains(validate_code(&module), "type mismatch: expected i32 but got i64 in ret");
}

#[test]
fn locals_cover_parameters_and_declarations() {
    // (func (param i32) (local i64 i64)
    //   (local.get 0) (drop) (local.get 2) (drop) (local.set 1 (i64.const 3)))
    let locals = vec![Local {
        multiplicity: 2,
        ty:           ValueType::I64,
    }];
    let module = module_with_body(vec![ValueType::I32], None, locals, &[
        0x20, 0x00, 0x1A, 0x20, 0x02, 0x1A, 0x42, 0x03, 0x21, 0x01, 0x0B,
    ]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn local_type_mismatch() {
    // (func (param i32) (local.set 0 (i64.const 3)))
    let module = module_with_body(vec![ValueType::I32], None, vec![], &[
        0x42, 0x03, 0x21, 0x00, 0x0B,
    ]);
    expect_err_contains(
        validate_code(&module),
        "type mismatch: expected i32 but got i64 in set_local operand",
    );
}

#[test]
fn local_index_out_of_range() {
    // (func (param i32) (local.get 5))
    let module =
        module_with_body(vec![ValueType::I32], None, vec![], &[0x20, 0x05, 0x1A, 0x0B]);
    expect_err_contains(validate_code(&module), "local index out of range");
}

#[test]
fn tee_local_keeps_operand() {
    // (func (param i64) (result i64) (local.tee 0 (i64.const 3)))
    let module = module_with_body(vec![ValueType::I64], Some(ValueType::I64), vec![], &[
        0x42, 0x03, 0x22, 0x00, 0x0B,
    ]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn select_merges_branch_types() {
    // (func (result i32) (select (i32.const 1) (i32.const 2) (i32.const 0)))
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x41, 0x01, 0x41, 0x02, 0x41, 0x00, 0x1B, 0x0B,
    ]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn select_branches_must_agree() {
    // (func (result i32) (select (i32.const 1) (i64.const 2) (i32.const 0)))
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x41, 0x01, 0x42, 0x02, 0x41, 0x00, 0x1B, 0x0B,
    ]);
    expect_err_contains(validate_code(&module), "in select operands");
}

#[test]
fn select_in_unreachable_code() {
    // (func (result i32) (unreachable) (i32.const 0) (select))
    // The condition is the constant; both branches are polymorphic.
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x00, 0x41, 0x00, 0x1B, 0x0B,
    ]);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn call_pops_arguments_in_reverse() {
    // Imported function of type (i32, i64) -> i32, called with the i64 on
    // top of the stack.
    let module = Module {
        types:   vec![
            func_type(vec![], None),
            func_type(vec![ValueType::I32, ValueType::I64], Some(ValueType::I32)),
        ],
        imports: vec![Import {
            mod_name:    "env".into(),
            item_name:   "f".into(),
            description: ImportDescription::Func {
                type_idx: 1,
            },
        }],
        funcs:   vec![FunctionDef {
            type_idx: 0,
            locals:   vec![],
            code:     CodeRange {
                offset:    0,
                num_bytes: 8,
            },
        }],
        // (call 0 (i32.const 1) (i64.const 2)) (drop)
        code: vec![0x41, 0x01, 0x42, 0x02, 0x10, 0x00, 0x1A, 0x0B],
        ..Default::default()
    };
    assert!(validate_module(&module).is_ok());
}

#[test]
fn call_argument_mismatch() {
    // Same as above with the arguments swapped.
    let module = Module {
        types:   vec![
            func_type(vec![], None),
            func_type(vec![ValueType::I32, ValueType::I64], Some(ValueType::I32)),
        ],
        imports: vec![Import {
            mod_name:    "env".into(),
            item_name:   "f".into(),
            description: ImportDescription::Func {
                type_idx: 1,
            },
        }],
        funcs:   vec![FunctionDef {
            type_idx: 0,
            locals:   vec![],
            code:     CodeRange {
                offset:    0,
                num_bytes: 8,
            },
        }],
        code: vec![0x42, 0x02, 0x41, 0x01, 0x10, 0x00, 0x1A, 0x0B],
        ..Default::default()
    };
    expect_err_contains(
        validate_code(&module),
        "type mismatch: expected i64 but got i32 in call arguments operand",
    );
}

#[test]
fn call_indirect_requires_table() {
    let mut module = module_with_body(vec![], None, vec![], &[0x41, 0x00, 0x11, 0x00, 0x00, 0x0B]);
    expect_err_contains(
        validate_code(&module),
        "call_indirect is only valid if there is a default function table",
    );
    module.tables.push(TableType {
        limits: limits(1, None),
    });
    assert!(validate_code(&module).is_ok());
}

#[test]
fn memory_opcodes_require_memory() {
    // (func (result i32) (memory.size))
    let mut module =
        module_with_body(vec![], Some(ValueType::I32), vec![], &[0x3F, 0x00, 0x0B]);
    expect_err_contains(
        validate_code(&module),
        "current_memory is only valid if there is a default memory",
    );
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    assert!(validate_code(&module).is_ok());
}

#[test]
fn load_respects_natural_alignment() {
    // (func (result i32) (i32.load align=4 (i32.const 0)))
    let mut module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x41, 0x00, 0x28, 0x02, 0x00, 0x0B,
    ]);
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    assert!(validate_code(&module).is_ok());

    // The same load with an alignment hint of 8 bytes.
    let mut module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x41, 0x00, 0x28, 0x03, 0x00, 0x0B,
    ]);
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    expect_err_contains(validate_code(&module), "i32.load alignment greater than natural alignment");
}

#[test]
fn load_offset_must_fit_32_bits() {
    // (func (result i32) (i32.load offset=2^32 (i32.const 0)))
    let mut module = module_with_body(vec![], Some(ValueType::I32), vec![], &[
        0x41, 0x00, 0x28, 0x02, 0x80, 0x80, 0x80, 0x80, 0x10, 0x0B,
    ]);
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    expect_err_contains(validate_code(&module), "i32.load offset too large");
}

#[test]
fn store_pops_value_then_address() {
    // (func (i64.store (i32.const 0) (i64.const 1)))
    let mut module = module_with_body(vec![], None, vec![], &[
        0x41, 0x00, 0x42, 0x01, 0x37, 0x03, 0x00, 0x0B,
    ]);
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    assert!(validate_code(&module).is_ok());

    // Operands in the wrong order: the value on top must be the i64.
    let mut module = module_with_body(vec![], None, vec![], &[
        0x42, 0x01, 0x41, 0x00, 0x37, 0x03, 0x00, 0x0B,
    ]);
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    expect_err_contains(
        validate_code(&module),
        "type mismatch: expected i64 but got i32 in i64.store operand",
    );
}

#[test]
fn float_arithmetic_and_conversions() {
    // (func (result i32)
    //   (i32.trunc_s/f64 (f64.add (f64.promote/f32 (f32.const 1)) (f64.const 2))))
    let body = [
        0x43, 0x00, 0x00, 0x80, 0x3F, // f32.const 1.0
        0xBB, // f64.promote/f32
        0x44, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, // f64.const 2.0
        0xA0, // f64.add
        0xAA, // i32.trunc_s/f64
        0x0B,
    ];
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &body);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn float_comparison_produces_i32() {
    // (func (result i32) (f32.lt (f32.const 0) (f32.const 1)))
    let body = [
        0x43, 0x00, 0x00, 0x00, 0x00, // f32.const 0.0
        0x43, 0x00, 0x00, 0x80, 0x3F, // f32.const 1.0
        0x5D, // f32.lt
        0x0B,
    ];
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &body);
    assert!(validate_code(&module).is_ok());
}

#[test]
fn globals_respect_mutability() {
    let mut module = module_with_body(vec![], None, vec![], &[0x42, 0x01, 0x24, 0x00, 0x0B]);
    module.imports.push(Import {
        mod_name:    "env".into(),
        item_name:   "g".into(),
        description: ImportDescription::Global(GlobalType {
            value_type: ValueType::I64,
            mutable:    false,
        }),
    });
    // (global.set 0 (i64.const 1)) of the immutable import.
    expect_err_contains(validate_code(&module), "attempting to mutate immutable global");

    // (global.set 1 (i32.const 1)) of the module's own mutable global.
    let mut module = module_with_body(vec![], None, vec![], &[0x41, 0x01, 0x24, 0x01, 0x0B]);
    module.imports.push(Import {
        mod_name:    "env".into(),
        item_name:   "g".into(),
        description: ImportDescription::Global(GlobalType {
            value_type: ValueType::I64,
            mutable:    false,
        }),
    });
    module.globals.push(GlobalDef {
        ty:   GlobalType {
            value_type: ValueType::I32,
            mutable:    true,
        },
        init: InitExpr::I32Const(0),
    });
    assert!(validate_code(&module).is_ok());
}

#[test]
fn stream_validation_matches_batch() -> anyhow::Result<()> {
    let module = module_with_body(vec![], Some(ValueType::I32), vec![], &[0x41, 0x07, 0x0B]);
    let mut stream = CodeValidationStream::new(&module, &module.funcs[0])?;
    for opcode in OpCodeIterator::new(&module.code) {
        stream.opcode(&opcode?)?;
    }
    assert!(stream.done());
    stream.finish()
}

#[test]
fn stream_rejects_opcodes_after_function_end() {
    let module = module_with_body(vec![], None, vec![], &[0x0B]);
    let mut stream = CodeValidationStream::new(&module, &module.funcs[0]).unwrap();
    stream.opcode(&OpCode::End).unwrap();
    assert!(stream.done());
    expect_err_contains(
        stream.opcode(&OpCode::Nop),
        "function end reached before end of code",
    );
}

#[test]
fn stream_finish_requires_unwound_control_stack() {
    let module = module_with_body(vec![], None, vec![], &[0x0B]);
    let stream = CodeValidationStream::new(&module, &module.funcs[0]).unwrap();
    expect_err_contains(stream.finish(), "end of code reached before end of function");
}

#[test]
fn diagnostics_are_deterministic() {
    let module =
        module_with_body(vec![], Some(ValueType::I32), vec![], &[
            0x41, 0x01, 0x42, 0x02, 0x6A, 0x0B,
        ]);
    let first = validate_code(&module).unwrap_err().to_string();
    let second = validate_code(&module).unwrap_err().to_string();
    assert_eq!(first, second);
}

// Module-level checks.

#[test]
fn duplicate_export_names_rejected_across_kinds() {
    let mut module = module_with_body(vec![], None, vec![], &[0x0B]);
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    module.exports.push(Export {
        name:        "item".into(),
        description: ExportDescription::Func {
            index: 0,
        },
    });
    module.exports.push(Export {
        name:        "item".into(),
        description: ExportDescription::Memory {
            index: 0,
        },
    });
    expect_err_contains(validate_definitions(&module), "duplicate export item");
}

#[test]
fn export_indices_must_exist() {
    let mut module = Module::default();
    module.exports.push(Export {
        name:        "f".into(),
        description: ExportDescription::Func {
            index: 0,
        },
    });
    expect_err_contains(
        validate_definitions(&module),
        "trying to export a function that does not exist",
    );
}

#[test]
fn mutable_globals_cannot_be_imported() {
    let mut module = Module::default();
    module.imports.push(Import {
        mod_name:    "env".into(),
        item_name:   "g".into(),
        description: ImportDescription::Global(GlobalType {
            value_type: ValueType::I32,
            mutable:    true,
        }),
    });
    expect_err_contains(validate_definitions(&module), "mutable globals cannot be imported");
}

#[test]
fn mutable_globals_cannot_be_exported() {
    let mut module = Module::default();
    module.globals.push(GlobalDef {
        ty:   GlobalType {
            value_type: ValueType::I32,
            mutable:    true,
        },
        init: InitExpr::I32Const(0),
    });
    module.exports.push(Export {
        name:        "g".into(),
        description: ExportDescription::Global {
            index: 0,
        },
    });
    expect_err_contains(validate_definitions(&module), "mutable globals cannot be exported");
}

#[test]
fn at_most_one_table_and_memory() {
    let mut module = Module::default();
    module.tables.push(TableType {
        limits: limits(1, None),
    });
    module.imports.push(Import {
        mod_name:    "env".into(),
        item_name:   "t".into(),
        description: ImportDescription::Table(TableType {
            limits: limits(1, None),
        }),
    });
    expect_err_contains(validate_definitions(&module), "too many tables");

    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    expect_err_contains(validate_definitions(&module), "too many memories");
}

#[test]
fn size_constraints_checked() {
    let mut module = Module::default();
    module.tables.push(TableType {
        limits: limits(2, Some(1)),
    });
    expect_err_contains(validate_definitions(&module), "disjoint size bounds");

    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: limits(0, Some(70000)),
    });
    expect_err_contains(validate_definitions(&module), "maximum size exceeds limit");
}

#[test]
fn start_function_must_be_nullary() {
    let mut module = module_with_body(vec![ValueType::I32], None, vec![], &[0x0B]);
    module.start = Some(0);
    expect_err_contains(
        validate_definitions(&module),
        "start function must not have any parameters or results",
    );

    let mut module = module_with_body(vec![], None, vec![], &[0x0B]);
    module.start = Some(0);
    assert!(validate_definitions(&module).is_ok());

    module.start = Some(1);
    expect_err_contains(validate_definitions(&module), "start function index out of range");
}

#[test]
fn global_initializer_typing() {
    let mut module = Module::default();
    module.globals.push(GlobalDef {
        ty:   GlobalType {
            value_type: ValueType::I64,
            mutable:    false,
        },
        init: InitExpr::I32Const(0),
    });
    expect_err_contains(
        validate_definitions(&module),
        "type mismatch: expected i64 but got i32 in global initializer expression",
    );
}

#[test]
fn global_initializer_may_only_reference_imports() {
    let mut module = Module::default();
    module.globals.push(GlobalDef {
        ty:   GlobalType {
            value_type: ValueType::I32,
            mutable:    false,
        },
        init: InitExpr::I32Const(0),
    });
    module.globals.push(GlobalDef {
        ty:   GlobalType {
            value_type: ValueType::I32,
            mutable:    false,
        },
        init: InitExpr::GetGlobal(0),
    });
    expect_err_contains(
        validate_definitions(&module),
        "global variable initializer expression may only access imported globals",
    );
}

#[test]
fn initializer_may_only_reference_immutable_globals() {
    // validate_initializer is exercised directly since a module with a
    // mutable imported global is already rejected by the import checks.
    let mut module = Module::default();
    module.imports.push(Import {
        mod_name:    "env".into(),
        item_name:   "g".into(),
        description: ImportDescription::Global(GlobalType {
            value_type: ValueType::I32,
            mutable:    true,
        }),
    });
    expect_err_contains(
        validate_initializer(
            &module,
            &InitExpr::GetGlobal(0),
            ValueType::I32,
            "data segment base initializer",
        ),
        "global variable initializer expression may only access immutable globals",
    );
}

#[test]
fn segment_offsets_are_i32_typed() {
    let mut module = Module::default();
    module.memories.push(MemoryType {
        limits: limits(1, None),
    });
    module.data.push(DataSegment {
        memory_idx: 0,
        offset:     InitExpr::I64Const(0),
        init:       vec![0x00],
    });
    expect_err_contains(
        validate_definitions(&module),
        "type mismatch: expected i32 but got i64 in data segment base initializer",
    );
}

#[test]
fn element_segment_referential_integrity() {
    let mut module = module_with_body(vec![], None, vec![], &[0x0B]);
    module.elements.push(ElementSegment {
        table_idx: 0,
        offset:    InitExpr::I32Const(0),
        inits:     vec![0],
    });
    expect_err_contains(
        validate_definitions(&module),
        "element segment refers to a non-existent table",
    );

    module.tables.push(TableType {
        limits: limits(1, None),
    });
    assert!(validate_definitions(&module).is_ok());

    module.elements[0].inits.push(7);
    expect_err_contains(
        validate_definitions(&module),
        "element segment refers to a non-existent function",
    );
}

#[test]
fn complete_module_is_accepted() {
    // A module exercising every definition kind at once: an imported
    // function and global, a table with an element segment, a memory with a
    // data segment, a defined global, exports, and a start function.
    let module = Module {
        types:    vec![
            func_type(vec![], None),
            func_type(vec![ValueType::I32], Some(ValueType::I32)),
        ],
        imports:  vec![
            Import {
                mod_name:    "env".into(),
                item_name:   "f".into(),
                description: ImportDescription::Func {
                    type_idx: 1,
                },
            },
            Import {
                mod_name:    "env".into(),
                item_name:   "origin".into(),
                description: ImportDescription::Global(GlobalType {
                    value_type: ValueType::I32,
                    mutable:    false,
                }),
            },
        ],
        funcs:    vec![FunctionDef {
            type_idx: 0,
            locals:   vec![Local {
                multiplicity: 1,
                ty:           ValueType::I32,
            }],
            // (local.set 0 (call 0 (i32.const 1)))
            code:     CodeRange {
                offset:    0,
                num_bytes: 7,
            },
        }],
        tables:   vec![TableType {
            limits: limits(2, Some(2)),
        }],
        memories: vec![MemoryType {
            limits: limits(1, Some(4)),
        }],
        globals:  vec![GlobalDef {
            ty:   GlobalType {
                value_type: ValueType::I32,
                mutable:    true,
            },
            init: InitExpr::GetGlobal(0),
        }],
        exports:  vec![
            Export {
                name:        "run".into(),
                description: ExportDescription::Func {
                    index: 1,
                },
            },
            Export {
                name:        "memory".into(),
                description: ExportDescription::Memory {
                    index: 0,
                },
            },
        ],
        start:    Some(1),
        elements: vec![ElementSegment {
            table_idx: 0,
            offset:    InitExpr::GetGlobal(0),
            inits:     vec![0, 1],
        }],
        data:     vec![DataSegment {
            memory_idx: 0,
            offset:     InitExpr::I32Const(8),
            init:       vec![1, 2, 3],
        }],
        code:     vec![0x41, 0x01, 0x10, 0x00, 0x21, 0x00, 0x0B],
    };
    assert!(validate_module(&module).is_ok());
}

#[test]
fn init_expr_decoding_rejects_non_constants() {
    use crate::decode::decode_init_expr;
    use std::io::Cursor;
    // (i32.add) is not a constant instruction.
    let mut cursor = Cursor::new(&[0x6A, 0x0B][..]);
    let err = decode_init_expr(&mut cursor).unwrap_err();
    assert!(err.to_string().contains("invalid initializer expression"));

    // (global.get 0) followed by end is.
    let mut cursor = Cursor::new(&[0x23, 0x00, 0x0B][..]);
    assert!(decode_init_expr(&mut cursor).is_ok());
}

#[test]
fn invalid_result_type_byte_rejected() {
    // (block <bad type>) in the body.
    let module = module_with_body(vec![], None, vec![], &[0x02, 0x7B, 0x0B, 0x0B]);
    expect_err_contains(validate_code(&module), "invalid result type");
}
