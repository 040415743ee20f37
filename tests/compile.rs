//! Compilation tests: emitted opcode sequences, the compile-error table,
//! generic instantiation caching and chunk invariants.

use ember::error::{CompileError, CompileErrorKind, Error};
use ember::vm::chunk::Op;
use ember::vm::disasm::{instructions, opcodes, Operand};
use ember::Compiled;

fn compile_ok(src: &str) -> Compiled {
    match ember::compile("test.em", src) {
        Ok(compiled) => compiled,
        Err(e) => panic!("compile failed: {}\nsource:\n{}", e, src),
    }
}

fn compile_err(src: &str) -> CompileError {
    match ember::compile("test.em", src) {
        Err(Error::Compile(e)) => e,
        Err(other) => panic!("expected a compile error, got: {}", other),
        Ok(_) => panic!("expected a compile error, source compiled:\n{}", src),
    }
}

fn pushed_numbers(compiled: &Compiled) -> Vec<f64> {
    instructions(&compiled.chunk)
        .unwrap()
        .into_iter()
        .filter(|i| i.op == Op::PushN)
        .map(|i| match i.operand {
            Operand::F64(n) => n,
            other => panic!("pushN with operand {:?}", other),
        })
        .collect()
}

// --- S1: arithmetic with precedence ------------------------------------

#[test]
fn arithmetic_emits_operands_then_operators() {
    let compiled = compile_ok("let x = 2 + 3 * 4");
    let ops = opcodes(&compiled.chunk).unwrap();
    assert_eq!(
        ops,
        vec![Op::PushN, Op::PushN, Op::PushN, Op::MultN, Op::AddN, Op::PopG, Op::Halt]
    );
    assert_eq!(pushed_numbers(&compiled), vec![2.0, 3.0, 4.0]);
}

// --- S2: let reassignment ----------------------------------------------

#[test]
fn let_reassignment_is_an_error_at_the_assignment_line() {
    let err = compile_err("let x = 1\nx = 2");
    assert_eq!(err.kind, CompileErrorKind::LetReassignment("x".to_string()));
    assert_eq!(err.line, 2);
    assert!(
        err.to_string().contains("'x' cannot be reassigned"),
        "unexpected message: {}",
        err
    );
    assert!(err.to_string().starts_with("test.em(2, "));
}

// --- S3: if as expression ----------------------------------------------

#[test]
fn if_expression_emits_each_branch_once() {
    let compiled = compile_ok("let x = if true { 2 } else { 4 }");
    let nums = pushed_numbers(&compiled);
    assert_eq!(nums.iter().filter(|&&n| n == 2.0).count(), 1);
    assert_eq!(nums.iter().filter(|&&n| n == 4.0).count(), 1);
}

#[test]
fn if_expression_without_else_is_a_type_error() {
    let err = compile_err("let x = if true { 2 }");
    assert!(matches!(err.kind, CompileErrorKind::TypeMismatch { .. }));
}

#[test]
fn if_expression_branches_must_agree() {
    let err = compile_err("let x = if true { 2 } else { false }");
    assert!(matches!(err.kind, CompileErrorKind::TypeMismatch { .. }));
}

// --- S4: object constructor with reordered fields -----------------------

#[test]
fn constructor_evaluates_fields_in_declaration_order() {
    let compiled = compile_ok("object P { a, b: number }\nlet p = P(b: 20, a: 10)");
    assert_eq!(pushed_numbers(&compiled), vec![10.0, 20.0]);
    let constr: Vec<_> = instructions(&compiled.chunk)
        .unwrap()
        .into_iter()
        .filter(|i| i.op == Op::ConstrObj)
        .collect();
    assert_eq!(constr.len(), 1);
    assert_eq!(constr[0].operand, Operand::TyFields(16, 2));
}

// --- S5: generic proc instantiation cache -------------------------------

#[test]
fn repeated_instantiation_reuses_the_same_proc() {
    let compiled = compile_ok(
        "proc id[T](x: T) -> T { return x }\nlet a = id[number](1)\nlet b = id[number](2)",
    );
    assert_eq!(compiled.script.procs.len(), 1);
    assert_eq!(compiled.script.procs[0].name, "id");
    let call_ids: Vec<_> = instructions(&compiled.chunk)
        .unwrap()
        .into_iter()
        .filter(|i| i.op == Op::CallD)
        .map(|i| i.operand)
        .collect();
    assert_eq!(call_ids, vec![Operand::U16(0), Operand::U16(0)]);
}

#[test]
fn distinct_argument_vectors_instantiate_separately() {
    let compiled = compile_ok(
        "proc id[T](x: T) -> T { return x }\n\
         let a = id[number](1)\n\
         let b = id[bool](true)\n\
         let c = id[number](3)",
    );
    assert_eq!(compiled.script.procs.len(), 2);
}

#[test]
fn generic_object_instantiations_share_a_type_id() {
    let compiled = compile_ok(
        "object Box[T] { v: T }\nlet a = Box[number](v: 1)\nlet b = Box[number](v: 2)",
    );
    // One id for the template, one for the single cached instantiation.
    assert_eq!(compiled.script.type_count, 2);
    let constr: Vec<_> = instructions(&compiled.chunk)
        .unwrap()
        .into_iter()
        .filter(|i| i.op == Op::ConstrObj)
        .map(|i| i.operand)
        .collect();
    assert_eq!(constr, vec![Operand::TyFields(17, 1), Operand::TyFields(17, 1)]);
}

#[test]
fn runaway_recursive_instantiation_is_reported() {
    let err = compile_err(
        "object Box[T] { v: T }\n\
         proc f[T](x: T) -> number { return f[Box[T]](null[Box[T]]) }\n\
         let n = f[number](1)",
    );
    assert!(matches!(err.kind, CompileErrorKind::RecursiveInstantiation(_)));
}

// --- Loops ---------------------------------------------------------------

#[test]
fn while_false_emits_nothing() {
    let compiled = compile_ok("while false { 1 }");
    assert_eq!(opcodes(&compiled.chunk).unwrap(), vec![Op::Halt]);
}

#[test]
fn while_true_omits_the_condition_test() {
    let compiled = compile_ok("var i = 0\nwhile true { if i > 3 { break }\ni = i + 1 }");
    let ops = opcodes(&compiled.chunk).unwrap();
    assert!(ops.contains(&Op::JumpBack));
    assert!(!ops.contains(&Op::PushTrue));
}

// --- Invariants ----------------------------------------------------------

#[test]
fn top_level_chunk_ends_with_exactly_one_halt() {
    let compiled = compile_ok("let x = 1\nlet y = x + 1\nwhile false { 1 }");
    let ops = opcodes(&compiled.chunk).unwrap();
    assert_eq!(ops.last(), Some(&Op::Halt));
    assert_eq!(ops.iter().filter(|&&op| op == Op::Halt).count(), 1);
}

#[test]
fn every_code_byte_has_line_info_within_the_source() {
    let src = "let x = 1\nlet y = if x == 1 { 2 } else { 3 }\nproc f(a: number) -> number { return a }\nlet z = f(y)";
    let compiled = compile_ok(src);
    let max_line = src.lines().count() as u32;
    for instr in instructions(&compiled.chunk).unwrap() {
        let (line, _col) = compiled
            .chunk
            .pos_at(instr.offset)
            .unwrap_or_else(|| panic!("no line info at offset {}", instr.offset));
        assert!(line >= 1 && line <= max_line, "line {} out of range", line);
    }
    assert_eq!(compiled.chunk.line_info_total(), compiled.chunk.len());
}

#[test]
fn proc_ids_are_dense_and_named() {
    let compiled = compile_ok(
        "proc a() { }\nproc b(x: number) -> number { return x }\nlet r = b(1)\na()",
    );
    assert_eq!(compiled.script.procs.len(), 2);
    assert_eq!(compiled.script.procs[0].name, "a");
    assert_eq!(compiled.script.procs[1].name, "b");
}

#[test]
fn disassembling_reproduces_the_opcode_stream() {
    let compiled = compile_ok("let x = 1\nvar i = 0\nwhile i < 3 { i = i + 1 }");
    let instrs = instructions(&compiled.chunk).unwrap();
    // Re-walking the byte stream from the decoded offsets must tile the
    // chunk exactly.
    let mut expected = 0usize;
    for instr in &instrs {
        assert_eq!(instr.offset, expected);
        expected += 1 + instr.op.operand_len();
    }
    assert_eq!(expected, compiled.chunk.len());
}

// --- Error table ---------------------------------------------------------

#[test]
fn undefined_reference() {
    let err = compile_err("let x = y");
    assert_eq!(err.kind, CompileErrorKind::UndefinedReference("y".to_string()));
}

#[test]
fn var_without_value() {
    let err = compile_err("var x");
    assert_eq!(err.kind, CompileErrorKind::VarMustHaveValue("x".to_string()));
}

#[test]
fn annotation_mismatch() {
    let err = compile_err("let x: bool = 1");
    assert_eq!(
        err.kind,
        CompileErrorKind::TypeMismatch { got: "number".to_string(), expected: "bool".to_string() }
    );
}

#[test]
fn global_and_local_redeclaration() {
    let err = compile_err("let x = 1\nlet x = 2");
    assert_eq!(err.kind, CompileErrorKind::GlobalRedeclaration("x".to_string()));
    let err = compile_err("proc f() { var a = 1\nvar a = 2 }");
    assert_eq!(err.kind, CompileErrorKind::LocalRedeclaration("a".to_string()));
}

#[test]
fn break_and_continue_outside_loops() {
    let err = compile_err("break");
    assert_eq!(err.kind, CompileErrorKind::OnlyUsableInABlock("break".to_string()));
    let err = compile_err("continue");
    assert_eq!(err.kind, CompileErrorKind::OnlyUsableInALoop("continue".to_string()));
}

#[test]
fn return_outside_a_proc_and_yield_outside_an_iterator() {
    let err = compile_err("return 1");
    assert_eq!(err.kind, CompileErrorKind::OnlyUsableInAProc("return".to_string()));
    let err = compile_err("yield 1");
    assert_eq!(err.kind, CompileErrorKind::OnlyUsableInAnIterator("yield".to_string()));
}

#[test]
fn result_cannot_be_shadowed() {
    let err = compile_err("proc f() -> number { var result = 1\nreturn 2 }");
    assert_eq!(err.kind, CompileErrorKind::ShadowResult);
}

#[test]
fn calling_a_variable_is_not_a_proc() {
    let err = compile_err("let x = 1\nx(2)");
    assert_eq!(err.kind, CompileErrorKind::NotAProc("x".to_string()));
}

#[test]
fn single_overload_mismatch_reports_both_signatures() {
    let err = compile_err("proc f(a: number) { }\nf(true)");
    assert_eq!(
        err.kind,
        CompileErrorKind::TypeMismatch {
            got: "(bool)".to_string(),
            expected: "(number)".to_string()
        }
    );
}

#[test]
fn overload_set_mismatch_lists_every_candidate() {
    let err = compile_err("proc f(a: number) { }\nproc f(a: string) { }\nf(true)");
    match err.kind {
        CompileErrorKind::TypeMismatchChoice { got, choices } => {
            assert_eq!(got, "(bool)");
            assert!(choices.contains("proc f(number)"), "choices:\n{}", choices);
            assert!(choices.contains("proc f(string)"), "choices:\n{}", choices);
        }
        other => panic!("expected a choice mismatch, got {:?}", other),
    }
}

#[test]
fn overloads_differing_only_in_return_type_are_rejected() {
    let err = compile_err("proc f(a: number) -> number { return a }\nproc f(a: number) { }");
    assert_eq!(err.kind, CompileErrorKind::GlobalRedeclaration("f".to_string()));
}

#[test]
fn constructor_field_errors() {
    let object = "object P { a, b: number }\n";
    let err = compile_err(&format!("{}let p = P(c: 1, a: 1)", object));
    assert!(matches!(err.kind, CompileErrorKind::NoSuchField { .. }));
    let err = compile_err(&format!("{}let p = P(a: 1)", object));
    assert!(matches!(err.kind, CompileErrorKind::ObjectFieldsMustBeInitialized(_)));
    let err = compile_err(&format!("{}let p = P(1, 2)", object));
    assert_eq!(err.kind, CompileErrorKind::FieldInitMustBeAColonExpr);
    let err = compile_err("let x = number(1)");
    assert_eq!(err.kind, CompileErrorKind::TypeIsNotAnObject("number".to_string()));
}

#[test]
fn field_access_errors() {
    let err = compile_err("let x = 1\nlet y = x.a");
    assert_eq!(err.kind, CompileErrorKind::InvalidField("a".to_string()));
    let err = compile_err("object P { a: number }\nlet p = P(a: 1)\nlet y = p.b");
    assert!(matches!(err.kind, CompileErrorKind::NonExistentField { .. }));
}

#[test]
fn invalid_assignment_targets() {
    let err = compile_err("1 = 2");
    assert_eq!(err.kind, CompileErrorKind::InvalidAssignment);
    let err = compile_err("let x = (1 = 2)");
    assert_eq!(err.kind, CompileErrorKind::InvalidAssignment);
}

#[test]
fn iterator_requires_a_yield_type() {
    let err = compile_err("iterator it(n: number) { yield n }");
    assert_eq!(err.kind, CompileErrorKind::IterMustHaveYieldType("it".to_string()));
}

#[test]
fn generic_reference_requires_index_form() {
    let err = compile_err("proc id[T](x: T) -> T { return x }\nlet a = id(1)");
    assert_eq!(err.kind, CompileErrorKind::CouldNotInferGeneric("id".to_string()));
}

#[test]
fn generic_argument_arity_is_checked() {
    let err = compile_err("proc id[T](x: T) -> T { return x }\nlet a = id[number, bool](1)");
    assert!(matches!(err.kind, CompileErrorKind::GenericArgLenMismatch { .. }));
}

#[test]
fn instantiating_a_non_template_is_not_generic() {
    let err = compile_err("let x = number[bool](1)");
    assert_eq!(err.kind, CompileErrorKind::NotGeneric("number".to_string()));
}

#[test]
fn void_values_cannot_be_used() {
    let err = compile_err("proc f() { }\nlet x = f()");
    assert_eq!(err.kind, CompileErrorKind::ValueIsVoid);
}

#[test]
fn bare_null_cannot_be_typed() {
    let err = compile_err("let x = null");
    assert_eq!(err.kind, CompileErrorKind::CouldNotInferNull);
}

#[test]
fn compile_error_positions_lie_within_the_source() {
    let sources = [
        "let x = y",
        "let x = 1\nx = 2",
        "object P { a: number }\nlet p = P(b: 1)",
        "proc f(a: number) { }\nf(true)",
    ];
    for src in sources {
        let err = compile_err(src);
        let lines = src.lines().count() as u32;
        assert!(err.line >= 1 && err.line <= lines, "line {} for:\n{}", err.line, src);
        assert!(err.col >= 1, "col {} for:\n{}", err.col, src);
    }
}
