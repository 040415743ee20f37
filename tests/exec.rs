//! Behavioral tests: compiled chunks executed through the VM, with foreign
//! callbacks recording what the program actually did.

use std::cell::RefCell;
use std::rc::Rc;

use ember::{Compiler, Value, Vm};

/// Compile `src` with a `mark(n: number) -> number` foreign proc that
/// records its argument, run it, and return the recorded values plus the
/// final value of each named global.
fn run_recording(src: &str, globals: &[&str]) -> (Vec<f64>, Vec<Value>) {
    let recorded = Rc::new(RefCell::new(Vec::new()));
    let mut compiler = Compiler::new("main");
    let sink = Rc::clone(&recorded);
    compiler
        .add_proc(
            "mark",
            &[("n", "number")],
            "number",
            Box::new(move |args| match args.first() {
                Some(Value::Number(n)) => {
                    sink.borrow_mut().push(*n);
                    Value::Number(*n)
                }
                _ => Value::Number(0.0),
            }),
        )
        .unwrap();
    let flagged = Rc::clone(&recorded);
    compiler
        .add_proc(
            "flag",
            &[("n", "number")],
            "bool",
            Box::new(move |args| {
                if let Some(Value::Number(n)) = args.first() {
                    flagged.borrow_mut().push(*n);
                }
                Value::Bool(true)
            }),
        )
        .unwrap();
    let compiled = match compiler.compile("test.em", src) {
        Ok(compiled) => compiled,
        Err(e) => panic!("compile failed: {}\nsource:\n{}", e, src),
    };
    let mut vm = Vm::new(&compiled.script);
    if let Err(e) = vm.run(&compiled.chunk) {
        panic!("run failed: {}\nsource:\n{}", e, src);
    }
    let out = globals
        .iter()
        .map(|name| {
            vm.global(name)
                .unwrap_or_else(|| panic!("global '{}' not set", name))
                .clone()
        })
        .collect();
    let recorded_values = recorded.borrow().clone();
    (recorded_values, out)
}

fn number_global(src: &str, name: &str) -> f64 {
    let (_, globals) = run_recording(src, &[name]);
    match &globals[0] {
        Value::Number(n) => *n,
        other => panic!("expected a number in '{}', got {:?}", name, other),
    }
}

fn bool_global(src: &str, name: &str) -> bool {
    let (_, globals) = run_recording(src, &[name]);
    match &globals[0] {
        Value::Bool(b) => *b,
        other => panic!("expected a bool in '{}', got {:?}", name, other),
    }
}

#[test]
fn arithmetic_with_precedence() {
    assert_eq!(number_global("let x = 2 + 3 * 4", "x"), 14.0);
}

#[test]
fn while_loop_counts() {
    assert_eq!(number_global("var i = 0\nwhile i < 5 { i = i + 1 }", "i"), 5.0);
}

#[test]
fn while_true_breaks_out() {
    let src = "var i = 0\nwhile true { if i > 3 { break }\ni = i + 1 }";
    assert_eq!(number_global(src, "i"), 4.0);
}

#[test]
fn continue_skips_an_iteration() {
    let src = "var s = 0\nvar i = 0\nwhile i < 5 { i = i + 1\nif i == 3 { continue }\ns = s + i }";
    assert_eq!(number_global(src, "s"), 12.0);
}

#[test]
fn direct_calls_and_returns() {
    let src = "proc add(a: number, b: number) -> number { return a + b }\nlet s = add(2, 3)";
    assert_eq!(number_global(src, "s"), 5.0);
}

#[test]
fn nested_calls() {
    let src = "proc a(x: number) -> number { return x + 1 }\n\
               proc b(x: number) -> number { return a(x) * 2 }\n\
               let r = b(3)";
    assert_eq!(number_global(src, "r"), 8.0);
}

#[test]
fn result_variable_is_the_implicit_return() {
    let src = "proc five() -> number { result = 5 }\nlet x = five()";
    assert_eq!(number_global(src, "x"), 5.0);
    let src = "proc zero() -> number { }\nlet x = zero()";
    assert_eq!(number_global(src, "x"), 0.0);
}

#[test]
fn if_expression_selects_a_branch() {
    assert_eq!(number_global("let x = if false { 1 } else { 2 }", "x"), 2.0);
    assert_eq!(number_global("let x = if 1 < 2 { 1 } else { 2 }", "x"), 1.0);
}

#[test]
fn objects_construct_read_and_write() {
    let src = "object P { a, b: number }\n\
               var p = P(a: 1, b: 2)\n\
               p.b = 7\n\
               let y = p.a + p.b";
    assert_eq!(number_global(src, "y"), 8.0);
}

#[test]
fn constructor_arguments_evaluate_in_field_order() {
    let src = "object P { a, b: number }\nlet p = P(b: mark(20), a: mark(10))";
    let (recorded, _) = run_recording(src, &[]);
    assert_eq!(recorded, vec![10.0, 20.0]);
}

#[test]
fn generic_instantiations_run() {
    let src = "proc id[T](x: T) -> T { return x }\n\
               let a = id[number](41)\n\
               let b = a + id[number](1)";
    assert_eq!(number_global(src, "b"), 42.0);
}

#[test]
fn short_circuit_skips_the_right_operand() {
    let src = "let v = true or flag(1)\nlet w = false and flag(2)\nlet y = false or flag(3)";
    let (recorded, globals) = run_recording(src, &["v", "w", "y"]);
    assert_eq!(recorded, vec![3.0]);
    assert!(matches!(globals[0], Value::Bool(true)));
    assert!(matches!(globals[1], Value::Bool(false)));
    assert!(matches!(globals[2], Value::Bool(true)));
}

#[test]
fn user_defined_operators_resolve_to_procs() {
    let src = "proc ++(a: number, b: number) -> number { return a + b + 1 }\nlet x = 1 ++ 2";
    assert_eq!(number_global(src, "x"), 4.0);
}

// --- Iterator splicing ----------------------------------------------------

const COUNT: &str =
    "iterator count(n: number) -> number {\n var i = 0\n while i < n { yield i; i = i + 1 }\n}\n";

#[test]
fn for_loop_visits_each_yielded_value() {
    let src = format!("{}for v in count(4) {{ mark(v) }}", COUNT);
    let (recorded, _) = run_recording(&src, &[]);
    assert_eq!(recorded, vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn break_exits_the_for_loop_not_the_inner_while() {
    let src = format!(
        "{}var done = false\nfor v in count(3) {{ mark(v)\nif v == 1 {{ break }} }}\ndone = true",
        COUNT
    );
    let (recorded, globals) = run_recording(&src, &["done"]);
    assert_eq!(recorded, vec![0.0, 1.0]);
    assert!(matches!(globals[0], Value::Bool(true)));
}

#[test]
fn continue_resumes_the_iterator() {
    let src = format!(
        "{}var s = 0\nfor v in count(5) {{ if v == 2 {{ continue }}\ns = s + v }}",
        COUNT
    );
    assert_eq!(number_global(&src, "s"), 8.0);
}

#[test]
fn nested_for_loops_keep_their_variables_apart() {
    let src = format!(
        "{}for a in count(2) {{ for b in count(2) {{ mark(a * 10 + b) }} }}",
        COUNT
    );
    let (recorded, _) = run_recording(&src, &[]);
    assert_eq!(recorded, vec![0.0, 1.0, 10.0, 11.0]);
}

#[test]
fn iterator_locals_do_not_leak_into_the_loop_body() {
    // `i` is internal to the iterator; the loop body must not see it.
    let src = format!("{}for v in count(2) {{ let x = i }}", COUNT);
    let err = match ember::compile("test.em", &src) {
        Err(e) => e.to_string(),
        Ok(_) => panic!("expected a compile error"),
    };
    assert!(err.contains("undefined reference: 'i'"), "unexpected: {}", err);
}

#[test]
fn yield_in_the_loop_body_is_rejected() {
    let src = format!("{}for v in count(2) {{ yield v }}", COUNT);
    let err = match ember::compile("test.em", &src) {
        Err(e) => e.to_string(),
        Ok(_) => panic!("expected a compile error"),
    };
    assert!(err.contains("'yield' is only usable inside an iterator"), "unexpected: {}", err);
}

#[test]
fn print_builtins_are_registered_by_run() {
    ember::run("test.em", "print(\"hi\")\nprint(42)\nprint(true)").unwrap();
}
