//! Parser tests: grammar coverage, precedence shape, statement termination
//! and the render/re-parse round trip.

use ember::parser::ast::{Node, NodeKind};
use ember::parser::parse;
use ember::render;

fn parse_ok(src: &str) -> Node {
    match parse("test.em", src) {
        Ok(node) => node,
        Err(e) => panic!("parse failed: {}\nsource:\n{}", e, src),
    }
}

fn top_stmts(node: &Node) -> &[Node] {
    match &node.kind {
        NodeKind::Script(stmts) => stmts,
        other => panic!("expected a script root, got {:?}", other),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let ast = parse_ok("let x = 2 + 3 * 4");
    let stmts = top_stmts(&ast);
    let NodeKind::VarDecl { value: Some(value), .. } = &stmts[0].kind else {
        panic!("expected a var decl");
    };
    let NodeKind::Infix { op, rhs, .. } = &value.kind else {
        panic!("expected an infix node, got {:?}", value.kind);
    };
    assert_eq!(op, "+");
    let NodeKind::Infix { op: inner, .. } = &rhs.kind else {
        panic!("expected the right child to be an infix node");
    };
    assert_eq!(inner, "*");
}

#[test]
fn caret_operators_are_right_associative() {
    let ast = parse_ok("let x = 2 ^ 3 ^ 4");
    let stmts = top_stmts(&ast);
    let NodeKind::VarDecl { value: Some(value), .. } = &stmts[0].kind else {
        panic!("expected a var decl");
    };
    let NodeKind::Infix { op, rhs, lhs } = &value.kind else {
        panic!("expected an infix node");
    };
    assert_eq!(op, "^");
    assert!(matches!(lhs.kind, NodeKind::Number(_)));
    assert!(matches!(rhs.kind, NodeKind::Infix { .. }));
}

#[test]
fn call_index_and_dot_extend_a_value() {
    let ast = parse_ok("let x = f[number](p.a, 1)");
    let stmts = top_stmts(&ast);
    let NodeKind::VarDecl { value: Some(value), .. } = &stmts[0].kind else {
        panic!("expected a var decl");
    };
    let NodeKind::Call { callee, args } = &value.kind else {
        panic!("expected a call, got {:?}", value.kind);
    };
    assert!(matches!(callee.kind, NodeKind::Index { .. }));
    assert_eq!(args.len(), 2);
    assert!(matches!(args[0].kind, NodeKind::Dot { .. }));
}

#[test]
fn unterminated_statement_is_a_syntax_error() {
    let err = parse("test.em", "let x = 1 let y = 2").unwrap_err();
    assert!(err.to_string().contains("test.em(1,"), "unexpected: {}", err);
}

#[test]
fn statements_split_on_linefeed_and_semicolon() {
    let ast = parse_ok("let x = 1; let y = 2\nlet z = 3");
    assert_eq!(top_stmts(&ast).len(), 3);
}

#[test]
fn if_elif_else_chain() {
    let ast = parse_ok("if a { 1 } elif b { 2 } elif c { 3 } else { 4 }");
    let stmts = top_stmts(&ast);
    let NodeKind::If { branches, else_body } = &stmts[0].kind else {
        panic!("expected an if node");
    };
    assert_eq!(branches.len(), 3);
    assert!(else_body.is_some());
}

#[test]
fn error_carries_file_line_col() {
    let err = parse("scripts/fail.em", "let x = (1 +\n").unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("scripts/fail.em("), "unexpected: {}", msg);
}

#[test]
fn parse_error_aborts_with_position_inside_source() {
    let err = parse("test.em", "proc f(a number) { }").unwrap_err();
    assert_eq!(err.line, 1);
    assert!(err.col > 1);
}

#[test]
fn comments_are_skipped_including_nested_blocks() {
    let ast = parse_ok("// leading\nlet x = 1 /* a /* nested */ b */ + 2\n");
    assert_eq!(top_stmts(&ast).len(), 1);
}

#[test]
fn render_then_reparse_is_identity_modulo_positions() {
    let src = r#"
object Pair { a, b: number }

proc sum(p: Pair) -> number {
  var total = p.a
  total = total + p.b
  return total
}

iterator upto(n: number) -> number {
  var i = 0
  while i < n { yield i; i = i + 1 }
}

proc apply[T](x: T) -> T { return x }

let p = Pair(a: 1, b: 2)
let s = sum(p)
let t = if s > 2 { true } else { false }
var acc = 0
for v in upto(3) {
  if v == 1 { continue }
  acc = acc + v
  while false { break }
}
let neg = -acc
let both = t and s < 10 or not t
"#;
    let first = parse_ok(src);
    let rendered = render(&first);
    let second = match parse("rendered.em", &rendered) {
        Ok(node) => node,
        Err(e) => panic!("re-parse failed: {}\nrendered:\n{}", e, rendered),
    };
    assert_eq!(first, second, "round trip changed the tree:\n{}", rendered);
}

#[test]
fn rendering_is_stable_across_a_second_round_trip() {
    let src = "let x = 1 + 2 * 3\nlet y = f(x, \"a\\nb\")";
    let first = parse_ok(src);
    let rendered = render(&first);
    let second = parse_ok(&rendered);
    assert_eq!(render(&second), rendered);
}
