//! Tests for conditions, loops, labels and jumps

use super::helpers::{goto, label, Harness};
use crate::interpreter::errors::ErrorKind;
use crate::interpreter::value::Val;
use crate::program::builder::*;
use crate::program::Program;

fn console(text: &str) -> crate::program::Stmt {
    expr(call_static("Console", "WriteLine", vec![string(text)]))
}

/// `Sum(n)`: add 1..=n in a while loop
fn sum_program() -> Program {
    ProgramBuilder::new()
        .method(MethodBuilder::new("Sum").param("n").body(vec![
            declare("total", Some(int(0))),
            declare("i", Some(int(1))),
            while_loop(
                le(var("i"), var("n")),
                vec![
                    assign(var("total"), add(var("total"), var("i"))),
                    assign(var("i"), add(var("i"), int(1))),
                ],
            ),
            ret(var("total")),
        ]))
        .build()
}

#[test]
fn test_while_loop_lowered_and_structured_agree() {
    let lowered = Harness::new(sum_program());
    let structured = Harness::raw(sum_program());

    assert_eq!(lowered.value("Sum", vec![Val::Int(10)]), Val::Int(55));
    assert_eq!(structured.value("Sum", vec![Val::Int(10)]), Val::Int(55));
    assert_eq!(lowered.value("Sum", vec![Val::Int(0)]), Val::Int(0));
}

#[test]
fn test_do_while_runs_body_once() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![
            declare("count", Some(int(0))),
            do_while(
                vec![assign(var("count"), add(var("count"), int(1)))],
                boolean(false),
            ),
            ret(var("count")),
        ]))
        .build();

    assert_eq!(Harness::new(program.clone()).value("Main", vec![]), Val::Int(1));
    assert_eq!(Harness::raw(program).value("Main", vec![]), Val::Int(1));
}

#[test]
fn test_break_leaves_innermost_loop() {
    // Outer runs 3 times; inner breaks at j == 2 every time
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![
            declare("hits", Some(int(0))),
            declare("i", Some(int(0))),
            while_loop(
                lt(var("i"), int(3)),
                vec![
                    declare("j", Some(int(0))),
                    while_loop(
                        boolean(true),
                        vec![
                            if_then(eq(var("j"), int(2)), vec![brk()]),
                            assign(var("hits"), add(var("hits"), int(1))),
                            assign(var("j"), add(var("j"), int(1))),
                        ],
                    ),
                    assign(var("i"), add(var("i"), int(1))),
                ],
            ),
            ret(var("hits")),
        ]))
        .build();

    assert_eq!(Harness::new(program.clone()).value("Main", vec![]), Val::Int(6));
    assert_eq!(Harness::raw(program).value("Main", vec![]), Val::Int(6));
}

#[test]
fn test_break_outside_loop_is_illegal() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![if_then(boolean(true), vec![brk()])]))
        .build();

    let err = Harness::raw(program).error("Main", vec![]);
    assert_eq!(err.kind, ErrorKind::IllegalStatement);
    assert_eq!(err.node.as_deref(), Some("break"));
}

#[test]
fn test_conditions_accept_zero_and_one_only() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Pick").param("c").body(vec![
            if_else(var("c"), vec![ret(string("yes"))], vec![ret(string("no"))]),
        ]))
        .build();
    let harness = Harness::new(program);

    assert_eq!(harness.value("Pick", vec![Val::Int(1)]), Val::Str("yes".into()));
    assert_eq!(harness.value("Pick", vec![Val::Int(0)]), Val::Str("no".into()));
    assert_eq!(harness.value("Pick", vec![Val::Bool(true)]), Val::Str("yes".into()));

    let err = harness.error("Pick", vec![Val::Int(2)]);
    assert_eq!(err.kind, ErrorKind::OutOfRange);
    let err = harness.error("Pick", vec![Val::Str("true".into())]);
    assert_eq!(err.kind, ErrorKind::BadType);
}

#[test]
fn test_short_circuit_skips_right_side() {
    // The right side would divide by zero
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![ret(or(
            boolean(true),
            eq(div(int(1), int(0)), int(0)),
        ))]))
        .build();

    assert_eq!(Harness::new(program).value("Main", vec![]), Val::Bool(true));
}

#[test]
fn test_goto_skips_statements() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![
            goto("End"),
            console("skipped"),
            label("End"),
            ret(int(1)),
        ]))
        .build();
    let harness = Harness::raw(program);

    assert_eq!(harness.value("Main", vec![]), Val::Int(1));
    assert!(harness.console().is_empty());
}

#[test]
fn test_jump_out_of_nested_block_resumes_in_enclosing_block() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![
            try_catch(vec![goto("Out"), console("inside")], None, vec![]),
            console("skipped"),
            label("Out"),
            console("after"),
            ret(int(2)),
        ]))
        .build();
    let harness = Harness::raw(program);

    assert_eq!(harness.value("Main", vec![]), Val::Int(2));
    assert_eq!(harness.console(), vec!["after".to_string()]);
}

#[test]
fn test_backward_jump_loops() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![
            declare("n", Some(int(0))),
            label("Top"),
            assign(var("n"), add(var("n"), int(1))),
            if_then(lt(var("n"), int(5)), vec![goto("Top")]),
            ret(var("n")),
        ]))
        .build();

    assert_eq!(Harness::raw(program).value("Main", vec![]), Val::Int(5));
}

#[test]
fn test_undeclared_label_is_internal_error() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![goto("Nowhere")]))
        .build();

    let err = Harness::raw(program).error("Main", vec![]);
    assert_eq!(err.kind, ErrorKind::Internal);
    assert!(err.message.contains("Nowhere"));
}

#[test]
fn test_return_inside_loop_exits_method() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").body(vec![
            declare("i", Some(int(0))),
            while_loop(
                boolean(true),
                vec![
                    if_then(eq(var("i"), int(3)), vec![ret(var("i"))]),
                    assign(var("i"), add(var("i"), int(1))),
                ],
            ),
        ]))
        .build();

    assert_eq!(Harness::raw(program.clone()).value("Main", vec![]), Val::Int(3));
    assert_eq!(Harness::new(program).value("Main", vec![]), Val::Int(3));
}
