//=============================================
// zexus/vm/tests/async_tests.rs
//=============================================
// Purpose: Cooperative scheduling semantics: FIFO spawn order,
//          await-boundary interleaving, pass-through awaits,
//          step budgets.
//=============================================

use crate::builtins::Host;
use crate::compiler;
use crate::errors::ErrorKind;
use crate::vm::{RuntimeOptions, Vm};

fn run_output(source: &str) -> String {
    let bytecode = compiler::compile(source).expect("compile");
    let mut vm = Vm::new(bytecode, Host::capturing());
    vm.run().expect("vm run");
    vm.host.take_output()
}

#[test]
fn tasks_interleave_at_await_boundaries_in_fifo_order() {
    let source = "\
        let order = [] \
        action async tick() { return 0 } \
        action async f() { \
            order = push(order, 1) \
            await spawn(tick()) \
            order = push(order, 2) \
            await spawn(tick()) \
            order = push(order, 3) \
        } \
        action async g() { \
            order = push(order, 10) \
            await spawn(tick()) \
            order = push(order, 20) \
            await spawn(tick()) \
            order = push(order, 30) \
        } \
        let tf = spawn(f()) \
        let tg = spawn(g()) \
        await tf await tg \
        print(string(order))";
    assert_eq!(run_output(source), "[1, 10, 2, 20, 3, 30]\n");
}

#[test]
fn task_that_never_awaits_runs_to_completion_first() {
    let source = "\
        let order = [] \
        action async quick() { order = push(order, \"quick\") } \
        action async slow() { \
            order = push(order, \"slow1\") \
            await spawn(quick()) \
            order = push(order, \"slow2\") \
        } \
        let t = spawn(slow()) \
        await t \
        print(string(order))";
    assert_eq!(run_output(source), "[slow1, quick, slow2]\n");
}

#[test]
fn await_on_plain_value_passes_through() {
    assert_eq!(run_output("print(string(await 42))"), "42\n");
    assert_eq!(run_output("print(string(await \"x\"))"), "x\n");
}

#[test]
fn calling_async_action_returns_a_coroutine() {
    assert_eq!(
        run_output("action async work() { return 1 } print(string(work()))"),
        "<coroutine>\n"
    );
}

#[test]
fn awaiting_a_failed_coroutine_raises_its_error() {
    let source = "\
        action async explode() { let x = 1 / 0 return x } \
        try { await spawn(explode()) } catch(e) { print(\"caught: \" + string(e)) }";
    assert_eq!(
        run_output(source),
        "caught: ArithmeticError: division by zero\n"
    );
}

#[test]
fn double_await_reuses_the_result() {
    let source = "\
        action async work() { return 7 } \
        let t = spawn(work()) \
        print(string(await t)) \
        print(string(await t))";
    assert_eq!(run_output(source), "7\n7\n");
}

#[test]
fn step_budget_raises_interrupted_error() {
    let bytecode = compiler::compile("while true { let x = 1 }").expect("compile");
    let mut vm = Vm::new(bytecode, Host::capturing())
        .with_options(RuntimeOptions::default().with_step_budget(10_000));
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::InterruptedError);
}

#[test]
fn step_budget_is_not_catchable_by_user_handlers() {
    let source = "try { while true { let x = 1 } } catch(e) { print(\"caught\") }";
    let bytecode = compiler::compile(source).expect("compile");
    let mut vm = Vm::new(bytecode, Host::capturing())
        .with_options(RuntimeOptions::default().with_step_budget(10_000));
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::InterruptedError);
}
