//=============================================
// zexus/vm/tests/parity_tests.rs
//=============================================
// Purpose: Ensure the tree-walking evaluator and the bytecode
//          VM produce identical observable behavior for paired
//          programs sharing one surface grammar.
//=============================================

use crate::builtins::Host;
use crate::compiler;
use crate::evaluator::Evaluator;
use crate::object::Object;
use crate::parser::TolerantParser;
use crate::vm::Vm;

/// Run through the interpreter, returning (result, captured output).
fn interpret(source: &str) -> (Object, String) {
    let (program, diagnostics) = TolerantParser::parse_source(source);
    assert!(
        diagnostics.is_empty(),
        "tolerant parse diagnostics: {:?}",
        diagnostics
    );
    let mut evaluator = Evaluator::with_host(Host::capturing());
    let result = evaluator.run_async(&program).expect("interpreter run");
    let output = evaluator.host.take_output();
    (result, output)
}

/// Run through compile + VM, returning (result, captured output).
fn execute(source: &str) -> (Object, String) {
    let bytecode = compiler::compile(source).expect("compile");
    let mut vm = Vm::new(bytecode, Host::capturing());
    let result = vm.run().expect("vm run");
    let output = vm.host.take_output();
    (result, output)
}

fn assert_parity(source: &str) {
    let (eval_result, eval_output) = interpret(source);
    let (vm_result, vm_output) = execute(source);
    assert_eq!(
        eval_output, vm_output,
        "output mismatch for program: {}",
        source
    );
    assert_eq!(
        eval_result, vm_result,
        "result mismatch for program: {}",
        source
    );
}

#[test]
fn arithmetic_and_precedence_match() {
    assert_parity("print(string(10 + 5))");
    assert_parity("print(string(2 + 3 * 4))");
    assert_parity("print(string((2 + 3) * 4))");
    assert_parity("print(string(7 / 2)) print(string(7 % 2))");
    assert_parity("print(string(1.5 + 1))");
    assert_parity("print(string(-3 + 1))");
}

#[test]
fn map_and_list_literals_match() {
    assert_parity("let m = { \"a\": 1, b: 2; c: 3, }  print(string(m))");
    assert_parity("let l = [1, 2, 3] print(string(l)) print(string(len(l)))");
    assert_parity("let l = [1, 2, 3] print(string(l[1])) print(string(l[9]))");
    assert_parity("let m = { x: 5 } print(string(m.x)) print(string(m[\"x\"]))");
}

#[test]
fn try_catch_matches() {
    assert_parity(
        "try { let x = 10 / 0 } catch(err) { print(\"error: \" + string(err)) }",
    );
    assert_parity("try { print(string(1 + 1)) } catch(e) { print(\"unreached\") }");
}

#[test]
fn higher_order_list_methods_match() {
    assert_parity("let nums=[1,2,3,4] let d=nums.map(lambda(n)->n*2) print(string(d))");
    assert_parity("let nums=[1,2,3,4] print(string(filter(nums, lambda(n)->n % 2 == 0)))");
    assert_parity("let nums=[1,2,3,4] print(string(reduce(nums, lambda(a, b)->a + b)))");
    assert_parity("let nums=[1,2,3,4] print(string(reduce(nums, lambda(a, b)->a + b, 100)))");
}

#[test]
fn closures_match() {
    assert_parity(
        "action make(){ let c=0 action inc(){ c=c+1 return c } return inc } \
         let f=make() print(string(f())) print(string(f()))",
    );
}

#[test]
fn counter_pair_shares_one_cell() {
    assert_parity(
        "action create_counter() { \
           let n = 0 \
           action inc() { n = n + 1 return n } \
           action get() { return n } \
           return [inc, get] \
         } \
         let pair = create_counter() \
         let inc = pair[0] let get = pair[1] \
         print(string(inc())) print(string(inc())) print(string(get()))",
    );
}

#[test]
fn events_match() {
    assert_parity(
        "event E { x: integer } \
         register_event(\"E\", action(e){ print(\"got \" + string(e.x)) }) \
         emit E { x: 7 }",
    );
    assert_parity(
        "event E { x: integer } \
         register_event(\"E\", action(e){ print(\"first \" + string(e.x)) }) \
         register_event(\"E\", action(e){ print(\"second \" + string(e.x)) }) \
         emit E { x: 1 }",
    );
}

#[test]
fn control_flow_matches() {
    assert_parity("let i = 0 let total = 0 while i < 5 { total = total + i i = i + 1 } print(string(total))");
    assert_parity("for each x in [1, 2, 3] { print(string(x * x)) }");
    assert_parity("let m = { a: 1, b: 2 } for each k in m { print(k) }");
    assert_parity("if 1 < 2 { print(\"yes\") } else { print(\"no\") }");
    assert_parity("let v = if 3 > 2 { \"big\" } else { \"small\" } print(v)");
}

#[test]
fn enums_and_strings_match() {
    assert_parity("enum Color { Red, Green } print(string(Color.Red))");
    assert_parity("print(string(\"HeLLo\".lower())) print(string(\"x,y\".split(\",\")))");
    assert_parity("print(to_hex(255)) print(string(from_hex(\"ff\")))");
}

#[test]
fn program_result_is_final_expression() {
    let (eval_result, _) = interpret("let x = 20 x + 5");
    let (vm_result, _) = execute("let x = 20 x + 5");
    assert_eq!(eval_result, Object::integer(25));
    assert_eq!(vm_result, Object::integer(25));
}

#[test]
fn async_await_to_completion_matches() {
    assert_parity(
        "action async work(n) { return n * 2 } \
         print(string(await work(21)))",
    );
    assert_parity("print(string(await 5))");
}
