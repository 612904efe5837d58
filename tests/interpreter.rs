mod common;

use common::{run_program, Harness, Run};

// ─────────────────────────────────────────────────────────────────────────
// Expressions and statements
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn arithmetic_prints_integers_without_fraction() {
    let (output, run) = run_program("print 1 + 2;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "3\n");
}

#[test]
fn string_number_concatenation() {
    let (output, run) = run_program("var a = \"foo\"; var b = 2; print a + b;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "foo2\n");
}

#[test]
fn number_string_concatenation() {
    let (output, run) = run_program("print 1.5 + \"x\";");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "1.5x\n");
}

#[test]
fn number_formatting_rules() {
    let (output, run) = run_program(
        "print 0; print -0.0; print 2.5; print 10 / 4; print 100000; print !nil; print nil;",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "0\n-0\n2.5\n2.5\n100000\ntrue\nnil\n");
}

#[test]
fn logical_operators_short_circuit() {
    let (output, run) = run_program(
        "fun boom() { print \"boom\"; return true; }\n\
         print false and boom();\n\
         print true or boom();\n\
         print nil or \"fallback\";",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "false\ntrue\nfallback\n");
}

#[test]
fn comparison_and_equality() {
    let (output, run) = run_program(
        "print 1 < 2; print 2 <= 2; print 3 > 4; print \"a\" == \"a\"; \
         print \"a\" == 1; print nil == nil; print 1 != 2;",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "true\ntrue\nfalse\ntrue\nfalse\ntrue\ntrue\n");
}

#[test]
fn for_loop_desugars_and_runs() {
    let (output, run) = run_program("var x = 0; for (var i = 0; i < 3; i = i + 1) x = x + i; print x;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "3\n");
}

#[test]
fn while_loop_with_break_via_condition() {
    let (output, run) = run_program(
        "var n = 0; while (n < 5) { n = n + 1; } print n;",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "5\n");
}

#[test]
fn assignment_is_an_expression() {
    let (output, run) = run_program("var a = 1; var b = 2; a = b = 3; print a; print b;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "3\n3\n");
}

#[test]
fn uninitialized_variable_reads_nil_by_default() {
    let (output, run) = run_program("var ghost; print ghost;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "nil\n");
}

#[test]
fn uninitialized_variable_errors_when_strict() {
    let mut harness = Harness::with_config(true);
    let run = harness.run("var ghost; print ghost;");
    assert_eq!(
        run,
        Run::Runtime("Accessing uninitialized variable 'ghost'.".to_string())
    );
}

#[test]
fn global_redefinition_is_allowed() {
    let (output, run) = run_program("var a = 1; var a = \"again\"; print a;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "again\n");
}

#[test]
fn block_scoping_shadows_and_restores() {
    let (output, run) = run_program(
        "var a = \"outer\";\n\
         {\n\
           var a = \"inner\";\n\
           print a;\n\
         }\n\
         print a;",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "inner\nouter\n");
}

// ─────────────────────────────────────────────────────────────────────────
// Functions and closures
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn recursive_fibonacci() {
    let (output, run) = run_program(
        "fun f(n) { if (n < 2) return n; return f(n - 1) + f(n - 2); } print f(10);",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "55\n");
}

#[test]
fn function_without_return_yields_nil() {
    let (output, run) = run_program("fun noop() {} print noop();");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "nil\n");
}

#[test]
fn closures_capture_their_defining_environment() {
    let (output, run) = run_program(
        "fun makeCounter() {\n\
           var count = 0;\n\
           fun increment() {\n\
             count = count + 1;\n\
             return count;\n\
           }\n\
           return increment;\n\
         }\n\
         var counter = makeCounter();\n\
         print counter();\n\
         print counter();\n\
         print counter();",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn sibling_closures_share_one_environment() {
    let (output, run) = run_program(
        "var get; var set;\n\
         fun pair() {\n\
           var shared = \"initial\";\n\
           fun read() { return shared; }\n\
           fun write(value) { shared = value; }\n\
           get = read;\n\
           set = write;\n\
         }\n\
         pair();\n\
         set(\"updated\");\n\
         print get();",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "updated\n");
}

#[test]
fn closure_binds_lexically_not_dynamically() {
    let (output, run) = run_program(
        "var a = \"global\";\n\
         {\n\
           fun show() { print a; }\n\
           show();\n\
           var a = \"block\";\n\
           show();\n\
         }",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "global\nglobal\n");
}

#[test]
fn function_values_print_their_name() {
    let (output, run) = run_program("fun greet() {} print greet; print clock;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "<fn greet>\n<fn >\n");
}

#[test]
fn native_clock_returns_a_number() {
    let (output, run) = run_program("print clock() >= 0;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "true\n");
}

// ─────────────────────────────────────────────────────────────────────────
// Classes
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn method_dispatch_with_super() {
    let (output, run) = run_program(
        "class A { greet() { print \"A\"; } }\n\
         class B < A { greet() { super.greet(); print \"B\"; } }\n\
         B().greet();",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "A\nB\n");
}

#[test]
fn initializer_stores_fields() {
    let (output, run) = run_program("class C { init(x) { this.x = x; } } print C(42).x;");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "42\n");
}

#[test]
fn initializer_returns_this_even_on_bare_return() {
    let (output, run) = run_program(
        "class C { init() { this.ready = true; return; } }\n\
         var c = C();\n\
         print c.ready;\n\
         print c.init().ready;",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "true\ntrue\n");
}

#[test]
fn fields_shadow_methods() {
    let (output, run) = run_program(
        "class Thing { label() { return \"method\"; } }\n\
         var t = Thing();\n\
         t.label = \"field\";\n\
         print t.label;",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "field\n");
}

#[test]
fn bound_methods_remember_their_receiver() {
    let (output, run) = run_program(
        "class Person {\n\
           init(name) { this.name = name; }\n\
           hello() { print \"hi \" + this.name; }\n\
         }\n\
         var method = Person(\"ada\").hello;\n\
         method();",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "hi ada\n");
}

#[test]
fn inherited_methods_and_initializers() {
    let (output, run) = run_program(
        "class Base { init(v) { this.v = v; } show() { print this.v; } }\n\
         class Derived < Base {}\n\
         Derived(7).show();",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "7\n");
}

#[test]
fn super_resolves_past_the_receiver_class() {
    let (output, run) = run_program(
        "class A { method() { print \"A method\"; } }\n\
         class B < A { method() { print \"B method\"; } test() { super.method(); } }\n\
         class C < B {}\n\
         C().test();",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "A method\n");
}

#[test]
fn classes_and_instances_stringify() {
    let (output, run) = run_program("class Widget {} print Widget; print Widget();");
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "Widget\nWidget instance\n");
}

#[test]
fn methods_close_over_the_class_scope() {
    let (output, run) = run_program(
        "class Counter {\n\
           init() { this.count = 0; }\n\
           bump() { this.count = this.count + 1; return this.count; }\n\
         }\n\
         var c = Counter();\n\
         c.bump(); c.bump();\n\
         print c.bump();",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "3\n");
}

// ─────────────────────────────────────────────────────────────────────────
// Runtime errors
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn division_by_zero() {
    let (_, run) = run_program("print 1 / 0;");
    assert_eq!(run, Run::Runtime("Division by zero.".to_string()));
}

#[test]
fn undefined_property() {
    let (_, run) = run_program("class A {} A().x;");
    assert_eq!(run, Run::Runtime("Undefined property 'x'.".to_string()));
}

#[test]
fn undefined_variable_read_and_write() {
    let (_, run) = run_program("print missing;");
    assert_eq!(run, Run::Runtime("Undefined variable 'missing'.".to_string()));

    let (_, run) = run_program("missing = 1;");
    assert_eq!(run, Run::Runtime("Undefined variable 'missing'.".to_string()));
}

#[test]
fn calling_a_non_callable() {
    let (_, run) = run_program("var x = 1; x();");
    assert_eq!(
        run,
        Run::Runtime("Can only call functions and classes.".to_string())
    );
}

#[test]
fn arity_mismatch() {
    let (_, run) = run_program("fun f(a, b) {} f(1);");
    assert_eq!(
        run,
        Run::Runtime("Expected 2 arguments but got 1.".to_string())
    );
}

#[test]
fn class_arity_follows_init() {
    let (_, run) = run_program("class C { init(a) {} } C();");
    assert_eq!(
        run,
        Run::Runtime("Expected 1 arguments but got 0.".to_string())
    );
}

#[test]
fn operands_must_be_numbers() {
    let (_, run) = run_program("print 1 < \"two\";");
    assert_eq!(run, Run::Runtime("Operands must be numbers.".to_string()));

    let (_, run) = run_program("print -\"one\";");
    assert_eq!(run, Run::Runtime("Operand must be a number.".to_string()));

    let (_, run) = run_program("print true + 1;");
    assert_eq!(
        run,
        Run::Runtime("Operands must be two numbers or two strings.".to_string())
    );
}

#[test]
fn property_access_on_non_instances() {
    let (_, run) = run_program("var s = \"str\"; print s.length;");
    assert_eq!(
        run,
        Run::Runtime("Only instances have properties.".to_string())
    );

    let (_, run) = run_program("var n = 1; n.field = 2;");
    assert_eq!(run, Run::Runtime("Only instances have fields.".to_string()));
}

#[test]
fn superclass_must_be_a_class() {
    let (_, run) = run_program("var NotAClass = 1; class Sub < NotAClass {}");
    assert_eq!(
        run,
        Run::Runtime("Superclass must be a class.".to_string())
    );
}

// ─────────────────────────────────────────────────────────────────────────
// Interpreter invariants
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn environment_returns_to_globals_after_success() {
    let mut harness = Harness::new();
    let run = harness.run("var a = 1; { var b = 2; { var c = a + b; print c; } }");
    assert_eq!(run, Run::Ok);
    assert_eq!(harness.interpreter.environment(), harness.interpreter.globals());
    assert_eq!(harness.interpreter.gc.locked_depth(), 0);
}

#[test]
fn pin_stack_is_empty_after_runtime_unwind() {
    let mut harness = Harness::new();
    // Fails mid-expression, with operands pinned at the time of the error.
    let run = harness.run("fun f() { return 1 + (2 * nil); } print 1 + f();");
    assert!(matches!(run, Run::Runtime(_)));
    assert_eq!(harness.interpreter.gc.locked_depth(), 0);
}

#[test]
fn session_continues_after_errors() {
    let mut harness = Harness::new();
    assert!(matches!(harness.run("print 1 / 0;"), Run::Runtime(_)));
    assert_eq!(harness.run("print \"still alive\";"), Run::Ok);
    assert!(harness.output().ends_with("still alive\n"));
}

#[test]
fn globals_persist_across_runs() {
    let mut harness = Harness::new();
    assert_eq!(harness.run("var total = 10;"), Run::Ok);
    assert_eq!(harness.run("fun double(n) { return n * 2; }"), Run::Ok);
    assert_eq!(harness.run("print double(total);"), Run::Ok);
    assert_eq!(harness.output(), "20\n");
}

// ─────────────────────────────────────────────────────────────────────────
// Collection under load
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn garbage_collection_during_tight_loops_preserves_results() {
    // Enough churn to force many collection cycles.
    let (output, run) = run_program(
        "var acc = 0;\n\
         for (var i = 0; i < 20000; i = i + 1) {\n\
           var s = \"chunk\" + i;\n\
           acc = acc + 1;\n\
         }\n\
         print acc;",
    );
    assert_eq!(run, Run::Ok);
    assert_eq!(output, "20000\n");
}

#[test]
fn collection_preserves_live_closures_and_instances() {
    let (output, run) = run_program(
        "class Node { init(value) { this.value = value; this.next = nil; } }\n\
         fun build(n) {\n\
           var head = nil;\n\
           for (var i = 0; i < n; i = i + 1) {\n\
             var node = Node(i);\n\
             node.next = head;\n\
             head = node;\n\
           }\n\
           return head;\n\
         }\n\
         fun sum(list) {\n\
           var total = 0;\n\
           while (list != nil) {\n\
             total = total + list.value;\n\
             list = list.next;\n\
           }\n\
           return total;\n\
         }\n\
         var list = build(500);\n\
         for (var i = 0; i < 200; i = i + 1) {\n\
           var junk = \"junk\" + i;\n\
         }\n\
         print sum(list);",
    );
    assert_eq!(run, Run::Ok);
    // 0 + 1 + ... + 499
    assert_eq!(output, "124750\n");
}

#[test]
fn collection_keeps_alive_environment_graphs_of_shared_closures() {
    let mut harness = Harness::new();
    let run = harness.run(
        "var fns = nil;\n\
         class Cell { init(f, rest) { this.f = f; this.rest = rest; } }\n\
         fun adder(n) {\n\
           fun add(m) { return n + m; }\n\
           return add;\n\
         }\n\
         for (var i = 0; i < 50; i = i + 1) {\n\
           fns = Cell(adder(i), fns);\n\
         }\n\
         var total = 0;\n\
         var walk = fns;\n\
         while (walk != nil) {\n\
           total = total + walk.f(1);\n\
           walk = walk.rest;\n\
         }\n\
         print total;",
    );
    assert_eq!(run, Run::Ok);
    // sum(i + 1 for i in 0..50)
    assert!(harness.output().ends_with("1275\n"));
    harness.interpreter.gc.collect();
    assert_eq!(harness.run("print fns.f(2);"), Run::Ok);
}
