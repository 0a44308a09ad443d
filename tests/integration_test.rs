use std::{cell::RefCell, rc::Rc};

use loxwalk::{interpreter::ExecutionErrorKind, Lox, LoxError};
use pretty_assertions::assert_eq;

fn run_program(source: &str) -> (Result<(), LoxError>, String) {
    let output = Rc::new(RefCell::new(Vec::<u8>::new()));
    let mut lox = Lox::new(output.clone());
    let result = lox.run(source);
    let output = String::from_utf8(output.take()).expect("Output should be valid UTF-8");
    (result, output)
}

fn test_valid_program(source: &str, expected_output: &str) {
    let (result, output) = run_program(source);
    result.expect("Valid program should run");
    assert_eq!(output, expected_output);
}

fn test_runtime_error(source: &str) -> ExecutionErrorKind {
    match run_program(source).0 {
        Err(LoxError::Execution(e)) => e.kind().cloned().expect("Expected a runtime error"),
        other => panic!("Expected runtime error, got {other:?}"),
    }
}

#[test]
fn test_fib() {
    let source = r#"
    fun fib(n) {
        if (n <= 1) return n;
        return fib(n - 1) + fib(n - 2);
    }

    for (var i = 0; i < 10; i = i + 1) {
        print fib(i);
    }
    "#;
    let expected_output = "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_closure() {
    let source = r#"
    fun makeCounter() {
        var i = 0;
        fun count() {
            i = i + 1;
            return i;
        }
        return count;
    }

    var counter = makeCounter();
    print counter(); // 1
    print counter(); // 2
    "#;
    let expected_output = "1\n2\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_independent_closures() {
    let source = r#"
    fun makeCounter() {
        var i = 0;
        fun count() {
            i = i + 1;
            return i;
        }
        return count;
    }

    var a = makeCounter();
    var b = makeCounter();
    a();
    a();
    print a();
    print b();
    "#;
    test_valid_program(source, "3\n1\n");
}

#[test]
fn test_functions_cant_break_scope() {
    let source = r#"
    var a = "global";
    {
        fun showA() {
            print a;
        }
        showA(); // global
        var a = "block";
        showA(); // global
    }
    "#;
    let expected_output = "global\nglobal\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_block_scoping() {
    let source = r#"
    var a = 1;
    {
        var a = a + 1;
        print a;
    }
    print a;
    "#;
    test_valid_program(source, "2\n1\n");
}

#[test]
fn test_assignment_reaches_enclosing_scope() {
    let source = r#"
    var a = "before";
    {
        {
            a = "after";
        }
    }
    print a;
    "#;
    test_valid_program(source, "after\n");
}

#[test]
fn test_precedence() {
    test_valid_program("print 1 + 2 * 3;", "7\n");
    test_valid_program("print -2 * -(3 - 1) >= 4 == !nil;", "true\n");
}

#[test]
fn test_control_flow() {
    let source = r#"
    var total = 0;
    var i = 0;
    while (i < 5) {
        if (i == 2) total = total + 100; else total = total + i;
        i = i + 1;
    }
    print total;
    for (;false;) print "never";
    "#;
    test_valid_program(source, "108\n");
}

#[test]
fn test_for_loop_variable_is_scoped() {
    let source = r#"
    var i = "outer";
    for (var i = 0; i < 2; i = i + 1) print i;
    print i;
    "#;
    test_valid_program(source, "0\n1\nouter\n");
}

#[test]
fn test_early_return_from_nested_loops() {
    let source = r#"
    fun find() {
        for (var i = 0; i < 10; i = i + 1) {
            for (var j = 0; j < 10; j = j + 1) {
                if (i * j == 12) return i + j;
            }
        }
        return nil;
    }
    print find();
    "#;
    test_valid_program(source, "8\n");
}

#[test]
fn test_logical_operators() {
    let source = r#"
    print "hi" or 2;
    print nil or "yes";
    print nil and boom();
    print 1 and 2;
    "#;
    test_valid_program(source, "hi\nyes\nnil\n2\n");
}

#[test]
fn test_recursion_depth() {
    let source = r#"
    fun count(n) {
        if (n == 0) return 0;
        return 1 + count(n - 1);
    }
    print count(900);
    "#;
    test_valid_program(source, "900\n");
}

#[test]
fn test_stack_overflow_is_a_runtime_error() {
    let kind = test_runtime_error("fun f() { return f(); } f();");
    assert!(matches!(kind, ExecutionErrorKind::StackOverflow));
}

#[test]
fn test_arity_is_checked() {
    let kind = test_runtime_error("fun add(a, b) { return a + b; } add(1, 2, 3);");
    assert!(matches!(
        kind,
        ExecutionErrorKind::InvalidFunctionCall {
            expected: 2,
            got: 3,
            ..
        }
    ));
}

#[test]
fn test_only_functions_are_callable() {
    let kind = test_runtime_error("\"not a function\"();");
    assert!(matches!(kind, ExecutionErrorKind::NotAFunction(_)));
}

#[test]
fn test_output_before_runtime_error_is_kept() {
    let (result, output) = run_program("print \"first\"; print 1 - \"x\"; print \"never\";");
    let err = result.unwrap_err();
    assert_eq!(err.exit_code(), 70);
    assert_eq!(
        err.to_string(),
        "[line 1] Runtime error: Invalid subtraction operation: 1 - x"
    );
    assert_eq!(output, "first\n");
}

#[test]
fn test_static_errors() {
    for source in [
        "{ var a = 1; var a = 2; }",
        "var a = a;",
        "return 1;",
        "print 1 +;",
        "1 = 2;",
        "print \"unterminated;",
        "var x = @;",
    ] {
        let (result, output) = run_program(source);
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 65, "{source}: {err}");
        assert_eq!(output, "");
    }
}

#[test]
fn test_parse_reports_every_error() {
    let (result, _) = run_program("print ;\nvar = 1;\nprint 3;\n(1;");
    let errors = match result {
        Err(LoxError::Parse(errors)) => errors,
        other => panic!("Expected parse errors, got {other:?}"),
    };
    let lines = errors
        .errors()
        .iter()
        .map(|error| error.line())
        .collect::<Vec<_>>();
    assert_eq!(lines, vec![Some(1), Some(2), Some(4)]);
}

const DEEP_NESTING: usize = 5000;

#[test]
fn test_deeply_nested_groupings() {
    let source = format!(
        "print {}1{};",
        "(".repeat(DEEP_NESTING),
        ")".repeat(DEEP_NESTING)
    );
    test_valid_program(&source, "1\n");
}

#[test]
fn test_deeply_nested_unary_operators() {
    let source = format!("print {}true;", "!".repeat(DEEP_NESTING));
    test_valid_program(&source, "true\n");
}

#[test]
fn test_deeply_nested_blocks() {
    let source = format!(
        "{{ var x = \"outer\"; {} print x; {} }}",
        "{".repeat(DEEP_NESTING),
        "}".repeat(DEEP_NESTING)
    );
    test_valid_program(&source, "outer\n");
}

#[test]
fn test_deeply_nested_error_is_reported() {
    let source = format!("print {}1;", "(".repeat(DEEP_NESTING));
    let (result, _) = run_program(&source);
    assert_eq!(result.unwrap_err().exit_code(), 65);
}
