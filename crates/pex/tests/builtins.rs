//! Builtin behavior through the full pipeline.

use pex::{CompileOptions, Program, RunError, Value, Vm};

fn run(source: &str, input: Value) -> Result<Value, RunError> {
    let bytes = pex::compile_source(source, &CompileOptions::default()).expect("source parses");
    let program = Program::load(&bytes).expect("compiled bytes load");
    Vm::new(&program).run(input)
}

fn eval(source: &str) -> Value {
    run(source, Value::Null).expect("program runs")
}

#[track_caller]
fn assert_eval(source: &str, expected: &Value) {
    let result = eval(source);
    assert!(
        result.equal(expected),
        "{source} => {result}, expected {expected}"
    );
}

#[test]
fn string_builtins() {
    assert_eval("(split \"a,b,c\" \",\")", &Value::array(vec![
        Value::str("a"),
        Value::str("b"),
        Value::str("c"),
    ]));
    assert_eval("(split \"a,b,c\" \",\" 2)", &Value::array(vec![Value::str("a"), Value::str("b")]));
    assert_eval("(join \"a\" 1 true)", &Value::str("a1true"));
    assert_eval("(join (split \"a,b\" \",\"))", &Value::str("ab"));
    assert_eval("(trim \"  x  \")", &Value::str("x"));
    assert_eval("(upper \"ab\")", &Value::str("AB"));
    assert_eval("(lower \"AB\")", &Value::str("ab"));
    assert_eval("(replace \"aaa\" \"a\" \"b\")", &Value::str("baa"));
    assert_eval("(substring \"hello\" 1 3)", &Value::str("el"));
    assert_eval("(substring \"hello\" 3)", &Value::str("lo"));
    assert_eval("(len \"héllo\")", &Value::Number(5.0));
    assert_eval("(len (split \"a,b\" \",\"))", &Value::Number(2.0));
}

#[test]
fn regex_replace_supports_groups_and_global() {
    assert_eval(
        "(replace \"a1 b2\" /([a-z])(\\d)/g \"$2$1\")",
        &Value::str("1a 2b"),
    );
    assert_eval("(replace \"aaa\" /a/ \"b\")", &Value::str("baa"));
    assert_eval("(replace \"aaa\" /a/g \"b\")", &Value::str("bbb"));
}

#[test]
fn conversion_builtins() {
    assert_eval("(int \"3.9\")", &Value::Number(3.0));
    assert_eval("(int \"junk\")", &Value::Number(0.0));
    assert_eval("(float \"2.5\")", &Value::Number(2.5));
    assert_eval("(float null)", &Value::Number(0.0));
    assert_eval("(string 3)", &Value::str("3"));
    assert_eval("(string null)", &Value::str("null"));
    assert_eval("(bool \"\")", &Value::Bool(false));
    assert_eval("(bool \"x\")", &Value::Bool(true));
}

#[test]
fn array_builtins() {
    assert_eval("(first (split \"a,b\" \",\"))", &Value::str("a"));
    assert_eval("(last (split \"a,b\" \",\"))", &Value::str("b"));
    assert_eval("(get (split \"a,b\" \",\") 1)", &Value::str("b"));
    assert_eval("(get (split \"a,b\" \",\") 5 \"d\")", &Value::str("d"));
    assert_eval("(get null 0)", &Value::Null);
}

#[test]
fn comparison_builtins() {
    assert_eval("(== 1 1)", &Value::Bool(true));
    assert_eval("(== \"a\" \"a\")", &Value::Bool(true));
    assert_eval("(== 1 \"1\")", &Value::Bool(false));
    assert_eval("(!= 1 2)", &Value::Bool(true));
    assert_eval("(< 1 2)", &Value::Bool(true));
    assert_eval("(< \"2\" 10)", &Value::Bool(true));
    assert_eval("(>= 2 2)", &Value::Bool(true));
    assert_eval("(> \"x\" 1)", &Value::Bool(false));
}

#[test]
fn math_builtins() {
    assert_eval("(+)", &Value::Number(0.0));
    assert_eval("(+ 1 2 3)", &Value::Number(6.0));
    assert_eval("(- 5 2)", &Value::Number(3.0));
    assert_eval("(- 5)", &Value::Number(-5.0));
    assert_eval("(*)", &Value::Number(1.0));
    assert_eval("(* 2 3 4)", &Value::Number(24.0));
    assert_eval("(/ 1 2)", &Value::Number(0.5));
    assert_eval("(% 7 3)", &Value::Number(1.0));
    assert_eval("(% -7 3)", &Value::Number(-1.0));
}

#[test]
fn division_by_zero_errors_everywhere() {
    for source in ["(/ 1 0)", "(% 1 0)", "let: d /\n(d 1 0)"] {
        let err = run(source, Value::Null).unwrap_err();
        assert!(err.to_string().contains("Division by zero"), "{source}: {err}");
    }
}

#[test]
fn logic_builtins() {
    assert_eval("(not true)", &Value::Bool(false));
    assert_eval("(not null)", &Value::Bool(true));
    assert_eval("(?? null 2)", &Value::Number(2.0));
    assert_eval("(?? false 2)", &Value::Bool(false));
    assert_eval("(?? 1 2)", &Value::Number(1.0));
}

#[test]
fn regex_builtins() {
    assert_eval("(test \"a1\" /\\d/)", &Value::Bool(true));
    assert_eval("(test \"aa\" /\\d/)", &Value::Bool(false));
    assert_eval("(test \"HEY\" /hey/i)", &Value::Bool(true));
    assert_eval(
        "(match \"ab-12\" /(\\w+)-(\\d+)/)",
        &Value::array(vec![Value::str("ab-12"), Value::str("ab"), Value::str("12")]),
    );
    assert_eval("(match \"zz\" /\\d/)", &Value::Null);
    assert_eval(
        "(match \"a1 b2\" /\\w\\d/g)",
        &Value::array(vec![Value::str("a1"), Value::str("b2")]),
    );
}

#[test]
fn invalid_regex_fails_at_first_use() {
    let err = run("(test \"x\" /(unclosed/)", Value::Null).unwrap_err();
    assert!(err.to_string().contains("invalid regex"), "{err}");
}

#[test]
fn arity_and_type_errors_name_the_builtin() {
    let cases = [
        ("(trim)", "trim"),
        ("(trim 1)", "trim"),
        ("(len 1)", "len"),
        ("(first \"x\")", "first"),
        ("(?? 1)", "??"),
        ("(< 1)", "<"),
        ("(* 1 \"x\")", "*"),
    ];
    for (source, name) in cases {
        let err = run(source, Value::Null).unwrap_err();
        assert!(err.to_string().contains(name), "{source}: {err}");
    }
}

#[test]
fn builtins_are_first_class_values() {
    assert_eval("let: f upper\n(f \"hi\")", &Value::str("HI"));
    assert_eval("\"a,b\" | (split $ \",\") | first | upper", &Value::str("A"));
}
