//! Effect protocol tests: exactly-once dispatch, resumption, host errors,
//! and the default handler's `print`/`debug` behavior.

use pex::{
    CollectStringPrint, CompileOptions, Continuation, DefaultHandler, EffectHandler, HostError,
    Program, RunError, Value, Vm,
};
use pretty_assertions::assert_eq;

fn program(source: &str) -> Program {
    let bytes = pex::compile_source(source, &CompileOptions::default()).expect("source parses");
    Program::load(&bytes).expect("compiled bytes load")
}

/// Records every dispatch and resumes with a fixed value.
struct Recording {
    seen: Vec<(String, Vec<String>)>,
    answer: f64,
}

impl Recording {
    fn new(answer: f64) -> Self {
        Self {
            seen: Vec::new(),
            answer,
        }
    }
}

impl EffectHandler for Recording {
    fn handle(&mut self, name: &str, args: &[Value], k: Continuation) -> Result<(), HostError> {
        let rendered = args.iter().map(Value::to_display_string).collect();
        self.seen.push((name.to_owned(), rendered));
        k.resume(Value::Number(self.answer));
        Ok(())
    }
}

#[test]
fn each_effect_instruction_dispatches_once() {
    let program = program("ask: 1\nask: 2\n(+ (effect ask 3) 0)");
    let mut vm = Vm::with_handler(&program, Recording::new(0.0));
    vm.run(Value::Null).unwrap();
    let handler = vm.into_handler();
    assert_eq!(
        handler.seen,
        vec![
            ("ask".to_owned(), vec!["1".to_owned()]),
            ("ask".to_owned(), vec!["2".to_owned()]),
            ("ask".to_owned(), vec!["3".to_owned()]),
        ]
    );
}

#[test]
fn nested_effects_dispatch_inner_first() {
    let program = program("(effect outer (effect inner))");
    let mut vm = Vm::with_handler(&program, Recording::new(5.0));
    let result = vm.run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(5.0)));
    let handler = vm.into_handler();
    let names: Vec<&str> = handler.seen.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["inner", "outer"]);
}

/// Swallows effects without resuming.
struct NeverResumes;

impl EffectHandler for NeverResumes {
    fn handle(&mut self, _name: &str, _args: &[Value], _k: Continuation) -> Result<(), HostError> {
        Ok(())
    }
}

#[test]
fn missing_resume_is_fatal() {
    let program = program("(effect ask)");
    let mut vm = Vm::with_handler(&program, NeverResumes);
    let err = vm.run(Value::Null).unwrap_err();
    assert!(matches!(err, RunError::Runtime { .. }));
    assert!(err.to_string().contains("'ask' was not resumed"), "{err}");
}

/// Fails with a host error instead of resuming.
struct Refuses;

impl EffectHandler for Refuses {
    fn handle(&mut self, _name: &str, _args: &[Value], _k: Continuation) -> Result<(), HostError> {
        Err("host declined".into())
    }
}

#[test]
fn host_errors_propagate_unchanged() {
    let program = program("(effect ask)");
    let mut vm = Vm::with_handler(&program, Refuses);
    let err = vm.run(Value::Null).unwrap_err();
    let RunError::Host(host) = err else {
        panic!("expected a host error, got {err}");
    };
    assert_eq!(host.to_string(), "host declined");
}

#[test]
fn default_handler_prints_to_the_writer() {
    let program = program("print: \"hello\" 42\nprint: (+ 1 2)\nnull");
    let out = CollectStringPrint::new();
    let mut vm = Vm::with_handler(&program, DefaultHandler::new(out.clone()));
    let result = vm.run(Value::Null).unwrap();
    assert!(result.equal(&Value::Null));
    assert_eq!(out.contents(), "hello 42\n3\n");
}

#[test]
fn debug_effect_uses_repr() {
    let program = program("debug: \"x\" null");
    let out = CollectStringPrint::new();
    let mut vm = Vm::with_handler(&program, DefaultHandler::new(out.clone()));
    vm.run(Value::Null).unwrap();
    assert_eq!(out.contents(), "debug: \"x\" null\n");
}

#[test]
fn default_handler_rejects_unknown_effects() {
    let program = program("(effect launch)");
    let out = CollectStringPrint::new();
    let mut vm = Vm::with_handler(&program, DefaultHandler::new(out));
    let err = vm.run(Value::Null).unwrap_err();
    assert!(err.to_string().contains("no handler for effect 'launch'"), "{err}");
}

#[test]
fn effect_value_flows_back_into_the_program() {
    let program = program("let: a (effect ask)\nlet: b (effect ask)\n(+ a b)");
    let mut vm = Vm::with_handler(&program, Recording::new(21.0));
    let result = vm.run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(42.0)));
}

/// Services `ask` by running a second program in a nested VM.
struct Reentrant<'p> {
    inner: &'p Program,
}

impl EffectHandler for Reentrant<'_> {
    fn handle(&mut self, name: &str, _args: &[Value], k: Continuation) -> Result<(), HostError> {
        assert_eq!(name, "ask");
        let mut vm = Vm::with_handler(self.inner, Recording::new(20.0));
        let value = vm.run(Value::Null).map_err(|err| -> HostError { err.to_string().into() })?;
        k.resume(value);
        Ok(())
    }
}

#[test]
fn handlers_may_run_nested_vms() {
    let inner = program("(+ (effect ask) 1)");
    let outer = program("(+ (effect ask) 1)");
    let mut vm = Vm::with_handler(&outer, Reentrant { inner: &inner });
    let result = vm.run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(22.0)));
}
