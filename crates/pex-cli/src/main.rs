use std::{env, fs, process::ExitCode, time::Instant};

use pex::{CompileOptions, Program, Value, Vm};

const USAGE: &str = "usage: pex [--shell] [--debug] [--emit-bytecode <out>] <file.pex|file.pexc> [input]

  --shell               inject $$ into the last expression when it has no source reference
  --debug               include debug info when compiling
  --emit-bytecode OUT   write the compiled container to OUT instead of running
  input                 JSON document bound to $$ (plain text is taken as a string)";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut shell_mode = false;
    let mut debug = false;
    let mut emit_bytecode: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--shell" => shell_mode = true,
            "--debug" => debug = true,
            "--emit-bytecode" => match iter.next() {
                Some(path) => emit_bytecode = Some(path),
                None => {
                    eprintln!("error: --emit-bytecode needs a path\n{USAGE}");
                    return ExitCode::FAILURE;
                }
            },
            "--help" | "-h" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            _ => positional.push(arg),
        }
    }

    let Some(file_path) = positional.first() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let bytes = if file_path.ends_with(".pexc") {
        match fs::read(file_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("error reading {file_path}: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        let source = match fs::read_to_string(file_path) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("error reading {file_path}: {err}");
                return ExitCode::FAILURE;
            }
        };
        let options = CompileOptions { debug, shell_mode };
        match pex::compile_source(&source, &options) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
    };

    if let Some(out_path) = emit_bytecode {
        return match fs::write(&out_path, &bytes) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error writing {out_path}: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let program = match Program::load(&bytes) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let input = match positional.get(1) {
        Some(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => Value::from_json(&json),
            // convenient for `pex prog.pex hello`: plain text is a string
            Err(_) => Value::str(text),
        },
        None => Value::Null,
    };

    let start = Instant::now();
    let mut vm = Vm::new(&program);
    match vm.run(input) {
        Ok(value) => {
            let elapsed = start.elapsed();
            eprintln!("finished in {elapsed:?}");
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}
