//! Interactive REPL and source-file driver.
//!
//! With file arguments, each file is evaluated in order in one global
//! environment and the process exits (non-zero on the first error). This is
//! the mode the Scheme test harness drives. Without arguments it reads
//! expressions interactively.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use schemexp::ast::Value;
use schemexp::builtinops::create_global_env;
use schemexp::env::{self, Env, Namespace};
use schemexp::evaluator::eval;
use schemexp::scheme::parse_program;
use std::panic;
use std::process;

fn main() {
    let files: Vec<String> = std::env::args().skip(1).collect();
    if !files.is_empty() {
        process::exit(run_files(&files));
    }

    let result = panic::catch_unwind(run_repl);

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Evaluate each file in order; report the first failure.
fn run_files(files: &[String]) -> i32 {
    let env = create_global_env();
    for path in files {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{path}: {e}");
                return 1;
            }
        };
        let forms = match parse_program(&source) {
            Ok(forms) => forms,
            Err(e) => {
                eprintln!("{path}: {e}");
                return 1;
            }
        };
        for form in forms {
            if let Err(e) = eval(&env, &form) {
                eprintln!("{path}: {e}");
                return 1;
            }
        }
    }
    0
}

fn run_repl() {
    println!("SchemeXP interpreter");
    println!("Enter expressions like: (+ 1 2), (call/cc (lambda (k) (k 42)))");
    println!("Type :help for commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let env = create_global_env();

    loop {
        match rl.readline("schemexp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match eval_line(&env, line) {
                    Ok(result) => {
                        // Don't print the unspecified value (e.g. from define)
                        let text = format!("{result}");
                        if !text.is_empty() {
                            println!("{text}");
                        }
                    }
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// A line may hold several forms; the last value wins, aliases are resolved
/// for printing.
fn eval_line(env: &Env, line: &str) -> Result<Value, schemexp::Error> {
    let mut last = Value::unspecified();
    for form in parse_program(line)? {
        last = eval(env, &form)?;
    }
    env::deref_deep(&last)
}

fn print_help() {
    println!("SchemeXP interpreter:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Supported forms:");
    println!("  Literals: 42, -1/2, 2.5, 3.0+2.0i, #t, #\\a, \"text\", #(1 2), #hash((a . 1))");
    println!("  Binding: define, set!, let, let*, letrec, named let");
    println!("  Control: if, cond, and, or, begin, apply, eval");
    println!("  Functions: lambda with fixed, rest and dotted parameter lists");
    println!("  Continuations: call/cc, call-with-current-continuation");
    println!("  Macros: define-macro");
    println!();
    println!("Examples:");
    println!("  (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))");
    println!("  (let loop ((n 100000) (a 0)) (if (= n 0) a (loop (- n 1) (+ a 1))))");
    println!("  (+ 1 (call/cc (lambda (k) (k 10))))");
    println!();
}

fn print_environment(env: &Env) {
    let bindings = env.all_bindings(Namespace::Var);

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in procedures from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::PrimFn { .. } | Value::IoFn { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in procedures ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<18}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            let shown = env::deref_deep(&value).unwrap_or(value);
            println!("  {name} = {shown}");
        }
    }
}
