mod repl;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln::{CompilationResult, Interpreter, InvocationOptions, Value};
use repl::Repl;

const LOG_ENV: &str = "KILN_LOG";

/// What the prompt loop should do after a dot command.
enum Command {
    Quit,
    Handled,
    NotACommand,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let opts = InvocationOptions::parse();
    let interp = match Interpreter::with_minic(opts.clone()) {
        Ok(interp) => interp,
        Err(e) => {
            eprintln!("kiln: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for path in &opts.inputs {
        match interp.load_file(path) {
            Ok(CompilationResult::Success) => {}
            Ok(_) => {
                report_diagnostics(&interp);
                if opts.error_out {
                    return ExitCode::FAILURE;
                }
            }
            Err(e) => {
                eprintln!("kiln: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if !opts.exprs.is_empty() {
        let mut status = ExitCode::SUCCESS;
        for expr in &opts.exprs {
            let (result, value) = interp.process(expr);
            report(&interp, result, value);
            if result != CompilationResult::Success {
                status = ExitCode::FAILURE;
            }
        }
        return status;
    }

    if !opts.no_logo {
        println!("kiln {}", env!("CARGO_PKG_VERSION"));
        println!("Type .q to quit");
        println!();
    }
    run_prompt(&interp, opts.error_out)
}

fn run_prompt(interp: &Interpreter, error_out: bool) -> ExitCode {
    let mut repl = match Repl::new() {
        Ok(repl) => repl,
        Err(e) => {
            eprintln!("kiln: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut continuing = false;
    let mut status = ExitCode::SUCCESS;
    loop {
        let prompt = if continuing { "kiln... " } else { "kiln> " };
        let Some(line) = repl.read_line(prompt) else {
            break;
        };
        if !continuing {
            match dot_command(interp, line.trim()) {
                Command::Quit => break,
                Command::Handled => {
                    repl.add_history(&line);
                    continue;
                }
                Command::NotACommand => {}
            }
        }
        if !line.trim().is_empty() {
            repl.add_history(&line);
        }
        let (result, value) = interp.process(&line);
        continuing = result == CompilationResult::MoreInputExpected;
        report(interp, result, value);
        if result == CompilationResult::Failure && error_out {
            status = ExitCode::FAILURE;
            break;
        }
    }
    repl.finalize();
    status
}

fn dot_command(interp: &Interpreter, line: &str) -> Command {
    let Some(command) = line.strip_prefix('.') else {
        return Command::NotACommand;
    };
    let mut words = command.split_whitespace();
    match words.next() {
        Some("q") => Command::Quit,
        Some("undo") => {
            let n = words.next().and_then(|w| w.parse().ok()).unwrap_or(1);
            let done = interp.unload(n);
            if done < n {
                eprintln!("unloaded {} of {} transactions", done, n);
            }
            Command::Handled
        }
        Some("transactions") => {
            let mut out = String::new();
            if interp.print_transaction_structure(&mut out).is_ok() {
                print!("{}", out);
            }
            Command::Handled
        }
        _ => Command::NotACommand,
    }
}

fn report(interp: &Interpreter, result: CompilationResult, value: Value) {
    report_diagnostics(interp);
    if result == CompilationResult::Success {
        if let Value::Int(_) = value {
            println!("{}", value);
        }
    }
}

fn report_diagnostics(interp: &Interpreter) {
    for diag in interp.take_diagnostics() {
        eprintln!("{}", diag);
    }
}
