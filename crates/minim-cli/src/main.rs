use std::{env, fs, path::Path, process::ExitCode};

use minim::{shared, Feed, Machine, ReplSession, StdPrint};
use rustyline::{error::ReadlineError, DefaultEditor};

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let debug = args.iter().any(|a| a == "-debug");
    let safe = args.iter().any(|a| a == "-safe");
    let file = args.iter().skip(1).find(|a| Path::new(a).is_file());

    match file {
        Some(path) => run_file(path, debug, safe, &args),
        None => run_repl(debug, safe, &args),
    }
}

fn run_file(path: &str, debug: bool, safe: bool, args: &[String]) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut machine = match Machine::new(&source) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    machine.set_safe_mode(safe);
    machine.set_host_args(args.to_vec());
    if debug {
        eprint!("{}", machine.dump_actions());
    }
    match machine.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !err.already_reported() {
                eprintln!("{err}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run_repl(debug: bool, safe: bool, args: &[String]) -> ExitCode {
    let mut session = match ReplSession::new(shared(StdPrint)) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    session.machine_mut().set_safe_mode(safe);
    session.machine_mut().set_host_args(args.to_vec());
    println!(
        "[Minim v{version} on {os}]",
        version = env!("CARGO_PKG_VERSION"),
        os = env::consts::OS
    );

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("cannot start line editor: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut prompt = "?>> ";
    loop {
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("read error: {err}");
                return ExitCode::FAILURE;
            }
        };
        let _ = editor.add_history_entry(&line);
        match session.feed(&line) {
            Feed::More => prompt = " >> ",
            Feed::Ready(sources) => {
                prompt = "?>> ";
                for source in sources {
                    match session.execute(&source) {
                        Ok(Some(echo)) => println!("{echo}"),
                        Ok(None) => {}
                        // runtime diagnostics are already printed; lexical
                        // failures are not, and the session survives both
                        Err(err) => {
                            if !err.already_reported() {
                                eprintln!("{err}");
                            }
                        }
                    }
                    if debug {
                        eprint!("{}", session.machine_mut().dump_actions());
                    }
                }
            }
        }
    }
}
