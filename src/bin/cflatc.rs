//! the main compiler binary. takes a source file (or standard input) and an
//! optional output stage.
//!
//! run with `--help` for more info.

use std::io::{self, Read};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use cflat::back::{generate, Assembly};
use cflat::front::lex::Lexer;
use cflat::front::parse;
use cflat::middle::{check, Diagnostic};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file; standard input when omitted
    file: Option<String>,
    /// the output stage
    #[arg(value_enum, short, long, default_value_t = Output::Asm)]
    out: Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure, pretty-printed
    Ast,
    /// the resulting assembly code
    Asm,
}

fn report(class: &str, d: &Diagnostic) {
    eprintln!("line {}: {class}: {}", d.line, d.kind);
    eprintln!("\t{}", d.snippet);
}

fn compile(input: &str) -> Result<Assembly, ()> {
    let mut program = parse(input).map_err(|e| eprintln!("{e}"))?;
    let mut warn = |d: Diagnostic| report("warning", &d);
    check(&mut program, &mut warn).map_err(|d| report("error", &d))?;
    Ok(generate(&program))
}

fn main() -> ExitCode {
    use Output::*;
    let args = Args::parse();

    let input = match &args.file {
        Some(path) => {
            std::fs::read_to_string(path).expect("input file should be readable utf8")
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .expect("standard input should be readable utf8");
            buf
        }
    };

    match args.out {
        Tokens => {
            let mut lexer = Lexer::new(&input);
            loop {
                match lexer.next() {
                    Ok(Some(token)) => println!("{token}"),
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("{e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
        }
        Ast => match parse(&input) {
            Ok(program) => print!("{program}"),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        Asm => match compile(&input) {
            Ok(assembly) => print!("{}", assembly.asm_code()),
            Err(()) => return ExitCode::FAILURE,
        },
    }
    ExitCode::SUCCESS
}
