//! A commandline tool for compressing ttf format files to woff2.

use std::process::ExitCode;

use woffle::{compress_woff2, Woff2Params};

const APPLICATION: &str = "woffle-compress";
const HELPSTRING: &str = "Compresses a TrueType/OpenType font to WOFF2.";
const USAGESTRING: &str = "Usage: woffle-compress <font.ttf>";

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let (argument, extra) = (args.next(), args.next());
    let argument = match (argument, extra) {
        (Some(argument), None) => argument,
        _ => {
            eprintln!("Please include a single file argument with your command.");
            eprintln!("{USAGESTRING}");
            return ExitCode::FAILURE;
        }
    };

    match argument.as_str() {
        "--help" | "-h" => {
            println!("{APPLICATION}");
            println!("{HELPSTRING}");
            println!();
            println!("{USAGESTRING}");
            return ExitCode::SUCCESS;
        }
        "--usage" => {
            println!("{USAGESTRING}");
            return ExitCode::SUCCESS;
        }
        "--version" | "-v" => {
            println!("{APPLICATION} {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let outfilename = match argument.rfind('.') {
        Some(dot) => format!("{}.woff2", &argument[..dot]),
        None => format!("{argument}.woff2"),
    };
    println!("Processing {argument} => {outfilename}");

    let input = match std::fs::read(&argument) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("Failed to read {argument}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let output = match compress_woff2(&input, &Woff2Params::default()) {
        Ok(output) => output,
        Err(err) => {
            eprintln!("Compression failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = std::fs::write(&outfilename, output) {
        eprintln!("Failed to write {outfilename}: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
