//! A very simple commandline tool for decompressing woff2 format files to
//! true type font files.

use std::process::ExitCode;

use woffle::{compute_woff2_final_size, convert_woff2_to_ttf, Woff2VecOut, DEFAULT_MAX_SIZE};

const APPLICATION: &str = "woffle-decompress";
const HELPSTRING: &str = "Decompresses a WOFF2 font back to TrueType/OpenType.";
const USAGESTRING: &str = "Usage: woffle-decompress <font.woff2>";

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
        Some(dot) => format!("{}.ttf", &argument[..dot]),
        None => format!("{argument}.ttf"),
    };

    let input = match std::fs::read(&argument) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("Failed to read {argument}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let final_size = compute_woff2_final_size(&input).min(DEFAULT_MAX_SIZE);
    let mut output: Vec<u8> = Vec::with_capacity(final_size);
    let mut out = Woff2VecOut::new(&mut output, DEFAULT_MAX_SIZE);
    if let Err(err) = convert_woff2_to_ttf(&input, &mut out) {
        eprintln!("Decompression failed: {err}");
        return ExitCode::FAILURE;
    }

    if let Err(err) = std::fs::write(&outfilename, output) {
        eprintln!("Failed to write {outfilename}: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
