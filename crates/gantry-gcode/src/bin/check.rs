use gantry_gcode::{ParserConfig, parse_program};
use std::{env, fs, process};

fn main() {
    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: check <file> [<file>...]");
        process::exit(1);
    }

    let config = ParserConfig::default();
    let mut failed = 0usize;
    for path in &paths {
        let input = match fs::read_to_string(path) {
            Ok(input) => input,
            Err(err) => {
                eprintln!("{path}: read error: {err}");
                failed += 1;
                continue;
            }
        };

        match parse_program(&input, &config) {
            Ok(blocks) => println!("OK {path} ({} lines)", blocks.len()),
            Err(err) => {
                println!("ERR {path}: {err} (error:{})", err.status.code());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        process::exit(1);
    }
}
