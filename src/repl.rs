use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::lang::opcodes::{command, opcode, OPCODES};
use crate::lang::runtime::Runtime;

/// Commands the REPL handles itself instead of passing to the interpreter
#[derive(Debug, PartialEq)]
pub enum MetaCommand {
    Help,
    Quit,
    Save(PathBuf),
    Load(PathBuf),
    /// List every opcode, or look up one by name or code
    Opcodes(Option<String>),
    Heap,
    Functions,
}

impl MetaCommand {
    /// Recognize `line` as a meta command
    ///
    /// `Ok(None)` means the line is a program for the interpreter.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim().trim_end_matches(';').trim_end();
        if line == "quit" || line == "exit" {
            return Ok(Some(MetaCommand::Quit));
        }
        if !line.starts_with(':') {
            return Ok(None);
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let cmd = match words.as_slice() {
            [":help"] => MetaCommand::Help,
            [":quit"] | [":q"] => MetaCommand::Quit,
            [":save", file] => MetaCommand::Save(PathBuf::from(*file)),
            [":load", file] => MetaCommand::Load(PathBuf::from(*file)),
            [":save"] | [":load"] => bail!("{} needs a file name", line),
            [":opcodes"] => MetaCommand::Opcodes(None),
            [":opcodes", key] => MetaCommand::Opcodes(Some(key.to_string())),
            [":heap"] => MetaCommand::Heap,
            [":functions"] => MetaCommand::Functions,
            _ => bail!("Unknown command '{}', try :help", line),
        };

        Ok(Some(cmd))
    }
}

fn print_help(out: &mut dyn Write) -> Result<()> {
    let mut s = String::new();

    s += ":help\t\t\tPrint help\n";
    s += ":quit\t\t\tExit (also 'quit' or 'exit')\n";
    s += ":save <file>\t\tWrite functions and globals to <file>\n";
    s += ":load <file>\t\tRestore functions and globals from <file>\n";
    s += ":opcodes [name|code]\tList opcodes, or look one up\n";
    s += ":heap\t\t\tList live heap allocations\n";
    s += ":functions\t\tList defined functions\n";

    write!(out, "{}", s)?;
    Ok(())
}

fn print_opcodes(key: Option<&str>, out: &mut dyn Write) -> Result<()> {
    let key = match key {
        Some(k) => k,
        None => {
            for (name, code) in OPCODES.iter() {
                writeln!(out, "{:#04x}\t{}", code, name)?;
            }
            return Ok(());
        }
    };

    let code = if let Some(hex) = key.strip_prefix("0x") {
        u8::from_str_radix(hex, 16).ok()
    } else {
        key.parse::<u8>().ok()
    };
    let found = match code {
        Some(c) => command(c).map(|name| (name, c)),
        None => opcode(key).and_then(|c| command(c).map(|name| (name, c))),
    };

    match found {
        Some((name, c)) => writeln!(out, "{:#04x}\t{}", c, name)?,
        None => bail!("No opcode matches '{}'", key),
    }

    Ok(())
}

/// Run `cmd` against `rt`, writing any report to `out`
///
/// Returns `false` once the REPL should stop.
pub fn run(cmd: &MetaCommand, rt: &mut Runtime<'_>, out: &mut dyn Write) -> Result<bool> {
    match cmd {
        MetaCommand::Help => print_help(out)?,
        MetaCommand::Quit => return Ok(false),
        MetaCommand::Save(path) => rt.save_file(path)?,
        MetaCommand::Load(path) => rt.load_file(path)?,
        MetaCommand::Opcodes(key) => print_opcodes(key.as_deref(), out)?,
        MetaCommand::Heap => {
            let heap = rt.interpreter().heap();
            writeln!(out, "{} live allocation(s)", heap.len())?;
            for handle in heap.handles() {
                if let Some(refs) = heap.ref_count(handle) {
                    writeln!(out, "{:#x}\trefs={}", handle, refs)?;
                }
            }
        }
        MetaCommand::Functions => {
            let functions = rt.interpreter().functions();
            writeln!(out, "{} function(s)", functions.len())?;
            for func in functions.iter() {
                let params: Vec<String> = func.params.iter().map(|p| p.to_string()).collect();
                writeln!(out, "{}({})", func.name, params.join(", "))?;
            }
        }
    }

    Ok(true)
}

#[test]
fn test_parse_meta() {
    let data = vec![
        ("quit", Some(MetaCommand::Quit)),
        ("  exit;", Some(MetaCommand::Quit)),
        (":q", Some(MetaCommand::Quit)),
        (":help", Some(MetaCommand::Help)),
        (":save out.tally", Some(MetaCommand::Save(PathBuf::from("out.tally")))),
        (":load in.tally", Some(MetaCommand::Load(PathBuf::from("in.tally")))),
        (":opcodes", Some(MetaCommand::Opcodes(None))),
        (":opcodes 0x20", Some(MetaCommand::Opcodes(Some("0x20".to_string())))),
        (":heap", Some(MetaCommand::Heap)),
        (":functions", Some(MetaCommand::Functions)),
        ("PRINT 1;", None),
        ("quit 1", None),
    ];

    for (input, expected) in data {
        assert_eq!(MetaCommand::parse(input).expect("Failed to parse"), expected);
    }

    assert!(MetaCommand::parse(":save").is_err());
    assert!(MetaCommand::parse(":heap now").is_err());
    assert!(MetaCommand::parse(":frobnicate").is_err());
}

#[cfg(test)]
fn run_to_string(cmd: &MetaCommand, rt: &mut Runtime<'_>) -> String {
    let mut out = Vec::new();
    assert!(run(cmd, rt, &mut out).expect("Failed to run"));
    String::from_utf8(out).expect("Output not utf-8")
}

#[test]
fn test_run_meta() {
    use crate::lang::eval::Config;
    use crate::lang::heap::HEAP_BASE;

    let mut sink = Vec::new();
    let mut rt = Runtime::new(&mut sink, true, &Config::default());
    assert!(rt
        .eval("FUNC add2 a b { ADD a b s; RETURN s; END FUNC nop { END MALLOC 4 p; MALLOC 1 q; RETAIN q;")
        .is_empty());

    let heap = run_to_string(&MetaCommand::Heap, &mut rt);
    assert_eq!(
        heap,
        format!(
            "2 live allocation(s)\n{:#x}\trefs=1\n{:#x}\trefs=2\n",
            HEAP_BASE,
            HEAP_BASE + 4
        )
    );

    let functions = run_to_string(&MetaCommand::Functions, &mut rt);
    assert_eq!(functions, "2 function(s)\nadd2(a, b)\nnop()\n");

    let opcodes = run_to_string(&MetaCommand::Opcodes(None), &mut rt);
    assert_eq!(opcodes.lines().count(), OPCODES.len());
    assert!(opcodes.starts_with("0x10\tLET\n"));

    for key in &["ADD", "0x20", "32"] {
        let found = run_to_string(&MetaCommand::Opcodes(Some(key.to_string())), &mut rt);
        assert_eq!(found, "0x20\tADD\n");
    }
    assert!(run(
        &MetaCommand::Opcodes(Some("JUMP".to_string())),
        &mut rt,
        &mut Vec::new()
    )
    .is_err());

    assert!(!run(&MetaCommand::Quit, &mut rt, &mut Vec::new()).expect("Failed to run"));
}
