use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config as EditorConfig, Editor};
use simplelog::{Config as LogConfig, LevelFilter, SimpleLogger};

mod input;
mod lang;
mod repl;

use input::{fixup_input, strip_comments, ReplHelper};
use lang::eval::{Config, DEFAULT_MAX_DEPTH, DEFAULT_MAX_HEAP, DEFAULT_MAX_SLOTS};
use lang::runtime::Runtime;
use repl::MetaCommand;

const HISTORY_FILE: &str = ".tally_history";
const PROMPT: &str = "(tally) ";

#[derive(Parser)]
#[command(version, about)]
struct Opt {
    /// Show debug output
    #[arg(short, long)]
    debug: bool,
    /// Deepest allowed nesting of function calls
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    /// Most variables a single call frame may hold
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_SLOTS)]
    max_slots: usize,
    /// Most heap cells that may be live at once
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_HEAP)]
    max_heap: usize,
    /// Restore functions and globals from FILE before running
    #[arg(long, value_name = "FILE")]
    load: Option<PathBuf>,
    /// Save functions and globals to FILE on exit
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,
    /// Run SCRIPT and exit instead of starting the REPL
    script: Option<PathBuf>,
}

fn init_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Error
    };

    match SimpleLogger::init(filter, LogConfig::default()) {
        Ok(_) => Ok(()),
        Err(e) => bail!("Failed to init logger: {}", e),
    }
}

fn init_editor() -> Result<Editor<ReplHelper, DefaultHistory>> {
    let config = EditorConfig::builder().auto_add_history(true).build();
    let mut editor = Editor::with_config(config)?;
    editor.set_helper(Some(ReplHelper::new()));

    Ok(editor)
}

fn init_history(editor: &mut Editor<ReplHelper, DefaultHistory>) {
    let _ = editor.load_history(HISTORY_FILE);
}

fn save_history(editor: &mut Editor<ReplHelper, DefaultHistory>) -> Result<()> {
    match editor.save_history(HISTORY_FILE) {
        Ok(_) => Ok(()),
        Err(e) => bail!("Failed to save history: {}", e),
    }
}

fn welcome() {
    println!("tally v{}", env!("CARGO_PKG_VERSION"));
    println!("Type ':help' for help");
    println!();
}

fn report(errors: &[lang::error::Error]) {
    for e in errors {
        eprintln!("{}", e);
    }
}

fn run_script(rt: &mut Runtime<'_>, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;

    let errors = rt.eval(&strip_comments(&text));
    report(&errors);
    if !errors.is_empty() {
        bail!("{} statement(s) failed", errors.len());
    }

    Ok(())
}

fn run_repl(rt: &mut Runtime<'_>) -> Result<()> {
    let mut editor = init_editor()?;
    init_history(&mut editor);
    welcome();

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                info!("read: {}", &line);
                if strip_comments(&line).trim().is_empty() {
                    continue;
                }

                match MetaCommand::parse(&line) {
                    Ok(Some(cmd)) => match repl::run(&cmd, rt, &mut io::stdout()) {
                        Ok(true) => (),
                        Ok(false) => break,
                        Err(e) => eprintln!("{}", e),
                    },
                    Ok(None) => report(&rt.eval(&fixup_input(&line))),
                    Err(e) => eprintln!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("Press Ctrl-D or type 'quit' to quit");
            }
            Err(ReadlineError::Eof) => {
                println!("quit");
                break;
            }
            Err(e) => {
                error!("Unexpected error: {}", e);
                println!("quit");
                break;
            }
        }
    }

    save_history(&mut editor)
}

fn main() -> Result<()> {
    let opts = Opt::parse();
    init_logging(opts.debug)?;

    let config = Config {
        max_depth: opts.max_depth,
        max_slots: opts.max_slots,
        max_heap: opts.max_heap,
    };
    let mut stdout = io::stdout();
    let mut rt = Runtime::new(&mut stdout, opts.script.is_none(), &config);

    if let Some(path) = &opts.load {
        rt.load_file(path)
            .with_context(|| format!("Failed to load state from {}", path.display()))?;
    }

    let result = match &opts.script {
        Some(path) => run_script(&mut rt, path),
        None => run_repl(&mut rt),
    };

    if let Some(path) = &opts.save {
        rt.save_file(path)
            .with_context(|| format!("Failed to save state to {}", path.display()))?;
    }

    result
}
