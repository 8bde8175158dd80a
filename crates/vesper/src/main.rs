use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use vesper_core::capabilities::builtin_registry;
use vesper_core::config::SessionConfig;
use vesper_core::target::SnapshotTarget;
use vesper_core::{Capability, Registry, Session};
use vesper_utils::{info, init_logging, init_logging_with_level, load_config, LogFormat, LogLevel, LoggingGuard};

const PROMPT: &str = "vesper> ";

/// Process-aware debugging of multi-process kernel-mode targets.
#[derive(Parser, Debug)]
#[command(name = "vesper")]
#[command(version)]
#[command(about = "Process-aware debugging of multi-process kernel-mode targets", long_about = None)]
struct Cli
{
    /// Recorded target to debug (JSON snapshot)
    #[arg(long, value_name = "FILE")]
    snapshot: PathBuf,

    /// Configuration file (default: $VESPER_CONFIG, then ~/.vesper/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level; overrides RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Log format (pretty or json)
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Interactive command loop
    Repl,
    /// Run command lines in order, stopping at the first failure
    Run
    {
        /// Command lines, e.g. "regs" "dis eip 32"
        #[arg(required = true)]
        lines: Vec<String>,
    },
    /// List registered commands with their dependencies
    Capabilities,
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match start_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let (registry, mut session) = match open_session(&cli.snapshot, cli.config.as_deref()) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Repl => repl(&registry, &mut session),
        Commands::Run { lines } => run_lines(&registry, &mut session, &lines),
        Commands::Capabilities => {
            list_capabilities(&registry);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn start_logging(cli: &Cli) -> Result<LoggingGuard, vesper_utils::LoggingError>
{
    match cli.log_level {
        Some(level) => init_logging_with_level(level, cli.log_format),
        None => init_logging(),
    }
}

fn open_session(snapshot: &Path, config: Option<&Path>) -> Result<(Registry, Session), Box<dyn Error>>
{
    let (config, source) = load_config::<SessionConfig>(config)?;
    info!(?source, "configuration loaded");

    let target = SnapshotTarget::load(snapshot)?;
    info!(snapshot = %snapshot.display(), stops = target.pending_stops(), "snapshot loaded");

    let registry = builtin_registry()?;
    Ok((registry, Session::new(Box::new(target), config)))
}

/// Execute one command line and print its rendered output.
fn execute(registry: &Registry, session: &mut Session, line: &str) -> vesper_core::Result<()>
{
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(());
    };
    let args: Vec<String> = words.map(str::to_string).collect();

    let output = registry.invoke(session, name, &args)?;
    let rendered = registry.render(name, &output)?;
    if !rendered.is_empty() {
        println!("{}", rendered);
    }
    Ok(())
}

fn run_lines(registry: &Registry, session: &mut Session, lines: &[String]) -> Result<(), Box<dyn Error>>
{
    for line in lines {
        execute(registry, session, line).map_err(|e| format!("{}: {}", line.trim(), e))?;
    }
    Ok(())
}

fn repl(registry: &Registry, session: &mut Session) -> Result<(), Box<dyn Error>>
{
    let mut editor = DefaultEditor::new()?;
    println!("Type a command, `help [command]` or `quit`.");

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;

                match line.split_once(char::is_whitespace).unwrap_or((line, "")) {
                    ("quit" | "exit" | "q", _) => break,
                    ("help", topic) => help(registry, topic.trim()),
                    _ => {
                        // the session survives a failed command
                        if let Err(e) = execute(registry, session, line) {
                            eprintln!("Error: {}", e);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn help(registry: &Registry, topic: &str)
{
    if topic.is_empty() {
        list_capabilities(registry);
        return;
    }
    match registry.resolve(topic) {
        Ok(capability) if capability.usage().is_empty() => println!("{}", topic),
        Ok(capability) => println!("{}", capability.usage()),
        Err(e) => eprintln!("Error: {}", e),
    }
}

fn list_capabilities(registry: &Registry)
{
    let width = registry.capabilities().map(|(name, _)| name.len()).max().unwrap_or(8);
    for (name, dependencies) in registry.capabilities() {
        if dependencies.is_empty() {
            println!("{name}");
        } else {
            println!("{name:width$}  <- {}", dependencies.join(", "));
        }
    }
}
