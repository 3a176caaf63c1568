//! execstream - Run processes and stream their output, lines and ANSI styles.

mod display;

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::stream::{self, StreamExt};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use execstream::ansi::{Ansi, StyledText};
use execstream::config::{ConfigLoader, ExecConfig, OutputFormat};
use execstream::exec::{LaunchMode, Priority, ProcessDescriptor, ProcessSignal, TerminationReason};
use execstream::stream::{OutputStream, StreamError, StreamResult, READ_CHUNK_SIZE};
use execstream::supervisor::{Supervisor, SupervisorError};

#[derive(Parser)]
#[command(
    name = "execstream",
    about = "Run processes and stream their output, lines and ANSI styles",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a process and stream its output line by line.
    Run(RunArgs),
    /// Decode ANSI styled text from a file or stdin.
    Decode {
        /// File to decode. Reads stdin when omitted.
        file: Option<PathBuf>,
        /// Print clean text and style ranges as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Run inside a pseudo-terminal.
    #[arg(long)]
    pty: bool,
    /// Config file to use instead of the search paths.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Remove escape sequences from the output.
    #[arg(long, conflicts_with = "ranges")]
    strip: bool,
    /// Print each line as JSON with clean text and style ranges.
    #[arg(long)]
    ranges: bool,
    /// Forward this process's stdin to the child.
    #[arg(long)]
    stdin: bool,
    /// Working directory for the child.
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Environment variable for the child (KEY=VALUE). Replaces the inherited
    /// environment when given.
    #[arg(long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,
    /// Priority class for the worker threads.
    #[arg(long)]
    priority: Option<Priority>,
    /// Program and arguments.
    #[arg(last = true)]
    command: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Commands::Run(args) => match run(args).await {
            Ok(code) => code,
            Err(message) => {
                display::print_error(&message);
                1
            }
        },
        Commands::Decode { file, json } => match decode(file, json) {
            Ok(()) => 0,
            Err(message) => {
                display::print_error(&message);
                1
            }
        },
    };
    std::process::exit(code);
}

/// Merge command-line options over the loaded profile.
fn build_config(args: &RunArgs) -> Result<ExecConfig, String> {
    let loader = args
        .config
        .clone()
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = loader.load().map_err(|e| e.to_string())?;

    if args.pty {
        config.mode = LaunchMode::Pty;
    }
    if args.strip {
        config.output = OutputFormat::Strip;
    } else if args.ranges {
        config.output = OutputFormat::Ranges;
    }

    let mut descriptor = match args.command.split_first() {
        Some((path, rest)) => ProcessDescriptor::new(path).args(rest.iter().cloned()),
        None => config
            .process
            .take()
            .ok_or("no command given and the config has no [process] table")?,
    };
    if let Some(cwd) = &args.cwd {
        descriptor = descriptor.cwd(cwd);
    }
    for (key, value) in &args.env {
        descriptor = descriptor.env_var(key, value);
    }
    if let Some(priority) = args.priority {
        descriptor = descriptor.priority(priority);
    }
    config.process = Some(descriptor);
    Ok(config)
}

async fn run(args: RunArgs) -> Result<i32, String> {
    let config = build_config(&args)?;
    let mut supervisor = Supervisor::from_config(&config).map_err(|e| e.to_string())?;

    if args.stdin {
        supervisor
            .attach_fallible_input(stdin_chunks())
            .map_err(|e| e.to_string())?;
    }
    supervisor
        .attach_signals(interrupts())
        .map_err(|e| e.to_string())?;

    let mut printers = vec![tokio::spawn(drain(
        output(&supervisor, config.output, false).map_err(|e| e.to_string())?,
        display::print_line,
    ))];
    if config.mode == LaunchMode::Direct {
        let stderr = output(&supervisor, config.output, true).map_err(|e| e.to_string())?;
        printers.push(tokio::spawn(drain(stderr, |line| eprintln!("{line}"))));
    }

    let pid = supervisor.launch().map_err(|e| e.to_string())?;
    display::print_launch(supervisor.descriptor(), pid, config.mode);

    let event = supervisor.wait().await.map_err(|e| e.to_string())?;
    for printer in printers {
        let _ = printer.await;
    }
    if let Err(e) = supervisor.input_finished().await {
        tracing::warn!(error = %e, "Input forwarding stopped early");
    }
    display::print_termination(&event);

    Ok(match event.reason {
        TerminationReason::Exited if event.status < 0 => 1,
        TerminationReason::Exited | TerminationReason::Signaled => event.status,
    })
}

/// Child output rendered as text lines in the chosen format.
fn output(
    supervisor: &Supervisor,
    format: OutputFormat,
    stderr: bool,
) -> Result<OutputStream<String>, SupervisorError> {
    Ok(match format {
        OutputFormat::Raw if stderr => supervisor.lines_err()?,
        OutputFormat::Raw => supervisor.lines_out(),
        OutputFormat::Strip => {
            let lines = if stderr {
                supervisor.lines_err()?
            } else {
                supervisor.lines_out()
            };
            lines.map(|line| line.map(|l| Ansi::strip(&l))).boxed()
        }
        OutputFormat::Ranges => {
            let styled = if stderr {
                supervisor.styled_err(Ansi::new())?
            } else {
                supervisor.styled_out(Ansi::new())
            };
            styled.map(json_line).boxed()
        }
    })
}

fn json_line(item: StreamResult<StyledText>) -> StreamResult<String> {
    serde_json::to_string(&item?).map_err(|e| StreamError::Encode(e.to_string()))
}

async fn drain(mut lines: OutputStream<String>, print: impl Fn(&str)) {
    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => print(&line),
            Err(e) => display::print_error(&e.to_string()),
        }
    }
}

/// Ctrl-C presses, as interrupt requests for the child.
fn interrupts() -> impl futures_core::Stream<Item = ProcessSignal> + Send + 'static {
    stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok()?;
        display::print_signal(ProcessSignal::Interrupt);
        Some((ProcessSignal::Interrupt, ()))
    })
}

/// This process's stdin, in chunks.
fn stdin_chunks() -> impl futures_core::Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    stream::unfold(Some(tokio::io::stdin()), |stdin| async move {
        let mut stdin = stdin?;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        match stdin.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(stdin)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

fn decode(file: Option<PathBuf>, json: bool) -> Result<(), String> {
    let raw = match &file {
        Some(path) => {
            std::fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|e| format!("Failed to read stdin: {e}"))?;
            buf
        }
    };

    let text = String::from_utf8_lossy(&raw);
    let decoded = Ansi::new().decode(&text, &[]);
    if json {
        let rendered = serde_json::to_string_pretty(&decoded).map_err(|e| e.to_string())?;
        display::print_line(&rendered);
    } else {
        print!("{}", decoded.text);
    }
    Ok(())
}
