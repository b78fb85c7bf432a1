use std::{
    fs::File,
    io::{self, StdoutLock, Write},
    path::{Path, PathBuf},
    process::exit,
};

use baritone::{from_c, from_json, to_c, to_json, InvalidSong, PersistError, RecomposeError, Song};
use chrono::prelude::*;
use clap::{crate_name, crate_version, ArgAction, Parser, ValueEnum};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Converts hUGEDriver songs between the driver's C source format and JSON.
#[derive(Debug, Parser)]
#[command(version)]
struct CliArgs {
    /// The song to convert; its format is deduced from the extension (`.json`, `.c`, or `.h`).
    input_path: PathBuf,
    /// Where to write the converted song (default: standard output).
    #[arg(short, long = "output")]
    output_path: Option<PathBuf>,
    /// What to convert to (default: whichever format the input isn't in).
    #[arg(short, long)]
    format: Option<Format>,
    /// Do not begin C output with a comment describing where it came from.
    #[arg(long)]
    no_header: bool,
    /// Log more of what's going on; may be repeated. `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    C,
    Json,
}

impl Format {
    fn of_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::Json),
            "c" | "h" => Some(Self::C),
            _ => None,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::C => Self::Json,
            Self::Json => Self::C,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("Cannot tell the format of \"{}\" (expected a `.json`, `.c`, or `.h` file)", .0.display())]
    UnknownFormat(PathBuf),
    #[error("Failed to read \"{}\": {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to open file \"{}\" for writing: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("Failed to write output: {0}")]
    Write(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] PersistError),
    #[error(transparent)]
    Recompose(#[from] RecomposeError),
    #[error("The song cannot be exported: {0}")]
    Invalid(#[from] InvalidSong),
}

fn main() {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    if let Err(err) = convert(&args) {
        report(&err);
        exit(1);
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

fn convert(args: &CliArgs) -> Result<(), CliError> {
    let input_format = Format::of_path(&args.input_path)
        .ok_or_else(|| CliError::UnknownFormat(args.input_path.clone()))?;
    let output_format = args.format.unwrap_or(input_format.other());
    debug!("Converting {input_format:?} to {output_format:?}");

    let text = std::fs::read_to_string(&args.input_path).map_err(|source| CliError::Read {
        path: args.input_path.clone(),
        source,
    })?;
    let song = match input_format {
        Format::C => from_c(&text)?,
        Format::Json => from_json(&text)?,
    };
    let converted = match output_format {
        Format::C => to_c(&song)?,
        Format::Json => to_json(&song)?,
    };

    // Only open the output once everything else went well, to avoid clobbering it.
    let mut output = Output::new(args.output_path.as_ref())?;
    if output_format == Format::C && !args.no_header {
        write_header(&mut output, &args.input_path, &song)?;
    }
    write!(output, "{converted}")?;
    if !converted.ends_with('\n') {
        writeln!(output)?;
    }
    Ok(())
}

fn write_header(output: &mut Output, input_path: &Path, song: &Song) -> io::Result<()> {
    writeln!(
        output,
        "// Generated from {} on {}",
        input_path.display(),
        Utc::now().trunc_subsecs(0),
    )?;
    writeln!(output, "// Song: {}", commented(&song.name))?;
    writeln!(output, "// Artist: {}", commented(&song.artist))?;
    writeln!(output, "// Comment: {}", commented(&song.comment))?;
    writeln!(
        output,
        "// Generated with {} version {}",
        crate_name!(),
        crate_version!(),
    )?;
    writeln!(output)
}

/// Keeps multi-line text inside the comment.
fn commented(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join("\n//     ")
}

fn report(err: &CliError) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    // If stderr is gone, there's nowhere left to complain to anyway.
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stderr, "error");
    let _ = stderr.reset();
    let _ = writeln!(stderr, ": {err}");
}

#[derive(Debug)]
enum Output {
    File(File),
    Stdout(StdoutLock<'static>),
}

impl Output {
    fn new<P: Into<PathBuf>>(path: Option<P>) -> Result<Self, CliError> {
        match path {
            Some(path) => {
                let path = path.into();
                match File::create(&path) {
                    Ok(file) => Ok(Self::File(file)),
                    Err(source) => Err(CliError::Open { path, source }),
                }
            }
            None => Ok(Self::Stdout(io::stdout().lock())),
        }
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments) -> io::Result<()> {
        match self {
            Self::File(file) => file.write_fmt(fmt),
            Self::Stdout(lock) => lock.write_fmt(fmt),
        }
    }
}
