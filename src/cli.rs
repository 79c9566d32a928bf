use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

const AFTER_HELP: &str = "If no device is given, the settings file or /dev/video0 is used.\n\
Debug output can also be enabled with DEBUG=1 or GNOME_V4L2_DEBUG=1.";

/// Stream a GNOME screencast into a V4L2 loopback device.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "gnome-v4l2", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// V4L2 loopback device to write to, e.g. /dev/video10
    pub device: Option<PathBuf>,

    /// Generate an SMPTE colour bars test pattern instead of capturing
    #[arg(short = 'c', long)]
    pub color_bars: bool,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    pub debug: bool,
}

/// What the process should do after argument parsing.
#[derive(Debug)]
pub enum ParsedArgs {
    Run(Cli),
    /// Help or version was printed, or the arguments were invalid.
    Exit(i32),
}

/// Parses `args`, printing help or usage errors. Help and version exit 0,
/// anything else clap rejects exits 1.
pub fn parse_args<I, T>(args: I) -> ParsedArgs
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => ParsedArgs::Run(cli),
        Err(e) => {
            let code = exit_code_for(e.kind());
            let _ = e.print();
            ParsedArgs::Exit(code)
        }
    }
}

fn exit_code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => 1,
    }
}
