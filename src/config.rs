//! Command line configuration
//!
//! The indicator has no configuration file; everything comes from the
//! command line. Help, unknown flags, unparsable values and stray positional
//! arguments are all usage errors.

use std::ffi::OsString;

use clap::Parser;

use crate::error::{Error, Result};

/// Default indicator color, opaque red in AARRGGBB
const DEFAULT_BORDER_COLOR: u32 = 0xffff0000;

/// Default indicator border width
const DEFAULT_BORDER_WIDTH: u16 = 5;

/// Keycodes of the left and right Super keys
pub const WATCHED_KEYCODES: &[u32] = &[133, 134];

pub const USAGE: &str = "\
usage: area-indicator [-h] [-c COLOR] [-w WIDTH]

An X11 utility that signals the active window

optional arguments:
  -h, --help                show this help message and exit
  -c, --border-color COLOR  indicator color in aarrggbb format
  -w, --border-width WIDTH  indicator border width
";

#[derive(Parser, Debug)]
#[command(name = "area-indicator", disable_help_flag = true)]
struct Args {
    #[arg(short = 'h', long = "help")]
    help: bool,

    #[arg(short = 'c', long = "border-color", value_parser = parse_color)]
    border_color: Option<u32>,

    #[arg(short = 'w', long = "border-width")]
    border_width: Option<u16>,
}

/// Indicator configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Border pixel value, AARRGGBB
    pub border_color: u32,
    /// Width of each border strip
    pub border_width: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            border_color: DEFAULT_BORDER_COLOR,
            border_width: DEFAULT_BORDER_WIDTH,
        }
    }
}

impl Config {
    /// Parse a full argument list, program name first
    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(args).map_err(|e| Error::Usage(e.to_string()))?;
        if args.help {
            return Err(Error::Usage("help requested".into()));
        }

        let defaults = Self::default();
        Ok(Self {
            border_color: args.border_color.unwrap_or(defaults.border_color),
            border_width: args.border_width.unwrap_or(defaults.border_width),
        })
    }
}

pub fn print_usage() {
    eprint!("{}", USAGE);
}

/// Hex color with an optional `0x` prefix
fn parse_color(value: &str) -> std::result::Result<u32, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.is_empty() || digits.len() > 8 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("invalid color '{}'", value));
    }
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid color '{}': {}", value, e))
}
