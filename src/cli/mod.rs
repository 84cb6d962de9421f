//! Defines Burrow's CLI through clap types.

mod mount;
mod tree;

use std::{
    borrow::Cow,
    env,
    io::{self, Write},
    path::Path,
    str::FromStr,
};

use clap::Parser;
use termcolor::{BufferWriter, Color, ColorSpec, WriteColor};
use thiserror::Error;

use crate::fs_tree::FsDir;

pub use self::mount::MountCommand;
pub use self::tree::TreeCommand;

/// Command line options that Burrow accepts, defined using the clap crate.
#[derive(Debug, Parser)]
#[clap(name = "Burrow", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    /// Subcommand to run in this invocation.
    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

impl Options {
    pub fn run(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Mount(subcommand) => subcommand.run(self.global),
            Subcommand::Tree(subcommand) => subcommand.run(self.global),
        }
    }
}

#[derive(Debug, Clone, Copy, Parser)]
pub struct GlobalOptions {
    /// Sets verbosity level. Can be specified multiple times.
    #[clap(long("verbose"), short, global(true), action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Set color behavior. Valid values are auto, always, and never.
    #[clap(long("color"), global(true), default_value("auto"))]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ColorChoiceParseError {
                attempted: source.to_owned(),
            }),
        }
    }
}

impl From<ColorChoice> for termcolor::ColorChoice {
    fn from(value: ColorChoice) -> Self {
        match value {
            ColorChoice::Auto => termcolor::ColorChoice::Auto,
            ColorChoice::Always => termcolor::ColorChoice::Always,
            ColorChoice::Never => termcolor::ColorChoice::Never,
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid color choice '{attempted}'. Valid values are: auto, always, never")]
pub struct ColorChoiceParseError {
    attempted: String,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Mount(MountCommand),
    Tree(TreeCommand),
}

impl Subcommand {
    pub fn command_name(&self) -> &'static str {
        match self {
            Subcommand::Mount(_) => "mount",
            Subcommand::Tree(_) => "tree",
        }
    }
}

pub fn resolve_path(path: &Path) -> Cow<'_, Path> {
    if path.is_absolute() {
        Cow::Borrowed(path)
    } else {
        match env::current_dir() {
            Ok(current_dir) => Cow::Owned(current_dir.join(path)),
            Err(_) => Cow::Borrowed(path),
        }
    }
}

/// Prints a shadow tree snapshot to stdout, directories highlighted, followed
/// by a summary line.
pub(crate) fn print_tree(snapshot: &FsDir, color: ColorChoice) -> io::Result<()> {
    let mut dir_color = ColorSpec::new();
    dir_color.set_fg(Some(Color::Blue)).set_bold(true);
    let mut summary_color = ColorSpec::new();
    summary_color.set_fg(Some(Color::Green));
    let no_color = ColorSpec::new();

    let writer = BufferWriter::stdout(color.into());
    let mut buffer = writer.buffer();

    for line in snapshot.render().lines() {
        if line.ends_with('/') {
            buffer.set_color(&dir_color)?;
        } else {
            buffer.set_color(&no_color)?;
        }
        writeln!(&mut buffer, "{}", line)?;
    }

    let counts = snapshot.counts();
    buffer.set_color(&summary_color)?;
    writeln!(
        &mut buffer,
        "{} director{}, {} file{}",
        counts.directories,
        if counts.directories == 1 { "y" } else { "ies" },
        counts.files,
        if counts.files == 1 { "" } else { "s" },
    )?;
    buffer.set_color(&no_color)?;

    writer.print(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_choice_parsing() {
        assert_eq!("auto".parse::<ColorChoice>().unwrap(), ColorChoice::Auto);
        assert_eq!("never".parse::<ColorChoice>().unwrap(), ColorChoice::Never);

        let err = "sometimes".parse::<ColorChoice>().unwrap_err();
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn parses_subcommands() {
        let options =
            Options::try_parse_from(["burrow", "-vv", "tree", "empty", "--timeout", "10s"])
                .unwrap();

        assert_eq!(options.global.verbosity, 2);
        assert_eq!(options.subcommand.command_name(), "tree");

        let options = Options::try_parse_from([
            "burrow",
            "mount",
            "https://github.com/owner/repo/tree/main/app",
            "--print-tree",
            "--color",
            "never",
        ])
        .unwrap();

        assert_eq!(options.global.color, ColorChoice::Never);
        assert_eq!(options.subcommand.command_name(), "mount");
    }

    #[test]
    fn malformed_github_urls_are_rejected_up_front() {
        assert!(Options::try_parse_from(["burrow", "tree", "https://github.com/owner"]).is_err());
    }
}
