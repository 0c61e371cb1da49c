use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tonearm", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML config file (flags override its values)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Queue buffer target in seconds (per stage)
    #[arg(long)]
    pub buffer_seconds: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the detected codec of a file
    Classify { path: PathBuf },

    /// Show format, duration, tags and replay gain
    Info { path: PathBuf },

    /// Write tags, e.g. `--set Title="Blue in Green" --set Year=1959`
    Tag {
        path: PathBuf,
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        set: Vec<String>,
    },

    /// Play a file on the output device
    Play {
        path: PathBuf,
        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Apply replay gain from the file's tags
        #[arg(long)]
        replay_gain: bool,
    },

    /// Re-encode a file, copying its tags
    Convert {
        src: PathBuf,
        dst: PathBuf,
        /// Output codec: wav, aiff or mp3 (defaults to the destination extension)
        #[arg(long)]
        to: Option<String>,
        /// Encoder option, e.g. `--opt Bitrate="256 kbps"`
        #[arg(long = "opt", value_name = "NAME=CHOICE")]
        opts: Vec<String>,
    },
}

/// Split `KEY=VALUE`; the value may itself contain `=`.
pub fn split_assignment(raw: &str) -> Option<(&str, &str)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(split_assignment("Title=a=b"), Some(("Title", "a=b")));
        assert_eq!(split_assignment(" Year = 1959 "), Some(("Year", "1959")));
        assert_eq!(split_assignment("=x"), None);
        assert_eq!(split_assignment("Title"), None);
    }

    #[test]
    fn parses_convert_with_options() {
        let args = Args::parse_from([
            "tonearm",
            "--buffer-seconds",
            "0.5",
            "convert",
            "in.flac",
            "out.mp3",
            "--opt",
            "Bitrate=256 kbps",
        ]);
        assert_eq!(args.buffer_seconds, Some(0.5));
        match args.cmd {
            Some(Command::Convert { to, opts, .. }) => {
                assert!(to.is_none());
                assert_eq!(opts, vec!["Bitrate=256 kbps".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
