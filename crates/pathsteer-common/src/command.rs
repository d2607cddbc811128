//! Operator command language.
//!
//! Commands arrive as single-line files in the command queue directory.
//! The grammar is `verb` or `verb:argument`, lowercase:
//!
//! ```text
//! mode:{training|tripwire|mirror}
//! force:<uplink>        force:auto
//! trigger
//! enable:<uplink>       disable:<uplink>
//! fail:<uplink>         unfail:<uplink>
//! c8000:<0|1>
//! ```

use crate::status::Mode;

/// A parsed operator directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set the engine mode.
    SetMode(Mode),
    /// Pin traffic to the named uplink and lock out the arbiter.
    Force(String),
    /// Release the operator lock and re-arbitrate immediately.
    ForceAuto,
    /// Synthesize a manual tripwire fire.
    Trigger,
    /// Include the named uplink in arbitration.
    Enable(String),
    /// Exclude the named uplink from arbitration.
    Disable(String),
    /// Sticky force-fail: the uplink reads as unreachable until released.
    Fail(String),
    /// Release a sticky force-fail.
    Unfail(String),
    /// Advise the external router to prefer controller 0 or 1.
    Controller(u8),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unknown_cmd")]
    UnknownCommand,
    #[error("bad argument for {verb}: {arg:?}")]
    BadArgument { verb: &'static str, arg: String },
    #[error("empty command")]
    Empty,
}

impl Command {
    /// Parse one command line. Leading/trailing whitespace is ignored.
    pub fn parse(line: &str) -> Result<Command, CommandParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandParseError::Empty);
        }

        let (verb, arg) = match line.split_once(':') {
            Some((v, a)) => (v, Some(a.trim())),
            None => (line, None),
        };

        match (verb, arg) {
            ("trigger", None) => Ok(Command::Trigger),
            ("mode", Some(m)) => match m {
                "training" => Ok(Command::SetMode(Mode::Training)),
                "tripwire" => Ok(Command::SetMode(Mode::Tripwire)),
                "mirror" => Ok(Command::SetMode(Mode::Mirror)),
                other => Err(CommandParseError::BadArgument {
                    verb: "mode",
                    arg: other.to_string(),
                }),
            },
            ("force", Some("auto")) => Ok(Command::ForceAuto),
            ("force", Some(name)) if !name.is_empty() => Ok(Command::Force(name.to_string())),
            ("enable", Some(name)) if !name.is_empty() => Ok(Command::Enable(name.to_string())),
            ("disable", Some(name)) if !name.is_empty() => Ok(Command::Disable(name.to_string())),
            ("fail", Some(name)) if !name.is_empty() => Ok(Command::Fail(name.to_string())),
            ("unfail", Some(name)) if !name.is_empty() => Ok(Command::Unfail(name.to_string())),
            ("c8000", Some(c)) => match c {
                "0" => Ok(Command::Controller(0)),
                "1" => Ok(Command::Controller(1)),
                other => Err(CommandParseError::BadArgument {
                    verb: "c8000",
                    arg: other.to_string(),
                }),
            },
            _ => Err(CommandParseError::UnknownCommand),
        }
    }

    /// Canonical `detail` string for the command's ack.
    pub fn ack_detail(&self) -> String {
        match self {
            Command::SetMode(m) => format!("mode={}", m.as_str()),
            Command::Force(name) => format!("force={name}"),
            Command::ForceAuto => "force=auto".to_string(),
            Command::Trigger => "trigger".to_string(),
            Command::Enable(name) => format!("enable={name}"),
            Command::Disable(name) => format!("disable={name}"),
            Command::Fail(name) => format!("fail={name}"),
            Command::Unfail(name) => format!("unfail={name}"),
            Command::Controller(c) => format!("c8000={c}"),
        }
    }
}
