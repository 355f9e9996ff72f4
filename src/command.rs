use crate::prelude::*;

/// Inbound commands from the host. Anything unrecognised, including an empty
/// message, is `None`, which the scheduler treats as an implicit update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Update,
    Output,
    DailyReset,
    Unavailable,
    None,
}

impl Command {
    pub fn from_payload(payload: &str) -> Self {
        Self::from_str(payload).unwrap_or(Command::None)
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "update" => Ok(Command::Update),
            "output" => Ok(Command::Output),
            "dailyreset" => Ok(Command::DailyReset),
            "unavailable" => Ok(Command::Unavailable),
            other => Err(anyhow!("unknown command {:?}", other)),
        }
    }
}
