//! Keyword matching from transcripts to command tokens
//!
//! Rules are checked in declaration order against the lowercased
//! transcript; the first rule with a matching trigger wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters attached to a command
pub type CommandParams = BTreeMap<String, Value>;

/// Canonical identifier a transcript resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandToken {
    PlaceCone,
    StartLine,
    OptimizeZone,
    CheckWeather,
    AnalyzeTraffic,
    SaveZone,
    Help,
    Unrecognized,
}

impl CommandToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandToken::PlaceCone => "place-cone",
            CommandToken::StartLine => "start-line",
            CommandToken::OptimizeZone => "optimize-zone",
            CommandToken::CheckWeather => "check-weather",
            CommandToken::AnalyzeTraffic => "analyze-traffic",
            CommandToken::SaveZone => "save-zone",
            CommandToken::Help => "help",
            CommandToken::Unrecognized => "unrecognized",
        }
    }

    /// Whether the host application is notified of this token
    ///
    /// `help` is answered by voice only.
    // TODO: confirm with product whether the map should also react to help
    pub fn forwards_to_host(&self) -> bool {
        !matches!(self, CommandToken::Help | CommandToken::Unrecognized)
    }

    /// Spoken acknowledgment for this token
    pub fn acknowledgment(&self) -> &'static str {
        match self {
            CommandToken::PlaceCone => "Placing warning cone at current location",
            CommandToken::StartLine => "Starting barrier line. Tap the map to add points",
            CommandToken::OptimizeZone => "Optimizing zone layout for safety and traffic flow",
            CommandToken::CheckWeather => "Checking weather conditions for this zone",
            CommandToken::AnalyzeTraffic => "Analyzing traffic patterns around this zone",
            CommandToken::SaveZone => "Saving zone configuration",
            CommandToken::Help => {
                "Available commands: place cone, draw line, optimize zone, \
                 check weather, analyze traffic, save zone"
            }
            CommandToken::Unrecognized => {
                "Sorry, I didn't catch that. Say help to hear the available commands"
            }
        }
    }
}

impl std::fmt::Display for CommandToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of interpreting one transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub token: CommandToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<CommandParams>,
    pub raw_text: String,
}

struct Rule {
    triggers: &'static [&'static str],
    token: CommandToken,
    /// Value of the `type` parameter, if any
    kind: Option<&'static str>,
}

const RULES: &[Rule] = &[
    Rule {
        triggers: &["place cone", "add cone"],
        token: CommandToken::PlaceCone,
        kind: Some("warning"),
    },
    Rule {
        triggers: &["draw line", "create barrier"],
        token: CommandToken::StartLine,
        kind: Some("barrier"),
    },
    Rule {
        triggers: &["optimize", "improve"],
        token: CommandToken::OptimizeZone,
        kind: None,
    },
    Rule {
        triggers: &["weather", "forecast"],
        token: CommandToken::CheckWeather,
        kind: None,
    },
    Rule {
        triggers: &["traffic", "congestion"],
        token: CommandToken::AnalyzeTraffic,
        kind: None,
    },
    Rule {
        triggers: &["save", "export"],
        token: CommandToken::SaveZone,
        kind: None,
    },
    Rule {
        triggers: &["help", "commands"],
        token: CommandToken::Help,
        kind: None,
    },
];

/// Map a transcript to a command
pub fn interpret(text: &str) -> CommandResult {
    let lowered = text.to_lowercase();

    let rule = RULES
        .iter()
        .find(|rule| rule.triggers.iter().any(|t| lowered.contains(t)));

    match rule {
        Some(rule) => CommandResult {
            token: rule.token,
            params: rule.kind.map(|kind| {
                let mut params = CommandParams::new();
                params.insert("type".to_string(), Value::from(kind));
                params
            }),
            raw_text: text.to_string(),
        },
        None => CommandResult {
            token: CommandToken::Unrecognized,
            params: None,
            raw_text: text.to_string(),
        },
    }
}
