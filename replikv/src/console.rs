use anyhow::{Result, anyhow};

/// Commands accepted at the client prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Put { key: String, value: String },
    Get { key: String },
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses one line of input. Command words are case-insensitive; keys
    /// and values are single whitespace-delimited tokens.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((command, args)) = parts.split_first() else {
            return Err(anyhow!("empty command"));
        };

        match (command.to_uppercase().as_str(), args) {
            ("PUT", [key, value]) => Ok(Self::Put {
                key: key.to_string(),
                value: value.to_string(),
            }),
            ("GET", [key]) => Ok(Self::Get {
                key: key.to_string(),
            }),
            ("HELP", []) => Ok(Self::Help),
            ("EXIT", []) => Ok(Self::Exit),
            ("PUT", _) => Err(anyhow!("PUT requires exactly two arguments: PUT <key> <value>")),
            ("GET", _) => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            _ => Err(anyhow!(
                "invalid command. Try: PUT <key> <value>, GET <key>, HELP, EXIT"
            )),
        }
    }
}
