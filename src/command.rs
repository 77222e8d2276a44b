//! Slash-command parsing and input validation.
//!
//! Pure functions over user keystrokes: no I/O, no session state. The
//! session engine performs no further validation of nicknames, channel
//! tags, or realnames — those rules live here.

/// A parsed user command, ready to hand to the session's operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Help,
    Connect {
        host: String,
        port: u16,
        nickname: String,
        realname: String,
    },
    Disconnect,
    Join { tag: String },
    Part { tag: String },
    Nick { nickname: String },
    Quit,
    /// Input without a leading `/`: a message for the current channel.
    Message { content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid command {command}: {reason}")]
    Invalid {
        command: &'static str,
        reason: &'static str,
    },
    #[error("Unknown command: {0}. Type /help and check the available commands")]
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
Available commands:
/help                              Shows this message
/connect <host> <nickname> <name>  Connects to a network
/disconnect                        Disconnects from a network
/join <channel>                    Connects to a channel in the network
/part <channel>                    Disconnects from a channel in the network
/nick <nickname>                   Changes your nickname in the network
/quit                              Closes the IRC client
<bunch of text>                    Sends a message in the current channel";

const SPECIAL_CHARS: &[char] = &['[', ']', '\\', '`', '_', '^', '{', '|', '}'];

/// 1–9 characters: ASCII alphanumerics, `-`, or the protocol's special
/// set ``[]\`_^{|}``.
pub fn is_nickname_valid(nickname: &str) -> bool {
    if nickname.is_empty() || nickname.len() > 9 {
        return false;
    }
    nickname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || SPECIAL_CHARS.contains(&c))
}

/// `#` followed by 1–50 ASCII characters, none of space, comma, or BEL.
pub fn is_channel_tag_valid(tag: &str) -> bool {
    let Some(body) = tag.strip_prefix('#') else {
        return false;
    };
    if body.is_empty() || body.len() > 50 {
        return false;
    }
    body.chars()
        .all(|c| c.is_ascii() && c != ' ' && c != ',' && c != '\u{7}')
}

/// Realnames may be anything ASCII.
pub fn is_realname_valid(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii())
}

/// Parse one line of user input.
pub fn parse(input: &str) -> Result<UserCommand, ParseError> {
    let input = input.trim_end_matches([' ', '\t']);

    let Some(body) = input.strip_prefix('/') else {
        return Ok(UserCommand::Message {
            content: input.to_owned(),
        });
    };

    let (keyword, args) = match body.split_once(' ') {
        Some((keyword, args)) => (keyword, args),
        None => (body, ""),
    };

    match keyword {
        "help" => {
            require_no_args("help", args)?;
            Ok(UserCommand::Help)
        }
        "connect" => {
            let parts: Vec<&str> = args.splitn(3, ' ').collect();
            if parts.len() < 3 {
                return Err(ParseError::Invalid {
                    command: "connect",
                    reason: "expecting arguments <address> <nickname> <name>",
                });
            }
            let Some((host, raw_port)) = parts[0].rsplit_once(':') else {
                return Err(ParseError::Invalid {
                    command: "connect",
                    reason: "invalid address argument",
                });
            };
            if host.is_empty() {
                return Err(ParseError::Invalid {
                    command: "connect",
                    reason: "invalid address argument",
                });
            }
            let port: u16 = raw_port.parse().map_err(|_| ParseError::Invalid {
                command: "connect",
                reason: "invalid address port",
            })?;
            if !is_nickname_valid(parts[1]) {
                return Err(ParseError::Invalid {
                    command: "connect",
                    reason: "invalid nickname",
                });
            }
            if !is_realname_valid(parts[2]) {
                return Err(ParseError::Invalid {
                    command: "connect",
                    reason: "invalid name",
                });
            }
            Ok(UserCommand::Connect {
                host: host.to_owned(),
                port,
                nickname: parts[1].to_owned(),
                realname: parts[2].to_owned(),
            })
        }
        "disconnect" => {
            require_no_args("disconnect", args)?;
            Ok(UserCommand::Disconnect)
        }
        "join" | "part" => {
            let command = if keyword == "join" { "join" } else { "part" };
            if args.is_empty() {
                return Err(ParseError::Invalid {
                    command,
                    reason: "expecting argument <channel>",
                });
            }
            if !is_channel_tag_valid(args) {
                return Err(ParseError::Invalid {
                    command,
                    reason: "invalid channel",
                });
            }
            let tag = args.to_owned();
            if keyword == "join" {
                Ok(UserCommand::Join { tag })
            } else {
                Ok(UserCommand::Part { tag })
            }
        }
        "nick" => {
            if args.is_empty() {
                return Err(ParseError::Invalid {
                    command: "nick",
                    reason: "expecting argument <nickname>",
                });
            }
            if !is_nickname_valid(args) {
                return Err(ParseError::Invalid {
                    command: "nick",
                    reason: "invalid nickname",
                });
            }
            Ok(UserCommand::Nick {
                nickname: args.to_owned(),
            })
        }
        "quit" => {
            require_no_args("quit", args)?;
            Ok(UserCommand::Quit)
        }
        _ => Err(ParseError::Unknown(input.to_owned())),
    }
}

fn require_no_args(command: &'static str, args: &str) -> Result<(), ParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ParseError::Invalid {
            command,
            reason: "command doesn't have arguments",
        })
    }
}
