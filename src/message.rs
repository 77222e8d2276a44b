//! Wire codec: decodes inbound lines into typed protocol messages and
//! encodes outbound commands.
//!
//! Decoding is total — every input line yields exactly one
//! [`ServerMessage`], never an error. Lines that match no known command
//! decode to [`MessageKind::Unknown`] with the raw text retained for
//! logging.

/// Numeric reply codes the session engine understands.
pub mod numeric {
    pub const RPL_WELCOME: u16 = 1;
    pub const RPL_YOURHOST: u16 = 2;
    pub const RPL_CREATED: u16 = 3;
    pub const RPL_MYINFO: u16 = 4;
    pub const RPL_BOUNCE: u16 = 5;
    pub const RPL_LUSERCLIENT: u16 = 251;
    pub const RPL_LUSEROP: u16 = 252;
    pub const RPL_LUSERUNKNOWN: u16 = 253;
    pub const RPL_LUSERCHANNELS: u16 = 254;
    pub const RPL_LUSERME: u16 = 255;
    pub const RPL_ADMINME: u16 = 256;
    pub const RPL_LOCALUSERS: u16 = 265;
    pub const RPL_GLOBALUSERS: u16 = 266;
    pub const RPL_AWAY: u16 = 301;
    pub const RPL_TOPIC: u16 = 332;
    pub const RPL_TOPICWHOTIME: u16 = 333;
    pub const RPL_NAMREPLY: u16 = 353;
    pub const RPL_ENDOFNAMES: u16 = 366;
    pub const RPL_MOTD: u16 = 372;
    pub const RPL_MOTDSTART: u16 = 375;
    pub const RPL_ENDOFMOTD: u16 = 376;
    pub const RPL_HOSTHIDDEN: u16 = 396;

    pub const ERR_NOSUCHCHANNEL: u16 = 403;
    pub const ERR_CANNOTSENDTOCHAN: u16 = 404;
    pub const ERR_NOMOTD: u16 = 422;
    pub const ERR_ERRONEUSNICKNAME: u16 = 432;
    pub const ERR_NICKNAMEINUSE: u16 = 433;
    pub const ERR_NICKCOLLISION: u16 = 436;
    pub const ERR_NOTONCHANNEL: u16 = 442;
    pub const ERR_NOTREGISTERED: u16 = 451;
    pub const ERR_ALREADYREGISTERED: u16 = 462;
    pub const ERR_INVITEONLYCHAN: u16 = 473;
    pub const ERR_BANNEDFROMCHAN: u16 = 474;
    pub const ERR_RESTRICTED: u16 = 484;
}

/// Attributed source of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// No prefix on the line (synthetic or local).
    None,
    /// `:servername` prefix.
    Server { name: String },
    /// `:nick!user@host` prefix, split at the `!`.
    User { nickname: String, ident: String },
}

impl Origin {
    /// Display form of the sender, for diagnostics.
    pub fn sender(&self) -> String {
        match self {
            Origin::None => "unspecified sender".to_owned(),
            Origin::Server { name } => name.clone(),
            Origin::User { nickname, ident } => format!("{nickname}!{ident}"),
        }
    }
}

/// A decoded inbound line: who sent it, the raw text, and what it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub origin: Origin,
    pub raw: String,
    pub kind: MessageKind,
}

/// The meaning of an inbound line.
///
/// Closed sum: the dispatch loop matches exhaustively so an unhandled new
/// variant fails to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// NICK — someone (possibly us) changed their nickname.
    Nick { nickname: String },
    /// JOIN — someone entered a channel.
    Join { channel: String },
    /// PART — someone left a channel.
    Part { channel: String },
    /// PRIVMSG — a message to a channel or user.
    Privmsg { target: String, content: String },
    /// QUIT — someone disconnected from the server.
    Quit,
    /// A 3-digit numeric reply.
    Reply {
        code: u16,
        target: String,
        content: String,
    },
    /// NOTICE — informational text from the server.
    Notice { content: String },
    /// PING — keepalive probe carrying the server name as payload.
    Ping,
    /// KICK — a member was removed from a channel.
    Kick {
        channel: String,
        nickname: String,
        reason: Option<String>,
    },
    /// ERROR — fatal notice; the server is closing the connection.
    ServerError { content: String },
    /// MODE — mode report for a channel or for us.
    Mode { target: String, modes: String },
    /// Anything else; `raw` on the enclosing message holds the line.
    Unknown,
}

/// Decode one wire line (without its CR-LF terminator).
pub fn decode(raw: &str) -> ServerMessage {
    let mut origin = Origin::None;
    let mut rest = raw;

    if let Some(prefixed) = rest.strip_prefix(':') {
        let (token, remainder) = split_token(prefixed);
        origin = match token.split_once('!') {
            Some((nickname, ident)) => Origin::User {
                nickname: nickname.to_owned(),
                ident: ident.to_owned(),
            },
            None => Origin::Server {
                name: token.to_owned(),
            },
        };
        rest = remainder;
    }

    let (keyword, params) = split_token(rest);

    if keyword.len() == 3 && keyword.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(code) = keyword.parse::<u16>() {
            let (target, content) = split_token(params);
            return ServerMessage {
                origin,
                raw: raw.to_owned(),
                kind: MessageKind::Reply {
                    code,
                    target: target.to_owned(),
                    content: trim_leading_colon(content).to_owned(),
                },
            };
        }
    }

    let kind = match keyword {
        "NICK" => MessageKind::Nick {
            nickname: trim_leading_colon(params).to_owned(),
        },
        "JOIN" => MessageKind::Join {
            channel: first_param(params).to_owned(),
        },
        "PART" => MessageKind::Part {
            channel: first_param(params).to_owned(),
        },
        "PRIVMSG" => {
            let (target, content) = split_token(params);
            MessageKind::Privmsg {
                target: target.to_owned(),
                content: trim_leading_colon(content).to_owned(),
            }
        }
        "QUIT" => MessageKind::Quit,
        "NOTICE" => {
            let (_target, content) = split_token(params);
            MessageKind::Notice {
                content: trim_leading_colon(content).to_owned(),
            }
        }
        "KICK" => {
            let mut parts = params.splitn(3, ' ');
            let channel = parts.next().unwrap_or_default().to_owned();
            let nickname = parts.next().unwrap_or_default().to_owned();
            let reason = parts.next().map(|r| trim_leading_colon(r).to_owned());
            MessageKind::Kick {
                channel,
                nickname,
                reason,
            }
        }
        "PING" => {
            // The probe carries the target server name as its payload,
            // not as a prefix.
            origin = Origin::Server {
                name: trim_leading_colon(params).to_owned(),
            };
            MessageKind::Ping
        }
        "ERROR" => MessageKind::ServerError {
            content: trim_leading_colon(params).to_owned(),
        },
        "MODE" => {
            let (target, modes) = split_token(params);
            MessageKind::Mode {
                target: target.to_owned(),
                modes: trim_leading_colon(modes).to_owned(),
            }
        }
        _ => MessageKind::Unknown,
    };

    ServerMessage {
        origin,
        raw: raw.to_owned(),
        kind,
    }
}

fn split_token(s: &str) -> (&str, &str) {
    match s.split_once(' ') {
        Some((token, rest)) => (token, rest),
        None => (s, ""),
    }
}

fn trim_leading_colon(s: &str) -> &str {
    s.strip_prefix(':').unwrap_or(s)
}

fn first_param(params: &str) -> &str {
    split_token(trim_leading_colon(params)).0
}

/// An outbound command, rendered to a single CR-LF terminated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nick { nickname: String },
    User { username: String, realname: String },
    Join { channel: String },
    Part { channel: String },
    Privmsg { target: String, content: String },
    Pong { server: String },
    Quit { reason: String },
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Command::Nick { nickname } => format!("NICK {nickname}\r\n"),
            Command::User { username, realname } => {
                format!("USER {username} 0 * :{realname}\r\n")
            }
            Command::Join { channel } => format!("JOIN {channel}\r\n"),
            Command::Part { channel } => format!("PART {channel}\r\n"),
            Command::Privmsg { target, content } => {
                format!("PRIVMSG {target} :{content}\r\n")
            }
            Command::Pong { server } => format!("PONG :{server}\r\n"),
            Command::Quit { reason } => format!("QUIT :{reason}\r\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Decoding ─────────────────────────────────────────────────

    #[test]
    fn decode_numeric_reply_with_server_origin() {
        let msg = decode(":serv 001 neo :Welcome");
        assert_eq!(
            msg.origin,
            Origin::Server {
                name: "serv".into()
            }
        );
        assert_eq!(
            msg.kind,
            MessageKind::Reply {
                code: 1,
                target: "neo".into(),
                content: "Welcome".into(),
            }
        );
        assert_eq!(msg.raw, ":serv 001 neo :Welcome");
    }

    #[test]
    fn decode_names_reply_keeps_header_and_list() {
        let msg = decode(":serv 353 neo = #test :@alice +bob carol");
        assert_eq!(
            msg.kind,
            MessageKind::Reply {
                code: 353,
                target: "neo".into(),
                content: "= #test :@alice +bob carol".into(),
            }
        );
    }

    #[test]
    fn decode_privmsg_with_user_origin() {
        let msg = decode(":alice!u@h PRIVMSG #test :hello world");
        assert_eq!(
            msg.origin,
            Origin::User {
                nickname: "alice".into(),
                ident: "u@h".into()
            }
        );
        assert_eq!(
            msg.kind,
            MessageKind::Privmsg {
                target: "#test".into(),
                content: "hello world".into(),
            }
        );
    }

    #[test]
    fn decode_non_numeric_three_char_token_is_unknown() {
        let msg = decode(":serv CAP * LS :sasl");
        assert_eq!(msg.kind, MessageKind::Unknown);
    }

    #[test]
    fn decode_ping_rewrites_origin_to_probed_server() {
        let msg = decode("PING :irc.example.org");
        assert_eq!(msg.kind, MessageKind::Ping);
        assert_eq!(
            msg.origin,
            Origin::Server {
                name: "irc.example.org".into()
            }
        );
    }

    #[test]
    fn decode_kick_with_reason() {
        let msg = decode(":op!u@h KICK #test neo :flooding");
        assert_eq!(
            msg.kind,
            MessageKind::Kick {
                channel: "#test".into(),
                nickname: "neo".into(),
                reason: Some("flooding".into()),
            }
        );
    }

    #[test]
    fn decode_kick_without_reason() {
        let msg = decode(":op!u@h KICK #test neo");
        assert_eq!(
            msg.kind,
            MessageKind::Kick {
                channel: "#test".into(),
                nickname: "neo".into(),
                reason: None,
            }
        );
    }

    #[test]
    fn decode_join_strips_trailing_marker() {
        let msg = decode(":bob!u@h JOIN :#test");
        assert_eq!(
            msg.kind,
            MessageKind::Join {
                channel: "#test".into()
            }
        );
    }

    #[test]
    fn decode_nick_change() {
        let msg = decode(":neo!u@h NICK :morpheus");
        assert_eq!(
            msg.kind,
            MessageKind::Nick {
                nickname: "morpheus".into()
            }
        );
    }

    #[test]
    fn decode_error_line() {
        let msg = decode("ERROR :Closing Link: host (Quit)");
        assert_eq!(
            msg.kind,
            MessageKind::ServerError {
                content: "Closing Link: host (Quit)".into()
            }
        );
    }

    #[test]
    fn decode_user_mode_report() {
        let msg = decode(":serv MODE neo :+i");
        assert_eq!(
            msg.kind,
            MessageKind::Mode {
                target: "neo".into(),
                modes: "+i".into(),
            }
        );
    }

    #[test]
    fn decode_garbage_is_unknown_with_raw_retained() {
        let msg = decode("BLORP some nonsense");
        assert_eq!(msg.kind, MessageKind::Unknown);
        assert_eq!(msg.raw, "BLORP some nonsense");
        assert_eq!(msg.origin, Origin::None);
    }

    #[test]
    fn decode_quit_ignores_reason() {
        let msg = decode(":bob!u@h QUIT :gone fishing");
        assert_eq!(msg.kind, MessageKind::Quit);
        assert_eq!(msg.origin.sender(), "bob!u@h");
    }

    // ── Encoding ─────────────────────────────────────────────────

    #[test]
    fn encode_privmsg_marks_trailing_content() {
        let cmd = Command::Privmsg {
            target: "#test".into(),
            content: "hello world".into(),
        };
        assert_eq!(cmd.encode(), "PRIVMSG #test :hello world\r\n");
    }

    #[test]
    fn encode_user_registration() {
        let cmd = Command::User {
            username: "neo".into(),
            realname: "Thomas Anderson".into(),
        };
        assert_eq!(cmd.encode(), "USER neo 0 * :Thomas Anderson\r\n");
    }

    #[test]
    fn encode_pong_echoes_server() {
        let cmd = Command::Pong {
            server: "irc.example.org".into(),
        };
        assert_eq!(cmd.encode(), "PONG :irc.example.org\r\n");
    }

    // ── Round trip ───────────────────────────────────────────────

    #[test]
    fn nick_round_trip() {
        let cmd = Command::Nick {
            nickname: "neo".into(),
        };
        let line = cmd.encode();
        let msg = decode(line.trim_end());
        assert_eq!(
            msg.kind,
            MessageKind::Nick {
                nickname: "neo".into()
            }
        );
    }
}
