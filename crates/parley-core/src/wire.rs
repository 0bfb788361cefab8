//! Parley wire format — pipe-delimited `KEY:VALUE` text frames.
//!
//! One frame per line on stream transports, one frame per datagram on
//! datagram transports. The first token is the tag and must come first;
//! every later token is `KEY:VALUE` in any order. Unknown keys are ignored.
//!
//! ```text
//! CONNECT:<username>
//! DISCONNECT:<username>
//! HEARTBEAT:<username>
//! FROM:<sender>|MSG:<text>
//! TO:<recipient>|FROM:<sender>|MSG:<text>
//! USERLIST:<u1>,<u2>,...
//! <KIND>CHUNK|SESSION:<id>|CHUNK:<i>|TOTAL:<n>|[FILENAME:<name>|][TO:<recipient>|]FROM:<sender>|DATA:<b64>
//! PRIVATE:<sender>|MSG:<text>
//! NOTICE:<text>
//! ```
//!
//! Field values must not contain `|`. That is the caller's obligation; the
//! codec does not escape anything.

use std::fmt;

/// Separates the tokens of a frame.
pub const FIELD_SEP: char = '|';

/// Separates a token's key from its value. Only the first occurrence counts.
pub const KEY_SEP: char = ':';

/// Separates usernames in a `USERLIST` frame.
pub const LIST_SEP: char = ',';

/// Display-layer name for "everyone". Never a real user.
pub const BROADCAST_PLACEHOLDER: &str = "All";

// ── Chunk kinds ───────────────────────────────────────────────────────────────

/// Payload kind carried by a chunk frame. Selects the frame tag and the
/// receiver's expiry window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Image,
    File,
    Voice,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 3] = [ChunkKind::Image, ChunkKind::File, ChunkKind::Voice];

    /// Leading tag token on the wire.
    pub fn tag(self) -> &'static str {
        match self {
            ChunkKind::Image => "IMGCHUNK",
            ChunkKind::File => "FILECHUNK",
            ChunkKind::Voice => "VOICECHUNK",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            ChunkKind::Image => "image",
            ChunkKind::File => "file",
            ChunkKind::Voice => "voice",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// One fragment of a larger base64 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub kind: ChunkKind,
    /// Sender-chosen token grouping every chunk of one transfer.
    pub session_id: String,
    /// Zero-based position of this fragment.
    pub index: u32,
    /// Number of fragments in the transfer. Never zero on the wire.
    pub total: u32,
    pub sender: String,
    /// `None` means broadcast.
    pub recipient: Option<String>,
    /// Only file transfers carry one.
    pub filename: Option<String>,
    /// Base64 fragment, opaque to the codec.
    pub data: String,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connect {
        username: String,
    },
    Disconnect {
        username: String,
    },
    Heartbeat {
        username: String,
    },
    /// Chat line. `recipient: None` is a broadcast.
    Text {
        sender: String,
        recipient: Option<String>,
        body: String,
    },
    /// Relay → recipient form of a private text.
    Private {
        sender: String,
        body: String,
    },
    Chunk(ChunkFrame),
    /// Relay → client membership snapshot.
    UserList {
        usernames: Vec<String>,
    },
    /// Relay → client informational line (joins, leaves, delivery notices).
    Notice {
        text: String,
    },
}

impl Frame {
    /// Serialize to wire text, without a line terminator.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Short name for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "CONNECT",
            Frame::Disconnect { .. } => "DISCONNECT",
            Frame::Heartbeat { .. } => "HEARTBEAT",
            Frame::Text { .. } => "TEXT",
            Frame::Private { .. } => "PRIVATE",
            Frame::Chunk(c) => c.kind.tag(),
            Frame::UserList { .. } => "USERLIST",
            Frame::Notice { .. } => "NOTICE",
        }
    }

    /// The user this frame originates from, if it names one.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Frame::Connect { username }
            | Frame::Disconnect { username }
            | Frame::Heartbeat { username } => Some(username),
            Frame::Text { sender, .. } | Frame::Private { sender, .. } => Some(sender),
            Frame::Chunk(c) => Some(&c.sender),
            Frame::UserList { .. } | Frame::Notice { .. } => None,
        }
    }

    /// Explicit private recipient, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Frame::Text { recipient, .. } => recipient.as_deref(),
            Frame::Chunk(c) => c.recipient.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Connect { username } => write!(f, "CONNECT:{username}"),
            Frame::Disconnect { username } => write!(f, "DISCONNECT:{username}"),
            Frame::Heartbeat { username } => write!(f, "HEARTBEAT:{username}"),
            Frame::Text {
                sender,
                recipient: Some(recipient),
                body,
            } => write!(f, "TO:{recipient}|FROM:{sender}|MSG:{body}"),
            Frame::Text {
                sender,
                recipient: None,
                body,
            } => write!(f, "FROM:{sender}|MSG:{body}"),
            Frame::Private { sender, body } => write!(f, "PRIVATE:{sender}|MSG:{body}"),
            Frame::Chunk(chunk) => fmt::Display::fmt(chunk, f),
            Frame::UserList { usernames } => {
                write!(f, "USERLIST:{}", usernames.join(","))
            }
            Frame::Notice { text } => write!(f, "NOTICE:{text}"),
        }
    }
}

impl fmt::Display for ChunkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|SESSION:{}|CHUNK:{}|TOTAL:{}",
            self.kind.tag(),
            self.session_id,
            self.index,
            self.total
        )?;
        if let Some(filename) = &self.filename {
            write!(f, "|FILENAME:{filename}")?;
        }
        if let Some(recipient) = &self.recipient {
            write!(f, "|TO:{recipient}")?;
        }
        write!(f, "|FROM:{}|DATA:{}", self.sender, self.data)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a raw frame was rejected. A rejected frame must not touch any state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame tag {0:?}")]
    UnknownTag(String),
    #[error("{tag} frame is missing required field {field}")]
    MissingField {
        tag: &'static str,
        field: &'static str,
    },
    #[error("{tag} frame has an empty {field} field")]
    EmptyField {
        tag: &'static str,
        field: &'static str,
    },
    #[error("field {field} is not a non-negative integer: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("chunk frame declares TOTAL:0")]
    ZeroTotal,
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode one raw frame. A trailing CR/LF is ignored.
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut tokens = raw.split(FIELD_SEP);
    let lead = tokens.next().unwrap_or_default();
    let (tag, lead_value) = match lead.split_once(KEY_SEP) {
        Some((key, value)) => (key, Some(value)),
        None => (lead, None),
    };
    let mut fields = Fields::parse(tokens);

    match (tag, lead_value) {
        ("CONNECT", Some(v)) => Ok(Frame::Connect {
            username: non_empty("CONNECT", "username", v)?,
        }),
        ("DISCONNECT", Some(v)) => Ok(Frame::Disconnect {
            username: non_empty("DISCONNECT", "username", v)?,
        }),
        ("HEARTBEAT", Some(v)) => Ok(Frame::Heartbeat {
            username: non_empty("HEARTBEAT", "username", v)?,
        }),
        ("FROM", Some(v)) | ("TO", Some(v)) => {
            fields.lead(tag, v);
            decode_text(&fields)
        }
        ("PRIVATE", Some(v)) => Ok(Frame::Private {
            sender: non_empty("PRIVATE", "sender", v)?,
            body: fields.required("PRIVATE", "MSG")?.to_string(),
        }),
        ("USERLIST", Some(v)) => Ok(Frame::UserList {
            usernames: v
                .split(LIST_SEP)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        }),
        // Notices are free text; keep everything after the tag.
        ("NOTICE", Some(_)) => Ok(Frame::Notice {
            text: raw["NOTICE:".len()..].to_string(),
        }),
        ("CONNECT" | "DISCONNECT" | "HEARTBEAT" | "PRIVATE" | "USERLIST" | "NOTICE", None) => {
            Err(DecodeError::MissingField {
                tag: static_tag(tag),
                field: "value",
            })
        }
        (other, None) => match ChunkKind::from_tag(other) {
            Some(kind) => decode_chunk(kind, &fields).map(Frame::Chunk),
            None => Err(DecodeError::UnknownTag(other.to_string())),
        },
        (other, Some(_)) => Err(DecodeError::UnknownTag(other.to_string())),
    }
}

fn decode_text(fields: &Fields<'_>) -> Result<Frame, DecodeError> {
    const TAG: &str = "TEXT";
    let sender = non_empty(TAG, "FROM", fields.required(TAG, "FROM")?)?;
    let recipient = match fields.get("TO") {
        Some(r) => Some(non_empty(TAG, "TO", r)?),
        None => None,
    };
    let body = fields.required(TAG, "MSG")?.to_string();
    Ok(Frame::Text {
        sender,
        recipient,
        body,
    })
}

fn decode_chunk(kind: ChunkKind, fields: &Fields<'_>) -> Result<ChunkFrame, DecodeError> {
    let tag = kind.tag();
    let session_id = non_empty(tag, "SESSION", fields.required(tag, "SESSION")?)?;
    let index = number("CHUNK", fields.required(tag, "CHUNK")?)?;
    let total = number("TOTAL", fields.required(tag, "TOTAL")?)?;
    if total == 0 {
        return Err(DecodeError::ZeroTotal);
    }
    let sender = non_empty(tag, "FROM", fields.required(tag, "FROM")?)?;
    let recipient = match fields.get("TO") {
        Some(r) => Some(non_empty(tag, "TO", r)?),
        None => None,
    };
    let filename = fields
        .get("FILENAME")
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let data = fields.required(tag, "DATA")?.to_string();

    Ok(ChunkFrame {
        kind,
        session_id,
        index,
        total,
        sender,
        recipient,
        filename,
        data,
    })
}

/// `KEY:VALUE` tokens after the leading tag. First occurrence of a key wins.
struct Fields<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Fields<'a> {
    fn parse(tokens: impl Iterator<Item = &'a str>) -> Self {
        let pairs = tokens
            .filter_map(|token| token.split_once(KEY_SEP))
            .collect();
        Self { pairs }
    }

    /// The leading token of a text frame is itself a field.
    fn lead(&mut self, key: &'a str, value: &'a str) {
        self.pairs.insert(0, (key, value));
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    fn required(&self, tag: &'static str, field: &'static str) -> Result<&'a str, DecodeError> {
        self.get(field)
            .ok_or(DecodeError::MissingField { tag, field })
    }
}

fn non_empty(tag: &'static str, field: &'static str, value: &str) -> Result<String, DecodeError> {
    if value.is_empty() {
        Err(DecodeError::EmptyField { tag, field })
    } else {
        Ok(value.to_string())
    }
}

fn number(field: &'static str, value: &str) -> Result<u32, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn static_tag(tag: &str) -> &'static str {
    match tag {
        "CONNECT" => "CONNECT",
        "DISCONNECT" => "DISCONNECT",
        "HEARTBEAT" => "HEARTBEAT",
        "PRIVATE" => "PRIVATE",
        "USERLIST" => "USERLIST",
        _ => "NOTICE",
    }
}
