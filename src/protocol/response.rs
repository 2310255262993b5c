use crate::{ErrorKind, ExchangeError, storage::FileRecord};

/// A reply written by the server after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Upload committed: `OK <stored size>`.
    Stored { size: u64 },
    /// Download header: `OK <payload size>`, payload follows.
    Payload { size: u64 },
    /// LIST/SEARCH result: `OK <count>` and one `<name> <size>` line per file.
    Listing(Vec<FileRecord>),
    /// `ERROR:<kind> <message>`; the connection is closed afterwards.
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Response::Stored { size } | Response::Payload { size } => {
                format!("OK {size}\n").into_bytes()
            }
            Response::Listing(records) => {
                let mut out = format!("OK {}\n", records.len());
                for record in records {
                    out.push_str(&format!("{} {}\n", record.name, record.size));
                }
                out.into_bytes()
            }
            Response::Error { kind, message } => {
                let message = message.replace(['\r', '\n'], " ");
                format!("ERROR:{kind} {message}\n").into_bytes()
            }
        }
    }
}

impl From<&ExchangeError> for Response {
    fn from(err: &ExchangeError) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

/// Interpret the first line of a reply.
///
/// `OK <n>` yields `n`. An `ERROR:<kind>` line yields the matching
/// [`ExchangeError`], chosen from the kind token alone.
pub fn parse_status(line: &str) -> Result<u64, ExchangeError> {
    if let Some(rest) = line.strip_prefix("ERROR:") {
        let (kind, message) = rest.split_once(' ').unwrap_or((rest, ""));
        let kind: ErrorKind = kind.parse()?;
        return Err(ExchangeError::new(kind, message));
    }

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("OK"), Some(value), None) => value.parse().map_err(|_| {
            ExchangeError::ProtocolError(format!("malformed status value '{value}'"))
        }),
        _ => Err(ExchangeError::ProtocolError(format!(
            "unexpected reply '{line}'"
        ))),
    }
}

/// Parse one `<name> <size>` line of a listing.
pub fn parse_record(line: &str) -> Result<FileRecord, ExchangeError> {
    let malformed = || ExchangeError::ProtocolError(format!("malformed listing line '{line}'"));
    let (name, size) = line.rsplit_once(' ').ok_or_else(malformed)?;
    if name.is_empty() {
        return Err(malformed());
    }
    let size = size.parse().map_err(|_| malformed())?;
    Ok(FileRecord::new(name, size))
}
