use std::{fmt, str::FromStr};

use crate::ExchangeError;

/// Flag that marks an UPLOAD payload as compressed.
pub const COMPRESS_FLAG: &str = "COMPRESS";
/// Flag that asks for a DOWNLOAD payload to be sent compressed.
pub const DECOMPRESS_FLAG: &str = "DECOMPRESS";

/// A parsed control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `UPLOAD <filename> <size> [COMPRESS]`, followed by `size` payload bytes.
    Upload {
        filename: String,
        size: u64,
        compressed: bool,
    },
    /// `DOWNLOAD <filename> [DECOMPRESS]`
    Download { filename: String, compressed: bool },
    /// `LIST`
    List,
    /// `SEARCH <pattern>`
    Search { pattern: String },
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Upload { .. } => "UPLOAD",
            Command::Download { .. } => "DOWNLOAD",
            Command::List => "LIST",
            Command::Search { .. } => "SEARCH",
        }
    }

    /// Parse one control line (without its newline).
    pub fn parse(line: &str) -> Result<Self, ExchangeError> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| ExchangeError::ProtocolError("empty command".to_string()))?
            .to_ascii_uppercase();
        let args: Vec<&str> = parts.collect();

        let arity = |expected: &str| {
            ExchangeError::ProtocolError(format!(
                "invalid '{verb}' command, expected {expected} argument(s) but got {}",
                args.len()
            ))
        };

        match verb.as_str() {
            "UPLOAD" => match args.as_slice() {
                [filename, size] | [filename, size, _] => Ok(Command::Upload {
                    filename: filename.to_string(),
                    size: parse_size(size)?,
                    compressed: parse_flag(args.get(2), COMPRESS_FLAG)?,
                }),
                _ => Err(arity("2 or 3")),
            },
            "DOWNLOAD" => match args.as_slice() {
                [filename] | [filename, _] => Ok(Command::Download {
                    filename: filename.to_string(),
                    compressed: parse_flag(args.get(1), DECOMPRESS_FLAG)?,
                }),
                _ => Err(arity("1 or 2")),
            },
            "LIST" if args.is_empty() => Ok(Command::List),
            "LIST" => Err(arity("0")),
            "SEARCH" => match args.as_slice() {
                [pattern] => Ok(Command::Search {
                    pattern: pattern.to_string(),
                }),
                _ => Err(arity("1")),
            },
            _ => Err(ExchangeError::ProtocolError(format!(
                "unrecognized command '{verb}'"
            ))),
        }
    }

    /// Wire form, newline included.
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Upload {
                filename,
                size,
                compressed,
            } => {
                write!(f, "UPLOAD {filename} {size}")?;
                if *compressed {
                    write!(f, " {COMPRESS_FLAG}")?;
                }
                Ok(())
            }
            Command::Download {
                filename,
                compressed,
            } => {
                write!(f, "DOWNLOAD {filename}")?;
                if *compressed {
                    write!(f, " {DECOMPRESS_FLAG}")?;
                }
                Ok(())
            }
            Command::List => f.write_str("LIST"),
            Command::Search { pattern } => write!(f, "SEARCH {pattern}"),
        }
    }
}

impl FromStr for Command {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

/// Encode a command as a control line.
pub fn encode_command(command: &Command) -> Vec<u8> {
    command.encode()
}

fn parse_size(raw: &str) -> Result<u64, ExchangeError> {
    raw.parse().map_err(|_| {
        ExchangeError::ProtocolError(format!("size '{raw}' is not a non-negative integer"))
    })
}

fn parse_flag(raw: Option<&&str>, expected: &str) -> Result<bool, ExchangeError> {
    match raw {
        None => Ok(false),
        Some(flag) if flag.eq_ignore_ascii_case(expected) => Ok(true),
        Some(flag) => Err(ExchangeError::ProtocolError(format!(
            "unexpected argument '{flag}', expected '{expected}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_upload_with_flag() {
        let cmd = Command::parse("upload report.pdf 1024 compress").unwrap();
        assert_eq!(
            cmd,
            Command::Upload {
                filename: "report.pdf".into(),
                size: 1024,
                compressed: true
            }
        );
        assert_eq!(cmd.encode(), b"UPLOAD report.pdf 1024 COMPRESS\n");
    }

    #[test]
    fn parse_download_list_search() {
        assert_eq!(
            Command::parse("DOWNLOAD a.txt").unwrap(),
            Command::Download {
                filename: "a.txt".into(),
                compressed: false
            }
        );
        assert_eq!(Command::parse("  LIST  ").unwrap(), Command::List);
        assert_eq!(
            Command::parse("SEARCH *.mp4").unwrap(),
            Command::Search {
                pattern: "*.mp4".into()
            }
        );
    }

    #[test]
    fn negative_or_garbage_size_is_rejected() {
        for line in ["UPLOAD a -1", "UPLOAD a ten", "UPLOAD a 1.5"] {
            let err = Command::parse(line).unwrap_err();
            assert!(matches!(err, ExchangeError::ProtocolError(_)), "{line}");
        }
    }

    #[test]
    fn wrong_arity_and_unknown_verbs() {
        for line in [
            "",
            "UPLOAD a",
            "DOWNLOAD",
            "LIST extra",
            "SEARCH",
            "SEARCH a b",
            "DELETE a",
            "UPLOAD a 1 ZIP",
            "DOWNLOAD a COMPRESS",
        ] {
            assert!(Command::parse(line).is_err(), "{line:?} accepted");
        }
    }

    #[test]
    fn encoded_commands_parse_back() {
        let cmd = Command::Download {
            filename: "movie.mp4".into(),
            compressed: true,
        };
        let line = String::from_utf8(encode_command(&cmd)).unwrap();
        assert_eq!(line.trim_end().parse::<Command>().unwrap(), cmd);
    }
}
