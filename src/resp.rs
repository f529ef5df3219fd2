//! The line-oriented binary wire format.
//!
//! Requests are arrays of bulk strings; replies are any [`Value`]. The same
//! encoding is used for records in the persistence log, so the log replays
//! through the exact decode path used for live traffic.

use crate::error::ProtocolError;

const CRLF: &[u8] = b"\r\n";

/// Upper bound on a single bulk string, matching the usual server default.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// A decoded request element or an encoded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(String),
    Null,
    Array(Vec<Value>),
}

impl Value {
    pub fn ok() -> Value {
        Value::Simple("OK".to_string())
    }

    pub fn error(message: impl ToString) -> Value {
        Value::Error(message.to_string())
    }

    /// Appends the wire encoding of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Value::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Value::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            Value::Bulk(s) => {
                out.push(b'$');
                out.extend_from_slice(s.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Value::Null => out.extend_from_slice(b"$-1\r\n"),
            Value::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Decodes one request from the front of `buf`.
///
/// Only bulk strings and a single level of array are accepted. Returns
/// `Ok(None)` when `buf` holds only a prefix of a frame, otherwise the value
/// together with the number of bytes it occupied.
pub fn parse(buf: &[u8]) -> Result<Option<(Value, usize)>, ProtocolError> {
    decode(buf, Frame::Request)
}

/// Decodes one reply from the front of `buf`. Accepts every [`Value`] form,
/// with arrays nested at most [`MAX_REPLY_DEPTH`] deep.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Value, usize)>, ProtocolError> {
    decode(buf, Frame::Reply)
}

/// EXEC of a command that itself replies with an array is two levels deep.
pub const MAX_REPLY_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Request,
    Reply,
}

impl Frame {
    fn max_depth(self) -> usize {
        match self {
            Frame::Request => 1,
            Frame::Reply => MAX_REPLY_DEPTH,
        }
    }
}

fn decode(buf: &[u8], frame: Frame) -> Result<Option<(Value, usize)>, ProtocolError> {
    let mut pos = 0;
    Ok(parse_at(buf, &mut pos, frame, 0)?.map(|value| (value, pos)))
}

fn parse_at(buf: &[u8], pos: &mut usize, frame: Frame, depth: usize) -> Result<Option<Value>, ProtocolError> {
    let Some(&tag) = buf.get(*pos) else {
        return Ok(None);
    };
    *pos += 1;

    match tag {
        b'*' => {
            if depth >= frame.max_depth() {
                return Err(ProtocolError::TooDeep(frame.max_depth()));
            }
            let Some(len) = read_length(buf, pos)? else {
                return Ok(None);
            };
            if len == -1 {
                return Ok(Some(Value::Null));
            }

            let mut items = Vec::with_capacity(len.min(1024) as usize);
            for _ in 0..len {
                match parse_at(buf, pos, frame, depth + 1)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Array(items)))
        }
        b'$' => {
            let Some(len) = read_length(buf, pos)? else {
                return Ok(None);
            };
            if len == -1 {
                return Ok(Some(Value::Null));
            }

            let len = len as usize;
            let end = *pos + len;
            if buf.len() < end + CRLF.len() {
                return Ok(None);
            }
            if &buf[end..end + CRLF.len()] != CRLF {
                return Err(ProtocolError::MissingTerminator);
            }

            let bulk = String::from_utf8(buf[*pos..end].to_vec())
                .map_err(|_| ProtocolError::InvalidUtf8)?;
            *pos = end + CRLF.len();
            Ok(Some(Value::Bulk(bulk)))
        }
        b'+' | b'-' | b':' if frame == Frame::Reply => {
            let Some(line) = read_line(buf, pos)? else {
                return Ok(None);
            };
            Ok(Some(match tag {
                b'+' => Value::Simple(line),
                b'-' => Value::Error(line),
                _ => Value::Integer(line.parse().map_err(|_| ProtocolError::InvalidInteger(line))?),
            }))
        }
        other => Err(ProtocolError::UnknownType(other as char)),
    }
}

/// Reads the rest of a `<text>\r\n` line.
fn read_line(buf: &[u8], pos: &mut usize) -> Result<Option<String>, ProtocolError> {
    let rest = &buf[*pos..];
    let Some(line_end) = rest.windows(CRLF.len()).position(|w| w == CRLF) else {
        return Ok(None);
    };

    let line = String::from_utf8(rest[..line_end].to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
    *pos += line_end + CRLF.len();
    Ok(Some(line))
}

/// Reads a `<digits>\r\n` length header. Valid lengths are -1 or above.
fn read_length(buf: &[u8], pos: &mut usize) -> Result<Option<i64>, ProtocolError> {
    let rest = &buf[*pos..];
    let Some(line_end) = rest.windows(CRLF.len()).position(|w| w == CRLF) else {
        return Ok(None);
    };

    let text = String::from_utf8_lossy(&rest[..line_end]);
    let len: i64 = text
        .parse()
        .map_err(|_| ProtocolError::InvalidLength(text.to_string()))?;
    if !(-1..=MAX_BULK_LEN).contains(&len) {
        return Err(ProtocolError::InvalidLength(text.to_string()));
    }

    *pos += line_end + CRLF.len();
    Ok(Some(len))
}

/// A command name followed by its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    name: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Invocation { name: name.into(), args }
    }

    /// Builds an invocation from a decoded request array.
    ///
    /// Null elements become empty strings. Returns `None` for anything that
    /// is not a non-empty array of bulk strings.
    pub fn from_value(value: Value) -> Option<Invocation> {
        let Value::Array(items) = value else {
            return None;
        };

        let mut words = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Bulk(s) | Value::Simple(s) => words.push(s),
                Value::Null => words.push(String::new()),
                _ => return None,
            }
        }

        let mut words = words.into_iter();
        let name = words.next()?;
        Some(Invocation { name, args: words.collect() })
    }

    /// Splits a whitespace-separated line into an invocation.
    pub fn from_line(line: &str) -> Option<Invocation> {
        let mut words = line.split_whitespace().map(str::to_string);
        let name = words.next()?;
        Some(Invocation { name, args: words.collect() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper-cased command name used for dispatch.
    pub fn command(&self) -> String {
        self.name.to_ascii_uppercase()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(Value::Bulk(self.name.clone()));
        items.extend(self.args.iter().cloned().map(Value::Bulk));
        Value::Array(items)
    }
}
