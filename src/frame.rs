// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::{self, Cursor};
use std::str;

use bytes::{Buf, Bytes};
use itertools::Itertools;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Upper bound on the number of array slots allocated up front. The declared count comes from
/// the peer, so it is only trusted as far as the elements actually arrive.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("empty line")]
    EmptyLine,
    #[error("invalid frame data type: {0:?}")]
    InvalidDataType(char),
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("invalid bulk length")]
    InvalidBulkLength,
    #[error("invalid multibulk length")]
    InvalidArrayLength,
    #[error("invalid multibulk element, expected a bulk string header")]
    InvalidArrayElement,
    #[error("invalid UTF-8 string")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("frame size exceeds limit of {0} bytes")]
    FrameTooLarge(usize),
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Terminal errors end the decode stream; every other error only discards the frame that
    /// produced it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::InvalidInteger(_) | Error::FrameTooLarge(_) | Error::UnexpectedEof | Error::Io(_)
        )
    }
}

/// A single RESP value.
///
/// Bulk strings and arrays carry an `Option` because the protocol distinguishes a null value
/// (`$-1`, `*-1`) from an empty one (`$0`, `*0`). Array elements are always bulk strings, which is
/// all a command needs.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Option<Bytes>>>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Builds the array-of-bulk-strings form of a command.
    pub fn command(args: &[Bytes]) -> Frame {
        Frame::Array(Some(args.iter().cloned().map(Some).collect()))
    }

    /// Unpacks a command array into its arguments. Anything other than a non-null array of
    /// non-null bulk strings yields `None`.
    pub fn into_args(self) -> Option<Vec<Bytes>> {
        match self {
            Frame::Array(Some(elements)) => elements.into_iter().collect(),
            _ => None,
        }
    }

    /// Parses one frame starting at the cursor position.
    ///
    /// The input is read line by line: a frame header is everything up to `\n` (an optional
    /// `\r` before it is dropped), and bulk payloads are read as exactly `len + 2` bytes.
    /// `Error::Incomplete` means more input is needed and the cursor position is meaningless.
    /// For any other error the cursor sits right after the bytes that belong to the rejected
    /// frame.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let line = get_line(src)?;

        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let (&first_byte, content) = line.split_first().ok_or(Error::EmptyLine)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let string = str::from_utf8(content)?;
                Ok(Frame::Simple(string.to_string()))
            }
            DataType::SimpleError => {
                let string = str::from_utf8(content)?;
                Ok(Frame::Error(string.to_string()))
            }
            DataType::Integer => str::from_utf8(content)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Frame::Integer)
                .ok_or_else(|| Error::InvalidInteger(String::from_utf8_lossy(content).into())),
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = parse_length(content).ok_or(Error::InvalidBulkLength)?;
                match length {
                    None => Ok(Frame::Bulk(None)),
                    Some(length) => {
                        let data = get_body(src, length)?;
                        Ok(Frame::Bulk(Some(Bytes::copy_from_slice(data))))
                    }
                }
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let length = parse_length(content).ok_or(Error::InvalidArrayLength)?;
                let Some(length) = length else {
                    return Ok(Frame::Array(None));
                };

                let mut elements = Vec::with_capacity(length.min(MAX_PREALLOCATED_ELEMENTS));
                for _ in 0..length {
                    // Elements do not go through the general dispatcher: commands are arrays of
                    // bulk strings, so anything else aborts the whole array.
                    let header = get_line(src)?;
                    let length = match header.split_first() {
                        Some((b'$', content)) => {
                            parse_length(content).ok_or(Error::InvalidArrayElement)?
                        }
                        _ => return Err(Error::InvalidArrayElement),
                    };

                    let element = match length {
                        None => None,
                        Some(length) => Some(Bytes::copy_from_slice(get_body(src, length)?)),
                    };
                    elements.push(element);
                }

                Ok(Frame::Array(Some(elements)))
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleString));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Error(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleError));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Integer(i) => {
                let digits = i.to_string();
                let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
                bytes.push(u8::from(DataType::Integer));
                bytes.extend_from_slice(digits.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(data) => {
                let mut bytes = Vec::new();
                write_bulk(&mut bytes, data.as_deref());
                bytes
            }
            Frame::Array(None) => {
                let mut bytes = Vec::with_capacity(5);
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(b"-1");
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Array(Some(elements)) => {
                let length_str = elements.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(length_str.as_bytes());
                bytes.extend_from_slice(CRLF);
                for element in elements {
                    write_bulk(&mut bytes, element.as_deref());
                }
                bytes
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn bulk(data: &Option<Bytes>) -> String {
            match data {
                Some(bytes) => format!("{:?}", String::from_utf8_lossy(bytes)),
                None => "(nil)".to_string(),
            }
        }

        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(data) => write!(f, "{}", bulk(data)),
            Frame::Array(None) => write!(f, "(nil array)"),
            Frame::Array(Some(elements)) => {
                write!(f, "[{}]", elements.iter().map(bulk).format(", "))
            }
        }
    }
}

fn write_bulk(dst: &mut Vec<u8>, data: Option<&[u8]>) {
    dst.push(u8::from(DataType::BulkString));
    match data {
        None => dst.extend_from_slice(b"-1"),
        Some(data) => {
            dst.extend_from_slice(data.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            dst.extend_from_slice(data);
        }
    }
    dst.extend_from_slice(CRLF);
}

/// Parses a bulk or array length. `-1` is the null marker; anything below it is malformed.
fn parse_length(src: &[u8]) -> Option<Option<usize>> {
    let length = str::from_utf8(src).ok()?.parse::<i64>().ok()?;
    match length {
        -1 => Some(None),
        length => usize::try_from(length).ok().map(Some),
    }
}

/// Returns the next line without its terminator and moves the cursor past the `\n`.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;

    let end = buf[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((end + 1) as u64);

    let line = &buf[start..end];
    Ok(line.strip_suffix(b"\r").unwrap_or(line))
}

/// Reads a bulk payload of `length` bytes plus its two trailing terminator bytes.
fn get_body<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;
    let total = length.checked_add(CRLF.len()).ok_or(Error::InvalidBulkLength)?;

    if src.remaining() < total {
        return Err(Error::Incomplete);
    }
    src.advance(total);

    Ok(&buf[start..start + length])
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte as char)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
