//! WeeChat relay binary protocol.
//!
//! Server messages are framed as:
//!
//! ```text
//! length (u32 BE, includes itself) | compression (u8) | data
//! data = id (str) | object*
//! object = type (3 ASCII chars) | value
//! ```
//!
//! Only the object types the bridge needs to read are decoded; client
//! commands are plain text lines.

use std::collections::HashMap;
use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::common::error::{RelayError, RelayResult};
use crate::common::{Buffer, RelayEvent};

/// Size of the length + compression header.
const HEADER_SIZE: usize = 5;

/// Upper bound for a single message (after decompression too).
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const COMPRESSION_OFF: u8 = 0;
const COMPRESSION_ZLIB: u8 = 1;

/// Message id of the reply to the initial buffer listing.
pub const BUFFERS_ID: &str = "buffers";

/// A decoded object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Char(i8),
    Int(i32),
    Long(i64),
    Str(Option<String>),
    Buf(Option<Vec<u8>>),
    /// Hex pointer without `0x`; `"0"` is NULL.
    Ptr(String),
    Time(i64),
    Hashtable(Vec<(Value, Value)>),
    Hdata(Hdata),
    Info {
        name: Option<String>,
        value: Option<String>,
    },
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => s.as_deref(),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<&str> {
        match self {
            Value::Ptr(p) => Some(p.as_str()),
            _ => None,
        }
    }

    /// String elements of an array, NULL entries skipped.
    pub fn as_str_array(&self) -> Vec<String> {
        match self {
            Value::Array(values) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Hdata object: a list of items along an hdata path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hdata {
    pub path: Vec<String>,
    pub items: Vec<HdataItem>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HdataItem {
    /// One pointer per path element.
    pub pointers: Vec<String>,
    pub fields: HashMap<String, Value>,
}

impl HdataItem {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Pointer of the last path element.
    pub fn pointer(&self) -> Option<&str> {
        self.pointers.last().map(String::as_str)
    }
}

/// A complete server message.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayMessage {
    pub id: String,
    pub objects: Vec<Value>,
}

impl RelayMessage {
    fn hdata(&self) -> Option<&Hdata> {
        self.objects.iter().find_map(|o| match o {
            Value::Hdata(h) => Some(h),
            _ => None,
        })
    }

    /// Buffers listed by an hdata reply with a `full_name` field.
    pub fn buffers(&self) -> Vec<Buffer> {
        let Some(hdata) = self.hdata() else {
            return Vec::new();
        };

        hdata
            .items
            .iter()
            .filter_map(|item| {
                Some(Buffer {
                    pointer: item.pointer()?.to_string(),
                    full_name: item.str_field("full_name")?.to_string(),
                })
            })
            .collect()
    }

    /// Interpret a message as one of the events the bridge consumes.
    pub fn to_event(&self) -> Option<RelayEvent> {
        match self.id.as_str() {
            "_buffer_line_added" => {
                let item = self.hdata()?.items.first()?;
                Some(RelayEvent::LineAdded {
                    buffer_pointer: item.fields.get("buffer")?.as_ptr()?.to_string(),
                    message: item.str_field("message").unwrap_or_default().to_string(),
                    prefix: item.str_field("prefix").unwrap_or_default().to_string(),
                    tags: item
                        .fields
                        .get("tags_array")
                        .map(Value::as_str_array)
                        .unwrap_or_default(),
                })
            }
            "_buffer_opened" => self.buffers().into_iter().next().map(RelayEvent::BufferOpened),
            "_buffer_closing" => self.buffers().into_iter().next().map(RelayEvent::BufferClosing),
            _ => None,
        }
    }
}

/// Client commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init { password: String },
    Ping,
    /// Request `full_name` of every buffer, answered with id [`BUFFERS_ID`].
    ListBuffers,
    Sync,
    Input { buffer: String, text: String },
    Quit,
}

impl Command {
    fn line(&self) -> String {
        match self {
            Command::Init { password } => format!("init password={},compression=off", password),
            Command::Ping => "ping".to_string(),
            Command::ListBuffers => {
                format!("({}) hdata buffer:gui_buffers(*) full_name", BUFFERS_ID)
            }
            Command::Sync => "sync".to_string(),
            Command::Input { buffer, text } => format!("input {} {}", buffer, text),
            Command::Quit => "quit".to_string(),
        }
    }
}

/// Codec for relay messages (decode) and commands (encode).
#[derive(Debug, Default)]
pub struct RelayCodec;

impl Decoder for RelayCodec {
    type Item = RelayMessage;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < HEADER_SIZE {
            return Err(RelayError::MessageTooShort {
                needed: HEADER_SIZE,
                got: length,
            });
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(RelayError::Protocol {
                message: format!("message of {} bytes exceeds limit", length),
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(4);
        let compression = frame.get_u8();

        let data = match compression {
            COMPRESSION_OFF => frame.freeze(),
            COMPRESSION_ZLIB => inflate(&frame)?,
            other => {
                return Err(RelayError::Protocol {
                    message: format!("unsupported compression {}", other),
                })
            }
        };

        parse_message(data).map(Some)
    }
}

impl Encoder<Command> for RelayCodec {
    type Error = RelayError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.line();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// A framed relay connection.
pub type RelayConnection<S> = Framed<S, RelayCodec>;

pub fn new_relay_connection<S: AsyncRead + AsyncWrite>(stream: S) -> RelayConnection<S> {
    Framed::new(stream, RelayCodec)
}

fn inflate(compressed: &[u8]) -> RelayResult<Bytes> {
    let mut out = Vec::new();
    ZlibDecoder::new(compressed)
        .take(MAX_MESSAGE_SIZE as u64)
        .read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

fn parse_message(mut data: Bytes) -> RelayResult<RelayMessage> {
    let id = read_string(&mut data)?.unwrap_or_default();
    let mut objects = Vec::new();
    while data.has_remaining() {
        let kind = read_type(&mut data)?;
        objects.push(read_value(&mut data, &kind)?);
    }
    Ok(RelayMessage { id, objects })
}

fn ensure(buf: &Bytes, needed: usize) -> RelayResult<()> {
    if buf.remaining() < needed {
        return Err(RelayError::MessageTooShort {
            needed,
            got: buf.remaining(),
        });
    }
    Ok(())
}

fn read_type(buf: &mut Bytes) -> RelayResult<String> {
    ensure(buf, 3)?;
    let raw = buf.split_to(3);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn read_int(buf: &mut Bytes) -> RelayResult<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

fn read_count(buf: &mut Bytes) -> RelayResult<usize> {
    let count = read_int(buf)?;
    usize::try_from(count).map_err(|_| RelayError::Protocol {
        message: format!("negative count {}", count),
    })
}

/// `int` length followed by bytes; length -1 is NULL.
fn read_bytes(buf: &mut Bytes) -> RelayResult<Option<Bytes>> {
    let length = read_int(buf)?;
    if length < 0 {
        return Ok(None);
    }
    let length = length as usize;
    ensure(buf, length)?;
    Ok(Some(buf.split_to(length)))
}

fn read_string(buf: &mut Bytes) -> RelayResult<Option<String>> {
    Ok(read_bytes(buf)?.map(|b| String::from_utf8_lossy(&b).into_owned()))
}

/// One byte length followed by ASCII (used by `lon`, `ptr`, `tim`).
fn read_short_ascii(buf: &mut Bytes) -> RelayResult<String> {
    ensure(buf, 1)?;
    let length = buf.get_u8() as usize;
    ensure(buf, length)?;
    let raw = buf.split_to(length);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn read_number(buf: &mut Bytes) -> RelayResult<i64> {
    let text = read_short_ascii(buf)?;
    text.parse().map_err(|_| RelayError::Protocol {
        message: format!("invalid number '{}'", text),
    })
}

fn read_value(buf: &mut Bytes, kind: &str) -> RelayResult<Value> {
    let value = match kind {
        "chr" => {
            ensure(buf, 1)?;
            Value::Char(buf.get_i8())
        }
        "int" => Value::Int(read_int(buf)?),
        "lon" => Value::Long(read_number(buf)?),
        "str" => Value::Str(read_string(buf)?),
        "buf" => Value::Buf(read_bytes(buf)?.map(|b| b.to_vec())),
        "ptr" => Value::Ptr(read_short_ascii(buf)?),
        "tim" => Value::Time(read_number(buf)?),
        "htb" => {
            let key_type = read_type(buf)?;
            let value_type = read_type(buf)?;
            let count = read_count(buf)?;
            let mut pairs = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let key = read_value(buf, &key_type)?;
                let value = read_value(buf, &value_type)?;
                pairs.push((key, value));
            }
            Value::Hashtable(pairs)
        }
        "hda" => Value::Hdata(read_hdata(buf)?),
        "inf" => Value::Info {
            name: read_string(buf)?,
            value: read_string(buf)?,
        },
        "arr" => {
            let item_type = read_type(buf)?;
            let count = read_count(buf)?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(read_value(buf, &item_type)?);
            }
            Value::Array(items)
        }
        other => {
            return Err(RelayError::Protocol {
                message: format!("unsupported object type '{}'", other),
            })
        }
    };
    Ok(value)
}

fn read_hdata(buf: &mut Bytes) -> RelayResult<Hdata> {
    let path: Vec<String> = read_string(buf)?
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let keys: Vec<(String, String)> = read_string(buf)?
        .unwrap_or_default()
        .split(',')
        .filter_map(|key| {
            let (name, kind) = key.split_once(':')?;
            Some((name.to_string(), kind.to_string()))
        })
        .collect();

    let count = read_count(buf)?;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let mut pointers = Vec::with_capacity(path.len());
        for _ in 0..path.len() {
            pointers.push(read_short_ascii(buf)?);
        }
        let mut fields = HashMap::with_capacity(keys.len());
        for (name, kind) in &keys {
            fields.insert(name.clone(), read_value(buf, kind)?);
        }
        items.push(HdataItem { pointers, fields });
    }

    Ok(Hdata { path, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Minimal writer mirroring the server side of the protocol.
    #[derive(Default)]
    struct Body(BytesMut);

    impl Body {
        fn string(mut self, s: &str) -> Self {
            self.0.put_i32(s.len() as i32);
            self.0.put_slice(s.as_bytes());
            self
        }

        fn null_string(mut self) -> Self {
            self.0.put_i32(-1);
            self
        }

        fn kind(mut self, kind: &str) -> Self {
            self.0.put_slice(kind.as_bytes());
            self
        }

        fn short(mut self, s: &str) -> Self {
            self.0.put_u8(s.len() as u8);
            self.0.put_slice(s.as_bytes());
            self
        }

        fn byte(mut self, v: u8) -> Self {
            self.0.put_u8(v);
            self
        }

        fn int(mut self, v: i32) -> Self {
            self.0.put_i32(v);
            self
        }

        fn frame(self, compression: u8) -> BytesMut {
            let data = if compression == COMPRESSION_ZLIB {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&self.0).unwrap();
                encoder.finish().unwrap()
            } else {
                self.0.to_vec()
            };
            let mut out = BytesMut::new();
            out.put_u32((HEADER_SIZE + data.len()) as u32);
            out.put_u8(compression);
            out.put_slice(&data);
            out
        }
    }

    fn line_added_body() -> Body {
        Body::default()
            .string("_buffer_line_added")
            .kind("hda")
            .string("line_data")
            .string("buffer:ptr,tags_array:arr,prefix:str,message:str")
            .int(1)
            .short("55d0c0a0")
            .short("55d0c0a0")
            .kind("str")
            .int(2)
            .string("irc_privmsg")
            .string("nick_alice")
            .string("alice")
            .string("hello \x19F05world")
    }

    #[test]
    fn test_decode_line_added() {
        let mut src = line_added_body().frame(COMPRESSION_OFF);
        let message = RelayCodec.decode(&mut src).unwrap().unwrap();
        assert!(src.is_empty());
        assert_eq!(message.id, "_buffer_line_added");

        match message.to_event() {
            Some(RelayEvent::LineAdded {
                buffer_pointer,
                message,
                prefix,
                tags,
            }) => {
                assert_eq!(buffer_pointer, "55d0c0a0");
                assert_eq!(message, "hello \x19F05world");
                assert_eq!(prefix, "alice");
                assert_eq!(tags, vec!["irc_privmsg", "nick_alice"]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_zlib_message() {
        let mut src = line_added_body().frame(COMPRESSION_ZLIB);
        let message = RelayCodec.decode(&mut src).unwrap().unwrap();
        assert!(matches!(message.to_event(), Some(RelayEvent::LineAdded { .. })));
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let full = line_added_body().frame(COMPRESSION_OFF);
        let mut src = BytesMut::from(&full[..10]);
        assert!(RelayCodec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&full[10..]);
        assert!(RelayCodec.decode(&mut src).unwrap().is_some());
    }

    #[test]
    fn test_buffer_listing_and_open_event() {
        let body = |id: &str| {
            Body::default()
                .string(id)
                .kind("hda")
                .string("buffer")
                .string("full_name:str")
                .int(2)
                .short("1a")
                .string("core.weechat")
                .short("2b")
                .string("irc.libera.nick")
        };

        let mut src = body(BUFFERS_ID).frame(COMPRESSION_OFF);
        let listing = RelayCodec.decode(&mut src).unwrap().unwrap();
        let buffers = listing.buffers();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[1].pointer, "2b");
        assert_eq!(buffers[1].full_name, "irc.libera.nick");
        assert_eq!(listing.to_event(), None);

        let mut src = body("_buffer_closing").frame(COMPRESSION_OFF);
        let closing = RelayCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(
            closing.to_event(),
            Some(RelayEvent::BufferClosing(Buffer {
                pointer: "1a".to_string(),
                full_name: "core.weechat".to_string(),
            }))
        );
    }

    #[test]
    fn test_scalar_objects() {
        let body = Body::default()
            .string("_pong")
            .kind("chr")
            .byte(65)
            .kind("int")
            .int(-7)
            .kind("lon")
            .short("1234567890123")
            .kind("tim")
            .short("1321993456")
            .kind("str")
            .null_string()
            .kind("inf")
            .string("version")
            .string("4.1.0")
            .kind("htb")
            .kind("str")
            .kind("int")
            .int(1)
            .string("key")
            .int(3);

        let mut src = body.frame(COMPRESSION_OFF);
        let message = RelayCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(message.id, "_pong");
        assert_eq!(
            message.objects,
            vec![
                Value::Char(65),
                Value::Int(-7),
                Value::Long(1234567890123),
                Value::Time(1321993456),
                Value::Str(None),
                Value::Info {
                    name: Some("version".to_string()),
                    value: Some("4.1.0".to_string()),
                },
                Value::Hashtable(vec![(Value::Str(Some("key".to_string())), Value::Int(3))]),
            ]
        );
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let mut src = Body::default().string("x").kind("zzz").frame(COMPRESSION_OFF);
        assert!(matches!(
            RelayCodec.decode(&mut src),
            Err(RelayError::Protocol { .. })
        ));
    }

    #[test]
    fn test_truncated_object_is_an_error() {
        let mut src = Body::default().string("x").kind("int").frame(COMPRESSION_OFF);
        assert!(matches!(
            RelayCodec.decode(&mut src),
            Err(RelayError::MessageTooShort { .. })
        ));
    }

    #[test]
    fn test_encode_commands() {
        let mut dst = BytesMut::new();
        RelayCodec
            .encode(
                Command::Input {
                    buffer: "irc.libera.#rust".to_string(),
                    text: "hi there".to_string(),
                },
                &mut dst,
            )
            .unwrap();
        RelayCodec
            .encode(Command::Init { password: "pw".to_string() }, &mut dst)
            .unwrap();
        RelayCodec.encode(Command::ListBuffers, &mut dst).unwrap();
        assert_eq!(
            &dst[..],
            b"input irc.libera.#rust hi there\ninit password=pw,compression=off\n(buffers) hdata buffer:gui_buffers(*) full_name\n"
        );
    }
}
