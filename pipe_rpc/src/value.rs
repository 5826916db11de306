// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The value codec (component C1): a tagged union over a fixed set of
//! scalar/string/binary kinds, and the four message envelopes built from it.
//!
//! Every type here follows the same three-operation shape: `size()` (exact
//! byte count), `serialize(buf, off)` (write into a pre-sized buffer,
//! return the new offset), and `deserialize(buf, off)` (the inverse,
//! fallible).

use crate::error::Error;

/// A declared array length or string/binary length beyond these caps is
/// rejected rather than trusted.
pub const MAX_ELEMENTS: usize = 1 << 20;
pub const MAX_BYTES: usize = 64 * 1024 * 1024;

/// The kind discriminant of a [`Value`], also used to mangle function
/// signatures into their `unique_id` (see [`crate::registry`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Float32,
    Float64,
    Int32,
    Int64,
    UInt32,
    UInt64,
    String,
    Binary,
}

impl Kind {
    pub(crate) fn discriminant(self) -> u8 {
        match self {
            Kind::Null => 0,
            Kind::Float32 => 1,
            Kind::Float64 => 2,
            Kind::Int32 => 3,
            Kind::Int64 => 4,
            Kind::UInt32 => 5,
            Kind::UInt64 => 6,
            Kind::String => 7,
            Kind::Binary => 8,
        }
    }

    pub(crate) fn from_discriminant(v: u8) -> Result<Kind, Error> {
        Ok(match v {
            0 => Kind::Null,
            1 => Kind::Float32,
            2 => Kind::Float64,
            3 => Kind::Int32,
            4 => Kind::Int64,
            5 => Kind::UInt32,
            6 => Kind::UInt64,
            7 => Kind::String,
            8 => Kind::Binary,
            other => return Err(Error::DecodeError(format!("unknown value kind tag {other}"))),
        })
    }

    /// The mangled code used in a function's `unique_id`: `N0`, `F4`, `F8`,
    /// `I4`, `I8`, `U4`, `U8`, `PS`, `PB`.
    pub fn code(self) -> &'static str {
        match self {
            Kind::Null => "N0",
            Kind::Float32 => "F4",
            Kind::Float64 => "F8",
            Kind::Int32 => "I4",
            Kind::Int64 => "I8",
            Kind::UInt32 => "U4",
            Kind::UInt64 => "U8",
            Kind::String => "PS",
            Kind::Binary => "PB",
        }
    }
}

/// A tagged union: exactly one payload is meaningful, selected by `kind()`.
///
/// `String` stores raw bytes rather than `std::string::String` because the
/// wire contract is explicit that the payload is UTF-8 *unvalidated* --
/// validating on every decode would reject wire-valid messages a C++ peer
/// could legally send.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Float32(f32),
    Float64(f64),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    String(Vec<u8>),
    Binary(Vec<u8>),
}

impl Value {
    /// Convenience constructor for the common case of a valid UTF-8 string.
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into().into_bytes())
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Float32(_) => Kind::Float32,
            Value::Float64(_) => Kind::Float64,
            Value::Int32(_) => Kind::Int32,
            Value::Int64(_) => Kind::Int64,
            Value::UInt32(_) => Kind::UInt32,
            Value::UInt64(_) => Kind::UInt64,
            Value::String(_) => Kind::String,
            Value::Binary(_) => Kind::Binary,
        }
    }

    /// The raw bytes of a `String`/`Binary` value, lossily decoded as UTF-8
    /// for display and error-message purposes. Returns `None` for any other
    /// kind.
    pub fn as_str_lossy(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Value::String(b) | Value::Binary(b) => Some(String::from_utf8_lossy(b)),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        1 + match self {
            Value::Null => 0,
            Value::Float32(_) => 4,
            Value::Float64(_) => 8,
            Value::Int32(_) => 4,
            Value::Int64(_) => 8,
            Value::UInt32(_) => 4,
            Value::UInt64(_) => 8,
            Value::String(b) | Value::Binary(b) => 4 + b.len(),
        }
    }

    /// Writes this value into `buf` at `off`, returning the offset just past
    /// the written bytes. Callers are expected to have sized `buf` with
    /// [`Value::size`] first (as every call site in this crate does).
    pub fn serialize(&self, buf: &mut [u8], off: usize) -> usize {
        let off = wire::put_u8(buf, off, self.kind().discriminant());
        match self {
            Value::Null => off,
            Value::Float32(v) => wire::put_f32(buf, off, *v),
            Value::Float64(v) => wire::put_f64(buf, off, *v),
            Value::Int32(v) => wire::put_i32(buf, off, *v),
            Value::Int64(v) => wire::put_i64(buf, off, *v),
            Value::UInt32(v) => wire::put_u32(buf, off, *v),
            Value::UInt64(v) => wire::put_u64(buf, off, *v),
            Value::String(b) | Value::Binary(b) => wire::put_bytes(buf, off, b),
        }
    }

    pub fn deserialize(buf: &[u8], off: usize) -> Result<(Value, usize), Error> {
        let (tag, off) = wire::get_u8(buf, off)?;
        Ok(match Kind::from_discriminant(tag)? {
            Kind::Null => (Value::Null, off),
            Kind::Float32 => {
                let (v, off) = wire::get_f32(buf, off)?;
                (Value::Float32(v), off)
            }
            Kind::Float64 => {
                let (v, off) = wire::get_f64(buf, off)?;
                (Value::Float64(v), off)
            }
            Kind::Int32 => {
                let (v, off) = wire::get_i32(buf, off)?;
                (Value::Int32(v), off)
            }
            Kind::Int64 => {
                let (v, off) = wire::get_i64(buf, off)?;
                (Value::Int64(v), off)
            }
            Kind::UInt32 => {
                let (v, off) = wire::get_u32(buf, off)?;
                (Value::UInt32(v), off)
            }
            Kind::UInt64 => {
                let (v, off) = wire::get_u64(buf, off)?;
                (Value::UInt64(v), off)
            }
            Kind::String => {
                let (b, off) = wire::get_bytes(buf, off)?;
                (Value::String(b), off)
            }
            Kind::Binary => {
                let (b, off) = wire::get_bytes(buf, off)?;
                (Value::Binary(b), off)
            }
        })
    }

    pub fn serialize_alloc(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        self.serialize(&mut buf, 0);
        buf
    }
}

/// Size of a `[Value]` array's wire encoding: u64-le count followed by each
/// value's own tagged encoding.
fn array_size(values: &[Value]) -> usize {
    8 + values.iter().map(Value::size).sum::<usize>()
}

fn array_serialize(values: &[Value], buf: &mut [u8], off: usize) -> usize {
    let mut off = wire::put_u64(buf, off, values.len() as u64);
    for v in values {
        off = v.serialize(buf, off);
    }
    off
}

fn array_deserialize(buf: &[u8], off: usize) -> Result<(Vec<Value>, usize), Error> {
    let (count, mut off) = wire::get_u64(buf, off)?;
    if count as usize > MAX_ELEMENTS {
        return Err(Error::BufferTooLarge);
    }
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (v, next) = Value::deserialize(buf, off)?;
        values.push(v);
        off = next;
    }
    Ok((values, off))
}

/// A call to invoke `function_name` in `class_name` (the collection name)
/// with `arguments`, correlated by `uid`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub uid: u64,
    pub class_name: String,
    pub function_name: String,
    pub arguments: Vec<Value>,
}

/// The reply to a [`FunctionCall`] with the same `uid`. An empty `error`
/// means success.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionReply {
    pub uid: u64,
    pub values: Vec<Value>,
    pub error: String,
}

impl FunctionReply {
    pub fn success(uid: u64, values: Vec<Value>) -> Self {
        FunctionReply {
            uid,
            values,
            error: String::new(),
        }
    }

    pub fn failure(uid: u64, error: impl Into<String>) -> Self {
        FunctionReply {
            uid,
            values: Vec::new(),
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// An optional legacy handshake message; not used for security, just a
/// token exchange a peer can ignore.
#[derive(Debug, Clone, PartialEq)]
pub struct Authenticate {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthenticateReply {
    pub auth: bool,
}

macro_rules! string_value_field {
    (size $s:expr) => {
        Value::String($s.clone().into_bytes()).size()
    };
    (write $buf:expr, $off:expr, $s:expr) => {
        Value::String($s.clone().into_bytes()).serialize($buf, $off)
    };
    (read $buf:expr, $off:expr) => {{
        let (v, off) = Value::deserialize($buf, $off)?;
        let Value::String(bytes) = v else {
            return Err(Error::DecodeError("expected string field".into()));
        };
        (String::from_utf8_lossy(&bytes).into_owned(), off)
    }};
}

impl FunctionCall {
    pub fn size(&self) -> usize {
        Value::UInt64(self.uid).size()
            + string_value_field!(size self.class_name)
            + string_value_field!(size self.function_name)
            + array_size(&self.arguments)
    }

    pub fn serialize(&self, buf: &mut [u8], off: usize) -> usize {
        let off = Value::UInt64(self.uid).serialize(buf, off);
        let off = string_value_field!(write buf, off, self.class_name);
        let off = string_value_field!(write buf, off, self.function_name);
        array_serialize(&self.arguments, buf, off)
    }

    pub fn deserialize(buf: &[u8], off: usize) -> Result<(FunctionCall, usize), Error> {
        let (uid_val, off) = Value::deserialize(buf, off)?;
        let Value::UInt64(uid) = uid_val else {
            return Err(Error::DecodeError("expected uid field".into()));
        };
        let (class_name, off) = string_value_field!(read buf, off);
        let (function_name, off) = string_value_field!(read buf, off);
        let (arguments, off) = array_deserialize(buf, off)?;
        Ok((
            FunctionCall {
                uid,
                class_name,
                function_name,
                arguments,
            },
            off,
        ))
    }

    pub fn serialize_alloc(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        self.serialize(&mut buf, 0);
        buf
    }
}

impl FunctionReply {
    pub fn size(&self) -> usize {
        Value::UInt64(self.uid).size() + array_size(&self.values) + string_value_field!(size self.error)
    }

    pub fn serialize(&self, buf: &mut [u8], off: usize) -> usize {
        let off = Value::UInt64(self.uid).serialize(buf, off);
        let off = array_serialize(&self.values, buf, off);
        string_value_field!(write buf, off, self.error)
    }

    pub fn deserialize(buf: &[u8], off: usize) -> Result<(FunctionReply, usize), Error> {
        let (uid_val, off) = Value::deserialize(buf, off)?;
        let Value::UInt64(uid) = uid_val else {
            return Err(Error::DecodeError("expected uid field".into()));
        };
        let (values, off) = array_deserialize(buf, off)?;
        let (error, off) = string_value_field!(read buf, off);
        Ok((FunctionReply { uid, values, error }, off))
    }

    pub fn serialize_alloc(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        self.serialize(&mut buf, 0);
        buf
    }
}

impl Authenticate {
    pub fn size(&self) -> usize {
        string_value_field!(size self.name) + string_value_field!(size self.password)
    }

    pub fn serialize(&self, buf: &mut [u8], off: usize) -> usize {
        let off = string_value_field!(write buf, off, self.name);
        string_value_field!(write buf, off, self.password)
    }

    pub fn deserialize(buf: &[u8], off: usize) -> Result<(Authenticate, usize), Error> {
        let (name, off) = string_value_field!(read buf, off);
        let (password, off) = string_value_field!(read buf, off);
        Ok((Authenticate { name, password }, off))
    }

    pub fn serialize_alloc(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        self.serialize(&mut buf, 0);
        buf
    }
}

impl AuthenticateReply {
    pub fn size(&self) -> usize {
        Value::Int32(self.auth as i32).size()
    }

    pub fn serialize(&self, buf: &mut [u8], off: usize) -> usize {
        Value::Int32(self.auth as i32).serialize(buf, off)
    }

    pub fn deserialize(buf: &[u8], off: usize) -> Result<(AuthenticateReply, usize), Error> {
        let (v, off) = Value::deserialize(buf, off)?;
        let Value::Int32(auth) = v else {
            return Err(Error::DecodeError("expected auth field".into()));
        };
        Ok((AuthenticateReply { auth: auth != 0 }, off))
    }

    pub fn serialize_alloc(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        self.serialize(&mut buf, 0);
        buf
    }
}

/// A one-byte discriminant prepended to the framed payload so the pump
/// doesn't have to peek at a field's type to decide whether a message is a
/// call or a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call(FunctionCall),
    Reply(FunctionReply),
    Authenticate(Authenticate),
    AuthenticateReply(AuthenticateReply),
}

impl Envelope {
    const TAG_CALL: u8 = 0x01;
    const TAG_REPLY: u8 = 0x02;
    const TAG_AUTH: u8 = 0x10;
    const TAG_AUTH_REPLY: u8 = 0x11;

    pub fn size(&self) -> usize {
        1 + match self {
            Envelope::Call(c) => c.size(),
            Envelope::Reply(r) => r.size(),
            Envelope::Authenticate(a) => a.size(),
            Envelope::AuthenticateReply(a) => a.size(),
        }
    }

    pub fn serialize_alloc(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        let tag = match self {
            Envelope::Call(_) => Self::TAG_CALL,
            Envelope::Reply(_) => Self::TAG_REPLY,
            Envelope::Authenticate(_) => Self::TAG_AUTH,
            Envelope::AuthenticateReply(_) => Self::TAG_AUTH_REPLY,
        };
        let off = wire::put_u8(&mut buf, 0, tag);
        match self {
            Envelope::Call(c) => c.serialize(&mut buf, off),
            Envelope::Reply(r) => r.serialize(&mut buf, off),
            Envelope::Authenticate(a) => a.serialize(&mut buf, off),
            Envelope::AuthenticateReply(a) => a.serialize(&mut buf, off),
        };
        buf
    }

    /// Decodes a whole framed payload (the bytes between the length prefix
    /// and the end of the frame) into an envelope.
    pub fn deserialize(buf: &[u8]) -> Result<Envelope, Error> {
        let (tag, off) = wire::get_u8(buf, 0)?;
        Ok(match tag {
            Self::TAG_CALL => Envelope::Call(FunctionCall::deserialize(buf, off)?.0),
            Self::TAG_REPLY => Envelope::Reply(FunctionReply::deserialize(buf, off)?.0),
            Self::TAG_AUTH => Envelope::Authenticate(Authenticate::deserialize(buf, off)?.0),
            Self::TAG_AUTH_REPLY => {
                Envelope::AuthenticateReply(AuthenticateReply::deserialize(buf, off)?.0)
            }
            other => {
                return Err(Error::ProtocolError(format!(
                    "unknown envelope discriminant 0x{other:02x}"
                )))
            }
        })
    }
}

/// Primitive little-endian get/put helpers, analogous in spirit to
/// `xdr_rpc`'s generated `helpers::get_*` functions but hand-written since
/// this codec has a fixed, small set of kinds rather than a schema compiler.
mod wire {
    use super::{Error, MAX_BYTES};

    pub fn put_u8(buf: &mut [u8], off: usize, v: u8) -> usize {
        buf[off] = v;
        off + 1
    }

    pub fn get_u8(buf: &[u8], off: usize) -> Result<(u8, usize), Error> {
        let b = *buf
            .get(off)
            .ok_or_else(|| Error::DecodeError("truncated u8".into()))?;
        Ok((b, off + 1))
    }

    macro_rules! le_prim {
        ($put:ident, $get:ident, $ty:ty, $len:expr) => {
            pub fn $put(buf: &mut [u8], off: usize, v: $ty) -> usize {
                buf[off..off + $len].copy_from_slice(&v.to_le_bytes());
                off + $len
            }

            pub fn $get(buf: &[u8], off: usize) -> Result<($ty, usize), Error> {
                let end = off
                    .checked_add($len)
                    .ok_or_else(|| Error::DecodeError("offset overflow".into()))?;
                let slice = buf
                    .get(off..end)
                    .ok_or_else(|| Error::DecodeError(concat!("truncated ", stringify!($ty)).into()))?;
                Ok((<$ty>::from_le_bytes(slice.try_into().unwrap()), end))
            }
        };
    }

    le_prim!(put_u32, get_u32, u32, 4);
    le_prim!(put_u64, get_u64, u64, 8);
    le_prim!(put_i32, get_i32, i32, 4);
    le_prim!(put_i64, get_i64, i64, 8);
    le_prim!(put_f32, get_f32, f32, 4);
    le_prim!(put_f64, get_f64, f64, 8);

    pub fn put_bytes(buf: &mut [u8], off: usize, data: &[u8]) -> usize {
        let off = put_u32(buf, off, data.len() as u32);
        buf[off..off + data.len()].copy_from_slice(data);
        off + data.len()
    }

    pub fn get_bytes(buf: &[u8], off: usize) -> Result<(Vec<u8>, usize), Error> {
        let (len, off) = get_u32(buf, off)?;
        if len as usize > MAX_BYTES {
            return Err(Error::BufferTooLarge);
        }
        let end = off
            .checked_add(len as usize)
            .ok_or_else(|| Error::DecodeError("offset overflow".into()))?;
        let slice = buf
            .get(off..end)
            .ok_or_else(|| Error::DecodeError("truncated string/binary payload".into()))?;
        Ok((slice.to_vec(), end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_value(v: Value) {
        let buf = v.serialize_alloc();
        assert_eq!(buf.len(), v.size());
        let (back, off) = Value::deserialize(&buf, 0).unwrap();
        assert_eq!(off, buf.len());
        assert_eq!(back, v);
    }

    #[test]
    fn value_round_trip_every_kind() {
        roundtrip_value(Value::Null);
        roundtrip_value(Value::Float32(1.5));
        roundtrip_value(Value::Float64(-2.25));
        roundtrip_value(Value::Int32(-7));
        roundtrip_value(Value::Int64(-(1i64 << 40)));
        roundtrip_value(Value::UInt32(42));
        roundtrip_value(Value::UInt64(u64::MAX));
        roundtrip_value(Value::string("hello"));
        roundtrip_value(Value::Binary(vec![0xAB; 1024]));
    }

    #[test]
    fn unknown_discriminant_is_decode_error() {
        let buf = [0xFFu8];
        let err = Value::deserialize(&buf, 0).unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn truncated_string_length_is_decode_error() {
        // Kind::String tag, then a length that claims more bytes than present.
        let mut buf = vec![Kind::String.discriminant()];
        buf.extend_from_slice(&100u32.to_le_bytes());
        let err = Value::deserialize(&buf, 0).unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn mangled_codes_match_expected_letters() {
        assert_eq!(Kind::Int32.code(), "I4");
        assert_eq!(Kind::String.code(), "PS");
    }

    #[test]
    fn function_call_round_trip() {
        let call = FunctionCall {
            uid: 7,
            class_name: "Default".into(),
            function_name: "echo".into(),
            arguments: vec![Value::UInt64(7)],
        };
        let buf = call.serialize_alloc();
        let (back, off) = FunctionCall::deserialize(&buf, 0).unwrap();
        assert_eq!(off, buf.len());
        assert_eq!(back, call);
    }

    #[test]
    fn function_reply_error_round_trip() {
        let reply = FunctionReply::failure(3, "Class 'Missing' is not registered.");
        let buf = reply.serialize_alloc();
        let (back, _) = FunctionReply::deserialize(&buf, 0).unwrap();
        assert_eq!(back, reply);
        assert!(!back.is_success());
    }

    #[test]
    fn envelope_round_trip_preserves_discriminant() {
        let call = Envelope::Call(FunctionCall {
            uid: 1,
            class_name: "Math".into(),
            function_name: "add".into(),
            arguments: vec![Value::Int32(2), Value::Int32(3)],
        });
        let buf = call.serialize_alloc();
        assert_eq!(buf[0], Envelope::TAG_CALL);
        let back = Envelope::deserialize(&buf).unwrap();
        assert_eq!(back, call);
    }
}
