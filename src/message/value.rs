use super::{string_space, DecodeError, Marker};

/// A value that can be appended to a [`MessageBuffer`](super::MessageBuffer).
pub trait Encode {
    /// The marker written in front of the payload.
    fn marker(&self) -> Marker;

    /// The number of payload bytes following the marker.
    fn payload_len(&self) -> usize;

    /// Write the payload. `dst` is exactly [`Encode::payload_len`]
    /// bytes long and may contain stale data.
    fn encode_payload(&self, dst: &mut [u8]);
}

/// A value that can be read back from a [`MessageBuffer`](super::MessageBuffer).
pub trait Decode: Sized {
    /// The marker this type is natively written with.
    const MARKER: Marker;

    /// Decode a payload that was written behind `marker`.
    ///
    /// Compatible numeric markers are coerced. Any other marker is a
    /// [`DecodeError::TypeMismatch`].
    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError>;
}

/// A 64-bit timestamp. Encoded with its own marker so that it never
/// coerces to or from a plain integer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(pub i64);

/// A string encoded as 32-bit code points with a length prefix.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct WideString(pub String);

pub(crate) fn mismatch<T: Decode>(found: Marker) -> DecodeError {
    DecodeError::TypeMismatch {
        expected: T::MARKER,
        found,
    }
}

#[inline]
pub(crate) fn word(bytes: &[u8], idx: usize) -> [u8; 4] {
    let at = idx * 4;
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}

#[inline]
fn dword(bytes: &[u8]) -> [u8; 8] {
    let (lo, hi) = (word(bytes, 0), word(bytes, 1));
    [lo[0], lo[1], lo[2], lo[3], hi[0], hi[1], hi[2], hi[3]]
}

/// The bytes of a narrow string payload up to (not including) its NUL.
pub(crate) fn narrow_bytes(payload: &[u8]) -> &[u8] {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    &payload[..end]
}

fn narrow_str(s: &str) -> &str {
    // Interior NULs would end the string early on the receiving side.
    s.split('\0').next().unwrap_or_default()
}

impl Encode for f32 {
    fn marker(&self) -> Marker {
        Marker::Float32
    }
    fn payload_len(&self) -> usize {
        4
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.to_le_bytes());
    }
}

impl Decode for f32 {
    const MARKER: Marker = Marker::Float32;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        match marker {
            Marker::Float32 => Ok(f32::from_le_bytes(word(payload, 0))),
            Marker::Int32 => Ok(i32::from_le_bytes(word(payload, 0)) as f32),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Encode for i32 {
    fn marker(&self) -> Marker {
        Marker::Int32
    }
    fn payload_len(&self) -> usize {
        4
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.to_le_bytes());
    }
}

impl Decode for i32 {
    const MARKER: Marker = Marker::Int32;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        match marker {
            Marker::Int32 => Ok(i32::from_le_bytes(word(payload, 0))),
            Marker::Int64 => Ok(i64::from_le_bytes(dword(payload)) as i32),
            Marker::Float32 => Ok(f32::from_le_bytes(word(payload, 0)).round() as i32),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Encode for i64 {
    fn marker(&self) -> Marker {
        Marker::Int64
    }
    fn payload_len(&self) -> usize {
        8
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.to_le_bytes());
    }
}

impl Decode for i64 {
    const MARKER: Marker = Marker::Int64;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        match marker {
            Marker::Int64 => Ok(i64::from_le_bytes(dword(payload))),
            Marker::Int32 => Ok(i32::from_le_bytes(word(payload, 0)) as i64),
            Marker::Float32 => Ok(f32::from_le_bytes(word(payload, 0)).round() as i64),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Encode for TimeStamp {
    fn marker(&self) -> Marker {
        Marker::TimeStamp
    }
    fn payload_len(&self) -> usize {
        8
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.0.to_le_bytes());
    }
}

impl Decode for TimeStamp {
    const MARKER: Marker = Marker::TimeStamp;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        match marker {
            Marker::TimeStamp => Ok(TimeStamp(i64::from_le_bytes(dword(payload)))),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Encode for str {
    fn marker(&self) -> Marker {
        Marker::String
    }
    fn payload_len(&self) -> usize {
        string_space(narrow_str(self).len())
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        let s = narrow_str(self).as_bytes();
        dst[..s.len()].copy_from_slice(s);
        dst[s.len()..].fill(0);
    }
}

impl Encode for String {
    fn marker(&self) -> Marker {
        Marker::String
    }
    fn payload_len(&self) -> usize {
        self.as_str().payload_len()
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        self.as_str().encode_payload(dst)
    }
}

impl Decode for String {
    const MARKER: Marker = Marker::String;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        match marker {
            Marker::String => std::str::from_utf8(narrow_bytes(payload))
                .map(str::to_owned)
                .map_err(|_| DecodeError::InvalidUtf8),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Encode for WideString {
    fn marker(&self) -> Marker {
        Marker::WString
    }
    fn payload_len(&self) -> usize {
        4 + self.0.chars().count() * 4
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        let count = self.0.chars().count() as i32;
        dst[..4].copy_from_slice(&count.to_le_bytes());
        for (c, out) in self.0.chars().zip(dst[4..].chunks_exact_mut(4)) {
            out.copy_from_slice(&(c as u32).to_le_bytes());
        }
    }
}

impl Decode for WideString {
    const MARKER: Marker = Marker::WString;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        if marker != Marker::WString {
            return Err(mismatch::<Self>(marker));
        }

        payload[4..]
            .chunks_exact(4)
            .map(|w| {
                let code = u32::from_le_bytes([w[0], w[1], w[2], w[3]]);
                char::from_u32(code).ok_or(DecodeError::InvalidChar(code))
            })
            .collect::<Result<String, _>>()
            .map(WideString)
    }
}

impl Encode for [u8] {
    fn marker(&self) -> Marker {
        Marker::Blob
    }
    fn payload_len(&self) -> usize {
        4 + self.len()
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&(self.len() as i32).to_le_bytes());
        dst[4..].copy_from_slice(self);
    }
}

impl Encode for Vec<u8> {
    fn marker(&self) -> Marker {
        Marker::Blob
    }
    fn payload_len(&self) -> usize {
        self.as_slice().payload_len()
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        self.as_slice().encode_payload(dst)
    }
}

impl Decode for Vec<u8> {
    const MARKER: Marker = Marker::Blob;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        match marker {
            Marker::Blob => Ok(payload[4..].to_vec()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

macro_rules! vector_codec {
    ($n:literal, $float_marker:ident, $int_marker:ident) => {
        impl Encode for [f32; $n] {
            fn marker(&self) -> Marker {
                Marker::$float_marker
            }
            fn payload_len(&self) -> usize {
                $n * 4
            }
            fn encode_payload(&self, dst: &mut [u8]) {
                for (v, out) in self.iter().zip(dst.chunks_exact_mut(4)) {
                    out.copy_from_slice(&v.to_le_bytes());
                }
            }
        }

        impl Encode for [i32; $n] {
            fn marker(&self) -> Marker {
                Marker::$int_marker
            }
            fn payload_len(&self) -> usize {
                $n * 4
            }
            fn encode_payload(&self, dst: &mut [u8]) {
                for (v, out) in self.iter().zip(dst.chunks_exact_mut(4)) {
                    out.copy_from_slice(&v.to_le_bytes());
                }
            }
        }

        impl Decode for [f32; $n] {
            const MARKER: Marker = Marker::$float_marker;

            fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
                match marker {
                    Marker::$float_marker => Ok(std::array::from_fn(|i| {
                        f32::from_le_bytes(word(payload, i))
                    })),
                    Marker::$int_marker => Ok(std::array::from_fn(|i| {
                        i32::from_le_bytes(word(payload, i)) as f32
                    })),
                    other => Err(mismatch::<Self>(other)),
                }
            }
        }

        impl Decode for [i32; $n] {
            const MARKER: Marker = Marker::$int_marker;

            fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
                match marker {
                    Marker::$int_marker => Ok(std::array::from_fn(|i| {
                        i32::from_le_bytes(word(payload, i))
                    })),
                    Marker::$float_marker => Ok(std::array::from_fn(|i| {
                        f32::from_le_bytes(word(payload, i)).round() as i32
                    })),
                    other => Err(mismatch::<Self>(other)),
                }
            }
        }
    };
}

vector_codec!(2, Vector2f, Vector2i);
vector_codec!(4, Vector4f, Vector4i);
