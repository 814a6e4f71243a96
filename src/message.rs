//! A self-describing binary message format.
//!
//! A [`MessageBuffer`] is a sequence of values, each one preceded by a
//! 4-byte [`Marker`] naming its format. All integers are little-endian.
//!
//! | marker   | payload                                            |
//! |----------|----------------------------------------------------|
//! | `,f`     | `f32`                                              |
//! | `,i`     | `i32`                                              |
//! | `,l`     | `i64`                                              |
//! | `,t`     | `i64` timestamp                                    |
//! | `,s`     | UTF-8 bytes, NUL terminated, padded to 4 bytes     |
//! | `,S`     | `i32` count, then `count` 32-bit code points       |
//! | `,b`     | `i32` length, then `length` raw bytes              |
//! | `,f2`    | `[f32; 2]`                                         |
//! | `,i2`    | `[i32; 2]`                                         |
//! | `,f4`    | `[f32; 4]`                                         |
//! | `,i4`    | `[i32; 4]`                                         |
//!
//! Reads never panic. A value whose marker does not fit the requested
//! type is skipped in full, so the next read starts at the next value.

use std::{
    fmt,
    io::{self, Read, Write},
    ops::Range,
};

mod marker;
mod value;

pub use marker::{Marker, TagDisplay};
pub use value::{Decode, Encode, TimeStamp, WideString};

/// The largest frame [`MessageBuffer::read_from`] will accept.
pub const MAX_FRAME_BYTES: u32 = 500_000_000;

/// Why a value could not be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ends before the next value does. The read cursor has
    /// not moved.
    #[error("not enough data available (at {at}/{total})")]
    Truncated { at: usize, total: usize },
    /// The next marker is not in the catalogue. Its width is unknown, so
    /// the rest of the buffer is abandoned.
    #[error("unknown marker {}", TagDisplay(*.0))]
    UnknownMarker(u32),
    /// The value was skipped because its marker does not convert to the
    /// requested type.
    #[error("bad marker {found}, expected {expected}")]
    TypeMismatch { expected: Marker, found: Marker },
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("wide string contains invalid code point {0:#x}")]
    InvalidChar(u32),
    /// A length prefix is negative. The rest of the buffer is abandoned.
    #[error("negative length {len} in {marker} payload")]
    Malformed { marker: Marker, len: i32 },
    #[error("string of {len} bytes exceeds the limit of {max}")]
    TooLong { len: usize, max: usize },
}

/// Why a whole frame could not be transferred.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame transfer failed: {0}")]
    Io(#[from] io::Error),
    #[error("attempting extraordinary read ({0} bytes)")]
    TooLarge(u32),
    #[error("frame of {len} bytes does not fit linked storage of {capacity} bytes")]
    ExceedsLinkedCapacity { len: usize, capacity: usize },
}

/// The space a narrow string of `len` bytes takes: the bytes, a NUL,
/// and padding up to a multiple of four.
pub(crate) const fn string_space(len: usize) -> usize {
    (len + 1 + 3) & !3
}

enum Storage<'a> {
    Owned(Vec<u8>),
    Linked(&'a mut [u8]),
}

impl Storage<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Linked(s) => s,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Linked(s) => s,
        }
    }
}

/// An append-only byte buffer of typed values with an independent read
/// cursor.
///
/// Owned buffers grow on demand and never shrink, so a buffer that is
/// [cleared](MessageBuffer::clear) and refilled every cycle stops
/// allocating once it has seen its largest message. A
/// [linked](MessageBuffer::linked) buffer works in storage owned by
/// somebody else and can never grow.
pub struct MessageBuffer<'a> {
    storage: Storage<'a>,
    /// Read cursor.
    current: usize,
    /// Bytes written.
    total: usize,
}

impl MessageBuffer<'static> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            storage: Storage::Owned(vec![0; bytes]),
            current: 0,
            total: 0,
        }
    }

    /// Copy an already encoded byte sequence into a new buffer, ready
    /// for reading.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            storage: Storage::Owned(bytes.to_vec()),
            current: 0,
            total: bytes.len(),
        }
    }
}

impl Default for MessageBuffer<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MessageBuffer<'static> {
    fn clone(&self) -> Self {
        self.to_owned_buffer()
    }
}

impl fmt::Debug for MessageBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("current", &self.current)
            .field("total", &self.total)
            .field("capacity", &self.capacity())
            .field("linked", &self.is_linked())
            .finish()
    }
}

impl<'a> MessageBuffer<'a> {
    /// An empty buffer that writes into `storage`.
    pub fn linked(storage: &'a mut [u8]) -> Self {
        Self {
            storage: Storage::Linked(storage),
            current: 0,
            total: 0,
        }
    }

    /// A buffer over `storage` whose first `len` bytes already hold
    /// encoded values.
    ///
    /// # Panics
    /// Panics if `len > storage.len()`.
    pub fn linked_filled(storage: &'a mut [u8], len: usize) -> Self {
        assert!(len <= storage.len());
        Self {
            storage: Storage::Linked(storage),
            current: 0,
            total: len,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self.storage, Storage::Linked(_))
    }

    pub fn capacity(&self) -> usize {
        self.storage.bytes().len()
    }

    /// The number of bytes written.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// The read cursor.
    pub fn position(&self) -> usize {
        self.current
    }

    /// Bytes written but not yet read.
    pub fn remaining(&self) -> usize {
        self.total - self.current
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.bytes()[..self.total]
    }

    pub fn unread(&self) -> &[u8] {
        &self.storage.bytes()[self.current..self.total]
    }

    /// Move the read cursor back to the first value.
    pub fn rewind(&mut self) {
        self.current = 0;
    }

    /// Forget all written values. The backing storage is kept.
    pub fn clear(&mut self) {
        self.current = 0;
        self.total = 0;
    }

    /// Copy the written bytes (and the read cursor) into a new owned
    /// buffer.
    pub fn to_owned_buffer(&self) -> MessageBuffer<'static> {
        MessageBuffer {
            storage: Storage::Owned(self.as_bytes().to_vec()),
            current: self.current,
            total: self.total,
        }
    }

    /// Reserve `bytes` at the write cursor and return them.
    ///
    /// # Panics
    /// Panics if a linked buffer runs out of space.
    fn ensure(&mut self, bytes: usize) -> &mut [u8] {
        let start = self.total;
        let need = start + bytes;

        if need > self.capacity() {
            match &mut self.storage {
                Storage::Owned(v) => v.resize(need + 128 + need / 16, 0),
                Storage::Linked(s) => {
                    log::error!(
                        "MessageBuffer::ensure # linked storage of {} bytes cannot hold {} bytes",
                        s.len(),
                        need
                    );
                    panic!("sharing data, cannot ensure required space");
                }
            }
        }

        self.total = need;
        &mut self.storage.bytes_mut()[start..need]
    }

    /// Append a marker and the encoded value.
    pub fn write<T: Encode + ?Sized>(&mut self, value: &T) {
        let len = value.payload_len();
        let dst = self.ensure(4 + len);
        dst[..4].copy_from_slice(&value.marker().tag().to_le_bytes());
        value.encode_payload(&mut dst[4..]);
    }

    /// Append the unread values of `other`.
    pub fn append(&mut self, other: &MessageBuffer<'_>) {
        let src = other.unread();
        self.ensure(src.len()).copy_from_slice(src);
    }

    /// The marker of the next value, if one is available.
    pub fn peek_marker(&self) -> Option<Marker> {
        self.u32_at(self.current).and_then(Marker::from_tag)
    }

    /// Read the next value as a `T`.
    pub fn read<T: Decode>(&mut self) -> Result<T, DecodeError> {
        let (marker, payload) = self.next_value()?;
        T::decode(marker, &self.storage.bytes()[payload])
    }

    /// Read the next value, falling back to `T::default()` on any error.
    pub fn read_or_default<T: Decode + Default>(&mut self) -> T {
        self.read().unwrap_or_default()
    }

    /// Read the next narrow string without copying it.
    pub fn read_str(&mut self) -> Result<&str, DecodeError> {
        let (marker, payload) = self.next_value()?;
        if marker != Marker::String {
            return Err(value::mismatch::<String>(marker));
        }

        std::str::from_utf8(value::narrow_bytes(&self.storage.bytes()[payload]))
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Copy the next blob into `dst`.
    ///
    /// At most `dst.len()` bytes are copied. Returns the full length of
    /// the blob as written.
    pub fn read_blob_into(&mut self, dst: &mut [u8]) -> Result<usize, DecodeError> {
        let (marker, payload) = self.next_value()?;
        if marker != Marker::Blob {
            return Err(value::mismatch::<Vec<u8>>(marker));
        }

        let blob = &self.storage.bytes()[payload][4..];
        let n = blob.len().min(dst.len());
        dst[..n].copy_from_slice(&blob[..n]);
        Ok(blob.len())
    }

    /// Skip the next value, returning its marker.
    pub fn skip(&mut self) -> Result<Marker, DecodeError> {
        self.next_value().map(|(marker, _)| marker)
    }

    fn u32_at(&self, at: usize) -> Option<u32> {
        let bytes = self.storage.bytes().get(at..at.checked_add(4)?)?;
        if at + 4 > self.total {
            return None;
        }
        Some(u32::from_le_bytes(value::word(bytes, 0)))
    }

    fn payload_width(&self, marker: Marker, payload: usize) -> Result<Option<usize>, DecodeError> {
        if let Some(width) = marker.fixed_width() {
            return Ok(Some(width));
        }

        match marker {
            Marker::String => Ok(self.storage.bytes()[payload.min(self.total)..self.total]
                .iter()
                .position(|&b| b == 0)
                .map(string_space)),
            _ => {
                let Some(len) = self.u32_at(payload).map(|v| v as i32) else {
                    return Ok(None);
                };
                if len < 0 {
                    return Err(DecodeError::Malformed { marker, len });
                }
                let unit = if marker == Marker::WString { 4 } else { 1 };
                Ok((len as usize).checked_mul(unit).map(|n| n + 4))
            }
        }
    }

    /// Locate the next value and move the cursor past it.
    fn next_value(&mut self) -> Result<(Marker, Range<usize>), DecodeError> {
        let start = self.current;
        let truncated = DecodeError::Truncated {
            at: start,
            total: self.total,
        };

        let tag = self.u32_at(start).ok_or_else(|| truncated.clone())?;
        let Some(marker) = Marker::from_tag(tag) else {
            self.current = self.total;
            return Err(DecodeError::UnknownMarker(tag));
        };

        let payload = start + 4;
        let width = match self.payload_width(marker, payload) {
            Ok(Some(width)) => width,
            Ok(None) => return Err(truncated),
            Err(e) => {
                self.current = self.total;
                return Err(e);
            }
        };

        let end = payload
            .checked_add(width)
            .filter(|&end| end <= self.total)
            .ok_or(truncated)?;

        self.current = end;
        Ok((marker, payload..end))
    }

    /// Write the whole buffer to `writer` behind a 4-byte length prefix.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let len = u32::try_from(self.total)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(self.as_bytes())
    }

    /// Replace the contents of this buffer with one frame read from
    /// `reader`.
    ///
    /// A length prefix above [`MAX_FRAME_BYTES`] is rejected before
    /// any storage is reserved for it.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<(), FrameError> {
        self.clear();

        let mut prefix = [0u8; 4];
        reader.read_exact(&mut prefix)?;
        let len = u32::from_le_bytes(prefix);

        if len > MAX_FRAME_BYTES {
            log::error!(
                "MessageBuffer::read_from # attempting extraordinary read ({} bytes)",
                len
            );
            return Err(FrameError::TooLarge(len));
        }

        let len = len as usize;
        match &mut self.storage {
            Storage::Owned(v) if v.len() < len => v.resize(len, 0),
            Storage::Linked(s) if s.len() < len => {
                return Err(FrameError::ExceedsLinkedCapacity {
                    len,
                    capacity: s.len(),
                });
            }
            _ => {}
        }

        if let Err(e) = reader.read_exact(&mut self.storage.bytes_mut()[..len]) {
            log::error!("MessageBuffer::read_from # buffer read failed: {}", e);
            return Err(e.into());
        }

        self.total = len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_value_type_reads_back() {
        let mut msg = MessageBuffer::new();
        msg.write(&1.5f32);
        msg.write(&-7i32);
        msg.write(&(1i64 << 40));
        msg.write(&TimeStamp(123_456_789_012));
        msg.write("oscillator");
        msg.write(&WideString("päivää ✓".into()));
        msg.write(&[1u8, 2, 3, 4, 5][..]);
        msg.write(&[0.25f32, -0.5]);
        msg.write(&[3i32, -4]);
        msg.write(&[1.0f32, 2.0, 3.0, 4.0]);
        msg.write(&[5i32, 6, 7, 8]);

        assert_eq!(msg.read::<f32>(), Ok(1.5));
        assert_eq!(msg.read::<i32>(), Ok(-7));
        assert_eq!(msg.read::<i64>(), Ok(1 << 40));
        assert_eq!(msg.read::<TimeStamp>(), Ok(TimeStamp(123_456_789_012)));
        assert_eq!(msg.read::<String>().as_deref(), Ok("oscillator"));
        assert_eq!(msg.read::<WideString>(), Ok(WideString("päivää ✓".into())));
        assert_eq!(msg.read::<Vec<u8>>(), Ok(vec![1, 2, 3, 4, 5]));
        assert_eq!(msg.read::<[f32; 2]>(), Ok([0.25, -0.5]));
        assert_eq!(msg.read::<[i32; 2]>(), Ok([3, -4]));
        assert_eq!(msg.read::<[f32; 4]>(), Ok([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(msg.read::<[i32; 4]>(), Ok([5, 6, 7, 8]));
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn numeric_markers_coerce() {
        let mut msg = MessageBuffer::new();
        msg.write(&42i32);
        msg.write(&2.6f32);
        msg.write(&-2.5f32);
        msg.write(&9i32);
        msg.write(&[1.4f32, 2.6]);
        msg.write(&[1i32, 2, 3, 4]);

        assert_eq!(msg.read::<f32>(), Ok(42.0));
        assert_eq!(msg.read::<i32>(), Ok(3));
        assert_eq!(msg.read::<i64>(), Ok(-3));
        assert_eq!(msg.read::<i64>(), Ok(9));
        assert_eq!(msg.read::<[i32; 2]>(), Ok([1, 3]));
        assert_eq!(msg.read::<[f32; 4]>(), Ok([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn mismatched_marker_skips_exactly_one_value() {
        let mut values = MessageBuffer::new();
        values.write(&1.0f32);
        values.write(&2i32);
        values.write(&3i64);
        values.write("seven");
        values.write("");
        values.write(&WideString("wide".into()));
        values.write(&[9u8; 7][..]);
        values.write(&[1.0f32, 2.0]);
        values.write(&[1i32, 2]);
        values.write(&[1.0f32, 2.0, 3.0, 4.0]);
        values.write(&[1i32, 2, 3, 4]);

        // Only a timestamp is read back as a timestamp, so every value
        // above is a mismatch.
        while values.remaining() > 0 {
            let mut msg = MessageBuffer::new();
            let start = values.position();
            let found = values.skip().unwrap();
            let raw = &values.as_bytes()[start..values.position()];
            msg.append(&MessageBuffer::from_bytes(raw));
            msg.write(&77i32);

            assert_eq!(
                msg.read::<TimeStamp>(),
                Err(DecodeError::TypeMismatch {
                    expected: Marker::TimeStamp,
                    found,
                })
            );
            assert_eq!(msg.read::<i32>(), Ok(77));
        }

        let mut msg = MessageBuffer::new();
        msg.write(&TimeStamp(5));
        msg.write(&77i32);
        assert!(msg.read::<Vec<u8>>().is_err());
        assert_eq!(msg.read::<i32>(), Ok(77));
    }

    #[test]
    fn truncated_value_leaves_cursor_in_place() {
        let mut msg = MessageBuffer::new();
        msg.write(&1i32);
        msg.write(&5i64);
        let bytes = &msg.as_bytes()[..msg.len() - 3];

        let mut msg = MessageBuffer::from_bytes(bytes);
        assert_eq!(msg.read::<i32>(), Ok(1));
        let at = msg.position();
        assert_eq!(
            msg.read::<i64>(),
            Err(DecodeError::Truncated { at, total: bytes.len() })
        );
        assert_eq!(msg.position(), at);
        assert_eq!(msg.read_or_default::<i64>(), 0);

        let mut empty = MessageBuffer::new();
        assert!(matches!(empty.read::<f32>(), Err(DecodeError::Truncated { .. })));
        assert_eq!(empty.read_or_default::<f32>(), 0.0);
    }

    #[test]
    fn unknown_marker_abandons_buffer() {
        let mut bytes = b"?zz\0".to_vec();
        bytes.extend_from_slice(&[0; 4]);
        let mut msg = MessageBuffer::from_bytes(&bytes);

        assert!(matches!(msg.read::<i32>(), Err(DecodeError::UnknownMarker(_))));
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn negative_blob_length_is_malformed() {
        let mut bytes = Marker::Blob.tag().to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-4i32).to_le_bytes());
        let mut msg = MessageBuffer::from_bytes(&bytes);

        assert_eq!(
            msg.read::<Vec<u8>>(),
            Err(DecodeError::Malformed {
                marker: Marker::Blob,
                len: -4
            })
        );
    }

    #[test]
    fn strings_are_padded_to_four_bytes() {
        for (s, space) in [("", 4), ("abc", 4), ("abcd", 8), ("abcdefg", 8)] {
            let mut msg = MessageBuffer::new();
            msg.write(s);
            assert_eq!(msg.len(), 4 + space, "{s:?}");
            assert_eq!(msg.read_str(), Ok(s));
        }

        let mut msg = MessageBuffer::new();
        msg.write("cut\0here");
        assert_eq!(msg.read_str(), Ok("cut"));
    }

    #[test]
    fn blob_into_short_destination() {
        let mut msg = MessageBuffer::new();
        msg.write(&[1u8, 2, 3, 4, 5, 6][..]);

        let mut dst = [0u8; 4];
        assert_eq!(msg.read_blob_into(&mut dst), Ok(6));
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn append_copies_unread_values() {
        let mut head = MessageBuffer::new();
        head.write("collect");

        let mut tail = MessageBuffer::new();
        tail.write(&1i32);
        tail.write(&2i32);
        assert_eq!(tail.read::<i32>(), Ok(1));

        head.append(&tail);
        assert_eq!(head.read_str(), Ok("collect"));
        assert_eq!(head.read::<i32>(), Ok(2));
        assert_eq!(head.remaining(), 0);
    }

    #[test]
    fn clear_keeps_storage() {
        let mut msg = MessageBuffer::new();
        for i in 0..64i32 {
            msg.write(&i);
        }
        let capacity = msg.capacity();
        assert!(capacity >= msg.len());

        msg.clear();
        assert!(msg.is_empty());
        msg.write(&1i32);
        assert_eq!(msg.capacity(), capacity);
        assert_eq!(msg.read::<i32>(), Ok(1));
    }

    #[test]
    fn linked_storage_reads_and_writes_in_place() {
        let mut storage = [0u8; 16];
        {
            let mut msg = MessageBuffer::linked(&mut storage);
            msg.write(&3i32);
            msg.write(&4.0f32);
            assert!(msg.is_linked());
        }

        let mut msg = MessageBuffer::linked_filled(&mut storage, 16);
        assert_eq!(msg.read::<i32>(), Ok(3));
        assert_eq!(msg.read::<f32>(), Ok(4.0));
    }

    #[test]
    #[should_panic]
    fn linked_storage_never_grows() {
        let mut storage = [0u8; 8];
        let mut msg = MessageBuffer::linked(&mut storage);
        msg.write(&1i32);
        msg.write(&2i32);
    }

    #[test]
    fn frame_transfer() {
        let mut msg = MessageBuffer::new();
        msg.write("gain");
        msg.write(&0.5f32);

        let mut wire = Vec::new();
        msg.write_to(&mut wire).unwrap();
        assert_eq!(&wire[..4], &(msg.len() as u32).to_le_bytes());

        let mut received = MessageBuffer::new();
        received.read_from(&mut wire.as_slice()).unwrap();
        assert_eq!(received.read_str(), Ok("gain"));
        assert_eq!(received.read::<f32>(), Ok(0.5));
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocating() {
        let mut wire = (MAX_FRAME_BYTES + 1).to_le_bytes().to_vec();
        wire.extend_from_slice(&[0; 16]);

        let mut received = MessageBuffer::new();
        assert!(matches!(
            received.read_from(&mut wire.as_slice()),
            Err(FrameError::TooLarge(n)) if n == MAX_FRAME_BYTES + 1
        ));
        assert_eq!(received.capacity(), 0);
        assert!(received.is_empty());
    }

    #[test]
    fn short_frame_is_an_io_error() {
        let mut wire = 32u32.to_le_bytes().to_vec();
        wire.extend_from_slice(&[0; 8]);

        let mut received = MessageBuffer::new();
        assert!(matches!(
            received.read_from(&mut wire.as_slice()),
            Err(FrameError::Io(_))
        ));
        assert!(received.is_empty());
    }

    #[test]
    fn frame_larger_than_linked_storage() {
        let mut wire = 64u32.to_le_bytes().to_vec();
        wire.extend_from_slice(&[0; 64]);

        let mut storage = [0u8; 16];
        let mut received = MessageBuffer::linked(&mut storage);
        assert!(matches!(
            received.read_from(&mut wire.as_slice()),
            Err(FrameError::ExceedsLinkedCapacity { len: 64, capacity: 16 })
        ));
    }
}
