use std::fmt;

const fn tag(bytes: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*bytes)
}

/// The 4-byte type tag written in front of every encoded value.
///
/// On the wire a tag reads as a short ASCII string (`",f\0\0"` for a
/// float, `",i\0\0"` for an int32, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Float32,
    Int32,
    Int64,
    TimeStamp,
    String,
    WString,
    Blob,
    Vector2f,
    Vector2i,
    Vector4f,
    Vector4i,
}

impl Marker {
    pub const ALL: [Marker; 11] = [
        Marker::Float32,
        Marker::Int32,
        Marker::Int64,
        Marker::TimeStamp,
        Marker::String,
        Marker::WString,
        Marker::Blob,
        Marker::Vector2f,
        Marker::Vector2i,
        Marker::Vector4f,
        Marker::Vector4i,
    ];

    pub const fn tag(self) -> u32 {
        match self {
            Marker::Float32 => tag(b",f\0\0"),
            Marker::Int32 => tag(b",i\0\0"),
            Marker::Int64 => tag(b",l\0\0"),
            Marker::TimeStamp => tag(b",t\0\0"),
            Marker::String => tag(b",s\0\0"),
            Marker::WString => tag(b",S\0\0"),
            Marker::Blob => tag(b",b\0\0"),
            Marker::Vector2f => tag(b",f2\0"),
            Marker::Vector2i => tag(b",i2\0"),
            Marker::Vector4f => tag(b",f4\0"),
            Marker::Vector4i => tag(b",i4\0"),
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.tag() == tag)
    }

    /// The payload width of markers whose payload does not depend on
    /// its contents. `None` for strings, wide strings and blobs.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Marker::Float32 | Marker::Int32 => Some(4),
            Marker::Int64 | Marker::TimeStamp | Marker::Vector2f | Marker::Vector2i => Some(8),
            Marker::Vector4f | Marker::Vector4i => Some(16),
            Marker::String | Marker::WString | Marker::Blob => None,
        }
    }
}

/// Prints a raw tag as its four characters, with NULs shown as `.`.
pub struct TagDisplay(pub u32);

impl fmt::Display for TagDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_le_bytes() {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        TagDisplay(self.tag()).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_unique_and_round_trip() {
        for (i, a) in Marker::ALL.iter().enumerate() {
            assert_eq!(Marker::from_tag(a.tag()), Some(*a));
            for b in Marker::ALL.iter().skip(i + 1) {
                assert_ne!(a.tag(), b.tag());
            }
        }
    }

    #[test]
    fn tag_layout_on_the_wire() {
        assert_eq!(Marker::Float32.tag().to_le_bytes(), *b",f\0\0");
        assert_eq!(Marker::Vector4i.tag().to_le_bytes(), *b",i4\0");
        assert_eq!(Marker::WString.to_string(), ",S..");
        assert_eq!(Marker::from_tag(0xdead_beef), None);
    }
}
