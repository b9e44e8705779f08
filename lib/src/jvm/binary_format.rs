use super::ParseError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Mirror image of [`Serialize`] for reading constructs back out of a class file
pub trait Deserialize: Sized {
    /// Deserialize construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

impl Serialize for u64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<BigEndian>(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Serialize for i16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i16::<BigEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(*self)
    }
}

impl Serialize for i64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i64::<BigEndian>(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_u8()?)
    }
}

impl Deserialize for u16 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_u16::<BigEndian>()?)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_u32::<BigEndian>()?)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_u64::<BigEndian>()?)
    }
}

impl Deserialize for i8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_i8()?)
    }
}

impl Deserialize for i16 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_i16::<BigEndian>()?)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_i32::<BigEndian>()?)
    }
}

impl Deserialize for i64 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        Ok(reader.read_i64::<BigEndian>()?)
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, ParseError> {
        let len = u16::deserialize(reader)?;
        let mut elems = Vec::with_capacity(len as usize);
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}
