use crate::jvm::class_file::{Attribute, AttributeLike};
use crate::jvm::{Deserialize, EncodeError, ParseError, Serialize};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Constant pool of one class file
///
/// Indexing starts at 1 and 8-byte constants occupy two slots, which is exactly the shape of an
/// [`OffsetVec`] starting at offset 1. The pool preserves the entry order of the buffer it was
/// parsed from; transformation passes may only append to it. Keeping the original layout intact
/// is what makes a `javap` diff of the input and output artifacts readable.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: OffsetVec<Constant>,
}

impl ConstantPool {
    /// Make a fresh empty constant pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: OffsetVec::new_starting_at(Offset(1)),
        }
    }

    /// Number of slots the pool occupies (this is the `constant_pool_count` of the class file,
    /// one greater than the highest valid index)
    pub fn slot_count(&self) -> usize {
        self.entries.offset_len().0
    }

    /// Look up a constant by its index
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get_offset(Offset(index as usize)).ok()
    }

    /// Iterate the entries along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .map(|(offset, _, constant)| (offset.0 as u16, constant))
    }

    /// Push a constant onto the end of the pool, provided there is space for it
    pub fn push(&mut self, constant: Constant) -> Result<u16, EncodeError> {
        let offset = self.entries.offset_len().0;
        if offset + constant.width() > u16::MAX as usize + 1 {
            return Err(EncodeError::ConstantPoolOverflow { count: offset });
        }
        Ok(self.entries.push(constant).0 as u16)
    }

    /// Raw modified UTF-8 bytes of a `Utf8` constant
    pub fn utf8_bytes(&self, index: u16) -> Option<&[u8]> {
        match self.get(index)? {
            Constant::Utf8(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Decoded string value of a `Utf8` constant
    pub fn utf8(&self, index: u16) -> Option<String> {
        decode_modified_utf8(self.utf8_bytes(index)?).ok()
    }

    /// Name behind a `Class` constant
    pub fn class_name(&self, index: u16) -> Option<String> {
        match self.get(index)? {
            Constant::Class(name_index) => self.utf8(*name_index),
            _ => None,
        }
    }

    /// Descriptor string behind a `NameAndType` constant
    pub fn name_and_type_descriptor(&self, index: u16) -> Option<String> {
        match self.get(index)? {
            Constant::NameAndType { descriptor, .. } => self.utf8(*descriptor),
            _ => None,
        }
    }

    /// Find an existing `Utf8` constant with this value, or append one
    pub fn ensure_utf8(&mut self, value: &str) -> Result<u16, EncodeError> {
        let encoded = encode_modified_utf8(value);
        for (index, constant) in self.iter() {
            if let Constant::Utf8(bytes) = constant {
                if *bytes == encoded {
                    return Ok(index);
                }
            }
        }
        self.push(Constant::Utf8(encoded))
    }

    /// Find an existing `Class` constant with this name, or append one (appending the name too if
    /// it is not already in the pool)
    pub fn ensure_class(&mut self, class_name: &str) -> Result<u16, EncodeError> {
        for (index, constant) in self.iter() {
            if let Constant::Class(name_index) = constant {
                if self.utf8(*name_index).as_deref() == Some(class_name) {
                    return Ok(index);
                }
            }
        }
        let name_index = self.ensure_utf8(class_name)?;
        self.push(Constant::Class(name_index))
    }

    /// Build an [`Attribute`] out of anything attribute-like, interning its name
    pub fn make_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, EncodeError> {
        let name_index = self.ensure_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.slot_count() as u16).serialize(writer)?;
        for (_, _, constant) in self.entries.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        let slot_count = u16::deserialize(reader)? as usize;
        let mut pool = ConstantPool::new();
        while pool.slot_count() < slot_count {
            pool.entries.push(Constant::deserialize(reader)?);
            if pool.slot_count() > slot_count {
                // A two-slot constant crammed into the last remaining slot
                return Err(ParseError::Truncated);
            }
        }
        Ok(pool)
    }
}

/// Constants as in the constant pool
///
/// All constant kinds through class file format 61 are represented. `Utf8` keeps the raw modified
/// UTF-8 bytes rather than a decoded string so that parse followed by serialize reproduces the
/// input exactly, whatever the original encoder did.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Constant raw string value in modified UTF-8
    Utf8(Vec<u8>),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Class or an interface
    Class(u16),

    /// Constant object of type `java.lang.String`
    String(u16),

    /// Field
    FieldRef {
        class: u16,
        name_and_type: u16,
    },

    /// Method declared by a class
    MethodRef {
        class: u16,
        name_and_type: u16,
    },

    /// Method declared by an interface
    InterfaceMethodRef {
        class: u16,
        name_and_type: u16,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: u16,
        descriptor: u16,
    },

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        /// Raw reference kind in the range 1-9
        handle_kind: u8,
        member: u16,
    },

    /// Method type
    MethodType {
        descriptor: u16,
    },

    /// Dynamically-computed constant
    Dynamic {
        bootstrap_method: u16,
        name_and_type: u16,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        bootstrap_method: u16,
        name_and_type: u16,
    },

    Module(u16),

    Package(u16),
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(bytes) => {
                1u8.serialize(writer)?;
                (bytes.len() as u16).serialize(writer)?;
                writer.write_all(bytes)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.to_bits().serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.to_bits().serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(utf8) => {
                8u8.serialize(writer)?;
                utf8.serialize(writer)?;
            }
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
            } => {
                10u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => {
                11u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        let constant = match u8::deserialize(reader)? {
            1 => {
                let length = u16::deserialize(reader)? as usize;
                let mut bytes = vec![0u8; length];
                reader.read_exact(&mut bytes)?;
                Constant::Utf8(bytes)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::from_bits(u32::deserialize(reader)?)),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::from_bits(u64::deserialize(reader)?)),
            7 => Constant::Class(u16::deserialize(reader)?),
            8 => Constant::String(u16::deserialize(reader)?),
            9 => Constant::FieldRef {
                class: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            10 => Constant::MethodRef {
                class: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            11 => Constant::InterfaceMethodRef {
                class: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            12 => Constant::NameAndType {
                name: u16::deserialize(reader)?,
                descriptor: u16::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: u8::deserialize(reader)?,
                member: u16::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: u16::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            19 => Constant::Module(u16::deserialize(reader)?),
            20 => Constant::Package(u16::deserialize(reader)?),
            tag => return Err(ParseError::BadConstantTag(tag)),
        };
        Ok(constant)
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the spec:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: encoded as a surrogate pair
            _ => {
                let code = code - 0x10000;
                let high = 0xD800 + (code >> 10);
                let low = 0xDC00 + (code & 0x3FF);
                for surrogate in [high, low] {
                    buffer.push((surrogate >> 12 & 0x0F) as u8 | 0b1110_0000);
                    buffer.push((surrogate >> 6 & 0x3F) as u8 | 0b1000_0000);
                    buffer.push((surrogate & 0x3F) as u8 | 0b1000_0000);
                }
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ParseError> {
    fn continuation(byte: Option<&u8>) -> Result<u32, ParseError> {
        match byte {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u32),
            _ => Err(ParseError::BadUtf8),
        }
    }

    let mut string = String::new();
    let mut iter = bytes.iter();
    while let Some(&byte) = iter.next() {
        let code: u32 = match byte {
            0 => return Err(ParseError::BadUtf8),
            b if b < 0x80 => b as u32,
            b if b & 0b1110_0000 == 0b1100_0000 => {
                (b as u32 & 0x1F) << 6 | continuation(iter.next())?
            }
            b if b & 0b1111_0000 == 0b1110_0000 => {
                let value = (b as u32 & 0x0F) << 12
                    | continuation(iter.next())? << 6
                    | continuation(iter.next())?;
                if (0xD800..0xDC00).contains(&value) {
                    // High surrogate: the low half must follow as another 3-byte sequence
                    match iter.next() {
                        Some(b2) if b2 & 0b1111_0000 == 0b1110_0000 => {
                            let low = (*b2 as u32 & 0x0F) << 12
                                | continuation(iter.next())? << 6
                                | continuation(iter.next())?;
                            if !(0xDC00..0xE000).contains(&low) {
                                return Err(ParseError::BadUtf8);
                            }
                            0x10000 + ((value - 0xD800) << 10) + (low - 0xDC00)
                        }
                        _ => return Err(ParseError::BadUtf8),
                    }
                } else if (0xDC00..0xE000).contains(&value) {
                    // Unpaired low surrogate
                    return Err(ParseError::BadUtf8);
                } else {
                    value
                }
            }
            _ => return Err(ParseError::BadUtf8),
        };
        string.push(char::from_u32(code).ok_or(ParseError::BadUtf8)?);
    }
    Ok(string)
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]).unwrap(), "a\x00a");
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(
            encode_modified_utf8("hel10_World"),
            vec![104, 101, 108, 49, 48, 95, 87, 111, 114, 108, 100]
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        let text = "ĄǍǞǠǺȀȂȦȺӐӒ";
        assert_eq!(
            encode_modified_utf8(text),
            vec![
                196, 132, 199, 141, 199, 158, 199, 160, 199, 186, 200, 128, 200, 130, 200, 166,
                200, 186, 211, 144, 211, 146
            ]
        );
        assert_eq!(
            decode_modified_utf8(&encode_modified_utf8(text)).unwrap(),
            text
        );
    }

    #[test]
    fn supplementary_characters() {
        let text = "\u{10000}\u{dffff}\u{10FFFF}";
        assert_eq!(
            encode_modified_utf8(text),
            vec![
                237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237,
                191, 191
            ]
        );
        assert_eq!(
            decode_modified_utf8(&encode_modified_utf8(text)).unwrap(),
            text
        );
    }

    #[test]
    fn rejects_embedded_raw_null_and_unpaired_surrogates() {
        assert!(decode_modified_utf8(&[0]).is_err());
        assert!(decode_modified_utf8(&[237, 160, 128]).is_err());
        assert!(decode_modified_utf8(&[0b1100_0000]).is_err());
    }
}

#[cfg(test)]
mod constant_pool_tests {
    use super::*;

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.push(Constant::Long(7)).unwrap(), 1);
        assert_eq!(pool.push(Constant::Integer(42)).unwrap(), 3);
        assert_eq!(pool.slot_count(), 4);
        assert!(pool.get(2).is_none());
    }

    #[test]
    fn ensure_class_reuses_existing_entries() {
        let mut pool = ConstantPool::new();
        let name = pool.ensure_utf8("java/lang/Object").unwrap();
        let class = pool.push(Constant::Class(name)).unwrap();

        assert_eq!(pool.ensure_class("java/lang/Object").unwrap(), class);
        let before = pool.slot_count();
        pool.ensure_class("java/lang/Object").unwrap();
        assert_eq!(pool.slot_count(), before);
    }

    #[test]
    fn ensure_class_appends_missing_entries() {
        let mut pool = ConstantPool::new();
        let class = pool.ensure_class("java/lang/Throwable").unwrap();
        assert_eq!(pool.class_name(class).as_deref(), Some("java/lang/Throwable"));
    }
}
