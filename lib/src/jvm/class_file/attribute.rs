use crate::jvm::{Deserialize, ParseError, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Attributes this crate does not need to look inside stay in this raw form, so unknown or
/// irrelevant attributes pass through a transformation untouched and in their original order.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

impl Deserialize for Attribute {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        let name_index = u16::deserialize(reader)?;
        let length = u32::deserialize(reader)? as usize;
        let mut info = vec![0u8; length];
        reader.read_exact(&mut info)?;
        Ok(Attribute { name_index, info })
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes.
pub trait AttributeLike: Serialize {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        (self.code.len() as u32).serialize(writer)?;
        writer.write_all(&self.code)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Code {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        let max_stack = u16::deserialize(reader)?;
        let max_locals = u16::deserialize(reader)?;
        let code_length = u32::deserialize(reader)? as usize;
        let mut code = vec![0u8; code_length];
        reader.read_exact(&mut code)?;
        Ok(Code {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// `Class` constant of the caught type, or 0 to catch everything
    pub catch_type: u16,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ExceptionHandler {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        Ok(ExceptionHandler {
            start_pc: u16::deserialize(reader)?,
            end_pc: u16::deserialize(reader)?,
            handler_pc: u16::deserialize(reader)?,
            catch_type: u16::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for StackMapTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        Ok(StackMapTable(Vec::deserialize(reader)?))
    }
}

/// One stack map table entry
///
/// Each variant corresponds to a group of frame types from the format. The `extended` flags
/// record whether the input used the extended (explicit `u16` delta) encoding even though the
/// delta would have fit a compact tag: re-serializing a parsed frame must reproduce the exact
/// original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    Same { offset_delta: u16, extended: bool },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: u16,
        extended: bool,
        stack: VerificationType,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    ///
    /// Note: `chopped_k` must be in the range 1 to 3 inclusive
    /// Tags: 248-250
    ChopLocals { offset_delta: u16, chopped_k: u8 },

    /// Frame is like the previous frame, but with extra locals
    /// Tags: 252-254
    AppendLocals {
        offset_delta: u16,
        locals: Vec<VerificationType>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta, .. }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocals { offset_delta, .. }
            | StackMapFrame::AppendLocals { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    /// Adjust the frame's offset delta, switching to the extended encoding if the compact tag
    /// can no longer hold it
    pub fn set_offset_delta(&mut self, new_delta: u16) {
        match self {
            StackMapFrame::Same {
                offset_delta,
                extended,
            }
            | StackMapFrame::SameLocalsOneStack {
                offset_delta,
                extended,
                ..
            } => {
                *offset_delta = new_delta;
                if new_delta > 63 {
                    *extended = true;
                }
            }
            StackMapFrame::ChopLocals { offset_delta, .. }
            | StackMapFrame::AppendLocals { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta = new_delta,
        }
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::Same {
                offset_delta,
                extended,
            } => {
                if !extended && *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and `same_locals_1_stack_item_frame_extended`
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                extended,
                stack,
            } => {
                if !extended && *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            // `chop_frame`
            StackMapFrame::ChopLocals {
                offset_delta,
                chopped_k,
            } => {
                assert!(
                    0 < *chopped_k && *chopped_k < 4,
                    "ChopLocals chops 1-3 locals"
                );
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            // `append_frame`
            StackMapFrame::AppendLocals {
                offset_delta,
                locals,
            } => {
                let added_k = locals.len();
                assert!(0 < added_k && added_k < 4, "AppendLocals adds 1-3 locals");
                (251 + added_k as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            // `full_frame`
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for StackMapFrame {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        let frame = match u8::deserialize(reader)? {
            tag @ 0..=63 => StackMapFrame::Same {
                offset_delta: tag as u16,
                extended: false,
            },
            tag @ 64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: tag as u16 - 64,
                extended: false,
                stack: VerificationType::deserialize(reader)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: u16::deserialize(reader)?,
                extended: true,
                stack: VerificationType::deserialize(reader)?,
            },
            tag @ 248..=250 => StackMapFrame::ChopLocals {
                chopped_k: 251 - tag,
                offset_delta: u16::deserialize(reader)?,
            },
            251 => StackMapFrame::Same {
                offset_delta: u16::deserialize(reader)?,
                extended: true,
            },
            tag @ 252..=254 => {
                let offset_delta = u16::deserialize(reader)?;
                let mut locals = vec![];
                for _ in 0..(tag - 251) {
                    locals.push(VerificationType::deserialize(reader)?);
                }
                StackMapFrame::AppendLocals {
                    offset_delta,
                    locals,
                }
            }
            255 => StackMapFrame::Full {
                offset_delta: u16::deserialize(reader)?,
                locals: Vec::deserialize(reader)?,
                stack: Vec::deserialize(reader)?,
            },
            tag => return Err(ParseError::BadFrameType(tag)),
        };
        Ok(frame)
    }
}

/// These types are from [this hierarchy][0]
///
/// `Object` holds a `Class` constant pool index; `Uninitialized` holds the offset of the `new`
/// instruction that produced the value.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(u16),

    /// State of an object after `new` has been called but `<init>` has not been called
    Uninitialized(u16),
}

impl Serialize for VerificationType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for VerificationType {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        let verification_type = match u8::deserialize(reader)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(u16::deserialize(reader)?),
            8 => VerificationType::Uninitialized(u16::deserialize(reader)?),
            tag => return Err(ParseError::BadVerificationTypeTag(tag)),
        };
        Ok(verification_type)
    }
}

#[cfg(test)]
mod stack_map_frame_tests {
    use super::*;

    fn round_trip(bytes: &[u8]) {
        let mut reader = std::io::Cursor::new(bytes);
        let frame = StackMapFrame::deserialize(&mut reader).unwrap();
        let mut out = vec![];
        frame.serialize(&mut out).unwrap();
        assert_eq!(out, bytes, "frame {:?} did not round trip", frame);
    }

    #[test]
    fn compact_and_extended_encodings_round_trip() {
        round_trip(&[17]);
        round_trip(&[251, 0, 17]);
        round_trip(&[64 + 9, 1]);
        round_trip(&[247, 0, 9, 7, 0, 2]);
        round_trip(&[249, 0, 44]);
        round_trip(&[252, 0, 80, 4]);
        round_trip(&[255, 1, 4, 0, 2, 7, 0, 3, 1, 0, 2, 8, 0, 12, 5]);
    }

    #[test]
    fn bumping_a_delta_past_63_switches_to_extended() {
        let mut frame = StackMapFrame::Same {
            offset_delta: 62,
            extended: false,
        };
        frame.set_offset_delta(66);
        let mut out = vec![];
        frame.serialize(&mut out).unwrap();
        assert_eq!(out, vec![251, 0, 66]);
    }
}
