use crate::jvm::class_file::{Attribute, ConstantPool, Field, Method};
use crate::jvm::{ClassAccessFlags, Deserialize, EncodeError, ParseError, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// Class file format version
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Version {
    pub minor: u16,
    pub major: u16,
}

impl Version {
    /// First version to carry (and require) `StackMapTable` attributes
    pub const JAVA6: Version = Version {
        minor: 0,
        major: 50,
    };

    pub const JAVA8: Version = Version {
        minor: 0,
        major: 52,
    };

    pub const JAVA11: Version = Version {
        minor: 0,
        major: 55,
    };
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor.serialize(writer)?;
        self.major.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Version {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, ParseError> {
        Ok(Version {
            minor: u16::deserialize(reader)?,
            major: u16::deserialize(reader)?,
        })
    }
}

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Parse a class file out of a byte buffer
    ///
    /// The whole buffer must be consumed; leftover bytes are an error just like missing ones.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, ParseError> {
        let mut reader = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != ClassFile::MAGIC {
            return Err(ParseError::BadMagic(magic));
        }

        let class_file = ClassFile {
            version: Version::deserialize(&mut reader)?,
            constants: ConstantPool::deserialize(&mut reader)?,
            access_flags: ClassAccessFlags::deserialize(&mut reader)?,
            this_class: u16::deserialize(&mut reader)?,
            super_class: u16::deserialize(&mut reader)?,
            interfaces: Vec::deserialize(&mut reader)?,
            fields: Vec::deserialize(&mut reader)?,
            methods: Vec::deserialize(&mut reader)?,
            attributes: Vec::deserialize(&mut reader)?,
        };

        let leftover = bytes.len() - reader.position() as usize;
        if leftover != 0 {
            return Err(ParseError::TrailingBytes(leftover));
        }

        Ok(class_file)
    }

    /// Serialize the class file into a byte buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Name of this class in internal slashed form (eg. `foo/bar/Baz`)
    pub fn class_name(&self) -> Option<String> {
        self.constants.class_name(self.this_class)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
