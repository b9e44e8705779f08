use crate::editor::{lower_return_null, Body, Method, MethodAttribute, MutationError, Statement};
use crate::jvm::class_file::{
    self, Attribute, AttributeLike, ClassFile, Code, ConstantPool, Version,
};
use crate::jvm::{
    ClassAccessFlags, Deserialize, EncodeError, MethodDescriptor, ParseDescriptor, ParseError,
    RenderDescriptor, Serialize,
};
use std::io::Cursor;

/// Editable, statement-level view of one parsed class
///
/// Built strictly from the byte buffer handed to [`Class::parse`], never from a cache keyed by
/// class name, so that a buffer which already went through an earlier transformation pass is
/// edited as-is and passes compose instead of clobbering one another.
#[derive(Debug)]
pub struct Class {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<class_file::Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl Class {
    /// Parse a class out of a byte buffer, lifting each method's `Code` attribute into its
    /// editable statement form
    pub fn parse(bytes: &[u8]) -> Result<Class, ParseError> {
        let class_file = ClassFile::parse(bytes)?;

        let mut methods = vec![];
        for method in class_file.methods {
            let name = class_file
                .constants
                .utf8(method.name_index)
                .ok_or(ParseError::BadConstantIndex(method.name_index))?;
            let descriptor_string = class_file
                .constants
                .utf8(method.descriptor_index)
                .ok_or(ParseError::BadConstantIndex(method.descriptor_index))?;
            let descriptor = MethodDescriptor::parse(&descriptor_string)?;

            let mut attributes = vec![];
            for attribute in method.attributes {
                let is_code = class_file.constants.utf8(attribute.name_index).as_deref()
                    == Some(Code::NAME);
                if is_code {
                    let code = parse_code(&attribute.info)?;
                    attributes.push(MethodAttribute::Body(Body::from_code(
                        attribute.name_index,
                        code,
                    )));
                } else {
                    attributes.push(MethodAttribute::Other(attribute));
                }
            }

            methods.push(Method {
                access_flags: method.access_flags,
                name_index: method.name_index,
                descriptor_index: method.descriptor_index,
                name,
                descriptor,
                attributes,
            });
        }

        Ok(Class {
            version: class_file.version,
            constants: class_file.constants,
            access_flags: class_file.access_flags,
            this_class: class_file.this_class,
            super_class: class_file.super_class,
            interfaces: class_file.interfaces,
            fields: class_file.fields,
            methods,
            attributes: class_file.attributes,
        })
    }

    /// Compile every statement body and re-emit the class as bytes
    ///
    /// Deterministic: the same model always serializes to the same buffer, and a freshly parsed
    /// model serializes back to the exact buffer it came from.
    pub fn serialize(&self) -> Result<Vec<u8>, EncodeError> {
        let mut methods = vec![];
        for method in &self.methods {
            if self.constants.get(method.name_index).is_none() {
                return Err(EncodeError::MissingConstant(method.name_index));
            }
            if self.constants.get(method.descriptor_index).is_none() {
                return Err(EncodeError::MissingConstant(method.descriptor_index));
            }

            let mut attributes = vec![];
            for attribute in &method.attributes {
                match attribute {
                    MethodAttribute::Body(body) => {
                        let code = body.lower(
                            &method.long_name(),
                            &method.descriptor.return_type,
                            &self.constants,
                        )?;
                        let mut info = vec![];
                        code.serialize(&mut info)?;
                        attributes.push(Attribute {
                            name_index: body.name_index,
                            info,
                        });
                    }
                    MethodAttribute::Other(attribute) => attributes.push(attribute.clone()),
                }
            }

            methods.push(class_file::Method {
                access_flags: method.access_flags,
                name_index: method.name_index,
                descriptor_index: method.descriptor_index,
                attributes,
            });
        }

        let class_file = ClassFile {
            version: self.version,
            constants: self.constants.clone(),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces.clone(),
            fields: self.fields.clone(),
            methods,
            attributes: self.attributes.clone(),
        };
        class_file.to_bytes()
    }

    /// Name of this class in internal slashed form
    pub fn class_name(&self) -> Option<String> {
        self.constants.class_name(self.this_class)
    }
}

/// Prepend a [`Statement::ReturnNull`] to the body of every declared method
///
/// Constructors, class initializers, and bodiless (abstract/native) methods are skipped. A
/// method whose result type has no "no value" lowering fails the whole class: no partial
/// mutation is kept visible to the caller beyond the returned error.
///
/// Calling this twice on the same model injects two statements; the second is unreachable dead
/// code behind the first. That is the documented caller contract (mutate at most once per
/// parse), not something this function guards against.
pub fn insert_null_return(class: &mut Class) -> Result<(), MutationError> {
    for method in &mut class.methods {
        if method.is_initializer() || method.body().is_none() {
            continue;
        }
        if lower_return_null(&method.descriptor.return_type).is_none() {
            return Err(MutationError::PrimitiveResult {
                method: method.name.clone(),
                descriptor: method.descriptor.render(),
            });
        }
        if let Some(body) = method.body_mut() {
            body.statements.insert(0, Statement::ReturnNull);
        }
    }
    Ok(())
}

fn parse_code(info: &[u8]) -> Result<Code, ParseError> {
    let mut reader = Cursor::new(info);
    let code = Code::deserialize(&mut reader)?;
    let leftover = info.len() - reader.position() as usize;
    if leftover != 0 {
        return Err(ParseError::TrailingBytes(leftover));
    }
    Ok(code)
}
