use crate::jvm::class_file::{
    Attribute, Code, ConstantPool, ExceptionHandler, StackMapTable,
};
use crate::jvm::{
    Deserialize, EncodeError, FieldType, MethodAccessFlags, MethodDescriptor, ParseError,
    RenderDescriptor, Serialize,
};
use std::io::Cursor;

/* The 4 opcodes the statement compiler emits */
const NOP: u8 = 0x00;
const ACONST_NULL: u8 = 0x01;
const ARETURN: u8 = 0xb0;
const RETURN: u8 = 0xb1;

/// Editable view of one method
///
/// `name` and `descriptor` are resolved out of the constant pool at parse time; the raw indices
/// are kept alongside so serialization reproduces the original references.
#[derive(Debug)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub attributes: Vec<MethodAttribute>,
}

/// Method attribute, with the `Code` attribute lifted into its editable form
///
/// Keeping lifted and raw attributes in one ordered list means serialization puts everything
/// back exactly where it was.
#[derive(Debug)]
pub enum MethodAttribute {
    Body(Body),
    Other(Attribute),
}

impl Method {
    /// Is this a constructor or the class initializer?
    ///
    /// These are not "declared methods": the result replacement never applies to them (a
    /// constructor that returns before calling its super constructor could never verify).
    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    pub fn body(&self) -> Option<&Body> {
        self.attributes.iter().find_map(|attr| match attr {
            MethodAttribute::Body(body) => Some(body),
            MethodAttribute::Other(_) => None,
        })
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.attributes.iter_mut().find_map(|attr| match attr {
            MethodAttribute::Body(body) => Some(body),
            MethodAttribute::Other(_) => None,
        })
    }

    /// Human-readable `name(Ljava/lang/String;)V` form for log messages
    pub fn long_name(&self) -> String {
        format!("{}{}", self.name, self.descriptor.render())
    }
}

/// Editable method body: a sequence of statements plus the bookkeeping the `Code` attribute
/// carries around them
#[derive(Debug)]
pub struct Body {
    /// Constant pool index of the `Code` attribute name
    pub name_index: u16,

    pub max_stack: u16,
    pub max_locals: u16,
    pub statements: Vec<Statement>,
    pub exception_table: Vec<ExceptionHandler>,

    /// Raw sub-attributes of the `Code` attribute, in original order
    pub attributes: Vec<Attribute>,
}

/// Structural statement in a method body
///
/// Parsing produces a single `Raw` statement holding the original instruction bytes; edits
/// prepend higher-level statements in front of it. The statement compiler in
/// [`Body::lower`] turns the whole sequence back into bytecode.
#[derive(Debug)]
pub enum Statement {
    /// Immediately produce the "no value" result for this method, bypassing everything after it:
    /// `null` for a reference result, a bare return for `void`. There is no lowering for
    /// primitive results.
    ReturnNull,

    /// Original compiled instructions, kept verbatim
    Raw(Vec<u8>),
}

/// Lowered bytecode for [`Statement::ReturnNull`], or `None` if the result type admits no
/// absence-of-value sentinel
///
/// The sequence is padded to exactly 4 bytes so that the alignment-sensitive padding inside any
/// `tableswitch`/`lookupswitch` of the statements that follow stays correct after the shift.
pub fn lower_return_null(return_type: &Option<FieldType>) -> Option<[u8; 4]> {
    match return_type {
        None => Some([RETURN, NOP, NOP, NOP]),
        Some(field_type) if field_type.is_reference() => Some([ACONST_NULL, ARETURN, NOP, NOP]),
        Some(_) => None,
    }
}

impl Body {
    /// Lift the body out of a parsed `Code` attribute
    pub fn from_code(name_index: u16, code: Code) -> Body {
        Body {
            name_index,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            statements: vec![Statement::Raw(code.code)],
            exception_table: code.exception_table,
            attributes: code.attributes,
        }
    }

    /// Compile the statements back into a `Code` attribute
    ///
    /// Injected statements shift the original instructions towards higher offsets, so every
    /// absolute program counter recorded around the code (exception ranges, the first stack map
    /// delta, line number and local variable tables) is shifted to match. The stale *contents*
    /// of the stack map frames are left alone; recomputing them is the repair engine's concern.
    pub fn lower(
        &self,
        method: &str,
        return_type: &Option<FieldType>,
        constants: &ConstantPool,
    ) -> Result<Code, EncodeError> {
        let mut code: Vec<u8> = vec![];
        let mut shift: u16 = 0;
        for statement in &self.statements {
            match statement {
                Statement::ReturnNull => {
                    let lowered = lower_return_null(return_type).ok_or_else(|| {
                        EncodeError::InconsistentModel(format!(
                            "no null result lowering for method {}",
                            method
                        ))
                    })?;
                    code.extend_from_slice(&lowered);
                    shift += lowered.len() as u16;
                }
                Statement::Raw(bytes) => {
                    code.extend_from_slice(bytes);
                }
            }
        }

        let mut exception_table = self.exception_table.clone();
        let mut attributes = self.attributes.clone();
        let mut max_stack = self.max_stack;

        if shift > 0 {
            for handler in &mut exception_table {
                handler.start_pc = shifted(handler.start_pc, shift)?;
                handler.end_pc = shifted(handler.end_pc, shift)?;
                handler.handler_pc = shifted(handler.handler_pc, shift)?;
            }
            for attribute in &mut attributes {
                shift_attribute_pcs(attribute, shift, constants)?;
            }
            if matches!(return_type, Some(t) if t.is_reference()) && max_stack == 0 {
                // `aconst_null` needs one stack slot even in a method that had none
                max_stack = 1;
            }
        }

        Ok(Code {
            max_stack,
            max_locals: self.max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}

fn shifted(pc: u16, shift: u16) -> Result<u16, EncodeError> {
    pc.checked_add(shift).ok_or(EncodeError::OffsetOverflow {
        offset: pc as usize + shift as usize,
    })
}

/// Push the absolute program counters inside a `Code` sub-attribute up by `shift`
///
/// Only attributes with known pc-bearing layouts are rewritten; everything else passes through
/// untouched.
fn shift_attribute_pcs(
    attribute: &mut Attribute,
    shift: u16,
    constants: &ConstantPool,
) -> Result<(), EncodeError> {
    let name = match constants.utf8(attribute.name_index) {
        Some(name) => name,
        None => return Ok(()),
    };
    match name.as_str() {
        "StackMapTable" => {
            let mut table = parse_sub_attribute::<StackMapTable>(&attribute.info)?;
            // The first entry's delta is the absolute offset of the first frame; later entries
            // are relative to their predecessor and unaffected by a shift at offset zero.
            if let Some(first) = table.0.first_mut() {
                let delta = shifted(first.offset_delta(), shift)?;
                first.set_offset_delta(delta);
            }
            let mut info = vec![];
            table.serialize(&mut info)?;
            attribute.info = info;
        }
        "LineNumberTable" => {
            // u16 count, then (start_pc: u16, line_number: u16) pairs
            shift_u16_entries(&mut attribute.info, 4, shift)?;
        }
        "LocalVariableTable" | "LocalVariableTypeTable" => {
            // u16 count, then (start_pc, length, name, descriptor/signature, index), all u16
            shift_u16_entries(&mut attribute.info, 10, shift)?;
        }
        _ => (),
    }
    Ok(())
}

/// Bump the leading `u16` of each fixed-size entry following a `u16` count
fn shift_u16_entries(info: &mut [u8], entry_size: usize, shift: u16) -> Result<(), EncodeError> {
    if info.len() < 2 {
        return Ok(());
    }
    let count = u16::from_be_bytes([info[0], info[1]]) as usize;
    for entry in 0..count {
        let at = 2 + entry * entry_size;
        if at + 2 > info.len() {
            break;
        }
        let pc = u16::from_be_bytes([info[at], info[at + 1]]);
        let pc = shifted(pc, shift)?;
        info[at..at + 2].copy_from_slice(&pc.to_be_bytes());
    }
    Ok(())
}

fn parse_sub_attribute<A: Deserialize>(info: &[u8]) -> Result<A, EncodeError> {
    let mut reader = Cursor::new(info);
    A::deserialize(&mut reader)
        .map_err(|err: ParseError| EncodeError::InconsistentModel(format!("{:?}", err)))
}

#[cfg(test)]
mod lowering_tests {
    use super::*;
    use crate::jvm::ParseDescriptor;

    #[test]
    fn reference_results_lower_to_aconst_null() {
        let descriptor = MethodDescriptor::parse("(I)Ljava/lang/String;").unwrap();
        assert_eq!(
            lower_return_null(&descriptor.return_type),
            Some([ACONST_NULL, ARETURN, NOP, NOP])
        );
    }

    #[test]
    fn void_results_lower_to_a_bare_return() {
        let descriptor = MethodDescriptor::parse("()V").unwrap();
        assert_eq!(
            lower_return_null(&descriptor.return_type),
            Some([RETURN, NOP, NOP, NOP])
        );
    }

    #[test]
    fn primitive_results_have_no_lowering() {
        for descriptor in ["()I", "()J", "(Ljava/lang/String;)D", "()Z"] {
            let descriptor = MethodDescriptor::parse(descriptor).unwrap();
            assert_eq!(lower_return_null(&descriptor.return_type), None);
        }
    }

    #[test]
    fn array_results_are_references() {
        let descriptor = MethodDescriptor::parse("()[I").unwrap();
        assert_eq!(
            lower_return_null(&descriptor.return_type),
            Some([ACONST_NULL, ARETURN, NOP, NOP])
        );
    }
}
