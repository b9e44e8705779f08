//! Stack map frame repair
//!
//! The "back end" of the transformation. Where [`crate::editor`] works on a statement-level
//! model, this pass works on the raw instruction stream of an already-serialized buffer: it
//! rebuilds each method's control flow graph, runs a fixed-point dataflow pass over it, and
//! replaces the `StackMapTable` of every method with freshly computed frames. Code the dataflow
//! pass cannot reach is rewritten in place to `nop ... athrow` under a pinned
//! `[java/lang/Throwable]` frame, so no offset ever moves. The constant pool keeps its original
//! entry order; type references that frames need and the pool lacks are appended at the end.

mod decode;
mod errors;
mod interpret;
mod types;

pub use decode::*;
pub use errors::*;
pub use interpret::*;
pub use types::*;

use crate::jvm::class_file::{
    AttributeLike, ClassFile, Code, ConstantPool, ExceptionHandler, Method, StackMapFrame,
    StackMapTable, VerificationType, Version,
};
use crate::jvm::{Deserialize, MethodAccessFlags, MethodDescriptor, ParseDescriptor, ParseError, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Cursor;
use std::rc::Rc;

const NOP: u8 = 0x00;
const ATHROW: u8 = 0xbf;

/// Recompute the verification metadata of every method in the buffer
///
/// The result carries the same code (modulo dead-code rewriting), the same constant pool prefix,
/// and stack map tables derived from the actual control flow. Running the repair twice yields
/// the same bytes as running it once. Class files predating stack maps (major version < 50) have
/// no metadata to repair and pass through unchanged.
pub fn rewrite_stack_maps(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut class_file = ClassFile::parse(bytes)?;
    if class_file.version.major < Version::JAVA6.major {
        return Ok(bytes.to_vec());
    }

    let this_class: Rc<str> = class_file
        .constants
        .class_name(class_file.this_class)
        .map(|name| Rc::from(name.as_str()))
        .ok_or(ParseError::BadConstantIndex(class_file.this_class))?;

    let mut methods = std::mem::take(&mut class_file.methods);
    for method in &mut methods {
        repair_method(method, &mut class_file.constants, &this_class)?;
    }
    class_file.methods = methods;

    Ok(class_file.to_bytes()?)
}

fn repair_method(
    method: &mut Method,
    pool: &mut ConstantPool,
    this_class: &Rc<str>,
) -> Result<(), Error> {
    let code_at = match method.attributes.iter().position(|attribute| {
        pool.utf8(attribute.name_index).as_deref() == Some(Code::NAME)
    }) {
        Some(position) => position,
        None => return Ok(()),
    };

    let method_name = pool
        .utf8(method.name_index)
        .ok_or(ParseError::BadConstantIndex(method.name_index))?;
    let descriptor_string = pool
        .utf8(method.descriptor_index)
        .ok_or(ParseError::BadConstantIndex(method.descriptor_index))?;
    let descriptor = MethodDescriptor::parse(&descriptor_string)?;

    let mut reader = Cursor::new(method.attributes[code_at].info.as_slice());
    let mut code_attr = Code::deserialize(&mut reader)?;

    let in_cfg_err = |error: CfgError| Error::Cfg {
        method: format!("{}{}", method_name, descriptor_string),
        error,
    };

    let entry = FrameState::entry(
        this_class,
        method.access_flags.contains(MethodAccessFlags::STATIC),
        method_name == "<init>",
        &descriptor,
        code_attr.max_locals,
    )
    .map_err(in_cfg_err)?;

    let insns = decode_code(&code_attr.code).map_err(in_cfg_err)?;
    let blocks = build_blocks(&insns, &code_attr.exception_table, code_attr.code.len())
        .map_err(in_cfg_err)?;

    // First pass: which blocks does control actually reach?
    let no_dead = vec![false; blocks.len()];
    let mut max_stack = 0usize;
    let discovered = run_dataflow(
        &insns,
        &blocks,
        &code_attr.exception_table,
        pool,
        this_class,
        &entry,
        &no_dead,
        &mut max_stack,
    )
    .map_err(in_cfg_err)?;
    let dead: Vec<bool> = discovered.iter().map(|state| state.is_none()).collect();

    // Rewrite unreachable blocks to `nop ... athrow` so they type-check under a constant frame
    // without any offset moving
    let mut any_dead = false;
    for (block, _) in blocks.iter().zip(dead.iter()).filter(|(_, dead)| **dead) {
        any_dead = true;
        for byte in &mut code_attr.code[block.start..block.end] {
            *byte = NOP;
        }
        code_attr.code[block.end - 1] = ATHROW;
    }

    // Second pass over the rewritten stream: dead blocks now hold a pinned frame and contribute
    // their (degraded) exception edges, which may weaken handler frames computed before
    let states = if any_dead {
        max_stack = 0;
        run_dataflow(
            &insns,
            &blocks,
            &code_attr.exception_table,
            pool,
            this_class,
            &entry,
            &dead,
            &mut max_stack,
        )
        .map_err(in_cfg_err)?
    } else {
        discovered
    };

    // Offsets that must carry a frame, per the rewritten stream: targets of live branches,
    // exception handler entries, and anything following an instruction that never falls through
    let mut needed: BTreeSet<usize> = BTreeSet::new();
    for (index, (block, is_dead)) in blocks.iter().zip(dead.iter()).enumerate() {
        let last = &insns[block.insns.end - 1].insn;
        if !*is_dead {
            for target in last.jump_targets() {
                needed.insert(*target as usize);
            }
        }
        if let Some(next) = blocks.get(index + 1) {
            if *is_dead || last.is_unconditional_exit() {
                needed.insert(next.start);
            }
        }
    }
    for handler in &code_attr.exception_table {
        needed.insert(handler.handler_pc as usize);
    }

    let block_by_offset: HashMap<usize, usize> = blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block.start, index))
        .collect();

    let mut frames = vec![];
    // Baseline for the first frame's delta and locals comparison is the implicit entry frame
    let mut previous_locals = frame_entries(&entry).0;
    let mut previous_offset: Option<usize> = None;
    for offset in needed {
        let block = block_by_offset[&offset];
        let (locals, stack) = if dead[block] {
            (vec![], vec![AbsType::object(JAVA_LANG_THROWABLE)])
        } else {
            let state = states[block]
                .as_ref()
                .ok_or_else(|| in_cfg_err(CfgError::BadJumpTarget {
                    offset,
                    target: offset as i64,
                }))?;
            frame_entries(state)
        };
        let delta = match previous_offset {
            None => offset,
            Some(previous) => offset - previous - 1,
        } as u16;
        frames.push(encode_frame(&previous_locals, &locals, &stack, delta, pool)?);
        previous_locals = locals;
        previous_offset = Some(offset);
    }

    code_attr.max_stack = code_attr
        .max_stack
        .max(max_stack as u16)
        .max(if any_dead { 1 } else { 0 });
    code_attr.attributes.retain(|attribute| {
        pool.utf8(attribute.name_index).as_deref() != Some(StackMapTable::NAME)
    });
    if !frames.is_empty() {
        let table = pool.make_attribute(StackMapTable(frames))?;
        code_attr.attributes.push(table);
    }

    let mut info = vec![];
    code_attr.serialize(&mut info).map_err(crate::jvm::EncodeError::IoError)?;
    method.attributes[code_at].info = info;
    Ok(())
}

/// Maximal straight-line run of instructions
#[derive(Debug)]
struct Block {
    start: usize,
    end: usize,
    insns: std::ops::Range<usize>,
}

fn build_blocks(
    insns: &[DecodedInsn],
    handlers: &[ExceptionHandler],
    code_len: usize,
) -> Result<Vec<Block>, CfgError> {
    if insns.is_empty() {
        return Err(CfgError::TruncatedCode { offset: 0 });
    }

    let boundaries: HashMap<usize, usize> = insns
        .iter()
        .enumerate()
        .map(|(index, insn)| (insn.offset, index))
        .collect();
    let at_boundary = |offset: usize, at: usize| -> Result<(), CfgError> {
        if boundaries.contains_key(&offset) {
            Ok(())
        } else {
            Err(CfgError::BadJumpTarget {
                offset: at,
                target: offset as i64,
            })
        }
    };

    let mut leaders: BTreeSet<usize> = BTreeSet::new();
    leaders.insert(0);
    for insn in insns {
        if insn.insn.is_terminator() {
            for target in insn.insn.jump_targets() {
                at_boundary(*target as usize, insn.offset)?;
                leaders.insert(*target as usize);
            }
            let next = insn.offset + insn.width;
            if next < code_len {
                leaders.insert(next);
            }
        }
    }
    for handler in handlers {
        at_boundary(handler.handler_pc as usize, handler.handler_pc as usize)?;
        at_boundary(handler.start_pc as usize, handler.start_pc as usize)?;
        if handler.end_pc as usize != code_len {
            at_boundary(handler.end_pc as usize, handler.end_pc as usize)?;
        }
        leaders.insert(handler.handler_pc as usize);
    }

    let starts: Vec<usize> = leaders.into_iter().collect();
    let mut blocks = vec![];
    for (index, &start) in starts.iter().enumerate() {
        let end = starts.get(index + 1).copied().unwrap_or(code_len);
        let first_insn = boundaries[&start];
        let last_insn = match starts.get(index + 1) {
            Some(next_start) => boundaries[next_start],
            None => insns.len(),
        };
        blocks.push(Block {
            start,
            end,
            insns: first_insn..last_insn,
        });
    }
    Ok(blocks)
}

/// Worklist fixed point over the control flow graph
///
/// Blocks flagged `dead` hold a pinned `{no locals, [Throwable]}` frame: nothing merges into
/// them, and they contribute only their exception edges (with every local degraded), which is
/// exactly how their rewritten `nop ... athrow` form behaves.
#[allow(clippy::too_many_arguments)]
fn run_dataflow(
    insns: &[DecodedInsn],
    blocks: &[Block],
    handlers: &[ExceptionHandler],
    pool: &ConstantPool,
    this_class: &Rc<str>,
    entry: &FrameState,
    dead: &[bool],
    max_stack: &mut usize,
) -> Result<Vec<Option<FrameState>>, CfgError> {
    let max_locals = entry.locals.len();
    let block_by_offset: HashMap<usize, usize> = blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block.start, index))
        .collect();

    let pinned = FrameState {
        locals: vec![AbsType::Top; max_locals],
        stack: vec![AbsType::object(JAVA_LANG_THROWABLE)],
    };

    let mut states: Vec<Option<FrameState>> = vec![None; blocks.len()];
    let mut worklist: VecDeque<usize> = VecDeque::new();
    let mut queued = vec![false; blocks.len()];

    states[0] = Some(entry.clone());
    worklist.push_back(0);
    queued[0] = true;
    for (index, _) in dead.iter().enumerate().filter(|(_, dead)| **dead) {
        states[index] = Some(pinned.clone());
        worklist.push_back(index);
        queued[index] = true;
    }

    let catch_type = |handler: &ExceptionHandler| -> Result<AbsType, CfgError> {
        if handler.catch_type == 0 {
            Ok(AbsType::object(JAVA_LANG_THROWABLE))
        } else {
            pool.class_name(handler.catch_type)
                .map(|name| AbsType::Object(Rc::from(name.as_str())))
                .ok_or(CfgError::BadConstant {
                    offset: handler.handler_pc as usize,
                    index: handler.catch_type,
                })
        }
    };

    while let Some(index) = worklist.pop_front() {
        queued[index] = false;
        let block = &blocks[index];

        // Dead blocks: exception edges only, with every local slot already degraded
        if dead[index] {
            for handler in handlers {
                if (handler.start_pc as usize) < block.end
                    && block.start < handler.end_pc as usize
                {
                    let edge = FrameState {
                        locals: vec![AbsType::Top; max_locals],
                        stack: vec![catch_type(handler)?],
                    };
                    merge_into(
                        &block_by_offset,
                        &mut states,
                        &mut worklist,
                        &mut queued,
                        dead,
                        handler.handler_pc as usize,
                        &edge,
                    )?;
                }
            }
            continue;
        }

        let mut state = match &states[index] {
            Some(state) => state.clone(),
            None => continue,
        };
        // A handler's caught exception is already on the stack when its first instruction runs
        *max_stack = (*max_stack).max(state.stack.len());
        let ctx = StepContext {
            pool,
            this_class: this_class.clone(),
        };

        for insn in &insns[block.insns.clone()] {
            // An exception can fire anywhere in the covered range; the handler sees the locals
            // as they are right before this instruction
            for handler in handlers {
                if (handler.start_pc as usize) <= insn.offset
                    && insn.offset < handler.end_pc as usize
                {
                    let edge = FrameState {
                        locals: state.locals.clone(),
                        stack: vec![catch_type(handler)?],
                    };
                    merge_into(
                        &block_by_offset,
                        &mut states,
                        &mut worklist,
                        &mut queued,
                        dead,
                        handler.handler_pc as usize,
                        &edge,
                    )?;
                }
            }

            step(&mut state, &insn.insn, insn.offset, &ctx)?;
            *max_stack = (*max_stack).max(state.stack.len());
        }

        let last = &insns[block.insns.end - 1];
        let mut successors: Vec<usize> = last
            .insn
            .jump_targets()
            .iter()
            .map(|target| *target as usize)
            .collect();
        if !last.insn.is_unconditional_exit() {
            match blocks.get(index + 1) {
                Some(next) => successors.push(next.start),
                None => return Err(CfgError::FallsOffCode { offset: last.offset }),
            }
        }
        for successor in successors {
            merge_into(
                &block_by_offset,
                &mut states,
                &mut worklist,
                &mut queued,
                dead,
                successor,
                &state,
            )?;
        }
    }

    Ok(states)
}

fn merge_into(
    block_by_offset: &HashMap<usize, usize>,
    states: &mut [Option<FrameState>],
    worklist: &mut VecDeque<usize>,
    queued: &mut [bool],
    dead: &[bool],
    target_offset: usize,
    incoming: &FrameState,
) -> Result<(), CfgError> {
    let target = block_by_offset[&target_offset];
    if dead[target] {
        return Ok(());
    }
    let changed = match &mut states[target] {
        Some(existing) => merge_frames(existing, incoming, target_offset)?,
        none => {
            *none = Some(incoming.clone());
            true
        }
    };
    if changed && !queued[target] {
        worklist.push_back(target);
        queued[target] = true;
    }
    Ok(())
}

/// Compress a slot-expanded frame into stack map entry lists (one entry per value, trailing
/// unusable locals trimmed)
///
/// Entries stay abstract here: interning a type into the constant pool is deferred to
/// [`encode_frame`], which knows whether the chosen encoding writes the type out at all.
fn frame_entries(state: &FrameState) -> (Vec<AbsType>, Vec<AbsType>) {
    let compress = |slots: &[AbsType]| -> Vec<AbsType> {
        let mut entries = vec![];
        let mut at = 0;
        while at < slots.len() {
            let slot = &slots[at];
            entries.push(slot.clone());
            at += if slot.is_wide() { 2 } else { 1 };
        }
        entries
    };

    let mut locals = compress(&state.locals);
    while locals.last() == Some(&AbsType::Top) {
        locals.pop();
    }
    let stack = compress(&state.stack);
    (locals, stack)
}

fn abs_to_verification(
    abs: &AbsType,
    pool: &mut ConstantPool,
) -> Result<VerificationType, crate::jvm::EncodeError> {
    Ok(match abs {
        AbsType::Top => VerificationType::Top,
        AbsType::Integer => VerificationType::Integer,
        AbsType::Float => VerificationType::Float,
        AbsType::Long => VerificationType::Long,
        AbsType::Double => VerificationType::Double,
        AbsType::Null => VerificationType::Null,
        AbsType::UninitializedThis => VerificationType::UninitializedThis,
        AbsType::Object(name) => VerificationType::Object(pool.ensure_class(name)?),
        AbsType::Uninitialized { offset, .. } => VerificationType::Uninitialized(*offset),
    })
}

/// Pick the most compact frame encoding for the transition, falling back to a full frame
///
/// Mirrors the frame selection rules of the format: same/chop/append apply only with an empty
/// stack and a shared locals prefix within three entries of the previous frame. Only the types
/// the chosen encoding actually writes out are interned into the constant pool: a `same_frame`
/// costs nothing, so emitting one must not grow the pool.
fn encode_frame(
    previous_locals: &[AbsType],
    locals: &[AbsType],
    stack: &[AbsType],
    offset_delta: u16,
    pool: &mut ConstantPool,
) -> Result<StackMapFrame, crate::jvm::EncodeError> {
    let extended = offset_delta > 63;
    match stack.len() {
        0 => {
            if locals.len() <= previous_locals.len() {
                let chopped = previous_locals.len() - locals.len();
                if chopped < 4 && locals == &previous_locals[..locals.len()] {
                    return Ok(if chopped == 0 {
                        StackMapFrame::Same {
                            offset_delta,
                            extended,
                        }
                    } else {
                        StackMapFrame::ChopLocals {
                            offset_delta,
                            chopped_k: chopped as u8,
                        }
                    });
                }
            } else {
                let added = locals.len() - previous_locals.len();
                if added < 4 && &locals[..previous_locals.len()] == previous_locals {
                    let appended = locals[previous_locals.len()..]
                        .iter()
                        .map(|entry| abs_to_verification(entry, pool))
                        .collect::<Result<_, _>>()?;
                    return Ok(StackMapFrame::AppendLocals {
                        offset_delta,
                        locals: appended,
                    });
                }
            }
        }
        1 if locals == previous_locals => {
            return Ok(StackMapFrame::SameLocalsOneStack {
                offset_delta,
                extended,
                stack: abs_to_verification(&stack[0], pool)?,
            });
        }
        _ => (),
    }
    Ok(StackMapFrame::Full {
        offset_delta,
        locals: locals
            .iter()
            .map(|entry| abs_to_verification(entry, pool))
            .collect::<Result<_, _>>()?,
        stack: stack
            .iter()
            .map(|entry| abs_to_verification(entry, pool))
            .collect::<Result<_, _>>()?,
    })
}

#[cfg(test)]
mod encode_frame_tests {
    use super::*;

    #[test]
    fn same_locals_empty_stack_is_a_same_frame() {
        let mut pool = ConstantPool::new();
        let previous = vec![AbsType::Integer];
        let frame = encode_frame(&previous, &previous, &[], 10, &mut pool).unwrap();
        assert_eq!(
            frame,
            StackMapFrame::Same {
                offset_delta: 10,
                extended: false
            }
        );
    }

    #[test]
    fn longer_deltas_use_the_extended_encoding() {
        let mut pool = ConstantPool::new();
        let frame = encode_frame(&[], &[], &[], 100, &mut pool).unwrap();
        assert_eq!(
            frame,
            StackMapFrame::Same {
                offset_delta: 100,
                extended: true
            }
        );
    }

    #[test]
    fn shared_prefix_chops_and_appends() {
        let mut pool = ConstantPool::new();
        let previous = vec![AbsType::Integer, AbsType::Float];
        assert_eq!(
            encode_frame(&previous, &[AbsType::Integer], &[], 3, &mut pool).unwrap(),
            StackMapFrame::ChopLocals {
                offset_delta: 3,
                chopped_k: 1
            }
        );
        assert_eq!(
            encode_frame(
                &previous,
                &[AbsType::Integer, AbsType::Float, AbsType::Long],
                &[],
                3,
                &mut pool
            )
            .unwrap(),
            StackMapFrame::AppendLocals {
                offset_delta: 3,
                locals: vec![VerificationType::Long]
            }
        );
    }

    #[test]
    fn unrelated_locals_fall_back_to_a_full_frame() {
        let mut pool = ConstantPool::new();
        let previous = vec![AbsType::Integer];
        let frame = encode_frame(
            &previous,
            &[AbsType::Float],
            &[AbsType::Integer, AbsType::Null],
            0,
            &mut pool,
        )
        .unwrap();
        assert!(matches!(frame, StackMapFrame::Full { .. }));
    }

    #[test]
    fn compact_encodings_do_not_grow_the_pool() {
        let mut pool = ConstantPool::new();
        let previous = vec![AbsType::object("demo/Widget")];
        let before = pool.slot_count();
        encode_frame(&previous, &previous, &[], 5, &mut pool).unwrap();
        assert_eq!(pool.slot_count(), before);
    }

    #[test]
    fn one_stack_item_over_unchanged_locals_is_compact() {
        let mut pool = ConstantPool::new();
        let previous = vec![AbsType::Integer];
        let frame = encode_frame(&previous, &previous, &[AbsType::Null], 5, &mut pool).unwrap();
        assert_eq!(
            frame,
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 5,
                extended: false,
                stack: VerificationType::Null
            }
        );
    }
}
