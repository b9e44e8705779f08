use crate::jvm::class_file::{Constant, ConstantPool};
use crate::jvm::{BaseType, FieldType, MethodDescriptor, ParseDescriptor, RenderDescriptor};
use crate::repair::decode::{ArrayKind, BranchKind, Insn, InvokeKind, VKind};
use crate::repair::{join, AbsType, CfgError, JAVA_LANG_OBJECT};
use std::rc::Rc;

/// Abstract machine state at one point in a method: one entry per *slot*
///
/// Both vectors are slot-expanded: a `Long`/`Double` occupies its own slot plus a `Top` filler
/// slot right after it, mirroring how the JVM numbers locals and counts stack words. Emission
/// into stack map frames re-compresses pairs into single entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameState {
    pub locals: Vec<AbsType>,
    pub stack: Vec<AbsType>,
}

impl FrameState {
    /// The implicit frame at a method's entry, derived from its descriptor
    pub fn entry(
        this_class: &Rc<str>,
        is_static: bool,
        is_instance_init: bool,
        descriptor: &MethodDescriptor,
        max_locals: u16,
    ) -> Result<FrameState, CfgError> {
        let mut locals = vec![];
        if !is_static {
            if is_instance_init {
                locals.push(AbsType::UninitializedThis);
            } else {
                locals.push(AbsType::Object(this_class.clone()));
            }
        }
        for parameter in &descriptor.parameters {
            let abs = field_type_to_abs(parameter);
            let wide = abs.is_wide();
            locals.push(abs);
            if wide {
                locals.push(AbsType::Top);
            }
        }
        if locals.len() > max_locals as usize {
            return Err(CfgError::BadLocalIndex {
                offset: 0,
                index: locals.len() as u16,
            });
        }
        locals.resize(max_locals as usize, AbsType::Top);
        Ok(FrameState {
            locals,
            stack: vec![],
        })
    }

    fn push(&mut self, value: AbsType) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(AbsType::Top);
        }
    }

    fn pop_slot(&mut self, offset: usize) -> Result<AbsType, CfgError> {
        self.stack.pop().ok_or(CfgError::StackUnderflow { offset })
    }

    /// Pop a single-slot value (`Top` here means we are splitting a two-slot pair)
    fn pop_cat1(&mut self, offset: usize) -> Result<AbsType, CfgError> {
        let value = self.pop_slot(offset)?;
        if value == AbsType::Top || value.is_wide() {
            return Err(CfgError::TypeMismatch { offset });
        }
        Ok(value)
    }

    /// Pop a two-slot value: the filler slot, then the value itself
    fn pop_cat2(&mut self, offset: usize) -> Result<AbsType, CfgError> {
        let filler = self.pop_slot(offset)?;
        let value = self.pop_slot(offset)?;
        if filler != AbsType::Top || !value.is_wide() {
            return Err(CfgError::TypeMismatch { offset });
        }
        Ok(value)
    }

    fn pop_expect(&mut self, expected: AbsType, offset: usize) -> Result<(), CfgError> {
        let value = if expected.is_wide() {
            self.pop_cat2(offset)?
        } else {
            self.pop_cat1(offset)?
        };
        if value != expected {
            return Err(CfgError::TypeMismatch { offset });
        }
        Ok(())
    }

    fn pop_ref(&mut self, offset: usize) -> Result<AbsType, CfgError> {
        let value = self.pop_cat1(offset)?;
        if !value.is_reference() {
            return Err(CfgError::TypeMismatch { offset });
        }
        Ok(value)
    }

    fn pop_kind(&mut self, kind: VKind, offset: usize) -> Result<AbsType, CfgError> {
        match kind {
            VKind::Int => {
                self.pop_expect(AbsType::Integer, offset)?;
                Ok(AbsType::Integer)
            }
            VKind::Float => {
                self.pop_expect(AbsType::Float, offset)?;
                Ok(AbsType::Float)
            }
            VKind::Long => {
                self.pop_expect(AbsType::Long, offset)?;
                Ok(AbsType::Long)
            }
            VKind::Double => {
                self.pop_expect(AbsType::Double, offset)?;
                Ok(AbsType::Double)
            }
            VKind::Ref => self.pop_ref(offset),
        }
    }

    fn push_kind(&mut self, kind: VKind) {
        match kind {
            VKind::Int => self.push(AbsType::Integer),
            VKind::Float => self.push(AbsType::Float),
            VKind::Long => self.push(AbsType::Long),
            VKind::Double => self.push(AbsType::Double),
            VKind::Ref => self.push(AbsType::object(JAVA_LANG_OBJECT)),
        }
    }

    fn load(&mut self, kind: VKind, index: u16, offset: usize) -> Result<(), CfgError> {
        let slot = self
            .locals
            .get(index as usize)
            .ok_or(CfgError::BadLocalIndex { offset, index })?
            .clone();
        let matches_kind = match kind {
            VKind::Int => slot == AbsType::Integer,
            VKind::Float => slot == AbsType::Float,
            VKind::Long => slot == AbsType::Long,
            VKind::Double => slot == AbsType::Double,
            VKind::Ref => slot.is_reference(),
        };
        if !matches_kind {
            return Err(CfgError::TypeMismatch { offset });
        }
        self.push(slot);
        Ok(())
    }

    fn store(&mut self, kind: VKind, index: u16, offset: usize) -> Result<(), CfgError> {
        let value = self.pop_kind(kind, offset)?;
        let index = index as usize;
        let width = if value.is_wide() { 2 } else { 1 };
        if index + width > self.locals.len() {
            return Err(CfgError::BadLocalIndex {
                offset,
                index: index as u16,
            });
        }
        // Overwriting the second slot of a two-slot value kills the whole value
        if index > 0 && self.locals[index - 1].is_wide() {
            self.locals[index - 1] = AbsType::Top;
        }
        if value.is_wide() {
            self.locals[index + 1] = AbsType::Top;
        } else if index + 1 < self.locals.len() && self.locals[index].is_wide() {
            self.locals[index + 1] = AbsType::Top;
        }
        self.locals[index] = value;
        Ok(())
    }

    /// Insert `value` so that `depth` existing slots sit above it, refusing to split a two-slot
    /// pair at the insertion point
    fn insert_under(&mut self, depth: usize, value: AbsType, offset: usize) -> Result<(), CfgError> {
        if self.stack.len() < depth {
            return Err(CfgError::StackUnderflow { offset });
        }
        let at = self.stack.len() - depth;
        if at > 0 && self.stack[at - 1].is_wide() {
            return Err(CfgError::TypeMismatch { offset });
        }
        self.stack.insert(at, value);
        Ok(())
    }

    /// Top two slots viewed as one dup2-able unit (two category-1 values or one category-2 pair)
    fn top_pair(&self, offset: usize) -> Result<[AbsType; 2], CfgError> {
        if self.stack.len() < 2 {
            return Err(CfgError::StackUnderflow { offset });
        }
        let top = self.stack[self.stack.len() - 1].clone();
        let under = self.stack[self.stack.len() - 2].clone();
        let valid = if under.is_wide() {
            top == AbsType::Top
        } else {
            top != AbsType::Top && !top.is_wide() && under != AbsType::Top
        };
        if !valid {
            return Err(CfgError::TypeMismatch { offset });
        }
        Ok([under, top])
    }

    /// After `<init>` runs, every copy of the uninitialized value becomes the real type
    fn initialize(&mut self, from: &AbsType, to: AbsType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == from {
                *slot = to.clone();
            }
        }
    }
}

/// Join `incoming` into `existing` at a control-flow merge point
///
/// Stack heights must agree and stack slots must join; local slots that cannot join degrade to
/// `Top`. Returns whether `existing` changed (the fixed-point driver re-queues the target block
/// when it did).
pub fn merge_frames(
    existing: &mut FrameState,
    incoming: &FrameState,
    target: usize,
) -> Result<bool, CfgError> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(CfgError::StackHeightMismatch { target });
    }
    let mut changed = false;
    for (slot, (a, b)) in existing
        .stack
        .iter_mut()
        .zip(incoming.stack.iter())
        .enumerate()
    {
        let joined = join(a, b).ok_or(CfgError::UnjoinableStack { target, slot })?;
        if *a != joined {
            *a = joined;
            changed = true;
        }
    }
    for (a, b) in existing.locals.iter_mut().zip(incoming.locals.iter()) {
        let joined = join(a, b).unwrap_or(AbsType::Top);
        if *a != joined {
            *a = joined;
            changed = true;
        }
    }
    Ok(changed)
}

/// Everything the per-instruction transfer function needs besides the frame itself
pub struct StepContext<'a> {
    pub pool: &'a ConstantPool,
    pub this_class: Rc<str>,
}

/// Apply one instruction's effect to the frame
///
/// Terminator pops (branch conditions, return values, thrown exceptions) are applied here too;
/// the driver reads the post-state for successor merges.
pub fn step(
    state: &mut FrameState,
    insn: &Insn,
    offset: usize,
    ctx: &StepContext,
) -> Result<(), CfgError> {
    match insn {
        Insn::Nop => (),
        Insn::AConstNull => state.push(AbsType::Null),
        Insn::IConst => state.push(AbsType::Integer),
        Insn::LConst => state.push(AbsType::Long),
        Insn::FConst => state.push(AbsType::Float),
        Insn::DConst => state.push(AbsType::Double),
        Insn::Ldc(index) => {
            let value = match ctx.pool.get(*index) {
                Some(Constant::Integer(_)) => AbsType::Integer,
                Some(Constant::Float(_)) => AbsType::Float,
                Some(Constant::String(_)) => AbsType::object("java/lang/String"),
                Some(Constant::Class(_)) => AbsType::object("java/lang/Class"),
                Some(Constant::MethodHandle { .. }) => {
                    AbsType::object("java/lang/invoke/MethodHandle")
                }
                Some(Constant::MethodType { .. }) => {
                    AbsType::object("java/lang/invoke/MethodType")
                }
                Some(Constant::Dynamic { name_and_type, .. }) => {
                    let abs = dynamic_constant_type(ctx.pool, *name_and_type, offset)?;
                    if abs.is_wide() {
                        return Err(CfgError::BadConstant {
                            offset,
                            index: *index,
                        });
                    }
                    abs
                }
                _ => {
                    return Err(CfgError::BadConstant {
                        offset,
                        index: *index,
                    })
                }
            };
            state.push(value);
        }
        Insn::Ldc2(index) => {
            let value = match ctx.pool.get(*index) {
                Some(Constant::Long(_)) => AbsType::Long,
                Some(Constant::Double(_)) => AbsType::Double,
                Some(Constant::Dynamic { name_and_type, .. }) => {
                    let abs = dynamic_constant_type(ctx.pool, *name_and_type, offset)?;
                    if !abs.is_wide() {
                        return Err(CfgError::BadConstant {
                            offset,
                            index: *index,
                        });
                    }
                    abs
                }
                _ => {
                    return Err(CfgError::BadConstant {
                        offset,
                        index: *index,
                    })
                }
            };
            state.push(value);
        }
        Insn::Load(kind, index) => state.load(*kind, *index, offset)?,
        Insn::Store(kind, index) => state.store(*kind, *index, offset)?,
        Insn::ArrayLoad(kind) => {
            state.pop_expect(AbsType::Integer, offset)?;
            let array = state.pop_ref(offset)?;
            match kind {
                ArrayKind::Ref => state.push(reference_element_type(&array)),
                other => state.push_kind(other.value_kind()),
            }
        }
        Insn::ArrayStore(kind) => {
            state.pop_kind(kind.value_kind(), offset)?;
            state.pop_expect(AbsType::Integer, offset)?;
            state.pop_ref(offset)?;
        }
        Insn::Pop => {
            state.pop_cat1(offset)?;
        }
        Insn::Pop2 => {
            state.pop_slot(offset)?;
            state.pop_slot(offset)?;
            // Popping half of a two-slot value is not a valid form
            if state.stack.last().map_or(false, AbsType::is_wide) {
                return Err(CfgError::TypeMismatch { offset });
            }
        }
        Insn::Dup => {
            let top = state.stack.last().cloned().ok_or(CfgError::StackUnderflow { offset })?;
            if top == AbsType::Top || top.is_wide() {
                return Err(CfgError::TypeMismatch { offset });
            }
            state.stack.push(top);
        }
        Insn::DupX1 => {
            let a = state.pop_cat1(offset)?;
            let b = state.pop_cat1(offset)?;
            state.stack.push(a.clone());
            state.stack.push(b);
            state.stack.push(a);
        }
        Insn::DupX2 => {
            let top = state.stack.last().cloned().ok_or(CfgError::StackUnderflow { offset })?;
            if top == AbsType::Top || top.is_wide() {
                return Err(CfgError::TypeMismatch { offset });
            }
            state.insert_under(3, top, offset)?;
        }
        Insn::Dup2 => {
            let [under, top] = state.top_pair(offset)?;
            state.stack.push(under);
            state.stack.push(top);
        }
        Insn::Dup2X1 => {
            let [under, top] = state.top_pair(offset)?;
            state.insert_under(3, top, offset)?;
            state.insert_under(4, under, offset)?;
        }
        Insn::Dup2X2 => {
            let [under, top] = state.top_pair(offset)?;
            state.insert_under(4, top, offset)?;
            state.insert_under(5, under, offset)?;
        }
        Insn::Swap => {
            let a = state.pop_cat1(offset)?;
            let b = state.pop_cat1(offset)?;
            state.stack.push(a);
            state.stack.push(b);
        }
        Insn::Binary(kind) => {
            state.pop_kind(*kind, offset)?;
            state.pop_kind(*kind, offset)?;
            state.push_kind(*kind);
        }
        Insn::Neg(kind) => {
            state.pop_kind(*kind, offset)?;
            state.push_kind(*kind);
        }
        Insn::Shift(kind) => {
            state.pop_expect(AbsType::Integer, offset)?;
            state.pop_kind(*kind, offset)?;
            state.push_kind(*kind);
        }
        Insn::IInc(index) => {
            if state.locals.get(*index as usize) != Some(&AbsType::Integer) {
                return Err(CfgError::TypeMismatch { offset });
            }
        }
        Insn::Convert(from, to) => {
            state.pop_kind(*from, offset)?;
            state.push_kind(*to);
        }
        Insn::Cmp(kind) => {
            state.pop_kind(*kind, offset)?;
            state.pop_kind(*kind, offset)?;
            state.push(AbsType::Integer);
        }
        Insn::GetStatic(index) => {
            let field_type = field_ref_type(ctx.pool, *index, offset)?;
            state.push(field_type_to_abs(&field_type));
        }
        Insn::PutStatic(index) => {
            let field_type = field_ref_type(ctx.pool, *index, offset)?;
            state.pop_kind(field_type_kind(&field_type), offset)?;
        }
        Insn::GetField(index) => {
            let field_type = field_ref_type(ctx.pool, *index, offset)?;
            state.pop_ref(offset)?;
            state.push(field_type_to_abs(&field_type));
        }
        Insn::PutField(index) => {
            let field_type = field_ref_type(ctx.pool, *index, offset)?;
            state.pop_kind(field_type_kind(&field_type), offset)?;
            state.pop_ref(offset)?;
        }
        Insn::Invoke { index, kind } => {
            let (name, descriptor) = method_ref(ctx.pool, *index, offset)?;
            for parameter in descriptor.parameters.iter().rev() {
                state.pop_kind(field_type_kind(parameter), offset)?;
            }
            if !matches!(kind, InvokeKind::Static | InvokeKind::Dynamic) {
                let receiver = state.pop_ref(offset)?;
                if name == "<init>" && *kind == InvokeKind::Special {
                    match &receiver {
                        AbsType::Uninitialized { class, .. } => {
                            let initialized = AbsType::Object(class.clone());
                            state.initialize(&receiver, initialized);
                        }
                        AbsType::UninitializedThis => {
                            let initialized = AbsType::Object(ctx.this_class.clone());
                            state.initialize(&AbsType::UninitializedThis, initialized);
                        }
                        _ => return Err(CfgError::TypeMismatch { offset }),
                    }
                }
            }
            if let Some(return_type) = &descriptor.return_type {
                state.push(field_type_to_abs(return_type));
            }
        }
        Insn::New(index) => {
            let class = class_constant_name(ctx.pool, *index, offset)?;
            state.push(AbsType::Uninitialized {
                offset: offset as u16,
                class,
            });
        }
        Insn::NewArray(base_type) => {
            state.pop_expect(AbsType::Integer, offset)?;
            let name = FieldType::array(FieldType::Base(*base_type)).render();
            state.push(AbsType::Object(Rc::from(name.as_str())));
        }
        Insn::ANewArray(index) => {
            state.pop_expect(AbsType::Integer, offset)?;
            let element = class_constant_name(ctx.pool, *index, offset)?;
            let name = if element.starts_with('[') {
                format!("[{}", element)
            } else {
                format!("[L{};", element)
            };
            state.push(AbsType::Object(Rc::from(name.as_str())));
        }
        Insn::MultiANewArray { index, dimensions } => {
            for _ in 0..*dimensions {
                state.pop_expect(AbsType::Integer, offset)?;
            }
            let class = class_constant_name(ctx.pool, *index, offset)?;
            state.push(AbsType::Object(class));
        }
        Insn::ArrayLength => {
            state.pop_ref(offset)?;
            state.push(AbsType::Integer);
        }
        Insn::CheckCast(index) => {
            state.pop_ref(offset)?;
            let class = class_constant_name(ctx.pool, *index, offset)?;
            state.push(AbsType::Object(class));
        }
        Insn::InstanceOf(index) => {
            state.pop_ref(offset)?;
            class_constant_name(ctx.pool, *index, offset)?;
            state.push(AbsType::Integer);
        }
        Insn::MonitorEnter | Insn::MonitorExit => {
            state.pop_ref(offset)?;
        }

        Insn::Branch { kind, .. } => match kind {
            BranchKind::IntZero => {
                state.pop_expect(AbsType::Integer, offset)?;
            }
            BranchKind::IntCmp => {
                state.pop_expect(AbsType::Integer, offset)?;
                state.pop_expect(AbsType::Integer, offset)?;
            }
            BranchKind::RefCmp => {
                state.pop_ref(offset)?;
                state.pop_ref(offset)?;
            }
            BranchKind::RefNull => {
                state.pop_ref(offset)?;
            }
        },
        Insn::Goto { .. } => (),
        Insn::Switch { .. } => {
            state.pop_expect(AbsType::Integer, offset)?;
        }
        Insn::Return(kind) => {
            if let Some(kind) = kind {
                state.pop_kind(*kind, offset)?;
            }
        }
        Insn::AThrow => {
            state.pop_ref(offset)?;
        }
    }
    Ok(())
}

/// Map a descriptor type onto the abstract lattice
pub fn field_type_to_abs(field_type: &FieldType) -> AbsType {
    match field_type {
        FieldType::Base(BaseType::Float) => AbsType::Float,
        FieldType::Base(BaseType::Long) => AbsType::Long,
        FieldType::Base(BaseType::Double) => AbsType::Double,
        FieldType::Base(_) => AbsType::Integer,
        FieldType::Object(name) => AbsType::Object(Rc::from(name.as_str())),
        array @ FieldType::Array(_) => AbsType::Object(Rc::from(array.render().as_str())),
    }
}

fn field_type_kind(field_type: &FieldType) -> VKind {
    match field_type {
        FieldType::Base(BaseType::Float) => VKind::Float,
        FieldType::Base(BaseType::Long) => VKind::Long,
        FieldType::Base(BaseType::Double) => VKind::Double,
        FieldType::Base(_) => VKind::Int,
        FieldType::Object(_) | FieldType::Array(_) => VKind::Ref,
    }
}

/// Element type pushed by `aaload`, as far as the array operand reveals it
fn reference_element_type(array: &AbsType) -> AbsType {
    match array {
        AbsType::Null => AbsType::Null,
        AbsType::Object(name) => match name.strip_prefix('[') {
            Some(element) if element.starts_with('[') => {
                AbsType::Object(Rc::from(element))
            }
            Some(element) => match element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
                Some(class) => AbsType::Object(Rc::from(class)),
                None => AbsType::object(JAVA_LANG_OBJECT),
            },
            None => AbsType::object(JAVA_LANG_OBJECT),
        },
        _ => AbsType::object(JAVA_LANG_OBJECT),
    }
}

fn class_constant_name(
    pool: &ConstantPool,
    index: u16,
    offset: usize,
) -> Result<Rc<str>, CfgError> {
    pool.class_name(index)
        .map(|name| Rc::from(name.as_str()))
        .ok_or(CfgError::BadConstant { offset, index })
}

fn field_ref_type(pool: &ConstantPool, index: u16, offset: usize) -> Result<FieldType, CfgError> {
    let name_and_type = match pool.get(index) {
        Some(Constant::FieldRef { name_and_type, .. }) => *name_and_type,
        _ => return Err(CfgError::BadConstant { offset, index }),
    };
    let descriptor = pool
        .name_and_type_descriptor(name_and_type)
        .ok_or(CfgError::BadConstant { offset, index })?;
    FieldType::parse(&descriptor).map_err(|_| CfgError::BadConstant { offset, index })
}

fn method_ref(
    pool: &ConstantPool,
    index: u16,
    offset: usize,
) -> Result<(String, MethodDescriptor), CfgError> {
    let name_and_type = match pool.get(index) {
        Some(Constant::MethodRef { name_and_type, .. })
        | Some(Constant::InterfaceMethodRef { name_and_type, .. })
        | Some(Constant::InvokeDynamic { name_and_type, .. }) => *name_and_type,
        _ => return Err(CfgError::BadConstant { offset, index }),
    };
    let (name_index, descriptor_index) = match pool.get(name_and_type) {
        Some(Constant::NameAndType { name, descriptor }) => (*name, *descriptor),
        _ => return Err(CfgError::BadConstant { offset, index }),
    };
    let name = pool
        .utf8(name_index)
        .ok_or(CfgError::BadConstant { offset, index })?;
    let descriptor = pool
        .utf8(descriptor_index)
        .ok_or(CfgError::BadConstant { offset, index })?;
    let descriptor =
        MethodDescriptor::parse(&descriptor).map_err(|_| CfgError::BadConstant { offset, index })?;
    Ok((name, descriptor))
}

fn dynamic_constant_type(
    pool: &ConstantPool,
    name_and_type: u16,
    offset: usize,
) -> Result<AbsType, CfgError> {
    let descriptor = pool.name_and_type_descriptor(name_and_type).ok_or(
        CfgError::BadConstant {
            offset,
            index: name_and_type,
        },
    )?;
    let field_type = FieldType::parse(&descriptor).map_err(|_| CfgError::BadConstant {
        offset,
        index: name_and_type,
    })?;
    Ok(field_type_to_abs(&field_type))
}

#[cfg(test)]
mod frame_tests {
    use super::*;
    use crate::jvm::ParseDescriptor;

    fn ctx(pool: &ConstantPool) -> StepContext {
        StepContext {
            pool,
            this_class: Rc::from("demo/Test"),
        }
    }

    #[test]
    fn entry_frame_expands_wide_parameters() {
        let descriptor = MethodDescriptor::parse("(JLjava/lang/String;)V").unwrap();
        let frame =
            FrameState::entry(&Rc::from("demo/Test"), true, false, &descriptor, 5).unwrap();
        assert_eq!(
            frame.locals,
            vec![
                AbsType::Long,
                AbsType::Top,
                AbsType::object("java/lang/String"),
                AbsType::Top,
                AbsType::Top,
            ]
        );
    }

    #[test]
    fn entry_frame_rejects_too_small_max_locals() {
        let descriptor = MethodDescriptor::parse("(JJ)V").unwrap();
        assert!(matches!(
            FrameState::entry(&Rc::from("demo/Test"), true, false, &descriptor, 3),
            Err(CfgError::BadLocalIndex { .. })
        ));
    }

    #[test]
    fn wide_values_move_as_pairs() {
        let pool = ConstantPool::new();
        let descriptor = MethodDescriptor::parse("(J)V").unwrap();
        let mut frame =
            FrameState::entry(&Rc::from("demo/Test"), true, false, &descriptor, 4).unwrap();

        step(&mut frame, &Insn::Load(VKind::Long, 0), 0, &ctx(&pool)).unwrap();
        assert_eq!(frame.stack, vec![AbsType::Long, AbsType::Top]);

        step(&mut frame, &Insn::Store(VKind::Long, 2), 1, &ctx(&pool)).unwrap();
        assert!(frame.stack.is_empty());
        assert_eq!(frame.locals[2], AbsType::Long);
        assert_eq!(frame.locals[3], AbsType::Top);
    }

    #[test]
    fn storing_over_half_a_pair_kills_the_pair() {
        let pool = ConstantPool::new();
        let descriptor = MethodDescriptor::parse("(J)V").unwrap();
        let mut frame =
            FrameState::entry(&Rc::from("demo/Test"), true, false, &descriptor, 4).unwrap();

        step(&mut frame, &Insn::IConst, 0, &ctx(&pool)).unwrap();
        step(&mut frame, &Insn::Store(VKind::Int, 1), 1, &ctx(&pool)).unwrap();
        assert_eq!(frame.locals[0], AbsType::Top);
        assert_eq!(frame.locals[1], AbsType::Integer);
    }

    #[test]
    fn popping_half_a_pair_is_rejected() {
        let pool = ConstantPool::new();
        let mut frame = FrameState {
            locals: vec![],
            stack: vec![],
        };
        step(&mut frame, &Insn::LConst, 0, &ctx(&pool)).unwrap();
        assert!(matches!(
            step(&mut frame, &Insn::Pop, 1, &ctx(&pool)),
            Err(CfgError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn new_then_init_initializes_every_copy() {
        let mut pool = ConstantPool::new();
        let class = pool.ensure_class("demo/Widget").unwrap();
        let name = pool.ensure_utf8("<init>").unwrap();
        let descriptor = pool.ensure_utf8("()V").unwrap();
        let name_and_type = pool
            .push(Constant::NameAndType {
                name,
                descriptor,
            })
            .unwrap();
        let init = pool
            .push(Constant::MethodRef {
                class,
                name_and_type,
            })
            .unwrap();

        let mut frame = FrameState {
            locals: vec![AbsType::Top],
            stack: vec![],
        };
        step(&mut frame, &Insn::New(class), 0, &ctx(&pool)).unwrap();
        step(&mut frame, &Insn::Dup, 3, &ctx(&pool)).unwrap();
        step(
            &mut frame,
            &Insn::Invoke {
                index: init,
                kind: InvokeKind::Special,
            },
            4,
            &ctx(&pool),
        )
        .unwrap();
        assert_eq!(frame.stack, vec![AbsType::object("demo/Widget")]);
    }

    #[test]
    fn merge_degrades_disagreeing_locals_but_rejects_disagreeing_stacks() {
        let mut a = FrameState {
            locals: vec![AbsType::Integer, AbsType::Null],
            stack: vec![AbsType::object("java/lang/String")],
        };
        let b = FrameState {
            locals: vec![AbsType::Float, AbsType::object("demo/Thing")],
            stack: vec![AbsType::object("java/lang/StringBuilder")],
        };
        let changed = merge_frames(&mut a, &b, 0).unwrap();
        assert!(changed);
        assert_eq!(a.locals[0], AbsType::Top);
        assert_eq!(a.locals[1], AbsType::object("demo/Thing"));
        assert_eq!(a.stack[0], AbsType::object(JAVA_LANG_OBJECT));

        let bad = FrameState {
            locals: vec![AbsType::Top, AbsType::Top],
            stack: vec![AbsType::Integer],
        };
        assert!(matches!(
            merge_frames(&mut a, &bad, 0),
            Err(CfgError::UnjoinableStack { .. })
        ));
    }

    #[test]
    fn merge_rejects_different_stack_heights() {
        let mut a = FrameState {
            locals: vec![],
            stack: vec![AbsType::Integer],
        };
        let b = FrameState {
            locals: vec![],
            stack: vec![],
        };
        assert!(matches!(
            merge_frames(&mut a, &b, 7),
            Err(CfgError::StackHeightMismatch { target: 7 })
        ));
    }
}
