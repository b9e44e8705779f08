use std::rc::Rc;

/// Abstract verification type tracked by the dataflow pass
///
/// Unlike [`crate::jvm::class_file::VerificationType`], object types are tracked by *name*
/// rather than by constant pool index: the pass may conjure types with no pool entry yet (array
/// element types, the join of two unrelated classes), and only the types that actually end up in
/// an emitted frame should cause pool appends. Names are interned in `Rc` because frames get
/// cloned at every merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsType {
    /// Unusable slot: never-assigned local, killed local, or the second slot of a two-slot value
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,

    /// `this` inside a constructor before `<init>` has been called
    UninitializedThis,

    /// Object or array type, by internal name (`java/lang/String`, `[I`, ...)
    Object(Rc<str>),

    /// Result of a `new` at the given code offset whose `<init>` has not run yet
    Uninitialized { offset: u16, class: Rc<str> },
}

pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";
pub const JAVA_LANG_THROWABLE: &str = "java/lang/Throwable";

impl AbsType {
    pub fn object(name: &str) -> AbsType {
        AbsType::Object(Rc::from(name))
    }

    /// Does the value take two stack/local slots?
    pub fn is_wide(&self) -> bool {
        matches!(self, AbsType::Long | AbsType::Double)
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            AbsType::Null
                | AbsType::Object(_)
                | AbsType::Uninitialized { .. }
                | AbsType::UninitializedThis
        )
    }
}

/// Least common ancestor of two types in the verification type lattice, or `None` when the
/// lattice has no useful join for them
///
/// Two distinct object types always join (this engine carries no class hierarchy, so they join
/// all the way up to `java/lang/Object`: a valid common supertype, if not the least one).
/// Everything else only joins with itself. Callers decide what `None` means: fatal on the
/// operand stack, a degraded `Top` slot in the locals.
pub fn join(a: &AbsType, b: &AbsType) -> Option<AbsType> {
    if a == b {
        return Some(a.clone());
    }
    match (a, b) {
        (AbsType::Null, AbsType::Object(name)) | (AbsType::Object(name), AbsType::Null) => {
            Some(AbsType::Object(name.clone()))
        }
        (AbsType::Object(_), AbsType::Object(_)) => Some(AbsType::object(JAVA_LANG_OBJECT)),
        _ => None,
    }
}

#[cfg(test)]
mod join_tests {
    use super::*;

    #[test]
    fn null_joins_up_to_any_object() {
        let string = AbsType::object("java/lang/String");
        assert_eq!(join(&AbsType::Null, &string), Some(string.clone()));
        assert_eq!(join(&string, &AbsType::Null), Some(string));
    }

    #[test]
    fn distinct_objects_join_to_object() {
        assert_eq!(
            join(
                &AbsType::object("java/lang/String"),
                &AbsType::object("java/lang/StringBuilder")
            ),
            Some(AbsType::object(JAVA_LANG_OBJECT))
        );
    }

    #[test]
    fn primitives_only_join_with_themselves() {
        assert_eq!(join(&AbsType::Integer, &AbsType::Integer), Some(AbsType::Integer));
        assert_eq!(join(&AbsType::Integer, &AbsType::Float), None);
        assert_eq!(join(&AbsType::Long, &AbsType::Double), None);
        assert_eq!(join(&AbsType::Integer, &AbsType::Null), None);
    }

    #[test]
    fn uninitialized_values_from_different_sites_do_not_join() {
        let a = AbsType::Uninitialized {
            offset: 4,
            class: Rc::from("demo/A"),
        };
        let b = AbsType::Uninitialized {
            offset: 9,
            class: Rc::from("demo/A"),
        };
        assert_eq!(join(&a, &a.clone()), Some(a.clone()));
        assert_eq!(join(&a, &b), None);
    }
}
