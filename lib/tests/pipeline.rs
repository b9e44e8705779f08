//! End-to-end tests driving real class file buffers through the whole pipeline
//!
//! The fixtures re-create the shapes of the classic greeter test class in assembled form: a
//! straight-line method, a two-armed branch returning through an intermediate local (the shape
//! whose stale frames break strict verification after a naive edit), a try/catch, and a
//! primitive-returning method that cannot be transformed at all.

use retnull::editor;
use retnull::jvm::class_file::{
    ClassFile, Code, Constant, ConstantPool, ExceptionHandler, StackMapFrame, StackMapTable,
    VerificationType, Version,
};
use retnull::jvm::{ClassAccessFlags, Deserialize, MethodAccessFlags, Serialize};
use retnull::repair;
use retnull::transform::{ClassLoadHook, Config, Dispatcher, Outcome, Stage, TargetRegistry};
use std::io::Cursor;

const ACONST_NULL: u8 = 0x01;
const ARETURN: u8 = 0xb0;
const NOP: u8 = 0x00;
const ATHROW: u8 = 0xbf;

fn make_method(
    pool: &mut ConstantPool,
    name: &str,
    descriptor: &str,
    code: Code,
) -> retnull::jvm::class_file::Method {
    let name_index = pool.ensure_utf8(name).unwrap();
    let descriptor_index = pool.ensure_utf8(descriptor).unwrap();
    let code_attribute = pool.make_attribute(code).unwrap();
    retnull::jvm::class_file::Method {
        access_flags: MethodAccessFlags::PUBLIC,
        name_index,
        descriptor_index,
        attributes: vec![code_attribute],
    }
}

fn make_class(
    name: &str,
    build_methods: impl FnOnce(&mut ConstantPool) -> Vec<retnull::jvm::class_file::Method>,
) -> Vec<u8> {
    let mut pool = ConstantPool::new();
    let this_class = pool.ensure_class(name).unwrap();
    let super_class = pool.ensure_class("java/lang/Object").unwrap();
    let methods = build_methods(&mut pool);
    ClassFile {
        version: Version::JAVA8,
        constants: pool,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class,
        interfaces: vec![],
        fields: vec![],
        methods,
        attributes: vec![],
    }
    .to_bytes()
    .unwrap()
}

/// `demo/Greeter` with `greetWorks1` (straight-line) and `greetFails` (if/else, each arm
/// returning through a local), both `(Ljava/lang/String;)Ljava/lang/String;`
fn greeter_class() -> Vec<u8> {
    make_class("demo/Greeter", |pool| {
        let hello_utf8 = pool.ensure_utf8("Hello").unwrap();
        let hello = pool.push(Constant::String(hello_utf8)).unwrap();
        let lazy_utf8 = pool.ensure_utf8("Lazy to greet today...").unwrap();
        let lazy = pool.push(Constant::String(lazy_utf8)).unwrap();

        let works1 = Code {
            max_stack: 1,
            max_locals: 2,
            code: vec![0x12, hello as u8, ARETURN], // ldc "Hello"; areturn
            exception_table: vec![],
            attributes: vec![],
        };

        //  0: aload_1
        //  1: ifnull 9
        //  4: ldc "Hello"
        //  6: astore_2
        //  7: aload_2
        //  8: areturn
        //  9: ldc "Lazy to greet today..."
        // 11: astore_2
        // 12: aload_2
        // 13: areturn
        let stack_map = pool
            .make_attribute(StackMapTable(vec![StackMapFrame::Same {
                offset_delta: 9,
                extended: false,
            }]))
            .unwrap();
        let fails = Code {
            max_stack: 1,
            max_locals: 3,
            code: vec![
                0x2b,
                0xc6,
                0x00,
                0x08,
                0x12,
                hello as u8,
                0x4d,
                0x2c,
                ARETURN,
                0x12,
                lazy as u8,
                0x4d,
                0x2c,
                ARETURN,
            ],
            exception_table: vec![],
            attributes: vec![stack_map],
        };

        vec![
            make_method(
                pool,
                "greetWorks1",
                "(Ljava/lang/String;)Ljava/lang/String;",
                works1,
            ),
            make_method(
                pool,
                "greetFails",
                "(Ljava/lang/String;)Ljava/lang/String;",
                fails,
            ),
        ]
    })
}

/// `demo/Catcher.wrap(String)`: returns its argument, with a catch-all-`Exception` handler that
/// returns null instead
fn catcher_class() -> Vec<u8> {
    make_class("demo/Catcher", |pool| {
        let exception = pool.ensure_class("java/lang/Exception").unwrap();
        let stack_map = pool
            .make_attribute(StackMapTable(vec![StackMapFrame::SameLocalsOneStack {
                offset_delta: 2,
                extended: false,
                stack: VerificationType::Object(exception),
            }]))
            .unwrap();
        // 0: aload_1; 1: areturn; handler at 2: astore_2; 3: aconst_null; 4: areturn
        let wrap = Code {
            max_stack: 1,
            max_locals: 3,
            code: vec![0x2b, ARETURN, 0x4d, ACONST_NULL, ARETURN],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: exception,
            }],
            attributes: vec![stack_map],
        };
        vec![make_method(
            pool,
            "wrap",
            "(Ljava/lang/String;)Ljava/lang/String;",
            wrap,
        )]
    })
}

/// `demo/Prim.count()`: returns an `int`, which has no null result
fn primitive_class() -> Vec<u8> {
    make_class("demo/Prim", |pool| {
        let count = Code {
            max_stack: 1,
            max_locals: 1,
            code: vec![0x03, 0xac], // iconst_0; ireturn
            exception_table: vec![],
            attributes: vec![],
        };
        vec![make_method(pool, "count", "()I", count)]
    })
}

fn dispatcher(repair_frames: bool, targets: &[&str]) -> Dispatcher {
    Dispatcher::new(
        Config {
            repair_frames,
            log_transformations: false,
            dump_artifacts: false,
            ..Config::default()
        },
        TargetRegistry::new(targets.iter().copied()),
    )
}

fn transformed(dispatcher: &Dispatcher, slashed_name: &str, bytes: &[u8]) -> Vec<u8> {
    match dispatcher.transform(slashed_name, bytes) {
        Outcome::Transformed(out) => out,
        other => panic!("expected a transformation, got {:?}", other),
    }
}

fn method_code(class_file: &ClassFile, name: &str) -> Code {
    for method in &class_file.methods {
        if class_file.constants.utf8(method.name_index).as_deref() == Some(name) {
            for attribute in &method.attributes {
                if class_file.constants.utf8(attribute.name_index).as_deref() == Some("Code") {
                    let mut reader = Cursor::new(attribute.info.as_slice());
                    return Code::deserialize(&mut reader).unwrap();
                }
            }
        }
    }
    panic!("no code for method {}", name);
}

fn stack_map_table(class_file: &ClassFile, code: &Code) -> Option<StackMapTable> {
    for attribute in &code.attributes {
        if class_file.constants.utf8(attribute.name_index).as_deref() == Some("StackMapTable") {
            let mut reader = Cursor::new(attribute.info.as_slice());
            return Some(StackMapTable::deserialize(&mut reader).unwrap());
        }
    }
    None
}

#[test]
fn parse_then_serialize_is_the_identity() {
    for fixture in [greeter_class(), catcher_class(), primitive_class()] {
        let class = editor::Class::parse(&fixture).unwrap();
        assert_eq!(class.serialize().unwrap(), fixture);
    }
}

#[test]
fn repairing_a_well_formed_buffer_changes_nothing() {
    for fixture in [greeter_class(), catcher_class(), primitive_class()] {
        assert_eq!(repair::rewrite_stack_maps(&fixture).unwrap(), fixture);
    }
}

#[test]
fn non_targets_pass_through_untouched() {
    let dispatcher = dispatcher(true, &["demo.Other"]);
    // The buffer is garbage: proof that no stage ever looked at it
    let garbage = b"definitely not a class file";
    assert!(matches!(
        dispatcher.transform("demo/Greeter", garbage),
        Outcome::Unchanged
    ));
    assert!(dispatcher.class_loaded("demo/Greeter", garbage).is_none());
}

#[test]
fn malformed_targets_fail_in_the_parse_stage() {
    let dispatcher = dispatcher(false, &["demo.Greeter"]);
    match dispatcher.transform("demo/Greeter", b"definitely not a class file") {
        Outcome::Failed { stage, .. } => assert_eq!(stage, Stage::Parse),
        other => panic!("expected a parse failure, got {:?}", other),
    }
    assert!(dispatcher
        .class_loaded("demo/Greeter", b"definitely not a class file")
        .is_none());
}

#[test]
fn mutation_prepends_the_null_return() {
    let dispatcher = dispatcher(false, &["demo.Greeter"]);
    let out = transformed(&dispatcher, "demo/Greeter", &greeter_class());
    let class_file = ClassFile::parse(&out).unwrap();

    let works1 = method_code(&class_file, "greetWorks1");
    assert_eq!(&works1.code[..4], &[ACONST_NULL, ARETURN, NOP, NOP]);
    // The original body survives, shifted
    assert_eq!(&works1.code[4..], &[0x12, works1.code[5], ARETURN]);

    let fails = method_code(&class_file, "greetFails");
    assert_eq!(&fails.code[..4], &[ACONST_NULL, ARETURN, NOP, NOP]);
    assert_eq!(fails.code.len(), 18);
}

#[test]
fn mutation_shifts_stale_frame_offsets_but_not_their_contents() {
    let dispatcher = dispatcher(false, &["demo.Greeter"]);
    let out = transformed(&dispatcher, "demo/Greeter", &greeter_class());
    let class_file = ClassFile::parse(&out).unwrap();
    let fails = method_code(&class_file, "greetFails");

    // The branch target moved from 9 to 13; the frame is still the stale `same_frame`
    let table = stack_map_table(&class_file, &fails).unwrap();
    assert_eq!(
        table.0,
        vec![StackMapFrame::Same {
            offset_delta: 13,
            extended: false
        }]
    );
}

#[test]
fn mutation_shifts_exception_handler_ranges() {
    let dispatcher = dispatcher(false, &["demo.Catcher"]);
    let out = transformed(&dispatcher, "demo/Catcher", &catcher_class());
    let class_file = ClassFile::parse(&out).unwrap();
    let wrap = method_code(&class_file, "wrap");
    assert_eq!(
        wrap.exception_table,
        vec![ExceptionHandler {
            start_pc: 4,
            end_pc: 6,
            handler_pc: 6,
            catch_type: wrap.exception_table[0].catch_type,
        }]
    );
}

#[test]
fn repair_rewrites_dead_code_and_emits_coherent_frames() {
    let dispatcher = dispatcher(true, &["demo.Greeter"]);
    let out = transformed(&dispatcher, "demo/Greeter", &greeter_class());
    let class_file = ClassFile::parse(&out).unwrap();
    let fails = method_code(&class_file, "greetFails");

    // Injected return, then the unreachable original body as nop runs closed by athrow
    let expected: Vec<u8> = vec![
        ACONST_NULL,
        ARETURN,
        NOP,
        NOP,
        NOP,
        NOP,
        NOP,
        ATHROW,
        NOP,
        NOP,
        NOP,
        NOP,
        ATHROW,
        NOP,
        NOP,
        NOP,
        NOP,
        ATHROW,
    ];
    assert_eq!(fails.code, expected);

    let table = stack_map_table(&class_file, &fails).unwrap();
    assert_eq!(table.0.len(), 3);

    // Offset 2: full frame, no locals, a lone Throwable on the stack
    match &table.0[0] {
        StackMapFrame::Full {
            offset_delta: 2,
            locals,
            stack,
        } => {
            assert!(locals.is_empty());
            match stack.as_slice() {
                [VerificationType::Object(class)] => assert_eq!(
                    class_file.constants.class_name(*class).as_deref(),
                    Some("java/lang/Throwable")
                ),
                other => panic!("unexpected stack {:?}", other),
            }
        }
        other => panic!("unexpected first frame {:?}", other),
    }

    // Offsets 8 and 13: same (empty) locals, still one Throwable
    assert!(matches!(
        table.0[1],
        StackMapFrame::SameLocalsOneStack {
            offset_delta: 5,
            extended: false,
            stack: VerificationType::Object(_)
        }
    ));
    assert!(matches!(
        table.0[2],
        StackMapFrame::SameLocalsOneStack {
            offset_delta: 4,
            extended: false,
            stack: VerificationType::Object(_)
        }
    ));
}

#[test]
fn repair_handles_exception_handlers_over_dead_code() {
    let dispatcher = dispatcher(true, &["demo.Catcher"]);
    let out = transformed(&dispatcher, "demo/Catcher", &catcher_class());
    let class_file = ClassFile::parse(&out).unwrap();
    let wrap = method_code(&class_file, "wrap");

    // Everything after the injected return is dead, the handler included
    assert_eq!(
        wrap.code,
        vec![
            ACONST_NULL,
            ARETURN,
            NOP,
            NOP,
            NOP,
            ATHROW,
            NOP,
            NOP,
            ATHROW
        ]
    );
    let table = stack_map_table(&class_file, &wrap).unwrap();
    assert_eq!(table.0.len(), 2);
    assert!(matches!(table.0[0], StackMapFrame::Full { offset_delta: 2, .. }));
    assert!(matches!(
        table.0[1],
        StackMapFrame::SameLocalsOneStack {
            offset_delta: 3,
            ..
        }
    ));
}

#[test]
fn repair_is_idempotent() {
    let mut class = editor::Class::parse(&greeter_class()).unwrap();
    editor::insert_null_return(&mut class).unwrap();
    let mutated = class.serialize().unwrap();

    let once = repair::rewrite_stack_maps(&mutated).unwrap();
    let twice = repair::rewrite_stack_maps(&once).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn repair_only_appends_to_the_constant_pool() {
    let fixture = greeter_class();
    let input = ClassFile::parse(&fixture).unwrap();

    let mut class = editor::Class::parse(&fixture).unwrap();
    editor::insert_null_return(&mut class).unwrap();
    let repaired = repair::rewrite_stack_maps(&class.serialize().unwrap()).unwrap();
    let output = ClassFile::parse(&repaired).unwrap();

    assert!(output.constants.slot_count() >= input.constants.slot_count());
    for (index, constant) in input.constants.iter() {
        let mut original = vec![];
        constant.serialize(&mut original).unwrap();
        let mut kept = vec![];
        output
            .constants
            .get(index)
            .expect("pre-existing constant vanished")
            .serialize(&mut kept)
            .unwrap();
        assert_eq!(original, kept, "constant {} changed", index);
    }
}

#[test]
fn primitive_results_fail_the_whole_class_in_the_mutate_stage() {
    let dispatcher = dispatcher(false, &["demo.Prim"]);
    match dispatcher.transform("demo/Prim", &primitive_class()) {
        Outcome::Failed { stage, .. } => assert_eq!(stage, Stage::Mutate),
        other => panic!("expected a mutation failure, got {:?}", other),
    }
    assert!(dispatcher
        .class_loaded("demo/Prim", &primitive_class())
        .is_none());
}

#[test]
fn double_mutation_injects_dead_code_without_breaking_the_pipeline() {
    let mut class = editor::Class::parse(&greeter_class()).unwrap();
    editor::insert_null_return(&mut class).unwrap();
    editor::insert_null_return(&mut class).unwrap();
    let mutated = class.serialize().unwrap();

    let class_file = ClassFile::parse(&mutated).unwrap();
    let works1 = method_code(&class_file, "greetWorks1");
    assert_eq!(
        &works1.code[..8],
        &[ACONST_NULL, ARETURN, NOP, NOP, ACONST_NULL, ARETURN, NOP, NOP]
    );

    // The second injection is unreachable, but repair still resolves the method
    repair::rewrite_stack_maps(&mutated).unwrap();
}

#[test]
fn transformed_class_is_a_target_for_retransformation() {
    // A second load event over already-transformed bytes parses the delivered buffer, never a
    // cached model, so the passes compose
    let dispatcher = dispatcher(true, &["demo.Greeter"]);
    let first = transformed(&dispatcher, "demo/Greeter", &greeter_class());
    let second = transformed(&dispatcher, "demo/Greeter", &first);
    let class_file = ClassFile::parse(&second).unwrap();
    let works1 = method_code(&class_file, "greetWorks1");
    assert_eq!(&works1.code[..4], &[ACONST_NULL, ARETURN, NOP, NOP]);
}

#[test]
fn artifacts_are_dumped_per_stage() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(
        Config {
            repair_frames: true,
            log_transformations: false,
            dump_artifacts: true,
            artifact_base_dir: dir.path().to_path_buf(),
        },
        TargetRegistry::new(["demo.Greeter"]),
    );

    let out = transformed(&dispatcher, "demo/Greeter", &greeter_class());

    let unrepaired = std::fs::read(dir.path().join("demo/Greeter.unrepaired.class")).unwrap();
    let final_dump = std::fs::read(dir.path().join("demo/Greeter.class")).unwrap();
    assert_eq!(final_dump, out);
    assert_ne!(unrepaired, final_dump);
    // The pre-repair artifact still carries the stale frame data
    let class_file = ClassFile::parse(&unrepaired).unwrap();
    let fails = method_code(&class_file, "greetFails");
    let table = stack_map_table(&class_file, &fails).unwrap();
    assert_eq!(
        table.0,
        vec![StackMapFrame::Same {
            offset_delta: 13,
            extended: false
        }]
    );
}

#[test]
fn load_hook_returns_replacement_bytes_only_for_targets() {
    let dispatcher = dispatcher(true, &["demo.Greeter"]);
    let fixture = greeter_class();
    assert!(dispatcher.class_loaded("demo/Greeter", &fixture).is_some());
    assert!(dispatcher.class_loaded("demo/Gadget", &fixture).is_none());
}
