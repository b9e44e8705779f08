use retnull::jvm::class_file::ClassFile;
use retnull::transform::{Config, Dispatcher, Outcome, TargetRegistry};

use clap::{Arg, ArgAction, Command};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum Error {
    Io(PathBuf, std::io::Error),
    NotAClassFile(PathBuf),
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("retnull")
        .version("0.1.0")
        .about("Rewrite class files so every declared method returns null")
        .arg(
            Arg::new("target")
                .long("target")
                .value_name("CLASS_NAME")
                .action(ArgAction::Append)
                .help("Class eligible for transformation, in dotted form (eg. `com.acme.Widget`); \
                       when omitted, every input class is a target"),
        )
        .arg(
            Arg::new("repair-frames")
                .long("repair-frames")
                .action(ArgAction::SetTrue)
                .help("Recompute stack map frames after the edit so strict verifiers accept the result"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Do not log each replaced method"),
        )
        .arg(
            Arg::new("dump-dir")
                .long("dump-dir")
                .value_name("DIR")
                .help("Also dump intermediate buffers (pre-repair and final) under this directory"),
        )
        .arg(
            Arg::new("out-dir")
                .long("out-dir")
                .value_name("DIR")
                .default_value("transformed")
                .help("Where transformed class files are written"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Input .class files")
                .required(true)
                .num_args(1..)
                .index(1),
        )
        .get_matches();

    let inputs: Vec<PathBuf> = matches
        .get_many::<String>("INPUT")
        .expect("INPUT is required")
        .map(PathBuf::from)
        .collect();
    let out_dir = PathBuf::from(matches.get_one::<String>("out-dir").expect("has default"));
    let dump_dir = matches.get_one::<String>("dump-dir").map(PathBuf::from);

    // Read everything up front: class names come out of the buffers themselves
    let mut classes: Vec<(String, Vec<u8>)> = vec![];
    for input in &inputs {
        let bytes = fs::read(input).map_err(|err| Error::Io(input.clone(), err))?;
        let slashed_name = ClassFile::parse(&bytes)
            .ok()
            .and_then(|class_file| class_file.class_name())
            .ok_or_else(|| Error::NotAClassFile(input.clone()))?;
        classes.push((slashed_name, bytes));
    }

    let registry = match matches.get_many::<String>("target") {
        Some(targets) => TargetRegistry::new(targets.cloned()),
        None => TargetRegistry::new(classes.iter().map(|(name, _)| name.replace('/', "."))),
    };

    let config = Config {
        repair_frames: matches.get_flag("repair-frames"),
        log_transformations: !matches.get_flag("quiet"),
        dump_artifacts: dump_dir.is_some(),
        artifact_base_dir: dump_dir.unwrap_or_else(|| out_dir.clone()),
    };
    let dispatcher = Dispatcher::new(config, registry);

    for (slashed_name, bytes) in &classes {
        // Each input file plays one load event against the dispatcher
        match dispatcher.transform(slashed_name, bytes) {
            Outcome::Transformed(transformed) => {
                let out_path = out_dir.join(format!("{}.class", slashed_name));
                write_class(&out_path, &transformed)?;
                log::info!("wrote {}", out_path.display());
            }
            Outcome::Unchanged => log::info!("skipping {} (not a target)", slashed_name),
            Outcome::Failed { .. } => {
                log::warn!("left {} untouched after a failed transformation", slashed_name)
            }
        }
    }

    Ok(())
}

fn write_class(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::Io(parent.to_path_buf(), err))?;
    }
    fs::write(path, bytes).map_err(|err| Error::Io(path.to_path_buf(), err))
}
