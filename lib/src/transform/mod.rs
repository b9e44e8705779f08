//! Transformation dispatch
//!
//! The [`Dispatcher`] is what a host's class-load hook calls: it filters load events through the
//! [`TargetRegistry`], runs eligible buffers through parse, mutate, serialize, optional repair
//! and dump, and never lets a failure escape as anything other than "use the original bytes". The
//! configuration is an explicit value handed in at construction, so differently configured
//! dispatchers can run side by side (and concurrently: the dispatcher holds no per-invocation
//! state).

mod artifacts;
mod errors;
mod registry;

pub use artifacts::*;
pub use errors::*;
pub use registry::*;

use crate::editor;
use crate::repair;
use std::path::PathBuf;

/// Pipeline configuration, fixed at dispatcher construction
#[derive(Debug, Clone)]
pub struct Config {
    /// Run the stack map repair engine over the mutated buffer (stage two of the pipeline).
    /// Without it the output keeps whatever stale frames the structural edit left behind, which
    /// a strict verifier may reject: a documented, intentional failure mode for comparing the
    /// two pipelines.
    pub repair_frames: bool,

    /// Log one line per replaced method result
    pub log_transformations: bool,

    /// Persist final (and pre-repair) buffers through the [`ArtifactWriter`]
    pub dump_artifacts: bool,

    /// Where dumped artifacts land
    pub artifact_base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            repair_frames: false,
            log_transformations: true,
            dump_artifacts: false,
            artifact_base_dir: PathBuf::from("transformed"),
        }
    }
}

/// Result of dispatching one load event
#[derive(Debug)]
pub enum Outcome {
    /// The class was a target and every stage succeeded
    Transformed(Vec<u8>),

    /// The class is not a target; the host must behave as if nothing intercepted the event
    Unchanged,

    /// A stage failed; the host keeps the original buffer
    Failed { stage: Stage, error: Error },
}

/// The capability a host hands its load/redefinition hook
///
/// Returning `None` must be indistinguishable from never having intercepted the event. This is
/// the dependency-inverted seam: hosts depend on the trait, tests can wrap or stub it, and the
/// [`Dispatcher`] is just one implementation.
pub trait ClassLoadHook {
    /// Called with the class name in internal slashed form and the class file buffer; returns
    /// the replacement buffer, if any
    fn class_loaded(&self, slashed_name: &str, bytes: &[u8]) -> Option<Vec<u8>>;
}

/// Orchestrates the transformation pipeline for one process
#[derive(Debug)]
pub struct Dispatcher {
    config: Config,
    registry: TargetRegistry,
    artifacts: ArtifactWriter,
}

impl Dispatcher {
    pub fn new(config: Config, registry: TargetRegistry) -> Dispatcher {
        let artifacts = ArtifactWriter::new(&config.artifact_base_dir);
        Dispatcher {
            config,
            registry,
            artifacts,
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Run one load/redefinition event through the pipeline
    ///
    /// `slashed_name` is the name as hosts deliver it (`com/acme/Widget`); registry membership
    /// is checked against the canonical dotted form. The buffer is parsed exactly as handed in,
    /// so a redefinition of an already-transformed class composes instead of resetting.
    pub fn transform(&self, slashed_name: &str, bytes: &[u8]) -> Outcome {
        let canonical_name = slashed_name.replace('/', ".");
        if !self.registry.is_target(&canonical_name) {
            return Outcome::Unchanged;
        }
        if self.config.log_transformations {
            log::info!("starting transformation for class {}", canonical_name);
        }

        match self.run_pipeline(slashed_name, bytes) {
            Ok(transformed) => Outcome::Transformed(transformed),
            Err(error) => {
                let stage = error.stage();
                log::error!(
                    "cannot transform class {} (failed during {:?}): {:?}",
                    canonical_name,
                    stage,
                    error
                );
                Outcome::Failed { stage, error }
            }
        }
    }

    fn run_pipeline(&self, slashed_name: &str, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let mut class = editor::Class::parse(bytes)?;

        if self.config.log_transformations {
            for method in &class.methods {
                if !method.is_initializer() && method.body().is_some() {
                    log::info!("replacing result of method {}", method.long_name());
                }
            }
        }
        editor::insert_null_return(&mut class)?;

        let mut transformed = class.serialize()?;

        if self.config.repair_frames {
            if self.config.dump_artifacts {
                self.artifacts
                    .write(slashed_name, Some("unrepaired"), &transformed);
            }
            transformed = repair::rewrite_stack_maps(&transformed)?;
        }

        if self.config.dump_artifacts {
            self.artifacts.write(slashed_name, None, &transformed);
        }

        Ok(transformed)
    }
}

impl ClassLoadHook for Dispatcher {
    fn class_loaded(&self, slashed_name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        match self.transform(slashed_name, bytes) {
            Outcome::Transformed(transformed) => Some(transformed),
            Outcome::Unchanged | Outcome::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod dispatcher_tests {
    use super::*;

    /// Hosts dispatch load events from multiple loader threads at once
    #[test]
    fn dispatcher_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Dispatcher>();
    }

    #[test]
    fn differently_configured_dispatchers_are_independent() {
        let strict = Dispatcher::new(
            Config {
                repair_frames: true,
                ..Config::default()
            },
            TargetRegistry::new(["demo.Widget"]),
        );
        let lax = Dispatcher::new(Config::default(), TargetRegistry::new(["demo.Gadget"]));

        assert!(matches!(
            strict.transform("demo/Gadget", &[]),
            Outcome::Unchanged
        ));
        assert!(matches!(lax.transform("demo/Widget", &[]), Outcome::Unchanged));
    }
}
