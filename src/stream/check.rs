// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Dependency checking
//!
//! Static validation of a stream tree against a root scope. A stage's inputs
//! may be satisfied by the scope or by outputs declared by any of its
//! ancestors, since those are published into the record before the stage runs.
//! Every violation is collected.

use crate::errors::TreeflowError;
use crate::registry::{DependencyKey, Scope};

use super::{Stream, StreamNode};

/// Dependency checker for stream trees
pub struct DependencyChecker;

impl DependencyChecker {
    /// Validate every stage, returning all missing-dependency and descriptor
    /// errors (empty when the tree is runnable)
    pub fn check(stream: &Stream, scope: &Scope) -> Vec<TreeflowError> {
        let mut errors = Vec::new();
        let mut provided = Vec::new();
        check_node(stream.root(), scope, &mut provided, &mut errors);
        errors
    }
}

fn check_node(
    node: &StreamNode,
    scope: &Scope,
    provided: &mut Vec<DependencyKey>,
    errors: &mut Vec<TreeflowError>,
) {
    let descriptor = node.stage().descriptor();
    let before = provided.len();

    match descriptor.validate() {
        Err(reason) => errors.push(TreeflowError::InvalidDescriptor {
            processor: node.name().to_string(),
            reason,
        }),
        Ok(()) => {
            for dep in descriptor.inputs.iter().filter(|d| !d.optional) {
                if !scope.contains(&dep.key) && !provided.contains(&dep.key) {
                    errors.push(TreeflowError::MissingDependency {
                        stage: node.name().to_string(),
                        field: dep.field.clone(),
                        type_name: dep.key.ty.name().to_string(),
                        key: dep.key.name.clone(),
                    });
                }
            }
            provided.extend(descriptor.outputs.iter().cloned());
        }
    }

    for child in node.children() {
        check_node(child, scope, provided, errors);
    }

    provided.truncate(before);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Dependency, Inputs, Processor, ProcessorDescriptor};
    use crate::registry::Record;
    use crate::stream::{Stage, StreamConfig};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct Needs {
        deps: Vec<Dependency>,
        outputs: Vec<DependencyKey>,
    }

    #[async_trait]
    impl Processor for Needs {
        fn descriptor(&self) -> ProcessorDescriptor {
            ProcessorDescriptor {
                inputs: self.deps.clone(),
                outputs: self.outputs.clone(),
            }
        }

        async fn process(&self, _inputs: Inputs) -> anyhow::Result<Option<Record>> {
            Ok(None)
        }
    }

    fn stream_of(layout: &StreamConfig, procs: Vec<(&str, Needs)>) -> Stream {
        let processors: HashMap<String, Arc<dyn Processor>> = procs
            .into_iter()
            .map(|(name, p)| (name.to_string(), Arc::new(p) as Arc<dyn Processor>))
            .collect();
        Stream::new(layout, &processors).unwrap()
    }

    #[test]
    fn test_missing_provider_reported_until_added() {
        let stream = stream_of(
            &StreamConfig::new("root"),
            vec![(
                "root",
                Needs {
                    deps: vec![Dependency::of::<String>("dsn")],
                    outputs: vec![],
                },
            )],
        );

        let errors = DependencyChecker::check(&stream, &Scope::root());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_missing_dependency());

        // the default (empty) name is a key like any other
        let mut scope = Scope::root();
        scope.set("", String::from("postgres://"));
        assert!(DependencyChecker::check(&stream, &scope).is_empty());
    }

    #[test]
    fn test_collects_every_violation() {
        let layout = StreamConfig::new("root").with_child(StreamConfig::new("leaf"));
        let stream = stream_of(
            &layout,
            vec![
                (
                    "root",
                    Needs {
                        deps: vec![Dependency::of::<u8>("a"), Dependency::of::<u16>("b")],
                        outputs: vec![],
                    },
                ),
                (
                    "leaf",
                    Needs {
                        deps: vec![Dependency::of::<u32>("c").named("named")],
                        outputs: vec![],
                    },
                ),
            ],
        );

        let errors = DependencyChecker::check(&stream, &Scope::root());
        assert_eq!(errors.len(), 3);
        assert!(errors[2].to_string().contains("named"));
    }

    #[test]
    fn test_optional_inputs_are_not_required() {
        let stream = stream_of(
            &StreamConfig::new("root"),
            vec![(
                "root",
                Needs {
                    deps: vec![Dependency::of::<u8>("a").optional()],
                    outputs: vec![],
                },
            )],
        );

        assert!(DependencyChecker::check(&stream, &Scope::root()).is_empty());
    }

    #[test]
    fn test_ancestor_outputs_satisfy_descendants_only() {
        let layout = StreamConfig::new("root")
            .with_child(StreamConfig::new("producer").with_child(StreamConfig::new("consumer")))
            .with_child(StreamConfig::new("sibling"));
        let needs_seq = || Needs {
            deps: vec![Dependency::of::<u64>("seq").named("seq")],
            outputs: vec![],
        };
        let stream = stream_of(
            &layout,
            vec![
                ("root", Needs { deps: vec![], outputs: vec![] }),
                (
                    "producer",
                    Needs {
                        deps: vec![],
                        outputs: vec![DependencyKey::of::<u64>("seq")],
                    },
                ),
                ("consumer", needs_seq()),
                ("sibling", needs_seq()),
            ],
        );

        let errors = DependencyChecker::check(&stream, &Scope::root());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("sibling"));
    }

    #[test]
    fn test_pass_through_stages_have_no_requirements() {
        let mut stream = Stream::unbound(&StreamConfig::new("root")).unwrap();
        stream
            .append_by_parent_name("root", crate::stream::StreamNode::new(Stage::pass_through("x")))
            .unwrap();

        assert!(DependencyChecker::check(&stream, &Scope::root()).is_empty());
    }
}
