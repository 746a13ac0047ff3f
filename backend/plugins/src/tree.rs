//! Walking a typed configuration tree to find embedded plugin configs.
//!
//! A config struct lists its struct-typed fields through [`Visit`]; each
//! field type classifies itself through [`ConfigNode`]. The walk yields a flat
//! list of [`Slot`]s, one per plugin config, in declaration order.

use std::rc::Rc;
use std::sync::Arc;

use conflux_core::naming::{join_path, type_name_of};
use conflux_core::{ConfigError, Result};

use crate::config::ErasedConfig;

/// Static classification of a field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A plugin config held by value.
    Plugin,
    /// A pointer whose pointee is a plugin config.
    Pointer {
        pointer: String,
        pointee: &'static str,
    },
    Other,
}

/// A type that can appear as a field of a configuration tree.
///
/// Implement through [`config_node!`](crate::config_node) for plain structs
/// and [`plugin_config!`](crate::plugin_config) for plugin configs.
pub trait ConfigNode {
    fn shape() -> Shape
    where
        Self: Sized;

    fn as_plugin(&self) -> Option<&dyn ErasedConfig> {
        None
    }

    fn as_visit(&self) -> Option<&dyn Visit> {
        None
    }
}

/// A struct that exposes its struct-typed fields to a [`Visitor`].
///
/// ```ignore
/// impl Visit for AppConfig {
///     fn visit(&self, v: &mut Visitor) -> Result<()> {
///         v.field("kafka_producer", &self.kafka_producer)?;
///         v.field("server", &self.server)
///     }
/// }
/// ```
pub trait Visit: Sync {
    fn visit(&self, visitor: &mut Visitor) -> Result<()>;
}

impl Visit for () {
    fn visit(&self, _visitor: &mut Visitor) -> Result<()> {
        Ok(())
    }
}

/// A plugin config found during a walk.
#[derive(Debug, Clone)]
pub struct Slot {
    /// Dotted field path from the root, as passed to [`Visitor::field`].
    pub path: String,
    pub config: Box<dyn ErasedConfig>,
}

#[derive(Default)]
pub struct Visitor {
    prefix: String,
    slots: Vec<Slot>,
}

impl Visitor {
    /// Visit one field. Plugin configs are recorded and not descended into;
    /// other nodes recurse when they implement [`Visit`].
    pub fn field<F: ConfigNode>(&mut self, name: &str, value: &F) -> Result<()> {
        let path = join_path(&self.prefix, name);

        if let Shape::Pointer { pointer, pointee } = F::shape() {
            return Err(ConfigError::plugin(
                path.clone(),
                format!(
                    "config field '{path}' uses pointer type '{pointer}', use value type \
                     '{pointee}' instead; pointer plugin configs can cause unexpected shared state"
                ),
            ));
        }

        if let Some(config) = value.as_plugin() {
            self.slots.push(Slot {
                path,
                config: config.clone_boxed(),
            });
            return Ok(());
        }

        if let Some(nested) = value.as_visit() {
            let parent = std::mem::replace(&mut self.prefix, path);
            let result = nested.visit(self);
            self.prefix = parent;
            result?;
        }
        Ok(())
    }

    pub fn into_slots(self) -> Vec<Slot> {
        self.slots
    }
}

/// Collect every plugin config reachable from `root`.
pub fn collect_slots(root: &dyn Visit) -> Result<Vec<Slot>> {
    let mut visitor = Visitor::default();
    root.visit(&mut visitor)?;
    Ok(visitor.into_slots())
}

impl<T: ConfigNode> ConfigNode for Option<T> {
    fn shape() -> Shape {
        T::shape()
    }

    fn as_plugin(&self) -> Option<&dyn ErasedConfig> {
        self.as_ref().and_then(|v| v.as_plugin())
    }

    fn as_visit(&self) -> Option<&dyn Visit> {
        self.as_ref().and_then(|v| v.as_visit())
    }
}

macro_rules! pointer_node {
    ($($ptr:ident),+) => {$(
        impl<T: ConfigNode + 'static> ConfigNode for $ptr<T> {
            fn shape() -> Shape {
                match T::shape() {
                    Shape::Plugin => Shape::Pointer {
                        pointer: format!("{}<{}>", stringify!($ptr), type_name_of::<T>()),
                        pointee: type_name_of::<T>(),
                    },
                    other => other,
                }
            }

            fn as_visit(&self) -> Option<&dyn Visit> {
                (**self).as_visit()
            }
        }
    )+};
}

pointer_node!(Box, Arc, Rc);

/// Implement [`ConfigNode`] for structs that implement [`Visit`].
#[macro_export]
macro_rules! config_node {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::ConfigNode for $ty {
            fn shape() -> $crate::Shape {
                $crate::Shape::Other
            }

            fn as_visit(&self) -> Option<&dyn $crate::Visit> {
                Some(self)
            }
        }
    )+};
}

/// Implement [`PluginConfig`](crate::PluginConfig) and [`ConfigNode`] for a
/// config struct whose marker lives in a field named `base`.
#[macro_export]
macro_rules! plugin_config {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::PluginConfig for $ty {
            fn base(&self) -> &$crate::BaseConfig {
                &self.base
            }
        }

        impl $crate::ConfigNode for $ty {
            fn shape() -> $crate::Shape {
                $crate::Shape::Plugin
            }

            fn as_plugin(&self) -> Option<&dyn $crate::ErasedConfig> {
                Some(self)
            }
        }
    )+};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseConfig;
    use conflux_core::ErrorKind;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct QueueConfig {
        base: BaseConfig,
        topic: String,
    }
    crate::plugin_config!(QueueConfig);

    #[derive(Default)]
    struct Pipeline {
        source: QueueConfig,
        sink: Option<QueueConfig>,
    }

    impl Visit for Pipeline {
        fn visit(&self, v: &mut Visitor) -> Result<()> {
            v.field("source", &self.source)?;
            v.field("sink", &self.sink)
        }
    }
    crate::config_node!(Pipeline);

    #[derive(Default)]
    struct Root {
        ingest: QueueConfig,
        pipeline: Pipeline,
        boxed_pipeline: Option<Box<Pipeline>>,
    }

    impl Visit for Root {
        fn visit(&self, v: &mut Visitor) -> Result<()> {
            v.field("ingest", &self.ingest)?;
            v.field("pipeline", &self.pipeline)?;
            v.field("boxed_pipeline", &self.boxed_pipeline)
        }
    }

    struct PointerRoot {
        producer: Option<Box<QueueConfig>>,
    }

    impl Visit for PointerRoot {
        fn visit(&self, v: &mut Visitor) -> Result<()> {
            v.field("kafka_producer", &self.producer)
        }
    }

    #[test]
    fn collects_plugin_slots_depth_first() {
        let root = Root {
            pipeline: Pipeline {
                sink: Some(QueueConfig::default()),
                ..Default::default()
            },
            boxed_pipeline: Some(Box::default()),
            ..Default::default()
        };
        let paths: Vec<_> = collect_slots(&root)
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        assert_eq!(
            paths,
            vec![
                "ingest",
                "pipeline.source",
                "pipeline.sink",
                "boxed_pipeline.source"
            ]
        );
    }

    #[test]
    fn none_fields_are_skipped() {
        let paths: Vec<_> = collect_slots(&Root::default())
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        assert_eq!(paths, vec!["ingest", "pipeline.source"]);
    }

    #[test]
    fn pointer_plugin_config_is_rejected_even_when_absent() {
        let err = collect_slots(&PointerRoot { producer: None }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PluginFailure);
        assert!(err.message.contains("kafka_producer"));
        assert!(err.message.contains("pointer type 'Box<QueueConfig>'"));
        assert!(err.message.contains("value type 'QueueConfig'"));
    }
}
