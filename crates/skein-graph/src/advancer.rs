use std::any::Any;
use std::marker::PhantomData;

use skein_core::error::{Result, SkeinError};

use crate::context::RunContext;
use crate::runnable::{TypeInfo, Value};

type Predicate = Box<dyn Fn(&dyn Any, &RunContext) -> Result<bool> + Send + Sync>;
type Converter = Box<dyn Fn(Value, &RunContext) -> Result<Value> + Send + Sync>;

/// A predicate-guarded, optionally converting edge to `target`.
///
/// Without a configured predicate it always fires; without a converter it
/// passes the source output through unchanged.
pub(crate) struct Advancer {
    pub(crate) target: usize,
    pub(crate) label: Option<String>,
    /// Type this advancer hands to its target.
    pub(crate) delivers: TypeInfo,
    predicate: Predicate,
    converter: Converter,
}

impl Advancer {
    pub(crate) fn identity(target: usize, source_output: TypeInfo) -> Self {
        Self {
            target,
            label: None,
            delivers: source_output,
            predicate: Box::new(|_, _| Ok(true)),
            converter: Box::new(|value, _| Ok(value)),
        }
    }

    pub(crate) fn matches(&self, output: &dyn Any, context: &RunContext) -> Result<bool> {
        (self.predicate)(output, context)
    }

    pub(crate) fn convert(&self, output: Value, context: &RunContext) -> Result<Value> {
        (self.converter)(output, context)
    }
}

/// Fluent configuration of an advancer registered by `GraphBuilder::advance`.
///
/// `O` is the source node's output type and `N` the target's input type.
pub struct AdvancerConfig<'a, O, N> {
    advancer: &'a mut Advancer,
    _types: PhantomData<fn(O) -> N>,
}

impl<'a, O, N> AdvancerConfig<'a, O, N>
where
    O: Send + 'static,
    N: Send + 'static,
{
    pub(crate) fn new(advancer: &'a mut Advancer) -> Self {
        Self {
            advancer,
            _types: PhantomData,
        }
    }

    /// Fire only when `predicate` holds for the source output.
    ///
    /// Predicates should be pure; they are evaluated in declared order and the
    /// first match wins.
    pub fn when<P>(self, predicate: P) -> Self
    where
        P: Fn(&O, &RunContext) -> bool + Send + Sync + 'static,
    {
        self.advancer.predicate = Box::new(move |value, context| {
            value
                .downcast_ref::<O>()
                .map(|output| predicate(output, context))
                .ok_or(SkeinError::TypeMismatch {
                    expected: std::any::type_name::<O>(),
                })
        });
        self
    }

    /// Convert the source output into the target's input.
    pub fn convert<F>(self, converter: F) -> Self
    where
        F: Fn(O, &RunContext) -> N + Send + Sync + 'static,
    {
        self.try_convert(move |output, context| Ok(converter(output, context)))
    }

    /// Fallible conversion. An error aborts the traversal as a crash of the
    /// source node.
    pub fn try_convert<F>(self, converter: F) -> Self
    where
        F: Fn(O, &RunContext) -> Result<N> + Send + Sync + 'static,
    {
        self.advancer.converter = Box::new(move |value, context| {
            let output = value
                .downcast::<O>()
                .map_err(|_| SkeinError::TypeMismatch {
                    expected: std::any::type_name::<O>(),
                })?;
            Ok(Box::new(converter(*output, context)?) as Value)
        });
        self.advancer.delivers = TypeInfo::of::<N>();
        self
    }

    /// Name shown in events and logs.
    pub fn label(self, label: impl Into<String>) -> Self {
        self.advancer.label = Some(label.into());
        self
    }
}
