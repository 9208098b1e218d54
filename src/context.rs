use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::runtime::TraceContext;
use crate::tensor::{DType, TensorValue};

/// Named, typed handle into a bindings map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    name: String,
    dtype: DType,
    trainable: bool,
}

impl Placeholder {
    pub fn new(name: impl Into<String>, dtype: DType, trainable: bool) -> Self {
        Self {
            name: name.into(),
            dtype,
            trainable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }
}

#[derive(Debug)]
struct BindingSlot {
    placeholder: Arc<Placeholder>,
    tensor: Option<TensorValue>,
}

/// Mapping from placeholder name to tensor slot.
///
/// A slot exists once its placeholder is allocated; the tensor arrives later,
/// either from the caller or from an upstream node's output propagation.
#[derive(Debug, Default)]
pub struct PlaceholderBindings {
    slots: HashMap<String, BindingSlot>,
}

impl PlaceholderBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty slot for `placeholder`. Re-allocating an existing
    /// name keeps the slot already present.
    pub fn allocate(&mut self, placeholder: Arc<Placeholder>) {
        self.slots
            .entry(placeholder.name().to_string())
            .or_insert(BindingSlot {
                placeholder,
                tensor: None,
            });
    }

    /// Allocate a slot and bind `tensor` to it in one step.
    pub fn insert(&mut self, placeholder: Arc<Placeholder>, tensor: impl Into<TensorValue>) {
        self.slots.insert(
            placeholder.name().to_string(),
            BindingSlot {
                placeholder,
                tensor: Some(tensor.into()),
            },
        );
    }

    /// Move `tensor` into the slot named `name`. The slot must already exist.
    pub fn set(&mut self, name: &str, tensor: impl Into<TensorValue>) -> Result<()> {
        match self.slots.get_mut(name) {
            Some(slot) => {
                slot.tensor = Some(tensor.into());
                Ok(())
            }
            None => Err(anyhow!("no placeholder slot for {}", name)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TensorValue> {
        self.slots.get(name).and_then(|slot| slot.tensor.as_ref())
    }

    pub fn placeholder(&self, name: &str) -> Option<&Arc<Placeholder>> {
        self.slots.get(name).map(|slot| &slot.placeholder)
    }

    /// Whether a slot (bound or not) exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn take(&mut self, name: &str) -> Option<TensorValue> {
        self.slots.get_mut(name).and_then(|slot| slot.tensor.take())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Consume the bindings, yielding every bound (placeholder, tensor) pair.
    /// Unbound slots are discarded.
    pub fn into_pairs(self) -> Vec<(Arc<Placeholder>, TensorValue)> {
        self.slots
            .into_values()
            .filter_map(|slot| slot.tensor.map(|tensor| (slot.placeholder, tensor)))
            .collect()
    }
}

/// Container of placeholder bindings and optional trace data, carrying
/// tensors across node boundaries.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    bindings: PlaceholderBindings,
    trace: Option<TraceContext>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bindings(bindings: PlaceholderBindings) -> Self {
        Self {
            bindings,
            trace: None,
        }
    }

    pub fn bindings(&self) -> &PlaceholderBindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut PlaceholderBindings {
        &mut self.bindings
    }

    pub fn set_trace(&mut self, trace: TraceContext) {
        self.trace = Some(trace);
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    pub fn trace_mut(&mut self) -> Option<&mut TraceContext> {
        self.trace.as_mut()
    }

    pub fn take_trace(&mut self) -> Option<TraceContext> {
        self.trace.take()
    }
}
