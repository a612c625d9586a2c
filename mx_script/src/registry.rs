use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::value::{EvalError, Type, Value};

/// Native implementation of a registered function.
pub type NativeFn<C> = Arc<dyn Fn(&mut C, &[Value]) -> Result<Value, EvalError> + Send + Sync>;
/// Reads a registered value out of the execution context.
pub type Getter<C> = Arc<dyn Fn(&C) -> Value + Send + Sync>;
/// Writes a registered value into the execution context.
pub type Setter<C> = Arc<dyn Fn(&mut C, Value) -> Result<(), EvalError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Function,
    Value,
}

/// Parameter and result types of an entry. Values have no parameters and
/// "return" their own type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub returns: Type,
}

impl Signature {
    pub fn new(params: &[Type], returns: Type) -> Self {
        Self {
            params: params.to_vec(),
            returns,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.returns)
    }
}

pub enum Binding<C> {
    Function(NativeFn<C>),
    Value {
        get: Getter<C>,
        set: Option<Setter<C>>,
    },
}

impl<C> Clone for Binding<C> {
    fn clone(&self) -> Self {
        match self {
            Binding::Function(f) => Binding::Function(f.clone()),
            Binding::Value { get, set } => Binding::Value {
                get: get.clone(),
                set: set.clone(),
            },
        }
    }
}

/// A named, typed, documented callable or value visible to scripts.
pub struct RegistryEntry<C> {
    name: String,
    doc: String,
    signature: Signature,
    binding: Binding<C>,
}

impl<C> RegistryEntry<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn binding(&self) -> &Binding<C> {
        &self.binding
    }

    pub fn kind(&self) -> EntryKind {
        match self.binding {
            Binding::Function(_) => EntryKind::Function,
            Binding::Value { .. } => EntryKind::Value,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.binding, Binding::Value { set: Some(_), .. })
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            name: self.name.clone(),
            kind: self.kind(),
            params: self.signature.params.clone(),
            returns: self.signature.returns,
            writable: self.is_writable(),
            doc: self.doc.clone(),
        }
    }
}

impl<C> fmt::Debug for RegistryEntry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("signature", &self.signature)
            .finish()
    }
}

/// Read-only description of an entry for introspection tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub name: String,
    pub kind: EntryKind,
    pub params: Vec<Type>,
    pub returns: Type,
    pub writable: bool,
    pub doc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("identifier {name:?} is already registered (as {existing:?})")]
    DuplicateName { name: String, existing: String },
    #[error("identifier {name:?} is not defined")]
    NotFound { name: String },
}

/// Identifiers exposed to scripts, keyed case-insensitively.
///
/// Filled once during startup; afterwards it is only read, from the worker
/// and from control-server threads alike.
pub struct Registry<C> {
    entries: HashMap<String, Arc<RegistryEntry<C>>>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        binding: Binding<C>,
        signature: Signature,
        doc: &str,
    ) -> Result<(), RegistryError> {
        let key = fold_name(name);
        if let Some(existing) = self.entries.get(&key) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
                existing: existing.name.clone(),
            });
        }
        self.entries.insert(
            key,
            Arc::new(RegistryEntry {
                name: name.to_string(),
                doc: doc.to_string(),
                signature,
                binding,
            }),
        );
        Ok(())
    }

    pub fn register_fn<F>(
        &mut self,
        name: &str,
        params: &[Type],
        returns: Type,
        doc: &str,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&mut C, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.register(
            name,
            Binding::Function(Arc::new(f)),
            Signature::new(params, returns),
            doc,
        )
    }

    /// Registers a read-only value, e.g. the simulation time.
    pub fn register_value<G>(
        &mut self,
        name: &str,
        ty: Type,
        doc: &str,
        get: G,
    ) -> Result<(), RegistryError>
    where
        G: Fn(&C) -> Value + Send + Sync + 'static,
    {
        self.register(
            name,
            Binding::Value {
                get: Arc::new(get),
                set: None,
            },
            Signature::new(&[], ty),
            doc,
        )
    }

    /// Registers a value scripts may assign with `name = expr`.
    pub fn register_var<G, S>(
        &mut self,
        name: &str,
        ty: Type,
        doc: &str,
        get: G,
        set: S,
    ) -> Result<(), RegistryError>
    where
        G: Fn(&C) -> Value + Send + Sync + 'static,
        S: Fn(&mut C, Value) -> Result<(), EvalError> + Send + Sync + 'static,
    {
        self.register(
            name,
            Binding::Value {
                get: Arc::new(get),
                set: Some(Arc::new(set)),
            },
            Signature::new(&[], ty),
            doc,
        )
    }

    pub fn register_const(
        &mut self,
        name: &str,
        value: Value,
        doc: &str,
    ) -> Result<(), RegistryError>
    where
        C: 'static,
    {
        let ty = value.ty();
        self.register_value(name, ty, doc, move |_| value.clone())
    }

    pub fn resolve(&self, name: &str) -> Result<&Arc<RegistryEntry<C>>, RegistryError> {
        self.entries
            .get(&fold_name(name))
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&fold_name(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every entry, sorted by case-insensitive name.
    pub fn entries(&self) -> Vec<EntrySummary> {
        let mut keyed: Vec<(&String, &Arc<RegistryEntry<C>>)> = self.entries.iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        keyed.into_iter().map(|(_, entry)| entry.summary()).collect()
    }
}

fn fold_name(name: &str) -> String {
    name.to_lowercase()
}
