//! Operation registry.
//!
//! Populated once through a [`RegistryBuilder`] at startup, then frozen into
//! an immutable [`Registry`] that is shared read-only for the process
//! lifetime. No locking is needed after `build()`.
//!
//! Provides:
//! - Lookup by operation name, with "did you mean" suggestions on a miss
//! - Validation of request params against each descriptor's schema
//! - Capability listing for discovery

use std::collections::HashMap;

use serde_json::{json, Value};

use super::errors::BridgeError;
use super::operation::OperationDescriptor;
use super::types::{OperationKind, Params};

/// How many suggestions an unknown-operation failure carries.
const MAX_SUGGESTIONS: usize = 3;

// ─── RegistryBuilder ─────────────────────────────────────────────────────────

/// Append-only registry under construction.
pub struct RegistryBuilder<H: 'static> {
    entries: Vec<OperationDescriptor<H>>,
    index: HashMap<String, usize>,
}

impl<H: 'static> RegistryBuilder<H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a descriptor. A name collision fails with `DuplicateName` and
    /// leaves the builder exactly as it was.
    pub fn register(
        &mut self,
        descriptor: OperationDescriptor<H>,
    ) -> Result<&mut Self, BridgeError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(BridgeError::DuplicateName {
                name: descriptor.name,
            });
        }
        tracing::debug!(
            name = %descriptor.name,
            mode = ?descriptor.execution_mode(),
            resource = descriptor.kind.is_resource(),
            "registered operation"
        );
        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(descriptor);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the catalog.
    pub fn build(self) -> Registry<H> {
        Registry {
            entries: self.entries,
            index: self.index,
        }
    }
}

impl<H: 'static> Default for RegistryBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: 'static> std::fmt::Debug for RegistryBuilder<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("registered", &self.entries.len())
            .finish()
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Immutable catalog of tools and resources, in registration order.
pub struct Registry<H: 'static> {
    entries: Vec<OperationDescriptor<H>>,
    index: HashMap<String, usize>,
}

impl<H: 'static> Registry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder::new()
    }

    /// Look up a descriptor by name.
    pub fn lookup(&self, name: &str) -> Result<&OperationDescriptor<H>, BridgeError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| BridgeError::UnknownOperation {
                name: name.to_string(),
                suggestions: self.find_similar(name, MAX_SUGGESTIONS),
            })
    }

    /// All descriptors in registration order. Each call starts a fresh pass.
    pub fn list(&self) -> impl Iterator<Item = &OperationDescriptor<H>> + '_ {
        self.entries.iter()
    }

    pub fn tools(&self) -> impl Iterator<Item = &OperationDescriptor<H>> + '_ {
        self.list().filter(|d| !d.kind.is_resource())
    }

    pub fn resources(&self) -> impl Iterator<Item = &OperationDescriptor<H>> + '_ {
        self.list().filter(|d| d.kind.is_resource())
    }

    pub fn names(&self) -> Vec<&str> {
        self.list().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate `params` against the named operation's schema.
    ///
    /// Checks, in order: required fields are present and non-null, declared
    /// property types match, and `enum` constraints hold. Unknown properties
    /// are allowed.
    pub fn validate_params(&self, name: &str, params: &Params) -> Result<(), BridgeError> {
        let schema = &self.lookup(name)?.params_schema;

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if params.get(field).map_or(true, Value::is_null) {
                    return Err(BridgeError::invalid(format!(
                        "invalid parameters for '{name}': missing required field '{field}'"
                    )));
                }
            }
        }

        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };
        for (field, value) in params {
            let Some(prop) = properties.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if let Some(expected) = prop.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    return Err(BridgeError::invalid(format!(
                        "invalid parameters for '{name}': \
                         field '{field}' must be of type {expected}"
                    )));
                }
            }
            if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
                if !allowed.contains(value) {
                    return Err(BridgeError::invalid(format!(
                        "invalid parameters for '{name}': field '{field}' must be one of {}",
                        Value::Array(allowed.clone())
                    )));
                }
            }
        }

        Ok(())
    }

    /// Discovery document listing every tool and resource.
    pub fn capabilities(&self) -> Value {
        let tools: Vec<Value> = self
            .tools()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "mode": d.execution_mode(),
                    "inputSchema": d.params_schema,
                })
            })
            .collect();

        let resources: Vec<Value> = self
            .resources()
            .map(|d| {
                let uri = match &d.kind {
                    OperationKind::Resource { uri_template } => uri_template.as_str(),
                    OperationKind::Tool => "",
                };
                json!({
                    "name": d.name,
                    "description": d.description,
                    "mode": d.execution_mode(),
                    "uri": uri,
                    "inputSchema": d.params_schema,
                })
            })
            .collect();

        json!({ "tools": tools, "resources": resources })
    }

    /// Up to `max_results` registered names most similar to `name`, best first.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let mut scored: Vec<(&str, f64)> = self
            .list()
            .map(|d| (d.name.as_str(), similarity(name, &d.name)))
            .filter(|(_, score)| *score > 0.5)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(n, _)| n.to_string()).collect()
    }
}

impl<H: 'static> std::fmt::Debug for Registry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("operations", &self.names())
            .finish()
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein distance over bytes, single-row DP.
fn levenshtein(a: &str, b: &str) -> usize {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 1.0 for identical strings, 0.0 for nothing in common.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
