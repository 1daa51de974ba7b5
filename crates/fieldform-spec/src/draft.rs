use std::collections::BTreeMap;

use serde_json::Value;

use crate::formula::apply_computed;
use crate::spec::form::FormSchema;
use crate::visibility::{VisibilityMap, resolve_visibility};

/// Current values of one in-progress response, keyed by field name.
pub type ValueMap = BTreeMap<String, Value>;

/// Mutable, in-memory state of one not-yet-submitted response. Evaluators
/// are pure functions over a snapshot of the value map; the draft is the
/// single owner that feeds them and stores the results.
#[derive(Debug, Clone, Default)]
pub struct ResponseDraft {
    values: ValueMap,
    visible: VisibilityMap,
    attachments: BTreeMap<String, String>,
}

impl ResponseDraft {
    pub fn new(schema: &FormSchema) -> Self {
        let values = apply_computed(schema, &ValueMap::new());
        let visible = resolve_visibility(schema, &values);
        Self {
            values,
            visible,
            attachments: BTreeMap::new(),
        }
    }

    /// Applies one user edit, then rederives computed fields and the
    /// visible set in a single pass. Edits to read-only (calculated)
    /// fields are ignored.
    pub fn set_value(&mut self, schema: &FormSchema, name: &str, value: Value) {
        let Some(field) = schema.field(name) else {
            return;
        };
        if field.is_read_only() {
            return;
        }
        self.values.insert(name.to_string(), value);
        self.refresh(schema);
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    pub fn is_visible(&self, name: &str) -> bool {
        self.visible.get(name).copied().unwrap_or(true)
    }

    pub fn visible(&self) -> &VisibilityMap {
        &self.visible
    }

    /// Records the storage handle returned by a finished attachment upload.
    pub fn set_attachment(&mut self, field: impl Into<String>, handle: impl Into<String>) {
        self.attachments.insert(field.into(), handle.into());
    }

    pub fn remove_attachment(&mut self, field: &str) {
        self.attachments.remove(field);
    }

    pub fn attachments(&self) -> &BTreeMap<String, String> {
        &self.attachments
    }

    fn refresh(&mut self, schema: &FormSchema) {
        self.values = apply_computed(schema, &self.values);
        self.visible = resolve_visibility(schema, &self.values);
    }
}
