use std::collections::HashMap;

use super::PropertyOverride;
use crate::asset::FieldValue;

/// Fields of `instance` whose value differs from the same-named field of `base`.
///
/// Only inherited, user-editable (edit/config/disable-edit-on-instance), non-transient
/// fields are compared; a field with no counterpart in `base` is skipped. Output keeps
/// the order of `instance`.
pub fn diff_overrides(instance: &[FieldValue], base: &[FieldValue]) -> Vec<PropertyOverride> {
    let base_by_name: HashMap<&str, &FieldValue> =
        base.iter().map(|f| (f.name.as_str(), f)).collect();

    instance
        .iter()
        .filter(|field| !field.declared_locally)
        .filter(|field| {
            let flags = field.flags;
            (flags.editable || flags.config || flags.disable_edit_on_instance) && !flags.transient
        })
        .filter_map(|field| {
            let base_field = base_by_name.get(field.name.as_str())?;
            if base_field.value == field.value {
                return None;
            }
            Some(PropertyOverride {
                name: field.name.clone(),
                value: export_value(&field.value),
            })
        })
        .collect()
}

fn export_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
