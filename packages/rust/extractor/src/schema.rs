//! Coercion of parsed model output into the two-level module schema.
//!
//! Models drift from the requested shape in predictable ways. Accepted input:
//!
//! - the map form `{"Module": {"Description": "...", "Submodules": {"Sub": "..."}}}`
//!   with keys matched case-insensitively;
//! - the list form `{"modules": [{"module", "description", "submodules": [{"submodule", "description"}]}]}`;
//! - a top-level array of either, merged in order.
//!
//! Anything nested deeper than module → submodule is flattened to a string
//! and counted, never rejected.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use docmodules_shared::{ExtractionResult, ModuleEntry};

const DESCRIPTION_KEYS: &[&str] = &["description", "desc", "summary"];
const SUBMODULE_KEYS: &[&str] = &["submodules", "sub_modules", "sub-modules", "children", "features"];
const MODULE_NAME_KEYS: &[&str] = &["module", "name", "title"];
const SUBMODULE_NAME_KEYS: &[&str] = &["submodule", "name", "title"];

/// Convert a parsed response into an [`ExtractionResult`].
///
/// Returns the result and the number of values that had to be flattened.
pub fn coerce(value: Value) -> (ExtractionResult, usize) {
    let mut flattened = 0;
    let mut result = ExtractionResult::new();
    coerce_into(value, &mut result, &mut flattened);
    (result, flattened)
}

fn coerce_into(value: Value, result: &mut ExtractionResult, flattened: &mut usize) {
    match value {
        Value::Array(items) => {
            for item in items {
                coerce_into(item, result, flattened);
            }
        }
        Value::Object(obj) => {
            if let Some(Value::Array(modules)) = field(&obj, &["modules"]) {
                for item in modules {
                    if let Some((name, entry)) = listed_module(item, flattened) {
                        result.insert_module(&name, entry);
                    }
                }
                return;
            }
            for (name, value) in obj {
                let entry = module_entry(value, flattened);
                result.insert_module(&name, entry);
            }
        }
        _ => {}
    }
}

/// One module of the map form.
fn module_entry(value: Value, flattened: &mut usize) -> ModuleEntry {
    match value {
        Value::Object(obj) => {
            let description = field(&obj, DESCRIPTION_KEYS).map(|v| text_of(v, flattened));
            let submodules = field(&obj, SUBMODULE_KEYS).map(|v| submodules_of(v, flattened));

            if description.is_none() && submodules.is_none() && !obj.is_empty() {
                // No recognizable keys: the object itself is the submodule map.
                *flattened += 1;
                return ModuleEntry {
                    description: String::new(),
                    submodules: submodules_of(&Value::Object(obj), flattened),
                };
            }

            ModuleEntry {
                description: description.unwrap_or_default(),
                submodules: submodules.unwrap_or_default(),
            }
        }
        Value::Null => ModuleEntry::default(),
        Value::Array(_) => {
            *flattened += 1;
            ModuleEntry {
                description: String::new(),
                submodules: submodules_of(&value, flattened),
            }
        }
        other => {
            // A bare string is read as the description.
            if other.is_string() {
                *flattened += 1;
            }
            ModuleEntry {
                description: text_of(&other, flattened),
                submodules: IndexMap::new(),
            }
        }
    }
}

/// One module of the list form.
fn listed_module(item: &Value, flattened: &mut usize) -> Option<(String, ModuleEntry)> {
    let Value::Object(obj) = item else {
        return None;
    };
    let name = match field(&obj, MODULE_NAME_KEYS)? {
        Value::String(s) => s.clone(),
        other => text_of(other, flattened),
    };
    let description = field(&obj, DESCRIPTION_KEYS)
        .map(|v| text_of(v, flattened))
        .unwrap_or_default();
    let submodules = field(&obj, SUBMODULE_KEYS)
        .map(|v| submodules_of(v, flattened))
        .unwrap_or_default();

    Some((
        name,
        ModuleEntry {
            description,
            submodules,
        },
    ))
}

fn submodules_of(value: &Value, flattened: &mut usize) -> IndexMap<String, String> {
    let mut subs = IndexMap::new();
    let mut add = |name: String, desc: String| {
        let name = name.trim().to_string();
        if !name.is_empty() {
            subs.entry(name).or_insert(desc);
        }
    };

    match value {
        Value::Object(obj) => {
            for (name, v) in obj {
                add(name.clone(), text_of(v, flattened));
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(obj) => {
                        let Some(name) = field(obj, SUBMODULE_NAME_KEYS) else {
                            *flattened += 1;
                            continue;
                        };
                        let name = match name {
                            Value::String(s) => s.clone(),
                            other => text_of(other, flattened),
                        };
                        let desc = field(obj, DESCRIPTION_KEYS)
                            .map(|v| text_of(v, flattened))
                            .unwrap_or_default();
                        add(name, desc);
                    }
                    Value::String(name) => add(name.clone(), String::new()),
                    _ => *flattened += 1,
                }
            }
        }
        Value::Null => {}
        _ => *flattened += 1,
    }
    subs
}

/// A value as a description string. Anything but a string or null counts as
/// flattened.
fn text_of(value: &Value, flattened: &mut usize) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Object(obj) => {
            *flattened += 1;
            match field(obj, DESCRIPTION_KEYS) {
                Some(Value::String(s)) => s.trim().to_string(),
                _ => value.to_string(),
            }
        }
        other => {
            *flattened += 1;
            other.to_string()
        }
    }
}

/// Case-insensitive lookup of the first matching key.
fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        obj.iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_form_is_accepted() {
        let (result, flattened) = coerce(json!({
            "Search": {"Description": "Find things", "Submodules": {"Filters": "Narrow results"}},
            "Billing": {"description": "Invoices", "submodules": {}}
        }));
        assert_eq!(flattened, 0);
        assert_eq!(result.len(), 2);
        assert_eq!(result.get("Search").unwrap().submodules["Filters"], "Narrow results");
        assert_eq!(result.get("Billing").unwrap().description, "Invoices");
        let names: Vec<_> = result.modules().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Search", "Billing"]);
    }

    #[test]
    fn list_form_is_accepted() {
        let (result, flattened) = coerce(json!({"modules": [{
            "module": "Account Management",
            "description": "Manage users",
            "submodules": [
                {"submodule": "Login", "description": "Sign in"},
                {"submodule": "Profile", "description": "Edit profile"}
            ]
        }]}));
        assert_eq!(flattened, 0);
        let module = result.get("Account Management").unwrap();
        assert_eq!(module.description, "Manage users");
        assert_eq!(module.submodules.len(), 2);
        assert_eq!(module.submodules["Login"], "Sign in");
    }

    #[test]
    fn empty_object_is_empty_result() {
        let (result, flattened) = coerce(json!({}));
        assert!(result.is_empty());
        assert_eq!(flattened, 0);
    }

    #[test]
    fn arrays_merge_in_order_first_wins() {
        let (result, _) = coerce(json!([
            {"A": {"Description": "first", "Submodules": {"x": "1"}}},
            {"A": {"Description": "second", "Submodules": {"x": "2", "y": "3"}}},
            {"B": {}}
        ]));
        let a = result.get("A").unwrap();
        assert_eq!(a.description, "first");
        assert_eq!(a.submodules["x"], "1");
        assert_eq!(a.submodules["y"], "3");
        assert!(result.get("B").is_some());
    }

    #[test]
    fn nested_submodule_objects_are_flattened() {
        let (result, flattened) = coerce(json!({
            "Reports": {
                "Description": "Charts",
                "Submodules": {
                    "Export": {"Description": "CSV and PDF", "Submodules": {"CSV": "x"}},
                    "Schedule": {"cron": "daily"},
                    "Count": 3
                }
            }
        }));
        assert_eq!(flattened, 3);
        let subs = &result.get("Reports").unwrap().submodules;
        assert_eq!(subs["Export"], "CSV and PDF");
        assert_eq!(subs["Schedule"], r#"{"cron":"daily"}"#);
        assert_eq!(subs["Count"], "3");
    }

    #[test]
    fn module_level_shape_violations_are_corrected() {
        let (result, flattened) = coerce(json!({
            "Plain": "Just a description",
            "Listed": ["One", "Two"],
            "Bare": {"Login": "Sign in"},
            "Nothing": null
        }));
        assert_eq!(flattened, 3);
        assert_eq!(result.get("Plain").unwrap().description, "Just a description");
        assert_eq!(result.get("Listed").unwrap().submodules.len(), 2);
        assert_eq!(result.get("Bare").unwrap().submodules["Login"], "Sign in");
        assert_eq!(result.get("Nothing").unwrap(), &ModuleEntry::default());
    }

    #[test]
    fn non_object_top_level_is_ignored() {
        let (result, _) = coerce(json!(["text", 1, null]));
        assert!(result.is_empty());
    }

    #[test]
    fn blank_names_are_dropped() {
        let (result, _) = coerce(json!({" ": {"Description": "x"}, "Ok": {"Submodules": {"": "y"}}}));
        assert_eq!(result.len(), 1);
        assert!(result.get("Ok").unwrap().submodules.is_empty());
    }
}
