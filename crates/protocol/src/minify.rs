//! Composer 2 minified metadata.
//!
//! A minified version list stores the first version in full and every later
//! version as a diff against the accumulated state: keys whose value changed,
//! plus `"__unset"` for keys that disappeared. Documents carrying
//! `"minified": "composer/2.0"` must be expanded before they reach a client
//! that does not understand the encoding.

use serde_json::{Map, Value};

pub const MINIFIED_MARKER: &str = "composer/2.0";
const UNSET: &str = "__unset";

/// Factor shared fields out of a list of version objects.
pub fn minify(versions: &[Value]) -> Vec<Value> {
    let mut minified = Vec::with_capacity(versions.len());
    let mut last: Option<Map<String, Value>> = None;
    for version in versions {
        let Some(current) = version.as_object() else {
            minified.push(version.clone());
            continue;
        };
        let Some(known) = last.as_mut() else {
            last = Some(current.clone());
            minified.push(version.clone());
            continue;
        };
        let mut diff = Map::new();
        for (key, value) in current {
            if known.get(key) != Some(value) {
                diff.insert(key.clone(), value.clone());
                known.insert(key.clone(), value.clone());
            }
        }
        let removed: Vec<String> = known.keys().filter(|key| !current.contains_key(*key)).cloned().collect();
        for key in removed {
            known.remove(&key);
            diff.insert(key, Value::String(UNSET.to_string()));
        }
        minified.push(Value::Object(diff));
    }
    minified
}

/// Rebuild full version objects from a minified list.
pub fn expand(versions: &[Value]) -> Vec<Value> {
    let mut expanded = Vec::with_capacity(versions.len());
    let mut state = Map::new();
    for version in versions {
        let Some(diff) = version.as_object() else {
            expanded.push(version.clone());
            continue;
        };
        for (key, value) in diff {
            if value.as_str() == Some(UNSET) {
                state.remove(key);
            } else {
                state.insert(key.clone(), value.clone());
            }
        }
        expanded.push(Value::Object(state.clone()));
    }
    expanded
}

pub fn is_minified(doc: &Map<String, Value>) -> bool {
    doc.get("minified").and_then(Value::as_str) == Some(MINIFIED_MARKER)
}

/// Expand every version list of a package document in place and drop the
/// marker. Documents that are not minified are returned untouched.
pub fn expand_document(mut doc: Map<String, Value>) -> Map<String, Value> {
    if !is_minified(&doc) {
        return doc;
    }
    if let Some(Value::Object(packages)) = doc.get_mut("packages") {
        for versions in packages.values_mut() {
            if let Value::Array(list) = versions {
                *list = expand(list);
            }
        }
    }
    doc.remove("minified");
    doc
}

/// Full version objects of `package` from a v1 (map) or v2 (list) document.
pub fn versions_of(doc: &Map<String, Value>, package: &str) -> Vec<Value> {
    let minified = is_minified(doc);
    match doc.get("packages").and_then(|packages| packages.get(package)) {
        Some(Value::Array(list)) if minified => expand(list),
        Some(Value::Array(list)) => list.clone(),
        Some(Value::Object(by_version)) => by_version.values().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Combine the stable and `~dev` documents of one package into a single
/// minified document. `None` when neither side exists.
pub fn merge_stable_and_dev(
    package: &str,
    stable: Option<&Map<String, Value>>,
    dev: Option<&Map<String, Value>>,
) -> Option<Map<String, Value>> {
    if stable.is_none() && dev.is_none() {
        return None;
    }
    let mut versions = stable.map(|doc| versions_of(doc, package)).unwrap_or_default();
    versions.extend(dev.map(|doc| versions_of(doc, package)).unwrap_or_default());

    let mut packages = Map::new();
    packages.insert(package.to_string(), Value::Array(minify(&versions)));
    let mut merged = Map::new();
    merged.insert("packages".to_string(), Value::Object(packages));
    merged.insert("minified".to_string(), Value::String(MINIFIED_MARKER.to_string()));
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn versions() -> Vec<Value> {
        vec![
            json!({"name": "acme/foo", "version": "2.0.0", "license": ["MIT"], "require": {"php": ">=8.1"}}),
            json!({"name": "acme/foo", "version": "1.1.0", "license": ["MIT"], "require": {"php": ">=7.4"}}),
            json!({"name": "acme/foo", "version": "1.0.0", "license": ["MIT"]}),
            json!({"name": "acme/foo", "version": "0.9.0", "license": ["GPL-2.0"], "require": {"php": ">=5.6"}}),
        ]
    }

    #[test]
    fn test_minify_factors_out_shared_fields() {
        let minified = minify(&versions());
        assert_eq!(minified[0], versions()[0]);
        assert_eq!(minified[1], json!({"version": "1.1.0", "require": {"php": ">=7.4"}}));
        assert_eq!(minified[2], json!({"version": "1.0.0", "require": "__unset"}));
        assert_eq!(
            minified[3],
            json!({"version": "0.9.0", "license": ["GPL-2.0"], "require": {"php": ">=5.6"}})
        );
    }

    #[test]
    fn test_expand_reverses_minify() {
        assert_eq!(expand(&minify(&versions())), versions());
        assert!(expand(&[]).is_empty());
    }

    #[test]
    fn test_expand_document() {
        let doc = json!({
            "minified": "composer/2.0",
            "packages": {"acme/foo": minify(&versions())}
        });
        let Value::Object(doc) = doc else { unreachable!() };
        let expanded = expand_document(doc);
        assert!(!expanded.contains_key("minified"));
        assert_eq!(expanded["packages"]["acme/foo"], Value::Array(versions()));
    }

    #[test]
    fn test_versions_of_v1_document() {
        let Value::Object(doc) = json!({
            "packages": {"acme/foo": {"1.0.0": {"version": "1.0.0"}, "dev-main": {"version": "dev-main"}}}
        }) else {
            unreachable!()
        };
        assert_eq!(versions_of(&doc, "acme/foo").len(), 2);
        assert!(versions_of(&doc, "acme/bar").is_empty());
    }

    #[test]
    fn test_merge_stable_and_dev() {
        let stable = json!({"minified": "composer/2.0", "packages": {"acme/foo": minify(&versions()[..2])}});
        let dev = json!({"minified": "composer/2.0", "packages": {"acme/foo": [
            {"name": "acme/foo", "version": "dev-main", "version_normalized": "9999999-dev"}
        ]}});
        let merged = merge_stable_and_dev("acme/foo", stable.as_object(), dev.as_object()).unwrap();
        assert!(is_minified(&merged));
        let all = versions_of(&merged, "acme/foo");
        assert_eq!(all.len(), 3);
        assert_eq!(all[2]["version"], "dev-main");
        assert!(all[2].get("license").is_none());

        let only_dev = merge_stable_and_dev("acme/foo", None, dev.as_object()).unwrap();
        assert_eq!(versions_of(&only_dev, "acme/foo").len(), 1);
        assert!(merge_stable_and_dev("acme/foo", None, None).is_none());
    }
}
