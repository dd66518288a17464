//! JSON body matching: strict equality, field-subset matching, and a
//! structural schema check.

use serde_json::Value;

/// Strict comparison: the parsed request body must equal the expected value.
pub fn json_strict_equals(expected: &Value, actual: &Value) -> bool {
    expected == actual
}

/// ONLY_MATCHING_FIELDS semantics: every field in `expected` must equal the
/// corresponding field in `actual`; extra fields in `actual` are permitted.
/// Arrays must have the same length and match element-wise.
pub fn json_contains(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected_map), Value::Object(actual_map)) => {
            expected_map.iter().all(|(key, expected_value)| {
                actual_map
                    .get(key)
                    .is_some_and(|actual_value| json_contains(expected_value, actual_value))
            })
        }
        (Value::Array(expected_items), Value::Array(actual_items)) => {
            expected_items.len() == actual_items.len()
                && expected_items
                    .iter()
                    .zip(actual_items)
                    .all(|(e, a)| json_contains(e, a))
        }
        _ => expected == actual,
    }
}

/// Structural schema validation covering the subset of JSON Schema the
/// matcher supports: `type`, `properties`, `required`, `enum`, `items`.
pub fn matches_schema(schema: &Value, value: &Value) -> bool {
    let Some(schema_map) = schema.as_object() else {
        // A non-object schema constrains nothing.
        return true;
    };

    if let Some(expected_type) = schema_map.get("type").and_then(Value::as_str) {
        let type_ok = match expected_type {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => false,
        };
        if !type_ok {
            return false;
        }
    }

    if let Some(allowed) = schema_map.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return false;
        }
    }

    if let Some(required) = schema_map.get("required").and_then(Value::as_array) {
        let Some(object) = value.as_object() else {
            return false;
        };
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return false;
            }
        }
    }

    if let Some(properties) = schema_map.get("properties").and_then(Value::as_object) {
        if let Some(object) = value.as_object() {
            for (key, property_schema) in properties {
                if let Some(property_value) = object.get(key) {
                    if !matches_schema(property_schema, property_value) {
                        return false;
                    }
                }
            }
        }
    }

    if let Some(item_schema) = schema_map.get("items") {
        if let Some(items) = value.as_array() {
            for item in items {
                if !matches_schema(item_schema, item) {
                    return false;
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contains_allows_extra_fields() {
        let expected = json!({"name": "alice"});
        let actual = json!({"name": "alice", "age": 30});
        assert!(json_contains(&expected, &actual));
        assert!(!json_strict_equals(&expected, &actual));
    }

    #[test]
    fn contains_recurses_into_nested_objects() {
        let expected = json!({"user": {"id": 1}});
        assert!(json_contains(&expected, &json!({"user": {"id": 1, "role": "admin"}})));
        assert!(!json_contains(&expected, &json!({"user": {"id": 2}})));
        assert!(!json_contains(&expected, &json!({"other": true})));
    }

    #[test]
    fn contains_requires_equal_array_lengths() {
        let expected = json!([1, 2]);
        assert!(json_contains(&expected, &json!([1, 2])));
        assert!(!json_contains(&expected, &json!([1, 2, 3])));
        assert!(!json_contains(&expected, &json!([2, 1])));
    }

    #[test]
    fn schema_type_and_required() {
        let schema = json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "integer"}}
        });
        assert!(matches_schema(&schema, &json!({"id": 1})));
        assert!(matches_schema(&schema, &json!({"id": 1, "extra": "ok"})));
        assert!(!matches_schema(&schema, &json!({"id": "one"})));
        assert!(!matches_schema(&schema, &json!({"name": "no id"})));
        assert!(!matches_schema(&schema, &json!("not an object")));
    }

    #[test]
    fn schema_enum_and_items() {
        let schema = json!({"enum": ["red", "green"]});
        assert!(matches_schema(&schema, &json!("red")));
        assert!(!matches_schema(&schema, &json!("blue")));

        let list = json!({"type": "array", "items": {"type": "number"}});
        assert!(matches_schema(&list, &json!([1, 2.5])));
        assert!(!matches_schema(&list, &json!([1, "two"])));
    }
}
