//! Field schema definitions and validation
//!
//! Trackers carry an immutable snapshot of field definitions, and every
//! entry write is validated against that snapshot. Values travel as
//! loosely-typed JSON maps and are type-checked once here, at the boundary.

use crate::config::{RATING_MAX, RATING_MIN};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Supported field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Rating,
    Date,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Rating => "rating",
            FieldType::Date => "date",
        };
        write!(f, "{}", name)
    }
}

/// Optional per-field validation constraints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// One field definition inside a template or tracker schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<FieldRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A single validation problem, with enough context for user-facing messages
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub field_id: String,
    pub label: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(field_id: impl Into<String>, label: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            label: label.map(|l| l.to_string()),
            message: message.into(),
        }
    }
}

/// Validation failure carrying one issue per offending field
#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn single(field_id: impl Into<String>, label: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue::new(field_id, label, message)],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("{}: {}", i.field_id, i.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// A value coerced into its declared type
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Rating(f64),
    Date(NaiveDate),
    Null,
}

/// Coerce a raw JSON value into the declared field type.
///
/// Nulls pass through as `FieldValue::Null`; required-ness is the
/// caller's concern. Errors describe what was expected.
fn coerce_value(value: &Value, field_type: FieldType) -> std::result::Result<FieldValue, String> {
    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    match field_type {
        FieldType::Text => value
            .as_str()
            .map(|s| FieldValue::Text(s.to_string()))
            .ok_or_else(|| "expected a string".to_string()),
        FieldType::Number => match value.as_f64() {
            Some(n) if n.is_finite() => Ok(FieldValue::Number(n)),
            Some(_) => Err("expected a finite number".to_string()),
            None => Err("expected a number".to_string()),
        },
        FieldType::Boolean => value
            .as_bool()
            .map(FieldValue::Boolean)
            .ok_or_else(|| "expected a boolean".to_string()),
        FieldType::Rating => match value.as_f64() {
            Some(n) if n.is_finite() => {
                if (RATING_MIN..=RATING_MAX).contains(&n) {
                    Ok(FieldValue::Rating(n))
                } else {
                    Err(format!(
                        "rating must be between {} and {}",
                        RATING_MIN as i64, RATING_MAX as i64
                    ))
                }
            }
            _ => Err("expected a number".to_string()),
        },
        FieldType::Date => {
            let s = value.as_str().ok_or_else(|| "expected a date string".to_string())?;
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(FieldValue::Date)
                .map_err(|_| format!("expected a date in YYYY-MM-DD format, got \"{}\"", s))
        }
    }
}

/// Validate a field schema (template or raw tracker schema).
///
/// Rejects empty schemas, blank or duplicate field ids, blank labels,
/// internally inconsistent rule blocks, and defaults that fail their own
/// field's type-check.
pub fn validate_field_schema(fields: &[FieldDef]) -> std::result::Result<(), ValidationError> {
    let mut issues = Vec::new();

    if fields.is_empty() {
        issues.push(ValidationIssue::new(
            "schema",
            None,
            "a schema must define at least one field",
        ));
        return Err(ValidationError { issues });
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();

    for field in fields {
        let label = Some(field.label.as_str());

        if field.id.trim().is_empty() {
            issues.push(ValidationIssue::new(&field.id, label, "field id must not be blank"));
        } else if !seen_ids.insert(field.id.as_str()) {
            issues.push(ValidationIssue::new(
                &field.id,
                label,
                format!("duplicate field id \"{}\"", field.id),
            ));
        }

        if field.label.trim().is_empty() {
            issues.push(ValidationIssue::new(&field.id, None, "field label must not be blank"));
        }

        if let Some(rules) = &field.rules {
            if let (Some(min), Some(max)) = (rules.min, rules.max) {
                if min > max {
                    issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("min ({}) must not exceed max ({})", min, max),
                    ));
                }
            }
            if let (Some(min_len), Some(max_len)) = (rules.min_length, rules.max_length) {
                if min_len > max_len {
                    issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("min_length ({}) must not exceed max_length ({})", min_len, max_len),
                    ));
                }
            }
            if field.field_type == FieldType::Rating {
                if let Some(min) = rules.min {
                    if min < RATING_MIN {
                        issues.push(ValidationIssue::new(
                            &field.id,
                            label,
                            format!("rating min must be at least {}", RATING_MIN as i64),
                        ));
                    }
                }
                if let Some(max) = rules.max {
                    if max > RATING_MAX {
                        issues.push(ValidationIssue::new(
                            &field.id,
                            label,
                            format!("rating max must be at most {}", RATING_MAX as i64),
                        ));
                    }
                }
            }
            if let Some(pattern) = &rules.pattern {
                if let Err(e) = regex::Regex::new(pattern) {
                    issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("invalid pattern \"{}\": {}", pattern, e),
                    ));
                }
            }
        }

        if let Some(default) = &field.default {
            if let Err(reason) = coerce_value(default, field.field_type) {
                issues.push(ValidationIssue::new(
                    &field.id,
                    label,
                    format!("default value does not match field type: {}", reason),
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

/// Validate an entry's field-value map against a schema snapshot.
///
/// Every required field must be present and non-null, every provided key
/// must be a known field id, and every value must type-check and satisfy
/// its declared constraints.
pub fn validate_entry_values(
    schema: &[FieldDef],
    values: &serde_json::Map<String, Value>,
) -> std::result::Result<(), ValidationError> {
    let mut issues = Vec::new();

    for field in schema {
        if field.required {
            match values.get(&field.id) {
                None => issues.push(ValidationIssue::new(
                    &field.id,
                    Some(&field.label),
                    "required field is missing",
                )),
                Some(Value::Null) => issues.push(ValidationIssue::new(
                    &field.id,
                    Some(&field.label),
                    "required field must not be null",
                )),
                Some(_) => {}
            }
        }
    }

    for (key, value) in values {
        let field = match schema.iter().find(|f| f.id == *key) {
            Some(field) => field,
            None => {
                let known: Vec<&str> = schema.iter().map(|f| f.id.as_str()).collect();
                issues.push(ValidationIssue::new(
                    key,
                    None,
                    format!("unknown field \"{}\" (known fields: {})", key, known.join(", ")),
                ));
                continue;
            }
        };

        let coerced = match coerce_value(value, field.field_type) {
            Ok(coerced) => coerced,
            Err(reason) => {
                issues.push(ValidationIssue::new(key, Some(&field.label), reason));
                continue;
            }
        };

        if let Some(rules) = &field.rules {
            check_rules(&coerced, rules, field, &mut issues);
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

fn check_rules(value: &FieldValue, rules: &FieldRules, field: &FieldDef, issues: &mut Vec<ValidationIssue>) {
    let label = Some(field.label.as_str());

    match value {
        FieldValue::Number(n) | FieldValue::Rating(n) => {
            if let Some(min) = rules.min {
                if *n < min {
                    issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("value {} is below the minimum of {}", n, min),
                    ));
                }
            }
            if let Some(max) = rules.max {
                if *n > max {
                    issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("value {} is above the maximum of {}", n, max),
                    ));
                }
            }
        }
        FieldValue::Text(s) => {
            let len = s.chars().count();
            if let Some(min_len) = rules.min_length {
                if len < min_len {
                    issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("text is shorter than the minimum length of {}", min_len),
                    ));
                }
            }
            if let Some(max_len) = rules.max_length {
                if len > max_len {
                    issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("text is longer than the maximum length of {}", max_len),
                    ));
                }
            }
            if let Some(pattern) = &rules.pattern {
                // Schema validation already confirmed the pattern compiles;
                // a stored schema predating that check still must not panic.
                match regex::Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(s) {
                            issues.push(ValidationIssue::new(
                                &field.id,
                                label,
                                format!("value \"{}\" does not match the required pattern", s),
                            ));
                        }
                    }
                    Err(_) => issues.push(ValidationIssue::new(
                        &field.id,
                        label,
                        format!("stored pattern \"{}\" is invalid", pattern),
                    )),
                }
            }
        }
        FieldValue::Boolean(_) | FieldValue::Date(_) | FieldValue::Null => {}
    }
}

/// Shallow-merge a partial update into an existing value map.
///
/// New keys overwrite, unspecified keys are retained. The merged result
/// must be re-validated before persisting.
pub fn merge_values(
    existing: &serde_json::Map<String, Value>,
    update: &serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    let mut merged = existing.clone();
    for (key, value) in update {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn rating_field(id: &str) -> FieldDef {
        FieldDef {
            id: id.to_string(),
            label: "Mood".to_string(),
            field_type: FieldType::Rating,
            required: false,
            rules: None,
            default: None,
        }
    }

    #[test]
    fn test_schema_rejects_empty() {
        assert!(validate_field_schema(&[]).is_err());
    }

    #[test]
    fn test_schema_rejects_duplicate_ids() {
        let fields = vec![rating_field("mood"), rating_field("mood")];
        let err = validate_field_schema(&fields).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_schema_rejects_blank_label() {
        let mut field = rating_field("mood");
        field.label = "  ".to_string();
        assert!(validate_field_schema(&[field]).is_err());
    }

    #[test]
    fn test_schema_rejects_inverted_bounds() {
        let field = FieldDef {
            id: "steps".to_string(),
            label: "Steps".to_string(),
            field_type: FieldType::Number,
            required: false,
            rules: Some(FieldRules {
                min: Some(100.0),
                max: Some(10.0),
                ..Default::default()
            }),
            default: None,
        };
        assert!(validate_field_schema(&[field]).is_err());
    }

    #[test]
    fn test_schema_rejects_rating_bounds_outside_range() {
        let mut field = rating_field("mood");
        field.rules = Some(FieldRules {
            max: Some(10.0),
            ..Default::default()
        });
        assert!(validate_field_schema(&[field]).is_err());
    }

    #[test]
    fn test_schema_rejects_bad_pattern() {
        let field = FieldDef {
            id: "code".to_string(),
            label: "Code".to_string(),
            field_type: FieldType::Text,
            required: false,
            rules: Some(FieldRules {
                pattern: Some("[unclosed".to_string()),
                ..Default::default()
            }),
            default: None,
        };
        assert!(validate_field_schema(&[field]).is_err());
    }

    #[test]
    fn test_schema_rejects_mistyped_default() {
        let mut field = rating_field("mood");
        field.default = Some(json!("not a rating"));
        assert!(validate_field_schema(&[field.clone()]).is_err());

        field.default = Some(json!(4));
        assert!(validate_field_schema(&[field]).is_ok());
    }

    #[test]
    fn test_rating_bounds_without_explicit_rules() {
        let schema = vec![rating_field("mood")];

        let err = validate_entry_values(&schema, &map(json!({ "mood": 6 }))).unwrap_err();
        assert!(err.to_string().contains("between 1 and 5"));

        assert!(validate_entry_values(&schema, &map(json!({ "mood": 3 }))).is_ok());
    }

    #[test]
    fn test_required_field_missing_or_null() {
        let schema = vec![FieldDef {
            id: "mood".to_string(),
            label: "Mood".to_string(),
            field_type: FieldType::Rating,
            required: true,
            rules: None,
            default: None,
        }];

        assert!(validate_entry_values(&schema, &map(json!({}))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "mood": null }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "mood": 4 }))).is_ok());
    }

    #[test]
    fn test_null_allowed_for_optional_fields() {
        let schema = vec![rating_field("mood")];
        assert!(validate_entry_values(&schema, &map(json!({ "mood": null }))).is_ok());
    }

    #[test]
    fn test_unknown_field_lists_known_ids() {
        let schema = vec![rating_field("mood")];
        let err = validate_entry_values(&schema, &map(json!({ "energy": 3 }))).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
        assert!(err.to_string().contains("mood"));
    }

    #[test]
    fn test_type_checks() {
        let schema = vec![
            FieldDef {
                id: "note".to_string(),
                label: "Note".to_string(),
                field_type: FieldType::Text,
                required: false,
                rules: None,
                default: None,
            },
            FieldDef {
                id: "steps".to_string(),
                label: "Steps".to_string(),
                field_type: FieldType::Number,
                required: false,
                rules: None,
                default: None,
            },
            FieldDef {
                id: "done".to_string(),
                label: "Done".to_string(),
                field_type: FieldType::Boolean,
                required: false,
                rules: None,
                default: None,
            },
            FieldDef {
                id: "when".to_string(),
                label: "When".to_string(),
                field_type: FieldType::Date,
                required: false,
                rules: None,
                default: None,
            },
        ];

        assert!(validate_entry_values(&schema, &map(json!({ "note": 1 }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "steps": "many" }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "done": "yes" }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "when": "2026-13-40" }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "when": "not a date" }))).is_err());

        let ok = json!({ "note": "hi", "steps": 8000, "done": true, "when": "2026-08-07" });
        assert!(validate_entry_values(&schema, &map(ok)).is_ok());
    }

    #[test]
    fn test_text_constraints() {
        let schema = vec![FieldDef {
            id: "code".to_string(),
            label: "Code".to_string(),
            field_type: FieldType::Text,
            required: false,
            rules: Some(FieldRules {
                min_length: Some(2),
                max_length: Some(4),
                pattern: Some("^[A-Z]+$".to_string()),
                ..Default::default()
            }),
            default: None,
        }];

        assert!(validate_entry_values(&schema, &map(json!({ "code": "A" }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "code": "ABCDE" }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "code": "abc" }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "code": "ABC" }))).is_ok());
    }

    #[test]
    fn test_numeric_constraints() {
        let schema = vec![FieldDef {
            id: "hours".to_string(),
            label: "Hours".to_string(),
            field_type: FieldType::Number,
            required: false,
            rules: Some(FieldRules {
                min: Some(0.0),
                max: Some(24.0),
                ..Default::default()
            }),
            default: None,
        }];

        assert!(validate_entry_values(&schema, &map(json!({ "hours": -1 }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "hours": 25 }))).is_err());
        assert!(validate_entry_values(&schema, &map(json!({ "hours": 7.5 }))).is_ok());
    }

    #[test]
    fn test_merge_overwrites_and_retains() {
        let existing = map(json!({ "mood": 3, "note": "ok" }));
        let update = map(json!({ "mood": 5 }));

        let merged = merge_values(&existing, &update);
        assert_eq!(merged.get("mood"), Some(&json!(5)));
        assert_eq!(merged.get("note"), Some(&json!("ok")));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = map(json!({ "mood": 3 }));
        let update = map(json!({ "mood": 4, "note": "later" }));

        let once = merge_values(&existing, &update);
        let twice = merge_values(&once, &update);
        assert_eq!(once, twice);
    }
}
