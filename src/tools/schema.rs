//! Field declarations for action/trigger contracts and the JSON-Schema
//! documents derived from them.
//!
//! Derivation produces the raw object-schema shape (enum fields wrapped in a
//! singleton `allOf` pointing into `$defs`, `const` fields carrying no type).
//! [`normalize_schema`] and [`sort_params_on_default`] turn that raw shape into
//! the presentation form served to clients.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Any,
    Array(Box<FieldType>),
    Enum { name: String, variants: Vec<String> },
    Const(Value),
}

impl FieldType {
    /// Parses the short type names used by tool manifests.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" | "str" => Some(FieldType::String),
            "integer" | "int" => Some(FieldType::Integer),
            "number" | "float" => Some(FieldType::Number),
            "boolean" | "bool" => Some(FieldType::Boolean),
            "object" | "dict" => Some(FieldType::Object),
            "any" => Some(FieldType::Any),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldDefault {
    /// No default: the field is required.
    Required,
    /// Optional field whose default is an explicit null.
    Null,
    Value(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldType,
    pub description: Option<String>,
    pub default: FieldDefault,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            default: FieldDefault::Required,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            default: FieldDefault::Null,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = if value.is_null() {
            FieldDefault::Null
        } else {
            FieldDefault::Value(value)
        };
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.default == FieldDefault::Required
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("property '{0}' uses an allOf with {1} elements, only a single element is supported")]
    UnsupportedAllOf(String, usize),
    #[error("property '{0}' references unknown definition '{1}'")]
    UnknownDefinition(String, String),
    #[error("property '{0}' has a const of unsupported type")]
    UnsupportedConst(String),
    #[error("schema has no properties object")]
    MissingProperties,
}

/// "athlete_id" -> "Athlete Id"
pub fn title_case(name: &str) -> String {
    name.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn type_fragment(kind: &FieldType, defs: &mut Map<String, Value>) -> Map<String, Value> {
    let mut frag = Map::new();
    match kind {
        FieldType::String => {
            frag.insert("type".into(), json!("string"));
        }
        FieldType::Integer => {
            frag.insert("type".into(), json!("integer"));
        }
        FieldType::Number => {
            frag.insert("type".into(), json!("number"));
        }
        FieldType::Boolean => {
            frag.insert("type".into(), json!("boolean"));
        }
        FieldType::Object => {
            frag.insert("type".into(), json!("object"));
        }
        FieldType::Any => {}
        FieldType::Array(inner) => {
            frag.insert("type".into(), json!("array"));
            frag.insert("items".into(), Value::Object(type_fragment(inner, defs)));
        }
        FieldType::Enum { name, variants } => {
            defs.insert(
                name.clone(),
                json!({ "title": name, "enum": variants, "type": "string" }),
            );
            frag.insert(
                "allOf".into(),
                json!([{ "$ref": format!("#/$defs/{}", name) }]),
            );
        }
        FieldType::Const(value) => {
            frag.insert("const".into(), value.clone());
        }
    }
    frag
}

/// Raw object schema for a list of fields, before normalization.
pub fn derive_schema(title: &str, fields: &[FieldSpec]) -> Value {
    let mut defs = Map::new();
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in fields {
        let mut prop = Map::new();
        prop.insert("title".into(), json!(title_case(&field.name)));
        prop.extend(type_fragment(&field.kind, &mut defs));
        if let Some(desc) = &field.description {
            prop.insert("description".into(), json!(desc));
        }
        match &field.default {
            FieldDefault::Required => required.push(json!(field.name)),
            FieldDefault::Null => {
                prop.insert("default".into(), Value::Null);
            }
            FieldDefault::Value(v) => {
                prop.insert("default".into(), v.clone());
            }
        }
        properties.insert(field.name.clone(), Value::Object(prop));
    }

    let mut schema = Map::new();
    schema.insert("title".into(), json!(title));
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    if !defs.is_empty() {
        schema.insert("$defs".into(), Value::Object(defs));
    }
    Value::Object(schema)
}

fn const_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(_) => Some("string"),
        Value::Bool(_) => Some("boolean"),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some("integer"),
        Value::Number(_) => Some("number"),
        _ => None,
    }
}

fn normalize_fragment(
    prop_name: &str,
    details: &mut Map<String, Value>,
    defs: &Map<String, Value>,
) -> Result<(), SchemaError> {
    if let Some(all_of) = details.remove("allOf") {
        let mut elements = match all_of {
            Value::Array(items) => items,
            other => vec![other],
        };
        if elements.len() != 1 {
            return Err(SchemaError::UnsupportedAllOf(
                prop_name.to_string(),
                elements.len(),
            ));
        }
        let element = elements.remove(0);
        let resolved = match element.get("$ref").and_then(Value::as_str) {
            Some(reference) => {
                let def_name = reference.rsplit('/').next().unwrap_or(reference);
                defs.get(def_name).cloned().ok_or_else(|| {
                    SchemaError::UnknownDefinition(prop_name.to_string(), def_name.to_string())
                })?
            }
            None => element,
        };
        if let Value::Object(fields) = resolved {
            details.extend(fields);
        }
    }

    if let Some(constant) = details.remove("const") {
        if !details.contains_key("type") {
            let ty = const_type(&constant)
                .ok_or_else(|| SchemaError::UnsupportedConst(prop_name.to_string()))?;
            details.insert("type".into(), json!(ty));
        }
        details.insert("enum".into(), json!([constant]));
    }

    // Array element types carry the same wrappers.
    if let Some(Value::Object(items)) = details.get_mut("items") {
        normalize_fragment(prop_name, items, defs)?;
    }
    Ok(())
}

/// Flattens singleton `allOf` wrappers, rewrites `const` into a one-element
/// `enum` with an explicit type, and strips `$defs`. Array `items` are
/// rewritten the same way at any depth.
pub fn normalize_schema(mut schema: Value) -> Result<Value, SchemaError> {
    let Some(obj) = schema.as_object_mut() else {
        return Err(SchemaError::MissingProperties);
    };
    let defs = match obj.remove("$defs") {
        Some(Value::Object(defs)) => defs,
        _ => Map::new(),
    };
    let Some(Value::Object(properties)) = obj.get_mut("properties") else {
        return Err(SchemaError::MissingProperties);
    };

    for (prop_name, details) in properties.iter_mut() {
        if let Some(details) = details.as_object_mut() {
            normalize_fragment(prop_name, details, &defs)?;
        }
    }

    Ok(schema)
}

fn default_rank(details: &Value) -> u8 {
    match details.get("default") {
        None => 0,
        Some(Value::Null) => 1,
        Some(_) => 2,
    }
}

/// Stable reorder: no default, then null default, then concrete default.
pub fn sort_params_on_default(mut schema: Value) -> Value {
    if let Some(Value::Object(properties)) = schema.get_mut("properties") {
        let mut entries: Vec<(String, Value)> = std::mem::take(properties).into_iter().collect();
        entries.sort_by_key(|(_, details)| default_rank(details));
        properties.extend(entries);
    }
    schema
}

/// Normalized, presentation-ordered schema for a field list.
pub fn parameters_schema(title: &str, fields: &[FieldSpec]) -> Result<Value, SchemaError> {
    normalize_schema(derive_schema(title, fields)).map(sort_params_on_default)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{}", render_errors(.model, .errors))]
pub struct ValidationError {
    pub model: String,
    pub errors: Vec<FieldError>,
}

fn render_errors(model: &str, errors: &[FieldError]) -> String {
    let plural = if errors.len() == 1 { "" } else { "s" };
    let mut out = format!("{} validation error{} for {}", errors.len(), plural, model);
    for err in errors {
        out.push_str(&format!("\n{}\n  {}", err.field, err.message));
    }
    out
}

fn check_value(kind: &FieldType, value: &Value) -> Result<(), String> {
    let ok = match kind {
        FieldType::String => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Any => true,
        FieldType::Array(inner) => {
            let Some(items) = value.as_array() else {
                return Err("value is not a valid list".into());
            };
            for (idx, item) in items.iter().enumerate() {
                check_value(inner, item).map_err(|e| format!("[{}]: {}", idx, e))?;
            }
            true
        }
        FieldType::Enum { variants, .. } => {
            return match value.as_str() {
                Some(s) if variants.iter().any(|v| v == s) => Ok(()),
                _ => Err(format!(
                    "value is not a valid enumeration member; permitted: {}",
                    variants
                        .iter()
                        .map(|v| format!("'{}'", v))
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            };
        }
        FieldType::Const(expected) => {
            return if value == expected {
                Ok(())
            } else {
                Err(format!("unexpected value; permitted: {}", expected))
            };
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("value is not a valid {}", type_label(kind)))
    }
}

fn type_label(kind: &FieldType) -> &'static str {
    match kind {
        FieldType::String => "string",
        FieldType::Integer => "integer",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Object => "dict",
        FieldType::Array(_) => "list",
        _ => "value",
    }
}

/// A request payload that passed validation. Declared fields only, defaults
/// filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParsedRequest(Map<String, Value>);

impl ParsedRequest {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }
}

/// Validates `payload` against `fields`. Unknown keys are dropped.
pub fn parse_request(
    model: &str,
    fields: &[FieldSpec],
    payload: &Value,
) -> Result<ParsedRequest, ValidationError> {
    let empty = Map::new();
    let input = match payload {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(ValidationError {
                model: model.to_string(),
                errors: vec![FieldError {
                    field: "__root__".into(),
                    message: "value is not a valid dict".into(),
                }],
            });
        }
    };

    let mut errors = Vec::new();
    let mut parsed = Map::new();
    for field in fields {
        match input.get(&field.name) {
            Some(Value::Null) if field.default != FieldDefault::Required => {
                parsed.insert(field.name.clone(), Value::Null);
            }
            Some(value) => match check_value(&field.kind, value) {
                Ok(()) => {
                    parsed.insert(field.name.clone(), value.clone());
                }
                Err(message) => errors.push(FieldError {
                    field: field.name.clone(),
                    message,
                }),
            },
            None => match &field.default {
                FieldDefault::Required => errors.push(FieldError {
                    field: field.name.clone(),
                    message: "field required".into(),
                }),
                FieldDefault::Null => {
                    parsed.insert(field.name.clone(), Value::Null);
                }
                FieldDefault::Value(v) => {
                    parsed.insert(field.name.clone(), v.clone());
                }
            },
        }
    }

    if errors.is_empty() {
        Ok(ParsedRequest(parsed))
    } else {
        Err(ValidationError {
            model: model.to_string(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> FieldType {
        FieldType::Enum {
            name: "Color".into(),
            variants: vec!["red".into(), "blue".into()],
        }
    }

    fn sample_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::optional("page", FieldType::Integer).with_default(json!(1)),
            FieldSpec::optional("cursor", FieldType::String),
            FieldSpec::required("athlete_id", FieldType::Integer).describe("Athlete to fetch"),
            FieldSpec::required("color", color()),
            FieldSpec::required("kind", FieldType::Const(json!("activity"))),
        ]
    }

    #[test]
    fn title_case_splits_underscores() {
        assert_eq!(title_case("athlete_id"), "Athlete Id");
        assert_eq!(title_case("name"), "Name");
    }

    #[test]
    fn derive_wraps_enums_in_all_of() {
        let raw = derive_schema("GetAthleteRequest", &sample_fields());
        assert_eq!(
            raw["properties"]["color"]["allOf"],
            json!([{ "$ref": "#/$defs/Color" }])
        );
        assert_eq!(raw["$defs"]["Color"]["enum"], json!(["red", "blue"]));
        assert_eq!(raw["required"], json!(["athlete_id", "color", "kind"]));
        assert!(raw["properties"]["kind"].get("type").is_none());
    }

    #[test]
    fn normalize_flattens_all_of_and_strips_defs() {
        let schema = parameters_schema("GetAthleteRequest", &sample_fields()).unwrap();
        let color = &schema["properties"]["color"];
        assert!(color.get("allOf").is_none());
        assert_eq!(color["enum"], json!(["red", "blue"]));
        assert_eq!(color["type"], "string");
        assert!(schema.get("$defs").is_none());
    }

    #[test]
    fn normalize_turns_const_into_typed_enum() {
        let fields = vec![
            FieldSpec::required("kind", FieldType::Const(json!("activity"))),
            FieldSpec::required("version", FieldType::Const(json!(2))),
            FieldSpec::required("ratio", FieldType::Const(json!(0.5))),
            FieldSpec::required("flag", FieldType::Const(json!(true))),
        ];
        let schema = parameters_schema("Consts", &fields).unwrap();
        let props = &schema["properties"];
        assert_eq!(props["kind"]["enum"], json!(["activity"]));
        assert_eq!(props["kind"]["type"], "string");
        assert_eq!(props["version"]["type"], "integer");
        assert_eq!(props["ratio"]["type"], "number");
        assert_eq!(props["flag"]["type"], "boolean");
        assert!(props["kind"].get("const").is_none());
    }

    #[test]
    fn normalize_inlines_enums_nested_in_arrays() {
        let fields = vec![
            FieldSpec::required("colors", FieldType::Array(Box::new(color()))),
            FieldSpec::optional(
                "grid",
                FieldType::Array(Box::new(FieldType::Array(Box::new(color())))),
            ),
            FieldSpec::optional("tags", FieldType::Array(Box::new(FieldType::Const(json!("x"))))),
        ];
        let schema = parameters_schema("Palette", &fields).unwrap();
        let props = &schema["properties"];

        let items = &props["colors"]["items"];
        assert!(items.get("allOf").is_none());
        assert_eq!(items["enum"], json!(["red", "blue"]));
        assert_eq!(items["type"], "string");

        let inner = &props["grid"]["items"]["items"];
        assert_eq!(inner["enum"], json!(["red", "blue"]));
        assert!(inner.get("allOf").is_none());

        assert_eq!(props["tags"]["items"], json!({ "enum": ["x"], "type": "string" }));
        assert!(schema.get("$defs").is_none());
        assert!(!schema.to_string().contains("$ref"));
    }

    #[test]
    fn normalize_rejects_multi_element_all_of() {
        let schema = json!({
            "properties": { "x": { "allOf": [{ "type": "string" }, { "minLength": 1 }] } }
        });
        assert!(matches!(
            normalize_schema(schema),
            Err(SchemaError::UnsupportedAllOf(name, 2)) if name == "x"
        ));
    }

    #[test]
    fn properties_are_ordered_by_default_kind() {
        let schema = parameters_schema("GetAthleteRequest", &sample_fields()).unwrap();
        let order: Vec<&String> = schema["properties"].as_object().unwrap().keys().collect();
        assert_eq!(order, vec!["athlete_id", "color", "kind", "cursor", "page"]);
    }

    #[test]
    fn schema_generation_is_idempotent() {
        let a = parameters_schema("Req", &sample_fields()).unwrap();
        let b = parameters_schema("Req", &sample_fields()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn parse_fills_defaults_and_drops_unknown_keys() {
        let parsed = parse_request(
            "GetAthleteRequest",
            &sample_fields(),
            &json!({ "athlete_id": 7, "color": "red", "kind": "activity", "extra": true }),
        )
        .unwrap();
        assert_eq!(
            parsed.to_value(),
            json!({ "page": 1, "cursor": null, "athlete_id": 7, "color": "red", "kind": "activity" })
        );
    }

    #[test]
    fn parse_reports_every_bad_field() {
        let err = parse_request(
            "GetAthleteRequest",
            &sample_fields(),
            &json!({ "athlete_id": "seven", "color": "green" }),
        )
        .unwrap_err();
        let fields: Vec<&str> = err.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["athlete_id", "color", "kind"]);
        assert!(err.to_string().starts_with("3 validation errors for GetAthleteRequest"));
    }

    #[test]
    fn parsed_request_round_trips() {
        let payload = json!({
            "page": 3,
            "cursor": "abc",
            "athlete_id": 42,
            "color": "blue",
            "kind": "activity"
        });
        let parsed = parse_request("Req", &sample_fields(), &payload).unwrap();
        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(reserialized, payload);
        let again = parse_request("Req", &sample_fields(), &reserialized).unwrap();
        assert_eq!(again, parsed);
    }

    #[test]
    fn arrays_check_each_item() {
        let fields = vec![FieldSpec::required(
            "ids",
            FieldType::Array(Box::new(FieldType::Integer)),
        )];
        assert!(parse_request("R", &fields, &json!({ "ids": [1, 2] })).is_ok());
        let err = parse_request("R", &fields, &json!({ "ids": [1, "x"] })).unwrap_err();
        assert!(err.errors[0].message.starts_with("[1]"));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(parse_request("R", &[], &json!([1, 2])).is_err());
        assert!(parse_request("R", &[], &Value::Null).is_ok());
    }
}
