//! Tools declared in TOML instead of Rust. A manifest lists HTTP-backed
//! actions and webhook triggers; [`ToolManifest::into_descriptor`] turns it
//! into a [`ToolDescriptor`] the registry can hold.

mod http;
mod store;

pub use http::{HttpAction, HttpTrigger};
pub use store::{CustomToolStore, Installed, embedded_tools, validate_segment};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::action::ActionSpec;
use super::descriptor::{ToolDescriptor, ToolSource};
use super::global;
use super::schema::{FieldSpec, FieldType, title_case};
use super::trigger::TriggerSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Prefix for relative endpoints. The auth context's `base_url` wins.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub global_actions: BTreeMap<String, bool>,
    #[serde(default)]
    pub actions: Vec<ActionManifest>,
    #[serde(default)]
    pub triggers: Vec<TriggerManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldManifest {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    /// Item type of an `array` field.
    #[serde(default)]
    pub items: Option<String>,
    /// Allowed values of an `enum` field.
    #[serde(default)]
    pub variants: Vec<String>,
    /// Fixed value of a `const` field.
    #[serde(default)]
    pub value: Option<Value>,
}

fn default_field_type() -> String {
    "any".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionManifest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute URL or path, with `{field}` placeholders filled from the request.
    pub endpoint: String,
    #[serde(default)]
    pub request: Vec<FieldManifest>,
    #[serde(default)]
    pub response: Vec<FieldManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchRule {
    /// Dotted path into the inbound payload, e.g. `aspect.type`.
    pub field: String,
    pub equals: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationManifest {
    #[serde(default = "default_registration_method")]
    pub method: String,
    pub endpoint: String,
    /// Body key that carries the webhook URL.
    #[serde(default = "default_url_field")]
    pub url_field: String,
}

fn default_registration_method() -> String {
    "POST".to_string()
}

fn default_url_field() -> String {
    "callback_url".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerManifest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default, rename = "match")]
    pub match_rules: Vec<MatchRule>,
    /// Dotted path whose value identifies the vendor connection.
    #[serde(default)]
    pub connection_field: Option<String>,
    #[serde(default)]
    pub register: Option<RegistrationManifest>,
    #[serde(default)]
    pub payload: Vec<FieldManifest>,
    #[serde(default)]
    pub config: Vec<FieldManifest>,
}

impl FieldManifest {
    fn field_type(&self) -> Result<FieldType> {
        match self.kind.as_str() {
            "array" | "list" => {
                let items = self.items.as_deref().unwrap_or("any");
                let item = FieldType::from_name(items)
                    .ok_or_else(|| anyhow!("field '{}': unknown item type '{}'", self.name, items))?;
                Ok(FieldType::Array(Box::new(item)))
            }
            "enum" => {
                if self.variants.is_empty() {
                    bail!("field '{}': enum without variants", self.name);
                }
                Ok(FieldType::Enum {
                    name: title_case(&self.name).replace(' ', ""),
                    variants: self.variants.clone(),
                })
            }
            "const" => {
                let value = self
                    .value
                    .clone()
                    .ok_or_else(|| anyhow!("field '{}': const without value", self.name))?;
                Ok(FieldType::Const(value))
            }
            other => FieldType::from_name(other)
                .ok_or_else(|| anyhow!("field '{}': unknown type '{}'", self.name, other)),
        }
    }

    pub fn to_field_spec(&self) -> Result<FieldSpec> {
        let kind = self.field_type()?;
        let mut spec = if self.required {
            FieldSpec::required(&self.name, kind)
        } else {
            match &self.default {
                Some(value) => FieldSpec::optional(&self.name, kind).with_default(value.clone()),
                None => FieldSpec::optional(&self.name, kind),
            }
        };
        if let Some(description) = &self.description {
            spec = spec.describe(description);
        }
        Ok(spec)
    }
}

fn field_specs(fields: &[FieldManifest]) -> Result<Vec<FieldSpec>> {
    fields.iter().map(FieldManifest::to_field_spec).collect()
}

impl ToolManifest {
    pub fn parse(text: &str) -> Result<Self> {
        let manifest: ToolManifest = toml::from_str(text).context("invalid tool manifest")?;
        validate_segment("tool name", &manifest.name)?;
        manifest.semver()?;
        Ok(manifest)
    }

    pub fn semver(&self) -> Result<semver::Version> {
        semver::Version::parse(self.version.trim_start_matches('v'))
            .map_err(|e| anyhow!("Invalid version '{}' for tool {}: {}", self.version, self.name, e))
    }

    pub fn into_descriptor(self, tenant: &str, source: ToolSource, client: &reqwest::Client) -> Result<ToolDescriptor> {
        let base_url = self.base_url.clone();
        let mut builder = ToolDescriptor::builder(&self.name)
            .tenant(tenant)
            .version(&self.version)
            .source(source)
            .global_actions(global::enabled(&self.global_actions));
        if let Some(description) = &self.description {
            builder = builder.description(description);
        }

        for action in self.actions {
            let mut spec = ActionSpec::new(
                &action.name,
                action.display_name.clone().unwrap_or_else(|| action.name.clone()),
            )
            .tags(action.tags.clone())
            .scopes(action.required_scopes.clone())
            .request(field_specs(&action.request).with_context(|| format!("action {}", action.name))?)
            .response(field_specs(&action.response).with_context(|| format!("action {}", action.name))?);
            if let Some(description) = &action.description {
                spec = spec.description(description);
            }
            let handler = HttpAction::new(spec, &action.method, &action.endpoint, base_url.clone(), client.clone())
                .with_context(|| format!("action {}", action.name))?;
            builder = builder.action(Arc::new(handler));
        }

        for trigger in self.triggers {
            let mut spec = TriggerSpec::new(
                &trigger.name,
                trigger.display_name.clone().unwrap_or_else(|| trigger.name.clone()),
            )
            .payload(field_specs(&trigger.payload).with_context(|| format!("trigger {}", trigger.name))?)
            .config(field_specs(&trigger.config).with_context(|| format!("trigger {}", trigger.name))?)
            .instructions(&trigger.instructions);
            if let Some(description) = &trigger.description {
                spec = spec.description(description);
            }
            let handler = HttpTrigger::new(
                spec,
                trigger.match_rules,
                trigger.connection_field,
                trigger.register,
                base_url.clone(),
                client.clone(),
            )
            .with_context(|| format!("trigger {}", trigger.name))?;
            builder = builder.trigger(Arc::new(handler));
        }

        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::descriptor::DEFAULT_TENANT;
    use serde_json::json;

    const SAMPLE: &str = r#"
name = "Strava"
version = "1.2.0"
description = "Activities and athletes"
base_url = "https://www.strava.com/api/v3"

[global_actions]
get_tool_description = true
list_all_actions = false

[[actions]]
name = "GetActivity"
display_name = "Get Activity"
tags = ["activities"]
endpoint = "/activities/{activity_id}"

[[actions.request]]
name = "activity_id"
type = "integer"
required = true

[[actions.request]]
name = "include_all_efforts"
type = "boolean"
default = true

[[actions.request]]
name = "units"
type = "enum"
variants = ["metric", "imperial"]

[[triggers]]
name = "ActivityCreated"
connection_field = "owner_id"

[[triggers.match]]
field = "object_type"
equals = "activity"
"#;

    #[test]
    fn manifest_becomes_a_descriptor() {
        let manifest = ToolManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.semver().unwrap(), semver::Version::new(1, 2, 0));

        let tool = manifest
            .into_descriptor(DEFAULT_TENANT, ToolSource::Builtin, &reqwest::Client::new())
            .unwrap();
        assert_eq!(tool.name(), "strava");
        assert_eq!(tool.identifier(), "strava_default");
        assert!(tool.action("strava_get_activity").is_some());
        assert!(tool.action("strava_get_tool_description").is_some());
        assert!(tool.action("strava_list_all_actions").is_none());
        assert!(tool.trigger("strava_activity_created").is_some());

        let doc = tool.schema_document().unwrap();
        let params = &doc["Actions"][0]["parameters"]["properties"];
        let order: Vec<&String> = params.as_object().unwrap().keys().collect();
        assert_eq!(order, vec!["activity_id", "units", "include_all_efforts"]);
        assert_eq!(params["units"]["enum"], json!(["metric", "imperial"]));
    }

    #[test]
    fn field_manifest_conversion() {
        let field: FieldManifest = toml::from_str("name = \"ids\"\ntype = \"array\"\nitems = \"integer\"\n").unwrap();
        let spec = field.to_field_spec().unwrap();
        assert_eq!(spec.kind, FieldType::Array(Box::new(FieldType::Integer)));
        assert!(!spec.is_required());

        let bad: FieldManifest = toml::from_str("name = \"x\"\ntype = \"tuple\"\n").unwrap();
        assert!(bad.to_field_spec().is_err());
    }

    #[test]
    fn invalid_names_and_versions_are_rejected() {
        assert!(ToolManifest::parse("name = \"../etc\"\nversion = \"1.0.0\"\n").is_err());
        assert!(ToolManifest::parse("name = \"ok\"\nversion = \"one\"\n").is_err());
        assert!(ToolManifest::parse("name = \"ok\"\nversion = \"v0.3.1\"\n").is_ok());
    }
}
