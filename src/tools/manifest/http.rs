use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;
use tracing::{debug, info};

use super::{MatchRule, RegistrationManifest};
use crate::tools::action::{Action, ActionSpec, AuthContext};
use crate::tools::schema::{ParsedRequest, parse_request};
use crate::tools::trigger::{ConvertedPayload, Trigger, TriggerSpec, WebhookError};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("static regex"));

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fills `{field}` placeholders, consuming the fields it uses.
fn fill_placeholders(template: &str, fields: &mut Map<String, Value>) -> Result<String> {
    let mut missing = Vec::new();
    let filled = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        match fields.remove(&caps[1]) {
            Some(value) if !value.is_null() => plain(&value),
            _ => {
                missing.push(caps[1].to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        bail!("missing value for endpoint placeholder(s): {}", missing.join(", "));
    }
    Ok(filled.into_owned())
}

fn resolve_url(
    endpoint: &str,
    base_url: Option<&str>,
    auth: &AuthContext,
    fields: &mut Map<String, Value>,
) -> Result<String> {
    let endpoint = fill_placeholders(endpoint, fields)?;
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint);
    }
    let base = auth
        .get("base_url")
        .and_then(Value::as_str)
        .or(base_url)
        .ok_or_else(|| anyhow!("no base_url configured for relative endpoint '{}'", endpoint))?;
    Ok(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    ))
}

/// Applies the `headers` and `query_params` decorations of the auth context.
fn decorate(mut request: reqwest::RequestBuilder, auth: &AuthContext) -> reqwest::RequestBuilder {
    if let Some(Value::Object(headers)) = auth.get("headers") {
        for (name, value) in headers {
            request = request.header(name.as_str(), plain(value));
        }
    }
    if let Some(Value::Object(params)) = auth.get("query_params") {
        let pairs: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), plain(v))).collect();
        request = request.query(&pairs);
    }
    request
}

async fn read_body(response: reqwest::Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Action backed by a single HTTP call to the vendor API.
pub struct HttpAction {
    spec: ActionSpec,
    method: Method,
    endpoint: String,
    base_url: Option<String>,
    client: reqwest::Client,
}

impl HttpAction {
    pub fn new(
        spec: ActionSpec,
        method: &str,
        endpoint: &str,
        base_url: Option<String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", method))?;
        Ok(Self {
            spec,
            method,
            endpoint: endpoint.to_string(),
            base_url,
            client,
        })
    }
}

#[async_trait]
impl Action for HttpAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, request: ParsedRequest, auth: &AuthContext) -> Result<Value> {
        let mut fields = request.into_inner();
        let url = resolve_url(&self.endpoint, self.base_url.as_deref(), auth, &mut fields)?;
        fields.retain(|_, value| !value.is_null());

        let mut outgoing = decorate(self.client.request(self.method.clone(), &url), auth);
        if self.method == Method::GET || self.method == Method::DELETE {
            let pairs: Vec<(String, String)> = fields.iter().map(|(k, v)| (k.clone(), plain(v))).collect();
            outgoing = outgoing.query(&pairs);
        } else {
            if let Some(Value::Object(extra)) = auth.get("request_body") {
                for (key, value) in extra {
                    fields.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            outgoing = outgoing.json(&fields);
        }

        debug!("{} {} for action {}", self.method, url, self.spec.name);
        let response = outgoing
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        Ok(json!({
            "status_code": status.as_u16(),
            "success": status.is_success(),
            "data": read_body(response).await,
        }))
    }
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |node, key| node.get(key))
}

/// Trigger matched by field equality rules, registered with a single HTTP call.
pub struct HttpTrigger {
    spec: TriggerSpec,
    rules: Vec<MatchRule>,
    connection_field: Option<String>,
    register: Option<RegistrationManifest>,
    base_url: Option<String>,
    client: reqwest::Client,
}

impl HttpTrigger {
    pub fn new(
        spec: TriggerSpec,
        rules: Vec<MatchRule>,
        connection_field: Option<String>,
        register: Option<RegistrationManifest>,
        base_url: Option<String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        if let Some(register) = &register {
            Method::from_bytes(register.method.to_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method '{}'", register.method))?;
        }
        Ok(Self {
            spec,
            rules,
            connection_field,
            register,
            base_url,
            client,
        })
    }
}

#[async_trait]
impl Trigger for HttpTrigger {
    fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    fn check_and_convert(&self, payload: &Value) -> Result<Option<ConvertedPayload>> {
        let matched = self
            .rules
            .iter()
            .all(|rule| lookup(payload, &rule.field) == Some(&rule.equals));
        if !matched {
            return Ok(None);
        }

        let mut connection_data = Map::new();
        if let Some(path) = &self.connection_field {
            let value = lookup(payload, path)
                .ok_or_else(|| anyhow!("payload has no '{}' to identify the connection", path))?;
            let key = path.rsplit('.').next().unwrap_or(path);
            connection_data.insert(key.to_string(), value.clone());
        }

        let projected = parse_request(&format!("{}Payload", self.spec.name), &self.spec.payload, payload)?;
        Ok(Some(ConvertedPayload {
            connection_data: Value::Object(connection_data),
            payload: projected.to_value(),
        }))
    }

    async fn set_webhook_url(
        &self,
        auth: &AuthContext,
        webhook_url: &str,
        config: ParsedRequest,
    ) -> Result<Value, WebhookError> {
        let register = self.register.as_ref().ok_or_else(|| {
            anyhow!("trigger '{}' does not support webhook registration", self.spec.name)
        })?;
        let method = Method::from_bytes(register.method.to_uppercase().as_bytes())
            .map_err(|e| anyhow!("invalid HTTP method '{}': {}", register.method, e))?;

        let mut body = config.into_inner();
        let url = resolve_url(&register.endpoint, self.base_url.as_deref(), auth, &mut body)?;
        body.retain(|_, value| !value.is_null());
        if let Some(Value::Object(extra)) = auth.get("request_body") {
            for (key, value) in extra {
                body.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        body.insert(register.url_field.clone(), json!(webhook_url));

        let response = decorate(self.client.request(method, &url), auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("webhook registration at {} failed: {}", url, e))?;
        let status = response.status();
        let data = read_body(response).await;
        if status.is_success() {
            info!("Registered webhook {} for trigger {}", webhook_url, self.spec.name);
            return Ok(data);
        }
        let text = plain(&data);
        if status == StatusCode::CONFLICT || text.to_lowercase().contains("already exists") {
            return Err(WebhookError::AlreadyExists(text));
        }
        Err(WebhookError::Other(anyhow!(
            "webhook registration at {} returned {}: {}",
            url,
            status,
            text
        )))
    }
}
