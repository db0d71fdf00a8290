//! Fixtures shared by the tool module tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::action::{Action, ActionSpec, AuthContext, ExecutionMeta};
use super::schema::{FieldSpec, FieldType, ParsedRequest};
use super::trigger::{ConvertedPayload, Trigger, TriggerSpec, WebhookError};

pub struct EchoAction {
    spec: ActionSpec,
    tag: String,
}

impl EchoAction {
    pub fn new(name: &str) -> Self {
        Self {
            spec: ActionSpec::new(name, name)
                .request(vec![FieldSpec::optional("text", FieldType::String)]),
            tag: "echo".into(),
        }
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_request(mut self, fields: Vec<FieldSpec>) -> Self {
        self.spec.request = fields;
        self
    }
}

#[async_trait]
impl Action for EchoAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        Ok(json!({ "echo": request.to_value(), "tag": self.tag }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    Execute,
    WithMeta(ExecutionMeta),
}

pub struct RecordingAction {
    spec: ActionSpec,
    calls: Mutex<Vec<CallKind>>,
}

impl RecordingAction {
    pub fn new(name: &str, with_meta: bool) -> Self {
        let mut spec = ActionSpec::new(name, name);
        spec.requires_execution_metadata = with_meta;
        Self {
            spec,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CallKind> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Action for RecordingAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, _request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        self.calls.lock().unwrap().push(CallKind::Execute);
        Ok(json!({ "ok": true }))
    }

    async fn execute_with_meta_data(
        &self,
        _request: ParsedRequest,
        _auth: &AuthContext,
        meta: &ExecutionMeta,
    ) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push(CallKind::WithMeta(meta.clone()));
        Ok(json!({ "ok": true }))
    }
}

pub struct FailingAction {
    spec: ActionSpec,
    message: String,
}

impl FailingAction {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            spec: ActionSpec::new(name, name),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Action for FailingAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, _request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        Err(anyhow!("{}", self.message))
    }
}

pub struct PanickingAction {
    spec: ActionSpec,
}

impl PanickingAction {
    pub fn new(name: &str) -> Self {
        Self {
            spec: ActionSpec::new(name, name),
        }
    }
}

#[async_trait]
impl Action for PanickingAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, _request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        panic!("vendor client blew up");
    }
}

/// Matches when `payload[field] == value`. Counts every evaluation.
pub struct StaticTrigger {
    spec: TriggerSpec,
    field: String,
    value: Value,
    erroring: bool,
    already_registered: bool,
    evaluations: AtomicUsize,
}

impl StaticTrigger {
    pub fn new(name: &str, field: &str, value: &str) -> Self {
        Self {
            spec: TriggerSpec::new(name, name)
                .config(vec![FieldSpec::required("channel", FieldType::String)]),
            field: field.into(),
            value: json!(value),
            erroring: false,
            already_registered: false,
            evaluations: AtomicUsize::new(0),
        }
    }

    pub fn erroring(mut self) -> Self {
        self.erroring = true;
        self
    }

    pub fn already_registered(mut self) -> Self {
        self.already_registered = true;
        self
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trigger for StaticTrigger {
    fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    fn check_and_convert(&self, payload: &Value) -> Result<Option<ConvertedPayload>> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if self.erroring {
            return Err(anyhow!("payload could not be decoded"));
        }
        if payload.get(&self.field) != Some(&self.value) {
            return Ok(None);
        }
        Ok(Some(ConvertedPayload {
            connection_data: json!({ "team": payload.get("team").cloned().unwrap_or(Value::Null) }),
            payload: json!({ "converted_by": self.spec.name, "body": payload }),
        }))
    }

    async fn set_webhook_url(
        &self,
        _auth: &AuthContext,
        webhook_url: &str,
        config: ParsedRequest,
    ) -> Result<Value, WebhookError> {
        if self.already_registered {
            return Err(WebhookError::AlreadyExists(webhook_url.to_string()));
        }
        Ok(json!({ "webhook_url": webhook_url, "config": config.to_value() }))
    }
}
