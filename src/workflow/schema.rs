/// Node parameter schema
///
/// Static definitions for every node kind: label, description, typed
/// parameters and named outputs. Served to the editor and used by save-time
/// validation.

use crate::workflow::types::NodeKind;
use serde::Serialize;
use serde_json::Value;

/// Primitive parameter types understood by the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Json,
    Boolean,
}

impl ParamType {
    /// Whether a JSON value is acceptable for this parameter type
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Json => true,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::Json => "JSON",
            ParamType::Boolean => "a boolean",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
}

impl ParamSpec {
    const fn new(name: &'static str, param_type: ParamType) -> Self {
        Self {
            name,
            param_type,
            required: false,
            default: None,
            description: None,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn default_value(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    const fn describe(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDefinition {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub label: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<&'static str>>,
}

impl NodeKind {
    pub fn definition(self) -> NodeDefinition {
        use ParamType::{Json, String};

        let (label, description, params, outputs) = match self {
            NodeKind::ManualTrigger => ("Manual Trigger", "Starts a workflow manually.", vec![], None),
            NodeKind::CronTrigger => (
                "Cron Trigger",
                "Schedule workflow execution with cron.",
                vec![ParamSpec::new("cronExpression", String)
                    .required()
                    .describe("Standard 5-field cron expression.")],
                None,
            ),
            NodeKind::WebhookTrigger => (
                "Webhook Trigger",
                "Start workflow from an incoming webhook request.",
                vec![
                    ParamSpec::new("path", String)
                        .required()
                        .describe("Webhook path (without /api/webhooks/ prefix)."),
                    ParamSpec::new("method", String).default_value("POST"),
                ],
                None,
            ),
            NodeKind::HttpRequest => (
                "HTTP Request",
                "Perform an HTTP request.",
                vec![
                    ParamSpec::new("method", String).default_value("GET"),
                    ParamSpec::new("url", String).required(),
                    ParamSpec::new("headers", Json),
                    ParamSpec::new("query", Json),
                    ParamSpec::new("body", Json),
                    ParamSpec::new("authType", String).describe("basic or bearer"),
                    ParamSpec::new("authUsername", String),
                    ParamSpec::new("authPassword", String),
                    ParamSpec::new("authToken", String),
                ],
                None,
            ),
            NodeKind::Code => (
                "Code",
                "Run Lua to transform items.",
                vec![ParamSpec::new("code", String)
                    .required()
                    .describe("Lua: function(items) return items end")],
                None,
            ),
            NodeKind::If => (
                "IF",
                "Conditional branching.",
                vec![
                    ParamSpec::new("field", String)
                        .required()
                        .describe("Field to check (dot notation)."),
                    ParamSpec::new("operator", String)
                        .default_value("equals")
                        .describe("equals | notEquals | exists"),
                    ParamSpec::new("value", Json).describe("Value to compare."),
                ],
                Some(vec!["true", "false"]),
            ),
            NodeKind::Set => (
                "Set",
                "Set or overwrite fields on every item.",
                vec![ParamSpec::new("fields", Json)
                    .required()
                    .describe("Object of fields to set.")],
                None,
            ),
        };

        NodeDefinition {
            kind: self,
            label,
            description,
            params,
            outputs,
        }
    }
}

/// Definitions for every compiled-in node kind
pub fn node_definitions() -> Vec<NodeDefinition> {
    NodeKind::ALL.iter().map(|kind| kind.definition()).collect()
}
