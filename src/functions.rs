use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A host function the assistant may call, in the shape chat back-ends expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: FunctionParameters,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: FunctionParameters::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a required parameter; its description lands inside the schema.
    pub fn with_parameter(mut self, parameter: FunctionParameter) -> Self {
        let FunctionParameter {
            name,
            mut schema,
            description,
        } = parameter;

        if let (Some(description), Some(object)) = (description, schema.as_object_mut()) {
            object.insert("description".to_string(), Value::String(description));
        }
        self.parameters.required.push(name.clone());
        self.parameters.properties.insert(name, schema);
        self
    }

    pub fn to_tool(&self) -> Tool {
        Tool::from(self.clone())
    }
}

/// JSON-schema object describing a function's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties", skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
}

impl Default for FunctionParameters {
    fn default() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: Some(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionParameter {
    pub name: String,
    pub schema: Value,
    pub description: Option<String>,
}

impl FunctionParameter {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: ToolCallType,
    pub function: FunctionDefinition,
}

impl From<FunctionDefinition> for Tool {
    fn from(function: FunctionDefinition) -> Self {
        Self {
            kind: ToolCallType::Function,
            function,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallType {
    #[default]
    Function,
}

/// A function invocation as emitted by a model.
///
/// `raw_arguments` holds the argument text exactly as the back-end produced
/// it. It may not be valid JSON; `arguments` is `Value::Null` in that case and
/// the problem is reported when the call is dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
    pub raw_arguments: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// Builds a call from argument text, keeping the text verbatim.
    pub fn from_raw(name: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            name: name.into(),
            arguments: serde_json::from_str(&raw).unwrap_or(Value::Null),
            raw_arguments: Some(raw),
        }
    }

    /// The argument text sent over the wire.
    pub fn arguments_json(&self) -> String {
        match &self.raw_arguments {
            Some(raw) => raw.clone(),
            None => self.arguments.to_string(),
        }
    }

    /// The arguments as a JSON value, strictly re-reading the raw text when
    /// there is one.
    pub fn arguments_value(&self) -> Result<Value, serde_json::Error> {
        match &self.raw_arguments {
            Some(raw) => serde_json::from_str(raw),
            None => Ok(self.arguments.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    pub id: Option<String>,
    pub kind: ToolCallType,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(function: FunctionCall) -> Self {
        Self {
            id: None,
            kind: ToolCallType::Function,
            function,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

// Back-ends send arguments as a JSON-encoded string.
#[derive(Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: ToolCallType,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

impl From<WireToolCall> for ToolCall {
    fn from(wire: WireToolCall) -> Self {
        Self {
            id: wire.id,
            kind: wire.kind,
            function: FunctionCall::from_raw(
                wire.function.name,
                wire.function.arguments.unwrap_or_default(),
            ),
        }
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            kind: call.kind,
            function: WireFunctionCall {
                arguments: Some(call.function.arguments_json()),
                name: call.function.name,
            },
        }
    }
}

pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema.schema).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    None,
    Auto,
    Required,
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self::Auto
    }
}
