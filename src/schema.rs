use crate::error::{BlocksError, BlocksResult};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

const BUILTIN_BLOCKS: &str = include_str!("blocks.json");

/// Name of the synthetic slot that stands for a block's `nextStatement` connector.
pub const NEXT_SLOT: &str = "next";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Number {
        default: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    Text {
        default: String,
    },
    Dropdown {
        options: Vec<(String, String)>,
    },
    Colour {
        default: String,
    },
    Variable {
        default: String,
    },
}

impl FieldKind {
    /// Checks a concrete field value against the declared domain of the field.
    pub fn validate(&self, value: &str) -> Result<(), String> {
        match self {
            FieldKind::Number { min, max, .. } => {
                let n = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a number", value))?;
                if !n.is_finite() {
                    return Err(format!("'{}' is not a finite number", value));
                }
                if let Some(min) = min {
                    if n < *min {
                        return Err(format!("{} is below the minimum {}", value, min));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(format!("{} is above the maximum {}", value, max));
                    }
                }
                Ok(())
            }
            FieldKind::Text { .. } => Ok(()),
            FieldKind::Dropdown { options } => {
                if options.iter().any(|(_, v)| v == value) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not one of the dropdown options", value))
                }
            }
            FieldKind::Colour { .. } => {
                if colour_re().is_match(value) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not a #rrggbb colour", value))
                }
            }
            FieldKind::Variable { .. } => {
                if value.trim().is_empty() {
                    Err("variable name cannot be empty".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn default_value(&self) -> String {
        match self {
            FieldKind::Number { default, .. } => format_num(*default),
            FieldKind::Text { default }
            | FieldKind::Colour { default }
            | FieldKind::Variable { default } => default.clone(),
            FieldKind::Dropdown { options } => options
                .first()
                .map(|(_, value)| value.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotKind {
    Field(FieldKind),
    Value { check: Vec<String> },
    Statement { check: Vec<String> },
    Next,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: String,
    pub kind: SlotKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockType {
    pub name: String,
    pub message: String,
    pub slots: Vec<Slot>,
    /// `Some` for expression blocks; the list holds the output type tags (empty = any).
    pub output: Option<Vec<String>>,
    pub previous_statement: bool,
    pub colour: Option<String>,
    pub tooltip: Option<String>,
}

impl BlockType {
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldKind> {
        match self.slot(name).map(|slot| &slot.kind) {
            Some(SlotKind::Field(kind)) => Some(kind),
            _ => None,
        }
    }

    pub fn is_expression(&self) -> bool {
        self.output.is_some()
    }

    pub fn has_next(&self) -> bool {
        self.slots.iter().any(|slot| slot.kind == SlotKind::Next)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldKind)> {
        self.slots.iter().filter_map(|slot| match &slot.kind {
            SlotKind::Field(kind) => Some((slot.name.as_str(), kind)),
            _ => None,
        })
    }
}

/// Type tags are compatible when either side is unconstrained or they share a tag.
pub fn checks_compatible(input: &[String], output: &[String]) -> bool {
    if input.is_empty() || output.is_empty() {
        return true;
    }
    input.iter().any(|tag| output.contains(tag))
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, BlockType>,
}

impl SchemaRegistry {
    pub fn builtin() -> BlocksResult<Self> {
        Self::from_json(BUILTIN_BLOCKS)
    }

    pub fn from_json(text: &str) -> BlocksResult<Self> {
        let mut registry = Self::default();
        registry.extend_from_json(text)?;
        Ok(registry)
    }

    /// Adds the definitions of a Blockly JSON array. Redefining an existing type replaces it.
    pub fn extend_from_json(&mut self, text: &str) -> BlocksResult<usize> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| BlocksError::schema(format!("invalid block definition JSON: {}", e)))?;
        let defs = root
            .as_array()
            .ok_or_else(|| BlocksError::schema("block definitions must be a JSON array"))?;
        for def in defs {
            let block_type = parse_definition(def)?;
            if self.types.contains_key(&block_type.name) {
                tracing::debug!(block_type = %block_type.name, "replacing block definition");
            }
            self.types.insert(block_type.name.clone(), block_type);
        }
        Ok(defs.len())
    }

    pub fn get(&self, name: &str) -> Option<&BlockType> {
        self.types.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(rename = "type")]
    name: String,
    #[serde(default)]
    message0: String,
    #[serde(default)]
    args0: Vec<RawArg>,
    #[serde(default)]
    tooltip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawArg {
    #[serde(rename = "field_number")]
    Number {
        name: String,
        #[serde(default)]
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    #[serde(rename = "field_input")]
    Input {
        name: String,
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "field_dropdown")]
    Dropdown {
        name: String,
        options: Vec<(String, String)>,
    },
    #[serde(rename = "field_colour")]
    Colour {
        name: String,
        #[serde(default = "default_colour")]
        colour: String,
    },
    #[serde(rename = "field_variable")]
    Variable {
        name: String,
        #[serde(default)]
        variable: String,
    },
    #[serde(rename = "input_value")]
    Value {
        name: String,
        #[serde(default)]
        check: Option<Value>,
    },
    #[serde(rename = "input_statement")]
    Statement {
        name: String,
        #[serde(default)]
        check: Option<Value>,
    },
    #[serde(rename = "input_dummy")]
    Dummy {},
}

fn default_colour() -> String {
    "#000000".to_string()
}

fn parse_definition(def: &Value) -> BlocksResult<BlockType> {
    let obj = def
        .as_object()
        .ok_or_else(|| BlocksError::schema("block definition must be a JSON object"))?;
    let raw: RawDefinition = serde_json::from_value(def.clone())
        .map_err(|e| BlocksError::schema(format!("invalid block definition: {}", e)))?;
    if raw.name.trim().is_empty() {
        return Err(BlocksError::schema("block definition has an empty type name"));
    }

    check_placeholders(&raw.name, &raw.message0, raw.args0.len())?;

    let mut slots = Vec::new();
    for arg in raw.args0 {
        let slot = match arg {
            RawArg::Number {
                name,
                value,
                min,
                max,
            } => Slot {
                name,
                kind: SlotKind::Field(FieldKind::Number {
                    default: value,
                    min,
                    max,
                }),
            },
            RawArg::Input { name, text } => Slot {
                name,
                kind: SlotKind::Field(FieldKind::Text { default: text }),
            },
            RawArg::Dropdown { name, options } => {
                if options.is_empty() {
                    return Err(BlocksError::schema(format!(
                        "dropdown '{}' on '{}' has no options",
                        name, raw.name
                    )));
                }
                Slot {
                    name,
                    kind: SlotKind::Field(FieldKind::Dropdown { options }),
                }
            }
            RawArg::Colour { name, colour } => Slot {
                name,
                kind: SlotKind::Field(FieldKind::Colour { default: colour }),
            },
            RawArg::Variable { name, variable } => Slot {
                name,
                kind: SlotKind::Field(FieldKind::Variable { default: variable }),
            },
            RawArg::Value { name, check } => Slot {
                name,
                kind: SlotKind::Value {
                    check: parse_check(&raw.name, check.as_ref())?,
                },
            },
            RawArg::Statement { name, check } => Slot {
                name,
                kind: SlotKind::Statement {
                    check: parse_check(&raw.name, check.as_ref())?,
                },
            },
            RawArg::Dummy {} => continue,
        };
        slots.push(slot);
    }

    let output = match obj.get("output") {
        Some(check) => Some(parse_check(&raw.name, Some(check))?),
        None => None,
    };
    let previous_statement = obj.contains_key("previousStatement");
    if obj.contains_key("nextStatement") {
        slots.push(Slot {
            name: NEXT_SLOT.to_string(),
            kind: SlotKind::Next,
        });
    }
    if output.is_some() && (previous_statement || obj.contains_key("nextStatement")) {
        return Err(BlocksError::schema(format!(
            "'{}' cannot have both an output and statement connectors",
            raw.name
        )));
    }

    let mut seen = HashSet::new();
    for slot in &slots {
        if !seen.insert(slot.name.as_str()) {
            return Err(BlocksError::schema(format!(
                "duplicate slot name '{}' on '{}'",
                slot.name, raw.name
            )));
        }
    }

    let colour = obj.get("colour").map(|c| match c {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    Ok(BlockType {
        name: raw.name,
        message: raw.message0,
        slots,
        output,
        previous_statement,
        colour,
        tooltip: raw.tooltip,
    })
}

fn parse_check(block: &str, check: Option<&Value>) -> BlocksResult<Vec<String>> {
    match check {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(tag)) => Ok(vec![tag.clone()]),
        Some(Value::Array(tags)) => tags
            .iter()
            .map(|tag| {
                tag.as_str().map(ToString::to_string).ok_or_else(|| {
                    BlocksError::schema(format!("type check on '{}' must hold strings", block))
                })
            })
            .collect(),
        Some(other) => Err(BlocksError::schema(format!(
            "unsupported type check {} on '{}'",
            other, block
        ))),
    }
}

fn check_placeholders(block: &str, message: &str, arg_count: usize) -> BlocksResult<()> {
    let mut referenced = HashSet::new();
    for cap in placeholder_re().captures_iter(message) {
        let index = cap[1].parse::<usize>().unwrap_or(0);
        if index == 0 || index > arg_count {
            return Err(BlocksError::schema(format!(
                "message of '{}' references %{} but only {} args are declared",
                block, index, arg_count
            )));
        }
        referenced.insert(index);
    }
    if referenced.len() != arg_count {
        return Err(BlocksError::schema(format!(
            "message of '{}' does not reference all {} args",
            block, arg_count
        )));
    }
    Ok(())
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%(\d+)").expect("placeholder pattern is valid"))
}

fn colour_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("colour pattern is valid"))
}

pub(crate) fn format_num(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{}", v.round() as i64)
    } else {
        let s = format!("{:.6}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
