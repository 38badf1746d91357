use crate::error::{BlocksError, BlocksResult};
use crate::model::{BlockId, BlockInstance, Program};
use crate::schema::format_num;
use std::io::Cursor;
use xmltree::{Element, EmitterConfig, XMLNode};

pub const BLOCKLY_XML_NS: &str = "https://developers.google.com/blockly/xml";

/// Value and statement inputs nest recursively; `next` chains do not count towards this.
/// Code generated from a workspace within this bound stays inside the parser's and the
/// interpreter's nesting limits.
pub const MAX_NESTING: usize = 48;

/// Parses a Blockly XML workspace. Blocks without an `id` get a generated one. The result is
/// structurally validated.
#[tracing::instrument(skip_all, fields(bytes = text.len()))]
pub fn load_xml(text: &str) -> BlocksResult<Program> {
    let root = Element::parse(Cursor::new(text.as_bytes()))
        .map_err(|e| BlocksError::document(format!("failed to parse workspace XML: {}", e)))?;
    if root.name != "xml" {
        return Err(BlocksError::document(format!(
            "expected <xml> root element, found <{}>",
            root.name
        )));
    }
    if let Some(ns) = &root.namespace {
        if ns != BLOCKLY_XML_NS {
            return Err(BlocksError::document(format!(
                "unexpected workspace namespace '{}'",
                ns
            )));
        }
    }

    let mut program = Program::new();
    for child in elements(&root) {
        match child.name.as_str() {
            "variables" => {
                for variable in elements(child).filter(|e| e.name == "variable") {
                    let name = variable.get_text().unwrap_or_default();
                    let id = variable.attributes.get("id").map(String::as_str);
                    program.declare_variable(name.trim(), id);
                }
            }
            "block" | "shadow" => {
                let first = load_chain(child, &mut program, 0)?;
                program.add_top_level(&first)?;
                if let (Some(x), Some(y)) = (
                    parse_coord(child, "x"),
                    parse_coord(child, "y"),
                ) {
                    program.set_position(&first, x, y)?;
                }
            }
            other => tracing::debug!(element = other, "skipping workspace element"),
        }
    }

    program.validate()?;
    tracing::debug!(blocks = program.len(), "loaded workspace");
    Ok(program)
}

/// Writes `program` as Blockly XML. Fails if the program does not validate.
pub fn save_xml(program: &Program) -> BlocksResult<String> {
    program.validate()?;

    let mut root = Element::new("xml");
    root.attributes
        .insert("xmlns".to_string(), BLOCKLY_XML_NS.to_string());

    if !program.variables().is_empty() {
        let mut variables = Element::new("variables");
        for variable in program.variables() {
            let mut el = Element::new("variable");
            if let Some(id) = &variable.id {
                el.attributes.insert("id".to_string(), id.clone());
            }
            el.children.push(XMLNode::Text(variable.name.clone()));
            variables.children.push(XMLNode::Element(el));
        }
        root.children.push(XMLNode::Element(variables));
    }

    for id in program.top_level() {
        let mut el = chain_element(program, id)?;
        if let Some(block) = program.get(id) {
            if let Some((x, y)) = block.position {
                el.attributes.insert("x".to_string(), format_num(x));
                el.attributes.insert("y".to_string(), format_num(y));
            }
        }
        root.children.push(XMLNode::Element(el));
    }

    let mut out = Vec::new();
    root.write_with_config(&mut out, EmitterConfig::new().perform_indent(true))
        .map_err(|e| BlocksError::document(format!("failed to write workspace XML: {}", e)))?;
    String::from_utf8(out)
        .map_err(|e| BlocksError::document(format!("workspace XML is not UTF-8: {}", e)))
}

fn elements(parent: &Element) -> impl Iterator<Item = &Element> {
    parent.children.iter().filter_map(XMLNode::as_element)
}

fn parse_coord(el: &Element, name: &str) -> Option<f64> {
    el.attributes.get(name)?.trim().parse().ok()
}

fn required_attr<'a>(el: &'a Element, name: &str) -> BlocksResult<&'a str> {
    el.attributes.get(name).map(String::as_str).ok_or_else(|| {
        BlocksError::document(format!("<{}> is missing the '{}' attribute", el.name, name))
    })
}

/// Loads `el` and every block after it along `<next>`, returning the first id.
fn load_chain(el: &Element, program: &mut Program, depth: usize) -> BlocksResult<BlockId> {
    if depth > MAX_NESTING {
        return Err(BlocksError::document(format!(
            "blocks are nested more than {} levels deep",
            MAX_NESTING
        )));
    }

    let mut current = Some(el);
    let mut first: Option<BlockId> = None;
    let mut previous: Option<BlockId> = None;
    while let Some(el) = current.take() {
        let block_type = required_attr(el, "type")?;
        let id = match el.attributes.get("id") {
            Some(id) => program.add_block_with_id(id, block_type)?,
            None => program.add_block(block_type),
        };
        if el.name == "shadow" {
            program.set_shadow(&id, true)?;
        }

        for child in elements(el) {
            match child.name.as_str() {
                "field" => {
                    let name = required_attr(child, "name")?;
                    let text = child.get_text().unwrap_or_default();
                    program.set_field(&id, name, &text)?;
                }
                "value" | "statement" => {
                    let name = required_attr(child, "name")?;
                    // A real block in an input hides the shadow behind it.
                    let attached = elements(child)
                        .find(|e| e.name == "block")
                        .or_else(|| elements(child).find(|e| e.name == "shadow"));
                    if let Some(attached) = attached {
                        let child_id = load_chain(attached, program, depth + 1)?;
                        if child.name == "value" {
                            program.connect_value(&id, name, &child_id)?;
                        } else {
                            program.connect_statement(&id, name, &child_id)?;
                        }
                    }
                }
                "next" => current = elements(child).find(|e| e.name == "block" || e.name == "shadow"),
                other => tracing::trace!(element = other, block = %id, "ignoring block child"),
            }
        }

        if let Some(previous) = &previous {
            program.connect_next(previous, &id)?;
        }
        if first.is_none() {
            first = Some(id.clone());
        }
        previous = Some(id);
    }
    first.ok_or_else(|| BlocksError::document("empty block chain"))
}

fn chain_element(program: &Program, first: &BlockId) -> BlocksResult<Element> {
    let mut chain = Vec::new();
    let mut current = Some(first);
    while let Some(id) = current {
        let block = lookup(program, id)?;
        chain.push(block_element(program, block)?);
        current = block.next.as_ref();
    }

    let mut tail: Option<Element> = None;
    while let Some(mut el) = chain.pop() {
        if let Some(after) = tail.take() {
            let mut next = Element::new("next");
            next.children.push(XMLNode::Element(after));
            el.children.push(XMLNode::Element(next));
        }
        tail = Some(el);
    }
    tail.ok_or_else(|| BlocksError::document("empty block chain"))
}

fn block_element(program: &Program, block: &BlockInstance) -> BlocksResult<Element> {
    let mut el = Element::new(if block.shadow { "shadow" } else { "block" });
    el.attributes
        .insert("type".to_string(), block.block_type.clone());
    el.attributes
        .insert("id".to_string(), block.id.to_string());

    for (name, value) in &block.fields {
        let mut field = Element::new("field");
        field.attributes.insert("name".to_string(), name.clone());
        if !value.is_empty() {
            field.children.push(XMLNode::Text(value.clone()));
        }
        el.children.push(XMLNode::Element(field));
    }
    for (tag, slots) in [("value", &block.values), ("statement", &block.statements)] {
        for (name, child) in slots {
            let mut input = Element::new(tag);
            input.attributes.insert("name".to_string(), name.clone());
            input
                .children
                .push(XMLNode::Element(chain_element(program, child)?));
            el.children.push(XMLNode::Element(input));
        }
    }
    Ok(el)
}

fn lookup<'a>(program: &'a Program, id: &BlockId) -> BlocksResult<&'a BlockInstance> {
    program
        .get(id)
        .ok_or_else(|| BlocksError::document(format!("missing block '{}'", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANVAS: &str = r#"<xml xmlns="https://developers.google.com/blockly/xml">
  <block type="p5_create_canvas" id="canvas" x="12" y="30">
    <value name="width"><block type="math_number" id="w"><field name="NUM">200</field></block></value>
  </block>
</xml>"#;

    #[test]
    fn loads_single_block() {
        let program = load_xml(CANVAS).unwrap();
        assert_eq!(program.len(), 2);
        let block = program.get(&BlockId::new("canvas")).unwrap();
        assert_eq!(block.block_type, "p5_create_canvas");
        assert_eq!(block.values.get("width"), Some(&BlockId::new("w")));
        let width = program.get(&BlockId::new("w")).unwrap();
        assert_eq!(width.field("NUM"), Some("200"));
        assert_eq!(block.position, Some((12.0, 30.0)));
        assert_eq!(program.top_level(), &[BlockId::new("canvas")]);
    }

    #[test]
    fn real_block_hides_shadow_and_next_chains_flatten() {
        let xml = r#"<xml xmlns="https://developers.google.com/blockly/xml">
  <variables><variable id="v1">y</variable></variables>
  <block type="p5_background" id="bg">
    <value name="NAME">
      <shadow type="math_number" id="s1"><field name="NUM">0</field></shadow>
      <block type="math_number" id="n1"><field name="NUM">220</field></block>
    </value>
    <next>
      <block type="p5_point" id="pt">
        <value name="x"><shadow type="math_number" id="s2"><field name="NUM">0</field></shadow></value>
        <next><block type="p5_no_fill" id="nf"/></next>
      </block>
    </next>
  </block>
</xml>"#;
        let program = load_xml(xml).unwrap();
        assert_eq!(program.len(), 5);
        let bg = program.get(&BlockId::new("bg")).unwrap();
        assert_eq!(bg.values.get("NAME"), Some(&BlockId::new("n1")));
        assert_eq!(bg.next, Some(BlockId::new("pt")));
        let pt = program.get(&BlockId::new("pt")).unwrap();
        assert_eq!(pt.next, Some(BlockId::new("nf")));
        assert!(program.get(&BlockId::new("s2")).unwrap().shadow);
        assert!(program.get(&BlockId::new("s1")).is_none());
        assert_eq!(program.variables()[0].name, "y");
        assert_eq!(program.variables()[0].id.as_deref(), Some("v1"));
    }

    #[test]
    fn missing_ids_are_generated() {
        let xml = r#"<xml><block type="p5_no_fill"/><block type="p5_no_stroke"/></xml>"#;
        let program = load_xml(xml).unwrap();
        assert_eq!(program.top_level().len(), 2);
        let a = program.top_level()[0].as_str();
        let b = program.top_level()[1].as_str();
        assert_ne!(a, b);
        assert_eq!(a.len(), 20);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn round_trip_preserves_topology() {
        let mut program = Program::new();
        program.declare_variable("speed", Some("v-speed"));
        let draw = program.add_block("p5_draw");
        let set = program.add_block("variables_set");
        let sum = program.add_block("math_arithmetic");
        let get = program.add_block("variables_get");
        let one = program.add_block("math_number");
        let text = program.add_block("text");
        let label = program.add_block("p5_text");
        program.set_field(&set, "VAR", "speed").unwrap();
        program.set_field(&sum, "OP", "ADD").unwrap();
        program.set_field(&get, "VAR", "speed").unwrap();
        program.set_field(&one, "NUM", "1").unwrap();
        program.set_field(&text, "TEXT", "").unwrap();
        program.set_shadow(&one, true).unwrap();
        program.connect_statement(&draw, "statements", &set).unwrap();
        program.connect_value(&set, "VALUE", &sum).unwrap();
        program.connect_value(&sum, "A", &get).unwrap();
        program.connect_value(&sum, "B", &one).unwrap();
        program.connect_next(&set, &label).unwrap();
        program.connect_value(&label, "message", &text).unwrap();
        program.add_top_level(&draw).unwrap();
        program.set_position(&draw, 40.0, -8.5).unwrap();

        let xml = save_xml(&program).unwrap();
        assert!(xml.contains("<shadow"));
        let loaded = load_xml(&xml).unwrap();

        assert_eq!(loaded.len(), program.len());
        assert_eq!(loaded.top_level(), program.top_level());
        assert_eq!(loaded.variables(), program.variables());
        for block in program.blocks() {
            assert_eq!(loaded.get(&block.id), Some(block));
        }
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(load_xml("<xml><block type=").is_err());
        assert!(load_xml("<workspace/>").is_err());
        assert!(load_xml(r#"<xml xmlns="urn:other"/>"#).is_err());

        let no_type = r#"<xml><block id="a"/></xml>"#;
        assert!(load_xml(no_type).unwrap_err().to_string().contains("'type'"));

        let duplicate = r#"<xml><block type="p5_no_fill" id="a"><next><block type="p5_no_fill" id="a"/></next></block></xml>"#;
        assert!(load_xml(duplicate)
            .unwrap_err()
            .to_string()
            .contains("duplicate block id"));
    }

    #[test]
    fn save_rejects_cycles() {
        let mut program = Program::new();
        let a = program.add_block("p5_no_fill");
        let b = program.add_block("p5_no_stroke");
        program.add_top_level(&a).unwrap();
        program.connect_next(&a, &b).unwrap();
        program.connect_next(&b, &a).unwrap();
        assert!(save_xml(&program).is_err());
    }
}
