use crate::codegen::{Emitted, EmitterTable, SlotResolver};
use crate::document::MAX_NESTING;
use crate::error::{BlocksError, BlocksResult};
use crate::lexer::{is_ident_part, is_ident_start, is_reserved_word};
use crate::model::{BlockId, BlockInstance, Fragment, Precedence, Program};
use std::collections::HashSet;

/// What to do when a value slot has nothing plugged into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedSlotPolicy {
    /// Substitute the emitter's default fragment.
    #[default]
    Fill,
    Fail,
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub indent: String,
    pub slot_policy: UnresolvedSlotPolicy,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            indent: "  ".to_string(),
            slot_policy: UnresolvedSlotPolicy::Fill,
        }
    }
}

/// Generates sketch source for `program` with the p5 emitters.
pub fn generate(program: &Program, options: &GeneratorOptions) -> BlocksResult<String> {
    generate_with(program, &EmitterTable::p5(), options)
}

#[tracing::instrument(
    skip_all,
    fields(blocks = program.len(), roots = program.top_level().len())
)]
pub fn generate_with(
    program: &Program,
    table: &EmitterTable,
    options: &GeneratorOptions,
) -> BlocksResult<String> {
    let mut walker = Walker {
        program,
        table,
        options,
        path: Vec::new(),
        nesting: 0,
        names: NameDb::default(),
        emitted: 0,
    };
    for variable in program.variables() {
        walker.names.variable(&variable.name, table);
    }

    let mut body = String::new();
    for root in program.top_level() {
        body.push_str(&walker.chain(root)?);
    }
    tracing::debug!(emitted = walker.emitted, "generated sketch source");

    if walker.names.declared.is_empty() {
        return Ok(body);
    }
    let declared = walker
        .names
        .declared
        .iter()
        .map(|(_, ident)| ident.as_str())
        .collect::<Vec<_>>();
    Ok(format!("var {};\n{}", declared.join(", "), body))
}

struct Walker<'a> {
    program: &'a Program,
    table: &'a EmitterTable,
    options: &'a GeneratorOptions,
    path: Vec<BlockId>,
    nesting: usize,
    names: NameDb,
    emitted: usize,
}

impl<'a> Walker<'a> {
    /// Emits `first` and every block after it along `next` links, flat.
    fn chain(&mut self, first: &BlockId) -> BlocksResult<String> {
        let depth = self.path.len();
        let mut code = String::new();
        let mut current = Some(first);
        while let Some(id) = current {
            self.enter(id)?;
            let block = self.block(id)?;
            match self.emit(block)? {
                Emitted::Statement(text) => code.push_str(&text),
                Emitted::Expression(fragment) => {
                    code.push_str(&fragment.code);
                    code.push_str(";\n");
                }
            }
            current = block.next.as_ref();
        }
        self.path.truncate(depth);
        Ok(code)
    }

    fn expression(&mut self, id: &BlockId, parent: &BlockInstance) -> BlocksResult<Fragment> {
        self.enter(id)?;
        let block = self.block(id)?;
        let fragment = match self.emit(block)? {
            Emitted::Expression(fragment) => fragment,
            Emitted::Statement(_) => {
                return Err(BlocksError::document(format!(
                    "statement block '{}' ({}) is plugged into a value input of '{}'",
                    block.id, block.block_type, parent.id
                )))
            }
        };
        self.path.pop();
        Ok(fragment)
    }

    fn emit(&mut self, block: &'a BlockInstance) -> BlocksResult<Emitted> {
        let emit = self
            .table
            .get(&block.block_type)
            .ok_or_else(|| BlocksError::UnknownBlockType {
                block: block.id.to_string(),
                block_type: block.block_type.clone(),
            })?;
        tracing::trace!(block = %block.id, block_type = %block.block_type, "emit");
        self.emitted += 1;
        emit(block, &mut BlockScope { walker: self, block })
    }

    fn enter(&mut self, id: &BlockId) -> BlocksResult<()> {
        if self.path.contains(id) {
            return Err(BlocksError::cyclic(id.as_str()));
        }
        self.path.push(id.clone());
        Ok(())
    }

    fn descend(&mut self, parent: &BlockInstance) -> BlocksResult<()> {
        if self.nesting >= MAX_NESTING {
            return Err(BlocksError::document(format!(
                "block '{}' nests inputs more than {} levels deep",
                parent.id, MAX_NESTING
            )));
        }
        self.nesting += 1;
        Ok(())
    }

    fn block(&self, id: &BlockId) -> BlocksResult<&'a BlockInstance> {
        let program = self.program;
        program
            .get(id)
            .ok_or_else(|| BlocksError::document(format!("link to missing block '{}'", id)))
    }

    fn indent(&self, code: &str) -> String {
        let mut out = String::with_capacity(code.len());
        for line in code.split_inclusive('\n') {
            if line != "\n" {
                out.push_str(&self.options.indent);
            }
            out.push_str(line);
        }
        out
    }
}

/// The resolver handed to one block's emitter.
struct BlockScope<'w, 'a> {
    walker: &'w mut Walker<'a>,
    block: &'a BlockInstance,
}

impl SlotResolver for BlockScope<'_, '_> {
    fn value(&mut self, slot: &str, outer: Precedence, default: &str) -> BlocksResult<String> {
        let Some(child) = self.block.values.get(slot) else {
            return match self.walker.options.slot_policy {
                UnresolvedSlotPolicy::Fill => Ok(default.to_string()),
                UnresolvedSlotPolicy::Fail => Err(BlocksError::UnresolvedSlot {
                    block: self.block.id.to_string(),
                    slot: slot.to_string(),
                }),
            };
        };
        self.walker.descend(self.block)?;
        let fragment = self.walker.expression(child, self.block);
        self.walker.nesting -= 1;
        Ok(fragment?.wrapped_for(outer))
    }

    fn statement(&mut self, slot: &str) -> BlocksResult<String> {
        match self.block.statements.get(slot) {
            Some(first) => {
                self.walker.descend(self.block)?;
                let body = self.walker.chain(first);
                self.walker.nesting -= 1;
                Ok(self.walker.indent(&body?))
            }
            None => Ok(String::new()),
        }
    }

    fn fresh_name(&mut self, base: &str) -> String {
        self.walker.names.distinct(base, self.walker.table)
    }

    fn variable(&mut self, name: &str) -> String {
        self.walker.names.variable(name, self.walker.table)
    }
}

/// Hands out identifiers. Workspace variables keep one identifier for the whole program.
#[derive(Default)]
struct NameDb {
    declared: Vec<(String, String)>,
    taken: HashSet<String>,
}

impl NameDb {
    fn variable(&mut self, name: &str, table: &EmitterTable) -> String {
        if let Some((_, ident)) = self.declared.iter().find(|(n, _)| n == name) {
            return ident.clone();
        }
        let ident = self.distinct(&safe_name(name), table);
        self.declared.push((name.to_string(), ident.clone()));
        ident
    }

    fn distinct(&mut self, base: &str, table: &EmitterTable) -> String {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.taken.contains(&candidate)
            || table.is_reserved(&candidate)
            || is_reserved_word(&candidate)
        {
            n += 1;
            candidate = format!("{}{}", base, n);
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

fn safe_name(name: &str) -> String {
    let mut out = name
        .trim()
        .chars()
        .map(|c| if is_ident_part(c) { c } else { '_' })
        .collect::<String>();
    if out.is_empty() {
        return "unnamed".to_string();
    }
    if !out.chars().next().is_some_and(is_ident_start) {
        out.insert_str(0, "my_");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(program: &mut Program, value: &str) -> BlockId {
        let id = program.add_block("math_number");
        program.set_field(&id, "NUM", value).unwrap();
        id
    }

    fn generate_default(program: &Program) -> BlocksResult<String> {
        generate(program, &GeneratorOptions::default())
    }

    #[test]
    fn single_canvas_block() {
        let mut program = Program::new();
        let canvas = program.add_block("p5_create_canvas");
        let width = number(&mut program, "200");
        let height = number(&mut program, "200");
        program.connect_value(&canvas, "width", &width).unwrap();
        program.connect_value(&canvas, "height", &height).unwrap();
        program.add_top_level(&canvas).unwrap();
        assert_eq!(generate_default(&program).unwrap(), "createCanvas(200, 200);\n");
    }

    #[test]
    fn unconnected_value_slot_is_filled() {
        let mut program = Program::new();
        let point = program.add_block("p5_point");
        let y = program.add_block("variables_get");
        program.set_field(&y, "VAR", "y").unwrap();
        program.connect_value(&point, "y", &y).unwrap();
        program.add_top_level(&point).unwrap();
        assert_eq!(generate_default(&program).unwrap(), "var y;\npoint(0, y);\n");
    }

    #[test]
    fn strict_policy_reports_unresolved_slot() {
        let mut program = Program::new();
        let point = program.add_block("p5_point");
        program.add_top_level(&point).unwrap();
        let options = GeneratorOptions {
            slot_policy: UnresolvedSlotPolicy::Fail,
            ..GeneratorOptions::default()
        };
        let err = generate(&program, &options).unwrap_err();
        assert!(matches!(err, BlocksError::UnresolvedSlot { ref slot, .. } if slot == "x"));
    }

    #[test]
    fn chained_statements_keep_link_order() {
        let mut program = Program::new();
        let background = program.add_block("p5_background");
        let shade = number(&mut program, "220");
        program.connect_value(&background, "NAME", &shade).unwrap();
        let point = program.add_block("p5_point");
        program.connect_next(&background, &point).unwrap();
        program.add_top_level(&background).unwrap();
        assert_eq!(
            generate_default(&program).unwrap(),
            "background(220);\npoint(0, 0);\n"
        );
    }

    #[test]
    fn top_level_roots_follow_document_order() {
        let mut program = Program::new();
        let stroke = program.add_block("p5_no_stroke");
        let fill = program.add_block("p5_no_fill");
        program.add_top_level(&fill).unwrap();
        program.add_top_level(&stroke).unwrap();
        assert_eq!(generate_default(&program).unwrap(), "noFill();\nnoStroke();\n");
    }

    #[test]
    fn nested_bodies_are_indented() {
        let mut program = Program::new();
        let draw = program.add_block("p5_draw");
        let repeat = program.add_block("controls_repeat_ext");
        let times = number(&mut program, "3");
        program.connect_value(&repeat, "TIMES", &times).unwrap();
        let ellipse = program.add_block("p5_ellipse");
        let x = program.add_block("p5_mouse_x");
        program.connect_value(&ellipse, "x", &x).unwrap();
        program.connect_statement(&repeat, "DO", &ellipse).unwrap();
        program.connect_statement(&draw, "statements", &repeat).unwrap();
        program.add_top_level(&draw).unwrap();
        assert_eq!(
            generate_default(&program).unwrap(),
            "draw = function() {\n  for (var count = 0; count < 3; count++) {\n    ellipse(mouseX, 0, 0, 0);\n  }\n};\n"
        );
    }

    #[test]
    fn every_reachable_block_is_emitted_once() {
        let mut program = Program::new();
        let setup = program.add_block("p5_setup");
        let canvas = program.add_block("p5_create_canvas");
        let rect = program.add_block("p5_rect");
        let sum = program.add_block("math_arithmetic");
        let a = number(&mut program, "1");
        let b = number(&mut program, "2");
        program.connect_value(&sum, "A", &a).unwrap();
        program.connect_value(&sum, "B", &b).unwrap();
        program.connect_value(&rect, "width", &sum).unwrap();
        program.connect_next(&canvas, &rect).unwrap();
        program.connect_statement(&setup, "statements", &canvas).unwrap();
        program.add_top_level(&setup).unwrap();

        let code = generate_default(&program).unwrap();
        assert_eq!(code.matches("createCanvas(").count(), 1);
        assert_eq!(code.matches("rect(").count(), 1);
        assert!(code.contains("createCanvas(400, 400);"));
        assert!(code.contains("rect(0, 0, 1 + 2, 0, 0);"));
    }

    #[test]
    fn next_cycle_is_detected() {
        let mut program = Program::new();
        let a = program.add_block("p5_no_fill");
        let b = program.add_block("p5_no_stroke");
        program.connect_next(&a, &b).unwrap();
        program.connect_next(&b, &a).unwrap();
        program.add_top_level(&a).unwrap();
        let err = generate_default(&program).unwrap_err();
        assert!(matches!(err, BlocksError::CyclicGraph { ref block } if block == a.as_str()));
    }

    #[test]
    fn value_cycle_is_detected() {
        let mut program = Program::new();
        let point = program.add_block("p5_point");
        let sum = program.add_block("math_arithmetic");
        let negate = program.add_block("math_arithmetic");
        program.connect_value(&point, "x", &sum).unwrap();
        program.connect_value(&sum, "A", &negate).unwrap();
        program.connect_value(&negate, "B", &sum).unwrap();
        program.add_top_level(&point).unwrap();
        assert!(matches!(
            generate_default(&program),
            Err(BlocksError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn statement_cycle_is_detected() {
        let mut program = Program::new();
        let repeat = program.add_block("controls_repeat_ext");
        let inner = program.add_block("p5_no_fill");
        program.connect_statement(&repeat, "DO", &inner).unwrap();
        program.connect_next(&inner, &repeat).unwrap();
        program.add_top_level(&repeat).unwrap();
        assert!(matches!(
            generate_default(&program),
            Err(BlocksError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn unknown_block_type_fails() {
        let mut program = Program::new();
        let mystery = program.add_block("p5_teapot");
        program.add_top_level(&mystery).unwrap();
        assert!(matches!(
            generate_default(&program),
            Err(BlocksError::UnknownBlockType { .. })
        ));
    }

    #[test]
    fn loose_expression_becomes_statement() {
        let mut program = Program::new();
        let x = program.add_block("p5_mouse_x");
        program.add_top_level(&x).unwrap();
        assert_eq!(generate_default(&program).unwrap(), "mouseX;\n");
    }

    #[test]
    fn variables_avoid_drawing_names() {
        let mut program = Program::new();
        program.declare_variable("width", None);
        program.declare_variable("2 fast", None);
        let set = program.add_block("variables_set");
        program.set_field(&set, "VAR", "width").unwrap();
        let get = program.add_block("variables_get");
        program.set_field(&get, "VAR", "2 fast").unwrap();
        program.connect_value(&set, "VALUE", &get).unwrap();
        program.add_top_level(&set).unwrap();
        assert_eq!(
            generate_default(&program).unwrap(),
            "var width2, my_2_fast;\nwidth2 = my_2_fast;\n"
        );
    }

    #[test]
    fn nesting_beyond_the_document_limit_is_refused() {
        let build = |levels: usize| {
            let mut program = Program::new();
            let point = program.add_block("p5_point");
            let mut parent = point.clone();
            let mut slot = "x";
            for _ in 0..levels {
                let negate = program.add_block("math_single");
                program.set_field(&negate, "OP", "NEG").unwrap();
                program.connect_value(&parent, slot, &negate).unwrap();
                parent = negate;
                slot = "NUM";
            }
            program.add_top_level(&point).unwrap();
            program
        };

        let code = generate_default(&build(MAX_NESTING - 1)).unwrap();
        assert!(code.starts_with("point(-"));

        let err = generate_default(&build(MAX_NESTING + 1)).unwrap_err();
        assert!(err.to_string().contains("levels deep"));
    }
}
