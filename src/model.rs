use crate::error::{BlocksError, BlocksResult};
use crate::schema::{checks_compatible, SchemaRegistry, SlotKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockInstance {
    pub id: BlockId,
    pub block_type: String,
    pub fields: BTreeMap<String, String>,
    pub values: BTreeMap<String, BlockId>,
    pub statements: BTreeMap<String, BlockId>,
    pub next: Option<BlockId>,
    pub position: Option<(f64, f64)>,
    pub shadow: bool,
}

impl BlockInstance {
    fn new(id: BlockId, block_type: &str) -> Self {
        Self {
            id,
            block_type: block_type.to_string(),
            fields: BTreeMap::new(),
            values: BTreeMap::new(),
            statements: BTreeMap::new(),
            next: None,
            position: None,
            shadow: false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// All outgoing links, value slots first, then statement slots, then `next`.
    pub fn children(&self) -> impl Iterator<Item = &BlockId> {
        self.values
            .values()
            .chain(self.statements.values())
            .chain(self.next.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: Option<String>,
    pub name: String,
}

/// JavaScript operator ordering used to decide when an embedded fragment needs parentheses.
/// Lower binds tighter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
    Atomic = 0,
    Member = 2,
    FunctionCall = 4,
    Unary = 8,
    Multiplicative = 10,
    Additive = 12,
    Relational = 16,
    Equality = 18,
    LogicalAnd = 26,
    LogicalOr = 28,
    Conditional = 30,
    Assignment = 32,
    None = 99,
}

impl Precedence {
    /// Whether a fragment of precedence `self` must be parenthesised inside a context that
    /// requires `outer`.
    pub fn needs_parens_in(self, outer: Precedence) -> bool {
        if outer > self {
            return false;
        }
        !(outer == self && matches!(outer, Precedence::Atomic | Precedence::None))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub code: String,
    pub precedence: Precedence,
}

impl Fragment {
    pub fn new(code: impl Into<String>, precedence: Precedence) -> Self {
        Self {
            code: code.into(),
            precedence,
        }
    }

    pub fn atomic(code: impl Into<String>) -> Self {
        Self::new(code, Precedence::Atomic)
    }

    pub fn wrapped_for(&self, outer: Precedence) -> String {
        if self.precedence.needs_parens_in(outer) {
            format!("({})", self.code)
        } else {
            self.code.clone()
        }
    }
}

/// A block workspace: an arena of block instances plus the ordered top-level roots.
#[derive(Debug, Clone, Default)]
pub struct Program {
    blocks: BTreeMap<BlockId, BlockInstance>,
    top_level: Vec<BlockId>,
    variables: Vec<Variable>,
    ordinal: usize,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block_type: &str) -> BlockId {
        let id = self.new_block_id(block_type);
        self.blocks
            .insert(id.clone(), BlockInstance::new(id.clone(), block_type));
        id
    }

    pub fn add_block_with_id(&mut self, id: &str, block_type: &str) -> BlocksResult<BlockId> {
        let id = BlockId::new(id);
        if self.blocks.contains_key(&id) {
            return Err(BlocksError::document(format!("duplicate block id '{}'", id)));
        }
        self.blocks
            .insert(id.clone(), BlockInstance::new(id.clone(), block_type));
        Ok(id)
    }

    pub fn add_top_level(&mut self, id: &BlockId) -> BlocksResult<()> {
        self.require(id)?;
        if !self.top_level.contains(id) {
            self.top_level.push(id.clone());
        }
        Ok(())
    }

    pub fn set_field(&mut self, id: &BlockId, name: &str, value: &str) -> BlocksResult<()> {
        self.require_mut(id)?
            .fields
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn set_position(&mut self, id: &BlockId, x: f64, y: f64) -> BlocksResult<()> {
        self.require_mut(id)?.position = Some((x, y));
        Ok(())
    }

    pub fn set_shadow(&mut self, id: &BlockId, shadow: bool) -> BlocksResult<()> {
        self.require_mut(id)?.shadow = shadow;
        Ok(())
    }

    pub fn connect_value(&mut self, parent: &BlockId, slot: &str, child: &BlockId) -> BlocksResult<()> {
        self.require(child)?;
        self.require_mut(parent)?
            .values
            .insert(slot.to_string(), child.clone());
        Ok(())
    }

    pub fn connect_statement(
        &mut self,
        parent: &BlockId,
        slot: &str,
        child: &BlockId,
    ) -> BlocksResult<()> {
        self.require(child)?;
        self.require_mut(parent)?
            .statements
            .insert(slot.to_string(), child.clone());
        Ok(())
    }

    pub fn connect_next(&mut self, previous: &BlockId, next: &BlockId) -> BlocksResult<()> {
        self.require(next)?;
        self.require_mut(previous)?.next = Some(next.clone());
        Ok(())
    }

    pub fn declare_variable(&mut self, name: &str, id: Option<&str>) {
        if self.variables.iter().any(|v| v.name == name) {
            return;
        }
        self.variables.push(Variable {
            id: id.map(ToString::to_string),
            name: name.to_string(),
        });
    }

    pub fn get(&self, id: &BlockId) -> Option<&BlockInstance> {
        self.blocks.get(id)
    }

    pub fn top_level(&self) -> &[BlockId] {
        &self.top_level
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockInstance> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Checks the structural invariants: every link resolves, every block has exactly one
    /// parent unless it is top-level, and nothing is reachable from itself.
    pub fn validate(&self) -> BlocksResult<()> {
        let mut parents: HashMap<&BlockId, &BlockId> = HashMap::new();
        for block in self.blocks.values() {
            for child in block.children() {
                if !self.blocks.contains_key(child) {
                    return Err(BlocksError::document(format!(
                        "block '{}' links to missing block '{}'",
                        block.id, child
                    )));
                }
                if let Some(other) = parents.insert(child, &block.id) {
                    return Err(BlocksError::document(format!(
                        "block '{}' is connected to both '{}' and '{}'",
                        child, other, block.id
                    )));
                }
            }
        }
        for root in &self.top_level {
            if let Some(parent) = parents.get(root) {
                return Err(BlocksError::document(format!(
                    "top-level block '{}' is also connected to '{}'",
                    root, parent
                )));
            }
        }

        let mut reached = HashSet::new();
        let mut stack = self.top_level.iter().collect::<Vec<_>>();
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(block) = self.blocks.get(id) {
                stack.extend(block.children());
            }
        }
        for id in self.blocks.keys() {
            if reached.contains(id) {
                continue;
            }
            if parents.contains_key(id) {
                return Err(BlocksError::cyclic(id.as_str()));
            }
            return Err(BlocksError::document(format!(
                "block '{}' is neither top-level nor connected",
                id
            )));
        }
        Ok(())
    }

    /// Checks every block against its declared shape in `registry`.
    pub fn validate_against(&self, registry: &SchemaRegistry) -> BlocksResult<()> {
        for block in self.blocks.values() {
            let Some(block_type) = registry.get(&block.block_type) else {
                return Err(BlocksError::UnknownBlockType {
                    block: block.id.to_string(),
                    block_type: block.block_type.clone(),
                });
            };
            for (name, value) in &block.fields {
                let kind = block_type.field(name).ok_or_else(|| {
                    BlocksError::document(format!(
                        "block '{}' ({}) has no field '{}'",
                        block.id, block.block_type, name
                    ))
                })?;
                kind.validate(value).map_err(|msg| {
                    BlocksError::document(format!(
                        "field '{}' of block '{}': {}",
                        name, block.id, msg
                    ))
                })?;
            }
            for (slot, child_id) in &block.values {
                let check = match block_type.slot(slot).map(|s| &s.kind) {
                    Some(SlotKind::Value { check }) => check,
                    _ => {
                        return Err(BlocksError::document(format!(
                            "block '{}' ({}) has no value input '{}'",
                            block.id, block.block_type, slot
                        )))
                    }
                };
                let child = self.require(child_id)?;
                let output = registry
                    .get(&child.block_type)
                    .and_then(|t| t.output.as_ref());
                match output {
                    Some(output) if checks_compatible(check, output) => {}
                    Some(_) => {
                        return Err(BlocksError::document(format!(
                            "block '{}' ({}) does not fit input '{}' of '{}'",
                            child.id, child.block_type, slot, block.id
                        )))
                    }
                    None => {
                        return Err(BlocksError::document(format!(
                            "statement block '{}' cannot plug into value input '{}' of '{}'",
                            child.id, slot, block.id
                        )))
                    }
                }
            }
            for (slot, child_id) in &block.statements {
                if !matches!(
                    block_type.slot(slot).map(|s| &s.kind),
                    Some(SlotKind::Statement { .. })
                ) {
                    return Err(BlocksError::document(format!(
                        "block '{}' ({}) has no statement input '{}'",
                        block.id, block.block_type, slot
                    )));
                }
                self.require_statement(registry, child_id, &block.id)?;
            }
            if let Some(next) = &block.next {
                if !block_type.has_next() {
                    return Err(BlocksError::document(format!(
                        "block '{}' ({}) cannot be followed by another block",
                        block.id, block.block_type
                    )));
                }
                self.require_statement(registry, next, &block.id)?;
            }
        }
        Ok(())
    }

    fn require_statement(
        &self,
        registry: &SchemaRegistry,
        id: &BlockId,
        parent: &BlockId,
    ) -> BlocksResult<()> {
        let child = self.require(id)?;
        let fits = registry
            .get(&child.block_type)
            .map(|t| t.previous_statement)
            .unwrap_or(false);
        if fits {
            Ok(())
        } else {
            Err(BlocksError::document(format!(
                "block '{}' ({}) cannot be stacked under '{}'",
                child.id, child.block_type, parent
            )))
        }
    }

    fn require(&self, id: &BlockId) -> BlocksResult<&BlockInstance> {
        self.blocks
            .get(id)
            .ok_or_else(|| BlocksError::document(format!("missing block '{}'", id)))
    }

    fn require_mut(&mut self, id: &BlockId) -> BlocksResult<&mut BlockInstance> {
        self.blocks
            .get_mut(id)
            .ok_or_else(|| BlocksError::document(format!("missing block '{}'", id)))
    }

    fn new_block_id(&mut self, block_type: &str) -> BlockId {
        loop {
            self.ordinal += 1;
            let digest = format!(
                "{:x}",
                md5::compute(format!("{}:{}", block_type, self.ordinal))
            );
            let id = BlockId::new(&digest[..20]);
            if !self.blocks.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas_then_point() -> (Program, BlockId, BlockId) {
        let mut program = Program::new();
        let canvas = program.add_block("p5_create_canvas");
        let width = program.add_block("math_number");
        program.set_field(&width, "NUM", "200").unwrap();
        program.connect_value(&canvas, "width", &width).unwrap();
        let point = program.add_block("p5_point");
        program.connect_next(&canvas, &point).unwrap();
        program.add_top_level(&canvas).unwrap();
        (program, canvas, point)
    }

    #[test]
    fn generated_ids_are_stable_and_unique() {
        let mut a = Program::new();
        let mut b = Program::new();
        let a1 = a.add_block("math_number");
        let a2 = a.add_block("math_number");
        let b1 = b.add_block("math_number");
        assert_eq!(a1, b1);
        assert_ne!(a1, a2);
        assert_eq!(a1.as_str().len(), 20);
    }

    #[test]
    fn precedence_wrapping() {
        let sum = Fragment::new("a + b", Precedence::Additive);
        assert_eq!(sum.wrapped_for(Precedence::Multiplicative), "(a + b)");
        assert_eq!(sum.wrapped_for(Precedence::Additive), "(a + b)");
        assert_eq!(sum.wrapped_for(Precedence::None), "a + b");
        let atom = Fragment::atomic("42");
        assert_eq!(atom.wrapped_for(Precedence::Atomic), "42");
        assert_eq!(atom.wrapped_for(Precedence::Unary), "42");
    }

    #[test]
    fn validate_accepts_well_formed_program() {
        let (program, _, _) = canvas_then_point();
        program.validate().unwrap();
        let registry = SchemaRegistry::builtin().unwrap();
        program.validate_against(&registry).unwrap();
    }

    #[test]
    fn validate_rejects_shared_child() {
        let (mut program, _, point) = canvas_then_point();
        let other = program.add_block("p5_no_stroke");
        program.add_top_level(&other).unwrap();
        program.connect_next(&other, &point).unwrap();
        let err = program.validate().unwrap_err();
        assert!(err.to_string().contains("connected to both"));
    }

    #[test]
    fn validate_detects_cycle() {
        let (mut program, _, _) = canvas_then_point();
        let a = program.add_block("p5_no_fill");
        let b = program.add_block("p5_no_stroke");
        program.connect_next(&a, &b).unwrap();
        program.connect_next(&b, &a).unwrap();
        let err = program.validate().unwrap_err();
        assert!(matches!(err, BlocksError::CyclicGraph { .. }));
    }

    #[test]
    fn validate_rejects_orphans() {
        let (mut program, _, _) = canvas_then_point();
        program.add_block("p5_no_fill");
        let err = program.validate().unwrap_err();
        assert!(err.to_string().contains("neither top-level nor connected"));
    }

    #[test]
    fn schema_validation_catches_bad_shapes() {
        let registry = SchemaRegistry::builtin().unwrap();

        let (mut program, _, point) = canvas_then_point();
        let colour = program.add_block("colour_picker");
        program.set_field(&colour, "COLOUR", "#112233").unwrap();
        program.connect_value(&point, "x", &colour).unwrap();
        let err = program.validate_against(&registry).unwrap_err();
        assert!(err.to_string().contains("does not fit input 'x'"));

        let (mut program, canvas, _) = canvas_then_point();
        program.set_field(&canvas, "DEPTH", "3").unwrap();
        assert!(program.validate_against(&registry).is_err());

        let mut program = Program::new();
        let mystery = program.add_block("p5_teapot");
        program.add_top_level(&mystery).unwrap();
        assert!(matches!(
            program.validate_against(&registry),
            Err(BlocksError::UnknownBlockType { .. })
        ));
    }
}
