use crate::ast::Position;
use crate::interp::RuntimeError;

pub type BlocksResult<T> = Result<T, BlocksError>;

#[derive(thiserror::Error, Debug)]
pub enum BlocksError {
    #[error("cyclic block graph: block '{block}' is reachable from itself")]
    CyclicGraph { block: String },

    #[error("unresolved slot '{slot}' on block '{block}'")]
    UnresolvedSlot { block: String, slot: String },

    #[error("unknown block type '{block_type}' (block '{block}')")]
    UnknownBlockType { block: String, block_type: String },

    #[error("generation error: {message} (line {line}, column {column})")]
    Generation {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("document error: {0}")]
    Document(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("rewrite rule error: {0}")]
    Rule(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BlocksError {
    pub fn cyclic(block: impl Into<String>) -> Self {
        Self::CyclicGraph {
            block: block.into(),
        }
    }

    pub fn generation(message: impl Into<String>, pos: Position) -> Self {
        Self::Generation {
            message: message.into(),
            line: pos.line,
            column: pos.column,
        }
    }

    pub fn document(msg: impl Into<String>) -> Self {
        Self::Document(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn rule(msg: impl Into<String>) -> Self {
        Self::Rule(msg.into())
    }

    pub fn is_generation(&self) -> bool {
        matches!(self, Self::Generation { .. })
    }
}
