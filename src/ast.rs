use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number {
        pos: Position,
        value: f64,
    },
    String {
        pos: Position,
        value: String,
    },
    Bool {
        pos: Position,
        value: bool,
    },
    Null {
        pos: Position,
    },
    Undefined {
        pos: Position,
    },
    Ident {
        pos: Position,
        name: String,
    },
    Member {
        pos: Position,
        object: Box<Expr>,
        property: String,
    },
    Call {
        pos: Position,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        pos: Position,
        op: String,
        operand: Box<Expr>,
    },
    Binary {
        pos: Position,
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        pos: Position,
        op: String,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update {
        pos: Position,
        op: String,
        prefix: bool,
        target: Box<Expr>,
    },
    Conditional {
        pos: Position,
        condition: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    Function {
        pos: Position,
        name: Option<String>,
        params: Vec<String>,
        body: Rc<Vec<Statement>>,
    },
}

impl Expr {
    pub fn pos(&self) -> Position {
        match self {
            Expr::Number { pos, .. }
            | Expr::String { pos, .. }
            | Expr::Bool { pos, .. }
            | Expr::Null { pos }
            | Expr::Undefined { pos }
            | Expr::Ident { pos, .. }
            | Expr::Member { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Assign { pos, .. }
            | Expr::Update { pos, .. }
            | Expr::Conditional { pos, .. }
            | Expr::Function { pos, .. } => *pos,
        }
    }

    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Ident { .. } | Expr::Member { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Var {
        pos: Position,
        decls: Vec<(String, Option<Expr>)>,
    },
    Expr {
        pos: Position,
        expr: Expr,
    },
    If {
        pos: Position,
        condition: Expr,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    While {
        pos: Position,
        condition: Expr,
        body: Vec<Statement>,
    },
    For {
        pos: Position,
        init: Option<Box<Statement>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Statement>,
    },
    Return {
        pos: Position,
        value: Option<Expr>,
    },
    Break {
        pos: Position,
    },
    Continue {
        pos: Position,
    },
    Block {
        pos: Position,
        body: Vec<Statement>,
    },
    Empty {
        pos: Position,
    },
}

impl Statement {
    pub fn pos(&self) -> Position {
        match self {
            Statement::Var { pos, .. }
            | Statement::Expr { pos, .. }
            | Statement::If { pos, .. }
            | Statement::While { pos, .. }
            | Statement::For { pos, .. }
            | Statement::Return { pos, .. }
            | Statement::Break { pos }
            | Statement::Continue { pos }
            | Statement::Block { pos, .. }
            | Statement::Empty { pos } => *pos,
        }
    }
}

/// A parsed sketch body, ready to be invoked with the drawing-context binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub body: Vec<Statement>,
}
