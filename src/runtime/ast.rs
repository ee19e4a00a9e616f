//! Syntax tree of the traced language.

use std::collections::BTreeSet;
use std::rc::Rc;

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`: every target receives the same value
    Assign { targets: Vec<Target>, value: Expr },
    AugAssign { target: Target, op: BinOp, value: Expr },
    If { branches: Vec<IfBranch>, orelse: Option<Block> },
    While { test: Expr, body: Block },
    For { target: Target, iter: Expr, body: Block },
    FunctionDef(Rc<FunctionDef>),
    ClassDef { name: String, base: Option<Expr>, body: Block },
    Return(Option<Expr>),
    Break,
    Continue,
    Pass,
    Global(Vec<String>),
    Import(String),
    Raise(Option<Expr>),
    Assert { test: Expr, msg: Option<Expr> },
    Delete(Vec<Target>),
    Try {
        body: Block,
        handlers: Vec<ExceptHandler>,
        orelse: Option<Block>,
        finalbody: Option<Block>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub line: u32,
    pub test: Expr,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub line: u32,
    /// Exception class expression; `None` catches everything
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    pub line: u32,
    /// Names bound anywhere in the body, parameters included, minus
    /// `global` declarations. Reads of these never fall through to globals.
    pub locals: BTreeSet<String>,
}

impl FunctionDef {
    pub fn new(name: String, params: Vec<Param>, body: Block, line: u32) -> Self {
        let mut locals: BTreeSet<String> = params.iter().map(|p| p.name.clone()).collect();
        let mut globals = BTreeSet::new();
        collect_bindings(&body, &mut locals, &mut globals);
        locals.retain(|name| !globals.contains(name));
        Self {
            name,
            params,
            body,
            line,
            locals,
        }
    }
}

/// Names a block binds in its own scope; nested function and class bodies
/// have scopes of their own and are not entered.
fn collect_bindings(block: &[Stmt], bound: &mut BTreeSet<String>, globals: &mut BTreeSet<String>) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    target_names(target, bound);
                }
            }
            StmtKind::AugAssign { target, .. } => target_names(target, bound),
            StmtKind::For { target, body, .. } => {
                target_names(target, bound);
                collect_bindings(body, bound, globals);
            }
            StmtKind::While { body, .. } => collect_bindings(body, bound, globals),
            StmtKind::If { branches, orelse } => {
                for branch in branches {
                    collect_bindings(&branch.body, bound, globals);
                }
                if let Some(block) = orelse {
                    collect_bindings(block, bound, globals);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bindings(body, bound, globals);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        bound.insert(name.clone());
                    }
                    collect_bindings(&handler.body, bound, globals);
                }
                for block in [orelse, finalbody].into_iter().flatten() {
                    collect_bindings(block, bound, globals);
                }
            }
            StmtKind::FunctionDef(def) => {
                bound.insert(def.name.clone());
            }
            StmtKind::ClassDef { name, .. } => {
                bound.insert(name.clone());
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    target_names(target, bound);
                }
            }
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            _ => {}
        }
    }
}

fn target_names(target: &Target, bound: &mut BTreeSet<String>) {
    match target {
        Target::Name(name) => {
            bound.insert(name.clone());
        }
        Target::Unpack(targets) => {
            for target in targets {
                target_names(target, bound);
            }
        }
        Target::Attribute { .. } | Target::Subscript { .. } => {}
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    Unpack(Vec<Target>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr {
        expr: Expr,
        /// `!r` conversion
        repr: bool,
        spec: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Target,
    pub iter: Expr,
    pub conds: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Constant),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    BinOp { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare { left: Box<Expr>, ops: Vec<(CmpOp, Expr)> },
    Call { func: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    Slice { lower: Option<Box<Expr>>, upper: Option<Box<Expr>>, step: Option<Box<Expr>> },
    IfExp { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr> },
    Lambda(Rc<FunctionDef>),
    ListComp { elt: Box<Expr>, generators: Vec<Comprehension> },
    DictComp { key: Box<Expr>, value: Box<Expr>, generators: Vec<Comprehension> },
    FString(Vec<FStringPart>),
}

impl Expr {
    pub fn str(s: &str) -> Expr {
        Expr::Constant(Constant::Str(Rc::from(s)))
    }
}
