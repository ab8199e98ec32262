#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expression(Expr),
    Print(Expr),
    Assign { target: AssignTarget, value: Expr },
    Block(Vec<Stmt>),
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    For { body: Vec<Stmt> },
    Break,
    Continue,
    Return { value: Option<Expr> },
    Function(Function),
    Assert { test: Expr, message: Option<Expr> },
}

/// Valid left-hand sides of `=`: a name, `t[k]`, or `t.field`.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Index { table: Expr, key: Expr },
    Field { table: Expr, name: String },
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Vec<Stmt>,
}

/// Parameters without defaults must precede defaulted ones; the parser
/// enforces this, the evaluator assumes it.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Unary {
        op: UnaryOp,
        right: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `and`/`or` live apart from Binary: the right side is evaluated lazily.
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
    },
    /// `body if test else orelse` — the untaken branch is never evaluated.
    Conditional {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        pos_args: Vec<Expr>,
        kw_args: Vec<(String, Expr)>,
    },
    Index {
        table: Box<Expr>,
        key: Box<Expr>,
    },
    /// `t.name`, sugar for `t["name"]`.
    Field {
        table: Box<Expr>,
        name: String,
    },
    Group(Box<Expr>),
    Table(Vec<TableItem>),
}

#[derive(Debug, Clone)]
pub enum Literal {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone)]
pub enum TableItem {
    /// `{v}` — keyed by the running auto-index counter (0, 1, 2, ...).
    Positional(Expr),
    /// `{name = v}` — string key.
    Named { name: String, value: Expr },
    /// `{[k] = v}` — arbitrary key expression.
    Keyed { key: Expr, value: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    NotEq,
}

impl BinaryOp {
    pub fn lexeme(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}
