//! 외부 프런트엔드(파서 + 시맨틱 분석)가 넘겨주는 구문 트리
//!
//! 컴파일러는 이 트리가 이미 검증되었다고 가정합니다: 모든 이름은 해석되었고 모든 식은 타입이 맞습니다.

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Fn(FnDecl),
    /// 최상위 문장. 컴파일러는 함수 선언만 사용합니다.
    Stmt(Stmt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_type: Option<TypeRef>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Int,
    Float,
    Bool,
    String,
    Char,
    Void,
    Null,
    Array(Box<TypeRef>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    /// 세미콜론 없는 마지막 식 (블록의 값)
    pub tail: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Block),
    Let {
        name: String,
        ty: Option<TypeRef>,
        init: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    /// `target[index] = value;`
    IndexAssign {
        target: Expr,
        index: Expr,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Block,
        /// `else { ... }` 또는 `else if ...`
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Char(u8),
    Null,
    Var(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    Block(Block),
    If {
        cond: Box<Expr>,
        then: Block,
        else_branch: Option<Box<Expr>>,
    },
    Array(Vec<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

// ========== 트리 생성 헬퍼 ==========
//
// 파서 없이 트리를 조립할 때 (임베딩, 테스트) 사용합니다.

impl Expr {
    pub fn int(v: i64) -> Self {
        Expr::Int(v)
    }

    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_string())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: callee.to_string(),
            args,
        }
    }

    pub fn index(target: Expr, index: Expr) -> Self {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    pub fn if_else(cond: Expr, then: Block, else_branch: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then,
            else_branch: Some(Box::new(else_branch)),
        }
    }
}

impl Stmt {
    pub fn let_(name: &str, ty: TypeRef, init: Expr) -> Self {
        Stmt::Let {
            name: name.to_string(),
            ty: Some(ty),
            init: Some(init),
        }
    }

    pub fn assign(name: &str, value: Expr) -> Self {
        Stmt::Assign {
            name: name.to_string(),
            value,
        }
    }

    pub fn index_assign(target: Expr, index: Expr, value: Expr) -> Self {
        Stmt::IndexAssign {
            target,
            index,
            value,
        }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return(Some(value))
    }

    pub fn if_(cond: Expr, then: Block, else_branch: Option<Stmt>) -> Self {
        Stmt::If {
            cond,
            then,
            else_branch: else_branch.map(Box::new),
        }
    }

    pub fn while_(cond: Expr, body: Block) -> Self {
        Stmt::While { cond, body }
    }
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts, tail: None }
    }

    pub fn with_tail(stmts: Vec<Stmt>, tail: Expr) -> Self {
        Self {
            stmts,
            tail: Some(Box::new(tail)),
        }
    }
}

impl FnDecl {
    pub fn new(name: &str, params: Vec<(&str, TypeRef)>, ret_type: Option<TypeRef>, body: Block) -> Self {
        Self {
            name: name.to_string(),
            params: params
                .into_iter()
                .map(|(name, ty)| Param {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
            ret_type,
            body,
        }
    }
}

impl Program {
    pub fn new(functions: Vec<FnDecl>) -> Self {
        Self {
            items: functions.into_iter().map(Item::Fn).collect(),
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FnDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Fn(f) => Some(f),
            Item::Stmt(_) => None,
        })
    }
}
