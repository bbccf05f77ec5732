// Assembler AST (§4.6 "Parse"): {label, directive, instruction,
// expression}. Node/Seq/AList follow the same memory-management
// convention as the rest of the codebase's tree-shaped data (§9
// "abstract over memory management strategies").

use std::rc::Rc;

use crate::error::SourceLoc;

pub type Node<T> = Rc<T>;
pub type Seq<T> = Vec<Node<T>>;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(i64),
    /// `TYPE:number`, e.g. `DATA:7`.
    TypedLiteral(String, i64),
    /// `(n1|n2|...)`-style vector literal.
    Vector(Vec<i64>),
    Register(usize),
    Ident(String),
    /// One argument inside an explicit `CALL proc [REF r...] [VAL e...]`
    /// bracket group, tagged with which group it came from.
    Binding(CallArgKind, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallArgKind {
    Ref,
    Val,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParamDecl {
    Ref(String),
    Val(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Label(String),
    Directive { name: String, args: Seq<Expr> },
    Instruction { mnemonic: String, operands: Seq<Expr> },
    ProcStart { name: String, exported: bool, params: Vec<ParamDecl> },
    ProcEnd,
    ScopeStart,
    ScopeEnd,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub item: Item,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}
