// Semantic analysis (§4.6 "Analyze"): register-alias/constant scoping,
// proc signature collection, and ISA-signature checking. Produces a
// normalized statement list layout.rs can place without re-deriving any
// of this.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::artifact::{ParamKind, ProcSignature};
use crate::env::Env;
use crate::error::{CompilationError, CompilationErrorKind, Diagnostics, SourceLoc};
use crate::isa::{ArgKind, ISA};
use crate::molecule::MoleculeType;

use super::ast::{CallArgKind, Expr, Item, ParamDecl, Program, Stmt};

#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedExpr {
    Number(i64),
    TypedLiteral(MoleculeType, i64),
    Vector(Vec<i64>),
    Register(usize),
    Label(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedItem {
    Label(String),
    Directive { name: String, args: Vec<ResolvedExpr> },
    Instruction { mnemonic: String, operands: Vec<ResolvedExpr> },
    ProcStart { name: String, exported: bool },
    ProcEnd,
    ScopeStart,
    ScopeEnd,
}

#[derive(Clone, Debug)]
pub struct ResolvedStmt {
    pub item: ResolvedItem,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug, Default)]
pub struct SemanticResult {
    pub stmts: Vec<ResolvedStmt>,
    pub proc_name_to_params: HashMap<String, ProcSignature>,
    /// Flat view of every `.REG` alias seen, regardless of the scope it
    /// was declared in; tooling-only (§4.9), never consulted at runtime.
    pub register_alias_map: HashMap<String, usize>,
}

#[derive(Clone, Debug, PartialEq)]
enum Binding {
    Reg(usize),
    Const(i64),
}

fn parse_molecule_type(tag: &str) -> Result<MoleculeType, String> {
    match tag.to_ascii_uppercase().as_str() {
        "CODE" => Ok(MoleculeType::Code),
        "DATA" => Ok(MoleculeType::Data),
        "ENERGY" => Ok(MoleculeType::Energy),
        "STRUCTURE" => Ok(MoleculeType::Structure),
        other => Err(format!("unknown molecule type `{}`", other)),
    }
}

struct Analyzer {
    scope: Rc<Env<Binding>>,
    // Labels (and proc names) share one flat namespace regardless of
    // `.SCOPE` nesting, unlike register aliases and `.DEFINE` constants -
    // only the latter are genuinely lexical here.
    labels: HashSet<String>,
    proc_name_to_params: HashMap<String, ProcSignature>,
    register_alias_map: HashMap<String, usize>,
    proc_depth: usize,
}

/// Unlike the other pipeline stages, semantic analysis already loops over
/// every top-level statement, so it's the stage that accumulates a full
/// diagnostic list (§7/§9 "fail fast with a full diagnostic list") rather
/// than stopping at the first error: one malformed statement shouldn't
/// hide the next ten.
pub fn analyze(program: Program) -> Result<SemanticResult, Diagnostics> {
    let mut proc_name_to_params = HashMap::new();
    if let Err(e) = collect_proc_signatures(&program, &mut proc_name_to_params) {
        return Err(Diagnostics(vec![e]));
    }

    let mut analyzer = Analyzer {
        scope: Rc::new(Env::root()),
        labels: HashSet::new(),
        proc_name_to_params,
        register_alias_map: HashMap::new(),
        proc_depth: 0,
    };

    let mut stmts = Vec::with_capacity(program.stmts.len());
    let mut errors = Vec::new();
    for stmt in program.stmts {
        match analyzer.resolve_stmt(stmt) {
            Ok(Some(resolved)) => stmts.push(resolved),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        return Err(Diagnostics(errors));
    }
    Ok(SemanticResult {
        stmts,
        proc_name_to_params: analyzer.proc_name_to_params,
        register_alias_map: analyzer.register_alias_map,
    })
}

fn collect_proc_signatures(
    program: &Program,
    out: &mut HashMap<String, ProcSignature>,
) -> Result<(), CompilationError> {
    for stmt in &program.stmts {
        if let Item::ProcStart { name, exported, params } = &stmt.item {
            if out.contains_key(name) {
                return Err(CompilationError::new(
                    CompilationErrorKind::Redefinition(name.clone()),
                    stmt.loc.clone(),
                ));
            }
            let params = params
                .iter()
                .map(|p| match p {
                    ParamDecl::Ref(n) => (n.clone(), ParamKind::Ref),
                    ParamDecl::Val(n) => (n.clone(), ParamKind::Val),
                })
                .collect();
            out.insert(name.clone(), ProcSignature { params, exported: *exported });
        }
    }
    Ok(())
}

impl Analyzer {
    fn err(&self, kind: CompilationErrorKind, loc: &SourceLoc) -> CompilationError {
        CompilationError::new(kind, loc.clone())
    }

    fn push_scope(&mut self) {
        self.scope = Rc::new(Env::chain(&self.scope));
    }

    fn pop_scope(&mut self) {
        if let Some(parent) = self.scope.parent_handle() {
            self.scope = parent;
        }
    }

    fn declare_label(&mut self, name: &str, loc: &SourceLoc) -> Result<(), CompilationError> {
        if !self.labels.insert(name.to_string()) {
            return Err(self.err(CompilationErrorKind::LabelCollision(name.to_string()), loc));
        }
        Ok(())
    }

    fn resolve_stmt(&mut self, stmt: Stmt) -> Result<Option<ResolvedStmt>, CompilationError> {
        let loc = stmt.loc.clone();
        let item = match stmt.item {
            Item::Label(name) => {
                self.declare_label(&name, &loc)?;
                Some(ResolvedItem::Label(name))
            }
            Item::ScopeStart => {
                self.push_scope();
                Some(ResolvedItem::ScopeStart)
            }
            Item::ScopeEnd => {
                self.pop_scope();
                Some(ResolvedItem::ScopeEnd)
            }
            Item::ProcStart { name, exported, params } => {
                self.declare_label(&name, &loc)?;
                self.push_scope();
                self.proc_depth += 1;
                for (i, p) in params.iter().enumerate() {
                    let pname = match p {
                        ParamDecl::Ref(n) => n,
                        ParamDecl::Val(n) => n,
                    };
                    self.scope.define(pname, &Rc::new(Binding::Reg(crate::organism::FPR_BASE + i)));
                }
                Some(ResolvedItem::ProcStart { name, exported })
            }
            Item::ProcEnd => {
                if self.proc_depth == 0 {
                    return Err(self.err(
                        CompilationErrorKind::Parse(".ENDP without matching .PROC".into()),
                        &loc,
                    ));
                }
                self.proc_depth -= 1;
                self.pop_scope();
                Some(ResolvedItem::ProcEnd)
            }
            Item::Directive { name, args } => self.resolve_directive(name, args, &loc)?,
            Item::Instruction { mnemonic, operands } => {
                Some(self.resolve_instruction(mnemonic, operands, &loc)?)
            }
        };
        Ok(item.map(|item| ResolvedStmt { item, loc }))
    }

    fn resolve_directive(
        &mut self,
        name: String,
        args: Vec<Rc<Expr>>,
        loc: &SourceLoc,
    ) -> Result<Option<ResolvedItem>, CompilationError> {
        match name.as_str() {
            "REG" => {
                let (alias, reg) = match (args.get(0).map(|e| e.as_ref()), args.get(1).map(|e| e.as_ref())) {
                    (Some(Expr::Ident(a)), Some(Expr::Register(r))) => (a.clone(), *r),
                    _ => {
                        return Err(self.err(
                            CompilationErrorKind::BadOperand(".REG expects <name> <register>".into()),
                            loc,
                        ))
                    }
                };
                if self.scope.defined_locally(&alias) {
                    return Err(self.err(CompilationErrorKind::Redefinition(alias), loc));
                }
                self.scope.define(&alias, &Rc::new(Binding::Reg(reg)));
                self.register_alias_map.insert(alias, reg);
                Ok(None)
            }
            "DEFINE" => {
                let (alias, value) = match (args.get(0).map(|e| e.as_ref()), args.get(1).map(|e| e.as_ref())) {
                    (Some(Expr::Ident(a)), Some(Expr::Number(n))) => (a.clone(), *n),
                    _ => {
                        return Err(self.err(
                            CompilationErrorKind::BadOperand(".DEFINE expects <name> <number>".into()),
                            loc,
                        ))
                    }
                };
                if self.scope.defined_locally(&alias) {
                    return Err(self.err(CompilationErrorKind::Redefinition(alias), loc));
                }
                self.scope.define(&alias, &Rc::new(Binding::Const(value)));
                Ok(None)
            }
            "ORG" | "DIR" | "PLACE" | "REQUIRE" | "ROUTINE" => {
                let resolved = args
                    .into_iter()
                    .map(|a| self.resolve_expr_generic(a.as_ref(), loc))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(ResolvedItem::Directive { name, args: resolved }))
            }
            other => Err(self.err(CompilationErrorKind::UnknownDirective(other.to_string()), loc)),
        }
    }

    /// Resolves an expression with no ISA-signature context to guide it
    /// (directive arguments): idents are looked up as aliases/constants,
    /// anything still unresolved is assumed to be a forward label.
    fn resolve_expr_generic(&self, expr: &Expr, loc: &SourceLoc) -> Result<ResolvedExpr, CompilationError> {
        match expr {
            Expr::Number(n) => Ok(ResolvedExpr::Number(*n)),
            Expr::TypedLiteral(tag, n) => parse_molecule_type(tag)
                .map(|ty| ResolvedExpr::TypedLiteral(ty, *n))
                .map_err(|m| self.err(CompilationErrorKind::BadOperand(m), loc)),
            Expr::Vector(v) => Ok(ResolvedExpr::Vector(v.clone())),
            Expr::Register(r) => Ok(ResolvedExpr::Register(*r)),
            Expr::Ident(name) => match self.scope.get(name).map(|b| (*b).clone()) {
                Some(Binding::Reg(r)) => Ok(ResolvedExpr::Register(r)),
                Some(Binding::Const(v)) => Ok(ResolvedExpr::Number(v)),
                None => Ok(ResolvedExpr::Label(name.clone())),
            },
            Expr::Binding(..) => Err(self.err(
                CompilationErrorKind::BadOperand("REF/VAL bracket syntax is only valid in CALL arguments".into()),
                loc,
            )),
        }
    }

    fn resolve_instruction(
        &mut self,
        mnemonic: String,
        operands: Vec<Rc<Expr>>,
        loc: &SourceLoc,
    ) -> Result<ResolvedItem, CompilationError> {
        let id = ISA.resolve_name(&mnemonic).ok_or_else(|| {
            self.err(CompilationErrorKind::UnknownOpcode(mnemonic.clone()), loc)
        })?;
        let signature = ISA.signature(id).expect("resolved id always has a signature");

        if mnemonic == "CALL" {
            return self.resolve_call(operands, loc);
        }

        if operands.len() != signature.len() {
            return Err(self.err(
                CompilationErrorKind::ArityMismatch { expected: signature.len(), got: operands.len() },
                loc,
            ));
        }

        let mut resolved = Vec::with_capacity(operands.len());
        for (expr, kind) in operands.iter().zip(signature.iter()) {
            resolved.push(self.resolve_operand(expr.as_ref(), *kind, loc)?);
        }
        Ok(ResolvedItem::Instruction { mnemonic, operands: resolved })
    }

    /// CALL has two surface syntaxes producing the same IR (§4.6): classic
    /// `CALL proc arg1 arg2 ...` (every argument a register, bound to the
    /// proc's params positionally - all REF), and explicit `CALL proc [REF
    /// r...] [VAL e...]`, which names each argument's binding kind and
    /// lets VAL arguments be a literal instead of a register.
    fn resolve_call(
        &mut self,
        operands: Vec<Rc<Expr>>,
        loc: &SourceLoc,
    ) -> Result<ResolvedItem, CompilationError> {
        let proc_name = match operands.get(0).map(|e| e.as_ref()) {
            Some(Expr::Ident(n)) => n.clone(),
            _ => {
                return Err(self.err(
                    CompilationErrorKind::BadOperand("CALL requires a proc name".into()),
                    loc,
                ))
            }
        };
        let args = &operands[1..];
        let explicit = args.iter().any(|e| matches!(e.as_ref(), Expr::Binding(..)));
        if explicit && !args.iter().all(|e| matches!(e.as_ref(), Expr::Binding(..))) {
            return Err(self.err(
                CompilationErrorKind::BadOperand(
                    "CALL cannot mix classic and bracketed REF/VAL arguments".into(),
                ),
                loc,
            ));
        }

        let sig = self.proc_name_to_params.get(&proc_name).cloned();
        if let Some(sig) = &sig {
            let got = args.len();
            if got != sig.params.len() {
                return Err(self.err(
                    CompilationErrorKind::ArityMismatch { expected: sig.params.len(), got },
                    loc,
                ));
            }
        }

        let mut resolved = vec![ResolvedExpr::Label(proc_name)];
        if explicit {
            for (i, expr) in args.iter().enumerate() {
                let (kind, inner) = match expr.as_ref() {
                    Expr::Binding(kind, inner) => (*kind, inner.as_ref()),
                    _ => unreachable!("uniformity checked above"),
                };
                if let Some(sig) = &sig {
                    let expected_kind = sig.params[i].1;
                    let matches_kind = matches!(
                        (kind, expected_kind),
                        (CallArgKind::Ref, ParamKind::Ref) | (CallArgKind::Val, ParamKind::Val)
                    );
                    if !matches_kind {
                        return Err(self.err(
                            CompilationErrorKind::BadOperand(format!(
                                "argument {} is {:?} but the proc declares {:?}",
                                i + 1,
                                kind,
                                expected_kind
                            )),
                            loc,
                        ));
                    }
                }
                resolved.push(match kind {
                    CallArgKind::Ref => self.resolve_operand(inner, ArgKind::Register, loc)?,
                    CallArgKind::Val => self.resolve_call_val_arg(inner, loc)?,
                });
            }
        } else {
            for expr in args {
                resolved.push(self.resolve_operand(expr.as_ref(), ArgKind::Register, loc)?);
            }
        }
        Ok(ResolvedItem::Instruction { mnemonic: "CALL".to_string(), operands: resolved })
    }

    /// A VAL argument binds either a register (its current value is read
    /// at call time) or a literal placed directly - unlike REF arguments,
    /// which must always be a register.
    fn resolve_call_val_arg(&self, expr: &Expr, loc: &SourceLoc) -> Result<ResolvedExpr, CompilationError> {
        match expr {
            Expr::Register(r) => Ok(ResolvedExpr::Register(*r)),
            Expr::Number(n) => Ok(ResolvedExpr::TypedLiteral(MoleculeType::Data, *n)),
            Expr::TypedLiteral(tag, n) => parse_molecule_type(tag)
                .map(|ty| ResolvedExpr::TypedLiteral(ty, *n))
                .map_err(|m| self.err(CompilationErrorKind::BadOperand(m), loc)),
            Expr::Ident(name) => match self.scope.get(name).map(|b| (*b).clone()) {
                Some(Binding::Reg(r)) => Ok(ResolvedExpr::Register(r)),
                Some(Binding::Const(v)) => Ok(ResolvedExpr::TypedLiteral(MoleculeType::Data, v)),
                None => Err(self.err(CompilationErrorKind::UndefinedSymbol(name.clone()), loc)),
            },
            other => Err(self.err(
                CompilationErrorKind::BadOperand(format!("{:?} is not a valid VAL argument", other)),
                loc,
            )),
        }
    }

    fn resolve_operand(
        &self,
        expr: &Expr,
        kind: ArgKind,
        loc: &SourceLoc,
    ) -> Result<ResolvedExpr, CompilationError> {
        match (expr, kind) {
            (Expr::Register(r), ArgKind::Register) => Ok(ResolvedExpr::Register(*r)),
            (Expr::Ident(name), ArgKind::Register) => match self.scope.get(name).map(|b| (*b).clone()) {
                Some(Binding::Reg(r)) => Ok(ResolvedExpr::Register(r)),
                _ => Err(self.err(CompilationErrorKind::UndefinedSymbol(name.clone()), loc)),
            },
            (Expr::Number(n), ArgKind::Literal) => Ok(ResolvedExpr::TypedLiteral(MoleculeType::Data, *n)),
            (Expr::TypedLiteral(tag, n), ArgKind::Literal) => parse_molecule_type(tag)
                .map(|ty| ResolvedExpr::TypedLiteral(ty, *n))
                .map_err(|m| self.err(CompilationErrorKind::BadOperand(m), loc)),
            (Expr::Ident(name), ArgKind::Literal) => match self.scope.get(name).map(|b| (*b).clone()) {
                Some(Binding::Const(v)) => Ok(ResolvedExpr::TypedLiteral(MoleculeType::Data, v)),
                _ => Err(self.err(CompilationErrorKind::UndefinedSymbol(name.clone()), loc)),
            },
            (Expr::Vector(v), ArgKind::Vector) => Ok(ResolvedExpr::Vector(v.clone())),
            (Expr::Ident(name), ArgKind::Label) => Ok(ResolvedExpr::Label(name.clone())),
            (other, kind) => Err(self.err(
                CompilationErrorKind::BadOperand(format!("{:?} does not fit a {:?} slot", other, kind)),
                loc,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{lexer::Lexer, parser::Parser};

    fn analyze_src(src: &str) -> Result<SemanticResult, Diagnostics> {
        let tokens = Lexer::new("t.asm", src).lex().unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        analyze(program)
    }

    #[test]
    fn classic_call_binds_every_arg_as_ref() {
        let src = ".PROC P REF a\nRET\n.ENDP\nCALL P %DR0\n";
        let result = analyze_src(src).unwrap();
        let call = result.stmts.iter().find_map(|s| match &s.item {
            ResolvedItem::Instruction { mnemonic, operands } if mnemonic == "CALL" => Some(operands.clone()),
            _ => None,
        });
        assert_eq!(call, Some(vec![ResolvedExpr::Label("P".into()), ResolvedExpr::Register(0)]));
    }

    #[test]
    fn explicit_call_resolves_ref_and_val_groups() {
        let src = ".PROC P REF a VAL b\nRET\n.ENDP\nCALL P [REF %DR0] [VAL DATA:7]\n";
        let result = analyze_src(src).unwrap();
        let call = result.stmts.iter().find_map(|s| match &s.item {
            ResolvedItem::Instruction { mnemonic, operands } if mnemonic == "CALL" => Some(operands.clone()),
            _ => None,
        });
        assert_eq!(
            call,
            Some(vec![
                ResolvedExpr::Label("P".into()),
                ResolvedExpr::Register(0),
                ResolvedExpr::TypedLiteral(MoleculeType::Data, 7),
            ])
        );
    }

    #[test]
    fn explicit_call_rejects_ref_val_kind_mismatch() {
        let src = ".PROC P VAL a\nRET\n.ENDP\nCALL P [REF %DR0]\n";
        assert!(analyze_src(src).is_err());
    }

    #[test]
    fn explicit_call_val_accepts_a_literal_directly() {
        let src = ".PROC P VAL a\nRET\n.ENDP\nCALL P [VAL DATA:3]\n";
        assert!(analyze_src(src).is_ok());
    }

    #[test]
    fn multiple_unknown_opcodes_all_surface_in_one_diagnostics_list() {
        let src = "FROBNICATE %DR0\nBAZZLE %DR1\n";
        let errs = analyze_src(src).unwrap_err();
        assert_eq!(errs.0.len(), 2);
    }
}
