//! Name resolution, type checking, and implicit-conversion insertion.
//!
//! The checker walks the tree once, bottom-up.  It resolves every name
//! against the scope stack, computes the type of every expression, and
//! rewrites the tree in place so that every required conversion appears as
//! an explicit cast node; the code generator never coerces on its own.
//!
//! Warnings stream through the caller's sink as they are found.  The first
//! fatal diagnostic unwinds the traversal as the `Err` variant.

use std::mem;

use derive_more::Display;

use crate::common::Id;
use crate::front::ast::*;
use crate::middle::scope::ScopeStack;
use crate::middle::types::{FnTy, Ty, ValueTy};

/// The classes of diagnostics the compiler emits.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum DiagnosticKind {
    #[display("Not defined")]
    NotDefined,
    #[display("Type error")]
    TypeError,
    #[display("Implicit type casting")]
    ImplicitCast,
}

/// One warning or error: the source line, the kind, and the pretty-printed
/// form of the offending construct.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    pub line: u32,
    pub kind: DiagnosticKind,
    pub snippet: String,
}

fn not_defined(line: u32, name: Id) -> Diagnostic {
    Diagnostic {
        line,
        kind: DiagnosticKind::NotDefined,
        snippet: name.to_string(),
    }
}

fn type_error(line: u32, snippet: impl Into<String>) -> Diagnostic {
    Diagnostic {
        line,
        kind: DiagnosticKind::TypeError,
        snippet: snippet.into(),
    }
}

/// Replace `expr` with a cast of itself to `base`.
fn cast_in_place(expr: &mut Expr, base: BaseTy) {
    let inner = mem::replace(expr, Expr::IntLit { pos: 0, value: 0 });
    *expr = Expr::Cast {
        base,
        expr: Box::new(inner),
    };
}

/// Check a whole program, decorating it with cast nodes.  Warnings go to
/// `warn` in traversal order; the first error is returned.
pub fn check(
    program: &mut Program,
    warn: &mut dyn FnMut(Diagnostic),
) -> Result<(), Diagnostic> {
    Checker {
        scopes: ScopeStack::new(),
        warn,
    }
    .program(program)
}

struct Checker<'w> {
    scopes: ScopeStack,
    warn: &'w mut dyn FnMut(Diagnostic),
}

impl Checker<'_> {
    fn warn_cast(&mut self, line: u32, snippet: String) {
        (self.warn)(Diagnostic {
            line,
            kind: DiagnosticKind::ImplicitCast,
            snippet,
        });
    }

    fn program(&mut self, program: &mut Program) -> Result<(), Diagnostic> {
        for decl in &program.decls {
            self.declaration(decl);
        }
        for func in &mut program.funcs {
            self.function(func)?;
        }
        Ok(())
    }

    /// Record every declared name.  Redeclaration is accepted; the newest
    /// entry shadows the older ones.
    fn declaration(&mut self, decl: &Declaration) {
        for d in &decl.names {
            let words = 1 + d.len.unwrap_or(0);
            let loc = self.scopes.alloc_slot(words);
            let ty = ValueTy {
                base: decl.base,
                indexed: d.len.is_some(),
            };
            self.scopes.declare(d.name, Ty::Value(ty), loc);
        }
    }

    fn function(&mut self, func: &mut Function) -> Result<(), Diagnostic> {
        let fn_ty = FnTy {
            ret: func.ret,
            params: func
                .params
                .iter()
                .map(|p| ValueTy {
                    base: p.base,
                    indexed: p.decl.len.is_some(),
                })
                .collect(),
        };
        // the name binds in the enclosing scope, so the body can recurse
        self.scopes.declare(func.name, Ty::Fn(fn_ty.clone()), 0);
        self.scopes.push_function(fn_ty);
        for (i, p) in func.params.iter().enumerate() {
            let ty = ValueTy {
                base: p.base,
                indexed: p.decl.len.is_some(),
            };
            // slot -1 below the saved frame pointer is the return address
            self.scopes.declare(p.decl.name, Ty::Value(ty), -(2 + i as i64));
        }
        // parameters and the body's own declarations share the scope
        for decl in &func.body.decls {
            self.declaration(decl);
        }
        for stmt in &mut func.body.stmts {
            self.stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<(), Diagnostic> {
        match stmt {
            Stmt::Assign(assign) => self.assign(assign),
            Stmt::Call(call) => self.call_stmt(call),
            Stmt::Return { pos, expr } => self.ret(*pos, expr),
            Stmt::While { cond, body, .. } | Stmt::DoWhile { cond, body, .. } => {
                let pos = cond.pos();
                self.condition(pos, cond, |c| format!("while({c})"))?;
                self.stmt(body)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.assign(init)?;
                let pos = init.pos;
                self.condition(pos, cond, |c| format!("for({init};{c};{step})"))?;
                self.assign(step)?;
                self.stmt(body)
            }
            Stmt::If {
                cond, then, els, ..
            } => {
                let pos = cond.pos();
                self.condition(pos, cond, |c| format!("if({c})"))?;
                self.stmt(then)?;
                if let Some(els) = els {
                    self.stmt(els)?;
                }
                Ok(())
            }
            Stmt::Switch(switch) => {
                let pos = switch.scrutinee.pos();
                self.condition(pos, &mut switch.scrutinee, |c| format!("switch({c})"))?;
                for arm in &mut switch.arms {
                    for stmt in &mut arm.stmts {
                        self.stmt(stmt)?;
                    }
                }
                Ok(())
            }
            Stmt::Block(block) => {
                self.scopes.push_block();
                for decl in &block.decls {
                    self.declaration(decl);
                }
                for stmt in &mut block.stmts {
                    self.stmt(stmt)?;
                }
                self.scopes.pop();
                Ok(())
            }
            Stmt::Empty { .. } => Ok(()),
        }
    }

    /// A tested expression must be a scalar; a float test is coerced to an
    /// integer with a warning.  `snippet` renders the construct around the
    /// (not yet coerced) expression.
    fn condition(
        &mut self,
        pos: u32,
        cond: &mut Expr,
        snippet: impl Fn(&Expr) -> String,
    ) -> Result<(), Diagnostic> {
        let ty = self.expr(cond)?;
        let value = self.expect_scalar(&ty, pos, &cond.to_string())?;
        if value.base == BaseTy::Float {
            let text = snippet(cond);
            self.warn_cast(pos, text);
            cast_in_place(cond, BaseTy::Int);
        }
        Ok(())
    }

    fn assign(&mut self, assign: &mut Assign) -> Result<(), Diagnostic> {
        let lhs = self.scopes.lookup_type(assign.name).cloned();
        let rhs = self.expr(&mut assign.expr)?;
        match &mut assign.index {
            None => {
                let lhs = lhs.ok_or_else(|| not_defined(assign.pos, assign.name))?;
                let left = match lhs {
                    Ty::Value(v) if v.indexed => {
                        return Err(type_error(assign.pos, format!("{} is an array", assign.name)))
                    }
                    Ty::Fn(_) => {
                        return Err(type_error(
                            assign.pos,
                            format!("{} is a function", assign.name),
                        ))
                    }
                    Ty::Value(v) => v,
                };
                let right = self.expect_scalar(&rhs, assign.pos, &assign.expr.to_string())?;
                if left.base != right.base {
                    self.warn_cast(assign.pos, assign.to_string());
                    cast_in_place(&mut assign.expr, left.base);
                }
            }
            Some(index) => {
                let index_ty = self.expr(index)?;
                let lhs = lhs.ok_or_else(|| not_defined(assign.pos, assign.name))?;
                let left = match lhs {
                    Ty::Value(v) if v.indexed => v,
                    _ => {
                        return Err(type_error(
                            assign.pos,
                            format!("{} is not an array", assign.name),
                        ))
                    }
                };
                let index_value = self.expect_scalar(&index_ty, assign.pos, &index.to_string())?;
                if index_value.base != BaseTy::Int {
                    let text = format!("{}[{index}]", assign.name);
                    self.warn_cast(assign.pos, text);
                    cast_in_place(index, BaseTy::Int);
                }
                let right = self.expect_scalar(&rhs, assign.pos, &assign.expr.to_string())?;
                if left.base != right.base {
                    self.warn_cast(assign.pos, assign.to_string());
                    cast_in_place(&mut assign.expr, left.base);
                }
            }
        }
        Ok(())
    }

    fn ret(&mut self, pos: u32, expr: &mut Option<Expr>) -> Result<(), Diagnostic> {
        let Some(expr) = expr else {
            return Err(type_error(pos, "Should return a value"));
        };
        let ty = self.expr(expr)?;
        let value = self.expect_scalar(&ty, pos, &expr.to_string())?;
        let ret = self
            .scopes
            .current_fn()
            .expect("return statement outside a function")
            .ret;
        if value.base != ret {
            self.warn_cast(pos, format!("return {expr};"));
            cast_in_place(expr, ret);
        }
        Ok(())
    }

    /// `printf` and `scanf` are recognized here, in call-statement position,
    /// and nowhere else.
    fn call_stmt(&mut self, call: &mut CallExpr) -> Result<(), Diagnostic> {
        match call.callee.as_str() {
            "printf" => {
                if call.args.len() != 1 {
                    return Err(type_error(call.pos, call.to_string()));
                }
                let pos = call.pos;
                let ty = self.expr(&mut call.args[0])?;
                self.expect_scalar(&ty, pos, &call.args[0].to_string())?;
                Ok(())
            }
            "scanf" => {
                if call.args.len() != 1 {
                    return Err(type_error(call.pos, call.to_string()));
                }
                if !matches!(call.args[0], Expr::Name { .. } | Expr::Index { .. }) {
                    return Err(type_error(call.pos, call.to_string()));
                }
                let pos = call.pos;
                let ty = self.expr(&mut call.args[0])?;
                self.expect_scalar(&ty, pos, &call.args[0].to_string())?;
                Ok(())
            }
            _ => self.call(call).map(|_| ()),
        }
    }

    fn call(&mut self, call: &mut CallExpr) -> Result<ValueTy, Diagnostic> {
        let ty = self
            .scopes
            .lookup_type(call.callee)
            .cloned()
            .ok_or_else(|| not_defined(call.pos, call.callee))?;
        let func = match ty {
            Ty::Value(v) if v.indexed => {
                return Err(type_error(call.pos, format!("{} is an array", call.callee)))
            }
            Ty::Value(_) => {
                return Err(type_error(
                    call.pos,
                    format!("{} is not a function", call.callee),
                ))
            }
            Ty::Fn(f) => f,
        };
        let mut casting = false;
        let mut matched = 0;
        for (param, arg) in func.params.iter().zip(call.args.iter_mut()) {
            let value = match self.expr(arg)? {
                Ty::Fn(_) => break,
                Ty::Value(v) => v,
            };
            if value.indexed != param.indexed {
                break;
            }
            if value.base != param.base {
                casting = true;
                cast_in_place(arg, param.base);
            }
            matched += 1;
        }
        if matched != func.params.len() || matched != call.args.len() {
            return Err(type_error(call.pos, call.to_string()));
        }
        if casting {
            // rendered after the casts landed, so they show in the snippet
            self.warn_cast(call.pos, call.to_string());
        }
        Ok(ValueTy::scalar(func.ret))
    }

    fn expr(&mut self, expr: &mut Expr) -> Result<Ty, Diagnostic> {
        match expr {
            Expr::IntLit { .. } => Ok(Ty::Value(ValueTy::scalar(BaseTy::Int))),
            Expr::FloatLit { .. } => Ok(Ty::Value(ValueTy::scalar(BaseTy::Float))),
            Expr::Name { pos, name } => self
                .scopes
                .lookup_type(*name)
                .cloned()
                .ok_or_else(|| not_defined(*pos, *name)),
            Expr::Index { pos, name, index } => {
                let pos = *pos;
                let name = *name;
                let ty = self
                    .scopes
                    .lookup_type(name)
                    .cloned()
                    .ok_or_else(|| not_defined(pos, name))?;
                let base = match ty {
                    Ty::Value(v) if v.indexed => v.base,
                    _ => return Err(type_error(pos, format!("{name} is not an array"))),
                };
                let index_ty = self.expr(index)?;
                let index_value = self.expect_scalar(&index_ty, pos, &index.to_string())?;
                if index_value.base != BaseTy::Int {
                    let text = format!("{name}[{index}]");
                    self.warn_cast(pos, text);
                    cast_in_place(index, BaseTy::Int);
                }
                Ok(Ty::Value(ValueTy::scalar(base)))
            }
            Expr::Neg { pos, expr } => {
                let pos = *pos;
                let ty = self.expr(expr)?;
                let value = self.expect_scalar(&ty, pos, &expr.to_string())?;
                Ok(Ty::Value(ValueTy::scalar(value.base)))
            }
            Expr::Bin { pos, op, lhs, rhs } => {
                let pos = *pos;
                let op = *op;
                let lt = self.expr(lhs)?;
                let rt = self.expr(rhs)?;
                let left = self.expect_scalar(&lt, pos, &lhs.to_string())?;
                let right = self.expect_scalar(&rt, pos, &rhs.to_string())?;
                if left.base == BaseTy::Float || right.base == BaseTy::Float {
                    let snippet = format!("({lhs}){op}({rhs})");
                    if left.base == BaseTy::Int {
                        self.warn_cast(pos, snippet);
                        cast_in_place(lhs, BaseTy::Float);
                    } else if right.base == BaseTy::Int {
                        self.warn_cast(pos, snippet);
                        cast_in_place(rhs, BaseTy::Float);
                    }
                    let base = if op.is_comparison() {
                        BaseTy::Int
                    } else {
                        BaseTy::Float
                    };
                    Ok(Ty::Value(ValueTy::scalar(base)))
                } else {
                    Ok(Ty::Value(ValueTy::scalar(BaseTy::Int)))
                }
            }
            Expr::Call(call) => self.call(call).map(Ty::Value),
            Expr::Cast { base, expr } => {
                let pos = expr.pos();
                let base = *base;
                let ty = self.expr(expr)?;
                self.expect_scalar(&ty, pos, &expr.to_string())?;
                Ok(Ty::Value(ValueTy::scalar(base)))
            }
        }
    }

    /// Array- and function-valued names never flow into scalar positions.
    fn expect_scalar(
        &self,
        ty: &Ty,
        line: u32,
        what: &str,
    ) -> Result<ValueTy, Diagnostic> {
        match ty {
            Ty::Value(v) if v.indexed => Err(type_error(line, format!("{what} is an array"))),
            Ty::Fn(_) => Err(type_error(line, format!("{what} is a function"))),
            Ty::Value(v) => Ok(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse;
    use pretty_assertions::assert_eq;

    fn run(src: &str) -> (Program, Vec<Diagnostic>, Option<Diagnostic>) {
        let mut program = parse(src).expect("test source should parse");
        let mut warnings = Vec::new();
        let err = check(&mut program, &mut |d| warnings.push(d)).err();
        (program, warnings, err)
    }

    fn warning(line: u32, snippet: &str) -> Diagnostic {
        Diagnostic {
            line,
            kind: DiagnosticKind::ImplicitCast,
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn clean_program_has_no_diagnostics() {
        let (_, warnings, err) = run("int a; int main(){ a=1; return a; }");
        assert_eq!(warnings, vec![]);
        assert_eq!(err, None);
    }

    #[test]
    fn assignment_coerces_int_to_float() {
        let (program, warnings, err) = run("float x; int main(){ x = 2; return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(1, "x=2")]);
        // the cast is now explicit in the tree
        let Stmt::Assign(assign) = &program.funcs[0].body.stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(assign.to_string(), "x=float(2)");
    }

    #[test]
    fn indexed_assignment_coerces_the_index() {
        let (program, warnings, err) = run("int a[3]; int main(){ a[1.5]=2; return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(1, "a[1.5]")]);
        let Stmt::Assign(assign) = &program.funcs[0].body.stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(assign.to_string(), "a[int(1.5)]=2");
    }

    #[test]
    fn indexed_read_coerces_the_index() {
        let (_, warnings, err) =
            run("int a[3]; int main(){ int x; x = a[1.5]; return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(1, "a[1.5]")]);
    }

    #[test]
    fn binary_op_widens_the_int_side() {
        let (program, warnings, err) =
            run("int main(){ float y; y = 1 + 2.5; return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(1, "(1)+(2.5)")]);
        let Stmt::Assign(assign) = &program.funcs[0].body.stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(assign.expr.to_string(), "(float(1))+(2.5)");
    }

    #[test]
    fn comparison_of_mixed_operands_is_int() {
        // the comparison result feeds an int variable with no second warning
        let (_, warnings, err) =
            run("int main(){ int b; b = 1.5 < 2; return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(1, "(1.5)<(2)")]);
    }

    #[test]
    fn float_condition_is_coerced() {
        let (_, warnings, err) =
            run("float x; int main(){ x=0.0;\nwhile(x) x = 0.0; return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(2, "while(x)")]);
    }

    #[test]
    fn if_and_switch_conditions_are_coerced() {
        let (_, warnings, err) = run(
            "float x; int main(){ x=0.0;\nif(x) x=1.0;\nswitch(x){ case 1: break; } return 0; }",
        );
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(2, "if(x)"), warning(3, "switch(x)")]);
    }

    #[test]
    fn return_coerces_to_declared_type() {
        let (_, warnings, err) = run("float f(){ return 1; } int main(){ return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(1, "return 1;")]);
    }

    #[test]
    fn bare_return_is_fatal() {
        let (_, warnings, err) = run("int main(){ return; }");
        assert_eq!(warnings, vec![]);
        assert_eq!(err, Some(type_error(1, "Should return a value")));
    }

    #[test]
    fn wrong_arity_reports_the_call() {
        let (_, _, err) = run("int f(int x){ return x; } int main(){ return f(1, 2); }");
        assert_eq!(err, Some(type_error(1, "f(1,2)")));
    }

    #[test]
    fn call_argument_coercion_warns_once() {
        let (_, warnings, err) = run(
            "int f(int x, int y){ return x; } int main(){ return f(1.5, 2.5); }",
        );
        assert_eq!(err, None);
        // one warning for the whole call, casts visible in the snippet
        assert_eq!(warnings, vec![warning(1, "f(int(1.5),int(2.5))")]);
    }

    #[test]
    fn array_argument_must_match_exactly() {
        let (_, _, err) =
            run("int f(int a[3]){ return 0; } int main(){ int x; x=0; return f(x); }");
        assert_eq!(err, Some(type_error(1, "f(x)")));
    }

    #[test]
    fn undefined_name_is_fatal() {
        let (_, _, err) = run("int main(){ int x; x = y; return 0; }");
        assert_eq!(err, Some(not_defined(1, crate::common::id("y"))));
    }

    #[test]
    fn undefined_indexed_assignment_is_fatal() {
        let (_, _, err) = run("int main(){ b[0] = 1; return 0; }");
        assert_eq!(err, Some(not_defined(1, crate::common::id("b"))));
    }

    #[test]
    fn array_name_in_scalar_position_is_fatal() {
        let (_, _, err) = run("int a[3]; int main(){ int x; x = a; return 0; }");
        assert_eq!(err, Some(type_error(1, "a is an array")));
    }

    #[test]
    fn function_name_in_scalar_position_is_fatal() {
        let (_, _, err) = run("int main(){ int x; x = 1 + main; return 0; }");
        assert_eq!(err, Some(type_error(1, "main is a function")));
    }

    #[test]
    fn calling_a_variable_is_fatal() {
        let (_, _, err) = run("int x; int main(){ x(); return 0; }");
        assert_eq!(err, Some(type_error(1, "x is not a function")));
    }

    #[test]
    fn intrinsics_resolve_only_in_statement_position() {
        let (_, warnings, err) = run("int main(){ printf(1); return 0; }");
        assert_eq!(warnings, vec![]);
        assert_eq!(err, None);

        let (_, _, err) = run("int main(){ int x; x = printf(1); return 0; }");
        assert_eq!(err, Some(not_defined(1, crate::common::id("printf"))));
    }

    #[test]
    fn scanf_requires_an_identifier_argument() {
        let (_, _, err) = run("int main(){ int x; scanf(x); return 0; }");
        assert_eq!(err, None);

        let (_, _, err) = run("int main(){ int x; scanf(x + 1); return 0; }");
        assert_eq!(err, Some(type_error(1, "scanf((x)+(1))")));
    }

    #[test]
    fn printf_takes_exactly_one_argument() {
        let (_, _, err) = run("int main(){ printf(1, 2); return 0; }");
        assert_eq!(err, Some(type_error(1, "printf(1,2)")));
    }

    #[test]
    fn shadowing_uses_the_innermost_declaration() {
        // the inner float x shadows the outer int x, so assigning an int
        // literal to it warns
        let (_, warnings, err) = run(
            "int main(){ int x; x=0; { float x;\nx = 1; } return 0; }",
        );
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(2, "x=1")]);
    }

    #[test]
    fn redeclaration_in_the_same_scope_shadows() {
        // both declarations land in one scope; the later one wins
        let (_, warnings, err) = run("int main(){ int x; float x;\nx = 1; return 0; }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![warning(2, "x=1")]);
    }

    #[test]
    fn negating_an_array_is_fatal() {
        let (_, _, err) = run("int a[2]; int main(){ int x; x = -a; return 0; }");
        assert_eq!(err, Some(type_error(1, "a is an array")));
    }

    #[test]
    fn scanf_rejects_a_whole_array() {
        let (_, _, err) = run("int a[2]; int main(){ scanf(a); return 0; }");
        assert_eq!(err, Some(type_error(1, "a is an array")));
    }

    #[test]
    fn calling_an_unknown_function_is_fatal() {
        let (_, _, err) = run("int main(){ return g(1); }");
        assert_eq!(err, Some(not_defined(1, crate::common::id("g"))));
    }

    #[test]
    fn recursion_sees_the_function_name() {
        let (_, warnings, err) =
            run("int fib(int n){ if(n < 2) return n; return fib(n-1) + fib(n-2); } int main(){ return fib(10); }");
        assert_eq!(err, None);
        assert_eq!(warnings, vec![]);
    }
}
