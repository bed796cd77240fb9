//! The parser.

use std::fmt::Debug;

use derive_more::Display;

use super::ast::*;
use super::lex::{LexError, Lexer, Token, TokenKind};
use crate::common::Id;

#[derive(Display)]
#[display("Parse error at line {line}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            line: err.line,
            message: format!("unexpected character {:?}", err.found),
        }
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    Parser { tokens, pos: 0 }.program()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    /// Kind of the token after the next one; one token of lookahead is all
    /// the grammar needs (assignment vs. call after an identifier).
    fn peek2_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| t.kind)
    }

    fn line(&self) -> u32 {
        match self.peek() {
            Some(t) => t.line,
            None => self.tokens.last().map(|t| t.line).unwrap_or(1),
        }
    }

    fn bump(&mut self) -> Option<Token<'src>> {
        let t = self.tokens.get(self.pos).copied();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            line: self.line(),
            message: message.into(),
        })
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek().copied() {
            Some(t) if t.kind == kind => {
                self.pos += 1;
                Ok(t)
            }
            Some(t) => self.error(format!("expected '{kind}', found '{}'", t.text)),
            None => self.error(format!("expected '{kind}', found end of input")),
        }
    }

    fn base_ty(&mut self) -> Result<BaseTy, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwInt) => {
                self.pos += 1;
                Ok(BaseTy::Int)
            }
            Some(TokenKind::KwFloat) => {
                self.pos += 1;
                Ok(BaseTy::Float)
            }
            _ => self.error("expected a type"),
        }
    }

    fn at_type(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(TokenKind::KwInt) | Some(TokenKind::KwFloat)
        )
    }

    fn int_literal(&mut self) -> Result<(u32, i64), ParseError> {
        let t = self.expect(TokenKind::IntNum)?;
        match t.text.parse() {
            Ok(v) => Ok((t.line, v)),
            Err(_) => self.error(format!("integer literal '{}' out of range", t.text)),
        }
    }

    // program := decl* func*
    fn program(&mut self) -> Result<Program, ParseError> {
        let mut decls = Vec::new();
        let mut funcs = Vec::new();
        while self.peek().is_some() {
            let base = self.base_ty()?;
            let name_tok = self.expect(TokenKind::Id)?;
            if self.peek_kind() == Some(TokenKind::LParen) {
                funcs.push(self.function(base, name_tok)?);
            } else {
                if !funcs.is_empty() {
                    return self.error("global declarations must precede function definitions");
                }
                decls.push(self.declaration_tail(base, name_tok)?);
            }
        }
        Ok(Program { decls, funcs })
    }

    // the rest of a declaration, after `type name` has been consumed
    fn declaration_tail(
        &mut self,
        base: BaseTy,
        name_tok: Token<'src>,
    ) -> Result<Declaration, ParseError> {
        let mut names = vec![self.declarator_tail(name_tok)?];
        while self.eat(TokenKind::Comma) {
            let t = self.expect(TokenKind::Id)?;
            names.push(self.declarator_tail(t)?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(Declaration { base, names })
    }

    fn declarator_tail(&mut self, name_tok: Token<'src>) -> Result<Declarator, ParseError> {
        let len = if self.eat(TokenKind::LBracket) {
            let (_, n) = self.int_literal()?;
            self.expect(TokenKind::RBracket)?;
            Some(n)
        } else {
            None
        };
        Ok(Declarator {
            pos: name_tok.line,
            name: intern(name_tok),
            len,
        })
    }

    fn function(&mut self, ret: BaseTy, name_tok: Token<'src>) -> Result<Function, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                let base = self.base_ty()?;
                let t = self.expect(TokenKind::Id)?;
                params.push(Param {
                    base,
                    decl: self.declarator_tail(t)?,
                });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Function {
            pos: name_tok.line,
            ret,
            name: intern(name_tok),
            params,
            body,
        })
    }

    // compound := '{' decl* stmt* '}'
    fn block(&mut self) -> Result<Block, ParseError> {
        let pos = self.line();
        self.expect(TokenKind::LBrace)?;
        let mut decls = Vec::new();
        while self.at_type() {
            let base = self.base_ty()?;
            let name_tok = self.expect(TokenKind::Id)?;
            decls.push(self.declaration_tail(base, name_tok)?);
        }
        let mut stmts = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            if self.peek().is_none() {
                return self.error("expected '}', found end of input");
            }
            stmts.push(self.stmt()?);
        }
        Ok(Block { pos, decls, stmts })
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        use TokenKind::*;
        let pos = self.line();
        match self.peek_kind() {
            Some(Semi) => {
                self.pos += 1;
                Ok(Stmt::Empty { pos })
            }
            Some(LBrace) => Ok(Stmt::Block(self.block()?)),
            Some(KwReturn) => {
                self.pos += 1;
                let expr = if self.peek_kind() == Some(Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(Semi)?;
                Ok(Stmt::Return { pos, expr })
            }
            Some(KwWhile) => {
                self.pos += 1;
                self.expect(LParen)?;
                let cond = self.expr()?;
                self.expect(RParen)?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::While { pos, cond, body })
            }
            Some(KwDo) => {
                self.pos += 1;
                let body = Box::new(self.stmt()?);
                self.expect(KwWhile)?;
                self.expect(LParen)?;
                let cond = self.expr()?;
                self.expect(RParen)?;
                self.expect(Semi)?;
                Ok(Stmt::DoWhile { pos, cond, body })
            }
            Some(KwFor) => {
                self.pos += 1;
                self.expect(LParen)?;
                let init = self.assign()?;
                self.expect(Semi)?;
                let cond = self.expr()?;
                self.expect(Semi)?;
                let step = self.assign()?;
                self.expect(RParen)?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::For {
                    pos,
                    init,
                    cond,
                    step,
                    body,
                })
            }
            Some(KwIf) => {
                self.pos += 1;
                self.expect(LParen)?;
                let cond = self.expr()?;
                self.expect(RParen)?;
                let then = Box::new(self.stmt()?);
                let els = if self.eat(KwElse) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    pos,
                    cond,
                    then,
                    els,
                })
            }
            Some(KwSwitch) => self.switch(),
            Some(Id) => {
                if self.peek2_kind() == Some(LParen) {
                    let call = self.call()?;
                    self.expect(Semi)?;
                    Ok(Stmt::Call(call))
                } else {
                    let assign = self.assign()?;
                    self.expect(Semi)?;
                    Ok(Stmt::Assign(assign))
                }
            }
            Some(_) => {
                let t = *self.peek().unwrap();
                self.error(format!("unexpected token '{}'", t.text))
            }
            None => self.error("expected a statement, found end of input"),
        }
    }

    // assign := id ('[' expr ']')? '=' expr
    fn assign(&mut self) -> Result<Assign, ParseError> {
        let name_tok = self.expect(TokenKind::Id)?;
        let index = if self.eat(TokenKind::LBracket) {
            let index = self.expr()?;
            self.expect(TokenKind::RBracket)?;
            Some(Box::new(index))
        } else {
            None
        };
        self.expect(TokenKind::Assign)?;
        let expr = Box::new(self.expr()?);
        Ok(Assign {
            pos: name_tok.line,
            name: intern(name_tok),
            index,
            expr,
        })
    }

    // switch := 'switch' '(' id ('[' intnum ']')? ')' '{' arm* '}'
    //
    // The scrutinee is stored as the corresponding read expression.
    fn switch(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.line();
        self.expect(TokenKind::KwSwitch)?;
        self.expect(TokenKind::LParen)?;
        let name_tok = self.expect(TokenKind::Id)?;
        let scrutinee = if self.eat(TokenKind::LBracket) {
            let (line, value) = self.int_literal()?;
            self.expect(TokenKind::RBracket)?;
            Expr::Index {
                pos: name_tok.line,
                name: intern(name_tok),
                index: Box::new(Expr::IntLit { pos: line, value }),
            }
        } else {
            Expr::Name {
                pos: name_tok.line,
                name: intern(name_tok),
            }
        };
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;
        let mut arms = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            arms.push(self.arm()?);
        }
        Ok(Stmt::Switch(Switch {
            pos,
            scrutinee,
            arms,
        }))
    }

    // arm := ('case' intnum | 'default') ':' stmt* ('break' ';')?
    fn arm(&mut self) -> Result<Arm, ParseError> {
        use TokenKind::*;
        let value = if self.eat(KwCase) {
            let (_, v) = self.int_literal()?;
            Some(v)
        } else if self.eat(KwDefault) {
            None
        } else {
            return self.error("expected 'case' or 'default'");
        };
        self.expect(Colon)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind() {
                Some(KwBreak) | Some(KwCase) | Some(KwDefault) | Some(RBrace) | None => break,
                _ => stmts.push(self.stmt()?),
            }
        }
        let breaks = if self.eat(KwBreak) {
            self.expect(Semi)?;
            true
        } else {
            false
        };
        Ok(Arm {
            value,
            stmts,
            breaks,
        })
    }

    fn call(&mut self) -> Result<CallExpr, ParseError> {
        let name_tok = self.expect(TokenKind::Id)?;
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                args.push(self.expr()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(CallExpr {
            pos: name_tok.line,
            callee: intern(name_tok),
            args,
        })
    }

    // expr := equality
    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.equality()
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek_kind() {
                Some(EqEq) => BinOp::Eq,
                Some(NotEq) => BinOp::Ne,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.relational()?;
            lhs = bin(op, lhs, rhs);
        }
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(Less) => BinOp::Lt,
                Some(LessEq) => BinOp::Le,
                Some(Greater) => BinOp::Gt,
                Some(GreaterEq) => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = bin(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek_kind() {
                Some(Plus) => BinOp::Add,
                Some(Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = bin(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(Star) => BinOp::Mul,
                Some(Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = bin(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek_kind() == Some(TokenKind::Minus) {
            let pos = self.line();
            self.pos += 1;
            let expr = Box::new(self.unary()?);
            Ok(Expr::Neg { pos, expr })
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        match self.peek_kind() {
            Some(IntNum) => {
                let (pos, value) = self.int_literal()?;
                Ok(Expr::IntLit { pos, value })
            }
            Some(FloatNum) => {
                let t = self.bump().unwrap();
                match t.text.parse() {
                    Ok(value) => Ok(Expr::FloatLit {
                        pos: t.line,
                        value,
                    }),
                    Err(_) => self.error(format!("bad float literal '{}'", t.text)),
                }
            }
            Some(Id) if self.peek2_kind() == Some(LParen) => Ok(Expr::Call(self.call()?)),
            Some(Id) => {
                let t = self.bump().unwrap();
                if self.eat(LBracket) {
                    let index = Box::new(self.expr()?);
                    self.expect(RBracket)?;
                    Ok(Expr::Index {
                        pos: t.line,
                        name: intern(t),
                        index,
                    })
                } else {
                    Ok(Expr::Name {
                        pos: t.line,
                        name: intern(t),
                    })
                }
            }
            Some(LParen) => {
                self.pos += 1;
                let e = self.expr()?;
                self.expect(RParen)?;
                Ok(e)
            }
            Some(_) => {
                let t = *self.peek().unwrap();
                self.error(format!("expected an expression, found '{}'", t.text))
            }
            None => self.error("expected an expression, found end of input"),
        }
    }
}

fn intern(token: Token<'_>) -> Id {
    crate::common::id(token.text)
}

fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Bin {
        pos: lhs.pos(),
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn globals_then_functions() {
        let p = parse("int a; float b[4]; int main(){ return 0; }").unwrap();
        assert_eq!(p.decls.len(), 2);
        assert_eq!(p.funcs.len(), 1);
        assert_eq!(p.decls[1].names[0].len, Some(4));
        assert_eq!(p.funcs[0].name.as_str(), "main");
    }

    #[test]
    fn declaration_after_function_is_rejected() {
        let err = parse("int main(){ return 0; } int a;").unwrap_err();
        assert!(err.message.contains("precede"));
    }

    #[test]
    fn precedence_nests_term_under_additive() {
        let p = parse("int main(){ int x; x = 1 + 2 * 3 < 4; return x; }").unwrap();
        let Stmt::Assign(assign) = &p.funcs[0].body.stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(assign.expr.to_string(), "((1)+((2)*(3)))<(4)");
    }

    #[test]
    fn call_vs_assign_lookahead() {
        let p = parse("int main(){ f(1); x = 2; return 0; }").unwrap();
        assert!(matches!(p.funcs[0].body.stmts[0], Stmt::Call(_)));
        assert!(matches!(p.funcs[0].body.stmts[1], Stmt::Assign(_)));
    }

    #[test]
    fn switch_arms_and_breaks() {
        let p = parse(
            "int main(){ int v; v=0; switch(v){ case 1: v=2; break; default: v=3; } return v; }",
        )
        .unwrap();
        let Stmt::Switch(sw) = &p.funcs[0].body.stmts[1] else {
            panic!("expected switch");
        };
        assert_eq!(sw.arms.len(), 2);
        assert_eq!(sw.arms[0].value, Some(1));
        assert!(sw.arms[0].breaks);
        assert_eq!(sw.arms[1].value, None);
        assert!(!sw.arms[1].breaks);
    }

    #[test]
    fn statement_forms() {
        let src = "int main(){
            int i, a[3];
            i = 0;
            while(i < 3) { a[i] = i; i = i + 1; }
            do i = i - 1; while(i);
            for(i = 0; i < 3; i = i + 1) ;
            if(i) i = 0; else i = 1;
            return i;
        }";
        let p = parse(src).unwrap();
        assert_eq!(p.funcs[0].body.stmts.len(), 6);
    }

    #[test]
    fn array_parameters() {
        let p = parse("int sum(int a[8], int n){ return 0; } int main(){ return 0; }").unwrap();
        let f = &p.funcs[0];
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].decl.len, Some(8));
        assert_eq!(f.params[1].decl.len, None);
    }

    #[test]
    fn reports_line_of_error() {
        let err = parse("int main(){\n  x = ;\n}").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
