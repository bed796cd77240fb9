//! The abstract syntax tree.
//!
//! Every position-bearing node records the 1-based source line it starts on;
//! diagnostics report that line together with the node's rendered source form
//! (the `Display` impls below).

use std::fmt;

use derive_more::Display;

use crate::common::Id;

/// The two scalar base types of the language.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum BaseTy {
    #[display("int")]
    Int,
    #[display("float")]
    Float,
}

/// A whole translation unit: global declarations followed by functions.
#[derive(Debug)]
pub struct Program {
    pub decls: Vec<Declaration>,
    pub funcs: Vec<Function>,
}

/// `type name[,name…];`
#[derive(Debug)]
pub struct Declaration {
    pub base: BaseTy,
    pub names: Vec<Declarator>,
}

/// A declared name: a scalar, or an array with a compile-time length.
#[derive(Debug)]
pub struct Declarator {
    pub pos: u32,
    pub name: Id,
    pub len: Option<i64>,
}

/// A function definition.  The parameter list and the body's declarations
/// share one scope.
#[derive(Debug)]
pub struct Function {
    pub pos: u32,
    pub ret: BaseTy,
    pub name: Id,
    pub params: Vec<Param>,
    pub body: Block,
}

/// A single typed parameter; an indexed declarator makes it an array
/// parameter.
#[derive(Debug)]
pub struct Param {
    pub base: BaseTy,
    pub decl: Declarator,
}

/// `{ decls; stmts }`
#[derive(Debug)]
pub struct Block {
    pub pos: u32,
    pub decls: Vec<Declaration>,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    Assign(Assign),
    Call(CallExpr),
    Return {
        pos: u32,
        expr: Option<Expr>,
    },
    While {
        pos: u32,
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        pos: u32,
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        pos: u32,
        init: Assign,
        cond: Expr,
        step: Assign,
        body: Box<Stmt>,
    },
    If {
        pos: u32,
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    Switch(Switch),
    Block(Block),
    /// A bare `;`.
    Empty { pos: u32 },
}

/// Scalar or indexed assignment.  Doubles as the init/step slots of `for`.
#[derive(Debug)]
pub struct Assign {
    pub pos: u32,
    pub name: Id,
    pub index: Option<Box<Expr>>,
    pub expr: Box<Expr>,
}

/// `switch(v){ arms }`.  The scrutinee is restricted by the grammar to an
/// identifier or an indexed identifier; the parser stores the corresponding
/// read expression here.
#[derive(Debug)]
pub struct Switch {
    pub pos: u32,
    pub scrutinee: Expr,
    pub arms: Vec<Arm>,
}

/// One `case k:` or `default:` arm.  `breaks` records a trailing `break;`;
/// arms without it fall through.
#[derive(Debug)]
pub struct Arm {
    pub value: Option<i64>,
    pub stmts: Vec<Stmt>,
    pub breaks: bool,
}

#[derive(Debug)]
pub enum Expr {
    IntLit {
        pos: u32,
        value: i64,
    },
    FloatLit {
        pos: u32,
        value: f64,
    },
    /// A scalar (or whole-array, in argument position) read of a name.
    Name {
        pos: u32,
        name: Id,
    },
    /// `a[e]`
    Index {
        pos: u32,
        name: Id,
        index: Box<Expr>,
    },
    Neg {
        pos: u32,
        expr: Box<Expr>,
    },
    Bin {
        pos: u32,
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call(CallExpr),
    /// Synthesized by the checker; never produced by the parser.
    Cast {
        base: BaseTy,
        expr: Box<Expr>,
    },
}

#[derive(Debug)]
pub struct CallExpr {
    pub pos: u32,
    pub callee: Id,
    pub args: Vec<Expr>,
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum BinOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
}

impl BinOp {
    /// Comparisons produce a 0/1 integer; the arithmetic group keeps the
    /// operand base type.
    pub fn is_comparison(self) -> bool {
        use BinOp::*;
        matches!(self, Eq | Ne | Lt | Le | Gt | Ge)
    }
}

impl Expr {
    /// The source line this expression starts on.  A synthesized cast
    /// reports its operand's line.
    pub fn pos(&self) -> u32 {
        match self {
            Expr::IntLit { pos, .. }
            | Expr::FloatLit { pos, .. }
            | Expr::Name { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Neg { pos, .. }
            | Expr::Bin { pos, .. } => *pos,
            Expr::Call(call) => call.pos,
            Expr::Cast { expr, .. } => expr.pos(),
        }
    }
}

/// Render a float literal the way the emitter and the pretty-printer agree
/// on: always with a decimal point, no trailing noise (`2.0`, `1.5`).
pub fn float_text(value: f64) -> String {
    format!("{value:?}")
}

// The `Display` impls below reproduce the source form of each construct;
// diagnostics quote these strings verbatim as snippets.

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit { value, .. } => write!(f, "{value}"),
            Expr::FloatLit { value, .. } => write!(f, "{}", float_text(*value)),
            Expr::Name { name, .. } => write!(f, "{name}"),
            Expr::Index { name, index, .. } => write!(f, "{name}[{index}]"),
            Expr::Neg { expr, .. } => write!(f, "-({expr})"),
            Expr::Bin { op, lhs, rhs, .. } => write!(f, "({lhs}){op}({rhs})"),
            Expr::Call(call) => write!(f, "{call}"),
            Expr::Cast { base, expr } => write!(f, "{base}({expr})"),
        }
    }
}

impl fmt::Display for CallExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.callee)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Assign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(index) => write!(f, "{}[{index}]={}", self.name, self.expr),
            None => write!(f, "{}={}", self.name, self.expr),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign(assign) => write!(f, "{assign};"),
            Stmt::Call(call) => write!(f, "{call};"),
            Stmt::Return { expr: Some(e), .. } => write!(f, "return {e};"),
            Stmt::Return { expr: None, .. } => write!(f, "return;"),
            Stmt::While { cond, body, .. } => write!(f, "while({cond})\n{body}"),
            Stmt::DoWhile { cond, body, .. } => write!(f, "do\n{body}\nwhile({cond});"),
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => write!(f, "for({init};{cond};{step})\n{body}"),
            Stmt::If {
                cond, then, els, ..
            } => {
                write!(f, "if({cond})\n{then}")?;
                if let Some(els) = els {
                    write!(f, "\nelse\n{els}")?;
                }
                Ok(())
            }
            Stmt::Switch(switch) => write!(f, "{switch}"),
            Stmt::Block(block) => write!(f, "{block}"),
            Stmt::Empty { .. } => write!(f, ";"),
        }
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "switch({})\n{{", self.scrutinee)?;
        for arm in &self.arms {
            write!(f, "\n{arm}")?;
        }
        write!(f, "\n}}")
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(k) => write!(f, "case {k}:")?,
            None => write!(f, "default:")?,
        }
        for stmt in &self.stmts {
            write!(f, "\n{stmt}")?;
        }
        if self.breaks {
            write!(f, "\nbreak;")?;
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for decl in &self.decls {
            write!(f, "\n{decl}")?;
        }
        for stmt in &self.stmts {
            write!(f, "\n{stmt}")?;
        }
        write!(f, "\n}}")
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.base)?;
        for (i, d) in self.names.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ";")
    }
}

impl fmt::Display for Declarator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.len {
            Some(n) => write!(f, "{}[{n}]", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.base, self.decl)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.ret, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")\n{}", self.body)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.decls {
            writeln!(f, "{decl}")?;
        }
        for func in &self.funcs {
            writeln!(f, "{func}")?;
        }
        Ok(())
    }
}

// Diagnostics quote these renderings verbatim, so their exact shape is part
// of the compiler's observable output.
#[cfg(test)]
mod tests {
    use crate::front::parse;
    use pretty_assertions::assert_eq;

    fn first_stmt(src: &str) -> String {
        let program = parse(src).expect("test source should parse");
        program.funcs[0].body.stmts[0].to_string()
    }

    #[test]
    fn expressions_parenthesize_operands() {
        assert_eq!(
            first_stmt("int main(){ int x; x = 1 + -2 * 3; return 0; }"),
            "x=(1)+((-(2))*(3));"
        );
    }

    #[test]
    fn calls_join_arguments_without_spaces() {
        assert_eq!(
            first_stmt("int main(){ f(1, 2.5, x); return 0; }"),
            "f(1,2.5,x);"
        );
    }

    #[test]
    fn float_literals_keep_a_decimal_point() {
        assert_eq!(
            first_stmt("int main(){ float y; y = 2.0; return 0; }"),
            "y=2.0;"
        );
    }

    #[test]
    fn control_flow_renders_on_separate_lines() {
        assert_eq!(
            first_stmt("int main(){ if(x) y = 1; else y = 2; return 0; }"),
            "if(x)\ny=1;\nelse\ny=2;"
        );
        assert_eq!(
            first_stmt("int main(){ do x = 1; while(x); return 0; }"),
            "do\nx=1;\nwhile(x);"
        );
        assert_eq!(
            first_stmt("int main(){ for(i=0; i<3; i=i+1) ; return 0; }"),
            "for(i=0;(i)<(3);i=i+1)\n;"
        );
    }

    #[test]
    fn switches_render_arms_and_breaks() {
        let src = "int main(){ switch(v){ case 1: x=1; break; default: x=2; } return 0; }";
        assert_eq!(
            first_stmt(src),
            "switch(v)\n{\ncase 1:\nx=1;\nbreak;\ndefault:\nx=2;\n}"
        );
    }

    #[test]
    fn declarations_list_names_with_lengths() {
        let program = parse("int a, b[3]; int main(){ return 0; }").unwrap();
        assert_eq!(program.decls[0].to_string(), "int a,b[3];");
    }

    #[test]
    fn functions_render_signature_then_body() {
        let program = parse("float f(int a, float b[2]){ return b[a]; }").unwrap();
        assert_eq!(
            program.funcs[0].to_string(),
            "float f(int a,float b[2])\n{\nreturn b[a];\n}"
        );
    }
}
