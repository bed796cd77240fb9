//! The code generator.
//!
//! A second match-on-tag walk over the checked tree.  Expressions evaluate
//! into virtual registers (the callee of `expr` owns the returned register
//! and must free it); statements emit control flow over fresh labels.  The
//! walk rebuilds the same scope layout the checker built, this time reading
//! the storage locations back out of it.
//!
//! Within an expression the left operand is always emitted before the
//! right; declarations are emitted before the statements of their block;
//! functions are emitted in source order after the program entry code.

use crate::back::asm::{Area, Assembly, Inst, Op, Operand};
use crate::common::{id, Id};
use crate::front::ast::*;
use crate::middle::scope::ScopeStack;
use crate::middle::types::{FnTy, Ty, ValueTy};

/// Lower a checked program to assembly.
pub fn generate(program: &Program) -> Assembly {
    let mut gen = CodeGen {
        scopes: ScopeStack::new(),
        insts: Vec::new(),
    };
    gen.program(program);
    Assembly { insts: gen.insts }
}

struct CodeGen {
    scopes: ScopeStack,
    insts: Vec<Inst>,
}

fn vr(r: u32) -> Operand {
    Operand::Vr(r)
}

/// `VR(r)@`
fn vr_load(r: u32) -> Operand {
    Operand::Vr(r).load()
}

/// `MEM(SP@)(k)` — the k-th word above the stack top.
fn above_sp(k: i64) -> Operand {
    Operand::mem(Operand::Sp.load()).off(Operand::Int(k))
}

/// `MEM(SP@)` — the word at the stack top.
fn at_sp() -> Operand {
    Operand::mem(Operand::Sp.load())
}

impl CodeGen {
    fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// `ADD SP@ <delta> SP` / `SUB SP@ <delta> SP`
    fn adjust_sp(&mut self, op: Op, delta: i64) {
        self.emit(Inst::Arith {
            op,
            lhs: Operand::Sp.load(),
            rhs: Operand::Int(delta),
            dst: Operand::Sp,
        });
    }

    /// The address expression for a scalar's cell: frame-relative for
    /// locals, absolute for globals.
    fn cell_addr(loc: i64, local: bool) -> Operand {
        if local {
            Operand::Fp.load().off(Operand::Int(loc))
        } else {
            Operand::Int(loc)
        }
    }

    /// The cell itself, `MEM(FP@(loc))` or `MEM(loc)`.
    fn cell(loc: i64, local: bool) -> Operand {
        Operand::mem(Self::cell_addr(loc, local))
    }

    /// The cell of an array element, addressed through the header word:
    /// `MEM(<base>)@(VR(ri)@)`.
    fn element_cell(loc: i64, local: bool, ri: u32) -> Operand {
        Self::cell(loc, local).load().off(vr_load(ri))
    }

    fn location(&self, name: Id) -> (i64, bool) {
        self.scopes
            .lookup_location(name)
            .unwrap_or_else(|| unreachable!("internal error: unresolved symbol {name}"))
    }

    /// The base type an expression evaluates to.  The checker has already
    /// made every conversion explicit, so this never has to reconcile
    /// mixed operands.
    fn base_of(&self, expr: &Expr) -> BaseTy {
        match expr {
            Expr::IntLit { .. } => BaseTy::Int,
            Expr::FloatLit { .. } => BaseTy::Float,
            Expr::Name { name, .. } | Expr::Index { name, .. } => {
                match self.scopes.lookup_type(*name) {
                    Some(Ty::Value(v)) => v.base,
                    Some(Ty::Fn(f)) => f.ret,
                    None => unreachable!("internal error: unresolved symbol {name}"),
                }
            }
            Expr::Neg { expr, .. } => self.base_of(expr),
            Expr::Bin { op, lhs, .. } => {
                if op.is_comparison() {
                    BaseTy::Int
                } else {
                    self.base_of(lhs)
                }
            }
            Expr::Call(call) => match self.scopes.lookup_type(call.callee) {
                Some(Ty::Fn(f)) => f.ret,
                _ => unreachable!("internal error: call to non-function {}", call.callee),
            },
            Expr::Cast { base, .. } => *base,
        }
    }

    fn program(&mut self, program: &Program) {
        for area in [Area::Sp, Area::Fp, Area::Vr, Area::Mem] {
            self.emit(Inst::Area(area));
        }
        self.emit(Inst::Lab(Operand::Start));
        self.emit(Inst::Move {
            src: Operand::Int(0),
            dst: Operand::Fp,
        });
        self.emit(Inst::Move {
            src: Operand::Int(0),
            dst: Operand::Sp,
        });
        // globals live in the absolute data segment; the stack starts above
        // them
        for decl in &program.decls {
            self.declaration(decl);
        }
        // call main with the terminal label as return address
        self.adjust_sp(Op::Add, 1);
        self.emit(Inst::Move {
            src: Operand::End,
            dst: at_sp(),
        });
        self.emit(Inst::Jmp(Operand::Entry(id("main"))));
        self.emit(Inst::Lab(Operand::End));
        for func in &program.funcs {
            self.function(func);
        }
        self.intrinsics();
    }

    fn function(&mut self, func: &Function) {
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
        self.scopes.declare(func.name, Ty::Fn(fn_ty.clone()), 0);

        self.emit(Inst::Lab(Operand::Entry(func.name)));
        self.adjust_sp(Op::Add, 1);
        self.emit(Inst::Move {
            src: Operand::Fp.load(),
            dst: at_sp(),
        });
        self.emit(Inst::Move {
            src: Operand::Sp.load(),
            dst: Operand::Fp,
        });

        self.scopes.push_function(fn_ty);
        for (i, p) in func.params.iter().enumerate() {
            let ty = ValueTy {
                base: p.base,
                indexed: p.decl.len.is_some(),
            };
            self.scopes
                .declare(p.decl.name, Ty::Value(ty), -(2 + i as i64));
        }
        for decl in &func.body.decls {
            self.declaration(decl);
        }
        for stmt in &func.body.stmts {
            self.stmt(stmt);
        }
        // control falling off the end still unwinds the frame
        self.epilogue();
        self.scopes.pop();
    }

    fn epilogue(&mut self) {
        self.emit(Inst::Move {
            src: Operand::Fp.load(),
            dst: Operand::Sp,
        });
        self.emit(Inst::Move {
            src: at_sp().load(),
            dst: Operand::Fp,
        });
        self.adjust_sp(Op::Sub, 1);
        self.emit(Inst::Jmp(at_sp().load()));
    }

    /// The I/O stubs, emitted once at program end.  `printf` writes the
    /// value in its argument slot; the `scanf` stubs read into the cell
    /// whose address is in the argument slot.
    fn intrinsics(&mut self) {
        self.emit(Inst::Lab(Operand::Entry(id("printf"))));
        self.emit(Inst::Write(above_sp(-1).load()));
        self.emit(Inst::Jmp(at_sp().load()));

        self.emit(Inst::Lab(Operand::Entry(id("scanfi"))));
        self.emit(Inst::ReadI(Operand::mem(above_sp(-1).load())));
        self.emit(Inst::Jmp(at_sp().load()));

        self.emit(Inst::Lab(Operand::Entry(id("scanff"))));
        self.emit(Inst::ReadF(Operand::mem(above_sp(-1).load())));
        self.emit(Inst::Jmp(at_sp().load()));
    }

    /// Record the declared names, initialize array headers, and commit the
    /// frame (or data-segment) growth with a single SP adjustment.
    fn declaration(&mut self, decl: &Declaration) {
        let mut delta = 0;
        for d in &decl.names {
            let words = 1 + d.len.unwrap_or(0);
            let loc = self.scopes.alloc_slot(words);
            let ty = ValueTy {
                base: decl.base,
                indexed: d.len.is_some(),
            };
            self.scopes.declare(d.name, Ty::Value(ty), loc);
            let (_, local) = self.location(d.name);
            if d.len.is_some() {
                // the header cell points at the data cells that follow it
                let (src, dst) = if local {
                    (
                        Operand::mem(Operand::Fp.load()).off(Operand::Int(loc + 1)),
                        Operand::mem(Operand::Fp.load()).off(Operand::Int(loc)),
                    )
                } else {
                    (
                        Operand::mem(Operand::Int(loc + 1)),
                        Operand::mem(Operand::Int(loc)),
                    )
                };
                self.emit(Inst::Move { src, dst });
            }
            delta += words;
        }
        self.adjust_sp(Op::Add, delta);
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign(assign) => self.assign(assign),
            Stmt::Call(call) => {
                if let Some(r) = self.call(call) {
                    self.scopes.free_register(r);
                }
            }
            Stmt::Return { expr, .. } => {
                let expr = expr
                    .as_ref()
                    .expect("internal error: bare return survived checking");
                let r = self.expr(expr);
                self.emit(Inst::Move {
                    src: vr_load(r),
                    dst: Operand::Ret,
                });
                self.scopes.free_register(r);
                self.epilogue();
            }
            Stmt::While { cond, body, .. } => {
                let top = self.scopes.alloc_label();
                let end = self.scopes.alloc_label();
                self.emit(Inst::Lab(Operand::Label(top)));
                let r = self.expr(cond);
                self.emit(Inst::JmpZ {
                    cond: vr_load(r),
                    target: Operand::Label(end),
                });
                self.scopes.free_register(r);
                self.stmt(body);
                self.emit(Inst::Jmp(Operand::Label(top)));
                self.emit(Inst::Lab(Operand::Label(end)));
            }
            Stmt::DoWhile { cond, body, .. } => {
                // the body runs once, then the loop exits when the test is
                // zero, exactly as in `while`
                let top = self.scopes.alloc_label();
                let end = self.scopes.alloc_label();
                self.emit(Inst::Lab(Operand::Label(top)));
                self.stmt(body);
                let r = self.expr(cond);
                self.emit(Inst::JmpZ {
                    cond: vr_load(r),
                    target: Operand::Label(end),
                });
                self.scopes.free_register(r);
                self.emit(Inst::Jmp(Operand::Label(top)));
                self.emit(Inst::Lab(Operand::Label(end)));
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.assign(init);
                let top = self.scopes.alloc_label();
                let end = self.scopes.alloc_label();
                self.emit(Inst::Lab(Operand::Label(top)));
                let r = self.expr(cond);
                self.emit(Inst::JmpZ {
                    cond: vr_load(r),
                    target: Operand::Label(end),
                });
                self.scopes.free_register(r);
                self.stmt(body);
                self.assign(step);
                self.emit(Inst::Jmp(Operand::Label(top)));
                self.emit(Inst::Lab(Operand::Label(end)));
            }
            Stmt::If {
                cond, then, els, ..
            } => {
                let join = self.scopes.alloc_label();
                let l_else = self.scopes.alloc_label();
                let r = self.expr(cond);
                self.emit(Inst::JmpZ {
                    cond: vr_load(r),
                    target: Operand::Label(l_else),
                });
                self.scopes.free_register(r);
                self.stmt(then);
                self.emit(Inst::Jmp(Operand::Label(join)));
                self.emit(Inst::Lab(Operand::Label(l_else)));
                if let Some(els) = els {
                    self.stmt(els);
                }
                self.emit(Inst::Lab(Operand::Label(join)));
            }
            Stmt::Switch(switch) => self.switch(switch),
            Stmt::Block(block) => {
                self.scopes.push_block();
                for decl in &block.decls {
                    self.declaration(decl);
                }
                for stmt in &block.stmts {
                    self.stmt(stmt);
                }
                self.scopes.pop();
            }
            Stmt::Empty { .. } => {}
        }
    }

    /// Dispatch table first (one comparison per integer arm, a direct jump
    /// for the default), then the arm bodies in order; arms without a
    /// `break` fall through.
    fn switch(&mut self, switch: &Switch) {
        let r = self.expr(&switch.scrutinee);
        let mut arm_labels = Vec::with_capacity(switch.arms.len());
        for arm in &switch.arms {
            let label = self.scopes.alloc_label();
            arm_labels.push(label);
            match arm.value {
                Some(k) => {
                    let t = self.scopes.alloc_register();
                    self.emit(Inst::Arith {
                        op: Op::Sub,
                        lhs: vr_load(r),
                        rhs: Operand::Int(k),
                        dst: vr(t),
                    });
                    self.emit(Inst::JmpZ {
                        cond: vr_load(t),
                        target: Operand::Label(label),
                    });
                    self.scopes.free_register(t);
                }
                None => self.emit(Inst::Jmp(Operand::Label(label))),
            }
        }
        let l_break = self.scopes.alloc_label();
        self.emit(Inst::Jmp(Operand::Label(l_break)));
        self.scopes.free_register(r);
        for (arm, label) in switch.arms.iter().zip(arm_labels) {
            self.emit(Inst::Lab(Operand::Label(label)));
            for stmt in &arm.stmts {
                self.stmt(stmt);
            }
            if arm.breaks {
                self.emit(Inst::Jmp(Operand::Label(l_break)));
            }
        }
        self.emit(Inst::Lab(Operand::Label(l_break)));
    }

    fn assign(&mut self, assign: &Assign) {
        let r = self.expr(&assign.expr);
        match &assign.index {
            None => {
                let (loc, local) = self.location(assign.name);
                self.emit(Inst::Move {
                    src: vr_load(r),
                    dst: Self::cell(loc, local),
                });
                self.scopes.free_register(r);
            }
            Some(index) => {
                let ri = self.expr(index);
                let (loc, local) = self.location(assign.name);
                self.emit(Inst::Move {
                    src: vr_load(r),
                    dst: Self::element_cell(loc, local, ri),
                });
                self.scopes.free_register(ri);
                self.scopes.free_register(r);
            }
        }
    }

    /// Evaluate an expression; the returned register stays live until the
    /// caller frees it.
    fn expr(&mut self, expr: &Expr) -> u32 {
        match expr {
            Expr::IntLit { value, .. } => {
                let r = self.scopes.alloc_register();
                self.emit(Inst::Move {
                    src: Operand::Int(*value),
                    dst: vr(r),
                });
                r
            }
            Expr::FloatLit { value, .. } => {
                let r = self.scopes.alloc_register();
                self.emit(Inst::Move {
                    src: Operand::Float(*value),
                    dst: vr(r),
                });
                r
            }
            Expr::Name { name, .. } => {
                let r = self.scopes.alloc_register();
                let (loc, local) = self.location(*name);
                self.emit(Inst::Move {
                    src: Self::cell(loc, local).load(),
                    dst: vr(r),
                });
                r
            }
            Expr::Index { name, index, .. } => {
                let ri = self.expr(index);
                let r = self.scopes.alloc_register();
                let (loc, local) = self.location(*name);
                self.emit(Inst::Move {
                    src: Self::element_cell(loc, local, ri).load(),
                    dst: vr(r),
                });
                self.scopes.free_register(ri);
                r
            }
            Expr::Neg { expr, .. } => {
                let v = self.expr(expr);
                let (op, zero) = match self.base_of(expr) {
                    BaseTy::Int => (Op::Sub, Operand::Int(0)),
                    BaseTy::Float => (Op::FSub, Operand::Float(0.0)),
                };
                self.emit(Inst::Arith {
                    op,
                    lhs: zero,
                    rhs: vr_load(v),
                    dst: vr(v),
                });
                v
            }
            Expr::Bin { op, lhs, rhs, .. } => {
                let rl = self.expr(lhs);
                let rr = self.expr(rhs);
                let base = self.base_of(lhs);
                self.scopes.free_register(rl);
                self.scopes.free_register(rr);
                let rd = self.scopes.alloc_register();
                if op.is_comparison() {
                    self.comparison(*op, base, rl, rr, rd);
                } else {
                    self.emit(Inst::Arith {
                        op: arith_op(*op, base),
                        lhs: vr_load(rl),
                        rhs: vr_load(rr),
                        dst: vr(rd),
                    });
                }
                rd
            }
            Expr::Call(call) => self
                .call(call)
                .expect("internal error: intrinsic call in expression position"),
            Expr::Cast { base, expr } => {
                let r = self.expr(expr);
                let inst = match base {
                    BaseTy::Float => Inst::IntToFloat {
                        src: vr(r),
                        dst: vr(r),
                    },
                    BaseTy::Int => Inst::FloatToInt {
                        src: vr(r),
                        dst: vr(r),
                    },
                };
                self.emit(inst);
                r
            }
        }
    }

    /// Lower a comparison to a sign test on the operand difference, landing
    /// 1 or 0 in `rd`.
    fn comparison(&mut self, op: BinOp, base: BaseTy, rl: u32, rr: u32, rd: u32) {
        use BinOp::*;
        let sub = match base {
            BaseTy::Int => Op::Sub,
            BaseTy::Float => Op::FSub,
        };
        // which difference to take, and whether its sign sends control to
        // the true or the false block
        let (lhs, rhs) = match op {
            Eq | Ne | Lt | Ge => (vr_load(rl), vr_load(rr)),
            Le | Gt => (vr_load(rr), vr_load(rl)),
            _ => unreachable!("internal error: {op} is not a comparison"),
        };
        let l_true = self.scopes.alloc_label();
        let l_false = self.scopes.alloc_label();
        let l_join = self.scopes.alloc_label();
        self.emit(Inst::Arith {
            op: sub,
            lhs,
            rhs,
            dst: vr(rd),
        });
        let (zero_test, cond_target, fall_target) = match op {
            Eq => (true, l_true, l_false),
            Ne => (true, l_false, l_true),
            Lt | Gt => (false, l_true, l_false),
            Le | Ge => (false, l_false, l_true),
            _ => unreachable!("internal error: {op} is not a comparison"),
        };
        let cond = vr_load(rd);
        let target = Operand::Label(cond_target);
        self.emit(if zero_test {
            Inst::JmpZ { cond, target }
        } else {
            Inst::JmpN { cond, target }
        });
        self.emit(Inst::Jmp(Operand::Label(fall_target)));
        self.emit(Inst::Lab(Operand::Label(l_true)));
        self.emit(Inst::Move {
            src: Operand::Int(1),
            dst: vr(rd),
        });
        self.emit(Inst::Jmp(Operand::Label(l_join)));
        self.emit(Inst::Lab(Operand::Label(l_false)));
        self.emit(Inst::Move {
            src: Operand::Int(0),
            dst: vr(rd),
        });
        self.emit(Inst::Lab(Operand::Label(l_join)));
    }

    /// Emit a full call site.  Returns the result register, or `None` for
    /// the intrinsics (which leave nothing in `VR`).
    fn call(&mut self, call: &CallExpr) -> Option<u32> {
        let intrinsic = matches!(call.callee.as_str(), "printf" | "scanf");
        // the set to preserve across the call, captured before the
        // arguments claim registers of their own
        let live = self.scopes.live_registers();
        let spilled = live.len() as i64;
        // 1. evaluate the arguments left to right (or compute the scanned
        //    cell's address), everything kept live: a call nested in a
        //    later argument spills the earlier ones itself, and nothing is
        //    parked above SP yet for it to clobber
        let mut arg_regs = Vec::with_capacity(call.args.len());
        let mut scanf_arg = None;
        let target = if call.callee.as_str() == "scanf" {
            let (src, stub, index_reg) = self.scanf_argument(&call.args[0]);
            scanf_arg = Some((src, index_reg));
            stub
        } else {
            for arg in &call.args {
                arg_regs.push(self.expr(arg));
            }
            Operand::Entry(call.callee)
        };
        // 2. spill the live set, then push the arguments in reverse source
        //    order: the first argument lands next to the return-address
        //    slot
        for (k, &r) in live.iter().enumerate() {
            self.emit(Inst::Move {
                src: vr_load(r),
                dst: above_sp(k as i64 + 1),
            });
        }
        match scanf_arg {
            Some((src, index_reg)) => {
                self.emit(Inst::Move {
                    src,
                    dst: above_sp(spilled + 1),
                });
                if let Some(ri) = index_reg {
                    self.scopes.free_register(ri);
                }
            }
            None => {
                for (j, &r) in arg_regs.iter().rev().enumerate() {
                    self.emit(Inst::Move {
                        src: vr_load(r),
                        dst: above_sp(spilled + 1 + j as i64),
                    });
                    self.scopes.free_register(r);
                }
            }
        }
        // 3. one commit for arguments plus the return-address slot
        let stk = spilled + call.args.len() as i64;
        self.adjust_sp(Op::Add, stk + 1);
        let ret_label = self.scopes.alloc_label();
        self.emit(Inst::Move {
            src: Operand::Label(ret_label),
            dst: at_sp(),
        });
        self.emit(Inst::Jmp(target));
        self.emit(Inst::Lab(Operand::Label(ret_label)));
        // 4. pick up the result, rewind, reload
        let result = if intrinsic {
            None
        } else {
            let rd = self.scopes.alloc_register();
            self.emit(Inst::Move {
                src: Operand::Ret.load(),
                dst: vr(rd),
            });
            Some(rd)
        };
        self.adjust_sp(Op::Sub, stk + 1);
        for (k, &r) in live.iter().enumerate() {
            if result == Some(r) {
                continue;
            }
            self.emit(Inst::Move {
                src: above_sp(k as i64 + 1).load(),
                dst: vr(r),
            });
        }
        result
    }

    /// `scanf` receives the scanned cell's address, not its value, and the
    /// cell's base type picks the stub to jump to.  Returns the address
    /// operand to push, the stub to jump to, and the index register (still
    /// live; the push consumes it).
    fn scanf_argument(&mut self, arg: &Expr) -> (Operand, Operand, Option<u32>) {
        let (name, src, index_reg) = match arg {
            Expr::Name { name, .. } => {
                let (loc, local) = self.location(*name);
                (*name, Self::cell(loc, local), None)
            }
            Expr::Index { name, index, .. } => {
                let ri = self.expr(index);
                let (loc, local) = self.location(*name);
                (*name, Self::element_cell(loc, local, ri), Some(ri))
            }
            _ => unreachable!("internal error: scanf argument survived checking"),
        };
        let base = match self.scopes.lookup_type(name) {
            Some(Ty::Value(v)) => v.base,
            _ => unreachable!("internal error: unresolved symbol {name}"),
        };
        let stub = match base {
            BaseTy::Int => Operand::Entry(id("scanfi")),
            BaseTy::Float => Operand::Entry(id("scanff")),
        };
        (src, stub, index_reg)
    }
}

fn arith_op(op: BinOp, base: BaseTy) -> Op {
    match (op, base) {
        (BinOp::Add, BaseTy::Int) => Op::Add,
        (BinOp::Sub, BaseTy::Int) => Op::Sub,
        (BinOp::Mul, BaseTy::Int) => Op::Mul,
        (BinOp::Div, BaseTy::Int) => Op::Div,
        (BinOp::Add, BaseTy::Float) => Op::FAdd,
        (BinOp::Sub, BaseTy::Float) => Op::FSub,
        (BinOp::Mul, BaseTy::Float) => Op::FMul,
        (BinOp::Div, BaseTy::Float) => Op::FDiv,
        _ => unreachable!("internal error: {op} is not arithmetic"),
    }
}
