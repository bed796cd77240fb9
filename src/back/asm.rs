//! The abstract-machine assembly.
//!
//! The target is a register/stack machine with four declared areas: the
//! stack pointer `SP`, the frame pointer `FP`, the virtual-register file
//! `VR` (whose bare name doubles as the call-return slot), and the flat
//! memory `MEM`.  The instruction stream is line-oriented text; `LAB`
//! defines labels, and a trailing `@` on an operand denotes a load through
//! it.
//!
//! Operands compose: `MEM(FP@(3))@` reads the word three past the frame
//! pointer, `MEM(SP@)(-1)@` reads the word just below the stack top, and
//! `MEM(FP@(3))@(VR(0)@)@` reads through an array header.  A `MEM(x)`
//! operand without a load suffix denotes the address `x` itself, which is
//! how cell addresses are passed to `scanf`.

use std::fmt;

use derive_more::Display;

use crate::common::Id;

/// The declared areas of the machine.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Area {
    #[display("SP")]
    Sp,
    #[display("FP")]
    Fp,
    #[display("VR")]
    Vr,
    #[display("MEM")]
    Mem,
}

/// Anything an instruction can name.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// An integer literal.
    Int(i64),
    /// A float literal; rendered with a decimal point (`2.0`, `1.5`).
    Float(f64),
    /// The stack-pointer register.
    Sp,
    /// The frame-pointer register.
    Fp,
    /// The bare `VR` return slot.
    Ret,
    /// A virtual register.
    Vr(u32),
    /// A control-flow label `L<n>`.
    Label(u32),
    /// A function entry label `F<name>`.
    Entry(Id),
    /// The program entry label.
    Start,
    /// The terminal label the entry call returns to.
    End,
    /// A memory cell at the given address.
    Mem(Box<Operand>),
    /// A load through the inner operand (`x@`).
    Load(Box<Operand>),
    /// An offset suffix (`x(y)`).
    Off(Box<Operand>, Box<Operand>),
}

impl Operand {
    pub fn mem(addr: Operand) -> Operand {
        Operand::Mem(Box::new(addr))
    }

    /// `self@`
    pub fn load(self) -> Operand {
        Operand::Load(Box::new(self))
    }

    /// `self(offset)`
    pub fn off(self, offset: Operand) -> Operand {
        Operand::Off(Box::new(self), Box::new(offset))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v:?}"),
            Operand::Sp => write!(f, "SP"),
            Operand::Fp => write!(f, "FP"),
            Operand::Ret => write!(f, "VR"),
            Operand::Vr(i) => write!(f, "VR({i})"),
            Operand::Label(n) => write!(f, "L{n}"),
            Operand::Entry(name) => write!(f, "F{name}"),
            Operand::Start => write!(f, "START"),
            Operand::End => write!(f, "END"),
            Operand::Mem(addr) => write!(f, "MEM({addr})"),
            Operand::Load(inner) => write!(f, "{inner}@"),
            Operand::Off(base, offset) => write!(f, "{base}({offset})"),
        }
    }
}

/// Three-address arithmetic opcodes; the `F`-prefixed forms operate on
/// floats.  Mixed-base operands never reach one of these — the checker
/// made every conversion explicit.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Op {
    #[display("ADD")]
    Add,
    #[display("SUB")]
    Sub,
    #[display("MUL")]
    Mul,
    #[display("DIV")]
    Div,
    #[display("FADD")]
    FAdd,
    #[display("FSUB")]
    FSub,
    #[display("FMUL")]
    FMul,
    #[display("FDIV")]
    FDiv,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    /// Declare a machine area.
    Area(Area),
    /// Define a label at this point in the stream.
    Lab(Operand),
    Move {
        src: Operand,
        dst: Operand,
    },
    Arith {
        op: Op,
        lhs: Operand,
        rhs: Operand,
        dst: Operand,
    },
    /// `I2F` — widen an integer register in place.
    IntToFloat {
        src: Operand,
        dst: Operand,
    },
    /// `F2I` — truncate a float register in place.
    FloatToInt {
        src: Operand,
        dst: Operand,
    },
    Jmp(Operand),
    /// Jump when the tested value is zero.
    JmpZ {
        cond: Operand,
        target: Operand,
    },
    /// Jump when the tested value is negative.
    JmpN {
        cond: Operand,
        target: Operand,
    },
    Write(Operand),
    ReadI(Operand),
    ReadF(Operand),
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Area(area) => write!(f, "AREA {area}"),
            Inst::Lab(label) => write!(f, "LAB {label}"),
            Inst::Move { src, dst } => write!(f, "MOVE {src} {dst}"),
            Inst::Arith { op, lhs, rhs, dst } => write!(f, "{op} {lhs} {rhs} {dst}"),
            Inst::IntToFloat { src, dst } => write!(f, "I2F {src} {dst}"),
            Inst::FloatToInt { src, dst } => write!(f, "F2I {src} {dst}"),
            Inst::Jmp(target) => write!(f, "JMP {target}"),
            Inst::JmpZ { cond, target } => write!(f, "JMPZ {cond} {target}"),
            Inst::JmpN { cond, target } => write!(f, "JMPN {cond} {target}"),
            Inst::Write(src) => write!(f, "WRITE {src}"),
            Inst::ReadI(dst) => write!(f, "READI {dst}"),
            Inst::ReadF(dst) => write!(f, "READF {dst}"),
        }
    }
}

impl Inst {
    /// The label this instruction defines, if it is a `LAB`.
    pub fn defined_label(&self) -> Option<&Operand> {
        match self {
            Inst::Lab(label) => Some(label),
            _ => None,
        }
    }

    /// The label this instruction jumps to, if it is a direct jump.  Jumps
    /// through memory (function returns) have no static target.
    pub fn jump_target(&self) -> Option<&Operand> {
        let target = match self {
            Inst::Jmp(target) => target,
            Inst::JmpZ { target, .. } | Inst::JmpN { target, .. } => target,
            _ => return None,
        };
        match target {
            Operand::Label(_) | Operand::Entry(_) | Operand::Start | Operand::End => Some(target),
            _ => None,
        }
    }
}

/// A backend program: the finished instruction stream.
pub struct Assembly {
    pub insts: Vec<Inst>,
}

impl Assembly {
    /// The final assembly text, one instruction per line.
    pub fn asm_code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.insts {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use pretty_assertions::assert_eq;

    #[test]
    fn operands_render_with_nesting() {
        let local_read = Operand::mem(Operand::Fp.load().off(Operand::Int(3))).load();
        assert_eq!(local_read.to_string(), "MEM(FP@(3))@");

        let spill_slot = Operand::mem(Operand::Sp.load()).off(Operand::Int(-1)).load();
        assert_eq!(spill_slot.to_string(), "MEM(SP@)(-1)@");

        let element = Operand::mem(Operand::Fp.load().off(Operand::Int(3)))
            .load()
            .off(Operand::Vr(0).load())
            .load();
        assert_eq!(element.to_string(), "MEM(FP@(3))@(VR(0)@)@");
    }

    #[test]
    fn instructions_render_line_forms() {
        assert_eq!(Inst::Area(Area::Mem).to_string(), "AREA MEM");
        assert_eq!(Inst::Lab(Operand::Label(7)).to_string(), "LAB L7");
        assert_eq!(Inst::Lab(Operand::Entry(id("main"))).to_string(), "LAB Fmain");
        assert_eq!(
            Inst::Move {
                src: Operand::Int(1),
                dst: Operand::Vr(0),
            }
            .to_string(),
            "MOVE 1 VR(0)"
        );
        assert_eq!(
            Inst::Arith {
                op: Op::FAdd,
                lhs: Operand::Vr(0).load(),
                rhs: Operand::Vr(1).load(),
                dst: Operand::Vr(0),
            }
            .to_string(),
            "FADD VR(0)@ VR(1)@ VR(0)"
        );
        assert_eq!(
            Inst::IntToFloat {
                src: Operand::Vr(0),
                dst: Operand::Vr(0),
            }
            .to_string(),
            "I2F VR(0) VR(0)"
        );
        assert_eq!(
            Inst::JmpZ {
                cond: Operand::Vr(2).load(),
                target: Operand::Label(4),
            }
            .to_string(),
            "JMPZ VR(2)@ L4"
        );
    }

    #[test]
    fn float_literals_keep_their_point() {
        assert_eq!(Operand::Float(2.0).to_string(), "2.0");
        assert_eq!(Operand::Float(1.5).to_string(), "1.5");
    }
}
