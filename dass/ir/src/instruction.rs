//! The closed set of instructions understood by the middle-end. Anything
//! outside this set is rejected when a program is deserialized.
use crate::{BlockIdx, Type, Value};
use dass_utils::Id;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinOp {
    pub fn is_fp(&self) -> bool {
        matches!(
            self,
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
        )
    }

    /// Integer division and remainder can trap on a zero divisor.
    pub fn is_int_div(&self) -> bool {
        matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem)
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
        }
    }
}

/// No-wrap and exactness annotations carried by integer arithmetic.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(default)]
pub struct WrapFlags {
    pub nuw: bool,
    pub nsw: bool,
    pub exact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ICmpPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl ICmpPred {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            ICmpPred::Eq => "eq",
            ICmpPred::Ne => "ne",
            ICmpPred::Ugt => "ugt",
            ICmpPred::Uge => "uge",
            ICmpPred::Ult => "ult",
            ICmpPred::Ule => "ule",
            ICmpPred::Sgt => "sgt",
            ICmpPred::Sge => "sge",
            ICmpPred::Slt => "slt",
            ICmpPred::Sle => "sle",
        }
    }

    /// The predicate that holds exactly when `self` does not.
    pub fn inverse(&self) -> Self {
        match self {
            ICmpPred::Eq => ICmpPred::Ne,
            ICmpPred::Ne => ICmpPred::Eq,
            ICmpPred::Ugt => ICmpPred::Ule,
            ICmpPred::Uge => ICmpPred::Ult,
            ICmpPred::Ult => ICmpPred::Uge,
            ICmpPred::Ule => ICmpPred::Ugt,
            ICmpPred::Sgt => ICmpPred::Sle,
            ICmpPred::Sge => ICmpPred::Slt,
            ICmpPred::Slt => ICmpPred::Sge,
            ICmpPred::Sle => ICmpPred::Sgt,
        }
    }

    /// The same relation with its operands exchanged: `a < b` is `b > a`.
    pub fn swapped(&self) -> Self {
        match self {
            ICmpPred::Eq | ICmpPred::Ne => *self,
            ICmpPred::Ugt => ICmpPred::Ult,
            ICmpPred::Uge => ICmpPred::Ule,
            ICmpPred::Ult => ICmpPred::Ugt,
            ICmpPred::Ule => ICmpPred::Uge,
            ICmpPred::Sgt => ICmpPred::Slt,
            ICmpPred::Sge => ICmpPred::Sle,
            ICmpPred::Slt => ICmpPred::Sgt,
            ICmpPred::Sle => ICmpPred::Sge,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ICmpPred::Sgt | ICmpPred::Sge | ICmpPred::Slt | ICmpPred::Sle
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FCmpPred {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
    True,
}

impl FCmpPred {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            FCmpPred::False => "false",
            FCmpPred::Oeq => "oeq",
            FCmpPred::Ogt => "ogt",
            FCmpPred::Oge => "oge",
            FCmpPred::Olt => "olt",
            FCmpPred::Ole => "ole",
            FCmpPred::One => "one",
            FCmpPred::Ord => "ord",
            FCmpPred::Ueq => "ueq",
            FCmpPred::Ugt => "ugt",
            FCmpPred::Uge => "uge",
            FCmpPred::Ult => "ult",
            FCmpPred::Ule => "ule",
            FCmpPred::Une => "une",
            FCmpPred::Uno => "uno",
            FCmpPred::True => "true",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
    BitCast,
    SIToFP,
    UIToFP,
    FPToSI,
    FPToUI,
    FPExt,
    FPTrunc,
}

impl CastOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::Trunc => "trunc",
            CastOp::BitCast => "bitcast",
            CastOp::SIToFP => "sitofp",
            CastOp::UIToFP => "uitofp",
            CastOp::FPToSI => "fptosi",
            CastOp::FPToUI => "fptoui",
            CastOp::FPExt => "fpext",
            CastOp::FPTrunc => "fptrunc",
        }
    }
}

/// Operation performed by an [Instruction]. Operand layout per opcode:
/// * `Binary`, `ICmp`, `FCmp`: `[lhs, rhs]`
/// * `Cast`: `[src]`
/// * `Select`: `[cond, if_true, if_false]`
/// * `Phi`: one incoming value per entry of `blocks`
/// * `Gep`: `[base, index]`, the index counts elements
/// * `Load`: `[ptr]`; `Store`: `[value, ptr]`
/// * `Call`: the actual arguments
/// * `CondBr`, `Switch`: `[cond]`; `Ret`: `[]` or `[value]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    Binary {
        op: BinOp,
        #[serde(default)]
        flags: WrapFlags,
    },
    ICmp(ICmpPred),
    FCmp(FCmpPred),
    Cast(CastOp),
    Select,
    Phi {
        blocks: SmallVec<[BlockIdx; 2]>,
    },
    Gep,
    Load,
    Store,
    Alloca,
    Call {
        callee: Id,
    },
    Br {
        target: BlockIdx,
    },
    CondBr {
        then_bb: BlockIdx,
        else_bb: BlockIdx,
    },
    Switch {
        default: BlockIdx,
        cases: Vec<(i64, BlockIdx)>,
    },
    Ret,
}

impl Opcode {
    pub fn binary(op: BinOp) -> Self {
        Opcode::Binary {
            op,
            flags: WrapFlags::default(),
        }
    }

    /// Whether an instruction with this opcode may have `n` operands.
    pub fn accepts_operands(&self, n: usize) -> bool {
        match self {
            Opcode::Binary { .. }
            | Opcode::ICmp(_)
            | Opcode::FCmp(_)
            | Opcode::Gep
            | Opcode::Store => n == 2,
            Opcode::Cast(_) | Opcode::Load => n == 1,
            Opcode::Select => n == 3,
            Opcode::Phi { blocks } => n == blocks.len(),
            Opcode::Alloca | Opcode::Br { .. } => n == 0,
            Opcode::CondBr { .. } | Opcode::Switch { .. } => n == 1,
            Opcode::Ret => n <= 1,
            Opcode::Call { .. } => true,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Br { .. }
                | Opcode::CondBr { .. }
                | Opcode::Switch { .. }
                | Opcode::Ret
        )
    }

    /// Control successors of a terminator, in operand order.
    pub fn successors(&self) -> SmallVec<[BlockIdx; 2]> {
        match self {
            Opcode::Br { target } => smallvec::smallvec![*target],
            Opcode::CondBr { then_bb, else_bb } => {
                smallvec::smallvec![*then_bb, *else_bb]
            }
            Opcode::Switch { default, cases } => {
                let mut succs: SmallVec<[BlockIdx; 2]> =
                    smallvec::smallvec![*default];
                succs.extend(cases.iter().map(|(_, bb)| *bb));
                succs
            }
            _ => SmallVec::new(),
        }
    }

    /// Rewrite every reference to block `from` into `to`.
    pub fn retarget(&mut self, from: BlockIdx, to: BlockIdx) {
        self.map_blocks(|bb| if bb == from { to } else { bb });
    }

    /// Rewrite every block reference through `f`.
    pub fn map_blocks<F: Fn(BlockIdx) -> BlockIdx>(&mut self, f: F) {
        match self {
            Opcode::Br { target } => *target = f(*target),
            Opcode::CondBr { then_bb, else_bb } => {
                *then_bb = f(*then_bb);
                *else_bb = f(*else_bb);
            }
            Opcode::Switch { default, cases } => {
                *default = f(*default);
                cases.iter_mut().for_each(|(_, bb)| *bb = f(*bb));
            }
            Opcode::Phi { blocks } => blocks.iter_mut().for_each(|bb| *bb = f(*bb)),
            _ => {}
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Opcode::Load | Opcode::Store | Opcode::Gep)
    }

    /// Side-effect free and cannot trap.
    pub fn is_speculatable(&self, operands: &[Value]) -> bool {
        match self {
            Opcode::Binary { op, .. } if op.is_int_div() => operands
                .get(1)
                .and_then(|v| v.as_const_int())
                .is_some_and(|d| d != 0),
            Opcode::Binary { .. }
            | Opcode::ICmp(_)
            | Opcode::FCmp(_)
            | Opcode::Cast(_)
            | Opcode::Select
            | Opcode::Gep => true,
            _ => false,
        }
    }

    pub fn mnemonic(&self) -> String {
        match self {
            Opcode::Binary { op, .. } => op.mnemonic().to_string(),
            Opcode::ICmp(p) => format!("icmp {}", p.mnemonic()),
            Opcode::FCmp(p) => format!("fcmp {}", p.mnemonic()),
            Opcode::Cast(c) => c.mnemonic().to_string(),
            Opcode::Select => "select".to_string(),
            Opcode::Phi { .. } => "phi".to_string(),
            Opcode::Gep => "getelementptr".to_string(),
            Opcode::Load => "load".to_string(),
            Opcode::Store => "store".to_string(),
            Opcode::Alloca => "alloca".to_string(),
            Opcode::Call { .. } => "call".to_string(),
            Opcode::Br { .. } | Opcode::CondBr { .. } => "br".to_string(),
            Opcode::Switch { .. } => "switch".to_string(),
            Opcode::Ret => "ret".to_string(),
        }
    }
}

/// A single SSA instruction. `name` is empty for instructions without a
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub name: Id,
    pub op: Opcode,
    #[serde(default)]
    pub operands: SmallVec<[Value; 3]>,
    pub ty: Type,
    pub block: BlockIdx,
}

impl Instruction {
    pub fn is_phi(&self) -> bool {
        matches!(self.op, Opcode::Phi { .. })
    }

    pub fn is_terminator(&self) -> bool {
        self.op.is_terminator()
    }

    pub fn is_call(&self) -> bool {
        matches!(self.op, Opcode::Call { .. })
    }

    /// The binary operator, if this is one.
    pub fn bin_op(&self) -> Option<BinOp> {
        match self.op {
            Opcode::Binary { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn is_cmp(&self) -> bool {
        matches!(self.op, Opcode::ICmp(_) | Opcode::FCmp(_))
    }

    /// Incoming `(block, value)` pairs of a phi.
    pub fn incoming(&self) -> impl Iterator<Item = (BlockIdx, Value)> + '_ {
        let blocks: &[BlockIdx] = match &self.op {
            Opcode::Phi { blocks } => blocks,
            _ => &[],
        };
        blocks.iter().copied().zip(self.operands.iter().copied())
    }

    /// Value flowing into a phi from `bb`.
    pub fn incoming_for(&self, bb: BlockIdx) -> Option<Value> {
        self.incoming().find(|(b, _)| *b == bb).map(|(_, v)| v)
    }

    /// Address operand of a load or store.
    pub fn pointer_operand(&self) -> Option<Value> {
        match self.op {
            Opcode::Load => self.operands.first().copied(),
            Opcode::Store => self.operands.get(1).copied(),
            _ => None,
        }
    }

    pub fn has_result(&self) -> bool {
        self.ty != Type::Void
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}
