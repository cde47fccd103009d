//! A reference interpreter for the IR. Pointers address cells of
//! interpreter-owned arrays; one cell holds one scalar regardless of its
//! width.
use crate::{
    mask, sext, BinOp, BlockIdx, CastOp, Constant, FCmpPred, Function,
    ICmpPred, InstIdx, Opcode, Type, Value,
};
use dass_utils::{DassResult, Error};
use std::collections::HashMap;

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    Int { width: u32, bits: u64 },
    Float(f32),
    Double(f64),
    Ptr { alloc: usize, offset: i64 },
    Undef,
}

impl Val {
    pub fn int(width: u32, value: i64) -> Self {
        Val::Int {
            width,
            bits: mask(value as u64, width),
        }
    }

    /// Sign-extended value of an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Int { width, bits } => Some(sext(*bits, *width)),
            _ => None,
        }
    }

    fn bits(&self) -> DassResult<(u32, u64)> {
        match self {
            Val::Int { width, bits } => Ok((*width, *bits)),
            v => Err(Error::misc(format!("expected an integer, got {v:?}"))),
        }
    }
}

impl From<Constant> for Val {
    fn from(c: Constant) -> Self {
        match c {
            Constant::Int { width, value } => Val::int(width, value),
            Constant::Float(bits) => Val::Float(f32::from_bits(bits)),
            Constant::Double(bits) => Val::Double(f64::from_bits(bits)),
        }
    }
}

/// Interpreter-owned arrays.
#[derive(Debug, Default, Clone)]
pub struct Memory {
    arrays: Vec<Vec<Val>>,
}

impl Memory {
    /// Allocate `len` undefined cells and return a pointer to the first.
    pub fn alloc(&mut self, len: usize) -> Val {
        self.arrays.push(vec![Val::Undef; len]);
        Val::Ptr {
            alloc: self.arrays.len() - 1,
            offset: 0,
        }
    }

    /// Allocate an array initialized with `data`.
    pub fn alloc_with(&mut self, data: Vec<Val>) -> Val {
        self.arrays.push(data);
        Val::Ptr {
            alloc: self.arrays.len() - 1,
            offset: 0,
        }
    }

    pub fn array(&self, ptr: Val) -> Option<&[Val]> {
        match ptr {
            Val::Ptr { alloc, .. } => self.arrays.get(alloc).map(|a| a.as_slice()),
            _ => None,
        }
    }

    fn cell(&mut self, ptr: Val) -> DassResult<&mut Val> {
        let Val::Ptr { alloc, offset } = ptr else {
            return Err(Error::misc(format!("dereference of {ptr:?}")));
        };
        self.arrays
            .get_mut(alloc)
            .and_then(|a| usize::try_from(offset).ok().and_then(|o| a.get_mut(o)))
            .ok_or_else(|| {
                Error::misc(format!("out of bounds access to {alloc}[{offset}]"))
            })
    }

    pub fn read(&mut self, ptr: Val) -> DassResult<Val> {
        self.cell(ptr).map(|c| *c)
    }

    pub fn write(&mut self, ptr: Val, v: Val) -> DassResult<()> {
        *self.cell(ptr)? = v;
        Ok(())
    }
}

/// Executes functions of a program.
pub struct Interpreter<'a> {
    functions: &'a [Function],
    pub memory: Memory,
    fuel: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(functions: &'a [Function]) -> Self {
        Interpreter {
            functions,
            memory: Memory::default(),
            fuel: 1_000_000,
        }
    }

    /// Bound the number of executed instructions.
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn call(&mut self, name: &str, args: &[Val]) -> DassResult<Option<Val>> {
        let functions = self.functions;
        let func = functions.iter().find(|f| f.name == name).ok_or_else(|| {
            Error::unsupported(format!("call to unknown function `{name}'"))
        })?;
        self.run(func, args)
    }

    pub fn run(&mut self, func: &Function, args: &[Val]) -> DassResult<Option<Val>> {
        if args.len() != func.args.len() {
            return Err(Error::misc(format!(
                "`{}' expects {} arguments, got {}",
                func.name,
                func.args.len(),
                args.len()
            )));
        }
        let mut env: HashMap<InstIdx, Val> = HashMap::new();
        let mut prev: Option<BlockIdx> = None;
        let mut bb = func
            .entry()
            .ok_or_else(|| Error::misc(format!("`{}' has no body", func.name)))?;
        loop {
            // Phis read their incoming values simultaneously.
            let phis: Vec<(InstIdx, Val)> = func
                .phis(bb)
                .map(|i| -> DassResult<(InstIdx, Val)> {
                    let from = prev.ok_or_else(|| {
                        Error::malformed_ir("phi in the entry block")
                    })?;
                    let v = func.insts[i].incoming_for(from).ok_or_else(|| {
                        Error::malformed_ir(format!(
                            "phi `{}' has no value for `{}'",
                            func.insts[i].name, func.blocks[from].name
                        ))
                    })?;
                    Ok((i, Self::operand(&env, args, &v)))
                })
                .collect::<DassResult<_>>()?;
            env.extend(phis);

            let mut next = None;
            for i in &func.blocks[bb].insts {
                if self.fuel == 0 {
                    return Err(Error::misc("step limit exceeded"));
                }
                self.fuel -= 1;
                let inst = &func.insts[*i];
                let ops: Vec<Val> = inst
                    .operands
                    .iter()
                    .map(|v| Self::operand(&env, args, v))
                    .collect();
                match &inst.op {
                    Opcode::Phi { .. } => {}
                    Opcode::Br { target } => next = Some(*target),
                    Opcode::CondBr { then_bb, else_bb } => {
                        let (_, c) = ops[0].bits()?;
                        next = Some(if c & 1 == 1 { *then_bb } else { *else_bb });
                    }
                    Opcode::Switch { default, cases } => {
                        let c = ops[0].as_i64();
                        next = Some(
                            cases
                                .iter()
                                .find(|(v, _)| Some(*v) == c)
                                .map(|(_, b)| *b)
                                .unwrap_or(*default),
                        );
                    }
                    Opcode::Ret => return Ok(ops.first().copied()),
                    Opcode::Store => self.memory.write(ops[1], ops[0])?,
                    Opcode::Call { callee } => {
                        if let Some(v) = self.call(callee.as_str(), &ops)? {
                            env.insert(*i, v);
                        }
                    }
                    op => {
                        let v = self.compute(op, inst.ty, &ops)?;
                        env.insert(*i, v);
                    }
                }
            }
            prev = Some(bb);
            bb = next.ok_or_else(|| {
                Error::malformed_ir(format!(
                    "block `{}' has no terminator",
                    func.blocks[bb].name
                ))
            })?;
        }
    }

    fn operand(env: &HashMap<InstIdx, Val>, args: &[Val], v: &Value) -> Val {
        match v {
            Value::Arg(n) => args.get(*n as usize).copied().unwrap_or(Val::Undef),
            Value::Inst(i) => env.get(i).copied().unwrap_or(Val::Undef),
            Value::Const(c) => (*c).into(),
            Value::Undef(_) => Val::Undef,
        }
    }

    fn compute(&mut self, op: &Opcode, ty: Type, ops: &[Val]) -> DassResult<Val> {
        if *op != Opcode::Select && ops.contains(&Val::Undef) {
            return Ok(Val::Undef);
        }
        match op {
            Opcode::Binary { op, .. } => binary(*op, ops[0], ops[1]),
            Opcode::ICmp(p) => {
                let (w, a) = ops[0].bits()?;
                let (_, b) = ops[1].bits()?;
                Ok(Val::int(1, icmp(*p, a, b, w) as i64))
            }
            Opcode::FCmp(p) => {
                let (a, b) = match (ops[0], ops[1]) {
                    (Val::Float(a), Val::Float(b)) => (a as f64, b as f64),
                    (Val::Double(a), Val::Double(b)) => (a, b),
                    _ => return Err(Error::misc("fcmp on non-float operands")),
                };
                Ok(Val::int(1, fcmp(*p, a, b) as i64))
            }
            Opcode::Cast(c) => cast(*c, ops[0], ty),
            Opcode::Select => {
                let (_, c) = ops[0].bits()?;
                Ok(if c & 1 == 1 { ops[1] } else { ops[2] })
            }
            Opcode::Gep => {
                let Val::Ptr { alloc, offset } = ops[0] else {
                    return Err(Error::misc("getelementptr on a non-pointer"));
                };
                let idx = ops[1]
                    .as_i64()
                    .ok_or_else(|| Error::misc("non-integer index"))?;
                Ok(Val::Ptr {
                    alloc,
                    offset: offset + idx,
                })
            }
            Opcode::Load => self.memory.read(ops[0]),
            Opcode::Alloca => Ok(self.memory.alloc(1)),
            op => Err(Error::misc(format!("cannot evaluate `{}'", op.mnemonic()))),
        }
    }
}

pub fn binary(op: BinOp, a: Val, b: Val) -> DassResult<Val> {
    match (a, b) {
        (Val::Float(x), Val::Float(y)) => {
            let r = match op {
                BinOp::FAdd => x + y,
                BinOp::FSub => x - y,
                BinOp::FMul => x * y,
                BinOp::FDiv => x / y,
                BinOp::FRem => x % y,
                _ => return Err(Error::misc(format!("`{op}' on floats"))),
            };
            Ok(Val::Float(r))
        }
        (Val::Double(x), Val::Double(y)) => {
            let r = match op {
                BinOp::FAdd => x + y,
                BinOp::FSub => x - y,
                BinOp::FMul => x * y,
                BinOp::FDiv => x / y,
                BinOp::FRem => x % y,
                _ => return Err(Error::misc(format!("`{op}' on doubles"))),
            };
            Ok(Val::Double(r))
        }
        _ => {
            let (w, x) = a.bits()?;
            let (_, y) = b.bits()?;
            let (sx, sy) = (sext(x, w), sext(y, w));
            let div_zero = || Error::misc(format!("`{op}' by zero"));
            let r = match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::UDiv => x.checked_div(y).ok_or_else(div_zero)?,
                BinOp::URem => x.checked_rem(y).ok_or_else(div_zero)?,
                BinOp::SDiv => sx.checked_div(sy).ok_or_else(div_zero)? as u64,
                BinOp::SRem => sx.checked_rem(sy).ok_or_else(div_zero)? as u64,
                BinOp::Shl => x.checked_shl(y as u32).unwrap_or(0),
                BinOp::LShr => x.checked_shr(y as u32).unwrap_or(0),
                BinOp::AShr => (sx >> (y as u32).min(63)) as u64,
                BinOp::And => x & y,
                BinOp::Or => x | y,
                BinOp::Xor => x ^ y,
                _ => return Err(Error::misc(format!("`{op}' on integers"))),
            };
            Ok(Val::Int {
                width: w,
                bits: mask(r, w),
            })
        }
    }
}

pub fn icmp(p: ICmpPred, a: u64, b: u64, width: u32) -> bool {
    let (sa, sb) = (sext(a, width), sext(b, width));
    match p {
        ICmpPred::Eq => a == b,
        ICmpPred::Ne => a != b,
        ICmpPred::Ugt => a > b,
        ICmpPred::Uge => a >= b,
        ICmpPred::Ult => a < b,
        ICmpPred::Ule => a <= b,
        ICmpPred::Sgt => sa > sb,
        ICmpPred::Sge => sa >= sb,
        ICmpPred::Slt => sa < sb,
        ICmpPred::Sle => sa <= sb,
    }
}

pub fn fcmp(p: FCmpPred, a: f64, b: f64) -> bool {
    let uno = a.is_nan() || b.is_nan();
    match p {
        FCmpPred::False => false,
        FCmpPred::True => true,
        FCmpPred::Ord => !uno,
        FCmpPred::Uno => uno,
        FCmpPred::Oeq => !uno && a == b,
        FCmpPred::Ogt => !uno && a > b,
        FCmpPred::Oge => !uno && a >= b,
        FCmpPred::Olt => !uno && a < b,
        FCmpPred::Ole => !uno && a <= b,
        FCmpPred::One => !uno && a != b,
        FCmpPred::Ueq => uno || a == b,
        FCmpPred::Ugt => uno || a > b,
        FCmpPred::Uge => uno || a >= b,
        FCmpPred::Ult => uno || a < b,
        FCmpPred::Ule => uno || a <= b,
        FCmpPred::Une => uno || a != b,
    }
}

pub fn cast(c: CastOp, v: Val, ty: Type) -> DassResult<Val> {
    let to_width = ty.bit_width();
    let bad = || Error::misc(format!("cannot apply `{}' to {v:?}", c.mnemonic()));
    Ok(match (c, v) {
        (CastOp::ZExt | CastOp::Trunc, Val::Int { bits, .. }) => Val::Int {
            width: to_width,
            bits: mask(bits, to_width),
        },
        (CastOp::SExt, Val::Int { width, bits }) => {
            Val::int(to_width, sext(bits, width))
        }
        (CastOp::BitCast, Val::Int { bits, .. }) => match ty {
            Type::Float => Val::Float(f32::from_bits(bits as u32)),
            Type::Double => Val::Double(f64::from_bits(bits)),
            _ => v,
        },
        (CastOp::BitCast, Val::Float(x)) if ty.is_int() => {
            Val::int(32, x.to_bits() as i64)
        }
        (CastOp::BitCast, Val::Double(x)) if ty.is_int() => Val::Int {
            width: 64,
            bits: x.to_bits(),
        },
        (CastOp::BitCast, _) => v,
        (CastOp::SIToFP | CastOp::UIToFP, Val::Int { width, bits }) => {
            let x = if c == CastOp::SIToFP {
                sext(bits, width) as f64
            } else {
                bits as f64
            };
            match ty {
                Type::Float => Val::Float(x as f32),
                _ => Val::Double(x),
            }
        }
        (CastOp::FPToSI | CastOp::FPToUI, Val::Float(x)) => {
            Val::int(to_width, x as i64)
        }
        (CastOp::FPToSI | CastOp::FPToUI, Val::Double(x)) => {
            Val::int(to_width, x as i64)
        }
        (CastOp::FPExt, Val::Float(x)) => Val::Double(x as f64),
        (CastOp::FPTrunc, Val::Double(x)) => Val::Float(x as f32),
        _ => return Err(bad()),
    })
}
