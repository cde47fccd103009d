//! Lowering of a sliced function into a Boogie memory-access oracle.
//!
//! Every SSA value becomes a Boogie variable. Loads produce arbitrary
//! values. Every load and store inside the loop enclosing the checked loop
//! may, on a non-deterministic branch, return its access descriptor: the
//! statement id, the array, the element index and one iteration counter
//! per nesting level. Header induction variables are havocked and
//! constrained by their range so that loop bodies are verified once.
use super::boogie::{Binding, Expr, Procedure, Stmt, Ty, ident};
use crate::analysis::InductionVariable;
use dass_ir::{
    self as ir, BlockIdx, CastOp, Constant, FCmpPred, ICmpPred, InstIdx,
    LoopIdx, LoopNest, Opcode, Type, Value, mask,
};
use dass_utils::{DassResult, Error};
use linked_hash_map::LinkedHashMap;
use std::ops::RangeInclusive;

/// Width of statement ids, array ids and iteration counters.
const BW: u32 = 32;

/// Index, innermost first, of the iteration counter compared by the
/// harness: the loop enclosing the checked one.
pub const INTERCHANGED_LEVEL: usize = 1;

/// The closed range of values a header induction variable takes on entry
/// to its loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invariant {
    pub header: BlockIdx,
    pub phi: InstIdx,
    pub lower: i64,
    pub upper: i64,
    pub signed: bool,
    pub width: u32,
}

impl Invariant {
    /// Derived from the constant-bounded induction variable of `l`. `None`
    /// leaves the header unconstrained.
    pub fn of_loop(
        func: &ir::Function,
        nest: &LoopNest,
        l: LoopIdx,
    ) -> Option<Self> {
        let iv = InductionVariable::find(func, nest, l)?;
        let (start, step, last) =
            (i128::from(iv.start), i128::from(iv.step), i128::from(iv.last));
        // A compared phi runs one more iteration than its last passing value.
        let bound = if iv.tests_phi { last + step } else { last };
        let (lower, upper) = if step > 0 {
            (start, bound.max(start))
        } else {
            (bound.min(start), start)
        };

        let signed = iv.pred.is_signed();
        let w = iv.width.min(64);
        let (min, max) = if signed {
            (-(1i128 << (w - 1)), (1i128 << (w - 1)) - 1)
        } else {
            (0, (1i128 << w) - 1)
        };
        let fits =
            |v: i128| v >= min && v <= max && i64::try_from(v).is_ok();
        if !fits(lower) || !fits(upper) {
            return None;
        }
        Some(Invariant {
            header: nest.get(l).header,
            phi: iv.phi,
            lower: lower as i64,
            upper: upper as i64,
            signed,
            width: iv.width,
        })
    }

    /// The values the phi may take.
    pub fn values(&self) -> RangeInclusive<i64> {
        self.lower..=self.upper
    }

    fn expr(&self, var: Expr) -> Expr {
        let w = self.width;
        let (ge, le) = if self.signed {
            ("sge", "sle")
        } else {
            ("uge", "ule")
        };
        Expr::And(vec![
            Expr::app(
                format!("bv{w}{ge}"),
                vec![var.clone(), Expr::bv(mask(self.lower as u64, w), w)],
            ),
            Expr::app(
                format!("bv{w}{le}"),
                vec![var, Expr::bv(mask(self.upper as u64, w), w)],
            ),
        ])
    }
}

/// A load or store reported by the generated procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryAccess {
    pub stmt: u32,
    pub inst: InstIdx,
    pub is_load: bool,
    /// Position of the base pointer among the accessed arrays.
    pub array: u32,
    /// Element index within the array.
    pub index: Value,
    /// Induction variable of every nesting level, innermost first. Levels
    /// deeper than the access report `0`.
    pub iterations: Vec<Option<InstIdx>>,
}

pub(super) struct Lowering<'a> {
    func: &'a ir::Function,
    nest: &'a LoopNest,
    depth: u32,
    invariants: Vec<Invariant>,
    accesses: Vec<MemoryAccess>,
    undefs: LinkedHashMap<String, Ty>,
}

fn ty_of(ty: Type) -> Ty {
    match ty {
        Type::Void | Type::Int(_) => Ty::Bv(ty.bit_width().max(1)),
        Type::Float => Ty::Float,
        Type::Double => Ty::Double,
        Type::Ptr(_) => {
            let elem = match ty.pointee() {
                Some(t) => ty_of(t),
                None => Ty::Bv(8),
            };
            Ty::Map(Box::new(Ty::Bv(64)), Box::new(elem))
        }
    }
}

fn returns(depth: u32) -> Vec<Binding> {
    let mut rets = vec![
        ("stmt".to_string(), Ty::Bv(BW)),
        ("address".to_string(), Ty::Bv(64)),
    ];
    rets.extend((0..depth).map(|k| (format!("iteration_{k}"), Ty::Bv(BW))));
    rets.extend([
        ("is_load".to_string(), Ty::Bool),
        ("valid".to_string(), Ty::Bool),
        ("array".to_string(), Ty::Bv(BW)),
    ]);
    rets
}

/// `e` of `from` bits resized to `to` bits.
fn resize(e: Expr, from: u32, to: u32) -> Expr {
    match from.cmp(&to) {
        std::cmp::Ordering::Equal => e,
        std::cmp::Ordering::Less => {
            Expr::app(format!("zext.bv{from}.bv{to}"), vec![e])
        }
        std::cmp::Ordering::Greater => Expr::Extract {
            e: Box::new(e),
            hi: to,
            lo: 0,
        },
    }
}

impl<'a> Lowering<'a> {
    pub(super) fn new(
        func: &'a ir::Function,
        nest: &'a LoopNest,
        target: LoopIdx,
    ) -> DassResult<Self> {
        let lp = nest.get(target);
        let region = lp.parent.ok_or_else(|| {
            Error::unsupported(format!(
                "loop at `{}' is not nested in another loop",
                func.block(lp.header).name
            ))
        })?;
        let invariants: Vec<Invariant> = nest
            .iter()
            .filter_map(|(l, _)| Invariant::of_loop(func, nest, l))
            .collect();

        let mut lowering = Lowering {
            func,
            nest,
            depth: lp.depth,
            invariants,
            accesses: vec![],
            undefs: LinkedHashMap::new(),
        };
        let mut arrays: Vec<Value> = vec![];
        for i in func.inst_iter() {
            let inst = func.inst(i);
            let is_load = match inst.op {
                Opcode::Load => true,
                Opcode::Store => false,
                _ => continue,
            };
            if !nest.contains(region, inst.block) {
                continue;
            }
            let (base, index) = lowering.split_pointer(i);
            let array = match arrays.iter().position(|a| *a == base) {
                Some(pos) => pos,
                None => {
                    arrays.push(base);
                    arrays.len() - 1
                }
            };
            let iterations = lowering.iterations(inst.block)?;
            lowering.accesses.push(MemoryAccess {
                stmt: lowering.accesses.len() as u32,
                inst: i,
                is_load,
                array: array as u32,
                index,
                iterations,
            });
        }
        Ok(lowering)
    }

    pub(super) fn finish(self) -> (u32, Vec<Invariant>, Vec<MemoryAccess>) {
        (self.depth, self.invariants, self.accesses)
    }

    /// Base pointer and element index of the address of a load or store.
    fn split_pointer(&self, i: InstIdx) -> (Value, Value) {
        let ptr = self
            .func
            .inst(i)
            .pointer_operand()
            .unwrap_or(Value::Undef(Type::Ptr(ir::ElemTy::Opaque)));
        match ptr {
            Value::Inst(g) if matches!(self.func.inst(g).op, Opcode::Gep) => {
                let ops = &self.func.inst(g).operands;
                (ops[0], ops[1])
            }
            _ => (ptr, Value::int(64, 0)),
        }
    }

    /// `A[i]` rendering of the location accessed by `i`.
    fn cell(&mut self, i: InstIdx) -> String {
        let (base, index) = self.split_pointer(i);
        format!("{}[{}]", self.operand(&base), self.operand(&index))
    }

    fn iterations(&self, bb: BlockIdx) -> DassResult<Vec<Option<InstIdx>>> {
        let mut iterations = vec![None; self.depth as usize];
        let mut cur = self.nest.loop_for(bb);
        while let Some(l) = cur {
            let lp = self.nest.get(l);
            cur = lp.parent;
            if lp.depth > self.depth {
                continue;
            }
            let inv = self
                .invariants
                .iter()
                .find(|inv| inv.header == lp.header)
                .ok_or_else(|| {
                    Error::unsupported(format!(
                        "loop at `{}' has no bounded induction variable",
                        self.func.block(lp.header).name
                    ))
                })?;
            iterations[(self.depth - lp.depth) as usize] = Some(inv.phi);
        }
        Ok(iterations)
    }

    /* ============ Values ============ */

    fn var(&self, i: InstIdx) -> String {
        ident("$", self.func.inst(i).name.as_ref())
    }

    fn arg(&self, n: usize) -> String {
        ident("$", self.func.args[n].name.as_ref())
    }

    fn label(&self, bb: BlockIdx) -> String {
        ident("bb_", self.func.block(bb).name.as_ref())
    }

    fn operand(&mut self, v: &Value) -> Expr {
        match v {
            Value::Arg(n) => Expr::Var(self.arg(*n as usize)),
            Value::Inst(i) => Expr::Var(self.var(*i)),
            Value::Const(Constant::Int { width, value }) => {
                Expr::bv(mask(*value as u64, *width), *width)
            }
            Value::Const(Constant::Float(bits)) => {
                self.real(f64::from(f32::from_bits(*bits)), Type::Float)
            }
            Value::Const(Constant::Double(bits)) => {
                self.real(f64::from_bits(*bits), Type::Double)
            }
            Value::Undef(ty) => self.undef(*ty),
        }
    }

    fn real(&mut self, x: f64, ty: Type) -> Expr {
        if !x.is_finite() {
            return self.undef(ty);
        }
        let conv = if ty == Type::Float {
            "to_float"
        } else {
            "to_double"
        };
        let mut lit = x.to_string();
        if !lit.contains('.') {
            lit.push_str(".0");
        }
        Expr::app(conv, vec![Expr::Real(lit)])
    }

    fn undef(&mut self, ty: Type) -> Expr {
        let name = match ty {
            Type::Int(w) => format!("undef_bv{w}"),
            Type::Float => "undef_float".to_string(),
            Type::Double => "undef_double".to_string(),
            Type::Ptr(_) | Type::Void => "undef_ptr".to_string(),
        };
        self.undefs.entry(name.clone()).or_insert_with(|| ty_of(ty));
        Expr::Var(name)
    }

    fn width(&self, v: &Value) -> u32 {
        self.func.value_type(v).bit_width()
    }

    /* ============ Procedure ============ */

    /// The sliced function as a procedure returning one access
    /// descriptor.
    pub(super) fn procedure(&mut self) -> DassResult<Procedure> {
        let func = self.func;
        let params: Vec<Binding> = (0..func.args.len())
            .map(|n| (self.arg(n), ty_of(func.args[n].ty)))
            .collect();

        let mut body = vec![
            Stmt::assign("boogie_fp_mode", Expr::var("RNE")),
            Stmt::assign("valid", Expr::Bool(false)),
        ];
        for bb in &func.layout {
            body.push(Stmt::Label(self.label(*bb)));
            for inv in self.invariants.iter().filter(|inv| inv.header == *bb) {
                let phi = Expr::Var(self.var(inv.phi));
                body.push(Stmt::Assert(inv.expr(phi.clone())));
                body.push(Stmt::Havoc(self.var(inv.phi)));
                body.push(Stmt::Assume(inv.expr(phi)));
            }
            for i in &func.block(*bb).insts {
                self.instruction(*i, &mut body)?;
            }
        }

        let mut locals: Vec<Binding> = func
            .inst_iter()
            .filter(|i| {
                let ty = func.inst(*i).ty;
                ty != Type::Void && !ty.is_ptr()
            })
            .map(|i| (self.var(i), ty_of(func.inst(i).ty)))
            .collect();
        locals.extend(self.undefs.iter().map(|(n, t)| (n.clone(), t.clone())));
        locals.push(("boogie_fp_mode".to_string(), Ty::RMode));

        Ok(Procedure {
            name: ident("", func.name.as_ref()),
            inline: Some(1),
            params,
            returns: returns(self.depth),
            locals,
            body,
        })
    }

    fn instruction(
        &mut self,
        i: InstIdx,
        out: &mut Vec<Stmt>,
    ) -> DassResult<()> {
        let func = self.func;
        let inst = func.inst(i);
        // Pointers only matter through the access descriptors.
        if inst.ty.is_ptr() {
            return Ok(());
        }
        let x = self.var(i);
        let ops: Vec<Expr> =
            inst.operands.iter().map(|v| self.operand(v)).collect();
        let unsupported = || {
            Error::unsupported(format!(
                "cannot translate `{}' to Boogie",
                ir::Printer::format_instruction(func, i)
            ))
        };

        match &inst.op {
            Opcode::Binary { op, .. } if op.is_fp() => {
                let prefix = if inst.ty == Type::Double { "d" } else { "f" };
                let name = format!("{prefix}{}", &op.mnemonic()[1..]);
                let mut args = vec![Expr::var("boogie_fp_mode")];
                args.extend(ops);
                out.push(Stmt::assign(x, Expr::app(name, args)));
            }
            Opcode::Binary { op, .. } => {
                let w = inst.ty.bit_width();
                out.push(Stmt::assign(
                    x,
                    Expr::app(format!("bv{w}{}", op.mnemonic()), ops),
                ));
            }
            Opcode::ICmp(pred) => {
                let src = func.value_type(&inst.operands[0]);
                if src.is_ptr() {
                    return Err(unsupported());
                }
                let w = src.bit_width();
                let [a, b] = [ops[0].clone(), ops[1].clone()];
                let cond = match pred {
                    ICmpPred::Eq => a.eq(b),
                    ICmpPred::Ne => a.ne(b),
                    p => Expr::app(format!("bv{w}{}", p.mnemonic()), vec![a, b]),
                };
                out.push(Stmt::assign_bool(x, cond));
            }
            Opcode::FCmp(pred) => {
                let src = func.value_type(&inst.operands[0]);
                let prefix = if src == Type::Double { "d" } else { "f" };
                let cond = fcmp(*pred, prefix, &ops[0], &ops[1]);
                out.push(Stmt::assign_bool(x, cond));
            }
            Opcode::Cast(c) => {
                let src = func.value_type(&inst.operands[0]);
                let a = ops[0].clone();
                let (from, to) = (src.bit_width(), inst.ty.bit_width());
                let fp = |ty: Type| {
                    if ty == Type::Double { "double" } else { "float" }
                };
                let rounded = |name: String| {
                    let mode = Expr::var("boogie_fp_mode");
                    Expr::app(name, vec![mode, a.clone()])
                };
                let e = match c {
                    CastOp::ZExt | CastOp::SExt if from < to => {
                        let name = format!("{}.bv{from}.bv{to}", c.mnemonic());
                        Expr::app(name, vec![a.clone()])
                    }
                    CastOp::ZExt | CastOp::SExt | CastOp::Trunc => {
                        resize(a.clone(), from, to)
                    }
                    CastOp::BitCast if src == inst.ty => a.clone(),
                    CastOp::SIToFP => {
                        rounded(format!("bv{from}s{}", fp(inst.ty)))
                    }
                    CastOp::UIToFP => {
                        rounded(format!("bv{from}{}", fp(inst.ty)))
                    }
                    CastOp::FPToSI => rounded(format!("{}2sbv{to}", fp(src))),
                    CastOp::FPToUI => rounded(format!("{}2ubv{to}", fp(src))),
                    CastOp::FPExt | CastOp::FPTrunc => {
                        let comment = format!("{x} := {}", c.mnemonic());
                        out.push(Stmt::Comment(comment));
                        out.push(Stmt::Havoc(x));
                        return Ok(());
                    }
                    CastOp::BitCast => return Err(unsupported()),
                };
                out.push(Stmt::assign(x, e));
            }
            Opcode::Select => {
                out.push(Stmt::If {
                    cond: ops[0].clone().eq(Expr::bv(1, 1)),
                    then: vec![Stmt::assign(&x, ops[1].clone())],
                    els: vec![Stmt::assign(&x, ops[2].clone())],
                });
            }
            Opcode::Phi { .. } | Opcode::Gep | Opcode::Alloca => {}
            Opcode::Load => {
                let cell = self.cell(i);
                out.push(Stmt::Comment(format!("{x} := {cell}")));
                out.push(Stmt::Havoc(x));
                self.report_access(i, out);
            }
            Opcode::Store => {
                let cell = self.cell(i);
                out.push(Stmt::Comment(format!("{cell} := {}", ops[0])));
                self.report_access(i, out);
            }
            Opcode::Call { .. } => return Err(unsupported()),
            Opcode::Br { target } => {
                out.extend(self.edge(inst.block, *target));
            }
            Opcode::CondBr { then_bb, else_bb } => {
                out.push(Stmt::If {
                    cond: ops[0].clone().eq(Expr::bv(1, 1)),
                    then: self.edge(inst.block, *then_bb),
                    els: self.edge(inst.block, *else_bb),
                });
            }
            Opcode::Switch { default, cases } => {
                let w = func.value_type(&inst.operands[0]).bit_width();
                let mut chain = self.edge(inst.block, *default);
                for (value, target) in cases.iter().rev() {
                    let case = Expr::bv(mask(*value as u64, w), w);
                    chain = vec![Stmt::If {
                        cond: ops[0].clone().eq(case),
                        then: self.edge(inst.block, *target),
                        els: chain,
                    }];
                }
                out.extend(chain);
            }
            Opcode::Ret => out.push(Stmt::Return),
        }
        Ok(())
    }

    /// Phi assignments and the jump along `from -> to`. Back edges also
    /// check that the induction variables stay in range.
    fn edge(&mut self, from: BlockIdx, to: BlockIdx) -> Vec<Stmt> {
        let func = self.func;
        let mut stmts = vec![];
        for phi in func.phis(to) {
            let inst = func.inst(phi);
            if inst.ty.is_ptr() {
                continue;
            }
            if let Some(v) = inst.incoming_for(from) {
                let e = self.operand(&v);
                stmts.push(Stmt::assign(self.var(phi), e));
            }
        }
        let back_edge = self
            .nest
            .loop_for(to)
            .is_some_and(|l| self.nest.get(l).header == to && self.nest.contains(l, from));
        if back_edge {
            for inv in self.invariants.iter().filter(|inv| inv.header == to) {
                stmts.push(Stmt::Assert(inv.expr(Expr::Var(self.var(inv.phi)))));
            }
        }
        stmts.push(Stmt::Goto(self.label(to)));
        stmts
    }

    fn report_access(&mut self, i: InstIdx, out: &mut Vec<Stmt>) {
        let Some(access) = self.accesses.iter().find(|a| a.inst == i).cloned()
        else {
            return;
        };
        let index = self.operand(&access.index);
        let mut then = vec![
            Stmt::assign("stmt", Expr::bv(u64::from(access.stmt), BW)),
            Stmt::assign("address", resize(index, self.width(&access.index), 64)),
        ];
        for (k, phi) in access.iterations.iter().enumerate() {
            let counter = match phi {
                Some(phi) => {
                    let w = self.func.inst(*phi).ty.bit_width();
                    resize(Expr::Var(self.var(*phi)), w, BW)
                }
                None => Expr::bv(0, BW),
            };
            then.push(Stmt::assign(format!("iteration_{k}"), counter));
        }
        then.extend([
            Stmt::assign("is_load", Expr::Bool(access.is_load)),
            Stmt::assign("valid", Expr::Bool(true)),
            Stmt::assign("array", Expr::bv(u64::from(access.array), BW)),
            Stmt::Return,
        ]);
        out.push(Stmt::If {
            cond: Expr::Nondet,
            then,
            els: vec![],
        });
    }

    /* ============ Harness ============ */

    /// `main`: two calls with the same arguments and the race-freedom
    /// assertion for `distance`.
    pub(super) fn harness(&self, distance: u32) -> Procedure {
        let func = self.func;
        let mut locals = vec![];
        let mut body = vec![Stmt::assign("distance", Expr::bv(u64::from(distance), BW))];
        for c in 0..2 {
            let outs: Vec<Binding> = returns(self.depth)
                .into_iter()
                .map(|(n, t)| (format!("{n}_{c}"), t))
                .collect();
            body.push(Stmt::Call {
                outs: outs.iter().map(|(n, _)| n.clone()).collect(),
                callee: ident("", func.name.as_ref()),
                args: (0..func.args.len()).map(|n| Expr::Var(self.arg(n))).collect(),
            });
            locals.extend(outs);
        }
        locals.extend((0..func.args.len()).map(|n| (self.arg(n), ty_of(func.args[n].ty))));
        locals.push(("distance".to_string(), Ty::Bv(BW)));

        let level = INTERCHANGED_LEVEL;
        body.push(Stmt::Comment("no race between iterations closer than `distance'".into()));
        body.push(Stmt::Assert(Expr::Or(vec![
            Expr::var("valid_0").not(),
            Expr::var("valid_1").not(),
            Expr::And(vec![Expr::var("is_load_0"), Expr::var("is_load_1")]),
            Expr::var("array_0").ne(Expr::var("array_1")),
            Expr::var("stmt_0").eq(Expr::var("stmt_1")),
            Expr::app(
                format!("bv{BW}uge"),
                vec![
                    Expr::app(
                        format!("bv{BW}sub"),
                        vec![
                            Expr::var(format!("iteration_{level}_1")),
                            Expr::var(format!("iteration_{level}_0")),
                        ],
                    ),
                    Expr::var("distance"),
                ],
            ),
            Expr::var("address_0").ne(Expr::var("address_1")),
        ])));

        Procedure {
            name: "main".to_string(),
            inline: None,
            params: vec![],
            returns: vec![],
            locals,
            body,
        }
    }
}

fn fcmp(pred: FCmpPred, prefix: &str, a: &Expr, b: &Expr) -> Expr {
    let cmp = |name: &str, x: &Expr, y: &Expr| {
        Expr::app(format!("{prefix}{name}"), vec![x.clone(), y.clone()])
    };
    let ordered = || Expr::And(vec![cmp("eq", a, a), cmp("eq", b, b)]);
    let differ = || Expr::Or(vec![cmp("lt", a, b), cmp("gt", a, b)]);
    match pred {
        FCmpPred::False => Expr::Bool(false),
        FCmpPred::True => Expr::Bool(true),
        FCmpPred::Oeq => cmp("eq", a, b),
        FCmpPred::Ogt => cmp("gt", a, b),
        FCmpPred::Oge => cmp("geq", a, b),
        FCmpPred::Olt => cmp("lt", a, b),
        FCmpPred::Ole => cmp("leq", a, b),
        FCmpPred::One => differ(),
        FCmpPred::Ord => ordered(),
        FCmpPred::Uno => ordered().not(),
        FCmpPred::Ueq => differ().not(),
        FCmpPred::Ugt => cmp("leq", a, b).not(),
        FCmpPred::Uge => cmp("lt", a, b).not(),
        FCmpPred::Ult => cmp("geq", a, b).not(),
        FCmpPred::Ule => cmp("gt", a, b).not(),
        FCmpPred::Une => cmp("eq", a, b).not(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::VerificationUnit;
    use crate::fixtures::{counted_loop, shifted_update};
    use super::*;

    fn invariant(f: &ir::Function) -> Option<(RangeInclusive<i64>, bool)> {
        let nest = LoopNest::new(f);
        let l = nest.by_name("L")?;
        Invariant::of_loop(f, &nest, l).map(|inv| (inv.values(), inv.signed))
    }

    #[test]
    fn invariants_follow_the_continuing_relation() {
        use ICmpPred::*;
        let cases = [
            // start, step, latch, bound, true edge exits, range, signed
            (0, 1, Slt, 4, false, Some((0..=3, true))),
            (0, 1, Sge, 4, true, Some((0..=3, true))),
            (0, 1, Sle, 3, false, Some((0..=3, true))),
            (0, 1, Sgt, 3, true, Some((0..=3, true))),
            (0, 1, Ult, 4, false, Some((0..=3, false))),
            (0, 1, Uge, 4, true, Some((0..=3, false))),
            (0, 1, Ule, 3, false, Some((0..=3, false))),
            (0, 1, Ugt, 3, true, Some((0..=3, false))),
            (0, 1, Ne, 4, false, Some((0..=3, false))),
            (0, 1, Eq, 4, true, Some((0..=3, false))),
            (0, 2, Slt, 7, false, Some((0..=6, true))),
            (0, 2, Ne, 8, false, Some((0..=6, false))),
            (3, -1, Sgt, 0, false, Some((1..=3, true))),
            (3, -1, Sge, 0, false, Some((0..=3, true))),
            (3, -1, Sle, -1, true, Some((0..=3, true))),
            (3, -1, Slt, 0, true, Some((0..=3, true))),
            // Never stop without wrapping around.
            (0, 1, Eq, 4, false, None),
            (0, 1, Ne, 4, true, None),
            (0, 1, Sgt, 4, false, None),
            (4, -1, Slt, 0, false, None),
            (0, 2, Ne, 5, false, None),
        ];
        for (start, step, pred, bound, exits, expected) in cases {
            let f = counted_loop(start, step, pred, bound, exits);
            assert_eq!(
                invariant(&f),
                expected,
                "start {start}, step {step}, {} {bound}, exits on true: {exits}",
                pred.mnemonic()
            );
        }
    }

    #[test]
    fn constant_on_the_left_is_swapped() {
        // 4 > i + 1
        let mut f = counted_loop(0, 1, ICmpPred::Sgt, 4, false);
        let cmp = f.inst_by_name("cmp").unwrap();
        f.inst_mut(cmp).operands.swap(0, 1);
        assert_eq!(invariant(&f), Some((0..=3, true)));
    }

    #[test]
    fn comparing_the_phi_runs_one_more_iteration() {
        // do { .. } while (i++ < 3)
        let mut f = counted_loop(0, 1, ICmpPred::Slt, 3, false);
        let cmp = f.inst_by_name("cmp").unwrap();
        let phi = f.inst_by_name("phi").unwrap();
        f.inst_mut(cmp).operands[0] = Value::Inst(phi);
        assert_eq!(invariant(&f), Some((0..=3, true)));
    }

    #[test]
    fn accesses_report_one_counter_per_level() {
        let unit = VerificationUnit::new(&shifted_update(0), "L2", 1).unwrap();
        let f = &unit.func;
        let i = f.inst_by_name("phi").unwrap();
        let j = f.inst_by_name("phi0").unwrap();
        assert_eq!(unit.depth, 2);
        assert_eq!(unit.accesses.len(), 2);
        let (load, store) = (&unit.accesses[0], &unit.accesses[1]);
        assert!(load.is_load && !store.is_load);
        assert_eq!((load.stmt, store.stmt), (0, 1));
        assert_eq!((load.array, store.array), (0, 0));
        assert_eq!(load.iterations, vec![Some(j), Some(i)]);
        assert_eq!(
            store.index,
            Value::Inst(f.inst_by_name("add2").unwrap())
        );
    }

    #[test]
    fn invariants_follow_latch_bounds() {
        let unit = VerificationUnit::new(&shifted_update(1), "L2", 1).unwrap();
        assert_eq!(unit.invariants.len(), 2);
        for inv in &unit.invariants {
            assert_eq!(inv.values(), 0..=3);
            assert!(!inv.signed);
            assert_eq!(inv.width, 32);
        }
    }

    #[test]
    fn procedure_havocs_headers_and_reports_accesses() {
        let unit = VerificationUnit::new(&shifted_update(0), "L2", 2).unwrap();
        let text = unit.program.to_string();
        let range = "bv32uge($phi0, 0bv32) && bv32ule($phi0, 3bv32)";
        assert!(text.contains("procedure {:inline 1} kernel($A: [bv64]bv32)"));
        assert!(text.contains(&format!("  assert {range};\n")));
        assert!(text.contains("  havoc $phi0;\n"));
        assert!(text.contains(&format!("  assume {range};\n")));
        assert!(text.contains("$add2 := bv32add($mul0, $phi0);"));
        assert!(text.contains("address := zext.bv32.bv64($add2);"));
        assert!(text.contains("iteration_1 := $phi;"));
        // The stored value is sliced away.
        assert!(text.contains("var undef_bv32: bv32;"));
        assert!(text.contains("distance := 2bv32;"));
        assert!(text.contains(
            "bv32uge(bv32sub(iteration_1_1, iteration_1_0), distance)"
        ));
    }

    #[test]
    fn unordered_comparisons_negate_ordered_ones() {
        let (a, b) = (Expr::var("a"), Expr::var("b"));
        assert_eq!(fcmp(FCmpPred::Ugt, "d", &a, &b).to_string(), "!dleq(a, b)");
        assert_eq!(
            fcmp(FCmpPred::One, "f", &a, &b).to_string(),
            "flt(a, b) || fgt(a, b)"
        );
        assert_eq!(
            fcmp(FCmpPred::Uno, "f", &a, &b).to_string(),
            "!(feq(a, a) && feq(b, b))"
        );
    }
}
