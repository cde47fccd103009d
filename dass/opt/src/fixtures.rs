//! Loop kernels shared by the unit tests.
use dass_ir::{
    self as ir, Argument, BinOp, BlockIdx, Builder, ICmpPred, InstIdx,
    LoopMetadata, Type, Value,
};

fn array(name: &str) -> Vec<Argument> {
    vec![Argument {
        name: name.into(),
        ty: Type::Int(32).ptr_to(),
    }]
}

/// Increment `phi` in `latch` and leave to `exit` once it reaches `bound`.
fn close_loop(
    b: &mut Builder<'_>,
    phi: InstIdx,
    latch: BlockIdx,
    header: BlockIdx,
    exit: BlockIdx,
    bound: i64,
) {
    b.set_insert_point(latch);
    let next = b.add(phi.into(), Value::int(32, 1));
    b.add_incoming(phi, latch, next.into());
    let c = b.icmp(ICmpPred::Eq, next.into(), Value::int(32, bound));
    b.cond_br(c.into(), exit, header);
}

/// ```text
/// L1: for i in 0..4
///   L2: for j in 0..4
///     A[i * 4 + j] = A[(i + shift) * 4 + j] + 1
/// ```
/// In rotated form: `outer` and `inner` are the headers, `i` is the phi
/// `phi` and `j` is `phi0`.
pub fn shifted_update(shift: i64) -> ir::Function {
    let mut f = ir::Function::new("kernel", array("A"));
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    let outer = b.add_block("outer");
    let inner = b.add_block("inner");
    let latch = b.add_block("outer.latch");
    let exit = b.add_block("exit");
    b.set_loop_md(outer, LoopMetadata::named("L1"));
    b.set_loop_md(inner, LoopMetadata::named("L2"));

    b.set_insert_point(entry);
    b.br(outer);
    b.set_insert_point(outer);
    let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
    b.br(inner);

    b.set_insert_point(inner);
    let j = b.phi(Type::Int(32), &[(outer, Value::int(32, 0))]);
    let row = b.add(i.into(), Value::int(32, shift));
    let base = b.mul(row.into(), Value::int(32, 4));
    let src = b.add(base.into(), j.into());
    let src = b.gep(Value::Arg(0), src.into());
    let v = b.load(src.into());
    let v = b.add(v.into(), Value::int(32, 1));
    let base = b.mul(i.into(), Value::int(32, 4));
    let dst = b.add(base.into(), j.into());
    let dst = b.gep(Value::Arg(0), dst.into());
    b.store(v.into(), dst.into());
    let j1 = b.add(j.into(), Value::int(32, 1));
    b.add_incoming(j, inner, j1.into());
    let c = b.icmp(ICmpPred::Eq, j1.into(), Value::int(32, 4));
    b.cond_br(c.into(), latch, inner);

    b.set_insert_point(latch);
    let i1 = b.add(i.into(), Value::int(32, 1));
    b.add_incoming(i, latch, i1.into());
    let c = b.icmp(ICmpPred::Eq, i1.into(), Value::int(32, 4));
    b.cond_br(c.into(), exit, outer);
    b.set_insert_point(exit);
    b.ret(None);
    f
}

/// ```text
/// i = start
/// do { A[i] = 0; i += step } while (latch)
/// ```
/// The latch compares the stepped value `add` against `bound` with `pred`.
/// With `exits_on_true` a passing comparison leaves the loop.
pub fn counted_loop(
    start: i64,
    step: i64,
    pred: ICmpPred,
    bound: i64,
    exits_on_true: bool,
) -> ir::Function {
    let mut f = ir::Function::new("kernel", array("A"));
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    let body = b.add_block("body");
    let exit = b.add_block("exit");
    b.set_loop_md(body, LoopMetadata::named("L"));
    b.set_insert_point(entry);
    b.br(body);
    b.set_insert_point(body);
    let i = b.phi(Type::Int(32), &[(entry, Value::int(32, start))]);
    let p = b.gep(Value::Arg(0), i.into());
    b.store(Value::int(32, 0), p.into());
    let i1 = b.add(i.into(), Value::int(32, step));
    b.add_incoming(i, body, i1.into());
    let c = b.icmp(pred, i1.into(), Value::int(32, bound));
    if exits_on_true {
        b.cond_br(c.into(), exit, body);
    } else {
        b.cond_br(c.into(), body, exit);
    }
    b.set_insert_point(exit);
    b.ret(None);
    f
}

/// ```text
/// L1: for (i = 0; !(i > 3); i++)
///   L2: for j in 0..4
///     A[i * 4 + j] = A[12 + j] + 1
/// ```
/// The outer latch leaves on `sgt`, and the only conflict between the load
/// and the store happens in the last outer iteration.
pub fn last_row_read() -> ir::Function {
    let mut f = ir::Function::new("kernel", array("A"));
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    let outer = b.add_block("outer");
    let inner = b.add_block("inner");
    let latch = b.add_block("outer.latch");
    let exit = b.add_block("exit");
    b.set_loop_md(outer, LoopMetadata::named("L1"));
    b.set_loop_md(inner, LoopMetadata::named("L2"));

    b.set_insert_point(entry);
    b.br(outer);
    b.set_insert_point(outer);
    let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
    b.br(inner);

    b.set_insert_point(inner);
    let j = b.phi(Type::Int(32), &[(outer, Value::int(32, 0))]);
    let src = b.add(j.into(), Value::int(32, 12));
    let src = b.gep(Value::Arg(0), src.into());
    let v = b.load(src.into());
    let v = b.add(v.into(), Value::int(32, 1));
    let base = b.mul(i.into(), Value::int(32, 4));
    let dst = b.add(base.into(), j.into());
    let dst = b.gep(Value::Arg(0), dst.into());
    b.store(v.into(), dst.into());
    let j1 = b.add(j.into(), Value::int(32, 1));
    b.add_incoming(j, inner, j1.into());
    let c = b.icmp(ICmpPred::Eq, j1.into(), Value::int(32, 4));
    b.cond_br(c.into(), latch, inner);

    b.set_insert_point(latch);
    let i1 = b.add(i.into(), Value::int(32, 1));
    b.add_incoming(i, latch, i1.into());
    let c = b.icmp(ICmpPred::Sgt, i1.into(), Value::int(32, 3));
    b.cond_br(c.into(), exit, outer);
    b.set_insert_point(exit);
    b.ret(None);
    f
}

/// ```text
/// L1: for i in 0..4
///   L2: for j in 0..8
///     A[j] = A[j] + i
/// ```
/// A perfect nest whose inner loop is a single block.
pub fn row_update() -> ir::Function {
    let mut f = ir::Function::new("kernel", array("A"));
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    let outer = b.add_block("outer");
    let inner = b.add_block("inner");
    let latch = b.add_block("outer.latch");
    let exit = b.add_block("exit");
    b.set_loop_md(outer, LoopMetadata::named("L1"));
    b.set_loop_md(inner, LoopMetadata::named("L2"));

    b.set_insert_point(entry);
    b.br(outer);
    b.set_insert_point(outer);
    let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
    b.br(inner);
    b.set_insert_point(inner);
    let j = b.phi(Type::Int(32), &[(outer, Value::int(32, 0))]);
    let p = b.gep(Value::Arg(0), j.into());
    let v = b.load(p.into());
    let v = b.add(v.into(), i.into());
    b.store(v.into(), p.into());
    close_loop(&mut b, j, inner, inner, latch, 8);
    close_loop(&mut b, i, latch, outer, exit, 4);
    b.set_insert_point(exit);
    b.ret(None);
    f
}

/// ```text
/// for (i = 0; i != 8; i++)
///   s = (i & 1) == 0 ? s * 3 : s + 1
/// return s
/// ```
/// Both sides are equally likely without a profile, so the static
/// pipeline waits four cycles where the dynamic circuit waits two.
pub fn branchy_loop() -> ir::Function {
    let mut f = ir::Function::new("kernel", vec![]);
    f.ret_ty = Type::Int(32);
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    let header = b.add_block("header");
    let then = b.add_block("then");
    let other = b.add_block("else");
    let latch = b.add_block("latch");
    let exit = b.add_block("exit");
    b.set_insert_point(entry);
    b.br(header);
    b.set_insert_point(header);
    let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
    let s = b.phi(Type::Int(32), &[(entry, Value::int(32, 1))]);
    let odd = b.binary(BinOp::And, i.into(), Value::int(32, 1));
    let even = b.icmp(ICmpPred::Eq, odd.into(), Value::int(32, 0));
    b.cond_br(even.into(), then, other);
    b.set_insert_point(then);
    let s_then = b.mul(s.into(), Value::int(32, 3));
    b.br(latch);
    b.set_insert_point(other);
    let s_else = b.add(s.into(), Value::int(32, 1));
    b.br(latch);
    b.set_insert_point(latch);
    let s1 = b.phi(
        Type::Int(32),
        &[(then, s_then.into()), (other, s_else.into())],
    );
    let i1 = b.add(i.into(), Value::int(32, 1));
    b.add_incoming(i, latch, i1.into());
    b.add_incoming(s, latch, s1.into());
    let c = b.icmp(ICmpPred::Eq, i1.into(), Value::int(32, 8));
    b.cond_br(c.into(), exit, header);
    b.set_insert_point(exit);
    b.ret(Some(s1.into()));
    f
}
