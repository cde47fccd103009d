use dass_ir::{
    Argument, Builder, Context, Function, ICmpPred, InterchangeRequest,
    LoopMetadata, Type, Value,
};
use dass_opt::passes::LoopInterchange;
use dass_opt::traversal::Visitor;
use dass_opt::verify::{
    SearchStrategy, Verdict, VerificationOracle, VerificationUnit,
    search_depth,
};
use dass_utils::{DassResult, ErrorKind};
use proptest::prelude::*;

/// ```text
/// L1: for i in 0..4
///   L2: for j in 0..4
///     A[i * 4 + j] = A[i * 4 + j] + 1
/// ```
/// with `req` attached to `L2`.
fn increment(req: Option<InterchangeRequest>) -> Function {
    let mut f = Function::new(
        "increment",
        vec![Argument {
            name: "A".into(),
            ty: Type::Int(32).ptr_to(),
        }],
    );
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    let outer = b.add_block("outer");
    let inner = b.add_block("inner");
    let latch = b.add_block("outer.latch");
    let exit = b.add_block("exit");
    b.set_loop_md(outer, LoopMetadata::named("L1"));
    b.set_loop_md(
        inner,
        LoopMetadata {
            interchange_check: req,
            ..LoopMetadata::named("L2")
        },
    );

    b.set_insert_point(entry);
    b.br(outer);
    b.set_insert_point(outer);
    let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
    b.br(inner);

    b.set_insert_point(inner);
    let j = b.phi(Type::Int(32), &[(outer, Value::int(32, 0))]);
    let row = b.mul(i.into(), Value::int(32, 4));
    let idx = b.add(row.into(), j.into());
    let p = b.gep(Value::Arg(0), idx.into());
    let v = b.load(p.into());
    let v = b.add(v.into(), Value::int(32, 1));
    b.store(v.into(), p.into());
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

fn inner_md(ctx: &Context) -> &LoopMetadata {
    let f = &ctx.functions[0];
    f.blocks[f.block_by_name("inner").unwrap()]
        .loop_md
        .as_ref()
        .unwrap()
}

#[test]
fn in_place_update_only_interchanges_at_depth_zero() {
    let mut ctx =
        Context::new(vec![increment(Some(InterchangeRequest::Auto))]);
    LoopInterchange::do_pass_default(&mut ctx).unwrap();
    assert_eq!(inner_md(&ctx).interchange, Some(0));

    let mut ctx =
        Context::new(vec![increment(Some(InterchangeRequest::Depth(1)))]);
    let err = LoopInterchange::do_pass_default(&mut ctx).err().unwrap();
    assert_eq!(
        err.kind(),
        &ErrorKind::UnsafeInterchange {
            loop_name: "L2".to_string(),
            depth: 1
        }
    );
    assert_eq!(inner_md(&ctx).interchange, None);
}

#[test]
fn committed_loops_are_not_checked_again() {
    let mut ctx =
        Context::new(vec![increment(Some(InterchangeRequest::Auto))]);
    LoopInterchange::do_pass_default(&mut ctx).unwrap();
    let first = inner_md(&ctx).clone();
    // A domain that would be rejected if the loop were checked again.
    ctx.extra_opts = vec![
        "loop-interchange:lower=3".to_string(),
        "loop-interchange:upper=1".to_string(),
    ];
    LoopInterchange::do_pass_default(&mut ctx).unwrap();
    assert_eq!(inner_md(&ctx), &first);
    assert_eq!(first.interchange_check, None);
}

#[test]
fn loops_without_requests_are_untouched() {
    let mut ctx = Context::new(vec![increment(None)]);
    LoopInterchange::do_pass_default(&mut ctx).unwrap();
    assert_eq!(inner_md(&ctx), &LoopMetadata::named("L2"));
}

/// Verifies exactly the distances up to `safe`.
struct Threshold {
    safe: u32,
    asked: Vec<u32>,
}

impl VerificationOracle for Threshold {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn verify(&mut self, unit: &VerificationUnit) -> DassResult<Verdict> {
        self.asked.push(unit.distance);
        Ok(if unit.distance <= self.safe {
            Verdict::Verified
        } else {
            Verdict::Refuted
        })
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn search_commits_the_last_verified_distance(
        lower in 0u32..6,
        len in 0u32..6,
        safe in 0u32..14,
        binary in any::<bool>(),
    ) {
        let f = increment(None);
        let upper = lower + len;
        let strategy = if binary {
            SearchStrategy::Binary
        } else {
            SearchStrategy::Linear
        };
        let mut oracle = Threshold { safe, asked: vec![] };
        let depth = search_depth(lower, upper, strategy, |d| {
            let unit = VerificationUnit::new(&f, "L2", d)?;
            Ok(oracle.verify(&unit)?.is_verified())
        })
        .unwrap();

        let expected = if safe >= upper {
            upper
        } else if safe >= lower {
            safe
        } else {
            lower.saturating_sub(1)
        };
        prop_assert_eq!(depth, expected);
        prop_assert!(oracle.asked.iter().all(|d| (lower..=upper).contains(d)));
        if !binary {
            let last = upper.min(lower.max(safe + 1));
            let tried: Vec<u32> = (lower..=last).collect();
            prop_assert_eq!(oracle.asked, tried);
        }
    }

    #[test]
    fn committing_is_idempotent(depth in any::<u32>(), fixed in any::<bool>()) {
        let mut md = LoopMetadata::named("L2");
        md.interchange_check = Some(if fixed {
            InterchangeRequest::Depth(depth)
        } else {
            InterchangeRequest::Auto
        });
        md.commit_interchange(depth);
        let once = md.clone();
        md.commit_interchange(depth);
        prop_assert_eq!(md, once);
    }
}
