use dass_ir::{
    Argument, Builder, Context, DASS_SS, Function, ICmpPred, Interpreter,
    LoopMetadata, LoopNest, Type, Val, Value,
};
use dass_opt::pass_manager::PassManager;

/// ```text
/// L1: for i in 0..4
///   L2: for j in 0..8
///     A[j] = A[j] + i
/// ```
fn kernel() -> Function {
    let mut f = Function::new(
        "kernel",
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
    let j1 = b.add(j.into(), Value::int(32, 1));
    b.add_incoming(j, inner, j1.into());
    let c = b.icmp(ICmpPred::Eq, j1.into(), Value::int(32, 8));
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

fn run_kernel(funcs: &[Function]) -> Vec<Val> {
    let mut interp = Interpreter::new(funcs);
    let data = (0..8).map(|x| Val::int(32, x * 10)).collect();
    let a = interp.memory.alloc_with(data);
    interp.call("kernel", &[a]).unwrap();
    interp.memory.array(a).unwrap().to_vec()
}

fn plan(passes: &[&str]) -> Vec<String> {
    passes.iter().map(|p| p.to_string()).collect()
}

#[test]
fn default_pipeline_outlines_the_nest() {
    let expected = run_kernel(&[kernel()]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.txt");

    let mut ctx = Context::new(vec![kernel()]);
    ctx.extra_opts = vec![
        format!("port-offsets:file={}", path.display()),
        "static-loops-cf:top=kernel".to_string(),
    ];
    let pm = PassManager::default_passes().unwrap();
    pm.execute_plan(&mut ctx, &plan(&["all"]), &[], false).unwrap();
    assert!(ctx.validate().is_ok());

    let nest = ctx
        .functions
        .iter()
        .find(|f| f.name != "kernel")
        .unwrap();
    assert_eq!(nest.attributes.get(DASS_SS).map(String::as_str), Some("0"));
    assert!(LoopNest::new(nest).by_name("L1").is_some());

    let top = ctx.find("kernel").unwrap();
    assert!(top.is_static());
    assert!(LoopNest::new(top).is_empty());
    assert_eq!(run_kernel(&ctx.functions), expected);

    let table = std::fs::read_to_string(path).unwrap();
    assert!(table.contains("Function: kernel, "));
    assert!(table.contains(&format!("Function: {}, ", nest.name)));
}

#[test]
fn excluded_passes_do_not_run() {
    let mut ctx = Context::new(vec![kernel()]);
    let pm = PassManager::default_passes().unwrap();
    pm.execute_plan(
        &mut ctx,
        &plan(&["dass"]),
        &plan(&["static-loops-mem"]),
        false,
    )
    .unwrap();
    assert_eq!(ctx.functions.len(), 1);
    assert!(!ctx.functions[0].has_calls());
}

#[test]
fn unknown_passes_are_rejected() {
    let mut ctx = Context::new(vec![kernel()]);
    let pm = PassManager::default_passes().unwrap();
    let res = pm.execute_plan(&mut ctx, &plan(&["unroll"]), &[], false);
    assert!(res.is_err());
}

#[test]
fn help_lists_passes_and_aliases() {
    let pm = PassManager::default_passes().unwrap();
    let help = pm.complete_help();
    for pass in [
        "static-islands",
        "static-loops-mem",
        "static-loops-cf",
        "loop-interchange",
        "port-offsets",
    ] {
        assert!(help.contains(pass), "{pass} missing from help");
    }
    assert!(help.contains(
        "- all: static-islands, static-loops-mem, static-loops-cf, \
         loop-interchange, port-offsets"
    ));
    let alias = pm.specific_help("dass").unwrap();
    assert!(alias.starts_with("`dass' is an alias"));
}
