use dass_ir::{
    extract_island, Argument, Builder, Context, Function, InstIdx, Interpreter,
    Island, Printer, Type, Val, Value,
};

fn int_arg(name: &str) -> Argument {
    Argument {
        name: name.into(),
        ty: Type::Int(32),
    }
}

/// `g(v) = v + 1`
fn callee() -> Function {
    let mut g = Function::new("g", vec![int_arg("v")]);
    g.ret_ty = Type::Int(32);
    let mut b = Builder::new(&mut g);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let r = b.add(Value::Arg(0), Value::int(32, 1));
    b.ret(Some(r.into()));
    g
}

/// Two arithmetic islands separated by a call.
fn caller() -> (Function, [InstIdx; 2], [InstIdx; 2]) {
    let mut f = Function::new("f", vec![int_arg("a"), int_arg("b")]);
    f.ret_ty = Type::Int(32);
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let x = b.add(Value::Arg(0), Value::Arg(1));
    let y = b.mul(x.into(), Value::Arg(0));
    let c = b.call("g", &[y.into()], Type::Int(32));
    let z = b.sub(c.into(), Value::Arg(1));
    let w = b.mul(z.into(), Value::int(32, 2));
    b.ret(Some(w.into()));
    (f, [x, y], [z, w])
}

fn run(funcs: &[Function], a: i64, b: i64) -> Option<Val> {
    Interpreter::new(funcs)
        .call("f", &[Val::int(32, a), Val::int(32, b)])
        .unwrap()
}

#[test]
fn sequential_extractions_reuse_stale_indices() {
    let (mut f, first, second) = caller();
    let expected = run(&[f.clone(), callee()], 7, -3);

    let isl = |insts: [InstIdx; 2]| Island {
        insts: insts.to_vec(),
        ..Default::default()
    };
    let s0 = extract_island(&mut f, &isl(first), "ssFunc_0".into()).unwrap();
    let s1 = extract_island(&mut f, &isl(second), "ssFunc_1".into()).unwrap();
    assert!(f.validate().is_ok());

    let calls: Vec<_> = f
        .inst_iter()
        .filter(|i| f.inst(*i).is_call())
        .map(|i| Printer::format_instruction(&f, i))
        .collect();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].contains("@ssFunc_0"));
    assert!(calls[2].contains("@ssFunc_1"));

    let funcs = vec![f, callee(), s0, s1];
    assert_eq!(run(&funcs, 7, -3), expected);
}

#[test]
fn program_survives_serialization() {
    let (f, _, _) = caller();
    let ctx = Context::new(vec![f, callee()]);
    let json = ctx.to_json().unwrap();
    let back = Context::from_json(&json).unwrap();
    let mut before = vec![];
    let mut after = vec![];
    Printer::write_context(&ctx, &mut before).unwrap();
    Printer::write_context(&back, &mut after).unwrap();
    assert_eq!(before, after);
}

#[test]
fn duplicate_functions_are_rejected() {
    let ctx = Context::new(vec![callee(), callee()]);
    let json = ctx.to_json().unwrap();
    assert!(Context::from_json(&json).is_err());
}
