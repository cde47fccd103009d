use dass_ir::{
    Argument, Builder, Function, PipelineState, Schedule, Type, Value,
};
use dass_opt::analysis::{PortKind, PortOffsetAnalysis};
use proptest::prelude::*;

/// *out = a + 1
fn incr() -> Function {
    let mut f = Function::new(
        "incr",
        vec![
            Argument {
                name: "a".into(),
                ty: Type::Int(32),
            },
            Argument {
                name: "out".into(),
                ty: Type::Int(32).ptr_to(),
            },
        ],
    );
    let mut b = Builder::new(&mut f);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let s = b.add(Value::Arg(0), Value::int(32, 1));
    b.store(s.into(), Value::Arg(1));
    b.ret(None);
    f
}

/// A pipeline of `states` stages that reads `a` in stage `read`, adds in
/// stage `add` and writes `out` in stage `write`. The other stages run
/// unrelated operations.
fn pipeline(
    states: u32,
    latency: u32,
    read: u32,
    add: u32,
    write: u32,
) -> Schedule {
    let states = (0..states)
        .map(|sv| {
            let mut stmts = vec![];
            if sv == read {
                stmts.push("%a_read = read i32 @_ssdm_op_Read, i32 %a");
            }
            if sv == add {
                stmts.push("%add = add i32 %a_read, 1");
            }
            if sv == write {
                stmts.push("write void @_ssdm_op_Write, i32* %out, i32 %add");
            }
            let mut stmts: Vec<String> =
                stmts.into_iter().map(String::from).collect();
            if stmts.is_empty() {
                stmts.push(format!("%t{sv} = add i32 %c, 1"));
            }
            PipelineState {
                index: sv + 1,
                sv,
                delay: 0.0,
                stmts,
            }
        })
        .collect();
    Schedule {
        latency,
        ii: 1,
        states,
        handshake: vec![],
    }
}

#[test]
fn waiting_for_the_adder_pads_the_input() {
    let mut f = incr();
    f.schedule = Some(pipeline(5, 4, 0, 1, 4));
    let analysis = PortOffsetAnalysis::new(&f);
    let a = analysis.port("a").unwrap();
    // Stages 2 and 3 neither read `%add` nor produce it.
    assert_eq!((a.offset, a.idle_states, a.fifo_depth), (1, 2, 3));
    let out = analysis.port("out").unwrap();
    assert_eq!((out.offset, out.fifo_depth), (1, 3));
}

proptest! {
    #[test]
    fn offsets_stay_within_the_pipeline(
        (states, extra, read, add, write) in (1u32..8, 0u32..4)
            .prop_flat_map(|(n, extra)| {
                (Just(n), Just(extra), 0..n, 0..n, 0..n)
            }),
    ) {
        let latency = states - 1 + extra;
        let mut f = incr();
        f.schedule = Some(pipeline(states, latency, read, add, write));
        let analysis = PortOffsetAnalysis::new(&f);
        prop_assert_eq!(analysis.latency, latency);
        for port in &analysis.ports {
            prop_assert!(port.offset <= latency);
            match port.kind {
                PortKind::Input => prop_assert_eq!(
                    port.fifo_depth,
                    port.offset + port.idle_states
                ),
                PortKind::Output => {
                    prop_assert_eq!(port.fifo_depth, latency - port.offset)
                }
                PortKind::SharedMemory => {}
            }
        }
        prop_assert_eq!(analysis.port("a").unwrap().offset, add);
    }
}
