//! Temporal offsets of the ports of a statically scheduled function.
//!
//! A fixed-latency pipeline reads each input and writes each output in one
//! particular pipeline stage. When the pipeline is embedded in a handshake
//! circuit the data of a port is buffered for that many cycles, so the
//! analysis locates the stage of every port in the schedule and derives the
//! depth of the FIFO that decouples it.
use dass_ir::{self as ir, LoopNest, Opcode, Schedule, Type, Value};
use dass_utils::Id;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Input,
    Output,
    /// An array shared with the surrounding circuit through a memory
    /// interface. Not buffered.
    SharedMemory,
}

/// One port of a static function.
#[derive(Debug, Clone, PartialEq)]
pub struct PortInfo {
    pub name: Id,
    pub kind: PortKind,
    /// Element type for pointers, the argument type otherwise.
    pub ty: Type,
    /// Argument position in the function signature.
    pub arg_index: usize,
    /// Position among the ports of the same kind.
    pub port_index: usize,
    /// Pipeline stage in which the port is read or written.
    pub offset: u32,
    pub fifo_depth: u32,
    pub idle_states: u32,
    pub first_op_latency: u32,
    /// Trigger input added to functions without inputs.
    pub dummy: bool,
}

impl PortInfo {
    pub fn is_input(&self) -> bool {
        self.kind == PortKind::Input
    }
}

impl Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}, {}, {},",
            self.name,
            self.arg_index,
            u8::from(self.is_input()),
            self.offset,
            self.idle_states,
            self.first_op_latency,
            self.fifo_depth
        )
    }
}

/// The operation mentions `%name` as a whole operand.
fn mentions(op: &str, var: &str) -> bool {
    op.contains(&format!(" {var} ")) || op.contains(&format!(" {var},"))
}

fn defines(op: &str, var: &str) -> bool {
    op.contains(&format!(" {var} = "))
}

/// The value through which the schedule reads (or writes) the port `name`:
/// the result of the streaming read, or the operand of the streaming write.
pub fn find_use(schedule: &Schedule, name: &str, is_read: bool) -> Option<String> {
    let port = format!("%{name}");
    for op in schedule.states.iter().flat_map(|st| st.operations()) {
        if !mentions(&op, &port) {
            continue;
        }
        if is_read && (op.contains(" read ") || op.contains(" nbread ")) {
            let start = op.find('%')? + 1;
            let end = op.find(" =")?;
            return op.get(start..end).map(str::to_string);
        }
        if !is_read && (op.contains(" write ") || op.contains(" nbwrite ")) {
            let start = op.rfind('%')? + 1;
            let end = op.rfind(' ')?;
            return op.get(start..end).map(str::to_string);
        }
    }
    None
}

/// Stage of the first state consuming `var` (reads) or of the last state
/// defining it (writes).
pub fn find_offset(schedule: &Schedule, var: &str, is_read: bool) -> Option<u32> {
    let var = format!("%{var}");
    let matches = |st: &&ir::PipelineState| {
        st.operations().any(|op| {
            mentions(&op, &var) && (defines(&op, &var) != is_read)
        })
    };
    if is_read {
        schedule.states.iter().find(matches).map(|st| st.sv)
    } else {
        schedule.states.iter().rev().find(matches).map(|st| st.sv)
    }
}

/// Follow the value read from a port through the chain of operations
/// consuming it, starting after `offset`. Returns the number of states in
/// which the chain is not used and the number of busy states of the first
/// consumer.
pub fn idle_states_and_first_op_latency(
    schedule: &Schedule,
    var: &str,
    offset: u32,
) -> (u32, u32) {
    let read = format!("%{var}");
    let mut cur = Some(read.clone());
    let mut is_first_op = false;
    let (mut idle, mut first_op) = (0, 0);
    for st in schedule.states.iter().skip(offset as usize) {
        let mut is_idle = true;
        for op in st.operations() {
            let Some(v) = cur.clone() else { continue };
            if !mentions(&op, &v) {
                continue;
            }
            if !defines(&op, &v) {
                is_first_op = v == read;
                cur = op
                    .find('%')
                    .zip(op.find(" ="))
                    .and_then(|(start, end)| op.get(start..end))
                    .map(str::to_string);
            }
            is_idle = false;
        }
        idle += u32::from(is_idle);
        if is_first_op && !is_idle {
            first_op += 1;
        }
    }
    (idle, first_op)
}

/// Ports of one static function together with their offsets and FIFO
/// depths.
#[derive(Debug, Clone)]
pub struct PortOffsetAnalysis {
    pub function: Id,
    pub latency: u32,
    pub ii: u32,
    pub ports: Vec<PortInfo>,
}

impl PortOffsetAnalysis {
    pub fn new(func: &ir::Function) -> Self {
        let mut analysis = PortOffsetAnalysis {
            function: func.name,
            latency: func.schedule.as_ref().map_or(0, |s| s.latency),
            ii: func.schedule.as_ref().map_or(0, |s| s.ii),
            ports: Self::ports(func),
        };
        if let Some(schedule) = &func.schedule {
            if LoopNest::new(func).is_empty() {
                analysis.compute_offsets(schedule);
                analysis.compute_idle_states(schedule);
            } else {
                log::debug!("`{}' has loops, no port offsets", func.name);
            }
            analysis.adjust_handshake_ports(schedule);
        }
        analysis
    }

    fn port_kind(func: &ir::Function, idx: usize, ty: &Type) -> PortKind {
        if !ty.is_ptr() {
            return PortKind::Input;
        }
        let first = func.users(Value::Arg(idx as u32)).into_iter().next();
        match first.map(|u| &func.inst(u).op) {
            Some(Opcode::Call { .. } | Opcode::Gep) => PortKind::SharedMemory,
            _ => PortKind::Output,
        }
    }

    fn ports(func: &ir::Function) -> Vec<PortInfo> {
        let mut ports: Vec<PortInfo> = func
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| PortInfo {
                name: arg.name,
                kind: Self::port_kind(func, i, &arg.ty),
                ty: arg.ty.pointee().unwrap_or(arg.ty),
                arg_index: i,
                port_index: 0,
                offset: 0,
                fifo_depth: 0,
                idle_states: 0,
                first_op_latency: 0,
                dummy: false,
            })
            .collect();
        if !ports.iter().any(PortInfo::is_input) {
            ports.push(PortInfo {
                name: "control".into(),
                kind: PortKind::Input,
                ty: Type::Int(32),
                arg_index: func.args.len(),
                port_index: 0,
                offset: 0,
                fifo_depth: 0,
                idle_states: 0,
                first_op_latency: 0,
                dummy: true,
            });
        }
        for kind in [PortKind::Input, PortKind::Output, PortKind::SharedMemory] {
            for (n, p) in ports.iter_mut().filter(|p| p.kind == kind).enumerate() {
                p.port_index = n;
            }
        }
        ports
    }

    fn compute_offsets(&mut self, schedule: &Schedule) {
        let latency = self.latency;
        for port in &mut self.ports {
            if port.kind == PortKind::SharedMemory || port.dummy {
                continue;
            }
            let is_read = port.is_input();
            let offset = match find_use(schedule, port.name.as_ref(), is_read) {
                None => {
                    log::warn!(
                        "`{}': cannot find the schedule of argument `{}', assuming offset 0",
                        self.function,
                        port.name
                    );
                    0
                }
                Some(var) => find_offset(schedule, &var, is_read).unwrap_or_else(|| {
                    log::warn!(
                        "`{}': cannot find the schedule of `%{var}', assuming offset 0",
                        self.function
                    );
                    0
                }),
            };
            port.offset = offset.min(latency);
            port.fifo_depth = if is_read {
                port.offset
            } else {
                latency - port.offset
            };
            log::debug!(
                "`{}': port `{}' at offset {}, fifo depth {}",
                self.function,
                port.name,
                port.offset,
                port.fifo_depth
            );
        }
    }

    fn compute_idle_states(&mut self, schedule: &Schedule) {
        for port in &mut self.ports {
            if !port.is_input() || port.dummy || port.offset == 0 {
                continue;
            }
            let Some(var) = find_use(schedule, port.name.as_ref(), true) else {
                continue;
            };
            let (idle, first_op) =
                idle_states_and_first_op_latency(schedule, &var, port.offset);
            port.idle_states = idle;
            port.first_op_latency = first_op;
            port.fifo_depth += idle;
        }
    }

    /// Ports that keep a handshake interface need no buffering.
    fn adjust_handshake_ports(&mut self, schedule: &Schedule) {
        for port in &mut self.ports {
            if !schedule.is_handshake(port.name.as_ref()) {
                continue;
            }
            match port.kind {
                PortKind::Input => {
                    port.offset = 0;
                    port.fifo_depth = 0;
                }
                PortKind::Output => {
                    port.offset = self.latency;
                    port.fifo_depth = 0;
                }
                PortKind::SharedMemory => {}
            }
        }
    }

    pub fn port(&self, name: &str) -> Option<&PortInfo> {
        self.ports.iter().find(|p| p.name == name)
    }
}

/// The offset table consumed by the RTL generator.
impl Display for PortOffsetAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Function: {}, {}, {},", self.function, self.latency, self.ii)?;
        for p in &self.ports {
            if p.kind != PortKind::SharedMemory && !p.dummy {
                writeln!(f, "{p}")?;
            }
        }
        writeln!(f, "---")
    }
}
