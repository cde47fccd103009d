//! Fixed-latency schedules of statically scheduled functions, as reported by
//! the HLS scheduler.
use dass_utils::Id;
use serde::{Deserialize, Serialize};

/// One FSM state of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// 1-based state number.
    pub index: u32,
    /// Slack value: the pipeline stage in which the state runs.
    pub sv: u32,
    #[serde(default)]
    pub delay: f64,
    /// Report lines of the operations scheduled in this state.
    #[serde(default)]
    pub stmts: Vec<String>,
}

impl PipelineState {
    /// Operation text of every statement, padded with a space on both sides
    /// so that operand names can be matched as ` %name ` or ` %name,`.
    pub fn operations(&self) -> impl Iterator<Item = String> + '_ {
        self.stmts.iter().map(|s| operation(s))
    }
}

/// The quoted operation of a report line, or the whole line when it carries
/// no quotes.
pub fn operation(stmt: &str) -> String {
    let op = stmt
        .split_once('"')
        .and_then(|(_, rest)| rest.split_once('"').map(|(op, _)| op))
        .unwrap_or(stmt);
    format!(" {op} ")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub latency: u32,
    pub ii: u32,
    pub states: Vec<PipelineState>,
    /// Ports that keep a handshake interface in the generated RTL.
    #[serde(default)]
    pub handshake: Vec<Id>,
}

impl Schedule {
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn is_handshake(&self, port: &str) -> bool {
        self.handshake.iter().any(|h| h == port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_text_is_padded() {
        let line = r#"ST_1 : Operation 3 [1/1] (1.00ns) ---> "%a_read = read i32 @_ssdm_op_Read, i32 %a" ---> Core 0"#;
        assert_eq!(
            operation(line),
            " %a_read = read i32 @_ssdm_op_Read, i32 %a "
        );
        assert_eq!(operation("%x = add i32 %a, 1"), " %x = add i32 %a, 1 ");
    }
}
