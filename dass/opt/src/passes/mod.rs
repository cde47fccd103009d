//! Passes of the DASS middle-end.
mod loop_interchange;
mod port_offsets;
mod static_islands;
mod static_loops_cf;
mod static_loops_mem;

pub use loop_interchange::LoopInterchange;
pub use port_offsets::PortOffsets;
pub use static_islands::StaticIslands;
pub use static_loops_cf::StaticLoopsCf;
pub use static_loops_mem::StaticLoopsMem;

use dass_ir::{self as ir, BlockIdx, LoopNest};

/// Functions the passes leave alone: the testbench entry point and
/// functions that are already statically scheduled.
fn skip(func: &ir::Function) -> bool {
    func.name == "main" || func.is_static()
}

/// Extract the loops headed by `headers` one at a time, recomputing the
/// loop nest after each extraction. Loops that moved into an earlier
/// extracted function are skipped, and loops that cannot be extracted are
/// reported and left in place.
fn extract_static_loops(
    func: &mut ir::Function,
    headers: &[BlockIdx],
    outlined: &mut ir::Outlined,
) {
    for header in headers {
        let nest = LoopNest::new(func);
        let Some((l, _)) = nest.iter().find(|(_, lp)| lp.header == *header)
        else {
            continue;
        };
        let name = outlined.fresh_name();
        match ir::extract_loop(func, &nest, l, name) {
            Ok(mut new) => {
                log::info!(
                    "`{}': loop at `{}' extracted into `{name}'",
                    func.name,
                    func.block(*header).name
                );
                new.mark_static("0");
                outlined.push(new);
            }
            Err(e) => log::warn!("`{}': {e}", func.name),
        }
    }
}
