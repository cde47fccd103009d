//! Driver for the DASS compiler.
use crate::cmdline::{EmitFormat, Opts};
use dass_ir as ir;
use dass_opt::pass_manager::{PassManager, PassResult};
use dass_utils::Error;
use std::io::{self, Write};

/// Run the compiler from the command line.
pub fn run_compiler() -> PassResult<()> {
    // parse the command line arguments into Opts struct
    let mut opts = Opts::get_opts()?;

    // enable tracing
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(opts.log_level)
        .target(env_logger::Target::Stderr)
        .init();

    let pm = PassManager::default_passes()?;

    // list all the avaliable pass options when flag --list-passes is enabled
    if opts.list_passes {
        println!("{}", pm.complete_help());
        return Ok(());
    }

    let mut ctx = if opts.file.as_os_str() == "-" {
        ir::Context::from_reader(io::stdin().lock())?
    } else {
        let file = std::fs::File::open(&opts.file).map_err(|e| {
            Error::configuration(format!(
                "cannot open `{}': {e}",
                opts.file.display()
            ))
        })?;
        ir::Context::from_reader(io::BufReader::new(file))?
    };
    log::info!("read {} functions", ctx.functions.len());
    // Extra options for the passes
    ctx.extra_opts = opts.extra_opts.drain(..).collect();

    // Run all passes specified by the command line
    pm.execute_plan(&mut ctx, &opts.pass, &opts.disable_pass, opts.dump_ir)?;

    // Print out the program after transformation.
    let out = &mut opts.output.get_write()?;
    match opts.emit {
        EmitFormat::Json => writeln!(out, "{}", ctx.to_json()?)?,
        EmitFormat::Text => ir::Printer::write_context(&ctx, out)?,
    }
    out.flush()?;
    Ok(())
}
