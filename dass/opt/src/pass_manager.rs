//! Registry of the compiler passes and the driver of pass pipelines.
use crate::traversal::{ConstructVisitor, DiagnosticPass, Named, Visitor};
use dass_ir as ir;
use dass_utils::{Error, MultiError};
use linked_hash_map::LinkedHashMap;
use std::collections::HashSet;
use std::time::Instant;

pub type PassResult<T> = std::result::Result<T, MultiError>;

/// A registered pass, ready to run on a whole program.
pub type PassClosure = Box<dyn Fn(&mut ir::Context) -> PassResult<()>>;

struct Registered {
    run: PassClosure,
    /// Description and options, as listed by `--list-passes`.
    help: String,
}

/// The passes known to the compiler, in registration order, and the
/// aliases naming groups of them.
#[derive(Default)]
pub struct PassManager {
    passes: LinkedHashMap<String, Registered>,
    /// Aliases are stored fully expanded.
    aliases: LinkedHashMap<String, Vec<String>>,
}

impl PassManager {
    /// Register `Pass`. Names must be unique.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let mut pm = PassManager::default();
    /// pm.register_pass::<StaticLoopsMem>()?;
    /// ```
    pub fn register_pass<Pass>(&mut self) -> PassResult<()>
    where
        Pass: Visitor + ConstructVisitor + Named,
    {
        self.register::<Pass>(Box::new(|ctx| {
            Pass::do_pass_default(ctx)?;
            Ok(())
        }))
    }

    /// Register a pass that keeps going after errors. Running it fails with
    /// every error it gathered.
    pub fn register_diagnostic<Pass>(&mut self) -> PassResult<()>
    where
        Pass: Visitor + ConstructVisitor + Named + DiagnosticPass,
    {
        self.register::<Pass>(Box::new(|ctx| {
            let pass = Pass::do_pass_default(ctx)?;
            let diag = pass.diagnostics();
            if diag.is_empty() {
                return Ok(());
            }
            let errors: Vec<Error> = diag.errors_iter().cloned().collect();
            log::error!("{}: {} errors", Pass::name(), errors.len());
            Err(errors.into())
        }))
    }

    fn register<Pass: Named>(&mut self, run: PassClosure) -> PassResult<()> {
        let name = Pass::name();
        if self.passes.contains_key(name) || self.aliases.contains_key(name) {
            return Err(Error::misc(format!(
                "`{name}' is registered twice"
            ))
            .into());
        }
        let mut help = format!("- {name}: {}", Pass::description());
        for opt in Pass::opts() {
            help.push_str(&format!(
                "\n  * {}: {} (default: {})",
                opt.name(),
                opt.description(),
                opt.default()
            ));
        }
        self.passes.insert(name.to_string(), Registered { run, help });
        Ok(())
    }

    /// Name the pipeline `passes`. Entries may be earlier aliases, which
    /// are expanded in place.
    pub fn add_alias(
        &mut self,
        name: String,
        passes: Vec<String>,
    ) -> PassResult<()> {
        if self.aliases.contains_key(&name) || self.passes.contains_key(&name)
        {
            return Err(Error::misc(format!(
                "`{name}' is registered twice"
            ))
            .into());
        }
        let mut expanded = vec![];
        for p in passes {
            match self.aliases.get(&p) {
                Some(group) => expanded.extend(group.iter().cloned()),
                None if self.passes.contains_key(&p) => expanded.push(p),
                None => {
                    return Err(Error::misc(format!(
                        "alias `{name}' names the unknown pass `{p}'"
                    ))
                    .into());
                }
            }
        }
        self.aliases.insert(name, expanded);
        Ok(())
    }

    /// Help for one pass or alias.
    pub fn specific_help(&self, name: &str) -> Option<String> {
        if let Some(pass) = self.passes.get(name) {
            return Some(pass.help.clone());
        }
        let group = self.aliases.get(name)?;
        let listing = group
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        Some(format!("`{name}' is an alias for pass pipeline:\n{listing}"))
    }

    /// Every pass with its options, followed by the aliases.
    pub fn complete_help(&self) -> String {
        let mut names: Vec<&String> = self.passes.keys().collect();
        names.sort();
        let mut out = String::from("Passes:\n");
        for name in names {
            out.push_str(&self.passes[name].help);
            out.push('\n');
        }
        out.push_str("\nAliases:\n");
        for (alias, group) in &self.aliases {
            out.push_str(&format!("- {alias}: {}\n", group.join(", ")));
        }
        out
    }

    /// The passes named by `names`, with aliases expanded.
    fn expand(&self, names: &[String]) -> PassResult<Vec<String>> {
        let mut out = vec![];
        for name in names {
            if let Some(group) = self.aliases.get(name) {
                out.extend(group.iter().cloned());
            } else if self.passes.contains_key(name) {
                out.push(name.clone());
            } else {
                return Err(Error::configuration(format!(
                    "unknown pass `{name}', see --list-passes"
                ))
                .into());
            }
        }
        Ok(out)
    }

    /// Run the passes of `incl` in order, skipping those in `excl`. Both may
    /// contain aliases. With `dump_ir` the program is printed to stdout
    /// after every pass.
    pub fn execute_plan(
        &self,
        ctx: &mut ir::Context,
        incl: &[String],
        excl: &[String],
        dump_ir: bool,
    ) -> PassResult<()> {
        let skipped: HashSet<String> = self.expand(excl)?.into_iter().collect();
        for name in self.expand(incl)? {
            if skipped.contains(&name) {
                log::info!("{name}: disabled");
                continue;
            }
            let start = Instant::now();
            (self.passes[&name].run)(ctx)?;
            if dump_ir {
                ir::Printer::write_context(ctx, &mut std::io::stdout())?;
            }
            let elapsed = start.elapsed();
            if elapsed.as_secs() > 5 {
                log::warn!("{name}: {}ms", elapsed.as_millis());
            } else {
                log::info!("{name}: {}ms", elapsed.as_millis());
            }
        }
        Ok(())
    }
}

/// Register an alias with a pass manager. Entries are pass types or string
/// literals naming earlier aliases.
///
/// ## Example
/// ```rust,ignore
/// let mut pm = PassManager::default();
/// register_alias!(pm, "dass", [StaticIslands, StaticLoopsMem, StaticLoopsCf]);
/// ```
#[macro_export]
macro_rules! register_alias {
    (@name $pass:ident) => {
        $pass::name().to_string()
    };

    (@name $pass:literal) => {
        $pass.to_string()
    };

    ($manager:expr, $alias:literal, [ $($pass:tt),* $(,)? ]) => {
        $manager.add_alias($alias.to_string(), vec![
            $(register_alias!(@name $pass)),*
        ])?;
    };
}
