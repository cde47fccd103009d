use super::skip;
use crate::traversal::{
    Action, ConstructVisitor, Named, ParseVal, PassOpt, VisResult, Visitor,
};
use crate::verify::{
    BoogieOracle, ExhaustiveOracle, SearchStrategy, VerificationOracle,
    VerificationUnit, search_depth,
};
use dass_ir::{self as ir, InterchangeRequest, LoopNest};
use dass_utils::{DassResult, Error, Id, OutputFile};
use std::io::Write;

/// Decides how far apart iterations of a loop's parent must be before they
/// can be reordered, for every loop carrying an interchange check request.
///
/// A request for a fixed depth is verified once and a failure aborts
/// compilation. An `auto` request searches `[lower, upper]` for the largest
/// depth that verifies. The result replaces the request in the loop
/// metadata.
pub struct LoopInterchange {
    lower: u32,
    upper: u32,
    search: SearchStrategy,
    oracle: Box<dyn VerificationOracle>,
    /// Receives every generated program.
    dump: Option<OutputFile>,
}

impl Named for LoopInterchange {
    fn name() -> &'static str {
        "loop-interchange"
    }

    fn description() -> &'static str {
        "verify requested loop interchange depths"
    }

    fn opts() -> Vec<PassOpt> {
        vec![
            PassOpt::new(
                "lower",
                "smallest depth tried by the automatic search",
                ParseVal::Num(1),
                PassOpt::parse_num,
            ),
            PassOpt::new(
                "upper",
                "largest depth tried by the automatic search",
                ParseVal::Num(10),
                PassOpt::parse_num,
            ),
            PassOpt::new(
                "search",
                "order in which depths are tried: linear or binary",
                ParseVal::Str("linear".to_string()),
                PassOpt::parse_string,
            ),
            PassOpt::new(
                "oracle",
                "decision procedure: exhaustive or boogie",
                ParseVal::Str("exhaustive".to_string()),
                PassOpt::parse_string,
            ),
            PassOpt::new(
                "boogie",
                "command running Boogie",
                ParseVal::Str("boogie".to_string()),
                PassOpt::parse_string,
            ),
            PassOpt::new(
                "work-dir",
                "directory for Boogie programs and logs",
                ParseVal::Str(
                    std::env::temp_dir().join("dass").display().to_string(),
                ),
                PassOpt::parse_string,
            ),
            PassOpt::new(
                "budget",
                "number of accesses the exhaustive oracle may enumerate",
                ParseVal::Num(1 << 20),
                PassOpt::parse_num,
            ),
            PassOpt::new(
                "dump",
                "write every generated Boogie program to this file",
                ParseVal::OutStream(OutputFile::Null),
                PassOpt::parse_outstream,
            ),
        ]
    }
}

fn bound(opts: &ParseVal, name: &str) -> DassResult<u32> {
    u32::try_from(opts.num()).map_err(|_| {
        Error::configuration(format!(
            "loop-interchange:{name} must be a non-negative 32-bit number"
        ))
    })
}

impl ConstructVisitor for LoopInterchange {
    fn from(ctx: &ir::Context) -> DassResult<Self> {
        let opts = Self::get_opts(ctx);
        let oracle: Box<dyn VerificationOracle> =
            match opts[&"oracle"].string() {
                "exhaustive" => {
                    let budget =
                        opts[&"budget"].pos_num().ok_or_else(|| {
                            Error::configuration(
                                "loop-interchange:budget must not be negative",
                            )
                        })?;
                    Box::new(ExhaustiveOracle::new(budget))
                }
                "boogie" => Box::new(BoogieOracle::from_command_line(
                    opts[&"boogie"].string(),
                    opts[&"work-dir"].string(),
                )?),
                o => {
                    return Err(Error::configuration(format!(
                        "unknown oracle `{o}', expected `exhaustive' or `boogie'"
                    )));
                }
            };
        Ok(LoopInterchange {
            lower: bound(&opts[&"lower"], "lower")?,
            upper: bound(&opts[&"upper"], "upper")?,
            search: opts[&"search"].string().parse()?,
            oracle,
            dump: opts[&"dump"].not_null_outstream(),
        })
    }

    fn clear_data(&mut self) {
        /* All data is shared */
    }
}

impl LoopInterchange {
    /// Whether interchanging `loop_name` at `distance` is proven safe.
    /// Inconclusive answers count as failures.
    fn check(
        &mut self,
        func: &ir::Function,
        loop_name: &str,
        distance: u32,
    ) -> DassResult<bool> {
        let unit = VerificationUnit::new(func, loop_name, distance)?;
        if let Some(out) = &mut self.dump {
            let mut w = out.get_write()?;
            writeln!(w, "// {loop_name} at distance {distance}")?;
            write!(w, "{}", unit.program)?;
            w.flush()?;
        }
        let verdict = self.oracle.verify(&unit)?;
        log::debug!(
            "{}: {loop_name} at distance {distance}: {verdict:?}",
            self.oracle.name()
        );
        Ok(verdict.is_verified())
    }

    fn depth_of(
        &mut self,
        func: &ir::Function,
        loop_name: &str,
        req: InterchangeRequest,
    ) -> DassResult<u32> {
        match req {
            InterchangeRequest::Depth(d) => {
                if self.check(func, loop_name, d)? {
                    Ok(d)
                } else {
                    Err(Error::unsafe_interchange(loop_name, d))
                }
            }
            InterchangeRequest::Auto => {
                let (lower, upper, search) =
                    (self.lower, self.upper, self.search);
                search_depth(lower, upper, search, |d| {
                    self.check(func, loop_name, d)
                })
            }
        }
    }
}

impl Visitor for LoopInterchange {
    fn precondition(ctx: &ir::Context) -> Option<String> {
        let requested = ctx.functions.iter().any(|f| {
            f.blocks.iter().any(|(_, bb)| {
                bb.loop_md
                    .as_ref()
                    .is_some_and(|md| md.interchange_check.is_some())
            })
        });
        (!requested).then(|| "no loop requests an interchange check".into())
    }

    fn start(
        &mut self,
        func: &mut ir::Function,
        _outlined: &mut ir::Outlined,
        _funcs: &[ir::Function],
    ) -> VisResult {
        if skip(func) || func.has_calls() || func.is_empty() {
            return Ok(Action::Stop);
        }
        let nest = LoopNest::new(func);
        // Outer loops first.
        let mut requests: Vec<(u32, Id, InterchangeRequest)> = vec![];
        for (l, lp) in nest.iter() {
            let Some(md) = nest.metadata(l, func) else {
                continue;
            };
            let Some(req) = md.interchange_check else {
                continue;
            };
            match md.name {
                Some(name) => requests.push((lp.depth, name, req)),
                None => log::warn!(
                    "`{}': loop at `{}' requests an interchange check but \
                     has no name",
                    func.name,
                    func.block(lp.header).name
                ),
            }
        }
        requests.sort_by_key(|(depth, ..)| *depth);

        for (_, name, req) in requests {
            let depth = self.depth_of(func, name.as_str(), req)?;
            log::info!(
                "`{}': loop {name} can be interchanged at depth {depth}",
                func.name
            );
            let Some(l) = nest.by_name(name.as_str()) else {
                continue;
            };
            let header = nest.get(l).header;
            if let Some(md) = func.blocks[header].loop_md.as_mut() {
                md.commit_interchange(depth);
            }
        }
        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::shifted_update;
    use dass_utils::ErrorKind;

    fn request(shift: i64, req: InterchangeRequest) -> ir::Context {
        let mut f = shifted_update(shift);
        let inner = f.block_by_name("inner").unwrap();
        f.blocks[inner].loop_md.as_mut().unwrap().interchange_check =
            Some(req);
        ir::Context::new(vec![f])
    }

    fn committed(ctx: &ir::Context) -> (Option<InterchangeRequest>, Option<u32>) {
        let f = &ctx.functions[0];
        let md = f.blocks[f.block_by_name("inner").unwrap()]
            .loop_md
            .as_ref()
            .unwrap();
        (md.interchange_check, md.interchange)
    }

    #[test]
    fn auto_request_commits_the_largest_safe_depth() {
        let mut ctx = request(1, InterchangeRequest::Auto);
        LoopInterchange::do_pass_default(&mut ctx).unwrap();
        assert_eq!(committed(&ctx), (None, Some(1)));

        let mut ctx = request(0, InterchangeRequest::Auto);
        ctx.extra_opts = vec!["loop-interchange:search=binary".to_string()];
        LoopInterchange::do_pass_default(&mut ctx).unwrap();
        assert_eq!(committed(&ctx), (None, Some(0)));
    }

    #[test]
    fn fixed_depth_must_verify() {
        let mut ctx = request(1, InterchangeRequest::Depth(1));
        LoopInterchange::do_pass_default(&mut ctx).unwrap();
        assert_eq!(committed(&ctx), (None, Some(1)));

        let mut ctx = request(1, InterchangeRequest::Depth(2));
        let err = LoopInterchange::do_pass_default(&mut ctx).err().unwrap();
        assert_eq!(
            err.kind(),
            &ErrorKind::UnsafeInterchange {
                loop_name: "L2".to_string(),
                depth: 2
            }
        );
        assert_eq!(committed(&ctx).0, Some(InterchangeRequest::Depth(2)));
    }

    #[test]
    fn empty_search_domain_is_rejected() {
        let mut ctx = request(1, InterchangeRequest::Auto);
        ctx.extra_opts = vec![
            "loop-interchange:lower=4".to_string(),
            "loop-interchange:upper=2".to_string(),
        ];
        let err = LoopInterchange::do_pass_default(&mut ctx).err().unwrap();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidSearchDomain { lower: 4, upper: 2 }
        ));
    }

    #[test]
    fn unknown_oracle_is_a_configuration_error() {
        let mut ctx = request(1, InterchangeRequest::Auto);
        ctx.extra_opts = vec!["loop-interchange:oracle=z3".to_string()];
        let err = LoopInterchange::do_pass_default(&mut ctx).err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::Configuration(_)));
    }

    #[test]
    fn programs_are_dumped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("L2.bpl");
        let mut ctx = request(1, InterchangeRequest::Depth(1));
        ctx.extra_opts =
            vec![format!("loop-interchange:dump={}", path.display())];
        LoopInterchange::do_pass_default(&mut ctx).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("// L2 at distance 1"));
        assert!(text.contains("procedure main()"));
    }
}
