//! Decision procedures for verification units.
use super::{
    INTERCHANGED_LEVEL, MemoryAccess, Verdict, VerificationOracle,
    VerificationUnit,
};
use dass_ir::{
    self as ir,
    eval::{self, Val},
    mask, InstIdx, Opcode, Value,
};
use dass_utils::{DassResult, Error};
use itertools::Itertools;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Runs an external Boogie binary on the generated program.
#[derive(Debug, Clone)]
pub struct BoogieOracle {
    /// Program and leading arguments, e.g. `dotnet Boogie.dll`.
    command: Vec<String>,
    /// Directory receiving `verify_<loop>.bpl` and its log.
    work_dir: PathBuf,
}

impl BoogieOracle {
    pub fn new<S: ToString>(
        command: &[S],
        work_dir: impl Into<PathBuf>,
    ) -> DassResult<Self> {
        if command.is_empty() {
            return Err(Error::configuration("empty Boogie command"));
        }
        Ok(BoogieOracle {
            command: command.iter().map(|s| s.to_string()).collect(),
            work_dir: work_dir.into(),
        })
    }

    /// Split a command line on whitespace.
    pub fn from_command_line(
        line: &str,
        work_dir: impl Into<PathBuf>,
    ) -> DassResult<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        Self::new(&words, work_dir)
    }
}

impl VerificationOracle for BoogieOracle {
    fn name(&self) -> &'static str {
        "boogie"
    }

    fn verify(&mut self, unit: &VerificationUnit) -> DassResult<Verdict> {
        fs::create_dir_all(&self.work_dir)?;
        let stem = format!("verify_{}", unit.loop_name);
        let bpl = self.work_dir.join(format!("{stem}.bpl"));
        let log_path = self.work_dir.join(format!("{stem}.log"));
        fs::write(&bpl, unit.program.to_string())?;
        let log = fs::File::create(&log_path)?;

        let status = Command::new(&self.command[0])
            .args(&self.command[1..])
            .arg(&bpl)
            .stdout(log)
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                Error::oracle_failure(format!(
                    "cannot run `{}': {e}",
                    self.command.join(" ")
                ))
            })?;
        log::debug!("{}: boogie exited with {status}", unit.loop_name);

        let text = fs::read_to_string(&log_path).map_err(|e| {
            Error::oracle_failure(format!(
                "cannot read `{}': {e}",
                log_path.display()
            ))
        })?;
        let verdict = if text.lines().any(|l| l.contains("Error:")) {
            Verdict::Refuted
        } else {
            Verdict::Verified
        };
        log::info!(
            "{}: distance {} is {verdict:?}",
            unit.loop_name,
            unit.distance
        );
        Ok(verdict)
    }
}

/// Decides small units without external tools by enumerating every
/// iteration allowed by the loop invariants.
#[derive(Debug, Clone)]
pub struct ExhaustiveOracle {
    /// Largest number of access descriptors worth enumerating.
    budget: u64,
}

impl Default for ExhaustiveOracle {
    fn default() -> Self {
        ExhaustiveOracle { budget: 1 << 20 }
    }
}

/// One concrete return of the instrumented procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Descriptor {
    stmt: u32,
    array: u32,
    address: u64,
    is_load: bool,
    iterations: Vec<u32>,
}

impl ExhaustiveOracle {
    pub fn new(budget: u64) -> Self {
        ExhaustiveOracle { budget }
    }

    /// Every descriptor of `access`, or `None` when its address is not
    /// determined by the loop counters.
    fn descriptors(
        &self,
        unit: &VerificationUnit,
        access: &MemoryAccess,
    ) -> Option<Vec<Descriptor>> {
        let counters: Vec<InstIdx> =
            access.iterations.iter().flatten().copied().collect();
        let ranges = counters
            .iter()
            .map(|phi| {
                let inv = unit.invariants.iter().find(|inv| inv.phi == *phi)?;
                Some(inv.values().map(|v| Val::int(inv.width, v)))
            })
            .collect::<Option<Vec<_>>>()?;

        let mut out = vec![];
        for values in ranges.into_iter().multi_cartesian_product() {
            let env: HashMap<InstIdx, Val> =
                counters.iter().copied().zip(values).collect();
            let Val::Int { bits, .. } = evaluate(&unit.func, &env, &access.index)?
            else {
                return None;
            };
            let iterations = access
                .iterations
                .iter()
                .map(|phi| match phi.and_then(|p| env.get(&p)) {
                    Some(Val::Int { bits, .. }) => mask(*bits, 32) as u32,
                    _ => 0,
                })
                .collect();
            out.push(Descriptor {
                stmt: access.stmt,
                array: access.array,
                address: bits,
                is_load: access.is_load,
                iterations,
            });
        }
        // No counters: the access happens once.
        if out.is_empty() && counters.is_empty() {
            let Val::Int { bits, .. } =
                evaluate(&unit.func, &HashMap::new(), &access.index)?
            else {
                return None;
            };
            out.push(Descriptor {
                stmt: access.stmt,
                array: access.array,
                address: bits,
                is_load: access.is_load,
                iterations: vec![0; access.iterations.len()],
            });
        }
        Some(out)
    }

    fn size(&self, unit: &VerificationUnit) -> u64 {
        unit.accesses
            .iter()
            .map(|a| {
                a.iterations
                    .iter()
                    .flatten()
                    .map(|phi| {
                        unit.invariants
                            .iter()
                            .find(|inv| inv.phi == *phi)
                            .map_or(1, |inv| inv.values().count() as u64)
                    })
                    .fold(1u64, u64::saturating_mul)
            })
            .fold(0u64, u64::saturating_add)
    }
}

/// The value of `v` when the phis in `env` are fixed, if it only depends
/// on them and on constants.
fn evaluate(
    func: &ir::Function,
    env: &HashMap<InstIdx, Val>,
    v: &Value,
) -> Option<Val> {
    let i = match v {
        Value::Const(c) => return Some(Val::from(*c)),
        Value::Arg(_) | Value::Undef(_) => return None,
        Value::Inst(i) => *i,
    };
    if let Some(val) = env.get(&i) {
        return Some(*val);
    }
    let inst = func.inst(i);
    let mut ops = inst.operands.iter();
    let mut next = || evaluate(func, env, ops.next()?);
    match &inst.op {
        Opcode::Binary { op, .. } => {
            let (a, b) = (next()?, next()?);
            eval::binary(*op, a, b).ok()
        }
        Opcode::Cast(c) => eval::cast(*c, next()?, inst.ty).ok(),
        Opcode::ICmp(p) => match (next()?, next()?) {
            (Val::Int { width, bits: a }, Val::Int { bits: b, .. }) => {
                Some(Val::int(1, i64::from(eval::icmp(*p, a, b, width))))
            }
            _ => None,
        },
        Opcode::Select => {
            let (c, t, f) = (next()?, next()?, next()?);
            match c {
                Val::Int { bits: 1, .. } => Some(t),
                Val::Int { .. } => Some(f),
                _ => None,
            }
        }
        _ => None,
    }
}

impl VerificationOracle for ExhaustiveOracle {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn verify(&mut self, unit: &VerificationUnit) -> DassResult<Verdict> {
        let size = self.size(unit);
        if size > self.budget {
            log::warn!(
                "{}: {size} accesses exceed the enumeration budget of {}",
                unit.loop_name,
                self.budget
            );
            return Ok(Verdict::Inconclusive);
        }

        let mut cells: HashMap<(u32, u64), Vec<Descriptor>> = HashMap::new();
        for access in &unit.accesses {
            let Some(descs) = self.descriptors(unit, access) else {
                log::debug!(
                    "{}: statement {} has an unknown address",
                    unit.loop_name,
                    access.stmt
                );
                return Ok(Verdict::Inconclusive);
            };
            for d in descs {
                cells.entry((d.array, d.address)).or_default().push(d);
            }
        }

        let level = INTERCHANGED_LEVEL;
        let distance = unit.distance;
        let race = cells.values().any(|ds| {
            ds.iter().cartesian_product(ds.iter()).any(|(d0, d1)| {
                !(d0.is_load && d1.is_load)
                    && d0.stmt != d1.stmt
                    && d1.iterations[level].wrapping_sub(d0.iterations[level])
                        < distance
            })
        });
        Ok(if race {
            Verdict::Refuted
        } else {
            Verdict::Verified
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::fixtures::{last_row_read, shifted_update};
    use super::*;
    use dass_utils::ErrorKind;

    fn decide(shift: i64, distance: u32) -> Verdict {
        let unit =
            VerificationUnit::new(&shifted_update(shift), "L2", distance)
                .unwrap();
        ExhaustiveOracle::default().verify(&unit).unwrap()
    }

    #[test]
    fn read_modify_write_races_within_one_iteration() {
        assert_eq!(decide(0, 1), Verdict::Refuted);
        assert_eq!(decide(0, 0), Verdict::Verified);
    }

    #[test]
    fn reading_the_next_row_allows_distance_one() {
        assert_eq!(decide(1, 1), Verdict::Verified);
        assert_eq!(decide(1, 2), Verdict::Refuted);
    }

    #[test]
    fn conflict_in_the_last_outer_iteration_is_found() {
        let f = last_row_read();
        let unit = VerificationUnit::new(&f, "L2", 1).unwrap();
        let i = unit.func.inst_by_name("phi").unwrap();
        let outer = unit.invariants.iter().find(|inv| inv.phi == i).unwrap();
        assert_eq!(outer.values(), 0..=3);
        let mut oracle = ExhaustiveOracle::default();
        assert_eq!(oracle.verify(&unit).unwrap(), Verdict::Refuted);

        let unit = VerificationUnit::new(&f, "L2", 0).unwrap();
        assert_eq!(oracle.verify(&unit).unwrap(), Verdict::Verified);
    }

    #[test]
    fn exceeding_the_budget_is_inconclusive() {
        let unit = VerificationUnit::new(&shifted_update(1), "L2", 1).unwrap();
        let verdict = ExhaustiveOracle::new(4).verify(&unit).unwrap();
        assert_eq!(verdict, Verdict::Inconclusive);
    }

    #[cfg(unix)]
    fn fake_boogie(dir: &std::path::Path, output: &str) -> BoogieOracle {
        let script = dir.join("boogie.sh");
        fs::write(&script, format!("#!/bin/sh\necho '{output}'\n")).unwrap();
        BoogieOracle::new(&["sh", script.to_str().unwrap()], dir.join("work"))
            .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn boogie_log_decides_the_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let unit = VerificationUnit::new(&shifted_update(0), "L2", 1).unwrap();

        let mut ok = fake_boogie(
            dir.path(),
            "Boogie program verifier finished with 2 verified, 0 errors",
        );
        assert_eq!(ok.verify(&unit).unwrap(), Verdict::Verified);
        let bpl = dir.path().join("work").join("verify_L2.bpl");
        let text = fs::read_to_string(bpl).unwrap();
        assert!(text.contains("procedure main()"));

        let mut bad = fake_boogie(
            dir.path(),
            "verify_L2.bpl(40,3): Error: this assertion could not be proved",
        );
        assert_eq!(bad.verify(&unit).unwrap(), Verdict::Refuted);
        let log = dir.path().join("work").join("verify_L2.log");
        assert!(fs::read_to_string(log).unwrap().contains("Error:"));
    }

    #[test]
    fn missing_binary_is_an_oracle_failure() {
        let dir = tempfile::tempdir().unwrap();
        let unit = VerificationUnit::new(&shifted_update(0), "L2", 1).unwrap();
        let mut oracle =
            BoogieOracle::new(&["dass-no-such-boogie"], dir.path()).unwrap();
        let err = oracle.verify(&unit).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::VerificationOracleFailure(_)
        ));
    }
}
