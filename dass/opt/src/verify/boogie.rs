//! Abstract syntax of the Boogie programs handed to the verifier, printed
//! with [Display].
use itertools::Itertools;
use std::fmt::{self, Display};

/// Bit widths for which the prelude declares builtins.
pub const MIN_WIDTH: u32 = 1;
pub const MAX_WIDTH: u32 = 64;

/// Turn an IR name into a Boogie identifier.
pub fn ident(prefix: &str, name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}{clean}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Bv(u32),
    Float,
    Double,
    Bool,
    RMode,
    Map(Box<Ty>, Box<Ty>),
}

impl Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Bv(w) => write!(f, "bv{w}"),
            Ty::Float => write!(f, "float24e8"),
            Ty::Double => write!(f, "float53e11"),
            Ty::Bool => write!(f, "bool"),
            Ty::RMode => write!(f, "rmode"),
            Ty::Map(k, v) => write!(f, "[{k}]{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    /// A bit-vector literal. `value` holds the unsigned bits.
    Bv {
        value: u64,
        width: u32,
    },
    Bool(bool),
    /// A decimal real literal.
    Real(String),
    App(String, Vec<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Bits `hi - 1` down to `lo`.
    Extract {
        e: Box<Expr>,
        hi: u32,
        lo: u32,
    },
    /// The non-deterministic guard `*`.
    Nondet,
}

impl Expr {
    pub fn var<S: ToString>(name: S) -> Self {
        Expr::Var(name.to_string())
    }

    pub fn bv(value: u64, width: u32) -> Self {
        Expr::Bv { value, width }
    }

    pub fn app<S: ToString>(name: S, args: Vec<Expr>) -> Self {
        Expr::App(name.to_string(), args)
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    pub fn ne(self, other: Expr) -> Self {
        Expr::Ne(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    fn is_atom(&self) -> bool {
        !matches!(
            self,
            Expr::Eq(..) | Expr::Ne(..) | Expr::And(_) | Expr::Or(_)
        )
    }
}

/// Parenthesize compound operands.
struct Operand<'a>(&'a Expr);

impl Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_atom() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "({})", self.0)
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Bv { value, width } => write!(f, "{value}bv{width}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Real(r) => write!(f, "{r}"),
            Expr::App(name, args) => {
                write!(f, "{name}({})", args.iter().join(", "))
            }
            Expr::Eq(l, r) => write!(f, "{} == {}", Operand(l), Operand(r)),
            Expr::Ne(l, r) => write!(f, "{} != {}", Operand(l), Operand(r)),
            Expr::And(es) => {
                write!(f, "{}", es.iter().map(Operand).join(" && "))
            }
            Expr::Or(es) => write!(f, "{}", es.iter().map(Operand).join(" || ")),
            Expr::Not(e) => write!(f, "!{}", Operand(e)),
            Expr::Extract { e, hi, lo } => {
                write!(f, "{}[{hi}:{lo}]", Operand(e))
            }
            Expr::Nondet => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Label(String),
    Comment(String),
    Assign(String, Expr),
    Havoc(String),
    Assert(Expr),
    Assume(Expr),
    Goto(String),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        els: Vec<Stmt>,
    },
    Call {
        outs: Vec<String>,
        callee: String,
        args: Vec<Expr>,
    },
    Return,
}

impl Stmt {
    pub fn assign<S: ToString>(var: S, e: Expr) -> Self {
        Stmt::Assign(var.to_string(), e)
    }

    /// `var := 1bv1` when `cond` holds, `0bv1` otherwise.
    pub fn assign_bool<S: ToString>(var: S, cond: Expr) -> Self {
        let var = var.to_string();
        Stmt::If {
            cond,
            then: vec![Stmt::assign(&var, Expr::bv(1, 1))],
            els: vec![Stmt::assign(&var, Expr::bv(0, 1))],
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            Stmt::Label(l) => writeln!(f, "{}{l}:", "  ".repeat(indent - 1)),
            Stmt::Comment(c) => writeln!(f, "{pad}// {c}"),
            Stmt::Assign(v, e) => writeln!(f, "{pad}{v} := {e};"),
            Stmt::Havoc(v) => writeln!(f, "{pad}havoc {v};"),
            Stmt::Assert(e) => writeln!(f, "{pad}assert {e};"),
            Stmt::Assume(e) => writeln!(f, "{pad}assume {e};"),
            Stmt::Goto(l) => writeln!(f, "{pad}goto {l};"),
            Stmt::If { cond, then, els } => {
                writeln!(f, "{pad}if ({cond}) {{")?;
                for s in then {
                    s.write(f, indent + 1)?;
                }
                if !els.is_empty() {
                    writeln!(f, "{pad}}} else {{")?;
                    for s in els {
                        s.write(f, indent + 1)?;
                    }
                }
                writeln!(f, "{pad}}}")
            }
            Stmt::Call { outs, callee, args } => writeln!(
                f,
                "{pad}call {} := {callee}({});",
                outs.join(", "),
                args.iter().join(", ")
            ),
            Stmt::Return => writeln!(f, "{pad}return;"),
        }
    }
}

/// A typed variable.
pub type Binding = (String, Ty);

fn bindings(bs: &[Binding]) -> String {
    bs.iter().map(|(n, t)| format!("{n}: {t}")).join(", ")
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Procedure {
    pub name: String,
    /// Inlining depth requested from the verifier.
    pub inline: Option<u32>,
    pub params: Vec<Binding>,
    pub returns: Vec<Binding>,
    pub locals: Vec<Binding>,
    pub body: Vec<Stmt>,
}

impl Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "procedure ")?;
        if let Some(depth) = self.inline {
            write!(f, "{{:inline {depth}}} ")?;
        }
        write!(f, "{}({})", self.name, bindings(&self.params))?;
        if !self.returns.is_empty() {
            write!(f, " returns ({})", bindings(&self.returns))?;
        }
        writeln!(f, "\n{{")?;
        for (name, ty) in &self.locals {
            writeln!(f, "  var {name}: {ty};")?;
        }
        for s in &self.body {
            s.write(f, 1)?;
        }
        writeln!(f, "}}")
    }
}

/// A complete program: the builtin prelude followed by the procedures.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub procedures: Vec<Procedure>,
}

impl Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{Prelude}")?;
        for p in &self.procedures {
            writeln!(f)?;
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Declarations of the SMT builtins used by generated code.
pub struct Prelude;

const FP_BINARY: [(&str, &str); 5] = [
    ("add", "fp.add"),
    ("sub", "fp.sub"),
    ("mul", "fp.mul"),
    ("div", "fp.div"),
    ("rem", "fp.rem"),
];

const FP_COMPARE: [(&str, &str); 5] = [
    ("leq", "fp.leq"),
    ("geq", "fp.geq"),
    ("gt", "fp.gt"),
    ("lt", "fp.lt"),
    ("eq", "fp.eq"),
];

const BV_BINARY: [&str; 17] = [
    "add", "sub", "mul", "udiv", "urem", "sdiv", "srem", "smod", "and", "or",
    "xor", "nand", "nor", "xnor", "shl", "lshr", "ashr",
];

const BV_COMPARE: [&str; 8] =
    ["ult", "ule", "ugt", "uge", "slt", "sle", "sgt", "sge"];

impl Display for Prelude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// Floating point")?;
        for (p, ty, eb, sb) in [("f", "float24e8", 8, 24), ("d", "float53e11", 11, 53)] {
            for (name, builtin) in FP_BINARY {
                writeln!(
                    f,
                    "function {{:bvbuiltin \"{builtin}\"}} {p}{name}(rmode, {ty}, {ty}) returns ({ty});"
                )?;
            }
            for (name, builtin) in FP_COMPARE {
                writeln!(
                    f,
                    "function {{:bvbuiltin \"{builtin}\"}} {p}{name}({ty}, {ty}) returns (bool);"
                )?;
            }
            writeln!(
                f,
                "function {{:bvbuiltin \"fp.neg\"}} {p}neg({ty}) returns ({ty});"
            )?;
            let real = if p == "f" { "to_float" } else { "to_double" };
            writeln!(
                f,
                "function {{:bvbuiltin \"(_ to_fp {eb} {sb})\"}} {real}(real) returns ({ty});"
            )?;
        }

        writeln!(f, "// Bit vectors")?;
        for w in MIN_WIDTH..=MAX_WIDTH {
            let bv = format!("bv{w}");
            for op in BV_BINARY {
                writeln!(
                    f,
                    "function {{:bvbuiltin \"bv{op}\"}} {bv}{op}({bv}, {bv}) returns ({bv});"
                )?;
            }
            for op in ["neg", "not"] {
                writeln!(
                    f,
                    "function {{:bvbuiltin \"bv{op}\"}} {bv}{op}({bv}) returns ({bv});"
                )?;
            }
            for op in BV_COMPARE {
                writeln!(
                    f,
                    "function {{:bvbuiltin \"bv{op}\"}} {bv}{op}({bv}, {bv}) returns (bool);"
                )?;
            }
            for (p, ty, eb, sb) in
                [("float", "float24e8", 8, 24), ("double", "float53e11", 11, 53)]
            {
                writeln!(
                    f,
                    "function {{:bvbuiltin \"(_ to_fp_unsigned {eb} {sb})\"}} {bv}{p}(rmode, {bv}) returns ({ty});"
                )?;
                writeln!(
                    f,
                    "function {{:bvbuiltin \"(_ to_fp {eb} {sb})\"}} {bv}s{p}(rmode, {bv}) returns ({ty});"
                )?;
                writeln!(
                    f,
                    "function {{:bvbuiltin \"(_ fp.to_ubv {w})\"}} {p}2u{bv}(rmode, {ty}) returns ({bv});"
                )?;
                writeln!(
                    f,
                    "function {{:bvbuiltin \"(_ fp.to_sbv {w})\"}} {p}2s{bv}(rmode, {ty}) returns ({bv});"
                )?;
            }
        }

        writeln!(f, "// Extensions")?;
        for from in MIN_WIDTH..=MAX_WIDTH {
            for to in from + 1..=MAX_WIDTH {
                let by = to - from;
                writeln!(
                    f,
                    "function {{:bvbuiltin \"zero_extend {by}\"}} zext.bv{from}.bv{to}(bv{from}) returns (bv{to});"
                )?;
                writeln!(
                    f,
                    "function {{:bvbuiltin \"sign_extend {by}\"}} sext.bv{from}.bv{to}(bv{from}) returns (bv{to});"
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expressions_parenthesize_compound_operands() {
        let e = Expr::Or(vec![
            Expr::var("valid").not(),
            Expr::And(vec![Expr::var("a"), Expr::var("b")]),
            Expr::var("x").ne(Expr::bv(3, 32)),
        ]);
        assert_eq!(e.to_string(), "!valid || (a && b) || (x != 3bv32)");
        let ext = Expr::Extract {
            e: Box::new(Expr::var("$i")),
            hi: 32,
            lo: 0,
        };
        assert_eq!(ext.to_string(), "$i[32:0]");
    }

    #[test]
    fn procedures_print_their_signature_and_body() {
        let p = Procedure {
            name: "f".into(),
            inline: Some(1),
            params: vec![("$n".into(), Ty::Bv(32))],
            returns: vec![("valid".into(), Ty::Bool)],
            locals: vec![("$A".into(), Ty::Map(Box::new(Ty::Bv(64)), Box::new(Ty::Float)))],
            body: vec![
                Stmt::Label("bb_entry".into()),
                Stmt::If {
                    cond: Expr::Nondet,
                    then: vec![Stmt::assign("valid", Expr::Bool(true)), Stmt::Return],
                    els: vec![],
                },
                Stmt::Return,
            ],
        };
        let text = p.to_string();
        assert!(text.starts_with(
            "procedure {:inline 1} f($n: bv32) returns (valid: bool)\n{\n"
        ));
        assert!(text.contains("  var $A: [bv64]float24e8;\n"));
        assert!(text.contains("bb_entry:\n  if (*) {\n    valid := true;\n    return;\n  }\n"));
    }

    #[test]
    fn prelude_covers_every_width() {
        let text = Prelude.to_string();
        assert!(text.contains("function {:bvbuiltin \"bvadd\"} bv1add(bv1, bv1) returns (bv1);"));
        assert!(text.contains("bv64sge(bv64, bv64) returns (bool);"));
        assert!(text.contains("zext.bv32.bv64(bv32) returns (bv64);"));
        assert!(!text.contains("zext.bv64.bv64"));
        assert_eq!(ident("$", "i.next-1"), "$i.next_1");
    }
}
