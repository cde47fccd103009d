use super::Visitor;
use dass_ir as ir;
use dass_utils::{DassResult, OutputFile};
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;

/// A parsed pass option. The accessors panic on a kind mismatch, which
/// only happens when a pass reads its own option with the wrong type.
#[derive(Clone, Debug)]
pub enum ParseVal {
    Num(i64),
    Float(f64),
    Str(String),
    /// `-`, `<err>`, `<null>` or a file name.
    OutStream(OutputFile),
}

impl ParseVal {
    pub fn num(&self) -> i64 {
        let ParseVal::Num(n) = self else {
            panic!("Expected number, got {self}");
        };
        *n
    }

    pub fn pos_num(&self) -> Option<u64> {
        let n = self.num();
        if n < 0 { None } else { Some(n as u64) }
    }

    /// Numbers are accepted wherever a float is expected.
    pub fn float(&self) -> f64 {
        match self {
            ParseVal::Float(f) => *f,
            ParseVal::Num(n) => *n as f64,
            _ => panic!("Expected float, got {self}"),
        }
    }

    pub fn string(&self) -> &str {
        let ParseVal::Str(s) = self else {
            panic!("Expected string, got {self}");
        };
        s
    }

    pub fn outstream(&self) -> OutputFile {
        let ParseVal::OutStream(o) = self else {
            panic!("Expected output stream, got {self}");
        };
        o.clone()
    }

    /// `None` for `<null>`.
    pub fn not_null_outstream(&self) -> Option<OutputFile> {
        match self.outstream() {
            OutputFile::Null => None,
            o => Some(o),
        }
    }
}

impl std::fmt::Display for ParseVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseVal::Num(n) => write!(f, "{n}"),
            ParseVal::Float(n) => write!(f, "{n}"),
            ParseVal::Str(s) => write!(f, "{s}"),
            ParseVal::OutStream(o) => write!(f, "{o}"),
        }
    }
}

/// An option accepted by a pass, given on the command line as
/// `-x pass:name=value`.
pub struct PassOpt {
    name: &'static str,
    description: &'static str,
    default: ParseVal,
    parse: fn(&str) -> Option<ParseVal>,
}

impl PassOpt {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        default: ParseVal,
        parse: fn(&str) -> Option<ParseVal>,
    ) -> Self {
        Self {
            name,
            description,
            default,
            parse,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn description(&self) -> &'static str {
        self.description
    }

    pub const fn default(&self) -> &ParseVal {
        &self.default
    }

    fn parse(&self, s: &str) -> Option<ParseVal> {
        (self.parse)(s)
    }

    pub fn parse_num(s: &str) -> Option<ParseVal> {
        s.parse::<i64>().ok().map(ParseVal::Num)
    }

    pub fn parse_float(s: &str) -> Option<ParseVal> {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ParseVal::Float)
    }

    pub fn parse_string(s: &str) -> Option<ParseVal> {
        (!s.is_empty()).then(|| ParseVal::Str(s.to_string()))
    }

    pub fn parse_outstream(s: &str) -> Option<ParseVal> {
        s.parse::<OutputFile>().ok().map(ParseVal::OutStream)
    }
}

/// Names, descriptions and options of a pass, needed by
/// [`do_pass`](Visitor::do_pass) and the pass manager.
///
/// Kept apart from [`Visitor`] since none of these take `self`.
pub trait Named {
    /// Unique, used on the command line.
    fn name() -> &'static str;
    fn description() -> &'static str;
    fn opts() -> Vec<PassOpt> {
        vec![]
    }
}

/// Builds a pass from the program it is about to run on, typically by
/// reading its options out of [ir::Context::extra_opts]. Passes without
/// options get this from [Default].
pub trait ConstructVisitor {
    fn get_opts(ctx: &ir::Context) -> LinkedHashMap<&'static str, ParseVal>
    where
        Self: Named,
    {
        let opts = Self::opts();
        let n = Self::name();
        let mut values: LinkedHashMap<&'static str, ParseVal> = ctx
            .extra_opts
            .iter()
            .filter_map(|opt| {
                // -x pass:opt=val
                let (pass, rest) = opt.split_once(':')?;
                if pass != n {
                    return None;
                }
                let Some((opt, val)) = rest.split_once('=') else {
                    log::warn!("Ignoring option `{n}:{rest}' without a value");
                    return None;
                };
                let Some(opt) = opts.iter().find(|o| o.name == opt) else {
                    log::warn!("Ignoring unknown option for pass `{n}': {opt}");
                    return None;
                };
                let Some(val) = opt.parse(val) else {
                    log::warn!(
                        "Ignoring invalid value for option `{n}:{}': {val}",
                        opt.name(),
                    );
                    return None;
                };
                Some((opt.name(), val))
            })
            .collect();

        if !values.is_empty() {
            log::debug!(
                "{n}: {}",
                values.iter().map(|(o, v)| format!("{o}={v}")).join(" ")
            );
        }

        // Defaults for everything not given.
        for opt in opts {
            if !values.contains_key(opt.name()) {
                values.insert(opt.name(), opt.default.clone());
            }
        }

        values
    }

    fn from(_ctx: &ir::Context) -> DassResult<Self>
    where
        Self: Sized;

    /// Reset per-function state. [Visitor::do_pass] calls this between
    /// functions.
    fn clear_data(&mut self);
}

impl<T: Default + Sized + Visitor> ConstructVisitor for T {
    fn from(_ctx: &ir::Context) -> DassResult<Self> {
        Ok(T::default())
    }

    fn clear_data(&mut self) {
        *self = T::default();
    }
}
