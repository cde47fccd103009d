//! An IR context. This is the top-level object for a program and contains
//! all the information needed to transform and emit it.
use crate::Function;
use dass_utils::{DassResult, Error, GetName, Id, NameGenerator};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// A whole program: the functions of one LLVM module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub functions: Vec<Function>,
    /// Extra options provided to the command line.
    /// Interpreted by individual passes
    #[serde(skip)]
    pub extra_opts: Vec<String>,
}

impl Context {
    pub fn new(functions: Vec<Function>) -> Self {
        Context {
            functions,
            extra_opts: vec![],
        }
    }

    /// Deserialize a program and check its well-formedness.
    pub fn from_reader<R: Read>(reader: R) -> DassResult<Self> {
        let ctx: Context = serde_json::from_reader(reader)?;
        ctx.validate()?;
        Ok(ctx)
    }

    pub fn from_json(text: &str) -> DassResult<Self> {
        Self::from_reader(text.as_bytes())
    }

    pub fn to_json(&self) -> DassResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> DassResult<()> {
        let mut seen = std::collections::HashSet::new();
        for f in &self.functions {
            if !seen.insert(f.name) {
                return Err(Error::malformed_ir(format!(
                    "function `{}' is defined twice",
                    f.name
                )));
            }
            f.validate()?;
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// A name generator that avoids every function name of the program.
    pub fn namegen(&self) -> NameGenerator {
        NameGenerator::with_prev_defined_names(
            self.functions.iter().map(|f| f.name()).collect(),
        )
    }
}

/// Functions created while a pass runs over the program. They are appended
/// to the program once the pass is done with every existing function.
pub struct Outlined {
    namegen: NameGenerator,
    functions: Vec<Function>,
}

impl Outlined {
    pub fn new(namegen: NameGenerator) -> Self {
        Outlined {
            namegen,
            functions: vec![],
        }
    }

    /// Fresh name for a statically scheduled function: `ssFunc_0`,
    /// `ssFunc_1`, ...
    pub fn fresh_name(&mut self) -> Id {
        self.namegen.gen_indexed("ssFunc_")
    }

    pub fn push(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn into_functions(self) -> Vec<Function> {
        self.functions
    }
}
