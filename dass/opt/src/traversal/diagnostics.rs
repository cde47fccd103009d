use dass_utils::Error;

/// A pass that keeps going after an error and reports all of them at the
/// end.
pub trait DiagnosticPass {
    fn diagnostics(&self) -> &DiagnosticContext;
}

/// Errors gathered while a pass runs.
#[derive(Default, Debug)]
pub struct DiagnosticContext {
    errors: Vec<Error>,
}

impl DiagnosticContext {
    pub fn err(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn errors_iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}
