//! Implements a visitor for the functions of a program.
//! Program passes implemented as the Visitor are directly invoked on
//! [`ir::Context`] to transform every [`ir::Function`] using the pass.
use super::action::{Action, VisResult};
use super::{ConstructVisitor, FuncTraversal, Named, Order};
use dass_ir as ir;
use dass_utils::DassResult;
use itertools::Itertools;

/// The visiting interface for the functions of a program.
/// A pass overrides [Visitor::start] and/or [Visitor::finish]. Functions
/// created by the pass are collected in an [ir::Outlined] and appended to
/// the program once every existing function has been visited.
pub trait Visitor {
    /// Precondition for this pass to run on the program. If this function returns
    /// None, the pass triggers. Otherwise it aborts and logs the string as the reason.
    fn precondition(_ctx: &ir::Context) -> Option<String>
    where
        Self: Sized,
    {
        None
    }

    /// Define the iteration order in which functions should be visited
    #[inline(always)]
    fn iteration_order() -> Order
    where
        Self: Sized,
    {
        Order::No
    }

    /// Define the traversal over a function.
    /// Calls [Visitor::start] and then [Visitor::finish] unless `start`
    /// stopped the traversal.
    fn traverse_function(
        &mut self,
        func: &mut ir::Function,
        outlined: &mut ir::Outlined,
        funcs: &[ir::Function],
    ) -> DassResult<()>
    where
        Self: Sized,
    {
        self.start(func, outlined, funcs)?
            .and_then(|| self.finish(func, outlined, funcs))?;
        Ok(())
    }

    /// Run the visitor on a given program [`ir::Context`].
    ///
    /// After visiting a function, it calls [ConstructVisitor::clear_data] to
    /// reset the struct.
    fn do_pass(&mut self, context: &mut ir::Context) -> DassResult<()>
    where
        Self: Sized + ConstructVisitor + Named,
    {
        if let Some(msg) = Self::precondition(&*context) {
            log::info!("Skipping `{}': {msg}", Self::name());
            return Ok(());
        }

        let mut outlined = ir::Outlined::new(context.namegen());
        // Temporarily take ownership of functions from context.
        let funcs = std::mem::take(&mut context.functions);
        let mut po = FuncTraversal::new(funcs, Self::iteration_order())?;
        let res = po.apply_update(|func, funcs| {
            self.traverse_function(func, &mut outlined, funcs)?;
            self.clear_data();
            Ok(())
        });
        context.functions = po.take();
        res?;
        if !outlined.is_empty() {
            log::info!(
                "{}: created {}",
                Self::name(),
                outlined.functions().iter().map(|f| f.name).join(", ")
            );
        }
        context.functions.extend(outlined.into_functions());

        self.finish_context(context)?;
        Ok(())
    }

    /// Build a [Default] implementation of this pass and call [Visitor::do_pass]
    /// using it.
    #[inline(always)]
    fn do_pass_default(context: &mut ir::Context) -> DassResult<Self>
    where
        Self: ConstructVisitor + Sized + Named,
    {
        let mut visitor = Self::from(&*context)?;
        visitor.do_pass(context)?;
        Ok(visitor)
    }

    /// Executed before the traversal begins.
    fn start(
        &mut self,
        _func: &mut ir::Function,
        _outlined: &mut ir::Outlined,
        _funcs: &[ir::Function],
    ) -> VisResult {
        Ok(Action::Continue)
    }

    /// Executed after [Visitor::start] unless it returned [Action::Stop].
    fn finish(
        &mut self,
        _func: &mut ir::Function,
        _outlined: &mut ir::Outlined,
        _funcs: &[ir::Function],
    ) -> VisResult {
        Ok(Action::Continue)
    }

    /// Executed once every function, including the outlined ones, is part
    /// of the program again.
    fn finish_context(&mut self, _ctx: &mut ir::Context) -> VisResult {
        Ok(Action::Continue)
    }
}
