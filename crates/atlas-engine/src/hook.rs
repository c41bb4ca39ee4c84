//! Hooks: observers around runs and operator calls.

use std::cell::RefCell;
use std::rc::Rc;

use atlas_core::Value;

use crate::error::{AtlasError, AtlasResult};
use crate::generator::GeneratorInfo;
use crate::namespace::{CallArgs, NativeFn, Signal};
use crate::strategy::ResolvedOp;

/// Metadata of one operator invocation, passed to [`Hook::before_op`] and
/// [`Hook::after_op`].
#[derive(Debug, Clone, Copy)]
pub struct OpEvent<'a> {
    pub generator: &'a GeneratorInfo,
    pub op_name: &'a str,
    pub sid: &'a str,
    pub args: &'a CallArgs,
}

/// Extension points of a generator run. All methods default to no-ops.
///
/// Errors returned by a hook abort the current run.
pub trait Hook {
    fn init(&mut self, _generator: &GeneratorInfo, _args: &CallArgs) -> AtlasResult<()> {
        Ok(())
    }

    fn init_run(&mut self, _generator: &GeneratorInfo, _args: &CallArgs) -> AtlasResult<()> {
        Ok(())
    }

    fn before_op(&mut self, _event: &OpEvent<'_>) -> AtlasResult<()> {
        Ok(())
    }

    fn after_op(&mut self, _event: &OpEvent<'_>, _retval: &Value) -> AtlasResult<()> {
        Ok(())
    }

    fn finish_run(&mut self, _generator: &GeneratorInfo) -> AtlasResult<()> {
        Ok(())
    }

    fn finish(&mut self, _generator: &GeneratorInfo) -> AtlasResult<()> {
        Ok(())
    }
}

/// Shared, ordered hook reference as stored on generators.
pub type HookHandle = Rc<RefCell<dyn Hook>>;

/// Wrap a hook into a [`HookHandle`].
pub fn hook_handle<H: Hook + 'static>(hook: H) -> HookHandle {
    Rc::new(RefCell::new(hook))
}

/// Like [`hook_handle`], also returning a typed reference for inspection.
pub fn shared_hook<H: Hook + 'static>(hook: H) -> (Rc<RefCell<H>>, HookHandle) {
    let typed = Rc::new(RefCell::new(hook));
    let handle: HookHandle = typed.clone();
    (typed, handle)
}

/// Identity comparison of hook handles.
pub fn same_hook(a: &HookHandle, b: &HookHandle) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

/// Run `f` on each hook in registration order, stopping at the first error.
pub(crate) fn each_hook(
    hooks: &[HookHandle],
    mut f: impl FnMut(&mut (dyn Hook + 'static)) -> AtlasResult<()>,
) -> AtlasResult<()> {
    for hook in hooks {
        let mut hook = hook
            .try_borrow_mut()
            .map_err(|_| AtlasError::Hook("hook re-entered while in use".to_string()))?;
        f(&mut *hook)?;
    }
    Ok(())
}

/// Wrap an operator callable with hooks. With no hooks the callable is
/// returned as is (same allocation).
pub fn compile_op(
    generator: Rc<GeneratorInfo>,
    op: &ResolvedOp,
    callable: NativeFn,
    hooks: &[HookHandle],
) -> NativeFn {
    if hooks.is_empty() {
        return callable;
    }
    let hooks: Vec<HookHandle> = hooks.to_vec();
    let op_name = op.op_name.clone();
    let sid = op.sid.clone();
    Rc::new(move |args: &CallArgs| {
        let event = OpEvent {
            generator: &generator,
            op_name: &op_name,
            sid: &sid,
            args,
        };
        each_hook(&hooks, |hook| hook.before_op(&event)).map_err(Signal::Fail)?;
        let retval = callable(args)?;
        each_hook(&hooks, |hook| hook.after_op(&event, &retval)).map_err(Signal::Fail)?;
        Ok(retval)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Operator;
    use crate::strategy::OpKind;

    #[derive(Default)]
    struct Log {
        tag: &'static str,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl Hook for Log {
        fn before_op(&mut self, event: &OpEvent<'_>) -> AtlasResult<()> {
            self.events
                .borrow_mut()
                .push(format!("{}:before:{}", self.tag, event.sid));
            Ok(())
        }

        fn after_op(&mut self, _event: &OpEvent<'_>, retval: &Value) -> AtlasResult<()> {
            self.events
                .borrow_mut()
                .push(format!("{}:after:{}", self.tag, retval));
            Ok(())
        }
    }

    fn op() -> ResolvedOp {
        ResolvedOp {
            op_name: "Select".into(),
            sid: "g/Select#0".into(),
            oid: None,
            kind: OpKind::Builtin(Operator::Select),
        }
    }

    fn raw() -> NativeFn {
        Rc::new(|_: &CallArgs| Ok(Value::from(7)))
    }

    #[test]
    fn test_no_hooks_keeps_callable() {
        let callable = raw();
        let compiled = compile_op(Rc::new(GeneratorInfo::new("g")), &op(), callable.clone(), &[]);
        assert!(Rc::ptr_eq(&callable, &compiled));
    }

    #[test]
    fn test_hooks_called_in_registration_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let hooks = vec![
            hook_handle(Log {
                tag: "a",
                events: events.clone(),
            }),
            hook_handle(Log {
                tag: "b",
                events: events.clone(),
            }),
        ];
        let callable = raw();
        let compiled = compile_op(Rc::new(GeneratorInfo::new("g")), &op(), callable.clone(), &hooks);
        assert!(!Rc::ptr_eq(&callable, &compiled));
        assert_eq!(compiled(&CallArgs::default()).unwrap(), Value::from(7));
        assert_eq!(
            *events.borrow(),
            vec![
                "a:before:g/Select#0",
                "b:before:g/Select#0",
                "a:after:7",
                "b:after:7"
            ]
        );
    }

    #[test]
    fn test_same_hook_identity() {
        let a = hook_handle(Log::default());
        let b = hook_handle(Log::default());
        assert!(same_hook(&a, &a.clone()));
        assert!(!same_hook(&a, &b));
    }
}
