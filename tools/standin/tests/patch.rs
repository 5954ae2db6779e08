use standin::object::{get_attr, has_attr};
use standin::{
    args, import, kwargs, patch, patch_object, register_module, Class, Function, Mock, Module,
    SpecArg, StandinError, Value,
};
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

fn service_module(name: &str) -> Module {
    let module = Module::new(name);
    module.set(
        "fetch",
        Function::variadic("fetch", |_, _| Ok(Value::str("network"))),
    );
    module.set("TIMEOUT", 30);
    register_module(&module);
    module
}

fn fetch_via_import(path: &str) -> Value {
    import(path)
        .expect("import")
        .call(&[], &kwargs! {})
        .expect("call")
}

#[test]
fn dotted_paths_swap_module_attributes() {
    let module = service_module("patch_it_paths");
    let patcher = patch("patch_it_paths.fetch")
        .expect("patch")
        .new(Function::variadic("fake", |_, _| Ok(Value::str("fake"))));

    patcher
        .scoped(|_| {
            assert_eq!(fetch_via_import("patch_it_paths.fetch"), Value::str("fake"));
            Ok(())
        })
        .expect("scoped");
    assert_eq!(fetch_via_import("patch_it_paths.fetch"), Value::str("network"));
    assert!(module.contains("fetch"));
}

#[test]
fn unknown_modules_fail_to_import() {
    let err = patch("patch_it_nowhere.thing").err().expect("no module");
    assert!(matches!(err, StandinError::Import(_)));
}

#[test]
fn synthesized_replacements_are_rich_proxies() {
    let module = service_module("patch_it_synth");
    let patcher = patch("patch_it_synth.fetch").expect("patch");
    let installed = patcher.start().expect("start");
    let mock = installed.as_mock().expect("mock").clone();
    mock.set_return_value("stubbed");

    assert_eq!(fetch_via_import("patch_it_synth.fetch"), Value::str("stubbed"));
    mock.assert_called_with(args![], kwargs! {}).expect("called");

    patcher.stop().expect("stop");
    assert!(!module.get("fetch").expect("restored").is_same(&installed));
}

#[test]
fn create_adds_then_removes_missing_names() {
    let module = service_module("patch_it_create");
    let err = patch("patch_it_create.RETRIES")
        .expect("patch")
        .start()
        .expect_err("missing");
    assert_eq!(
        err.to_string(),
        "<module 'patch_it_create'> does not have the attribute 'RETRIES'"
    );

    let patcher = patch("patch_it_create.RETRIES")
        .expect("patch")
        .new(3)
        .create(true);
    patcher
        .scoped(|_| {
            assert_eq!(module.get("RETRIES"), Some(Value::Int(3)));
            Ok(())
        })
        .expect("scoped");
    assert!(!module.contains("RETRIES"));
}

#[test]
fn class_attributes_are_restored_exactly() {
    let class = Class::builder("Config")
        .attr("level", "info")
        .build()
        .expect("class");
    let patcher = patch_object(class.clone(), "level").new("debug");
    patcher.start().expect("start");
    assert_eq!(class.own("level"), Some(Value::str("debug")));
    patcher.stop().expect("stop");
    assert_eq!(class.own("level"), Some(Value::str("info")));
}

#[test]
fn autospec_replacements_keep_the_signature() {
    let module = Module::new("patch_it_autospec");
    module.set(
        "send",
        Function::new(
            "send",
            standin::Signature::parse("to, body").expect("signature"),
            |_, _| Ok(Value::None),
        ),
    );
    register_module(&module);

    patch("patch_it_autospec.send")
        .expect("patch")
        .autospec(true)
        .scoped(|installed| {
            let mock = installed.as_mock().expect("mock").clone();
            assert!(mock.call(args!["a", "b"], kwargs! {}).is_ok());
            let err = mock.call(args!["a"], kwargs! {}).expect_err("arity");
            assert!(matches!(err, StandinError::Signature(_)));
            Ok(())
        })
        .expect("scoped");
}

#[test]
fn spec_set_from_names_guards_the_replacement() {
    let module = service_module("patch_it_spec_set");
    patch("patch_it_spec_set.fetch")
        .expect("patch")
        .spec_set(SpecArg::Names(vec!["ok".to_string()]))
        .scoped(|installed| {
            let mock = installed.as_mock().expect("mock").clone();
            assert!(mock.get_attribute("ok").is_ok());
            assert!(mock.set_attribute("other", Value::Int(1)).is_err());
            Ok(())
        })
        .expect("scoped");
    assert!(module.contains("fetch"));
}

#[test]
fn class_decoration_only_touches_prefixed_methods() {
    let module = service_module("patch_it_class");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let in_test = seen.clone();
    let in_helper = seen.clone();
    let suite = Class::builder("Suite")
        .method("test_fetch", "self, *mocks", move |args, _| {
            in_test.borrow_mut().push(args.len());
            Ok(import("patch_it_class.TIMEOUT")?)
        })
        .method("helper", "self", move |args, _| {
            in_helper.borrow_mut().push(args.len());
            Ok(import("patch_it_class.TIMEOUT")?)
        })
        .build()
        .expect("class");

    patch("patch_it_class.TIMEOUT")
        .expect("patch")
        .new(1)
        .decorate_class(&suite);

    let instance = Value::Class(suite).call(&[], &kwargs! {}).expect("instance");
    let test = get_attr(&instance, "test_fetch").expect("test method");
    let helper = get_attr(&instance, "helper").expect("helper");

    assert_eq!(test.call(&[], &kwargs! {}).expect("test"), Value::Int(1));
    assert_eq!(helper.call(&[], &kwargs! {}).expect("helper"), Value::Int(30));
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(30)));
    assert_eq!(*seen.borrow(), vec![1, 1]);
}

#[test]
fn decorated_function_reentry_restores_each_level() {
    let module = service_module("patch_it_reentry");
    let depth = Rc::new(RefCell::new(Vec::new()));
    let observed = depth.clone();
    let slot: Rc<RefCell<Option<Function>>> = Rc::new(RefCell::new(None));
    let recursive = slot.clone();
    let body = Function::variadic("walk", move |args, _| {
        let installed = import("patch_it_reentry.fetch")?;
        observed.borrow_mut().push(installed.identity());
        if args.first() == Some(&Value::Int(0)) {
            let again = recursive.borrow().clone();
            if let Some(again) = again {
                again.call(&args![1], &kwargs! {})?;
            }
            let after = import("patch_it_reentry.fetch")?;
            assert!(after.is_same(&installed));
        }
        Ok(Value::None)
    });
    let decorated = patch("patch_it_reentry.fetch").expect("patch").decorate(&body);
    *slot.borrow_mut() = Some(decorated.clone());

    decorated.call(&args![0], &kwargs! {}).expect("outer");
    let depth = depth.borrow();
    assert_eq!(depth.len(), 2);
    assert_ne!(depth[0], depth[1]);
    assert_eq!(
        fetch_via_import("patch_it_reentry.fetch"),
        Value::str("network")
    );
    assert!(module.contains("fetch"));
}

#[test]
fn guards_restore_when_the_body_panics() {
    let module = service_module("patch_it_panic");
    let patcher = patch("patch_it_panic.TIMEOUT").expect("patch").new(0);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _guard = patcher.guard().expect("guard");
        panic!("test body failed");
    }));
    assert!(outcome.is_err());
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(30)));
}

#[test]
fn copies_are_independent_transactions() {
    let module = service_module("patch_it_copy");
    let first = patch("patch_it_copy.TIMEOUT").expect("patch").new(5);
    let second = first.copy();
    first.start().expect("first");
    second.start().expect("second");
    second.stop().expect("second stop");
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(5)));
    first.stop().expect("first stop");
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(30)));
    assert!(second.stop().is_err());
    assert!(has_attr(&Value::Module(module), "TIMEOUT"));
}

#[test]
fn replacement_proxies_record_calls_made_through_the_module() {
    service_module("patch_it_record");
    let patcher = patch("patch_it_record.fetch").expect("patch");
    let mock: Mock = patcher
        .scoped(|installed| {
            import("patch_it_record.fetch")?.call(&args![1], &kwargs! {"x" => 2})?;
            Ok(installed.as_mock().expect("mock").clone())
        })
        .expect("scoped");
    assert_eq!(mock.call_count(), 1);
    mock.assert_called_once_with(args![1], kwargs! {"x" => 2})
        .expect("recorded");
}

#[test]
fn failing_decorated_bodies_restore_every_patch() {
    let module = service_module("patch_it_failing_body");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let observed = seen.clone();
    let body = Function::variadic("flaky", move |_, _| {
        observed.borrow_mut().push((
            import("patch_it_failing_body.TIMEOUT")?,
            import("patch_it_failing_body.fetch")?.call(&[], &kwargs! {})?,
        ));
        Err(StandinError::Assertion("body failed".to_string()))
    });
    let fake = Function::variadic("fake", |_, _| Ok(Value::str("fake")));
    let inner = patch("patch_it_failing_body.TIMEOUT")
        .expect("patch")
        .new(0)
        .decorate(&body);
    let decorated = patch("patch_it_failing_body.fetch")
        .expect("patch")
        .new(fake)
        .decorate(&inner);
    assert_eq!(decorated.patchings().map(|stack| stack.len()), Some(2));

    let err = decorated.call(&[], &kwargs! {}).expect_err("body error");
    assert_eq!(err, StandinError::Assertion("body failed".to_string()));
    assert_eq!(*seen.borrow(), vec![(Value::Int(0), Value::str("fake"))]);
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(30)));
    assert_eq!(
        fetch_via_import("patch_it_failing_body.fetch"),
        Value::str("network")
    );
}

#[test]
fn stacked_decorators_on_one_attribute_unwind_last_in_first_out() {
    let module = service_module("patch_it_lifo");
    let seen = Rc::new(RefCell::new(None));
    let observed = seen.clone();
    let body = Function::variadic("read", move |_, _| {
        *observed.borrow_mut() = Some(import("patch_it_lifo.TIMEOUT")?);
        Ok(Value::None)
    });
    let inner = patch("patch_it_lifo.TIMEOUT").expect("patch").new(1).decorate(&body);
    let outer = patch("patch_it_lifo.TIMEOUT").expect("patch").new(2).decorate(&inner);

    outer.call(&[], &kwargs! {}).expect("call");
    assert_eq!(*seen.borrow(), Some(Value::Int(2)));
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(30)));

    outer.call(&[], &kwargs! {}).expect("second call");
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(30)));
}

#[test]
fn failing_test_methods_still_restore_class_patches() {
    let module = service_module("patch_it_failing_method");
    let suite = Class::builder("FailingSuite")
        .method("test_timeout", "self", |_, _| {
            let timeout = import("patch_it_failing_method.TIMEOUT")?;
            Err(StandinError::Assertion(format!("unexpected timeout {timeout}")))
        })
        .build()
        .expect("class");
    patch("patch_it_failing_method.TIMEOUT")
        .expect("patch")
        .new(5)
        .decorate_class(&suite);

    let instance = Value::Class(suite).call(&[], &kwargs! {}).expect("instance");
    let err = get_attr(&instance, "test_timeout")
        .expect("method")
        .call(&[], &kwargs! {})
        .expect_err("test fails");
    assert_eq!(err.to_string(), "unexpected timeout 5");
    assert_eq!(module.get("TIMEOUT"), Some(Value::Int(30)));
}

#[test]
fn class_decoration_covers_every_callable_member() {
    service_module("patch_it_callables");
    let read = |_: &[Value], _: &standin::Kwargs| import("patch_it_callables.TIMEOUT");
    let mock_member = Mock::new();
    let reader = Function::variadic("reader", |_, _| import("patch_it_callables.TIMEOUT"));
    mock_member.set_side_effect(reader);
    let suite = Class::builder("CallableSuite")
        .static_method("test_static", "", read)
        .class_method("test_class", "cls", read)
        .attr("test_mock", mock_member.clone())
        .attr("test_value", 7)
        .build()
        .expect("class");

    patch("patch_it_callables.TIMEOUT")
        .expect("patch")
        .new(1)
        .decorate_class(&suite);

    let class = Value::Class(suite.clone());
    let instance = class.call(&[], &kwargs! {}).expect("instance");
    for name in ["test_static", "test_class", "test_mock"] {
        let member = get_attr(&instance, name).expect("member");
        assert_eq!(member.call(&[], &kwargs! {}).expect(name), Value::Int(1), "{name}");
    }
    assert_eq!(
        get_attr(&class, "test_class")
            .expect("class method")
            .call(&[], &kwargs! {})
            .expect("through the class"),
        Value::Int(1)
    );
    assert_eq!(mock_member.call_count(), 1);
    assert_eq!(suite.own("test_value"), Some(Value::Int(7)));
}

#[test]
fn failed_restores_keep_the_patch_active() {
    let module = service_module("patch_it_failed_restore");
    let patcher = patch("patch_it_failed_restore.RETRIES")
        .expect("patch")
        .new(3)
        .create(true);
    patcher.start().expect("start");
    module.remove("RETRIES");

    assert!(patcher.stop().is_err());
    module.set("RETRIES", 4);
    patcher.stop().expect("retry succeeds");
    assert!(!module.contains("RETRIES"));
    assert!(patcher.stop().is_err());
}
