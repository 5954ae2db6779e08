use standin::{
    args, call, call_named, default_sentinel, kwargs, tuple, ExceptionType, Function, Mock,
    Signature, Spec, StandinError, Value, ANY,
};
use std::cell::Cell;
use std::rc::Rc;

fn attr(mock: &Mock, name: &str) -> Mock {
    match mock.get_attribute(name) {
        Ok(Value::Mock(child)) => child,
        Ok(other) => panic!("expected a child proxy for {name}, got {other:?}"),
        Err(err) => panic!("attribute {name} failed: {err}"),
    }
}

#[test]
fn method_calls_scenario() {
    let m = Mock::new();
    let foo = attr(&m, "foo");
    foo.call(args![1], kwargs! {"bar" => 2}).expect("first");
    foo.call(args![3], kwargs! {}).expect("second");

    assert_eq!(foo.call_count(), 2);
    assert_eq!(
        m.method_calls(),
        vec![
            call_named("foo", args![1], kwargs! {"bar" => 2}),
            call_named("foo", args![3], kwargs! {}),
        ]
    );
}

#[test]
fn call_tracking_invariant_holds_for_every_count() {
    let m = Mock::new();
    for n in 1..=5 {
        m.call(args![n], kwargs! {}).expect("call");
        assert_eq!(m.call_count(), n as usize);
        assert_eq!(m.call_args_list().len(), n as usize);
        assert_eq!(m.call_args(), m.call_args_list().last().cloned());
    }
    assert_eq!(m.call_args().expect("last"), call(args![5], kwargs! {}));
}

#[test]
fn nested_method_calls_are_tagged_with_paths() {
    let root = Mock::new();
    let a = attr(&root, "a");
    let b = attr(&a, "b");
    b.call(args![1], kwargs! {}).expect("a.b");
    a.call(args![2], kwargs! {}).expect("a");

    let names = root
        .method_calls()
        .iter()
        .map(|record| record.name().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a.b", "a"]);
    assert!(root.call_args_list().is_empty());
    assert_eq!(a.method_calls(), vec![call_named("b", args![1], kwargs! {})]);
}

#[test]
fn side_effect_result_beats_return_value() {
    let m = Mock::builder()
        .return_value("configured")
        .side_effect(Function::variadic("effect", |args, _| {
            Ok(Value::from(args.len()))
        }))
        .build();
    assert_eq!(
        m.call(args![1, 2], kwargs! {}).expect("call"),
        Value::Int(2)
    );
}

#[test]
fn default_from_side_effect_falls_through_to_return_value() {
    let m = Mock::builder()
        .return_value(7)
        .side_effect(Function::variadic("effect", |_, _| {
            Ok(Value::Sentinel(default_sentinel()))
        }))
        .build();
    assert_eq!(m.call(args![], kwargs! {}).expect("call"), Value::Int(7));
}

#[test]
fn exception_side_effects_raise_after_recording() {
    let boom = ExceptionType::ordinary("ValueError").instance("boom");
    let m = Mock::builder().side_effect(boom.clone()).build();
    let err = m.call(args![1], kwargs! {}).expect_err("raises");
    assert_eq!(err, StandinError::Raised(boom));
    assert!(m.called());
    assert_eq!(m.call_count(), 1);
}

#[test]
fn termination_style_side_effects_are_distinguishable() {
    let m = Mock::builder()
        .side_effect(ExceptionType::termination("KeyboardInterrupt"))
        .build();
    let err = m.call(args![], kwargs! {}).expect_err("raises");
    assert!(err.is_termination());
    assert_eq!(err.kind(), "KeyboardInterrupt");
}

#[test]
fn reentrant_side_effect_sees_its_own_call_counted() {
    let m = Mock::new();
    let seen = Rc::new(Cell::new(0usize));
    let observed = seen.clone();
    let handle = m.downgrade();
    m.set_side_effect(Function::variadic("reenter", move |args, _| {
        let Some(mock) = handle.upgrade() else {
            return Ok(Value::None);
        };
        observed.set(mock.call_count());
        if args.first() == Some(&Value::Int(0)) {
            mock.call(args![1], kwargs! {})?;
        }
        Ok(Value::None)
    }));

    m.call(args![0], kwargs! {}).expect("outer");
    assert_eq!(m.call_count(), 2);
    assert_eq!(seen.get(), 2);
    assert_eq!(
        m.call_args_list(),
        vec![call(args![0], kwargs! {}), call(args![1], kwargs! {})]
    );
}

#[test]
fn wraps_forwards_until_a_return_value_is_configured() {
    let real = Function::new(
        "double",
        Signature::parse("x").expect("signature"),
        |args, _| Ok(Value::Int(args[0].as_int().unwrap_or_default() * 2)),
    );
    let m = Mock::builder().wraps(real).build();
    assert_eq!(m.call(args![4], kwargs! {}).expect("wrapped"), Value::Int(8));
    m.set_return_value(1);
    assert_eq!(m.call(args![4], kwargs! {}).expect("configured"), Value::Int(1));
}

#[test]
fn reset_clears_tracking_through_the_tree_but_keeps_configuration() {
    let root = Mock::builder()
        .name("root")
        .spec(Spec::names(["child"]))
        .build();
    let child = attr(&root, "child");
    let returned = match root.call(args![], kwargs! {}).expect("root call") {
        Value::Mock(returned) => returned,
        other => panic!("unexpected return {other:?}"),
    };
    child.call(args![1], kwargs! {}).expect("child call");
    returned.call(args![2], kwargs! {}).expect("returned call");

    root.reset();

    for mock in [&root, &child, &returned] {
        assert!(!mock.called());
        assert_eq!(mock.call_count(), 0);
        assert!(mock.call_args_list().is_empty());
    }
    assert!(root.method_calls().is_empty());
    assert_eq!(root.name().as_deref(), Some("root"));
    assert!(child.parent().is_some_and(|parent| parent.ptr_eq(&root)));
    assert!(root.allowed_names().is_some_and(|names| names.contains("child")));
}

#[test]
fn constrained_proxies_reject_unknown_names() {
    let m = Mock::builder().spec(Spec::names(["known"])).build();
    assert!(m.get_attribute("known").is_ok());
    let err = m.get_attribute("unknown").expect_err("constrained");
    assert_eq!(err.to_string(), "Mock object 'mock' has no attribute 'unknown'");

    let named = Mock::builder().name("svc").spec(Spec::names(["known"])).build();
    let err = named.get_attribute("other").expect_err("constrained");
    assert_eq!(err.to_string(), "Mock object 'svc' has no attribute 'other'");
}

#[test]
fn spec_set_guards_writes_but_not_configuration() {
    let m = Mock::builder().spec_set(Spec::names(["known"])).build();
    assert!(m.set_attribute("known", Value::Int(1)).is_ok());
    assert!(m.set_attribute("unknown", Value::Int(1)).is_err());
    assert!(m.set_attribute("return_value", Value::Int(3)).is_ok());
    assert_eq!(m.call(args![], kwargs! {}).expect("call"), Value::Int(3));
}

#[test]
fn tracking_names_are_read_only() {
    let m = Mock::new();
    let err = m
        .set_attribute("call_count", Value::Int(9))
        .expect_err("read-only");
    assert_eq!(err.to_string(), "can't set attribute 'call_count'");
    m.call(args![], kwargs! {}).expect("call");
    assert_eq!(m.get_attribute("call_count").expect("read"), Value::Int(1));
    assert_eq!(m.get_attribute("called").expect("read"), Value::Bool(true));
}

#[test]
fn explicit_attributes_shadow_children_until_deleted() {
    let m = Mock::new();
    let child = attr(&m, "thing");
    m.set_attribute("thing", Value::str("value")).expect("set");
    assert_eq!(m.get_attribute("thing").expect("get"), Value::str("value"));
    m.delete_attribute("thing").expect("delete");
    assert!(!attr(&m, "thing").ptr_eq(&child));
}

#[test]
fn assertions_report_expected_and_actual() {
    let m = Mock::new();
    let err = m
        .assert_called_with(args![1], kwargs! {})
        .expect_err("not called");
    assert_eq!(err.to_string(), "Expected: ((1,), {})\nNot called");

    m.call(args![2], kwargs! {"a" => "b"}).expect("call");
    let err = m
        .assert_called_with(args![1], kwargs! {})
        .expect_err("mismatch");
    assert_eq!(
        err.to_string(),
        "Expected: ((1,), {})\nCalled with: ((2,), {'a': 'b'})"
    );
    m.assert_called_with(args![2], kwargs! {"a" => "b"})
        .expect("matches");
    m.assert_called_with(args![ANY], kwargs! {"a" => ANY})
        .expect("ANY matches");

    m.call(args![2], kwargs! {"a" => "b"}).expect("again");
    let err = m
        .assert_called_once_with(args![2], kwargs! {"a" => "b"})
        .expect_err("twice");
    assert_eq!(err.to_string(), "Expected to be called once. Called 2 times.");
}

#[test]
fn signature_checked_proxies_record_normalized_calls() {
    let m = Mock::builder()
        .signature("three", Signature::parse("a, b=2").expect("signature"))
        .build();
    m.call(args![], kwargs! {"a" => 1}).expect("call");
    assert_eq!(m.call_args().expect("recorded"), call(args![1, 2], kwargs! {}));
    m.assert_called_with(args![1], kwargs! {}).expect("normalized expectation");

    let err = m.call(args![1, 2, 3], kwargs! {}).expect_err("arity");
    assert!(matches!(err, StandinError::Signature(_)));
    assert_eq!(m.call_count(), 1);
}

#[test]
fn relaxed_record_equality() {
    assert_eq!(call(args![], kwargs! {}), tuple!());
    assert_eq!(call(args![1, 2], kwargs! {}), Value::Tuple(vec![tuple!(1, 2)]));
    assert_eq!(
        call(args![], kwargs! {"a" => 1}),
        Value::Tuple(vec![Value::from(kwargs! {"a" => 1})])
    );
    assert_ne!(call(args![1], kwargs! {}), tuple!());
}

#[test]
fn non_callable_variants_refuse_invocation_but_grow_callable_children() {
    let m = Mock::non_callable();
    let err = m.call(args![], kwargs! {}).expect_err("not callable");
    assert_eq!(err.to_string(), "'NonCallableMock' object is not callable");
    let child = attr(&m, "method");
    assert!(child.is_callable());
    assert!(child.call(args![], kwargs! {}).is_ok());
}

#[test]
fn repr_shows_the_dotted_path() {
    let root = Mock::builder().name("root").build();
    let child = attr(&root, "child");
    assert!(child
        .default_repr()
        .starts_with("<Mock name='root.child' id='"));

    let anonymous = Mock::new();
    assert_eq!(anonymous.default_repr(), format!("<Mock id='{}'>", anonymous.id()));
    assert!(attr(&anonymous, "x")
        .default_repr()
        .starts_with("<Mock name='mock.x'"));
}

#[test]
fn self_containing_arguments_are_recorded() {
    let nested = standin::Dict::new();
    nested.insert(Value::str("self"), Value::Dict(nested.clone()));
    let m = Mock::new();
    m.call(args![Value::Dict(nested.clone())], kwargs! {})
        .expect("call");
    m.assert_called_once_with(args![Value::Dict(nested.clone())], kwargs! {})
        .expect("recorded");
    assert_eq!(
        m.call_args().expect("call args").repr(),
        "(({'self': {...}},), {})"
    );
}
