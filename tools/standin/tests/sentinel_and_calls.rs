use standin::sentinel::DEFAULT_NAME;
use standin::{
    args, call, call_named, default_sentinel, kwargs, sentinel, tuple, Mock, Value, ANY,
};
use std::thread;

#[test]
fn sentinels_are_shared_across_threads() {
    let here = sentinel("shared_marker");
    let there = thread::spawn(|| sentinel("shared_marker"))
        .join()
        .expect("thread");
    assert_eq!(here, there);
    assert_ne!(here, sentinel("other_marker"));
    assert_eq!(here.repr(), "<SentinelObject \"shared_marker\">");
}

#[test]
fn default_is_an_ordinary_named_sentinel() {
    assert_eq!(default_sentinel(), sentinel(DEFAULT_NAME));
    assert_eq!(default_sentinel().name(), "DEFAULT");
}

#[test]
fn sentinels_pass_through_proxies_unchanged() {
    let marker = sentinel("passthrough");
    let m = Mock::builder()
        .return_value(Value::Sentinel(marker.clone()))
        .build();
    let result = m
        .call(args![Value::Sentinel(marker.clone())], kwargs! {})
        .expect("call");
    assert!(result.is_same(&Value::Sentinel(marker.clone())));
    m.assert_called_with(args![Value::Sentinel(marker)], kwargs! {})
        .expect("recorded");
}

#[test]
fn tracking_attributes_expose_tuple_forms() {
    let m = Mock::new();
    m.call(args![1], kwargs! {"k" => "v"}).expect("call");

    let last = m.get_attribute("call_args").expect("call_args");
    assert_eq!(call(args![1], kwargs! {"k" => "v"}), last);
    assert_eq!(last.repr(), "((1,), {'k': 'v'})");

    let list = m.get_attribute("call_args_list").expect("list");
    assert_eq!(list.as_tuple().map(<[Value]>::len), Some(1));
    assert_eq!(m.get_attribute("call_args").expect("again"), last);
}

#[test]
fn any_is_equal_to_everything_in_expectations() {
    let m = Mock::new();
    let child = match m.get_attribute("save").expect("child") {
        Value::Mock(child) => child,
        other => panic!("unexpected {other:?}"),
    };
    child
        .call(args![Value::Mock(Mock::new())], kwargs! {"force" => true})
        .expect("call");

    assert_eq!(
        m.method_calls(),
        vec![call_named("save", args![ANY], kwargs! {"force" => ANY})]
    );
    assert_eq!(
        m.method_calls()[0],
        Value::Tuple(vec![
            Value::str("save"),
            tuple!(ANY),
            Value::from(kwargs! {"force" => true}),
        ])
    );
}

#[test]
fn named_records_render_with_their_path() {
    let record = call_named("a.b", args![1], kwargs! {});
    assert_eq!(record.repr(), "('a.b', (1,), {})");
    assert_eq!(record.to_string(), record.repr());
    assert_eq!(record, tuple!("a.b", tuple!(1)));
}
