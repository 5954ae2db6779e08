use standin::object::get_attr;
use standin::{
    args, import, kwargs, patch_dict, register_module, Class, Dict, Function, Module, Value,
};

fn environ(module_name: &str) -> Dict {
    let env = Dict::from_pairs([
        (Value::str("HOME"), Value::str("/home/app")),
        (Value::str("MODE"), Value::str("prod")),
    ]);
    let module = Module::new(module_name);
    module.set("environ", env.clone());
    register_module(&module);
    env
}

fn lookup(path: &str, key: &str) -> Option<Value> {
    import(path).ok()?.as_dict()?.get(&Value::str(key))
}

#[test]
fn dotted_paths_resolve_to_the_mapping() {
    let env = environ("dict_it_path");
    let original = env.items();
    let patcher = patch_dict(
        "dict_it_path.environ",
        [(Value::str("MODE"), Value::str("test"))],
        false,
    )
    .expect("patch");
    assert!(patcher.target().is_same(&Value::Dict(env.clone())));

    patcher
        .scoped(|installed| {
            assert!(installed.is_same(&Value::Dict(env.clone())));
            assert_eq!(lookup("dict_it_path.environ", "MODE"), Some(Value::str("test")));
            Ok(())
        })
        .expect("scoped");
    assert_eq!(env.items(), original);
}

#[test]
fn mutations_inside_the_block_are_discarded() {
    let env = environ("dict_it_mutations");
    let original = env.items();
    let patcher =
        patch_dict(&env, Vec::<(Value, Value)>::new(), false).expect("patch");
    patcher
        .scoped(|_| {
            env.remove(&Value::str("HOME"));
            env.insert(Value::str("TMP"), Value::str("/tmp"));
            env.insert(Value::str("MODE"), Value::str("dev"));
            Ok(())
        })
        .expect("scoped");
    assert_eq!(env.items(), original);
}

#[test]
fn decorated_functions_run_inside_the_overlay() {
    let env = environ("dict_it_decorate");
    let body = Function::variadic("read_mode", |args, _| {
        assert!(args.is_empty());
        Ok(lookup("dict_it_decorate.environ", "MODE").unwrap_or(Value::None))
    });
    let decorated = patch_dict(&env, [(Value::str("MODE"), Value::str("ci"))], true)
        .expect("patch")
        .decorate(&body);

    assert_eq!(
        decorated.call(&args![], &kwargs! {}).expect("call"),
        Value::str("ci")
    );
    assert_eq!(env.get(&Value::str("MODE")), Some(Value::str("prod")));
    assert_eq!(env.len(), 2);
}

#[test]
fn class_decoration_wraps_prefixed_methods() {
    let env = environ("dict_it_class");
    let suite = Class::builder("EnvSuite")
        .method("test_mode", "self", |_, _| {
            Ok(lookup("dict_it_class.environ", "MODE").unwrap_or(Value::None))
        })
        .method("mode", "self", |_, _| {
            Ok(lookup("dict_it_class.environ", "MODE").unwrap_or(Value::None))
        })
        .build()
        .expect("class");
    patch_dict(&env, [(Value::str("MODE"), Value::str("patched"))], false)
        .expect("patch")
        .decorate_class(&suite);

    let instance = Value::Class(suite).call(&[], &kwargs! {}).expect("instance");
    let test = get_attr(&instance, "test_mode").expect("test");
    let plain = get_attr(&instance, "mode").expect("plain");
    assert_eq!(test.call(&[], &kwargs! {}).expect("test"), Value::str("patched"));
    assert_eq!(plain.call(&[], &kwargs! {}).expect("plain"), Value::str("prod"));
}

#[test]
fn nested_starts_unwind_in_order() {
    let env = environ("dict_it_nested");
    let outer = patch_dict(&env, [(Value::str("LEVEL"), Value::Int(1))], false).expect("outer");
    let inner = patch_dict(&env, [(Value::str("LEVEL"), Value::Int(2))], true).expect("inner");

    outer.start().expect("outer start");
    inner.start().expect("inner start");
    assert_eq!(env.items(), vec![(Value::str("LEVEL"), Value::Int(2))]);
    inner.stop().expect("inner stop");
    assert_eq!(env.get(&Value::str("LEVEL")), Some(Value::Int(1)));
    assert_eq!(env.len(), 3);
    outer.stop().expect("outer stop");
    assert_eq!(env.len(), 2);
    assert!(outer.stop().is_err());
}

#[test]
fn stopping_an_inactive_dict_patch_fails() {
    let env = environ("dict_it_inactive");
    let err = patch_dict(&env, Vec::<(Value, Value)>::new(), false)
        .expect("patch")
        .stop()
        .expect_err("inactive");
    assert!(err.to_string().contains("is not active"));
}
