#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use ksync_core::{Error, Result};
use ksync_native::{NativeCallback, NativeHost, Natives};
use ksync_resolve::{build_resolver, ImageName, PolicyKind, Propagate, Resolver, ResolverKind, WithPolicy};
use serde_json::{json, Value as Json};

/// Stand-in for a template evaluator: keeps registered callbacks by name.
#[derive(Default)]
struct FakeEvaluator {
    natives: BTreeMap<&'static str, (usize, NativeCallback)>,
}

impl NativeHost for FakeEvaluator {
    fn register_native(&mut self, name: &'static str, params: &'static [&'static str], func: NativeCallback) {
        self.natives.insert(name, (params.len(), func));
    }
}

impl FakeEvaluator {
    fn native(&self, name: &str, args: &[Json]) -> Result<Json> {
        let (_, f) = self.natives.get(name).expect("native not registered");
        f(args)
    }
}

fn evaluator(resolver: Arc<dyn Resolver>) -> FakeEvaluator {
    let mut vm = FakeEvaluator::default();
    Arc::new(Natives::new(resolver)).install(&mut vm);
    vm
}

#[test]
fn registers_fixed_table_with_arities() {
    let vm = evaluator(build_resolver(ResolverKind::Noop, PolicyKind::Warn).unwrap());
    let got: Vec<_> = vm.natives.iter().map(|(k, (n, _))| (*k, *n)).collect();
    assert_eq!(
        got,
        vec![
            ("escapeStringRegex", 1),
            ("parseJson", 1),
            ("parseYaml", 1),
            ("regexMatch", 2),
            ("regexSubst", 3),
            ("resolveImage", 1),
        ]
    );
}

#[test]
fn parse_functions_through_the_host() {
    let vm = evaluator(build_resolver(ResolverKind::Noop, PolicyKind::Warn).unwrap());
    let a = vm.native("parseJson", &[json!(r#"{"foo": 3, "bar": 4}"#)]).unwrap();
    assert_eq!(a["foo"].as_i64().unwrap() + a["bar"].as_i64().unwrap(), 7);

    let docs = vm.native("parseYaml", &[json!("foo:\n- 3\n- 4\n")]).unwrap();
    assert_eq!(docs[0]["foo"][0].as_i64().unwrap() + docs[0]["foo"][1].as_i64().unwrap(), 7);

    assert_eq!(vm.native("parseYaml", &[json!("")]).unwrap(), json!([]));
    assert!(vm.native("parseJson", &[json!("barf{")]).is_err());
}

#[test]
fn regex_functions_through_the_host() {
    let vm = evaluator(build_resolver(ResolverKind::Noop, PolicyKind::Warn).unwrap());
    assert_eq!(vm.native("regexMatch", &[json!("foo.*"), json!("seafood")]).unwrap(), json!(true));
    assert_eq!(vm.native("regexSubst", &[json!("a(x*)b"), json!("-ab-axxb-"), json!("${1}W")]).unwrap(), json!("-W-xxW-"));
    assert_eq!(vm.native("escapeStringRegex", &[json!("a.b")]).unwrap(), json!(r"a\.b"));
    assert!(matches!(vm.native("regexSubst", &[json!("[f"), json!("foo"), json!("bar")]), Err(Error::Pattern(_))));
}

struct Down;

impl Resolver for Down {
    fn resolve(&self, _image: &ImageName) -> Result<ImageName> {
        Err(Error::Resolution("registry down".into()))
    }
}

#[test]
fn resolve_image_honours_error_policy() {
    let lenient = evaluator(Arc::new(WithPolicy::new(Down, PolicyKind::Ignore.into_policy())));
    assert_eq!(lenient.native("resolveImage", &[json!("gcr.io/p/app:v1")]).unwrap(), json!("gcr.io/p/app:v1"));

    let strict = evaluator(Arc::new(WithPolicy::new(Down, Propagate)));
    assert!(matches!(strict.native("resolveImage", &[json!("gcr.io/p/app:v1")]), Err(Error::Resolution(_))));

    // Unparseable references fail regardless of policy.
    assert!(matches!(lenient.native("resolveImage", &[json!("::")]), Err(Error::Parse(_))));
}
