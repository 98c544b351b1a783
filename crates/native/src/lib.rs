//! ksync native functions: host primitives callable from templates.
//!
//! The bridge is a fixed table of `(name, params, fn)` entries. An evaluator implements
//! [`NativeHost`] and receives every entry once, at construction, via [`Natives::install`].
//! Values cross the boundary as `serde_json::Value` (map, sequence, scalar, bool, null).

#![forbid(unsafe_code)]

use std::sync::Arc;

use ksync_core::{Error, Result};
use ksync_resolve::{ImageName, Resolver};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

/// Callback handed to an evaluator for one registered name.
pub type NativeCallback = Arc<dyn Fn(&[Json]) -> Result<Json> + Send + Sync>;

/// Evaluator side of the bridge.
pub trait NativeHost {
    fn register_native(&mut self, name: &'static str, params: &'static [&'static str], func: NativeCallback);
}

/// One entry of the fixed function table.
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub params: &'static [&'static str],
    call: fn(&Natives, &[Json]) -> Result<Json>,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).field("params", &self.params).finish()
    }
}

const FUNCTIONS: &[NativeFunction] = &[
    NativeFunction { name: "parseJson", params: &["json"], call: call_parse_json },
    NativeFunction { name: "parseYaml", params: &["yaml"], call: call_parse_yaml },
    NativeFunction { name: "resolveImage", params: &["image"], call: call_resolve_image },
    NativeFunction { name: "escapeStringRegex", params: &["str"], call: call_escape_string_regex },
    NativeFunction { name: "regexMatch", params: &["regex", "string"], call: call_regex_match },
    NativeFunction { name: "regexSubst", params: &["regex", "src", "repl"], call: call_regex_subst },
];

/// Host state behind the table; only `resolveImage` uses it.
pub struct Natives {
    resolver: Arc<dyn Resolver>,
}

impl Natives {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self { Self { resolver } }

    pub fn lookup(name: &str) -> Option<&'static NativeFunction> { FUNCTIONS.iter().find(|f| f.name == name) }

    /// Call a function by name, checking arity first.
    pub fn call(&self, name: &str, args: &[Json]) -> Result<Json> {
        let f = Self::lookup(name).ok_or_else(|| Error::InvalidArgument(format!("unknown native function {:?}", name)))?;
        self.invoke(f, args)
    }

    fn invoke(&self, f: &NativeFunction, args: &[Json]) -> Result<Json> {
        if args.len() != f.params.len() {
            return Err(Error::InvalidArgument(format!(
                "{} expects {} argument(s) ({}), got {}",
                f.name,
                f.params.len(),
                f.params.join(", "),
                args.len()
            )));
        }
        (f.call)(self, args)
    }

    /// Register every table entry with the evaluator.
    pub fn install<H: NativeHost + ?Sized>(self: &Arc<Self>, host: &mut H) {
        for f in FUNCTIONS {
            let me = Arc::clone(self);
            debug!(name = f.name, arity = f.params.len(), "registering native function");
            host.register_native(f.name, f.params, Arc::new(move |args: &[Json]| me.invoke(f, args)));
        }
    }
}

fn str_arg<'a>(fname: &str, args: &'a [Json], i: usize) -> Result<&'a str> {
    args[i]
        .as_str()
        .ok_or_else(|| Error::InvalidArgument(format!("{}: argument {} must be a string", fname, i + 1)))
}

fn call_parse_json(_: &Natives, args: &[Json]) -> Result<Json> { parse_json(str_arg("parseJson", args, 0)?) }

fn call_parse_yaml(_: &Natives, args: &[Json]) -> Result<Json> {
    parse_yaml(str_arg("parseYaml", args, 0)?).map(Json::Array)
}

fn call_resolve_image(n: &Natives, args: &[Json]) -> Result<Json> {
    resolve_image(n.resolver.as_ref(), str_arg("resolveImage", args, 0)?).map(Json::String)
}

fn call_escape_string_regex(_: &Natives, args: &[Json]) -> Result<Json> {
    Ok(Json::String(escape_string_regex(str_arg("escapeStringRegex", args, 0)?)))
}

fn call_regex_match(_: &Natives, args: &[Json]) -> Result<Json> {
    regex_match(str_arg("regexMatch", args, 0)?, str_arg("regexMatch", args, 1)?).map(Json::Bool)
}

fn call_regex_subst(_: &Natives, args: &[Json]) -> Result<Json> {
    let f = "regexSubst";
    regex_subst(str_arg(f, args, 0)?, str_arg(f, args, 1)?, str_arg(f, args, 2)?).map(Json::String)
}

pub fn parse_json(text: &str) -> Result<Json> {
    serde_json::from_str(text).map_err(|e| Error::Parse(format!("failed to parse json: {}", e)))
}

// A line starting with `---` and carrying nothing but an optional comment ends a document.
fn is_separator(line: &str) -> bool {
    match line.strip_prefix("---") {
        Some(rest) => {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#')
        }
        None => false,
    }
}

fn split_documents(text: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let (mut start, mut pos) = (0, 0);
    for line in text.split_inclusive('\n') {
        if is_separator(line) {
            docs.push(&text[start..pos]);
            start = pos + line.len();
        }
        pos += line.len();
    }
    docs.push(&text[start..]);
    docs.retain(|d| !d.trim().is_empty());
    docs
}

/// One value per non-empty YAML document, in the same structured form as [`parse_json`].
pub fn parse_yaml(text: &str) -> Result<Vec<Json>> {
    let mut out = Vec::new();
    for chunk in split_documents(text) {
        for doc in serde_yaml::Deserializer::from_str(chunk) {
            let value = serde_yaml::Value::deserialize(doc).map_err(|e| Error::Parse(format!("failed to parse yaml: {}", e)))?;
            let json = serde_json::to_value(value).map_err(|e| Error::Parse(format!("yaml is not representable as json: {}", e)))?;
            out.push(json);
        }
    }
    Ok(out)
}

/// Parse, resolve through the configured chain, print back.
pub fn resolve_image(resolver: &dyn Resolver, reference: &str) -> Result<String> {
    let image = ImageName::parse(reference)?;
    Ok(resolver.resolve(&image)?.to_string())
}

const REGEX_META: &str = r"\.+*?()|[]{}^$";

/// Backslash-escape the pattern metacharacters `\.+*?()|[]{}^$`; everything else passes through.
pub fn escape_string_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if REGEX_META.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Pattern(e.to_string()))
}

/// Unanchored search, like `Regex::is_match`.
pub fn regex_match(pattern: &str, s: &str) -> Result<bool> { Ok(compile(pattern)?.is_match(s)) }

/// Replace all non-overlapping matches; `repl` may use `$1`/`${name}` group references.
pub fn regex_subst(pattern: &str, src: &str, repl: &str) -> Result<String> {
    Ok(compile(pattern)?.replace_all(src, repl).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_resolve::IdentityResolver;
    use serde_json::json;

    #[test]
    fn parse_json_null_and_garbage() {
        assert_eq!(parse_json("null").unwrap(), Json::Null);
        assert!(matches!(parse_json("barf{"), Err(Error::Parse(_))));
        let v = parse_json(r#"{"foo": 3, "bar": 4}"#).unwrap();
        assert_eq!(v["foo"].as_i64().unwrap() + v["bar"].as_i64().unwrap(), 7);
    }

    #[test]
    fn parse_yaml_documents() {
        assert_eq!(parse_yaml("").unwrap(), Vec::<Json>::new());
        assert_eq!(parse_yaml("foo:\n- 3\n- 4\n").unwrap(), vec![json!({"foo": [3, 4]})]);
        assert_eq!(parse_yaml("---\nhello\n---\nworld").unwrap(), vec![json!("hello"), json!("world")]);
        assert!(matches!(parse_yaml("[barf"), Err(Error::Parse(_))));
    }

    #[test]
    fn parse_yaml_skips_empty_documents() {
        assert_eq!(parse_yaml("a\n---\n").unwrap(), vec![json!("a")]);
        assert_eq!(parse_yaml("---\n").unwrap(), Vec::<Json>::new());
        assert_eq!(parse_yaml("a\n---\n---\nb").unwrap(), vec![json!("a"), json!("b")]);
        assert_eq!(parse_yaml("a\n--- # next\n  \n---\nb\n").unwrap(), vec![json!("a"), json!("b")]);
        assert_eq!(parse_yaml("a: null\n---\nnull\n").unwrap(), vec![json!({"a": null}), Json::Null]);
    }

    #[test]
    fn regex_helpers() {
        assert!(regex_match("foo.*", "seafood").unwrap());
        assert!(!regex_match("bar.*", "seafood").unwrap());
        assert!(matches!(regex_match("[f", "foo"), Err(Error::Pattern(_))));
        assert_eq!(regex_subst("a(x*)b", "-ab-axxb-", "T").unwrap(), "-T-T-");
        assert_eq!(regex_subst("a(x*)b", "-ab-axxb-", "${1}W").unwrap(), "-W-xxW-");
        assert!(matches!(regex_subst("[f", "foo", "bar"), Err(Error::Pattern(_))));
    }

    #[test]
    fn escaped_strings_match_literally() {
        let s = "1.2.3+build[x]";
        let esc = escape_string_regex(s);
        assert!(regex_match(&format!("^{}$", esc), s).unwrap());
        assert!(!regex_match(&format!("^{}$", esc), "1x2x3+build[x]").unwrap());
    }

    #[test]
    fn escape_leaves_non_meta_punctuation_alone() {
        assert_eq!(escape_string_regex("a-b#c&d~e"), "a-b#c&d~e");
        assert_eq!(escape_string_regex(r"^(a|b)*\{2}$"), r"\^\(a\|b\)\*\\\{2\}\$");
        let s = r"x-y.z\w";
        assert!(regex_match(&format!("^{}$", escape_string_regex(s)), s).unwrap());
    }

    #[test]
    fn call_checks_arity_and_types() {
        let n = Natives::new(Arc::new(IdentityResolver));
        assert!(matches!(n.call("regexMatch", &[json!("a")]), Err(Error::InvalidArgument(_))));
        assert!(matches!(n.call("parseJson", &[json!(3)]), Err(Error::InvalidArgument(_))));
        assert!(matches!(n.call("nope", &[]), Err(Error::InvalidArgument(_))));
        assert_eq!(n.call("resolveImage", &[json!("nginx")]).unwrap(), json!("nginx:latest"));
        assert!(matches!(n.call("resolveImage", &[json!("Not/Valid")]), Err(Error::Parse(_))));
    }
}
