use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::param::ResolvedParams;
use crate::value::TypedValue;

// `${NAME}` with the surrounding double quotes captured when present.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"("?)\$\{([^{}"]+)\}("?)"#).expect("static placeholder regex")
});

/// Replace `${NAME}` placeholders in a serialized object document.
///
/// Integer values replace the quoted form `"${N}"` with a bare number so the
/// document keeps a JSON number; everywhere else the value text is inserted
/// as is. String values are inserted without escaping. Unknown names are
/// left untouched. The document is scanned once, so a substituted value that
/// itself looks like a placeholder is never expanded again.
pub fn substitute(document: &str, params: &ResolvedParams) -> String {
    PLACEHOLDER
        .replace_all(document, |caps: &Captures<'_>| {
            let open = &caps[1];
            let name = &caps[2];
            let close = &caps[3];
            match params.get(name) {
                Some(TypedValue::Int(i)) if !open.is_empty() && !close.is_empty() => {
                    i.to_string()
                }
                Some(value) => format!("{open}{value}{close}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
