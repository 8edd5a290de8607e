use crate::sink::FileReader;
use aho_corasick::AhoCorasick;
use std::path::Path;
use std::sync::OnceLock;

const OPEN_MARKER: &str = "{{%%";
const CLOSE_MARKER: &str = "%%}}";

fn marker_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| {
        AhoCorasick::new([OPEN_MARKER, CLOSE_MARKER]).expect("marker patterns are valid")
    })
}

/// Expand `{{%% command arg %%}}` directives in cell text. Only
/// `include <relative-path>` is recognized; anything else, and any read
/// failure, substitutes an empty string and surfaces a warning. An opening
/// marker without a closing one is left as literal text.
pub fn expand_directives(
    text: &str,
    files: &dyn FileReader,
    warn: &mut dyn FnMut(String),
) -> String {
    let mut expanded = String::with_capacity(text.len());
    let mut cursor = 0;

    let mut matches = marker_matcher().find_iter(text);
    while let Some(found) = matches.next() {
        // A close marker with no pending open is literal text.
        if found.pattern().as_usize() != 0 {
            continue;
        }

        let close = matches.find(|m| m.pattern().as_usize() == 1 && m.start() >= found.end());
        let Some(close) = close else {
            break;
        };

        expanded.push_str(&text[cursor..found.start()]);
        let body = &text[found.end()..close.start()];
        expanded.push_str(&expand_one(body, files, warn));
        cursor = close.end();
    }

    expanded.push_str(&text[cursor..]);
    expanded
}

fn expand_one(body: &str, files: &dyn FileReader, warn: &mut dyn FnMut(String)) -> String {
    let body = body.trim();
    let (command, argument) = match body.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (body, ""),
    };

    if command != "include" {
        warn(format!("Unknown chat directive '{command}'"));
        return String::new();
    }
    if argument.is_empty() {
        warn("Include directive is missing a path".to_string());
        return String::new();
    }

    match files.read(Path::new(argument)) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(error) => {
            warn(format!("Cannot include '{argument}': {error:#}"));
            String::new()
        }
    }
}
