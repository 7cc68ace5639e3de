// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Extraction of assertion and abort messages from program output, and
//! conversion of such messages into regular expressions that survive
//! rebuilds (paths, line numbers and addresses are wildcarded).

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// An assertion message; some assertions span more than one line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Line(String),
    Lines(Vec<String>),
}

fn pid_prefix() -> &'static Regex {
    static PID: OnceLock<Regex> = OnceLock::new();
    PID.get_or_init(|| Regex::new(r"^\[\d+\]\s+").expect("pid regex failed to compile"))
}

fn v8_end() -> &'static Regex {
    static END: OnceLock<Regex> = OnceLock::new();
    END.get_or_init(|| Regex::new(r"^#\s*$").expect("v8 end regex failed to compile"))
}

fn strip_pid(line: &str) -> &str {
    match pid_prefix().find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

fn is_fatal_assertion(line: &str) -> bool {
    // SpiderMonkey, libc (MSVC style) and Rust assertions.
    if line.starts_with("Assertion failure:")
        || line.starts_with("Assertion failed:")
        || line.starts_with("assertion failed:")
        || line.contains("panicked at 'assertion failed:")
    {
        return true;
    }

    // An empty MOZ_CRASH() carries no message worth matching on.
    if let Some(rest) = line.strip_prefix("Hit MOZ_CRASH(") {
        return !rest.starts_with(')');
    }

    // glibc: "prog: file.c:12: func: Assertion `x' failed."
    line.contains(": Assertion `") && line.ends_with("' failed.")
}

/// Finds the assertion message in the given output lines.
///
/// The last fatal assertion wins. Without one, the last non-fatal
/// (`###!!! ASSERTION`) message is returned.
pub fn get_assertion<S: AsRef<str>>(output: &[S]) -> Option<Message> {
    let mut last_fatal: Option<Message> = None;
    let mut last_warning: Option<Message> = None;
    let mut v8_lines: Option<Vec<String>> = None;

    for line in output {
        let line = strip_pid(line.as_ref());

        if let Some(lines) = v8_lines.as_mut() {
            if v8_end().is_match(line) {
                last_fatal = v8_lines.take().map(Message::Lines);
            } else {
                lines.push(line.to_string());
            }
            continue;
        }

        if line.starts_with("# Fatal error in") {
            v8_lines = Some(vec![line.to_string()]);
        } else if is_fatal_assertion(line) {
            last_fatal = Some(Message::Line(line.to_string()));
        } else if line.starts_with("###!!! ASSERTION:") {
            last_warning = Some(Message::Line(line.to_string()));
        }
    }

    // Output ended before the closing "#" of a V8 report.
    v8_lines
        .map(Message::Lines)
        .or(last_fatal)
        .or(last_warning)
}

/// Finds a sanitizer abort message that identifies a crash even without an
/// assertion, e.g. the ASan error type plus the access description.
///
/// Plain SEGVs on unknown addresses are ignored: the crash address and stack
/// describe those better.
pub fn get_auxiliary_abort_message<S: AsRef<str>>(output: &[S]) -> Option<Message> {
    static ASAN_ERROR: OnceLock<Regex> = OnceLock::new();
    let asan_error = ASAN_ERROR.get_or_init(|| {
        Regex::new(r"ERROR: AddressSanitizer:? (?P<kind>[^ ]+)")
            .expect("asan error regex failed to compile")
    });

    let mut last: Option<Vec<String>> = None;
    let mut need_access_line = false;

    for line in output {
        let line = strip_pid(line.as_ref());

        if line.contains("ERROR: AddressSanitizer") {
            if line.contains("SEGV on unknown address") {
                continue;
            }
            if let Some(captures) = asan_error.captures(line) {
                last = Some(vec![format!(
                    "ERROR: AddressSanitizer: {}",
                    &captures["kind"]
                )]);
                need_access_line = true;
            }
        } else if need_access_line
            && (line.starts_with("READ of size") || line.starts_with("WRITE of size"))
        {
            if let Some(lines) = last.as_mut() {
                lines.push(line.to_string());
            }
            need_access_line = false;
        }
    }

    last.map(Message::Lines)
}

const PATH_PATTERN: &str = "([a-zA-Z]:)?/.+/";

fn volatile_parts() -> &'static Regex {
    static VOLATILE: OnceLock<Regex> = OnceLock::new();
    VOLATILE.get_or_init(|| {
        Regex::new(concat!(
            r"(?P<path>(?:[a-zA-Z]:)?/[^\s:]*/)(?P<file>[^/\s:,]+)",
            r"|(?P<line_word>, line \d+)",
            r"|(?P<line_colon>:\d+)",
            r"|(?P<hex>0x[0-9a-fA-F]+)",
            r"|(?P<thread>\bT\d{2,}\b)",
        ))
        .expect("volatile regex failed to compile")
    })
}

/// Escapes regex metacharacters, leaving `#` and whitespace as they are so
/// the result stays readable in signatures.
fn escape_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '-'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn sanitize_line(line: &str) -> String {
    let mut result = String::new();
    let mut cursor = 0;

    for captures in volatile_parts().captures_iter(line) {
        let whole = captures.get(0).expect("group 0 always matches");

        let replacement = if let Some(file) = captures.name("file") {
            // Only absolute paths are wildcarded, "../src/x.cc" stays literal.
            let at_word_start = whole.start() == 0
                || line[..whole.start()]
                    .chars()
                    .next_back()
                    .map_or(false, char::is_whitespace);
            if !at_word_start {
                continue;
            }
            format!("{PATH_PATTERN}{}", escape_pattern(file.as_str()))
        } else if captures.name("line_word").is_some() {
            ", line [0-9]+".to_string()
        } else if captures.name("line_colon").is_some() {
            ":[0-9]+".to_string()
        } else if captures.name("hex").is_some() {
            "0x[0-9a-fA-F]+".to_string()
        } else {
            "T[0-9]{2,}".to_string()
        };

        result.push_str(&escape_pattern(&line[cursor..whole.start()]));
        result.push_str(&replacement);
        cursor = whole.end();
    }

    result.push_str(&escape_pattern(&line[cursor..]));
    result
}

/// Turns an assertion message into a regular expression matching the same
/// assertion in other builds.
pub fn get_sanitized_assertion_pattern(message: &Message) -> Message {
    match message {
        Message::Line(line) => Message::Line(sanitize_line(line)),
        Message::Lines(lines) => Message::Lines(lines.iter().map(|l| sanitize_line(l)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ASAN_FF_ABORT: &str = "Hit MOZ_CRASH() at /srv/repos/browser/mozilla-central/memory/mozalloc/mozalloc_abort.cpp:30
ASAN:SIGSEGV
=================================================================
==26289==ERROR: AddressSanitizer: SEGV on unknown address 0x000000000000 (pc 0x7fac9b54873a sp 0x7fff085f2120 bp 0x7fff085f2130 T0)
";

    const ASAN_OVERFLOW: &str = "
==26403==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x60300021e6c8 at pc 0x7f30b3d276ef bp 0x7f30a521c8c0 sp 0x7f30a521c8b8
READ of size 8 at 0x60300021e6c8 thread T20 (MediaPlayback #1)
";

    const JSSHELL_MOZ_CRASH: &str = "
Hit MOZ_CRASH(named lambda static scopes should have been skipped) at /srv/repos/mozilla-central/js/src/vm/ScopeObject.cpp:1277
";

    const V8_ABORT: &str = "
#
# Fatal error in ../src/compiler.cc, line 219
# Check failed: !feedback_vector_->metadata()->SpecDiffersFrom( literal()->feedback_vector_spec()).
#
";

    const WINDOWS_PATH_ASSERT_FWD_SLASHES: &str = "
Assertion failure: block->graph().osrBlock(), at c:/Users/fuzz1win/trees/mozilla-central/js/src/jit/Lowering.cpp:4691
";

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    fn line(message: Option<Message>) -> String {
        match message {
            Some(Message::Line(line)) => line,
            other => panic!("expected a single line message, got {other:?}"),
        }
    }

    #[test]
    fn asan_segv_has_no_assertion() {
        let err = lines(ASAN_FF_ABORT);
        assert_eq!(get_assertion(&err), None);
        assert_eq!(get_auxiliary_abort_message(&err), None);
    }

    #[test]
    fn moz_crash_message_is_sanitized() {
        let err = lines(JSSHELL_MOZ_CRASH);
        let sanitized = get_sanitized_assertion_pattern(&get_assertion(&err).unwrap());
        assert_eq!(
            line(Some(sanitized)),
            r"Hit MOZ_CRASH\(named lambda static scopes should have been skipped\) at ([a-zA-Z]:)?/.+/ScopeObject\.cpp:[0-9]+"
        );
    }

    #[test]
    fn v8_abort_spans_two_lines() {
        let err = lines(V8_ABORT);
        let sanitized = get_sanitized_assertion_pattern(&get_assertion(&err).unwrap());
        assert_eq!(
            sanitized,
            Message::Lines(vec![
                r"# Fatal error in \.\./src/compiler\.cc, line [0-9]+".to_string(),
                r"# Check failed: !feedback_vector_\->metadata\(\)\->SpecDiffersFrom\( literal\(\)\->feedback_vector_spec\(\)\)\.".to_string(),
            ])
        );
    }

    #[test]
    fn windows_forward_slash_paths_are_sanitized() {
        let err = lines(WINDOWS_PATH_ASSERT_FWD_SLASHES);
        let assertion = line(get_assertion(&err));
        let sanitized = line(Some(get_sanitized_assertion_pattern(&Message::Line(
            assertion.clone(),
        ))));

        let expected = r"Assertion failure: block\->graph\(\)\.osrBlock\(\), at ([a-zA-Z]:)?/.+/Lowering\.cpp:[0-9]+";
        assert_eq!(sanitized, expected);
        assert!(Regex::new(expected).unwrap().is_match(&assertion));
    }

    #[test]
    fn asan_auxiliary_abort_message() {
        let err = lines(ASAN_OVERFLOW);
        let sanitized =
            get_sanitized_assertion_pattern(&get_auxiliary_abort_message(&err).unwrap());
        assert_eq!(
            sanitized,
            Message::Lines(vec![
                r"ERROR: AddressSanitizer: heap\-buffer\-overflow".to_string(),
                r"READ of size 8 at 0x[0-9a-fA-F]+ thread T[0-9]{2,} \(MediaPlayback #1\)"
                    .to_string(),
            ])
        );
    }

    #[test]
    fn fatal_assertion_beats_earlier_warnings() {
        let err = [
            "[1234] ###!!! ASSERTION: not fatal: 'false', file foo.cpp, line 1",
            "[1234] Assertion failure: x == 1, at /src/foo.cpp:12",
            "###!!! ASSERTION: later: 'false', file bar.cpp, line 2",
        ];
        assert_eq!(
            line(get_assertion(&err)),
            "Assertion failure: x == 1, at /src/foo.cpp:12"
        );

        let warnings_only = [err[0], err[2]];
        assert_eq!(
            line(get_assertion(&warnings_only)),
            "###!!! ASSERTION: later: 'false', file bar.cpp, line 2"
        );
    }

    #[test]
    fn libc_and_rust_assertions() {
        let err = ["Assertion failed: ptr != NULL, file foo.c, line 12"];
        assert_eq!(line(get_assertion(&err)), err[0]);

        let err = ["assertion failed: x == 1"];
        assert_eq!(line(get_assertion(&err)), err[0]);

        let err = ["thread 'main' panicked at 'assertion failed: x == 1', src/main.rs:2:5"];
        assert_eq!(line(get_assertion(&err)), err[0]);
    }

    #[test]
    fn last_fatal_assertion_wins() {
        let err = [
            "Assertion failure: first, at /a/b.cpp:1",
            "###!!! ASSERTION: warning: 'false', file c.cpp, line 3",
            "Assertion failure: second, at /a/b.cpp:2",
        ];
        assert_eq!(
            line(get_assertion(&err)),
            "Assertion failure: second, at /a/b.cpp:2"
        );

        let mut with_v8 = lines(V8_ABORT);
        with_v8.insert(0, "Assertion failure: first, at /a/b.cpp:1");
        assert!(matches!(get_assertion(&with_v8), Some(Message::Lines(_))));
    }

    #[test]
    fn only_thread_ids_are_wildcarded() {
        let sanitized = line(Some(get_sanitized_assertion_pattern(&Message::Line(
            "Assertion failure: size == 1024 in thread T15".to_string(),
        ))));
        assert_eq!(
            sanitized,
            "Assertion failure: size == 1024 in thread T[0-9]{2,}"
        );
    }

    #[test]
    fn glibc_assertion() {
        let err = ["js: jsapi.cpp:42: void f(): Assertion `ok' failed."];
        assert_eq!(line(get_assertion(&err)), err[0]);
    }
}
