// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::OnceLock;

use crate::StackEntry;
use regex::{Captures, Regex};

const BASE: &str = r"\s*#(?P<frame>\d+)\s+0x(?P<address>[0-9a-fA-F]+)\s";
const SUFFIX: &str = r"\s*(?:\(BuildId:[^)]*\))?";
const ENTRIES: &[&str] = &[
    // "module::func(char *args) (/path/to/bin+0x123)"
    r"in (?P<func_1>[^+]+)(\+0x[0-9a-fA-F]+)? \((?P<module_path_1>[^+]+)\+0x(?P<module_offset_1>[0-9a-fA-F]+)\)",
    // "in foo /path:16:17"
    r"in (?P<func_2>.*) (?P<file_path_1>[^ ]+):(?P<file_line_1>\d+):\d+",
    // "in foo /path:16"
    r"in (?P<func_3>.*) (?P<file_path_2>[^ ]+):(?P<file_line_2>\d+)",
    // "  (/path/to/bin+0x123)"
    r" \((?P<module_path_2>.*)\+0x(?P<module_offset_2>[0-9a-fA-F]+)\)",
    // "in libc.so.6"
    r"in (?P<module_path_3>[a-z0-9.]+)",
    // "in _objc_terminate()+0x12345"
    r"in (?P<func_4>[^+]+)(\+0x(?P<module_offset_3>[0-9a-fA-F]+))?",
];

fn frame_regex() -> &'static Regex {
    static FRAME: OnceLock<Regex> = OnceLock::new();
    FRAME.get_or_init(|| {
        let frame_re = format!("^{BASE}(?:{}){SUFFIX}$", ENTRIES.join("|"));
        Regex::new(&frame_re).expect("asan frame regex failed to compile")
    })
}

fn report_regex() -> &'static Regex {
    static REPORT: OnceLock<Regex> = OnceLock::new();
    REPORT.get_or_init(|| {
        Regex::new(r"(?m)(==\d+==\s*ERROR: AddressSanitizer|^ASAN:)")
            .expect("asan report regex failed to compile")
    })
}

fn address_regex() -> &'static Regex {
    static ADDRESS: OnceLock<Regex> = OnceLock::new();
    ADDRESS.get_or_init(|| {
        Regex::new(r"AddressSanitizer:?.*? on (?:unknown )?address 0x(?P<address>[0-9a-fA-F]+)")
            .expect("asan address regex failed to compile")
    })
}

fn first<'t>(captures: &Captures<'t>, names: &[&str]) -> Option<&'t str> {
    names
        .iter()
        .find_map(|name| captures.name(name))
        .map(|m| m.as_str())
}

/// Values that do not fit in 64 bits are dropped rather than failing the
/// whole stack.
fn hex(value: Option<&str>) -> Option<u64> {
    u64::from_str_radix(value?, 16).ok()
}

/// Whether the text carries an AddressSanitizer report.
pub(crate) fn is_asan_report(text: &str) -> bool {
    report_regex().is_match(text)
}

/// The faulting address named in the ASan error line, if any.
pub(crate) fn parse_crash_address(text: &str) -> Option<u64> {
    let captures = address_regex().captures(text)?;
    u64::from_str_radix(&captures["address"], 16).ok()
}

/// Parses the first contiguous block of `#N 0x...` frames.
pub(crate) fn parse_asan_call_stack(text: &str) -> Vec<StackEntry> {
    let mut stack = vec![];
    let mut parsing_stack = false;

    for line in text.lines() {
        let line = line.trim();
        match (parsing_stack, frame_regex().captures(line)) {
            (true, None) => break,
            (false, None) => continue,
            (_, Some(captures)) => {
                parsing_stack = true;

                let source_file_line = first(&captures, &["file_line_1", "file_line_2"])
                    .and_then(|line| line.parse::<u64>().ok());

                stack.push(StackEntry {
                    line: captures[0].to_string(),
                    address: hex(Some(&captures["address"])),
                    function_name: first(&captures, &["func_1", "func_2", "func_3", "func_4"])
                        .map(String::from),
                    source_file_path: first(&captures, &["file_path_1", "file_path_2"])
                        .map(String::from),
                    source_file_line,
                    module_path: first(
                        &captures,
                        &["module_path_1", "module_path_2", "module_path_3"],
                    )
                    .map(String::from),
                    module_offset: hex(first(
                        &captures,
                        &["module_offset_1", "module_offset_2", "module_offset_3"],
                    )),
                });
            }
        }
    }

    stack
}

#[cfg(test)]
mod tests {
    use super::{is_asan_report, parse_asan_call_stack, parse_crash_address, StackEntry};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_asan_stack_line() {
        let test_cases = vec![
            (
                r"#0 0x1  (/path/to/bin+0x2)",
                StackEntry {
                    line: r"#0 0x1  (/path/to/bin+0x2)".to_string(),
                    address: Some(1),
                    module_path: Some("/path/to/bin".to_string()),
                    module_offset: Some(2),
                    ..Default::default()
                },
            ),
            (
                r"#10 0xee in module::func(fuzzer::Fuzzer*, char const*, unsigned long) (/path/to/bin+0x123)",
                StackEntry {
                    line: r"#10 0xee in module::func(fuzzer::Fuzzer*, char const*, unsigned long) (/path/to/bin+0x123)".to_string(),
                    address: Some(238),
                    function_name: Some("module::func(fuzzer::Fuzzer*, char const*, unsigned long)".to_string()),
                    module_path: Some(r"/path/to/bin".to_string()),
                    module_offset: Some(291),
                    ..Default::default()
                },
            ),
            (
                r"#8 0x123 in from_file /path/to/source.c:67:12",
                StackEntry {
                    line: r"#8 0x123 in from_file /path/to/source.c:67:12".to_string(),
                    address: Some(291),
                    function_name: Some("from_file".to_string()),
                    source_file_path: Some("/path/to/source.c".to_string()),
                    source_file_line: Some(67),
                    ..Default::default()
                },
            ),
            (
                r"#0 0x3 in libc.so.6",
                StackEntry {
                    line: r"#0 0x3 in libc.so.6".to_string(),
                    address: Some(3),
                    module_path: Some("libc.so.6".to_string()),
                    ..Default::default()
                },
            ),
            (
                r"    #3 0x7f920447551f  (/lib/x86_64-linux-gnu/libc.so.6+0x4251f) (BuildId: 69389d485a9793dbe873f0ea2c93e02efaa9aa3d)",
                StackEntry {
                    line: r"#3 0x7f920447551f  (/lib/x86_64-linux-gnu/libc.so.6+0x4251f) (BuildId: 69389d485a9793dbe873f0ea2c93e02efaa9aa3d)".to_string(),
                    address: Some(0x7f920447551f),
                    module_path: Some("/lib/x86_64-linux-gnu/libc.so.6".to_string()),
                    module_offset: Some(0x4251f),
                    ..Default::default()
                },
            ),
        ];

        for (data, expected) in test_cases {
            let parsed = parse_asan_call_stack(data);
            assert_eq!(vec![expected], parsed, "parsing asan stack failed {data}");
        }
    }

    #[test]
    fn oversized_values_do_not_fail_the_stack() {
        let text = "\
    #0 0x1ffffffffffffffffff in f /src/a.c:99999999999999999999:1
    #1 0x2 in g /src/b.c:12:1
";
        let stack = parse_asan_call_stack(text);
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[0].address, None);
        assert_eq!(stack[0].source_file_line, None);
        assert_eq!(stack[0].function_name.as_deref(), Some("f"));
        assert_eq!(stack[1].address, Some(2));
        assert_eq!(stack[1].source_file_line, Some(12));
    }

    #[test]
    fn only_first_stack_is_parsed() {
        let text = "\
==1==ERROR: AddressSanitizer: heap-use-after-free on address 0x602000000010 at pc 0x1 bp 0x2 sp 0x3
    #0 0x4 in js::GCMarker::processMarkStackTop(js::SliceBudget&) /src/js/gc/Marking.cpp:1520:9
    #1 0x5 in js::GCMarker::drainMarkStack(js::SliceBudget&) /src/js/gc/Marking.cpp:1380:9

freed by thread T0 here:
    #0 0x6 in free (/usr/lib/libasan.so+0x10)
";
        let stack = parse_asan_call_stack(text);
        assert_eq!(stack.len(), 2);
        assert_eq!(
            stack[1].short_name().as_deref(),
            Some("js::GCMarker::drainMarkStack")
        );
    }

    #[test]
    fn crash_address_and_detection() {
        let segv = "==26289==ERROR: AddressSanitizer: SEGV on unknown address 0x000000000000 (pc 0x7fac9b54873a sp 0x7fff085f2120 bp 0x7fff085f2130 T0)";
        assert!(is_asan_report(segv));
        assert_eq!(parse_crash_address(segv), Some(0));

        let overflow = "==26403==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x60300021e6c8 at pc 0x7f30b3d276ef bp 0x7f30a521c8c0 sp 0x7f30a521c8b8";
        assert_eq!(parse_crash_address(overflow), Some(0x60300021e6c8));

        assert!(is_asan_report("ASAN:SIGSEGV\n"));
        assert!(!is_asan_report("Assertion failure: false, at foo.cpp:3"));
    }
}
