use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Completer, Helper, Highlighter, Hinter, Result};

use crate::lang::parse::block_nesting;

/// Helper that extends editor
///
/// Only implements `Validator`, to keep reading lines while a `\` ends the input or a block is
/// still open.
#[derive(Completer, Helper, Highlighter, Hinter)]
pub struct ReplHelper {}

impl ReplHelper {
    pub fn new() -> Self {
        ReplHelper {}
    }
}

impl Validator for ReplHelper {
    fn validate(&self, ctx: &mut ValidationContext) -> Result<ValidationResult> {
        let input = ctx.input();
        if input.ends_with('\\') || open_blocks(&strip_comments(input)) > 0 {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

/// Number of blocks opened but not yet closed in `input`
///
/// Negative when there are more closers than openers, which the parser will reject anyway.
pub fn open_blocks(input: &str) -> i64 {
    block_nesting(input).0
}

pub fn strip_comments(input: &str) -> String {
    let mut stripped = String::with_capacity(input.len());
    for line in input.lines() {
        // Rest of the line is a comment
        let code = line.split('#').next().unwrap_or("");
        stripped.push_str(code);

        // Replace newlines with spaces (it doesn't matter)
        stripped.push(' ');
    }

    // Remove extra newline
    stripped.pop();

    stripped
}

/// Fixup input so the parser is happy
///
/// Does three things:
/// * Remove the multiline escape created by `ReplHelper`
/// * Drop comments
/// * Appends a `;` if not already present so the parser recognizes the input as a statement
pub fn fixup_input(input: &str) -> String {
    let mut ret = strip_comments(&input.replace("\\\n", " "));
    if !ret.trim_end().ends_with(';') {
        ret += ";";
    }

    ret
}

#[test]
fn test_strip_comments() {
    let data = vec![
        ("PRINT 1;", "PRINT 1;"),
        ("PRINT 1; # comment", "PRINT 1; "),
        ("PRINT 1;#comment", "PRINT 1;"),
        ("# only a comment", ""),
        ("LET x 1; # one\nPRINT x; # two", "LET x 1;  PRINT x; "),
    ];

    for (input, expected) in data {
        assert_eq!(strip_comments(input), expected);
    }
}

#[test]
fn test_open_blocks() {
    let data = vec![
        ("PRINT 1;", 0),
        ("IF x {", 1),
        ("IF x { PRINT 1; }", 0),
        ("WHILE x {", 1),
        ("WHILE x { IF x { PRINT 1; } END", 0),
        ("FUNC f {\nSWITCH x { CASE 1 { }", 2),
        ("FUNC f {\nSWITCH x { CASE 1 { } END END", 0),
        ("LET ENDING 1;", 0),
        ("FOR i 1 2 {PRINT i;END", 0),
        ("}", -1),
    ];

    for (input, expected) in data {
        assert_eq!(open_blocks(input), expected, "{}", input);
    }
}

#[test]
fn test_fixup_input() {
    assert_eq!(fixup_input("PRINT \\\n1"), "PRINT  1;");
    assert_eq!(fixup_input("PRINT 1"), "PRINT 1;");
    assert_eq!(fixup_input("PRINT 1;"), "PRINT 1;");
    assert_eq!(fixup_input("PRINT 1 ;  "), "PRINT 1 ;  ");
    assert_eq!(fixup_input("PRINT 1 # say one"), "PRINT 1 ;");
    assert_eq!(fixup_input("WHILE x {\nPRINT x;\nEND"), "WHILE x { PRINT x; END;");
}
