use lazy_static::lazy_static;

lazy_static! {
    /// Every reserved command word and its one-byte code
    ///
    /// Codes are for reporting and tooling only. Execution dispatches on the parsed node, never on
    /// these numbers.
    pub static ref OPCODES: Vec<(&'static str, u8)> = vec![
        ("LET", 0x10),
        ("ADD", 0x20),
        ("SUBTRACT", 0x21),
        ("MULTIPLY", 0x22),
        ("DIVIDE", 0x23),
        ("MODULO", 0x24),
        ("IF", 0x31),
        ("WHILE", 0x32),
        ("FOR", 0x33),
        ("SWITCH", 0x34),
        ("CASE", 0x35),
        ("DEFAULT", 0x36),
        ("ELSE", 0x37),
        ("END", 0x38),
        ("PRINT", 0x40),
        ("FUNC", 0x50),
        ("CALL", 0x51),
        ("RETURN", 0x52),
        ("MALLOC", 0x90),
        ("FREE", 0x91),
        ("RETAIN", 0x92),
        ("STORE", 0x93),
        ("LOAD", 0x94),
    ];
}

pub fn opcode(command: &str) -> Option<u8> {
    OPCODES
        .iter()
        .find(|(name, _)| *name == command)
        .map(|(_, code)| *code)
}

pub fn command(code: u8) -> Option<&'static str> {
    OPCODES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| *name)
}

/// Words that can never be used as identifiers
pub fn is_keyword(word: &str) -> bool {
    opcode(word).is_some()
}

#[test]
fn test_lookup() {
    assert_eq!(opcode("LET"), Some(0x10));
    assert_eq!(opcode("PRINT"), Some(0x40));
    assert_eq!(opcode("let"), None);
    assert_eq!(command(0x23), Some("DIVIDE"));
    assert_eq!(command(0xff), None);

    for (name, code) in OPCODES.iter() {
        assert_eq!(command(*code), Some(*name));
    }
}
