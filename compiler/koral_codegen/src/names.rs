//! Mapping symbols to C identifiers.
//!
//! Symbols may contain `.` (module paths) or other characters C rejects.
//! Every non-alphanumeric character becomes `_`. Identifiers that collide
//! with C keywords, common libc names, or the implementation-reserved
//! `_Upper`/`__` space get an `_k_` prefix, as does anything already starting
//! with `_k_` so escaping stays injective.

const ESCAPE_PREFIX: &str = "_k_";

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "int", "long", "register", "return", "short",
    "signed", "sizeof", "static", "struct", "switch", "typedef", "union", "unsigned", "void",
    "volatile", "while", "inline", "restrict", "true", "false", "nullptr", "constexpr", "typeof",
    "asm", "bool", "NULL", "EOF", "FILE", "size_t", "ptrdiff_t", "intptr_t", "uintptr_t",
    "int8_t", "int16_t", "int32_t", "int64_t", "uint8_t", "uint16_t", "uint32_t", "uint64_t",
    "main", "malloc", "free", "abort",
];

/// Turn an arbitrary symbol into a valid, non-reserved C identifier.
pub(crate) fn c_ident(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len() + ESCAPE_PREFIX.len());
    for (i, c) in symbol.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    if needs_escape(&out) {
        out.insert_str(0, ESCAPE_PREFIX);
    }
    out
}

/// Fragment used inside generated symbol names (`__koral_<frag>_copy`).
///
/// Only character replacement is applied: the result is always embedded in
/// a larger, prefixed identifier, so keywords cannot collide.
pub(crate) fn symbol_fragment(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn needs_escape(ident: &str) -> bool {
    if C_KEYWORDS.contains(&ident) || ident.starts_with(ESCAPE_PREFIX) {
        return true;
    }
    let mut chars = ident.chars();
    chars.next() == Some('_') && matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_uppercase())
}

/// Escape a string as the body of a C string literal.
pub(crate) fn c_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for byte in value.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(char::from(byte)),
            _ => out.push_str(&format!("\\{byte:03o}")),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keywords_and_reserved_names_are_escaped() {
        assert_eq!(c_ident("int"), "_k_int");
        assert_eq!(c_ident("_Reserved"), "_k__Reserved");
        assert_eq!(c_ident("__x"), "_k___x");
        assert_eq!(c_ident("_k_x"), "_k__k_x");
        assert_eq!(c_ident("_lower"), "_lower");
        assert_eq!(c_ident("count"), "count");
    }

    #[test]
    fn invalid_characters_become_underscores() {
        assert_eq!(c_ident("std.String"), "std_String");
        assert_eq!(c_ident("1st"), "_1st");
        assert_eq!(symbol_fragment("std.List[Int]"), "std_List_Int_");
    }

    #[test]
    fn string_literals_are_escaped() {
        assert_eq!(c_string_literal("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(c_string_literal("é"), "\"\\303\\251\"");
    }
}
