// Debug/source map (C10): address <-> (file, line, column), plus an
// optional token map joined by annotation tooling with runtime state.
// Not required for execution (§4.9).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// `linearAddress -> (file, line, column)`. Must cover every code cell
/// (§4.9, and the artifact invariant checked in `artifact::validate`).
pub type SourceMap = HashMap<usize, SourcePos>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Opcode,
    Register,
    Literal,
    Vector,
    Label,
    Directive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub kind: TokenKind,
    pub text: String,
}

/// `linearAddress -> token metadata`, for joining with live register
/// values / jump targets / parameter binding chains in annotation
/// tooling (§4.9).
pub type TokenMap = HashMap<usize, TokenInfo>;

/// `linearAddress -> lookup key`, letting tooling go the other direction
/// (token text back to the addresses that use it).
pub type TokenLookup = HashMap<String, Vec<usize>>;

pub fn build_token_lookup(map: &TokenMap) -> TokenLookup {
    let mut lookup: TokenLookup = TokenLookup::new();
    for (addr, info) in map {
        lookup.entry(info.text.clone()).or_default().push(*addr);
    }
    for addrs in lookup.values_mut() {
        addrs.sort_unstable();
    }
    lookup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_groups_by_text() {
        let mut map = TokenMap::new();
        map.insert(0, TokenInfo { kind: TokenKind::Label, text: "LOOP".into() });
        map.insert(4, TokenInfo { kind: TokenKind::Label, text: "LOOP".into() });
        let lookup = build_token_lookup(&map);
        assert_eq!(lookup.get("LOOP"), Some(&vec![0, 4]));
    }
}
