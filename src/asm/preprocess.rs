// Preprocessor (§4.6 "Preprocess"): `.MACRO`/`.ENDM` expansion with
// hygienic parameter substitution and arbitrary nesting, `.INCLUDE`
// splicing with cycle detection.

use std::collections::{HashMap, HashSet};

use crate::error::{CompilationError, CompilationErrorKind, SourceLoc};

use super::lexer::Lexer;
use super::token::{Token, TokenKind};

struct Macro {
    params: Vec<String>,
    body: Vec<Token>,
}

/// Recursion guard for a macro invocation expanding into another macro
/// invocation (directly or through a chain); bounds a runaway self-cycle
/// instead of blowing the stack.
const MAX_MACRO_DEPTH: u32 = 64;

/// Source text for every file that may be `.INCLUDE`d, keyed by the
/// path a host resolved (the core never touches the filesystem, §1
/// non-goals).
pub type SourceSet<'a> = HashMap<String, &'a str>;

pub fn preprocess(
    entry_file: &str,
    sources: &SourceSet,
) -> Result<Vec<Token>, CompilationError> {
    let mut visiting = HashSet::new();
    let tokens = expand_includes(entry_file, sources, &mut visiting)?;
    expand_macros(tokens)
}

fn expand_includes(
    file: &str,
    sources: &SourceSet,
    visiting: &mut HashSet<String>,
) -> Result<Vec<Token>, CompilationError> {
    if !visiting.insert(file.to_string()) {
        return Err(CompilationError::new(
            CompilationErrorKind::IncludeCycle(file.to_string()),
            SourceLoc { file: file.to_string(), line: 0, column: 0 },
        ));
    }
    let source = sources.get(file).ok_or_else(|| {
        CompilationError::new(
            CompilationErrorKind::Lex(format!("unknown include target '{}'", file)),
            SourceLoc { file: file.to_string(), line: 0, column: 0 },
        )
    })?;
    let tokens = Lexer::new(file, source).lex()?;

    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if let TokenKind::Directive(name) = &tokens[i].kind {
            if name == "INCLUDE" {
                if let Some(Token { kind: TokenKind::Str(path), .. }) = tokens.get(i + 1) {
                    let nested = expand_includes(path, sources, visiting)?;
                    out.extend(nested);
                    i += 2;
                    continue;
                }
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    visiting.remove(file);
    Ok(out)
}

fn split_lines(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    for t in tokens {
        match t.kind {
            TokenKind::Newline => {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
            }
            TokenKind::Eof => {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(t),
        }
    }
    lines
}

fn expand_macros(tokens: Vec<Token>) -> Result<Vec<Token>, CompilationError> {
    let lines = split_lines(tokens);
    let mut macros: HashMap<String, Macro> = HashMap::new();
    let mut body_lines: Vec<Vec<Token>> = Vec::new();
    let mut counter: u32 = 0;

    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if let Some(Token { kind: TokenKind::Directive(name), loc }) = line.first() {
            if name == "MACRO" {
                let macro_name = match line.get(1) {
                    Some(Token { kind: TokenKind::Ident(n), .. }) => n.to_ascii_uppercase(),
                    _ => {
                        return Err(CompilationError::new(
                            CompilationErrorKind::Parse("MACRO requires a name".into()),
                            loc.clone(),
                        ))
                    }
                };
                let params: Vec<String> = line[2..]
                    .iter()
                    .filter_map(|t| match &t.kind {
                        TokenKind::Ident(n) => Some(n.clone()),
                        _ => None,
                    })
                    .collect();
                let mut body = Vec::new();
                // A nested `.MACRO`/`.ENDM` pair inside this body must not
                // be mistaken for this macro's own terminator - track
                // nesting depth so only the matching `.ENDM` ends
                // collection (§4.6 "arbitrary nesting").
                let mut depth: u32 = 1;
                i += 1;
                loop {
                    if i >= lines.len() {
                        return Err(CompilationError::new(
                            CompilationErrorKind::Parse(format!(
                                "unterminated .MACRO {}",
                                macro_name
                            )),
                            loc.clone(),
                        ));
                    }
                    match lines[i].first().map(|t| &t.kind) {
                        Some(TokenKind::Directive(n)) if n == "MACRO" => depth += 1,
                        Some(TokenKind::Directive(n)) if n == "ENDM" => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    for t in &lines[i] {
                        body.push(t.clone());
                    }
                    body.push(Token { kind: TokenKind::Newline, loc: loc.clone() });
                    i += 1;
                }
                macros.insert(macro_name, Macro { params, body });
                i += 1;
                continue;
            }
        }
        body_lines.push(line.clone());
        i += 1;
    }

    let mut out = Vec::new();
    for line in body_lines {
        expand_line(&line, &macros, &mut counter, &mut out, 0)?;
    }
    out.push(Token {
        kind: TokenKind::Eof,
        loc: out.last().map(|t: &Token| t.loc.clone()).unwrap_or_default(),
    });
    Ok(out)
}

/// Expands one line, substituting params and renaming hygienic labels. A
/// macro's body can itself invoke another macro by name, so the
/// substituted result is re-split into lines and fed back through this
/// same expansion rather than emitted verbatim (§4.6 "arbitrary
/// nesting") - `depth` bounds that recursion against a macro cycle.
fn expand_line(
    line: &[Token],
    macros: &HashMap<String, Macro>,
    counter: &mut u32,
    out: &mut Vec<Token>,
    depth: u32,
) -> Result<(), CompilationError> {
    let name = match line.first() {
        Some(Token { kind: TokenKind::Ident(n), .. }) => n.to_ascii_uppercase(),
        _ => {
            out.extend(line.iter().cloned());
            out.push(Token {
                kind: TokenKind::Newline,
                loc: line.last().map(|t| t.loc.clone()).unwrap_or_default(),
            });
            return Ok(());
        }
    };
    let mac = match macros.get(&name) {
        Some(m) => m,
        None => {
            out.extend(line.iter().cloned());
            out.push(Token {
                kind: TokenKind::Newline,
                loc: line.last().map(|t| t.loc.clone()).unwrap_or_default(),
            });
            return Ok(());
        }
    };
    if depth >= MAX_MACRO_DEPTH {
        return Err(CompilationError::new(
            CompilationErrorKind::Parse(format!(
                "macro expansion of `{}` exceeded depth {} - likely a macro calling itself",
                name, MAX_MACRO_DEPTH
            )),
            line.first().map(|t| t.loc.clone()).unwrap_or_default(),
        ));
    }

    *counter += 1;
    let suffix = format!("__m{}", counter);
    let args: Vec<&Token> = line[1..].iter().collect();
    let bound: HashMap<&str, &Token> = mac
        .params
        .iter()
        .zip(args.iter())
        .map(|(p, a)| (p.as_str(), *a))
        .collect();

    // Hygiene: rename any identifier defined as `name:` inside the
    // body so nested expansions never collide on label names.
    let mut renamed_labels: HashMap<String, String> = HashMap::new();
    for w in mac.body.windows(2) {
        if let (TokenKind::Ident(n), TokenKind::Colon) = (&w[0].kind, &w[1].kind) {
            renamed_labels.entry(n.clone()).or_insert_with(|| format!("{}{}", n, suffix));
        }
    }

    let mut substituted = Vec::with_capacity(mac.body.len());
    for t in &mac.body {
        match &t.kind {
            TokenKind::Ident(n) => {
                if let Some(replacement) = bound.get(n.as_str()) {
                    substituted.push((*replacement).clone());
                } else if let Some(renamed) = renamed_labels.get(n) {
                    substituted.push(Token { kind: TokenKind::Ident(renamed.clone()), loc: t.loc.clone() });
                } else {
                    substituted.push(t.clone());
                }
            }
            _ => substituted.push(t.clone()),
        }
    }

    for sub_line in split_lines(substituted) {
        expand_line(&sub_line, macros, counter, out, depth + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_simple_macro_with_substitution() {
        let src = ".MACRO DOUBLE x\nADDR x x\n.ENDM\nDOUBLE %DR0\n";
        let mut sources = SourceSet::new();
        sources.insert("t.asm".into(), src);
        let toks = preprocess("t.asm", &sources).unwrap();
        let idents: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Ident(n) => Some(n.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(idents, vec!["ADDR".to_string()]);
        let regs: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Register(r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(regs, vec![0, 0]);
    }

    #[test]
    fn detects_include_cycle() {
        let mut sources = SourceSet::new();
        sources.insert("a.asm".into(), ".INCLUDE \"b.asm\"\n");
        sources.insert("b.asm".into(), ".INCLUDE \"a.asm\"\n");
        assert!(preprocess("a.asm", &sources).is_err());
    }

    #[test]
    fn macro_invoking_another_macro_fully_expands() {
        let src = ".MACRO INC x\nADDI x 1\n.ENDM\n.MACRO DOUBLE_INC x\nINC x\nINC x\n.ENDM\nDOUBLE_INC %DR0\n";
        let mut sources = SourceSet::new();
        sources.insert("t.asm".into(), src);
        let toks = preprocess("t.asm", &sources).unwrap();
        let idents: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Ident(n) => Some(n.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(idents, vec!["ADDI".to_string(), "ADDI".to_string()]);
        let regs: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Register(r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(regs, vec![0, 0]);
    }

    #[test]
    fn nested_macro_definition_does_not_corrupt_outer_collection() {
        // The inner `.MACRO`/`.ENDM` pair is only ever text inside OUTER's
        // body (it's never invoked, so it's never registered as its own
        // macro) - what this guards against is the collection loop ending
        // OUTER's body at the *inner* `.ENDM` and mistaking `ADDR x x` plus
        // the real terminator for a top-level statement.
        let src = ".MACRO OUTER x\n.MACRO INNER y\nADDI y 1\n.ENDM\nADDR x x\n.ENDM\nNOP\n";
        let mut sources = SourceSet::new();
        sources.insert("t.asm".into(), src);
        let toks = preprocess("t.asm", &sources).unwrap();
        let idents: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Ident(n) => Some(n.clone()),
                _ => None,
            })
            .collect();
        // OUTER is never invoked either, so the whole `.MACRO OUTER` block
        // is swallowed by collection and only the trailing NOP survives -
        // proof the outer `.ENDM` (not the inner one) is what ended it.
        assert_eq!(idents, vec!["NOP".to_string()]);
    }

    #[test]
    fn splices_include_contents_in_place() {
        let mut sources = SourceSet::new();
        sources.insert("a.asm".into(), "NOP\n.INCLUDE \"b.asm\"\nNOP\n");
        sources.insert("b.asm".into(), "SYNC\n");
        let toks = preprocess("a.asm", &sources).unwrap();
        let idents: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Ident(n) => Some(n.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(idents, vec!["NOP", "SYNC", "NOP"]);
    }
}
