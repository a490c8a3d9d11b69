//! Reads external-reference manifests.
//!
//! A manifest is the text listing of what another module exports:
//!
//! ```text
//! module strings
//! strings.trim fn 1
//! strings.version const
//! ```
//!
//! Manifests describe compiler inputs rather than user source, so problems
//! in them are hard errors, not diagnostics.

use anyhow::{bail, Context};
use camino::Utf8Path;
use loomscript_compile::{ExportedSymbol, ExternalReference, SymbolKind};

pub fn read_manifest(path: &Utf8Path) -> anyhow::Result<ExternalReference> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read reference manifest at {path:?}"))?;
    parse_manifest(&text).with_context(|| format!("in reference manifest {path:?}"))
}

fn parse_manifest(text: &str) -> anyhow::Result<ExternalReference> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    let module_name = match lines.next().and_then(|line| line.strip_prefix("module ")) {
        Some(name) => name.trim().to_owned(),
        None => bail!("the first line must be `module <name>`"),
    };

    let mut exports = vec![];
    for line in lines {
        let mut fields = line.split_whitespace();
        let qualified = fields.next().expect("blank lines are filtered out");
        let Some((namespace, name)) = qualified.split_once('.') else {
            bail!("`{qualified}` is not a namespace-qualified symbol name");
        };
        let kind = match fields.next() {
            Some("const") => SymbolKind::Const,
            Some("fn") => {
                let arity = fields
                    .next()
                    .with_context(|| format!("`{qualified}` is missing its arity"))?;
                SymbolKind::Function {
                    param_count: arity
                        .parse()
                        .with_context(|| format!("`{arity}` is not a valid arity"))?,
                }
            }
            other => bail!(
                "`{qualified}` has unknown kind `{}`; expected `const` or `fn`",
                other.unwrap_or("")
            ),
        };
        if let Some(extra) = fields.next() {
            bail!("unexpected trailing field `{extra}` after `{qualified}`");
        }
        exports.push(ExportedSymbol {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            kind,
        });
    }

    Ok(ExternalReference {
        module_name,
        exports,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use loomscript_compile::SymbolKind;

    use super::parse_manifest;

    #[test]
    fn manifests_parse_into_references() {
        let reference = parse_manifest(indoc! {"
            module strings
            # exports
            strings.trim fn 1
            strings.version const
        "})
        .unwrap();
        assert_eq!(reference.module_name, "strings");
        assert_eq!(reference.exports.len(), 2);
        assert_eq!(
            reference.exports[0].kind,
            SymbolKind::Function { param_count: 1 }
        );
        assert_eq!(reference.exports[1].kind, SymbolKind::Const);
    }

    #[test]
    fn a_missing_module_header_is_rejected() {
        assert!(parse_manifest("strings.trim fn 1\n").is_err());
    }
}
