//! Extraction of [`PatchDescriptor`]s from the header comment of a patch source file.
//!
//! A patch source starts with a block comment holding `@Key=Value` lines:
//!
//! ```text
//! /*
//!  @Name=GodMode
//!  @TargetClass=Player
//!  @TargetMethod=TakeDamage
//!  @TargetLocation=Postfix
//!  @PatchClass=P
//!  @PatchMethod=M
//!  @using Lib/Helpers.dll;
//! */
//! ```
//!
//! Only the header is scanned: parsing stops at the comment terminator or at the first line
//! opening a namespace, type or block, whichever comes first. Unknown keys are ignored; the
//! first occurrence of a key wins.

use std::{
    fs,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use crate::{
    cache::Checksum,
    module::MAIN_MODULE,
    patch::{InjectionLocation, PatchDescriptor},
    Error, Result,
};

const KEY_NAME: &str = "Name";
const KEY_DESCRIPTION: &str = "Description";
const KEY_TARGET_FRAMEWORK: &str = "TargetFramework";
const KEY_TARGET_ASSEMBLY: &str = "TargetAssembly";
const KEY_TARGET_MODULE: &str = "TargetModule";
const KEY_TARGET_NAMESPACE: &str = "TargetNamespace";
const KEY_TARGET_CLASS: &str = "TargetClass";
const KEY_TARGET_METHOD: &str = "TargetMethod";
const KEY_TARGET_LOCATION: &str = "TargetLocation";
const KEY_PATCH_CLASS: &str = "PatchClass";
const KEY_PATCH_METHOD: &str = "PatchMethod";

const USING_PREFIX: &str = "@using ";

/// Keywords opening a namespace or type declaration
const DECLARATION_KEYWORDS: [&str; 7] = [
    "namespace",
    "class",
    "struct",
    "interface",
    "enum",
    "record",
    "delegate",
];

/// Modifiers that may precede a declaration keyword
const DECLARATION_MODIFIERS: [&str; 13] = [
    "public",
    "internal",
    "private",
    "protected",
    "static",
    "sealed",
    "abstract",
    "partial",
    "unsafe",
    "readonly",
    "ref",
    "file",
    "new",
];

/// Fallback values for optional header keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDefaults {
    /// Used when `@TargetFramework=` is absent
    pub target_framework: String,
    /// Used when `@TargetAssembly=` is absent
    pub target_assembly: String,
}

impl Default for DescriptorDefaults {
    fn default() -> Self {
        DescriptorDefaults {
            target_framework: ".NETStandard,Version=v2.1".to_string(),
            target_assembly: "Assembly-CSharp.dll".to_string(),
        }
    }
}

/// Reads `path`, checksums it and parses its header.
///
/// # Errors
/// Returns [`crate::Error::Io`] if the file cannot be read, [`crate::Error::MissingHeaderField`]
/// naming the first missing required key, or [`crate::Error::InvalidInjectionLocation`].
pub fn parse_descriptor(path: &Path, defaults: &DescriptorDefaults) -> Result<PatchDescriptor> {
    let data = fs::read(path).map_err(|e| Error::io(path, e))?;
    let checksum = Checksum::of_bytes(&data);
    parse_descriptor_str(&String::from_utf8_lossy(&data), path, checksum, defaults)
}

/// Parses the header of `content`, the text of the source file at `source_path`.
///
/// # Errors
/// Returns [`crate::Error::MissingHeaderField`] naming the first missing required key, or
/// [`crate::Error::InvalidInjectionLocation`].
pub fn parse_descriptor_str(
    content: &str,
    source_path: &Path,
    checksum: Checksum,
    defaults: &DescriptorDefaults,
) -> Result<PatchDescriptor> {
    let lines = header_lines(content);
    let value = |key: &'static str| header_value(&lines, key);
    let required = |key: &'static str| value(key).ok_or(Error::MissingHeaderField(key));

    let name = value(KEY_NAME).map_or_else(|| format!("UnnamedPatch({checksum})"), String::from);
    let target_assembly = value(KEY_TARGET_ASSEMBLY).map_or_else(
        || defaults.target_assembly.clone(),
        |assembly| file_name(assembly).to_string(),
    );

    let target_class = required(KEY_TARGET_CLASS)?;
    let target_method = required(KEY_TARGET_METHOD)?;
    let location = required(KEY_TARGET_LOCATION)?;
    let target_location = InjectionLocation::from_str(location).map_err(|_| {
        Error::InvalidInjectionLocation {
            value: location.to_string(),
            valid: InjectionLocation::valid_values(),
        }
    })?;
    let patch_class = required(KEY_PATCH_CLASS)?;
    let patch_method = required(KEY_PATCH_METHOD)?;

    let base = source_path.parent().unwrap_or_else(|| Path::new(""));

    Ok(PatchDescriptor {
        name,
        description: value(KEY_DESCRIPTION).unwrap_or_default().to_string(),
        references: library_references(&lines, base),
        checksum,
        source_path: source_path.to_path_buf(),
        artifact_location: None,
        target_framework: value(KEY_TARGET_FRAMEWORK)
            .map_or_else(|| defaults.target_framework.clone(), String::from),
        target_assembly,
        target_module: value(KEY_TARGET_MODULE).unwrap_or(MAIN_MODULE).to_string(),
        target_namespace: value(KEY_TARGET_NAMESPACE).unwrap_or_default().to_string(),
        target_class: target_class.to_string(),
        target_method: target_method.to_string(),
        target_location,
        patch_class: patch_class.to_string(),
        patch_method: patch_method.to_string(),
    })
}

/// Collects the trimmed lines of the leading block comment.
///
/// Text following `/*` on the opening line counts as a header line, as does text preceding
/// `*/` on the closing line. A leading `*` decoration is stripped.
#[must_use]
pub fn header_lines(content: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut in_comment = false;

    for raw in content.lines() {
        let line = raw.trim();
        if is_declaration(line) {
            break;
        }

        let text = if in_comment {
            if line.starts_with("*/") {
                break;
            }
            line
        } else if let Some(rest) = line.strip_prefix("/*") {
            in_comment = true;
            rest
        } else {
            continue;
        };

        let (text, closed) = match text.find("*/") {
            Some(end) => (&text[..end], true),
            None => (text, false),
        };
        let text = text.strip_prefix('*').unwrap_or(text).trim();
        if !text.is_empty() {
            lines.push(text);
        }
        if closed {
            break;
        }
    }

    lines
}

/// True for a line opening a block or declaring a namespace or type, after any modifiers
fn is_declaration(line: &str) -> bool {
    if line.starts_with('{') {
        return true;
    }

    line.split(|c: char| c.is_whitespace() || c == '{' || c == ':' || c == '<')
        .filter(|word| !word.is_empty())
        .find(|word| !DECLARATION_MODIFIERS.contains(word))
        .is_some_and(|word| DECLARATION_KEYWORDS.contains(&word))
}

/// Value of the first `@key=` line, trimmed; empty values count as absent
fn header_value<'a>(lines: &[&'a str], key: &str) -> Option<&'a str> {
    lines
        .iter()
        .find_map(|line| line.strip_prefix('@')?.strip_prefix(key)?.strip_prefix('='))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Absolute paths of all `@using <path>.dll[;]` lines, in header order
fn library_references(lines: &[&str], base: &Path) -> Vec<PathBuf> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix(USING_PREFIX))
        .map(|rest| rest.trim().trim_end_matches(';').trim())
        .filter(|reference| {
            reference.len() > 4
                && reference[reference.len() - 4..].eq_ignore_ascii_case(".dll")
        })
        .map(|reference| {
            let path = Path::new(reference);
            if path.is_absolute() {
                normalize(path)
            } else {
                normalize(&base.join(path))
            }
        })
        .collect()
}

/// Last path component, accepting both separator styles
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Makes `path` absolute and resolves `.` and `..` lexically
fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOD_MODE: &str = "/*
 @Name=GodMode
 @Description=Ignores all damage
 @TargetClass=Player
 @TargetMethod=TakeDamage
 @TargetLocation=Postfix
 @PatchClass=P
 @PatchMethod=M
 @using Lib/Helpers.dll;
 @using ../Shared/Common.DLL
 @using Lib/readme.txt
*/
using System;

public class P
{
    public static void M() { }
}
";

    fn parse(content: &str) -> Result<PatchDescriptor> {
        parse_descriptor_str(
            content,
            Path::new("/games/Demo/Patches/GodMode.cs"),
            Checksum::of_bytes(content.as_bytes()),
            &DescriptorDefaults::default(),
        )
    }

    #[test]
    fn full_header() -> Result<()> {
        let descriptor = parse(GOD_MODE)?;

        assert_eq!(descriptor.name(), "GodMode");
        assert_eq!(descriptor.description(), "Ignores all damage");
        assert_eq!(descriptor.target_class(), "Player");
        assert_eq!(descriptor.target_method(), "TakeDamage");
        assert_eq!(descriptor.target_location(), InjectionLocation::Postfix);
        assert_eq!(descriptor.patch_class(), "P");
        assert_eq!(descriptor.patch_method(), "M");
        assert_eq!(descriptor.artifact_location(), None);
        assert_eq!(
            descriptor.references(),
            &[
                PathBuf::from("/games/Demo/Patches/Lib/Helpers.dll"),
                PathBuf::from("/games/Demo/Shared/Common.DLL"),
            ]
        );
        Ok(())
    }

    #[test]
    fn defaults() -> Result<()> {
        let descriptor = parse(GOD_MODE)?;

        assert_eq!(descriptor.target_framework(), ".NETStandard,Version=v2.1");
        assert_eq!(descriptor.target_assembly(), "Assembly-CSharp.dll");
        assert_eq!(descriptor.target_module(), "MainModule");
        assert_eq!(descriptor.target_namespace(), "");
        Ok(())
    }

    #[test]
    fn unnamed_patch_uses_checksum() -> Result<()> {
        let content = GOD_MODE.replace(" @Name=GodMode\n", "");
        let descriptor = parse(&content)?;

        let checksum = Checksum::of_bytes(content.as_bytes());
        assert_eq!(descriptor.name(), format!("UnnamedPatch({checksum})"));
        assert_eq!(descriptor.checksum(), checksum);
        Ok(())
    }

    #[test]
    fn module_and_namespace_are_distinct() -> Result<()> {
        let content = GOD_MODE.replace(
            " @Name=GodMode\n",
            " @TargetModule=Game.dll\n @TargetNamespace=Game.Actors\n @TargetAssembly=Plugins\\Game.dll\n",
        );
        let descriptor = parse(&content)?;

        assert_eq!(descriptor.target_module(), "Game.dll");
        assert_eq!(descriptor.target_namespace(), "Game.Actors");
        assert_eq!(descriptor.target_assembly(), "Game.dll");
        Ok(())
    }

    #[test]
    fn missing_target_method() {
        let content = GOD_MODE.replace(" @TargetMethod=TakeDamage\n", "");
        let result = parse(&content);

        assert!(matches!(result, Err(Error::MissingHeaderField("TargetMethod"))));
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert_eq!(message, "Argument \"@TargetMethod\" in patch was empty.");
    }

    #[test]
    fn empty_required_value() {
        let content = GOD_MODE.replace("@PatchClass=P", "@PatchClass=   ");
        assert!(matches!(
            parse(&content),
            Err(Error::MissingHeaderField("PatchClass"))
        ));
    }

    #[test]
    fn invalid_location() {
        let content = GOD_MODE.replace("=Postfix", "=Around");
        let result = parse(&content);
        assert!(matches!(
            &result,
            Err(Error::InvalidInjectionLocation { value, valid })
                if value == "Around" && valid == "Prefix, Postfix"
        ));
    }

    #[test]
    fn header_stops_at_declaration() {
        let content = "using System;\nnamespace Mods\n{\n/*\n@Name=Late\n*/\n}";
        assert!(header_lines(content).is_empty());
    }

    #[test]
    fn header_without_terminator_stops_at_class() {
        let content = "/* @Name=Inline\n * @PatchMethod=M\nclass P {}\n@PatchClass=Ignored";
        assert_eq!(header_lines(content), vec!["@Name=Inline", "@PatchMethod=M"]);
    }

    #[test]
    fn header_stops_at_modified_type_declarations() {
        for declaration in [
            "public class P { }",
            "internal static class P",
            "public sealed partial class P : Base",
            "struct Point",
            "public enum Mode { A, B }",
            "interface IPatch",
            "public record Hit(int Damage);",
            "namespace Mods;",
        ] {
            let content = format!("using System;\n{declaration}\n/*\n@Name=Late\n*/");
            assert!(header_lines(&content).is_empty(), "{declaration}");
        }
    }

    #[test]
    fn classic_words_do_not_end_header() {
        let content = "/*\n@Name=Early\nclassic mode\n*/";
        assert_eq!(header_lines(content), vec!["@Name=Early", "classic mode"]);
    }

    #[test]
    fn single_line_header() {
        assert_eq!(
            header_lines("/* @Name=Tiny */\nclass P {}"),
            vec!["@Name=Tiny"]
        );
    }

    #[test]
    fn first_occurrence_wins() -> Result<()> {
        let content = GOD_MODE.replace(" @Name=GodMode\n", " @Name=First\n @Name=Second\n");
        assert_eq!(parse(&content)?.name(), "First");
        Ok(())
    }

    #[test]
    fn patch_type_name_split() -> Result<()> {
        let content = GOD_MODE.replace("@PatchClass=P", "@PatchClass=Mods.Combat.P");
        let descriptor = parse(&content)?;
        assert_eq!(descriptor.patch_type_name(), ("Mods.Combat", "P"));
        Ok(())
    }
}
