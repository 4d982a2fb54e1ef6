//! Source rewriting applied before a patch is handed to the compiler.

/// Fully qualified attribute recording the framework a patch was compiled against
const FRAMEWORK_ATTRIBUTE: &str = "System.Runtime.Versioning.TargetFramework";

/// Inserts an assembly-level target framework attribute into a patch source.
///
/// The attribute line is placed after the leading block of comments, blank lines,
/// preprocessor lines, `using` and `extern alias` directives, so it precedes the first
/// namespace or type declaration. Every original line is kept as is.
///
/// # Examples
///
/// ```rust
/// use cilpatch::patch::prepare_source;
///
/// let source = prepare_source("using System;\nclass P {}\n", ".NETStandard,Version=v2.1");
/// assert_eq!(
///     source,
///     "using System;\n\
///      [assembly: System.Runtime.Versioning.TargetFramework(\".NETStandard,Version=v2.1\")]\n\
///      class P {}\n"
/// );
/// ```
#[must_use]
pub fn prepare_source(content: &str, target_framework: &str) -> String {
    let attribute = format!(
        "[assembly: {FRAMEWORK_ATTRIBUTE}(\"{}\")]\n",
        target_framework.replace('\\', "\\\\").replace('"', "\\\"")
    );

    let mut output = String::with_capacity(content.len() + attribute.len());
    let mut in_comment = false;
    let mut inserted = false;

    for line in content.split_inclusive('\n') {
        if !inserted && !is_preamble(line.trim(), &mut in_comment) {
            output.push_str(&attribute);
            inserted = true;
        }
        output.push_str(line);
    }

    if !inserted {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&attribute);
    }
    output
}

/// Whether `line` belongs to the leading comment/directive block, tracking open block comments
fn is_preamble(line: &str, in_comment: &mut bool) -> bool {
    if *in_comment {
        if line.contains("*/") {
            *in_comment = false;
        }
        return true;
    }

    if let Some(rest) = line.strip_prefix("/*") {
        *in_comment = !rest.contains("*/");
        return true;
    }

    line.is_empty()
        || line.starts_with("//")
        || line.starts_with('#')
        || line.starts_with("extern alias ")
        || is_using_directive(line)
}

fn is_using_directive(line: &str) -> bool {
    let line = line.strip_prefix("global ").unwrap_or(line);
    line.strip_prefix("using")
        .is_some_and(|rest| rest.starts_with(char::is_whitespace) && rest.trim_end().ends_with(';'))
}
