//! Mermaid diagram syntax checking.
//!
//! Definitions come from standalone `.mmd` files and from
//! `<div class="mermaid">` blocks embedded in HTML pages. Each one is
//! rendered with an external CLI (mermaid-cli by default); a non-zero exit
//! marks the snippet as broken.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use regex::Regex;

use crate::config::DiagramsConfig;

/// A diagram definition and the label used when reporting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub label: String,
    pub definition: String,
}

fn mermaid_div() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<div[^>]*class="[^"]*mermaid[^"]*"[^>]*>(.*?)</div>"#)
            .expect("mermaid block pattern is valid")
    })
}

/// Named references the HTML parser also accepts without a trailing `;`.
const LEGACY_ENTITIES: &[&str] = &[
    "AElig", "AMP", "Aacute", "Acirc", "Agrave", "Aring", "Atilde", "Auml", "COPY", "Ccedil",
    "ETH", "Eacute", "Ecirc", "Egrave", "Euml", "GT", "Iacute", "Icirc", "Igrave", "Iuml", "LT",
    "Ntilde", "Oacute", "Ocirc", "Ograve", "Oslash", "Otilde", "Ouml", "QUOT", "REG", "THORN",
    "Uacute", "Ucirc", "Ugrave", "Uuml", "Yacute", "aacute", "acirc", "acute", "aelig", "agrave",
    "amp", "aring", "atilde", "auml", "brvbar", "ccedil", "cedil", "cent", "copy", "curren",
    "deg", "divide", "eacute", "ecirc", "egrave", "eth", "euml", "frac12", "frac14", "frac34",
    "gt", "iacute", "icirc", "iexcl", "igrave", "iquest", "iuml", "laquo", "lt", "macr", "micro",
    "middot", "nbsp", "not", "ntilde", "oacute", "ocirc", "ograve", "ordf", "ordm", "oslash",
    "otilde", "ouml", "para", "plusmn", "pound", "quot", "raquo", "reg", "sect", "shy", "sup1",
    "sup2", "sup3", "szlig", "thorn", "times", "uacute", "ucirc", "ugrave", "uml", "uuml",
    "yacute", "yen", "yuml",
];

/// Decode HTML character references. Anything that is not a recognised
/// named or numeric reference is kept literally.
fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match decode_reference(tail) {
            Some((text, len)) => {
                out.push_str(&text);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode the reference at the start of `tail` (which begins with `&`).
/// Returns the replacement text and the number of bytes consumed.
fn decode_reference(tail: &str) -> Option<(String, usize)> {
    tail[1..]
        .find(';')
        .filter(|&end| end > 0 && end <= 32)
        .filter(|&end| !tail[1..=end].contains(|c: char| c == '&' || c.is_whitespace()))
        .and_then(|end| {
            let reference = &tail[..end + 2];
            unescape_with(reference, resolve_html5_entity)
                .ok()
                .map(|text| (text.into_owned(), reference.len()))
        })
        .or_else(|| decode_unterminated(tail))
}

/// Numeric references and legacy named references without a `;`. A named
/// reference matches the longest legacy name prefixing the run of letters.
fn decode_unterminated(tail: &str) -> Option<(String, usize)> {
    let body = &tail[1..];
    if let Some(numeric) = body.strip_prefix('#') {
        let (digits, radix, marker) = match numeric.strip_prefix(|c: char| c == 'x' || c == 'X') {
            Some(hex) => (hex, 16, 2),
            None => (numeric, 10, 1),
        };
        let len = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        if len == 0 {
            return None;
        }
        let ch = u32::from_str_radix(&digits[..len], radix)
            .ok()
            .and_then(char::from_u32)?;
        return Some((ch.to_string(), 1 + marker + len));
    }

    let run = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len())
        .min(32);
    (2..=run).rev().find_map(|n| {
        let name = &body[..n];
        if !LEGACY_ENTITIES.contains(&name) {
            return None;
        }
        resolve_html5_entity(name).map(|text| (text.to_string(), 1 + n))
    })
}

/// Mermaid blocks embedded in `content`, labelled `"<name> (block N)"`.
///
/// Blocks are numbered from one in document order; blank blocks are
/// dropped but keep their number.
pub fn inline_blocks(name: &str, content: &str) -> Vec<Snippet> {
    mermaid_div()
        .captures_iter(content)
        .enumerate()
        .filter_map(|(i, caps)| {
            let body = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let definition = decode_entities(body).trim().to_string();
            if definition.is_empty() {
                return None;
            }
            Some(Snippet {
                label: format!("{} (block {})", name, i + 1),
                definition,
            })
        })
        .collect()
}

/// Read `path` and extract its embedded Mermaid blocks.
pub fn find_inline_blocks(path: &Path) -> Result<Vec<Snippet>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(inline_blocks(&name, &content))
}

/// Every snippet from the configured sources. Missing files are skipped.
pub fn collect_snippets(config: &DiagramsConfig) -> Result<Vec<Snippet>> {
    let mut snippets = Vec::new();

    for file in &config.mmd_files {
        let path = config.root.join(file);
        if !path.exists() {
            continue;
        }
        let definition = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let label = path
            .strip_prefix(&config.root)
            .unwrap_or(&path)
            .display()
            .to_string();
        snippets.push(Snippet { label, definition });
    }

    for file in &config.html_sources {
        let path = config.root.join(file);
        if path.exists() {
            snippets.extend(find_inline_blocks(&path)?);
        }
    }

    Ok(snippets)
}

/// Render one snippet. `Ok(None)` when it renders, `Ok(Some(message))` when
/// the renderer rejects it, `Err` when the renderer cannot be run at all.
pub fn run_renderer(renderer: &[String], snippet: &Snippet) -> Result<Option<String>> {
    let (program, base_args) = renderer
        .split_first()
        .context("diagram renderer command is empty")?;

    let tmp = tempfile::TempDir::new().context("Failed to create temporary directory")?;
    let source = tmp.path().join("diagram.mmd");
    let output = tmp.path().join("diagram.svg");
    std::fs::write(&source, &snippet.definition)
        .with_context(|| format!("Failed to write {}", source.display()))?;

    let result = Command::new(program)
        .args(base_args)
        .arg("-i")
        .arg(&source)
        .arg("-o")
        .arg(&output)
        .arg("--quiet")
        .output()
        .with_context(|| format!("Failed to run diagram renderer `{}`", program))?;

    if result.status.success() {
        tracing::debug!(label = %snippet.label, "diagram ok");
        return Ok(None);
    }

    let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&result.stdout).trim().to_string();
    let message = [stderr, stdout]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown error".to_string());
    Ok(Some(format!("{}: {}", snippet.label, message)))
}

/// Outcome of a diagram check run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagramReport {
    pub checked: usize,
    pub errors: Vec<String>,
}

impl DiagramReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for DiagramReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.checked == 0 {
            return write!(f, "No Mermaid definitions found. Skipping check.");
        }
        if self.passed() {
            return write!(
                f,
                "Mermaid syntax check passed for {} snippet(s).",
                self.checked
            );
        }
        writeln!(f, "Mermaid syntax check failed:")?;
        writeln!(f)?;
        for error in &self.errors {
            writeln!(f, "  - {}", error)?;
        }
        writeln!(f)?;
        write!(f, "Fix the issues above before pushing.")
    }
}

/// Render every configured snippet, collecting failures.
pub fn check_diagrams(config: &DiagramsConfig) -> Result<DiagramReport> {
    let snippets = collect_snippets(config)?;
    let mut report = DiagramReport {
        checked: snippets.len(),
        errors: Vec::new(),
    };
    for snippet in &snippets {
        if let Some(error) = run_renderer(&config.renderer, snippet)? {
            report.errors.push(error);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_inline_blocks_numbering_and_decoding() {
        let html = r#"
            <div class="mermaid">graph TD; A--&gt;B</div>
            <DIV id="x" class="diagram Mermaid big">   </DIV>
            <div class="note">not a diagram</div>
            <div class='mermaid'>single quotes are not matched</div>
            <div class="mermaid">
              graph LR
              C &amp; D --&gt; E
            </div>
        "#;
        let blocks = inline_blocks("page.html", html);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].label, "page.html (block 1)");
        assert_eq!(blocks[0].definition, "graph TD; A-->B");
        assert_eq!(blocks[1].label, "page.html (block 3)");
        assert!(blocks[1].definition.starts_with("graph LR"));
        assert!(blocks[1].definition.ends_with("C & D --> E"));
    }

    #[test]
    fn test_decode_entities_lenient() {
        assert_eq!(decode_entities("a &lt; b &#62; c"), "a < b > c");
        assert_eq!(decode_entities("A & B; C"), "A & B; C");
        assert_eq!(decode_entities("&&amp;"), "&&");
        assert_eq!(decode_entities("&nbsp;x").chars().count(), 2);
        assert_eq!(decode_entities("&bogus; &"), "&bogus; &");
    }

    #[test]
    fn test_decode_entities_without_semicolon() {
        assert_eq!(decode_entities("A &amp B &gt;"), "A & B >");
        assert_eq!(decode_entities("&lt&#62&#x41;&#X42"), "<>AB");
        assert_eq!(decode_entities("&ampfoo"), "&foo");
        assert_eq!(decode_entities("&notit;"), "\u{ac}it;");
        assert_eq!(decode_entities("&hellip &# &#x"), "&hellip &# &#x");
        assert_eq!(
            inline_blocks("p.html", r#"<div class="mermaid">A --&gt B &amp C</div>"#)[0].definition,
            "A --> B & C"
        );
    }

    fn config(root: &Path, renderer: &[&str]) -> DiagramsConfig {
        DiagramsConfig {
            root: root.to_path_buf(),
            mmd_files: vec![PathBuf::from("META-METHODS.mmd")],
            html_sources: vec![PathBuf::from("page.html")],
            renderer: renderer.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_collect_skips_missing_and_labels_standalone() {
        let tmp = TempDir::new().unwrap();
        assert!(collect_snippets(&config(tmp.path(), &["true"])).unwrap().is_empty());

        std::fs::write(tmp.path().join("META-METHODS.mmd"), "graph TD; A-->B").unwrap();
        let snippets = collect_snippets(&config(tmp.path(), &["true"])).unwrap();
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].label, "META-METHODS.mmd");
    }

    #[test]
    fn test_report_messages() {
        assert_eq!(
            DiagramReport::default().to_string(),
            "No Mermaid definitions found. Skipping check."
        );
        let ok = DiagramReport {
            checked: 3,
            errors: vec![],
        };
        assert_eq!(ok.to_string(), "Mermaid syntax check passed for 3 snippet(s).");
        let failed = DiagramReport {
            checked: 2,
            errors: vec!["a.mmd: bad".to_string()],
        };
        assert!(!failed.passed());
        assert_eq!(
            failed.to_string(),
            "Mermaid syntax check failed:\n\n  - a.mmd: bad\n\nFix the issues above before pushing."
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_renderer_failure_message() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("META-METHODS.mmd"), "graph").unwrap();
        std::fs::write(
            tmp.path().join("page.html"),
            r#"<div class="mermaid">graph TD</div>"#,
        )
        .unwrap();

        let report = check_diagrams(&config(
            tmp.path(),
            &["sh", "-c", "echo 'Parse error' >&2; exit 1", "renderer"],
        ))
        .unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(
            report.errors,
            vec![
                "META-METHODS.mmd: Parse error".to_string(),
                "page.html (block 1): Parse error".to_string()
            ]
        );

        let silent = check_diagrams(&config(tmp.path(), &["false"])).unwrap();
        assert_eq!(silent.errors[0], "META-METHODS.mmd: unknown error");

        let passing = check_diagrams(&config(tmp.path(), &["true"])).unwrap();
        assert!(passing.passed());
    }

    #[test]
    fn test_missing_renderer_is_fatal() {
        let snippet = Snippet {
            label: "x".to_string(),
            definition: "graph".to_string(),
        };
        let renderer = vec!["docrag-no-such-renderer-binary".to_string()];
        assert!(run_renderer(&renderer, &snippet).is_err());
    }
}
