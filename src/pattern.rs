//! Output-path templates.
//!
//! A pattern such as `converted/{relative_dir}/{stem}.md` is parsed once
//! into literal and variable segments, then resolved per file against a
//! [`PatternVars`] map. Parsing happens when the configuration is built so
//! a typo in a variable name fails before any document is rendered.
//!
//! | Variable         | Value for `docs/q3/report.pdf` (base `docs/`) |
//! |------------------|-----------------------------------------------|
//! | `{filename}`     | `report` (alias `{name}`)                     |
//! | `{stem}`         | `report`                                      |
//! | `{ext}`          | `pdf` (alias `{extension}`)                   |
//! | `{dir}`          | `q3` (alias `{dirname}`)                      |
//! | `{relative_dir}` | `q3` (alias `{path}`)                         |
//! | `{date}`         | `2025-01-31`                                  |
//! | `{time}`         | `14-05-09`                                    |
//! | `{timestamp}`    | `2025-01-31_14-05-09`                         |
//!
//! `{{` and `}}` produce literal braces.

use crate::error::PatternError;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Canonical variable names, in documentation order.
pub const VARIABLES: &[&str] = &[
    "filename",
    "stem",
    "ext",
    "dir",
    "relative_dir",
    "date",
    "time",
    "timestamp",
];

fn canonical(name: &str) -> Option<&'static str> {
    let name = match name {
        "name" => "filename",
        "extension" => "ext",
        "dirname" => "dir",
        "path" => "relative_dir",
        other => other,
    };
    VARIABLES.iter().copied().find(|v| *v == name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(&'static str),
}

/// A parsed output-path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl OutputPattern {
    /// Parse `pattern`, rejecting unknown variables and stray braces.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.trim().is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, n) in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(PatternError::UnbalancedBrace {
                            pattern: pattern.to_string(),
                            brace: '{',
                            position: pos,
                        });
                    }
                    let var = canonical(name.trim()).ok_or_else(|| PatternError::UnknownVariable {
                        pattern: pattern.to_string(),
                        name: name.clone(),
                        valid: VARIABLES.join(", "),
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(var));
                }
                '}' => {
                    return Err(PatternError::UnbalancedBrace {
                        pattern: pattern.to_string(),
                        brace: '}',
                        position: pos,
                    });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern mirrors the source tree via `{relative_dir}`.
    pub fn uses_relative_dir(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Var("relative_dir")))
    }

    /// Substitute `vars` into the template.
    ///
    /// The result is not yet anchored; see [`OutputPattern::resolve_for`].
    pub fn resolve(&self, vars: &PatternVars) -> Result<PathBuf, PatternError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Var(name) => {
                    let value = vars.get(name).ok_or_else(|| PatternError::MissingValue {
                        name: (*name).to_string(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        // `{relative_dir}` is empty for files directly under the base, which
        // must not turn `{relative_dir}/x.md` into the absolute `/x.md`.
        let rooted = matches!(self.segments.first(), Some(Segment::Literal(s)) if Path::new(s).has_root());
        let out = if rooted {
            out.as_str()
        } else {
            out.trim_start_matches(['/', '\\'])
        };
        let cleaned: PathBuf = Path::new(out)
            .components()
            .filter(|c| !matches!(c, std::path::Component::CurDir))
            .collect();
        if cleaned.as_os_str().is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(cleaned)
    }

    /// Resolve and anchor a relative result.
    ///
    /// Anchor precedence: `output_dir`, then `base_dir` when the pattern
    /// uses `{relative_dir}`, then the source's own directory.
    pub fn resolve_for(
        &self,
        vars: &PatternVars,
        source: &Path,
        output_dir: Option<&Path>,
        base_dir: &Path,
    ) -> Result<PathBuf, PatternError> {
        let resolved = self.resolve(vars)?;
        if resolved.is_absolute() {
            return Ok(resolved);
        }
        let anchor = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None if self.uses_relative_dir() => base_dir.to_path_buf(),
            None => source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        Ok(anchor.join(resolved))
    }
}

/// Parse and substitute in one step.
pub fn resolve(pattern: &str, vars: &PatternVars) -> Result<PathBuf, PatternError> {
    OutputPattern::parse(pattern)?.resolve(vars)
}

/// Per-file variable values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternVars {
    values: BTreeMap<&'static str, String>,
}

impl PatternVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable. Aliases are accepted; unknown names are ignored.
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        if let Some(key) = canonical(name) {
            self.values.insert(key, value.into());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        canonical(name).and_then(|k| self.values.get(k)).map(String::as_str)
    }

    /// Derive every variable for `source`.
    ///
    /// `now` is passed in so resolution stays deterministic for a given
    /// instant. A source outside `base_dir` gets an empty `relative_dir`.
    pub fn for_source(source: &Path, base_dir: &Path, now: DateTime<Local>) -> Self {
        let os = |s: Option<&std::ffi::OsStr>| {
            s.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        };
        let relative_dir = source
            .parent()
            .and_then(|p| p.strip_prefix(base_dir).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self::new()
            .set("filename", os(source.file_stem()))
            .set("stem", os(source.file_stem()))
            .set("ext", os(source.extension()))
            .set("dir", os(source.parent().and_then(Path::file_name)))
            .set("relative_dir", relative_dir)
            .set("date", now.format("%Y-%m-%d").to_string())
            .set("time", now.format("%H-%M-%S").to_string())
            .set("timestamp", now.format("%Y-%m-%d_%H-%M-%S").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 31, 14, 5, 9).unwrap()
    }

    fn vars() -> PatternVars {
        PatternVars::for_source(
            Path::new("/docs/q3/report.pdf"),
            Path::new("/docs"),
            fixed_now(),
        )
    }

    #[test]
    fn default_pattern() {
        let p = OutputPattern::parse("{stem}.md").unwrap();
        assert_eq!(p.resolve(&vars()).unwrap(), PathBuf::from("report.md"));
    }

    #[test]
    fn all_variables() {
        let p = OutputPattern::parse("{relative_dir}/{dir}/{stem}.{ext}-{date}_{time}-{timestamp}-{filename}")
            .unwrap();
        assert_eq!(
            p.resolve(&vars()).unwrap(),
            PathBuf::from("q3/q3/report.pdf-2025-01-31_14-05-09-2025-01-31_14-05-09-report")
        );
    }

    #[test]
    fn filename_is_the_name_without_extension() {
        let p = OutputPattern::parse("{filename}.md").unwrap();
        assert_eq!(p.resolve(&vars()).unwrap(), PathBuf::from("report.md"));

        let dotted = PatternVars::for_source(
            Path::new("/docs/q3.final.pdf"),
            Path::new("/docs"),
            fixed_now(),
        );
        assert_eq!(dotted.get("filename"), Some("q3.final"));
        assert_eq!(dotted.get("name"), Some("q3.final"));
        assert_eq!(dotted.get("ext"), Some("pdf"));
    }

    #[test]
    fn aliases_resolve_to_canonical_names() {
        let p = OutputPattern::parse("{path}/{name}.{extension}").unwrap();
        assert_eq!(p.resolve(&vars()).unwrap(), PathBuf::from("q3/report.pdf"));
        assert!(p.uses_relative_dir());
    }

    #[test]
    fn unknown_variable_fails_fast() {
        let err = OutputPattern::parse("{stem}-{author}.md").unwrap_err();
        assert!(
            matches!(&err, PatternError::UnknownVariable { name, .. } if name == "author"),
            "got: {err:?}"
        );
    }

    #[test]
    fn escaped_braces_are_literal() {
        let p = OutputPattern::parse("{{draft}}-{stem}.md").unwrap();
        assert_eq!(p.resolve(&vars()).unwrap(), PathBuf::from("{draft}-report.md"));
    }

    #[test]
    fn unbalanced_braces_rejected() {
        assert!(matches!(
            OutputPattern::parse("{stem.md"),
            Err(PatternError::UnbalancedBrace { brace: '{', .. })
        ));
        assert!(matches!(
            OutputPattern::parse("stem}.md"),
            Err(PatternError::UnbalancedBrace { brace: '}', position: 4, .. })
        ));
    }

    #[test]
    fn empty_pattern_rejected() {
        assert_eq!(OutputPattern::parse("  "), Err(PatternError::Empty));
    }

    #[test]
    fn missing_value_is_an_error() {
        let p = OutputPattern::parse("{stem}.md").unwrap();
        let err = p.resolve(&PatternVars::new()).unwrap_err();
        assert_eq!(err, PatternError::MissingValue { name: "stem".into() });
    }

    #[test]
    fn resolution_is_deterministic() {
        let a = resolve("{timestamp}/{stem}.md", &vars()).unwrap();
        let b = resolve("{timestamp}/{stem}.md", &vars()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_relative_dir_is_dropped() {
        let v = PatternVars::for_source(Path::new("/docs/a.pdf"), Path::new("/docs"), fixed_now());
        assert_eq!(resolve("{relative_dir}/{stem}.md", &v).unwrap(), PathBuf::from("a.md"));
    }

    #[test]
    fn anchoring_rules() {
        let src = Path::new("/docs/q3/report.pdf");
        let base = Path::new("/docs");

        let beside = OutputPattern::parse("{stem}.md").unwrap();
        assert_eq!(
            beside.resolve_for(&vars(), src, None, base).unwrap(),
            PathBuf::from("/docs/q3/report.md")
        );

        let mirrored = OutputPattern::parse("out/{relative_dir}/{stem}.md").unwrap();
        assert_eq!(
            mirrored.resolve_for(&vars(), src, None, base).unwrap(),
            PathBuf::from("/docs/out/q3/report.md")
        );

        assert_eq!(
            beside
                .resolve_for(&vars(), src, Some(Path::new("/tmp/md")), base)
                .unwrap(),
            PathBuf::from("/tmp/md/report.md")
        );

        let absolute = OutputPattern::parse("/abs/{stem}.md").unwrap();
        assert_eq!(
            absolute.resolve_for(&vars(), src, Some(Path::new("/x")), base).unwrap(),
            PathBuf::from("/abs/report.md")
        );
    }
}
