//! Skill Store: the on-disk skill directory of a project.
//!
//! Layout is `<root>/<skill>/<file>.md`, where every skill has a primary `SKILL.md` and any
//! number of supporting documents. Writes go through [`write_atomic`]: the body lands in a
//! temporary file in the target directory and is renamed over the old one, so a concurrent
//! reader sees either the old or the new content in full.

pub mod header;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillsError, SKILL_LINE_LIMIT};

/// File name of a skill's primary document.
pub const PRIMARY_FILE: &str = "SKILL.md";

/// A validated `<skill>/<file>` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactName {
    skill: String,
    file: String,
}

impl ArtifactName {
    pub fn new(skill: &str, file: &str) -> Result<Self> {
        let display = format!("{skill}/{file}");
        let invalid = |reason: &str| SkillsError::InvalidArtifact {
            name: display.clone(),
            reason: reason.to_string(),
        };

        if !is_skill_dir_name(skill) {
            return Err(invalid(
                "skill name must be lowercase letters, digits and single hyphens",
            ));
        }
        if file.is_empty()
            || file.starts_with('.')
            || file.contains(['/', '\\'])
            || file.contains("..")
        {
            return Err(invalid("file must be a plain file name inside the skill directory"));
        }
        if !file.ends_with(".md") {
            return Err(invalid("file must have a .md extension"));
        }

        Ok(Self {
            skill: skill.to_string(),
            file: file.to_string(),
        })
    }

    /// Parse the `skill/file.md` form. A bare skill name means its `SKILL.md`.
    pub fn parse(name: &str) -> Result<Self> {
        match name.split_once('/') {
            Some((skill, file)) => Self::new(skill, file),
            None => Self::new(name, PRIMARY_FILE),
        }
    }

    pub fn skill(&self) -> &str {
        &self.skill
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn is_primary(&self) -> bool {
        self.file == PRIMARY_FILE
    }

    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(&self.skill).join(&self.file)
    }
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.skill, self.file)
    }
}

fn is_skill_dir_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// A skill document as read from (or about to be written to) disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillArtifact {
    /// `skill/file.md`
    pub name: String,
    pub body: String,
    pub line_count: usize,
}

impl SkillArtifact {
    fn new(name: &ArtifactName, body: String) -> Self {
        Self {
            name: name.to_string(),
            line_count: line_count(&body),
            body,
        }
    }
}

/// Lines in a document body. The whole file counts, front-matter included.
pub fn line_count(body: &str) -> usize {
    body.lines().count()
}

/// Check a proposed body against the store's invariants without writing it.
///
/// `SKILL.md` must stay within [`SKILL_LINE_LIMIT`] lines and carry a valid header.
/// Supporting documents are unconstrained.
pub fn validate(name: &ArtifactName, body: &str) -> Result<()> {
    if !name.is_primary() {
        return Ok(());
    }

    let lines = line_count(body);
    if lines > SKILL_LINE_LIMIT {
        return Err(SkillsError::RejectedTooLarge {
            name: name.to_string(),
            lines,
            limit: SKILL_LINE_LIMIT,
        });
    }

    header::check(name.skill(), body).map_err(|reason| SkillsError::InvalidArtifact {
        name: name.to_string(),
        reason,
    })?;
    Ok(())
}

/// Read one artifact. `None` if it does not exist yet.
pub fn read(root: &Path, name: &ArtifactName) -> Result<Option<SkillArtifact>> {
    let path = name.path_in(root);
    match std::fs::read_to_string(&path) {
        Ok(body) => Ok(Some(SkillArtifact::new(name, body))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SkillsError::io(path, e)),
    }
}

/// Validate and atomically replace an artifact.
///
/// A rejected body leaves the existing file untouched.
pub fn write_atomic(root: &Path, name: &ArtifactName, body: &str) -> Result<SkillArtifact> {
    validate(name, body)?;

    let path = name.path_in(root);
    let dir = root.join(name.skill());
    std::fs::create_dir_all(&dir).map_err(|e| SkillsError::io(&dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| SkillsError::io(&dir, e))?;
    tmp.write_all(body.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| SkillsError::io(tmp.path(), e))?;
    tmp.persist(&path)
        .map_err(|e| SkillsError::io(&path, e.error))?;

    tracing::debug!(artifact = %name, lines = line_count(body), "skill artifact written");
    Ok(SkillArtifact::new(name, body.to_string()))
}

/// Every artifact under `root`, sorted by name. Entries that are not valid artifact names
/// are skipped.
pub fn list(root: &Path) -> Result<Vec<SkillArtifact>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SkillsError::io(root, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SkillsError::io(root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let skill = entry.file_name().to_string_lossy().into_owned();
        let dir = entry.path();
        for file in std::fs::read_dir(&dir).map_err(|e| SkillsError::io(&dir, e))? {
            let file = file.map_err(|e| SkillsError::io(&dir, e))?;
            if !file.path().is_file() {
                continue;
            }
            let file_name = file.file_name().to_string_lossy().into_owned();
            match ArtifactName::new(&skill, &file_name) {
                Ok(name) => names.push(name),
                Err(_) => tracing::trace!(skill = %skill, file = %file_name, "skipping non-artifact"),
            }
        }
    }
    names.sort();

    let mut artifacts = Vec::with_capacity(names.len());
    for name in &names {
        // Removed between listing and reading
        if let Some(artifact) = read(root, name)? {
            artifacts.push(artifact);
        }
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill_body(name: &str, extra_lines: usize) -> String {
        let mut body = format!("---\nname: {name}\ndescription: test skill\n---\n");
        for i in 0..extra_lines {
            body.push_str(&format!("line {i}\n"));
        }
        body
    }

    #[test]
    fn names_are_validated() {
        assert!(ArtifactName::new("rust-style", "SKILL.md").is_ok());
        assert!(ArtifactName::new("rust-style", "examples.md").is_ok());

        for (skill, file) in [
            ("", "SKILL.md"),
            ("Rust", "SKILL.md"),
            ("-lead", "SKILL.md"),
            ("a--b", "SKILL.md"),
            ("..", "SKILL.md"),
            ("ok", "../SKILL.md"),
            ("ok", "sub/x.md"),
            ("ok", ".hidden.md"),
            ("ok", "notes.txt"),
        ] {
            assert!(
                ArtifactName::new(skill, file).is_err(),
                "{skill}/{file} should be invalid"
            );
        }
    }

    #[test]
    fn parse_defaults_to_primary() {
        let name = ArtifactName::parse("deploy").unwrap();
        assert!(name.is_primary());
        assert_eq!(name.to_string(), "deploy/SKILL.md");
        assert_eq!(ArtifactName::parse("deploy/runbook.md").unwrap().file(), "runbook.md");
    }

    #[test]
    fn exactly_at_limit_is_accepted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let name = ArtifactName::parse("big").unwrap();
        // 4 header lines + 496 body lines
        let body = skill_body("big", SKILL_LINE_LIMIT - 4);
        assert_eq!(line_count(&body), SKILL_LINE_LIMIT);

        let written = write_atomic(tmp.path(), &name, &body).unwrap();
        assert_eq!(written.line_count, SKILL_LINE_LIMIT);
    }

    #[test]
    fn over_limit_is_rejected_and_old_body_kept() {
        let tmp = tempfile::TempDir::new().unwrap();
        let name = ArtifactName::parse("big").unwrap();
        let original = skill_body("big", 3);
        write_atomic(tmp.path(), &name, &original).unwrap();

        let err = write_atomic(tmp.path(), &name, &skill_body("big", SKILL_LINE_LIMIT)).unwrap_err();
        assert!(matches!(err, SkillsError::RejectedTooLarge { lines: 504, .. }));
        assert_eq!(read(tmp.path(), &name).unwrap().unwrap().body, original);
    }

    #[test]
    fn supporting_files_have_no_ceiling_or_header() {
        let tmp = tempfile::TempDir::new().unwrap();
        let name = ArtifactName::parse("big/reference.md").unwrap();
        let body = "x\n".repeat(SKILL_LINE_LIMIT * 2);
        assert!(write_atomic(tmp.path(), &name, &body).is_ok());
    }

    #[test]
    fn bad_header_is_invalid_artifact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let name = ArtifactName::parse("style").unwrap();
        let err = write_atomic(tmp.path(), &name, "# no header\n").unwrap_err();
        assert!(matches!(err, SkillsError::InvalidArtifact { .. }));
        assert!(read(tmp.path(), &name).unwrap().is_none());
    }

    #[test]
    fn list_returns_sorted_artifacts_and_skips_strays() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_atomic(tmp.path(), &ArtifactName::parse("zeta").unwrap(), &skill_body("zeta", 0)).unwrap();
        write_atomic(tmp.path(), &ArtifactName::parse("alpha").unwrap(), &skill_body("alpha", 1)).unwrap();
        write_atomic(tmp.path(), &ArtifactName::parse("alpha/notes.md").unwrap(), "n\n").unwrap();
        std::fs::write(tmp.path().join("README.txt"), "stray").unwrap();
        std::fs::write(tmp.path().join("alpha").join("scratch.txt"), "stray").unwrap();

        let names: Vec<_> = list(tmp.path()).unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["alpha/SKILL.md", "alpha/notes.md", "zeta/SKILL.md"]);
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(list(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
