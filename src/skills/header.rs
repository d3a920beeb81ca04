//! `SKILL.md` front-matter block.
//!
//! ```markdown
//! ---
//! name: rust-conventions
//! description: House style for this workspace's Rust code
//! ---
//!
//! # Rust conventions
//! ...
//! ```

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SkillHeader {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Split the YAML block off the top of a document. Returns the raw YAML text.
fn front_matter(body: &str) -> Result<&str, String> {
    let rest = body
        .strip_prefix("---\n")
        .or_else(|| body.strip_prefix("---\r\n"))
        .ok_or_else(|| "must start with a YAML front-matter block (---)".to_string())?;

    let end = if rest.starts_with("---") {
        0
    } else {
        rest.find("\n---")
            .ok_or_else(|| "missing closing --- for front-matter".to_string())?
    };
    Ok(&rest[..end])
}

/// Check the header of a primary skill document against its directory name.
pub fn check(skill: &str, body: &str) -> Result<SkillHeader, String> {
    let yaml = front_matter(body)?;
    if yaml.trim().is_empty() {
        return Err("front-matter is missing required field: name".into());
    }
    let header: SkillHeader = serde_yaml::from_str(yaml)
        .map_err(|e| format!("failed to parse front-matter: {e}"))?;

    match header.name.as_deref() {
        Some(name) if name == skill => {}
        Some(name) => {
            return Err(format!("front-matter name {name:?} does not match directory {skill:?}"))
        }
        None => return Err("front-matter is missing required field: name".into()),
    }
    if header.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
        return Err("front-matter is missing required field: description".into());
    }

    Ok(header)
}
