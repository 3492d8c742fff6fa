//! Display-name collision detection and disambiguation.
//!
//! The resolver only ever sees a snapshot of an owner's active names, so its
//! answer is advisory. The `UNIQUE (owner_id, name)` constraints on the
//! Active Store tables are what actually keep names unique; callers re-run
//! the resolver when an insert loses that race.

use crate::{
    errors::{LifecycleError, LifecycleResult},
    models::{ident::ObjectId, trash::EntityKind},
};
use sqlx::FromRow;

/// One active name belonging to the owner being resolved for.
#[derive(Clone, Debug, FromRow)]
pub struct ActiveName {
    pub id: ObjectId,
    pub name: String,
}

/// How a collision should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamingPolicy {
    /// Apply the suggestion without asking (uploads, creates, restores).
    Silent,
    /// Report the collision unless the caller forces the suggestion (renames).
    ConfirmFirst { force: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameResolution {
    /// The desired name, unchanged.
    pub desired: String,
    pub collided: bool,
    /// Disambiguated alternative, present only on collision.
    pub suggestion: Option<String>,
}

impl NameResolution {
    /// Name the resolver would settle on if the suggestion were accepted.
    pub fn final_name(&self) -> &str {
        self.suggestion.as_deref().unwrap_or(&self.desired)
    }

    /// Apply `policy`, yielding the name to write or a `NameCollision`.
    pub fn apply(self, kind: EntityKind, policy: NamingPolicy) -> LifecycleResult<String> {
        match (self.suggestion, policy) {
            (None, _) => Ok(self.desired),
            (Some(suggestion), NamingPolicy::Silent)
            | (Some(suggestion), NamingPolicy::ConfirmFirst { force: true }) => Ok(suggestion),
            (Some(suggestion), NamingPolicy::ConfirmFirst { force: false }) => {
                Err(LifecycleError::NameCollision {
                    kind,
                    name: self.desired,
                    suggestion,
                })
            }
        }
    }
}

/// Split `name` into `(stem, extension)` on the last `.`.
///
/// The extension keeps its dot. A leading dot (`.env`) is part of the stem,
/// not an extension.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Normalize a caller-supplied display name.
///
/// Trims surrounding whitespace, turns path separators into `_` and drops
/// control characters.
pub fn sanitize(raw: &str) -> LifecycleResult<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(LifecycleError::InvalidInput("name must not be empty".into()));
    }
    Ok(cleaned.to_string())
}

/// Prefix every `stem(N)extension` candidate starts with; used to narrow
/// the store query before resolving.
pub fn sequence_prefix(desired: &str) -> String {
    format!("{}(", split_name(desired).0)
}

/// Resolve `desired` against the owner's active names.
///
/// `exclude` is the entity being renamed; its own current name never counts
/// as a collision.
pub fn resolve(desired: &str, existing: &[ActiveName], exclude: Option<&ObjectId>) -> NameResolution {
    let others = || {
        existing
            .iter()
            .filter(move |n| exclude.is_none_or(|id| &n.id != id))
    };

    if !others().any(|n| n.name == desired) {
        return NameResolution {
            desired: desired.to_string(),
            collided: false,
            suggestion: None,
        };
    }

    let (stem, ext) = split_name(desired);
    let highest = others()
        .filter_map(|n| sequence_number(&n.name, stem, ext))
        .max()
        .unwrap_or(0);

    NameResolution {
        desired: desired.to_string(),
        collided: true,
        suggestion: Some(format!("{}({}){}", stem, highest.saturating_add(1), ext)),
    }
}

/// `Some(N)` when `candidate` is exactly `stem(N)ext` with `N >= 1`.
fn sequence_number(candidate: &str, stem: &str, ext: &str) -> Option<u64> {
    let inner = candidate
        .strip_prefix(stem)?
        .strip_suffix(ext)?
        .strip_prefix('(')?
        .strip_suffix(')')?;
    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    inner.parse::<u64>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<ActiveName> {
        list.iter()
            .map(|name| ActiveName {
                id: ObjectId::mint(),
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn split_on_last_dot() {
        assert_eq!(split_name("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".env"), (".env", ""));
    }

    #[test]
    fn no_collision_keeps_desired_name() {
        let res = resolve("a.txt", &names(&["b.txt"]), None);
        assert!(!res.collided);
        assert_eq!(res.final_name(), "a.txt");
    }

    #[test]
    fn suggestions_follow_the_highest_sequence() {
        let res = resolve("report.pdf", &names(&["report.pdf"]), None);
        assert_eq!(res.suggestion.as_deref(), Some("report(1).pdf"));

        let res = resolve(
            "report.pdf",
            &names(&["report.pdf", "report(1).pdf", "report(7).pdf", "report(x).pdf"]),
            None,
        );
        assert_eq!(res.suggestion.as_deref(), Some("report(8).pdf"));
    }

    #[test]
    fn extensionless_names() {
        let res = resolve("notes", &names(&["notes", "notes(2)"]), None);
        assert_eq!(res.suggestion.as_deref(), Some("notes(3)"));
    }

    #[test]
    fn parentheses_in_the_stem_are_literal() {
        let res = resolve("a(1).txt", &names(&["a(1).txt"]), None);
        assert_eq!(res.suggestion.as_deref(), Some("a(1)(1).txt"));
    }

    #[test]
    fn renamed_entity_is_excluded() {
        let existing = names(&["a.txt"]);
        let res = resolve("a.txt", &existing, Some(&existing[0].id));
        assert!(!res.collided);
    }

    #[test]
    fn confirm_first_blocks_unless_forced() {
        let res = resolve("a.txt", &names(&["a.txt"]), None);
        let err = res
            .clone()
            .apply(EntityKind::Record, NamingPolicy::ConfirmFirst { force: false })
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NameCollision { ref suggestion, .. } if suggestion == "a(1).txt"
        ));
        assert_eq!(
            res.clone()
                .apply(EntityKind::Record, NamingPolicy::ConfirmFirst { force: true })
                .unwrap(),
            "a(1).txt"
        );
        assert_eq!(
            res.apply(EntityKind::Record, NamingPolicy::Silent).unwrap(),
            "a(1).txt"
        );
    }

    #[test]
    fn sanitize_rejects_blank_and_strips_separators() {
        assert!(sanitize("   ").is_err());
        assert_eq!(sanitize("  dir/sub\\x.txt ").unwrap(), "dir_sub_x.txt");
        assert_eq!(sanitize("a\u{0}b.txt").unwrap(), "ab.txt");
    }
}
