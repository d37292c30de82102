//! Classification of user-supplied session sources.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::SessionError;
use crate::session::{Source, SourceType};
use crate::templates::TemplateStore;

/// Remote URL forms git understands: scheme URLs and scp-like `user@host:path`
static GIT_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:https?|git|ssh|file)://\S+|[\w.-]+@[\w.-]+:\S+)$")
        .expect("git url pattern is valid")
});

/// Whether `value` looks like a git remote URL
pub fn is_git_url(value: &str) -> bool {
    GIT_URL.is_match(value)
}

/// Maps raw source strings to a [`Source`].
///
/// Only performs existence checks. Template names are tried before the
/// filesystem so a template always wins over a same-named directory.
#[derive(Clone)]
pub struct SourceResolver {
    templates: TemplateStore,
}

impl SourceResolver {
    pub fn new(templates: TemplateStore) -> Self {
        Self { templates }
    }

    pub fn resolve(&self, raw: &str) -> Result<Source, SessionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Source::blank());
        }

        if let Some(template) = self.templates.get(raw) {
            debug!(template = %template.name, "Source resolved to template");
            return Ok(Source::new(SourceType::Template, template.name));
        }

        let path = Path::new(raw);
        if path.is_dir() {
            let absolute = path.canonicalize()?;
            debug!(path = %absolute.display(), "Source resolved to directory");
            return Ok(Source::new(
                SourceType::Directory,
                absolute.to_string_lossy(),
            ));
        }

        if is_git_url(raw) {
            debug!(url = raw, "Source resolved to repository");
            return Ok(Source::new(SourceType::Repository, raw));
        }

        Err(SessionError::InvalidSource(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MockGitClient;
    use crate::storage::Storage;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn resolver(temp_dir: &TempDir) -> (SourceResolver, TemplateStore) {
        let templates = TemplateStore::new(
            Storage::new(temp_dir.path().join("storage")),
            Arc::new(MockGitClient::new()),
        );
        (SourceResolver::new(templates.clone()), templates)
    }

    #[test]
    fn test_empty_is_blank() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, _) = resolver(&temp_dir);
        assert_eq!(resolver.resolve("").unwrap(), Source::blank());
        assert_eq!(resolver.resolve("   ").unwrap(), Source::blank());
    }

    #[test]
    fn test_existing_directory_is_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, _) = resolver(&temp_dir);
        let dir = temp_dir.path().join("proj");
        std::fs::create_dir_all(&dir).unwrap();

        let source = resolver.resolve(dir.to_str().unwrap()).unwrap();
        assert_eq!(source.source_type, SourceType::Directory);
        assert!(Path::new(&source.value).is_absolute());
        assert_eq!(Path::new(&source.value), dir.canonicalize().unwrap());
    }

    #[test]
    fn test_template_wins_over_directory() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, templates) = resolver(&temp_dir);
        std::fs::create_dir_all(templates.root().join("starter")).unwrap();

        let source = resolver.resolve("starter").unwrap();
        assert_eq!(source, Source::new(SourceType::Template, "starter"));
    }

    #[test]
    fn test_git_urls_are_repositories() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, _) = resolver(&temp_dir);

        for url in [
            "https://github.com/acme/widget.git",
            "git@github.com:acme/widget.git",
            "ssh://git@example.com/acme/widget",
        ] {
            let source = resolver.resolve(url).unwrap();
            assert_eq!(source.source_type, SourceType::Repository, "{url}");
            assert_eq!(source.value, url);
        }
    }

    #[test]
    fn test_unresolvable_source_fails_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, templates) = resolver(&temp_dir);

        assert!(matches!(
            resolver.resolve("definitely-not-a-thing-here"),
            Err(SessionError::InvalidSource(raw)) if raw == "definitely-not-a-thing-here"
        ));
        assert!(!templates.root().exists());
    }
}
