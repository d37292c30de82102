//! Git collaborator used for repository sources and git-backed templates.

mod cli;

pub use cli::{GitCli, GitClient, MockGitClient};
