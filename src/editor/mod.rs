//! Editor process launching and PID correction.

mod launcher;
mod locator;

pub use launcher::{resolve_executable, EditorLauncher, MockEditorLauncher, SystemEditorLauncher};
pub use locator::{youngest, MockProcessLocator, ProcessCandidate, ProcessLocator, SysinfoProcessLocator};
