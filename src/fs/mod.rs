pub mod util;
pub mod watcher;

pub use watcher::{FsWatcher, MOVE_PAIR_WINDOW, should_ignore_file};
