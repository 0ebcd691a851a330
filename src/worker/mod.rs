mod watcher;

pub use watcher::{spawn_watcher, WatchContext};
