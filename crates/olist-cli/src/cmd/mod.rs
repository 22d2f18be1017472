pub mod completions;
pub mod edit;
pub mod lists;
pub mod locks;
pub mod show;
pub mod sync;
pub mod watch;
