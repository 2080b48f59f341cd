pub mod dirs;
pub mod fs;
pub mod secret;
pub mod tokio;
