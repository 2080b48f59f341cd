mod global;
mod run;

pub use global::GlobalArgs;
pub use run::RunArgs;
