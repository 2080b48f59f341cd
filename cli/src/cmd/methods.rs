use anyhow::Context;
use anyhow::Result;
use bosun::procedure::ProcedureRegistry;
use camino::Utf8PathBuf;
use clap::Args;
use tabled::settings::Style;
use tabled::Table;
use tabled::Tabled;

use crate::args::GlobalArgs;
use crate::cmd::Run;

/// List available methods
#[derive(Debug, Args)]
pub struct MethodsCmd {
    /// Directory holding one subdirectory per method, each with a manifest.yml
    #[clap(long, env = "BOSUN_METHODS_DIR", default_value = "methods")]
    methods_dir: Utf8PathBuf,
}

#[derive(Tabled)]
struct Row {
    id: String,
    op: String,
    name: String,
    protocols: String,
}

impl Run for MethodsCmd {
    async fn run(&self, _global: &GlobalArgs) -> Result<()> {
        let registry = ProcedureRegistry::load_dir(&self.methods_dir)
            .with_context(|| format!("unable to load methods from {}", self.methods_dir))?;
        let rows = registry.iter().map(|p| Row {
            id: p.id.clone(),
            op: p.op.to_string(),
            name: p.name.clone().unwrap_or_default(),
            protocols: p.protocols.join(","),
        });
        println!("{}", Table::new(rows).with(Style::sharp()));
        Ok(())
    }
}
