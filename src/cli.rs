use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::repack::RepackConfig;

#[derive(Parser, Debug)]
#[command(name = "mavenize")]
#[command(version)]
#[command(about = "Add Maven pom.xml and pom.properties entries to a JAR", long_about = None)]
#[command(after_help = "Examples:\n  \
  mavenize lib-maven.jar lib.jar pom.xml   copy lib.jar and add META-INF/maven/<group>/<artifact>/\n\n\
  Set RUST_LOG (e.g. RUST_LOG=info) for progress output.")]
pub struct Cli {
    /// Output JAR path (overwritten if it exists)
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Assembled input JAR
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Package descriptor (pom.xml)
    #[arg(value_name = "POM")]
    pub pom: PathBuf,
}

impl Cli {
    pub fn config(&self) -> Result<RepackConfig> {
        RepackConfig::new(&self.output, &self.input, &self.pom)
    }
}
