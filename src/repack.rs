//! Copy a JAR and add Maven metadata entries to the copy.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::clock::Clock;
use crate::pom::{Coordinates, PomDescriptor};
use crate::zip::ZipAppender;

/// First line of every generated `pom.properties`
pub const PROPERTIES_HEADER: &str = "#Generated by Bazel";

/// Paths for one repackaging run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepackConfig {
    output: PathBuf,
    input: PathBuf,
    pom: PathBuf,
}

impl RepackConfig {
    pub fn new(
        output: impl Into<PathBuf>,
        input: impl Into<PathBuf>,
        pom: impl Into<PathBuf>,
    ) -> Result<Self> {
        let config = Self {
            output: output.into(),
            input: input.into(),
            pom: pom.into(),
        };
        for (what, path) in [
            ("output", &config.output),
            ("input", &config.input),
            ("descriptor", &config.pom),
        ] {
            if path.as_os_str().is_empty() {
                bail!("The {} path must not be empty", what);
            }
        }
        Ok(config)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn pom(&self) -> &Path {
        &self.pom
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepackSummary {
    pub coordinates: Coordinates,
    pub pom_entry: String,
    pub properties_entry: String,
    pub total_entries: u64,
}

/// Build the `pom.properties` body: five lines, no trailing newline.
pub fn pom_properties(coordinates: &Coordinates, stamp: &str) -> String {
    [
        PROPERTIES_HEADER.to_string(),
        format!("#{}", stamp),
        format!("version={}", coordinates.version),
        format!("groupId={}", coordinates.group_id),
        format!("artifactId={}", coordinates.artifact_id),
    ]
    .join("\n")
}

/// Runs the copy / parse / append sequence against a [`Clock`]
pub struct Repackager<C: Clock> {
    clock: C,
}

impl<C: Clock> Repackager<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Copy the input JAR to the output path and add `pom.xml` and
    /// `pom.properties` under `META-INF/maven/<group>/<artifact>/`.
    ///
    /// If anything after the copy fails, the output is left as a plain
    /// copy of the input.
    pub async fn run(&self, config: &RepackConfig) -> Result<RepackSummary> {
        log::info!(
            "Repackaging {} -> {}",
            config.input().display(),
            config.output().display()
        );

        let jar = tokio::fs::read(config.input())
            .await
            .with_context(|| format!("Failed to read {}", config.input().display()))?;
        tokio::fs::write(config.output(), &jar)
            .await
            .with_context(|| format!("Failed to write {}", config.output().display()))?;
        log::debug!("Copied {} bytes", jar.len());

        let mut appender = ZipAppender::open(config.output()).await?;

        let descriptor = PomDescriptor::load(config.pom()).await?;
        let coordinates = descriptor.coordinates().clone();
        log::debug!(
            "Coordinates {}:{}:{}",
            coordinates.group_id,
            coordinates.artifact_id,
            coordinates.version
        );

        let stamp = self.clock.stamp().await?;
        let modified = self.clock.now();

        let prefix = coordinates.entry_prefix();
        let pom_entry = format!("{}pom.xml", prefix);
        let properties_entry = format!("{}pom.properties", prefix);

        appender.add_entry(&pom_entry, descriptor.raw(), modified)?;
        appender.add_entry(
            &properties_entry,
            pom_properties(&coordinates, &stamp).as_bytes(),
            modified,
        )?;
        let total_entries = appender.finish().await?;

        log::info!("Added {} and {}", pom_entry, properties_entry);

        Ok(RepackSummary {
            coordinates,
            pom_entry,
            properties_entry,
            total_entries,
        })
    }
}
