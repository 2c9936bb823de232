use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use tokio::process::Command;

/// Source of build timestamps
#[async_trait]
pub trait Clock: Send + Sync {
    /// Human-readable build time written into `pom.properties`
    async fn stamp(&self) -> Result<String>;

    /// Local time recorded on injected archive entries
    fn now(&self) -> NaiveDateTime;
}

/// Host clock: `date` output for the stamp, system local time for entries
#[derive(Debug, Clone)]
pub struct HostClock {
    program: String,
}

impl HostClock {
    pub fn new() -> Self {
        Self::with_program("date")
    }

    /// Use another program in place of `date`
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for HostClock {
    async fn stamp(&self) -> Result<String> {
        // Only LANG=C reaches the child so the output is not localized
        let output = Command::new(&self.program)
            .env_clear()
            .env("LANG", "C")
            .output()
            .await
            .with_context(|| format!("Failed to run `{}`", self.program))?;

        if !output.status.success() {
            bail!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stamp = String::from_utf8_lossy(&output.stdout).trim().to_string();
        log::debug!("`{}` reported {:?}", self.program, stamp);
        Ok(stamp)
    }

    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone)]
pub struct FixedClock {
    stamp: String,
    now: NaiveDateTime,
}

impl FixedClock {
    pub fn new(stamp: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            stamp: stamp.into(),
            now,
        }
    }
}

#[async_trait]
impl Clock for FixedClock {
    async fn stamp(&self) -> Result<String> {
        Ok(self.stamp.clone())
    }

    fn now(&self) -> NaiveDateTime {
        self.now
    }
}
