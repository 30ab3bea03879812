use anyhow::bail;
use chrono::{DateTime, Utc};

/// Snapshot name used when none is given, e.g. `vol1-snapshot-20261017T093000123Z`.
pub fn default_name(volume: &str, now: DateTime<Utc>) -> String {
    format!("{}-snapshot-{}", volume, now.format("%Y%m%dT%H%M%S%3fZ"))
}

fn check_identifier(kind: &str, value: &str) -> anyhow::Result<()> {
    if value.is_empty() {
        bail!("{} must not be empty", kind);
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        bail!("{} '{}' contains an unsupported character '{}'", kind, value, c);
    }
    Ok(())
}

pub fn create_command(svm: &str, volume: &str, name: &str) -> anyhow::Result<String> {
    check_identifier("SVM name", svm)?;
    check_identifier("Volume name", volume)?;
    check_identifier("Snapshot name", name)?;
    Ok(format!(
        "volume snapshot create -vserver {} -volume {} -snapshot {}",
        svm, volume, name
    ))
}
