//! Cluster job-script rendering
//!
//! Templates contain `<field>` placeholders for the five job settings. Every
//! occurrence of a known placeholder is replaced verbatim; a field that the
//! template never mentions is fine. A `<name>` token that is not one of the
//! known fields cannot be resolved and fails the rendering instead of being
//! copied into the script.

use crate::defaults;
use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};

/// Scheduler resources shared by every case of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResources {
    pub partition: String,
    pub nodes: u32,
    pub ntasks: u32,
    /// `days-hours:minutes:seconds`
    pub time: String,
}

impl Default for JobResources {
    fn default() -> Self {
        Self {
            partition: defaults::DEFAULT_PARTITION.to_string(),
            nodes: defaults::DEFAULT_NODES,
            ntasks: defaults::DEFAULT_NTASKS,
            time: defaults::DEFAULT_TIME_LIMIT.to_string(),
        }
    }
}

impl JobResources {
    #[must_use]
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    #[must_use]
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    #[must_use]
    pub fn with_ntasks(mut self, ntasks: u32) -> Self {
        self.ntasks = ntasks;
        self
    }

    #[must_use]
    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = time.into();
        self
    }

    /// Check the values before any case is generated
    pub fn validate(&self) -> MeshResult<()> {
        if self.partition.trim().is_empty() {
            return Err(MeshError::invalid_parameter("partition name is empty"));
        }
        if self.nodes == 0 || self.ntasks == 0 {
            return Err(MeshError::invalid_parameter(
                "node and task counts must be positive",
            ));
        }
        validate_time_limit(&self.time)
    }
}

/// Values substituted into one case's job script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScriptConfig {
    pub jobname: String,
    pub partition: String,
    pub nodes: u32,
    pub ntasks: u32,
    pub time: String,
}

impl JobScriptConfig {
    /// Config for a case named `jobname` running with `resources`
    #[must_use]
    pub fn for_case(jobname: impl Into<String>, resources: &JobResources) -> Self {
        Self {
            jobname: jobname.into(),
            partition: resources.partition.clone(),
            nodes: resources.nodes,
            ntasks: resources.ntasks,
            time: resources.time.clone(),
        }
    }

    fn lookup(&self, field: &str) -> Option<String> {
        match field {
            "jobname" => Some(self.jobname.clone()),
            "partition" => Some(self.partition.clone()),
            "nodes" => Some(self.nodes.to_string()),
            "ntasks" => Some(self.ntasks.to_string()),
            "time" => Some(self.time.clone()),
            _ => None,
        }
    }

    /// Substitute every placeholder of `template`
    pub fn render(&self, template: &str) -> MeshResult<String> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('<') {
            output.push_str(&rest[..open]);
            let candidate = &rest[open..];
            match placeholder(candidate) {
                Some(field) => {
                    let value = self.lookup(field).ok_or_else(|| {
                        MeshError::template(format!("unresolved placeholder <{field}>"))
                    })?;
                    output.push_str(&value);
                    rest = &candidate[field.len() + 2..];
                }
                None => {
                    output.push('<');
                    rest = &candidate[1..];
                }
            }
        }
        output.push_str(rest);

        for field in ["jobname", "partition", "nodes", "ntasks", "time"] {
            if !template.contains(&format!("<{field}>")) {
                log::debug!("job template has no <{field}> placeholder");
            }
        }
        Ok(output)
    }
}

/// Field name if `text` starts with `<identifier>`
fn placeholder(text: &str) -> Option<&str> {
    let body = text.strip_prefix('<')?;
    let end = body.find('>')?;
    let name = &body[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Some(name)
    } else {
        None
    }
}

/// Accepts `D-HH:MM:SS` with numeric fields, hours below 24 and
/// minutes/seconds below 60
pub fn validate_time_limit(time: &str) -> MeshResult<()> {
    let invalid = || {
        MeshError::invalid_parameter(format!(
            "time limit {time:?} is not in days-hours:minutes:seconds format"
        ))
    };
    let (days, clock) = time.split_once('-').ok_or_else(invalid)?;
    let fields: Vec<&str> = clock.split(':').collect();
    if fields.len() != 3 {
        return Err(invalid());
    }
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !numeric(days) || !fields.iter().all(|f| numeric(f)) {
        return Err(invalid());
    }
    let hours: u32 = fields[0].parse().map_err(|_| invalid())?;
    let minutes: u32 = fields[1].parse().map_err(|_| invalid())?;
    let seconds: u32 = fields[2].parse().map_err(|_| invalid())?;
    if hours >= 24 || minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }
    Ok(())
}
