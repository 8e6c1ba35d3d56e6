// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

/// Stable identity of a job function: module, declaring type and method.
///
/// The string form `module::Type::method` is the key used in queue payloads,
/// execution logs and function table rows, and it is the only thing that
/// takes part in equality and hashing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionLocation {
    pub module: String,
    pub declaring_type: String,
    pub method: String,
}

impl FunctionLocation {
    pub fn new(module: &str, declaring_type: &str, method: &str) -> Self {
        Self {
            module: module.to_string(),
            declaring_type: declaring_type.to_string(),
            method: method.to_string(),
        }
    }

    /// Parse the string form; the module part may itself contain `::`.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        let (rest, method) = value
            .rsplit_once("::")
            .ok_or_else(|| anyhow::anyhow!("invalid function location '{}': missing method", value))?;
        let (module, declaring_type) = rest
            .rsplit_once("::")
            .ok_or_else(|| anyhow::anyhow!("invalid function location '{}': missing type", value))?;
        anyhow::ensure!(
            !module.is_empty() && !declaring_type.is_empty() && !method.is_empty(),
            "invalid function location '{}': empty component",
            value
        );
        Ok(Self::new(module, declaring_type, method))
    }

    /// Short human-readable name, `Type.method`.
    pub fn short_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.method)
    }
}

impl std::fmt::Display for FunctionLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}::{}", self.module, self.declaring_type, self.method)
    }
}

impl PartialEq for FunctionLocation {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for FunctionLocation {}

impl std::hash::Hash for FunctionLocation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl PartialOrd for FunctionLocation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FunctionLocation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl TryFrom<String> for FunctionLocation {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FunctionLocation> for String {
    fn from(value: FunctionLocation) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for FunctionLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
