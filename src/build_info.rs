//! Version metadata baked in at compile time.

use serde::Serialize;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit hash, from `BUILD_COMMIT` at compile time.
pub const COMMIT: &str = match option_env!("BUILD_COMMIT") {
    Some(c) => c,
    None => "unknown",
};

/// Build date, from `BUILD_DATE` at compile time.
pub const BUILD_DATE: &str = match option_env!("BUILD_DATE") {
    Some(d) => d,
    None => "unknown",
};

/// Version, commit and build date as one line.
pub fn version_string() -> String {
    format!("{VERSION} (commit: {COMMIT}, built: {BUILD_DATE})")
}

/// Serializable build metadata.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuildInfo {
    /// Crate version.
    pub version: &'static str,
    /// Commit hash.
    pub commit: &'static str,
    /// Build date.
    pub build_date: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            version: VERSION,
            commit: COMMIT,
            build_date: BUILD_DATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_populated() {
        let info = BuildInfo::default();
        assert_eq!(info.version, VERSION);
        assert!(!info.commit.is_empty());
        assert!(!info.build_date.is_empty());
    }

    #[test]
    fn version_string_format() {
        let vs = version_string();
        assert!(vs.starts_with(VERSION));
        assert!(vs.contains("commit:"));
        assert!(vs.contains("built:"));
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_value(BuildInfo::default()).unwrap();
        assert_eq!(json["version"], VERSION);
        assert!(json.get("build_date").is_some());
    }
}
