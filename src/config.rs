use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "FreightCheck";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Database file name inside the data directory.
const DATABASE_FILE: &str = "freightcheck.db";

/// Debug builds and test builds count as dev.
pub fn is_dev() -> bool {
    cfg!(debug_assertions)
}

/// Get the application data directory.
///
/// `FREIGHTCHECK_HOME` wins when set. Otherwise `~/FreightCheck/`, with a
/// `-dev` suffix in dev builds so test runs never touch production data.
/// Falls back to the working directory when no home directory exists
/// (containers, CI users without a passwd entry).
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FREIGHTCHECK_HOME") {
        return PathBuf::from(dir);
    }

    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if is_dev() {
        base.join(format!("{APP_NAME}-dev"))
    } else {
        base.join(APP_NAME)
    }
}

/// Default location of the document database.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join(DATABASE_FILE)
}

/// Default pipeline configuration file (optional, JSON).
pub fn default_pipeline_config_path() -> PathBuf {
    app_data_dir().join("pipeline.json")
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if is_dev() {
        "info,freightcheck_lib=debug,freightcheck=debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_under_app_data() {
        let db = default_db_path();
        let app = app_data_dir();
        assert!(db.starts_with(app));
        assert!(db.ends_with("freightcheck.db"));
    }

    #[test]
    fn pipeline_config_under_app_data() {
        let path = default_pipeline_config_path();
        assert!(path.starts_with(app_data_dir()));
        assert!(path.ends_with("pipeline.json"));
    }

    #[test]
    fn app_name_is_freightcheck() {
        assert_eq!(APP_NAME, "FreightCheck");
    }

    #[test]
    fn test_builds_are_dev() {
        assert!(is_dev());
        assert!(default_log_filter().contains("freightcheck_lib=debug"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
