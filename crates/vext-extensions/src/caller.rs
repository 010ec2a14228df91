use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Identity of the invoking connection, visible to scripts through `GetVar`.
pub struct CallerData {
    pub source_path: PathBuf,
    pub port: String,
    pub user: String,
    pub client: String,
    pub host: String,
    pub version: String,
    pub charset: String,
    pub language: String,
    pub cwd: PathBuf,
    /// Command arguments exposed as `argv`.
    pub argv: Vec<String>,
}

impl CallerData {
    /// Copy bound to one extension's script file.
    pub fn for_script(&self, path: &Path) -> Self {
        Self {
            source_path: path.to_path_buf(),
            ..self.clone()
        }
    }

    pub fn host_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "sourcePath".to_string(),
                self.source_path.display().to_string(),
            ),
            ("port".to_string(), self.port.clone()),
            ("user".to_string(), self.user.clone()),
            ("client".to_string(), self.client.clone()),
            ("host".to_string(), self.host.clone()),
            ("version".to_string(), self.version.clone()),
            ("charset".to_string(), self.charset.clone()),
            ("language".to_string(), self.language.clone()),
            ("cwd".to_string(), self.cwd.display().to_string()),
        ])
    }
}
