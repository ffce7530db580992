// Toolchain and engine configuration for the codejudge engine
use anyhow::{bail, Context, Result};
use codejudge_common::types::{ExecutionLimits, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOOLCHAINS_PATH: &str = "config/toolchains.json";

pub const TOOLCHAINS_ENV: &str = "JUDGE_TOOLCHAINS";
pub const CC_ENV: &str = "JUDGE_CC";
pub const CXX_ENV: &str = "JUDGE_CXX";
pub const WORKSPACE_ROOT_ENV: &str = "JUDGE_WORKSPACE_ROOT";
pub const CONSOLE_LINES_ENV: &str = "JUDGE_CONSOLE_LINES";

/// Safety limits to keep pathological inputs away from the compiler
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// How to compile one native language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub language: Language,
    pub compiler: String,
    pub std_flag: String,
    pub opt_flag: String,
    #[serde(default)]
    pub extra_flags: Vec<String>,
    /// Placed after the source file so the linker sees them last.
    #[serde(default)]
    pub link_flags: Vec<String>,
    pub source_file: String,
    pub binary_file: String,
}

impl Toolchain {
    pub fn gcc() -> Self {
        Self {
            language: Language::C,
            compiler: "gcc".to_string(),
            std_flag: "-std=c11".to_string(),
            opt_flag: "-O2".to_string(),
            extra_flags: vec!["-fdiagnostics-color=never".to_string()],
            link_flags: vec!["-lm".to_string()],
            source_file: "main.c".to_string(),
            binary_file: "main".to_string(),
        }
    }

    pub fn gpp() -> Self {
        Self {
            language: Language::Cpp,
            compiler: "g++".to_string(),
            std_flag: "-std=c++17".to_string(),
            opt_flag: "-O2".to_string(),
            extra_flags: vec!["-fdiagnostics-color=never".to_string()],
            link_flags: Vec::new(),
            source_file: "main.cpp".to_string(),
            binary_file: "main".to_string(),
        }
    }

    /// Compiler arguments, relative to the workspace directory.
    pub fn compile_args(&self) -> Vec<String> {
        let mut args = vec![self.std_flag.clone(), self.opt_flag.clone()];
        args.extend(self.extra_flags.iter().cloned());
        args.push("-o".to_string());
        args.push(self.binary_file.clone());
        args.push(self.source_file.clone());
        args.extend(self.link_flags.iter().cloned());
        args
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolchainsJson {
    toolchains: Vec<Toolchain>,
}

/// Toolchain registry for the native languages
#[derive(Debug, Clone)]
pub struct ToolchainRegistry {
    toolchains: HashMap<Language, Toolchain>,
}

impl Default for ToolchainRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolchainRegistry {
    /// gcc for C, g++ for C++
    pub fn builtin() -> Self {
        let mut toolchains = HashMap::new();
        for toolchain in [Toolchain::gcc(), Toolchain::gpp()] {
            toolchains.insert(toolchain.language, toolchain);
        }
        Self { toolchains }
    }

    /// Load toolchains.json; entries replace the built-in ones per language.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Toolchain config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let toolchains_json: ToolchainsJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut registry = Self::builtin();
        for toolchain in toolchains_json.toolchains {
            if toolchain.language.is_script() {
                bail!(
                    "Language '{}' is interpreted in-process and cannot have a toolchain",
                    toolchain.language
                );
            }
            if toolchain.compiler.trim().is_empty() {
                bail!("Toolchain for '{}' has an empty compiler", toolchain.language);
            }
            registry.toolchains.insert(toolchain.language, toolchain);
        }

        Ok(registry)
    }

    /// Load config/toolchains.json when present, built-in defaults otherwise
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new(DEFAULT_TOOLCHAINS_PATH);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::builtin())
        }
    }

    /// Apply `JUDGE_CC` / `JUDGE_CXX` compiler overrides.
    pub fn with_env_overrides(mut self) -> Self {
        for (language, key) in [(Language::C, CC_ENV), (Language::Cpp, CXX_ENV)] {
            if let Ok(compiler) = std::env::var(key) {
                if compiler.trim().is_empty() {
                    continue;
                }
                if let Some(toolchain) = self.toolchains.get_mut(&language) {
                    toolchain.compiler = compiler;
                }
            }
        }
        self
    }

    pub fn get(&self, language: Language) -> Option<&Toolchain> {
        self.toolchains.get(&language)
    }

    pub fn insert(&mut self, toolchain: Toolchain) {
        self.toolchains.insert(toolchain.language, toolchain);
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.toolchains.keys().map(|l| l.to_string()).collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Toolchain> {
        self.toolchains.values()
    }
}

/// Everything the engine needs besides the request itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parent directory for per-request workspaces.
    pub workspace_root: PathBuf,
    pub toolchains: ToolchainRegistry,
    pub default_limits: ExecutionLimits,
    /// Most recent console lines kept by the script sandbox.
    pub console_line_limit: usize,
    pub script_memory_limit_bytes: usize,
    pub max_source_bytes: usize,
    pub max_input_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("codejudge"),
            toolchains: ToolchainRegistry::builtin(),
            default_limits: ExecutionLimits::default(),
            console_line_limit: 100,
            script_memory_limit_bytes: 32 * 1024 * 1024,
            max_source_bytes: MAX_SOURCE_CODE_BYTES,
            max_input_bytes: MAX_TEST_INPUT_BYTES,
        }
    }
}

impl EngineConfig {
    /// Defaults plus every `JUDGE_*` environment override.
    pub fn from_env() -> Result<Self> {
        let toolchains = match std::env::var(TOOLCHAINS_ENV) {
            Ok(path) => ToolchainRegistry::load(Path::new(&path))?,
            Err(_) => ToolchainRegistry::load_default()?,
        };

        let mut config = Self {
            toolchains: toolchains.with_env_overrides(),
            default_limits: ExecutionLimits::from_env(),
            ..Self::default()
        };

        if let Ok(root) = std::env::var(WORKSPACE_ROOT_ENV) {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(lines) = std::env::var(CONSOLE_LINES_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            config.console_line_limit = lines.max(1);
        }

        Ok(config)
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_toolchains(mut self, toolchains: ToolchainRegistry) -> Self {
        self.toolchains = toolchains;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_toolchains() {
        let registry = ToolchainRegistry::builtin();
        assert_eq!(registry.list_languages(), vec!["c", "cpp"]);
        assert!(registry.get(Language::Javascript).is_none());
        assert_eq!(registry.get(Language::Cpp).unwrap().compiler, "g++");
    }

    #[test]
    fn test_compile_args_order() {
        let args = Toolchain::gcc().compile_args();
        assert_eq!(args[0], "-std=c11");
        assert_eq!(args[1], "-O2");
        let out = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[out + 1], "main");
        assert_eq!(args[out + 2], "main.c");
        assert_eq!(args.last().unwrap(), "-lm");
    }

    #[test]
    fn test_load_overrides_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "toolchains": [ {{
                "language": "cpp", "compiler": "clang++", "std_flag": "-std=c++20",
                "opt_flag": "-O1", "source_file": "main.cpp", "binary_file": "a.out"
            }} ] }}"#
        )
        .unwrap();

        let registry = ToolchainRegistry::load(file.path()).unwrap();

        let cpp = registry.get(Language::Cpp).unwrap();
        assert_eq!(cpp.compiler, "clang++");
        assert_eq!(cpp.binary_file, "a.out");
        assert_eq!(registry.get(Language::C).unwrap().compiler, "gcc");
    }

    #[test]
    fn test_load_rejects_script_language() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "toolchains": [ {{
                "language": "javascript", "compiler": "node", "std_flag": "",
                "opt_flag": "", "source_file": "main.js", "binary_file": "main"
            }} ] }}"#
        )
        .unwrap();

        assert!(ToolchainRegistry::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = ToolchainRegistry::load(Path::new("/definitely/not/here.json"));
        assert!(result.is_err());
    }
}
