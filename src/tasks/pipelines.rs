//! Command lists for the install and model download pipelines.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use super::TaskError;
use crate::system::Platform;

pub const WINDOWS_SETUP_SCRIPT: &str = "AI-Toolkit-Easy-Install.bat";

const GITHUB_CLONE: &str = "git clone https://github.com";
const GITHUB_CLONE_MIRROR: &str = "git clone https://ghfast.top/https://github.com";

/// Bootstrap commands for the training toolkit on Linux, installed into
/// `base_dir`.
pub fn linux_setup_commands(base_dir: &Path, github_accelerator: bool) -> Vec<String> {
    let base = base_dir.to_string_lossy();
    let commands = vec![
        "pip install huggingface_hub".to_string(),
        "pip install modelscope".to_string(),
        "curl -sL https://deb.nodesource.com/setup_20.x | bash -".to_string(),
        "apt install -y nodejs".to_string(),
        format!(
            "mkdir -p {base} && cd {base} && if [ ! -d ai-toolkit ]; then \
             git clone https://github.com/ostris/ai-toolkit.git; else git -C ai-toolkit pull; fi"
        ),
        format!("cd {base}/ai-toolkit && pip install -r requirements.txt"),
    ];

    if !github_accelerator {
        return commands;
    }
    commands
        .into_iter()
        .map(|command| command.replace(GITHUB_CLONE, GITHUB_CLONE_MIRROR))
        .collect()
}

/// Setup pipeline for the current platform. Outside Linux the bundled
/// installer script in `script_dir` is called and must exist.
pub fn setup_commands(
    platform: &Platform,
    base_dir: &Path,
    script_dir: &Path,
    github_accelerator: bool,
) -> Result<Vec<String>, TaskError> {
    if platform.is_linux {
        return Ok(linux_setup_commands(base_dir, github_accelerator));
    }

    let script = script_dir.join(WINDOWS_SETUP_SCRIPT);
    if !script.exists() {
        return Err(TaskError::InvalidRequest(format!(
            "{} not found, make sure it is in the project root",
            WINDOWS_SETUP_SCRIPT
        )));
    }
    Ok(vec![format!("call \"{}\"", script.to_string_lossy())])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadSource {
    ModelScope,
    HuggingFace,
}

impl FromStr for DownloadSource {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modelscope" => Ok(DownloadSource::ModelScope),
            "huggingface" => Ok(DownloadSource::HuggingFace),
            other => Err(TaskError::InvalidRequest(format!(
                "Unknown download source: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadSource::ModelScope => f.write_str("modelscope"),
            DownloadSource::HuggingFace => f.write_str("huggingface"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadModel {
    QwenImageEdit2509,
    FluxKontextDev,
}

impl DownloadModel {
    /// Name used in requests and as the target directory.
    pub fn name(&self) -> &'static str {
        match self {
            DownloadModel::QwenImageEdit2509 => "Qwen-Image-Edit-2509",
            DownloadModel::FluxKontextDev => "FLUX.1-Kontext-dev",
        }
    }

    pub fn repository(&self) -> &'static str {
        match self {
            DownloadModel::QwenImageEdit2509 => "Qwen/Qwen-Image-Edit-2509",
            DownloadModel::FluxKontextDev => "black-forest-labs/FLUX.1-Kontext-dev",
        }
    }
}

impl FromStr for DownloadModel {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Qwen-Image-Edit-2509" => Ok(DownloadModel::QwenImageEdit2509),
            "FLUX.1-Kontext-dev" => Ok(DownloadModel::FluxKontextDev),
            other => Err(TaskError::InvalidRequest(format!("Unknown model: {}", other))),
        }
    }
}

/// A validated download: where it comes from, where it goes and the command
/// that performs it.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub model: DownloadModel,
    pub source: DownloadSource,
    pub target_dir: PathBuf,
    pub command: String,
}

impl DownloadPlan {
    pub fn new(model: &str, source: &str, base_dir: &Path) -> Result<Self, TaskError> {
        let model: DownloadModel = model.trim().parse()?;
        let source: DownloadSource = source.trim().parse()?;
        let target_dir = base_dir.join(model.name());
        let target = target_dir.to_string_lossy();

        let command = match source {
            DownloadSource::ModelScope => format!(
                "modelscope download --model {} --local_dir \"{}\"",
                model.repository(),
                target
            ),
            DownloadSource::HuggingFace => format!(
                "huggingface-cli download {} --local-dir \"{}\"",
                model.repository(),
                target
            ),
        };

        Ok(Self {
            model,
            source,
            target_dir,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> Platform {
        Platform {
            os: "Linux".to_string(),
            is_linux: true,
        }
    }

    #[test]
    fn test_linux_setup_uses_base_dir() {
        let commands = linux_setup_commands(Path::new("/data/models"), false);
        assert_eq!(commands.len(), 6);
        assert!(commands[4].starts_with("mkdir -p /data/models && cd /data/models"));
        assert!(commands[4].contains("git clone https://github.com/ostris/ai-toolkit.git"));
        assert_eq!(
            commands[5],
            "cd /data/models/ai-toolkit && pip install -r requirements.txt"
        );
    }

    #[test]
    fn test_github_accelerator_rewrites_clone() {
        let commands = linux_setup_commands(Path::new("/root/autodl-tmp"), true);
        assert!(commands[4].contains("git clone https://ghfast.top/https://github.com/ostris"));
        assert!(commands.iter().filter(|c| c.contains("ghfast.top")).count() == 1);
    }

    #[test]
    fn test_setup_requires_windows_script() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let windows = Platform {
            os: "Windows".to_string(),
            is_linux: false,
        };

        assert!(matches!(
            setup_commands(&windows, temp_dir.path(), temp_dir.path(), false),
            Err(TaskError::InvalidRequest(_))
        ));

        std::fs::write(temp_dir.path().join(WINDOWS_SETUP_SCRIPT), "@echo off").unwrap();
        let commands = setup_commands(&windows, temp_dir.path(), temp_dir.path(), false).unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("call \""));

        let linux_commands = setup_commands(&linux(), temp_dir.path(), temp_dir.path(), false).unwrap();
        assert_eq!(linux_commands.len(), 6);
    }

    #[test]
    fn test_download_plan() {
        let plan = DownloadPlan::new("FLUX.1-Kontext-dev", "huggingface", Path::new("/m")).unwrap();
        assert_eq!(plan.target_dir, PathBuf::from("/m/FLUX.1-Kontext-dev"));
        assert_eq!(
            plan.command,
            "huggingface-cli download black-forest-labs/FLUX.1-Kontext-dev --local-dir \"/m/FLUX.1-Kontext-dev\""
        );

        let plan = DownloadPlan::new("Qwen-Image-Edit-2509", "modelscope", Path::new("/m")).unwrap();
        assert!(plan.command.starts_with("modelscope download --model Qwen/Qwen-Image-Edit-2509 --local_dir"));

        assert!(DownloadPlan::new("SDXL", "modelscope", Path::new("/m")).is_err());
        assert!(DownloadPlan::new("FLUX.1-Kontext-dev", "civitai", Path::new("/m")).is_err());
    }
}
