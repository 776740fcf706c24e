//! 命令行参数：`reel [OPTIONS] <REQUEST>...`

use std::path::PathBuf;

use clap::Parser;

use crate::agents::UserPreferences;

#[derive(Debug, Parser)]
#[command(name = "reel", version, about = "Multi-stage video production orchestrator")]
pub struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 画面风格
    #[arg(long)]
    pub style: Option<String>,

    /// 旁白音色
    #[arg(long)]
    pub voice: Option<String>,

    /// 画幅比例，如 16:9、9:16
    #[arg(long = "aspect")]
    pub aspect_ratio: Option<String>,

    /// 旁白与字幕语言
    #[arg(long)]
    pub language: Option<String>,

    /// 成片格式，如 mp4
    #[arg(long = "format")]
    pub export_format: Option<String>,

    /// 主题或来源 URL（多个词会拼成一句）
    #[arg(required = true, num_args = 1..)]
    pub request: Vec<String>,
}

impl Cli {
    pub fn request_text(&self) -> String {
        self.request.join(" ")
    }

    pub fn preferences(&self) -> UserPreferences {
        UserPreferences {
            style: self.style.clone(),
            voice: self.voice.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            language: self.language.clone(),
            export_format: self.export_format.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_become_preferences() {
        let cli = Cli::try_parse_from([
            "reel", "--aspect", "9:16", "--voice", "warm", "--config", "studio.toml", "Ocean", "tides",
        ])
        .unwrap();
        assert_eq!(cli.request_text(), "Ocean tides");
        assert_eq!(cli.config, Some(PathBuf::from("studio.toml")));
        let prefs = cli.preferences();
        assert_eq!(prefs.aspect_ratio.as_deref(), Some("9:16"));
        assert_eq!(prefs.voice.as_deref(), Some("warm"));
        assert!(prefs.style.is_none());
        assert!(!prefs.is_empty());
    }

    #[test]
    fn test_request_is_required() {
        assert!(Cli::try_parse_from(["reel", "--voice", "warm"]).is_err());
    }
}
