//! # Config Loader
//!
//! 读取遥测管道配置文件，产出 `PipelineBlueprint`。
//!
//! - TOML (推荐) / JSON，按扩展名识别
//! - 解析后按规则校验 (broker、topic 通配符、存活检测、工作池、输出端)
//! - 需要叠加命令行覆盖时先 [`ConfigLoader::parse_from_path`]，覆盖后再 [`validate`]
//! - [`ConfigLoader::render`] 输出生效配置，token 已脱敏
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("telemetry.toml")).unwrap();
//! for topic in &blueprint.broker.topics {
//!     println!("subscribe {topic}");
//! }
//! println!("model types: {:?}", blueprint.routing.model_sensor_types);
//! ```

mod parser;
mod validator;

pub use contracts::PipelineBlueprint;
pub use parser::ConfigFormat;
pub use validator::validate;

use contracts::ContractError;
use std::path::Path;

/// 脱敏后的 token 占位
pub const REDACTED: &str = "<redacted>";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从文件加载并校验
    ///
    /// # Errors
    /// 读取失败、扩展名不支持、解析失败或校验失败
    pub fn load_from_path(path: &Path) -> Result<PipelineBlueprint, ContractError> {
        let blueprint = Self::parse_from_path(path)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// 从字符串加载并校验
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<PipelineBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// 只解析不校验，供命令行 / 环境变量覆盖后再统一校验
    pub fn parse_from_path(path: &Path) -> Result<PipelineBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        parser::parse(&content, format)
    }

    /// 渲染生效配置，Influx token 替换为 [`REDACTED`]
    pub fn render(
        blueprint: &PipelineBlueprint,
        format: ConfigFormat,
    ) -> Result<String, ContractError> {
        let mut shown = blueprint.clone();
        if shown.time_series.token.is_some() {
            shown.time_series.token = Some(REDACTED.to_string());
        }

        match format {
            ConfigFormat::Toml => toml::to_string_pretty(&shown)
                .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}"))),
            ConfigFormat::Json => serde_json::to_string_pretty(&shown)
                .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}"))),
        }
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}
