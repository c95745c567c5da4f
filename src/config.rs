//! 配置加载
//!
//! TOML 文件加上 TASKLOOP__ 前缀的环境变量覆盖。缺省值与
//! `SchedulerBuilder` 的缺省值一致，配置文件可以只写需要覆盖的字段。

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use taskloop_errors::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/taskloop".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub scheduler_name: Option<String>,
    pub threadpool_size: usize,
    pub polling_interval_seconds: u64,
    pub polling_limit: Option<usize>,
    pub heartbeat_interval_seconds: u64,
    pub shutdown_wait_seconds: u64,
    pub enable_immediate_execution: bool,
    pub database: DatabaseConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: None,
            threadpool_size: 10,
            polling_interval_seconds: 10,
            polling_limit: None,
            heartbeat_interval_seconds: 5 * 60,
            shutdown_wait_seconds: 30 * 60,
            enable_immediate_execution: false,
            database: DatabaseConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// 加载配置。`config_path` 为空时按默认路径查找，找不到就全用缺省值
    pub fn load(config_path: Option<&str>) -> SchedulerResult<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(SchedulerError::config_error(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            for path in ["config/taskloop.toml", "taskloop.toml"] {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix("TASKLOOP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SchedulerError::config_error(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| SchedulerError::config_error(e.to_string()))
    }
}
