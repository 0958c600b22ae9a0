use anyhow::Result;
use article_publisher::{logger, App, Config};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logger::init();

    // 加载配置：第一个参数为可选的 TOML 配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // 初始化并运行应用
    App::initialize(config).await?.run().await
}
