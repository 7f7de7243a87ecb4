use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// 启动本地无头浏览器
///
/// 没有可连接的调试端口时使用（`browser_debug_port = 0`）。
pub async fn launch_headless_browser() -> Result<Browser> {
    info!("🚀 启动无头浏览器...");

    let config = BrowserConfig::builder()
        .new_headless_mode()
        .args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
        ])
        .build()
        .map_err(|e| {
            error!("配置无头浏览器失败: {}", e);
            anyhow::anyhow!("配置无头浏览器失败: {}", e)
        })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        anyhow::anyhow!("启动无头浏览器失败: {}", e)
    })?;
    debug!("无头浏览器启动成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    sleep(tokio::time::Duration::from_millis(300)).await;

    Ok(browser)
}
